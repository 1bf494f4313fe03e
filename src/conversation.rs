//! Conversation state and its transitions.
//!
//! Everything here is synchronous; the controller decides when each
//! transition happens and holds the lock around it.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::constants::{
    CLARIFICATION_THRESHOLD, ERROR_TEXT, FIX_FEATURES, INITIAL_FEATURES, REFINEMENT_FEATURES,
    STAGE_DELAY, TYPING_SPEED,
};
use crate::message::{ClarificationIntent, Message, MessageBody, MessageId};
use crate::questions::{default_bank, SEED_QUESTION};
use crate::store::{MessageStore, StoreError};

const REQUEST_SUMMARY_CHARS: usize = 48;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConversationError {
    #[error("the assistant is still working on the previous message")]
    Busy,
    #[error("cannot send an empty message")]
    EmptyMessage,
    #[error("there is no error to fix")]
    NoErrorToFix,
    #[error("message {0} is not a clarification in this conversation")]
    UnknownClarification(MessageId),
    #[error("version {0} does not exist")]
    UnknownVersion(u32),
    #[error("message {0} is not an error in this conversation")]
    UnknownError(MessageId),
    #[error("no stage of that kind is pending")]
    UnexpectedStage,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    AwaitingVersion,
    AwaitingClarificationOrError,
}

/// Fixed parameters of a conversation.
#[derive(Debug, Clone)]
pub struct ConversationConfig {
    pub stage_delay: Duration,
    pub clarification_threshold: u32,
    pub typing_speed: Duration,
    pub seed_question: String,
    pub question_bank: Arc<[String]>,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            stage_delay: STAGE_DELAY,
            clarification_threshold: CLARIFICATION_THRESHOLD,
            typing_speed: TYPING_SPEED,
            seed_question: SEED_QUESTION.to_string(),
            question_bank: default_bank().into(),
        }
    }
}

impl ConversationConfig {
    pub fn with_question_bank(mut self, bank: Vec<String>) -> Self {
        self.question_bank = bank.into();
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConversationState {
    messages: MessageStore,
    current_version: u32,
    clarification_count: u32,
    current_question_index: usize,
    phase: Phase,
    composer: String,
    unresolved_error: Option<MessageId>,
    seed_question_used: bool,
    answers: Vec<ClarificationIntent>,
}

/// Point-in-time copy of the conversation for rendering.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSnapshot {
    pub messages: Vec<Message>,
    pub current_version: u32,
    pub clarification_count: u32,
    pub current_question_index: usize,
    pub phase: Phase,
    pub composer: String,
    pub answers: Vec<ClarificationIntent>,
    pub is_loading: bool,
}

impl ConversationState {
    pub fn new() -> Self {
        Self::default()
    }

    /// A conversation that starts with one user message awaiting a reply.
    pub fn seeded(prompt: impl Into<String>) -> Self {
        let mut state = Self::new();
        // A fresh store cannot hold the id yet.
        let _ = state.messages.append(Message::user(prompt));
        state
    }

    pub fn messages(&self) -> &[Message] {
        self.messages.all()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn current_version(&self) -> u32 {
        self.current_version
    }

    pub fn clarification_count(&self) -> u32 {
        self.clarification_count
    }

    pub fn current_question_index(&self) -> usize {
        self.current_question_index
    }

    pub fn composer(&self) -> &str {
        &self.composer
    }

    pub fn unresolved_error(&self) -> Option<MessageId> {
        self.unresolved_error
    }

    pub fn snapshot(&self, is_loading: bool) -> ConversationSnapshot {
        ConversationSnapshot {
            messages: self.messages.all().to_vec(),
            current_version: self.current_version,
            clarification_count: self.clarification_count,
            current_question_index: self.current_question_index,
            phase: self.phase,
            composer: self.composer.clone(),
            answers: self.answers.clone(),
            is_loading,
        }
    }

    pub fn set_composer(&mut self, text: impl Into<String>) {
        self.composer = text.into();
    }

    /// Appends a message without running the turn machinery.
    pub fn push(&mut self, message: Message) -> Result<Message, ConversationError> {
        Ok(self.messages.append(message)?.clone())
    }

    /// Starts a turn when the conversation ends in an unanswered user message.
    /// Returns true when a stage is now owed.
    pub fn resume(&mut self) -> bool {
        match self.phase {
            Phase::AwaitingVersion | Phase::AwaitingClarificationOrError => true,
            Phase::Idle => {
                let waiting = matches!(self.messages.last(), Some(m) if m.body == MessageBody::User);
                if waiting {
                    self.phase = Phase::AwaitingVersion;
                }
                waiting
            }
        }
    }

    pub fn submit(&mut self, text: &str) -> Result<Message, ConversationError> {
        if self.phase != Phase::Idle {
            return Err(ConversationError::Busy);
        }
        let text = text.trim();
        if text.is_empty() {
            return Err(ConversationError::EmptyMessage);
        }
        let message = self.push(Message::user(text))?;
        self.composer.clear();
        self.phase = Phase::AwaitingVersion;
        Ok(message)
    }

    pub fn complete_version_stage(&mut self) -> Result<Message, ConversationError> {
        if self.phase != Phase::AwaitingVersion {
            return Err(ConversationError::UnexpectedStage);
        }
        let version = self.current_version + 1;
        let (content, features) = if version == 1 {
            (
                "Created version 1 with basic carbon calculator functionality".to_string(),
                INITIAL_FEATURES.iter().map(|f| f.to_string()).collect(),
            )
        } else {
            let mut features = vec![format!("Applied request: {}", self.last_request_summary())];
            features.extend(REFINEMENT_FEATURES.iter().map(|f| f.to_string()));
            (format!("Created version {} based on your feedback", version), features)
        };
        let message = self.push(Message::version(content, version, features))?;
        self.current_version = version;
        self.phase = Phase::AwaitingClarificationOrError;
        info!(version, "Version stage completed");
        Ok(message)
    }

    pub fn complete_follow_up_stage(
        &mut self,
        config: &ConversationConfig,
    ) -> Result<Message, ConversationError> {
        if self.phase != Phase::AwaitingClarificationOrError {
            return Err(ConversationError::UnexpectedStage);
        }
        let message = if self.clarification_count >= config.clarification_threshold {
            let message = self.push(Message::error(ERROR_TEXT))?;
            self.clarification_count = 0;
            self.unresolved_error = Some(message.id);
            info!("Clarification threshold reached, reporting build error");
            message
        } else {
            let question = self.next_question(config);
            let message = self.push(Message::clarification("Checking requirements", question))?;
            self.clarification_count += 1;
            debug!(count = self.clarification_count, "Clarification appended");
            message
        };
        self.phase = Phase::Idle;
        Ok(message)
    }

    /// Synthesises a repaired version and restarts clarifications from the bank's start.
    pub fn fix_error(&mut self, config: &ConversationConfig) -> Result<Vec<Message>, ConversationError> {
        if self.phase != Phase::Idle {
            return Err(ConversationError::Busy);
        }
        let error_id = self.unresolved_error.ok_or(ConversationError::NoErrorToFix)?;
        let version = self.current_version + 1;
        let version_message = self.push(Message::version(
            format!("Fixed the build error in version {}", version),
            version,
            FIX_FEATURES.iter().map(|f| f.to_string()).collect(),
        ))?;
        self.current_version = version;
        self.clarification_count = 0;
        self.current_question_index = 0;
        self.seed_question_used = true;
        let question = self.next_question(config);
        let clarification = self.push(Message::clarification("Checking requirements", question))?;
        self.unresolved_error = None;
        info!(%error_id, version, "Error fixed");
        Ok(vec![version_message, clarification])
    }

    /// Reflects a yes/no answer in the composer; nothing is appended.
    pub fn answer(&mut self, intent: &ClarificationIntent) -> Result<String, ConversationError> {
        match self.messages.get(intent.message_id) {
            Some(m) if m.question().is_some() => {}
            _ => return Err(ConversationError::UnknownClarification(intent.message_id)),
        }
        self.composer = format!("{} {}", intent.question, intent.answer);
        self.answers
            .retain(|a| a.message_id != intent.message_id || a.question != intent.question);
        self.answers.push(intent.clone());
        Ok(self.composer.clone())
    }

    /// Drafts a restore request in the composer; nothing is appended.
    pub fn restore_version(&mut self, version: u32) -> Result<String, ConversationError> {
        let exists = self
            .messages
            .all()
            .iter()
            .any(|m| m.version_number() == Some(version));
        if !exists {
            return Err(ConversationError::UnknownVersion(version));
        }
        self.composer = format!("Restore version {}", version);
        Ok(self.composer.clone())
    }

    pub fn error_message(&self, id: MessageId) -> Result<&Message, ConversationError> {
        self.messages
            .get(id)
            .filter(|m| m.is_error())
            .ok_or(ConversationError::UnknownError(id))
    }

    fn next_question(&mut self, config: &ConversationConfig) -> String {
        if !self.seed_question_used {
            self.seed_question_used = true;
            return config.seed_question.clone();
        }
        let bank = &config.question_bank;
        if bank.is_empty() {
            return config.seed_question.clone();
        }
        let index = self.current_question_index % bank.len();
        self.current_question_index = (index + 1) % bank.len();
        bank[index].clone()
    }

    fn last_request_summary(&self) -> String {
        let request = self
            .messages
            .all()
            .iter()
            .rev()
            .find(|m| m.body == MessageBody::User)
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        if request.chars().count() <= REQUEST_SUMMARY_CHARS {
            request.to_string()
        } else {
            let cut: String = request.chars().take(REQUEST_SUMMARY_CHARS).collect();
            format!("{}...", cut.trim_end())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Answer;

    fn run_turn(state: &mut ConversationState, config: &ConversationConfig, text: &str) -> Message {
        state.submit(text).unwrap();
        state.complete_version_stage().unwrap();
        state.complete_follow_up_stage(config).unwrap()
    }

    #[test]
    fn test_seeded_conversation_resumes_into_first_turn() {
        let config = ConversationConfig::default();
        let mut state = ConversationState::seeded("Create a carbon calculator app");

        assert!(state.resume());
        let version = state.complete_version_stage().unwrap();
        let follow_up = state.complete_follow_up_stage(&config).unwrap();

        assert_eq!(version.version_number(), Some(1));
        assert_eq!(follow_up.question(), Some(SEED_QUESTION));
        assert_eq!(state.messages().len(), 3);
        assert_eq!(state.phase(), Phase::Idle);
        assert!(!state.resume());
    }

    #[test]
    fn test_third_turn_ends_in_error_and_restarts_count() {
        let config = ConversationConfig::default();
        let mut state = ConversationState::new();

        assert!(run_turn(&mut state, &config, "one").question().is_some());
        assert!(run_turn(&mut state, &config, "two").question().is_some());
        let third = run_turn(&mut state, &config, "three");
        assert!(third.is_error());
        assert_eq!(third.content, ERROR_TEXT);
        assert_eq!(state.clarification_count(), 0);
        assert_eq!(state.unresolved_error(), Some(third.id));

        assert!(run_turn(&mut state, &config, "four").question().is_some());
    }

    #[test]
    fn test_questions_follow_seed_then_bank_order_with_wraparound() {
        let config = ConversationConfig::default().with_question_bank(vec!["A?".into(), "B?".into()]);
        let mut state = ConversationState::new();
        let mut asked = Vec::new();
        for i in 0..9 {
            let message = run_turn(&mut state, &config, &format!("turn {}", i));
            if let Some(q) = message.question() {
                asked.push(q.to_string());
            }
        }
        assert_eq!(asked, vec![SEED_QUESTION, "A?", "B?", "A?", "B?", "A?"]);
    }

    #[test]
    fn test_submit_is_refused_mid_turn_and_when_empty() {
        let mut state = ConversationState::new();
        assert_eq!(state.submit("   ").unwrap_err(), ConversationError::EmptyMessage);

        state.submit("build it").unwrap();
        assert_eq!(state.submit("again").unwrap_err(), ConversationError::Busy);
        assert_eq!(
            state.complete_follow_up_stage(&ConversationConfig::default()).unwrap_err(),
            ConversationError::UnexpectedStage
        );
    }

    #[test]
    fn test_submit_trims_and_clears_composer() {
        let mut state = ConversationState::new();
        state.set_composer("draft");
        let message = state.submit("  Add a chart  ").unwrap();
        assert_eq!(message.content, "Add a chart");
        assert_eq!(state.composer(), "");
    }

    #[test]
    fn test_fix_error_resets_counters_and_asks_first_bank_question() {
        let config = ConversationConfig::default();
        let mut state = ConversationState::new();
        assert_eq!(state.fix_error(&config).unwrap_err(), ConversationError::NoErrorToFix);

        for text in ["one", "two", "three"] {
            run_turn(&mut state, &config, text);
        }
        let appended = state.fix_error(&config).unwrap();

        assert_eq!(appended[0].version_number(), Some(4));
        assert_eq!(appended[1].question(), Some(config.question_bank[0].as_str()));
        assert_eq!(state.clarification_count(), 0);
        assert_eq!(state.current_question_index(), 1);
        assert!(state.unresolved_error().is_none());
        assert_eq!(state.fix_error(&config).unwrap_err(), ConversationError::NoErrorToFix);
    }

    #[test]
    fn test_later_versions_mention_the_request() {
        let config = ConversationConfig::default();
        let mut state = ConversationState::new();
        run_turn(&mut state, &config, "first");
        state.submit("Add a monthly breakdown chart").unwrap();
        let version = state.complete_version_stage().unwrap();

        match version.body {
            MessageBody::Version { version, features } => {
                assert_eq!(version, 2);
                assert_eq!(features[0], "Applied request: Add a monthly breakdown chart");
            }
            other => panic!("expected a version message, got {:?}", other),
        }
    }

    #[test]
    fn test_long_requests_are_truncated_in_features() {
        let mut state = ConversationState::new();
        state.push(Message::user("x".repeat(100))).unwrap();
        let summary = state.last_request_summary();
        assert!(summary.ends_with("..."));
        assert_eq!(summary.chars().count(), REQUEST_SUMMARY_CHARS + 3);
    }

    #[test]
    fn test_answer_fills_composer_without_appending() {
        let config = ConversationConfig::default();
        let mut state = ConversationState::new();
        let clarification = run_turn(&mut state, &config, "one");
        let before = state.messages().len();

        let text = state
            .answer(&ClarificationIntent {
                message_id: clarification.id,
                question: SEED_QUESTION.to_string(),
                answer: Answer::No,
            })
            .unwrap();

        assert_eq!(text, format!("{} No", SEED_QUESTION));
        assert_eq!(state.composer(), text);
        assert_eq!(state.messages().len(), before);
        assert_eq!(state.snapshot(false).answers[0].answer, Answer::No);

        state
            .answer(&ClarificationIntent {
                message_id: clarification.id,
                question: SEED_QUESTION.to_string(),
                answer: Answer::Yes,
            })
            .unwrap();
        let answers = state.snapshot(false).answers;
        assert_eq!(answers.len(), 1);
        assert_eq!(answers[0].answer, Answer::Yes);
    }

    #[test]
    fn test_new_conversation_is_idle() {
        assert_eq!(Phase::default(), Phase::Idle);
        assert_eq!(ConversationState::new().phase(), Phase::Idle);
    }

    #[test]
    fn test_answer_rejects_non_clarification() {
        let mut state = ConversationState::seeded("hello");
        let user_id = state.messages()[0].id;
        let err = state
            .answer(&ClarificationIntent {
                message_id: user_id,
                question: "q".into(),
                answer: Answer::Yes,
            })
            .unwrap_err();
        assert_eq!(err, ConversationError::UnknownClarification(user_id));
    }

    #[test]
    fn test_restore_version_drafts_request() {
        let config = ConversationConfig::default();
        let mut state = ConversationState::new();
        run_turn(&mut state, &config, "one");

        assert_eq!(state.restore_version(1).unwrap(), "Restore version 1");
        assert_eq!(state.restore_version(7).unwrap_err(), ConversationError::UnknownVersion(7));
    }
}
