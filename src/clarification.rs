//! Expands a clarification message into a short typed question sequence.
//!
//! The sequence is an intro line, a handful of yes/no questions and an outro
//! line. Items appear one at a time: each is typed out character by
//! character, and a question must be answered before the next one appears.

use std::time::Duration;

use rand::seq::index;
use rand::Rng;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::constants::{MAX_SEQUENCE_QUESTIONS, MIN_SEQUENCE_QUESTIONS};
use crate::message::{Answer, ClarificationIntent, Message, MessageId};
use crate::stage::CancelToken;

pub const INTRO_TEXT: &str = "Before I build the next version, I have a few quick questions.";
pub const OUTRO_TEXT: &str = "Thanks! I'll use your answers to shape the next version.";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RendererError {
    #[error("message {0} is not a clarification")]
    NotAClarification(MessageId),
    #[error("question {0} is not the one awaiting an answer")]
    NotCurrent(usize),
}

/// Reveals text one character at a time.
#[derive(Debug, Clone)]
pub struct Typewriter {
    text: String,
    revealed: usize,
    total: usize,
}

impl Typewriter {
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        let total = text.chars().count();
        Self {
            text,
            revealed: 0,
            total,
        }
    }

    /// Reveals the next character; returns true once everything is visible.
    pub fn tick(&mut self) -> bool {
        if self.revealed < self.total {
            self.revealed += 1;
        }
        self.is_done()
    }

    pub fn complete(&mut self) {
        self.revealed = self.total;
    }

    pub fn is_done(&self) -> bool {
        self.revealed >= self.total
    }

    pub fn visible(&self) -> &str {
        match self.text.char_indices().nth(self.revealed) {
            Some((end, _)) => &self.text[..end],
            None => &self.text,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    Intro,
    Question(usize),
    Outro,
    Done,
}

#[derive(Debug, Clone)]
struct SequenceQuestion {
    writer: Typewriter,
    answer: Option<Answer>,
}

/// One rendered line of the sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenderedItem {
    pub text: String,
    pub completed: bool,
    pub answer: Option<Answer>,
}

type VisibleCallback = Box<dyn FnMut(usize) + Send>;

pub struct ClarificationSequence {
    message_id: MessageId,
    intro: Typewriter,
    questions: Vec<SequenceQuestion>,
    outro: Typewriter,
    step: Step,
    on_visible: Option<VisibleCallback>,
}

impl ClarificationSequence {
    /// Builds the sequence for `message`: its own question first, then
    /// distinct questions sampled from `bank`.
    pub fn expand<R: Rng + ?Sized>(
        message: &Message,
        bank: &[String],
        rng: &mut R,
    ) -> Result<Self, RendererError> {
        let trigger = message
            .question()
            .ok_or(RendererError::NotAClarification(message.id))?;
        let others: Vec<&String> = bank.iter().filter(|q| q.as_str() != trigger).collect();

        let wanted = rng.random_range(MIN_SEQUENCE_QUESTIONS..=MAX_SEQUENCE_QUESTIONS);
        let extra = (wanted - 1).min(others.len());
        let mut questions = vec![trigger.to_string()];
        questions.extend(index::sample(rng, others.len(), extra).into_iter().map(|i| others[i].clone()));
        debug!(message_id = %message.id, count = questions.len(), "Clarification sequence expanded");

        Ok(Self::from_parts(message.id, INTRO_TEXT, questions, OUTRO_TEXT))
    }

    pub fn from_parts(
        message_id: MessageId,
        intro: impl Into<String>,
        questions: Vec<String>,
        outro: impl Into<String>,
    ) -> Self {
        Self {
            message_id,
            intro: Typewriter::new(intro),
            questions: questions
                .into_iter()
                .map(|q| SequenceQuestion {
                    writer: Typewriter::new(q),
                    answer: None,
                })
                .collect(),
            outro: Typewriter::new(outro),
            step: Step::Intro,
            on_visible: None,
        }
    }

    /// Registers a callback that receives the visible item count after every transition.
    pub fn on_visible_change(&mut self, callback: impl FnMut(usize) + Send + 'static) {
        self.on_visible = Some(Box::new(callback));
        self.notify();
    }

    pub fn message_id(&self) -> MessageId {
        self.message_id
    }

    pub fn step(&self) -> Step {
        self.step
    }

    pub fn is_done(&self) -> bool {
        self.step == Step::Done
    }

    pub fn intro(&self) -> &str {
        self.intro.text()
    }

    pub fn outro(&self) -> &str {
        self.outro.text()
    }

    pub fn questions(&self) -> Vec<&str> {
        self.questions.iter().map(|q| q.writer.text()).collect()
    }

    /// Number of items currently on screen (intro, questions, outro).
    pub fn visible_count(&self) -> usize {
        match self.step {
            Step::Intro => 1,
            Step::Question(i) => 2 + i,
            Step::Outro | Step::Done => 2 + self.questions.len(),
        }
    }

    /// Full text of the item currently being typed or awaiting an answer.
    pub fn current_text(&self) -> Option<&str> {
        self.current_writer().map(Typewriter::text)
    }

    /// True when the current item is fully typed out.
    pub fn current_typed(&self) -> bool {
        match self.current_writer() {
            Some(writer) => writer.is_done(),
            None => true,
        }
    }

    /// Reveals one character of the current item.
    pub fn tick(&mut self) {
        let finished = match self.current_writer_mut() {
            Some(writer) => writer.tick(),
            None => return,
        };
        if finished {
            self.after_typed();
        }
    }

    /// Finishes typing the current item at once.
    pub fn skip_typing(&mut self) {
        if let Some(writer) = self.current_writer_mut() {
            writer.complete();
            self.after_typed();
        }
    }

    /// Answers the question awaiting a response and moves on.
    pub fn resolve(&mut self, index: usize, answer: Answer) -> Result<ClarificationIntent, RendererError> {
        if self.step != Step::Question(index) {
            return Err(RendererError::NotCurrent(index));
        }
        let question = &mut self.questions[index];
        question.writer.complete();
        question.answer = Some(answer);
        let intent = ClarificationIntent {
            message_id: self.message_id,
            question: question.writer.text().to_string(),
            answer,
        };
        self.step = if index + 1 < self.questions.len() {
            Step::Question(index + 1)
        } else {
            Step::Outro
        };
        self.notify();
        Ok(intent)
    }

    /// Drives the per-character timer until the current item is typed out.
    /// Returns false if cancelled first.
    pub async fn type_current(&mut self, speed: Duration, cancel: &CancelToken) -> bool {
        let typing = self.step;
        while self.step == typing && !self.current_typed() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(speed) => self.tick(),
            }
        }
        true
    }

    pub fn render(&self) -> Vec<RenderedItem> {
        let mut items = vec![RenderedItem {
            text: self.intro.visible().to_string(),
            completed: self.step != Step::Intro,
            answer: None,
        }];
        let shown = match self.step {
            Step::Intro => 0,
            Step::Question(i) => i + 1,
            Step::Outro | Step::Done => self.questions.len(),
        };
        for question in &self.questions[..shown] {
            let text = if question.answer.is_some() {
                question.writer.text()
            } else {
                question.writer.visible()
            };
            items.push(RenderedItem {
                text: text.to_string(),
                completed: question.answer.is_some(),
                answer: question.answer,
            });
        }
        if matches!(self.step, Step::Outro | Step::Done) {
            items.push(RenderedItem {
                text: self.outro.visible().to_string(),
                completed: self.step == Step::Done,
                answer: None,
            });
        }
        items
    }

    fn current_writer(&self) -> Option<&Typewriter> {
        match self.step {
            Step::Intro => Some(&self.intro),
            Step::Question(i) => Some(&self.questions[i].writer),
            Step::Outro => Some(&self.outro),
            Step::Done => None,
        }
    }

    fn current_writer_mut(&mut self) -> Option<&mut Typewriter> {
        match self.step {
            Step::Intro => Some(&mut self.intro),
            Step::Question(i) => Some(&mut self.questions[i].writer),
            Step::Outro => Some(&mut self.outro),
            Step::Done => None,
        }
    }

    fn after_typed(&mut self) {
        match self.step {
            Step::Intro => {
                self.step = if self.questions.is_empty() {
                    Step::Outro
                } else {
                    Step::Question(0)
                };
                self.notify();
            }
            Step::Outro => {
                self.step = Step::Done;
                self.notify();
            }
            // Questions wait for an answer.
            Step::Question(_) | Step::Done => {}
        }
    }

    fn notify(&mut self) {
        let count = self.visible_count();
        if let Some(callback) = self.on_visible.as_mut() {
            callback(count);
        }
    }
}
