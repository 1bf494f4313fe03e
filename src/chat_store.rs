use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{broadcast, watch, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info};

use crate::constants::EVENT_CHANNEL_CAPACITY;
use crate::conversation::{ConversationError, ConversationState};
use crate::message::Message;

/// Changes published to every view mounted on a conversation.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ConversationEvent {
    MessageAppended { message: Message },
    ComposerChanged { text: String },
    /// The view running the turn went away before finishing it.
    TurnReleased,
    Cleared,
    /// A new conversation was started in place of this one.
    Replaced,
}

/// One conversation plus what its views share: the event channel, the
/// loading flag and the view currently running a turn.
pub(crate) struct Session {
    pub(crate) conversation: ConversationState,
    pub(crate) generation: u64,
    pub(crate) turn_owner: Option<u64>,
    pub(crate) events: broadcast::Sender<ConversationEvent>,
    pub(crate) loading: Arc<watch::Sender<bool>>,
}

impl Session {
    fn new(conversation: ConversationState, generation: u64) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (loading, _) = watch::channel(false);
        Self {
            conversation,
            generation,
            turn_owner: None,
            events,
            loading: Arc::new(loading),
        }
    }

    pub(crate) fn publish(&self, event: ConversationEvent) {
        if self.events.send(event).is_err() {
            debug!("No subscribers for conversation event");
        }
    }
}

/// Process-wide conversation container shared by the landing and chat views.
///
/// Views receive a clone; the conversation lives until `clear_messages` or
/// `start_conversation` replaces it, which bumps the generation.
#[derive(Clone)]
pub struct ChatStore {
    session: Arc<RwLock<Session>>,
    next_view: Arc<AtomicU64>,
}

impl Default for ChatStore {
    fn default() -> Self {
        Self::with_conversation(ConversationState::new())
    }
}

impl ChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store holding one user message that still awaits its first turn.
    pub fn seeded(prompt: impl Into<String>) -> Self {
        Self::with_conversation(ConversationState::seeded(prompt))
    }

    fn with_conversation(conversation: ConversationState) -> Self {
        Self {
            session: Arc::new(RwLock::new(Session::new(conversation, 0))),
            next_view: Arc::new(AtomicU64::new(1)),
        }
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.session.read().await.conversation.messages().to_vec()
    }

    pub async fn is_empty(&self) -> bool {
        self.session.read().await.conversation.is_empty()
    }

    pub async fn generation(&self) -> u64 {
        self.session.read().await.generation
    }

    /// Subscribes to the current conversation's events.
    pub async fn subscribe(&self) -> broadcast::Receiver<ConversationEvent> {
        self.session.read().await.events.subscribe()
    }

    pub async fn send_message(&self, message: Message) -> Result<(), ConversationError> {
        let mut session = self.session.write().await;
        let message = session.conversation.push(message)?;
        session.publish(ConversationEvent::MessageAppended { message });
        Ok(())
    }

    pub async fn clear_messages(&self) {
        let mut session = self.session.write().await;
        session.publish(ConversationEvent::Cleared);
        let generation = session.generation + 1;
        *session = Session::new(ConversationState::new(), generation);
        info!(generation, "Conversation cleared");
    }

    /// Replaces any previous conversation with a fresh one opened by `prompt`.
    pub async fn start_conversation(&self, prompt: &str) -> Result<(), ConversationError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(ConversationError::EmptyMessage);
        }
        let mut session = self.session.write().await;
        session.publish(ConversationEvent::Replaced);
        let generation = session.generation + 1;
        *session = Session::new(ConversationState::seeded(prompt), generation);
        info!(prompt, generation, "Conversation started");
        Ok(())
    }

    pub(crate) fn next_view_id(&self) -> u64 {
        self.next_view.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) async fn read(&self) -> RwLockReadGuard<'_, Session> {
        self.session.read().await
    }

    pub(crate) async fn write(&self) -> RwLockWriteGuard<'_, Session> {
        self.session.write().await
    }
}
