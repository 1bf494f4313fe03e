// Conversation controller: drives turns for one mounted chat view.
//
// A turn is a spawned task that chains two stages (version, then
// clarification or error). State, events and the loading flag live in the
// shared ChatStore session, so every view on a conversation sees the same
// thing. At most one view owns the running turn. A controller is bound to
// the conversation generation it was mounted on; once that conversation is
// replaced or cleared its operations fail and late stage results are dropped.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, info_span, instrument, warn, Instrument};

use crate::chat_store::{ChatStore, Session};
use crate::conversation::{
    ConversationConfig, ConversationError, ConversationSnapshot, ConversationState, Phase,
};
use crate::message::{ClarificationIntent, Message, MessageId};
use crate::stage::{CancelToken, StageError, StageRunner};

pub use crate::chat_store::ConversationEvent;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControllerError {
    #[error("no conversation to show; start one from the landing page")]
    EmptyConversation,
    #[error("the chat view has been disposed")]
    Disposed,
    #[error("this conversation was replaced by a newer one")]
    Superseded,
    #[error(transparent)]
    Conversation(#[from] ConversationError),
    #[error(transparent)]
    Stage(#[from] StageError),
}

#[derive(Clone)]
pub struct ConversationController {
    store: ChatStore,
    config: Arc<ConversationConfig>,
    runner: StageRunner,
    cancel: CancelToken,
    view: u64,
    generation: u64,
    events: broadcast::Sender<ConversationEvent>,
    turn: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ConversationController {
    /// Attaches a controller to the store. An empty store has nothing to show,
    /// and the caller is expected to send the user back to the landing view.
    pub async fn mount(
        store: ChatStore,
        config: Arc<ConversationConfig>,
    ) -> Result<Self, ControllerError> {
        let session = store.read().await;
        if session.conversation.is_empty() {
            return Err(ControllerError::EmptyConversation);
        }
        let cancel = CancelToken::new();
        let runner = StageRunner::with_loading(config.stage_delay, cancel.clone(), session.loading.clone());
        let generation = session.generation;
        let events = session.events.clone();
        drop(session);

        let view = store.next_view_id();
        info!(view, generation, "Chat view mounted");
        Ok(Self {
            store,
            config,
            runner,
            cancel,
            view,
            generation,
            events,
            turn: Arc::new(Mutex::new(None)),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConversationEvent> {
        self.events.subscribe()
    }

    /// Loading flag shared by every view on this conversation.
    pub fn loading(&self) -> watch::Receiver<bool> {
        self.runner.loading()
    }

    pub fn is_loading(&self) -> bool {
        self.runner.is_loading()
    }

    pub fn config(&self) -> &ConversationConfig {
        &self.config
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub async fn snapshot(&self) -> ConversationSnapshot {
        self.store
            .read()
            .await
            .conversation
            .snapshot(self.runner.is_loading())
    }

    /// Continues a turn left unfinished, e.g. a fresh landing prompt or a view
    /// that was disposed mid-turn. Returns true when this view started a turn;
    /// false when nothing is owed or another view is already running it.
    pub async fn resume(&self) -> Result<bool, ControllerError> {
        self.ensure_active()?;
        let mut session = self.store.write().await;
        self.ensure_current(&session)?;
        if let Some(owner) = session.turn_owner {
            debug!(owner, "Turn already running in another view");
            return Ok(false);
        }
        if !session.conversation.resume() {
            return Ok(false);
        }
        session.turn_owner = Some(self.view);
        drop(session);
        self.spawn_turn().await;
        Ok(true)
    }

    #[instrument(skip(self), fields(view = self.view))]
    pub async fn submit(&self, text: &str) -> Result<Message, ControllerError> {
        self.ensure_active()?;
        let mut session = self.store.write().await;
        self.ensure_current(&session)?;
        let message = session.conversation.submit(text)?;
        session.turn_owner = Some(self.view);
        session.publish(ConversationEvent::MessageAppended {
            message: message.clone(),
        });
        session.publish(ConversationEvent::ComposerChanged {
            text: String::new(),
        });
        drop(session);
        self.spawn_turn().await;
        Ok(message)
    }

    pub async fn fix_error(&self) -> Result<Vec<Message>, ControllerError> {
        self.ensure_active()?;
        let mut session = self.store.write().await;
        self.ensure_current(&session)?;
        let appended = session.conversation.fix_error(&self.config)?;
        for message in &appended {
            session.publish(ConversationEvent::MessageAppended {
                message: message.clone(),
            });
        }
        Ok(appended)
    }

    pub async fn answer_clarification(
        &self,
        intent: &ClarificationIntent,
    ) -> Result<String, ControllerError> {
        self.ensure_active()?;
        let mut session = self.store.write().await;
        self.ensure_current(&session)?;
        let text = session.conversation.answer(intent)?;
        debug!(message_id = %intent.message_id, answer = %intent.answer, "Clarification answered");
        session.publish(ConversationEvent::ComposerChanged { text: text.clone() });
        Ok(text)
    }

    pub async fn restore_version(&self, version: u32) -> Result<String, ControllerError> {
        self.ensure_active()?;
        let mut session = self.store.write().await;
        self.ensure_current(&session)?;
        let text = session.conversation.restore_version(version)?;
        session.publish(ConversationEvent::ComposerChanged { text: text.clone() });
        Ok(text)
    }

    pub async fn report_issue(&self, error_id: MessageId) -> Result<(), ControllerError> {
        self.ensure_active()?;
        let session = self.store.read().await;
        self.ensure_current(&session)?;
        let error = session.conversation.error_message(error_id)?;
        warn!(%error_id, content = %error.content, "Issue reported by user");
        Ok(())
    }

    pub async fn clear(&self) -> Result<(), ControllerError> {
        self.ensure_active()?;
        self.ensure_current(&*self.store.read().await)?;
        self.store.clear_messages().await;
        Ok(())
    }

    /// Waits for the turn this view started, if any, to finish.
    pub async fn settled(&self) {
        let handle = self.turn.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                debug!("Turn task ended abnormally: {}", e);
            }
        }
    }

    /// Tears the view down. Pending stages are cancelled and no message is
    /// appended after this returns. A turn left unfinished is handed back to
    /// the conversation so another view can resume it.
    pub async fn dispose(&self) {
        self.cancel.cancel();
        // Any stage already past its cancel check finishes under this lock.
        drop(self.store.write().await);
        // The cancelled stage lowers the shared loading flag before the turn returns.
        self.settled().await;

        let mut session = self.store.write().await;
        if session.generation == self.generation && session.turn_owner == Some(self.view) {
            session.turn_owner = None;
            session.publish(ConversationEvent::TurnReleased);
            debug!(view = self.view, "Released unfinished turn");
        }
        info!(view = self.view, "Chat view disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn ensure_active(&self) -> Result<(), ControllerError> {
        if self.cancel.is_cancelled() {
            Err(ControllerError::Disposed)
        } else {
            Ok(())
        }
    }

    fn ensure_current(&self, session: &Session) -> Result<(), ControllerError> {
        if session.generation == self.generation {
            Ok(())
        } else {
            Err(ControllerError::Superseded)
        }
    }

    async fn spawn_turn(&self) {
        let this = self.clone();
        let handle = tokio::spawn(
            async move {
                match this.run_turn().await {
                    Ok(()) => debug!("Turn finished"),
                    Err(ControllerError::Disposed) | Err(ControllerError::Stage(StageError::Cancelled)) => {
                        debug!("Turn abandoned: view disposed")
                    }
                    Err(ControllerError::Superseded) => debug!("Turn dropped: conversation replaced"),
                    Err(e) => {
                        warn!("Turn stopped early: {}", e);
                        this.release_turn().await;
                    }
                }
            }
            .instrument(info_span!("turn", view = self.view, generation = self.generation)),
        );
        let previous = self.turn.lock().await.replace(handle);
        if let Some(previous) = previous {
            if !previous.is_finished() {
                debug!("Replacing handle of a turn that is still running");
            }
        }
    }

    async fn release_turn(&self) {
        let mut session = self.store.write().await;
        if session.generation == self.generation && session.turn_owner == Some(self.view) {
            session.turn_owner = None;
        }
    }

    async fn run_turn(&self) -> Result<(), ControllerError> {
        let phase = {
            let session = self.store.read().await;
            self.ensure_current(&session)?;
            session.conversation.phase()
        };
        if phase == Phase::AwaitingVersion {
            self.stage(|state, _| state.complete_version_stage()).await?;
        }
        self.stage(|state, config| state.complete_follow_up_stage(config))
            .await?;
        Ok(())
    }

    async fn stage<F>(&self, transition: F) -> Result<Message, ControllerError>
    where
        F: FnOnce(&mut ConversationState, &ConversationConfig) -> Result<Message, ConversationError>
            + Send
            + 'static,
    {
        let this = self.clone();
        let handle = self
            .runner
            .run_stage(move || async move { this.apply(transition).await })?;
        handle.outcome().await.unwrap_or(Err(ControllerError::Disposed))
    }

    async fn apply<F>(&self, transition: F) -> Result<Message, ControllerError>
    where
        F: FnOnce(&mut ConversationState, &ConversationConfig) -> Result<Message, ConversationError>,
    {
        let mut session = self.store.write().await;
        if self.cancel.is_cancelled() {
            debug!("Dropping stage result for a disposed view");
            return Err(ControllerError::Disposed);
        }
        if session.generation != self.generation {
            debug!("Dropping stage result for a replaced conversation");
            return Err(ControllerError::Superseded);
        }
        let message = transition(&mut session.conversation, &self.config)?;
        if session.conversation.phase() == Phase::Idle {
            session.turn_owner = None;
        }
        session.publish(ConversationEvent::MessageAppended {
            message: message.clone(),
        });
        Ok(message)
    }
}
