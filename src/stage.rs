//! Simulated "assistant is working" stages.
//!
//! A stage waits a fixed delay and then runs its callback once. The loading
//! flag is raised for exactly the duration of the wait, and a [`CancelToken`]
//! shared with the owning view suppresses callbacks after it is disposed.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StageError {
    #[error("another stage is still pending")]
    AlreadyPending,
    #[error("the owning view has been disposed")]
    Cancelled,
}

/// Cloneable one-shot cancellation signal.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only returns on cancel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// A scheduled stage; resolves to the callback's result, or `None` if cancelled.
#[derive(Debug)]
pub struct StageHandle<T> {
    task: JoinHandle<Option<T>>,
}

impl<T> StageHandle<T> {
    pub async fn outcome(self) -> Option<T> {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                debug!("Stage task did not complete: {}", e);
                None
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct StageRunner {
    delay: Duration,
    loading: Arc<watch::Sender<bool>>,
    cancel: CancelToken,
}

impl StageRunner {
    pub fn new(delay: Duration, cancel: CancelToken) -> Self {
        let (loading, _) = watch::channel(false);
        Self::with_loading(delay, cancel, Arc::new(loading))
    }

    /// A runner raising a loading flag shared with other runners.
    pub fn with_loading(delay: Duration, cancel: CancelToken, loading: Arc<watch::Sender<bool>>) -> Self {
        Self { delay, loading, cancel }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn is_loading(&self) -> bool {
        *self.loading.borrow()
    }

    /// Observes the loading flag.
    pub fn loading(&self) -> watch::Receiver<bool> {
        self.loading.subscribe()
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Schedules `callback` to run after the stage delay.
    pub fn run_stage<F, Fut, T>(&self, callback: F) -> Result<StageHandle<T>, StageError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if self.cancel.is_cancelled() {
            return Err(StageError::Cancelled);
        }
        let raised = self.loading.send_if_modified(|loading| {
            if *loading {
                false
            } else {
                *loading = true;
                true
            }
        });
        if !raised {
            return Err(StageError::AlreadyPending);
        }

        let delay = self.delay;
        let loading = self.loading.clone();
        let cancel = self.cancel.clone();
        let task = tokio::spawn(async move {
            let elapsed = tokio::select! {
                biased;
                _ = cancel.cancelled() => false,
                _ = tokio::time::sleep(delay) => true,
            };
            loading.send_replace(false);
            if !elapsed {
                debug!("Stage cancelled before its delay elapsed");
                return None;
            }
            Some(callback().await)
        });
        Ok(StageHandle { task })
    }
}
