//! Durable, ordered outbox of typed actions
//!
//! Actions are persisted before they run and removed only once executed, so
//! work scheduled before a restart is picked up again by [`ActionQueue::setup`].
//! Execution is strictly sequential, oldest action first.

mod store;

pub use store::{LibSqlActionStore, StoredAction};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, watch};

use crate::error::{Error, Result};
use crate::util::{compact_text, Clock};

/// How long `schedule_action` keeps the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueInteraction {
    /// Return as soon as the action is persisted
    QueueAndReturn,
    /// Return once the action executed or failed permanently
    QueueAndWait,
}

/// Verdict of [`ActionExecutor::preprocess_action`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Preprocessed {
    Valid,
    Invalid { reason: String },
}

/// Result of executing one action
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome<A> {
    /// The action is done; `follow_ups` are queued in its place
    Completed { follow_ups: Vec<A> },
    /// Keep the action and pause the whole queue until unpaused
    PauseAndRetry,
}

impl<A> ExecutionOutcome<A> {
    #[must_use]
    pub const fn completed() -> Self {
        Self::Completed {
            follow_ups: Vec::new(),
        }
    }
}

/// Performs the side effects of queued actions
#[async_trait]
pub trait ActionExecutor<A>: Send + Sync {
    /// Decide whether an action is persisted at all
    fn preprocess_action(&self, _action: &A) -> Preprocessed {
        Preprocessed::Valid
    }

    /// Run one action; an error leaves it queued for a retry
    async fn execute_action(&self, action: &A) -> Result<ExecutionOutcome<A>>;
}

/// Something the queue did, for observers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueEvent {
    Executed { id: i64 },
    ExecutionError { id: i64, attempt: u32, error: String },
    ActionFailed { id: i64, error: String },
    Paused,
    Unpaused,
}

/// Snapshot of the queue published on every change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStatus {
    pub pending: usize,
    pub executing: bool,
    pub paused: bool,
}

impl QueueStatus {
    /// Nothing runs and nothing will run until new work or an unpause arrives
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        !self.executing && (self.pending == 0 || self.paused)
    }
}

/// A queued action that exhausted its attempts
#[derive(Debug, Clone, PartialEq)]
pub struct FailedAction<A> {
    pub id: i64,
    pub action: A,
    pub attempts: u32,
    pub failed_at: i64,
    pub error: String,
}

/// Tuning of retries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueOptions {
    pub retry_interval: Duration,
    /// Attempts before an action is marked failed, `None` retries forever
    pub max_attempts: Option<u32>,
}

#[derive(Default)]
struct QueueState {
    status: QueueStatus,
    draining: bool,
    /// Set when work arrived while a drain was finishing
    rerun: bool,
    waiters: HashMap<i64, oneshot::Sender<Result<()>>>,
}

struct Inner<A> {
    store: LibSqlActionStore,
    executor: Arc<dyn ActionExecutor<A>>,
    options: QueueOptions,
    clock: Clock,
    /// Held while the store and the pending count change together
    ledger: tokio::sync::Mutex<()>,
    state: Mutex<QueueState>,
    status: watch::Sender<QueueStatus>,
    events: broadcast::Sender<QueueEvent>,
    _action: PhantomData<fn() -> A>,
}

/// Durable action queue
pub struct ActionQueue<A> {
    inner: Arc<Inner<A>>,
}

impl<A> Clone for ActionQueue<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A> ActionQueue<A>
where
    A: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Create a paused queue; call [`ActionQueue::setup`] before use
    pub fn new(
        store: LibSqlActionStore,
        executor: Arc<dyn ActionExecutor<A>>,
        options: QueueOptions,
        clock: Clock,
    ) -> Self {
        let initial = QueueStatus {
            paused: true,
            ..QueueStatus::default()
        };
        let (status, _) = watch::channel(initial);
        let (events, _) = broadcast::channel(256);
        Self {
            inner: Arc::new(Inner {
                store,
                executor,
                options,
                clock,
                ledger: tokio::sync::Mutex::new(()),
                state: Mutex::new(QueueState {
                    status: initial,
                    ..QueueState::default()
                }),
                status,
                events,
                _action: PhantomData,
            }),
        }
    }

    /// Load the persisted queue and start draining it unless `paused`
    pub async fn setup(&self, paused: bool) -> Result<()> {
        let _ledger = self.inner.ledger.lock().await;
        let pending = self.inner.store.count_pending().await?;
        self.update(|state| {
            state.status.pending = pending;
            state.status.paused = paused;
        });
        tracing::info!(pending, paused, "Action queue loaded");
        if !paused {
            self.spawn_drain();
        }
        Ok(())
    }

    /// Persist an action and, unless paused, get it executed
    pub async fn schedule_action(&self, action: A, interaction: QueueInteraction) -> Result<()> {
        self.schedule_many_actions(vec![action], interaction).await
    }

    /// Persist several actions in order
    pub async fn schedule_many_actions(
        &self,
        actions: Vec<A>,
        interaction: QueueInteraction,
    ) -> Result<()> {
        let mut serialized = Vec::with_capacity(actions.len());
        for action in &actions {
            match self.inner.executor.preprocess_action(action) {
                Preprocessed::Valid => serialized.push(serde_json::to_string(action)?),
                Preprocessed::Invalid { reason } => {
                    tracing::warn!(%reason, "Dropping invalid action");
                }
            }
        }
        if serialized.is_empty() {
            return Ok(());
        }

        let ledger = self.inner.ledger.lock().await;
        let ids = self
            .inner
            .store
            .append(&serialized, (self.inner.clock)())
            .await?;

        let mut receivers = Vec::new();
        self.update(|state| {
            state.status.pending += ids.len();
            if interaction == QueueInteraction::QueueAndWait {
                for id in &ids {
                    let (tx, rx) = oneshot::channel();
                    state.waiters.insert(*id, tx);
                    receivers.push(rx);
                }
            }
        });
        drop(ledger);
        self.spawn_drain();

        for rx in receivers {
            // A dropped sender means the queue itself went away
            rx.await
                .map_err(|_| Error::Database("action queue shut down".to_string()))??;
        }
        Ok(())
    }

    /// Stop executing new actions; an action already running finishes
    pub fn pause(&self) {
        let changed = self.update(|state| !std::mem::replace(&mut state.status.paused, true));
        if changed {
            tracing::debug!("Action queue paused");
            self.emit(QueueEvent::Paused);
        }
    }

    /// Resume executing actions
    pub fn unpause(&self) {
        let changed = self.update(|state| std::mem::replace(&mut state.status.paused, false));
        if changed {
            tracing::debug!("Action queue unpaused");
            self.emit(QueueEvent::Unpaused);
        }
        self.spawn_drain();
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.status().paused
    }

    #[must_use]
    pub fn pending_action_count(&self) -> usize {
        self.status().pending
    }

    #[must_use]
    pub fn status(&self) -> QueueStatus {
        *self.inner.status.borrow()
    }

    /// Live queue status
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<QueueStatus> {
        self.inner.status.subscribe()
    }

    /// Execution results and errors
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.inner.events.subscribe()
    }

    /// Resolve once no action runs and none is waiting to run
    pub async fn wait_for_sync(&self) {
        let mut status = self.inner.status.subscribe();
        // The sender lives as long as the queue, so this only fails on teardown
        let _ = status.wait_for(QueueStatus::is_idle).await;
    }

    /// Re-read the pending count from the store, after a bulk clear
    pub async fn reset_pending_action_count(&self) -> Result<usize> {
        let _ledger = self.inner.ledger.lock().await;
        let pending = self.inner.store.count_pending().await?;
        self.update(|state| state.status.pending = pending);
        Ok(pending)
    }

    /// Drop every pending action
    pub async fn clear_pending_actions(&self) -> Result<usize> {
        let removed = {
            let _ledger = self.inner.ledger.lock().await;
            self.inner.store.clear_pending().await?
        };
        self.reset_pending_action_count().await?;
        Ok(removed)
    }

    /// Actions that exhausted their attempts and were kept for inspection
    pub async fn failed_actions(&self) -> Result<Vec<FailedAction<A>>> {
        let mut failed = Vec::new();
        for stored in self.inner.store.failed().await? {
            failed.push(FailedAction {
                action: serde_json::from_str(&stored.action)?,
                id: stored.id,
                attempts: stored.attempts,
                failed_at: stored.failed_at.unwrap_or_default(),
                error: stored.error.unwrap_or_default(),
            });
        }
        Ok(failed)
    }

    /// Run pending actions one at a time until the queue is empty or paused.
    ///
    /// Returns immediately if another drain is already running; that drain
    /// picks up whatever was scheduled in the meantime.
    pub async fn execute_pending_actions(&self) -> Result<()> {
        let claimed = self.update(|state| {
            if state.draining {
                state.rerun = true;
                false
            } else if state.status.paused {
                false
            } else {
                state.draining = true;
                state.status.executing = true;
                true
            }
        });
        if !claimed {
            return Ok(());
        }

        loop {
            let result = self.drain().await;
            let again = self.update(|state| {
                let again = result.is_ok() && state.rerun && !state.status.paused;
                state.rerun = false;
                if !again {
                    state.draining = false;
                    state.status.executing = false;
                }
                again
            });
            if !again {
                return result;
            }
        }
    }

    fn spawn_drain(&self) {
        let queue = self.clone();
        tokio::spawn(async move {
            if let Err(e) = queue.execute_pending_actions().await {
                tracing::error!(error = %e, "Failed to execute pending actions");
            }
        });
    }

    async fn drain(&self) -> Result<()> {
        while !self.status().paused {
            let Some(stored) = self.inner.store.oldest_pending().await? else {
                break;
            };
            self.execute_stored(stored).await?;
        }
        Ok(())
    }

    async fn execute_stored(&self, stored: StoredAction) -> Result<()> {
        let id = stored.id;
        let action: A = match serde_json::from_str(&stored.action) {
            Ok(action) => action,
            Err(e) => {
                // Retrying cannot fix an action this build cannot read
                return self.fail(id, &format!("unreadable action: {e}")).await;
            }
        };

        let attempt = self.inner.store.record_attempt(id).await?;
        match self.inner.executor.execute_action(&action).await {
            Ok(ExecutionOutcome::Completed { follow_ups }) => {
                let serialized = follow_ups
                    .iter()
                    .map(serde_json::to_string)
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                let ledger = self.inner.ledger.lock().await;
                let follow_up_ids = self
                    .inner
                    .store
                    .complete(id, &serialized, (self.inner.clock)())
                    .await?;
                let waiter = self.update(|state| {
                    state.status.pending =
                        (state.status.pending + follow_up_ids.len()).saturating_sub(1);
                    state.waiters.remove(&id)
                });
                drop(ledger);
                if let Some(waiter) = waiter {
                    let _ = waiter.send(Ok(()));
                }
                self.emit(QueueEvent::Executed { id });
                Ok(())
            }
            Ok(ExecutionOutcome::PauseAndRetry) => {
                // An unpause or new work that arrived while the action ran
                // gets one more attempt before the queue pauses
                let paused = self.update(|state| {
                    !std::mem::take(&mut state.rerun)
                        && !std::mem::replace(&mut state.status.paused, true)
                });
                if paused {
                    tracing::info!(id, "Action asked to pause the queue");
                    self.emit(QueueEvent::Paused);
                }
                Ok(())
            }
            Err(e) => {
                let error = compact_text(&e.to_string());
                tracing::warn!(id, attempt, error = %error, "Action execution failed");
                self.emit(QueueEvent::ExecutionError {
                    id,
                    attempt,
                    error: error.clone(),
                });
                if self
                    .inner
                    .options
                    .max_attempts
                    .is_some_and(|max| attempt >= max)
                {
                    return self.fail(id, &error).await;
                }
                tokio::time::sleep(self.inner.options.retry_interval).await;
                Ok(())
            }
        }
    }

    async fn fail(&self, id: i64, error: &str) -> Result<()> {
        tracing::error!(id, error, "Action failed permanently");
        let ledger = self.inner.ledger.lock().await;
        self.inner
            .store
            .mark_failed(id, (self.inner.clock)(), error)
            .await?;
        let waiter = self.update(|state| {
            state.status.pending = state.status.pending.saturating_sub(1);
            state.waiters.remove(&id)
        });
        drop(ledger);
        if let Some(waiter) = waiter {
            let _ = waiter.send(Err(Error::ActionFailed {
                id,
                message: error.to_string(),
            }));
        }
        self.emit(QueueEvent::ActionFailed {
            id,
            error: error.to_string(),
        });
        Ok(())
    }

    /// Mutate the state under its lock and publish the resulting status
    fn update<R>(&self, f: impl FnOnce(&mut QueueState) -> R) -> R {
        let mut state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let result = f(&mut state);
        let status = state.status;
        self.inner.status.send_if_modified(|current| {
            let changed = *current != status;
            *current = status;
            changed
        });
        result
    }

    fn emit(&self, event: QueueEvent) {
        // No receivers is fine
        let _ = self.inner.events.send(event);
    }
}
