//! Lazy init of the selected transfer adapter and its lifecycle.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::collaborators::{Adapter, AdapterFactory, ProgressMeter};
use crate::error::QueueError;
use crate::types::{Direction, TransferJob, TransferResult};

struct DriverState {
    selected: Option<Arc<dyn Adapter>>,
    in_progress: bool,
}

/// Owns the currently-selected adapter and serializes every state
/// transition (`Use`, `Begin`, `End`) through a single mutex, never held
/// across an `.await`.
pub struct AdapterDriver {
    factory: Arc<dyn AdapterFactory>,
    direction: Direction,
    state: Mutex<DriverState>,
}

impl AdapterDriver {
    pub fn new(factory: Arc<dyn AdapterFactory>, direction: Direction) -> Self {
        Self {
            factory,
            direction,
            state: Mutex::new(DriverState {
                selected: None,
                in_progress: false,
            }),
        }
    }

    /// Select an adapter by name. If a different adapter is selected and
    /// in progress, ends it first.
    ///
    /// Creating an adapter never needs to cross an `.await` (`create` is
    /// synchronous), so the no-stale-adapter case creates and stores the
    /// new selection under a single lock acquisition: two callers racing
    /// to pick a first adapter can never both create one and silently
    /// drop the loser without ever calling `end()` on it. Swapping away
    /// from an in-progress adapter still has to release the lock across
    /// `end().await`; afterwards we only clear the slot if it still holds
    /// the adapter we just ended, and loop back to re-evaluate rather than
    /// assuming nothing raced in while we awaited.
    pub async fn use_adapter(&self, name: &str) -> Result<(), QueueError> {
        enum Step {
            Done,
            Swap(Arc<dyn Adapter>),
        }

        loop {
            let step = {
                let mut state = self.state.lock();
                match &state.selected {
                    Some(a) if a.name() == name => Step::Done,
                    Some(a) if state.in_progress => Step::Swap(a.clone()),
                    _ => {
                        let adapter = self.factory.create(name, self.direction);
                        state.selected = Some(adapter);
                        Step::Done
                    }
                }
            };

            match step {
                Step::Done => return Ok(()),
                Step::Swap(stale) => {
                    info!(from = stale.name(), to = name, "swapping transfer adapter");
                    stale.end().await?;
                    let mut state = self.state.lock();
                    if state.selected.as_ref().is_some_and(|a| Arc::ptr_eq(a, &stale)) {
                        state.selected = None;
                        state.in_progress = false;
                    }
                    // Loop back: either we cleared the slot ourselves, or
                    // another caller already moved it on while we awaited.
                }
            }
        }
    }

    /// Begin a transfer session. Idempotent if already in progress, in which
    /// case it returns `Ok(false)` without touching the adapter again;
    /// returns `Ok(true)` when this call actually started a new session.
    pub async fn begin(
        &self,
        concurrency: usize,
        progress: Arc<dyn ProgressMeter>,
        results: mpsc::Sender<TransferResult>,
    ) -> Result<bool, QueueError> {
        let adapter = {
            let mut state = self.state.lock();
            if state.in_progress {
                return Ok(false);
            }
            let adapter = state.selected.clone();
            if adapter.is_some() {
                state.in_progress = true;
            }
            adapter
        };

        let adapter = adapter.ok_or_else(|| QueueError::AdapterInit {
            adapter: "<none>".to_string(),
            message: "begin called before an adapter was selected".to_string(),
        })?;

        debug!(adapter = adapter.name(), concurrency, "beginning transfer session");
        if let Err(e) = adapter.begin(concurrency, progress, results).await {
            let mut state = self.state.lock();
            state.in_progress = false;
            return Err(e);
        }
        Ok(true)
    }

    /// Forward one transfer job to the in-progress adapter.
    pub async fn submit(&self, job: TransferJob) -> Result<(), QueueError> {
        let adapter = {
            let state = self.state.lock();
            state.selected.clone()
        };
        let adapter = adapter.ok_or_else(|| QueueError::AdapterInit {
            adapter: "<none>".to_string(),
            message: "submit called before begin".to_string(),
        })?;
        adapter.add(job).await
    }

    /// End the in-progress adapter, clearing the selection.
    pub async fn end(&self) -> Result<(), QueueError> {
        let adapter = {
            let mut state = self.state.lock();
            if !state.in_progress {
                state.selected = None;
                return Ok(());
            }
            state.in_progress = false;
            state.selected.take()
        };
        match adapter {
            Some(a) => {
                debug!(adapter = a.name(), "ending transfer session");
                a.end().await
            }
            None => Ok(()),
        }
    }
}
