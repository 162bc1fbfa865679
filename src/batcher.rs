//! Accumulates submitted items into fixed-size groups for negotiation.

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::types::BATCH_SIZE;

/// Groups items added one at a time into batches of up to [`BATCH_SIZE`].
///
/// `Add` never blocks the caller: published batches flow through an
/// unbounded channel, so a slow consumer only grows the channel's backlog,
/// never stalls the producer.
pub struct Batcher<T: Send + 'static> {
    current: Mutex<Vec<T>>,
    tx: Mutex<Option<mpsc::UnboundedSender<Vec<T>>>>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<T>>>,
}

impl<T: Send + 'static> Batcher<T> {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            current: Mutex::new(Vec::with_capacity(BATCH_SIZE)),
            tx: Mutex::new(Some(tx)),
            rx: tokio::sync::Mutex::new(rx),
        }
    }

    /// Append one item; publishes a full batch as a side effect.
    pub fn add(&self, item: T) {
        let mut current = self.current.lock();
        current.push(item);
        if current.len() >= BATCH_SIZE {
            self.publish_locked(&mut current);
        }
    }

    /// Publish the current partial batch immediately. Idempotent on an
    /// empty current batch.
    pub fn flush(&self) {
        let mut current = self.current.lock();
        self.publish_locked(&mut current);
    }

    /// Signal no further `Add`. Flushes any partial batch first, then
    /// closes the publish channel so `next` drains and returns `None`.
    pub fn exit(&self) {
        self.flush();
        self.tx.lock().take();
    }

    fn publish_locked(&self, current: &mut Vec<T>) {
        if current.is_empty() {
            return;
        }
        let batch = std::mem::replace(current, Vec::with_capacity(BATCH_SIZE));
        if let Some(tx) = self.tx.lock().as_ref() {
            // A closed receiver means nobody will ever consume another
            // batch; dropping it here is the correct behavior, not an error.
            let _ = tx.send(batch);
        }
    }

    /// Block until a batch is available, or return `None` once the
    /// batcher has been exited and all remaining items have drained.
    pub async fn next(&self) -> Option<Vec<T>> {
        let mut rx = self.rx.lock().await;
        rx.recv().await
    }
}

impl<T: Send + 'static> Default for Batcher<T> {
    fn default() -> Self {
        Self::new()
    }
}
