//! Fan-out of per-object completion notifications to interested observers.

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Single-producer, multi-consumer fan-out of successful-transfer OIDs.
///
/// Sinks use unbounded channels: the spec requires every sink to receive
/// every OID (no dropping), and buffering at least `BATCH_SIZE` entries is
/// the minimum; an unbounded sink trivially satisfies both without
/// risking back-pressure onto the result handler.
pub struct WatcherSet {
    sinks: Mutex<Vec<mpsc::UnboundedSender<String>>>,
}

impl WatcherSet {
    pub fn new() -> Self {
        Self {
            sinks: Mutex::new(Vec::new()),
        }
    }

    /// Register a new sink. Must be called before `Wait`.
    pub fn watch(&self) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sinks.lock().push(tx);
        rx
    }

    /// Deliver `oid` to every registered sink, in registration order.
    pub fn notify_success(&self, oid: &str) {
        let sinks = self.sinks.lock();
        for sink in sinks.iter() {
            let _ = sink.send(oid.to_string());
        }
    }

    /// Close every sink. Called exactly once, during `Wait`'s teardown.
    pub fn close(&self) {
        self.sinks.lock().clear();
    }
}

impl Default for WatcherSet {
    fn default() -> Self {
        Self::new()
    }
}
