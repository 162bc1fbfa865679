//! Error types for the transfer queue.

use thiserror::Error;

/// Errors produced or surfaced by the core transfer queue.
///
/// These correspond to the error kinds in the error-handling design:
/// retriable transport, not-implemented batch, per-object remote error,
/// adapter init error, terminal transfer error, plus an aggregated
/// per-batch negotiation error.
#[derive(Debug, Clone, Error)]
pub enum QueueError {
    /// A transient failure talking to the remote; counted against the
    /// per-OID retry cap and re-queued if the cap allows.
    #[error("transport error negotiating {oid:?}: {message}")]
    RetriableTransport { oid: Option<String>, message: String },

    /// The remote does not support batch negotiation; triggers permanent
    /// fallback to legacy per-object negotiation.
    #[error("batch negotiation not implemented by remote")]
    NotImplemented,

    /// Negotiation succeeded but the remote rejected this specific object.
    /// Never retried.
    #[error("remote rejected object {oid}: {message}")]
    PerObjectRemote { oid: String, message: String },

    /// The selected adapter refused to begin a transfer session.
    #[error("adapter {adapter:?} failed to begin: {message}")]
    AdapterInit { adapter: String, message: String },

    /// A non-retriable failure during byte movement, or a retriable
    /// failure whose retry cap has been exhausted.
    #[error("transfer failed for {oid}: {message}")]
    Terminal { oid: String, message: String },

    /// A per-batch negotiation error unrelated to any single object,
    /// surfaced at most once per batch. Carries every OID in the batch so
    /// a caller doesn't need to reconstruct which objects were affected.
    #[error("batch negotiation failed for {oids:?}: {message}")]
    BatchNegotiation { oids: Vec<String>, message: String },
}

impl QueueError {
    /// The OID this error concerns, if any (batch-level errors have none).
    pub fn oid(&self) -> Option<&str> {
        match self {
            QueueError::RetriableTransport { oid, .. } => oid.as_deref(),
            QueueError::NotImplemented => None,
            QueueError::PerObjectRemote { oid, .. } => Some(oid),
            QueueError::AdapterInit { .. } => None,
            QueueError::Terminal { oid, .. } => Some(oid),
            QueueError::BatchNegotiation { .. } => None,
        }
    }
}
