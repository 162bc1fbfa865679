//! The external interfaces the core consumes from collaborating crates.
//!
//! None of these traits are implemented here beyond what tests need: the
//! concrete HTTP batch-negotiation client, the real transfer adapters, the
//! progress-meter renderer, and the error-classification predicates are all
//! deliberately out of scope. This module is the single boundary the
//! orchestrator, negotiator, and adapter driver share.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::QueueError;
use crate::types::{Direction, ObjectDescriptor, ObjectResource, TransferJob, TransferResult};

/// Classifies errors as retriable or as the legacy-fallback trigger.
///
/// This is the single coupling point with error taxonomy; every other
/// component treats errors opaquely.
pub trait ErrorClassifier: Send + Sync {
    fn is_retriable(&self, err: &QueueError) -> bool;
    fn is_not_implemented(&self, err: &QueueError) -> bool;
}

/// The batch metadata negotiation response: resolved objects plus the
/// adapter name the remote wants this batch moved with.
#[derive(Debug, Clone)]
pub struct NegotiationResponse {
    pub objects: Vec<ObjectResource>,
    pub adapter_name: String,
}

/// The batch-negotiation metadata call.
#[async_trait]
pub trait MetadataClient: Send + Sync {
    async fn negotiate(
        &self,
        direction: Direction,
        objects: &[ObjectDescriptor],
        adapter_names: &[String],
    ) -> Result<NegotiationResponse, QueueError>;
}

/// A Transferable's capability to negotiate itself individually, used only
/// by the legacy fallback path.
#[async_trait]
pub trait LegacyNegotiator: Send + Sync {
    async fn negotiate(&self, oid: &str, size: u64, direction: Direction) -> Result<ObjectResource, QueueError>;
}

/// A pluggable transfer adapter: the capability set the driver consumes.
#[async_trait]
pub trait Adapter: Send + Sync {
    fn name(&self) -> &str;

    /// Begin a transfer session with the given concurrency budget. Results
    /// must be pushed onto `results` as they complete; the channel should
    /// be closed (by dropping the sender) once `end` has finished.
    async fn begin(
        &self,
        concurrency: usize,
        progress: Arc<dyn ProgressMeter>,
        results: mpsc::Sender<TransferResult>,
    ) -> Result<(), QueueError>;

    async fn add(&self, job: TransferJob) -> Result<(), QueueError>;

    async fn end(&self) -> Result<(), QueueError>;
}

/// Resolves an adapter by name for a given direction. Implementations
/// fall back to a default adapter when the requested name is unavailable.
pub trait AdapterFactory: Send + Sync {
    fn create(&self, name: &str, direction: Direction) -> Arc<dyn Adapter>;
}

/// Progress reporting sink, advanced even for failures and skips so that
/// its "bytes expected" accounting balances.
pub trait ProgressMeter: Send + Sync {
    fn add(&self, name: &str, size: u64);
    fn start(&self);
    fn transfer_bytes(&self, direction: Direction, name: &str, read: u64, total: u64, current: usize);
    fn finish_transfer(&self, name: &str);
    fn skip(&self, size: u64);
    fn finish(&self);
}

/// Queue-wide configuration consumed from the host application.
pub trait QueueConfig: Send + Sync {
    fn concurrent_transfers(&self) -> usize;
    fn batch_transfer(&self) -> bool;
    fn progress_log_path(&self) -> Option<PathBuf>;
}

/// Persists the batch-mode fallback decision so future process invocations
/// skip a doomed batch attempt.
pub trait ConfigWriter: Send + Sync {
    fn disable_batch_transfer(&self);
}
