//! Bidirectional large-object transfer queue
//!
//! Coordinates batched negotiation, pluggable transfer adapters, bounded
//! per-OID retry, and clean quiescence for moving large content-addressed
//! objects to or from a remote, the way Git LFS's transfer queue does for
//! a single clone or push.
//!
//! The core never talks HTTP itself: the metadata negotiation call, the
//! adapters that actually move bytes, and the progress renderer are all
//! supplied by the host application through the traits in
//! [`collaborators`].
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use transfer_queue::{Direction, TransferQueueBuilder, Transferable};
//!
//! # async fn run(
//! #     metadata: std::sync::Arc<dyn transfer_queue::MetadataClient>,
//! #     classifier: std::sync::Arc<dyn transfer_queue::ErrorClassifier>,
//! #     adapters: std::sync::Arc<dyn transfer_queue::AdapterFactory>,
//! #     config: std::sync::Arc<dyn transfer_queue::QueueConfig>,
//! #     config_writer: std::sync::Arc<dyn transfer_queue::ConfigWriter>,
//! #     progress: std::sync::Arc<dyn transfer_queue::ProgressMeter>,
//! #     legacy: std::sync::Arc<dyn transfer_queue::LegacyNegotiator>,
//! # ) {
//! let queue = TransferQueueBuilder::new(
//!     Direction::Download,
//!     metadata,
//!     classifier,
//!     adapters,
//!     config,
//!     config_writer,
//!     progress,
//! )
//! .build();
//!
//! let done = queue.watch();
//! queue.add(Transferable::new("oid-1", 1024, "file.bin", "/tmp/file.bin", legacy));
//! queue.wait().await;
//! let _ = done;
//! # }
//! ```

mod adapter;
mod batcher;
mod collaborators;
mod error;
mod negotiator;
mod queue;
mod retry;
mod types;
mod watcher;

pub use collaborators::{
    Adapter, AdapterFactory, ConfigWriter, ErrorClassifier, LegacyNegotiator, MetadataClient, NegotiationResponse,
    ProgressMeter, QueueConfig,
};
pub use error::QueueError;
pub use queue::{TransferQueue, TransferQueueBuilder};
pub use types::{
    Direction, Link, ObjectDescriptor, ObjectError, ObjectResource, TransferAction, TransferJob, TransferResult,
    Transferable, BATCH_SIZE, MAX_RETRIES,
};
