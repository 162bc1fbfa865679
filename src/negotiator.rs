//! Batch and legacy negotiation loops.
//!
//! Exactly one of these runs for the lifetime of a queue: `run_batch_mode`
//! when `QueueConfig::batch_transfer` is true at construction, or
//! `spawn_legacy_workers` otherwise. A `NotImplemented` response from the
//! batch loop also triggers `spawn_legacy_workers`, handing off the batch
//! that provoked it (and every batch after).

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::QueueError;
use crate::queue::Inner;
use crate::types::{ObjectDescriptor, TransferJob, Transferable};

/// Repeatedly negotiates batches until the Batcher is exited or the remote
/// signals it doesn't support batch negotiation.
pub(crate) async fn run_batch_mode(inner: Arc<Inner>) {
    loop {
        let batch = match inner.batcher.next().await {
            Some(batch) if !batch.is_empty() => batch,
            Some(_) => continue,
            None => break,
        };

        let descriptors: Vec<ObjectDescriptor> = batch
            .iter()
            .map(|t| ObjectDescriptor {
                oid: t.oid.clone(),
                size: t.size,
            })
            .collect();

        debug!(count = batch.len(), "negotiating batch");
        match inner
            .metadata
            .negotiate(inner.direction, &descriptors, &inner.adapter_names)
            .await
        {
            Ok(response) => handle_batch_response(&inner, batch, response.objects, response.adapter_name).await,
            Err(e) if inner.classifier.is_not_implemented(&e) => {
                info!("remote does not support batch negotiation, falling back to legacy");
                inner.config_writer.disable_batch_transfer();
                inner.batch_mode.store(false, Ordering::SeqCst);
                spawn_legacy_workers(inner.clone());
                for t in batch {
                    inner.send_legacy(t);
                }
                // Forwarding now goes straight to legacy (batch_mode is
                // false), so no further batches will ever be published into
                // the Batcher — but one or more full batches may already
                // sit buffered in its channel from Adds that raced ahead of
                // this negotiate call. Exit (safe: nothing else publishes
                // into it anymore) and drain whatever is left to legacy
                // rather than abandoning those OIDs mid-flight.
                inner.batcher.exit();
                while let Some(more) = inner.batcher.next().await {
                    for t in more {
                        inner.send_legacy(t);
                    }
                }
                break;
            }
            Err(e) => handle_batch_error(&inner, batch, e),
        }
    }
}

async fn handle_batch_response(
    inner: &Arc<Inner>,
    batch: Vec<Transferable>,
    objects: Vec<crate::types::ObjectResource>,
    adapter_name: String,
) {
    if let Err(e) = inner.adapter_driver.use_adapter(&adapter_name).await {
        warn!(adapter = %adapter_name, error = %e, "adapter selection failed for batch");
        inner.report_error(e);
        for t in &batch {
            inner.finish_pending(&t.oid);
        }
        return;
    }
    inner.ensure_progress_started();
    if !crate::queue::ensure_adapter_session(inner).await {
        // AdapterInitError (§7 kind 4): the error was already reported by
        // ensure_adapter_session. The adapter never began a session, so
        // every object in this batch is skipped rather than submitted.
        for t in &batch {
            inner.finish_pending(&t.oid);
        }
        return;
    }

    for obj in objects {
        if let Some(err) = obj.error.clone() {
            inner.report_error(QueueError::PerObjectRemote {
                oid: obj.oid.clone(),
                message: err.message,
            });
            inner.progress.skip(obj.size);
            inner.finish_pending(&obj.oid);
            continue;
        }

        if !obj.has_action(inner.direction) {
            inner.progress.skip(obj.size);
            inner.finish_pending(&obj.oid);
            continue;
        }

        let Some(t) = inner.lookup(&obj.oid) else {
            warn!(oid = %obj.oid, "negotiated object has no matching transferable");
            continue;
        };
        t.set_resource(obj.clone());
        inner.progress.add(&t.name, obj.size);
        let job = TransferJob {
            name: t.name.clone(),
            resource: obj,
            path: t.path.clone(),
        };
        if let Err(e) = inner.adapter_driver.submit(job).await {
            if inner.retry_ledger.can_retry(&t.oid, &e) {
                inner.retry_intake.send(t);
            } else {
                inner.report_error(e);
                inner.finish_pending(&t.oid);
            }
        }
    }
}

fn handle_batch_error(inner: &Arc<Inner>, batch: Vec<Transferable>, err: QueueError) {
    let oids: Vec<String> = batch.iter().map(|t| t.oid.clone()).collect();
    let mut reported = false;
    for t in batch {
        if inner.retry_ledger.can_retry(&t.oid, &err) {
            inner.retry_intake.send(t);
        } else {
            if !reported {
                inner.report_error(QueueError::BatchNegotiation {
                    oids: oids.clone(),
                    message: err.to_string(),
                });
                reported = true;
            }
            inner.finish_pending(&t.oid);
        }
    }
}

/// Launches the first legacy worker. Idempotent: a second call (e.g. the
/// batch loop falling back after legacy workers were already started some
/// other way) is a no-op.
pub(crate) fn spawn_legacy_workers(inner: Arc<Inner>) {
    if inner.legacy_started.swap(true, Ordering::SeqCst) {
        return;
    }
    inner.spawn_task(tokio::spawn(legacy_worker(inner.clone(), true)));
}

/// One legacy-mode worker. The first worker to negotiate successfully
/// launches `concurrency - 1` siblings, avoiding a credential-prompt
/// stampede when every worker would otherwise negotiate concurrently from
/// a cold start.
async fn legacy_worker(inner: Arc<Inner>, is_first: bool) {
    loop {
        let item = {
            let mut rx = inner.legacy_rx.lock().await;
            rx.recv().await
        };
        let t = match item {
            Some(t) => t,
            None => break,
        };

        match t.negotiate_legacy(inner.direction).await {
            Ok(resource) => {
                if is_first && !inner.legacy_claimed.swap(true, Ordering::SeqCst) {
                    let extra = inner.config.concurrent_transfers().saturating_sub(1);
                    debug!(extra, "legacy negotiation succeeded, launching remaining workers");
                    for _ in 0..extra {
                        let sibling = inner.clone();
                        inner.spawn_task(tokio::spawn(legacy_worker(sibling, false)));
                    }
                }

                if let Err(e) = inner.adapter_driver.use_adapter("basic").await {
                    inner.report_error(e);
                    inner.finish_pending(&t.oid);
                    continue;
                }
                inner.ensure_progress_started();
                if !crate::queue::ensure_adapter_session(&inner).await {
                    // AdapterInitError (§7 kind 4): already reported by
                    // ensure_adapter_session. Skip this object rather than
                    // submitting to an adapter that never began.
                    inner.finish_pending(&t.oid);
                    continue;
                }

                t.set_resource(resource.clone());
                inner.progress.add(&t.name, resource.size);
                let job = TransferJob {
                    name: t.name.clone(),
                    resource,
                    path: t.path.clone(),
                };
                if let Err(e) = inner.adapter_driver.submit(job).await {
                    if inner.retry_ledger.can_retry(&t.oid, &e) {
                        inner.retry_intake.send(t);
                    } else {
                        inner.report_error(e);
                        inner.finish_pending(&t.oid);
                    }
                }
            }
            Err(e) => {
                if inner.retry_ledger.can_retry(&t.oid, &e) {
                    inner.retry_intake.send(t);
                } else {
                    inner.report_error(e);
                    inner.finish_pending(&t.oid);
                }
            }
        }
    }
}
