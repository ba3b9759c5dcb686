//! Fixed-size pool of stateless workers, each resolving one record under a
//! deadline and applying the resulting status/retry transition. Grounded
//! on `TokenService.worker` in `cmd/metadata/service/token.go` and this
//! crate's channel-driven worker loop in `indexer.rs`.

use std::sync::Arc;
use std::time::Duration;

use async_channel::Receiver;
use serde_json::Value;
use tokio::sync::mpsc::Sender;
use tokio_util::sync::CancellationToken;

use crate::repository::Record;
use crate::resolver::{ResolveError, Resolver};

/// Shallow JSON object merge: keys already present in `existing` win.
/// Non-object inputs fall back to whichever side is present.
pub fn merge_metadata(existing: &Value, fetched: &Value) -> Value {
    match (existing, fetched) {
        (Value::Object(_), Value::Null) => existing.clone(),
        (Value::Null, fetched) => fetched.clone(),
        (Value::Object(existing_map), Value::Object(fetched_map)) => {
            let mut merged = existing_map.clone();
            for (key, value) in fetched_map {
                merged.entry(key.clone()).or_insert_with(|| value.clone());
            }
            Value::Object(merged)
        }
        (existing, _) => existing.clone(),
    }
}

/// Applies a resolve outcome to `record`'s status/retry_count/metadata.
/// A successful fetch that doesn't decode as JSON is treated the same as
/// a retryable resolve failure — the document is malformed or truncated,
/// which is as likely to be transient as a gateway timeout, so the record
/// is left for the next resolution cycle rather than silently applied
/// with the fetched bytes dropped.
pub fn apply_resolution<R: Record>(
    record: &mut R,
    outcome: Result<Vec<u8>, ResolveError>,
    max_retry_count: i32,
) {
    match outcome {
        Ok(bytes) => match serde_json::from_slice::<Value>(&bytes) {
            Ok(fetched) => {
                let merged = merge_metadata(record.metadata(), &fetched);
                record.set_metadata(merged);
                record.set_status(metadata_common::Status::Applied);
            }
            Err(err) => {
                tracing::warn!(error = %err, "resolved document is not valid JSON, retrying");
                bump_retry(record, max_retry_count);
            }
        },
        Err(err) if err.is_retryable() => {
            tracing::warn!(error = %err, "resolve retry");
            bump_retry(record, max_retry_count);
        }
        Err(err) => {
            record.set_status(metadata_common::Status::Failed);
            tracing::warn!(error = %err, "resolve failed permanently");
        }
    }
}

fn bump_retry<R: Record>(record: &mut R, max_retry_count: i32) {
    let retry_count = record.retry_count() + 1;
    record.set_retry_count(retry_count);
    if retry_count >= max_retry_count {
        record.set_status(metadata_common::Status::Failed);
    }
}

/// Spawns `count` workers reading from `tasks` and posting resolved
/// records to `results`. Returns their join handles.
pub fn spawn<R: Record>(
    count: usize,
    tasks: Receiver<R>,
    results: Sender<R>,
    resolver: Arc<dyn Resolver>,
    resolve_timeout: Duration,
    max_retry_count: i32,
    cancellation: CancellationToken,
) -> Vec<tokio::task::JoinHandle<()>> {
    (0..count)
        .map(|worker_id| {
            let tasks = tasks.clone();
            let results = results.clone();
            let resolver = resolver.clone();
            let cancellation = cancellation.clone();
            tokio::spawn(async move {
                loop {
                    let record = tokio::select! {
                        biased;
                        _ = cancellation.cancelled() => break,
                        recv = tasks.recv() => match recv {
                            Ok(record) => record,
                            Err(_) => break,
                        },
                    };
                    run_one(record, &resolver, &results, resolve_timeout, max_retry_count).await;
                }
                tracing::debug!(worker_id, "worker shut down");
            })
        })
        .collect()
}

async fn run_one<R: Record>(
    mut record: R,
    resolver: &Arc<dyn Resolver>,
    results: &Sender<R>,
    resolve_timeout: Duration,
    max_retry_count: i32,
) {
    let network = record.network().to_string();
    let contract = record.contract().to_string();
    let link = record.link().to_string();

    let outcome = match tokio::time::timeout(
        resolve_timeout,
        resolver.resolve(&network, &contract, &link),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(ResolveError::NoIpfsResponse(format!(
            "resolve timed out after {resolve_timeout:?}"
        ))),
    };

    apply_resolution(&mut record, outcome, max_retry_count);
    let _ = results.send(record).await;
}
