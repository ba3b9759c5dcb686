//! Periodically pulls new work from the Repository, short-circuits on an
//! IPFS link cache hit, and otherwise admits records to the worker pool.
//! Grounded on `TokenService.manager` in `cmd/metadata/service/token.go`.

use std::sync::Arc;
use std::time::Duration;

use async_channel::Sender as TaskSender;
use tokio::sync::mpsc::Sender as ResultSender;
use tokio_util::sync::CancellationToken;

use metadata_common::Status;

use crate::codec::ipfs;
use crate::inflight::InFlightSet;
use crate::repository::{IpfsLinkCache, Record, Repository};
use crate::tweet;

const FETCH_BATCH: i64 = 200;

pub struct Manager<R: Record, Repo: Repository<R> + IpfsLinkCache> {
    pub repository: Arc<Repo>,
    pub network: String,
    pub max_retry_count: i32,
    pub workers_count: usize,
    pub in_flight: InFlightSet,
    pub tasks: TaskSender<R>,
    pub results: ResultSender<R>,
    pub tick: Duration,
    pub cancellation: CancellationToken,
}

impl<R: Record, Repo: Repository<R> + IpfsLinkCache> Manager<R, Repo> {
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.tick);
        loop {
            tokio::select! {
                biased;
                _ = self.cancellation.cancelled() => return,
                _ = interval.tick() => {
                    if self.tasks.len() > self.workers_count {
                        continue;
                    }
                    if let Err(err) = self.tick().await {
                        tracing::error!(error = %err, "manager tick failed, skipping");
                    }
                }
            }
        }
    }

    async fn tick(&self) -> Result<(), crate::repository::RepositoryError> {
        let candidates = self
            .repository
            .get_pending(&self.network, Status::New, FETCH_BATCH, 0, self.max_retry_count)
            .await?;

        for mut record in candidates {
            let id = record.id();
            if self.in_flight.contains(id) {
                continue;
            }

            if ipfs::is(record.link()) {
                match self.repository.link_by_url(record.link()).await {
                    Ok(Some(cached)) => {
                        apply_cache_hit(&mut record, cached.data);
                        let _ = self.results.send(record).await;
                        continue;
                    }
                    Ok(None) => {}
                    Err(err) => tracing::warn!(error = %err, "IPFSLinkByURL"),
                }
            }

            self.in_flight.add(id);
            if self.tasks.send(record).await.is_err() {
                self.in_flight.delete(id);
                return Ok(());
            }
        }

        Ok(())
    }
}

/// Cache-hit short-circuit: replaces `metadata` with the cached document
/// and marks `Applied` without consuming a worker slot. The
/// `retry_count` bump here mirrors the original implementation's
/// behavior bit-for-bit (see the open question in the design notes); it
/// is not merged with the existing metadata, unlike a worker resolve
/// success.
fn apply_cache_hit<R: Record>(record: &mut R, cached_data: serde_json::Value) {
    record.set_metadata(cached_data.clone());
    let (tweet_id, creator_id) = tweet::parse(&cached_data);
    record.apply_derived_fields(tweet_id, creator_id);
    record.set_retry_count(record.retry_count() + 1);
    record.set_status(Status::Applied);
}
