//! Batches completed records and flushes them to the Repository on a
//! size or time trigger. Grounded on `TokenService.saver` in
//! `cmd/metadata/service/token.go`.

use std::sync::Arc;
use std::time::Duration;

use metadata_common::Status;
use tokio::sync::mpsc::Receiver;
use tokio_util::sync::CancellationToken;

use crate::inflight::InFlightSet;
use crate::metrics::MetricsSink;
use crate::repository::{Record, Repository};

pub struct Saver<R: Record, Repo: Repository<R>> {
    pub repository: Arc<Repo>,
    pub results: Receiver<R>,
    pub in_flight: InFlightSet,
    pub batch_size: usize,
    pub interval_idle: Duration,
    pub interval_after_flush: Duration,
    pub metrics: Arc<dyn MetricsSink>,
    pub network: String,
    pub entity_kind: &'static str,
    pub cancellation: CancellationToken,
}

impl<R: Record, Repo: Repository<R>> Saver<R, Repo> {
    pub async fn run(mut self) {
        let mut buffer: Vec<R> = Vec::with_capacity(self.batch_size);
        let mut ticker = tokio::time::interval(self.interval_idle);
        ticker.reset();

        loop {
            tokio::select! {
                biased;
                _ = self.cancellation.cancelled() => return,
                received = self.results.recv() => {
                    let Some(record) = received else { return };
                    self.record_metrics(&record);
                    buffer.push(record);

                    if buffer.len() >= self.batch_size {
                        if self.flush(&mut buffer).await {
                            ticker = tokio::time::interval(self.interval_after_flush);
                            ticker.reset();
                        }
                    }
                }
                _ = ticker.tick() => {
                    if buffer.is_empty() {
                        continue;
                    }
                    self.flush(&mut buffer).await;
                }
            }
        }
    }

    /// Flushes `buffer` to the Repository. Returns whether the flush
    /// succeeded; on failure the buffer (and in-flight membership) is
    /// left untouched so the next trigger retries it.
    async fn flush(&self, buffer: &mut Vec<R>) -> bool {
        match self.repository.update(buffer).await {
            Ok(()) => {
                for record in buffer.drain(..) {
                    self.in_flight.delete(record.id());
                }
                true
            }
            Err(err) => {
                tracing::error!(error = %err, "UpdateMetadata");
                false
            }
        }
    }

    fn record_metrics(&self, record: &R) {
        if matches!(record.status(), Status::Applied | Status::Failed) {
            self.metrics.dec_gauge("metadata_new", self.network.as_str(), self.entity_kind);
            self.metrics.increment_counter(
                "metadata_counter",
                self.network.as_str(),
                self.entity_kind,
                record.status().as_str(),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use metadata_common::TokenMetadata;
    use std::sync::Mutex;

    struct RecordingRepository {
        updates: Mutex<Vec<Vec<TokenMetadata>>>,
        fail_next: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl Repository<TokenMetadata> for RecordingRepository {
        async fn get_pending(
            &self,
            _network: &str,
            _status: Status,
            _limit: i64,
            _offset: i64,
            _max_retry: i32,
        ) -> Result<Vec<TokenMetadata>, crate::repository::RepositoryError> {
            Ok(vec![])
        }

        async fn save(&self, _records: &[TokenMetadata]) -> Result<(), crate::repository::RepositoryError> {
            Ok(())
        }

        async fn update(&self, records: &[TokenMetadata]) -> Result<(), crate::repository::RepositoryError> {
            if self.fail_next.swap(false, std::sync::atomic::Ordering::SeqCst) {
                return Err(crate::repository::RepositoryError::Common(
                    metadata_common::CommonError::InvalidInput("simulated failure".to_string()),
                ));
            }
            self.updates.lock().unwrap().push(records.to_vec());
            Ok(())
        }

        async fn count_by_status(&self, _network: &str, _status: Status) -> Result<i64, crate::repository::RepositoryError> {
            Ok(0)
        }

        async fn last_update_id(&self) -> Result<i64, crate::repository::RepositoryError> {
            Ok(0)
        }

        async fn create_indices(&self) -> Result<(), crate::repository::RepositoryError> {
            Ok(())
        }
    }

    struct NoopMetrics;
    impl MetricsSink for NoopMetrics {
        fn dec_gauge(&self, _name: &'static str, _network: &str, _entity_kind: &str) {}
        fn increment_counter(&self, _name: &'static str, _network: &str, _entity_kind: &str, _status: &str) {}
    }

    fn sample(id: i64) -> TokenMetadata {
        TokenMetadata {
            id,
            network: "mainnet".to_string(),
            contract: "KT1abc".to_string(),
            token_id: id,
            metadata: serde_json::Value::Null,
            link: String::new(),
            status: Status::Applied,
            retry_count: 0,
            update_id: 1,
            image_processed: false,
            tweet_id: String::new(),
            creator_id: String::new(),
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn flushes_exactly_one_batch_at_size_trigger() {
        let repo = Arc::new(RecordingRepository {
            updates: Mutex::new(vec![]),
            fail_next: std::sync::atomic::AtomicBool::new(false),
        });
        let in_flight = InFlightSet::new();
        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let cancellation = CancellationToken::new();

        let saver = Saver {
            repository: repo.clone(),
            results: rx,
            in_flight: in_flight.clone(),
            batch_size: 32,
            interval_idle: Duration::from_millis(50),
            interval_after_flush: Duration::from_secs(15),
            metrics: Arc::new(NoopMetrics),
            network: "mainnet".to_string(),
            entity_kind: "token",
            cancellation: cancellation.clone(),
        };
        let handle = tokio::spawn(saver.run());

        for i in 0..32 {
            in_flight.add(i);
            tx.send(sample(i)).await.unwrap();
        }

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancellation.cancel();
        let _ = handle.await;

        let updates = repo.updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].len(), 32);
        for i in 0..32 {
            assert!(!in_flight.contains(i));
        }
    }

    #[tokio::test]
    async fn flushes_partial_batch_on_time_trigger() {
        let repo = Arc::new(RecordingRepository {
            updates: Mutex::new(vec![]),
            fail_next: std::sync::atomic::AtomicBool::new(false),
        });
        let in_flight = InFlightSet::new();
        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let cancellation = CancellationToken::new();

        let saver = Saver {
            repository: repo.clone(),
            results: rx,
            in_flight: in_flight.clone(),
            batch_size: 32,
            interval_idle: Duration::from_millis(30),
            interval_after_flush: Duration::from_secs(15),
            metrics: Arc::new(NoopMetrics),
            network: "mainnet".to_string(),
            entity_kind: "token",
            cancellation: cancellation.clone(),
        };
        let handle = tokio::spawn(saver.run());

        for i in 0..5 {
            in_flight.add(i);
            tx.send(sample(i)).await.unwrap();
        }

        tokio::time::sleep(Duration::from_millis(150)).await;
        cancellation.cancel();
        let _ = handle.await;

        let updates = repo.updates.lock().unwrap();
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].len(), 5);
    }

    #[tokio::test]
    async fn failed_flush_retains_buffer_and_in_flight_membership() {
        let repo = Arc::new(RecordingRepository {
            updates: Mutex::new(vec![]),
            fail_next: std::sync::atomic::AtomicBool::new(true),
        });
        let in_flight = InFlightSet::new();
        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let cancellation = CancellationToken::new();

        let saver = Saver {
            repository: repo.clone(),
            results: rx,
            in_flight: in_flight.clone(),
            batch_size: 32,
            interval_idle: Duration::from_millis(30),
            interval_after_flush: Duration::from_secs(15),
            metrics: Arc::new(NoopMetrics),
            network: "mainnet".to_string(),
            entity_kind: "token",
            cancellation: cancellation.clone(),
        };
        let handle = tokio::spawn(saver.run());

        in_flight.add(1);
        tx.send(sample(1)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        cancellation.cancel();
        let _ = handle.await;

        assert!(repo.updates.lock().unwrap().is_empty());
        assert!(in_flight.contains(1));
    }
}
