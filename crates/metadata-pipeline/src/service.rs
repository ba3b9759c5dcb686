//! Wires Manager, Worker Pool and Saver together behind a single
//! `start`/`close` lifecycle per entity kind. Grounded on
//! `TokenService`/`ContractService` in `cmd/metadata/service/token.go`
//! and `cmd/metadata/service/contract.go`, and on this crate's
//! task-supervision style in `main.rs`.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::inflight::InFlightSet;
use crate::metrics::MetricsSink;
use crate::repository::{IpfsLinkCache, Record, Repository};
use crate::resolver::Resolver;
use crate::{manager, saver, worker};

/// Generic pipeline: one Manager, a pool of Workers and one Saver for a
/// single entity kind `R`. `ContractService`/`TokenService` are thin
/// aliases over this for the two entity kinds the binary runs.
pub struct PipelineService<R: Record + Send + 'static, Repo: Repository<R> + IpfsLinkCache + Send + Sync + 'static> {
    repository: Arc<Repo>,
    resolver: Arc<dyn Resolver>,
    metrics: Arc<dyn MetricsSink>,
    config: Config,
    entity_kind: &'static str,
    cancellation: CancellationToken,
    tasks: Vec<tokio::task::JoinHandle<()>>,
    _marker: std::marker::PhantomData<R>,
}

impl<R, Repo> PipelineService<R, Repo>
where
    R: Record + Send + 'static,
    Repo: Repository<R> + IpfsLinkCache + Send + Sync + 'static,
{
    pub fn new(
        repository: Arc<Repo>,
        resolver: Arc<dyn Resolver>,
        metrics: Arc<dyn MetricsSink>,
        config: Config,
        entity_kind: &'static str,
    ) -> Self {
        Self {
            repository,
            resolver,
            metrics,
            config,
            entity_kind,
            cancellation: CancellationToken::new(),
            tasks: Vec::new(),
            _marker: std::marker::PhantomData,
        }
    }

    /// Spawns the manager, worker pool and saver. Each is an independent
    /// task observing the same `CancellationToken`, so a call to `close`
    /// tears all three down without needing to close the channels between
    /// them first.
    pub fn start(&mut self) {
        let in_flight = InFlightSet::new();
        let (task_tx, task_rx) = async_channel::bounded(self.config.tasks_capacity);
        let (result_tx, result_rx) = tokio::sync::mpsc::channel(self.config.results_capacity);

        let manager = manager::Manager {
            repository: self.repository.clone(),
            network: self.config.network.clone(),
            max_retry_count: self.config.max_retry_count,
            workers_count: self.config.workers_count,
            in_flight: in_flight.clone(),
            tasks: task_tx,
            results: result_tx.clone(),
            tick: self.config.manager_tick,
            cancellation: self.cancellation.clone(),
        };
        self.tasks.push(tokio::spawn(manager.run()));

        let workers = worker::spawn(
            self.config.workers_count,
            task_rx,
            result_tx,
            self.resolver.clone(),
            self.config.resolve_timeout,
            self.config.max_retry_count,
            self.cancellation.clone(),
        );
        self.tasks.extend(workers);

        let saver = saver::Saver {
            repository: self.repository.clone(),
            results: result_rx,
            in_flight,
            batch_size: self.config.saver_batch,
            interval_idle: self.config.saver_interval_idle,
            interval_after_flush: self.config.saver_interval_after_flush,
            metrics: self.metrics.clone(),
            network: self.config.network.clone(),
            entity_kind: self.entity_kind,
            cancellation: self.cancellation.clone(),
        };
        self.tasks.push(tokio::spawn(saver.run()));

        tracing::info!(entity_kind = self.entity_kind, "pipeline started");
    }

    /// Signals every task to stop and waits for all of them to finish.
    /// Cancellation happens before the join, not after — the manager and
    /// workers observe it at their next `select!` and the saver drains
    /// its channel before the `CancellationToken` branch ever fires on an
    /// empty channel, so nothing is dropped mid-flight.
    pub async fn close(mut self) {
        self.cancellation.cancel();
        for task in self.tasks.drain(..) {
            if let Err(err) = task.await {
                tracing::error!(error = %err, entity_kind = self.entity_kind, "pipeline task panicked");
            }
        }
        tracing::info!(entity_kind = self.entity_kind, "pipeline stopped");
    }
}

pub type ContractService<Repo> = PipelineService<metadata_common::ContractMetadata, Repo>;
pub type TokenService<Repo> = PipelineService<metadata_common::TokenMetadata, Repo>;

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use metadata_common::{IpfsLink, Status, TokenMetadata};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::repository::RepositoryError;
    use crate::resolver::ResolveError;

    struct EmptyRepository {
        pending_served: AtomicUsize,
    }

    #[async_trait]
    impl Repository<TokenMetadata> for EmptyRepository {
        async fn get_pending(
            &self,
            _network: &str,
            _status: Status,
            _limit: i64,
            _offset: i64,
            _max_retry: i32,
        ) -> Result<Vec<TokenMetadata>, RepositoryError> {
            self.pending_served.fetch_add(1, Ordering::SeqCst);
            Ok(vec![])
        }

        async fn save(&self, _records: &[TokenMetadata]) -> Result<(), RepositoryError> {
            Ok(())
        }

        async fn update(&self, _records: &[TokenMetadata]) -> Result<(), RepositoryError> {
            Ok(())
        }

        async fn count_by_status(&self, _network: &str, _status: Status) -> Result<i64, RepositoryError> {
            Ok(0)
        }

        async fn last_update_id(&self) -> Result<i64, RepositoryError> {
            Ok(0)
        }

        async fn create_indices(&self) -> Result<(), RepositoryError> {
            Ok(())
        }
    }

    #[async_trait]
    impl IpfsLinkCache for EmptyRepository {
        async fn link_by_url(&self, _url: &str) -> Result<Option<IpfsLink>, RepositoryError> {
            Ok(None)
        }
    }

    struct NeverResolver;

    #[async_trait]
    impl Resolver for NeverResolver {
        async fn resolve(&self, _network: &str, _contract: &str, _link: &str) -> Result<Vec<u8>, ResolveError> {
            Err(ResolveError::Permanent("never called in this test".to_string()))
        }
    }

    struct NoopMetrics;
    impl MetricsSink for NoopMetrics {
        fn dec_gauge(&self, _name: &'static str, _network: &str, _entity_kind: &str) {}
        fn increment_counter(&self, _name: &'static str, _network: &str, _entity_kind: &str, _status: &str) {}
    }

    fn test_config() -> Config {
        Config {
            database_url: "postgres://unused".to_string(),
            db_max_connections: 1,
            network: "mainnet".to_string(),
            max_retry_count: 3,
            workers_count: 2,
            tasks_capacity: 16,
            results_capacity: 16,
            saver_batch: 32,
            saver_interval_idle: Duration::from_millis(20),
            saver_interval_after_flush: Duration::from_secs(15),
            manager_tick: Duration::from_millis(10),
            resolve_timeout: Duration::from_secs(5),
            ipfs_gateways: vec![],
        }
    }

    #[tokio::test]
    async fn start_and_close_tears_down_every_task_cleanly() {
        let repository = Arc::new(EmptyRepository {
            pending_served: AtomicUsize::new(0),
        });
        let mut service: TokenService<EmptyRepository> = PipelineService::new(
            repository.clone(),
            Arc::new(NeverResolver),
            Arc::new(NoopMetrics),
            test_config(),
            "token",
        );

        service.start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        service.close().await;

        assert!(repository.pending_served.load(Ordering::SeqCst) > 0);
    }
}
