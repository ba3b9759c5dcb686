pub mod codec;
pub mod config;
pub mod inflight;
pub mod manager;
pub mod metrics;
pub mod repository;
pub mod resolver;
pub mod saver;
pub mod service;
pub mod tweet;
pub mod worker;

pub use config::Config;
pub use inflight::InFlightSet;
pub use metrics::{GlobalMetricsSink, MetricsSink};
pub use repository::{IpfsLinkCache, PgRepository, Record, Repository, RepositoryError};
pub use resolver::{HttpIpfsResolver, ResolveError, Resolver};
pub use service::{ContractService, PipelineService, TokenService};
