use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use metadata_common::db;
use metadata_pipeline::{
    Config, ContractService, GlobalMetricsSink, HttpIpfsResolver, PgRepository, PipelineService,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "metadata_pipeline=info,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!(network = %config.network, "starting metadata resolution pipeline");

    let pool = db::create_pool(&config.database_url, config.db_max_connections).await?;
    db::run_migrations(&pool).await?;

    let repository = Arc::new(PgRepository::new(pool));
    metadata_pipeline::Repository::<metadata_common::ContractMetadata>::create_indices(&*repository)
        .await?;
    metadata_pipeline::Repository::<metadata_common::TokenMetadata>::create_indices(&*repository)
        .await?;

    let resolver: Arc<dyn metadata_pipeline::Resolver> = Arc::new(HttpIpfsResolver::new(
        reqwest::Client::builder()
            .timeout(config.resolve_timeout)
            .build()?,
        config.ipfs_gateways.clone(),
    ));
    let metrics: Arc<dyn metadata_pipeline::MetricsSink> = Arc::new(GlobalMetricsSink);

    let mut contracts: ContractService<PgRepository> = PipelineService::new(
        repository.clone(),
        resolver.clone(),
        metrics.clone(),
        config.clone(),
        "contract",
    );
    let mut tokens: metadata_pipeline::TokenService<PgRepository> = PipelineService::new(
        repository.clone(),
        resolver.clone(),
        metrics.clone(),
        config.clone(),
        "token",
    );

    contracts.start();
    tokens.start();

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received, draining pipelines");

    contracts.close().await;
    tokens.close().await;

    Ok(())
}
