//! Durable storage for metadata records, the IPFS link cache, and the
//! upstream indexer's opaque context row. Grounded on
//! `cmd/metadata/models/db.go` (query shapes, index DDL) and this
//! crate's `write_batch` columnar-`UNNEST` idiom in `indexer.rs`.

use async_trait::async_trait;
use metadata_common::{Action, CommonError, ContextItem, ContractMetadata, IpfsLink, Status, TokenMetadata};
use sqlx::PgPool;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Common(#[from] CommonError),
}

/// Common view over `ContractMetadata`/`TokenMetadata` the manager,
/// worker, and saver operate on without knowing the concrete entity kind.
pub trait Record: Send + Sync + Clone + 'static {
    fn id(&self) -> i64;
    fn network(&self) -> &str;
    fn contract(&self) -> &str;
    fn link(&self) -> &str;
    fn metadata(&self) -> &serde_json::Value;
    fn set_metadata(&mut self, metadata: serde_json::Value);
    fn status(&self) -> Status;
    fn set_status(&mut self, status: Status);
    fn retry_count(&self) -> i32;
    fn set_retry_count(&mut self, retry_count: i32);

    /// Applies the derived fields extracted from resolved metadata (spec
    /// section 4.F). A no-op for entity kinds that don't carry them.
    fn apply_derived_fields(&mut self, _tweet_id: String, _creator_id: String) {}
}

impl Record for ContractMetadata {
    fn id(&self) -> i64 {
        self.id
    }
    fn network(&self) -> &str {
        &self.network
    }
    fn contract(&self) -> &str {
        &self.contract
    }
    fn link(&self) -> &str {
        &self.link
    }
    fn metadata(&self) -> &serde_json::Value {
        &self.metadata
    }
    fn set_metadata(&mut self, metadata: serde_json::Value) {
        self.metadata = metadata;
    }
    fn status(&self) -> Status {
        self.status
    }
    fn set_status(&mut self, status: Status) {
        self.status = status;
    }
    fn retry_count(&self) -> i32 {
        self.retry_count
    }
    fn set_retry_count(&mut self, retry_count: i32) {
        self.retry_count = retry_count;
    }
}

impl Record for TokenMetadata {
    fn id(&self) -> i64 {
        self.id
    }
    fn network(&self) -> &str {
        &self.network
    }
    fn contract(&self) -> &str {
        &self.contract
    }
    fn link(&self) -> &str {
        &self.link
    }
    fn metadata(&self) -> &serde_json::Value {
        &self.metadata
    }
    fn set_metadata(&mut self, metadata: serde_json::Value) {
        self.metadata = metadata;
    }
    fn status(&self) -> Status {
        self.status
    }
    fn set_status(&mut self, status: Status) {
        self.status = status;
    }
    fn retry_count(&self) -> i32 {
        self.retry_count
    }
    fn set_retry_count(&mut self, retry_count: i32) {
        self.retry_count = retry_count;
    }
    fn apply_derived_fields(&mut self, tweet_id: String, creator_id: String) {
        self.tweet_id = tweet_id;
        self.creator_id = creator_id;
    }
}

/// Per-entity-kind durable storage operations. One `PgRepository` method
/// set is implemented per entity kind below, rather than deriving SQL
/// from `Record`'s accessors, since the two tables don't share a column
/// layout (tokens carry `token_id`/`tweet_id`/`creator_id`/`image_processed`).
#[async_trait]
pub trait Repository<R: Record>: Send + Sync {
    async fn get_pending(
        &self,
        network: &str,
        status: Status,
        limit: i64,
        offset: i64,
        max_retry: i32,
    ) -> Result<Vec<R>, RepositoryError>;

    async fn save(&self, records: &[R]) -> Result<(), RepositoryError>;
    async fn update(&self, records: &[R]) -> Result<(), RepositoryError>;
    async fn count_by_status(&self, network: &str, status: Status) -> Result<i64, RepositoryError>;
    async fn last_update_id(&self) -> Result<i64, RepositoryError>;
    async fn create_indices(&self) -> Result<(), RepositoryError>;
}

/// The IPFS link cache is shared across entity kinds (one `ipfs_link`
/// table keyed by URL), so it's kept separate from `Repository<R>`
/// rather than duplicated per entity kind.
#[async_trait]
pub trait IpfsLinkCache: Send + Sync {
    async fn link_by_url(&self, url: &str) -> Result<Option<IpfsLink>, RepositoryError>;
}

#[async_trait]
impl IpfsLinkCache for PgRepository {
    async fn link_by_url(&self, url: &str) -> Result<Option<IpfsLink>, RepositoryError> {
        self.ipfs_link_by_url(url).await
    }
}

pub struct PgRepository {
    pool: PgPool,
}

impl PgRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ipfs_link_by_url(&self, url: &str) -> Result<Option<IpfsLink>, RepositoryError> {
        let link = sqlx::query_as::<_, IpfsLink>(
            "SELECT id, link, data, node FROM ipfs_link WHERE link = $1",
        )
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;
        Ok(link)
    }

    pub async fn ipfs_link(&self, id: i64) -> Result<Option<IpfsLink>, RepositoryError> {
        let link = sqlx::query_as::<_, IpfsLink>(
            "SELECT id, link, data, node FROM ipfs_link WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(link)
    }

    pub async fn ipfs_links(&self, limit: i64, offset: i64) -> Result<Vec<IpfsLink>, RepositoryError> {
        let links = sqlx::query_as::<_, IpfsLink>(
            "SELECT id, link, data, node FROM ipfs_link ORDER BY id DESC LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(links)
    }

    /// Select-or-insert on unique `link`: idempotent across repeated calls
    /// for the same URL.
    pub async fn save_ipfs_link(&self, link: &IpfsLink) -> Result<IpfsLink, RepositoryError> {
        let saved = sqlx::query_as::<_, IpfsLink>(
            "INSERT INTO ipfs_link (link, data, node) VALUES ($1, $2, $3)
             ON CONFLICT (link) DO UPDATE SET link = ipfs_link.link
             RETURNING id, link, data, node",
        )
        .bind(&link.link)
        .bind(&link.data)
        .bind(&link.node)
        .fetch_one(&self.pool)
        .await?;
        Ok(saved)
    }

    pub async fn update_ipfs_link(&self, link: &IpfsLink) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE ipfs_link SET data = $2, node = $3 WHERE id = $1")
            .bind(link.id)
            .bind(&link.data)
            .bind(&link.node)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn dump_context(&self, action: Action, item: &ContextItem) -> Result<(), RepositoryError> {
        match action {
            Action::Create => {
                sqlx::query("INSERT INTO context_item (id, value) VALUES ($1, $2)")
                    .bind(item.id)
                    .bind(&item.value)
                    .execute(&self.pool)
                    .await?;
            }
            Action::Update => {
                sqlx::query("UPDATE context_item SET value = $2 WHERE id = $1")
                    .bind(item.id)
                    .bind(&item.value)
                    .execute(&self.pool)
                    .await?;
            }
            Action::Delete => {
                sqlx::query("DELETE FROM context_item WHERE id = $1")
                    .bind(item.id)
                    .execute(&self.pool)
                    .await?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Repository<ContractMetadata> for PgRepository {
    async fn get_pending(
        &self,
        network: &str,
        status: Status,
        limit: i64,
        offset: i64,
        max_retry: i32,
    ) -> Result<Vec<ContractMetadata>, RepositoryError> {
        let rows = sqlx::query_as::<_, ContractMetadata>(
            "SELECT id, network, contract, metadata, link, status, retry_count, update_id, created_at, updated_at
             FROM contract_metadata
             WHERE network = $1 AND status = $2
               AND ($5 <= 0 OR retry_count < $5)
             ORDER BY retry_count DESC, updated_at DESC
             LIMIT CASE WHEN $3 > 0 THEN $3 ELSE NULL END
             OFFSET CASE WHEN $4 > 0 THEN $4 ELSE 0 END",
        )
        .bind(network)
        .bind(status as i16)
        .bind(limit)
        .bind(offset)
        .bind(max_retry)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn save(&self, records: &[ContractMetadata]) -> Result<(), RepositoryError> {
        if records.is_empty() {
            return Ok(());
        }
        let networks: Vec<&str> = records.iter().map(|r| r.network.as_str()).collect();
        let contracts: Vec<&str> = records.iter().map(|r| r.contract.as_str()).collect();
        let metadata: Vec<&serde_json::Value> = records.iter().map(|r| &r.metadata).collect();
        let links: Vec<&str> = records.iter().map(|r| r.link.as_str()).collect();
        let update_ids: Vec<i64> = records.iter().map(|r| r.update_id).collect();
        let statuses: Vec<i16> = records.iter().map(|r| r.status as i16).collect();

        sqlx::query(
            "INSERT INTO contract_metadata (network, contract, metadata, link, update_id, status)
             SELECT * FROM unnest($1::text[], $2::text[], $3::jsonb[], $4::text[], $5::bigint[], $6::smallint[])
                AS t(network, contract, metadata, link, update_id, status)
             ON CONFLICT (network, contract) DO UPDATE SET
                metadata = excluded.metadata,
                link = excluded.link,
                update_id = excluded.update_id,
                status = excluded.status",
        )
        .bind(&networks[..])
        .bind(&contracts[..])
        .bind(&metadata[..])
        .bind(&links[..])
        .bind(&update_ids[..])
        .bind(&statuses[..])
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, records: &[ContractMetadata]) -> Result<(), RepositoryError> {
        if records.is_empty() {
            return Ok(());
        }
        let ids: Vec<i64> = records.iter().map(|r| r.id).collect();
        let metadata: Vec<&serde_json::Value> = records.iter().map(|r| &r.metadata).collect();
        let update_ids: Vec<i64> = records.iter().map(|r| r.update_id).collect();
        let statuses: Vec<i16> = records.iter().map(|r| r.status as i16).collect();
        let retry_counts: Vec<i32> = records.iter().map(|r| r.retry_count).collect();

        sqlx::query(
            "UPDATE contract_metadata AS c SET
                metadata = u.metadata,
                update_id = u.update_id,
                status = u.status,
                retry_count = u.retry_count
             FROM unnest($1::bigint[], $2::jsonb[], $3::bigint[], $4::smallint[], $5::int[])
                AS u(id, metadata, update_id, status, retry_count)
             WHERE c.id = u.id",
        )
        .bind(&ids[..])
        .bind(&metadata[..])
        .bind(&update_ids[..])
        .bind(&statuses[..])
        .bind(&retry_counts[..])
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_by_status(&self, network: &str, status: Status) -> Result<i64, RepositoryError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM contract_metadata WHERE network = $1 AND status = $2",
        )
        .bind(network)
        .bind(status as i16)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn last_update_id(&self) -> Result<i64, RepositoryError> {
        let (max,): (Option<i64>,) =
            sqlx::query_as("SELECT MAX(update_id) FROM contract_metadata")
                .fetch_one(&self.pool)
                .await?;
        Ok(max.unwrap_or(0))
    }

    async fn create_indices(&self) -> Result<(), RepositoryError> {
        sqlx::query(
            "CREATE INDEX CONCURRENTLY IF NOT EXISTS contract_metadata_network_status_idx
             ON contract_metadata (network, status)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX CONCURRENTLY IF NOT EXISTS contract_metadata_sort_idx
             ON contract_metadata (retry_count, updated_at)",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Repository<TokenMetadata> for PgRepository {
    async fn get_pending(
        &self,
        network: &str,
        status: Status,
        limit: i64,
        offset: i64,
        max_retry: i32,
    ) -> Result<Vec<TokenMetadata>, RepositoryError> {
        let rows = sqlx::query_as::<_, TokenMetadata>(
            "SELECT id, network, contract, token_id, metadata, link, status, retry_count, update_id,
                    image_processed, tweet_id, creator_id, created_at, updated_at
             FROM token_metadata
             WHERE network = $1 AND status = $2
               AND ($5 <= 0 OR retry_count < $5)
             ORDER BY retry_count DESC, updated_at DESC
             LIMIT CASE WHEN $3 > 0 THEN $3 ELSE NULL END
             OFFSET CASE WHEN $4 > 0 THEN $4 ELSE 0 END",
        )
        .bind(network)
        .bind(status as i16)
        .bind(limit)
        .bind(offset)
        .bind(max_retry)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn save(&self, records: &[TokenMetadata]) -> Result<(), RepositoryError> {
        if records.is_empty() {
            return Ok(());
        }
        let networks: Vec<&str> = records.iter().map(|r| r.network.as_str()).collect();
        let contracts: Vec<&str> = records.iter().map(|r| r.contract.as_str()).collect();
        let token_ids: Vec<i64> = records.iter().map(|r| r.token_id).collect();
        let metadata: Vec<&serde_json::Value> = records.iter().map(|r| &r.metadata).collect();
        let links: Vec<&str> = records.iter().map(|r| r.link.as_str()).collect();
        let update_ids: Vec<i64> = records.iter().map(|r| r.update_id).collect();
        let statuses: Vec<i16> = records.iter().map(|r| r.status as i16).collect();

        sqlx::query(
            "INSERT INTO token_metadata (network, contract, token_id, metadata, link, update_id, status)
             SELECT * FROM unnest(
                $1::text[], $2::text[], $3::bigint[], $4::jsonb[], $5::text[], $6::bigint[], $7::smallint[]
             ) AS t(network, contract, token_id, metadata, link, update_id, status)
             ON CONFLICT (network, contract, token_id) DO UPDATE SET
                metadata = excluded.metadata,
                link = excluded.link,
                update_id = excluded.update_id,
                status = excluded.status",
        )
        .bind(&networks[..])
        .bind(&contracts[..])
        .bind(&token_ids[..])
        .bind(&metadata[..])
        .bind(&links[..])
        .bind(&update_ids[..])
        .bind(&statuses[..])
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, records: &[TokenMetadata]) -> Result<(), RepositoryError> {
        if records.is_empty() {
            return Ok(());
        }
        let ids: Vec<i64> = records.iter().map(|r| r.id).collect();
        let metadata: Vec<&serde_json::Value> = records.iter().map(|r| &r.metadata).collect();
        let update_ids: Vec<i64> = records.iter().map(|r| r.update_id).collect();
        let statuses: Vec<i16> = records.iter().map(|r| r.status as i16).collect();
        let retry_counts: Vec<i32> = records.iter().map(|r| r.retry_count).collect();
        let links: Vec<&str> = records.iter().map(|r| r.link.as_str()).collect();
        let tweet_ids: Vec<&str> = records.iter().map(|r| r.tweet_id.as_str()).collect();
        let creator_ids: Vec<&str> = records.iter().map(|r| r.creator_id.as_str()).collect();

        sqlx::query(
            "UPDATE token_metadata AS c SET
                metadata = u.metadata,
                update_id = u.update_id,
                status = u.status,
                retry_count = u.retry_count,
                link = u.link,
                tweet_id = u.tweet_id,
                creator_id = u.creator_id
             FROM unnest(
                $1::bigint[], $2::jsonb[], $3::bigint[], $4::smallint[], $5::int[],
                $6::text[], $7::text[], $8::text[]
             ) AS u(id, metadata, update_id, status, retry_count, link, tweet_id, creator_id)
             WHERE c.id = u.id",
        )
        .bind(&ids[..])
        .bind(&metadata[..])
        .bind(&update_ids[..])
        .bind(&statuses[..])
        .bind(&retry_counts[..])
        .bind(&links[..])
        .bind(&tweet_ids[..])
        .bind(&creator_ids[..])
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_by_status(&self, network: &str, status: Status) -> Result<i64, RepositoryError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM token_metadata WHERE network = $1 AND status = $2",
        )
        .bind(network)
        .bind(status as i16)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn last_update_id(&self) -> Result<i64, RepositoryError> {
        let (max,): (Option<i64>,) =
            sqlx::query_as("SELECT MAX(update_id) FROM token_metadata")
                .fetch_one(&self.pool)
                .await?;
        Ok(max.unwrap_or(0))
    }

    async fn create_indices(&self) -> Result<(), RepositoryError> {
        sqlx::query(
            "CREATE INDEX CONCURRENTLY IF NOT EXISTS token_metadata_network_status_idx
             ON token_metadata (network, status)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX CONCURRENTLY IF NOT EXISTS token_metadata_sort_idx
             ON token_metadata (retry_count, updated_at)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX CONCURRENTLY IF NOT EXISTS token_metadata_tweet_idx
             ON token_metadata (tweet_id, contract, network)",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
