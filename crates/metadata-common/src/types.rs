use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Lifecycle status of a metadata record. `Applied` and `Failed` are
/// terminal — the pipeline never mutates a record in either state.
///
/// Stored as a `smallint` column. Scalar `sqlx::Type`/`Encode`/`Decode` are
/// implemented by hand below rather than derived, since bulk writes bind
/// `Vec<i16>` directly (see `Repository::update`'s `UNNEST` statements) and
/// only single-value binds/decodes ever see this type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(i16)]
pub enum Status {
    New = 0,
    Applied = 1,
    Failed = 2,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::New => "new",
            Status::Applied => "applied",
            Status::Failed => "failed",
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl TryFrom<i16> for Status {
    type Error = crate::error::CommonError;

    fn try_from(value: i16) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Status::New),
            1 => Ok(Status::Applied),
            2 => Ok(Status::Failed),
            other => Err(crate::error::CommonError::InvalidInput(format!(
                "unknown status value: {other}"
            ))),
        }
    }
}

impl sqlx::Type<sqlx::Postgres> for Status {
    fn type_info() -> sqlx::postgres::PgTypeInfo {
        <i16 as sqlx::Type<sqlx::Postgres>>::type_info()
    }
}

impl sqlx::Encode<'_, sqlx::Postgres> for Status {
    fn encode_by_ref(
        &self,
        buf: &mut sqlx::postgres::PgArgumentBuffer,
    ) -> Result<sqlx::encode::IsNull, sqlx::error::BoxDynError> {
        <i16 as sqlx::Encode<sqlx::Postgres>>::encode_by_ref(&(*self as i16), buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Postgres> for Status {
    fn decode(value: sqlx::postgres::PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let raw = <i16 as sqlx::Decode<sqlx::Postgres>>::decode(value)?;
        Status::try_from(raw).map_err(Into::into)
    }
}

/// Contract-level off-chain metadata, identified by (network, contract).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ContractMetadata {
    pub id: i64,
    pub network: String,
    pub contract: String,
    pub metadata: serde_json::Value,
    pub link: String,
    pub status: Status,
    pub retry_count: i32,
    pub update_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Token-level off-chain metadata, identified by (network, contract, token_id).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TokenMetadata {
    pub id: i64,
    pub network: String,
    pub contract: String,
    pub token_id: i64,
    pub metadata: serde_json::Value,
    pub link: String,
    pub status: Status,
    pub retry_count: i32,
    pub update_id: i64,
    pub image_processed: bool,
    pub tweet_id: String,
    pub creator_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Cache entity for resolved IPFS links, keyed uniquely by `link`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct IpfsLink {
    pub id: i64,
    pub link: String,
    pub data: serde_json::Value,
    pub node: String,
}

/// Opaque upstream-indexer cursor row; the pipeline only dispatches writes
/// to it by `Action`, never interprets its contents.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ContextItem {
    pub id: i64,
    pub value: serde_json::Value,
}

/// Dispatch tag for `Repository::dump_context`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Create,
    Update,
    Delete,
}
