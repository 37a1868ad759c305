use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use thiserror::Error;
use uuid::Uuid;

/// Errors for operations on the processed-event ledger.
/// Errors can originate from sqlx and are wrapped by us to provide additional context.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("connection failed with: {0}")]
    Connection(sqlx::Error),
    #[error("{command} query failed with: {error}")]
    Query {
        command: String,
        error: sqlx::Error,
    },
    #[error("a processed record already exists for this message id")]
    Duplicate,
}

/// Durable record of successfully processed message identifiers.
///
/// `record` is the durability boundary: a message only counts as done once
/// it returns `Ok`. A concurrent insert for the same id must fail visibly
/// with `LedgerError::Duplicate`, which callers fold into the success path.
#[async_trait]
pub trait ProcessedEventLedger: Send + Sync {
    async fn exists(&self, message_id: &str) -> Result<bool, LedgerError>;

    async fn record(&self, message_id: &str, product_id: Uuid) -> Result<(), LedgerError>;
}

pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    pub async fn new(url: &str, max_connections: u32) -> Result<Self, LedgerError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(url)
            .await
            .map_err(LedgerError::Connection)?;

        Ok(Self { pool })
    }

    pub fn new_from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProcessedEventLedger for PostgresLedger {
    async fn exists(&self, message_id: &str) -> Result<bool, LedgerError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM processed_event WHERE message_id = $1)",
        )
        .bind(message_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|error| LedgerError::Query {
            command: "SELECT".to_owned(),
            error,
        })?;

        Ok(exists)
    }

    async fn record(&self, message_id: &str, product_id: Uuid) -> Result<(), LedgerError> {
        // The primary key makes the insert atomic; losing the race reports
        // zero affected rows instead of clobbering the winner's record.
        let result = sqlx::query(
            r#"
INSERT INTO processed_event (message_id, product_id, processed_at)
VALUES ($1, $2, NOW())
ON CONFLICT (message_id) DO NOTHING
            "#,
        )
        .bind(message_id)
        .bind(product_id)
        .execute(&self.pool)
        .await
        .map_err(|error| LedgerError::Query {
            command: "INSERT".to_owned(),
            error,
        })?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::Duplicate);
        }

        Ok(())
    }
}
