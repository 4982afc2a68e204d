use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::error::StorageError;
use crate::storage::LedgerStorage;

/// PostgreSQL-backed ledger storage, one row per key
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Create a new Database instance with a connection pool
    pub async fn new(database_url: &str) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Get a reference to the connection pool
    pub fn get_pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the key/value table if this database has never held a ledger
    pub async fn ensure_schema(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ledger_kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(self.get_pool())
        .await?;

        Ok(())
    }
}

#[async_trait]
impl LedgerStorage for Database {
    async fn load(&self, key: &str) -> Result<Option<String>, StorageError> {
        let value = sqlx::query_scalar::<_, String>("SELECT value FROM ledger_kv WHERE key = $1")
            .bind(key)
            .fetch_optional(self.get_pool())
            .await?;

        Ok(value)
    }

    async fn save(&self, key: &str, value: &str) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO ledger_kv (key, value, updated_at)
            VALUES ($1, $2, now())
            ON CONFLICT (key) DO UPDATE
            SET value = EXCLUDED.value, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(self.get_pool())
        .await?;

        Ok(())
    }
}

/// Connect and make sure the ledger table exists
pub async fn init(database_url: &str) -> Result<Database, StorageError> {
    let db = Database::new(database_url).await?;
    db.ensure_schema().await?;

    Ok(db)
}
