use std::{path::PathBuf, str::FromStr};

use alloy_primitives::hex;
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use tracing::info;

use crate::{
    error::{BenchError, BenchResult},
    rpc::BlockRecord,
};

/// Data source that keeps blocks only for the lifetime of the process.
pub const MEMORY_SOURCE: &str = ":memory:";

// Column layout is fixed for downstream analysis scripts. hash and parentHash
// are part of the layout but not written.
const CREATE_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS blocks(
        blocknumber INTEGER UNIQUE,
        timestamp DECIMAL,
        size INTEGER,
        gasUsed INTEGER,
        gasLimit INTEGER,
        txcount INTEGER,
        hash TEXT,
        parentHash TEXT,
        extra TEXT
    )
"#;

const INSERT_BLOCK: &str = r#"
    INSERT INTO blocks (blocknumber, timestamp, size, gasUsed, gasLimit, txcount, extra)
    VALUES (?, ?, ?, ?, ?, ?, ?)
"#;

/// Append-only SQLite table of collected blocks. The collector is the only writer.
#[derive(Debug, Clone)]
pub struct BlockStore {
    pool: SqlitePool,
    source: String,
}

impl BlockStore {
    /// Opens `source` and creates the table. An existing database file is
    /// refused unless `share` is set, so results from separate runs are not
    /// mixed by accident.
    pub async fn open(source: &str, share: bool) -> BenchResult<Self> {
        let options = match database_path(source) {
            None => SqliteConnectOptions::from_str("sqlite::memory:")?,
            Some(path) => {
                if !share && path.exists() {
                    return Err(BenchError::Storage(format!(
                        "database '{}' exists, updating not supported - move or delete the file",
                        path.display()
                    )));
                }
                SqliteConnectOptions::new().filename(path).create_if_missing(true)
            }
        };

        // A single long lived connection keeps an in-memory database alive.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        sqlx::query(CREATE_TABLE).execute(&pool).await?;

        info!(source, "Block store opened");
        Ok(Self { pool, source: source.to_string() })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Inserts one block. Not transactional; a duplicate block number is an error.
    pub async fn insert(&self, block: &BlockRecord) -> BenchResult<()> {
        sqlx::query(INSERT_BLOCK)
            .bind(block.number as i64)
            .bind(block.timestamp as i64)
            .bind(block.size as i64)
            .bind(block.gas_used as i64)
            .bind(block.gas_limit as i64)
            .bind(block.tx_count as i64)
            .bind(hex::encode(&block.extra_data))
            .execute(&self.pool)
            .await
            .map_err(|e| BenchError::Storage(format!("insert block {}: {e}", block.number)))?;
        Ok(())
    }

    pub async fn count(&self) -> BenchResult<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM blocks").fetch_one(&self.pool).await?;
        Ok(count as u64)
    }

    pub async fn block_numbers(&self) -> BenchResult<Vec<u64>> {
        let numbers: Vec<i64> =
            sqlx::query_scalar("SELECT blocknumber FROM blocks ORDER BY blocknumber")
                .fetch_all(&self.pool)
                .await?;
        Ok(numbers.into_iter().map(|n| n as u64).collect())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// File backing `source`, or `None` for an in-memory database. Accepts plain
/// paths as well as `sqlite:` and `file:` URLs.
fn database_path(source: &str) -> Option<PathBuf> {
    let stripped = ["sqlite://", "sqlite:", "file://", "file:"]
        .iter()
        .find_map(|prefix| source.strip_prefix(prefix))
        .unwrap_or(source);
    let path = stripped.split('?').next().unwrap_or(stripped);
    (path != MEMORY_SOURCE && !path.is_empty()).then(|| PathBuf::from(path))
}
