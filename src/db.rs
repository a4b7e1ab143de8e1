//! Postgres storage adapter: schema bootstrap and connection management.
//!
//! The server draws its connections from an eagerly-filled pool sized to
//! the worker count, so no request ever waits on a fresh connect. The
//! indexer bypasses the pool: the walker and each document worker own a
//! dedicated [`PgConnection`] for the life of their transaction.

use sqlx::postgres::PgPoolOptions;
use sqlx::{Connection, PgConnection, PgPool};
use std::time::Duration;
use tracing::{info, warn};

use crate::error::Error;

/// Connection attempts before giving up.
const CONNECT_ATTEMPTS: u32 = 5;

const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Default wait for a pooled handle.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Authoritative schema. Idempotent; executed at every startup.
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS files (
        id BIGSERIAL PRIMARY KEY,
        name TEXT NOT NULL,
        num_pages INT NOT NULL,
        path TEXT NOT NULL,
        UNIQUE(name, path)
    )",
    // text_vector is derived by the engine; the substring cap keeps the
    // tsvector inside its size limit for pathological pages.
    "CREATE TABLE IF NOT EXISTS pages (
        id BIGSERIAL PRIMARY KEY,
        file_id BIGINT NOT NULL REFERENCES files(id) ON DELETE CASCADE,
        page_num INTEGER NOT NULL,
        text TEXT NOT NULL,
        text_vector tsvector GENERATED ALWAYS AS
            (to_tsvector('english', substring(text, 1, 100000))) STORED,
        UNIQUE(file_id, page_num)
    )",
    "CREATE INDEX IF NOT EXISTS idx_pages_text_vector ON pages USING GIN(text_vector)",
    "CREATE INDEX IF NOT EXISTS idx_pages_file_id ON pages(file_id)",
    "CREATE INDEX IF NOT EXISTS idx_pages_lookup ON pages(file_id, page_num)",
];

/// Connects an eagerly-filled pool with one handle per server worker.
pub async fn connect_pool(conninfo: &str, workers: u32) -> Result<PgPool, Error> {
    let mut attempt = 1u32;
    loop {
        let connected = PgPoolOptions::new()
            .max_connections(workers)
            .min_connections(workers)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect(conninfo)
            .await;

        match connected {
            Ok(pool) => {
                info!(connections = workers, "Connected to Postgres");
                return Ok(pool);
            }
            Err(e) if attempt < CONNECT_ATTEMPTS => {
                warn!(attempt, error = %e, "Postgres connection failed, retrying");
                tokio::time::sleep(CONNECT_RETRY_DELAY).await;
                attempt += 1;
            }
            Err(e) => return Err(Error::Storage(e)),
        }
    }
}

/// Opens a dedicated connection for an indexing task. Never shared
/// across tasks; dropped when the task finishes its document.
pub async fn connect_worker(conninfo: &str) -> Result<PgConnection, Error> {
    let mut attempt = 1u32;
    loop {
        match PgConnection::connect(conninfo).await {
            Ok(conn) => return Ok(conn),
            Err(e) if attempt < CONNECT_ATTEMPTS => {
                warn!(attempt, error = %e, "Worker connection failed, retrying");
                tokio::time::sleep(CONNECT_RETRY_DELAY).await;
                attempt += 1;
            }
            Err(e) => return Err(Error::Storage(e)),
        }
    }
}

/// Creates tables and indexes if they do not exist yet.
pub async fn create_schema(pool: &PgPool) -> Result<(), Error> {
    for statement in SCHEMA {
        sqlx::query(statement).execute(pool).await?;
    }
    info!("Schema ready");
    Ok(())
}
