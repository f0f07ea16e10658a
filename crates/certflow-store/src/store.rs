use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use tracing::debug;

use certflow_core::error::{CertflowError, Result};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS workflows (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    trigger_type TEXT NOT NULL,
    enabled INTEGER NOT NULL,
    has_content INTEGER NOT NULL,
    data TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS workflow_runs (
    id TEXT PRIMARY KEY,
    workflow_id TEXT NOT NULL,
    status TEXT NOT NULL,
    trigger_type TEXT NOT NULL,
    graph TEXT NOT NULL,
    started_at TEXT NOT NULL,
    ended_at TEXT,
    error TEXT
);

CREATE INDEX IF NOT EXISTS idx_runs_workflow
    ON workflow_runs(workflow_id, started_at DESC);

CREATE TABLE IF NOT EXISTS workflow_logs (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL,
    node_id TEXT NOT NULL,
    node_name TEXT NOT NULL,
    level TEXT NOT NULL,
    message TEXT NOT NULL,
    detail TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_logs_run ON workflow_logs(run_id, seq);

CREATE TABLE IF NOT EXISTS certificates (
    id TEXT PRIMARY KEY,
    source TEXT NOT NULL,
    subject_alt_names TEXT NOT NULL,
    certificate TEXT NOT NULL,
    issuer_certificate TEXT NOT NULL,
    private_key TEXT NOT NULL,
    key_algorithm TEXT NOT NULL,
    serial_number TEXT NOT NULL,
    issuer_org TEXT NOT NULL,
    valid_from TEXT,
    valid_to TEXT,
    acme_account_url TEXT NOT NULL,
    acme_certificate_url TEXT NOT NULL,
    renewed_from_id TEXT,
    workflow_id TEXT NOT NULL,
    workflow_run_id TEXT NOT NULL,
    workflow_node_id TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_certs_node
    ON certificates(workflow_id, workflow_node_id, created_at DESC);

CREATE TABLE IF NOT EXISTS workflow_outputs (
    id TEXT NOT NULL,
    workflow_id TEXT NOT NULL,
    run_id TEXT NOT NULL,
    node_id TEXT NOT NULL,
    node_config TEXT NOT NULL,
    outputs TEXT NOT NULL,
    succeeded INTEGER NOT NULL,
    skipped INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    PRIMARY KEY (run_id, node_id)
);

CREATE INDEX IF NOT EXISTS idx_outputs_node
    ON workflow_outputs(workflow_id, node_id, created_at DESC);

CREATE TABLE IF NOT EXISTS accesses (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    provider TEXT NOT NULL,
    config TEXT NOT NULL
);
";

/// SQLite-backed implementation of every certflow repository.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create a SQLite database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        // Create parent directories
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CertflowError::Database(format!("Failed to create db directory: {}", e))
            })?;
        }

        let conn = Connection::open(path).map_err(db_err)?;

        // Enable WAL mode for better concurrent performance
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;

        debug!(path = %path.display(), "SQLite store opened");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| CertflowError::Database(e.to_string()))
    }
}

pub(crate) fn db_err(e: rusqlite::Error) -> CertflowError {
    CertflowError::Database(e.to_string())
}

pub(crate) fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

pub(crate) fn parse_opt_ts(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}
