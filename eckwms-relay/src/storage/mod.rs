//! SQLite storage backend for the relay.

pub mod models;

use crate::error::RelayError;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Thread-safe relay storage.
#[derive(Clone)]
pub struct RelayStorage {
    conn: Arc<Mutex<Connection>>,
}

impl RelayStorage {
    pub fn open(path: &Path) -> Result<Self, anyhow::Error> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA journal_mode = WAL;")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        storage.initialize_schema()?;
        Ok(storage)
    }

    pub fn in_memory() -> Result<Self, anyhow::Error> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;

        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        storage.initialize_schema()?;
        Ok(storage)
    }

    fn initialize_schema(&self) -> Result<(), anyhow::Error> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("{}", e))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS instances (
                instance_id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                api_key_hash TEXT NOT NULL UNIQUE,
                tier TEXT NOT NULL DEFAULT 'free',
                public_demo INTEGER NOT NULL DEFAULT 0,
                public_ip TEXT,
                local_ips TEXT NOT NULL DEFAULT '[]',
                proxy_url TEXT,
                registered_at INTEGER NOT NULL,
                last_seen_at INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS scans (
                scan_id TEXT PRIMARY KEY,
                instance_id TEXT,
                payload TEXT NOT NULL,
                checksum TEXT NOT NULL,
                device_id TEXT,
                priority INTEGER NOT NULL DEFAULT 0,
                scan_type TEXT,
                status TEXT NOT NULL DEFAULT 'buffered',
                delivery_count INTEGER NOT NULL DEFAULT 0,
                delivered_at INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL,
                FOREIGN KEY (instance_id) REFERENCES instances(instance_id)
            );

            CREATE INDEX IF NOT EXISTS idx_scans_instance_status
                ON scans(instance_id, status);
            CREATE INDEX IF NOT EXISTS idx_scans_instance_created
                ON scans(instance_id, created_at);",
        )?;
        Ok(())
    }

    pub fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, RelayError> {
        self.conn
            .lock()
            .map_err(|e| RelayError::Transient(format!("Lock error: {}", e)))
    }
}
