//! The shared reservation store.
//!
//! All receiver processes on a machine share one SQLite database. The
//! reservation scheduler runs entirely inside a single write
//! transaction on this store: acquisition of the `IMMEDIATE`
//! transaction is the serialisation point, snapshot reads inside the
//! transaction see a consistent state, and a reservation becomes
//! visible atomically with the commit.

mod cursor;
mod dev_store;
mod mux_store;
mod schema;

pub use cursor::{FreqCursor, Seek};
pub use dev_store::*;
pub use mux_store::*;

use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use thiserror::Error;

use dvbpool_types::FeKey;

/// Store error types.
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("corrupt column value: {0}")]
    CorruptValue(String),

    #[error("frontend not found: adapter_mac={:#x}, frontend_no={}", .0.adapter_mac_address, .0.frontend_no)]
    FrontendNotFound(FeKey),
}

impl DatabaseError {
    /// Whether the error is a write-transaction conflict the caller
    /// may retry.
    pub fn is_store_conflict(&self) -> bool {
        match self {
            DatabaseError::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, DatabaseError>;

/// Main store connection wrapper.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create the store at the specified path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(10))?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        let db = Self { conn };
        db.initialize_schema()?;
        Ok(db)
    }

    fn initialize_schema(&self) -> Result<()> {
        self.conn.execute_batch(schema::SCHEMA_SQL)?;
        Ok(())
    }

    /// Begin a read-only transaction. Reads inside it are
    /// snapshot-consistent.
    pub fn read_txn(&mut self) -> Result<Transaction<'_>> {
        Ok(self.conn.transaction()?)
    }

    /// Begin the write transaction. `IMMEDIATE` takes the write lock
    /// up front, so concurrent reservation attempts from other
    /// processes serialise here.
    pub fn write_txn(&mut self) -> Result<Transaction<'_>> {
        Ok(self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?)
    }

    /// The underlying connection (for advanced queries).
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}
