//! dvbpool: the resource reservation and arbitration core of a
//! multi-tuner DVB receiver.
//!
//! The system manages a pool of physical tuning hardware (satellite,
//! cable and terrestrial frontends, the LNBs they drive, the RF
//! cables and passive switches between them, and the motorised dishes
//! that point them) and arbitrates between concurrent subscriptions
//! that each wish to tune a transport stream, scan a band or
//! exclusively control a dish.
//!
//! The state is shared across processes in a SQLite store ([`db`]);
//! every reservation decision runs inside one write transaction, so
//! concurrent receivers serialise at transaction acquisition and a
//! reservation survives process death until its owner is probed dead.
//!
//! - [`mux`]: the mux lookup / fuzzy-match engine and the
//!   provenance-respecting merge
//! - [`reserve`]: the frontend selector, the LNB arbitrator and the
//!   subscription commit verbs
//! - [`devices`]: the hot-plug monitor feeding frontend records into
//!   the store

pub mod config;
pub mod db;
pub mod devices;
pub mod logging;
pub mod mux;
pub mod reserve;

use thiserror::Error as ThisError;

/// Errors surfaced by the reservation verbs.
#[derive(ThisError, Debug)]
pub enum Error {
    #[error(transparent)]
    Database(#[from] db::DatabaseError),

    #[error(transparent)]
    Reserve(#[from] dvbpool_types::ReserveError),

    #[error("device watcher error: {0}")]
    Watch(#[from] notify::Error),
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Database(e.into())
    }
}

impl Error {
    /// Whether the operation failed on a store write conflict and may
    /// be retried by the caller.
    pub fn is_store_conflict(&self) -> bool {
        matches!(self, Error::Database(e) if e.is_store_conflict())
    }
}
