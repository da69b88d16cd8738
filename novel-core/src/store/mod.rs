//! SQLite-backed relational store.
//!
//! Every multi-statement write (version snapshot + overwrite + aggregate
//! recompute, chapter insert + plan transition) runs inside one immediate
//! transaction, so a failure part-way leaves nothing behind.

pub(crate) mod annotations;
pub(crate) mod chapters;
mod memory;
pub(crate) mod novels;
pub mod schema;
pub(crate) mod techniques;
pub(crate) mod versions;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use crate::error::{NovelError, Result};

pub use chapters::NewChapter;
pub use memory::{NewCharacter, NewForeshadowing, NewSetting};

/// The relational store.
///
/// A single connection behind a mutex; SQLite serializes writers anyway and
/// no lock is ever held across an `.await`.
///
/// Every call is synchronous and blocks the calling thread for the length
/// of its SQLite work. A server that shares one store across many requests
/// should make its calls from `tokio::task::spawn_blocking`.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        schema::initialize(&conn)?;
        tracing::info!(path = %path.display(), "opened novel store");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A panic while holding the lock cannot leave a half-applied write:
        // the open transaction is rolled back when it is dropped.
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run read-only statements.
    pub fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.lock();
        f(&conn)
    }

    /// Run `f` inside one immediate transaction; commits only if `f` succeeds.
    pub fn transaction<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}

/// Map a uniqueness violation to `Conflict`, leaving other errors intact.
pub(crate) fn conflict_on_unique(err: rusqlite::Error, message: impl Into<String>) -> NovelError {
    if NovelError::is_unique_violation(&err) {
        NovelError::Conflict(message.into())
    } else {
        NovelError::Store(err)
    }
}

pub(crate) fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

pub(crate) fn json_column<T: serde::de::DeserializeOwned>(
    raw: String,
    idx: usize,
) -> rusqlite::Result<T> {
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    })
}

pub(crate) fn enum_column<T>(
    raw: String,
    idx: usize,
    parse: impl Fn(&str) -> Option<T>,
) -> rusqlite::Result<T> {
    parse(&raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            rusqlite::types::Type::Text,
            format!("unknown value '{raw}'").into(),
        )
    })
}
