//! Embedded database collaborator.
//!
//! The session runtime never interprets SQL. It drives an [`Engine`] through
//! the handful of operations below and treats everything else as opaque.
//! Each session owns one [`Handle`], duplicated from the shared engine, and
//! touches it only from its own worker thread.
mod sqlite;

use thiserror::Error;
use uuid::Uuid;

use crate::columnar::Field;
use crate::protocol::QueryKind;
use crate::types::Value;

pub use sqlite::{SqliteEngine, SqliteHandle};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("parameter {position}: {reason}")]
    Conversion { position: usize, reason: String },
    #[error("statement takes {expected} parameters but {found} were bound")]
    ParameterCount { expected: usize, found: usize },
    #[error("no statement has been prepared on this session")]
    NoStatement,
    #[error("statement {0} is not the one prepared on this session")]
    UnknownStatement(Uuid),
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

/// Materialized query output, row-major.
#[derive(Debug, Clone, PartialEq)]
pub struct RowSet {
    pub fields: Vec<Field>,
    pub rows: Vec<Vec<Value>>,
}

/// A shared database that hands out independent handles.
pub trait Engine: Send + Sync + 'static {
    type Handle: Handle;

    /// Open a new handle on the same database, private to its caller.
    fn duplicate_handle(&self) -> Result<Self::Handle, EngineError>;
}

/// One connection to the database.
pub trait Handle: Send + 'static {
    /// Compile `sql` and report what executing it produces.
    fn prepare(&mut self, sql: &str) -> Result<QueryKind, EngineError>;

    /// Run `sql` with positional `params` and collect its rows.
    fn execute_query(&mut self, sql: &str, params: &[Value]) -> Result<RowSet, EngineError>;

    /// Run `sql` with positional `params` and return the changed-row count.
    /// Rows the statement produces are discarded.
    fn execute_update(&mut self, sql: &str, params: &[Value]) -> Result<u64, EngineError>;

    fn auto_commit(&self) -> bool;

    /// Turning auto-commit off opens a transaction; turning it back on
    /// commits whatever is pending.
    fn set_auto_commit(&mut self, auto_commit: bool) -> Result<(), EngineError>;

    fn commit(&mut self) -> Result<(), EngineError>;

    fn rollback(&mut self) -> Result<(), EngineError>;
}
