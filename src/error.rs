//! Error taxonomy shared by every layer of the engine.
//!
//! Mirrors the status-code family of the embedded-database lineage this
//! crate belongs to: a flat set of named failure kinds rather than nested
//! per-module error types, because callers (the VM most of all) need to
//! pattern-match on kind to decide whether a transaction must roll back.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// A single taxonomy of failures, shared by the pager, B-tree, tokenizer,
/// code generator, and VM. Variant names follow §7 of the design: they are
/// illustrative status kinds, not per-call-site error types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    /// SQL logic error or a reference to a missing object.
    #[error("{0}")]
    Sql(String),

    /// An internal invariant was violated; indicates a bug in this crate.
    #[error("internal error: {0}")]
    Internal(String),

    /// A callback requested the operation be aborted.
    #[error("callback requested abort")]
    Abort,

    /// Another connection holds a conflicting lock; caller may retry.
    #[error("database is busy")]
    Busy,

    /// A table is locked by another cursor within this connection.
    #[error("database table is locked")]
    Locked,

    /// Allocation failed; any partial mutation has been unwound.
    #[error("out of memory")]
    NoMem,

    /// A write was attempted against a read-only handle.
    #[error("attempt to write a readonly database")]
    ReadOnly,

    /// The interrupt flag was observed at the top of an opcode.
    #[error("interrupted")]
    Interrupt,

    /// Underlying storage I/O failed; the active transaction must roll back.
    #[error("disk I/O error: {0}")]
    IoErr(String),

    /// A structural invariant of a page or overflow chain was violated.
    #[error("database disk image is malformed: {0}")]
    Corrupt(String),

    /// A lookup found no matching entry.
    #[error("not found")]
    NotFound,

    /// A resource (free-page list, rowid space, ...) has been exhausted.
    #[error("database or disk is full")]
    Full,

    /// The database file could not be opened.
    #[error("unable to open database file")]
    CantOpen,

    /// The compiled schema is stale with respect to the schema cookie.
    #[error("schema has changed")]
    Schema,

    /// A value or key exceeds an engine limit.
    #[error("string or blob too big")]
    TooBig,

    /// A constraint (e.g. duplicate primary key policy) was violated.
    #[error("constraint failed: {0}")]
    Constraint(String),

    /// The API was used in a way its contract forbids (e.g. step() on a
    /// finalized statement).
    #[error("bad parameter or API misuse: {0}")]
    Misuse(String),

    /// A value could not be parsed or formatted as requested.
    #[error("format error: {0}")]
    Format(String),

    /// A requested index or offset is out of range.
    #[error("out of range")]
    Range,
}

impl Error {
    pub fn sql(msg: impl Into<String>) -> Self {
        Error::Sql(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    pub fn corrupt(msg: impl Into<String>) -> Self {
        Error::Corrupt(msg.into())
    }

    pub fn constraint(msg: impl Into<String>) -> Self {
        Error::Constraint(msg.into())
    }

    /// True for the kinds that §7 says force a transaction rollback:
    /// `IoErr`, `Corrupt`, `Internal`, `NoMem`. `Busy` and `Constraint`
    /// leave the transaction active so the caller may retry or rollback
    /// explicitly.
    pub fn forces_rollback(&self) -> bool {
        matches!(
            self,
            Error::IoErr(_) | Error::Corrupt(_) | Error::Internal(_) | Error::NoMem
        )
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::IoErr(e.to_string())
    }
}
