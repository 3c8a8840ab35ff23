// Copyright 2025 Mica Project Authors. Licensed under Apache-2.0.

//! The transactional columnar table storage core.
//!
//! Leaf to root: [`SegmentTree`] is the ordered, indexable sequence of
//! segments reused both for per-column [`ColumnSegment`]s and per-table
//! [`RowGroup`]s; [`ColumnData`] owns one segment tree per column plus an
//! optional [`UpdateSegment`] undo chain; a [`RowGroup`] composes one
//! `ColumnData` per column with a [`RowVersionManager`] for MVCC; a
//! [`Collection`] is the table's full row storage.

mod adaptive_filter;
mod collection;
mod column;
mod column_segment;
mod filter;
mod options;
mod row_group;
mod scan;
mod segment_tree;
mod update_segment;
mod version_manager;

pub use self::adaptive_filter::*;
pub use self::collection::*;
pub use self::column::*;
pub use self::column_segment::*;
pub use self::filter::*;
pub use self::options::*;
pub use self::row_group::*;
pub use self::scan::*;
pub use self::segment_tree::*;
pub use self::update_segment::*;
pub use self::version_manager::*;

/// Row ids are 55-bit; ids at or above this sentinel denote transaction-local
/// rows that must never be persisted as committed row ids.
pub const MAX_ROW_ID: u64 = 1 << 55;

/// First id handed out to an active (uncommitted) transaction. Commit ids are
/// always below this boundary.
pub const TRANSACTION_ID_START: u64 = 1 << 62;

/// Sentinel delete id of a row that has not been deleted.
pub const NOT_DELETED_ID: u64 = u64::MAX - 1;

/// Sentinel column index denoting the virtual row-id column in a scan.
pub const COLUMN_IDENTIFIER_ROW_ID: u64 = u64::MAX;

/// Hard upper bound on the configured row-group capacity.
pub const MAX_ROW_GROUP_SIZE: u64 = 1 << 30;

/// Errors surfaced by the storage core. No error kind is retried internally;
/// the caller owns transaction-level retry policy.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum StorageError {
    /// A concurrent write-write collision: an undo-chain conflict or a
    /// double delete. The transaction must abort or retry.
    #[error("transaction conflict: {0}")]
    Conflict(&'static str),

    /// A type/operation combination that is intentionally not implemented.
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    /// An internal invariant does not hold. Unrecoverable.
    #[error("internal error: {0}")]
    Internal(String),

    /// An operation was invoked against the wrong state.
    #[error("invalid state: {0}")]
    InvalidState(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

impl StorageError {
    pub(crate) fn internal(msg: impl Into<String>) -> Self {
        StorageError::Internal(msg.into())
    }

    pub(crate) fn invalid_state(msg: impl Into<String>) -> Self {
        StorageError::InvalidState(msg.into())
    }
}
