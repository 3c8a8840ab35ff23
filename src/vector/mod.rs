// Copyright 2025 Mica Project Authors. Licensed under Apache-2.0.

//! The in-memory columnar batch runtime.
//!
//! Scans produce and appends consume batches of up to
//! [`DEFAULT_VECTOR_CAPACITY`] rows. A [`Vector`] is one column of such a
//! batch, a [`DataChunk`] is a set of equally-sized vectors, a [`SelVector`]
//! selects a subset of a batch by row offset, and a [`ValidityMask`] is the
//! packed null bitmap every vector carries.

mod data_chunk;
mod sel;
mod validity;
#[allow(clippy::module_inception)]
mod vector;

pub use self::data_chunk::*;
pub use self::sel::*;
pub use self::validity::*;
pub use self::vector::*;

/// Number of rows in one vector batch. This is also the chunk granularity of
/// the MVCC version bookkeeping.
pub const DEFAULT_VECTOR_CAPACITY: usize = 1024;
