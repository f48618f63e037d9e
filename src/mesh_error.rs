//! MeshMigrateError: Unified error type for mesh-migrate public APIs
//!
//! Every fallible operation in the crate returns this error. The variants fall
//! into the three classes of failure the migration protocol knows about:
//! protocol/bounds violations local to one process, distributed-consistency
//! violations that would corrupt the global mesh, and solver failures. None of
//! them is retried internally; a repartition that fails must be restarted from
//! the partition driver.

use crate::partitioning::error::SolverError;
use std::fmt::Debug;
use thiserror::Error;

/// Unified error type for mesh-migrate operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MeshMigrateError {
    /// A row index referred neither to the live array nor to the pending buffer.
    #[error("row index {index} out of range (live rows: {live}, pending rows: {pending})")]
    RowOutOfRange {
        index: usize,
        live: usize,
        pending: usize,
    },
    /// `set_row` (or a fixed-size table insert) received a row of the wrong length.
    #[error("row {index} has length {found}, expected {expected}")]
    RowSizeMismatch {
        index: usize,
        expected: usize,
        found: usize,
    },
    /// Tables that must be mutated in lockstep disagreed on an index or a remap.
    #[error("parallel table `{table}` out of step: {detail}")]
    ParallelTableMismatch { table: &'static str, detail: String },
    /// A wire writer ran past the end of its buffer.
    #[error("wire overrun: writing {needed} bytes at offset {offset} exceeds capacity {capacity}")]
    WireOverrun {
        offset: usize,
        needed: usize,
        capacity: usize,
    },
    /// A wire reader ran past the end of its message.
    #[error("wire underrun: reading {needed} bytes at offset {offset} exceeds message length {len}")]
    WireUnderrun {
        offset: usize,
        needed: usize,
        len: usize,
    },
    /// The size callback declared a different length than was actually packed/unpacked.
    #[error("wire size mismatch for object {gid}: declared {declared} bytes, used {actual}")]
    WireSizeMismatch {
        gid: u64,
        declared: usize,
        actual: usize,
    },
    /// A value does not fit the fixed-width wire field it is encoded into.
    #[error("value {value} does not fit wire field `{field}`")]
    WireValueOverflow { field: &'static str, value: u64 },
    /// A component index does not exist on this process.
    #[error("unknown component index {0}")]
    UnknownComponent(usize),
    /// A component index exists but is not of the expected kind.
    #[error("component {index} is not a {expected}")]
    WrongComponentKind {
        index: usize,
        expected: &'static str,
    },
    /// Connectivity was accessed in the wrong representation.
    #[error("element block `{block}` connectivity is in {found} form, expected {expected} form")]
    ConnectivityState {
        block: String,
        expected: &'static str,
        found: &'static str,
    },
    /// A connectivity entry pointed outside the node table it refers to.
    #[error("node index {index} out of bounds for node table of size {len} (element block `{block}`)")]
    NodeIndexOutOfBounds {
        block: String,
        index: u64,
        len: usize,
    },
    /// A global id was not found among the locally known entities.
    #[error("global id {0} is not known on this process")]
    UnknownGlobalId(u64),
    /// The owning process of a global id could not be determined.
    #[error("cannot determine owning process of global id {0}")]
    OwnerNotFound(u64),
    /// After migration a retained element references a node that is not stored locally.
    #[error("element block `{block}` references node {gid} which is not present locally")]
    DanglingNode { block: String, gid: u64 },
    /// The same global id appeared twice where uniqueness is required.
    #[error("duplicate global id {0}")]
    DuplicateGlobalId(u64),
    /// An exchange or invert step delivered a different number of objects than expected.
    #[error("unexpected import count from rank {rank}: expected {expected}, got {found}")]
    UnexpectedImportCount {
        rank: usize,
        expected: usize,
        found: usize,
    },
    /// The graph query callbacks contradicted each other.
    #[error("graph query inconsistency: {0}")]
    GraphQueryInconsistent(String),
    /// A configuration key or value was not understood.
    #[error("invalid option `{key}`: {reason}")]
    InvalidOption { key: String, reason: String },
    /// Communication with a peer failed or returned malformed data.
    #[error("communication error with rank {neighbor}: {reason}")]
    CommError { neighbor: usize, reason: String },
    /// The graph-partitioning solver failed.
    #[error(transparent)]
    Solver(#[from] SolverError),
}

impl MeshMigrateError {
    /// True for errors that mean the distributed mesh state can no longer be trusted.
    pub fn is_fatal_consistency(&self) -> bool {
        matches!(
            self,
            MeshMigrateError::OwnerNotFound(_)
                | MeshMigrateError::DanglingNode { .. }
                | MeshMigrateError::UnexpectedImportCount { .. }
                | MeshMigrateError::DuplicateGlobalId(_)
        )
    }

    /// True for errors reported by (or about the output of) the partitioning solver.
    pub fn is_solver(&self) -> bool {
        matches!(self, MeshMigrateError::Solver(_))
    }
}
