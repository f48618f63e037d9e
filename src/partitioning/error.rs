//! Partitioning errors for mesh-migrate

use thiserror::Error;

/// Errors reported by a graph-partitioning solver or found in its answer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SolverError {
    /// The built-in dispatcher has no implementation for this method.
    #[error("partitioning method {0} requires an external solver")]
    UnsupportedMethod(String),
    /// Zero target partitions were requested.
    #[error("invalid number of target partitions: {0}")]
    InvalidPartCount(usize),
    /// The export list named the same object twice.
    #[error("solver exported global id {0} more than once")]
    DuplicateExport(u64),
    /// The export list named an object the calling process does not own.
    #[error("solver exported global id {0}, which is not owned by this process")]
    ExportNotOwned(u64),
    /// The export list assigned an object to a partition outside `[0, parts)`.
    #[error("solver assigned global id {gid} to partition {part}, but only {parts} exist")]
    PartOutOfRange { gid: u64, part: usize, parts: usize },
    /// Other errors (e.g. external solver failures or non-convergence)
    #[error("partitioner error: {0}")]
    Other(String),
}
