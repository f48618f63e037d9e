//! # mesh-migrate
//!
//! mesh-migrate repartitions an unstructured mesh distributed over a set of
//! processes and moves its elements and nodes to their new owners.
//!
//! ## Pipeline
//! - [`partitioning::Partitioner`] exposes the locally owned mesh as a graph
//!   ([`partitioning::MeshGraph`]), runs a [`partitioning::GraphPartitioner`]
//!   once and collects the objects leaving this process into a sorted
//!   [`partitioning::ChangeSet`].
//! - [`algs::migrate_mesh`] consumes the change set: elements are shipped,
//!   missing nodes are requested from their owners, nodes are shipped, and
//!   connectivity is rebuilt against the new local node tables.
//! - Every per-row change goes through the buffered tables of
//!   [`data::flex_table`], whose flush reports how indices moved.
//!
//! ## Communication
//! Nothing is process-global. Each collective takes a
//! [`algs::communicator::Communicator`]: [`algs::communicator::NoComm`] for
//! serial runs, [`algs::communicator::ThreadComm`] to run several ranks on
//! threads of one process, and `MpiComm` with the `mpi-support` feature.
//!
//! ## Determinism
//! The `RANDOM` method draws from a `SmallRng` seeded from configuration, and
//! every flush reuses slots in a fixed order, so runs are reproducible.

pub mod algs;
pub mod data;
pub mod mesh_error;
pub mod partitioning;
pub mod topology;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::communicator::{CommTag, Communicator, NoComm, ThreadComm, Wait};
    pub use crate::algs::migration::{MigrationReport, migrate_mesh};
    pub use crate::data::flex_table::{FlexList, FlexTable, Remap};
    pub use crate::mesh_error::MeshMigrateError;
    pub use crate::partitioning::{
        Approach, BuiltinSolver, ChangeSet, ExplicitAssignment, GraphPartitioner, GraphQuery,
        Method, PartitionOptions, Partitioner,
    };
    pub use crate::topology::components::{
        Component, ElementBlock, Mesh, NodeRecord, NodeStore,
    };
    pub use crate::topology::global_id::{GlobalId, IdSpace};
}
