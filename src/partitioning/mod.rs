//! Partition driver: configure a solver, run it over the mesh graph and turn
//! its verdict into a [`ChangeSet`].

pub mod change_set;
pub mod error;
pub mod graph_query;
pub mod solvers;

use std::fmt;
use std::str::FromStr;

use hashbrown::HashSet;
use serde::{Deserialize, Serialize};

use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::migration::{MigrationReport, migrate_mesh};
use crate::mesh_error::MeshMigrateError;
use crate::topology::components::Mesh;
use crate::topology::global_id::GlobalNumbering;

pub use self::change_set::{ChangeSet, ChangeSetBuilder};
pub use self::error::SolverError;
pub use self::graph_query::{GraphQuery, MeshGraph};
pub use self::solvers::{BuiltinSolver, ExplicitAssignment, Export, GraphPartitioner};

/// Tag of the ownership gather run before partitioning.
pub const PARTITION_TAG: CommTag = CommTag::new(0x5000);

/// Debug level from which the full graph is dumped at `trace` level.
pub const GRAPH_DUMP_LEVEL: u32 = 8;

pub type PartitionId = usize;

/// Load-balancing method requested from the solver.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Method {
    Block,
    Random,
    Rcb,
    Rib,
    Hsfc,
    Graph,
    Hypergraph,
    Hier,
    None,
}

impl Method {
    pub const ALL: [Method; 9] = [
        Method::Block,
        Method::Random,
        Method::Rcb,
        Method::Rib,
        Method::Hsfc,
        Method::Graph,
        Method::Hypergraph,
        Method::Hier,
        Method::None,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Method::Block => "BLOCK",
            Method::Random => "RANDOM",
            Method::Rcb => "RCB",
            Method::Rib => "RIB",
            Method::Hsfc => "HSFC",
            Method::Graph => "GRAPH",
            Method::Hypergraph => "HYPERGRAPH",
            Method::Hier => "HIER",
            Method::None => "NONE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = MeshMigrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Method::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| MeshMigrateError::InvalidOption {
                key: "LB_METHOD".into(),
                reason: format!("unknown method `{s}`"),
            })
    }
}

/// Whether to partition from scratch or improve the current distribution.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Approach {
    Partition,
    Repartition,
    Refine,
}

impl Approach {
    pub const fn as_str(self) -> &'static str {
        match self {
            Approach::Partition => "PARTITION",
            Approach::Repartition => "REPARTITION",
            Approach::Refine => "REFINE",
        }
    }
}

impl fmt::Display for Approach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Approach {
    type Err = MeshMigrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Approach::Partition, Approach::Repartition, Approach::Refine]
            .into_iter()
            .find(|a| a.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| MeshMigrateError::InvalidOption {
                key: "LB_APPROACH".into(),
                reason: format!("unknown approach `{s}`"),
            })
    }
}

/// Solver configuration, received as plain key/value options.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionOptions {
    pub method: Method,
    pub approach: Approach,
    /// 0 means one partition per process.
    pub target_partition_count: usize,
    /// 0 (silent) ..= 10 (everything).
    pub debug_level: u32,
    pub graph_package: String,
    /// Seed of the `RANDOM` method.
    pub rng_seed: u64,
}

impl Default for PartitionOptions {
    fn default() -> Self {
        Self {
            method: Method::Graph,
            approach: Approach::Partition,
            target_partition_count: 0,
            debug_level: 0,
            graph_package: "PHG".to_owned(),
            rng_seed: 42,
        }
    }
}

pub const MAX_DEBUG_LEVEL: u32 = 10;

impl PartitionOptions {
    /// Build from `(key, value)` pairs; both the descriptive names and the
    /// solver parameter names are accepted. Unknown keys are rejected.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self, MeshMigrateError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut opts = Self::default();
        for (key, value) in pairs {
            let bad = |reason: String| MeshMigrateError::InvalidOption {
                key: key.to_owned(),
                reason,
            };
            match key {
                "Method" | "LB_METHOD" => opts.method = value.parse()?,
                "Approach" | "LB_APPROACH" => opts.approach = value.parse()?,
                "Number of Partitions" | "NUM_GLOBAL_PARTS" => {
                    opts.target_partition_count = value
                        .trim()
                        .parse()
                        .map_err(|e| bad(format!("`{value}`: {e}")))?;
                }
                "Debug Level" | "DEBUG_LEVEL" => {
                    opts.debug_level = value
                        .trim()
                        .parse()
                        .map_err(|e| bad(format!("`{value}`: {e}")))?;
                }
                "Graph Package" | "GRAPH_PACKAGE" => opts.graph_package = value.trim().to_owned(),
                "Seed" | "SEED" => {
                    opts.rng_seed = value
                        .trim()
                        .parse()
                        .map_err(|e| bad(format!("`{value}`: {e}")))?;
                }
                _ => return Err(bad("unknown option".into())),
            }
        }
        opts.validate()?;
        Ok(opts)
    }

    pub fn validate(&self) -> Result<(), MeshMigrateError> {
        if self.debug_level > MAX_DEBUG_LEVEL {
            return Err(MeshMigrateError::InvalidOption {
                key: "DEBUG_LEVEL".into(),
                reason: format!("{} exceeds {MAX_DEBUG_LEVEL}", self.debug_level),
            });
        }
        Ok(())
    }

    /// Number of target partitions for a job of `procs` ranks.
    pub fn parts(&self, procs: usize) -> usize {
        if self.target_partition_count == 0 {
            procs
        } else {
            self.target_partition_count
        }
    }

    /// Graph checking level; never below 2, so the graph is always verified.
    pub fn check_graph(&self) -> u32 {
        self.debug_level.max(2)
    }

    /// The solver parameters as `KEY=value` strings.
    pub fn solver_params(&self, procs: usize) -> Vec<String> {
        vec![
            format!("DEBUG_LEVEL={}", self.debug_level),
            format!("LB_METHOD={}", self.method),
            format!("LB_APPROACH={}", self.approach),
            "NUM_GID_ENTRIES=1".to_owned(),
            "RETURN_LISTS=EXPORT".to_owned(),
            format!("NUM_GLOBAL_PARTS={}", self.parts(procs)),
            format!("GRAPH_PACKAGE={}", self.graph_package),
            format!("CHECK_GRAPH={}", self.check_graph()),
        ]
    }
}

/// Rank hosting partition `part`: the part itself when there are no more
/// parts than ranks, otherwise parts are spread evenly over the ranks.
pub fn part_to_proc(part: PartitionId, parts: usize, procs: usize) -> usize {
    if parts <= procs {
        part
    } else {
        part * procs / parts
    }
}

/// Runs one partitioning decision.
#[derive(Clone, Debug, Default)]
pub struct Partitioner {
    options: PartitionOptions,
}

impl Partitioner {
    pub fn new(options: PartitionOptions) -> Result<Self, MeshMigrateError> {
        options.validate()?;
        Ok(Self { options })
    }

    pub fn options(&self) -> &PartitionOptions {
        &self.options
    }

    /// Collective: build the graph view of `mesh`, run `solver` once and
    /// collect the objects leaving this rank into a sorted [`ChangeSet`].
    pub fn partition_graph<C, S>(
        &self,
        comm: &C,
        mesh: &Mesh,
        solver: &mut S,
    ) -> Result<ChangeSet, MeshMigrateError>
    where
        C: Communicator,
        S: GraphPartitioner,
    {
        let me = comm.rank();
        let procs = comm.size();
        let parts = self.options.parts(procs);
        if parts == 0 {
            return Err(SolverError::InvalidPartCount(parts).into());
        }

        let numbering = GlobalNumbering::build(comm, PARTITION_TAG, mesh)?;
        let graph = MeshGraph::new(mesh, &numbering, me)?;
        if self.options.debug_level >= 1 {
            log::debug!("[{me}] solver parameters: {}", self.options.solver_params(procs).join(" "));
        }
        if self.options.check_graph() >= 1 {
            graph.validate()?;
        }
        if self.options.debug_level >= GRAPH_DUMP_LEVEL {
            log::trace!("[{me}] graph:\n{}", graph.describe()?);
        }

        let exports = solver.partition(comm, &graph, &self.options, parts)?;

        let mut seen = HashSet::with_capacity(exports.len());
        let mut builder = ChangeSetBuilder::new(numbering.space(), parts);
        for Export { gid, part } in exports {
            if !graph.contains(gid) {
                return Err(SolverError::ExportNotOwned(gid).into());
            }
            if part >= parts {
                return Err(SolverError::PartOutOfRange { gid, part, parts }.into());
            }
            if !seen.insert(gid) {
                return Err(SolverError::DuplicateExport(gid).into());
            }
            if part_to_proc(part, parts, procs) != me {
                builder.insert_blindly(gid, part);
            }
        }
        let changes = builder.finish()?;
        log::info!(
            "[{me}] partitioned into {parts} parts: {} of {} objects leave this rank",
            changes.len(),
            graph.num_obj()
        );
        Ok(changes)
    }

    /// Collective: partition, then migrate `mesh` to the new distribution.
    ///
    /// The default method is `GRAPH`, which [`BuiltinSolver`] does not
    /// implement: with default options it returns `UnsupportedMethod`.
    /// Set `method` to `BLOCK` or `RANDOM`, or pass another solver.
    /// A mesh migrated here can be repartitioned again.
    pub fn repartition<C, S>(
        &self,
        comm: &C,
        mesh: &mut Mesh,
        solver: &mut S,
    ) -> Result<MigrationReport, MeshMigrateError>
    where
        C: Communicator,
        S: GraphPartitioner,
    {
        let changes = self.partition_graph(comm, mesh, solver)?;
        migrate_mesh(comm, mesh, &changes)
    }
}
