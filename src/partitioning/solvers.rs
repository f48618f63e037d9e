//! Built-in answers to the solver boundary.
//!
//! Real load balancing (RCB, RIB, HSFC, graph and hypergraph methods) lives
//! in an external library reached through [`GraphPartitioner`]. The solvers
//! here cover the trivial methods and give tests a deterministic assignment.

use hashbrown::HashMap;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::exchange::all_gather_u64;
use crate::mesh_error::MeshMigrateError;
use crate::partitioning::error::SolverError;
use crate::partitioning::graph_query::GraphQuery;
use crate::partitioning::{Method, PartitionOptions};
use crate::topology::global_id::GlobalId;

/// Tag used by solvers that need a collective.
pub const SOLVER_TAG: CommTag = CommTag::new(0x5100);

/// One solver verdict: move `gid` (combined id) to partition `part`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Export {
    pub gid: GlobalId,
    pub part: usize,
}

/// A graph-partitioning engine driven through [`GraphQuery`] callbacks.
///
/// Called collectively by every rank. Returns assignments for objects owned
/// by the calling rank; entries may include objects that stay put, the
/// driver filters them.
pub trait GraphPartitioner {
    fn partition<C, G>(
        &mut self,
        comm: &C,
        graph: &G,
        options: &PartitionOptions,
        parts: usize,
    ) -> Result<Vec<Export>, MeshMigrateError>
    where
        C: Communicator,
        G: GraphQuery + ?Sized;
}

/// Dispatches on [`PartitionOptions::method`].
///
/// Only `NONE`, `BLOCK` and `RANDOM` are built in. Every other method,
/// including the default `GRAPH`, fails with `UnsupportedMethod`: pick one of
/// the built-in methods or plug in another [`GraphPartitioner`].
#[derive(Clone, Debug, Default)]
pub struct BuiltinSolver;

impl GraphPartitioner for BuiltinSolver {
    fn partition<C, G>(
        &mut self,
        comm: &C,
        graph: &G,
        options: &PartitionOptions,
        parts: usize,
    ) -> Result<Vec<Export>, MeshMigrateError>
    where
        C: Communicator,
        G: GraphQuery + ?Sized,
    {
        match options.method {
            Method::None => Ok(Vec::new()),
            Method::Block => block(comm, graph, parts),
            Method::Random => Ok(random(comm.rank(), graph, options.rng_seed, parts)),
            other => Err(SolverError::UnsupportedMethod(other.to_string()).into()),
        }
    }
}

/// Contiguous blocks over the global object order (rank order, then local
/// list order), `total / parts` objects each.
fn block<C, G>(comm: &C, graph: &G, parts: usize) -> Result<Vec<Export>, MeshMigrateError>
where
    C: Communicator,
    G: GraphQuery + ?Sized,
{
    let objs = graph.obj_list();
    let counts = all_gather_u64(comm, SOLVER_TAG, &[objs.len() as u64])?;
    let offset: u64 = counts[..comm.rank()].iter().map(|c| c[0]).sum();
    let total: u64 = counts.iter().map(|c| c[0]).sum();
    if total == 0 {
        return Ok(Vec::new());
    }
    Ok(objs
        .into_iter()
        .enumerate()
        .map(|(i, gid)| Export {
            gid,
            part: ((offset + i as u64) * parts as u64 / total) as usize,
        })
        .collect())
}

/// Uniformly random part per object; reproducible for a given seed and rank.
fn random<G>(rank: usize, graph: &G, seed: u64, parts: usize) -> Vec<Export>
where
    G: GraphQuery + ?Sized,
{
    let mut rng = SmallRng::seed_from_u64(seed.wrapping_add((rank as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)));
    graph
        .obj_list()
        .into_iter()
        .map(|gid| Export {
            gid,
            part: rng.gen_range(0..parts),
        })
        .collect()
}

/// Caller-provided assignment keyed by combined global id.
#[derive(Clone, Debug, Default)]
pub struct ExplicitAssignment {
    parts: HashMap<GlobalId, usize>,
}

impl ExplicitAssignment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assign(&mut self, gid: GlobalId, part: usize) -> &mut Self {
        self.parts.insert(gid, part);
        self
    }
}

impl FromIterator<(GlobalId, usize)> for ExplicitAssignment {
    fn from_iter<I: IntoIterator<Item = (GlobalId, usize)>>(iter: I) -> Self {
        Self {
            parts: iter.into_iter().collect(),
        }
    }
}

impl GraphPartitioner for ExplicitAssignment {
    fn partition<C, G>(
        &mut self,
        _comm: &C,
        graph: &G,
        _options: &PartitionOptions,
        _parts: usize,
    ) -> Result<Vec<Export>, MeshMigrateError>
    where
        C: Communicator,
        G: GraphQuery + ?Sized,
    {
        Ok(graph
            .obj_list()
            .into_iter()
            .filter_map(|gid| self.parts.get(&gid).map(|&part| Export { gid, part }))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::NoComm;

    struct Line(usize);

    impl GraphQuery for Line {
        fn num_obj(&self) -> usize {
            self.0
        }
        fn obj_list(&self) -> Vec<GlobalId> {
            (0..self.0 as u64).collect()
        }
        fn num_edges_multi(&self, objs: &[GlobalId]) -> Result<Vec<usize>, MeshMigrateError> {
            Ok(vec![0; objs.len()])
        }
        fn edge_list_multi(
            &self,
            _objs: &[GlobalId],
        ) -> Result<(Vec<GlobalId>, Vec<usize>), MeshMigrateError> {
            Ok((Vec::new(), Vec::new()))
        }
    }

    fn opts(method: Method) -> PartitionOptions {
        PartitionOptions {
            method,
            ..PartitionOptions::default()
        }
    }

    #[test]
    fn block_splits_evenly() {
        let ex = BuiltinSolver
            .partition(&NoComm, &Line(6), &opts(Method::Block), 3)
            .unwrap();
        let parts: Vec<usize> = ex.iter().map(|e| e.part).collect();
        assert_eq!(parts, vec![0, 0, 1, 1, 2, 2]);
    }

    #[test]
    fn random_is_seeded_and_in_range() {
        let a = BuiltinSolver
            .partition(&NoComm, &Line(50), &opts(Method::Random), 4)
            .unwrap();
        let b = BuiltinSolver
            .partition(&NoComm, &Line(50), &opts(Method::Random), 4)
            .unwrap();
        assert_eq!(a, b);
        assert!(a.iter().all(|e| e.part < 4));
    }

    #[test]
    fn external_methods_are_reported() {
        let err = BuiltinSolver
            .partition(&NoComm, &Line(2), &opts(Method::Hypergraph), 2)
            .unwrap_err();
        assert_eq!(
            err,
            MeshMigrateError::Solver(SolverError::UnsupportedMethod("HYPERGRAPH".into()))
        );
        assert!(BuiltinSolver
            .partition(&NoComm, &Line(2), &opts(Method::None), 2)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn default_options_need_an_external_solver() {
        let err = BuiltinSolver
            .partition(&NoComm, &Line(2), &PartitionOptions::default(), 2)
            .unwrap_err();
        assert_eq!(
            err,
            MeshMigrateError::Solver(SolverError::UnsupportedMethod("GRAPH".into()))
        );
    }

    #[test]
    fn explicit_assignment_only_reports_listed_objects() {
        let mut s: ExplicitAssignment = [(1, 1), (7, 0)].into_iter().collect();
        let ex = s.partition(&NoComm, &Line(3), &opts(Method::Graph), 2).unwrap();
        assert_eq!(ex, vec![Export { gid: 1, part: 1 }]);
    }
}
