#![allow(dead_code)]
use mesh_migrate::{
    algs::communicator::ThreadComm,
    topology::components::{Component, ElementBlock, Mesh, NodeRecord, NodeStore},
    topology::global_id::GlobalId,
};

/// Component index of the coordinate block in [`quad_strip`] meshes.
pub const COORDS: usize = 0;
/// Component index of the quad block in [`quad_strip`] meshes.
pub const QUADS: usize = 1;

/// Run `f` once per rank of an in-process world, each on its own thread.
pub fn run_world<T, F>(size: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(&ThreadComm) -> T + Sync,
{
    let world = ThreadComm::world(size);
    let f = &f;
    std::thread::scope(|s| {
        let handles: Vec<_> = world.iter().map(|comm| s.spawn(move || f(comm))).collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

/// Node global id of grid point (column, row) of a two-row strip.
pub fn node_gid(col: u64, row: u64) -> GlobalId {
    col * 2 + row
}

/// Rank `rank`'s slice of a strip of `per_rank * procs` unit quads.
///
/// Quad `k` spans columns `k..=k+1`. Rank r owns quads `[r*m, (r+1)*m)` and
/// the node columns `[r*m, (r+1)*m)` (the last rank also owns the final
/// column); the right boundary column of every other rank is a ghost.
pub fn quad_strip(rank: usize, procs: usize, per_rank: usize) -> Mesh {
    let m = per_rank as u64;
    let n_quads = m * procs as u64;
    let first = rank as u64 * m;
    let last_col = first + m;
    let mut store = NodeStore::new("coordinates", 2);
    for col in first..=last_col {
        let owner_col_end = if rank + 1 == procs { n_quads + 1 } else { last_col };
        let refs: Vec<GlobalId> = [col.checked_sub(1), Some(col)]
            .into_iter()
            .flatten()
            .filter(|&e| e < n_quads)
            .collect();
        for row in 0..2 {
            store
                .push_node(NodeRecord {
                    global_id: node_gid(col, row),
                    coordinates: vec![col as f64, row as f64],
                    is_ghost: col >= owner_col_end,
                    element_refs: refs.clone(),
                })
                .unwrap();
        }
    }
    let mut mesh = Mesh::new();
    let coords = mesh.add_component(Component::CoordinateBlock(store));
    assert_eq!(coords, COORDS);
    let mut quads = ElementBlock::new("quads", coords, 4);
    for k in first..last_col {
        let l = (k - first) * 2;
        quads.push_element(k, &[l, l + 2, l + 3, l + 1]).unwrap();
    }
    assert_eq!(mesh.add_component(Component::ElementBlock(quads)), QUADS);
    mesh.add_component(Component::Other("pressure".into()));
    mesh
}

/// Global ids of the owned nodes of a mesh, sorted.
pub fn owned_nodes(mesh: &Mesh) -> Vec<GlobalId> {
    let mut v: Vec<_> = mesh.owned_node_gids().collect();
    v.sort_unstable();
    v
}

/// Element global ids with their corner coordinates, sorted by id.
pub fn element_geometry(mesh: &Mesh) -> Vec<(GlobalId, Vec<Vec<f64>>)> {
    let mut out = Vec::new();
    for (_, block) in mesh.element_blocks() {
        let nodes = mesh.nodes(block.coordinates_component()).unwrap();
        for e in 0..block.len() {
            out.push((
                block.global_id(e).unwrap(),
                block.element_coordinates(e, nodes).unwrap(),
            ));
        }
    }
    out.sort_by_key(|(g, _)| *g);
    out
}

/// Expected corners of quad `k` of a strip.
pub fn quad_corners(k: u64) -> Vec<Vec<f64>> {
    let x = k as f64;
    vec![vec![x, 0.0], vec![x + 1.0, 0.0], vec![x + 1.0, 1.0], vec![x, 1.0]]
}

/// Everything a migration may touch, for before/after comparisons.
pub fn snapshot(mesh: &Mesh) -> (Vec<GlobalId>, Vec<bool>, Vec<Vec<u64>>, Vec<GlobalId>) {
    let nodes = mesh.nodes(COORDS).unwrap();
    let quads = mesh.elements(QUADS).unwrap();
    (
        nodes.global_ids().to_vec(),
        nodes.ghost_flags().to_vec(),
        quads.connectivity().as_slice().to_vec(),
        quads.global_ids().as_slice().to_vec(),
    )
}
