//! The mesh seen as a graph by a partitioning solver.
//!
//! Vertices are the nodes and elements owned by this process, named by their
//! combined global id. An element is adjacent to its nodes, a node to the
//! elements that reference it. The solver pulls everything through the four
//! [`GraphQuery`] callbacks; nothing beyond an id → row index is materialised.

use std::fmt::Write as _;

use hashbrown::HashMap;

use crate::mesh_error::MeshMigrateError;
use crate::topology::components::{ConnectivityForm, Mesh};
use crate::topology::global_id::{GlobalId, GlobalNumbering, IdSpace};

/// Callback interface a graph-partitioning solver drives.
pub trait GraphQuery {
    /// Number of vertices owned by the calling process.
    fn num_obj(&self) -> usize;

    /// Combined global ids of the owned vertices, in a stable order.
    fn obj_list(&self) -> Vec<GlobalId>;

    /// Number of neighbours of each listed vertex.
    fn num_edges_multi(&self, objs: &[GlobalId]) -> Result<Vec<usize>, MeshMigrateError>;

    /// Neighbours of each listed vertex, concatenated in `objs` order, with
    /// the rank owning each neighbour.
    fn edge_list_multi(
        &self,
        objs: &[GlobalId],
    ) -> Result<(Vec<GlobalId>, Vec<usize>), MeshMigrateError>;
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Vertex {
    Node { store: usize, loc: usize },
    Element { block: usize, idx: usize },
}

/// [`GraphQuery`] over the locally owned part of a [`Mesh`].
#[derive(Debug)]
pub struct MeshGraph<'a> {
    mesh: &'a Mesh,
    numbering: &'a GlobalNumbering,
    rank: usize,
    objects: Vec<GlobalId>,
    index: HashMap<GlobalId, Vertex>,
}

impl<'a> MeshGraph<'a> {
    /// Index the owned nodes (coordinate-block order) followed by the elements.
    pub fn new(
        mesh: &'a Mesh,
        numbering: &'a GlobalNumbering,
        rank: usize,
    ) -> Result<Self, MeshMigrateError> {
        let space = numbering.space();
        let mut objects = Vec::new();
        let mut index = HashMap::new();
        let mut insert = |obj: GlobalId, v: Vertex| {
            if index.insert(obj, v).is_some() {
                return Err(MeshMigrateError::DuplicateGlobalId(obj));
            }
            objects.push(obj);
            Ok(())
        };
        for (store, nodes) in mesh.node_stores() {
            for (loc, &gid) in nodes.global_ids().iter().enumerate() {
                if !nodes.is_ghost(loc)? && !nodes.is_removed(loc)? {
                    insert(space.from_node_glb(gid), Vertex::Node { store, loc })?;
                }
            }
        }
        for (block, elems) in mesh.element_blocks() {
            for (idx, &gid) in elems.global_ids().entries() {
                insert(space.from_elem_glb(gid), Vertex::Element { block, idx })?;
            }
        }
        Ok(Self {
            mesh,
            numbering,
            rank,
            objects,
            index,
        })
    }

    pub fn space(&self) -> IdSpace {
        self.numbering.space()
    }

    pub fn contains(&self, obj: GlobalId) -> bool {
        self.index.contains_key(&obj)
    }

    /// Neighbours of a local vertex, as combined ids.
    pub fn neighbors(&self, obj: GlobalId) -> Result<Vec<GlobalId>, MeshMigrateError> {
        let space = self.space();
        match self.index.get(&obj) {
            None => Err(MeshMigrateError::GraphQueryInconsistent(format!(
                "object {obj} is not in the object list of rank {}",
                self.rank
            ))),
            Some(&Vertex::Node { store, loc }) => Ok(self
                .mesh
                .nodes(store)?
                .element_refs(loc)?
                .iter()
                .map(|&e| space.from_elem_glb(e))
                .collect()),
            Some(&Vertex::Element { block, idx }) => {
                let elems = self.mesh.elements(block)?;
                let nodes = self.mesh.nodes(elems.coordinates_component())?;
                elems
                    .nodes(idx)?
                    .iter()
                    .map(|&n| match elems.form() {
                        ConnectivityForm::Global => Ok(space.from_node_glb(n)),
                        ConnectivityForm::Local => nodes
                            .global_id(n as usize)
                            .map(|g| space.from_node_glb(g)),
                    })
                    .collect()
            }
        }
    }

    /// Check that the callbacks describe one consistent graph: every
    /// neighbour has a known owner, and every edge between two vertices owned
    /// here is present in both directions.
    pub fn validate(&self) -> Result<(), MeshMigrateError> {
        for &obj in &self.objects {
            for nbr in self.neighbors(obj)? {
                let owner = self.numbering.proc_of_obj(nbr).map_err(|_| {
                    MeshMigrateError::GraphQueryInconsistent(format!(
                        "edge {obj} -> {nbr}: neighbour has no owning rank"
                    ))
                })?;
                if owner != self.rank {
                    continue;
                }
                if !self.contains(nbr) {
                    return Err(MeshMigrateError::GraphQueryInconsistent(format!(
                        "edge {obj} -> {nbr}: neighbour owned by rank {owner} but not listed there"
                    )));
                }
                if !self.neighbors(nbr)?.contains(&obj) {
                    return Err(MeshMigrateError::GraphQueryInconsistent(format!(
                        "edge {obj} -> {nbr} has no reverse edge"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Adjacency listing, one vertex per line: `N3: E1 E2`.
    pub fn describe(&self) -> Result<String, MeshMigrateError> {
        let space = self.space();
        let label = |obj: GlobalId| match space.to_elem_glb(obj) {
            Some(e) => format!("E{e}"),
            None => format!("N{obj}"),
        };
        let mut out = String::new();
        for &obj in &self.objects {
            let nbrs: Vec<String> = self.neighbors(obj)?.into_iter().map(label).collect();
            // writing into a String cannot fail
            let _ = writeln!(out, "{}: {}", label(obj), nbrs.join(" "));
        }
        Ok(out)
    }
}

impl GraphQuery for MeshGraph<'_> {
    fn num_obj(&self) -> usize {
        self.objects.len()
    }

    fn obj_list(&self) -> Vec<GlobalId> {
        self.objects.clone()
    }

    fn num_edges_multi(&self, objs: &[GlobalId]) -> Result<Vec<usize>, MeshMigrateError> {
        objs.iter().map(|&o| self.neighbors(o).map(|n| n.len())).collect()
    }

    fn edge_list_multi(
        &self,
        objs: &[GlobalId],
    ) -> Result<(Vec<GlobalId>, Vec<usize>), MeshMigrateError> {
        let mut nbr_gids = Vec::new();
        let mut nbr_procs = Vec::new();
        for &obj in objs {
            for nbr in self.neighbors(obj)? {
                nbr_procs.push(self.numbering.proc_of_obj(nbr)?);
                nbr_gids.push(nbr);
            }
        }
        Ok((nbr_gids, nbr_procs))
    }
}
