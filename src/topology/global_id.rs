//! Global identifiers and the combined node/element id space.
//!
//! Nodes and elements carry independent global numberings. The graph handed
//! to a partitioner needs one id per vertex, so both are folded into a single
//! combined space: node ids keep their value, element ids are shifted past the
//! largest node id. [`IdSpace`] converts in both directions.
//!
//! [`GlobalNumbering`] resolves the owning rank of ids a process does not
//! own. Owners register their ids with a directory spread over all ranks
//! (combined id `obj` lives on rank `obj % size`); lookups ask that rank. Ids
//! need not be contiguous per rank, so a migrated mesh can be numbered again.

use hashbrown::HashMap;

use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::exchange::{all_gather_u64, decode_u64s, encode_u64s, exchange_payloads};
use crate::mesh_error::MeshMigrateError;
use crate::topology::components::Mesh;

/// Process-independent identifier of a node or an element.
pub type GlobalId = u64;

/// Combined id space: `[0, nb_nodes)` are nodes, `[nb_nodes, ..)` elements.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct IdSpace {
    nb_nodes: u64,
}

impl IdSpace {
    /// `nb_nodes` is one past the largest node global id in the whole mesh.
    pub const fn new(nb_nodes: u64) -> Self {
        Self { nb_nodes }
    }

    pub const fn nb_nodes(&self) -> u64 {
        self.nb_nodes
    }

    #[inline]
    pub const fn is_node(&self, obj: GlobalId) -> bool {
        obj < self.nb_nodes
    }

    #[inline]
    pub const fn from_node_glb(&self, node: GlobalId) -> GlobalId {
        node
    }

    #[inline]
    pub const fn from_elem_glb(&self, elem: GlobalId) -> GlobalId {
        elem + self.nb_nodes
    }

    /// Node global id of a combined id, or `None` if it names an element.
    pub const fn to_node_glb(&self, obj: GlobalId) -> Option<GlobalId> {
        if self.is_node(obj) { Some(obj) } else { None }
    }

    /// Element global id of a combined id, or `None` if it names a node.
    pub const fn to_elem_glb(&self, obj: GlobalId) -> Option<GlobalId> {
        if self.is_node(obj) {
            None
        } else {
            Some(obj - self.nb_nodes)
        }
    }
}

/// Directory answer for an id nobody registered.
const NO_OWNER: u64 = u64::MAX;

/// Rank holding the directory entry of combined id `obj`.
#[inline]
fn home(obj: GlobalId, size: usize) -> usize {
    (obj % size as u64) as usize
}

/// Owners of the ids a rank owns or references, backed by the directory.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GlobalNumbering {
    space: IdSpace,
    /// Combined id → owning rank, for every object resolved on this rank.
    owners: HashMap<GlobalId, usize>,
    /// This rank's slice of the directory.
    shard: HashMap<GlobalId, usize>,
}

impl GlobalNumbering {
    /// Serial numbering from known `(combined id, owner)` pairs.
    pub fn from_owners<I>(space: IdSpace, owners: I) -> Self
    where
        I: IntoIterator<Item = (GlobalId, usize)>,
    {
        let owners: HashMap<GlobalId, usize> = owners.into_iter().collect();
        Self {
            space,
            shard: owners.clone(),
            owners,
        }
    }

    /// Collective: agree on the id space, fill the directory with every
    /// rank's owned nodes (non-ghost rows) and elements, then resolve the
    /// owner of every node stored here and every element an owned node
    /// references.
    ///
    /// Uses ten tags starting at `tag`. An id registered by two ranks fails
    /// the build on every rank: the rank that saw it returns
    /// `DuplicateGlobalId`, the others a `CommError` naming that rank.
    pub fn build<C: Communicator>(
        comm: &C,
        tag: CommTag,
        mesh: &Mesh,
    ) -> Result<Self, MeshMigrateError> {
        let me = comm.rank();
        let size = comm.size();

        let owned_nodes: Vec<GlobalId> = mesh.owned_node_gids().collect();
        let local_end = owned_nodes.iter().max().map_or(0, |&g| g + 1);
        let ends = all_gather_u64(comm, tag, &[local_end])?;
        let space = IdSpace::new(ends.iter().flatten().copied().max().unwrap_or(0));

        let mut mine: Vec<GlobalId> = owned_nodes
            .iter()
            .map(|&n| space.from_node_glb(n))
            .chain(mesh.element_gids().map(|e| space.from_elem_glb(e)))
            .collect();
        mine.sort_unstable();
        let mut failure = mine
            .windows(2)
            .find(|w| w[0] == w[1])
            .map(|w| MeshMigrateError::DuplicateGlobalId(w[0]));
        mine.dedup();

        // register
        let mut routed: Vec<Vec<GlobalId>> = vec![Vec::new(); size];
        for &obj in &mine {
            routed[home(obj, size)].push(obj);
        }
        let outgoing: Vec<Vec<u8>> = routed.iter().map(|ids| encode_u64s(ids)).collect();
        let registered = exchange_payloads(comm, tag.offset(2), &outgoing)?;
        let mut shard = HashMap::new();
        for (src, bytes) in registered.iter().enumerate() {
            for obj in decode_u64s(src, bytes)? {
                if let Some(prev) = shard.insert(obj, src) {
                    log::warn!("[{me}] id {obj} registered by ranks {prev} and {src}");
                    failure.get_or_insert(MeshMigrateError::DuplicateGlobalId(obj));
                }
            }
        }

        let mut owners: HashMap<GlobalId, usize> = mine.iter().map(|&o| (o, me)).collect();
        let mut wanted: Vec<GlobalId> = Vec::new();
        for (_, store) in mesh.node_stores() {
            wanted.extend(store.global_ids().iter().map(|&n| space.from_node_glb(n)));
            for (loc, ghost) in store.ghost_flags().iter().enumerate() {
                if !ghost {
                    let refs = store.element_refs(loc)?;
                    wanted.extend(refs.iter().map(|&e| space.from_elem_glb(e)));
                }
            }
        }
        wanted.retain(|o| !owners.contains_key(o));
        wanted.sort_unstable();
        wanted.dedup();
        owners.extend(lookup(comm, tag.offset(4), &shard, &wanted)?);

        let status = all_gather_u64(comm, tag.offset(8), &[u64::from(failure.is_some())])?;
        if let Some(err) = failure {
            return Err(err);
        }
        if let Some(bad) = status.iter().position(|s| s.first() != Some(&0)) {
            return Err(MeshMigrateError::CommError {
                neighbor: bad,
                reason: format!("global numbering failed on rank {bad}"),
            });
        }
        log::debug!(
            "[{me}] numbering: {} node ids, {} owned objects, {} resolved remotely",
            space.nb_nodes(),
            mine.len(),
            owners.len() - mine.len()
        );
        Ok(Self { space, owners, shard })
    }

    /// Collective: look up the owners of `nodes` not resolved yet. Every rank
    /// must call this, possibly with an empty list. Ids nobody registered stay
    /// unresolved and surface later as `OwnerNotFound`.
    pub fn resolve_nodes<C: Communicator>(
        &mut self,
        comm: &C,
        tag: CommTag,
        nodes: &[GlobalId],
    ) -> Result<(), MeshMigrateError> {
        let space = self.space;
        let wanted: Vec<GlobalId> = nodes
            .iter()
            .filter(|&&n| space.is_node(n))
            .map(|&n| space.from_node_glb(n))
            .filter(|o| !self.owners.contains_key(o))
            .collect();
        let found = lookup(comm, tag, &self.shard, &wanted)?;
        self.owners.extend(found);
        Ok(())
    }

    pub fn space(&self) -> IdSpace {
        self.space
    }

    /// Number of objects whose owner is known here.
    pub fn resolved(&self) -> usize {
        self.owners.len()
    }

    pub fn proc_of_node(&self, gid: GlobalId) -> Result<usize, MeshMigrateError> {
        // past the space, a node id would alias an element
        if !self.space.is_node(gid) {
            return Err(MeshMigrateError::OwnerNotFound(gid));
        }
        self.owners
            .get(&self.space.from_node_glb(gid))
            .copied()
            .ok_or(MeshMigrateError::OwnerNotFound(gid))
    }

    pub fn proc_of_element(&self, gid: GlobalId) -> Result<usize, MeshMigrateError> {
        let obj = self.space.from_elem_glb(gid);
        self.owners
            .get(&obj)
            .copied()
            .ok_or(MeshMigrateError::OwnerNotFound(obj))
    }

    /// Owner of a combined-space id.
    pub fn proc_of_obj(&self, obj: GlobalId) -> Result<usize, MeshMigrateError> {
        match self.space.to_elem_glb(obj) {
            None => self.proc_of_node(obj),
            Some(elem) => self.proc_of_element(elem),
        }
    }
}

/// Collective directory query (four tags from `tag`): ask each id's home rank
/// for its owner. Returns the ids that have one.
fn lookup<C: Communicator>(
    comm: &C,
    tag: CommTag,
    shard: &HashMap<GlobalId, usize>,
    wanted: &[GlobalId],
) -> Result<HashMap<GlobalId, usize>, MeshMigrateError> {
    let size = comm.size();
    let mut asked: Vec<Vec<GlobalId>> = vec![Vec::new(); size];
    for &obj in wanted {
        asked[home(obj, size)].push(obj);
    }
    let outgoing: Vec<Vec<u8>> = asked.iter().map(|ids| encode_u64s(ids)).collect();
    let questions = exchange_payloads(comm, tag, &outgoing)?;

    let answers: Vec<Vec<u8>> = questions
        .iter()
        .enumerate()
        .map(|(src, bytes)| {
            let owners: Vec<u64> = decode_u64s(src, bytes)?
                .iter()
                .map(|obj| shard.get(obj).map_or(NO_OWNER, |&r| r as u64))
                .collect();
            Ok(encode_u64s(&owners))
        })
        .collect::<Result<_, MeshMigrateError>>()?;
    let replies = exchange_payloads(comm, tag.offset(2), &answers)?;

    let mut found = HashMap::new();
    for (src, bytes) in replies.iter().enumerate() {
        let owners = decode_u64s(src, bytes)?;
        if owners.len() != asked[src].len() {
            return Err(MeshMigrateError::UnexpectedImportCount {
                rank: src,
                expected: asked[src].len(),
                found: owners.len(),
            });
        }
        for (&obj, &owner) in asked[src].iter().zip(&owners) {
            if owner != NO_OWNER {
                found.insert(obj, owner as usize);
            }
        }
    }
    Ok(found)
}
