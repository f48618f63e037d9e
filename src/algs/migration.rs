//! Migration of elements and nodes according to a [`ChangeSet`].
//!
//! The protocol runs in barrier-separated phases:
//!
//! 1. **Prepare**: register node/element ownership in the owner directory
//!    and rewrite every connectivity row from local node indices to node
//!    global ids.
//! 2. **Migrating elements**: ship exported elements, stage their removal,
//!    insert the ones arriving here, flush the element blocks.
//! 3. **Searching for missing nodes**: collect the nodes referenced by the
//!    elements now stored here, look up the owners of the absent ones,
//!    request them and invert the requests into per-owner send lists.
//! 4. **Migrating nodes**: owners send requested nodes (as ghosts) and push
//!    nodes whose ownership moves (as owned). Afterwards every local node is
//!    re-flagged: kept owned, demoted to ghost or removed.
//! 5. **Cleanup**: rewrite connectivity back to local indices.
//!
//! A node ends up owned by exactly one rank: the destination recorded in the
//! owner's change set, or the previous owner if it does not move.

use hashbrown::{HashMap, HashSet};

use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::entity_codec::{ElementMessage, NodeMessage};
use crate::algs::transfer::{
    LocalId, MigrationCallbacks, MigrationEntry, MigrationList, invert_lists, migrate,
};
use crate::algs::wire::{WireReader, WireWriter};
use crate::mesh_error::MeshMigrateError;
use crate::partitioning::ChangeSet;
use crate::topology::components::{Mesh, NodeRecord};
use crate::topology::global_id::{GlobalId, GlobalNumbering};

/// Base tag of the migration collectives; the range up to `offset(20)` is
/// taken.
pub const MIGRATION_TAG: CommTag = CommTag::new(0x6000);
/// Numbering build: ten tags.
const NUMBERING_TAG: CommTag = MIGRATION_TAG;
const ELEMENT_TAG: CommTag = MIGRATION_TAG.offset(10);
/// Owner lookup of missing nodes: four tags.
const RESOLVE_TAG: CommTag = MIGRATION_TAG.offset(12);
const REQUEST_TAG: CommTag = MIGRATION_TAG.offset(16);
const NODE_TAG: CommTag = MIGRATION_TAG.offset(18);

/// What one rank did during a migration.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub exported_elements: usize,
    pub imported_elements: usize,
    /// Absent nodes this rank asked their owners for.
    pub requested_nodes: usize,
    pub sent_nodes: usize,
    pub received_nodes: usize,
    /// Local nodes dropped because nothing here needs them anymore.
    pub removed_nodes: usize,
}

/// Node global ids referenced by the elements stored here, per coordinate block.
pub type RequiredNodes = HashMap<usize, HashSet<GlobalId>>;

fn begin_phase<C: Communicator>(comm: &C, name: &str) {
    comm.barrier();
    log::info!("[{}] {name}", comm.rank());
}

/// Collective: move elements and nodes so every rank holds what `changes`
/// assigns to it plus the ghost nodes its elements need.
///
/// With a single target partition nothing is touched.
pub fn migrate_mesh<C: Communicator>(
    comm: &C,
    mesh: &mut Mesh,
    changes: &ChangeSet,
) -> Result<MigrationReport, MeshMigrateError> {
    let me = comm.rank();
    let procs = comm.size();
    let mut report = MigrationReport::default();
    if changes.parts() <= 1 {
        log::info!("[{me}] single target partition, nothing to migrate");
        return Ok(report);
    }

    begin_phase(comm, "Prepare");
    let mut numbering = GlobalNumbering::build(comm, NUMBERING_TAG, mesh)?;
    if numbering.space() != changes.space() {
        return Err(MeshMigrateError::GraphQueryInconsistent(format!(
            "change set was built for {} node ids, the mesh now has {}",
            changes.space().nb_nodes(),
            numbering.space().nb_nodes()
        )));
    }
    mesh.localize_to_global()?;

    begin_phase(comm, "Migrating elements");
    let exports = element_exports(mesh, changes, procs, me)?;
    let imported = migrate(
        comm,
        ELEMENT_TAG,
        None,
        &exports,
        &mut ElementCallbacks { mesh: &mut *mesh },
    )?;
    for b in mesh.element_block_indices() {
        mesh.elements_mut(b)?.flush()?;
    }
    report.exported_elements = exports.len();
    report.imported_elements = imported.len();

    begin_phase(comm, "Searching for missing nodes");
    let required = required_nodes(mesh)?;
    let missing = missing_nodes(mesh, &required)?;
    numbering.resolve_nodes(comm, RESOLVE_TAG, &missing)?;
    let requests = missing_node_requests(&missing, &numbering, me)?;
    let obligations = invert_lists(comm, REQUEST_TAG, &requests)?;
    let sends = node_sends(mesh, changes, &obligations, procs, me)?;
    log::debug!("[{me}] request nodes: {}", format_list(&requests));
    log::debug!("[{me}] send nodes: {}", format_list(&sends));
    report.requested_nodes = requests.len();
    report.sent_nodes = sends.len();

    begin_phase(comm, "Migrating nodes");
    let mut callbacks = NodeCallbacks::new(mesh, changes, &required, &requests, procs, me);
    let received = migrate(comm, NODE_TAG, None, &sends, &mut callbacks)?;
    report.removed_nodes = callbacks.removed;
    report.received_nodes = received.len();
    for s in mesh.node_store_indices() {
        mesh.nodes_mut(s)?.flush()?;
    }

    begin_phase(comm, "Cleanup");
    mesh.globalize_to_local()?;
    comm.barrier();
    log::info!("[{me}] migration done: {report:?}");
    Ok(report)
}

fn format_list(list: &MigrationList) -> String {
    list.iter()
        .map(|e| format!("{}[{}]", e.gid, e.proc))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Elements of this rank whose change-set destination is another rank.
pub fn element_exports(
    mesh: &Mesh,
    changes: &ChangeSet,
    procs: usize,
    me: usize,
) -> Result<MigrationList, MeshMigrateError> {
    let mut exports = MigrationList::new();
    for (component, block) in mesh.element_blocks() {
        for (index, &gid) in block.global_ids().entries() {
            let (Some(part), Some(proc)) = (
                changes.find_element(gid),
                changes.element_dest_proc(gid, procs),
            ) else {
                continue;
            };
            if proc != me {
                exports.push(MigrationEntry {
                    gid,
                    local: Some(LocalId { component, index }),
                    proc,
                    part,
                });
            }
        }
    }
    Ok(exports)
}

/// Node ids referenced by global-form connectivity, per coordinate block.
pub fn required_nodes(mesh: &Mesh) -> Result<RequiredNodes, MeshMigrateError> {
    let mut required = RequiredNodes::new();
    for s in mesh.node_store_indices() {
        required.entry(s).or_default();
    }
    for (_, block) in mesh.element_blocks() {
        // validates the component kind
        mesh.nodes(block.coordinates_component())?;
        let set = required.entry(block.coordinates_component()).or_default();
        for (_, row) in block.connectivity().entries() {
            set.extend(row.iter().copied());
        }
    }
    Ok(required)
}

/// Required node ids not stored here, sorted and unique.
pub fn missing_nodes(mesh: &Mesh, required: &RequiredNodes) -> Result<Vec<GlobalId>, MeshMigrateError> {
    let mut missing = Vec::new();
    for (&s, set) in required {
        let present = mesh.nodes(s)?.glb_to_loc();
        missing.extend(set.iter().copied().filter(|g| !present.contains_key(g)));
    }
    missing.sort_unstable();
    missing.dedup();
    Ok(missing)
}

/// One request per missing node, addressed to its owner.
fn missing_node_requests(
    missing: &[GlobalId],
    numbering: &GlobalNumbering,
    me: usize,
) -> Result<MigrationList, MeshMigrateError> {
    missing
        .iter()
        .map(|&gid| {
            let owner = numbering.proc_of_node(gid)?;
            if owner == me {
                // the directory says it is ours, yet it is not stored
                return Err(MeshMigrateError::UnknownGlobalId(gid));
            }
            Ok(MigrationEntry {
                gid,
                local: None,
                proc: owner,
                part: me,
            })
        })
        .collect()
}

/// Nodes this rank must send: pushes of owned nodes whose ownership moves,
/// then answers to inverted requests. Each (node, rank) pair is sent once.
fn node_sends(
    mesh: &Mesh,
    changes: &ChangeSet,
    obligations: &MigrationList,
    procs: usize,
    me: usize,
) -> Result<MigrationList, MeshMigrateError> {
    let mut owned: HashMap<GlobalId, LocalId> = HashMap::new();
    let mut sends = MigrationList::new();
    let mut seen = HashSet::new();
    for (component, store) in mesh.node_stores() {
        for (index, &gid) in store.global_ids().iter().enumerate() {
            if store.is_ghost(index)? {
                continue;
            }
            let local = LocalId { component, index };
            owned.insert(gid, local);
            if let (Some(part), Some(proc)) =
                (changes.find_node(gid), changes.node_dest_proc(gid, procs))
            {
                if proc != me && seen.insert((gid, proc)) {
                    sends.push(MigrationEntry {
                        gid,
                        local: Some(local),
                        proc,
                        part,
                    });
                }
            }
        }
    }
    for ob in obligations.iter() {
        let local = *owned
            .get(&ob.gid)
            .ok_or(MeshMigrateError::UnknownGlobalId(ob.gid))?;
        if seen.insert((ob.gid, ob.proc)) {
            sends.push(MigrationEntry {
                local: Some(local),
                ..ob
            });
        }
    }
    Ok(sends)
}

struct ElementCallbacks<'m> {
    mesh: &'m mut Mesh,
}

impl MigrationCallbacks for ElementCallbacks<'_> {
    fn obj_size(&self, entry: &MigrationEntry) -> Result<usize, MeshMigrateError> {
        let local = entry.local.ok_or(MeshMigrateError::UnknownGlobalId(entry.gid))?;
        let block = self.mesh.elements(local.component)?;
        Ok(ElementMessage::size_for(block.row_size()))
    }

    fn pack(
        &mut self,
        entry: &MigrationEntry,
        out: &mut WireWriter<'_>,
    ) -> Result<(), MeshMigrateError> {
        let local = entry.local.ok_or(MeshMigrateError::UnknownGlobalId(entry.gid))?;
        let block = self.mesh.elements_mut(local.component)?;
        let msg = ElementMessage {
            component: local.component,
            nodes: block.nodes(local.index)?.to_vec(),
        };
        msg.pack(out)?;
        block.remove_element(local.index)?;
        log::debug!("packed and removed element {} for rank {}", entry.gid, entry.proc);
        Ok(())
    }

    fn unpack(
        &mut self,
        gid: GlobalId,
        source: usize,
        input: &mut WireReader<'_>,
    ) -> Result<(), MeshMigrateError> {
        let msg = ElementMessage::unpack(input, |c| self.mesh.elements(c).map(|b| b.row_size()))?;
        let loc = self
            .mesh
            .elements_mut(msg.component)?
            .add_element(gid, &msg.nodes)?;
        log::debug!("unpacked element {gid} from rank {source} at {loc}");
        Ok(())
    }
}

struct NodeCallbacks<'m> {
    mesh: &'m mut Mesh,
    changes: &'m ChangeSet,
    required: &'m RequiredNodes,
    requests: &'m MigrationList,
    procs: usize,
    me: usize,
    /// Per coordinate block: global id → tentative local index.
    index: HashMap<usize, HashMap<GlobalId, usize>>,
    received_owned: HashSet<GlobalId>,
    removed: usize,
}

impl<'m> NodeCallbacks<'m> {
    fn new(
        mesh: &'m mut Mesh,
        changes: &'m ChangeSet,
        required: &'m RequiredNodes,
        requests: &'m MigrationList,
        procs: usize,
        me: usize,
    ) -> Self {
        let index = mesh
            .node_stores()
            .map(|(s, store)| (s, store.glb_to_loc()))
            .collect();
        Self {
            mesh,
            changes,
            required,
            requests,
            procs,
            me,
            index,
            received_owned: HashSet::new(),
            removed: 0,
        }
    }

    /// Every request must have been answered by the rank it was sent to.
    fn check_requests(&self, imports: &MigrationList) -> Result<(), MeshMigrateError> {
        let asked: HashMap<GlobalId, usize> =
            self.requests.iter().map(|e| (e.gid, e.proc)).collect();
        let want = self.requests.count_per_proc(self.procs);
        let mut got = vec![0usize; self.procs];
        for e in imports.iter() {
            if asked.get(&e.gid) == Some(&e.proc) {
                got[e.proc] += 1;
            }
        }
        match (0..self.procs).find(|&p| want[p] != got[p]) {
            Some(rank) => Err(MeshMigrateError::UnexpectedImportCount {
                rank,
                expected: want[rank],
                found: got[rank],
            }),
            None => Ok(()),
        }
    }

    /// Re-flag the nodes that were stored here before the exchange.
    fn settle_ownership(&mut self) -> Result<(), MeshMigrateError> {
        for s in self.mesh.node_store_indices() {
            let required = self.required.get(&s);
            let store = self.mesh.nodes_mut(s)?;
            let mut demote = Vec::new();
            let mut stale = Vec::new();
            for (loc, &gid) in store.global_ids().iter().enumerate() {
                if self.received_owned.contains(&gid) {
                    continue;
                }
                let ghost = store.is_ghost(loc)?;
                let leaves = matches!(
                    self.changes.node_dest_proc(gid, self.procs),
                    Some(p) if p != self.me
                );
                if !ghost && !leaves {
                    continue;
                }
                if required.is_some_and(|r| r.contains(&gid)) {
                    if !ghost {
                        demote.push(loc);
                    }
                } else {
                    stale.push(loc);
                }
            }
            for loc in demote {
                store.set_ghost(loc, true)?;
            }
            for &loc in &stale {
                store.remove_node(loc)?;
            }
            self.removed += stale.len();
        }
        Ok(())
    }
}

impl MigrationCallbacks for NodeCallbacks<'_> {
    fn obj_size(&self, entry: &MigrationEntry) -> Result<usize, MeshMigrateError> {
        let local = entry.local.ok_or(MeshMigrateError::UnknownGlobalId(entry.gid))?;
        let store = self.mesh.nodes(local.component)?;
        Ok(NodeMessage::size_for(
            store.dimension(),
            store.element_refs(local.index)?.len(),
        ))
    }

    fn pack(
        &mut self,
        entry: &MigrationEntry,
        out: &mut WireWriter<'_>,
    ) -> Result<(), MeshMigrateError> {
        let local = entry.local.ok_or(MeshMigrateError::UnknownGlobalId(entry.gid))?;
        let record = self.mesh.nodes(local.component)?.node(local.index)?;
        // owned only by the rank the change set sends it to
        let as_ghost = self.changes.node_dest_proc(entry.gid, self.procs) != Some(entry.proc);
        let msg = NodeMessage {
            component: local.component,
            node: NodeRecord {
                is_ghost: as_ghost,
                ..record
            },
        };
        msg.pack(out)?;
        log::debug!(
            "packed node {} for rank {}{}",
            entry.gid,
            entry.proc,
            if as_ghost { " as ghost" } else { "" }
        );
        Ok(())
    }

    fn unpack(
        &mut self,
        gid: GlobalId,
        source: usize,
        input: &mut WireReader<'_>,
    ) -> Result<(), MeshMigrateError> {
        let msg = NodeMessage::unpack(input, |c| self.mesh.nodes(c).map(|n| n.dimension()))?;
        if msg.node.global_id != gid {
            return Err(MeshMigrateError::CommError {
                neighbor: source,
                reason: format!("frame for node {gid} carries node {}", msg.node.global_id),
            });
        }
        let owned = !msg.node.is_ghost;
        let store = self.mesh.nodes_mut(msg.component)?;
        let known = self.index.entry(msg.component).or_default();
        match known.get(&gid) {
            Some(&loc) => {
                if owned {
                    store.set_ghost(loc, false)?;
                }
                log::debug!("node {gid} from rank {source} already at {loc}");
            }
            None => {
                let loc = store.add_node(msg.node)?;
                known.insert(gid, loc);
                log::debug!(
                    "unpacked node {gid} from rank {source} at {loc}{}",
                    if owned { "" } else { " as ghost" }
                );
            }
        }
        if owned {
            self.received_owned.insert(gid);
        }
        Ok(())
    }

    fn post_migrate(
        &mut self,
        imports: &MigrationList,
        _exports: &MigrationList,
    ) -> Result<(), MeshMigrateError> {
        self.check_requests(imports)?;
        self.settle_ownership()
    }
}
