//! Mesh components: element blocks, coordinate blocks and the mesh holding them.
//!
//! A [`Mesh`] is a flat list of [`Component`]s. Element blocks store their
//! connectivity as rows of node references into one coordinate block, which
//! keeps four row-aligned tables per node. All per-row mutations go through
//! the buffered tables of [`crate::data::flex_table`] so that a single flush
//! reconciles every table of a component.

use hashbrown::HashMap;

use crate::data::flex_table::{FlexList, FlexTable, Remap};
use crate::mesh_error::MeshMigrateError;
use crate::topology::global_id::GlobalId;

/// Which representation an element block's connectivity rows currently hold.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConnectivityForm {
    /// Rows hold indices into the block's coordinate table.
    Local,
    /// Rows hold node global ids.
    Global,
}

impl ConnectivityForm {
    pub const fn as_str(self) -> &'static str {
        match self {
            ConnectivityForm::Local => "local",
            ConnectivityForm::Global => "global",
        }
    }
}

/// Fixed-row-size block of elements of one type.
#[derive(Clone, Debug)]
pub struct ElementBlock {
    name: String,
    coordinates: usize,
    row_size: usize,
    connectivity: FlexTable<u64>,
    global_ids: FlexList<GlobalId>,
    form: ConnectivityForm,
}

impl ElementBlock {
    /// Empty block whose rows reference the coordinate block at component
    /// index `coordinates`. Connectivity starts in local form.
    pub fn new(name: impl Into<String>, coordinates: usize, row_size: usize) -> Self {
        Self {
            name: name.into(),
            coordinates,
            row_size,
            connectivity: FlexTable::new(),
            global_ids: FlexList::new(),
            form: ConnectivityForm::Local,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Component index of the coordinate block this block references.
    pub fn coordinates_component(&self) -> usize {
        self.coordinates
    }

    pub fn row_size(&self) -> usize {
        self.row_size
    }

    pub fn form(&self) -> ConnectivityForm {
        self.form
    }

    /// Number of committed elements.
    pub fn len(&self) -> usize {
        self.connectivity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connectivity.is_empty()
    }

    pub fn connectivity(&self) -> &FlexTable<u64> {
        &self.connectivity
    }

    pub fn global_ids(&self) -> &FlexList<GlobalId> {
        &self.global_ids
    }

    pub fn global_id(&self, elem: usize) -> Result<GlobalId, MeshMigrateError> {
        self.global_ids.get_row(elem).copied()
    }

    fn check_row(&self, index: usize, nodes: &[u64]) -> Result<(), MeshMigrateError> {
        if nodes.len() == self.row_size {
            Ok(())
        } else {
            Err(MeshMigrateError::RowSizeMismatch {
                index,
                expected: self.row_size,
                found: nodes.len(),
            })
        }
    }

    fn expect_form(&self, expected: ConnectivityForm) -> Result<(), MeshMigrateError> {
        if self.form == expected {
            Ok(())
        } else {
            Err(MeshMigrateError::ConnectivityState {
                block: self.name.clone(),
                expected: expected.as_str(),
                found: self.form.as_str(),
            })
        }
    }

    /// Append a committed element (initial loading).
    pub fn push_element(&mut self, gid: GlobalId, nodes: &[u64]) -> Result<usize, MeshMigrateError> {
        self.check_row(self.connectivity.len(), nodes)?;
        let idx = self.connectivity.push_row(nodes.to_vec())?;
        let check = self.global_ids.push_row(gid)?;
        lockstep("element global ids", idx, check)?;
        Ok(idx)
    }

    /// Stage an element; returns its tentative index.
    pub fn add_element(&mut self, gid: GlobalId, nodes: &[u64]) -> Result<usize, MeshMigrateError> {
        self.check_row(self.connectivity.tentative_len(), nodes)?;
        let idx = self.connectivity.add_row(nodes.to_vec());
        let check = self.global_ids.add_row(gid);
        lockstep("element global ids", idx, check)?;
        Ok(idx)
    }

    /// Stage the removal of element `elem`.
    pub fn remove_element(&mut self, elem: usize) -> Result<(), MeshMigrateError> {
        self.connectivity.remove_row(elem)?;
        self.global_ids.remove_row(elem)
    }

    /// Commit staged changes of connectivity and global ids together.
    pub fn flush(&mut self) -> Result<Remap, MeshMigrateError> {
        let remap = self.connectivity.flush();
        let check = self.global_ids.flush();
        if remap != check {
            return Err(MeshMigrateError::ParallelTableMismatch {
                table: "element global ids",
                detail: format!("block `{}` flushed to different layouts", self.name),
            });
        }
        Ok(remap)
    }

    /// Connectivity row of `elem`, bounds-checked.
    pub fn nodes(&self, elem: usize) -> Result<&[u64], MeshMigrateError> {
        self.connectivity.get_row(elem).map(Vec::as_slice)
    }

    /// Coordinates of every node of `elem`; connectivity must be local.
    pub fn element_coordinates(
        &self,
        elem: usize,
        nodes: &NodeStore,
    ) -> Result<Vec<Vec<f64>>, MeshMigrateError> {
        self.expect_form(ConnectivityForm::Local)?;
        self.nodes(elem)?
            .iter()
            .map(|&n| {
                let local = usize::try_from(n).ok().filter(|&i| i < nodes.len()).ok_or(
                    MeshMigrateError::NodeIndexOutOfBounds {
                        block: self.name.clone(),
                        index: n,
                        len: nodes.len(),
                    },
                )?;
                nodes.coordinates(local).map(<[f64]>::to_vec)
            })
            .collect()
    }

    /// Rewrite every row from local node indices to node global ids.
    pub fn localize_to_global(&mut self, node_gids: &[GlobalId]) -> Result<(), MeshMigrateError> {
        self.expect_form(ConnectivityForm::Local)?;
        for row in self.connectivity.iter_mut() {
            for n in row.iter_mut() {
                *n = usize::try_from(*n)
                    .ok()
                    .and_then(|i| node_gids.get(i).copied())
                    .ok_or(MeshMigrateError::NodeIndexOutOfBounds {
                        block: self.name.clone(),
                        index: *n,
                        len: node_gids.len(),
                    })?;
            }
        }
        self.form = ConnectivityForm::Global;
        Ok(())
    }

    /// Rewrite every row from node global ids to local indices via `glb_to_loc`.
    pub fn globalize_to_local(
        &mut self,
        glb_to_loc: &HashMap<GlobalId, usize>,
    ) -> Result<(), MeshMigrateError> {
        self.expect_form(ConnectivityForm::Global)?;
        for row in self.connectivity.iter_mut() {
            for n in row.iter_mut() {
                let local = glb_to_loc.get(&*n).ok_or(MeshMigrateError::DanglingNode {
                    block: self.name.clone(),
                    gid: *n,
                })?;
                *n = *local as u64;
            }
        }
        self.form = ConnectivityForm::Local;
        Ok(())
    }
}

/// One node as carried between processes.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeRecord {
    pub global_id: GlobalId,
    pub coordinates: Vec<f64>,
    pub is_ghost: bool,
    /// Global ids of the elements referencing this node.
    pub element_refs: Vec<GlobalId>,
}

/// Coordinate block with its tagged side tables, all row-aligned.
#[derive(Clone, Debug)]
pub struct NodeStore {
    name: String,
    dimension: usize,
    coordinates: FlexTable<f64>,
    global_node_indices: FlexList<GlobalId>,
    is_ghost: FlexList<bool>,
    glb_elem_connectivity: FlexTable<GlobalId>,
}

impl NodeStore {
    pub fn new(name: impl Into<String>, dimension: usize) -> Self {
        Self {
            name: name.into(),
            dimension,
            coordinates: FlexTable::new(),
            global_node_indices: FlexList::new(),
            is_ghost: FlexList::new(),
            glb_elem_connectivity: FlexTable::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of committed nodes.
    pub fn len(&self) -> usize {
        self.coordinates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coordinates.is_empty()
    }

    fn check_dimension(&self, index: usize, record: &NodeRecord) -> Result<(), MeshMigrateError> {
        if record.coordinates.len() == self.dimension {
            Ok(())
        } else {
            Err(MeshMigrateError::RowSizeMismatch {
                index,
                expected: self.dimension,
                found: record.coordinates.len(),
            })
        }
    }

    /// Append a committed node (initial loading).
    pub fn push_node(&mut self, record: NodeRecord) -> Result<usize, MeshMigrateError> {
        self.check_dimension(self.len(), &record)?;
        let loc = self.coordinates.push_row(record.coordinates)?;
        lockstep(
            "global_node_indices",
            loc,
            self.global_node_indices.push_row(record.global_id)?,
        )?;
        lockstep("is_ghost", loc, self.is_ghost.push_row(record.is_ghost)?)?;
        lockstep(
            "glb_elem_connectivity",
            loc,
            self.glb_elem_connectivity.push_row(record.element_refs)?,
        )?;
        Ok(loc)
    }

    /// Stage a node in all four tables; returns the shared tentative index.
    pub fn add_node(&mut self, record: NodeRecord) -> Result<usize, MeshMigrateError> {
        self.check_dimension(self.coordinates.tentative_len(), &record)?;
        let loc = self.coordinates.add_row(record.coordinates);
        lockstep(
            "global_node_indices",
            loc,
            self.global_node_indices.add_row(record.global_id),
        )?;
        lockstep("is_ghost", loc, self.is_ghost.add_row(record.is_ghost))?;
        lockstep(
            "glb_elem_connectivity",
            loc,
            self.glb_elem_connectivity.add_row(record.element_refs),
        )?;
        Ok(loc)
    }

    /// Stage the removal of node `loc` in all four tables.
    pub fn remove_node(&mut self, loc: usize) -> Result<(), MeshMigrateError> {
        self.coordinates.remove_row(loc)?;
        self.global_node_indices.remove_row(loc)?;
        self.is_ghost.remove_row(loc)?;
        self.glb_elem_connectivity.remove_row(loc)
    }

    /// Flush all four tables; their remaps must agree.
    pub fn flush(&mut self) -> Result<Remap, MeshMigrateError> {
        let remap = self.coordinates.flush();
        let others = [
            ("global_node_indices", self.global_node_indices.flush()),
            ("is_ghost", self.is_ghost.flush()),
            ("glb_elem_connectivity", self.glb_elem_connectivity.flush()),
        ];
        for (table, other) in others {
            if other != remap {
                return Err(MeshMigrateError::ParallelTableMismatch {
                    table,
                    detail: format!("store `{}` flushed to a different layout than its coordinates", self.name),
                });
            }
        }
        Ok(remap)
    }

    pub fn has_pending(&self) -> bool {
        self.coordinates.has_pending()
    }

    pub fn is_removed(&self, loc: usize) -> Result<bool, MeshMigrateError> {
        self.coordinates.is_removed(loc)
    }

    pub fn coordinates(&self, loc: usize) -> Result<&[f64], MeshMigrateError> {
        self.coordinates.get_row(loc).map(Vec::as_slice)
    }

    pub fn global_id(&self, loc: usize) -> Result<GlobalId, MeshMigrateError> {
        self.global_node_indices.get_row(loc).copied()
    }

    pub fn is_ghost(&self, loc: usize) -> Result<bool, MeshMigrateError> {
        self.is_ghost.get_row(loc).copied()
    }

    pub fn set_ghost(&mut self, loc: usize, ghost: bool) -> Result<(), MeshMigrateError> {
        *self.is_ghost.row_mut(loc)? = ghost;
        Ok(())
    }

    pub fn element_refs(&self, loc: usize) -> Result<&[GlobalId], MeshMigrateError> {
        self.glb_elem_connectivity.get_row(loc).map(Vec::as_slice)
    }

    /// Full record of node `loc`.
    pub fn node(&self, loc: usize) -> Result<NodeRecord, MeshMigrateError> {
        Ok(NodeRecord {
            global_id: self.global_id(loc)?,
            coordinates: self.coordinates(loc)?.to_vec(),
            is_ghost: self.is_ghost(loc)?,
            element_refs: self.element_refs(loc)?.to_vec(),
        })
    }

    /// Committed node global ids, by local index.
    pub fn global_ids(&self) -> &[GlobalId] {
        self.global_node_indices.as_slice()
    }

    /// Committed ghost flags, by local index.
    pub fn ghost_flags(&self) -> &[bool] {
        self.is_ghost.as_slice()
    }

    /// Global id → tentative index for every node not marked removed.
    pub fn glb_to_loc(&self) -> HashMap<GlobalId, usize> {
        self.global_node_indices
            .entries()
            .map(|(loc, &gid)| (gid, loc))
            .collect()
    }

    /// Global ids of the non-removed nodes this process owns.
    pub fn owned_gids(&self) -> impl Iterator<Item = GlobalId> + '_ {
        self.global_node_indices
            .entries()
            .filter(|&(loc, _)| matches!(self.is_ghost.get_row(loc), Ok(false)))
            .map(|(_, &gid)| gid)
    }
}

/// Tagged variant of every component kind a mesh can hold.
#[derive(Clone, Debug)]
pub enum Component {
    ElementBlock(ElementBlock),
    CoordinateBlock(NodeStore),
    /// Any component the migration does not touch (fields, labels, ...).
    Other(String),
}

impl Component {
    pub fn name(&self) -> &str {
        match self {
            Component::ElementBlock(b) => b.name(),
            Component::CoordinateBlock(n) => n.name(),
            Component::Other(name) => name,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Component::ElementBlock(_) => "element block",
            Component::CoordinateBlock(_) => "coordinate block",
            Component::Other(_) => "other component",
        }
    }
}

/// Distributed mesh as seen by one process.
#[derive(Clone, Debug, Default)]
pub struct Mesh {
    components: Vec<Component>,
}

impl Mesh {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a component; returns its index.
    pub fn add_component(&mut self, component: Component) -> usize {
        self.components.push(component);
        self.components.len() - 1
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn component(&self, index: usize) -> Result<&Component, MeshMigrateError> {
        self.components
            .get(index)
            .ok_or(MeshMigrateError::UnknownComponent(index))
    }

    pub fn elements(&self, index: usize) -> Result<&ElementBlock, MeshMigrateError> {
        match self.component(index)? {
            Component::ElementBlock(b) => Ok(b),
            _ => Err(MeshMigrateError::WrongComponentKind {
                index,
                expected: "element block",
            }),
        }
    }

    pub fn elements_mut(&mut self, index: usize) -> Result<&mut ElementBlock, MeshMigrateError> {
        match self.components.get_mut(index) {
            Some(Component::ElementBlock(b)) => Ok(b),
            Some(_) => Err(MeshMigrateError::WrongComponentKind {
                index,
                expected: "element block",
            }),
            None => Err(MeshMigrateError::UnknownComponent(index)),
        }
    }

    pub fn nodes(&self, index: usize) -> Result<&NodeStore, MeshMigrateError> {
        match self.component(index)? {
            Component::CoordinateBlock(n) => Ok(n),
            _ => Err(MeshMigrateError::WrongComponentKind {
                index,
                expected: "coordinate block",
            }),
        }
    }

    pub fn nodes_mut(&mut self, index: usize) -> Result<&mut NodeStore, MeshMigrateError> {
        match self.components.get_mut(index) {
            Some(Component::CoordinateBlock(n)) => Ok(n),
            Some(_) => Err(MeshMigrateError::WrongComponentKind {
                index,
                expected: "coordinate block",
            }),
            None => Err(MeshMigrateError::UnknownComponent(index)),
        }
    }

    /// `(component index, block)` for every element block.
    pub fn element_blocks(&self) -> impl Iterator<Item = (usize, &ElementBlock)> + '_ {
        self.components.iter().enumerate().filter_map(|(i, c)| match c {
            Component::ElementBlock(b) => Some((i, b)),
            _ => None,
        })
    }

    /// `(component index, store)` for every coordinate block.
    pub fn node_stores(&self) -> impl Iterator<Item = (usize, &NodeStore)> + '_ {
        self.components.iter().enumerate().filter_map(|(i, c)| match c {
            Component::CoordinateBlock(n) => Some((i, n)),
            _ => None,
        })
    }

    pub fn element_block_indices(&self) -> Vec<usize> {
        self.element_blocks().map(|(i, _)| i).collect()
    }

    pub fn node_store_indices(&self) -> Vec<usize> {
        self.node_stores().map(|(i, _)| i).collect()
    }

    /// Global ids of every node this process owns, over all coordinate blocks.
    pub fn owned_node_gids(&self) -> impl Iterator<Item = GlobalId> + '_ {
        self.node_stores().flat_map(|(_, n)| n.owned_gids())
    }

    /// Global ids of every element stored here, over all element blocks.
    pub fn element_gids(&self) -> impl Iterator<Item = GlobalId> + '_ {
        self.element_blocks()
            .flat_map(|(_, b)| b.global_ids().entries().map(|(_, &gid)| gid))
    }

    /// Rewrite every element block to global-id connectivity.
    pub fn localize_to_global(&mut self) -> Result<(), MeshMigrateError> {
        for b in self.element_block_indices() {
            let coords = self.elements(b)?.coordinates_component();
            let gids = self.nodes(coords)?.global_ids().to_vec();
            self.elements_mut(b)?.localize_to_global(&gids)?;
        }
        Ok(())
    }

    /// Rewrite every element block back to local connectivity against the
    /// current (flushed) node tables.
    pub fn globalize_to_local(&mut self) -> Result<(), MeshMigrateError> {
        let maps: HashMap<usize, HashMap<GlobalId, usize>> = self
            .node_stores()
            .map(|(i, n)| (i, n.glb_to_loc()))
            .collect();
        for b in self.element_block_indices() {
            let coords = self.elements(b)?.coordinates_component();
            let map = maps.get(&coords).ok_or(MeshMigrateError::WrongComponentKind {
                index: coords,
                expected: "coordinate block",
            })?;
            self.elements_mut(b)?.globalize_to_local(map)?;
        }
        Ok(())
    }

    /// Check that every local connectivity entry is within its node table.
    pub fn validate(&self) -> Result<(), MeshMigrateError> {
        for (_, b) in self.element_blocks() {
            let nodes = self.nodes(b.coordinates_component())?;
            if b.form() != ConnectivityForm::Local {
                continue;
            }
            for row in b.connectivity().iter() {
                if let Some(&bad) = row.iter().find(|&&n| n as usize >= nodes.len()) {
                    return Err(MeshMigrateError::NodeIndexOutOfBounds {
                        block: b.name().to_owned(),
                        index: bad,
                        len: nodes.len(),
                    });
                }
            }
        }
        Ok(())
    }
}

fn lockstep(table: &'static str, expected: usize, found: usize) -> Result<(), MeshMigrateError> {
    if expected == found {
        Ok(())
    } else {
        Err(MeshMigrateError::ParallelTableMismatch {
            table,
            detail: format!("row landed at {found}, expected {expected}"),
        })
    }
}
