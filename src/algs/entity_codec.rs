//! Wire format of one element and one node.
//!
//! ```text
//! element: [component: u32][node gid: u64] x row_size
//! node:    [component: u32][is_ghost: u8][gid: u64][coord: f64] x dim
//!          [ref count: u32][element gid: u64] x ref count
//! ```
//!
//! The element's own global id travels in the transfer frame header, not in
//! the payload. Sizes are exact; there is no padding.

use crate::algs::wire::{WIRE_BOOL, WIRE_GID, WIRE_REAL, WIRE_UINT, WireReader, WireWriter};
use crate::mesh_error::MeshMigrateError;
use crate::topology::components::NodeRecord;
use crate::topology::global_id::GlobalId;

/// One element in flight: its block and its connectivity in global ids.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ElementMessage {
    pub component: usize,
    pub nodes: Vec<GlobalId>,
}

impl ElementMessage {
    /// Payload bytes of an element with `row_size` nodes.
    pub const fn size_for(row_size: usize) -> usize {
        WIRE_UINT + WIRE_GID * row_size
    }

    pub fn wire_size(&self) -> usize {
        Self::size_for(self.nodes.len())
    }

    pub fn pack(&self, out: &mut WireWriter<'_>) -> Result<(), MeshMigrateError> {
        out.put_uint("component index", self.component)?;
        for &n in &self.nodes {
            out.put_u64(n)?;
        }
        Ok(())
    }

    /// Decode one element; `row_size_of` gives the row length of a component.
    pub fn unpack<F>(input: &mut WireReader<'_>, row_size_of: F) -> Result<Self, MeshMigrateError>
    where
        F: FnOnce(usize) -> Result<usize, MeshMigrateError>,
    {
        let component = input.get_uint()?;
        let row_size = row_size_of(component)?;
        let nodes = (0..row_size)
            .map(|_| input.get_u64())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { component, nodes })
    }
}

/// One node in flight.
#[derive(Clone, Debug, PartialEq)]
pub struct NodeMessage {
    pub component: usize,
    pub node: NodeRecord,
}

impl NodeMessage {
    /// Payload bytes of a node in `dim` dimensions referenced by `nb_refs` elements.
    pub const fn size_for(dim: usize, nb_refs: usize) -> usize {
        WIRE_UINT + WIRE_BOOL + WIRE_GID + WIRE_REAL * dim + WIRE_UINT + WIRE_GID * nb_refs
    }

    pub fn wire_size(&self) -> usize {
        Self::size_for(self.node.coordinates.len(), self.node.element_refs.len())
    }

    pub fn pack(&self, out: &mut WireWriter<'_>) -> Result<(), MeshMigrateError> {
        out.put_uint("component index", self.component)?;
        out.put_bool(self.node.is_ghost)?;
        out.put_u64(self.node.global_id)?;
        for &x in &self.node.coordinates {
            out.put_f64(x)?;
        }
        out.put_uint("element reference count", self.node.element_refs.len())?;
        for &e in &self.node.element_refs {
            out.put_u64(e)?;
        }
        Ok(())
    }

    /// Decode one node; `dim_of` gives the spatial dimension of a component.
    pub fn unpack<F>(input: &mut WireReader<'_>, dim_of: F) -> Result<Self, MeshMigrateError>
    where
        F: FnOnce(usize) -> Result<usize, MeshMigrateError>,
    {
        let component = input.get_uint()?;
        let is_ghost = input.get_bool()?;
        let global_id = input.get_u64()?;
        let dim = dim_of(component)?;
        let coordinates = (0..dim)
            .map(|_| input.get_f64())
            .collect::<Result<Vec<_>, _>>()?;
        let nb_refs = input.get_uint()?;
        // a corrupt count must not trigger a huge allocation
        if nb_refs.saturating_mul(WIRE_GID) > input.remaining() {
            return Err(MeshMigrateError::WireUnderrun {
                offset: input.position(),
                needed: nb_refs.saturating_mul(WIRE_GID),
                len: input.position() + input.remaining(),
            });
        }
        let element_refs = (0..nb_refs)
            .map(|_| input.get_u64())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            component,
            node: NodeRecord {
                global_id,
                coordinates,
                is_ghost,
                element_refs,
            },
        })
    }
}
