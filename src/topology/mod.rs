//! Top-level module for mesh topology.
//!
//! - [`global_id`]: global identifiers, the combined node/element id space and
//!   the owner directory
//! - [`components`]: element blocks, coordinate blocks and the mesh holding them

pub mod components;
pub mod global_id;

pub use components::{Component, ConnectivityForm, ElementBlock, Mesh, NodeRecord, NodeStore};
pub use global_id::{GlobalId, GlobalNumbering, IdSpace};
