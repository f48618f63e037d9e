//! Sorted global-id → destination-partition assignment.

use crate::mesh_error::MeshMigrateError;
use crate::partitioning::part_to_proc;
use crate::topology::global_id::{GlobalId, IdSpace};

/// Export list of one process, binary-searchable by combined global id.
///
/// Only objects whose partition changes have an entry. Built once by a
/// [`ChangeSetBuilder`] and read-only afterwards.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChangeSet {
    entries: Vec<(GlobalId, usize)>,
    parts: usize,
    space: IdSpace,
}

impl ChangeSet {
    /// An empty change set (nothing moves).
    pub fn empty(space: IdSpace, parts: usize) -> Self {
        Self {
            entries: Vec::new(),
            parts,
            space,
        }
    }

    /// Destination partition of combined id `obj`, if it moves.
    pub fn find(&self, obj: GlobalId) -> Option<usize> {
        self.entries
            .binary_search_by_key(&obj, |&(g, _)| g)
            .ok()
            .map(|i| self.entries[i].1)
    }

    pub fn find_node(&self, node: GlobalId) -> Option<usize> {
        self.find(self.space.from_node_glb(node))
    }

    pub fn find_element(&self, elem: GlobalId) -> Option<usize> {
        self.find(self.space.from_elem_glb(elem))
    }

    /// Destination rank of a moving node in a job of `procs` ranks.
    pub fn node_dest_proc(&self, node: GlobalId, procs: usize) -> Option<usize> {
        self.find_node(node)
            .map(|part| part_to_proc(part, self.parts, procs))
    }

    /// Destination rank of a moving element in a job of `procs` ranks.
    pub fn element_dest_proc(&self, elem: GlobalId, procs: usize) -> Option<usize> {
        self.find_element(elem)
            .map(|part| part_to_proc(part, self.parts, procs))
    }

    /// Entries in ascending combined-id order.
    pub fn iter(&self) -> impl Iterator<Item = (GlobalId, usize)> + '_ {
        self.entries.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of target partitions the assignment was computed for.
    pub fn parts(&self) -> usize {
        self.parts
    }

    /// Combined id space the keys live in.
    pub fn space(&self) -> IdSpace {
        self.space
    }
}

/// Unsorted staging area for a [`ChangeSet`].
#[derive(Clone, Debug)]
pub struct ChangeSetBuilder {
    entries: Vec<(GlobalId, usize)>,
    parts: usize,
    space: IdSpace,
}

impl ChangeSetBuilder {
    pub fn new(space: IdSpace, parts: usize) -> Self {
        Self {
            entries: Vec::new(),
            parts,
            space,
        }
    }

    /// Record an assignment without keeping the keys ordered.
    pub fn insert_blindly(&mut self, obj: GlobalId, part: usize) {
        self.entries.push((obj, part));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sort by key; a key inserted twice is an error.
    pub fn finish(mut self) -> Result<ChangeSet, MeshMigrateError> {
        self.entries.sort_unstable_by_key(|&(g, _)| g);
        if let Some(w) = self.entries.windows(2).find(|w| w[0].0 == w[1].0) {
            return Err(MeshMigrateError::DuplicateGlobalId(w[0].0));
        }
        Ok(ChangeSet {
            entries: self.entries,
            parts: self.parts,
            space: self.space,
        })
    }
}
