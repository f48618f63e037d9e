//! Buffered flexible tables: row storage with deferred structural changes.
//!
//! A [`BufferedArray`] holds a live array of rows plus a pending buffer. Adding
//! or removing rows never touches the live layout; the changes are staged and
//! committed by [`BufferedArray::flush`], which compacts the storage and
//! returns a [`Remap`] telling every parallel table how indices moved.
//!
//! Tentative indices returned by [`BufferedArray::add_row`] are
//! `live_len + position_in_buffer`, so several tables receiving the same
//! sequence of adds and removes hand out the same indices and produce the
//! same remap on flush. The node store relies on that to keep coordinates,
//! global ids, ghost flags and element references aligned.
//!
//! # Flush policy
//! - Empty live slots are reused in the order they were removed (FIFO) before
//!   the array grows.
//! - When the table shrinks, every empty slot inside the retained range is
//!   swapped with the next occupied slot of the discarded tail. The tail is
//!   scanned once, front to back: the retained range holds exactly as many
//!   holes as the tail holds occupied rows, so a monotone scan pairs them all.

use std::collections::VecDeque;

use crate::mesh_error::MeshMigrateError;

/// Index permutation returned by a flush: `remap[new_index] = prior_index`.
///
/// Prior indices are tentative indices, i.e. a row that was still pending
/// before the flush reports `live_len + buffer_position`. Rows that did not
/// move map to themselves.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub struct Remap(Vec<usize>);

impl Remap {
    /// The identity permutation on `len` rows.
    pub fn identity(len: usize) -> Self {
        Self((0..len).collect())
    }

    /// Number of rows after the flush.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Prior index of the row now stored at `new_index`.
    pub fn prior_index(&self, new_index: usize) -> Option<usize> {
        self.0.get(new_index).copied()
    }

    /// True if no row changed position.
    pub fn is_identity(&self) -> bool {
        self.0.iter().enumerate().all(|(i, &p)| i == p)
    }

    pub fn as_slice(&self) -> &[usize] {
        &self.0
    }

    /// Iterate `(new_index, prior_index)` for rows that moved.
    pub fn moved(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.0
            .iter()
            .enumerate()
            .filter(|(i, p)| i != *p)
            .map(|(i, &p)| (i, p))
    }

    /// Map `prior_index → new_index` for every surviving row.
    pub fn inverse(&self) -> hashbrown::HashMap<usize, usize> {
        self.0.iter().enumerate().map(|(i, &p)| (p, i)).collect()
    }

    /// Re-synchronise a shadow vector indexed by prior (tentative) indices.
    pub fn apply<T: Clone>(&self, prior: &[T]) -> Result<Vec<T>, MeshMigrateError> {
        self.0
            .iter()
            .map(|&p| {
                prior
                    .get(p)
                    .cloned()
                    .ok_or_else(|| MeshMigrateError::ParallelTableMismatch {
                        table: "shadow",
                        detail: format!("remap reads prior row {p}, shadow has {} rows", prior.len()),
                    })
            })
            .collect()
    }
}

/// Row container with buffered add/remove and compaction on flush.
///
/// `R` is the row type: `Vec<T>` for variable-length rows (see [`FlexTable`])
/// or a scalar for one-value-per-row side tables (see [`FlexList`]). A removed
/// row is reset to `R::default()` (zero length for `Vec` rows) until the next
/// flush folds it away.
#[derive(Clone, Debug)]
pub struct BufferedArray<R> {
    rows: Vec<R>,
    removed: Vec<bool>,
    pending: Vec<R>,
    pending_removed: Vec<bool>,
    empty_rows: VecDeque<usize>,
    empty_pending: VecDeque<usize>,
}

/// Variable-row-length table (connectivity, coordinates, element references).
pub type FlexTable<T> = BufferedArray<Vec<T>>;

/// One value per row (global ids, ghost flags).
pub type FlexList<T> = BufferedArray<T>;

impl<R> Default for BufferedArray<R> {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            removed: Vec::new(),
            pending: Vec::new(),
            pending_removed: Vec::new(),
            empty_rows: VecDeque::new(),
            empty_pending: VecDeque::new(),
        }
    }
}

impl<R: Default> BufferedArray<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table whose live array is `rows`, with nothing pending.
    pub fn from_rows(rows: Vec<R>) -> Self {
        let removed = vec![false; rows.len()];
        Self {
            rows,
            removed,
            ..Self::default()
        }
    }

    /// Number of rows in the live array.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Number of rows waiting in the pending buffer (removed ones included).
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Live plus pending rows: the exclusive bound on valid tentative indices.
    pub fn tentative_len(&self) -> usize {
        self.rows.len() + self.pending.len()
    }

    /// True if there are staged changes a flush would commit.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty() || !self.empty_rows.is_empty() || !self.empty_pending.is_empty()
    }

    /// Number of rows marked removed since the last flush.
    pub fn removed_len(&self) -> usize {
        self.empty_rows.len() + self.empty_pending.len()
    }

    /// Stage a row. Returns its tentative index `len() + buffer_position`.
    pub fn add_row(&mut self, row: R) -> usize {
        self.pending.push(row);
        self.pending_removed.push(false);
        self.rows.len() + self.pending.len() - 1
    }

    /// Stage several rows, returning their tentative indices.
    pub fn add_rows<I: IntoIterator<Item = R>>(&mut self, rows: I) -> Vec<usize> {
        rows.into_iter().map(|r| self.add_row(r)).collect()
    }

    /// Append directly to the live array (initial loading).
    ///
    /// Refused while changes are staged, since it would shift the tentative
    /// indices already handed out for pending rows.
    pub fn push_row(&mut self, row: R) -> Result<usize, MeshMigrateError> {
        if self.has_pending() {
            return Err(MeshMigrateError::ParallelTableMismatch {
                table: "flex table",
                detail: "direct push while buffered changes are pending".into(),
            });
        }
        self.rows.push(row);
        self.removed.push(false);
        Ok(self.rows.len() - 1)
    }

    /// Mark a live or pending row removed. Removing a row twice is a no-op.
    pub fn remove_row(&mut self, index: usize) -> Result<(), MeshMigrateError> {
        let live = self.rows.len();
        if index < live {
            if !self.removed[index] {
                self.removed[index] = true;
                self.rows[index] = R::default();
                self.empty_rows.push_back(index);
            }
            Ok(())
        } else if index - live < self.pending.len() {
            let pos = index - live;
            if !self.pending_removed[pos] {
                self.pending_removed[pos] = true;
                self.pending[pos] = R::default();
                self.empty_pending.push_back(index);
            }
            Ok(())
        } else {
            Err(self.out_of_range(index))
        }
    }

    /// True if `index` was removed since the last flush.
    pub fn is_removed(&self, index: usize) -> Result<bool, MeshMigrateError> {
        let live = self.rows.len();
        if index < live {
            Ok(self.removed[index])
        } else {
            self.pending_removed
                .get(index - live)
                .copied()
                .ok_or_else(|| self.out_of_range(index))
        }
    }

    /// Resolve a tentative index against the live array or the pending buffer.
    pub fn get_row(&self, index: usize) -> Result<&R, MeshMigrateError> {
        let live = self.rows.len();
        if index < live {
            Ok(&self.rows[index])
        } else {
            self.pending
                .get(index - live)
                .ok_or_else(|| self.out_of_range(index))
        }
    }

    /// Mutable access to a live or pending row.
    pub fn row_mut(&mut self, index: usize) -> Result<&mut R, MeshMigrateError> {
        let live = self.rows.len();
        let pending = self.pending.len();
        if index < live {
            Ok(&mut self.rows[index])
        } else if index - live < pending {
            Ok(&mut self.pending[index - live])
        } else {
            Err(MeshMigrateError::RowOutOfRange {
                index,
                live,
                pending,
            })
        }
    }

    /// Live rows, in index order.
    pub fn iter(&self) -> std::slice::Iter<'_, R> {
        self.rows.iter()
    }

    /// Mutable live rows, for in-place rewrites between flushes.
    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, R> {
        self.rows.iter_mut()
    }

    /// `(tentative_index, row)` for every live or pending row not marked removed.
    pub fn entries(&self) -> impl Iterator<Item = (usize, &R)> + '_ {
        let live = self.rows.len();
        let kept_live = self
            .rows
            .iter()
            .zip(&self.removed)
            .enumerate()
            .filter(|(_, (_, gone))| !**gone)
            .map(|(i, (row, _))| (i, row));
        let kept_pending = self
            .pending
            .iter()
            .zip(&self.pending_removed)
            .enumerate()
            .filter(|(_, (_, gone))| !**gone)
            .map(move |(i, (row, _))| (live + i, row));
        kept_live.chain(kept_pending)
    }

    /// The live array.
    pub fn as_slice(&self) -> &[R] {
        &self.rows
    }

    /// Commit staged adds and removes, compacting the live array.
    ///
    /// Returns `remap` with `remap[new_index] = prior_index` for every row of
    /// the flushed table. With nothing staged this is the identity and the
    /// table is left untouched.
    pub fn flush(&mut self) -> Remap {
        let live = self.rows.len();
        let new_size = live + self.pending.len() - self.removed_len();
        let mut remap = Remap::identity(new_size);
        if !self.has_pending() {
            return remap;
        }

        let pending = std::mem::take(&mut self.pending);
        let pending_removed = std::mem::take(&mut self.pending_removed);
        let mut empty_rows = std::mem::take(&mut self.empty_rows);
        self.empty_pending.clear();

        let surviving = pending
            .into_iter()
            .zip(pending_removed)
            .enumerate()
            .filter(|(_, (_, gone))| !gone)
            .map(|(pos, (row, _))| (live + pos, row));

        if new_size >= live {
            self.rows.reserve(new_size - live);
            self.removed.reserve(new_size - live);
            for (prior, row) in surviving {
                let slot = match empty_rows.pop_front() {
                    Some(slot) => {
                        self.rows[slot] = row;
                        self.removed[slot] = false;
                        slot
                    }
                    None => {
                        self.rows.push(row);
                        self.removed.push(false);
                        self.rows.len() - 1
                    }
                };
                remap.0[slot] = prior;
            }
        } else {
            // provenance of the content currently held by each live slot
            let mut origin: Vec<usize> = (0..live).collect();
            let mut holes = Vec::with_capacity(empty_rows.len());
            // a net shrink leaves more holes than surviving pending rows
            for (prior, row) in surviving {
                if let Some(slot) = empty_rows.pop_front() {
                    self.rows[slot] = row;
                    self.removed[slot] = false;
                    origin[slot] = prior;
                }
            }
            holes.extend(empty_rows.drain(..));

            let mut full = new_size;
            for hole in holes {
                if hole >= new_size {
                    continue;
                }
                while full < live && self.removed[full] {
                    full += 1;
                }
                debug_assert!(full < live, "tail exhausted before holes were filled");
                if full >= live {
                    break;
                }
                self.rows.swap(hole, full);
                self.removed.swap(hole, full);
                origin[hole] = origin[full];
                full += 1;
            }

            self.rows.truncate(new_size);
            self.removed.truncate(new_size);
            for (slot, prior) in origin.into_iter().take(new_size).enumerate() {
                remap.0[slot] = prior;
            }
        }

        remap
    }

    fn out_of_range(&self, index: usize) -> MeshMigrateError {
        MeshMigrateError::RowOutOfRange {
            index,
            live: self.rows.len(),
            pending: self.pending.len(),
        }
    }
}

impl<T: Clone> BufferedArray<Vec<T>> {
    /// Length of row `index` (live or pending).
    pub fn row_size(&self, index: usize) -> Result<usize, MeshMigrateError> {
        self.get_row(index).map(Vec::len)
    }

    /// Overwrite row `index` in place; the new row must have the same length.
    pub fn set_row(&mut self, index: usize, row: &[T]) -> Result<(), MeshMigrateError> {
        let target = self.row_mut(index)?;
        if target.len() != row.len() {
            return Err(MeshMigrateError::RowSizeMismatch {
                index,
                expected: target.len(),
                found: row.len(),
            });
        }
        target.clone_from_slice(row);
        Ok(())
    }

    /// Total number of values stored in the live rows.
    pub fn total_len(&self) -> usize {
        self.rows.iter().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(n: usize) -> FlexTable<u32> {
        FlexTable::from_rows((0..n as u32).map(|i| vec![i * 10, i * 10 + 1]).collect())
    }

    #[test]
    fn pure_growth_appends_in_submission_order() {
        let mut t = table(3);
        assert_eq!(t.add_row(vec![100, 101]), 3);
        assert_eq!(t.add_row(vec![200]), 4);
        let remap = t.flush();
        assert_eq!(t.len(), 5);
        assert_eq!(remap.as_slice(), &[0, 1, 2, 3, 4]);
        assert_eq!(t.get_row(3).unwrap(), &vec![100, 101]);
        assert_eq!(t.get_row(4).unwrap(), &vec![200]);
    }

    #[test]
    fn shrink_with_swap() {
        let mut t = table(5);
        t.remove_row(1).unwrap();
        t.remove_row(3).unwrap();
        let idx = t.add_row(vec![77, 78]);
        assert_eq!(idx, 5);
        let remap = t.flush();
        assert_eq!(t.len(), 4);
        // pending row fills the first hole, the tail row 4 is swapped into hole 3
        assert_eq!(remap.as_slice(), &[0, 5, 2, 4]);
        assert_eq!(t.get_row(1).unwrap(), &vec![77, 78]);
        assert_eq!(t.get_row(3).unwrap(), &vec![40, 41]);
    }

    #[test]
    fn growth_reuses_holes_first() {
        let mut t = table(3);
        t.remove_row(0).unwrap();
        t.add_row(vec![5]);
        t.add_row(vec![6]);
        let remap = t.flush();
        assert_eq!(remap.as_slice(), &[3, 1, 2, 4]);
        assert_eq!(t.get_row(0).unwrap(), &vec![5]);
        assert_eq!(t.get_row(3).unwrap(), &vec![6]);
    }

    #[test]
    fn appended_rows_record_their_buffer_position() {
        let mut t = table(2);
        let a = t.add_row(vec![1]);
        t.add_row(vec![2]);
        t.remove_row(a).unwrap();
        let remap = t.flush();
        assert_eq!(t.len(), 3);
        assert_eq!(remap.as_slice(), &[0, 1, 3]);
        assert_eq!(t.get_row(2).unwrap(), &vec![2]);
    }

    #[test]
    fn shrink_when_pending_lands_in_tail() {
        // the first removed slot lies in the discarded tail; the pending row
        // placed there must carry its own provenance when swapped forward
        let mut t = table(4);
        t.remove_row(3).unwrap();
        t.remove_row(0).unwrap();
        t.remove_row(1).unwrap();
        t.add_row(vec![9]);
        let remap = t.flush();
        assert_eq!(t.len(), 2);
        let rows: Vec<_> = t.iter().cloned().collect();
        assert!(rows.contains(&vec![9]));
        assert!(rows.contains(&vec![20, 21]));
        for (new, &prior) in remap.as_slice().iter().enumerate() {
            let expected = if prior == 4 { vec![9] } else { vec![prior as u32 * 10, prior as u32 * 10 + 1] };
            assert_eq!(t.get_row(new).unwrap(), &expected);
        }
    }

    #[test]
    fn empty_flush_is_identity() {
        let mut t = table(4);
        let before: Vec<_> = t.iter().cloned().collect();
        let remap = t.flush();
        assert!(remap.is_identity());
        assert_eq!(remap.len(), 4);
        assert_eq!(t.iter().cloned().collect::<Vec<_>>(), before);
    }

    #[test]
    fn get_row_out_of_range() {
        let mut t = table(2);
        t.add_row(vec![1]);
        assert!(t.get_row(2).is_ok());
        assert_eq!(
            t.get_row(3),
            Err(MeshMigrateError::RowOutOfRange {
                index: 3,
                live: 2,
                pending: 1
            })
        );
        assert!(t.remove_row(9).is_err());
    }

    #[test]
    fn removed_rows_read_as_empty_and_double_remove_is_noop() {
        let mut t = table(3);
        t.remove_row(1).unwrap();
        t.remove_row(1).unwrap();
        assert_eq!(t.removed_len(), 1);
        assert!(t.get_row(1).unwrap().is_empty());
        assert!(t.is_removed(1).unwrap());
        t.flush();
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn set_row_checks_length() {
        let mut t = table(2);
        t.set_row(0, &[7, 8]).unwrap();
        assert_eq!(t.get_row(0).unwrap(), &vec![7, 8]);
        assert!(matches!(
            t.set_row(1, &[1]),
            Err(MeshMigrateError::RowSizeMismatch { .. })
        ));
    }

    #[test]
    fn push_row_refused_while_staged() {
        let mut t = table(1);
        assert_eq!(t.push_row(vec![3]).unwrap(), 1);
        t.add_row(vec![4]);
        assert!(t.push_row(vec![5]).is_err());
    }

    #[test]
    fn scalar_list_tracks_table() {
        let mut gids: FlexList<u64> = FlexList::from_rows(vec![10, 11, 12, 13]);
        let mut t = table(4);
        for idx in [2, 0] {
            gids.remove_row(idx).unwrap();
            t.remove_row(idx).unwrap();
        }
        assert_eq!(gids.add_row(99), t.add_row(vec![99]));
        let r1 = gids.flush();
        let r2 = t.flush();
        assert_eq!(r1, r2);
        assert_eq!(gids.as_slice(), &[13, 11, 99]);
    }

    #[test]
    fn remap_apply_and_inverse() {
        let mut t = table(3);
        t.remove_row(0).unwrap();
        let remap = t.flush();
        let shadow = vec!["a", "b", "c"];
        assert_eq!(remap.apply(&shadow).unwrap(), vec!["c", "b"]);
        let inv = remap.inverse();
        assert_eq!(inv[&2], 0);
        assert_eq!(remap.moved().collect::<Vec<_>>(), vec![(0, 2)]);
    }

    #[test]
    fn short_shadow_is_a_table_mismatch() {
        let mut t = table(3);
        t.remove_row(0).unwrap();
        let remap = t.flush();
        let err = remap.apply(&["a", "b"]).unwrap_err();
        assert!(matches!(
            err,
            MeshMigrateError::ParallelTableMismatch { table: "shadow", .. }
        ));
    }
}
