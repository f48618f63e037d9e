//! Bulk object transfer between processes.
//!
//! [`migrate`] is the collective behind both element and node migration. The
//! caller describes what leaves this process as a [`MigrationList`] and
//! supplies [`MigrationCallbacks`] that size, pack and unpack one object at a
//! time. Each per-destination message is a sequence of frames
//!
//! ```text
//! [global id: u64][partition: u32][payload length: u32][payload]
//! ```
//!
//! so the receiver never needs to know the object kinds in advance.
//! [`invert_lists`] turns "I need X from rank r" into "rank r must send X to
//! me" without any shared directory.

use hashbrown::HashMap;

use crate::algs::communicator::{CommTag, Communicator};
use crate::algs::exchange::exchange_payloads;
use crate::algs::wire::{
    WIRE_GID, WIRE_UINT, WireReader, WireRequest, WireWriter, cast_slice, records_from_bytes,
};
use crate::mesh_error::MeshMigrateError;
use crate::topology::global_id::GlobalId;

const FRAME_HEADER: usize = WIRE_GID + 2 * WIRE_UINT;

/// Location of an object on the process that stores it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct LocalId {
    pub component: usize,
    pub index: usize,
}

/// One row of a [`MigrationList`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MigrationEntry {
    pub gid: GlobalId,
    /// Known on the sending side only.
    pub local: Option<LocalId>,
    /// Destination rank on export lists, source rank on import lists.
    pub proc: usize,
    pub part: usize,
}

/// Parallel arrays of global id, local id, process and partition.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MigrationList {
    global_ids: Vec<GlobalId>,
    local_ids: Vec<Option<LocalId>>,
    procs: Vec<usize>,
    parts: Vec<usize>,
}

impl MigrationList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: MigrationEntry) {
        self.global_ids.push(entry.gid);
        self.local_ids.push(entry.local);
        self.procs.push(entry.proc);
        self.parts.push(entry.part);
    }

    pub fn len(&self) -> usize {
        self.global_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.global_ids.is_empty()
    }

    pub fn get(&self, i: usize) -> Option<MigrationEntry> {
        Some(MigrationEntry {
            gid: *self.global_ids.get(i)?,
            local: *self.local_ids.get(i)?,
            proc: *self.procs.get(i)?,
            part: *self.parts.get(i)?,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = MigrationEntry> + '_ {
        itertools::izip!(&self.global_ids, &self.local_ids, &self.procs, &self.parts).map(
            |(&gid, &local, &proc, &part)| MigrationEntry {
                gid,
                local,
                proc,
                part,
            },
        )
    }

    pub fn global_ids(&self) -> &[GlobalId] {
        &self.global_ids
    }

    pub fn procs(&self) -> &[usize] {
        &self.procs
    }

    /// Number of entries per process, indexed by rank.
    pub fn count_per_proc(&self, size: usize) -> Vec<usize> {
        let mut counts = vec![0; size];
        for &p in &self.procs {
            if let Some(c) = counts.get_mut(p) {
                *c += 1;
            }
        }
        counts
    }
}

impl FromIterator<MigrationEntry> for MigrationList {
    fn from_iter<I: IntoIterator<Item = MigrationEntry>>(iter: I) -> Self {
        let mut list = MigrationList::new();
        for e in iter {
            list.push(e);
        }
        list
    }
}

/// Object-level hooks driven by [`migrate`].
pub trait MigrationCallbacks {
    /// Exact payload size of `entry` in bytes.
    fn obj_size(&self, entry: &MigrationEntry) -> Result<usize, MeshMigrateError>;

    /// Write the payload of `entry`; may stage local removals.
    fn pack(
        &mut self,
        entry: &MigrationEntry,
        out: &mut WireWriter<'_>,
    ) -> Result<(), MeshMigrateError>;

    /// Read one payload received from rank `source`.
    fn unpack(
        &mut self,
        gid: GlobalId,
        source: usize,
        input: &mut WireReader<'_>,
    ) -> Result<(), MeshMigrateError>;

    /// Runs once every received object has been unpacked.
    fn post_migrate(
        &mut self,
        _imports: &MigrationList,
        _exports: &MigrationList,
    ) -> Result<(), MeshMigrateError> {
        Ok(())
    }
}

/// Collective: ship every export to its destination rank and unpack what
/// arrives here.
///
/// `exports[i].proc` is the destination rank. If `imports` is given, the
/// number of objects received from each rank must match it exactly. Returns
/// the list of objects actually received (source rank in `proc`).
pub fn migrate<C, M>(
    comm: &C,
    tag: CommTag,
    imports: Option<&MigrationList>,
    exports: &MigrationList,
    callbacks: &mut M,
) -> Result<MigrationList, MeshMigrateError>
where
    C: Communicator,
    M: MigrationCallbacks + ?Sized,
{
    let size = comm.size();

    // sizes first, so every message buffer is allocated exactly
    let mut frame_sizes = Vec::with_capacity(exports.len());
    let mut msg_len = vec![0usize; size];
    for entry in exports.iter() {
        let slot = msg_len.get_mut(entry.proc).ok_or(MeshMigrateError::CommError {
            neighbor: entry.proc,
            reason: format!("export of {} addressed to a rank outside 0..{size}", entry.gid),
        })?;
        let n = callbacks.obj_size(&entry)?;
        *slot += FRAME_HEADER + n;
        frame_sizes.push(n);
    }

    let mut outgoing: Vec<Vec<u8>> = msg_len.iter().map(|&n| vec![0u8; n]).collect();
    let mut offsets = vec![0usize; size];
    for (entry, &declared) in exports.iter().zip(&frame_sizes) {
        let start = offsets[entry.proc];
        let buf = &mut outgoing[entry.proc][start..start + FRAME_HEADER + declared];
        let mut w = WireWriter::new(buf);
        w.put_u64(entry.gid)?;
        w.put_uint("partition", entry.part)?;
        w.put_uint("payload length", declared)?;
        callbacks.pack(&entry, &mut w)?;
        let actual = w.position() - FRAME_HEADER;
        if actual != declared {
            return Err(MeshMigrateError::WireSizeMismatch {
                gid: entry.gid,
                declared,
                actual,
            });
        }
        offsets[entry.proc] += FRAME_HEADER + declared;
    }

    let incoming = exchange_payloads(comm, tag, &outgoing)?;

    let mut received = MigrationList::new();
    for (source, msg) in incoming.iter().enumerate() {
        let mut r = WireReader::new(msg);
        while r.remaining() > 0 {
            let gid = r.get_u64()?;
            let part = r.get_uint()?;
            let declared = r.get_uint()?;
            let mut payload = WireReader::new(r.get_bytes(declared)?);
            callbacks.unpack(gid, source, &mut payload)?;
            if payload.position() != declared {
                return Err(MeshMigrateError::WireSizeMismatch {
                    gid,
                    declared,
                    actual: payload.position(),
                });
            }
            received.push(MigrationEntry {
                gid,
                local: None,
                proc: source,
                part,
            });
        }
    }

    if let Some(expected) = imports {
        let want = expected.count_per_proc(size);
        let got = received.count_per_proc(size);
        if let Some(rank) = (0..size).find(|&p| want[p] != got[p]) {
            return Err(MeshMigrateError::UnexpectedImportCount {
                rank,
                expected: want[rank],
                found: got[rank],
            });
        }
    }

    callbacks.post_migrate(&received, exports)?;
    Ok(received)
}

/// Collective: turn each rank's request list (`proc` = rank that holds the
/// object) into the list of objects this rank must send (`proc` = requester).
pub fn invert_lists<C>(
    comm: &C,
    tag: CommTag,
    requests: &MigrationList,
) -> Result<MigrationList, MeshMigrateError>
where
    C: Communicator,
{
    let size = comm.size();
    let mut per_proc: HashMap<usize, Vec<WireRequest>> = HashMap::new();
    for entry in requests.iter() {
        if entry.proc >= size {
            return Err(MeshMigrateError::OwnerNotFound(entry.gid));
        }
        per_proc
            .entry(entry.proc)
            .or_default()
            .push(WireRequest::new(entry.gid, entry.part));
    }
    let outgoing: Vec<Vec<u8>> = (0..size)
        .map(|p| {
            per_proc
                .get(&p)
                .map(|v| cast_slice(v).to_vec())
                .unwrap_or_default()
        })
        .collect();

    let incoming = exchange_payloads(comm, tag, &outgoing)?;

    let mut obligations = MigrationList::new();
    for (requester, bytes) in incoming.iter().enumerate() {
        let records: Vec<WireRequest> = records_from_bytes(bytes)
            .map_err(|reason| MeshMigrateError::CommError {
                neighbor: requester,
                reason,
            })?;
        for rec in records {
            obligations.push(MigrationEntry {
                gid: rec.gid(),
                local: None,
                proc: requester,
                part: rec.part(),
            });
        }
    }
    Ok(obligations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{NoComm, ThreadComm};

    /// Ships `u64` values keyed by gid.
    #[derive(Default)]
    struct Values {
        store: HashMap<GlobalId, u64>,
        got: Vec<(GlobalId, u64, usize)>,
        finished: bool,
    }

    impl MigrationCallbacks for Values {
        fn obj_size(&self, _entry: &MigrationEntry) -> Result<usize, MeshMigrateError> {
            Ok(WIRE_GID)
        }
        fn pack(&mut self, e: &MigrationEntry, out: &mut WireWriter<'_>) -> Result<(), MeshMigrateError> {
            let v = self.store.remove(&e.gid).ok_or(MeshMigrateError::UnknownGlobalId(e.gid))?;
            out.put_u64(v)
        }
        fn unpack(&mut self, gid: GlobalId, source: usize, input: &mut WireReader<'_>) -> Result<(), MeshMigrateError> {
            self.got.push((gid, input.get_u64()?, source));
            Ok(())
        }
        fn post_migrate(&mut self, _i: &MigrationList, _e: &MigrationList) -> Result<(), MeshMigrateError> {
            self.finished = true;
            Ok(())
        }
    }

    /// Declares more bytes than it writes.
    struct Liar;
    impl MigrationCallbacks for Liar {
        fn obj_size(&self, _entry: &MigrationEntry) -> Result<usize, MeshMigrateError> {
            Ok(12)
        }
        fn pack(&mut self, _e: &MigrationEntry, out: &mut WireWriter<'_>) -> Result<(), MeshMigrateError> {
            out.put_u64(1)
        }
        fn unpack(&mut self, _g: GlobalId, _s: usize, _i: &mut WireReader<'_>) -> Result<(), MeshMigrateError> {
            Ok(())
        }
    }

    fn entry(gid: GlobalId, proc: usize) -> MigrationEntry {
        MigrationEntry {
            gid,
            local: None,
            proc,
            part: proc,
        }
    }

    #[test]
    fn declared_size_must_match_packed_bytes() {
        let exports: MigrationList = [entry(4, 0)].into_iter().collect();
        let err = migrate(&NoComm, CommTag::new(1), None, &exports, &mut Liar).unwrap_err();
        assert_eq!(
            err,
            MeshMigrateError::WireSizeMismatch {
                gid: 4,
                declared: 12,
                actual: 8
            }
        );
    }

    #[test]
    fn serial_self_migration_unpacks_and_runs_hook() {
        let mut cb = Values::default();
        cb.store.insert(5, 50);
        let exports: MigrationList = [entry(5, 0)].into_iter().collect();
        let got = migrate(&NoComm, CommTag::new(1), Some(&exports), &exports, &mut cb).unwrap();
        assert_eq!(got.global_ids(), &[5]);
        assert_eq!(cb.got, vec![(5, 50, 0)]);
        assert!(cb.finished);
    }

    #[test]
    fn two_rank_exchange_and_import_check() {
        let world = ThreadComm::world(2);
        let results: Vec<Vec<(GlobalId, u64, usize)>> = std::thread::scope(|s| {
            let handles: Vec<_> = world
                .iter()
                .map(|comm| {
                    s.spawn(move || {
                        let me = comm.rank();
                        let other = 1 - me;
                        let mut cb = Values::default();
                        let gids = [10 * me as u64, 10 * me as u64 + 1];
                        for g in gids {
                            cb.store.insert(g, g * 100);
                        }
                        let exports: MigrationList = gids.iter().map(|&g| entry(g, other)).collect();
                        let imports: MigrationList =
                            (0..2).map(|k| entry(10 * other as u64 + k, other)).collect();
                        migrate(comm, CommTag::new(40), Some(&imports), &exports, &mut cb).unwrap();
                        assert!(cb.store.is_empty());
                        cb.got
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(results[0], vec![(10, 1000, 1), (11, 1100, 1)]);
        assert_eq!(results[1], vec![(0, 0, 0), (1, 100, 0)]);
    }

    #[test]
    fn import_count_mismatch_is_fatal() {
        let mut cb = Values::default();
        cb.store.insert(1, 1);
        let exports: MigrationList = [entry(1, 0)].into_iter().collect();
        let err = migrate(&NoComm, CommTag::new(1), Some(&MigrationList::new()), &exports, &mut cb)
            .unwrap_err();
        assert_eq!(
            err,
            MeshMigrateError::UnexpectedImportCount {
                rank: 0,
                expected: 0,
                found: 1
            }
        );
    }

    #[test]
    fn invert_turns_requests_into_obligations() {
        let world = ThreadComm::world(3);
        let results: Vec<MigrationList> = std::thread::scope(|s| {
            let handles: Vec<_> = world
                .iter()
                .map(|comm| {
                    s.spawn(move || {
                        let me = comm.rank();
                        // every rank asks rank 0 for gid 100 + me
                        let requests: MigrationList = [MigrationEntry {
                            gid: 100 + me as u64,
                            local: None,
                            proc: 0,
                            part: me,
                        }]
                        .into_iter()
                        .collect();
                        invert_lists(comm, CommTag::new(50), &requests).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(results[0].global_ids(), &[100, 101, 102]);
        assert_eq!(results[0].procs(), &[0, 1, 2]);
        assert!(results[1].is_empty() && results[2].is_empty());
    }
}
