//! Communication-context handle: rank, size, barrier and non-blocking
//! point-to-point byte messages.
//!
//! Messages are *contiguous byte slices* (no zero-copy guarantees).
//! All handles are **waitable** but non-blocking; the exchange helpers call
//! `.wait()` before they trust that a buffer is ready.
//!
//! Nothing here is process-global: every component that needs to talk to its
//! peers receives a `&C: Communicator` explicitly.

use bytes::Bytes;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::{Arc, Barrier};

/// Typed message tag, so distinct protocol steps never share a mailbox slot.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CommTag(u16);

impl CommTag {
    pub const fn new(tag: u16) -> Self {
        Self(tag)
    }

    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Derived tag `self + k` (wrapping), for multi-step exchanges.
    pub const fn offset(self, k: u16) -> Self {
        Self(self.0.wrapping_add(k))
    }
}

/// Non-blocking communication interface (minimal by design).
pub trait Communicator {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle;

    /// Rank of the calling process.
    fn rank(&self) -> usize;
    /// Number of participating processes.
    fn size(&self) -> usize;
    /// Block until every process has reached the barrier.
    fn barrier(&self);
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

/// Compile-time no-op comm for pure serial runs: rank 0 of 1.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16, _buf: &mut [u8]) {}

    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn barrier(&self) {}
}

// --- ThreadComm: one "process" per thread, shared mailbox ---
type Key = (usize, usize, u16); // (src, dst, tag)

#[derive(Debug)]
struct Shared {
    mailbox: DashMap<Key, VecDeque<Bytes>>,
    barrier: Barrier,
}

/// In-process communicator: `ThreadComm::world(n)` returns one handle per
/// simulated rank, all sharing a mailbox and a barrier. Hand each handle to
/// its own thread and run the SPMD code unchanged.
#[derive(Clone, Debug)]
pub struct ThreadComm {
    rank: usize,
    size: usize,
    shared: Arc<Shared>,
}

impl ThreadComm {
    pub fn world(size: usize) -> Vec<ThreadComm> {
        let shared = Arc::new(Shared {
            mailbox: DashMap::new(),
            barrier: Barrier::new(size.max(1)),
        });
        (0..size)
            .map(|rank| ThreadComm {
                rank,
                size,
                shared: Arc::clone(&shared),
            })
            .collect()
    }
}

/// Receive handle of [`ThreadComm`]; polls the mailbox on `wait`.
pub struct LocalHandle {
    key: Key,
    shared: Arc<Shared>,
}

impl Wait for LocalHandle {
    fn wait(self) -> Option<Vec<u8>> {
        loop {
            if let Some(mut queue) = self.shared.mailbox.get_mut(&self.key) {
                if let Some(bytes) = queue.pop_front() {
                    return Some(bytes.to_vec());
                }
            }
            std::thread::yield_now();
        }
    }
}

impl Communicator for ThreadComm {
    type SendHandle = ();
    type RecvHandle = LocalHandle;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle {
        let key = (self.rank, peer, tag);
        self.shared
            .mailbox
            .entry(key)
            .or_default()
            .push_back(Bytes::copy_from_slice(buf));
    }

    fn irecv(&self, peer: usize, tag: u16, _buf: &mut [u8]) -> Self::RecvHandle {
        LocalHandle {
            key: (peer, self.rank, tag),
            shared: Arc::clone(&self.shared),
        }
    }

    fn rank(&self) -> usize {
        self.rank
    }
    fn size(&self) -> usize {
        self.size
    }
    fn barrier(&self) {
        self.shared.barrier.wait();
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::{Communicator, Wait};
    use mpi::environment::Universe;
    use mpi::request::{Request, StaticScope};
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;
    use std::sync::Arc;

    /// World communicator of an MPI job.
    pub struct MpiComm {
        _universe: Arc<Universe>,
        pub world: SimpleCommunicator,
        pub rank: usize,
        pub size: usize,
    }

    impl MpiComm {
        /// Initialise MPI. Returns `None` if it was already initialised.
        pub fn init() -> Option<Self> {
            let universe = mpi::initialize()?;
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Some(Self {
                _universe: Arc::new(universe),
                world,
                rank,
                size,
            })
        }
    }

    /// Request plus the heap buffer it reads from or writes into. The buffer
    /// is reclaimed once the request has completed.
    pub struct MpiHandle {
        req: Request<'static, [u8], StaticScope>,
        buf: *mut [u8],
    }

    impl Wait for MpiHandle {
        fn wait(self) -> Option<Vec<u8>> {
            self.req.wait();
            // SAFETY: `buf` came from `Box::into_raw` and the request using it has completed.
            let data = unsafe { Box::from_raw(self.buf) };
            Some(data.into_vec())
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiHandle;
        type RecvHandle = MpiHandle;

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiHandle {
            let ptr: *mut [u8] = Box::into_raw(buf.to_vec().into_boxed_slice());
            // SAFETY: the allocation outlives the request; it is freed in `wait`.
            let data: &'static [u8] = unsafe { &*ptr };
            let req = self
                .world
                .process_at_rank(peer as i32)
                .immediate_send_with_tag(StaticScope, data, tag as i32);
            MpiHandle { req, buf: ptr }
        }

        fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> MpiHandle {
            let ptr: *mut [u8] = Box::into_raw(vec![0u8; buf.len()].into_boxed_slice());
            // SAFETY: as above; nothing else aliases the allocation until `wait`.
            let data: &'static mut [u8] = unsafe { &mut *ptr };
            let req = self
                .world
                .process_at_rank(peer as i32)
                .immediate_receive_into_with_tag(StaticScope, data, tag as i32);
            MpiHandle { req, buf: ptr }
        }

        fn rank(&self) -> usize {
            self.rank
        }
        fn size(&self) -> usize {
            self.size
        }
        fn barrier(&self) {
            self.world.barrier();
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;
