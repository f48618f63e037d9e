//! Collective byte exchanges built on the point-to-point [`Communicator`].
//!
//! Every exchange is two-staged: first the message sizes, then the payloads,
//! so receivers can allocate exact buffers. All functions guarantee that every
//! send/receive handle is drained before returning, even if an error occurs,
//! so one malformed message never leaves a peer blocked on an undrained send.

use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::wire::{WireCount, cast_slice, cast_slice_mut, expect_exact_len};
use crate::mesh_error::MeshMigrateError;

/// Tell every peer how many bytes to expect from us; learn the same from them.
///
/// `counts[p]` is the size of the message this rank will send to rank `p`.
/// Returns `sizes[p]`, the size of the message rank `p` will send to us.
pub fn exchange_sizes<C>(
    comm: &C,
    tag: CommTag,
    counts: &[usize],
) -> Result<Vec<usize>, MeshMigrateError>
where
    C: Communicator,
{
    let me = comm.rank();
    let size = comm.size();
    if counts.len() != size {
        return Err(MeshMigrateError::CommError {
            neighbor: me,
            reason: format!("{} send counts for {} ranks", counts.len(), size),
        });
    }

    // 1) post all receives
    let mut recv_size = Vec::with_capacity(size);
    for nbr in (0..size).filter(|&p| p != me) {
        let mut cnt = WireCount::new(0);
        let h = comm.irecv(nbr, tag.as_u16(), cast_slice_mut(std::slice::from_mut(&mut cnt)));
        recv_size.push((nbr, h));
    }

    // 2) post all sends
    let mut pending_sends = Vec::with_capacity(size);
    for nbr in (0..size).filter(|&p| p != me) {
        let count = WireCount::new(counts[nbr]);
        pending_sends.push(comm.isend(nbr, tag.as_u16(), cast_slice(std::slice::from_ref(&count))));
    }

    // 3) wait for all recvs, collect counts (but do not early-return)
    let mut sizes_in = vec![0usize; size];
    sizes_in[me] = counts[me];
    let mut maybe_err = None;
    for (nbr, h) in recv_size {
        match h.wait() {
            Some(data) if data.len() == std::mem::size_of::<WireCount>() => {
                let mut cnt = WireCount::new(0);
                cast_slice_mut(std::slice::from_mut(&mut cnt)).copy_from_slice(&data);
                sizes_in[nbr] = cnt.get();
            }
            Some(data) if maybe_err.is_none() => {
                maybe_err = Some(MeshMigrateError::CommError {
                    neighbor: nbr,
                    reason: format!(
                        "expected {} bytes for size header, got {}",
                        std::mem::size_of::<WireCount>(),
                        data.len()
                    ),
                });
            }
            None if maybe_err.is_none() => {
                maybe_err = Some(MeshMigrateError::CommError {
                    neighbor: nbr,
                    reason: format!("failed to receive size from rank {nbr}"),
                });
            }
            _ => {} // already have an error; just drain
        }
    }

    // 4) always drain all send handles before returning
    for send in pending_sends {
        let _ = send.wait();
    }

    match maybe_err {
        Some(err) => Err(err),
        None => Ok(sizes_in),
    }
}

/// All-to-all exchange of byte payloads: `outgoing[p]` is delivered to rank
/// `p`; the result holds what each rank sent to us (our own slot is copied).
pub fn exchange_payloads<C>(
    comm: &C,
    tag: CommTag,
    outgoing: &[Vec<u8>],
) -> Result<Vec<Vec<u8>>, MeshMigrateError>
where
    C: Communicator,
{
    let me = comm.rank();
    let counts: Vec<usize> = outgoing.iter().map(Vec::len).collect();
    let sizes_in = exchange_sizes(comm, tag, &counts)?;
    let data_tag = tag.offset(1).as_u16();

    let mut recvs = Vec::new();
    let mut buffers: Vec<Vec<u8>> = sizes_in.iter().map(|&n| vec![0u8; n]).collect();
    for (nbr, buf) in buffers.iter_mut().enumerate() {
        if nbr != me && !buf.is_empty() {
            recvs.push((nbr, comm.irecv(nbr, data_tag, buf)));
        }
    }

    let mut pending_sends = Vec::new();
    for (nbr, payload) in outgoing.iter().enumerate() {
        if nbr != me && !payload.is_empty() {
            pending_sends.push(comm.isend(nbr, data_tag, payload));
        }
    }

    let mut incoming: Vec<Vec<u8>> = vec![Vec::new(); sizes_in.len()];
    incoming[me] = outgoing[me].clone();
    let mut maybe_err = None;
    for (nbr, h) in recvs {
        match h.wait() {
            Some(data) => match expect_exact_len(data.len(), sizes_in[nbr]) {
                Ok(()) => incoming[nbr] = data,
                Err(reason) if maybe_err.is_none() => {
                    maybe_err = Some(MeshMigrateError::CommError {
                        neighbor: nbr,
                        reason,
                    })
                }
                Err(_) => {}
            },
            None if maybe_err.is_none() => {
                maybe_err = Some(MeshMigrateError::CommError {
                    neighbor: nbr,
                    reason: format!("failed to receive payload from rank {nbr}"),
                });
            }
            None => {}
        }
    }

    for send in pending_sends {
        let _ = send.wait();
    }

    match maybe_err {
        Some(err) => Err(err),
        None => Ok(incoming),
    }
}

/// Little-endian byte image of a `u64` slice.
pub fn encode_u64s(values: &[u64]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

/// Inverse of [`encode_u64s`] for a payload received from `nbr`.
pub fn decode_u64s(nbr: usize, bytes: &[u8]) -> Result<Vec<u64>, MeshMigrateError> {
    if bytes.len() % 8 != 0 {
        return Err(MeshMigrateError::CommError {
            neighbor: nbr,
            reason: format!("{} bytes is not a whole number of u64 words", bytes.len()),
        });
    }
    Ok(bytes
        .chunks_exact(8)
        .map(|c| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(c);
            u64::from_le_bytes(raw)
        })
        .collect())
}

/// Gather a fixed-length `u64` vector from every rank, indexed by rank.
pub fn all_gather_u64<C>(
    comm: &C,
    tag: CommTag,
    values: &[u64],
) -> Result<Vec<Vec<u64>>, MeshMigrateError>
where
    C: Communicator,
{
    let outgoing = vec![encode_u64s(values); comm.size()];
    let incoming = exchange_payloads(comm, tag, &outgoing)?;
    incoming
        .into_iter()
        .enumerate()
        .map(|(nbr, bytes)| {
            expect_exact_len(bytes.len(), values.len() * 8)
                .map_err(|reason| MeshMigrateError::CommError { neighbor: nbr, reason })?;
            decode_u64s(nbr, &bytes)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{NoComm, ThreadComm};

    #[test]
    fn serial_exchange_keeps_own_slot() {
        let comm = NoComm;
        let out = exchange_payloads(&comm, CommTag::new(10), &[vec![1, 2, 3]]).unwrap();
        assert_eq!(out, vec![vec![1, 2, 3]]);
        assert!(exchange_sizes(&comm, CommTag::new(10), &[1, 2]).is_err());
    }

    #[test]
    fn three_rank_all_to_all() {
        let world = ThreadComm::world(3);
        let results: Vec<Vec<Vec<u8>>> = std::thread::scope(|s| {
            let handles: Vec<_> = world
                .iter()
                .map(|comm| {
                    s.spawn(move || {
                        let me = comm.rank() as u8;
                        // rank r sends r+1 copies of (10*r + p) to rank p; nothing to itself
                        let outgoing: Vec<Vec<u8>> = (0..3u8)
                            .map(|p| if p == me { Vec::new() } else { vec![10 * me + p; me as usize + 1] })
                            .collect();
                        exchange_payloads(comm, CommTag::new(20), &outgoing).unwrap()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert_eq!(results[0][1], vec![10, 10]);
        assert_eq!(results[0][2], vec![20, 20, 20]);
        assert_eq!(results[2][0], vec![2]);
        assert!(results[1][1].is_empty());
    }

    #[test]
    fn all_gather_collects_every_rank() {
        let world = ThreadComm::world(4);
        let gathered: Vec<Vec<Vec<u64>>> = std::thread::scope(|s| {
            let handles: Vec<_> = world
                .iter()
                .map(|comm| s.spawn(move || {
                    let r = comm.rank() as u64;
                    all_gather_u64(comm, CommTag::new(30), &[r * 7, r]).unwrap()
                }))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for g in gathered {
            assert_eq!(g, vec![vec![0, 0], vec![7, 1], vec![14, 2], vec![21, 3]]);
        }
    }
}
