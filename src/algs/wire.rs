//! Fixed, little-endian wire types and bounds-checked cursors.
//!
//! Two kinds of payload cross process boundaries:
//! - fixed-size records (counts, object requests) cast with `bytemuck`;
//! - variable-length entity messages written field by field through
//!   [`WireWriter`] / [`WireReader`], which track the offset and fail with an
//!   error instead of writing or reading past the end.
//!
//! Field widths: component indices and counts are `u32`, global ids are
//! `u64`, coordinates are `f64`, flags are one byte. No padding anywhere in
//! the entity messages.

use bytemuck::{Pod, Zeroable};
use bytes::{Buf, BufMut};
use num_traits::ToPrimitive;
use static_assertions::const_assert_eq;
use std::mem::size_of;

use crate::mesh_error::MeshMigrateError;

/// Bytes of a component index or count field.
pub const WIRE_UINT: usize = 4;
/// Bytes of a global id field.
pub const WIRE_GID: usize = 8;
/// Bytes of a coordinate value.
pub const WIRE_REAL: usize = 8;
/// Bytes of a boolean flag.
pub const WIRE_BOOL: usize = 1;

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn cast_slice_mut<T: Pod>(v: &mut [T]) -> &mut [u8] {
    bytemuck::cast_slice_mut(v)
}

/// Decode a byte message into owned records; the length must be a whole
/// number of records.
pub fn records_from_bytes<T: Pod>(bytes: &[u8]) -> Result<Vec<T>, String> {
    if bytes.len() % size_of::<T>() != 0 {
        return Err(format!(
            "{} bytes is not a multiple of the {}-byte record size",
            bytes.len(),
            size_of::<T>()
        ));
    }
    Ok(bytes
        .chunks_exact(size_of::<T>())
        .map(bytemuck::pod_read_unaligned)
        .collect())
}

pub fn expect_exact_len(actual: usize, expected: usize) -> Result<(), String> {
    if actual == expected {
        Ok(())
    } else {
        Err(format!("expected {expected} bytes, got {actual}"))
    }
}

#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireCount {
    pub n_le: u64, // count of following bytes or records
}
impl WireCount {
    pub fn new(n: usize) -> Self {
        Self {
            n_le: (n as u64).to_le(),
        }
    }
    pub fn get(&self) -> usize {
        u64::from_le(self.n_le) as usize
    }
}

/// One object request or obligation: global id plus the partition it is
/// requested for.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct WireRequest {
    pub gid_le: u64,
    pub part_le: u64,
}
impl WireRequest {
    pub const SIZE: usize = 16;
    pub fn new(gid: u64, part: usize) -> Self {
        Self {
            gid_le: gid.to_le(),
            part_le: (part as u64).to_le(),
        }
    }
    pub fn gid(&self) -> u64 {
        u64::from_le(self.gid_le)
    }
    pub fn part(&self) -> usize {
        u64::from_le(self.part_le) as usize
    }
}

// ===== Compile-time sanity checks =========================================

const_assert_eq!(size_of::<WireCount>(), 8);
const_assert_eq!(size_of::<WireRequest>(), WireRequest::SIZE);
const_assert_eq!(size_of::<u32>(), WIRE_UINT);
const_assert_eq!(size_of::<u64>(), WIRE_GID);
const_assert_eq!(size_of::<f64>(), WIRE_REAL);

/// Convert an index or count to its `u32` wire field.
pub fn to_wire_uint(field: &'static str, value: usize) -> Result<u32, MeshMigrateError> {
    value.to_u32().ok_or(MeshMigrateError::WireValueOverflow {
        field,
        value: value as u64,
    })
}

/// Bounds-checked little-endian writer over a preallocated byte slice.
pub struct WireWriter<'a> {
    buf: &'a mut [u8],
    offset: usize,
}

impl<'a> WireWriter<'a> {
    pub fn new(buf: &'a mut [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    /// Bytes written so far.
    pub fn position(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }

    fn reserve(&mut self, needed: usize) -> Result<&mut [u8], MeshMigrateError> {
        if needed > self.remaining() {
            return Err(MeshMigrateError::WireOverrun {
                offset: self.offset,
                needed,
                capacity: self.buf.len(),
            });
        }
        let start = self.offset;
        self.offset += needed;
        Ok(&mut self.buf[start..start + needed])
    }

    pub fn put_u32(&mut self, v: u32) -> Result<(), MeshMigrateError> {
        self.reserve(WIRE_UINT)?.put_u32_le(v);
        Ok(())
    }

    pub fn put_u64(&mut self, v: u64) -> Result<(), MeshMigrateError> {
        self.reserve(WIRE_GID)?.put_u64_le(v);
        Ok(())
    }

    pub fn put_f64(&mut self, v: f64) -> Result<(), MeshMigrateError> {
        self.reserve(WIRE_REAL)?.put_f64_le(v);
        Ok(())
    }

    pub fn put_bool(&mut self, v: bool) -> Result<(), MeshMigrateError> {
        self.reserve(WIRE_BOOL)?.put_u8(v as u8);
        Ok(())
    }

    /// Write an index/count as `u32`, failing if it does not fit.
    pub fn put_uint(&mut self, field: &'static str, v: usize) -> Result<(), MeshMigrateError> {
        let v = to_wire_uint(field, v)?;
        self.put_u32(v)
    }
}

/// Bounds-checked little-endian reader over one message.
pub struct WireReader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }

    fn take(&mut self, needed: usize) -> Result<&'a [u8], MeshMigrateError> {
        if needed > self.remaining() {
            return Err(MeshMigrateError::WireUnderrun {
                offset: self.offset,
                needed,
                len: self.buf.len(),
            });
        }
        let start = self.offset;
        self.offset += needed;
        Ok(&self.buf[start..start + needed])
    }

    pub fn get_u32(&mut self) -> Result<u32, MeshMigrateError> {
        Ok(self.take(WIRE_UINT)?.get_u32_le())
    }

    pub fn get_u64(&mut self) -> Result<u64, MeshMigrateError> {
        Ok(self.take(WIRE_GID)?.get_u64_le())
    }

    pub fn get_f64(&mut self) -> Result<f64, MeshMigrateError> {
        Ok(self.take(WIRE_REAL)?.get_f64_le())
    }

    pub fn get_bool(&mut self) -> Result<bool, MeshMigrateError> {
        Ok(self.take(WIRE_BOOL)?.get_u8() != 0)
    }

    pub fn get_uint(&mut self) -> Result<usize, MeshMigrateError> {
        self.get_u32().map(|v| v as usize)
    }

    /// Borrow the next `n` raw bytes.
    pub fn get_bytes(&mut self, n: usize) -> Result<&'a [u8], MeshMigrateError> {
        self.take(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writer_reader_roundtrip() {
        let mut buf = vec![0u8; WIRE_UINT + WIRE_BOOL + WIRE_GID + WIRE_REAL];
        let mut w = WireWriter::new(&mut buf);
        w.put_u32(3).unwrap();
        w.put_bool(true).unwrap();
        w.put_u64(1 << 40).unwrap();
        w.put_f64(-2.5).unwrap();
        assert_eq!(w.remaining(), 0);

        let mut r = WireReader::new(&buf);
        assert_eq!(r.get_u32().unwrap(), 3);
        assert!(r.get_bool().unwrap());
        assert_eq!(r.get_u64().unwrap(), 1 << 40);
        assert_eq!(r.get_f64().unwrap(), -2.5);
        assert_eq!(r.position(), buf.len());
    }

    #[test]
    fn layout_is_little_endian_and_unpadded() {
        let mut buf = vec![0u8; 5];
        let mut w = WireWriter::new(&mut buf);
        w.put_u32(0x0102_0304).unwrap();
        w.put_bool(true).unwrap();
        assert_eq!(buf, vec![4, 3, 2, 1, 1]);
    }

    #[test]
    fn overrun_and_underrun_fail_loudly() {
        let mut buf = vec![0u8; 6];
        let mut w = WireWriter::new(&mut buf);
        w.put_u32(1).unwrap();
        assert_eq!(
            w.put_u64(2),
            Err(MeshMigrateError::WireOverrun {
                offset: 4,
                needed: 8,
                capacity: 6
            })
        );
        let mut r = WireReader::new(&buf[..3]);
        assert!(matches!(
            r.get_u32(),
            Err(MeshMigrateError::WireUnderrun { .. })
        ));
    }

    #[test]
    fn request_record_roundtrip() {
        let v = vec![WireRequest::new(12, 3), WireRequest::new(7, 0)];
        let bytes = cast_slice(&v).to_vec();
        let out: Vec<WireRequest> = records_from_bytes(&bytes).unwrap();
        assert_eq!((out[0].gid(), out[0].part()), (12, 3));
        assert_eq!((out[1].gid(), out[1].part()), (7, 0));
        assert!(records_from_bytes::<WireRequest>(&bytes[..5]).is_err());
    }

    #[test]
    fn uint_overflow_is_reported() {
        if usize::BITS > 32 {
            assert!(to_wire_uint("count", (u32::MAX as usize) + 1).is_err());
        }
        assert_eq!(to_wire_uint("count", 5).unwrap(), 5);
    }
}
