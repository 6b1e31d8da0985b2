//! Depth-first encoder for the binary wire layout.
//!
//! Objects are appended to one growing buffer in the order they are
//! encoded. Every object starts on an 8-byte boundary and is zero padded,
//! so absent fields, null pointers and null unions need no explicit write.

use super::types::{Slot, WireStruct, WireType, WireUnion};
use crate::system::Handle;

/// Size of a struct or array header.
pub const DATA_HEADER_SIZE: usize = 8;

/// Size of an inline union slot.
pub const UNION_SIZE: usize = 16;

/// Wire index written for an absent handle.
pub const INVALID_HANDLE_INDEX: u32 = u32::MAX;

#[inline]
pub(crate) fn align8(n: usize) -> usize {
    (n + 7) & !7
}

/// Number of bytes `count` elements of `bits` bits occupy.
#[inline]
pub(crate) fn packed_len(count: usize, bits: usize) -> usize {
    (count * bits + 7) / 8
}

/// Serializes values into bytes plus the handles they carry.
#[derive(Debug, Default)]
pub struct Encoder {
    buf: Vec<u8>,
    handles: Vec<Handle>,
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            buf: Vec::with_capacity(bytes),
            handles: Vec::new(),
        }
    }

    /// Bytes encoded so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Appends a zeroed object of `size` bytes (rounded up to 8) and returns
    /// its offset.
    pub fn claim(&mut self, size: usize) -> usize {
        let offset = self.buf.len();
        self.buf.resize(offset + align8(size), 0);
        offset
    }

    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) {
        self.buf[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    pub fn write_u32(&mut self, offset: usize, value: u32) {
        self.write_bytes(offset, &value.to_le_bytes());
    }

    pub fn write_u64(&mut self, offset: usize, value: u64) {
        self.write_bytes(offset, &value.to_le_bytes());
    }

    pub fn set_bit(&mut self, offset: usize, bit: u8, value: bool) {
        let mask = 1u8 << bit;
        if value {
            self.buf[offset] |= mask;
        } else {
            self.buf[offset] &= !mask;
        }
    }

    /// Stores at `slot` the distance to the object at `target`.
    pub fn write_pointer(&mut self, slot: usize, target: usize) {
        debug_assert!(target > slot, "pointers only point forward");
        self.write_u64(slot, (target - slot) as u64);
    }

    /// Attaches `handle` to the message and returns its wire index.
    pub fn add_handle(&mut self, handle: Handle) -> u32 {
        let index = self.handles.len() as u32;
        self.handles.push(handle);
        index
    }

    /// Encodes `value` with its newest layout and returns its offset.
    pub fn encode_struct<S: WireStruct>(&mut self, value: S) -> usize {
        let (version, num_bytes) = newest_version(S::VERSIONS);
        let offset = self.claim(num_bytes as usize);
        self.write_u32(offset, num_bytes);
        self.write_u32(offset + 4, version);
        value.encode_fields(&mut StructEncoder {
            encoder: self,
            base: offset,
        });
        offset
    }

    /// Encodes `items` as an array and returns its offset.
    pub fn encode_array<T: WireType>(&mut self, items: Vec<T>) -> usize {
        let count = items.len();
        let num_bytes = DATA_HEADER_SIZE + packed_len(count, T::SLOT_BITS);
        let offset = self.claim(num_bytes);
        self.write_u32(offset, num_bytes as u32);
        self.write_u32(offset + 4, count as u32);

        let data = offset + DATA_HEADER_SIZE;
        for (i, item) in items.into_iter().enumerate() {
            let bit_pos = i * T::SLOT_BITS;
            item.encode(
                self,
                Slot {
                    offset: data + bit_pos / 8,
                    bit: (bit_pos % 8) as u8,
                },
            );
        }
        offset
    }

    /// Encodes a byte array in one copy. Same layout as `encode_array` over
    /// `u8`.
    pub fn encode_byte_array(&mut self, bytes: &[u8]) -> usize {
        let num_bytes = DATA_HEADER_SIZE + bytes.len();
        let offset = self.claim(num_bytes);
        self.write_u32(offset, num_bytes as u32);
        self.write_u32(offset + 4, bytes.len() as u32);
        self.write_bytes(offset + DATA_HEADER_SIZE, bytes);
        offset
    }

    /// Writes `value` into the 16-byte union slot at `offset`.
    pub fn encode_union_inline<U: WireUnion>(&mut self, value: U, offset: usize) {
        self.write_u32(offset, UNION_SIZE as u32);
        self.write_u32(offset + 4, value.tag());
        value.encode_member(self, Slot::at(offset + 8));
    }

    /// Writes `value` out of line and points `slot` at it. Used for a union
    /// nested directly inside another union.
    pub fn encode_union_pointer<U: WireUnion>(&mut self, value: U, slot: usize) {
        let target = self.claim(UNION_SIZE);
        self.encode_union_inline(value, target);
        self.write_pointer(slot, target);
    }

    pub fn into_parts(self) -> (Vec<u8>, Vec<Handle>) {
        (self.buf, self.handles)
    }
}

pub(crate) fn newest_version(versions: &[(u32, u32)]) -> (u32, u32) {
    versions
        .last()
        .copied()
        .unwrap_or((0, DATA_HEADER_SIZE as u32))
}

/// Field writer handed to [`WireStruct::encode_fields`]. Offsets are
/// relative to the start of the struct, header included.
pub struct StructEncoder<'a> {
    encoder: &'a mut Encoder,
    base: usize,
}

impl StructEncoder<'_> {
    pub fn put<T: WireType>(&mut self, offset: usize, value: T) {
        value.encode(self.encoder, Slot::at(self.base + offset));
    }

    pub fn put_bool(&mut self, offset: usize, bit: u8, value: bool) {
        self.encoder.set_bit(self.base + offset, bit, value);
    }

    /// Absolute offset of a field, for hand-written encodings.
    pub fn field_offset(&self, offset: usize) -> usize {
        self.base + offset
    }

    pub fn encoder(&mut self) -> &mut Encoder {
        self.encoder
    }
}
