//! Validating decoder.
//!
//! Memory is claimed strictly front to back: every object must start at or
//! after the end of the previously claimed one. Together with forward-only
//! pointers this rules out overlaps and cycles, and keeps decoding linear in
//! the message size. Handle indices are claimed the same way.

use super::encoder::{packed_len, DATA_HEADER_SIZE, INVALID_HANDLE_INDEX, UNION_SIZE};
use super::types::{Slot, WireStruct, WireType, WireUnion};
use crate::error::ValidationError;
use crate::system::Handle;

type Result<T> = std::result::Result<T, ValidationError>;

/// Checks a struct header against the known `(version, num_bytes)` table.
///
/// A known version must have exactly its recorded size (an unlisted version
/// between two known ones takes the older entry). A version newer than any
/// known one must be at least as large as the newest layout.
pub(crate) fn check_struct_version(
    versions: &[(u32, u32)],
    version: u32,
    num_bytes: u32,
) -> Result<()> {
    let Some(&(newest_version, newest_size)) = versions.last() else {
        return Ok(());
    };
    if version <= newest_version {
        match versions.iter().rev().find(|(v, _)| *v <= version) {
            Some(&(_, size)) if size == num_bytes => Ok(()),
            _ => Err(ValidationError::UnexpectedStructHeader),
        }
    } else if num_bytes < newest_size {
        Err(ValidationError::UnexpectedStructHeader)
    } else {
        Ok(())
    }
}

/// Decodes one message's bytes and handles.
pub struct Decoder {
    buf: Vec<u8>,
    handles: Vec<Option<Handle>>,
    next_claim: usize,
    next_handle: usize,
}

impl Decoder {
    pub fn new(buf: Vec<u8>, handles: Vec<Handle>) -> Self {
        Self {
            buf,
            handles: handles.into_iter().map(Some).collect(),
            next_claim: 0,
            next_handle: 0,
        }
    }

    fn bytes_at(&self, offset: usize, len: usize) -> Result<&[u8]> {
        offset
            .checked_add(len)
            .and_then(|end| self.buf.get(offset..end))
            .ok_or(ValidationError::IllegalMemoryRange)
    }

    pub fn read_array<const N: usize>(&self, offset: usize) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.bytes_at(offset, N)?);
        Ok(out)
    }

    pub fn read_u8(&self, offset: usize) -> Result<u8> {
        self.read_array::<1>(offset).map(|b| b[0])
    }

    pub fn read_u32(&self, offset: usize) -> Result<u32> {
        self.read_array(offset).map(u32::from_le_bytes)
    }

    pub fn read_u64(&self, offset: usize) -> Result<u64> {
        self.read_array(offset).map(u64::from_le_bytes)
    }

    pub fn read_bit(&self, offset: usize, bit: u8) -> Result<bool> {
        self.read_u8(offset).map(|b| b & (1 << bit) != 0)
    }

    /// Claims `[offset, offset + size)` for one object.
    pub fn claim_memory(&mut self, offset: usize, size: usize) -> Result<()> {
        if offset % 8 != 0 {
            return Err(ValidationError::MisalignedObject);
        }
        if offset < self.next_claim {
            return Err(ValidationError::IllegalMemoryRange);
        }
        let end = offset
            .checked_add(size)
            .filter(|end| *end <= self.buf.len())
            .ok_or(ValidationError::IllegalMemoryRange)?;
        self.next_claim = end.saturating_add(7) & !7;
        Ok(())
    }

    /// Takes the handle at wire `index`. Indices must increase strictly in
    /// visit order.
    pub fn claim_handle(&mut self, index: u32) -> Result<Handle> {
        let index = index as usize;
        if index < self.next_handle || index >= self.handles.len() {
            return Err(ValidationError::IllegalHandle);
        }
        self.next_handle = index + 1;
        self.handles[index]
            .take()
            .ok_or(ValidationError::IllegalHandle)
    }

    /// Resolves the pointer stored at `slot`. `None` is the null pointer.
    pub fn decode_pointer(&self, slot: usize) -> Result<Option<usize>> {
        let relative = self.read_u64(slot)?;
        if relative == 0 {
            return Ok(None);
        }
        let target = (slot as u64)
            .checked_add(relative)
            .filter(|t| *t < self.buf.len() as u64)
            .ok_or(ValidationError::IllegalPointer)? as usize;
        if target % 8 != 0 {
            return Err(ValidationError::MisalignedObject);
        }
        Ok(Some(target))
    }

    /// True if the pointer at `slot` is null.
    pub fn is_null_pointer(&self, slot: usize) -> Result<bool> {
        Ok(self.read_u64(slot)? == 0)
    }

    /// Validates and claims the struct header at `offset`; returns
    /// `(num_bytes, version)`.
    pub fn claim_struct_header(
        &mut self,
        offset: usize,
        versions: &[(u32, u32)],
    ) -> Result<(u32, u32)> {
        if offset % 8 != 0 {
            return Err(ValidationError::MisalignedObject);
        }
        let num_bytes = self.read_u32(offset)?;
        let version = self.read_u32(offset + 4)?;
        if (num_bytes as usize) < DATA_HEADER_SIZE {
            return Err(ValidationError::UnexpectedStructHeader);
        }
        self.claim_memory(offset, num_bytes as usize)?;
        check_struct_version(versions, version, num_bytes)?;
        Ok((num_bytes, version))
    }

    pub fn decode_struct<S: WireStruct>(&mut self, offset: usize) -> Result<S> {
        let (num_bytes, version) = self.claim_struct_header(offset, S::VERSIONS)?;
        S::decode_fields(&mut StructDecoder {
            decoder: self,
            base: offset,
            num_bytes: num_bytes as usize,
            version,
        })
    }

    /// Claims the array header at `offset` and returns its element count.
    fn claim_array_header(
        &mut self,
        offset: usize,
        element_bits: usize,
        expected_len: Option<usize>,
    ) -> Result<usize> {
        if offset % 8 != 0 {
            return Err(ValidationError::MisalignedObject);
        }
        let num_bytes = self.read_u32(offset)? as u64;
        let count = self.read_u32(offset + 4)? as usize;
        let needed = DATA_HEADER_SIZE as u64 + (count as u64 * element_bits as u64 + 7) / 8;
        if num_bytes < needed {
            return Err(ValidationError::UnexpectedArrayHeader);
        }
        if expected_len.is_some_and(|n| n != count) {
            return Err(ValidationError::UnexpectedArrayHeader);
        }
        self.claim_memory(offset, num_bytes as usize)?;
        Ok(count)
    }

    /// Decodes the array at `offset`. `expected_len` enforces a fixed size.
    pub fn decode_array<T: WireType>(
        &mut self,
        offset: usize,
        expected_len: Option<usize>,
    ) -> Result<Vec<T>> {
        let count = self.claim_array_header(offset, T::SLOT_BITS, expected_len)?;
        let data = offset + DATA_HEADER_SIZE;
        let mut items = Vec::with_capacity(count);
        for i in 0..count {
            let bit_pos = i * T::SLOT_BITS;
            items.push(T::decode(
                self,
                Slot {
                    offset: data + bit_pos / 8,
                    bit: (bit_pos % 8) as u8,
                },
            )?);
        }
        Ok(items)
    }

    /// Decodes a byte array in one copy.
    pub fn decode_byte_array(&mut self, offset: usize) -> Result<Vec<u8>> {
        let count = self.claim_array_header(offset, 8, None)?;
        debug_assert_eq!(packed_len(count, 8), count);
        Ok(self.bytes_at(offset + DATA_HEADER_SIZE, count)?.to_vec())
    }

    /// Decodes the union slot at `offset`. `None` is the null union.
    pub fn decode_union_inline<U: WireUnion>(&mut self, offset: usize) -> Result<Option<U>> {
        let size = self.read_u32(offset)?;
        if size == 0 {
            return Ok(None);
        }
        if size as usize != UNION_SIZE {
            return Err(ValidationError::UnexpectedUnionSize);
        }
        let tag = self.read_u32(offset + 4)?;
        U::decode_member(self, tag, Slot::at(offset + 8)).map(Some)
    }

    /// Decodes a union stored out of line behind the pointer at `slot`.
    pub fn decode_union_pointer<U: WireUnion>(&mut self, slot: usize) -> Result<Option<U>> {
        let Some(target) = self.decode_pointer(slot)? else {
            return Ok(None);
        };
        self.claim_memory(target, UNION_SIZE)?;
        self.decode_union_inline(target)
    }

    /// True if the union slot at `offset` is null.
    pub fn is_null_union(&self, offset: usize) -> Result<bool> {
        Ok(self.read_u32(offset)? == 0)
    }

    /// True if the handle slot at `offset` holds the invalid index.
    pub fn is_null_handle(&self, offset: usize) -> Result<bool> {
        Ok(self.read_u32(offset)? == INVALID_HANDLE_INDEX)
    }
}

/// Field reader handed to [`WireStruct::decode_fields`].
///
/// Fields must be read in the order they were encoded.
pub struct StructDecoder<'a> {
    decoder: &'a mut Decoder,
    base: usize,
    num_bytes: usize,
    version: u32,
}

impl StructDecoder<'_> {
    /// Version found in the struct header.
    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn num_bytes(&self) -> usize {
        self.num_bytes
    }

    fn slot(&self, offset: usize, bits: usize) -> Result<Slot> {
        if offset + (bits + 7) / 8 > self.num_bytes {
            return Err(ValidationError::UnexpectedStructHeader);
        }
        Ok(Slot::at(self.base + offset))
    }

    pub fn get<T: WireType>(&mut self, offset: usize) -> Result<T> {
        let slot = self.slot(offset, T::SLOT_BITS)?;
        T::decode(self.decoder, slot)
    }

    pub fn get_bool(&mut self, offset: usize, bit: u8) -> Result<bool> {
        let slot = self.slot(offset, 1)?;
        self.decoder.read_bit(slot.offset, bit)
    }

    /// Reads a field added in `version`; `None` when the sender's layout is
    /// older.
    pub fn get_since<T: WireType>(&mut self, version: u32, offset: usize) -> Result<Option<T>> {
        if self.version < version {
            return Ok(None);
        }
        self.get(offset).map(Some)
    }

    pub fn decoder(&mut self) -> &mut Decoder {
        self.decoder
    }

    /// Absolute offset of a field, for hand-written decodings.
    pub fn field_offset(&self, offset: usize) -> usize {
        self.base + offset
    }
}
