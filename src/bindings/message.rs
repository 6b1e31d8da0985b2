//! Message framing.
//!
//! Every message starts with a struct-shaped header:
//! ```text
//! ┌───────────┬─────────┬─────────┬─────────┬──────────────────┐
//! │ num_bytes │ version │ ordinal │ flags   │ request_id       │
//! │ u32 LE    │ u32 LE  │ u32 LE  │ u32 LE  │ u64 LE (v1 only) │
//! └───────────┴─────────┴─────────┴─────────┴──────────────────┘
//! ```
//! Version 0 (16 bytes) carries no request id; version 1 (24 bytes) does.
//! The payload struct follows immediately after the header.

use super::decoder::{check_struct_version, Decoder};
use super::encoder::Encoder;
use super::types::WireStruct;
use crate::error::{SystemResult, ValidationError};
use crate::system::{Handle, MessagePipeHandle};

/// Header size without a request id.
pub const MESSAGE_HEADER_V0_SIZE: u32 = 16;

/// Header size with a request id.
pub const MESSAGE_HEADER_V1_SIZE: u32 = 24;

/// Known header layouts, oldest first.
pub const MESSAGE_HEADER_VERSIONS: &[(u32, u32)] =
    &[(0, MESSAGE_HEADER_V0_SIZE), (1, MESSAGE_HEADER_V1_SIZE)];

/// Header flag bits.
pub mod flags {
    /// Request that wants a response.
    pub const EXPECTS_RESPONSE: u32 = 1 << 0;
    /// Response to an earlier request.
    pub const IS_RESPONSE: u32 = 1 << 1;
    /// Response carrying an application error. Only valid with IS_RESPONSE.
    pub const IS_ERROR: u32 = 1 << 2;

    #[inline]
    pub fn has_flag(flags: u32, flag: u32) -> bool {
        flags & flag != 0
    }
}

/// Decoded message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub version: u32,
    /// Method or message-shape identifier.
    pub ordinal: u32,
    pub flags: u32,
    /// Zero on version 0 headers.
    pub request_id: u64,
}

impl MessageHeader {
    /// One-way message header (version 0).
    pub fn new(ordinal: u32) -> Self {
        Self {
            version: 0,
            ordinal,
            flags: 0,
            request_id: 0,
        }
    }

    pub fn request(ordinal: u32, request_id: u64) -> Self {
        Self {
            version: 1,
            ordinal,
            flags: flags::EXPECTS_RESPONSE,
            request_id,
        }
    }

    pub fn response(ordinal: u32, request_id: u64) -> Self {
        Self {
            version: 1,
            ordinal,
            flags: flags::IS_RESPONSE,
            request_id,
        }
    }

    pub fn error_response(ordinal: u32, request_id: u64) -> Self {
        Self {
            version: 1,
            ordinal,
            flags: flags::IS_RESPONSE | flags::IS_ERROR,
            request_id,
        }
    }

    #[inline]
    pub fn expects_response(&self) -> bool {
        flags::has_flag(self.flags, flags::EXPECTS_RESPONSE)
    }

    #[inline]
    pub fn is_response(&self) -> bool {
        flags::has_flag(self.flags, flags::IS_RESPONSE)
    }

    #[inline]
    pub fn is_error(&self) -> bool {
        flags::has_flag(self.flags, flags::IS_ERROR)
    }

    /// Size this header occupies when encoded.
    pub fn encoded_size(&self) -> u32 {
        if self.version >= 1 {
            MESSAGE_HEADER_V1_SIZE
        } else {
            MESSAGE_HEADER_V0_SIZE
        }
    }

    pub fn encode_into(&self, encoder: &mut Encoder) {
        let size = self.encoded_size();
        let offset = encoder.claim(size as usize);
        encoder.write_u32(offset, size);
        encoder.write_u32(offset + 4, self.version);
        encoder.write_u32(offset + 8, self.ordinal);
        encoder.write_u32(offset + 12, self.flags);
        if self.version >= 1 {
            encoder.write_u64(offset + 16, self.request_id);
        }
    }

    /// Validates and parses the header at the start of `bytes`. Returns the
    /// header and its size on the wire.
    pub fn parse(bytes: &[u8]) -> Result<(Self, usize), ValidationError> {
        let u32_at = |at: usize| -> Result<u32, ValidationError> {
            bytes
                .get(at..at + 4)
                .and_then(|b| b.try_into().ok())
                .map(u32::from_le_bytes)
                .ok_or(ValidationError::IllegalMemoryRange)
        };

        let num_bytes = u32_at(0)?;
        let version = u32_at(4)?;
        if num_bytes < MESSAGE_HEADER_V0_SIZE {
            return Err(ValidationError::UnexpectedStructHeader);
        }
        if num_bytes as usize > bytes.len() {
            return Err(ValidationError::IllegalMemoryRange);
        }
        check_struct_version(MESSAGE_HEADER_VERSIONS, version, num_bytes)?;

        let ordinal = u32_at(8)?;
        let flags = u32_at(12)?;
        let request_id = if version >= 1 {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[16..24]);
            u64::from_le_bytes(raw)
        } else {
            0
        };

        let request_flags = flags::EXPECTS_RESPONSE | flags::IS_RESPONSE;
        if version == 0 && flags & request_flags != 0 {
            return Err(ValidationError::MessageHeaderMissingRequestId);
        }
        if flags & request_flags == request_flags {
            return Err(ValidationError::MessageHeaderInvalidFlags);
        }
        if flags::has_flag(flags, flags::IS_ERROR) && !flags::has_flag(flags, flags::IS_RESPONSE) {
            return Err(ValidationError::MessageHeaderInvalidFlags);
        }

        let header = Self {
            version,
            ordinal,
            flags,
            request_id,
        };
        Ok((header, num_bytes as usize))
    }
}

/// An encoded message: bytes plus the handles it transfers.
#[derive(Debug, Default)]
pub struct Message {
    bytes: Vec<u8>,
    handles: Vec<Handle>,
}

impl Message {
    pub fn from_parts(bytes: Vec<u8>, handles: Vec<Handle>) -> Self {
        Self { bytes, handles }
    }

    /// Encodes `header` followed by `payload`.
    pub fn encode<P: WireStruct>(header: &MessageHeader, payload: P) -> Self {
        let mut encoder = Encoder::with_capacity(64);
        header.encode_into(&mut encoder);
        encoder.encode_struct(payload);
        let (bytes, handles) = encoder.into_parts();
        Self { bytes, handles }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn handles(&self) -> &[Handle] {
        &self.handles
    }

    /// Validated header.
    pub fn header(&self) -> Result<MessageHeader, ValidationError> {
        MessageHeader::parse(&self.bytes).map(|(header, _)| header)
    }

    /// Validates the whole message and builds the payload. Consumes the
    /// message, including its handles.
    pub fn decode_payload<P: WireStruct>(self) -> Result<P, ValidationError> {
        let (_, header_size) = MessageHeader::parse(&self.bytes)?;
        let mut decoder = Decoder::new(self.bytes, self.handles);
        decoder.claim_memory(0, header_size)?;
        decoder.decode_struct(header_size)
    }

    pub fn into_parts(self) -> (Vec<u8>, Vec<Handle>) {
        (self.bytes, self.handles)
    }

    /// Reads the next message from `pipe` without waiting.
    pub fn read_from(pipe: &MessagePipeHandle) -> SystemResult<Self> {
        let (bytes, handles) = pipe.read_message()?;
        Ok(Self { bytes, handles })
    }

    /// Writes this message to `pipe`. The handles are consumed either way.
    pub fn write_to(self, pipe: &MessagePipeHandle) -> SystemResult<()> {
        pipe.write_message(&self.bytes, self.handles)
    }
}
