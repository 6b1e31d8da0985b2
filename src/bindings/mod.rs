//! Wire codec.
//!
//! - [`Encoder`] / [`Decoder`]: the depth-first object layout and its
//!   validating reader
//! - [`WireType`], [`WireStruct`], [`WireUnion`]: how values map onto it
//! - [`Message`] / [`MessageHeader`]: framing for stub/proxy traffic
//! - [`parse_validation_input`]: the textual format used by validation
//!   corpora

mod decoder;
mod encoder;
mod message;
mod types;
mod validation_input;

pub use decoder::{Decoder, StructDecoder};
pub use encoder::{Encoder, StructEncoder, DATA_HEADER_SIZE, INVALID_HANDLE_INDEX, UNION_SIZE};
pub use message::{
    flags, Message, MessageHeader, MESSAGE_HEADER_V0_SIZE, MESSAGE_HEADER_V1_SIZE,
    MESSAGE_HEADER_VERSIONS,
};
pub use types::{Nullable, Slot, WireStruct, WireType, WireUnion};
pub use validation_input::{parse_validation_input, InputParseError, ValidationInput};
