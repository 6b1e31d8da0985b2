//! Stub/proxy dispatch over message pipes.
//!
//! A [`Stub`] serves one pipe: it reads requests, validates them against
//! the registered method table and writes responses. A [`Proxy`] owns the
//! other end: it sends requests and matches responses to callers by
//! request id.

mod proxy;
mod registry;
mod stub;
mod stub_set;

pub use proxy::Proxy;
pub use registry::{
    BoxFuture, Handler, HandlerResult, MethodRegistry, OneWayHandler, ReplyEncoder, ResponseMode,
    TypedHandler,
};
pub use stub::{Stub, StubBuilder, StubState};
pub use stub_set::StubSet;

use crate::bindings::{Message, StructDecoder, StructEncoder, WireStruct};
use crate::error::{CapwireError, Result, SystemError, ValidationError};
use crate::system::{HandleSignals, MessagePipeHandle};

/// Maps a kernel failure on `pipe` to a connection error.
///
/// `FailedPrecondition` means the peer is gone. `Cancelled` means our own
/// end was closed during a wait. `InvalidArgument` counts as a local close
/// only if `pipe` itself is no longer valid; otherwise the request was bad.
pub(crate) fn connection_error(pipe: &MessagePipeHandle, err: SystemError) -> CapwireError {
    match err {
        SystemError::FailedPrecondition => CapwireError::PeerClosed,
        SystemError::Cancelled => CapwireError::Cancelled,
        SystemError::InvalidArgument if pipe.signals_state().is_err() => CapwireError::Cancelled,
        other => CapwireError::System(other),
    }
}

/// Reads the next message from `pipe`, waiting until one arrives.
pub async fn read_message(pipe: &MessagePipeHandle) -> Result<Message> {
    loop {
        match Message::read_from(pipe) {
            Ok(message) => return Ok(message),
            Err(SystemError::ShouldWait) => {
                pipe.wait_async(HandleSignals::READABLE)
                    .await
                    .map_err(|e| connection_error(pipe, e.error))?;
            }
            Err(err) => return Err(connection_error(pipe, err)),
        }
    }
}

/// Writes `message` to `pipe`.
pub fn write_message(pipe: &MessagePipeHandle, message: Message) -> Result<()> {
    message.write_to(pipe).map_err(|err| connection_error(pipe, err))
}

/// Payload of an error-flagged response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationError {
    pub code: u32,
    pub message: String,
}

impl WireStruct for ApplicationError {
    const VERSIONS: &'static [(u32, u32)] = &[(0, 24)];

    fn encode_fields(self, fields: &mut StructEncoder<'_>) {
        fields.put(8, self.code);
        fields.put(16, self.message);
    }

    fn decode_fields(fields: &mut StructDecoder<'_>) -> std::result::Result<Self, ValidationError> {
        Ok(Self {
            code: fields.get(8)?,
            message: fields.get(16)?,
        })
    }
}

impl From<ApplicationError> for CapwireError {
    fn from(err: ApplicationError) -> Self {
        CapwireError::Application {
            code: err.code,
            message: err.message,
        }
    }
}
