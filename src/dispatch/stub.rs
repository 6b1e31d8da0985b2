//! Server side of a message pipe.

use std::future::Future;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error};

use super::registry::{MethodRegistry, OneWayHandler, ResponseMode, TypedHandler};
use super::{read_message, write_message, ApplicationError};
use crate::bindings::{Message, MessageHeader, WireStruct};
use crate::error::{CapwireError, Result, ValidationError};
use crate::system::{MessagePipeHandle, RawHandle};

/// Where a stub is in its serve cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StubState {
    Idle,
    ReadPending,
    Decoding,
    Dispatching,
    EncodingResponse,
    WritePending,
    Closed,
}

/// Builder for [`Stub`].
///
/// # Example
///
/// ```ignore
/// let stub = StubBuilder::new()
///     .method(0, |req: AddRequest| async move { Ok(AddResponse { sum: req.a + req.b }) })
///     .one_way(1, |msg: LogRequest| async move { Ok(()) })
///     .build(pipe);
/// stub.serve().await?;
/// ```
#[derive(Debug, Default)]
pub struct StubBuilder {
    registry: MethodRegistry,
}

impl StubBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a method that answers each request.
    pub fn method<F, Req, Resp, Fut>(mut self, ordinal: u32, handler: F) -> Self
    where
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Req: WireStruct + Send + 'static,
        Resp: WireStruct + Send + 'static,
        Fut: Future<Output = Result<Resp>> + Send + 'static,
    {
        self.registry.register(ordinal, TypedHandler::new(handler));
        self
    }

    /// Registers a fire-and-forget method.
    pub fn one_way<F, Req, Fut>(mut self, ordinal: u32, handler: F) -> Self
    where
        F: Fn(Req) -> Fut + Send + Sync + 'static,
        Req: WireStruct + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.registry.register(ordinal, OneWayHandler::new(handler));
        self
    }

    /// Binds the method table to `pipe`.
    pub fn build(self, pipe: MessagePipeHandle) -> Stub {
        Stub {
            pipe,
            registry: Arc::new(self.registry),
            state: StubState::Idle,
        }
    }
}

/// Serves requests arriving on one pipe.
#[derive(Debug)]
pub struct Stub {
    pipe: MessagePipeHandle,
    registry: Arc<MethodRegistry>,
    state: StubState,
}

impl Stub {
    pub fn builder() -> StubBuilder {
        StubBuilder::new()
    }

    pub fn state(&self) -> StubState {
        self.state
    }

    pub fn pipe(&self) -> &MessagePipeHandle {
        &self.pipe
    }

    pub(crate) fn pipe_raw(&self) -> RawHandle {
        self.pipe.raw()
    }

    /// Reads, validates and answers one request.
    ///
    /// Any error leaves the stub closed, except an application error from a
    /// method with a response, which goes back to the caller as an error
    /// response.
    pub async fn serve_request(&mut self) -> Result<()> {
        if self.state == StubState::Closed {
            return Err(CapwireError::Cancelled);
        }
        let result = self.serve_one().await;
        self.state = match result {
            Ok(()) => StubState::Idle,
            Err(_) => StubState::Closed,
        };
        result
    }

    async fn serve_one(&mut self) -> Result<()> {
        self.state = StubState::ReadPending;
        let message = read_message(&self.pipe).await?;

        self.state = StubState::Decoding;
        let header = message.header()?;
        let handler = self
            .registry
            .get(header.ordinal)
            .ok_or(ValidationError::MessageHeaderUnknownMethod(header.ordinal))?;
        let mode = handler.mode();
        if !mode.accepts(&header) {
            return Err(ValidationError::MessageHeaderInvalidFlags.into());
        }
        let fut = handler.call(message)?;

        self.state = StubState::Dispatching;
        let outcome = fut.await;

        let response = match (mode, outcome) {
            (ResponseMode::OneWay, outcome) => return outcome.map(|_| ()),
            (ResponseMode::WithResponse, Ok(Some(reply))) => {
                self.state = StubState::EncodingResponse;
                reply(&MessageHeader::response(header.ordinal, header.request_id))
            }
            (ResponseMode::WithResponse, Ok(None)) => return Ok(()),
            (ResponseMode::WithResponse, Err(CapwireError::Application { code, message })) => {
                self.state = StubState::EncodingResponse;
                debug!(ordinal = header.ordinal, code, "handler returned an application error");
                Message::encode(
                    &MessageHeader::error_response(header.ordinal, header.request_id),
                    ApplicationError { code, message },
                )
            }
            (ResponseMode::WithResponse, Err(err)) => return Err(err),
        };

        self.state = StubState::WritePending;
        write_message(&self.pipe, response)
    }

    /// Serves requests until the pipe closes or a request fails.
    ///
    /// A peer close or a local close ends the loop with `Ok`.
    pub async fn serve(mut self) -> Result<()> {
        loop {
            match self.serve_request().await {
                Ok(()) => {}
                Err(err) if err.is_benign_close() => {
                    debug!(pipe = self.pipe.raw(), reason = %err, "stub loop ended");
                    return Ok(());
                }
                Err(err) => {
                    error!(pipe = self.pipe.raw(), error = %err, "stub loop failed");
                    return Err(err);
                }
            }
        }
    }

    /// Runs [`Stub::serve`] on its own task.
    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.serve())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bindings::{StructDecoder, StructEncoder};
    use crate::error::SystemError;
    use crate::system::Core;

    #[derive(Debug, PartialEq)]
    struct Num(u32);

    impl WireStruct for Num {
        const VERSIONS: &'static [(u32, u32)] = &[(0, 16)];

        fn encode_fields(self, fields: &mut StructEncoder<'_>) {
            fields.put(8, self.0);
        }

        fn decode_fields(fields: &mut StructDecoder<'_>) -> std::result::Result<Self, ValidationError> {
            Ok(Num(fields.get(8)?))
        }
    }

    #[derive(Debug)]
    struct Carry(MessagePipeHandle);

    impl WireStruct for Carry {
        const VERSIONS: &'static [(u32, u32)] = &[(0, 16)];

        fn encode_fields(self, fields: &mut StructEncoder<'_>) {
            fields.put(8, self.0);
        }

        fn decode_fields(fields: &mut StructDecoder<'_>) -> std::result::Result<Self, ValidationError> {
            Ok(Carry(fields.get(8)?))
        }
    }

    fn doubling_stub(pipe: MessagePipeHandle) -> Stub {
        StubBuilder::new()
            .method(1, |n: Num| async move {
                if n.0 == 0 {
                    return Err(CapwireError::Application {
                        code: 22,
                        message: "zero".to_string(),
                    });
                }
                Ok(Num(n.0 * 2))
            })
            .one_way(2, |_n: Num| async { Ok(()) })
            .build(pipe)
    }

    #[tokio::test]
    async fn test_serve_request_answers() {
        let core = Core::new();
        let (client, server) = core.create_message_pipe().unwrap();
        let mut stub = doubling_stub(server);
        assert_eq!(stub.state(), StubState::Idle);

        write_message(&client, Message::encode(&MessageHeader::request(1, 77), Num(4))).unwrap();
        stub.serve_request().await.unwrap();
        assert_eq!(stub.state(), StubState::Idle);

        let response = read_message(&client).await.unwrap();
        let header = response.header().unwrap();
        assert_eq!(header, MessageHeader::response(1, 77));
        assert_eq!(response.decode_payload::<Num>(), Ok(Num(8)));
    }

    #[tokio::test]
    async fn test_application_error_keeps_stub_open() {
        let core = Core::new();
        let (client, server) = core.create_message_pipe().unwrap();
        let mut stub = doubling_stub(server);

        write_message(&client, Message::encode(&MessageHeader::request(1, 5), Num(0))).unwrap();
        stub.serve_request().await.unwrap();
        assert_eq!(stub.state(), StubState::Idle);

        let response = read_message(&client).await.unwrap();
        let header = response.header().unwrap();
        assert!(header.is_error());
        assert_eq!(header.request_id, 5);
        let payload: ApplicationError = response.decode_payload().unwrap();
        assert_eq!(payload.code, 22);
    }

    #[tokio::test]
    async fn test_unknown_method_closes_stub() {
        let core = Core::new();
        let (client, server) = core.create_message_pipe().unwrap();
        let mut stub = doubling_stub(server);

        write_message(&client, Message::encode(&MessageHeader::new(9), Num(1))).unwrap();
        assert_eq!(
            stub.serve_request().await,
            Err(ValidationError::MessageHeaderUnknownMethod(9).into())
        );
        assert_eq!(stub.state(), StubState::Closed);
        assert_eq!(stub.serve_request().await, Err(CapwireError::Cancelled));
    }

    #[tokio::test]
    async fn test_flags_must_match_method() {
        let core = Core::new();
        let (client, server) = core.create_message_pipe().unwrap();
        let mut stub = doubling_stub(server);

        // One-way message for a method with a response.
        write_message(&client, Message::encode(&MessageHeader::new(1), Num(1))).unwrap();
        assert_eq!(
            stub.serve_request().await,
            Err(ValidationError::MessageHeaderInvalidFlags.into())
        );

        let (client, server) = core.create_message_pipe().unwrap();
        let mut stub = doubling_stub(server);
        // Request with a request id for a one-way method.
        write_message(&client, Message::encode(&MessageHeader::request(2, 3), Num(1))).unwrap();
        assert_eq!(
            stub.serve_request().await,
            Err(ValidationError::MessageHeaderInvalidFlags.into())
        );
    }

    #[tokio::test]
    async fn test_serve_ends_ok_on_peer_close() {
        let core = Core::new();
        let (client, server) = core.create_message_pipe().unwrap();
        let task = doubling_stub(server).spawn();

        write_message(&client, Message::encode(&MessageHeader::new(2), Num(1))).unwrap();
        drop(client);
        assert_eq!(task.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn test_serve_surfaces_validation_failure() {
        let core = Core::new();
        let (client, server) = core.create_message_pipe().unwrap();
        let task = doubling_stub(server).spawn();

        client.write_message(&[1, 2, 3], Vec::new()).unwrap();
        assert_eq!(
            task.await.unwrap(),
            Err(ValidationError::IllegalMemoryRange.into())
        );
    }

    #[tokio::test]
    async fn test_serve_surfaces_foreign_handle_in_response() {
        let core = Core::new();
        let other = Core::new();
        let (client, server) = core.create_message_pipe().unwrap();
        let task = StubBuilder::new()
            .method(1, move |_n: Num| {
                let other = other.clone();
                async move {
                    let (end, _peer) = other.create_message_pipe()?;
                    Ok::<_, CapwireError>(Carry(end))
                }
            })
            .build(server)
            .spawn();

        write_message(&client, Message::encode(&MessageHeader::request(1, 4), Num(1))).unwrap();
        let result = task.await.unwrap();
        assert_eq!(result, Err(CapwireError::System(SystemError::InvalidArgument)));
    }
}
