//! Method table for dispatching requests by ordinal.
//!
//! Each ordinal maps to one handler. Handlers are typed at registration
//! time: the wrapper decodes the request payload into the handler's
//! argument type and encodes its return value as the response payload.
//!
//! # Example
//!
//! ```ignore
//! let mut registry = MethodRegistry::new();
//! registry.register(0, TypedHandler::new(|req: EchoRequest| async move {
//!     Ok(EchoResponse { value: req.value })
//! }));
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

use tracing::warn;

use crate::bindings::{Message, MessageHeader, WireStruct};
use crate::error::{Result, ValidationError};

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Builds the response message once the response header is known.
pub type ReplyEncoder = Box<dyn FnOnce(&MessageHeader) -> Message + Send>;

/// Result of running a handler: `Some` carries the reply for methods with
/// a response.
pub type HandlerResult = Result<Option<ReplyEncoder>>;

/// Whether a method answers its requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    /// Fire-and-forget; requests carry no request id.
    OneWay,
    /// Requests expect exactly one response with the same request id.
    WithResponse,
}

impl ResponseMode {
    /// True if a header's flags fit this mode.
    pub fn accepts(&self, header: &MessageHeader) -> bool {
        match self {
            ResponseMode::OneWay => !header.expects_response() && !header.is_response(),
            ResponseMode::WithResponse => header.expects_response(),
        }
    }
}

/// Trait for method handlers.
pub trait Handler: Send + Sync + 'static {
    fn mode(&self) -> ResponseMode;

    /// Decodes `message` and starts the handler. Decoding happens before
    /// the future is returned so validation failures are told apart from
    /// handler failures.
    fn call(
        &self,
        message: Message,
    ) -> std::result::Result<BoxFuture<'static, HandlerResult>, ValidationError>;
}

/// Handler for a method with a response.
pub struct TypedHandler<F, Req, Resp, Fut>
where
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Req: WireStruct + Send + 'static,
    Resp: WireStruct + Send + 'static,
    Fut: Future<Output = Result<Resp>> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn(Req) -> (Resp, Fut)>,
}

impl<F, Req, Resp, Fut> TypedHandler<F, Req, Resp, Fut>
where
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Req: WireStruct + Send + 'static,
    Resp: WireStruct + Send + 'static,
    Fut: Future<Output = Result<Resp>> + Send + 'static,
{
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, Req, Resp, Fut> Handler for TypedHandler<F, Req, Resp, Fut>
where
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Req: WireStruct + Send + 'static,
    Resp: WireStruct + Send + 'static,
    Fut: Future<Output = Result<Resp>> + Send + 'static,
{
    fn mode(&self) -> ResponseMode {
        ResponseMode::WithResponse
    }

    fn call(
        &self,
        message: Message,
    ) -> std::result::Result<BoxFuture<'static, HandlerResult>, ValidationError> {
        let request: Req = message.decode_payload()?;
        let fut = (self.handler)(request);
        Ok(Box::pin(async move {
            let response = fut.await?;
            let reply: ReplyEncoder =
                Box::new(move |header: &MessageHeader| Message::encode(header, response));
            Ok(Some(reply))
        }))
    }
}

/// Handler for a fire-and-forget method.
pub struct OneWayHandler<F, Req, Fut>
where
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Req: WireStruct + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn(Req) -> Fut>,
}

impl<F, Req, Fut> OneWayHandler<F, Req, Fut>
where
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Req: WireStruct + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, Req, Fut> Handler for OneWayHandler<F, Req, Fut>
where
    F: Fn(Req) -> Fut + Send + Sync + 'static,
    Req: WireStruct + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn mode(&self) -> ResponseMode {
        ResponseMode::OneWay
    }

    fn call(
        &self,
        message: Message,
    ) -> std::result::Result<BoxFuture<'static, HandlerResult>, ValidationError> {
        let request: Req = message.decode_payload()?;
        let fut = (self.handler)(request);
        Ok(Box::pin(async move {
            fut.await?;
            Ok(None)
        }))
    }
}

/// Registry mapping ordinals to handlers.
#[derive(Default)]
pub struct MethodRegistry {
    methods: HashMap<u32, Box<dyn Handler>>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `ordinal`, replacing any earlier entry.
    pub fn register<H: Handler>(&mut self, ordinal: u32, handler: H) {
        if self.methods.insert(ordinal, Box::new(handler)).is_some() {
            warn!(ordinal, "method registered twice, keeping the newer handler");
        }
    }

    pub fn get(&self, ordinal: u32) -> Option<&dyn Handler> {
        self.methods.get(&ordinal).map(|h| h.as_ref())
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl std::fmt::Debug for MethodRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ordinals: Vec<_> = self.methods.keys().copied().collect();
        ordinals.sort_unstable();
        f.debug_struct("MethodRegistry")
            .field("ordinals", &ordinals)
            .finish()
    }
}
