//! # capwire
//!
//! Capability-style IPC in one process: a handle kernel, a validating
//! binary wire codec and stub/proxy RPC dispatch on top of both.
//!
//! ## Layers
//!
//! - **System** ([`system`]): a [`Core`] owns a table of handles to message
//!   pipes, data pipes and shared buffers, plus the signal/wait machinery.
//! - **Bindings** ([`bindings`]): the struct/array/union/handle layout and a
//!   decoder that rejects any malformed input before building a value.
//! - **Dispatch** ([`dispatch`]): a [`Stub`] serves a pipe through a method
//!   table; a [`Proxy`] sends calls and matches responses by request id.
//!
//! ## Example
//!
//! ```ignore
//! use capwire::{Core, Proxy, StubBuilder};
//!
//! #[tokio::main]
//! async fn main() -> capwire::Result<()> {
//!     let core = Core::new();
//!     let (client, server) = core.create_message_pipe()?;
//!
//!     StubBuilder::new()
//!         .method(0, |req: EchoRequest| async move { Ok(EchoResponse { text: req.text }) })
//!         .build(server)
//!         .spawn();
//!
//!     let proxy = Proxy::new(client);
//!     let reply: EchoResponse = proxy.call(0, EchoRequest { text: "hi".into() }).await?;
//!     Ok(())
//! }
//! ```

pub mod bindings;
pub mod dispatch;
pub mod error;
pub mod system;

pub use bindings::{Message, MessageHeader, WireStruct, WireType, WireUnion};
pub use dispatch::{ApplicationError, Proxy, Stub, StubBuilder, StubSet};
pub use error::{CapwireError, Result, SystemError, SystemResult, ValidationError};
pub use system::{
    Core, CoreBuilder, CoreConfig, DataPipeConsumerHandle, DataPipeProducerHandle, Handle,
    HandleSignals, HandleSignalsState, MessagePipeHandle, SharedBufferHandle,
};
