//! The kernel object a handle value resolves to.

use std::sync::Arc;

use tracing::debug;

use super::awakable::Awakable;
use super::data_pipe::{DataPipeConsumer, DataPipeProducer};
use super::message_pipe::MessagePipeEndpoint;
use super::shared_buffer::SharedBufferDispatcher;
use super::signals::HandleSignalsState;

#[derive(Clone)]
pub(crate) enum Dispatcher {
    MessagePipe(MessagePipeEndpoint),
    DataPipeProducer(DataPipeProducer),
    DataPipeConsumer(DataPipeConsumer),
    SharedBuffer(SharedBufferDispatcher),
}

impl Dispatcher {
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Dispatcher::MessagePipe(_) => "message pipe",
            Dispatcher::DataPipeProducer(_) => "data pipe producer",
            Dispatcher::DataPipeConsumer(_) => "data pipe consumer",
            Dispatcher::SharedBuffer(_) => "shared buffer",
        }
    }

    pub(crate) fn signals_state(&self) -> HandleSignalsState {
        match self {
            Dispatcher::MessagePipe(d) => d.signals_state(),
            Dispatcher::DataPipeProducer(d) => d.signals_state(),
            Dispatcher::DataPipeConsumer(d) => d.signals_state(),
            Dispatcher::SharedBuffer(d) => d.signals_state(),
        }
    }

    pub(crate) fn add_awakable(&self, awakable: Arc<dyn Awakable>) -> usize {
        match self {
            Dispatcher::MessagePipe(d) => d.add_awakable(awakable),
            Dispatcher::DataPipeProducer(d) => d.add_awakable(awakable),
            Dispatcher::DataPipeConsumer(d) => d.add_awakable(awakable),
            Dispatcher::SharedBuffer(d) => d.add_awakable(awakable),
        }
    }

    pub(crate) fn remove_awakable(&self, key: usize) {
        match self {
            Dispatcher::MessagePipe(d) => d.remove_awakable(key),
            Dispatcher::DataPipeProducer(d) => d.remove_awakable(key),
            Dispatcher::DataPipeConsumer(d) => d.remove_awakable(key),
            Dispatcher::SharedBuffer(d) => d.remove_awakable(key),
        }
    }

    /// Wakes waiters registered on this side only. Used when the handle
    /// leaves the table so those waiters observe the cancellation.
    pub(crate) fn awake_self(&self) {
        match self {
            Dispatcher::MessagePipe(d) => d.awake_self(),
            Dispatcher::DataPipeProducer(d) => d.awake_self(),
            Dispatcher::DataPipeConsumer(d) => d.awake_self(),
            Dispatcher::SharedBuffer(d) => d.awake_self(),
        }
    }

    /// Closes the underlying object. Handles stranded in a message pipe
    /// queue are closed recursively.
    pub(crate) fn close(&self) {
        debug!(kind = self.kind(), "closing dispatcher");
        match self {
            Dispatcher::MessagePipe(d) => {
                for message in d.close() {
                    for stranded in message.dispatchers {
                        stranded.close();
                    }
                }
            }
            Dispatcher::DataPipeProducer(d) => d.close(),
            Dispatcher::DataPipeConsumer(d) => d.close(),
            Dispatcher::SharedBuffer(d) => d.close(),
        }
    }

    /// True if both refer to the same kernel object side.
    pub(crate) fn ptr_eq(&self, other: &Dispatcher) -> bool {
        match (self, other) {
            (Dispatcher::MessagePipe(a), Dispatcher::MessagePipe(b)) => a.ptr_eq(b),
            (Dispatcher::DataPipeProducer(a), Dispatcher::DataPipeProducer(b)) => a.ptr_eq(b),
            (Dispatcher::DataPipeConsumer(a), Dispatcher::DataPipeConsumer(b)) => a.ptr_eq(b),
            (Dispatcher::SharedBuffer(a), Dispatcher::SharedBuffer(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}
