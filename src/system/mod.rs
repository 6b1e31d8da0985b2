//! Capability kernel.
//!
//! Handles, message pipes, data pipes, shared buffers and the wait
//! primitives. Everything hangs off a [`Core`], which owns the handle table.

mod awakable;
mod core;
mod data_pipe;
mod dispatcher;
mod handle;
mod handle_table;
mod io;
mod message_pipe;
mod shared_buffer;
mod signals;
mod wait;

pub use self::core::{
    Core, CoreBuilder, CoreConfig, DEFAULT_DATA_PIPE_CAPACITY, DEFAULT_MAX_HANDLE_COUNT,
    DEFAULT_MAX_MESSAGE_NUM_BYTES, DEFAULT_MAX_MESSAGE_NUM_HANDLES,
};
pub use data_pipe::{DataPipeOptions, ReadDataFlags, WriteDataFlags};
pub use handle::{
    DataPipeConsumerHandle, DataPipeProducerHandle, Handle, MessagePipeHandle, SharedBufferHandle,
};
pub use handle_table::{RawHandle, INVALID_HANDLE};
pub use io::{drain_data_pipe, DataPipeReader, DataPipeWriter};
pub use shared_buffer::BufferMapping;
pub use signals::{HandleSignals, HandleSignalsState};
pub use wait::{Deadline, WaitError, WaitManyResult, DEADLINE_INDEFINITE};
