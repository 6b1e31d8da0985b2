//! The capability kernel: one handle namespace plus the operations on it.
//!
//! A [`Core`] is an explicitly owned context. Cloning it is cheap and every
//! clone refers to the same handle table. Raw handle values are only
//! meaningful to the core that issued them.
//!
//! # Example
//!
//! ```
//! use capwire::system::{Core, HandleSignals, DEADLINE_INDEFINITE};
//!
//! let core = Core::new();
//! let (a, b) = core.create_message_pipe().unwrap();
//! a.write_message(b"ping", Vec::new()).unwrap();
//! b.wait(HandleSignals::READABLE, DEADLINE_INDEFINITE).unwrap();
//! let (bytes, handles) = b.read_message().unwrap();
//! assert_eq!(bytes, b"ping");
//! assert!(handles.is_empty());
//! ```

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use super::data_pipe::{new_data_pipe, DataPipeOptions, ReadDataFlags, WriteDataFlags};
use super::dispatcher::Dispatcher;
use super::handle::{
    DataPipeConsumerHandle, DataPipeProducerHandle, Handle, MessagePipeHandle, SharedBufferHandle,
};
use super::handle_table::{HandleTable, RawHandle};
use super::message_pipe::MessagePipeEndpoint;
use super::shared_buffer::{BufferMapping, SharedBufferDispatcher};
use super::signals::HandleSignalsState;
use crate::error::{SystemError, SystemResult};

/// Default maximum size of one message in bytes (4 MiB).
pub const DEFAULT_MAX_MESSAGE_NUM_BYTES: usize = 4 * 1024 * 1024;

/// Default maximum number of handles attached to one message.
pub const DEFAULT_MAX_MESSAGE_NUM_HANDLES: usize = 10_000;

/// Default maximum number of live handles per core.
pub const DEFAULT_MAX_HANDLE_COUNT: usize = 1_000_000;

/// Default data pipe capacity in bytes (1 MiB).
pub const DEFAULT_DATA_PIPE_CAPACITY: usize = 1024 * 1024;

/// Limits applied by a [`Core`].
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Largest message `write_message` accepts.
    pub max_message_num_bytes: usize,
    /// Most handles one message may carry.
    pub max_message_num_handles: usize,
    /// Most handles the table may hold at once.
    pub max_handle_count: usize,
    /// Capacity used when data pipe options leave it at zero.
    pub default_data_pipe_capacity: usize,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            max_message_num_bytes: DEFAULT_MAX_MESSAGE_NUM_BYTES,
            max_message_num_handles: DEFAULT_MAX_MESSAGE_NUM_HANDLES,
            max_handle_count: DEFAULT_MAX_HANDLE_COUNT,
            default_data_pipe_capacity: DEFAULT_DATA_PIPE_CAPACITY,
        }
    }
}

/// Builder for a [`Core`] with custom limits.
///
/// ```
/// use capwire::system::Core;
///
/// let core = Core::builder()
///     .max_message_num_bytes(64 * 1024)
///     .default_data_pipe_capacity(4096)
///     .build();
/// assert_eq!(core.config().max_message_num_bytes, 64 * 1024);
/// ```
#[derive(Debug, Default)]
pub struct CoreBuilder {
    config: CoreConfig,
}

impl CoreBuilder {
    /// Starts from the default limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the largest message payload, in bytes.
    pub fn max_message_num_bytes(mut self, bytes: usize) -> Self {
        self.config.max_message_num_bytes = bytes;
        self
    }

    /// Set the most handles one message may carry.
    pub fn max_message_num_handles(mut self, count: usize) -> Self {
        self.config.max_message_num_handles = count;
        self
    }

    /// Set the size limit of the handle table.
    pub fn max_handle_count(mut self, count: usize) -> Self {
        self.config.max_handle_count = count;
        self
    }

    /// Set the capacity used when a data pipe is created without options.
    pub fn default_data_pipe_capacity(mut self, bytes: usize) -> Self {
        self.config.default_data_pipe_capacity = bytes;
        self
    }

    /// Build the core.
    pub fn build(self) -> Core {
        Core::with_config(self.config)
    }
}

pub(crate) struct CoreInner {
    pub(crate) table: Mutex<HandleTable>,
    config: CoreConfig,
    epoch: Instant,
}

impl Drop for CoreInner {
    fn drop(&mut self) {
        // Only handles leaked through `into_raw` can still be here.
        for dispatcher in self.table.get_mut().drain() {
            dispatcher.close();
        }
    }
}

/// Handle to a capability kernel instance.
#[derive(Clone)]
pub struct Core {
    pub(crate) inner: Arc<CoreInner>,
}

impl Core {
    /// Creates a core with default limits.
    pub fn new() -> Self {
        Self::with_config(CoreConfig::default())
    }

    /// Create a builder for custom limits.
    pub fn builder() -> CoreBuilder {
        CoreBuilder::new()
    }

    /// Creates a core with the given limits.
    pub fn with_config(config: CoreConfig) -> Self {
        Self {
            inner: Arc::new(CoreInner {
                table: Mutex::new(HandleTable::new(config.max_handle_count)),
                config,
                epoch: Instant::now(),
            }),
        }
    }

    /// Limits this core was created with.
    pub fn config(&self) -> &CoreConfig {
        &self.inner.config
    }

    /// Microseconds since this core was created. Never goes backwards.
    pub fn get_time_ticks_now(&self) -> u64 {
        u64::try_from(self.inner.epoch.elapsed().as_micros()).unwrap_or(u64::MAX)
    }

    /// Number of live handles in the table.
    pub fn handle_count(&self) -> usize {
        self.inner.table.lock().len()
    }

    pub(crate) fn same_core(&self, other: &Core) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn dispatcher(&self, handle: RawHandle) -> SystemResult<Dispatcher> {
        self.inner.table.lock().get(handle).cloned()
    }

    fn wrap(&self, raw: RawHandle) -> Handle {
        Handle::from_raw(self.clone(), raw)
    }

    /// Invalidates `handle` and closes the object behind it.
    pub fn close(&self, handle: RawHandle) -> SystemResult<()> {
        let dispatcher = self.inner.table.lock().remove(handle)?;
        dispatcher.close();
        Ok(())
    }

    /// Current signal state of `handle`, without waiting.
    pub fn query_signals_state(&self, handle: RawHandle) -> SystemResult<HandleSignalsState> {
        Ok(self.inner.table.lock().get(handle)?.signals_state())
    }

    // ===== message pipes =====

    /// Creates a connected pair of message pipe endpoints.
    pub fn create_message_pipe(&self) -> SystemResult<(MessagePipeHandle, MessagePipeHandle)> {
        let (a, b) = MessagePipeEndpoint::new_pair();
        let values = self
            .inner
            .table
            .lock()
            .add_many(vec![Dispatcher::MessagePipe(a), Dispatcher::MessagePipe(b)])?;
        Ok((
            MessagePipeHandle::from_untyped(self.wrap(values[0])),
            MessagePipeHandle::from_untyped(self.wrap(values[1])),
        ))
    }

    /// Sends `bytes` and transfers `handles` to the peer of `pipe`.
    ///
    /// On success the transferred values are no longer valid here. On
    /// failure they are left untouched.
    pub fn write_message(
        &self,
        pipe: RawHandle,
        bytes: &[u8],
        handles: &[RawHandle],
    ) -> SystemResult<()> {
        let config = &self.inner.config;
        if bytes.len() > config.max_message_num_bytes
            || handles.len() > config.max_message_num_handles
        {
            return Err(SystemError::ResourceExhausted);
        }

        let transferred = {
            let mut table = self.inner.table.lock();
            let endpoint = match table.get(pipe)? {
                Dispatcher::MessagePipe(endpoint) => endpoint.clone(),
                _ => return Err(SystemError::InvalidArgument),
            };
            if handles.is_empty() {
                endpoint.write(bytes, || Ok(Vec::new()))?
            } else {
                endpoint.write(bytes, || table.remove_for_transit(handles, pipe))?
            }
        };

        // Waiters on the transferred values must observe the cancellation.
        for dispatcher in &transferred {
            dispatcher.awake_self();
        }
        Ok(())
    }

    /// Reads the oldest queued message on `pipe`. Attached handles are
    /// installed as new values in this core.
    pub fn read_message(&self, pipe: RawHandle) -> SystemResult<(Vec<u8>, Vec<Handle>)> {
        let values = {
            let mut table = self.inner.table.lock();
            let endpoint = match table.get(pipe)? {
                Dispatcher::MessagePipe(endpoint) => endpoint.clone(),
                _ => return Err(SystemError::InvalidArgument),
            };
            let (message, reserved) = endpoint.read(|count| table.reserve(count))?;
            let values = table.insert_reserved(reserved, message.dispatchers);
            (message.bytes, values)
        };
        let (bytes, raws) = values;
        Ok((bytes, raws.into_iter().map(|raw| self.wrap(raw)).collect()))
    }

    // ===== data pipes =====

    /// Creates a data pipe. `None` uses one-byte elements and the default
    /// capacity.
    pub fn create_data_pipe(
        &self,
        options: Option<DataPipeOptions>,
    ) -> SystemResult<(DataPipeProducerHandle, DataPipeConsumerHandle)> {
        let options = options
            .unwrap_or_default()
            .validate(self.inner.config.default_data_pipe_capacity)?;
        let (producer, consumer) = new_data_pipe(options);
        let values = self.inner.table.lock().add_many(vec![
            Dispatcher::DataPipeProducer(producer),
            Dispatcher::DataPipeConsumer(consumer),
        ])?;
        Ok((
            DataPipeProducerHandle::from_untyped(self.wrap(values[0])),
            DataPipeConsumerHandle::from_untyped(self.wrap(values[1])),
        ))
    }

    /// Writes up to `data.len()` bytes; returns how many were accepted.
    pub fn write_data(
        &self,
        producer: RawHandle,
        data: &[u8],
        flags: WriteDataFlags,
    ) -> SystemResult<usize> {
        let table = self.inner.table.lock();
        match table.get(producer)? {
            Dispatcher::DataPipeProducer(producer) => producer.write(data, flags),
            _ => Err(SystemError::InvalidArgument),
        }
    }

    /// Reads into `buf`; see [`ReadDataFlags`] for the modes.
    pub fn read_data(
        &self,
        consumer: RawHandle,
        buf: &mut [u8],
        flags: ReadDataFlags,
    ) -> SystemResult<usize> {
        let table = self.inner.table.lock();
        match table.get(consumer)? {
            Dispatcher::DataPipeConsumer(consumer) => consumer.read(buf, flags),
            _ => Err(SystemError::InvalidArgument),
        }
    }

    // ===== shared buffers =====

    /// Creates a zero-filled shared buffer of `num_bytes`.
    pub fn create_shared_buffer(&self, num_bytes: usize) -> SystemResult<SharedBufferHandle> {
        let buffer = SharedBufferDispatcher::new(num_bytes)?;
        let raw = self
            .inner
            .table
            .lock()
            .add(Dispatcher::SharedBuffer(buffer))?;
        Ok(SharedBufferHandle::from_untyped(self.wrap(raw)))
    }

    /// Creates a second handle to the same memory.
    pub fn duplicate_buffer_handle(&self, buffer: RawHandle) -> SystemResult<SharedBufferHandle> {
        let mut table = self.inner.table.lock();
        let duplicate = match table.get(buffer)? {
            Dispatcher::SharedBuffer(buffer) => buffer.duplicate(),
            _ => return Err(SystemError::InvalidArgument),
        };
        let raw = table.add(Dispatcher::SharedBuffer(duplicate))?;
        drop(table);
        Ok(SharedBufferHandle::from_untyped(self.wrap(raw)))
    }

    /// Maps `num_bytes` starting at `offset`.
    pub fn map_buffer(
        &self,
        buffer: RawHandle,
        offset: usize,
        num_bytes: usize,
    ) -> SystemResult<BufferMapping> {
        match self.inner.table.lock().get(buffer)? {
            Dispatcher::SharedBuffer(buffer) => buffer.map(offset, num_bytes),
            _ => Err(SystemError::InvalidArgument),
        }
    }

    /// Ends a mapping. Other mappings of the same buffer are unaffected.
    pub fn unmap_buffer(&self, mapping: BufferMapping) {
        drop(mapping);
    }
}

impl Default for Core {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Core {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Core")
            .field("handle_count", &self.handle_count())
            .finish()
    }
}
