//! Unidirectional, flow-controlled byte streams.
//!
//! A data pipe has a producer end and a consumer end sharing one bounded
//! buffer. Transfers are always a whole number of elements.

use std::sync::Arc;

use bytes::{Buf, BytesMut};
use parking_lot::Mutex;

use super::awakable::{awake_all, Awakable, AwakableList};
use super::signals::{HandleSignals, HandleSignalsState};
use crate::error::{SystemError, SystemResult};

bitflags::bitflags! {
    /// Flags for `write_data`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct WriteDataFlags: u32 {
        /// Write everything or nothing (`OutOfRange`).
        const ALL_OR_NONE = 1 << 0;
    }
}

bitflags::bitflags! {
    /// Flags for `read_data`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ReadDataFlags: u32 {
        /// Read everything requested or nothing (`OutOfRange`).
        const ALL_OR_NONE = 1 << 0;
        /// Drop bytes instead of copying them out.
        const DISCARD = 1 << 1;
        /// Report how many bytes are buffered; moves nothing.
        const QUERY = 1 << 2;
        /// Copy bytes out without consuming them.
        const PEEK = 1 << 3;
    }
}

/// Creation options for a data pipe.
///
/// A zero capacity selects the core's configured default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataPipeOptions {
    pub element_num_bytes: usize,
    pub capacity_num_bytes: usize,
}

impl Default for DataPipeOptions {
    fn default() -> Self {
        Self {
            element_num_bytes: 1,
            capacity_num_bytes: 0,
        }
    }
}

impl DataPipeOptions {
    /// Resolves the default capacity and checks the element size divides it.
    pub(crate) fn validate(mut self, default_capacity: usize) -> SystemResult<Self> {
        if self.element_num_bytes == 0 {
            return Err(SystemError::InvalidArgument);
        }
        if self.capacity_num_bytes == 0 {
            // Round the default down so it stays a whole number of elements.
            let elements = (default_capacity / self.element_num_bytes).max(1);
            self.capacity_num_bytes = elements * self.element_num_bytes;
        }
        if self.capacity_num_bytes % self.element_num_bytes != 0 {
            return Err(SystemError::InvalidArgument);
        }
        Ok(self)
    }
}

struct DataPipeState {
    buffer: BytesMut,
    capacity: usize,
    element_num_bytes: usize,
    producer_closed: bool,
    consumer_closed: bool,
    producer_awakables: AwakableList,
    consumer_awakables: AwakableList,
}

/// Producer end of a data pipe.
#[derive(Clone)]
pub(crate) struct DataPipeProducer {
    shared: Arc<Mutex<DataPipeState>>,
}

/// Consumer end of a data pipe.
#[derive(Clone)]
pub(crate) struct DataPipeConsumer {
    shared: Arc<Mutex<DataPipeState>>,
}

/// Creates both ends from already validated options.
pub(crate) fn new_data_pipe(options: DataPipeOptions) -> (DataPipeProducer, DataPipeConsumer) {
    let shared = Arc::new(Mutex::new(DataPipeState {
        buffer: BytesMut::with_capacity(options.capacity_num_bytes),
        capacity: options.capacity_num_bytes,
        element_num_bytes: options.element_num_bytes,
        producer_closed: false,
        consumer_closed: false,
        producer_awakables: AwakableList::default(),
        consumer_awakables: AwakableList::default(),
    }));
    (
        DataPipeProducer {
            shared: shared.clone(),
        },
        DataPipeConsumer { shared },
    )
}

impl DataPipeProducer {
    pub(crate) fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    pub(crate) fn signals_state(&self) -> HandleSignalsState {
        let state = self.shared.lock();
        if state.consumer_closed {
            return HandleSignalsState::new(HandleSignals::PEER_CLOSED, HandleSignals::PEER_CLOSED);
        }
        let satisfied = if state.buffer.len() < state.capacity {
            HandleSignals::WRITABLE
        } else {
            HandleSignals::empty()
        };
        HandleSignalsState::new(
            satisfied,
            HandleSignals::WRITABLE | HandleSignals::PEER_CLOSED,
        )
    }

    /// Appends as many whole elements of `data` as fit and returns the byte
    /// count written.
    pub(crate) fn write(&self, data: &[u8], flags: WriteDataFlags) -> SystemResult<usize> {
        let (written, to_wake) = {
            let mut state = self.shared.lock();
            if data.len() % state.element_num_bytes != 0 {
                return Err(SystemError::InvalidArgument);
            }
            if state.consumer_closed {
                return Err(SystemError::FailedPrecondition);
            }
            if data.is_empty() {
                return Ok(0);
            }

            let free = state.capacity - state.buffer.len();
            if flags.contains(WriteDataFlags::ALL_OR_NONE) && data.len() > free {
                return Err(SystemError::OutOfRange);
            }
            if free == 0 {
                return Err(SystemError::ShouldWait);
            }

            let written = data.len().min(free);
            state.buffer.extend_from_slice(&data[..written]);
            (written, state.consumer_awakables.snapshot())
        };
        awake_all(to_wake);
        Ok(written)
    }

    pub(crate) fn close(&self) {
        let to_wake = {
            let mut state = self.shared.lock();
            state.producer_closed = true;
            let mut to_wake = state.consumer_awakables.snapshot();
            to_wake.extend(state.producer_awakables.snapshot());
            to_wake
        };
        awake_all(to_wake);
    }

    pub(crate) fn add_awakable(&self, awakable: Arc<dyn Awakable>) -> usize {
        self.shared.lock().producer_awakables.add(awakable)
    }

    pub(crate) fn remove_awakable(&self, key: usize) {
        self.shared.lock().producer_awakables.remove(key);
    }

    pub(crate) fn awake_self(&self) {
        let to_wake = self.shared.lock().producer_awakables.snapshot();
        awake_all(to_wake);
    }
}

impl DataPipeConsumer {
    pub(crate) fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    pub(crate) fn signals_state(&self) -> HandleSignalsState {
        let state = self.shared.lock();
        let mut satisfied = HandleSignals::empty();
        if !state.buffer.is_empty() {
            satisfied |= HandleSignals::READABLE;
        }
        if state.producer_closed {
            satisfied |= HandleSignals::PEER_CLOSED;
            return HandleSignalsState::new(satisfied, satisfied);
        }
        HandleSignalsState::new(
            satisfied,
            HandleSignals::READABLE | HandleSignals::PEER_CLOSED,
        )
    }

    /// Reads into `buf` according to `flags`.
    ///
    /// With `DISCARD` the length of `buf` is the amount to drop and `buf` is
    /// left untouched. With `QUERY` the buffered byte count is returned.
    pub(crate) fn read(&self, buf: &mut [u8], flags: ReadDataFlags) -> SystemResult<usize> {
        if flags.contains(ReadDataFlags::DISCARD | ReadDataFlags::PEEK) {
            return Err(SystemError::InvalidArgument);
        }

        let (read, to_wake) = {
            let mut state = self.shared.lock();
            if flags.contains(ReadDataFlags::QUERY) {
                return Ok(state.buffer.len());
            }
            if buf.len() % state.element_num_bytes != 0 {
                return Err(SystemError::InvalidArgument);
            }

            let available = state.buffer.len();
            if flags.contains(ReadDataFlags::ALL_OR_NONE) && buf.len() > available {
                return Err(if state.producer_closed {
                    SystemError::FailedPrecondition
                } else {
                    SystemError::OutOfRange
                });
            }
            if available == 0 {
                return Err(if state.producer_closed {
                    SystemError::FailedPrecondition
                } else {
                    SystemError::ShouldWait
                });
            }

            let count = buf.len().min(available);
            if !flags.contains(ReadDataFlags::DISCARD) {
                buf[..count].copy_from_slice(&state.buffer[..count]);
            }
            if flags.contains(ReadDataFlags::PEEK) || count == 0 {
                return Ok(count);
            }
            state.buffer.advance(count);
            (count, state.producer_awakables.snapshot())
        };
        awake_all(to_wake);
        Ok(read)
    }

    pub(crate) fn close(&self) {
        let to_wake = {
            let mut state = self.shared.lock();
            state.consumer_closed = true;
            state.buffer.clear();
            let mut to_wake = state.producer_awakables.snapshot();
            to_wake.extend(state.consumer_awakables.snapshot());
            to_wake
        };
        awake_all(to_wake);
    }

    pub(crate) fn add_awakable(&self, awakable: Arc<dyn Awakable>) -> usize {
        self.shared.lock().consumer_awakables.add(awakable)
    }

    pub(crate) fn remove_awakable(&self, key: usize) {
        self.shared.lock().consumer_awakables.remove(key);
    }

    pub(crate) fn awake_self(&self) {
        let to_wake = self.shared.lock().consumer_awakables.snapshot();
        awake_all(to_wake);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipe(element: usize, capacity: usize) -> (DataPipeProducer, DataPipeConsumer) {
        let options = DataPipeOptions {
            element_num_bytes: element,
            capacity_num_bytes: capacity,
        }
        .validate(64)
        .unwrap();
        new_data_pipe(options)
    }

    #[test]
    fn test_options_validation() {
        let bad_element = DataPipeOptions {
            element_num_bytes: 0,
            capacity_num_bytes: 8,
        };
        assert_eq!(bad_element.validate(64), Err(SystemError::InvalidArgument));

        let bad_capacity = DataPipeOptions {
            element_num_bytes: 4,
            capacity_num_bytes: 10,
        };
        assert_eq!(bad_capacity.validate(64), Err(SystemError::InvalidArgument));

        let defaulted = DataPipeOptions {
            element_num_bytes: 3,
            capacity_num_bytes: 0,
        }
        .validate(64)
        .unwrap();
        assert_eq!(defaulted.capacity_num_bytes, 63);
    }

    #[test]
    fn test_initial_signals() {
        let (producer, consumer) = pipe(1, 16);
        assert_eq!(producer.signals_state().satisfied, HandleSignals::WRITABLE);
        assert!(consumer.signals_state().satisfied.is_empty());
        assert!(consumer.signals_state().can_satisfy(HandleSignals::READABLE));
    }

    #[test]
    fn test_bytes_in_order() {
        let (producer, consumer) = pipe(1, 16);
        assert_eq!(producer.write(b"hello", WriteDataFlags::empty()), Ok(5));
        assert_eq!(producer.write(b" world", WriteDataFlags::empty()), Ok(6));
        assert!(consumer.signals_state().is_readable());

        let mut buf = [0u8; 32];
        let n = consumer.read(&mut buf, ReadDataFlags::empty()).unwrap();
        assert_eq!(&buf[..n], b"hello world");
        assert_eq!(
            consumer.read(&mut buf, ReadDataFlags::empty()),
            Err(SystemError::ShouldWait)
        );
    }

    #[test]
    fn test_partial_write_when_nearly_full() {
        let (producer, _consumer) = pipe(1, 4);
        assert_eq!(producer.write(b"abcdef", WriteDataFlags::empty()), Ok(4));
        assert!(!producer.signals_state().is_writable());
        assert_eq!(
            producer.write(b"x", WriteDataFlags::empty()),
            Err(SystemError::ShouldWait)
        );
    }

    #[test]
    fn test_all_or_none() {
        let (producer, consumer) = pipe(1, 4);
        assert_eq!(
            producer.write(b"abcdef", WriteDataFlags::ALL_OR_NONE),
            Err(SystemError::OutOfRange)
        );
        assert_eq!(producer.write(b"ab", WriteDataFlags::ALL_OR_NONE), Ok(2));

        let mut buf = [0u8; 3];
        assert_eq!(
            consumer.read(&mut buf, ReadDataFlags::ALL_OR_NONE),
            Err(SystemError::OutOfRange)
        );
        assert_eq!(consumer.read(&mut buf[..2], ReadDataFlags::ALL_OR_NONE), Ok(2));
        assert_eq!(&buf[..2], b"ab");
    }

    #[test]
    fn test_element_size_enforced() {
        let (producer, consumer) = pipe(4, 16);
        assert_eq!(
            producer.write(&[1, 2, 3], WriteDataFlags::empty()),
            Err(SystemError::InvalidArgument)
        );
        assert_eq!(producer.write(&[1, 2, 3, 4], WriteDataFlags::empty()), Ok(4));
        let mut buf = [0u8; 6];
        assert_eq!(
            consumer.read(&mut buf, ReadDataFlags::empty()),
            Err(SystemError::InvalidArgument)
        );
    }

    #[test]
    fn test_query_peek_discard() {
        let (producer, consumer) = pipe(1, 16);
        producer.write(b"abcdef", WriteDataFlags::empty()).unwrap();

        assert_eq!(consumer.read(&mut [], ReadDataFlags::QUERY), Ok(6));

        let mut buf = [0u8; 3];
        assert_eq!(consumer.read(&mut buf, ReadDataFlags::PEEK), Ok(3));
        assert_eq!(&buf, b"abc");

        let mut skip = [0u8; 2];
        assert_eq!(consumer.read(&mut skip, ReadDataFlags::DISCARD), Ok(2));
        assert_eq!(skip, [0, 0]);

        assert_eq!(consumer.read(&mut buf, ReadDataFlags::empty()), Ok(3));
        assert_eq!(&buf, b"cde");
        assert_eq!(
            consumer.read(&mut buf, ReadDataFlags::DISCARD | ReadDataFlags::PEEK),
            Err(SystemError::InvalidArgument)
        );
    }

    #[test]
    fn test_producer_close_drains_then_fails() {
        let (producer, consumer) = pipe(1, 16);
        producer.write(b"xy", WriteDataFlags::empty()).unwrap();
        producer.close();

        let state = consumer.signals_state();
        assert_eq!(
            state.satisfied,
            HandleSignals::READABLE | HandleSignals::PEER_CLOSED
        );

        let mut buf = [0u8; 8];
        assert_eq!(consumer.read(&mut buf, ReadDataFlags::empty()), Ok(2));
        assert_eq!(
            consumer.read(&mut buf, ReadDataFlags::empty()),
            Err(SystemError::FailedPrecondition)
        );
        assert_eq!(
            consumer.signals_state().satisfiable,
            HandleSignals::PEER_CLOSED
        );
    }

    #[test]
    fn test_consumer_close_fails_writes() {
        let (producer, consumer) = pipe(1, 16);
        consumer.close();
        assert_eq!(
            producer.write(b"a", WriteDataFlags::empty()),
            Err(SystemError::FailedPrecondition)
        );
        let state = producer.signals_state();
        assert_eq!(state.satisfied, HandleSignals::PEER_CLOSED);
        assert_eq!(state.satisfiable, HandleSignals::PEER_CLOSED);
    }
}
