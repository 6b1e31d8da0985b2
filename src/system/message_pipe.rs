//! Message pipe state shared by both endpoints.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use super::awakable::{awake_all, Awakable, AwakableList};
use super::dispatcher::Dispatcher;
use super::signals::{HandleSignals, HandleSignalsState};
use crate::error::{SystemError, SystemResult};

/// A message in flight: bytes plus the dispatchers of transferred handles.
pub(crate) struct PipeMessage {
    pub(crate) bytes: Vec<u8>,
    pub(crate) dispatchers: Vec<Dispatcher>,
}

#[derive(Default)]
struct PipeState {
    /// `queues[i]` holds messages waiting to be read by endpoint `i`.
    queues: [VecDeque<PipeMessage>; 2],
    closed: [bool; 2],
    awakables: [AwakableList; 2],
}

/// One end of a message pipe.
#[derive(Clone)]
pub(crate) struct MessagePipeEndpoint {
    shared: Arc<Mutex<PipeState>>,
    port: usize,
}

impl MessagePipeEndpoint {
    pub(crate) fn new_pair() -> (Self, Self) {
        let shared = Arc::new(Mutex::new(PipeState::default()));
        (
            Self {
                shared: shared.clone(),
                port: 0,
            },
            Self { shared, port: 1 },
        )
    }

    #[inline]
    fn peer(&self) -> usize {
        1 - self.port
    }

    pub(crate) fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared) && self.port == other.port
    }

    pub(crate) fn signals_state(&self) -> HandleSignalsState {
        let state = self.shared.lock();
        let readable = !state.queues[self.port].is_empty();

        if state.closed[self.peer()] {
            let mut satisfied = HandleSignals::PEER_CLOSED;
            if readable {
                satisfied |= HandleSignals::READABLE;
            }
            return HandleSignalsState::new(satisfied, satisfied);
        }

        let mut satisfied = HandleSignals::WRITABLE;
        if readable {
            satisfied |= HandleSignals::READABLE;
        }
        HandleSignalsState::new(satisfied, HandleSignals::all())
    }

    /// Queues a message for the peer. Fails if the peer is gone.
    ///
    /// `take_dispatchers` runs under the pipe lock once the peer is known to
    /// be open, so attached handles only leave their table when the write is
    /// certain to succeed. The transferred dispatchers are returned.
    pub(crate) fn write<F>(&self, bytes: &[u8], take_dispatchers: F) -> SystemResult<Vec<Dispatcher>>
    where
        F: FnOnce() -> SystemResult<Vec<Dispatcher>>,
    {
        let (transferred, to_wake) = {
            let mut state = self.shared.lock();
            let peer = self.peer();
            if state.closed[peer] {
                return Err(SystemError::FailedPrecondition);
            }
            let dispatchers = take_dispatchers()?;
            let transferred = dispatchers.clone();
            state.queues[peer].push_back(PipeMessage {
                bytes: bytes.to_vec(),
                dispatchers,
            });
            (transferred, state.awakables[peer].snapshot())
        };
        awake_all(to_wake);
        Ok(transferred)
    }

    /// Pops the oldest message addressed to this endpoint.
    ///
    /// `reserve` is given the message's handle count before anything is
    /// dequeued; if it fails the message stays queued.
    pub(crate) fn read<F, T>(&self, reserve: F) -> SystemResult<(PipeMessage, T)>
    where
        F: FnOnce(usize) -> SystemResult<T>,
    {
        let mut state = self.shared.lock();
        let handle_count = match state.queues[self.port].front() {
            Some(message) => message.dispatchers.len(),
            None if state.closed[self.peer()] => return Err(SystemError::FailedPrecondition),
            None => return Err(SystemError::ShouldWait),
        };
        let reserved = reserve(handle_count)?;
        match state.queues[self.port].pop_front() {
            Some(message) => Ok((message, reserved)),
            None => Err(SystemError::ShouldWait),
        }
    }

    /// Marks this endpoint closed and returns messages that can no longer be
    /// delivered, so their handles can be closed.
    pub(crate) fn close(&self) -> Vec<PipeMessage> {
        let (undeliverable, to_wake) = {
            let mut state = self.shared.lock();
            state.closed[self.port] = true;
            let undeliverable: Vec<PipeMessage> = state.queues[self.port].drain(..).collect();
            let mut to_wake = state.awakables[self.peer()].snapshot();
            to_wake.extend(state.awakables[self.port].snapshot());
            (undeliverable, to_wake)
        };
        awake_all(to_wake);
        undeliverable
    }

    pub(crate) fn add_awakable(&self, awakable: Arc<dyn Awakable>) -> usize {
        self.shared.lock().awakables[self.port].add(awakable)
    }

    pub(crate) fn remove_awakable(&self, key: usize) {
        self.shared.lock().awakables[self.port].remove(key);
    }

    pub(crate) fn awake_self(&self) {
        let to_wake = self.shared.lock().awakables[self.port].snapshot();
        awake_all(to_wake);
    }
}
