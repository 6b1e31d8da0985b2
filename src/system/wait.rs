//! Waiting on handle signals.
//!
//! A wait registers an awakable on every dispatcher involved, then evaluates
//! all handles in one pass under the table lock. It sleeps only when no
//! handle is satisfied and every request can still be met, and re-evaluates
//! after each wake-up.

use std::sync::Arc;
use std::task::Poll;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::debug;

use super::awakable::{Registration, ThreadWaiter, WakerSlot};
use super::core::Core;
use super::dispatcher::Dispatcher;
use super::handle_table::RawHandle;
use super::signals::{HandleSignals, HandleSignalsState};
use crate::error::SystemError;

/// Relative deadline in microseconds.
pub type Deadline = u64;

/// Wait without a deadline.
pub const DEADLINE_INDEFINITE: Deadline = u64::MAX;

/// A failed wait.
///
/// `index` names the handle responsible when there is one. `states` holds
/// the signal state of every handle at the time of failure, empty when
/// arguments were rejected up front.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("wait failed: {error}")]
pub struct WaitError {
    pub error: SystemError,
    pub index: Option<usize>,
    pub states: Vec<HandleSignalsState>,
}

impl WaitError {
    fn argument(index: Option<usize>) -> Self {
        Self {
            error: SystemError::InvalidArgument,
            index,
            states: Vec::new(),
        }
    }
}

/// A successful `wait_many`: one ready handle plus every handle's state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitManyResult {
    pub index: usize,
    pub states: Vec<HandleSignalsState>,
}

enum Evaluation {
    Done(Result<WaitManyResult, WaitError>),
    Pending(Vec<HandleSignalsState>),
}

impl Core {
    /// Blocks until `handle` satisfies any of `signals`.
    pub fn wait(
        &self,
        handle: RawHandle,
        signals: HandleSignals,
        deadline: Deadline,
    ) -> Result<HandleSignalsState, WaitError> {
        self.wait_many(&[handle], &[signals], deadline)
            .map(|result| single_state(result.states))
    }

    /// Blocks until one of `handles` satisfies its entry in `signals`.
    pub fn wait_many(
        &self,
        handles: &[RawHandle],
        signals: &[HandleSignals],
        deadline: Deadline,
    ) -> Result<WaitManyResult, WaitError> {
        let dispatchers = self.resolve(handles, signals)?;
        let deadline_at = self.deadline_instant(deadline);

        let waiter = Arc::new(ThreadWaiter::default());
        let _registration = Registration::new(&dispatchers, waiter.clone());

        loop {
            let states = match self.evaluate(handles, &dispatchers, signals) {
                Evaluation::Done(result) => return result,
                Evaluation::Pending(states) => states,
            };
            if deadline_at.is_some_and(|at| Instant::now() >= at) {
                return Err(WaitError {
                    error: SystemError::DeadlineExceeded,
                    index: None,
                    states,
                });
            }
            waiter.park(deadline_at);
        }
    }

    /// Resolves when `handle` satisfies any of `signals`. Use a runtime
    /// timeout to bound it.
    pub async fn wait_async(
        &self,
        handle: RawHandle,
        signals: HandleSignals,
    ) -> Result<HandleSignalsState, WaitError> {
        self.wait_many_async(&[handle], &[signals])
            .await
            .map(|result| single_state(result.states))
    }

    /// Future version of [`Core::wait_many`].
    pub async fn wait_many_async(
        &self,
        handles: &[RawHandle],
        signals: &[HandleSignals],
    ) -> Result<WaitManyResult, WaitError> {
        let dispatchers = self.resolve(handles, signals)?;
        let slot = Arc::new(WakerSlot::default());
        let _registration = Registration::new(&dispatchers, slot.clone());

        std::future::poll_fn(|cx| {
            slot.register(cx.waker());
            match self.evaluate(handles, &dispatchers, signals) {
                Evaluation::Done(result) => Poll::Ready(result),
                Evaluation::Pending(_) => Poll::Pending,
            }
        })
        .await
    }

    fn resolve(
        &self,
        handles: &[RawHandle],
        signals: &[HandleSignals],
    ) -> Result<Vec<Dispatcher>, WaitError> {
        if handles.is_empty() || handles.len() != signals.len() {
            return Err(WaitError::argument(None));
        }
        let table = self.inner.table.lock();
        handles
            .iter()
            .enumerate()
            .map(|(i, h)| {
                table
                    .get(*h)
                    .cloned()
                    .map_err(|_| WaitError::argument(Some(i)))
            })
            .collect()
    }

    fn deadline_instant(&self, deadline: Deadline) -> Option<Instant> {
        if deadline == DEADLINE_INDEFINITE {
            return None;
        }
        Instant::now().checked_add(Duration::from_micros(deadline))
    }

    fn evaluate(
        &self,
        handles: &[RawHandle],
        dispatchers: &[Dispatcher],
        signals: &[HandleSignals],
    ) -> Evaluation {
        let table = self.inner.table.lock();
        let states: Vec<HandleSignalsState> =
            dispatchers.iter().map(Dispatcher::signals_state).collect();

        let cancelled = handles
            .iter()
            .zip(dispatchers)
            .position(|(h, d)| !table.is_bound_to(*h, d));
        drop(table);

        if let Some(index) = cancelled {
            debug!(handle = handles[index], "wait cancelled by close");
            return Evaluation::Done(Err(WaitError {
                error: SystemError::Cancelled,
                index: Some(index),
                states,
            }));
        }

        let ready = states
            .iter()
            .zip(signals)
            .position(|(s, wanted)| s.satisfies(*wanted));
        if let Some(index) = ready {
            return Evaluation::Done(Ok(WaitManyResult { index, states }));
        }
        let unsatisfiable = states
            .iter()
            .zip(signals)
            .position(|(s, wanted)| !s.can_satisfy(*wanted));
        if let Some(index) = unsatisfiable {
            return Evaluation::Done(Err(WaitError {
                error: SystemError::FailedPrecondition,
                index: Some(index),
                states,
            }));
        }
        Evaluation::Pending(states)
    }
}

fn single_state(states: Vec<HandleSignalsState>) -> HandleSignalsState {
    states.into_iter().next().unwrap_or_default()
}
