//! Handle value namespace of a core.

use std::collections::HashMap;
use std::ops::Range;

use super::dispatcher::Dispatcher;
use crate::error::{SystemError, SystemResult};

/// Raw handle value as seen on the kernel surface.
pub type RawHandle = u32;

/// The invalid handle value.
pub const INVALID_HANDLE: RawHandle = 0;

/// Maps handle values to dispatchers. Values are handed out from a monotonic
/// counter and never reused.
pub(crate) struct HandleTable {
    entries: HashMap<RawHandle, Dispatcher>,
    next_value: RawHandle,
    max_handle_count: usize,
}

impl HandleTable {
    pub(crate) fn new(max_handle_count: usize) -> Self {
        Self {
            entries: HashMap::new(),
            next_value: 1,
            max_handle_count,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Resolves `handle` and checks it is still bound to `expected`.
    pub(crate) fn is_bound_to(&self, handle: RawHandle, expected: &Dispatcher) -> bool {
        self.entries
            .get(&handle)
            .is_some_and(|current| current.ptr_eq(expected))
    }

    pub(crate) fn get(&self, handle: RawHandle) -> SystemResult<&Dispatcher> {
        self.entries
            .get(&handle)
            .ok_or(SystemError::InvalidArgument)
    }

    /// Reserves `count` fresh values, checking the table limit first.
    pub(crate) fn reserve(&mut self, count: usize) -> SystemResult<Range<RawHandle>> {
        if self.entries.len() + count > self.max_handle_count {
            return Err(SystemError::ResourceExhausted);
        }
        let first = self.next_value;
        let end = u32::try_from(count)
            .ok()
            .and_then(|n| first.checked_add(n))
            .filter(|end| *end != RawHandle::MAX)
            .ok_or(SystemError::ResourceExhausted)?;
        self.next_value = end;
        Ok(first..end)
    }

    /// Installs dispatchers under values from [`HandleTable::reserve`].
    pub(crate) fn insert_reserved(
        &mut self,
        values: Range<RawHandle>,
        dispatchers: Vec<Dispatcher>,
    ) -> Vec<RawHandle> {
        debug_assert_eq!(values.len(), dispatchers.len());
        values
            .zip(dispatchers)
            .map(|(value, dispatcher)| {
                self.entries.insert(value, dispatcher);
                value
            })
            .collect()
    }

    /// Inserts all dispatchers or none.
    pub(crate) fn add_many(&mut self, dispatchers: Vec<Dispatcher>) -> SystemResult<Vec<RawHandle>> {
        let values = self.reserve(dispatchers.len())?;
        Ok(self.insert_reserved(values, dispatchers))
    }

    pub(crate) fn add(&mut self, dispatcher: Dispatcher) -> SystemResult<RawHandle> {
        let mut values = self.add_many(vec![dispatcher])?;
        values.pop().ok_or(SystemError::ResourceExhausted)
    }

    pub(crate) fn remove(&mut self, handle: RawHandle) -> SystemResult<Dispatcher> {
        self.entries
            .remove(&handle)
            .ok_or(SystemError::InvalidArgument)
    }

    /// Checks that every value is live, distinct and not `exclude`, then
    /// removes them all. Nothing is removed on failure.
    pub(crate) fn remove_for_transit(
        &mut self,
        handles: &[RawHandle],
        exclude: RawHandle,
    ) -> SystemResult<Vec<Dispatcher>> {
        for (i, handle) in handles.iter().enumerate() {
            if *handle == exclude || handles[..i].contains(handle) {
                return Err(SystemError::InvalidArgument);
            }
            self.get(*handle)?;
        }
        handles.iter().map(|h| self.remove(*h)).collect()
    }

    pub(crate) fn drain(&mut self) -> Vec<Dispatcher> {
        self.entries.drain().map(|(_, d)| d).collect()
    }
}
