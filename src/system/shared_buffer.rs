//! Shared memory regions and their mappings.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::awakable::{awake_all, Awakable, AwakableList};
use super::signals::HandleSignalsState;
use crate::error::{SystemError, SystemResult};

/// The memory behind one or more shared buffer handles.
pub(crate) struct SharedRegion {
    bytes: Box<[AtomicU8]>,
}

impl SharedRegion {
    fn new(size: usize) -> Self {
        Self {
            bytes: (0..size).map(|_| AtomicU8::new(0)).collect(),
        }
    }

    fn len(&self) -> usize {
        self.bytes.len()
    }
}

/// Per-handle view of a shared region. Duplicates share the region but not
/// the waiter list.
#[derive(Clone)]
pub(crate) struct SharedBufferDispatcher {
    region: Arc<SharedRegion>,
    awakables: Arc<Mutex<AwakableList>>,
}

impl SharedBufferDispatcher {
    pub(crate) fn new(size: usize) -> SystemResult<Self> {
        if size == 0 {
            return Err(SystemError::InvalidArgument);
        }
        Ok(Self::with_region(Arc::new(SharedRegion::new(size))))
    }

    fn with_region(region: Arc<SharedRegion>) -> Self {
        Self {
            region,
            awakables: Arc::new(Mutex::new(AwakableList::default())),
        }
    }

    pub(crate) fn duplicate(&self) -> Self {
        Self::with_region(self.region.clone())
    }

    pub(crate) fn map(&self, offset: usize, len: usize) -> SystemResult<BufferMapping> {
        if len == 0 {
            return Err(SystemError::InvalidArgument);
        }
        match offset.checked_add(len) {
            Some(end) if end <= self.region.len() => Ok(BufferMapping {
                region: self.region.clone(),
                offset,
                len,
            }),
            _ => Err(SystemError::InvalidArgument),
        }
    }

    pub(crate) fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.awakables, &other.awakables)
    }

    /// Shared buffers raise no signals.
    pub(crate) fn signals_state(&self) -> HandleSignalsState {
        HandleSignalsState::default()
    }

    pub(crate) fn close(&self) {
        self.awake_self();
    }

    pub(crate) fn add_awakable(&self, awakable: Arc<dyn Awakable>) -> usize {
        self.awakables.lock().add(awakable)
    }

    pub(crate) fn remove_awakable(&self, key: usize) {
        self.awakables.lock().remove(key);
    }

    pub(crate) fn awake_self(&self) {
        let to_wake = self.awakables.lock().snapshot();
        awake_all(to_wake);
    }
}

/// A mapped window into a shared buffer.
///
/// The mapping keeps the region alive, so it stays usable after every handle
/// to the buffer is closed. Dropping it unmaps.
#[derive(Clone)]
pub struct BufferMapping {
    region: Arc<SharedRegion>,
    offset: usize,
    len: usize,
}

impl BufferMapping {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Offset of this window within the buffer.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn get(&self, index: usize) -> Option<u8> {
        (index < self.len).then(|| self.region.bytes[self.offset + index].load(Ordering::Acquire))
    }

    pub fn set(&self, index: usize, value: u8) -> SystemResult<()> {
        if index >= self.len {
            return Err(SystemError::OutOfRange);
        }
        self.region.bytes[self.offset + index].store(value, Ordering::Release);
        Ok(())
    }

    /// Copies `data` into the mapping starting at `at`.
    pub fn write(&self, at: usize, data: &[u8]) -> SystemResult<()> {
        let cells = self.window(at, data.len())?;
        for (cell, byte) in cells.iter().zip(data) {
            cell.store(*byte, Ordering::Release);
        }
        Ok(())
    }

    /// Fills `out` from the mapping starting at `at`.
    pub fn read(&self, at: usize, out: &mut [u8]) -> SystemResult<()> {
        let cells = self.window(at, out.len())?;
        for (cell, byte) in cells.iter().zip(out.iter_mut()) {
            *byte = cell.load(Ordering::Acquire);
        }
        Ok(())
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.region.bytes[self.offset..self.offset + self.len]
            .iter()
            .map(|cell| cell.load(Ordering::Acquire))
            .collect()
    }

    fn window(&self, at: usize, len: usize) -> SystemResult<&[AtomicU8]> {
        match at.checked_add(len) {
            Some(end) if end <= self.len => {
                Ok(&self.region.bytes[self.offset + at..self.offset + end])
            }
            _ => Err(SystemError::OutOfRange),
        }
    }
}

impl fmt::Debug for BufferMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferMapping")
            .field("offset", &self.offset)
            .field("len", &self.len)
            .finish()
    }
}
