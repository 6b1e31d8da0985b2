//! Wake-up plumbing between dispatchers and waiters.
//!
//! Every dispatcher keeps a list of [`Awakable`]s per side. Any state change
//! wakes the affected list; the woken waiter then re-reads signal states, so
//! a wake-up only means "something changed, look again".

use std::sync::Arc;
use std::task::Waker;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use slab::Slab;

use super::dispatcher::Dispatcher;

/// Something a dispatcher can wake when its signal state changes.
pub(crate) trait Awakable: Send + Sync {
    fn awake(&self);
}

/// Registered awakables of one dispatcher side.
#[derive(Default)]
pub(crate) struct AwakableList {
    entries: Slab<Arc<dyn Awakable>>,
}

impl AwakableList {
    pub(crate) fn add(&mut self, awakable: Arc<dyn Awakable>) -> usize {
        self.entries.insert(awakable)
    }

    pub(crate) fn remove(&mut self, key: usize) {
        self.entries.try_remove(key);
    }

    /// Clones the entries so they can be woken after the state lock is
    /// released.
    pub(crate) fn snapshot(&self) -> Vec<Arc<dyn Awakable>> {
        self.entries.iter().map(|(_, a)| a.clone()).collect()
    }
}

pub(crate) fn awake_all(awakables: Vec<Arc<dyn Awakable>>) {
    for awakable in awakables {
        awakable.awake();
    }
}

/// Parks a blocking caller until a registered dispatcher wakes it.
#[derive(Default)]
pub(crate) struct ThreadWaiter {
    woken: Mutex<bool>,
    cond: Condvar,
}

impl ThreadWaiter {
    /// Blocks until woken or until `deadline`. Returns false on timeout.
    pub(crate) fn park(&self, deadline: Option<Instant>) -> bool {
        let mut woken = self.woken.lock();
        while !*woken {
            match deadline {
                Some(deadline) => {
                    if self.cond.wait_until(&mut woken, deadline).timed_out() {
                        break;
                    }
                }
                None => self.cond.wait(&mut woken),
            }
        }
        std::mem::replace(&mut *woken, false)
    }
}

impl Awakable for ThreadWaiter {
    fn awake(&self) {
        *self.woken.lock() = true;
        self.cond.notify_all();
    }
}

/// Holds the waker of the task currently polling a wait future.
#[derive(Default)]
pub(crate) struct WakerSlot {
    waker: Mutex<Option<Waker>>,
}

impl WakerSlot {
    pub(crate) fn register(&self, waker: &Waker) {
        let mut slot = self.waker.lock();
        match slot.as_ref() {
            Some(current) if current.will_wake(waker) => {}
            _ => *slot = Some(waker.clone()),
        }
    }
}

impl Awakable for WakerSlot {
    fn awake(&self) {
        if let Some(waker) = self.waker.lock().take() {
            waker.wake();
        }
    }
}

/// Keeps an awakable registered on a set of dispatchers; deregisters on
/// drop.
pub(crate) struct Registration {
    entries: Vec<(Dispatcher, usize)>,
}

impl Registration {
    pub(crate) fn new(dispatchers: &[Dispatcher], awakable: Arc<dyn Awakable>) -> Self {
        let entries = dispatchers
            .iter()
            .map(|d| (d.clone(), d.add_awakable(awakable.clone())))
            .collect();
        Self { entries }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        for (dispatcher, key) in &self.entries {
            dispatcher.remove_awakable(*key);
        }
    }
}
