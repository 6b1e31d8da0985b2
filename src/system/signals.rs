//! Handle signals and the per-handle signal state.

bitflags::bitflags! {
    /// Signals a caller can wait for on a handle.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct HandleSignals: u32 {
        const READABLE = 1 << 0;
        const WRITABLE = 1 << 1;
        const PEER_CLOSED = 1 << 2;
    }
}

/// Snapshot of a handle's signals.
///
/// `satisfied` is what is true right now; `satisfiable` is what can still
/// become true. `satisfied` is always a subset of `satisfiable`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct HandleSignalsState {
    pub satisfied: HandleSignals,
    pub satisfiable: HandleSignals,
}

impl HandleSignalsState {
    pub fn new(satisfied: HandleSignals, satisfiable: HandleSignals) -> Self {
        debug_assert!(satisfiable.contains(satisfied));
        Self {
            satisfied,
            satisfiable,
        }
    }

    /// True if any of `signals` is currently satisfied.
    #[inline]
    pub fn satisfies(&self, signals: HandleSignals) -> bool {
        self.satisfied.intersects(signals)
    }

    /// True if any of `signals` may still become satisfied.
    #[inline]
    pub fn can_satisfy(&self, signals: HandleSignals) -> bool {
        self.satisfiable.intersects(signals)
    }

    #[inline]
    pub fn is_readable(&self) -> bool {
        self.satisfied.contains(HandleSignals::READABLE)
    }

    #[inline]
    pub fn is_writable(&self) -> bool {
        self.satisfied.contains(HandleSignals::WRITABLE)
    }

    #[inline]
    pub fn is_peer_closed(&self) -> bool {
        self.satisfied.contains(HandleSignals::PEER_CLOSED)
    }
}
