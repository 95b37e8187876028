//! Trigger firing state and recursion accounting.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::cache::Triglist;
use crate::ids::ObjectHandle;
use crate::trigger::TriggerEvent;

/// RAII guard for the shared recursion-depth counter.
///
/// Increments on creation and decrements on drop, so every exit path of a
/// firing restores the counter.
#[derive(Debug)]
pub(crate) struct DepthGuard {
    counter: Arc<AtomicUsize>,
    level: usize,
}

impl DepthGuard {
    /// Enter a new level. Returns `None` (leaving the counter untouched)
    /// when the level would exceed `limit`.
    pub(crate) fn try_enter(counter: &Arc<AtomicUsize>, limit: usize) -> Option<Self> {
        let level = counter.fetch_add(1, Ordering::SeqCst) + 1;
        let guard = Self {
            counter: Arc::clone(counter),
            level,
        };
        (level <= limit).then_some(guard)
    }

    /// 1-based nesting level this guard holds.
    pub(crate) const fn level(&self) -> usize {
        self.level
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Where a [`TriggerState`] is in the firing protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatePhase {
    /// Created by prepare; BEFORE not yet run.
    Prepared,
    /// BEFORE phase ran.
    BeforeFired,
    /// AFTER phase ran; leftovers are deferred.
    Finished,
    /// Aborted; the list was discarded.
    Aborted,
}

impl StatePhase {
    /// Upper-case name for diagnostics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Prepared => "prepared",
            Self::BeforeFired => "before-fired",
            Self::Finished => "finished",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for StatePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Work list for one firing of one event.
///
/// Created by `prepare`, driven through `fire_before`/`fire_after`, and
/// disposed exactly once by finishing or aborting. Dropping a state
/// without finishing it aborts it.
pub struct TriggerState {
    pub(crate) event: TriggerEvent,
    pub(crate) list: Triglist,
    pub(crate) phase: StatePhase,
    pub(crate) level: usize,
    pub(crate) guard: Option<DepthGuard>,
}

impl TriggerState {
    pub(crate) fn new(event: TriggerEvent, list: Triglist, guard: DepthGuard) -> Self {
        Self {
            event,
            list,
            phase: StatePhase::Prepared,
            level: guard.level(),
            guard: Some(guard),
        }
    }

    /// Event being fired.
    #[must_use]
    pub const fn event(&self) -> TriggerEvent {
        self.event
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> StatePhase {
        self.phase
    }

    /// Nesting level this state was prepared at (1 = outermost).
    #[must_use]
    pub const fn level(&self) -> usize {
        self.level
    }

    /// Number of triggers still pending.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.list.len()
    }

    /// Pending triggers in firing order.
    #[must_use]
    pub fn handles(&self) -> Vec<ObjectHandle> {
        self.list.handles().collect()
    }

    /// Drop the remaining work and release the depth level.
    pub(crate) fn abort(&mut self) {
        self.list.clear();
        self.guard = None;
        if self.phase != StatePhase::Finished {
            self.phase = StatePhase::Aborted;
        }
    }

    /// Release the depth level after a normal completion.
    pub(crate) fn finish(&mut self) {
        self.guard = None;
        self.phase = StatePhase::Finished;
    }
}

impl fmt::Debug for TriggerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TriggerState")
            .field("event", &self.event)
            .field("phase", &self.phase)
            .field("level", &self.level)
            .field("pending", &self.list.len())
            .finish()
    }
}
