//! The executor's lifecycle state, readable from any thread.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// Where the executor is in its lifecycle.
///
/// `Uninitialized → Initializing → Ready`, then around each engine call
/// `Ready → Running → Ready`. While running, the executor may sit in
/// `Paused` (pause flag set) or `Resizing` (waiting for a larger buffer).
/// A cancelled run ends in `Cancelled`, which holds until the next
/// engine call starts. `Stopped` is terminal: the executor thread exited.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ExecutorState {
    /// No engine yet.
    Uninitialized = 0,
    /// The engine factory is running.
    Initializing = 1,
    /// Idle with an engine.
    Ready = 2,
    /// Inside an engine call.
    Running = 3,
    /// Inside an engine call, held at a step boundary by the pause flag.
    Paused = 4,
    /// Waiting for the driver to supply a larger positions buffer.
    Resizing = 5,
    /// The last run was cancelled.
    Cancelled = 6,
    /// The executor thread has exited.
    Stopped = 7,
}

impl ExecutorState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Uninitialized,
            1 => Self::Initializing,
            2 => Self::Ready,
            3 => Self::Running,
            4 => Self::Paused,
            5 => Self::Resizing,
            6 => Self::Cancelled,
            _ => Self::Stopped,
        }
    }

    /// Whether an engine exists and accepts commands.
    pub fn has_engine(self) -> bool {
        matches!(
            self,
            Self::Ready | Self::Running | Self::Paused | Self::Resizing | Self::Cancelled
        )
    }

    /// Whether the executor is inside an engine call.
    pub fn is_busy(self) -> bool {
        matches!(self, Self::Running | Self::Paused | Self::Resizing)
    }

    /// Lowercase name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Initializing => "initializing",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Resizing => "resizing",
            Self::Cancelled => "cancelled",
            Self::Stopped => "stopped",
        }
    }
}

impl fmt::Display for ExecutorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Atomic holder for an [`ExecutorState`].
///
/// Written only by the executor thread; read by anyone.
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(ExecutorState::Uninitialized as u8))
    }

    pub(crate) fn load(&self) -> ExecutorState {
        ExecutorState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn store(&self, state: ExecutorState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Swap in `state`, returning the previous one.
    pub(crate) fn replace(&self, state: ExecutorState) -> ExecutorState {
        ExecutorState::from_u8(self.0.swap(state as u8, Ordering::AcqRel))
    }

    /// Move from `from` to `to` only if the current state is `from`.
    pub(crate) fn transition(&self, from: ExecutorState, to: ExecutorState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Mark the current run cancelled. Does nothing outside a run.
    pub(crate) fn cancel_run(&self) -> bool {
        let busy = [
            ExecutorState::Running,
            ExecutorState::Paused,
            ExecutorState::Resizing,
        ];
        busy.into_iter()
            .any(|from| self.transition(from, ExecutorState::Cancelled))
    }

    /// End a run: back to `Ready` unless it was cancelled.
    pub(crate) fn finish_run(&self) {
        if self.load() != ExecutorState::Cancelled {
            self.store(ExecutorState::Ready);
        }
    }
}
