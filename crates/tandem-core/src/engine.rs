//! The boundary to the simulation engine.
//!
//! The engine is an external collaborator: opaque, synchronous, and able
//! to occupy its thread for an unbounded time inside [`Engine::run_script`].
//! The control plane only needs the operations below. Everything that must
//! work while the engine is busy goes through the [`EngineControl`] handle,
//! which is shared across threads.

use std::sync::Arc;

use crate::error::EngineError;

/// Counters handed to the step callback after every completed step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StepInfo {
    /// Timestep after the step.
    pub timestep: u64,
    /// Live entity count after the step.
    pub num_atoms: u64,
}

/// Invoked by the engine once per completed step.
///
/// Returns whether the caller wants the run cancelled. The executor
/// always returns `false`; cancellation travels through
/// [`EngineControl::cancel`] instead.
pub type StepCallback = Box<dyn FnMut(StepInfo) -> bool + Send>;

/// Invoked by the engine for every line of log output.
pub type LogCallback = Box<dyn FnMut(&str) + Send>;

/// Thread-safe control surface of an engine.
///
/// Calls only raise requests; the engine acts on them at its next step
/// boundary.
pub trait EngineControl: Send + Sync {
    /// Request cancellation of the current run.
    fn cancel(&self) -> Result<(), EngineError>;

    /// Set the engine's own paused state.
    fn set_paused(&self, paused: bool) -> Result<(), EngineError>;
}

/// A simulation engine driven by the executor thread.
///
/// Implementations own their particle state in reduced (`f32`)
/// precision and expose it as a read-only window after
/// [`compute_particles`](Engine::compute_particles).
pub trait Engine: Send {
    /// Mark the engine as running.
    fn start(&mut self) -> Result<(), EngineError>;

    /// Mark the engine as stopped.
    fn stop(&mut self) -> Result<(), EngineError>;

    /// Advance exactly one step, invoking the step callback once.
    fn step(&mut self) -> Result<(), EngineError>;

    /// Execute a script. May run many steps, invoking the step callback
    /// after each.
    fn run_script(&mut self, script: &str) -> Result<(), EngineError>;

    /// Live entity count.
    fn num_atoms(&self) -> u64;

    /// Current timestep.
    fn timesteps(&self) -> u64;

    /// Engine memory footprint in bytes.
    fn memory_usage(&self) -> u64;

    /// Whether the engine reports itself running.
    fn is_running(&self) -> bool;

    /// Recent throughput in timesteps per second.
    fn timesteps_per_second(&self) -> f64;

    /// Materialize the internal position representation into the window
    /// returned by [`positions`](Engine::positions). Returns the number of
    /// entities materialized.
    fn compute_particles(&mut self) -> Result<u64, EngineError>;

    /// The engine's position window: `x, y, z` per entity in `f32`.
    fn positions(&self) -> &[f32];

    /// Synchronize compute definitions.
    fn sync_computes(&mut self) -> Result<(), EngineError>;

    /// Synchronize fix definitions.
    fn sync_fixes(&mut self) -> Result<(), EngineError>;

    /// Synchronize variable definitions.
    fn sync_variables(&mut self) -> Result<(), EngineError>;

    /// The thread-safe control handle.
    fn control(&self) -> Arc<dyn EngineControl>;

    /// Register the per-step callback, replacing any previous one.
    fn set_step_callback(&mut self, callback: StepCallback);

    /// Register the log callback, replacing any previous one.
    fn set_log_callback(&mut self, callback: LogCallback);
}
