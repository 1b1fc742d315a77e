//! Stub engine for executor and session tests.
//!
//! [`StubEngine`] does no physics. It counts steps, reports a fixed entity
//! count, and fails whichever operations a test marks with
//! [`StubEngine::failing`].

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tandem_core::{
    Engine, EngineControl, EngineError, LogCallback, StepCallback, StepInfo, COORDS_PER_ENTITY,
};

/// Engine operations a [`StubEngine`] can be told to fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StubOp {
    Start,
    Stop,
    Step,
    RunScript,
    ComputeParticles,
    SyncComputes,
    SyncFixes,
    SyncVariables,
    Cancel,
    SetPaused,
}

/// Control handle of a [`StubEngine`]. Counts calls so tests can assert
/// that control commands reached the engine.
#[derive(Debug, Default)]
pub struct StubControl {
    fail_cancel: bool,
    fail_set_paused: bool,
    cancel_requested: AtomicBool,
    paused: AtomicBool,
    pub cancel_calls: AtomicUsize,
    pub set_paused_calls: AtomicUsize,
}

impl StubControl {
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }
}

impl EngineControl for StubControl {
    fn cancel(&self) -> Result<(), EngineError> {
        self.cancel_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_cancel {
            return Err(EngineError::new("stub: cancel failed"));
        }
        self.cancel_requested.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn set_paused(&self, paused: bool) -> Result<(), EngineError> {
        self.set_paused_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_set_paused {
            return Err(EngineError::new("stub: set_paused failed"));
        }
        self.paused.store(paused, Ordering::SeqCst);
        Ok(())
    }
}

/// An engine with scripted counters and injectable failures.
///
/// Scripts understand these directives, one per line: `atoms N` sets the
/// entity count, `steps N` advances `N` steps through the callback and
/// `panic TEXT` panics with `TEXT`. Anything else fails the script.
pub struct StubEngine {
    atoms: u64,
    timestep: u64,
    running: bool,
    short_window: bool,
    window: Vec<f32>,
    failing: HashSet<StubOp>,
    control: Arc<StubControl>,
    on_step: Option<StepCallback>,
    on_log: Option<LogCallback>,
}

impl StubEngine {
    pub fn new() -> Self {
        Self {
            atoms: 0,
            timestep: 0,
            running: false,
            short_window: false,
            window: Vec::new(),
            failing: HashSet::new(),
            control: Arc::new(StubControl::default()),
            on_step: None,
            on_log: None,
        }
    }

    /// Start with `atoms` entities.
    pub fn with_atoms(mut self, atoms: u64) -> Self {
        self.atoms = atoms;
        self
    }

    /// Make `compute_particles` produce one value fewer than needed.
    pub fn with_short_window(mut self) -> Self {
        self.short_window = true;
        self
    }

    /// Make `op` fail with an engine error.
    pub fn failing(mut self, op: StubOp) -> Self {
        self.failing.insert(op);
        let control = StubControl {
            fail_cancel: self.failing.contains(&StubOp::Cancel),
            fail_set_paused: self.failing.contains(&StubOp::SetPaused),
            ..StubControl::default()
        };
        self.control = Arc::new(control);
        self
    }

    /// The control handle, as the concrete type.
    pub fn stub_control(&self) -> Arc<StubControl> {
        Arc::clone(&self.control)
    }

    fn check(&self, op: StubOp) -> Result<(), EngineError> {
        if self.failing.contains(&op) {
            Err(EngineError::new(format!("stub: {op:?} failed")))
        } else {
            Ok(())
        }
    }

    fn advance(&mut self) -> bool {
        self.timestep += 1;
        let info = StepInfo {
            timestep: self.timestep,
            num_atoms: self.atoms,
        };
        match self.on_step.as_mut() {
            Some(callback) => callback(info),
            None => false,
        }
    }
}

impl Default for StubEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for StubEngine {
    fn start(&mut self) -> Result<(), EngineError> {
        self.check(StubOp::Start)?;
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        self.check(StubOp::Stop)?;
        self.running = false;
        Ok(())
    }

    fn step(&mut self) -> Result<(), EngineError> {
        self.check(StubOp::Step)?;
        self.advance();
        Ok(())
    }

    fn run_script(&mut self, script: &str) -> Result<(), EngineError> {
        self.check(StubOp::RunScript)?;
        self.control.cancel_requested.store(false, Ordering::SeqCst);
        for line in script.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if let Some(message) = line.strip_prefix("panic ") {
                panic!("{message}");
            }
            let parsed = line
                .split_once(' ')
                .and_then(|(word, n)| Some((word, n.trim().parse::<u64>().ok()?)));
            match parsed {
                Some(("atoms", n)) => self.atoms = n,
                Some(("steps", n)) => {
                    for _ in 0..n {
                        if self.advance() || self.control.is_cancel_requested() {
                            return Ok(());
                        }
                    }
                }
                _ => return Err(EngineError::new(format!("stub: cannot run '{line}'"))),
            }
            if let Some(log) = self.on_log.as_mut() {
                log(line);
            }
        }
        Ok(())
    }

    fn num_atoms(&self) -> u64 {
        self.atoms
    }

    fn timesteps(&self) -> u64 {
        self.timestep
    }

    fn memory_usage(&self) -> u64 {
        (self.window.capacity() * std::mem::size_of::<f32>()) as u64
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn timesteps_per_second(&self) -> f64 {
        0.0
    }

    fn compute_particles(&mut self) -> Result<u64, EngineError> {
        self.check(StubOp::ComputeParticles)?;
        let mut len = self.atoms as usize * COORDS_PER_ENTITY;
        if self.short_window {
            len = len.saturating_sub(1);
        }
        self.window = (0..len).map(|i| i as f32).collect();
        Ok(self.atoms)
    }

    fn positions(&self) -> &[f32] {
        &self.window
    }

    fn sync_computes(&mut self) -> Result<(), EngineError> {
        self.check(StubOp::SyncComputes)
    }

    fn sync_fixes(&mut self) -> Result<(), EngineError> {
        self.check(StubOp::SyncFixes)
    }

    fn sync_variables(&mut self) -> Result<(), EngineError> {
        self.check(StubOp::SyncVariables)
    }

    fn control(&self) -> Arc<dyn EngineControl> {
        Arc::clone(&self.control) as Arc<dyn EngineControl>
    }

    fn set_step_callback(&mut self, callback: StepCallback) {
        self.on_step = Some(callback);
    }

    fn set_log_callback(&mut self, callback: LogCallback) {
        self.on_log = Some(callback);
    }
}

/// A factory that always fails, for exercising init failure paths.
pub fn failing_factory(message: &'static str) -> impl FnMut() -> Result<StubEngine, EngineError> + Send {
    move || Err(EngineError::new(message))
}
