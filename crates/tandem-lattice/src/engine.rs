//! [`LatticeEngine`]: free particles in a periodic box.
//!
//! Each step moves every particle by `velocity * dt` and wraps it back
//! into `[0, box_length)` on every axis. Particles and velocities are
//! drawn from a seeded ChaCha8 RNG, so identical seeds and scripts give
//! identical trajectories.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use tandem_core::{
    Engine, EngineControl, EngineError, LogCallback, StepCallback, StepInfo, COORDS_PER_ENTITY,
    MAX_ENTITIES,
};

use crate::script::{self, Directive};

/// Construction parameters for a [`LatticeEngine`].
#[derive(Clone, Debug)]
pub struct LatticeConfig {
    /// Edge length of the periodic box. Default: 10.0.
    pub box_length: f32,
    /// Initial integration step. Default: 0.005.
    pub dt: f32,
    /// RNG seed. Default: 0.
    pub seed: u64,
    /// Wall-clock delay per step, for exercising pause and cancel against
    /// a slow engine. Default: zero.
    pub step_delay: Duration,
}

impl Default for LatticeConfig {
    fn default() -> Self {
        Self {
            box_length: 10.0,
            dt: 0.005,
            seed: 0,
            step_delay: Duration::ZERO,
        }
    }
}

/// Thread-safe control flags of a [`LatticeEngine`].
#[derive(Debug, Default)]
pub struct LatticeControl {
    cancel: AtomicBool,
    paused: AtomicBool,
}

impl LatticeControl {
    /// Whether a cancel is pending for the current run.
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::Acquire)
    }

    /// The engine's own paused state.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }
}

impl EngineControl for LatticeControl {
    fn cancel(&self) -> Result<(), EngineError> {
        self.cancel.store(true, Ordering::Release);
        Ok(())
    }

    fn set_paused(&self, paused: bool) -> Result<(), EngineError> {
        self.paused.store(paused, Ordering::Release);
        Ok(())
    }
}

/// A minimal particle engine driven by scripts.
pub struct LatticeEngine {
    config: LatticeConfig,
    dt: f32,
    rng: ChaCha8Rng,
    positions: Vec<f32>,
    velocities: Vec<f32>,
    window: Vec<f32>,
    timestep: u64,
    running: bool,
    rate: f64,
    control: Arc<LatticeControl>,
    on_step: Option<StepCallback>,
    on_log: Option<LogCallback>,
}

impl LatticeEngine {
    /// An empty box.
    pub fn new(config: LatticeConfig) -> Self {
        Self {
            dt: config.dt,
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            config,
            positions: Vec::new(),
            velocities: Vec::new(),
            window: Vec::new(),
            timestep: 0,
            running: false,
            rate: 0.0,
            control: Arc::new(LatticeControl::default()),
            on_step: None,
            on_log: None,
        }
    }

    /// The control flags, as the concrete type.
    pub fn lattice_control(&self) -> Arc<LatticeControl> {
        Arc::clone(&self.control)
    }

    /// Current integration step.
    pub fn dt(&self) -> f32 {
        self.dt
    }

    fn log(&mut self, line: &str) {
        if let Some(callback) = self.on_log.as_mut() {
            callback(line);
        }
    }

    fn create_atoms(&mut self, count: u64) -> Result<(), EngineError> {
        let length = self.config.box_length;
        let refused = || EngineError::new(format!("ERROR: Cannot create {count} atoms"));
        let room = MAX_ENTITIES.saturating_sub(self.positions.len() / COORDS_PER_ENTITY);
        let scalars = usize::try_from(count)
            .ok()
            .filter(|&n| n <= room)
            .and_then(|n| n.checked_mul(COORDS_PER_ENTITY))
            .ok_or_else(refused)?;
        self.positions.try_reserve(scalars).map_err(|_| refused())?;
        self.velocities.try_reserve(scalars).map_err(|_| refused())?;
        for _ in 0..scalars {
            self.positions.push(self.rng.random_range(0.0..length));
            self.velocities.push(self.rng.random_range(-1.0..1.0));
        }
        self.log(&format!("Created {count} atoms"));
        Ok(())
    }

    fn delete_atoms(&mut self, count: u64) {
        let count = usize::try_from(count).unwrap_or(usize::MAX);
        let keep = self.positions.len() / COORDS_PER_ENTITY;
        let keep = keep.saturating_sub(count) * COORDS_PER_ENTITY;
        self.positions.truncate(keep);
        self.velocities.truncate(keep);
        self.log(&format!("Deleted atoms; {} remain", keep / COORDS_PER_ENTITY));
    }

    fn clear(&mut self) {
        self.positions.clear();
        self.velocities.clear();
        self.window.clear();
        self.timestep = 0;
    }

    /// Advance one step and run the step callback. Returns whether the
    /// callback asked for the run to stop.
    fn advance(&mut self) -> bool {
        let length = self.config.box_length;
        for (x, v) in self.positions.iter_mut().zip(&self.velocities) {
            *x = (*x + v * self.dt).rem_euclid(length);
            // rem_euclid can round up to exactly `length` for tiny negatives.
            if *x >= length {
                *x = 0.0;
            }
        }
        self.timestep += 1;
        if !self.config.step_delay.is_zero() {
            thread::sleep(self.config.step_delay);
        }
        let info = StepInfo {
            timestep: self.timestep,
            num_atoms: self.num_atoms(),
        };
        match self.on_step.as_mut() {
            Some(callback) => callback(info),
            None => false,
        }
    }

    fn run(&mut self, steps: u64) -> Result<(), EngineError> {
        let started = Instant::now();
        let mut completed = 0u64;
        while completed < steps {
            let stop = self.advance();
            completed += 1;
            if stop || self.control.is_cancel_requested() {
                self.log(&format!("Run cancelled at step {}", self.timestep));
                break;
            }
        }
        let elapsed = started.elapsed().as_secs_f64();
        if completed > 0 && elapsed > 0.0 {
            self.rate = completed as f64 / elapsed;
        }
        debug!(completed, timestep = self.timestep, "run finished");
        Ok(())
    }
}

impl Engine for LatticeEngine {
    fn start(&mut self) -> Result<(), EngineError> {
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        self.running = false;
        Ok(())
    }

    fn step(&mut self) -> Result<(), EngineError> {
        let started = Instant::now();
        self.advance();
        let elapsed = started.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.rate = 1.0 / elapsed;
        }
        Ok(())
    }

    fn run_script(&mut self, script: &str) -> Result<(), EngineError> {
        let directives = script::parse(script)?;
        self.control.cancel.store(false, Ordering::Release);
        let was_running = self.running;
        self.running = true;
        let result = directives.into_iter().try_for_each(|directive| {
            if self.control.is_cancel_requested() {
                return Ok(());
            }
            match directive {
                Directive::CreateAtoms(n) => self.create_atoms(n)?,
                Directive::DeleteAtoms(n) => self.delete_atoms(n),
                Directive::Clear => self.clear(),
                Directive::Timestep(dt) => self.dt = dt,
                Directive::Run(n) => self.run(n)?,
                Directive::Print(text) => self.log(&text),
                Directive::Error(text) => return Err(EngineError::new(text)),
            }
            Ok(())
        });
        self.running = was_running;
        result
    }

    fn num_atoms(&self) -> u64 {
        (self.positions.len() / COORDS_PER_ENTITY) as u64
    }

    fn timesteps(&self) -> u64 {
        self.timestep
    }

    fn memory_usage(&self) -> u64 {
        let floats = self.positions.capacity() + self.velocities.capacity() + self.window.capacity();
        (floats * std::mem::size_of::<f32>()) as u64
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn timesteps_per_second(&self) -> f64 {
        self.rate
    }

    fn compute_particles(&mut self) -> Result<u64, EngineError> {
        self.window.clear();
        self.window.extend_from_slice(&self.positions);
        Ok(self.num_atoms())
    }

    fn positions(&self) -> &[f32] {
        &self.window
    }

    fn sync_computes(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    fn sync_fixes(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    fn sync_variables(&mut self) -> Result<(), EngineError> {
        Ok(())
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

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Mutex;

    fn engine() -> LatticeEngine {
        LatticeEngine::new(LatticeConfig::default())
    }

    #[test]
    fn create_and_run() {
        let mut e = engine();
        e.run_script("create_atoms 4\nrun 3").unwrap();
        assert_eq!(e.num_atoms(), 4);
        assert_eq!(e.timesteps(), 3);
        assert!(!e.is_running());
        assert!(e.timesteps_per_second() > 0.0);
    }

    #[test]
    fn step_callback_sees_every_step() {
        let mut e = engine();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        e.set_step_callback(Box::new(move |info| {
            sink.lock().unwrap().push(info.timestep);
            false
        }));
        e.run_script("create_atoms 1\nrun 3").unwrap();
        e.step().unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![1, 2, 3, 4]);
    }

    #[test]
    fn callback_can_stop_a_run() {
        let mut e = engine();
        e.set_step_callback(Box::new(|info| info.timestep == 2));
        e.run_script("run 10").unwrap();
        assert_eq!(e.timesteps(), 2);
    }

    #[test]
    fn cancel_ends_run_at_step_boundary() {
        let mut e = engine();
        let control = e.control();
        e.set_step_callback(Box::new(move |info| {
            if info.timestep == 5 {
                control.cancel().unwrap();
            }
            false
        }));
        e.run_script("run 100\nrun 100").unwrap();
        assert_eq!(e.timesteps(), 5);

        // A new script starts with the cancel cleared.
        e.set_step_callback(Box::new(|_| false));
        e.run_script("run 1").unwrap();
        assert_eq!(e.timesteps(), 6);
    }

    #[test]
    fn log_lines_reach_callback() {
        let mut e = engine();
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        e.set_log_callback(Box::new(move |line| sink.lock().unwrap().push(line.to_owned())));
        e.run_script("print hi\ncreate_atoms 2").unwrap();
        assert_eq!(*lines.lock().unwrap(), vec!["hi", "Created 2 atoms"]);
    }

    #[test]
    fn error_directive_fails_with_message() {
        let mut e = engine();
        let err = e.run_script("create_atoms 1\nerror lost atoms").unwrap_err();
        assert_eq!(err.message, "lost atoms");
        assert_eq!(e.num_atoms(), 1);
    }

    #[test]
    fn oversized_create_fails_cleanly() {
        let mut e = engine();
        e.run_script("create_atoms 2").unwrap();
        let err = e.run_script("create_atoms 18446744073709551615").unwrap_err();
        assert_eq!(err.message, "ERROR: Cannot create 18446744073709551615 atoms");
        assert_eq!(e.num_atoms(), 2);
        e.run_script("create_atoms 1\nrun 1").unwrap();
        assert_eq!(e.num_atoms(), 3);
    }

    #[test]
    fn delete_and_clear() {
        let mut e = engine();
        e.run_script("create_atoms 10\nrun 2\ndelete_atoms 4").unwrap();
        assert_eq!(e.num_atoms(), 6);
        e.run_script("delete_atoms 100").unwrap();
        assert_eq!(e.num_atoms(), 0);
        e.run_script("create_atoms 3\nclear").unwrap();
        assert_eq!(e.num_atoms(), 0);
        assert_eq!(e.timesteps(), 0);
    }

    #[test]
    fn window_matches_positions_after_compute() {
        let mut e = engine();
        e.run_script("create_atoms 5").unwrap();
        assert!(e.positions().is_empty());
        assert_eq!(e.compute_particles().unwrap(), 5);
        assert_eq!(e.positions().len(), 15);
        assert!(e.memory_usage() > 0);
    }

    #[test]
    fn same_seed_same_trajectory() {
        let mut a = engine();
        let mut b = engine();
        for e in [&mut a, &mut b] {
            e.run_script("create_atoms 8\nrun 20").unwrap();
            e.compute_particles().unwrap();
        }
        assert_eq!(a.positions(), b.positions());
    }

    #[test]
    fn control_tracks_paused_state() {
        let e = engine();
        let control = e.lattice_control();
        e.control().set_paused(true).unwrap();
        assert!(control.is_paused());
        e.control().set_paused(false).unwrap();
        assert!(!control.is_paused());
    }

    proptest! {
        #[test]
        fn particles_stay_in_box(seed in any::<u64>(), atoms in 1u64..50, steps in 0u64..50) {
            let config = LatticeConfig { seed, dt: 0.5, ..LatticeConfig::default() };
            let length = config.box_length;
            let mut e = LatticeEngine::new(config);
            e.run_script(&format!("create_atoms {atoms}\nrun {steps}")).unwrap();
            e.compute_particles().unwrap();
            for &x in e.positions() {
                prop_assert!((0.0..length).contains(&x), "{x} escaped the box");
            }
        }
    }
}
