//! The driver's handle to a running simulation.
//!
//! [`SimulationSession`] owns the shared region, spawns the executor and
//! router threads, and exposes the command surface. Every command method
//! returns immediately with a [`PendingReply`]; the caller decides whether
//! to block on it.
//!
//! # Threads
//!
//! - `tandem-executor` owns the engine and runs commands.
//! - `tandem-router` settles replies, sweeps timeouts, answers resize
//!   requests, and runs event observers.
//!
//! # Shutdown
//!
//! [`shutdown`](SimulationSession::shutdown) walks a three-phase state
//! machine. **Draining:** clear the pause flag, ask the executor to stop,
//! unpark it, and wait up to `drain_budget`. **Quiescing:** close the
//! command channel and stop the router. **Dropped:** join both threads.
//! Every command still pending is rejected with `Disconnected`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use tandem_core::{
    Command, CommandError, CommandId, CommandOutput, DataField, Engine, EngineError, Event,
    EventKind, InitPayload, MetaField, MetadataRecord, MetadataSnapshot, PositionBuffer,
    SubscriptionId,
};

use crate::channel::message_channel;
use crate::config::{ConfigError, SessionConfig};
use crate::dispatcher::{CommandDispatcher, PendingReply};
use crate::events::EventEmitter;
use crate::executor::SimulationExecutor;
use crate::poll::{BoundedPoll, PollOutcome};
use crate::resize::ResizeCoordinator;
use crate::router::Router;
use crate::state::{ExecutorState, StateCell};

// ── ShutdownReport ───────────────────────────────────────────────

/// Report from the shutdown state machine.
#[derive(Debug)]
pub struct ShutdownReport {
    /// Total time spent in the shutdown sequence.
    pub total_ms: u64,
    /// Time spent waiting for the executor to stop.
    pub drain_ms: u64,
    /// Whether the executor thread stopped and was joined.
    pub executor_joined: bool,
    /// Whether the router thread was joined.
    pub router_joined: bool,
    /// Commands still pending at shutdown, rejected with `Disconnected`.
    pub abandoned_commands: usize,
}

// ── ShutdownState ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShutdownState {
    Running,
    Draining,
    Quiescing,
    Dropped,
}

// ── SimulationSession ────────────────────────────────────────────

/// Driver-side handle to a simulation running on its own thread.
pub struct SimulationSession {
    metadata: Arc<MetadataRecord>,
    resize: Arc<ResizeCoordinator>,
    dispatcher: Arc<CommandDispatcher>,
    emitter: Arc<EventEmitter>,
    executor_state: Arc<StateCell>,
    router_stop: Arc<AtomicBool>,
    executor_thread: Option<JoinHandle<()>>,
    router_thread: Option<JoinHandle<usize>>,
    state: ShutdownState,
    drain_budget: Duration,
}

impl SimulationSession {
    /// Validate `config`, allocate the shared region, and spawn the
    /// executor and router threads.
    ///
    /// `factory` runs on the executor thread when the first `init`
    /// arrives. If it fails, a later `init` calls it again.
    pub fn spawn<E, F>(factory: F, config: SessionConfig) -> Result<Self, ConfigError>
    where
        E: Engine + 'static,
        F: FnMut() -> Result<E, EngineError> + Send + 'static,
    {
        config.validate()?;

        let metadata = Arc::new(MetadataRecord::new(config.initial_capacity as u64));
        let positions = Arc::new(PositionBuffer::with_capacity(config.initial_capacity));
        let (driver, executor_end) = message_channel(config.command_channel_capacity);
        let executor_state = Arc::new(StateCell::new());
        let dispatcher = Arc::new(CommandDispatcher::new(driver.commands, config.command_timeout));
        let emitter = Arc::new(EventEmitter::new());
        let resize = Arc::new(ResizeCoordinator::new(
            Arc::clone(&metadata),
            positions,
            config.min_capacity,
        ));
        let router_stop = Arc::new(AtomicBool::new(false));

        let executor = SimulationExecutor::new(
            Box::new(factory),
            executor_end,
            Arc::clone(&executor_state),
            &config,
        );
        let executor_thread = thread::Builder::new()
            .name("tandem-executor".into())
            .spawn(move || executor.run())
            .map_err(|e| ConfigError::ThreadSpawnFailed {
                reason: format!("executor: {e}"),
            })?;

        let router = Router {
            replies: driver.replies,
            dispatcher: Arc::clone(&dispatcher),
            emitter: Arc::clone(&emitter),
            resize: Arc::clone(&resize),
            stop: Arc::clone(&router_stop),
            sweep_interval: config.sweep_interval,
        };
        // On failure the dispatcher drops here, which disconnects the
        // command channel and lets the executor thread exit.
        let router_thread = thread::Builder::new()
            .name("tandem-router".into())
            .spawn(move || router.run())
            .map_err(|e| ConfigError::ThreadSpawnFailed {
                reason: format!("router: {e}"),
            })?;

        info!(capacity = config.initial_capacity, "simulation session started");
        Ok(Self {
            metadata,
            resize,
            dispatcher,
            emitter,
            executor_state,
            router_stop,
            executor_thread: Some(executor_thread),
            router_thread: Some(router_thread),
            state: ShutdownState::Running,
            drain_budget: config.drain_budget,
        })
    }

    // ── Commands ─────────────────────────────────────────────────

    /// Dispatch any command.
    pub fn send(&self, command: Command) -> PendingReply {
        self.dispatcher.send(command)
    }

    /// Dispatch any command and hand its outcome to `continuation`, which
    /// runs on the router thread (or right here if the send fails).
    pub fn send_with<F>(&self, command: Command, continuation: F) -> CommandId
    where
        F: FnOnce(Result<CommandOutput, CommandError>) + Send + 'static,
    {
        self.dispatcher.send_with(command, Box::new(continuation))
    }

    /// Build the engine and bind the shared region. Idempotent: once the
    /// engine exists, `init` only rebinds buffers.
    pub fn init(&self) -> PendingReply {
        self.send(Command::Init(InitPayload::full(
            Arc::clone(&self.metadata),
            self.resize.view(),
        )))
    }

    /// Run a script on the engine.
    pub fn run_script(&self, script: impl Into<String>) -> PendingReply {
        self.send(Command::RunScript {
            script: script.into(),
        })
    }

    /// Advance one step.
    pub fn step(&self) -> PendingReply {
        self.send(Command::Step)
    }

    /// Read engine values. The reply maps each distinct requested field to
    /// its value, in request order.
    pub fn get_data(&self, fields: &[DataField]) -> PendingReply {
        self.send(Command::GetData {
            fields: fields.iter().copied().collect(),
        })
    }

    /// Copy current positions into the positions buffer.
    pub fn update_positions(&self) -> PendingReply {
        self.send(Command::UpdatePositions)
    }

    /// Hold the engine at its next step boundary.
    ///
    /// Sets the pause flag immediately, so the hold takes effect even
    /// before the command reaches the executor.
    pub fn pause(&self) -> PendingReply {
        self.metadata.store(MetaField::PauseFlag, 1);
        self.send(Command::Pause)
    }

    /// Set the pause flag without sending a command. The executor parks
    /// at its next step boundary; the engine's own paused state is left
    /// alone.
    pub fn request_pause(&self) {
        self.metadata.store(MetaField::PauseFlag, 1);
    }

    /// Release a pause.
    pub fn resume(&self) -> PendingReply {
        self.metadata.store(MetaField::PauseFlag, 0);
        self.wake_executor();
        self.send(Command::Resume)
    }

    /// Set the pause flag and the engine's own paused state together.
    pub fn set_paused(&self, paused: bool) -> PendingReply {
        self.metadata.store(MetaField::PauseFlag, u64::from(paused));
        if !paused {
            self.wake_executor();
        }
        self.send(Command::SetPaused { paused })
    }

    /// Cancel the current run at its next step boundary.
    pub fn cancel(&self) -> PendingReply {
        let reply = self.send(Command::Cancel);
        self.wake_executor();
        reply
    }

    /// Engine start pass-through.
    pub fn start(&self) -> PendingReply {
        self.send(Command::Start)
    }

    /// Engine stop pass-through. The executor keeps running.
    pub fn stop(&self) -> PendingReply {
        self.send(Command::Stop)
    }

    /// Synchronize engine compute definitions.
    pub fn sync_computes(&self) -> PendingReply {
        self.send(Command::SyncComputes)
    }

    /// Synchronize engine fix definitions.
    pub fn sync_fixes(&self) -> PendingReply {
        self.send(Command::SyncFixes)
    }

    /// Synchronize engine variable definitions.
    pub fn sync_variables(&self) -> PendingReply {
        self.send(Command::SyncVariables)
    }

    // ── Shared region ────────────────────────────────────────────

    /// Copy of the metadata record.
    pub fn metadata(&self) -> MetadataSnapshot {
        self.metadata.snapshot()
    }

    /// Entity count last published by the executor.
    pub fn entity_count(&self) -> u64 {
        self.metadata.entity_count()
    }

    /// Timestep last published by the executor.
    pub fn timestep(&self) -> u64 {
        self.metadata.timestep()
    }

    /// Entities the current positions buffer holds.
    pub fn capacity(&self) -> u64 {
        self.metadata.capacity()
    }

    /// Whether the pause flag is set.
    pub fn is_paused(&self) -> bool {
        self.metadata.is_paused()
    }

    /// Whether a resize fence is up.
    pub fn resize_in_progress(&self) -> bool {
        self.metadata.resize_in_progress()
    }

    /// The current positions buffer. Replaced wholesale on resize; hold
    /// the `Arc` only as long as needed.
    pub fn positions_buffer(&self) -> Arc<PositionBuffer> {
        self.resize.view()
    }

    /// Positions of the published entities, three values each.
    ///
    /// Fails with `ResizeInProgress` while the region is fenced.
    pub fn read_positions(&self) -> Result<Vec<f64>, CommandError> {
        if self.metadata.resize_in_progress() {
            return Err(CommandError::ResizeInProgress);
        }
        let buffer = self.resize.view();
        let entities = usize::try_from(self.metadata.entity_count()).unwrap_or(usize::MAX);
        Ok(buffer.to_vec(entities.min(buffer.capacity())))
    }

    /// Resizes completed since the session started.
    pub fn resize_count(&self) -> u64 {
        self.resize.completed()
    }

    // ── Observation ──────────────────────────────────────────────

    /// Register an observer for events of `kind`. Observers run on the
    /// router thread and must not block.
    pub fn on<F>(&self, kind: EventKind, observer: F) -> SubscriptionId
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        self.emitter.on(kind, observer)
    }

    /// Remove an observer. Returns whether it was registered.
    pub fn off(&self, id: SubscriptionId) -> bool {
        self.emitter.off(id)
    }

    /// The executor's lifecycle state.
    pub fn executor_state(&self) -> ExecutorState {
        self.executor_state.load()
    }

    /// Commands awaiting an outcome.
    pub fn in_flight(&self) -> usize {
        self.dispatcher.in_flight()
    }

    /// The per-command timeout.
    pub fn command_timeout(&self) -> Duration {
        self.dispatcher.timeout()
    }

    // ── Shutdown ─────────────────────────────────────────────────

    /// Stop both threads. Safe to call more than once.
    pub fn shutdown(&mut self) -> ShutdownReport {
        if self.state == ShutdownState::Dropped {
            return ShutdownReport {
                total_ms: 0,
                drain_ms: 0,
                executor_joined: true,
                router_joined: true,
                abandoned_commands: 0,
            };
        }

        let start = Instant::now();

        // Phase 1: Running → Draining
        self.state = ShutdownState::Draining;
        self.metadata.store(MetaField::PauseFlag, 0);
        self.dispatcher.signal_shutdown();
        self.wake_executor();

        let stopped = BoundedPoll::new(Duration::from_millis(1))
            .with_timeout(self.drain_budget)
            .wait(|| self.executor_state.load() == ExecutorState::Stopped)
            == PollOutcome::Satisfied;
        let drain_ms = start.elapsed().as_millis() as u64;

        // Phase 2: Draining → Quiescing
        self.state = ShutdownState::Quiescing;
        self.dispatcher.close();
        self.router_stop.store(true, Ordering::Release);

        // Phase 3: Quiescing → Dropped
        self.state = ShutdownState::Dropped;

        let executor_joined = match self.executor_thread.take() {
            Some(handle) if stopped => handle.join().is_ok(),
            Some(_) => {
                warn!(
                    budget_ms = self.drain_budget.as_millis() as u64,
                    "executor did not stop in time; detaching"
                );
                false
            }
            None => true,
        };
        let (router_joined, abandoned_commands) = match self.router_thread.take() {
            Some(handle) => match handle.join() {
                Ok(abandoned) => (true, abandoned),
                Err(_) => (false, 0),
            },
            None => (true, 0),
        };

        let total_ms = start.elapsed().as_millis() as u64;
        debug!(total_ms, drain_ms, abandoned_commands, "session shut down");
        ShutdownReport {
            total_ms,
            drain_ms,
            executor_joined,
            router_joined,
            abandoned_commands,
        }
    }

    /// Cut short whatever nap the executor is taking.
    fn wake_executor(&self) {
        if let Some(handle) = &self.executor_thread {
            handle.thread().unpark();
        }
    }
}

impl Drop for SimulationSession {
    fn drop(&mut self) {
        if self.state != ShutdownState::Dropped {
            self.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tandem_lattice::{LatticeConfig, LatticeEngine};
    use tandem_test_utils::wait_until;

    fn test_config() -> SessionConfig {
        SessionConfig {
            command_timeout: Duration::from_secs(10),
            pause_poll_interval: Duration::from_millis(2),
            initial_capacity: 100,
            ..SessionConfig::default()
        }
    }

    fn lattice_session() -> SimulationSession {
        SimulationSession::spawn(|| Ok(LatticeEngine::new(LatticeConfig::default())), test_config())
            .unwrap()
    }

    #[test]
    fn invalid_config_spawns_nothing() {
        let config = SessionConfig {
            command_channel_capacity: 0,
            ..SessionConfig::default()
        };
        let result =
            SimulationSession::spawn(|| Ok(LatticeEngine::new(LatticeConfig::default())), config);
        assert!(matches!(result, Err(ConfigError::ChannelCapacityZero)));
    }

    #[test]
    fn init_and_step() {
        let mut session = lattice_session();
        assert_eq!(session.init().wait(), Ok(CommandOutput::Ack));
        assert_eq!(session.executor_state(), ExecutorState::Ready);
        session.run_script("create_atoms 5").wait().unwrap();
        session.step().wait().unwrap();
        assert_eq!(session.timestep(), 1);
        assert_eq!(session.entity_count(), 5);
        let report = session.shutdown();
        assert!(report.executor_joined);
        assert!(report.router_joined);
        assert_eq!(session.executor_state(), ExecutorState::Stopped);
    }

    #[test]
    fn request_pause_parks_step_until_resume() {
        let session = lattice_session();
        session.init().wait().unwrap();
        session.request_pause();
        assert!(session.is_paused());

        let step = session.step();
        assert!(wait_until(Duration::from_secs(5), || {
            session.executor_state() == ExecutorState::Paused
        }));
        assert!(step.try_wait().is_none());

        session.resume().wait().unwrap();
        assert_eq!(step.wait(), Ok(CommandOutput::Ack));
        assert_eq!(session.timestep(), 1);
    }

    #[test]
    fn read_positions_after_update() {
        let session = lattice_session();
        session.init().wait().unwrap();
        session.run_script("create_atoms 3").wait().unwrap();
        session.update_positions().wait().unwrap();
        let positions = session.read_positions().unwrap();
        assert_eq!(positions.len(), 9);
    }

    #[test]
    fn read_positions_fenced_during_resize() {
        let session = lattice_session();
        session.metadata.store(MetaField::ResizeFlag, 1);
        assert_eq!(session.read_positions(), Err(CommandError::ResizeInProgress));
    }

    #[test]
    fn commands_after_shutdown_are_disconnected() {
        let mut session = lattice_session();
        session.shutdown();
        assert_eq!(session.step().wait(), Err(CommandError::Disconnected));
        let again = session.shutdown();
        assert_eq!(again.total_ms, 0);
    }

    #[test]
    fn drop_triggers_shutdown() {
        let session = lattice_session();
        session.init().wait().unwrap();
        drop(session);
        // If this doesn't hang, shutdown worked.
    }

    #[test]
    fn shutdown_budget() {
        let mut session = lattice_session();
        session.init().wait().unwrap();
        let report = session.shutdown();
        // Generous for slow CI runners.
        assert!(
            report.total_ms < 2000,
            "shutdown took too long: {}ms",
            report.total_ms
        );
    }
}
