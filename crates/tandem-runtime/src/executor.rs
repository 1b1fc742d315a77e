//! The secondary context: owns the engine and executes commands.
//!
//! The executor runs on its own thread and handles one command at a time.
//! An engine call can occupy it for an unbounded time, so the step
//! callback keeps it responsive. After every step the callback mirrors
//! counters into the shared metadata record, forwards the step to the
//! driver, and drains the command channel:
//!
//! - `pause`, `resume`, `set_paused`, `cancel` go straight to the
//!   engine's [`EngineControl`] handle,
//! - `init` rebinds the positions buffer (this is how a resize completes),
//! - everything else is queued and handled after the current call returns.
//!
//! The pause wait and the resize wait drain the channel the same way.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use crossbeam_channel::{Receiver, TryRecvError};
use indexmap::IndexMap;
use tracing::{debug, error, info, warn};

use tandem_core::{
    Command, CommandError, CommandKind, CommandOutput, DataField, DataValue, Engine, EngineControl,
    EngineError, Event, InitPayload, MetaField, MetadataRecord, PositionBuffer, PositionsUpdate,
    Request, StepInfo, ToExecutor, COORDS_PER_ENTITY,
};

use crate::channel::{EventSink, ExecutorEnd};
use crate::config::SessionConfig;
use crate::events::panic_message;
use crate::poll::{BoundedPoll, PollOutcome};
use crate::state::{ExecutorState, StateCell};

/// Builds the engine on the executor thread. Called by the first `init`
/// and again by a later `init` if the previous attempt failed.
pub(crate) type EngineFactory<E> = Box<dyn FnMut() -> Result<E, EngineError> + Send>;

// ── Control commands ─────────────────────────────────────────────

#[derive(Clone, Copy, Debug)]
enum Control {
    Pause,
    Resume,
    SetPaused(bool),
    Cancel,
}

impl Control {
    fn of(command: &Command) -> Option<Self> {
        match command {
            Command::Pause => Some(Self::Pause),
            Command::Resume => Some(Self::Resume),
            Command::SetPaused { paused } => Some(Self::SetPaused(*paused)),
            Command::Cancel => Some(Self::Cancel),
            _ => None,
        }
    }
}

// ── Shared executor state ────────────────────────────────────────

#[derive(Default)]
struct Binding {
    metadata: Option<Arc<MetadataRecord>>,
    positions: Option<Arc<PositionBuffer>>,
}

struct Inbox {
    rx: Receiver<ToExecutor>,
    backlog: VecDeque<Request>,
}

struct Timing {
    pause_poll_interval: Duration,
    resize_poll_interval: Duration,
    resize_timeout: Duration,
}

/// Everything the engine callbacks need. Only the executor thread
/// touches it; the mutexes exist because the callbacks are `Send`
/// closures and are never contended.
struct ExecutorShared {
    inbox: Mutex<Inbox>,
    sink: EventSink,
    state: Arc<StateCell>,
    binding: Mutex<Binding>,
    control: OnceLock<Arc<dyn EngineControl>>,
    shutting_down: AtomicBool,
    /// Set when a resize wait timed out during the current engine call.
    resize_timed_out: AtomicBool,
    timing: Timing,
}

impl ExecutorShared {
    fn lock_inbox(&self) -> MutexGuard<'_, Inbox> {
        self.inbox.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_binding(&self) -> MutexGuard<'_, Binding> {
        self.binding.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn metadata(&self) -> Option<Arc<MetadataRecord>> {
        self.lock_binding().metadata.clone()
    }

    fn positions(&self) -> Option<Arc<PositionBuffer>> {
        self.lock_binding().positions.clone()
    }

    fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    fn request_shutdown(&self) {
        if !self.shutting_down.swap(true, Ordering::AcqRel) {
            debug!("shutdown requested");
            if let Some(control) = self.control.get() {
                if let Err(e) = control.cancel() {
                    warn!(error = %e, "engine refused cancel during shutdown");
                }
            }
        }
    }

    // ── Binding ──────────────────────────────────────────────────

    /// Adopt whichever regions `payload` carries.
    fn rebind(&self, payload: InitPayload) -> Result<CommandOutput, CommandError> {
        let mut binding = self.lock_binding();
        if let Some(metadata) = payload.metadata {
            binding.metadata = Some(metadata);
        }
        if let Some(positions) = payload.positions {
            let capacity = positions.capacity() as u64;
            binding.positions = Some(positions);
            if let Some(metadata) = &binding.metadata {
                if metadata.resize_in_progress() {
                    if metadata.entity_count() <= capacity {
                        metadata.store(MetaField::ResizeFlag, 0);
                        debug!(capacity, "rebound positions buffer; fence lifted");
                    } else {
                        warn!(
                            capacity,
                            required = metadata.entity_count(),
                            "rebound buffer is still too small"
                        );
                    }
                }
            }
        }
        Ok(CommandOutput::Ack)
    }

    // ── Metadata publication ─────────────────────────────────────

    /// Mirror engine counters into the metadata record. An entity count
    /// above capacity runs the resize handshake first.
    fn publish(&self, info: StepInfo) -> Result<(), CommandError> {
        let Some(metadata) = self.metadata() else {
            return Ok(());
        };
        metadata.store(MetaField::Timestep, info.timestep);
        if info.num_atoms > metadata.capacity() {
            return self.await_resize(&metadata, info.num_atoms);
        }
        metadata.store(MetaField::EntityCount, info.num_atoms);
        Ok(())
    }

    /// Publication from inside an engine call. Once a resize wait has
    /// timed out in this call, a fence that is still up is reported
    /// without waiting again.
    fn publish_in_run(&self, info: StepInfo) -> Result<(), CommandError> {
        if self.resize_timed_out.load(Ordering::Acquire) {
            if let Some(metadata) = self.metadata() {
                if metadata.resize_in_progress() && info.num_atoms > metadata.capacity() {
                    metadata.store(MetaField::Timestep, info.timestep);
                    metadata.store(MetaField::EntityCount, info.num_atoms);
                    return Err(CommandError::ResizeTimeout {
                        required: info.num_atoms,
                    });
                }
            }
        }
        self.publish(info)
    }

    fn await_resize(&self, metadata: &MetadataRecord, required: u64) -> Result<(), CommandError> {
        if metadata
            .compare_exchange(MetaField::ResizeFlag, 0, 1)
            .is_err()
        {
            debug!(required, "region already fenced; requesting resize again");
        }
        metadata.store(MetaField::EntityCount, required);

        let previous = self.state.replace(ExecutorState::Resizing);
        info!(required, capacity = metadata.capacity(), "waiting for larger positions buffer");
        self.sink.emit(Event::ResizeNeeded { num_atoms: required });

        let outcome = BoundedPoll::new(self.timing.resize_poll_interval)
            .with_timeout(self.timing.resize_timeout)
            .wait(|| {
                self.service_inbox();
                !metadata.resize_in_progress() || self.is_shutting_down()
            });
        self.state.transition(ExecutorState::Resizing, previous);

        match outcome {
            PollOutcome::Satisfied if self.is_shutting_down() => Err(CommandError::Disconnected),
            PollOutcome::Satisfied => Ok(()),
            PollOutcome::TimedOut => {
                self.resize_timed_out.store(true, Ordering::Release);
                warn!(required, "resize timed out; fence stays up");
                self.sink.emit(Event::Error {
                    message: format!("positions buffer resize for {required} entities timed out"),
                });
                Err(CommandError::ResizeTimeout { required })
            }
        }
    }

    // ── Control ──────────────────────────────────────────────────

    fn apply_control(&self, control: Control) -> Result<CommandOutput, CommandError> {
        let handle = self.control.get().ok_or(CommandError::NotInitialized)?;
        match control {
            Control::Pause => handle.set_paused(true)?,
            Control::Resume => handle.set_paused(false)?,
            Control::SetPaused(paused) => handle.set_paused(paused)?,
            Control::Cancel => {
                handle.cancel()?;
                if self.state.cancel_run() {
                    info!("run cancelled");
                }
            }
        }
        Ok(CommandOutput::Ack)
    }

    // ── Inbox ────────────────────────────────────────────────────

    /// Handle everything currently queued without blocking. Only
    /// commands that are safe mid-run execute; the rest are backlogged.
    fn service_inbox(&self) {
        loop {
            let message = self.lock_inbox().rx.try_recv();
            match message {
                Ok(ToExecutor::Request(request)) => self.service(request),
                Ok(ToExecutor::Shutdown) | Err(TryRecvError::Disconnected) => {
                    self.request_shutdown();
                    break;
                }
                Err(TryRecvError::Empty) => break,
            }
        }
    }

    fn service(&self, request: Request) {
        let Request { id, command } = request;
        if let Command::Init(payload) = command {
            debug!(%id, "init while busy; rebinding buffers");
            self.sink.respond(id, self.rebind(payload));
        } else if let Some(control) = Control::of(&command) {
            self.sink.respond(id, self.apply_control(control));
        } else {
            debug!(%id, kind = %command.kind(), "engine busy; queueing command");
            self.lock_inbox().backlog.push_back(Request { id, command });
        }
    }

    // ── Step callback ────────────────────────────────────────────

    fn on_step(&self, info: StepInfo) -> bool {
        if let Err(e) = self.publish_in_run(info) {
            self.sink.emit(Event::Error {
                message: e.to_string(),
            });
        }
        self.sink.emit(Event::Step {
            timestep: info.timestep,
        });
        self.service_inbox();
        if let Some(metadata) = self.metadata() {
            if metadata.is_paused() {
                self.hold_paused(&metadata, info.timestep);
            }
        }
        false
    }

    /// Hold the engine at this step boundary until the pause flag clears,
    /// the run is cancelled, or the session shuts down.
    fn hold_paused(&self, metadata: &MetadataRecord, timestep: u64) {
        if !self.state.transition(ExecutorState::Running, ExecutorState::Paused) {
            return;
        }
        info!(timestep, "paused");
        BoundedPoll::new(self.timing.pause_poll_interval).wait(|| {
            self.service_inbox();
            !metadata.is_paused()
                || self.state.load() == ExecutorState::Cancelled
                || self.is_shutting_down()
        });
        if self.state.transition(ExecutorState::Paused, ExecutorState::Running) {
            info!(timestep, "resumed");
        }
    }
}

// ── SimulationExecutor ───────────────────────────────────────────

pub(crate) struct SimulationExecutor<E: Engine> {
    factory: EngineFactory<E>,
    engine: Option<E>,
    shared: Arc<ExecutorShared>,
}

impl<E: Engine + 'static> SimulationExecutor<E> {
    pub(crate) fn new(
        factory: EngineFactory<E>,
        end: ExecutorEnd,
        state: Arc<StateCell>,
        config: &SessionConfig,
    ) -> Self {
        Self {
            factory,
            engine: None,
            shared: Arc::new(ExecutorShared {
                inbox: Mutex::new(Inbox {
                    rx: end.commands,
                    backlog: VecDeque::new(),
                }),
                sink: end.sink,
                state,
                binding: Mutex::new(Binding::default()),
                control: OnceLock::new(),
                shutting_down: AtomicBool::new(false),
                resize_timed_out: AtomicBool::new(false),
                timing: Timing {
                    pause_poll_interval: config.pause_poll_interval,
                    resize_poll_interval: config.resize_poll_interval,
                    resize_timeout: config.resize_timeout,
                },
            }),
        }
    }

    /// Serve commands until shutdown, then drop the engine.
    pub(crate) fn run(mut self) {
        debug!("executor started");
        while let Some(request) = self.next_request() {
            self.handle(request);
        }
        let backlog = self.shared.lock_inbox().backlog.len();
        if backlog > 0 {
            debug!(backlog, "abandoning queued commands");
        }
        self.engine = None;
        self.shared.state.store(ExecutorState::Stopped);
        debug!("executor stopped");
    }

    fn next_request(&self) -> Option<Request> {
        if self.shared.is_shutting_down() {
            return None;
        }
        let mut inbox = self.shared.lock_inbox();
        if let Some(request) = inbox.backlog.pop_front() {
            return Some(request);
        }
        match inbox.rx.recv() {
            Ok(ToExecutor::Request(request)) => Some(request),
            Ok(ToExecutor::Shutdown) | Err(_) => {
                self.shared.shutting_down.store(true, Ordering::Release);
                None
            }
        }
    }

    fn handle(&mut self, request: Request) {
        let Request { id, command } = request;
        let kind = command.kind();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.execute(command)))
            .unwrap_or_else(|payload| Err(self.recover(kind, payload.as_ref())));
        if let Err(e) = &outcome {
            debug!(%id, %kind, error = %e, "command rejected");
        }
        self.shared.sink.respond(id, outcome);
    }

    /// Put the state back after an engine panic so the next command is
    /// accepted.
    fn recover(&self, kind: CommandKind, payload: &(dyn Any + Send)) -> CommandError {
        let message = panic_message(payload);
        error!(%kind, panic = message, "engine panicked");
        let state = &self.shared.state;
        match state.load() {
            ExecutorState::Initializing => state.store(ExecutorState::Uninitialized),
            current if current.is_busy() => state.finish_run(),
            _ => {}
        }
        self.shared.resize_timed_out.store(false, Ordering::Release);
        CommandError::EngineFailure(format!("engine panicked: {message}"))
    }

    fn execute(&mut self, command: Command) -> Result<CommandOutput, CommandError> {
        match command {
            Command::Init(payload) => self.init(payload),
            Command::RunScript { script } => self.run_engine(|engine| engine.run_script(&script)),
            Command::Step => self.run_engine(|engine| engine.step()),
            Command::GetData { fields } => self.get_data(&fields),
            Command::UpdatePositions => {
                let engine = self.engine.as_mut().ok_or(CommandError::NotInitialized)?;
                materialize(engine, &self.shared).map(CommandOutput::Positions)
            }
            Command::Pause => self.shared.apply_control(Control::Pause),
            Command::Resume => self.shared.apply_control(Control::Resume),
            Command::SetPaused { paused } => self.shared.apply_control(Control::SetPaused(paused)),
            Command::Cancel => self.shared.apply_control(Control::Cancel),
            Command::SyncComputes => self.pass_through(|engine| engine.sync_computes()),
            Command::SyncFixes => self.pass_through(|engine| engine.sync_fixes()),
            Command::SyncVariables => self.pass_through(|engine| engine.sync_variables()),
            Command::Start => self.pass_through(|engine| engine.start()),
            Command::Stop => self.pass_through(|engine| engine.stop()),
        }
    }

    fn init(&mut self, payload: InitPayload) -> Result<CommandOutput, CommandError> {
        if self.engine.is_some() {
            debug!("engine exists; init only rebinds buffers");
            return self.shared.rebind(payload);
        }
        let (Some(metadata), Some(positions)) = (payload.metadata, payload.positions) else {
            return Err(CommandError::MissingRegion);
        };

        self.shared.state.store(ExecutorState::Initializing);
        let mut engine = match (self.factory)() {
            Ok(engine) => engine,
            Err(e) => {
                warn!(error = %e, "engine construction failed");
                self.shared.state.store(ExecutorState::Uninitialized);
                return Err(e.into());
            }
        };

        let shared = Arc::clone(&self.shared);
        engine.set_step_callback(Box::new(move |info| shared.on_step(info)));
        let sink = self.shared.sink.clone();
        engine.set_log_callback(Box::new(move |line| {
            sink.emit(Event::Log {
                message: line.to_owned(),
            })
        }));
        // Set once: a built engine is never replaced.
        let _ = self.shared.control.set(engine.control());

        self.shared.rebind(InitPayload::full(metadata, positions))?;
        let info = StepInfo {
            timestep: engine.timesteps(),
            num_atoms: engine.num_atoms(),
        };
        self.engine = Some(engine);
        self.shared.state.store(ExecutorState::Ready);
        info!(num_atoms = info.num_atoms, "engine initialized");
        self.shared.publish(info)?;
        Ok(CommandOutput::Ack)
    }

    /// An engine call that may step: state goes to `Running` for its
    /// duration and counters are published afterwards.
    fn run_engine(
        &mut self,
        call: impl FnOnce(&mut E) -> Result<(), EngineError>,
    ) -> Result<CommandOutput, CommandError> {
        let engine = self.engine.as_mut().ok_or(CommandError::NotInitialized)?;
        self.shared.resize_timed_out.store(false, Ordering::Release);
        self.shared.state.store(ExecutorState::Running);
        let result = call(engine);
        self.shared.state.finish_run();
        let published = self.shared.publish_in_run(StepInfo {
            timestep: engine.timesteps(),
            num_atoms: engine.num_atoms(),
        });
        self.shared.resize_timed_out.store(false, Ordering::Release);
        result?;
        published?;
        Ok(CommandOutput::Ack)
    }

    fn pass_through(
        &mut self,
        call: impl FnOnce(&mut E) -> Result<(), EngineError>,
    ) -> Result<CommandOutput, CommandError> {
        let engine = self.engine.as_mut().ok_or(CommandError::NotInitialized)?;
        call(engine)?;
        self.shared.publish(StepInfo {
            timestep: engine.timesteps(),
            num_atoms: engine.num_atoms(),
        })?;
        Ok(CommandOutput::Ack)
    }

    /// Fields in request order; a repeated field is reported once.
    fn get_data(&mut self, fields: &[DataField]) -> Result<CommandOutput, CommandError> {
        let engine = self.engine.as_mut().ok_or(CommandError::NotInitialized)?;
        let mut data = IndexMap::with_capacity(fields.len());
        for &field in fields {
            if data.contains_key(&field) {
                continue;
            }
            let value = match field {
                DataField::NumAtoms => DataValue::Count(engine.num_atoms()),
                DataField::Timesteps => DataValue::Count(engine.timesteps()),
                DataField::MemoryUsage => DataValue::Count(engine.memory_usage()),
                DataField::IsRunning => DataValue::Flag(engine.is_running()),
                DataField::TimestepsPerSecond => DataValue::Rate(engine.timesteps_per_second()),
                DataField::Positions => DataValue::Positions(materialize(engine, &self.shared)?),
            };
            data.insert(field, value);
        }
        Ok(CommandOutput::Data(data))
    }
}

/// Copy the engine's positions into the bound buffer, widening to `f64`.
fn materialize<E: Engine>(
    engine: &mut E,
    shared: &ExecutorShared,
) -> Result<PositionsUpdate, CommandError> {
    let metadata = shared.metadata().ok_or(CommandError::NotInitialized)?;
    let required = engine.num_atoms();
    let info = StepInfo {
        timestep: engine.timesteps(),
        num_atoms: required,
    };
    if required > metadata.capacity() {
        shared.publish(info)?;
        return Ok(PositionsUpdate::ResizeRequested { required });
    }
    shared.publish(info)?;
    if metadata.resize_in_progress() {
        debug!("resize in progress; skipping position update");
        return Ok(PositionsUpdate::Skipped);
    }
    let buffer = shared.positions().ok_or(CommandError::NotInitialized)?;

    engine.compute_particles()?;
    let scalars = (required as usize).saturating_mul(COORDS_PER_ENTITY);
    let window = engine.positions();
    if window.len() < scalars {
        return Err(CommandError::EngineFailure(format!(
            "position window holds {} values, expected {scalars}",
            window.len()
        )));
    }
    if buffer.len() < scalars {
        warn!(
            capacity = buffer.capacity(),
            required, "bound buffer smaller than published capacity"
        );
        return Ok(PositionsUpdate::Skipped);
    }
    buffer.write_widened(&window[..scalars]);
    Ok(PositionsUpdate::Copied { entities: required })
}
