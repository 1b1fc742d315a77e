//! Typed messages carried by the driver/executor channel.
//!
//! Each command and event has its own variant with its own payload, so
//! the executor's dispatch is an exhaustive `match`. Wire names (the
//! `type` strings of the command surface) are kept for logging and for
//! parsing user input through [`CommandKind`] and [`DataField`].

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use indexmap::IndexMap;
use smallvec::SmallVec;

use crate::error::CommandError;
use crate::id::CommandId;
use crate::region::{MetadataRecord, PositionBuffer};

// ── getData fields ───────────────────────────────────────────────

/// A value `getData` can report.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataField {
    /// Live entity count.
    NumAtoms,
    /// Engine timestep.
    Timesteps,
    /// Engine memory footprint in bytes.
    MemoryUsage,
    /// Whether the engine reports itself running.
    IsRunning,
    /// Recent engine throughput.
    TimestepsPerSecond,
    /// Materialize positions into the shared buffer before answering.
    Positions,
}

/// Field list of a `getData` request. Six inline slots cover every field.
pub type FieldList = SmallVec<[DataField; 6]>;

impl DataField {
    /// All fields, in wire order.
    pub const ALL: [DataField; 6] = [
        DataField::NumAtoms,
        DataField::Timesteps,
        DataField::MemoryUsage,
        DataField::IsRunning,
        DataField::TimestepsPerSecond,
        DataField::Positions,
    ];

    /// Wire name of the field.
    pub fn name(self) -> &'static str {
        match self {
            Self::NumAtoms => "numAtoms",
            Self::Timesteps => "timesteps",
            Self::MemoryUsage => "memoryUsage",
            Self::IsRunning => "isRunning",
            Self::TimestepsPerSecond => "timestepsPerSecond",
            Self::Positions => "positions",
        }
    }
}

impl fmt::Display for DataField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DataField {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|field| field.name() == s)
            .ok_or_else(|| CommandError::UnknownField(s.to_string()))
    }
}

/// One value in a `getData` result.
#[derive(Clone, Debug, PartialEq)]
pub enum DataValue {
    /// Non-negative integer (`numAtoms`, `timesteps`, `memoryUsage`).
    Count(u64),
    /// Boolean (`isRunning`).
    Flag(bool),
    /// Floating-point rate (`timestepsPerSecond`).
    Rate(f64),
    /// Outcome of the materialization pass (`positions`).
    Positions(PositionsUpdate),
}

impl DataValue {
    /// The integer, if this is a [`DataValue::Count`].
    pub fn as_count(&self) -> Option<u64> {
        match self {
            Self::Count(v) => Some(*v),
            _ => None,
        }
    }

    /// The flag, if this is a [`DataValue::Flag`].
    pub fn as_flag(&self) -> Option<bool> {
        match self {
            Self::Flag(v) => Some(*v),
            _ => None,
        }
    }

    /// The rate, if this is a [`DataValue::Rate`].
    pub fn as_rate(&self) -> Option<f64> {
        match self {
            Self::Rate(v) => Some(*v),
            _ => None,
        }
    }
}

/// What a position materialization pass did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PositionsUpdate {
    /// The full live entity set was copied into the shared buffer.
    Copied {
        /// Entities copied.
        entities: u64,
    },
    /// The buffer was too small; a resize ran and nothing was copied.
    /// Retry to copy into the new buffer.
    ResizeRequested {
        /// Entity count the resize was requested for.
        required: u64,
    },
    /// A resize fenced the buffer; nothing was copied.
    Skipped,
}

// ── Commands ─────────────────────────────────────────────────────

/// Buffer references handed to the executor by `init`.
///
/// The first `init` carries both. A later `init` carrying only
/// `positions` rebinds the executor to a grown buffer.
#[derive(Clone, Debug, Default)]
pub struct InitPayload {
    /// The metadata record to publish into.
    pub metadata: Option<Arc<MetadataRecord>>,
    /// The positions buffer to materialize into.
    pub positions: Option<Arc<PositionBuffer>>,
}

impl InitPayload {
    /// Payload for the first `init`.
    pub fn full(metadata: Arc<MetadataRecord>, positions: Arc<PositionBuffer>) -> Self {
        Self {
            metadata: Some(metadata),
            positions: Some(positions),
        }
    }

    /// Payload that only swaps the positions buffer.
    pub fn rebind(positions: Arc<PositionBuffer>) -> Self {
        Self {
            metadata: None,
            positions: Some(positions),
        }
    }
}

/// A command from the driver to the executor.
#[derive(Clone, Debug)]
pub enum Command {
    /// Build the engine (first time) or rebind buffers (afterwards).
    Init(InitPayload),
    /// Forward a script to the engine verbatim.
    RunScript {
        /// Script text.
        script: String,
    },
    /// Advance exactly one step.
    Step,
    /// Report the requested fields.
    GetData {
        /// Fields to report, in the order they should appear.
        fields: FieldList,
    },
    /// Materialize positions into the shared buffer.
    UpdatePositions,
    /// Ask the engine to pause.
    Pause,
    /// Ask the engine to resume.
    Resume,
    /// Ask the engine to cancel the current run.
    Cancel,
    /// Engine `syncComputes` pass-through.
    SyncComputes,
    /// Engine `syncFixes` pass-through.
    SyncFixes,
    /// Engine `syncVariables` pass-through.
    SyncVariables,
    /// Engine `stop` pass-through.
    Stop,
    /// Engine `start` pass-through.
    Start,
    /// Engine `setPaused` pass-through.
    SetPaused {
        /// Requested pause state.
        paused: bool,
    },
}

impl Command {
    /// The payload-free kind of this command.
    pub fn kind(&self) -> CommandKind {
        match self {
            Self::Init(_) => CommandKind::Init,
            Self::RunScript { .. } => CommandKind::RunScript,
            Self::Step => CommandKind::Step,
            Self::GetData { .. } => CommandKind::GetData,
            Self::UpdatePositions => CommandKind::UpdatePositions,
            Self::Pause => CommandKind::Pause,
            Self::Resume => CommandKind::Resume,
            Self::Cancel => CommandKind::Cancel,
            Self::SyncComputes => CommandKind::SyncComputes,
            Self::SyncFixes => CommandKind::SyncFixes,
            Self::SyncVariables => CommandKind::SyncVariables,
            Self::Stop => CommandKind::Stop,
            Self::Start => CommandKind::Start,
            Self::SetPaused { .. } => CommandKind::SetPaused,
        }
    }

    /// Whether the executor services this command even while the engine
    /// is busy inside a script.
    pub fn is_control(&self) -> bool {
        self.kind().is_control()
    }
}

/// The `type` of a command, without its payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CommandKind {
    /// `init`
    Init,
    /// `runScript`
    RunScript,
    /// `step`
    Step,
    /// `getData`
    GetData,
    /// `updatePositions`
    UpdatePositions,
    /// `pause`
    Pause,
    /// `resume`
    Resume,
    /// `cancel`
    Cancel,
    /// `syncComputes`
    SyncComputes,
    /// `syncFixes`
    SyncFixes,
    /// `syncVariables`
    SyncVariables,
    /// `stop`
    Stop,
    /// `start`
    Start,
    /// `setPaused`
    SetPaused,
}

impl CommandKind {
    /// All kinds, in wire order.
    pub const ALL: [CommandKind; 14] = [
        CommandKind::Init,
        CommandKind::RunScript,
        CommandKind::Step,
        CommandKind::GetData,
        CommandKind::UpdatePositions,
        CommandKind::Pause,
        CommandKind::Resume,
        CommandKind::Cancel,
        CommandKind::SyncComputes,
        CommandKind::SyncFixes,
        CommandKind::SyncVariables,
        CommandKind::Stop,
        CommandKind::Start,
        CommandKind::SetPaused,
    ];

    /// Wire name (the message `type`).
    pub fn name(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::RunScript => "runScript",
            Self::Step => "step",
            Self::GetData => "getData",
            Self::UpdatePositions => "updatePositions",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Cancel => "cancel",
            Self::SyncComputes => "syncComputes",
            Self::SyncFixes => "syncFixes",
            Self::SyncVariables => "syncVariables",
            Self::Stop => "stop",
            Self::Start => "start",
            Self::SetPaused => "setPaused",
        }
    }

    /// Control commands act through the engine's thread-safe control
    /// handle and do not wait for a running script to finish.
    pub fn is_control(self) -> bool {
        matches!(
            self,
            Self::Pause | Self::Resume | Self::Cancel | Self::SetPaused
        )
    }
}

impl fmt::Display for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CommandKind {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| CommandError::UnknownCommand(s.to_string()))
    }
}

/// Successful result of a command.
#[derive(Clone, Debug, PartialEq)]
pub enum CommandOutput {
    /// The command completed and has nothing to report.
    Ack,
    /// `getData` result: exactly the requested fields, in request order.
    Data(IndexMap<DataField, DataValue>),
    /// `updatePositions` result.
    Positions(PositionsUpdate),
}

impl CommandOutput {
    /// The `getData` map, if this is a data result.
    pub fn data(&self) -> Option<&IndexMap<DataField, DataValue>> {
        match self {
            Self::Data(map) => Some(map),
            _ => None,
        }
    }

    /// The materialization outcome, if this is an `updatePositions` result.
    pub fn positions(&self) -> Option<PositionsUpdate> {
        match self {
            Self::Positions(update) => Some(*update),
            _ => None,
        }
    }
}

/// A command tagged with its identifier.
#[derive(Clone, Debug)]
pub struct Request {
    /// Correlates the eventual [`Response`].
    pub id: CommandId,
    /// The command.
    pub command: Command,
}

/// The executor's answer to one [`Request`]: a result or an error, never
/// both.
#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    /// Identifier of the request this answers.
    pub id: CommandId,
    /// Result or rejection.
    pub outcome: Result<CommandOutput, CommandError>,
}

// ── Events ───────────────────────────────────────────────────────

/// An asynchronous notification from the executor. Events carry no
/// command identifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// A log line from the engine.
    Log {
        /// The line, without trailing newline.
        message: String,
    },
    /// An error that is not tied to a single command's outcome.
    Error {
        /// Description of the error.
        message: String,
    },
    /// The engine completed a step.
    Step {
        /// Timestep after the step.
        timestep: u64,
    },
    /// The positions buffer must grow before positions can be copied.
    ResizeNeeded {
        /// Entity count the new buffer must hold.
        num_atoms: u64,
    },
}

impl Event {
    /// The subscription key for this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Log { .. } => EventKind::Log,
            Self::Error { .. } => EventKind::Error,
            Self::Step { .. } => EventKind::Step,
            Self::ResizeNeeded { .. } => EventKind::Resize,
        }
    }

    /// Wire name of the event message.
    pub fn wire_name(&self) -> &'static str {
        match self {
            Self::Log { .. } => "log",
            Self::Error { .. } => "error",
            Self::Step { .. } => "callback",
            Self::ResizeNeeded { .. } => "resize_needed",
        }
    }
}

/// Subscription key for [`Event`]s.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    /// [`Event::Log`]
    Log,
    /// [`Event::Error`]
    Error,
    /// [`Event::Step`]
    Step,
    /// [`Event::ResizeNeeded`]
    Resize,
}

impl EventKind {
    /// Subscription name.
    pub fn name(self) -> &'static str {
        match self {
            Self::Log => "log",
            Self::Error => "error",
            Self::Step => "step",
            Self::Resize => "resize",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ── Channel envelopes ────────────────────────────────────────────

/// Everything that travels driver → executor.
#[derive(Debug)]
pub enum ToExecutor {
    /// A command to execute.
    Request(Request),
    /// Stop servicing commands, cancel any run and drop the engine.
    Shutdown,
}

/// Everything that travels executor → driver.
#[derive(Debug)]
pub enum ToDriver {
    /// Answer to a request.
    Response(Response),
    /// Asynchronous notification.
    Event(Event),
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

    #[test]
    fn command_kinds_round_trip_through_wire_names() {
        for kind in CommandKind::ALL {
            assert_eq!(kind.name().parse::<CommandKind>(), Ok(kind));
        }
    }

    #[test]
    fn unknown_command_name_is_rejected() {
        assert_eq!(
            "frobnicate".parse::<CommandKind>(),
            Err(CommandError::UnknownCommand("frobnicate".into()))
        );
    }

    #[test]
    fn data_fields_parse_and_reject() {
        assert_eq!("numAtoms".parse::<DataField>(), Ok(DataField::NumAtoms));
        assert_eq!(
            "timestepsPerSecond".parse::<DataField>(),
            Ok(DataField::TimestepsPerSecond)
        );
        assert_eq!(
            "velocity".parse::<DataField>(),
            Err(CommandError::UnknownField("velocity".into()))
        );
    }

    #[test]
    fn only_lifecycle_signals_are_control() {
        let control: Vec<_> = CommandKind::ALL
            .into_iter()
            .filter(|k| k.is_control())
            .collect();
        assert_eq!(
            control,
            vec![
                CommandKind::Pause,
                CommandKind::Resume,
                CommandKind::Cancel,
                CommandKind::SetPaused
            ]
        );
    }

    #[test]
    fn command_kind_matches_variant() {
        let cmd = Command::GetData {
            fields: smallvec![DataField::NumAtoms, DataField::Timesteps],
        };
        assert_eq!(cmd.kind(), CommandKind::GetData);
        assert!(!cmd.is_control());
        assert!(Command::SetPaused { paused: true }.is_control());
        assert_eq!(
            Command::Init(InitPayload::default()).kind(),
            CommandKind::Init
        );
    }

    #[test]
    fn event_wire_names() {
        assert_eq!(Event::Step { timestep: 3 }.wire_name(), "callback");
        assert_eq!(
            Event::ResizeNeeded { num_atoms: 1 }.kind(),
            EventKind::Resize
        );
        assert_eq!(Event::ResizeNeeded { num_atoms: 1 }.wire_name(), "resize_needed");
        assert_eq!(EventKind::Step.to_string(), "step");
    }

    #[test]
    fn output_accessors() {
        let out = CommandOutput::Positions(PositionsUpdate::Skipped);
        assert_eq!(out.positions(), Some(PositionsUpdate::Skipped));
        assert!(out.data().is_none());
        assert_eq!(DataValue::Count(4).as_count(), Some(4));
        assert_eq!(DataValue::Flag(true).as_count(), None);
        assert_eq!(DataValue::Rate(2.5).as_rate(), Some(2.5));
        assert_eq!(DataValue::Flag(false).as_flag(), Some(false));
    }
}
