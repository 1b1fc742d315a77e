//! Error types for the Tandem control plane.
//!
//! [`EngineError`] is what the opaque engine reports. [`CommandError`] is
//! what a command rejection carries back to the driver; engine errors are
//! folded into it verbatim as [`CommandError::EngineFailure`].

use std::time::Duration;

use thiserror::Error;

use crate::id::CommandId;

/// A failure reported synchronously by the simulation engine.
///
/// The message is human-readable and is passed through to the driver
/// without rewording.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct EngineError {
    /// The engine's own description of the failure.
    pub message: String,
}

impl EngineError {
    /// Build an engine error from any message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Why a command was rejected.
///
/// None of these are fatal: the executor keeps accepting commands after
/// any of them, and the dispatcher keeps its other pending commands.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CommandError {
    /// The command needs an engine but `init` has not completed.
    #[error("simulation is not initialized")]
    NotInitialized,
    /// The engine raised an error; the message is the engine's.
    #[error("{0}")]
    EngineFailure(String),
    /// No response arrived before the command's deadline.
    #[error("command {id} timed out after {}ms", .after.as_millis())]
    CommandTimeout {
        /// The command that expired.
        id: CommandId,
        /// The timeout that was applied.
        after: Duration,
    },
    /// A command name did not match any known command.
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    /// A `getData` field name did not match any known field.
    #[error("unknown data field '{0}'")]
    UnknownField(String),
    /// The numeric region is fenced by a resize in progress. Advisory:
    /// retry once the resize completes.
    #[error("position buffer resize in progress")]
    ResizeInProgress,
    /// The driver did not rebind a larger buffer before the resize deadline.
    #[error("position buffer resize for {required} entities timed out")]
    ResizeTimeout {
        /// The entity count the resize was requested for.
        required: u64,
    },
    /// The first `init` must carry both the metadata record and the
    /// positions buffer.
    #[error("first init must provide both metadata and positions regions")]
    MissingRegion,
    /// The command channel is at capacity (back-pressure).
    #[error("command channel full")]
    ChannelFull,
    /// The executor has shut down or the channel was closed.
    #[error("executor disconnected")]
    Disconnected,
}

impl From<EngineError> for CommandError {
    fn from(e: EngineError) -> Self {
        Self::EngineFailure(e.message)
    }
}

impl CommandError {
    /// Whether retrying the same command later may succeed without any
    /// other intervention.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::ResizeInProgress | Self::ChannelFull | Self::CommandTimeout { .. }
        )
    }
}
