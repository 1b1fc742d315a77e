//! The duplex message channel between driver and executor.
//!
//! Commands travel driver→executor on a bounded channel so a wedged
//! executor shows up as back-pressure instead of unbounded memory.
//! Responses and events travel executor→driver on an unbounded channel:
//! the executor must never block on a slow driver.

use crossbeam_channel::{Receiver, Sender};
use tracing::trace;

use tandem_core::{CommandError, CommandId, CommandOutput, Event, Response, ToDriver, ToExecutor};

/// The driver's half.
pub(crate) struct DriverEnd {
    pub(crate) commands: Sender<ToExecutor>,
    pub(crate) replies: Receiver<ToDriver>,
}

/// The executor's half.
pub(crate) struct ExecutorEnd {
    pub(crate) commands: Receiver<ToExecutor>,
    pub(crate) sink: EventSink,
}

/// Build both halves with room for `command_capacity` queued commands.
pub(crate) fn message_channel(command_capacity: usize) -> (DriverEnd, ExecutorEnd) {
    let (command_tx, command_rx) = crossbeam_channel::bounded(command_capacity);
    let (reply_tx, reply_rx) = crossbeam_channel::unbounded();
    (
        DriverEnd {
            commands: command_tx,
            replies: reply_rx,
        },
        ExecutorEnd {
            commands: command_rx,
            sink: EventSink { tx: reply_tx },
        },
    )
}

/// Executor-side sender for responses and events.
///
/// Sends are best-effort: once the driver is gone there is nobody left to
/// tell, so a closed channel is logged and otherwise ignored.
#[derive(Clone)]
pub(crate) struct EventSink {
    tx: Sender<ToDriver>,
}

impl EventSink {
    pub(crate) fn emit(&self, event: Event) {
        if self.tx.send(ToDriver::Event(event)).is_err() {
            trace!("driver gone; dropping event");
        }
    }

    pub(crate) fn respond(&self, id: CommandId, outcome: Result<CommandOutput, CommandError>) {
        if self
            .tx
            .send(ToDriver::Response(Response { id, outcome }))
            .is_err()
        {
            trace!(%id, "driver gone; dropping response");
        }
    }
}
