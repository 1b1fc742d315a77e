//! Driver-side command dispatch with exactly-once resolution.
//!
//! Every command gets a fresh [`CommandId`] and an entry in the pending
//! table *before* it is transmitted. Whoever removes the entry settles
//! the command: a response from the executor, the timeout sweep, a send
//! failure, or shutdown. Removal happens under the table lock and the
//! continuation runs after the lock is released, so a continuation that
//! dispatches a follow-up command cannot deadlock.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TryRecvError, TrySendError};
use tracing::{debug, trace, warn};

use tandem_core::{
    Command, CommandError, CommandId, CommandIdAllocator, CommandKind, CommandOutput, Request,
    Response, ToExecutor,
};

/// Callback that receives a command's outcome. Runs exactly once.
pub type Continuation = Box<dyn FnOnce(Result<CommandOutput, CommandError>) + Send>;

struct PendingCommand {
    kind: CommandKind,
    deadline: Instant,
    continuation: Continuation,
}

/// Correlates commands with their responses and enforces deadlines.
pub struct CommandDispatcher {
    ids: CommandIdAllocator,
    pending: Mutex<HashMap<CommandId, PendingCommand>>,
    /// `None` once the session has closed the command side.
    tx: Mutex<Option<Sender<ToExecutor>>>,
    timeout: Duration,
}

impl CommandDispatcher {
    pub(crate) fn new(tx: Sender<ToExecutor>, timeout: Duration) -> Self {
        Self {
            ids: CommandIdAllocator::new(),
            pending: Mutex::new(HashMap::new()),
            tx: Mutex::new(Some(tx)),
            timeout,
        }
    }

    /// Dispatch `command` and return a handle to its eventual outcome.
    pub fn send(&self, command: Command) -> PendingReply {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        let id = self.send_with(
            command,
            Box::new(move |outcome| {
                // The receiver may already be gone; nobody is waiting then.
                let _ = reply_tx.send(outcome);
            }),
        );
        PendingReply { id, rx: reply_rx }
    }

    /// Dispatch `command` and run `continuation` with its outcome.
    ///
    /// The continuation may run on the calling thread (send failures) or
    /// on the router thread (responses, timeouts). It must not block.
    pub fn send_with(&self, command: Command, continuation: Continuation) -> CommandId {
        let id = self.ids.next_id();
        let kind = command.kind();
        self.lock_pending().insert(
            id,
            PendingCommand {
                kind,
                deadline: Instant::now() + self.timeout,
                continuation,
            },
        );

        let sent = match self.lock_tx().as_ref() {
            Some(tx) => tx
                .try_send(ToExecutor::Request(Request { id, command }))
                .map_err(|e| match e {
                    TrySendError::Full(_) => CommandError::ChannelFull,
                    TrySendError::Disconnected(_) => CommandError::Disconnected,
                }),
            None => Err(CommandError::Disconnected),
        };
        match sent {
            Ok(()) => trace!(%id, %kind, "command sent"),
            Err(err) => {
                debug!(%id, %kind, error = %err, "command not sent");
                self.settle(id, Err(err));
            }
        }
        id
    }

    /// Settle the command a response answers. Returns `false` when the
    /// command was already settled or never existed.
    pub(crate) fn resolve(&self, response: Response) -> bool {
        let Response { id, outcome } = response;
        let settled = self.settle(id, outcome);
        if !settled {
            debug!(%id, "dropping response for unknown or settled command");
        }
        settled
    }

    /// Reject every command whose deadline is at or before `now`.
    pub(crate) fn expire(&self, now: Instant) -> usize {
        let expired: Vec<(CommandId, PendingCommand)> = {
            let mut pending = self.lock_pending();
            let ids: Vec<CommandId> = pending
                .iter()
                .filter(|(_, p)| p.deadline <= now)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| pending.remove(&id).map(|p| (id, p)))
                .collect()
        };
        let count = expired.len();
        for (id, command) in expired {
            warn!(%id, kind = %command.kind, "command timed out");
            (command.continuation)(Err(CommandError::CommandTimeout {
                id,
                after: self.timeout,
            }));
        }
        count
    }

    /// Reject every pending command with `error`.
    pub(crate) fn fail_all(&self, error: CommandError) -> usize {
        let drained: Vec<PendingCommand> = self.lock_pending().drain().map(|(_, p)| p).collect();
        let count = drained.len();
        for command in drained {
            (command.continuation)(Err(error.clone()));
        }
        count
    }

    /// Ask the executor to stop. Best-effort: a full channel is fine
    /// because [`close`](Self::close) follows and the executor stops
    /// once it sees the channel disconnect.
    pub(crate) fn signal_shutdown(&self) {
        if let Some(tx) = self.lock_tx().as_ref() {
            let _ = tx.try_send(ToExecutor::Shutdown);
        }
    }

    /// Drop the command sender. Later sends fail with `Disconnected`.
    pub(crate) fn close(&self) {
        self.lock_tx().take();
    }

    /// Number of commands awaiting an outcome.
    pub fn in_flight(&self) -> usize {
        self.lock_pending().len()
    }

    /// The per-command timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn settle(&self, id: CommandId, outcome: Result<CommandOutput, CommandError>) -> bool {
        let entry = self.lock_pending().remove(&id);
        match entry {
            Some(command) => {
                (command.continuation)(outcome);
                true
            }
            None => false,
        }
    }

    fn lock_pending(&self) -> MutexGuard<'_, HashMap<CommandId, PendingCommand>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_tx(&self) -> MutexGuard<'_, Option<Sender<ToExecutor>>> {
        self.tx.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for CommandDispatcher {
    fn drop(&mut self) {
        self.fail_all(CommandError::Disconnected);
    }
}

// ── PendingReply ───────────────────────────────────────────────────

/// Handle to the outcome of one dispatched command.
#[derive(Debug)]
pub struct PendingReply {
    id: CommandId,
    rx: Receiver<Result<CommandOutput, CommandError>>,
}

impl PendingReply {
    /// The command's identifier.
    pub fn id(&self) -> CommandId {
        self.id
    }

    /// The outcome if it has arrived. Yields it once; later calls
    /// return `None`.
    pub fn try_wait(&self) -> Option<Result<CommandOutput, CommandError>> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Block until the command settles.
    ///
    /// Never blocks longer than the dispatcher timeout plus one sweep
    /// interval, because the sweep settles every expired command.
    pub fn wait(self) -> Result<CommandOutput, CommandError> {
        self.rx.recv().unwrap_or(Err(CommandError::Disconnected))
    }
}
