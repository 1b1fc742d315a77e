//! The driver-side message pump.
//!
//! Runs on the `tandem-router` thread. It settles pending commands as
//! responses arrive, sweeps expired commands every `sweep_interval`,
//! answers resize requests, and fans events out to observers. When the
//! executor goes away or the session stops it, every command still
//! pending is rejected with `Disconnected`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{debug, warn};

use tandem_core::{CommandError, Event, ToDriver};

use crate::dispatcher::CommandDispatcher;
use crate::events::EventEmitter;
use crate::resize::{ResizeCoordinator, ResizeError};

pub(crate) struct Router {
    pub(crate) replies: Receiver<ToDriver>,
    pub(crate) dispatcher: Arc<CommandDispatcher>,
    pub(crate) emitter: Arc<EventEmitter>,
    pub(crate) resize: Arc<ResizeCoordinator>,
    pub(crate) stop: Arc<AtomicBool>,
    pub(crate) sweep_interval: Duration,
}

impl Router {
    /// Pump until stopped or disconnected. Returns how many pending
    /// commands were rejected on the way out.
    pub(crate) fn run(self) -> usize {
        loop {
            match self.replies.recv_timeout(self.sweep_interval) {
                Ok(message) => self.route(message),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("executor channel closed");
                    break;
                }
            }
            self.dispatcher.expire(Instant::now());
            if let Err(e) = self.resize.retry(&self.dispatcher) {
                self.refuse_resize(e);
            }
            if self.stop.load(Ordering::Acquire) {
                break;
            }
        }

        // Late responses still settle their commands.
        while let Ok(message) = self.replies.try_recv() {
            self.route(message);
        }
        let abandoned = self.dispatcher.fail_all(CommandError::Disconnected);
        if abandoned > 0 {
            warn!(abandoned, "rejected pending commands at shutdown");
        }
        abandoned
    }

    fn route(&self, message: ToDriver) {
        match message {
            ToDriver::Response(response) => {
                self.dispatcher.resolve(response);
            }
            ToDriver::Event(event) => {
                let refused = match event {
                    Event::ResizeNeeded { num_atoms } => {
                        self.resize.on_resize_needed(num_atoms, &self.dispatcher).err()
                    }
                    _ => None,
                };
                self.emitter.emit(&event);
                if let Some(e) = refused {
                    self.refuse_resize(e);
                }
            }
        }
    }

    /// The executor stays fenced until its resize wait times out.
    fn refuse_resize(&self, error: ResizeError) {
        warn!(error = %error, "resize refused");
        self.emitter.emit(&Event::Error {
            message: error.to_string(),
        });
    }
}
