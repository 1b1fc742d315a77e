//! Driver side of the buffer-resize handshake.
//!
//! The executor fences the numeric region by setting `ResizeFlag`, then
//! emits `ResizeNeeded` and waits. On receipt the driver:
//!
//! 1. allocates a buffer of [`grown_capacity`] entities and copies the
//!    old contents into it,
//! 2. swaps its own view to the new buffer,
//! 3. stores the new `Capacity` into the metadata record,
//! 4. sends `init` carrying only the new buffer.
//!
//! The executor lifts the fence itself when it adopts a buffer that covers
//! its entity count. The driver never clears `ResizeFlag`: the
//! acknowledgement of one rebind can arrive after the executor has raised
//! the fence for the next resize.
//!
//! At most one resize is in flight; duplicate requests are ignored until
//! the rebind settles. A rebind refused by a full command channel is sent
//! again on the router's next sweep while the fence is still up.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use thiserror::Error;
use tracing::{debug, info, warn};

use tandem_core::{
    Command, CommandError, CommandOutput, InitPayload, MetaField, MetadataRecord, PositionBuffer,
    MAX_ENTITIES,
};

use crate::dispatcher::CommandDispatcher;

/// Capacity of a grown buffer: twice what is required, never below
/// `floor`, never above [`MAX_ENTITIES`].
///
/// `None` when `required` itself exceeds [`MAX_ENTITIES`].
pub fn grown_capacity(required: u64, floor: usize) -> Option<usize> {
    let required = usize::try_from(required)
        .ok()
        .filter(|&n| n <= MAX_ENTITIES)?;
    Some(required.saturating_mul(2).max(floor).min(MAX_ENTITIES))
}

/// A resize request the driver cannot satisfy.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ResizeError {
    /// The requested entity count cannot be backed by a positions buffer.
    #[error("cannot grow positions buffer to {required} entities")]
    Unsatisfiable {
        /// Entity count the executor asked for.
        required: u64,
    },
}

pub(crate) struct ResizeCoordinator {
    metadata: Arc<MetadataRecord>,
    view: RwLock<Arc<PositionBuffer>>,
    in_flight: AtomicBool,
    min_capacity: usize,
    completed: AtomicU64,
    /// Entity count of a rebind refused by back-pressure; 0 when none.
    retry_required: AtomicU64,
}

impl ResizeCoordinator {
    pub(crate) fn new(
        metadata: Arc<MetadataRecord>,
        positions: Arc<PositionBuffer>,
        min_capacity: usize,
    ) -> Self {
        Self {
            metadata,
            view: RwLock::new(positions),
            in_flight: AtomicBool::new(false),
            min_capacity,
            completed: AtomicU64::new(0),
            retry_required: AtomicU64::new(0),
        }
    }

    /// The driver's current positions buffer.
    pub(crate) fn view(&self) -> Arc<PositionBuffer> {
        Arc::clone(&self.view.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub(crate) fn in_flight(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Resizes whose rebind the executor acknowledged.
    pub(crate) fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// React to a `ResizeNeeded` event. Runs on the router thread and
    /// never blocks on the executor.
    pub(crate) fn on_resize_needed(
        self: &Arc<Self>,
        required: u64,
        dispatcher: &CommandDispatcher,
    ) -> Result<(), ResizeError> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            debug!(required, "resize already in flight; ignoring duplicate request");
            return Ok(());
        }

        let current = self.view();
        let buffer = if current.capacity() as u64 >= required {
            // A retry after a timed-out rebind: the buffer is already big
            // enough, it only needs handing over again.
            current
        } else {
            let grown = grown_capacity(required, self.min_capacity)
                .and_then(|capacity| PositionBuffer::try_grow_from(&current, capacity));
            let Some(grown) = grown.map(Arc::new) else {
                self.in_flight.store(false, Ordering::SeqCst);
                return Err(ResizeError::Unsatisfiable { required });
            };
            let capacity = grown.capacity();
            *self.view.write().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&grown);
            self.metadata.store(MetaField::Capacity, capacity as u64);
            info!(
                from = current.capacity(),
                to = capacity,
                required,
                "growing positions buffer"
            );
            grown
        };

        let coordinator = Arc::clone(self);
        dispatcher.send_with(
            Command::Init(InitPayload::rebind(buffer)),
            Box::new(move |outcome| coordinator.finish(required, outcome)),
        );
        Ok(())
    }

    /// Resend a rebind that back-pressure refused, if the executor is
    /// still fenced. Called by the router on every sweep.
    pub(crate) fn retry(
        self: &Arc<Self>,
        dispatcher: &CommandDispatcher,
    ) -> Result<(), ResizeError> {
        let required = self.retry_required.swap(0, Ordering::SeqCst);
        if required == 0 || !self.metadata.resize_in_progress() {
            return Ok(());
        }
        debug!(required, "retrying refused rebind");
        self.on_resize_needed(required, dispatcher)
    }

    fn finish(&self, required: u64, outcome: Result<CommandOutput, CommandError>) {
        match outcome {
            Ok(_) => {
                self.completed.fetch_add(1, Ordering::Relaxed);
                debug!(required, "resize complete");
            }
            Err(CommandError::ChannelFull) => {
                debug!(required, "command channel full; rebind deferred to next sweep");
                self.retry_required.store(required, Ordering::SeqCst);
            }
            Err(err) => warn!(required, error = %err, "resize rebind failed"),
        }
        self.in_flight.store(false, Ordering::SeqCst);
    }
}
