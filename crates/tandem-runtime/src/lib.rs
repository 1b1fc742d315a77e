//! Runtime for the Tandem simulation control plane.
//!
//! A [`SimulationSession`] puts a simulation engine on its own executor
//! thread and steers it from the caller's thread:
//!
//! - commands go through a [`CommandDispatcher`] that correlates responses
//!   by id, enforces a per-command timeout, and settles every command
//!   exactly once,
//! - counters and positions flow back through a shared region that both
//!   sides access with atomics,
//! - the positions buffer grows through a fenced resize handshake,
//! - engine log output, errors, steps and resize requests reach observers
//!   through an [`EventEmitter`].
//!
//! # Architecture
//!
//! ```text
//! driver thread ──commands──▶ tandem-executor (engine)
//!      ▲                          │
//!      │                   responses + events
//!      │                          ▼
//!      └──── tandem-router (settle, sweep, resize, observers)
//! ```

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod config;
pub mod dispatcher;
pub mod events;
pub mod poll;
pub mod resize;
pub mod session;
pub mod state;

mod channel;
mod executor;
mod router;

pub use config::{ConfigError, SessionConfig};
pub use dispatcher::{CommandDispatcher, Continuation, PendingReply};
pub use events::EventEmitter;
pub use poll::{BoundedPoll, PollOutcome};
pub use resize::{grown_capacity, ResizeError};
pub use session::{ShutdownReport, SimulationSession};
pub use state::ExecutorState;
