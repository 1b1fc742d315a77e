//! Tandem: steer a molecular dynamics engine that runs on its own thread.
//!
//! This is the top-level facade crate that re-exports the public API from
//! all Tandem sub-crates. For most users, adding `tandem` as a single
//! dependency is sufficient.
//!
//! # Quick start
//!
//! ```rust
//! use tandem::prelude::*;
//!
//! let mut session = SimulationSession::spawn(
//!     || Ok(LatticeEngine::new(LatticeConfig::default())),
//!     SessionConfig::default(),
//! )
//! .unwrap();
//!
//! session.init().wait().unwrap();
//! session.run_script("create_atoms 64\nrun 10").wait().unwrap();
//! assert_eq!(session.timestep(), 10);
//! assert_eq!(session.entity_count(), 64);
//!
//! let copied = session.update_positions().wait().unwrap();
//! assert_eq!(copied.positions(), Some(PositionsUpdate::Copied { entities: 64 }));
//! assert_eq!(session.read_positions().unwrap().len(), 64 * 3);
//!
//! let report = session.shutdown();
//! assert!(report.executor_joined);
//! ```
//!
//! # Modules
//!
//! Each module corresponds to a sub-crate. Use them for types not in the prelude:
//!
//! | Module | Sub-crate | Contents |
//! |--------|-----------|----------|
//! | [`types`] | `tandem-core` | Commands, events, shared region, the `Engine` trait |
//! | [`runtime`] | `tandem-runtime` | Session, dispatcher, executor, resize handshake |
//! | [`lattice`] | `tandem-lattice` | Reference particle engine and its script language |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Core types, messages and the engine boundary (`tandem-core`).
///
/// Contains the typed [`types::Command`] and [`types::Event`] sets, the
/// shared [`types::MetadataRecord`] and [`types::PositionBuffer`], and the
/// [`types::Engine`] trait every backend implements.
pub use tandem_core as types;

/// The driver-side control plane (`tandem-runtime`).
///
/// [`runtime::SimulationSession`] owns the executor thread and exposes
/// every command as a method returning a [`runtime::PendingReply`].
pub use tandem_runtime as runtime;

/// Reference particle engine (`tandem-lattice`).
///
/// [`lattice::LatticeEngine`] understands a small script language and is
/// enough to exercise pausing, cancellation and buffer growth.
pub use tandem_lattice as lattice;

/// Common imports for typical Tandem usage.
///
/// ```rust
/// use tandem::prelude::*;
/// ```
pub mod prelude {
    // Messages
    pub use tandem_core::{
        Command, CommandKind, CommandOutput, DataField, DataValue, Event, EventKind,
        PositionsUpdate,
    };

    // Errors
    pub use tandem_core::{CommandError, EngineError};

    // Shared region
    pub use tandem_core::{MetadataSnapshot, PositionBuffer, COORDS_PER_ENTITY};

    // Engine boundary
    pub use tandem_core::{Engine, EngineControl};

    // Session
    pub use tandem_runtime::{
        ExecutorState, PendingReply, SessionConfig, ShutdownReport, SimulationSession,
    };

    // Reference engine
    pub use tandem_lattice::{LatticeConfig, LatticeEngine};
}
