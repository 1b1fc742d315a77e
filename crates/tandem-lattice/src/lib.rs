//! Reference engine for the Tandem control plane.
//!
//! [`LatticeEngine`] implements [`tandem_core::Engine`] with free particles
//! in a periodic box and a small line-oriented script language (see
//! [`script`]). It exists to exercise the runtime end to end: long runs
//! with per-step callbacks, growing entity counts, log output, engine
//! errors, and cancellation.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod engine;
pub mod script;

pub use engine::{LatticeConfig, LatticeControl, LatticeEngine};
pub use script::Directive;
