//! Core types and traits for the Tandem simulation control plane.
//!
//! This is the leaf crate with no internal dependencies. It defines the
//! vocabulary shared by the driver and the executor thread: command and
//! event messages, the error taxonomy, the [`Engine`] boundary trait, and
//! the shared region ([`MetadataRecord`] and [`PositionBuffer`]) that both
//! sides read and write through atomics.

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

pub mod command;
pub mod engine;
pub mod error;
pub mod id;
pub mod region;

pub use command::{
    Command, CommandKind, CommandOutput, DataField, DataValue, Event, EventKind, FieldList,
    InitPayload, PositionsUpdate, Request, Response, ToDriver, ToExecutor,
};
pub use engine::{Engine, EngineControl, LogCallback, StepCallback, StepInfo};
pub use error::{CommandError, EngineError};
pub use id::{CommandId, CommandIdAllocator, SubscriptionId};
pub use region::{
    MetaField, MetadataRecord, MetadataSnapshot, PositionBuffer, COORDS_PER_ENTITY, MAX_ENTITIES,
};
