//! Benchmark profiles and utilities for the Tandem control plane.
//!
//! - [`populated_lattice`]: a lattice engine already holding `n` particles
//! - [`bench_session`]: an initialized session around such an engine

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use thiserror::Error;

use tandem_core::{CommandError, Engine, EngineError};
use tandem_lattice::{LatticeConfig, LatticeEngine};
use tandem_runtime::{ConfigError, SessionConfig, SimulationSession};

/// A lattice engine with `atoms` particles placed from `seed`.
pub fn populated_lattice(atoms: u64, seed: u64) -> Result<LatticeEngine, EngineError> {
    let mut engine = LatticeEngine::new(LatticeConfig {
        seed,
        ..LatticeConfig::default()
    });
    engine.run_script(&format!("create_atoms {atoms}"))?;
    Ok(engine)
}

/// Errors building a benchmark session.
#[derive(Debug, Error)]
pub enum BenchSetupError {
    /// The session could not start.
    #[error("session did not start: {0}")]
    Config(#[from] ConfigError),
    /// A setup command failed.
    #[error("setup command failed: {0}")]
    Command(#[from] CommandError),
}

/// An initialized session holding `atoms` particles in a buffer sized for
/// them, so no resize happens while measuring.
pub fn bench_session(atoms: u64) -> Result<SimulationSession, BenchSetupError> {
    let config = SessionConfig {
        initial_capacity: usize::try_from(atoms).unwrap_or(usize::MAX).max(1),
        ..SessionConfig::default()
    };
    let session = SimulationSession::spawn(move || populated_lattice(atoms, 42), config)?;
    session.init().wait()?;
    Ok(session)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn populated_lattice_has_requested_atoms() {
        let engine = populated_lattice(128, 1).unwrap();
        assert_eq!(engine.num_atoms(), 128);
        assert_eq!(engine.timesteps(), 0);
    }

    #[test]
    fn bench_session_needs_no_resize() {
        let mut session = bench_session(1000).unwrap();
        assert_eq!(session.entity_count(), 1000);
        assert!(session.update_positions().wait().is_ok());
        assert_eq!(session.resize_count(), 0);
        session.shutdown();
    }
}
