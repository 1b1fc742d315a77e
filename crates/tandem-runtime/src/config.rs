//! Session configuration, validation, and error types.
//!
//! [`SessionConfig`] is the input to
//! [`SimulationSession::spawn`](crate::SimulationSession::spawn).
//! [`validate()`](SessionConfig::validate) runs before any thread is
//! started, so a bad configuration never leaves a half-built session.

use std::time::Duration;

use thiserror::Error;

use tandem_core::MAX_ENTITIES;

// ── ConfigError ────────────────────────────────────────────────────

/// Errors detected while building a session.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A timeout or interval is zero.
    #[error("{name} must be greater than zero")]
    ZeroDuration {
        /// Which setting was zero.
        name: &'static str,
    },
    /// A poll interval is longer than the deadline it polls against.
    #[error("{name} ({interval_ms}ms) exceeds its deadline ({deadline_ms}ms)")]
    IntervalExceedsDeadline {
        /// Which interval was too long.
        name: &'static str,
        /// The configured interval.
        interval_ms: u128,
        /// The deadline it must fit inside.
        deadline_ms: u128,
    },
    /// The command channel capacity is zero.
    #[error("command_channel_capacity must be at least 1")]
    ChannelCapacityZero,
    /// The minimum buffer capacity is zero.
    #[error("min_capacity must be at least 1")]
    MinCapacityZero,
    /// A buffer capacity is larger than any positions buffer can be.
    #[error("{name} ({value}) exceeds the largest positions buffer ({max} entities)")]
    CapacityTooLarge {
        /// Which setting was too large.
        name: &'static str,
        /// The configured capacity.
        value: usize,
        /// The largest allowed capacity.
        max: usize,
    },
    /// A background thread could not be spawned.
    #[error("thread spawn failed: {reason}")]
    ThreadSpawnFailed {
        /// Description of which thread failed.
        reason: String,
    },
}

// ── SessionConfig ──────────────────────────────────────────────────

/// Timing and sizing knobs for a [`SimulationSession`](crate::SimulationSession).
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// How long a command may stay pending before it is rejected with
    /// `CommandTimeout`. Default: 30s.
    pub command_timeout: Duration,
    /// How often the router checks pending commands for expiry. Default: 5ms.
    pub sweep_interval: Duration,
    /// How often the executor re-checks the pause flag while paused.
    /// Default: 20ms.
    pub pause_poll_interval: Duration,
    /// How often the executor re-checks the resize flag while waiting
    /// for a larger buffer. Default: 5ms.
    pub resize_poll_interval: Duration,
    /// How long the executor waits for a larger buffer. Default: 30s.
    pub resize_timeout: Duration,
    /// Entities the first positions buffer holds. Default: 100 000.
    pub initial_capacity: usize,
    /// Lower bound for a grown buffer. Default: 1000.
    pub min_capacity: usize,
    /// Commands buffered before `send` reports back-pressure. Default: 256.
    pub command_channel_capacity: usize,
    /// How long shutdown waits for the executor to stop. Default: 2s.
    pub drain_budget: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_millis(5),
            pause_poll_interval: Duration::from_millis(20),
            resize_poll_interval: Duration::from_millis(5),
            resize_timeout: Duration::from_secs(30),
            initial_capacity: 100_000,
            min_capacity: 1000,
            command_channel_capacity: 256,
            drain_budget: Duration::from_secs(2),
        }
    }
}

impl SessionConfig {
    /// Check all structural invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("command_timeout", self.command_timeout),
            ("sweep_interval", self.sweep_interval),
            ("pause_poll_interval", self.pause_poll_interval),
            ("resize_poll_interval", self.resize_poll_interval),
            ("resize_timeout", self.resize_timeout),
            ("drain_budget", self.drain_budget),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration { name });
            }
        }
        if self.resize_poll_interval > self.resize_timeout {
            return Err(ConfigError::IntervalExceedsDeadline {
                name: "resize_poll_interval",
                interval_ms: self.resize_poll_interval.as_millis(),
                deadline_ms: self.resize_timeout.as_millis(),
            });
        }
        if self.sweep_interval > self.command_timeout {
            return Err(ConfigError::IntervalExceedsDeadline {
                name: "sweep_interval",
                interval_ms: self.sweep_interval.as_millis(),
                deadline_ms: self.command_timeout.as_millis(),
            });
        }
        if self.command_channel_capacity == 0 {
            return Err(ConfigError::ChannelCapacityZero);
        }
        if self.min_capacity == 0 {
            return Err(ConfigError::MinCapacityZero);
        }
        for (name, value) in [
            ("initial_capacity", self.initial_capacity),
            ("min_capacity", self.min_capacity),
        ] {
            if value > MAX_ENTITIES {
                return Err(ConfigError::CapacityTooLarge {
                    name,
                    value,
                    max: MAX_ENTITIES,
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = SessionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.command_timeout, Duration::from_secs(30));
        assert_eq!(config.min_capacity, 1000);
    }

    #[test]
    fn zero_timeout_rejected() {
        let config = SessionConfig {
            command_timeout: Duration::ZERO,
            ..SessionConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroDuration {
                name: "command_timeout"
            })
        );
    }

    #[test]
    fn poll_interval_must_fit_deadline() {
        let config = SessionConfig {
            resize_poll_interval: Duration::from_secs(2),
            resize_timeout: Duration::from_secs(1),
            ..SessionConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::IntervalExceedsDeadline {
                name: "resize_poll_interval",
                ..
            })
        ));
    }

    #[test]
    fn zero_capacities_rejected() {
        let config = SessionConfig {
            command_channel_capacity: 0,
            ..SessionConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ChannelCapacityZero));

        let config = SessionConfig {
            min_capacity: 0,
            ..SessionConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::MinCapacityZero));
    }

    #[test]
    fn oversized_capacity_rejected() {
        let config = SessionConfig {
            initial_capacity: usize::MAX,
            ..SessionConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::CapacityTooLarge {
                name: "initial_capacity",
                ..
            })
        ));
    }

    #[test]
    fn spawn_failure_message() {
        let err = ConfigError::ThreadSpawnFailed {
            reason: "executor: out of threads".into(),
        };
        assert_eq!(err.to_string(), "thread spawn failed: executor: out of threads");
    }
}
