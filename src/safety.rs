//! # Safety guard
//!
//! Stateless checks consulted by the sequencer every tick. A positive check is turned into the matching [Error]
//! by [SafetyLimits] and aborts the flight.

use std::time::Duration;

use tokio::time::Instant;

use crate::sequencer::FlightPhase;
use crate::{Error, Result};

/// Clamp `value` into `[min, max]`
///
/// Unlike [f64::clamp] this never panics: a `min > max` pair (rejected earlier by the configuration validation)
/// returns `max`.
pub fn clamp(value: f64, min: f64, max: f64) -> f64 {
    value.max(min).min(max)
}

/// True if a phase has been running for longer than `phase_limit`
pub fn phase_timed_out(phase_elapsed: Duration, phase_limit: Duration) -> bool {
    phase_elapsed > phase_limit
}

/// True if a sample produced at `sample_timestamp` is older than `max_age` at `now`
pub fn telemetry_stale(sample_timestamp: Instant, now: Instant, max_age: Duration) -> bool {
    now.saturating_duration_since(sample_timestamp) > max_age
}

/// Limits enforced during a flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafetyLimits {
    /// Maximum time in any flight phase
    pub phase_timeout: Duration,
    /// Maximum telemetry sample age
    pub telemetry_max_age: Duration,
}

impl SafetyLimits {
    /// [Error::TelemetryStale] if the sample is too old
    pub fn check_telemetry(&self, sample_timestamp: Instant, now: Instant) -> Result<()> {
        if telemetry_stale(sample_timestamp, now, self.telemetry_max_age) {
            return Err(Error::TelemetryStale {
                age: now.saturating_duration_since(sample_timestamp),
                max_age: self.telemetry_max_age,
            });
        }
        Ok(())
    }

    /// [Error::PhaseTimeout] if `phase` has been running for too long
    pub fn check_phase(&self, phase: FlightPhase, phase_elapsed: Duration) -> Result<()> {
        if phase_timed_out(phase_elapsed, self.phase_timeout) {
            return Err(Error::PhaseTimeout {
                phase,
                elapsed: phase_elapsed,
            });
        }
        Ok(())
    }
}
