//! # Discrete PID controller
//!
//! The controller is rate limited: [Pid::update()] only computes a new output once at least `sample_period` has
//! elapsed on the mission clock since the last computed output, otherwise the previous output is returned. The
//! integral accumulates `error * sample_period` and the derivative uses `(error - last_error) / sample_period`, so
//! both are tied to the fixed period rather than to the jitter of the caller.
//!
//! The output is clamped to `[output_min, output_max]`. The integral is not wound back when the output saturates.
//!
//! ```
//! # use std::time::Duration;
//! # use crazyflie_sequencer::pid::{ErrorPolarity, Pid, PidParams};
//! let mut pid = Pid::new(PidParams {
//!     kp: 1.0,
//!     ki: 0.0,
//!     kd: 0.0,
//!     setpoint: 1.0,
//!     sample_period: Duration::from_millis(10),
//!     output_min: 0.0,
//!     output_max: 0.8,
//!     polarity: ErrorPolarity::SetpointMinusMeasurement,
//! });
//! assert_eq!(pid.update(0.5, Duration::ZERO), 0.5);
//! // Too early, the previous output is kept
//! assert_eq!(pid.update(0.0, Duration::from_millis(5)), 0.5);
//! assert_eq!(pid.update(0.0, Duration::from_millis(10)), 0.8);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::safety::clamp;

/// Sign convention of the controller error
///
/// Both conventions are in use: negative gains with `setpoint - measurement`, or positive gains with the error
/// inverted. Neither is assumed canonical; the configuration picks one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolarity {
    /// `error = setpoint - measurement`
    #[default]
    SetpointMinusMeasurement,
    /// `error = measurement - setpoint`
    MeasurementMinusSetpoint,
}

impl ErrorPolarity {
    fn error(&self, setpoint: f64, measurement: f64) -> f64 {
        match self {
            ErrorPolarity::SetpointMinusMeasurement => setpoint - measurement,
            ErrorPolarity::MeasurementMinusSetpoint => measurement - setpoint,
        }
    }
}

/// Immutable PID parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidParams {
    /// Proportional gain
    pub kp: f64,
    /// Integral gain
    pub ki: f64,
    /// Derivative gain
    pub kd: f64,
    /// Regulation target
    pub setpoint: f64,
    /// Minimum time between two computed outputs
    pub sample_period: Duration,
    /// Lower output bound
    pub output_min: f64,
    /// Upper output bound
    pub output_max: f64,
    /// Error sign convention
    pub polarity: ErrorPolarity,
}

/// Mutable PID state
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PidRuntime {
    /// Sum of `error * sample_period`
    pub integral: f64,
    /// Error of the last computed update, `None` before the first one
    pub last_error: Option<f64>,
    /// Last computed output
    pub last_output: Option<f64>,
    /// Mission time of the last computed output
    pub last_update: Option<Duration>,
}

/// PID controller instance
#[derive(Debug, Clone)]
pub struct Pid {
    params: PidParams,
    runtime: PidRuntime,
}

impl Pid {
    /// Create a controller with a fresh runtime
    pub fn new(params: PidParams) -> Self {
        Self {
            params,
            runtime: PidRuntime::default(),
        }
    }

    /// Compute the controller output for a measurement taken at mission time `now`
    pub fn update(&mut self, measurement: f64, now: Duration) -> f64 {
        let p = &self.params;

        if let (Some(last_update), Some(last_output)) = (self.runtime.last_update, self.runtime.last_output) {
            if now.saturating_sub(last_update) < p.sample_period {
                return last_output;
            }
        }

        let dt = p.sample_period.as_secs_f64();
        let error = p.polarity.error(p.setpoint, measurement);

        self.runtime.integral += error * dt;
        let derivative = match self.runtime.last_error {
            Some(last_error) => (error - last_error) / dt,
            None => 0.0,
        };

        let raw = p.kp * error + p.ki * self.runtime.integral + p.kd * derivative;
        let output = clamp(raw, p.output_min, p.output_max);

        self.runtime.last_error = Some(error);
        self.runtime.last_output = Some(output);
        self.runtime.last_update = Some(now);

        output
    }

    /// Retarget the controller without touching its runtime
    pub fn set_setpoint(&mut self, setpoint: f64) {
        self.params.setpoint = setpoint;
    }

    /// Forget the accumulated state
    pub fn reset(&mut self) {
        self.runtime = PidRuntime::default();
    }

    /// Controller parameters
    pub fn params(&self) -> &PidParams {
        &self.params
    }

    /// Controller runtime state
    pub fn runtime(&self) -> &PidRuntime {
        &self.runtime
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const TICK: Duration = Duration::from_millis(10);

    fn hover_params() -> PidParams {
        PidParams {
            kp: -0.4,
            ki: -1.0,
            kd: -1.0,
            setpoint: -5.0,
            sample_period: TICK,
            output_min: 0.53,
            output_max: 1.0,
            polarity: ErrorPolarity::SetpointMinusMeasurement,
        }
    }

    #[test]
    fn proportional_only() {
        let mut pid = Pid::new(PidParams {
            kp: 2.0,
            ki: 0.0,
            kd: 0.0,
            setpoint: 1.0,
            output_min: -10.0,
            output_max: 10.0,
            ..hover_params()
        });
        assert_relative_eq!(pid.update(0.25, Duration::ZERO), 1.5);
    }

    #[test]
    fn integral_accumulates_error_times_sample_period() {
        let mut pid = Pid::new(PidParams {
            kp: 0.0,
            ki: 1.0,
            kd: 0.0,
            setpoint: 1.0,
            output_min: -10.0,
            output_max: 10.0,
            ..hover_params()
        });
        pid.update(0.0, Duration::ZERO);
        let out = pid.update(0.0, TICK);
        assert_relative_eq!(out, 0.02);
        assert_relative_eq!(pid.runtime().integral, 0.02);
    }

    #[test]
    fn derivative_uses_error_difference() {
        let mut pid = Pid::new(PidParams {
            kp: 0.0,
            ki: 0.0,
            kd: 1.0,
            setpoint: 0.0,
            output_min: -100.0,
            output_max: 100.0,
            ..hover_params()
        });
        assert_relative_eq!(pid.update(0.0, Duration::ZERO), 0.0);
        // error goes from 0 to -0.1 in one sample period
        assert_relative_eq!(pid.update(0.1, TICK), -10.0, epsilon = 1e-9);
    }

    #[test]
    fn rate_limited_updates_return_last_output() {
        let mut pid = Pid::new(PidParams {
            kp: 1.0,
            ki: 0.0,
            kd: 0.0,
            setpoint: 0.0,
            output_min: -10.0,
            output_max: 10.0,
            ..hover_params()
        });
        let first = pid.update(1.0, Duration::ZERO);
        let runtime = *pid.runtime();
        let second = pid.update(3.0, Duration::from_millis(5));
        assert_eq!(first, second);
        assert_eq!(runtime, *pid.runtime());
        assert_relative_eq!(pid.update(3.0, TICK), -3.0);
    }

    #[test]
    fn output_stays_within_bounds() {
        let mut pid = Pid::new(hover_params());
        let measurements = [0.0, -10.0, 5.0, -5.0, 100.0, -100.0, -4.9, -5.1, 0.3];
        for (i, m) in measurements.iter().cycle().take(500).enumerate() {
            let out = pid.update(*m, TICK * i as u32);
            assert!((0.53..=1.0).contains(&out), "output {} out of bounds", out);
        }
    }

    #[test]
    fn converging_measurement_stays_in_bounds_without_oscillation() {
        let mut pid = Pid::new(hover_params());
        let mut outputs = Vec::new();
        let mut converged_from = None;
        for k in 0..400u32 {
            let measurement = -5.0 * (k as f64 / 200.0).min(1.0);
            let out = pid.update(measurement, TICK * k);
            assert!((0.53..=1.0).contains(&out));
            if converged_from.is_none() && (measurement + 5.0).abs() < 0.05 {
                converged_from = Some(outputs.len());
            }
            outputs.push(out);
        }

        let tail = &outputs[converged_from.unwrap()..];
        let sign_changes = tail
            .windows(3)
            .filter(|w| {
                let d0 = w[1] - w[0];
                let d1 = w[2] - w[1];
                d0 * d1 < 0.0
            })
            .count();
        assert_eq!(sign_changes, 0);
    }

    #[test]
    fn polarity_conventions_are_equivalent() {
        let mut negative_gains = Pid::new(hover_params());
        let mut inverted_error = Pid::new(PidParams {
            kp: 0.4,
            ki: 1.0,
            kd: 1.0,
            polarity: ErrorPolarity::MeasurementMinusSetpoint,
            ..hover_params()
        });

        for k in 0..300u32 {
            let measurement = -5.0 + (k as f64 * 0.1).sin();
            let now = TICK * k;
            assert_relative_eq!(
                negative_gains.update(measurement, now),
                inverted_error.update(measurement, now),
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn reset_clears_runtime() {
        let mut pid = Pid::new(hover_params());
        pid.update(0.0, Duration::ZERO);
        pid.update(-1.0, TICK);
        pid.reset();
        assert_eq!(*pid.runtime(), PidRuntime::default());
    }
}
