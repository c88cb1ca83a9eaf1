//! # Sequence configuration
//!
//! A [SequenceConfig] carries every constant a flight needs: PID gains and limits, tick period, phase durations,
//! maneuver switch times, landing ramp and safety limits. It is built once, validated by
//! [SequenceConfig::validate()] (also called by [Sequencer::new()](crate::Sequencer::new)) and stays immutable for
//! the whole run.
//!
//! All times are expressed in seconds, angles in radians and heights in meters. Thrust values are in the backend
//! unit: normalized `[0, 1]` for the simulator, 16 bit for the Crazyflie.
//!
//! The configuration is serde-friendly so it can be loaded from a file:
//! ```
//! # use crazyflie_sequencer::SequenceConfig;
//! let config = SequenceConfig::simulated_maneuver();
//! let json = serde_json::to_string(&config).unwrap();
//! let back: SequenceConfig = serde_json::from_str(&json).unwrap();
//! assert!(back.validate().is_ok());
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::landing::LandingParams;
use crate::pid::{ErrorPolarity, PidParams};
use crate::safety::SafetyLimits;
use crate::trajectory::TrajectoryParams;
use crate::{Error, Result};

/// Direction of the vehicle `z` axis
///
/// The simulator reports positions in a NED frame where `z` grows downward, the Crazyflie state estimate is
/// up-positive. The sequencer works with heights (up-positive) for landing and uses this to convert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerticalAxis {
    /// `z` is the height above ground
    #[default]
    Up,
    /// `z` grows toward the ground, height is `-z`
    Down,
}

impl VerticalAxis {
    /// Height (up-positive) corresponding to a vehicle `z`
    pub fn height(&self, z: f64) -> f64 {
        match self {
            VerticalAxis::Up => z,
            VerticalAxis::Down => -z,
        }
    }

    /// Vehicle `z` corresponding to a height
    pub fn to_vehicle(&self, height: f64) -> f64 {
        // The conversion is its own inverse
        self.height(height)
    }
}

/// How the hover phase is flown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoverMode {
    /// The PID controller regulates `z` toward `hover_setpoint` with attitude/thrust commands
    #[default]
    Pid,
    /// A hover setpoint at `hover_setpoint` height is sent and the vehicle holds it on its own
    Setpoint,
}

/// Optional early exit from hover once the altitude has converged
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConvergenceExit {
    /// Maximum `|setpoint - z|` considered converged
    pub tolerance: f64,
    /// How long the altitude has to stay converged (seconds)
    pub hold_time: f64,
}

/// Flight sequence configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SequenceConfig {
    /// Proportional gain
    pub kp: f64,
    /// Integral gain
    pub ki: f64,
    /// Derivative gain
    pub kd: f64,
    /// Hover target. Vehicle `z` for [HoverMode::Pid], height for [HoverMode::Setpoint]
    pub hover_setpoint: f64,
    /// Minimum time between two PID updates (seconds)
    pub sample_period: f64,
    /// Lower PID output bound
    pub output_min: f64,
    /// Upper PID output bound
    pub output_max: f64,
    /// Control loop period (seconds)
    pub tick_period: f64,
    /// Hover dwell (seconds)
    pub hover_duration: f64,
    /// Maneuver time at which thrust switches from `min_thrust` to `max_thrust` (seconds)
    pub thrust_switch_time: f64,
    /// Maneuver time after which the roll stops increasing (seconds)
    pub rotation_switch_time: f64,
    /// Maneuver duration (seconds)
    pub total_maneuver_time: f64,
    /// Roll rate during the rotation part of the maneuver (rad/s)
    pub rotation_rate: f64,
    /// Maneuver thrust before the switch
    pub min_thrust: f64,
    /// Maneuver thrust after the switch
    pub max_thrust: f64,
    /// Height removed from the landing target at each landing step (meters)
    pub landing_decrement: f64,
    /// Lowest landing target (meters)
    pub land_height: f64,
    /// Maximum time spent in any flight phase (seconds)
    pub phase_timeout: f64,
    /// Maximum telemetry sample age (seconds)
    pub telemetry_max_age: f64,

    /// Sign convention of the PID error
    #[serde(default)]
    pub error_polarity: ErrorPolarity,
    /// Direction of the vehicle `z` axis
    #[serde(default)]
    pub vertical_axis: VerticalAxis,
    /// Hover flying mode
    #[serde(default)]
    pub hover_mode: HoverMode,
    /// Time between two landing target decrements (seconds)
    #[serde(default = "default_landing_step_period")]
    pub landing_step_period: f64,
    /// Height above `land_height` at which the vehicle is considered landed (meters)
    #[serde(default = "default_landing_tolerance")]
    pub landing_tolerance: f64,
    /// Leave hover early once converged. Disabled by default
    #[serde(default)]
    pub hover_convergence: Option<ConvergenceExit>,
}

fn default_landing_step_period() -> f64 {
    0.5
}

fn default_landing_tolerance() -> f64 {
    0.05
}

fn seconds(name: &str, value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| Error::Configuration(format!("{} must be a non-negative duration, got {}", name, value)))
}

impl SequenceConfig {
    /// Simulator flight with the gains found to lift the simulated quad to `z = -5`
    ///
    /// The simulator is NED, so the gains are negative: more thrust makes `z` decrease.
    pub fn simulated_maneuver() -> Self {
        Self {
            kp: -0.4,
            ki: -1.0,
            kd: -1.0,
            hover_setpoint: -5.0,
            sample_period: 0.01,
            output_min: 0.53,
            output_max: 1.0,
            tick_period: 0.01,
            hover_duration: 20.0,
            thrust_switch_time: 0.0,
            rotation_switch_time: 1.0,
            total_maneuver_time: 5.0,
            rotation_rate: 1.0,
            min_thrust: 0.53,
            max_thrust: 1.0,
            landing_decrement: 0.25,
            land_height: 0.0,
            phase_timeout: 60.0,
            telemetry_max_age: 0.1,
            error_polarity: ErrorPolarity::SetpointMinusMeasurement,
            vertical_axis: VerticalAxis::Down,
            hover_mode: HoverMode::Pid,
            landing_step_period: default_landing_step_period(),
            landing_tolerance: default_landing_tolerance(),
            hover_convergence: None,
        }
    }

    /// Crazyflie flight relying on the on-board hover controller
    ///
    /// Thrust bounds are the 16 bit range accepted by the Crazyflie RPYT setpoint.
    pub fn radio_hover() -> Self {
        Self {
            kp: 25_000.0,
            ki: 5_000.0,
            kd: 10_000.0,
            hover_setpoint: 0.25,
            sample_period: 0.02,
            output_min: 10_001.0,
            output_max: 60_000.0,
            tick_period: 0.02,
            hover_duration: 2.5,
            thrust_switch_time: 1.0,
            rotation_switch_time: 1.0,
            total_maneuver_time: 5.0,
            rotation_rate: 1.0,
            min_thrust: 10_001.0,
            max_thrust: 60_000.0,
            landing_decrement: 0.25,
            land_height: 0.1,
            phase_timeout: 30.0,
            telemetry_max_age: 0.2,
            error_polarity: ErrorPolarity::SetpointMinusMeasurement,
            vertical_axis: VerticalAxis::Up,
            hover_mode: HoverMode::Setpoint,
            landing_step_period: default_landing_step_period(),
            landing_tolerance: default_landing_tolerance(),
            hover_convergence: None,
        }
    }

    /// Check the configuration for consistency
    ///
    /// Returns [Error::Configuration] describing the first problem found.
    pub fn validate(&self) -> Result<()> {
        let finite = [
            ("kp", self.kp),
            ("ki", self.ki),
            ("kd", self.kd),
            ("hover_setpoint", self.hover_setpoint),
            ("output_min", self.output_min),
            ("output_max", self.output_max),
            ("rotation_rate", self.rotation_rate),
            ("min_thrust", self.min_thrust),
            ("max_thrust", self.max_thrust),
            ("land_height", self.land_height),
        ];
        for (name, value) in finite {
            if !value.is_finite() {
                return Err(Error::Configuration(format!("{} must be finite, got {}", name, value)));
            }
        }

        if self.output_min > self.output_max {
            return Err(Error::Configuration(format!(
                "output_min ({}) is greater than output_max ({})",
                self.output_min, self.output_max
            )));
        }
        if self.min_thrust > self.max_thrust {
            return Err(Error::Configuration(format!(
                "min_thrust ({}) is greater than max_thrust ({})",
                self.min_thrust, self.max_thrust
            )));
        }

        let tick = self.tick()?;
        if tick.is_zero() {
            return Err(Error::Configuration("tick_period must be positive".to_owned()));
        }
        if self.sample_period()?.is_zero() {
            return Err(Error::Configuration("sample_period must be positive".to_owned()));
        }
        if self.telemetry_max_age()?.is_zero() {
            return Err(Error::Configuration("telemetry_max_age must be positive".to_owned()));
        }
        seconds("thrust_switch_time", self.thrust_switch_time)?;
        seconds("rotation_switch_time", self.rotation_switch_time)?;

        let hover = self.hover_duration()?;
        let maneuver = self.total_maneuver_time()?;
        let timeout = self.phase_timeout()?;
        if timeout <= hover || timeout <= maneuver {
            return Err(Error::Configuration(format!(
                "phase_timeout ({:?}) must exceed hover_duration ({:?}) and total_maneuver_time ({:?})",
                timeout, hover, maneuver
            )));
        }

        if !(self.landing_decrement > 0.0 && self.landing_decrement.is_finite()) {
            return Err(Error::Configuration(format!(
                "landing_decrement must be positive, got {}",
                self.landing_decrement
            )));
        }
        if self.landing_step_period()? < tick {
            return Err(Error::Configuration(
                "landing_step_period must be at least one tick_period".to_owned(),
            ));
        }
        if !(self.landing_tolerance >= 0.0 && self.landing_tolerance.is_finite()) {
            return Err(Error::Configuration(format!(
                "landing_tolerance must be non-negative, got {}",
                self.landing_tolerance
            )));
        }

        if let Some(convergence) = &self.hover_convergence {
            if !(convergence.tolerance > 0.0 && convergence.tolerance.is_finite()) {
                return Err(Error::Configuration(format!(
                    "hover_convergence.tolerance must be positive, got {}",
                    convergence.tolerance
                )));
            }
            seconds("hover_convergence.hold_time", convergence.hold_time)?;
        }

        Ok(())
    }

    /// Control loop period
    pub fn tick(&self) -> Result<Duration> {
        seconds("tick_period", self.tick_period)
    }

    /// PID sample period
    pub fn sample_period(&self) -> Result<Duration> {
        seconds("sample_period", self.sample_period)
    }

    /// Hover dwell
    pub fn hover_duration(&self) -> Result<Duration> {
        seconds("hover_duration", self.hover_duration)
    }

    /// Maneuver duration
    pub fn total_maneuver_time(&self) -> Result<Duration> {
        seconds("total_maneuver_time", self.total_maneuver_time)
    }

    /// Per-phase timeout
    pub fn phase_timeout(&self) -> Result<Duration> {
        seconds("phase_timeout", self.phase_timeout)
    }

    /// Maximum telemetry sample age
    pub fn telemetry_max_age(&self) -> Result<Duration> {
        seconds("telemetry_max_age", self.telemetry_max_age)
    }

    /// Time between two landing steps
    pub fn landing_step_period(&self) -> Result<Duration> {
        seconds("landing_step_period", self.landing_step_period)
    }

    /// Hover PID parameters
    pub fn pid_params(&self) -> Result<PidParams> {
        Ok(PidParams {
            kp: self.kp,
            ki: self.ki,
            kd: self.kd,
            setpoint: self.hover_setpoint,
            sample_period: self.sample_period()?,
            output_min: self.output_min,
            output_max: self.output_max,
            polarity: self.error_polarity,
        })
    }

    /// Maneuver parameters
    pub fn trajectory_params(&self) -> Result<TrajectoryParams> {
        Ok(TrajectoryParams {
            thrust_switch_time: seconds("thrust_switch_time", self.thrust_switch_time)?,
            rotation_switch_time: seconds("rotation_switch_time", self.rotation_switch_time)?,
            total_time: self.total_maneuver_time()?,
            rotation_rate: self.rotation_rate,
            min_thrust: self.min_thrust,
            max_thrust: self.max_thrust,
        })
    }

    /// Landing ramp parameters
    pub fn landing_params(&self) -> Result<LandingParams> {
        Ok(LandingParams {
            decrement: self.landing_decrement,
            land_height: self.land_height,
            step_period: self.landing_step_period()?,
            tolerance: self.landing_tolerance,
        })
    }

    /// Safety guard limits
    pub fn safety_limits(&self) -> Result<SafetyLimits> {
        Ok(SafetyLimits {
            phase_timeout: self.phase_timeout()?,
            telemetry_max_age: self.telemetry_max_age()?,
        })
    }

    /// Same configuration with other maneuver switch times
    pub fn with_switch_times(&self, thrust_switch_time: f64, rotation_switch_time: f64) -> Self {
        Self {
            thrust_switch_time,
            rotation_switch_time,
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_are_valid() {
        assert!(SequenceConfig::simulated_maneuver().validate().is_ok());
        assert!(SequenceConfig::radio_hover().validate().is_ok());
    }

    #[test]
    fn inverted_output_bounds_are_rejected() {
        let config = SequenceConfig {
            output_min: 1.0,
            output_max: 0.5,
            ..SequenceConfig::simulated_maneuver()
        };
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn negative_tick_period_is_rejected() {
        let config = SequenceConfig {
            tick_period: -0.01,
            ..SequenceConfig::simulated_maneuver()
        };
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));

        let config = SequenceConfig {
            tick_period: 0.0,
            ..SequenceConfig::simulated_maneuver()
        };
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn phase_timeout_must_cover_fixed_phases() {
        let config = SequenceConfig {
            phase_timeout: 10.0,
            ..SequenceConfig::simulated_maneuver()
        };
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn optional_fields_take_defaults() {
        let json = r#"{
            "kp": 1.0, "ki": 0.0, "kd": 0.0, "hover_setpoint": 1.0, "sample_period": 0.01,
            "output_min": 0.0, "output_max": 1.0, "tick_period": 0.01, "hover_duration": 1.0,
            "thrust_switch_time": 0.5, "rotation_switch_time": 0.5, "total_maneuver_time": 1.0,
            "rotation_rate": 1.0, "min_thrust": 0.2, "max_thrust": 0.8, "landing_decrement": 0.1,
            "land_height": 0.0, "phase_timeout": 5.0, "telemetry_max_age": 0.1
        }"#;
        let config: SequenceConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.error_polarity, ErrorPolarity::SetpointMinusMeasurement);
        assert_eq!(config.vertical_axis, VerticalAxis::Up);
        assert_eq!(config.hover_mode, HoverMode::Pid);
        assert_eq!(config.landing_step_period, 0.5);
        assert_eq!(config.landing_tolerance, 0.05);
        assert!(config.hover_convergence.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_required_field_fails_to_load() {
        let json = r#"{ "kp": 1.0 }"#;
        assert!(serde_json::from_str::<SequenceConfig>(json).is_err());
    }

    #[test]
    fn vertical_axis_conversions() {
        assert_eq!(VerticalAxis::Down.height(-5.0), 5.0);
        assert_eq!(VerticalAxis::Down.to_vehicle(2.0), -2.0);
        assert_eq!(VerticalAxis::Up.height(0.3), 0.3);
    }
}
