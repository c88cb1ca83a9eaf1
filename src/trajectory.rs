//! # Open-loop maneuver generator
//!
//! The maneuver is a pure function of the time elapsed since its start: thrust switches from `min_thrust` to
//! `max_thrust` at `thrust_switch_time`, and the roll grows at `rotation_rate` until `rotation_switch_time`, then
//! stays where it is. Once the rotation has stopped it never resumes until [ManeuverGenerator::reset()].
//!
//! The generator has no notion of the end of the maneuver, the caller stops advancing it once
//! [ManeuverGenerator::is_complete()] returns true.

use std::time::Duration;

/// Maneuver parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrajectoryParams {
    /// Time at which thrust switches to `max_thrust`
    pub thrust_switch_time: Duration,
    /// Time after which the roll is frozen
    pub rotation_switch_time: Duration,
    /// Maneuver duration
    pub total_time: Duration,
    /// Roll rate while rotating (rad/s)
    pub rotation_rate: f64,
    /// Thrust before the switch
    pub min_thrust: f64,
    /// Thrust after the switch
    pub max_thrust: f64,
}

/// One step of the maneuver
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ManeuverSetpoint {
    /// Thrust to apply for the step
    pub thrust: f64,
    /// Roll angle to hold for the step (rad)
    pub roll: f64,
}

/// Time-switched roll/thrust schedule
#[derive(Debug, Clone)]
pub struct ManeuverGenerator {
    params: TrajectoryParams,
    accumulated_roll: f64,
    rotation_stopped: bool,
}

impl ManeuverGenerator {
    /// New generator with zero roll
    pub fn new(params: TrajectoryParams) -> Self {
        Self {
            params,
            accumulated_roll: 0.0,
            rotation_stopped: false,
        }
    }

    /// Advance the maneuver by one step of length `dt` starting at `elapsed`
    pub fn advance(&mut self, elapsed: Duration, dt: Duration) -> ManeuverSetpoint {
        let thrust = if elapsed < self.params.thrust_switch_time {
            self.params.min_thrust
        } else {
            self.params.max_thrust
        };

        if elapsed >= self.params.rotation_switch_time {
            self.rotation_stopped = true;
        }
        if !self.rotation_stopped {
            self.accumulated_roll += self.params.rotation_rate * dt.as_secs_f64();
        }

        ManeuverSetpoint {
            thrust,
            roll: self.accumulated_roll,
        }
    }

    /// True once `elapsed` reached the maneuver duration
    pub fn is_complete(&self, elapsed: Duration) -> bool {
        elapsed >= self.params.total_time
    }

    /// Current roll
    pub fn accumulated_roll(&self) -> f64 {
        self.accumulated_roll
    }

    /// Restart the maneuver from zero roll
    pub fn reset(&mut self) {
        self.accumulated_roll = 0.0;
        self.rotation_stopped = false;
    }

    /// Maneuver parameters
    pub fn params(&self) -> &TrajectoryParams {
        &self.params
    }
}
