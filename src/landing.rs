//! # Landing ramp
//!
//! The landing phase commands a target height that steps down by `decrement` every `step_period`, starting one
//! decrement below the altitude at which landing begins and never going below `land_height`. Each step starts from
//! the lower of the current altitude and the previous target, so successive targets strictly decrease until they
//! reach the floor, even if the vehicle lags behind the ramp.
//!
//! The target is resent every tick in between steps: the radio watchdog needs a fresh setpoint far more often than
//! the ramp moves.

use std::time::Duration;

/// Landing ramp parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LandingParams {
    /// Height removed at each step
    pub decrement: f64,
    /// Lowest target height
    pub land_height: f64,
    /// Time between two steps
    pub step_period: Duration,
    /// Margin above `land_height` considered landed
    pub tolerance: f64,
}

/// Stepwise descending height target
#[derive(Debug, Clone)]
pub struct LandingRamp {
    params: LandingParams,
    target: Option<f64>,
    last_step: Duration,
}

impl LandingRamp {
    /// New ramp, the first target is computed on the first call to [LandingRamp::target()]
    pub fn new(params: LandingParams) -> Self {
        Self {
            params,
            target: None,
            last_step: Duration::ZERO,
        }
    }

    /// Target height for the tick at `phase_elapsed` into the landing phase
    pub fn target(&mut self, altitude: f64, phase_elapsed: Duration) -> f64 {
        let target = match self.target {
            None => {
                self.last_step = phase_elapsed;
                self.step_from(altitude)
            }
            Some(previous) if phase_elapsed.saturating_sub(self.last_step) >= self.params.step_period => {
                self.last_step = phase_elapsed;
                self.step_from(altitude.min(previous))
            }
            Some(previous) => previous,
        };
        self.target = Some(target);
        target
    }

    fn step_from(&self, height: f64) -> f64 {
        (height - self.params.decrement).max(self.params.land_height)
    }

    /// True once `altitude` is within the tolerance of the landing height
    pub fn landed(&self, altitude: f64) -> bool {
        altitude <= self.params.land_height + self.params.tolerance
    }

    /// Last computed target
    pub fn current_target(&self) -> Option<f64> {
        self.target
    }

    /// Forget the current target
    pub fn reset(&mut self) {
        self.target = None;
        self.last_step = Duration::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn params() -> LandingParams {
        LandingParams {
            decrement: 0.25,
            land_height: 0.1,
            step_period: Duration::from_millis(500),
            tolerance: 0.05,
        }
    }

    #[test]
    fn targets_strictly_decrease_until_floor() {
        let mut ramp = LandingRamp::new(params());
        let tick = Duration::from_millis(20);

        let mut steps = Vec::new();
        for k in 0..200u32 {
            // Vehicle stuck at its initial altitude
            let target = ramp.target(1.5, tick * k);
            if steps.last() != Some(&target) {
                steps.push(target);
            }
        }

        assert_relative_eq!(steps[0], 1.25);
        for pair in steps.windows(2) {
            assert!(pair[1] < pair[0]);
            if pair[1] > 0.1 {
                assert_relative_eq!(pair[0] - pair[1], 0.25, epsilon = 1e-9);
            }
        }
        assert_eq!(*steps.last().unwrap(), 0.1);
        assert!(steps.iter().all(|t| *t >= 0.1));
    }

    #[test]
    fn target_is_held_between_steps() {
        let mut ramp = LandingRamp::new(params());
        let first = ramp.target(1.0, Duration::ZERO);
        assert_eq!(ramp.target(0.2, Duration::from_millis(480)), first);
        assert_relative_eq!(ramp.target(0.6, Duration::from_millis(500)), 0.35);
    }

    #[test]
    fn follows_a_faster_descent() {
        let mut ramp = LandingRamp::new(params());
        ramp.target(2.0, Duration::ZERO);
        // The vehicle dropped below the ramp
        assert_relative_eq!(ramp.target(1.0, Duration::from_millis(500)), 0.75);
    }

    #[test]
    fn landed_within_tolerance() {
        let ramp = LandingRamp::new(params());
        assert!(ramp.landed(0.15));
        assert!(!ramp.landed(0.16));
    }
}
