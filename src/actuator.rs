//! # Actuator sinks
//!
//! The sequencer emits one [ControlCommand] per tick through an [ActuatorSink]. [VehicleActuator] maps commands onto
//! a [Vehicle]; tests use their own sinks to observe what the sequencer sends.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::vehicle::{Pacing, Vehicle};
use crate::{Error, Result};

/// Command sent for one tick
///
/// Angles are in radians, rates in radians per second, heights in meters and thrust in the backend unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlCommand {
    /// Raw attitude and collective thrust
    AttitudeThrust {
        /// Roll angle
        roll: f64,
        /// Pitch angle
        pitch: f64,
        /// Yaw
        yaw: f64,
        /// Collective thrust
        thrust: f64,
    },
    /// Height and body velocity held by the on-board controller
    HoverSetpoint {
        /// Forward velocity
        vx: f64,
        /// Lateral velocity
        vy: f64,
        /// Yaw rate
        yaw_rate: f64,
        /// Target height
        height: f64,
    },
}

impl ControlCommand {
    /// Level attitude with the given thrust
    pub fn level(thrust: f64) -> Self {
        ControlCommand::AttitudeThrust {
            roll: 0.0,
            pitch: 0.0,
            yaw: 0.0,
            thrust,
        }
    }

    /// Stationary hover at `height`
    pub fn hover_at(height: f64) -> Self {
        ControlCommand::HoverSetpoint {
            vx: 0.0,
            vy: 0.0,
            yaw_rate: 0.0,
            height,
        }
    }

    /// Neutral command sent once when a flight is aborted: level attitude, zero thrust
    pub fn safe() -> Self {
        Self::level(0.0)
    }

    /// Thrust of an attitude command or height of a hover setpoint
    pub fn thrust_or_height(&self) -> f64 {
        match self {
            ControlCommand::AttitudeThrust { thrust, .. } => *thrust,
            ControlCommand::HoverSetpoint { height, .. } => *height,
        }
    }

    /// True for the abort command
    pub fn is_safe(&self) -> bool {
        *self == Self::safe()
    }
}

/// Destination of control commands
#[async_trait]
pub trait ActuatorSink: Send {
    /// Whether [ActuatorSink::send()] paces the control loop
    fn pacing(&self) -> Pacing;

    /// Whether [ControlCommand::HoverSetpoint] is accepted
    fn supports_hover_setpoint(&self) -> bool;

    /// Longest allowed time between two commands, if the backend has a command watchdog
    fn max_command_interval(&self) -> Option<Duration> {
        None
    }

    /// Arm the motors
    async fn arm(&mut self) -> Result<()>;

    /// Disarm the motors
    async fn disarm(&mut self) -> Result<()>;

    /// Take control of the vehicle
    async fn enable_control(&mut self) -> Result<()>;

    /// Release control of the vehicle
    async fn disable_control(&mut self) -> Result<()>;

    /// Send a command meant to last `dt`
    async fn send(&mut self, command: &ControlCommand, dt: Duration) -> Result<()>;
}

/// Actuator sink writing to a [Vehicle]
pub struct VehicleActuator<V> {
    vehicle: Arc<V>,
}

impl<V: Vehicle> VehicleActuator<V> {
    /// Send commands to `vehicle`
    pub fn new(vehicle: Arc<V>) -> Self {
        Self { vehicle }
    }
}

#[async_trait]
impl<V: Vehicle> ActuatorSink for VehicleActuator<V> {
    fn pacing(&self) -> Pacing {
        self.vehicle.capabilities().pacing
    }

    fn supports_hover_setpoint(&self) -> bool {
        self.vehicle.capabilities().hover_setpoint
    }

    fn max_command_interval(&self) -> Option<Duration> {
        self.vehicle.capabilities().max_command_interval
    }

    async fn arm(&mut self) -> Result<()> {
        self.vehicle.arm().await
    }

    async fn disarm(&mut self) -> Result<()> {
        self.vehicle.disarm().await
    }

    async fn enable_control(&mut self) -> Result<()> {
        self.vehicle.enable_control().await
    }

    async fn disable_control(&mut self) -> Result<()> {
        self.vehicle.disable_control().await
    }

    async fn send(&mut self, command: &ControlCommand, dt: Duration) -> Result<()> {
        match *command {
            ControlCommand::AttitudeThrust {
                roll,
                pitch,
                yaw,
                thrust,
            } => self.vehicle.send_attitude_thrust(roll, pitch, yaw, thrust, dt).await,
            ControlCommand::HoverSetpoint {
                vx,
                vy,
                yaw_rate,
                height,
            } => {
                if !self.supports_hover_setpoint() {
                    return Err(Error::CommandRejected(
                        "backend does not support hover setpoints".to_owned(),
                    ));
                }
                self.vehicle.send_hover_setpoint(vx, vy, yaw_rate, height).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thrust_or_height() {
        assert_eq!(ControlCommand::level(0.7).thrust_or_height(), 0.7);
        assert_eq!(ControlCommand::hover_at(0.25).thrust_or_height(), 0.25);
    }

    #[test]
    fn safe_command_is_level_and_idle() {
        let safe = ControlCommand::safe();
        assert!(safe.is_safe());
        assert_eq!(safe.thrust_or_height(), 0.0);
        assert!(!ControlCommand::hover_at(0.0).is_safe());
    }
}
