//! # Vehicle backend interface
//!
//! A [Vehicle] is the boundary between the sequencer and a concrete backend: the simulator in
//! [backends::sim](crate::backends::sim) or the Crazyflie radio link in [backends::radio](crate::backends::radio).
//!
//! All methods take `&self` so a vehicle can be shared in an `Arc` between its
//! [TelemetrySource](crate::TelemetrySource) and its [ActuatorSink](crate::ActuatorSink). Connecting is done by the
//! backend constructor and fails with [Error::ConnectionFailure](crate::Error::ConnectionFailure).

use std::time::Duration;

use async_trait::async_trait;

use crate::telemetry::TelemetrySample;
use crate::Result;

/// How a backend consumes time when a command is sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pacing {
    /// Sending a command blocks for the command duration, it paces the control loop
    Blocking,
    /// Sending returns immediately, the control loop has to wait for the next tick itself
    FireAndForget,
}

/// What a backend can do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Command pacing model
    pub pacing: Pacing,
    /// The backend accepts hover setpoints (height held by an on-board controller)
    pub hover_setpoint: bool,
    /// Longest time allowed between two commands before a backend-side failsafe triggers
    pub max_command_interval: Option<Duration>,
}

/// Abstract vehicle consumed by the sequencer
///
/// Angles are in radians and angular rates in radians per second. Backends convert to their own units.
#[async_trait]
pub trait Vehicle: Send + Sync {
    /// Backend capabilities
    fn capabilities(&self) -> Capabilities;

    /// Close the connection to the backend
    async fn disconnect(&self) -> Result<()>;

    /// Arm the motors
    async fn arm(&self) -> Result<()>;

    /// Disarm the motors
    async fn disarm(&self) -> Result<()>;

    /// Take control of the vehicle from this API
    async fn enable_control(&self) -> Result<()>;

    /// Release control of the vehicle
    async fn disable_control(&self) -> Result<()>;

    /// Bring the vehicle back to its initial state
    async fn reset(&self) -> Result<()>;

    /// Latest vehicle state
    async fn poll_state(&self) -> Result<TelemetrySample>;

    /// Hold an attitude and thrust for `dt`
    async fn send_attitude_thrust(&self, roll: f64, pitch: f64, yaw: f64, thrust: f64, dt: Duration) -> Result<()>;

    /// Ask the on-board controller to hold a height while moving at the given body velocity
    async fn send_hover_setpoint(&self, vx: f64, vy: f64, yaw_rate: f64, height: f64) -> Result<()>;
}
