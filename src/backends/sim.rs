//! # Simulated quadrotor
//!
//! [SimulatedQuad] is a point-mass quadrotor flying in a NED frame: `z` grows toward the ground, which is at
//! `z = 0`. Thrust is normalized, `hover_thrust` exactly compensates gravity when level. Attitude commands are
//! tracked instantly.
//!
//! Sending an attitude/thrust command advances the physics by the command duration, so the simulator paces the
//! control loop itself ([Pacing::Blocking]). With [SimConfig::realtime] set, it also sleeps for that duration.
//!
//! ```
//! # use std::sync::Arc;
//! # use std::time::Duration;
//! # use crazyflie_sequencer::backends::sim::{SimConfig, SimulatedQuad};
//! # use crazyflie_sequencer::Vehicle;
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> crazyflie_sequencer::Result<()> {
//! let quad = SimulatedQuad::connect(SimConfig::default())?;
//! quad.arm().await?;
//! quad.enable_control().await?;
//!
//! quad.send_attitude_thrust(0.0, 0.0, 0.0, 1.0, Duration::from_secs(1)).await?;
//! assert!(quad.poll_state().await?.z < 0.0);
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use async_trait::async_trait;
use futures::lock::Mutex;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::telemetry::TelemetrySample;
use crate::vehicle::{Capabilities, Pacing, Vehicle};
use crate::{Error, Result};

/// Simulator parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Gravity (m/s²)
    pub gravity: f64,
    /// Normalized thrust holding a level hover
    pub hover_thrust: f64,
    /// Linear drag coefficient (1/s)
    pub drag: f64,
    /// Physics integration step (seconds)
    pub substep: f64,
    /// Sleep for the duration of each command
    pub realtime: bool,
    /// Accept hover setpoints, held by a simulated on-board altitude controller
    pub hover_setpoint: bool,
    /// Duration simulated for each hover setpoint (seconds)
    pub setpoint_step: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            gravity: 9.81,
            hover_thrust: 0.58,
            drag: 0.1,
            substep: 0.001,
            realtime: false,
            hover_setpoint: false,
            setpoint_step: 0.02,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Body {
    z: f64,
    vz: f64,
    y: f64,
    vy: f64,
    roll: f64,
    pitch: f64,
}

#[derive(Debug, Default)]
struct SimState {
    body: Body,
    armed: bool,
    control_enabled: bool,
    connected: bool,
}

/// Altitude hold gains of the simulated on-board controller
const HOLD_KP: f64 = 2.0;
const HOLD_KD: f64 = 2.5;

/// Simulated quadrotor
pub struct SimulatedQuad {
    config: SimConfig,
    substep: Duration,
    setpoint_step: Duration,
    state: Mutex<SimState>,
}

impl SimulatedQuad {
    /// Start a simulator, on the ground and disarmed
    pub fn connect(config: SimConfig) -> Result<Self> {
        if !(config.hover_thrust > 0.0 && config.hover_thrust.is_finite()) {
            return Err(Error::ConnectionFailure(format!(
                "invalid simulator hover thrust {}",
                config.hover_thrust
            )));
        }
        let substep = Duration::try_from_secs_f64(config.substep)
            .ok()
            .filter(|d| !d.is_zero())
            .ok_or_else(|| Error::ConnectionFailure(format!("invalid simulator substep {}", config.substep)))?;
        let setpoint_step = Duration::try_from_secs_f64(config.setpoint_step)
            .ok()
            .filter(|d| !d.is_zero())
            .ok_or_else(|| {
                Error::ConnectionFailure(format!("invalid simulator setpoint step {}", config.setpoint_step))
            })?;

        info!("Simulated quadrotor ready");

        Ok(Self {
            config,
            substep,
            setpoint_step,
            state: Mutex::new(SimState {
                connected: true,
                ..Default::default()
            }),
        })
    }

    fn ensure_connected(state: &SimState) -> Result<()> {
        if state.connected {
            Ok(())
        } else {
            Err(Error::Disconnected)
        }
    }

    fn ensure_controllable(state: &SimState) -> Result<()> {
        Self::ensure_connected(state)?;
        if !state.armed {
            return Err(Error::CommandRejected("simulated quad is not armed".to_owned()));
        }
        if !state.control_enabled {
            return Err(Error::CommandRejected("API control is not enabled".to_owned()));
        }
        Ok(())
    }

    /// Integrate the dynamics for `duration` with a constant thrust
    fn integrate(&self, body: &mut Body, thrust: f64, duration: Duration) {
        let steps = (duration.as_secs_f64() / self.config.substep).round().max(1.0) as u32;
        let h = duration.as_secs_f64() / steps as f64;
        for _ in 0..steps {
            self.substep_with(body, thrust, h);
        }
    }

    fn substep_with(&self, body: &mut Body, thrust: f64, h: f64) {
        let g = self.config.gravity;
        let lift = g * thrust.max(0.0) / self.config.hover_thrust;
        let (sin_roll, cos_roll) = body.roll.sin_cos();
        let cos_pitch = body.pitch.cos();

        let az = g - lift * cos_roll * cos_pitch - self.config.drag * body.vz;
        let ay = lift * sin_roll * cos_pitch - self.config.drag * body.vy;

        body.vz += az * h;
        body.vy += ay * h;
        body.z += body.vz * h;
        body.y += body.vy * h;

        if body.z >= 0.0 {
            body.z = 0.0;
            body.vz = body.vz.min(0.0);
            body.vy = 0.0;
        }
    }

    async fn pace(&self, duration: Duration) {
        if self.config.realtime {
            tokio::time::sleep(duration).await;
        }
    }
}

#[async_trait]
impl Vehicle for SimulatedQuad {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            pacing: Pacing::Blocking,
            hover_setpoint: self.config.hover_setpoint,
            max_command_interval: None,
        }
    }

    async fn disconnect(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.armed = false;
        state.control_enabled = false;
        state.connected = false;
        info!("Simulated quadrotor disconnected");
        Ok(())
    }

    async fn arm(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        Self::ensure_connected(&state)?;
        state.armed = true;
        Ok(())
    }

    async fn disarm(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        Self::ensure_connected(&state)?;
        state.armed = false;
        Ok(())
    }

    async fn enable_control(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        Self::ensure_connected(&state)?;
        state.control_enabled = true;
        Ok(())
    }

    async fn disable_control(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        Self::ensure_connected(&state)?;
        state.control_enabled = false;
        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        Self::ensure_connected(&state)?;
        *state = SimState {
            connected: true,
            ..Default::default()
        };
        debug!("Simulated quadrotor reset");
        Ok(())
    }

    async fn poll_state(&self) -> Result<TelemetrySample> {
        let state = self.state.lock().await;
        Self::ensure_connected(&state)?;
        let body = state.body;
        Ok(TelemetrySample::now(body.z, body.y, body.roll, body.pitch))
    }

    async fn send_attitude_thrust(&self, roll: f64, pitch: f64, _yaw: f64, thrust: f64, dt: Duration) -> Result<()> {
        {
            let mut state = self.state.lock().await;
            Self::ensure_controllable(&state)?;

            let mut body = state.body;
            body.roll = roll;
            body.pitch = pitch;
            self.integrate(&mut body, thrust, dt);
            state.body = body;
        }

        self.pace(dt).await;
        Ok(())
    }

    async fn send_hover_setpoint(&self, _vx: f64, _vy: f64, _yaw_rate: f64, height: f64) -> Result<()> {
        if !self.config.hover_setpoint {
            return Err(Error::CommandRejected(
                "hover setpoints are disabled in this simulator".to_owned(),
            ));
        }

        {
            let mut state = self.state.lock().await;
            Self::ensure_controllable(&state)?;

            let mut body = state.body;
            body.roll = 0.0;
            body.pitch = 0.0;

            let steps = (self.config.setpoint_step / self.config.substep).round().max(1.0) as u32;
            let h = self.config.setpoint_step / steps as f64;
            for _ in 0..steps {
                // Up-positive height and climb rate
                let error = height - (-body.z);
                let climb = -body.vz;
                let thrust = self.config.hover_thrust * (1.0 + (HOLD_KP * error - HOLD_KD * climb) / self.config.gravity);
                self.substep_with(&mut body, thrust.clamp(0.0, 2.0 * self.config.hover_thrust), h);
            }
            state.body = body;
        }

        self.pace(self.setpoint_step).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    async fn ready_quad(config: SimConfig) -> SimulatedQuad {
        let quad = SimulatedQuad::connect(config).unwrap();
        quad.arm().await.unwrap();
        quad.enable_control().await.unwrap();
        quad
    }

    #[tokio::test]
    async fn hover_thrust_holds_altitude() {
        let quad = ready_quad(SimConfig {
            drag: 0.0,
            ..Default::default()
        })
        .await;

        // Lift off, then hold
        quad.send_attitude_thrust(0.0, 0.0, 0.0, 1.0, Duration::from_millis(500)).await.unwrap();
        let lifted = quad.poll_state().await.unwrap().z;
        assert!(lifted < 0.0);

        let climbing = {
            let state = quad.state.lock().await;
            state.body.vz
        };
        quad.send_attitude_thrust(0.0, 0.0, 0.0, 0.58, Duration::from_secs(1)).await.unwrap();
        let held = quad.poll_state().await.unwrap().z;
        assert_relative_eq!(held, lifted + climbing, epsilon = 1e-6);
    }

    #[tokio::test]
    async fn ground_stops_the_fall() {
        let quad = ready_quad(SimConfig::default()).await;
        quad.send_attitude_thrust(0.0, 0.0, 0.0, 0.0, Duration::from_secs(1)).await.unwrap();
        assert_eq!(quad.poll_state().await.unwrap().z, 0.0);
    }

    #[tokio::test]
    async fn roll_moves_sideways() {
        let quad = ready_quad(SimConfig::default()).await;
        quad.send_attitude_thrust(0.3, 0.0, 0.0, 1.0, Duration::from_secs(1)).await.unwrap();
        let sample = quad.poll_state().await.unwrap();
        assert!(sample.y > 0.0);
        assert_eq!(sample.roll, 0.3);
    }

    #[tokio::test]
    async fn commands_need_arming_and_control() {
        let quad = SimulatedQuad::connect(SimConfig::default()).unwrap();
        let dt = Duration::from_millis(10);
        assert!(matches!(
            quad.send_attitude_thrust(0.0, 0.0, 0.0, 1.0, dt).await,
            Err(Error::CommandRejected(_))
        ));

        quad.arm().await.unwrap();
        assert!(matches!(
            quad.send_attitude_thrust(0.0, 0.0, 0.0, 1.0, dt).await,
            Err(Error::CommandRejected(_))
        ));

        quad.enable_control().await.unwrap();
        assert!(quad.send_attitude_thrust(0.0, 0.0, 0.0, 1.0, dt).await.is_ok());
    }

    #[tokio::test]
    async fn reset_restores_initial_state() {
        let quad = ready_quad(SimConfig::default()).await;
        quad.send_attitude_thrust(0.2, 0.0, 0.0, 1.0, Duration::from_secs(1)).await.unwrap();
        quad.reset().await.unwrap();

        let sample = quad.poll_state().await.unwrap();
        assert_eq!((sample.z, sample.y, sample.roll), (0.0, 0.0, 0.0));
        assert!(matches!(
            quad.send_attitude_thrust(0.0, 0.0, 0.0, 1.0, Duration::from_millis(10)).await,
            Err(Error::CommandRejected(_))
        ));
    }

    #[tokio::test]
    async fn hover_setpoint_converges() {
        let quad = ready_quad(SimConfig {
            hover_setpoint: true,
            ..Default::default()
        })
        .await;

        for _ in 0..500 {
            quad.send_hover_setpoint(0.0, 0.0, 0.0, 1.0).await.unwrap();
        }
        assert_relative_eq!(-quad.poll_state().await.unwrap().z, 1.0, epsilon = 0.05);
    }

    #[tokio::test]
    async fn hover_setpoint_can_be_disabled() {
        let quad = ready_quad(SimConfig::default()).await;
        assert!(!quad.capabilities().hover_setpoint);
        assert!(matches!(
            quad.send_hover_setpoint(0.0, 0.0, 0.0, 1.0).await,
            Err(Error::CommandRejected(_))
        ));
    }

    #[tokio::test]
    async fn disconnected_quad_fails() {
        let quad = ready_quad(SimConfig::default()).await;
        quad.disconnect().await.unwrap();
        assert!(matches!(quad.poll_state().await, Err(Error::Disconnected)));
    }

    #[test]
    fn invalid_config_fails_to_connect() {
        let config = SimConfig {
            substep: 0.0,
            ..Default::default()
        };
        assert!(matches!(SimulatedQuad::connect(config), Err(Error::ConnectionFailure(_))));
    }
}
