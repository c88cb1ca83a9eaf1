//! # Low level setpoints
//!
//! The Crazyflie has a couple of safety mechanisms that one needs to be aware of in order to send setpoints:
//!  - When using [Commander::setpoint_rpyt()], a setpoint with thrust=0 must be sent once to unlock the thrust.
//!  - If no setpoint is received for 1 second, the Crazyflie resets roll/pitch/yawrate to 0/0/0 and after 2 seconds
//!    falls back to a lower-priority setpoint, which in most cases cuts the motors.
//!
//! Arming goes through the platform port, see [Platform].

use crazyflie_link::Packet;
use flume::Sender;

use crate::crtp::{COMMANDER_PORT, GENERIC_SETPOINT_PORT, PLATFORM_PORT};
use crate::Result;

const RPYT_CHANNEL: u8 = 0;
const GENERIC_SETPOINT_CHANNEL: u8 = 0;
const GENERIC_CMD_CHANNEL: u8 = 1;

const TYPE_STOP: u8 = 0;
const TYPE_HOVER: u8 = 10;
const TYPE_META_COMMAND_NOTIFY_SETPOINT_STOP: u8 = 0;

const PLATFORM_COMMAND_CHANNEL: u8 = 0;
const PLATFORM_REQUEST_ARMING: u8 = 1;

/// Setpoint sender
#[derive(Debug, Clone)]
pub(crate) struct Commander {
    uplink: Sender<Packet>,
}

impl Commander {
    pub fn new(uplink: Sender<Packet>) -> Self {
        Self { uplink }
    }

    /// Roll and pitch in degrees, yaw rate in degrees/second, thrust from 0 to 65535
    pub async fn setpoint_rpyt(&self, roll: f32, pitch: f32, yawrate: f32, thrust: u16) -> Result<()> {
        let mut payload = Vec::with_capacity(3 * 4 + 2);
        payload.extend_from_slice(&roll.to_le_bytes());
        // The RPYT pitch axis is inverted
        payload.extend_from_slice(&(-pitch).to_le_bytes());
        payload.extend_from_slice(&yawrate.to_le_bytes());
        payload.extend_from_slice(&thrust.to_le_bytes());

        self.uplink
            .send_async(Packet::new(COMMANDER_PORT, RPYT_CHANNEL, payload))
            .await?;
        Ok(())
    }

    /// Body velocities in m/s, yaw rate in degrees/second and height above ground in meters
    pub async fn setpoint_hover(&self, vx: f32, vy: f32, yawrate: f32, zdistance: f32) -> Result<()> {
        let mut payload = Vec::with_capacity(1 + 4 * 4);
        payload.push(TYPE_HOVER);
        payload.extend_from_slice(&vx.to_le_bytes());
        payload.extend_from_slice(&vy.to_le_bytes());
        payload.extend_from_slice(&yawrate.to_le_bytes());
        payload.extend_from_slice(&zdistance.to_le_bytes());

        self.uplink
            .send_async(Packet::new(GENERIC_SETPOINT_PORT, GENERIC_SETPOINT_CHANNEL, payload))
            .await?;
        Ok(())
    }

    /// Stop the motors immediately
    pub async fn setpoint_stop(&self) -> Result<()> {
        self.uplink
            .send_async(Packet::new(GENERIC_SETPOINT_PORT, GENERIC_SETPOINT_CHANNEL, vec![TYPE_STOP]))
            .await?;
        Ok(())
    }

    /// Lower the priority of the current setpoint so that any other source can take over
    pub async fn notify_setpoint_stop(&self, remain_valid_milliseconds: u32) -> Result<()> {
        let mut payload = Vec::with_capacity(1 + 4);
        payload.push(TYPE_META_COMMAND_NOTIFY_SETPOINT_STOP);
        payload.extend_from_slice(&remain_valid_milliseconds.to_le_bytes());

        self.uplink
            .send_async(Packet::new(GENERIC_SETPOINT_PORT, GENERIC_CMD_CHANNEL, payload))
            .await?;
        Ok(())
    }
}

/// Platform services, only arming is used
#[derive(Debug, Clone)]
pub(crate) struct Platform {
    uplink: Sender<Packet>,
}

impl Platform {
    pub fn new(uplink: Sender<Packet>) -> Self {
        Self { uplink }
    }

    /// Request the Crazyflie to arm or disarm its motors
    pub async fn send_arming_request(&self, arm: bool) -> Result<()> {
        self.uplink
            .send_async(Packet::new(
                PLATFORM_PORT,
                PLATFORM_COMMAND_CHANNEL,
                vec![PLATFORM_REQUEST_ARMING, arm as u8],
            ))
            .await?;
        Ok(())
    }
}

/// Thrust in the 16 bit RPYT range
pub(crate) fn thrust_to_u16(thrust: f64) -> u16 {
    thrust.round().clamp(0.0, u16::MAX as f64) as u16
}
