//! # Log subsystem
//!
//! The Crazyflie streams variables in log blocks: a block is a list of variables from the log table of content,
//! sampled at a fixed period and sent in one packet on the data channel. Only what the radio backend needs is
//! implemented: fetching the TOC, creating, starting and stopping blocks and decoding block data.

use std::collections::BTreeMap;
use std::convert::{TryFrom, TryInto};
use std::time::Duration;

use crazyflie_link::Packet;
use flume::{Receiver, Sender};
use futures::lock::Mutex;
use half::f16;
use log::debug;

use crate::crtp::{crtp_channel_dispatcher, fetch_toc, WaitForPacket, LOG_PORT};
use crate::{Error, Result};

const CONTROL_CHANNEL: u8 = 1;

const DELETE_BLOCK: u8 = 2;
const START_BLOCK: u8 = 3;
const STOP_BLOCK: u8 = 4;
const RESET: u8 = 5;
const CREATE_BLOCK_V2: u8 = 6;

/// Type of a log variable as announced in the TOC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogVariableType {
    /// `u8`
    U8,
    /// `u16`
    U16,
    /// `u32`
    U32,
    /// `i8`
    I8,
    /// `i16`
    I16,
    /// `i32`
    I32,
    /// `f32`
    F32,
    /// Half precision float
    F16,
}

impl TryFrom<u8> for LogVariableType {
    type Error = Error;

    fn try_from(log_type: u8) -> Result<Self> {
        Ok(match log_type {
            1 => LogVariableType::U8,
            2 => LogVariableType::U16,
            3 => LogVariableType::U32,
            4 => LogVariableType::I8,
            5 => LogVariableType::I16,
            6 => LogVariableType::I32,
            7 => LogVariableType::F32,
            8 => LogVariableType::F16,
            _ => return Err(Error::Protocol(format!("Invalid log item type: {}", log_type))),
        })
    }
}

impl LogVariableType {
    fn id(&self) -> u8 {
        match self {
            LogVariableType::U8 => 1,
            LogVariableType::U16 => 2,
            LogVariableType::U32 => 3,
            LogVariableType::I8 => 4,
            LogVariableType::I16 => 5,
            LogVariableType::I32 => 6,
            LogVariableType::F32 => 7,
            LogVariableType::F16 => 8,
        }
    }

    /// Size of a value in a data packet
    pub fn byte_length(&self) -> usize {
        match self {
            LogVariableType::U8 | LogVariableType::I8 => 1,
            LogVariableType::U16 | LogVariableType::I16 | LogVariableType::F16 => 2,
            LogVariableType::U32 | LogVariableType::I32 | LogVariableType::F32 => 4,
        }
    }

    /// Decode one little-endian value
    pub fn decode(&self, bytes: &[u8]) -> Result<f64> {
        if bytes.len() != self.byte_length() {
            return Err(Error::Protocol(format!(
                "{:?} value needs {} bytes, got {}",
                self,
                self.byte_length(),
                bytes.len()
            )));
        }

        Ok(match self {
            LogVariableType::U8 => bytes[0] as f64,
            LogVariableType::I8 => bytes[0] as i8 as f64,
            LogVariableType::U16 => u16::from_le_bytes(bytes.try_into()?) as f64,
            LogVariableType::I16 => i16::from_le_bytes(bytes.try_into()?) as f64,
            LogVariableType::U32 => u32::from_le_bytes(bytes.try_into()?) as f64,
            LogVariableType::I32 => i32::from_le_bytes(bytes.try_into()?) as f64,
            LogVariableType::F32 => f32::from_le_bytes(bytes.try_into()?) as f64,
            LogVariableType::F16 => f16::from_le_bytes(bytes.try_into()?).to_f64(),
        })
    }
}

/// Variables of a created block, used to decode its data packets
#[derive(Debug, Clone)]
pub struct LogBlockLayout {
    block_id: u8,
    variables: Vec<(String, LogVariableType)>,
}

/// One decoded data packet
#[derive(Debug, Clone, PartialEq)]
pub struct LogData {
    /// Crazyflie timestamp (ms, 24 bits)
    pub timestamp: u32,
    /// Values in block order
    pub values: Vec<f64>,
}

impl LogBlockLayout {
    /// Block id
    pub fn block_id(&self) -> u8 {
        self.block_id
    }

    /// Decode a data channel payload
    ///
    /// Returns `Ok(None)` if the packet belongs to another block.
    pub fn decode(&self, data: &[u8]) -> Result<Option<LogData>> {
        if data.len() < 4 {
            return Err(Error::Log(format!("log data packet too short ({} bytes)", data.len())));
        }
        if data[0] != self.block_id {
            return Ok(None);
        }

        let timestamp = u32::from_le_bytes([data[1], data[2], data[3], 0]);

        let expected: usize = self.variables.iter().map(|(_, t)| t.byte_length()).sum();
        let mut payload = &data[4..];
        if payload.len() != expected {
            return Err(Error::Log(format!(
                "block {} carries {} bytes, expected {}",
                self.block_id,
                payload.len(),
                expected
            )));
        }

        let mut values = Vec::with_capacity(self.variables.len());
        for (_, variable_type) in &self.variables {
            let (value, rest) = payload.split_at(variable_type.byte_length());
            values.push(variable_type.decode(value)?);
            payload = rest;
        }

        Ok(Some(LogData { timestamp, values }))
    }
}

/// Access to the log subsystem
#[derive(Debug)]
pub(crate) struct RadioLog {
    uplink: Sender<Packet>,
    control_downlink: Mutex<Receiver<Packet>>,
    toc: BTreeMap<String, (u16, LogVariableType)>,
}

impl RadioLog {
    /// Fetch the TOC and reset the log subsystem
    ///
    /// Returns the log access and the receiver of the data channel.
    pub async fn new(downlink: Receiver<Packet>, uplink: Sender<Packet>) -> Result<(Self, Receiver<Packet>)> {
        let (toc_downlink, control_downlink, data_downlink, _) = crtp_channel_dispatcher(downlink);

        let toc: BTreeMap<String, (u16, LogVariableType)> = fetch_toc(LOG_PORT, &uplink, &toc_downlink).await?;
        debug!("Log TOC fetched, {} variables", toc.len());

        let log = Self {
            uplink,
            control_downlink: Mutex::new(control_downlink),
            toc,
        };
        log.control(&[RESET]).await?;

        Ok((log, data_downlink))
    }

    async fn control(&self, request: &[u8]) -> Result<()> {
        let downlink = self.control_downlink.lock().await;

        let pk = Packet::new(LOG_PORT, CONTROL_CHANNEL, request.to_vec());
        self.uplink.send_async(pk).await?;

        // Answers echo the command and block id, the reset answer has no block id
        let prefix = &request[..request.len().min(2)];
        let pk = downlink.wait_packet(LOG_PORT, CONTROL_CHANNEL, prefix).await?;
        match pk.get_data().get(2) {
            Some(0) => Ok(()),
            Some(error) => Err(Error::Log(format!(
                "log command {} failed with error {}",
                request[0], error
            ))),
            None => Err(Error::Protocol("log control answer too short".to_owned())),
        }
    }

    /// Create block `block_id` with the given variables
    pub async fn create_block(&self, block_id: u8, names: &[&str]) -> Result<LogBlockLayout> {
        let mut request = vec![CREATE_BLOCK_V2, block_id];
        let mut variables = Vec::with_capacity(names.len());

        for name in names {
            let (id, variable_type) = self
                .toc
                .get(*name)
                .ok_or_else(|| Error::VariableNotFound(name.to_string()))?;
            request.push((variable_type.id() << 4) | variable_type.id());
            request.extend_from_slice(&id.to_le_bytes());
            variables.push((name.to_string(), *variable_type));
        }

        self.control(&request).await?;

        Ok(LogBlockLayout { block_id, variables })
    }

    /// Start streaming a block, `period` is rounded down to 10 ms
    pub async fn start_block(&self, block_id: u8, period: Duration) -> Result<()> {
        let period_ms = period.as_millis();
        if !(10..=2550).contains(&period_ms) {
            return Err(Error::Log(format!(
                "log period {} ms out of the 10 to 2550 ms range",
                period_ms
            )));
        }
        self.control(&[START_BLOCK, block_id, (period_ms / 10) as u8]).await
    }

    /// Stop streaming a block
    pub async fn stop_block(&self, block_id: u8) -> Result<()> {
        self.control(&[STOP_BLOCK, block_id]).await
    }

    /// Delete a block
    pub async fn delete_block(&self, block_id: u8) -> Result<()> {
        self.control(&[DELETE_BLOCK, block_id]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn layout() -> LogBlockLayout {
        LogBlockLayout {
            block_id: 1,
            variables: vec![
                ("stateEstimate.z".to_owned(), LogVariableType::F32),
                ("stateEstimate.y".to_owned(), LogVariableType::F16),
                ("pm.state".to_owned(), LogVariableType::I8),
            ],
        }
    }

    #[test]
    fn data_packet_is_decoded_in_block_order() {
        let mut data = vec![1, 0x10, 0x20, 0x03];
        data.extend_from_slice(&0.25f32.to_le_bytes());
        data.extend_from_slice(&f16::from_f32(-1.5).to_le_bytes());
        data.push(0xff);

        let decoded = layout().decode(&data).unwrap().unwrap();
        assert_eq!(decoded.timestamp, 0x03_20_10);
        assert_relative_eq!(decoded.values[0], 0.25);
        assert_relative_eq!(decoded.values[1], -1.5);
        assert_relative_eq!(decoded.values[2], -1.0);
    }

    #[test]
    fn other_blocks_are_ignored() {
        assert_eq!(layout().decode(&[2, 0, 0, 0]).unwrap(), None);
    }

    #[test]
    fn wrong_length_is_an_error() {
        assert!(matches!(layout().decode(&[1, 0, 0, 0, 1, 2]), Err(Error::Log(_))));
        assert!(matches!(layout().decode(&[1]), Err(Error::Log(_))));
    }

    #[test]
    fn unknown_type_is_a_protocol_error() {
        assert!(LogVariableType::try_from(9).is_err());
        assert_eq!(LogVariableType::try_from(7).unwrap(), LogVariableType::F32);
    }

    #[tokio::test]
    async fn block_creation_sends_variable_ids() {
        let (uplink, firmware_rx) = flume::unbounded::<Packet>();
        let (firmware_tx, control_downlink) = flume::unbounded::<Packet>();

        let mut toc = BTreeMap::new();
        toc.insert("stateEstimate.z".to_owned(), (0x0102, LogVariableType::F32));
        let log = RadioLog {
            uplink,
            control_downlink: Mutex::new(control_downlink),
            toc,
        };

        let firmware = tokio::spawn(async move {
            let request = firmware_rx.recv_async().await.unwrap();
            let data = request.get_data().to_vec();
            firmware_tx
                .send(Packet::new(LOG_PORT, CONTROL_CHANNEL, vec![data[0], data[1], 0]))
                .unwrap();
            data
        });

        let layout = log.create_block(4, &["stateEstimate.z"]).await.unwrap();
        assert_eq!(layout.block_id(), 4);
        assert_eq!(firmware.await.unwrap(), vec![CREATE_BLOCK_V2, 4, 0x77, 0x02, 0x01]);

        assert!(matches!(
            log.create_block(5, &["stabilizer.thrust"]).await,
            Err(Error::VariableNotFound(_))
        ));
    }

    #[tokio::test]
    async fn log_period_out_of_range_is_rejected() {
        let (uplink, _rx) = flume::unbounded::<Packet>();
        let (_tx, control_downlink) = flume::unbounded::<Packet>();
        let log = RadioLog {
            uplink,
            control_downlink: Mutex::new(control_downlink),
            toc: BTreeMap::new(),
        };
        assert!(matches!(
            log.start_block(0, Duration::from_millis(5)).await,
            Err(Error::Log(_))
        ));
    }
}
