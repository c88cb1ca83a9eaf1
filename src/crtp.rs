//! CRTP plumbing shared by the radio backend
//!
//! Packets coming from the link are dispatched per port to flume channels, and per channel again by the subsystems
//! that need it. Packets going to the link are queued in a single uplink channel drained by a background task.

use std::collections::BTreeMap;
use std::convert::{TryFrom, TryInto};
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use crazyflie_link::Packet;
use flume as channel;
use flume::{Receiver, Sender};
use log::debug;
use tokio::task::JoinHandle;

use crate::{Error, Result};

pub(crate) const COMMANDER_PORT: u8 = 3;
pub(crate) const LOG_PORT: u8 = 5;
pub(crate) const GENERIC_SETPOINT_PORT: u8 = 7;
pub(crate) const PLATFORM_PORT: u8 = 13;

/// Per-port downlink dispatcher
pub(crate) struct CrtpDispatch {
    link: Arc<crazyflie_link::Connection>,
    port_channels: BTreeMap<u8, Sender<Packet>>,
    disconnect: Arc<AtomicBool>,
}

impl CrtpDispatch {
    pub fn new(link: Arc<crazyflie_link::Connection>, disconnect: Arc<AtomicBool>) -> Self {
        CrtpDispatch {
            link,
            port_channels: BTreeMap::new(),
            disconnect,
        }
    }

    /// Receiver for all packets of `port`, `None` if the port is already taken
    #[allow(clippy::map_entry)]
    pub fn get_port_receiver(&mut self, port: u8) -> Option<Receiver<Packet>> {
        if self.port_channels.contains_key(&port) {
            None
        } else {
            let (tx, rx) = channel::unbounded();
            self.port_channels.insert(port, tx);
            Some(rx)
        }
    }

    pub fn run(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            while !self.disconnect.load(Relaxed) {
                match tokio::time::timeout(Duration::from_millis(200), self.link.recv_packet()).await {
                    Ok(Ok(packet)) => {
                        if let Some(channel) = self.port_channels.get(&packet.get_port()) {
                            let _ = channel.send_async(packet).await;
                        }
                    }
                    Err(_) => continue,
                    Ok(Err(_)) => {
                        debug!("Link closed, stopping downlink dispatch");
                        return;
                    }
                }
            }
        })
    }
}

/// Start the task draining the uplink queue into the link
pub(crate) fn spawn_uplink(
    link: Arc<crazyflie_link::Connection>,
    disconnect: Arc<AtomicBool>,
) -> (Sender<Packet>, JoinHandle<()>) {
    let (uplink, rx) = channel::unbounded::<Packet>();

    let task = tokio::spawn(async move {
        while !disconnect.load(Relaxed) {
            match tokio::time::timeout(Duration::from_millis(100), rx.recv_async()).await {
                Ok(Ok(pk)) => {
                    if link.send_packet(pk).await.is_err() {
                        return;
                    }
                }
                Err(_) => (),
                Ok(Err(flume::RecvError::Disconnected)) => return,
            }
        }
    });

    (uplink, task)
}

#[async_trait]
pub(crate) trait WaitForPacket {
    async fn wait_packet(&self, port: u8, channel: u8, data_prefix: &[u8]) -> Result<Packet>;
}

#[async_trait]
impl WaitForPacket for channel::Receiver<Packet> {
    async fn wait_packet(&self, port: u8, channel: u8, data_prefix: &[u8]) -> Result<Packet> {
        loop {
            let pk = self.recv_async().await?;
            if pk.get_port() == port && pk.get_channel() == channel && pk.get_data().starts_with(data_prefix) {
                return Ok(pk);
            }
        }
    }
}

const TOC_CHANNEL: u8 = 0;
const TOC_GET_ITEM: u8 = 2;
const TOC_INFO: u8 = 3;

fn toc_format_error() -> Error {
    Error::Protocol("TOC packet format error".to_owned())
}

/// Download the table of content of a port
///
/// Returns a map from `group.name` to the item id and type.
pub(crate) async fn fetch_toc<T, E>(
    port: u8,
    uplink: &channel::Sender<Packet>,
    downlink: &channel::Receiver<Packet>,
) -> Result<BTreeMap<String, (u16, T)>>
where
    T: TryFrom<u8, Error = E>,
    E: Into<Error>,
{
    let pk = Packet::new(port, TOC_CHANNEL, vec![TOC_INFO]);
    uplink.send_async(pk).await?;

    let pk = downlink.wait_packet(port, TOC_CHANNEL, &[TOC_INFO]).await?;
    let data = pk.get_data();
    let toc_len = u16::from_le_bytes(data.get(1..3).ok_or_else(toc_format_error)?.try_into()?);

    let mut toc = BTreeMap::new();

    for i in 0..toc_len {
        let id = i.to_le_bytes();
        let pk = Packet::new(port, TOC_CHANNEL, vec![TOC_GET_ITEM, id[0], id[1]]);
        uplink.send_async(pk).await?;

        let pk = downlink.wait_packet(port, TOC_CHANNEL, &[TOC_GET_ITEM, id[0], id[1]]).await?;
        let data = pk.get_data();
        if data.len() < 4 {
            return Err(toc_format_error());
        }

        let mut strings = data[4..].split(|b| *b == 0);
        let group = String::from_utf8_lossy(strings.next().ok_or_else(toc_format_error)?);
        let name = String::from_utf8_lossy(strings.next().ok_or_else(toc_format_error)?);

        let item_type = T::try_from(data[3]).map_err(|e: E| e.into())?;
        toc.insert(format!("{}.{}", group, name), (i, item_type));
    }

    Ok(toc)
}

/// Split a port downlink in its 4 channels
pub(crate) fn crtp_channel_dispatcher(
    downlink: channel::Receiver<Packet>,
) -> (Receiver<Packet>, Receiver<Packet>, Receiver<Packet>, Receiver<Packet>) {
    let (tx0, rx0) = channel::unbounded();
    let (tx1, rx1) = channel::unbounded();
    let (tx2, rx2) = channel::unbounded();
    let (tx3, rx3) = channel::unbounded();
    let senders = [tx0, tx1, tx2, tx3];

    tokio::spawn(async move {
        while let Ok(pk) = downlink.recv_async().await {
            if let Some(sender) = senders.get(pk.get_channel() as usize) {
                let _ = sender.send_async(pk).await;
            }
        }
    });

    (rx0, rx1, rx2, rx3)
}
