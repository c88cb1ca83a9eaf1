//! # Crazyflie radio backend
//!
//! [RadioVehicle] flies a Crazyflie over a [crazyflie-link](crazyflie_link) connection.
//!
//! Connecting opens the link, starts the uplink and downlink tasks, downloads the log table of content and starts a
//! log block streaming the state estimate. A background task decodes the block and overwrites the single-slot
//! latest sample cell, so [Vehicle::poll_state()] never waits for the radio. Connection only succeeds once a first
//! sample has been received.
//!
//! Commands are fire-and-forget setpoints. The Crazyflie drops its setpoint after 1 second without a new one, this
//! is advertised as [Capabilities::max_command_interval].
//!
//! ``` no_run
//! # use crazyflie_sequencer::backends::radio::{RadioConfig, RadioVehicle};
//! # use crazyflie_sequencer::Vehicle;
//! # async fn connect() -> crazyflie_sequencer::Result<()> {
//! let context = crazyflie_link::LinkContext::new();
//! let crazyflie = RadioVehicle::connect_from_uri(&context, "radio://0/80/2M/E7E7E7E7E7", RadioConfig::default()).await?;
//! // ...
//! crazyflie.disconnect().await?;
//! # Ok(())
//! # }
//! ```

mod commander;
mod log;

pub use self::log::{LogBlockLayout, LogData, LogVariableType};

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;
use std::time::Duration;

use ::log::{info, warn};
use async_trait::async_trait;
use flume::{Receiver, Sender};
use crazyflie_link::Packet;
use futures::lock::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use self::commander::{thrust_to_u16, Commander, Platform};
use self::log::RadioLog;
use crate::crtp::{spawn_uplink, CrtpDispatch, LOG_PORT};
use crate::telemetry::{latest_sample_cell, LatestSampleTelemetry, SamplePublisher, TelemetrySample};
use crate::vehicle::{Capabilities, Pacing, Vehicle};
use crate::{Error, Result};

/// Log variables streamed into the telemetry samples, in sample order
pub const STATE_VARIABLES: [&str; 4] = [
    "stateEstimate.z",
    "stateEstimate.y",
    "stabilizer.roll",
    "stabilizer.pitch",
];

const STATE_BLOCK_ID: u8 = 0;

/// Setpoint watchdog of the Crazyflie commander
const COMMANDER_WATCHDOG: Duration = Duration::from_secs(1);

/// Radio backend options
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RadioConfig {
    /// State log block period (seconds), 10 ms resolution
    pub log_period: f64,
    /// Time allowed for the first state sample after the log block is started (seconds)
    pub first_sample_timeout: f64,
    /// Send platform arming requests, needed by the Crazyflie 2.1 brushless
    pub arming_request: bool,
}

impl Default for RadioConfig {
    fn default() -> Self {
        Self {
            log_period: 0.01,
            first_sample_timeout: 2.0,
            arming_request: true,
        }
    }
}

/// Crazyflie reachable over radio
///
/// This struct is one-time use: once disconnected, either as requested or as a result of a connection loss, it
/// cannot be reconnected. A new one needs to be created to connect again.
pub struct RadioVehicle {
    commander: Commander,
    platform: Platform,
    log: RadioLog,
    telemetry: LatestSampleTelemetry,
    arming_request: bool,
    uplink_task: Mutex<Option<JoinHandle<()>>>,
    dispatch_task: Mutex<Option<JoinHandle<()>>>,
    feeder_task: Mutex<Option<JoinHandle<()>>>,
    disconnect: Arc<AtomicBool>,
    link: Arc<crazyflie_link::Connection>,
}

fn connection_failure(error: Error) -> Error {
    match error {
        Error::ConnectionFailure(_) => error,
        other => Error::ConnectionFailure(other.to_string()),
    }
}

impl RadioVehicle {
    /// Open a link to `uri` and connect the Crazyflie
    ///
    /// Fails with [Error::ConnectionFailure] if the link cannot be opened or if the Crazyflie does not stream its
    /// state.
    pub async fn connect_from_uri(
        link_context: &crazyflie_link::LinkContext,
        uri: &str,
        config: RadioConfig,
    ) -> Result<Self> {
        let link = link_context
            .open_link(uri)
            .await
            .map_err(|e| Error::ConnectionFailure(format!("cannot open {}: {:?}", uri, e)))?;

        Self::connect_from_link(link, config).await
    }

    /// Connect a Crazyflie using an already opened link
    pub async fn connect_from_link(link: crazyflie_link::Connection, config: RadioConfig) -> Result<Self> {
        let log_period = Duration::try_from_secs_f64(config.log_period)
            .map_err(|_| Error::Configuration(format!("invalid log period {}", config.log_period)))?;
        let first_sample_timeout = Duration::try_from_secs_f64(config.first_sample_timeout).map_err(|_| {
            Error::Configuration(format!("invalid first sample timeout {}", config.first_sample_timeout))
        })?;

        let disconnect = Arc::new(AtomicBool::new(false));
        let link = Arc::new(link);

        let mut dispatcher = CrtpDispatch::new(link.clone(), disconnect.clone());
        let (uplink, uplink_task) = spawn_uplink(link.clone(), disconnect.clone());

        let log_downlink = dispatcher
            .get_port_receiver(LOG_PORT)
            .ok_or_else(|| Error::Protocol("log port already taken".to_owned()))?;
        let dispatch_task = dispatcher.run();

        let (log, telemetry, feeder_task) =
            match start_state_stream(log_downlink, uplink.clone(), log_period, first_sample_timeout).await {
                Ok(stream) => stream,
                Err(e) => {
                    disconnect.store(true, Relaxed);
                    return Err(connection_failure(e));
                }
            };

        info!("Crazyflie connected, streaming state every {:?}", log_period);

        Ok(Self {
            commander: Commander::new(uplink.clone()),
            platform: Platform::new(uplink),
            log,
            telemetry,
            arming_request: config.arming_request,
            uplink_task: Mutex::new(Some(uplink_task)),
            dispatch_task: Mutex::new(Some(dispatch_task)),
            feeder_task: Mutex::new(Some(feeder_task)),
            disconnect,
            link,
        })
    }

    /// Reader on the latest state sample cell
    pub fn telemetry(&self) -> LatestSampleTelemetry {
        self.telemetry.clone()
    }
}

async fn start_state_stream(
    log_downlink: Receiver<Packet>,
    uplink: Sender<Packet>,
    log_period: Duration,
    first_sample_timeout: Duration,
) -> Result<(RadioLog, LatestSampleTelemetry, JoinHandle<()>)> {
    let (log, data_downlink) = RadioLog::new(log_downlink, uplink).await?;
    let layout = log.create_block(STATE_BLOCK_ID, &STATE_VARIABLES).await?;

    let (publisher, mut telemetry) = latest_sample_cell();
    let feeder_task = tokio::spawn(feed_samples(data_downlink, layout, publisher));

    let first = async {
        log.start_block(STATE_BLOCK_ID, log_period).await?;
        telemetry.wait_first(first_sample_timeout).await
    };
    if let Err(e) = first.await {
        feeder_task.abort();
        return Err(Error::ConnectionFailure(format!("no state received from the Crazyflie: {}", e)));
    }

    Ok((log, telemetry, feeder_task))
}

async fn feed_samples(downlink: Receiver<Packet>, layout: LogBlockLayout, publisher: SamplePublisher) {
    while let Ok(pk) = downlink.recv_async().await {
        match layout.decode(pk.get_data()) {
            Ok(Some(data)) => {
                if let [z, y, roll, pitch] = data.values[..] {
                    publisher.publish(TelemetrySample {
                        timestamp: Instant::now(),
                        z,
                        y,
                        roll: roll.to_radians(),
                        pitch: pitch.to_radians(),
                    });
                }
            }
            Ok(None) => (),
            Err(e) => warn!("Dropping log packet: {}", e),
        }
    }
}

impl Drop for RadioVehicle {
    fn drop(&mut self) {
        self.disconnect.store(true, Relaxed);
    }
}

#[async_trait]
impl Vehicle for RadioVehicle {
    fn capabilities(&self) -> Capabilities {
        Capabilities {
            pacing: Pacing::FireAndForget,
            hover_setpoint: true,
            max_command_interval: Some(COMMANDER_WATCHDOG),
        }
    }

    /// Stop the state stream and close the link
    ///
    /// Waits for the background tasks to finish.
    async fn disconnect(&self) -> Result<()> {
        if self.disconnect.load(Relaxed) {
            return Ok(());
        }

        if let Err(e) = self.log.stop_block(STATE_BLOCK_ID).await {
            warn!("Failed to stop the state log block: {}", e);
        } else if let Err(e) = self.log.delete_block(STATE_BLOCK_ID).await {
            warn!("Failed to delete the state log block: {}", e);
        }

        self.disconnect.store(true, Relaxed);

        for task in [&self.uplink_task, &self.dispatch_task] {
            if let Some(task) = task.lock().await.take() {
                let _ = task.await;
            }
        }
        if let Some(task) = self.feeder_task.lock().await.take() {
            task.abort();
        }

        self.link.close().await;
        info!("Crazyflie disconnected");
        Ok(())
    }

    async fn arm(&self) -> Result<()> {
        if self.arming_request {
            self.platform.send_arming_request(true).await?;
        }
        Ok(())
    }

    async fn disarm(&self) -> Result<()> {
        if self.arming_request {
            self.platform.send_arming_request(false).await?;
        }
        Ok(())
    }

    /// Unlock the thrust with a zero setpoint
    async fn enable_control(&self) -> Result<()> {
        self.commander.setpoint_rpyt(0.0, 0.0, 0.0, 0).await
    }

    /// Stop the motors and hand the setpoint priority back
    async fn disable_control(&self) -> Result<()> {
        self.commander.setpoint_stop().await?;
        self.commander.notify_setpoint_stop(0).await
    }

    /// A real vehicle cannot be put back on its starting point
    async fn reset(&self) -> Result<()> {
        Err(Error::CommandRejected("a Crazyflie cannot be reset remotely".to_owned()))
    }

    async fn poll_state(&self) -> Result<TelemetrySample> {
        if self.disconnect.load(Relaxed) {
            return Err(Error::Disconnected);
        }
        self.telemetry.latest().ok_or(Error::TelemetryUnavailable)
    }

    async fn send_attitude_thrust(&self, roll: f64, pitch: f64, yaw: f64, thrust: f64, _dt: Duration) -> Result<()> {
        self.commander
            .setpoint_rpyt(
                roll.to_degrees() as f32,
                pitch.to_degrees() as f32,
                yaw.to_degrees() as f32,
                thrust_to_u16(thrust),
            )
            .await
    }

    async fn send_hover_setpoint(&self, vx: f64, vy: f64, yaw_rate: f64, height: f64) -> Result<()> {
        self.commander
            .setpoint_hover(vx as f32, vy as f32, yaw_rate.to_degrees() as f32, height as f32)
            .await
    }
}
