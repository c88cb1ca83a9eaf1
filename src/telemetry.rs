//! # Telemetry sources
//!
//! The sequencer reads the vehicle state through [TelemetrySource::poll()]. Two delivery models hide behind it:
//!  - [PolledTelemetry] asks the vehicle synchronously, each poll returns a fresh sample (simulator).
//!  - [LatestSampleTelemetry] reads a single-slot cell that a background task keeps overwriting with the most recent
//!    sample (radio log stream). Polling never waits for a new sample.
//!
//! In both cases the returned sample may be old. Checking its age is the job of the
//! [safety guard](crate::safety), not of the source.
//!
//! ```
//! # use crazyflie_sequencer::telemetry::{latest_sample_cell, TelemetrySample, TelemetrySource};
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> crazyflie_sequencer::Result<()> {
//! let (publisher, mut telemetry) = latest_sample_cell();
//! assert!(telemetry.poll().await.is_err());
//!
//! publisher.publish(TelemetrySample::now(0.3, 0.0, 0.0, 0.0));
//! publisher.publish(TelemetrySample::now(0.4, 0.0, 0.0, 0.0));
//! assert_eq!(telemetry.poll().await?.z, 0.4);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::vehicle::Vehicle;
use crate::{Error, Result};

/// One vehicle state sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetrySample {
    /// When the sample was produced or received
    pub timestamp: Instant,
    /// Vertical position in the vehicle frame (meters)
    pub z: f64,
    /// Horizontal position (meters)
    pub y: f64,
    /// Roll (rad)
    pub roll: f64,
    /// Pitch (rad)
    pub pitch: f64,
}

impl TelemetrySample {
    /// Sample timestamped now
    pub fn now(z: f64, y: f64, roll: f64, pitch: f64) -> Self {
        Self {
            timestamp: Instant::now(),
            z,
            y,
            roll,
            pitch,
        }
    }
}

/// Source of vehicle state samples
#[async_trait]
pub trait TelemetrySource: Send {
    /// Latest known vehicle state
    async fn poll(&mut self) -> Result<TelemetrySample>;
}

/// Synchronous source asking the vehicle for its state on every poll
pub struct PolledTelemetry<V> {
    vehicle: Arc<V>,
}

impl<V: Vehicle> PolledTelemetry<V> {
    /// Poll `vehicle`
    pub fn new(vehicle: Arc<V>) -> Self {
        Self { vehicle }
    }
}

#[async_trait]
impl<V: Vehicle> TelemetrySource for PolledTelemetry<V> {
    async fn poll(&mut self) -> Result<TelemetrySample> {
        self.vehicle.poll_state().await
    }
}

/// Create a single-slot latest sample cell
///
/// The [SamplePublisher] goes to the task receiving samples, the [LatestSampleTelemetry] to the control loop.
pub fn latest_sample_cell() -> (SamplePublisher, LatestSampleTelemetry) {
    let (tx, rx) = watch::channel(None);
    (SamplePublisher { slot: tx }, LatestSampleTelemetry { slot: rx })
}

/// Writing end of the latest sample cell
#[derive(Debug)]
pub struct SamplePublisher {
    slot: watch::Sender<Option<TelemetrySample>>,
}

impl SamplePublisher {
    /// Replace the stored sample, last write wins
    pub fn publish(&self, sample: TelemetrySample) {
        self.slot.send_replace(Some(sample));
    }

    /// Reader for this cell
    pub fn subscribe(&self) -> LatestSampleTelemetry {
        LatestSampleTelemetry {
            slot: self.slot.subscribe(),
        }
    }
}

/// Reading end of the latest sample cell
#[derive(Debug, Clone)]
pub struct LatestSampleTelemetry {
    slot: watch::Receiver<Option<TelemetrySample>>,
}

impl LatestSampleTelemetry {
    /// Most recent sample, if any has been published
    pub fn latest(&self) -> Option<TelemetrySample> {
        *self.slot.borrow()
    }

    /// Wait until a first sample is available
    ///
    /// Used when connecting, the control loop itself never waits for samples.
    pub async fn wait_first(&mut self, timeout: Duration) -> Result<TelemetrySample> {
        let sample = tokio::time::timeout(timeout, self.slot.wait_for(|sample| sample.is_some()))
            .await?
            .map_err(|_| Error::Disconnected)?;
        (*sample).ok_or(Error::TelemetryUnavailable)
    }
}

#[async_trait]
impl TelemetrySource for LatestSampleTelemetry {
    async fn poll(&mut self) -> Result<TelemetrySample> {
        self.latest().ok_or(Error::TelemetryUnavailable)
    }
}
