//! # Switch-time sweep
//!
//! Flies the same sequence once per `(thrust_switch_time, rotation_switch_time)` pair, resetting the vehicle in
//! between, and keeps the tick records of every run. [SweepRun::trace()] extracts the maneuver trajectory relative
//! to the hover point, which is what gets compared between runs.
//!
//! A run that aborts does not stop the sweep: its report and records are kept like any other.

use std::sync::Arc;

use log::{info, warn};

use crate::actuator::VehicleActuator;
use crate::config::{HoverMode, SequenceConfig, VerticalAxis};
use crate::sequencer::{FlightPhase, FlightReport, Sequencer, TickRecord};
use crate::telemetry::PolledTelemetry;
use crate::vehicle::Vehicle;
use crate::Result;

/// Point of a maneuver trace
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TracePoint {
    /// Time since the start of the maneuver (seconds)
    pub t: f64,
    /// Horizontal position (meters)
    pub y: f64,
    /// Height above the hover height (meters)
    pub height: f64,
}

/// Result of one flight of a sweep
#[derive(Debug)]
pub struct SweepRun {
    /// Thrust switch time of this run (seconds)
    pub thrust_switch_time: f64,
    /// Rotation switch time of this run (seconds)
    pub rotation_switch_time: f64,
    /// Flight report
    pub report: FlightReport,
    /// Every tick of the flight
    pub records: Vec<TickRecord>,
    hover_height: f64,
    vertical_axis: VerticalAxis,
}

impl SweepRun {
    /// Maneuver phase as `(t, y, height above hover)` points
    pub fn trace(&self) -> Vec<TracePoint> {
        self.records
            .iter()
            .filter(|record| record.phase == FlightPhase::Maneuver)
            .map(|record| TracePoint {
                t: record.phase_elapsed.as_secs_f64(),
                y: record.sample.y,
                height: self.vertical_axis.height(record.sample.z) - self.hover_height,
            })
            .collect()
    }
}

/// Fly `config` once for each switch time pair
///
/// Fails on the first error that prevents a run from starting: vehicle reset or invalid configuration.
pub async fn run_switch_time_sweep<V: Vehicle + 'static>(
    vehicle: Arc<V>,
    config: &SequenceConfig,
    switch_times: &[(f64, f64)],
) -> Result<Vec<SweepRun>> {
    let hover_height = match config.hover_mode {
        HoverMode::Pid => config.vertical_axis.height(config.hover_setpoint),
        HoverMode::Setpoint => config.hover_setpoint,
    };

    let mut runs = Vec::with_capacity(switch_times.len());

    for &(thrust_switch_time, rotation_switch_time) in switch_times {
        vehicle.reset().await?;

        let run_config = config.with_switch_times(thrust_switch_time, rotation_switch_time);
        let (recorder, records) = flume::unbounded();
        let sequencer = Sequencer::new(
            &run_config,
            PolledTelemetry::new(vehicle.clone()),
            VehicleActuator::new(vehicle.clone()),
        )?
        .with_recorder(recorder);

        info!(
            "Sweep run {}/{}: thrust switch {} s, rotation switch {} s",
            runs.len() + 1,
            switch_times.len(),
            thrust_switch_time,
            rotation_switch_time
        );
        let report = sequencer.run().await;
        if let Some(reason) = report.abort_reason() {
            warn!("Sweep run aborted: {}", reason);
        }

        runs.push(SweepRun {
            thrust_switch_time,
            rotation_switch_time,
            report,
            records: records.drain().collect(),
            hover_height,
            vertical_axis: config.vertical_axis,
        });
    }

    Ok(runs)
}
