//! # Crazyflie flight sequencer
//!
//! This crate flies a small quadrotor through a fixed flight plan: hover at a target altitude, fly a parametrized
//! open-loop roll/thrust maneuver, then land along a descending height ramp. The same sequence runs against a
//! simulated quadrotor or a real Crazyflie reached through the [crazyflie-link] crate.
//!
//! ## Components
//!
//! | Module | Role |
//! |--------|------|
//! | [pid] | Rate-limited PID altitude controller |
//! | [trajectory] | Time-switched roll/thrust maneuver |
//! | [landing] | Stepwise landing height ramp |
//! | [telemetry] | Polled and latest-sample telemetry sources |
//! | [actuator] | Command sink and pacing model |
//! | [safety] | Output clamping, phase timeout and telemetry age checks |
//! | [sequencer] | The control loop and its phase state machine |
//! | [backends] | Simulator and Crazyflie radio vehicles |
//! | [sweep] | Repeated flights over maneuver switch times |
//!
//! ## Usage
//!
//! The basic procedure to use the lib is:
//!  - Connect a vehicle, either a [backends::sim::SimulatedQuad] or a [backends::radio::RadioVehicle]
//!  - Build a [SequenceConfig], from a preset or loaded with serde
//!  - Create a [Sequencer] from the configuration, a [TelemetrySource] and an [ActuatorSink]
//!  - Optionally plug a recorder channel and keep an [AbortHandle]
//!  - Run the sequencer and inspect the returned [FlightReport]
//!
//! Vehicle methods only take `&self`, the intention is for a vehicle to be shared in an `Arc<>` between its
//! telemetry source and its actuator sink.
//!
//! For example:
//! ``` no_run
//! # use std::sync::Arc;
//! # use crazyflie_sequencer::backends::radio::{RadioConfig, RadioVehicle};
//! # use crazyflie_sequencer::{SequenceConfig, Sequencer, VehicleActuator, Vehicle};
//! # async fn fly() -> Result<(), Box<dyn std::error::Error>> {
//! let context = crazyflie_link::LinkContext::new();
//! let crazyflie = Arc::new(
//!     RadioVehicle::connect_from_uri(&context, "radio://0/80/2M/E7E7E7E7E7", RadioConfig::default()).await?,
//! );
//!
//! let sequencer = Sequencer::new(
//!     &SequenceConfig::radio_hover(),
//!     crazyflie.telemetry(),
//!     VehicleActuator::new(crazyflie.clone()),
//! )?;
//! let report = sequencer.run().await;
//! println!("Flight ended with {:?}", report.outcome);
//!
//! crazyflie.disconnect().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Errors
//!
//! Connection and configuration problems are returned before anything is sent to the vehicle. Every error during
//! the flight aborts it: one safe command is sent, control is released and the error ends up in the report.
//!
//! [crazyflie-link]: https://crates.io/crates/crazyflie-link

#![warn(missing_docs)]

mod crtp;
mod error;

pub mod actuator;
pub mod backends;
pub mod config;
pub mod landing;
pub mod pid;
pub mod safety;
pub mod sequencer;
pub mod sweep;
pub mod telemetry;
pub mod trajectory;
pub mod vehicle;

pub use crate::actuator::{ActuatorSink, ControlCommand, VehicleActuator};
pub use crate::config::{ConvergenceExit, HoverMode, SequenceConfig, VerticalAxis};
pub use crate::error::{Error, Result};
pub use crate::pid::ErrorPolarity;
pub use crate::sequencer::{
    AbortHandle, FlightOutcome, FlightPhase, FlightReport, FlightState, PhaseTransition, Sequencer, TickRecord,
};
pub use crate::telemetry::{LatestSampleTelemetry, PolledTelemetry, TelemetrySample, TelemetrySource};
pub use crate::vehicle::{Capabilities, Pacing, Vehicle};
