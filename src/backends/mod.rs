//! # Vehicle backends
//!
//! | Backend | Telemetry | Pacing | Hover setpoints |
//! |---------|-----------|--------|-----------------|
//! | [sim::SimulatedQuad] | polled | blocking | optional |
//! | [radio::RadioVehicle] | pushed, latest sample | fire-and-forget, 1 s watchdog | yes |

pub mod radio;
pub mod sim;
