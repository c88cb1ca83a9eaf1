// Test that vehicles and sequencers can be moved between threads and tasks

use std::sync::Arc;
use std::thread::spawn;

use crazyflie_sequencer::backends::radio::RadioVehicle;
use crazyflie_sequencer::backends::sim::{SimConfig, SimulatedQuad};
use crazyflie_sequencer::{PolledTelemetry, SequenceConfig, Sequencer, VehicleActuator};

fn assert_send_sync<T: Send + Sync>() {}

#[test]
fn vehicles_are_send_and_sync() {
    assert_send_sync::<SimulatedQuad>();
    assert_send_sync::<RadioVehicle>();
}

#[test]
fn simulated_quad_can_be_sent_to_thread() {
    let quad = SimulatedQuad::connect(SimConfig::default()).unwrap();
    let _ = spawn(move || quad).join().unwrap();
}

#[tokio::test(start_paused = true)]
async fn sequencer_runs_in_a_spawned_task() {
    let quad = Arc::new(SimulatedQuad::connect(SimConfig::default()).unwrap());
    let config = SequenceConfig {
        hover_duration: 1.0,
        total_maneuver_time: 1.0,
        ..SequenceConfig::simulated_maneuver()
    };
    let sequencer = Sequencer::new(
        &config,
        PolledTelemetry::new(quad.clone()),
        VehicleActuator::new(quad.clone()),
    )
    .unwrap();

    let report = tokio::spawn(sequencer.run()).await.unwrap();
    assert!(report.ticks > 0);
}
