// Fly the maneuver switch-time sweep in the simulator and print the maneuver traces as CSV
//
// Usage: sim_sweep [config.json]

use std::sync::Arc;

use crazyflie_sequencer::SequenceConfig;
use crazyflie_sequencer::backends::sim::{SimConfig, SimulatedQuad};
use crazyflie_sequencer::sweep::run_switch_time_sweep;

const SWITCH_TIMES: [(f64, f64); 5] = [(0.0, 1.0), (2.0, 1.0), (0.0, 0.0), (3.0, 0.0), (0.4, 2.0)];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = match std::env::args().nth(1) {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => SequenceConfig::simulated_maneuver(),
    };

    let quad = Arc::new(SimulatedQuad::connect(SimConfig::default())?);
    let runs = run_switch_time_sweep(quad, &config, &SWITCH_TIMES).await?;

    println!("thrust_switch_time,rotation_switch_time,t,y,height");
    for run in &runs {
        for point in run.trace() {
            println!(
                "{},{},{:.3},{:.4},{:.4}",
                run.thrust_switch_time, run.rotation_switch_time, point.t, point.y, point.height
            );
        }
    }

    for run in &runs {
        log::info!(
            "t_t = {} s, t_r = {} s: {:?} after {} ticks",
            run.thrust_switch_time,
            run.rotation_switch_time,
            run.report.outcome,
            run.report.ticks
        );
    }

    Ok(())
}
