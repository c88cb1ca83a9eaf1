// Hover, maneuver and land a Crazyflie
//
// Usage: radio_flight [uri] [config.json]
// Without URI, the first Crazyflie found on the default address is used. Ctrl-C aborts the flight.

use std::sync::Arc;

use crazyflie_sequencer::backends::radio::{RadioConfig, RadioVehicle};
use crazyflie_sequencer::{SequenceConfig, Sequencer, Vehicle, VehicleActuator};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let link_context = crazyflie_link::LinkContext::new();

    let uri = match std::env::args().nth(1) {
        Some(uri) => uri,
        None => {
            let found = link_context.scan([0xE7; 5]).await?;
            found.first().cloned().ok_or("No Crazyflie found")?
        }
    };
    let config = match std::env::args().nth(2) {
        Some(path) => serde_json::from_str(&std::fs::read_to_string(path)?)?,
        None => SequenceConfig::radio_hover(),
    };

    println!("Connecting to {} ...", uri);
    let crazyflie = Arc::new(RadioVehicle::connect_from_uri(&link_context, &uri, RadioConfig::default()).await?);

    let (recorder, records) = flume::unbounded();
    let sequencer = Sequencer::new(&config, crazyflie.telemetry(), VehicleActuator::new(crazyflie.clone()))?
        .with_recorder(recorder);

    let abort = sequencer.abort_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            abort.abort();
        }
    });

    let report = sequencer.run().await;

    println!("t,phase,z,y,command");
    for record in records.drain() {
        println!(
            "{:.2},{:?},{:.3},{:.3},{:.3}",
            record.elapsed.as_secs_f64(),
            record.phase,
            record.sample.z,
            record.sample.y,
            record.command.thrust_or_height()
        );
    }
    println!("Flight ended: {:?}", report.outcome);

    crazyflie.disconnect().await?;

    Ok(())
}
