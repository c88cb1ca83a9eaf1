// Full flights against the simulated quadrotor

use std::sync::Arc;

use approx::assert_relative_eq;
use crazyflie_sequencer::backends::sim::{SimConfig, SimulatedQuad};
use crazyflie_sequencer::sweep::run_switch_time_sweep;
use crazyflie_sequencer::{
    ControlCommand, ConvergenceExit, FlightPhase, HoverMode, PolledTelemetry, SequenceConfig, Sequencer, TickRecord,
    VehicleActuator, VerticalAxis,
};

fn short_maneuver() -> SequenceConfig {
    SequenceConfig {
        hover_duration: 8.0,
        thrust_switch_time: 1.0,
        rotation_switch_time: 0.5,
        total_maneuver_time: 3.0,
        phase_timeout: 40.0,
        ..SequenceConfig::simulated_maneuver()
    }
}

fn hover_setpoint_flight() -> SequenceConfig {
    SequenceConfig {
        kp: 1.0,
        ki: 0.0,
        kd: 0.0,
        hover_setpoint: 1.0,
        sample_period: 0.02,
        output_min: 0.0,
        output_max: 1.0,
        tick_period: 0.02,
        hover_duration: 3.0,
        thrust_switch_time: 0.5,
        rotation_switch_time: 0.2,
        total_maneuver_time: 1.0,
        rotation_rate: 0.2,
        min_thrust: 0.5,
        max_thrust: 0.6,
        landing_decrement: 0.25,
        land_height: 0.0,
        phase_timeout: 20.0,
        telemetry_max_age: 0.1,
        vertical_axis: VerticalAxis::Down,
        hover_mode: HoverMode::Setpoint,
        ..SequenceConfig::simulated_maneuver()
    }
}

fn setpoint_quad() -> Arc<SimulatedQuad> {
    Arc::new(
        SimulatedQuad::connect(SimConfig {
            hover_setpoint: true,
            setpoint_step: 0.02,
            ..Default::default()
        })
        .unwrap(),
    )
}

async fn fly(quad: Arc<SimulatedQuad>, config: &SequenceConfig) -> (crazyflie_sequencer::FlightReport, Vec<TickRecord>) {
    let (recorder, records) = flume::unbounded();
    let sequencer = Sequencer::new(
        config,
        PolledTelemetry::new(quad.clone()),
        VehicleActuator::new(quad.clone()),
    )
    .unwrap()
    .with_recorder(recorder);

    let report = sequencer.run().await;
    (report, records.drain().collect())
}

#[tokio::test(start_paused = true)]
async fn pid_flight_hovers_maneuvers_and_lands() {
    let _ = env_logger::builder().is_test(true).try_init();

    let quad = Arc::new(SimulatedQuad::connect(SimConfig::default()).unwrap());
    let config = short_maneuver();
    let (report, records) = fly(quad, &config).await;

    assert!(report.is_completed(), "{:?}", report.outcome);
    let phases: Vec<_> = report.transitions.iter().map(|t| (t.from, t.to)).collect();
    assert_eq!(
        phases,
        vec![
            (FlightPhase::Idle, FlightPhase::Hover),
            (FlightPhase::Hover, FlightPhase::Maneuver),
            (FlightPhase::Maneuver, FlightPhase::Landing),
            (FlightPhase::Landing, FlightPhase::Done),
        ]
    );
    assert_relative_eq!(report.transitions[1].at.as_secs_f64(), 8.0, epsilon = 1e-9);
    assert_relative_eq!(report.transitions[2].at.as_secs_f64(), 11.0, epsilon = 1e-9);
    assert!(report.final_state.altitude_estimate <= config.land_height + config.landing_tolerance);
    assert_eq!(report.ticks as usize, records.len());

    // The quad took off
    assert!(records.iter().any(|r| r.sample.z < -1.0));

    for record in &records {
        let thrust = match record.command {
            ControlCommand::AttitudeThrust { thrust, .. } => thrust,
            other => panic!("unexpected command {:?}", other),
        };
        match record.phase {
            FlightPhase::Hover | FlightPhase::Landing => {
                assert!((config.output_min..=config.output_max).contains(&thrust))
            }
            FlightPhase::Maneuver => assert!(thrust == config.min_thrust || thrust == config.max_thrust),
            phase => panic!("command recorded in {:?}", phase),
        }
    }

    // Phases in records never go back
    let order = |phase: FlightPhase| phase as u8;
    assert!(records.windows(2).all(|pair| order(pair[0].phase) <= order(pair[1].phase)));

    // Half a second of rotation at 1 rad/s
    let max_roll = records
        .iter()
        .filter_map(|r| match r.command {
            ControlCommand::AttitudeThrust { roll, .. } => Some(roll),
            _ => None,
        })
        .fold(0.0, f64::max);
    assert_relative_eq!(max_roll, 0.5, epsilon = 1e-9);
}

#[tokio::test(start_paused = true)]
async fn hover_setpoint_flight_lands_on_the_ramp() {
    let config = hover_setpoint_flight();
    let (report, records) = fly(setpoint_quad(), &config).await;

    assert!(report.is_completed(), "{:?}", report.outcome);

    let hover_heights: Vec<_> = records
        .iter()
        .filter(|r| r.phase == FlightPhase::Hover)
        .map(|r| r.command)
        .collect();
    assert!(hover_heights.iter().all(|c| *c == ControlCommand::hover_at(1.0)));

    // Near the hover height at the end of the hover phase
    let last_hover = records.iter().filter(|r| r.phase == FlightPhase::Hover).last().unwrap();
    assert!((-last_hover.sample.z - 1.0).abs() < 0.1);

    let landing_targets: Vec<f64> = records
        .iter()
        .filter(|r| r.phase == FlightPhase::Landing)
        .map(|r| match r.command {
            ControlCommand::HoverSetpoint { height, .. } => height,
            other => panic!("unexpected landing command {:?}", other),
        })
        .collect();
    assert!(!landing_targets.is_empty());
    assert!(landing_targets.windows(2).all(|pair| pair[1] <= pair[0]));
    assert!(landing_targets.iter().all(|t| *t >= config.land_height));
}

#[tokio::test(start_paused = true)]
async fn converged_hover_exits_early() {
    let config = SequenceConfig {
        hover_duration: 6.0,
        hover_convergence: Some(ConvergenceExit {
            tolerance: 0.1,
            hold_time: 0.5,
        }),
        ..hover_setpoint_flight()
    };
    let (report, _) = fly(setpoint_quad(), &config).await;

    assert!(report.is_completed(), "{:?}", report.outcome);
    let maneuver_start = report.transitions[1];
    assert_eq!(maneuver_start.to, FlightPhase::Maneuver);
    let at = maneuver_start.at.as_secs_f64();
    assert!(at > 2.0 && at < 4.0, "left hover at {} s", at);
}

#[tokio::test(start_paused = true)]
async fn sweep_resets_between_runs() {
    let quad = Arc::new(SimulatedQuad::connect(SimConfig::default()).unwrap());
    let pairs = [(1.0, 0.5), (2.0, 0.0)];

    let runs = run_switch_time_sweep(quad, &short_maneuver(), &pairs).await.unwrap();

    assert_eq!(runs.len(), 2);
    for (run, (thrust_switch, rotation_switch)) in runs.iter().zip(pairs) {
        assert!(run.report.is_completed(), "{:?}", run.report.outcome);
        assert_eq!((run.thrust_switch_time, run.rotation_switch_time), (thrust_switch, rotation_switch));

        // Every run starts on the ground
        assert_eq!(run.records[0].sample.z, 0.0);

        let trace = run.trace();
        assert_eq!(trace.len(), 300);
        assert_eq!(trace[0].t, 0.0);
        assert!(trace.windows(2).all(|pair| pair[1].t > pair[0].t));
    }

    // Without rotation the quad does not drift sideways
    assert!(runs[1].trace().iter().all(|p| p.y == 0.0));
    assert!(runs[0].trace().last().unwrap().y > 0.0);
}
