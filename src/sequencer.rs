//! # Flight phase sequencer
//!
//! The [Sequencer] runs the fixed-period control loop. Each tick it:
//!  1. checks the [AbortHandle],
//!  2. polls the [TelemetrySource] and checks the sample age,
//!  3. checks the time spent in the current phase,
//!  4. computes the command of the current phase, moving to the next phase when due,
//!  5. sends the command through the [ActuatorSink] and hands a [TickRecord] to the recorder,
//!  6. waits for the next tick unless the sink already did.
//!
//! | Phase | Command | Leaves when |
//! |-------|---------|-------------|
//! | `Hover` | PID thrust, or hover setpoint | `hover_duration` elapsed (or converged, if enabled) |
//! | `Maneuver` | open-loop roll/thrust schedule | `total_maneuver_time` elapsed |
//! | `Landing` | descending height target | altitude within `landing_tolerance` of `land_height` |
//!
//! Phases only move forward, `Idle → Hover → Maneuver → Landing → Done`. Any error during the flight moves the
//! sequencer to `Aborted` instead: a single safe command (level, zero thrust) is attempted, then control is released
//! and the vehicle disarmed. Control is released the same way after `Done`.
//!
//! Phase and mission times are counted in ticks, so the controllers see an exact fixed period. Only the telemetry
//! age is measured against the wall clock.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::Relaxed;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::time::Instant;

use crate::actuator::{ActuatorSink, ControlCommand};
use crate::config::{HoverMode, SequenceConfig, VerticalAxis};
use crate::landing::LandingRamp;
use crate::pid::Pid;
use crate::safety::{clamp, SafetyLimits};
use crate::telemetry::{TelemetrySample, TelemetrySource};
use crate::trajectory::ManeuverGenerator;
use crate::vehicle::Pacing;
use crate::{Error, Result};

/// Flight phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlightPhase {
    /// Not started
    Idle,
    /// Holding the hover altitude
    Hover,
    /// Flying the open-loop maneuver
    Maneuver,
    /// Descending
    Landing,
    /// Landed, terminal
    Done,
    /// Aborted, terminal
    Aborted,
}

impl FlightPhase {
    /// `Done` and `Aborted` accept no further transition
    pub fn is_terminal(&self) -> bool {
        matches!(self, FlightPhase::Done | FlightPhase::Aborted)
    }

    /// Whether moving from `self` to `next` is allowed
    pub fn can_transition_to(&self, next: FlightPhase) -> bool {
        use FlightPhase::*;

        match (*self, next) {
            (Idle, Hover) | (Hover, Maneuver) | (Maneuver, Landing) | (Landing, Done) => true,
            (from, Aborted) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// Latest known state of the flight
#[derive(Debug, Clone, PartialEq)]
pub struct FlightState {
    /// Current phase
    pub phase: FlightPhase,
    /// Time since the flight started
    pub elapsed_time: Duration,
    /// Height above ground, up-positive (meters)
    pub altitude_estimate: f64,
    /// Horizontal position (meters)
    pub horizontal_estimate: f64,
    /// Roll (rad)
    pub roll_estimate: f64,
    /// Pitch (rad)
    pub pitch_estimate: f64,
    /// Timestamp of the sample these estimates come from
    pub sample_timestamp: Option<Instant>,
}

impl Default for FlightState {
    fn default() -> Self {
        Self {
            phase: FlightPhase::Idle,
            elapsed_time: Duration::ZERO,
            altitude_estimate: 0.0,
            horizontal_estimate: 0.0,
            roll_estimate: 0.0,
            pitch_estimate: 0.0,
            sample_timestamp: None,
        }
    }
}

/// A phase change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTransition {
    /// Phase left
    pub from: FlightPhase,
    /// Phase entered
    pub to: FlightPhase,
    /// Mission time of the change
    pub at: Duration,
}

/// What happened during one tick, handed to the external recorder
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickRecord {
    /// Tick index since the start of the flight
    pub tick: u32,
    /// Phase the command was computed in
    pub phase: FlightPhase,
    /// Mission time
    pub elapsed: Duration,
    /// Time spent in `phase`
    pub phase_elapsed: Duration,
    /// Sample the command was computed from
    pub sample: TelemetrySample,
    /// Command sent
    pub command: ControlCommand,
}

/// How a flight ended
#[derive(Debug)]
pub enum FlightOutcome {
    /// Landed normally
    Completed,
    /// Aborted because of the contained error
    Aborted(Error),
}

/// Summary returned by [Sequencer::run()]
#[derive(Debug)]
pub struct FlightReport {
    /// How the flight ended
    pub outcome: FlightOutcome,
    /// State at the end of the flight
    pub final_state: FlightState,
    /// Every phase change, in order
    pub transitions: Vec<PhaseTransition>,
    /// Number of ticks that sent a command
    pub ticks: u32,
}

impl FlightReport {
    /// True if the flight landed normally
    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, FlightOutcome::Completed)
    }

    /// Error that aborted the flight, if any
    pub fn abort_reason(&self) -> Option<&Error> {
        match &self.outcome {
            FlightOutcome::Completed => None,
            FlightOutcome::Aborted(error) => Some(error),
        }
    }
}

/// External abort signal
///
/// Cloneable handle on a flag observed at the top of every tick. Once set, the running sequence aborts.
#[derive(Debug, Clone, Default)]
pub struct AbortHandle {
    requested: Arc<AtomicBool>,
}

impl AbortHandle {
    /// Request the flight to abort
    pub fn abort(&self) {
        self.requested.store(true, Relaxed);
    }

    /// True once [AbortHandle::abort()] has been called
    pub fn is_requested(&self) -> bool {
        self.requested.load(Relaxed)
    }
}

enum Tick {
    Continue,
    Finished,
}

async fn pace(pacing: Pacing, deadline: Instant) {
    if pacing == Pacing::Blocking {
        return;
    }

    let now = Instant::now();
    if now > deadline {
        warn!("Control tick overran its period by {:?}", now - deadline);
    } else {
        tokio::time::sleep_until(deadline).await;
    }
}

/// Hover, maneuver and landing sequencer
///
/// A sequencer flies one flight: [Sequencer::run()] consumes it.
///
/// ``` no_run
/// # use std::sync::Arc;
/// # use crazyflie_sequencer::backends::sim::{SimConfig, SimulatedQuad};
/// # use crazyflie_sequencer::{PolledTelemetry, SequenceConfig, Sequencer, VehicleActuator};
/// # async fn fly() -> crazyflie_sequencer::Result<()> {
/// let quad = Arc::new(SimulatedQuad::connect(SimConfig::default())?);
/// let (tx, rx) = flume::unbounded();
///
/// let sequencer = Sequencer::new(
///     &SequenceConfig::simulated_maneuver(),
///     PolledTelemetry::new(quad.clone()),
///     VehicleActuator::new(quad.clone()),
/// )?
/// .with_recorder(tx);
///
/// let report = sequencer.run().await;
/// println!("{:?} after {} ticks, {} records", report.outcome, report.ticks, rx.len());
/// # Ok(())
/// # }
/// ```
pub struct Sequencer<T, A> {
    telemetry: T,
    actuator: A,
    tick: Duration,
    hover_duration: Duration,
    hover_mode: HoverMode,
    hover_setpoint: f64,
    hover_convergence: Option<(f64, Duration)>,
    vertical_axis: VerticalAxis,
    output_bounds: (f64, f64),
    thrust_bounds: (f64, f64),
    pid: Pid,
    maneuver: ManeuverGenerator,
    landing: LandingRamp,
    limits: SafetyLimits,
    state: FlightState,
    last_sample: Option<TelemetrySample>,
    converged_since: Option<Duration>,
    ticks: u32,
    phase_ticks: u32,
    transitions: Vec<PhaseTransition>,
    abort: AbortHandle,
    recorder: Option<flume::Sender<TickRecord>>,
}

impl<T: TelemetrySource, A: ActuatorSink> Sequencer<T, A> {
    /// Build a sequencer
    ///
    /// Fails with [Error::Configuration] if the configuration is invalid or does not fit the actuator: hover
    /// setpoints requested from a backend without them, or a tick too slow for the backend command watchdog.
    pub fn new(config: &SequenceConfig, telemetry: T, actuator: A) -> Result<Self> {
        config.validate()?;

        let tick = config.tick()?;

        if config.hover_mode == HoverMode::Setpoint && !actuator.supports_hover_setpoint() {
            return Err(Error::Configuration(
                "hover_mode is setpoint but the backend does not support hover setpoints".to_owned(),
            ));
        }
        if let Some(max_interval) = actuator.max_command_interval() {
            if tick * 2 > max_interval {
                return Err(Error::Configuration(format!(
                    "tick_period {:?} is too slow for the backend command watchdog ({:?})",
                    tick, max_interval
                )));
            }
        }

        let hover_convergence = match &config.hover_convergence {
            Some(exit) => Some((exit.tolerance, Duration::from_secs_f64(exit.hold_time))),
            None => None,
        };

        Ok(Self {
            telemetry,
            actuator,
            tick,
            hover_duration: config.hover_duration()?,
            hover_mode: config.hover_mode,
            hover_setpoint: config.hover_setpoint,
            hover_convergence,
            vertical_axis: config.vertical_axis,
            output_bounds: (config.output_min, config.output_max),
            thrust_bounds: (config.min_thrust, config.max_thrust),
            pid: Pid::new(config.pid_params()?),
            maneuver: ManeuverGenerator::new(config.trajectory_params()?),
            landing: LandingRamp::new(config.landing_params()?),
            limits: config.safety_limits()?,
            state: FlightState::default(),
            last_sample: None,
            converged_since: None,
            ticks: 0,
            phase_ticks: 0,
            transitions: Vec::new(),
            abort: AbortHandle::default(),
            recorder: None,
        })
    }

    /// Send a [TickRecord] for every command to `recorder`
    pub fn with_recorder(mut self, recorder: flume::Sender<TickRecord>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Handle to abort the flight from another task
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Current flight state
    pub fn state(&self) -> &FlightState {
        &self.state
    }

    /// Fly the whole sequence
    ///
    /// Errors during the flight do not escape: they abort the flight and are returned in the [FlightReport].
    pub async fn run(mut self) -> FlightReport {
        info!("Starting flight sequence");

        if let Err(e) = self.start().await {
            return self.abort(e).await;
        }

        loop {
            let deadline = Instant::now() + self.tick;

            match self.step().await {
                Ok(Tick::Continue) => (),
                Ok(Tick::Finished) => return self.finish().await,
                Err(e) => return self.abort(e).await,
            }

            pace(self.actuator.pacing(), deadline).await;
        }
    }

    async fn start(&mut self) -> Result<()> {
        self.actuator.arm().await?;
        self.actuator.enable_control().await?;
        self.enter(FlightPhase::Hover);
        Ok(())
    }

    async fn step(&mut self) -> Result<Tick> {
        if self.abort.is_requested() {
            return Err(Error::AbortRequested);
        }

        let sample = self.telemetry.poll().await?;
        self.limits.check_telemetry(sample.timestamp, Instant::now())?;
        self.observe(&sample);
        self.limits.check_phase(self.state.phase, self.phase_elapsed())?;

        let command = match self.state.phase {
            FlightPhase::Hover => {
                if self.hover_complete(&sample) {
                    self.enter(FlightPhase::Maneuver);
                    self.maneuver_command()
                } else {
                    self.hover_command(&sample)
                }
            }
            FlightPhase::Maneuver => {
                if self.maneuver.is_complete(self.phase_elapsed()) {
                    self.enter(FlightPhase::Landing);
                    self.landing_command(&sample)
                } else {
                    self.maneuver_command()
                }
            }
            FlightPhase::Landing => {
                if self.landing.landed(self.state.altitude_estimate) {
                    info!("Landed at {:.3} m", self.state.altitude_estimate);
                    self.enter(FlightPhase::Done);
                    return Ok(Tick::Finished);
                }
                self.landing_command(&sample)
            }
            FlightPhase::Idle | FlightPhase::Done | FlightPhase::Aborted => return Ok(Tick::Finished),
        };

        self.actuator.send(&command, self.tick).await?;
        self.record(sample, command);

        self.ticks += 1;
        self.phase_ticks += 1;
        Ok(Tick::Continue)
    }

    fn mission_time(&self) -> Duration {
        self.tick * self.ticks
    }

    fn phase_elapsed(&self) -> Duration {
        self.tick * self.phase_ticks
    }

    fn observe(&mut self, sample: &TelemetrySample) {
        self.state.elapsed_time = self.mission_time();
        self.state.altitude_estimate = self.vertical_axis.height(sample.z);
        self.state.horizontal_estimate = sample.y;
        self.state.roll_estimate = sample.roll;
        self.state.pitch_estimate = sample.pitch;
        self.state.sample_timestamp = Some(sample.timestamp);
        self.last_sample = Some(*sample);
    }

    fn hover_error(&self, sample: &TelemetrySample) -> f64 {
        match self.hover_mode {
            HoverMode::Pid => (self.hover_setpoint - sample.z).abs(),
            HoverMode::Setpoint => (self.hover_setpoint - self.state.altitude_estimate).abs(),
        }
    }

    fn hover_complete(&mut self, sample: &TelemetrySample) -> bool {
        let elapsed = self.phase_elapsed();
        if elapsed >= self.hover_duration {
            return true;
        }

        if let Some((tolerance, hold_time)) = self.hover_convergence {
            if self.hover_error(sample) <= tolerance {
                let since = *self.converged_since.get_or_insert(elapsed);
                if elapsed - since >= hold_time {
                    info!("Hover converged after {:?}", elapsed);
                    return true;
                }
            } else {
                self.converged_since = None;
            }
        }

        false
    }

    fn hover_command(&mut self, sample: &TelemetrySample) -> ControlCommand {
        match self.hover_mode {
            HoverMode::Pid => {
                let thrust = self.pid.update(sample.z, self.mission_time());
                ControlCommand::level(clamp(thrust, self.output_bounds.0, self.output_bounds.1))
            }
            HoverMode::Setpoint => ControlCommand::hover_at(self.hover_setpoint),
        }
    }

    fn maneuver_command(&mut self) -> ControlCommand {
        let setpoint = self.maneuver.advance(self.phase_elapsed(), self.tick);
        ControlCommand::AttitudeThrust {
            roll: setpoint.roll,
            pitch: 0.0,
            yaw: 0.0,
            thrust: clamp(setpoint.thrust, self.thrust_bounds.0, self.thrust_bounds.1),
        }
    }

    fn landing_command(&mut self, sample: &TelemetrySample) -> ControlCommand {
        let target = self
            .landing
            .target(self.state.altitude_estimate, self.phase_elapsed());

        if self.actuator.supports_hover_setpoint() {
            ControlCommand::hover_at(target)
        } else {
            self.pid.set_setpoint(self.vertical_axis.to_vehicle(target));
            let thrust = self.pid.update(sample.z, self.mission_time());
            ControlCommand::level(clamp(thrust, self.output_bounds.0, self.output_bounds.1))
        }
    }

    fn enter(&mut self, next: FlightPhase) {
        let from = self.state.phase;
        if !from.can_transition_to(next) {
            error!("Refusing illegal phase transition {:?} -> {:?}", from, next);
            return;
        }

        let at = self.mission_time();
        info!("{:?} -> {:?} at {:?}", from, next, at);
        self.transitions.push(PhaseTransition { from, to: next, at });
        self.state.phase = next;
        self.phase_ticks = 0;

        match next {
            FlightPhase::Hover => {
                self.pid.reset();
                self.converged_since = None;
            }
            FlightPhase::Maneuver => self.maneuver.reset(),
            FlightPhase::Landing => self.landing.reset(),
            _ => (),
        }
    }

    fn record(&mut self, sample: TelemetrySample, command: ControlCommand) {
        let record = TickRecord {
            tick: self.ticks,
            phase: self.state.phase,
            elapsed: self.mission_time(),
            phase_elapsed: self.phase_elapsed(),
            sample,
            command,
        };
        debug!("{:?}", record);

        if let Some(recorder) = &self.recorder {
            if recorder.send(record).is_err() {
                warn!("Tick recorder disconnected, dropping further records");
                self.recorder = None;
            }
        }
    }

    async fn release(&mut self) {
        if let Err(e) = self.actuator.disable_control().await {
            warn!("Failed to disable control: {}", e);
        }
        if let Err(e) = self.actuator.disarm().await {
            warn!("Failed to disarm: {}", e);
        }
    }

    async fn finish(mut self) -> FlightReport {
        self.release().await;
        info!("Flight sequence completed after {} ticks", self.ticks);
        self.into_report(FlightOutcome::Completed)
    }

    async fn abort(mut self, reason: Error) -> FlightReport {
        error!("Aborting flight in {:?}: {}", self.state.phase, reason);
        self.enter(FlightPhase::Aborted);

        let safe = ControlCommand::safe();
        match self.actuator.send(&safe, self.tick).await {
            Ok(()) => {
                if let Some(sample) = self.last_sample {
                    self.record(sample, safe);
                }
            }
            Err(e) => warn!("Safe command failed: {}", e),
        }

        self.release().await;
        self.into_report(FlightOutcome::Aborted(reason))
    }

    fn into_report(self, outcome: FlightOutcome) -> FlightReport {
        FlightReport {
            outcome,
            final_state: self.state,
            transitions: self.transitions,
            ticks: self.ticks,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use FlightPhase::*;

    const ALL: [FlightPhase; 6] = [Idle, Hover, Maneuver, Landing, Done, Aborted];

    #[test]
    fn only_forward_transitions_are_legal() {
        let legal = [(Idle, Hover), (Hover, Maneuver), (Maneuver, Landing), (Landing, Done)];
        for from in ALL {
            for to in ALL {
                let expected = legal.contains(&(from, to)) || (to == Aborted && !from.is_terminal());
                assert_eq!(from.can_transition_to(to), expected, "{:?} -> {:?}", from, to);
            }
        }
    }

    #[test]
    fn terminal_phases() {
        assert!(Done.is_terminal());
        assert!(Aborted.is_terminal());
        assert!(!Landing.is_terminal());
        assert!(!Aborted.can_transition_to(Aborted));
    }

    #[test]
    fn abort_handle_is_shared() {
        let handle = AbortHandle::default();
        let clone = handle.clone();
        assert!(!handle.is_requested());
        clone.abort();
        assert!(handle.is_requested());
    }
}
