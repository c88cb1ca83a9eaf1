use std::array::TryFromSliceError;
use std::time::Duration;

use crazyflie_link::Packet;

use crate::sequencer::FlightPhase;

/// [Result] alias for return types of the crate API
pub type Result<T> = std::result::Result<T, Error>;

/// Error enum type
///
/// Configuration and connection errors are returned to the caller before any command is sent. Every other variant
/// is an in-flight error: the [Sequencer](crate::Sequencer) logs it and routes it into the `Aborted` phase.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The backend could not be reached when connecting.
    #[error("connection failure: {0}")]
    ConnectionFailure(String),
    /// Invalid configuration. The String contains the reason.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// The latest telemetry sample is older than the allowed age.
    #[error("telemetry stale: last sample is {age:?} old (max {max_age:?})")]
    TelemetryStale {
        /// Age of the latest sample
        age: Duration,
        /// Configured maximum age
        max_age: Duration,
    },
    /// No telemetry sample has been received yet.
    #[error("no telemetry sample available")]
    TelemetryUnavailable,
    /// The backend refused a command, for example because the vehicle is not armed.
    #[error("command rejected: {0}")]
    CommandRejected(String),
    /// A flight phase lasted longer than the configured timeout.
    #[error("phase {phase:?} timed out after {elapsed:?}")]
    PhaseTimeout {
        /// Phase that timed out
        phase: FlightPhase,
        /// Time spent in the phase
        elapsed: Duration,
    },
    /// The sequence was aborted through an [AbortHandle](crate::AbortHandle).
    #[error("abort requested")]
    AbortRequested,
    /// Unexpected protocol error. The String contains the reason.
    #[error("protocol error: {0}")]
    Protocol(String),
    /// Log Subsystem error. The String contains the reason.
    #[error("log error: {0}")]
    Log(String),
    /// Log variable not found in TOC.
    #[error("variable not found in TOC: {0}")]
    VariableNotFound(String),
    /// Crazyflie link error. The String contains the [error from the Link](crazyflie_link::Error).
    #[error("link error: {0}")]
    Link(String),
    /// The vehicle is currently disconnected.
    #[error("disconnected")]
    Disconnected,
    /// Operation timed out waiting for response.
    #[error("timeout")]
    Timeout,
}

impl Error {
    /// True for errors that are reported before a flight starts rather than aborting one
    pub fn is_fatal_at_start(&self) -> bool {
        matches!(self, Error::ConnectionFailure(_) | Error::Configuration(_))
    }
}

impl From<TryFromSliceError> for Error {
    fn from(e: TryFromSliceError) -> Self {
        Self::Protocol(format!("{:?}", e))
    }
}

impl From<crazyflie_link::Error> for Error {
    fn from(error: crazyflie_link::Error) -> Self {
        Self::Link(format!("{:?}", error))
    }
}

impl From<flume::RecvError> for Error {
    fn from(_: flume::RecvError) -> Self {
        self::Error::Disconnected
    }
}

impl From<flume::SendError<Packet>> for Error {
    fn from(_: flume::SendError<Packet>) -> Self {
        self::Error::Disconnected
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        self::Error::Timeout
    }
}
