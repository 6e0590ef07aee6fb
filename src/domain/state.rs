//! Recording lifecycle states

use std::fmt;
use std::time::Duration as StdDuration;

use tokio::time::Instant;

use crate::domain::interruption::InterruptionKind;

/// What ended a session that the user did not stop by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCause {
    /// Explicit stop command
    UserRequested,
    /// No answer to a resume prompt before the decision deadline
    DecisionTimeout,
    /// Hard duration cap reached
    DurationCap,
    /// Free storage fell below the stop floor
    StorageExhausted,
    /// Battery fell below the stop floor
    BatteryCritical,
    /// Background execution budget about to run out
    BudgetExpired,
}

impl fmt::Display for StopCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserRequested => write!(f, "stopped by user"),
            Self::DecisionTimeout => write!(f, "no answer to resume prompt"),
            Self::DurationCap => write!(f, "maximum duration reached"),
            Self::StorageExhausted => write!(f, "free storage exhausted"),
            Self::BatteryCritical => write!(f, "battery critically low"),
            Self::BudgetExpired => write!(f, "background time expired"),
        }
    }
}

/// User's answer to a "resume or discard?" prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserDecision {
    Resume,
    Discard,
}

/// Lifecycle state of the recording engine.
///
/// Payload fields carry the timing context the engine needs to act on
/// deadlines without consulting external timers. All instants are
/// monotonic logic-clock readings.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordingState {
    /// No session in flight
    Idle,
    /// Capture is live and samples are being written
    Recording,
    /// User paused capture; the open segment stays open
    Paused,
    /// An interruption owns the input; capture is paused, segment open
    Interrupted {
        reason: InterruptionKind,
        began_at: Instant,
        /// Call ended while the app was backgrounded; resolution is
        /// deferred until the app returns to the foreground
        call_ended: Option<Instant>,
    },
    /// Input device vanished; polling for any usable replacement
    WaitingForMicrophone {
        cause: InterruptionKind,
        since: Instant,
        next_poll: Instant,
    },
    /// Long interruption ended; the user must choose resume or discard
    WaitingForUserDecision {
        cause_duration: StdDuration,
        deadline: Instant,
    },
    /// Segments are being stitched into the final artifact
    Merging,
    /// Session failed; anything salvageable has already been handled
    Error { detail: String },
    /// Final artifact written and handed off
    Completed,
    /// Session cancelled and all files deleted
    Discarded,
}

impl RecordingState {
    /// The payload-free view of this state, suitable for observers.
    pub fn phase(&self) -> Phase {
        match self {
            Self::Idle => Phase::Idle,
            Self::Recording => Phase::Recording,
            Self::Paused => Phase::Paused,
            Self::Interrupted { .. } => Phase::Interrupted,
            Self::WaitingForMicrophone { .. } => Phase::WaitingForMicrophone,
            Self::WaitingForUserDecision { .. } => Phase::WaitingForUserDecision,
            Self::Merging => Phase::Merging,
            Self::Error { .. } => Phase::Error,
            Self::Completed => Phase::Completed,
            Self::Discarded => Phase::Discarded,
        }
    }

    /// A new session may begin from here
    pub fn can_start(&self) -> bool {
        matches!(
            self,
            Self::Idle | Self::Completed | Self::Discarded | Self::Error { .. }
        )
    }

    /// A session is in flight (files may exist on disk)
    pub fn session_active(&self) -> bool {
        !self.can_start()
    }

    /// A stop command is meaningful from here
    pub fn can_stop(&self) -> bool {
        matches!(
            self,
            Self::Recording
                | Self::Paused
                | Self::Interrupted { .. }
                | Self::WaitingForMicrophone { .. }
                | Self::WaitingForUserDecision { .. }
        )
    }
}

/// Payload-free mirror of [`RecordingState`], published to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Recording,
    Paused,
    Interrupted,
    WaitingForMicrophone,
    WaitingForUserDecision,
    Merging,
    Error,
    Completed,
    Discarded,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Discarded | Self::Error)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Idle => "idle",
            Self::Recording => "recording",
            Self::Paused => "paused",
            Self::Interrupted => "interrupted",
            Self::WaitingForMicrophone => "waiting for microphone",
            Self::WaitingForUserDecision => "waiting for decision",
            Self::Merging => "merging",
            Self::Error => "error",
            Self::Completed => "completed",
            Self::Discarded => "discarded",
        };
        write!(f, "{}", label)
    }
}
