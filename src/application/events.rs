//! Engine event vocabulary
//!
//! Every command and external signal funnels through one channel and
//! one handler, so no two transitions ever race each other.

use crate::domain::input::InputPort;
use crate::domain::session::SessionOptions;
use crate::domain::state::UserDecision;

use super::ports::store::{MergeError, MergeOutcome};

/// A change in the set of usable audio inputs.
#[derive(Debug, Clone, Default)]
pub struct RouteChange {
    /// Inputs that just disappeared
    pub removed: Vec<InputPort>,
    /// Inputs usable right now
    pub available: Vec<InputPort>,
}

/// Everything the engine reacts to, in arrival order.
#[derive(Debug)]
pub enum EngineEvent {
    // User commands
    Start(SessionOptions),
    Stop,
    Discard,
    Pause,
    Resume,
    Decision(UserDecision),

    // Telephony signals
    CallBegan,
    CallEnded {
        /// Platform's opinion on whether capture should resume;
        /// absent on some platforms and treated optimistically
        resume_hint: Option<bool>,
    },

    // Device and OS signals
    RouteChanged(RouteChange),
    PreemptionBegan,
    PreemptionEnded,

    // App lifecycle
    EnteredBackground,
    EnteredForeground,

    // Internal completions
    MergeFinished {
        /// Session epoch the merge belongs to; stale epochs are dropped
        epoch: u64,
        result: Result<MergeOutcome, MergeError>,
    },

    /// Exit the engine task once any active session has been saved
    Shutdown,
}
