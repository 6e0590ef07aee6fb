//! Interruption model

use std::fmt;

use tokio::time::Instant;

/// Why capture lost the input or had to yield it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptionKind {
    /// Telephony claimed the audio session
    PhoneCall,
    /// The active input device disappeared
    MicrophoneLost,
    /// The OS preempted the audio session for another client
    SystemPreemption,
    /// Background execution budget is about to run out
    BackgroundBudgetExpiring,
}

impl fmt::Display for InterruptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PhoneCall => write!(f, "phone call"),
            Self::MicrophoneLost => write!(f, "microphone lost"),
            Self::SystemPreemption => write!(f, "system preemption"),
            Self::BackgroundBudgetExpiring => write!(f, "background budget expiring"),
        }
    }
}

/// How a resolved interruption should be acted on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionHint {
    /// Resume capture without asking
    AutoResume,
    /// Prompt the user and wait for an answer
    AskUser,
    /// Stop the session and keep what was captured
    ForceStop,
}

/// One interruption episode within a session.
///
/// A session tracks at most one active episode at a time. A second
/// signal of the same kind merges into the active episode; a different
/// kind queues behind it.
#[derive(Debug, Clone, PartialEq)]
pub struct InterruptionEvent {
    pub kind: InterruptionKind,
    pub began_at: Instant,
    pub resolved_at: Option<Instant>,
    pub resolution: Option<ResolutionHint>,
}

impl InterruptionEvent {
    pub fn begin(kind: InterruptionKind, at: Instant) -> Self {
        Self {
            kind,
            began_at: at,
            resolved_at: None,
            resolution: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.resolved_at.is_none()
    }

    pub fn resolve(&mut self, at: Instant, hint: ResolutionHint) {
        self.resolved_at = Some(at);
        self.resolution = Some(hint);
    }

    /// Elapsed time from begin to resolution, or to `now` while active.
    pub fn duration_at(&self, now: Instant) -> std::time::Duration {
        let end = self.resolved_at.unwrap_or(now);
        end.saturating_duration_since(self.began_at)
    }
}
