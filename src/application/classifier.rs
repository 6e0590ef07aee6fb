//! Interruption classification
//!
//! Turns raw platform signals into typed interruption episodes and
//! resolution hints. The classifier owns the "one active episode"
//! rule: a repeat of the active kind merges into it, a different kind
//! queues behind it, and everything else passes through untouched.

use std::time::Duration as StdDuration;

use tokio::time::Instant;
use tracing::debug;

use crate::domain::input::InputPort;
use crate::domain::interruption::{InterruptionEvent, InterruptionKind, ResolutionHint};

use super::events::RouteChange;

/// What the engine should do with a classified signal.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// A new interruption episode starts now
    Begin(InterruptionKind),
    /// Signal merged into the already active episode
    Merged,
    /// A different interruption is active; this one waits its turn
    Queued(InterruptionKind),
    /// Update the preferred input and carry on
    InputRefresh,
    /// Nothing to do
    Ignore,
}

/// How a finished phone call should be resolved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CallResolution {
    pub call_duration: StdDuration,
    pub hint: ResolutionHint,
}

/// Snapshot of engine state the classifier needs to judge a signal.
#[derive(Debug, Clone, Copy)]
pub struct ClassifyContext<'a> {
    /// Samples are actively being written
    pub capturing: bool,
    /// The input capture currently runs on
    pub current_input: Option<&'a InputPort>,
}

pub struct InterruptionClassifier {
    short_call_threshold: StdDuration,
    active: Option<InterruptionEvent>,
    queued: Option<InterruptionKind>,
}

impl InterruptionClassifier {
    pub fn new(short_call_threshold: StdDuration) -> Self {
        Self {
            short_call_threshold,
            active: None,
            queued: None,
        }
    }

    /// Forget all episode state, e.g. when a session ends.
    pub fn reset(&mut self) {
        self.active = None;
        self.queued = None;
    }

    pub fn active(&self) -> Option<&InterruptionEvent> {
        self.active.as_ref()
    }

    /// Whether an interruption is waiting behind the active one.
    pub fn has_queued(&self) -> bool {
        self.queued.is_some()
    }

    /// Pop the interruption that queued behind the one just resolved.
    pub fn take_queued(&mut self) -> Option<InterruptionKind> {
        self.queued.take()
    }

    /// A telephony call has started.
    pub fn on_call_began(&mut self, now: Instant, ctx: ClassifyContext<'_>) -> Verdict {
        if !ctx.capturing && self.active.is_none() {
            return Verdict::Ignore;
        }
        self.begin(InterruptionKind::PhoneCall, now)
    }

    /// A telephony call has ended. Returns how to resolve it when the
    /// active episode is in fact a phone call.
    pub fn on_call_ended(&mut self, now: Instant, resume_hint: Option<bool>) -> Option<CallResolution> {
        let active = self.active.as_mut()?;
        if active.kind != InterruptionKind::PhoneCall {
            return None;
        }

        let call_duration = active.duration_at(now);
        // A missing platform hint must not strand the session, so the
        // duration policy alone decides; an explicit hint is logged
        // but carries no extra weight.
        let hint = if call_duration < self.short_call_threshold {
            ResolutionHint::AutoResume
        } else {
            ResolutionHint::AskUser
        };
        if resume_hint == Some(false) && hint == ResolutionHint::AutoResume {
            debug!("platform advised against resume after short call; resuming anyway");
        }
        active.resolve(now, hint);
        self.active = None;

        Some(CallResolution { call_duration, hint })
    }

    /// The set of usable inputs changed.
    pub fn on_route_changed(
        &mut self,
        change: &RouteChange,
        now: Instant,
        ctx: ClassifyContext<'_>,
    ) -> Verdict {
        let lost_current = match ctx.current_input {
            Some(current) => change.removed.iter().any(|p| p.id == current.id),
            None => false,
        };

        if ctx.capturing && lost_current {
            return self.begin(InterruptionKind::MicrophoneLost, now);
        }
        if !ctx.capturing && self.active.is_none() {
            // Not recording: just track the new default input
            return Verdict::InputRefresh;
        }
        if lost_current {
            // Already interrupted and now the device is gone too
            return self.begin(InterruptionKind::MicrophoneLost, now);
        }
        Verdict::Ignore
    }

    /// The OS preempted the audio session for another client.
    pub fn on_preemption(&mut self, now: Instant, ctx: ClassifyContext<'_>) -> Verdict {
        if !ctx.capturing && self.active.is_none() {
            return Verdict::Ignore;
        }
        self.begin(InterruptionKind::SystemPreemption, now)
    }

    /// Install an episode directly, bypassing the signal rules. Used
    /// when a queued interruption takes over from a resolved one.
    pub fn begin_episode(&mut self, kind: InterruptionKind, now: Instant) -> Verdict {
        self.begin(kind, now)
    }

    /// Mark the active non-call episode resolved (device returned,
    /// preemption lifted).
    pub fn resolve_active(&mut self, now: Instant, hint: ResolutionHint) {
        if let Some(active) = self.active.as_mut() {
            active.resolve(now, hint);
        }
        self.active = None;
    }

    fn begin(&mut self, kind: InterruptionKind, now: Instant) -> Verdict {
        match &self.active {
            None => {
                self.active = Some(InterruptionEvent::begin(kind, now));
                Verdict::Begin(kind)
            }
            Some(active) if active.kind == kind => Verdict::Merged,
            Some(_) => {
                // Keep at most one pending kind; a repeat collapses
                if self.queued == Some(kind) {
                    Verdict::Merged
                } else {
                    self.queued = Some(kind);
                    Verdict::Queued(kind)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::input::InputKind;
    use tokio::time::advance;

    fn capturing_on<'a>(port: &'a InputPort) -> ClassifyContext<'a> {
        ClassifyContext {
            capturing: true,
            current_input: Some(port),
        }
    }

    fn idle() -> ClassifyContext<'static> {
        ClassifyContext {
            capturing: false,
            current_input: None,
        }
    }

    fn builtin() -> InputPort {
        InputPort::new("Built-in Microphone", InputKind::BuiltIn)
    }

    #[tokio::test(start_paused = true)]
    async fn short_call_resolves_to_auto_resume() {
        let mic = builtin();
        let mut c = InterruptionClassifier::new(StdDuration::from_secs(180));

        let verdict = c.on_call_began(Instant::now(), capturing_on(&mic));
        assert_eq!(verdict, Verdict::Begin(InterruptionKind::PhoneCall));

        advance(StdDuration::from_secs(179)).await;
        let res = c.on_call_ended(Instant::now(), None).unwrap();
        assert_eq!(res.call_duration, StdDuration::from_secs(179));
        assert_eq!(res.hint, ResolutionHint::AutoResume);
        assert!(c.active().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn threshold_call_asks_the_user() {
        let mic = builtin();
        let mut c = InterruptionClassifier::new(StdDuration::from_secs(180));

        c.on_call_began(Instant::now(), capturing_on(&mic));
        advance(StdDuration::from_secs(180)).await;

        let res = c.on_call_ended(Instant::now(), Some(true)).unwrap();
        assert_eq!(res.hint, ResolutionHint::AskUser);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_hint_still_resumes_short_calls() {
        let mic = builtin();
        let mut c = InterruptionClassifier::new(StdDuration::from_secs(180));

        c.on_call_began(Instant::now(), capturing_on(&mic));
        advance(StdDuration::from_secs(20)).await;

        let res = c.on_call_ended(Instant::now(), Some(false)).unwrap();
        assert_eq!(res.hint, ResolutionHint::AutoResume);
    }

    #[tokio::test(start_paused = true)]
    async fn repeat_call_signal_merges() {
        let mic = builtin();
        let mut c = InterruptionClassifier::new(StdDuration::from_secs(180));

        assert_eq!(
            c.on_call_began(Instant::now(), capturing_on(&mic)),
            Verdict::Begin(InterruptionKind::PhoneCall)
        );
        assert_eq!(c.on_call_began(Instant::now(), capturing_on(&mic)), Verdict::Merged);
    }

    #[tokio::test(start_paused = true)]
    async fn different_kind_queues_behind_active() {
        let mic = builtin();
        let mut c = InterruptionClassifier::new(StdDuration::from_secs(180));

        c.on_call_began(Instant::now(), capturing_on(&mic));
        let change = RouteChange {
            removed: vec![mic.clone()],
            available: vec![],
        };
        // Capture is paused during the call but the device loss still matters
        let ctx = ClassifyContext {
            capturing: false,
            current_input: Some(&mic),
        };
        assert_eq!(
            c.on_route_changed(&change, Instant::now(), ctx),
            Verdict::Queued(InterruptionKind::MicrophoneLost)
        );
        assert!(c.has_queued());
        assert_eq!(c.take_queued(), Some(InterruptionKind::MicrophoneLost));
        assert_eq!(c.take_queued(), None);
        assert!(!c.has_queued());
    }

    #[tokio::test(start_paused = true)]
    async fn losing_current_device_begins_mic_lost() {
        let mic = builtin();
        let mut c = InterruptionClassifier::new(StdDuration::from_secs(180));

        let change = RouteChange {
            removed: vec![mic.clone()],
            available: vec![InputPort::new("USB Headset", InputKind::Peripheral)],
        };
        assert_eq!(
            c.on_route_changed(&change, Instant::now(), capturing_on(&mic)),
            Verdict::Begin(InterruptionKind::MicrophoneLost)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn losing_some_other_device_is_ignored() {
        let mic = builtin();
        let mut c = InterruptionClassifier::new(StdDuration::from_secs(180));

        let change = RouteChange {
            removed: vec![InputPort::new("USB Headset", InputKind::Peripheral)],
            available: vec![mic.clone()],
        };
        assert_eq!(
            c.on_route_changed(&change, Instant::now(), capturing_on(&mic)),
            Verdict::Ignore
        );
    }

    #[tokio::test(start_paused = true)]
    async fn idle_route_change_only_refreshes_input() {
        let mut c = InterruptionClassifier::new(StdDuration::from_secs(180));
        let change = RouteChange {
            removed: vec![],
            available: vec![builtin()],
        };
        assert_eq!(c.on_route_changed(&change, Instant::now(), idle()), Verdict::InputRefresh);
        assert!(c.active().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn idle_call_signal_is_ignored() {
        let mut c = InterruptionClassifier::new(StdDuration::from_secs(180));
        assert_eq!(c.on_call_began(Instant::now(), idle()), Verdict::Ignore);
        assert!(c.on_call_ended(Instant::now(), None).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn preemption_begins_episode_while_capturing() {
        let mic = builtin();
        let mut c = InterruptionClassifier::new(StdDuration::from_secs(180));
        assert_eq!(
            c.on_preemption(Instant::now(), capturing_on(&mic)),
            Verdict::Begin(InterruptionKind::SystemPreemption)
        );
    }
}
