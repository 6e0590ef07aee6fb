//! Recording engine use case
//!
//! One task owns all state and consumes commands, platform signals and
//! internal completions from a single channel, so transitions are
//! strictly serialized. Deadlines are recomputed from the current
//! state on every loop pass; a deadline armed for a state that has
//! since changed simply no longer exists.

use std::sync::Arc;
use std::time::SystemTime;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::domain::config::EngineConfig;
use crate::domain::input::choose_input;
use crate::domain::interruption::{InterruptionKind, ResolutionHint};
use crate::domain::session::{
    recovered_path, segment_path, CompletedRecording, LocationSnapshot, OpenSegment,
    RecordingSession, SealedSegment, SessionOptions,
};
use crate::domain::state::{Phase, RecordingState, StopCause, UserDecision};

use super::checkpoint::{CheckpointPolicy, FlushDue};
use super::classifier::{CallResolution, ClassifyContext, InterruptionClassifier, Verdict};
use super::events::{EngineEvent, RouteChange};
use super::limits::{LimitCheck, LimitMonitor};
use super::ports::{
    CaptureDevice, CompletionSink, InputRoutes, MergeError, Notification, NotificationIcon,
    Notifier, ResourceProbe, SegmentStore,
};

/// The engine task is gone, so commands cannot be delivered
#[derive(Debug, Clone, Error)]
#[error("Recording engine is no longer running")]
pub struct EngineClosed;

/// Why the segments are being merged, decided before the merge starts.
#[derive(Debug, Clone)]
enum MergeGoal {
    /// Ordinary completion
    Complete { cause: StopCause },
    /// Best-effort recovery out of a failed session
    Salvage { detail: String },
}

/// Session facts the merge outcome handler needs after the session
/// bookkeeping is gone.
#[derive(Debug)]
struct PendingMerge {
    goal: MergeGoal,
    started_wall: SystemTime,
    location: Option<LocationSnapshot>,
    segment_paths: Vec<std::path::PathBuf>,
}

/// Cloneable handle for driving the engine from anywhere.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineEvent>,
    phase_rx: watch::Receiver<Phase>,
}

impl EngineHandle {
    pub async fn start(&self, options: SessionOptions) -> Result<(), EngineClosed> {
        self.send(EngineEvent::Start(options)).await
    }

    pub async fn stop(&self) -> Result<(), EngineClosed> {
        self.send(EngineEvent::Stop).await
    }

    pub async fn discard(&self) -> Result<(), EngineClosed> {
        self.send(EngineEvent::Discard).await
    }

    pub async fn pause(&self) -> Result<(), EngineClosed> {
        self.send(EngineEvent::Pause).await
    }

    pub async fn resume(&self) -> Result<(), EngineClosed> {
        self.send(EngineEvent::Resume).await
    }

    pub async fn decide(&self, decision: UserDecision) -> Result<(), EngineClosed> {
        self.send(EngineEvent::Decision(decision)).await
    }

    pub async fn call_began(&self) -> Result<(), EngineClosed> {
        self.send(EngineEvent::CallBegan).await
    }

    pub async fn call_ended(&self, resume_hint: Option<bool>) -> Result<(), EngineClosed> {
        self.send(EngineEvent::CallEnded { resume_hint }).await
    }

    pub async fn route_changed(&self, change: RouteChange) -> Result<(), EngineClosed> {
        self.send(EngineEvent::RouteChanged(change)).await
    }

    pub async fn preemption_began(&self) -> Result<(), EngineClosed> {
        self.send(EngineEvent::PreemptionBegan).await
    }

    pub async fn preemption_ended(&self) -> Result<(), EngineClosed> {
        self.send(EngineEvent::PreemptionEnded).await
    }

    pub async fn entered_background(&self) -> Result<(), EngineClosed> {
        self.send(EngineEvent::EnteredBackground).await
    }

    pub async fn entered_foreground(&self) -> Result<(), EngineClosed> {
        self.send(EngineEvent::EnteredForeground).await
    }

    /// Ask the engine task to exit. An active session is stopped and
    /// saved first.
    pub async fn shutdown(&self) -> Result<(), EngineClosed> {
        self.send(EngineEvent::Shutdown).await
    }

    /// Current engine phase
    pub fn phase(&self) -> Phase {
        *self.phase_rx.borrow()
    }

    /// Watch phase transitions as they happen
    pub fn subscribe(&self) -> watch::Receiver<Phase> {
        self.phase_rx.clone()
    }

    async fn send(&self, event: EngineEvent) -> Result<(), EngineClosed> {
        self.tx.send(event).await.map_err(|_| EngineClosed)
    }
}

/// Recording engine use case
pub struct RecordingEngine<C, R, P, N, S, K>
where
    C: CaptureDevice,
    R: InputRoutes,
    P: ResourceProbe,
    N: Notifier,
    S: SegmentStore + 'static,
    K: CompletionSink,
{
    cfg: EngineConfig,
    capture: C,
    routes: R,
    probe: P,
    notifier: N,
    store: Arc<S>,
    sink: K,

    rx: mpsc::Receiver<EngineEvent>,
    self_tx: mpsc::Sender<EngineEvent>,
    phase_tx: watch::Sender<Phase>,

    state: RecordingState,
    session: Option<RecordingSession>,
    pending: Option<PendingMerge>,
    classifier: InterruptionClassifier,
    checkpoint: CheckpointPolicy,
    limits: LimitMonitor,

    /// Bumped per session; stale merge completions carry an old value
    epoch: u64,
    backgrounded: bool,
    last_bytes: u64,
    stall_ticks: u32,
    quit_when_settled: bool,
}

impl<C, R, P, N, S, K> RecordingEngine<C, R, P, N, S, K>
where
    C: CaptureDevice + 'static,
    R: InputRoutes + 'static,
    P: ResourceProbe + 'static,
    N: Notifier + 'static,
    S: SegmentStore + 'static,
    K: CompletionSink + 'static,
{
    /// Spawn the engine task and return the handle that drives it.
    pub fn spawn(
        cfg: EngineConfig,
        capture: C,
        routes: R,
        probe: P,
        notifier: N,
        store: S,
        sink: K,
    ) -> EngineHandle {
        let (tx, rx) = mpsc::channel(64);
        let (phase_tx, phase_rx) = watch::channel(Phase::Idle);

        let engine = Self {
            classifier: InterruptionClassifier::new(cfg.short_call_threshold),
            checkpoint: CheckpointPolicy::new(&cfg),
            limits: LimitMonitor::new(cfg.clone()),
            cfg,
            capture,
            routes,
            probe,
            notifier,
            store: Arc::new(store),
            sink,
            rx,
            self_tx: tx.clone(),
            phase_tx,
            state: RecordingState::Idle,
            session: None,
            pending: None,
            epoch: 0,
            backgrounded: false,
            last_bytes: 0,
            stall_ticks: 0,
            quit_when_settled: false,
        };

        tokio::spawn(engine.run());

        EngineHandle { tx, phase_rx }
    }

    async fn run(mut self) {
        let start = Instant::now();
        let mut tick = interval_at(start + self.cfg.tick_interval, self.cfg.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut slow = interval_at(
            start + self.cfg.resource_poll_interval,
            self.cfg.resource_poll_interval,
        );
        slow.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let deadline = self.next_deadline();

            tokio::select! {
                biased;

                maybe_event = self.rx.recv() => {
                    match maybe_event {
                        Some(event) => self.handle_event(event).await,
                        None => break,
                    }
                }
                _ = wait_until(deadline) => {
                    self.on_deadline().await;
                }
                _ = tick.tick() => {
                    self.on_tick().await;
                }
                _ = slow.tick() => {
                    self.on_slow_tick().await;
                }
            }

            if self.quit_when_settled && !self.state.session_active() {
                break;
            }
        }
        debug!("engine task exiting");
    }

    /// The one instant the current state is waiting on, if any.
    fn next_deadline(&self) -> Option<Instant> {
        match &self.state {
            RecordingState::WaitingForUserDecision { deadline, .. } => Some(*deadline),
            RecordingState::WaitingForMicrophone { next_poll, .. } => Some(*next_poll),
            _ => None,
        }
    }

    async fn handle_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Start(options) => self.on_start(options).await,
            EngineEvent::Stop => self.on_stop().await,
            EngineEvent::Discard => self.on_discard().await,
            EngineEvent::Pause => self.on_pause().await,
            EngineEvent::Resume => self.on_resume_command().await,
            EngineEvent::Decision(decision) => self.on_decision(decision).await,
            EngineEvent::CallBegan => self.on_call_began().await,
            EngineEvent::CallEnded { resume_hint } => self.on_call_ended(resume_hint).await,
            EngineEvent::RouteChanged(change) => self.on_route_changed(change).await,
            EngineEvent::PreemptionBegan => self.on_preemption_began().await,
            EngineEvent::PreemptionEnded => self.on_preemption_ended().await,
            EngineEvent::EnteredBackground => {
                debug!("app entered background");
                self.backgrounded = true;
            }
            EngineEvent::EnteredForeground => self.on_foreground().await,
            EngineEvent::MergeFinished { epoch, result } => {
                self.on_merge_finished(epoch, result).await
            }
            EngineEvent::Shutdown => {
                self.quit_when_settled = true;
                if self.state.can_stop() {
                    self.begin_stop(StopCause::UserRequested).await;
                }
            }
        }
    }

    // ----- commands ------------------------------------------------------

    async fn on_start(&mut self, options: SessionOptions) {
        if !self.state.can_start() {
            warn!(phase = %self.state.phase(), "start ignored, session already in flight");
            return;
        }

        self.epoch += 1;
        self.classifier.reset();
        self.limits.reset();
        self.last_bytes = 0;
        self.stall_ticks = 0;
        self.pending = None;

        let stem = options
            .label
            .as_deref()
            .map(sanitize_label)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| {
                format!("journal-{}", chrono::Local::now().format("%Y%m%d-%H%M%S"))
            });
        let artifact = options.output_dir.join(format!("{}.wav", stem));

        // Make sure an input is selected before touching the device
        if self.routes.selected().is_none() {
            let available = match self.routes.available_inputs() {
                Ok(list) => list,
                Err(e) => {
                    warn!(error = %e, "input enumeration failed");
                    Vec::new()
                }
            };
            match choose_input(None, &available) {
                Some(port) => self.routes.select(port),
                None => {
                    self.set_state(RecordingState::Error {
                        detail: "no usable input device".to_string(),
                    });
                    return;
                }
            }
        }

        let now = Instant::now();
        let mut session =
            RecordingSession::new(artifact.clone(), options.location, now, SystemTime::now());

        let first = OpenSegment {
            index: 0,
            path: segment_path(&artifact, 0),
            opened_at: SystemTime::now(),
        };
        let path = first.path.clone();
        if let Err(e) = session.begin_segment(first) {
            // Fresh session, cannot happen
            warn!(error = %e, "segment bookkeeping failure at start");
        }

        match self.capture.open_segment(&path).await {
            Ok(()) => {
                info!(artifact = %artifact.display(), "session started");
                self.session = Some(session);
                self.set_state(RecordingState::Recording);
            }
            Err(e) => {
                warn!(error = %e, "could not open capture at session start");
                self.store.discard_files(&[path]);
                self.set_state(RecordingState::Error {
                    detail: format!("could not start capture: {}", e),
                });
            }
        }
    }

    async fn on_stop(&mut self) {
        if !self.state.can_stop() {
            debug!(phase = %self.state.phase(), "stop ignored");
            return;
        }
        self.begin_stop(StopCause::UserRequested).await;
    }

    async fn on_discard(&mut self) {
        if !self.state.can_stop() {
            debug!(phase = %self.state.phase(), "discard ignored");
            return;
        }
        info!("session discarded by user");
        let _ = self.capture.shutdown().await;
        if let Some(session) = self.session.take() {
            let removed = self.store.discard_files(&session.all_paths());
            debug!(files = removed, "segment files deleted");
        }
        self.classifier.reset();
        self.set_state(RecordingState::Discarded);
    }

    async fn on_pause(&mut self) {
        if self.state.phase() != Phase::Recording {
            debug!(phase = %self.state.phase(), "pause ignored");
            return;
        }
        match self.capture.pause().await {
            Ok(()) => self.set_state(RecordingState::Paused),
            Err(e) => warn!(error = %e, "pause failed"),
        }
    }

    async fn on_resume_command(&mut self) {
        if self.state.phase() != Phase::Paused {
            debug!(phase = %self.state.phase(), "resume ignored");
            return;
        }
        match self.capture.resume().await {
            Ok(()) => {
                self.stall_ticks = 0;
                self.set_state(RecordingState::Recording);
            }
            Err(e) => {
                // The stream died while paused; go the full reopen route
                warn!(error = %e, "in-place resume failed, reopening capture");
                if !self.resume_capture(2, "user resume").await {
                    self.fail_session("could not resume capture".to_string()).await;
                }
            }
        }
    }

    async fn on_decision(&mut self, decision: UserDecision) {
        if self.state.phase() != Phase::WaitingForUserDecision {
            info!(?decision, phase = %self.state.phase(), "ignoring decision outside prompt window");
            return;
        }
        match decision {
            UserDecision::Resume => {
                self.resume_after_resolution(
                    "user chose resume",
                    "could not resume after interruption",
                )
                .await;
            }
            UserDecision::Discard => {
                self.on_discard_decision().await;
            }
        }
    }

    async fn on_discard_decision(&mut self) {
        info!("user chose discard after interruption");
        let _ = self.capture.shutdown().await;
        if let Some(session) = self.session.take() {
            let removed = self.store.discard_files(&session.all_paths());
            debug!(files = removed, "segment files deleted");
        }
        self.classifier.reset();
        self.set_state(RecordingState::Discarded);
    }

    // ----- telephony -----------------------------------------------------

    async fn on_call_began(&mut self) {
        // Back-to-back call while an earlier call-end was parked for
        // the foreground: un-park, the episode keeps running.
        if let RecordingState::Interrupted {
            reason: InterruptionKind::PhoneCall,
            call_ended: call_ended @ Some(_),
            ..
        } = &mut self.state
        {
            debug!("call resumed before the parked end was resolved");
            *call_ended = None;
            return;
        }

        let ctx = self.classify_context();
        match self.classifier.on_call_began(Instant::now(), ctx) {
            Verdict::Begin(kind) => {
                info!(%kind, "interruption began");
                if let Err(e) = self.capture.pause().await {
                    warn!(error = %e, "pause on call begin failed");
                }
                self.set_state(RecordingState::Interrupted {
                    reason: kind,
                    began_at: Instant::now(),
                    call_ended: None,
                });
            }
            verdict => debug!(?verdict, "call begin absorbed"),
        }
    }

    async fn on_call_ended(&mut self, resume_hint: Option<bool>) {
        let now = Instant::now();

        if self.backgrounded {
            if let RecordingState::Interrupted {
                reason: InterruptionKind::PhoneCall,
                call_ended,
                ..
            } = &mut self.state
            {
                // Defer: resuming capture while backgrounded would be
                // killed by the platform. Resolved on foreground.
                info!("call ended while backgrounded, resolution deferred");
                *call_ended = Some(now);
                return;
            }
        }

        match self.classifier.on_call_ended(now, resume_hint) {
            Some(resolution) => self.act_on_call_resolution(resolution).await,
            None => debug!("call end without an active call episode"),
        }
    }

    async fn act_on_call_resolution(&mut self, resolution: CallResolution) {
        info!(
            call_secs = resolution.call_duration.as_secs(),
            hint = ?resolution.hint,
            "call resolved"
        );
        match resolution.hint {
            ResolutionHint::AutoResume => {
                self.resume_after_resolution(
                    "short call ended",
                    "could not resume after phone call",
                )
                .await;
            }
            ResolutionHint::AskUser => {
                let deadline = Instant::now() + self.cfg.decision_timeout;
                let minutes = resolution.call_duration.as_secs() / 60;
                let seconds = resolution.call_duration.as_secs() % 60;
                let _ = self
                    .notifier
                    .notify(
                        &Notification::new(
                            "resume-decision",
                            "Resume recording?",
                            format!(
                                "A {}m{}s call interrupted your recording. Resume or discard?",
                                minutes, seconds
                            ),
                        )
                        .icon(NotificationIcon::Recording)
                        .critical(),
                    )
                    .await;
                self.set_state(RecordingState::WaitingForUserDecision {
                    cause_duration: resolution.call_duration,
                    deadline,
                });
            }
            ResolutionHint::ForceStop => {
                self.begin_stop(StopCause::UserRequested).await;
            }
        }
    }

    // ----- devices and OS ------------------------------------------------

    async fn on_route_changed(&mut self, change: RouteChange) {
        let now = Instant::now();
        let current = self.routes.selected();
        let ctx = ClassifyContext {
            capturing: self.state.phase() == Phase::Recording,
            current_input: current.as_ref(),
        };
        let verdict = self.classifier.on_route_changed(&change, now, ctx);

        match verdict {
            Verdict::Begin(kind) => {
                info!(%kind, "interruption began");
                self.enter_input_wait(kind, now).await;
            }
            Verdict::InputRefresh => {
                let selected = self.routes.selected();
                if let Some(best) = choose_input(selected.as_ref(), &change.available) {
                    debug!(input = %best, "default input updated");
                    self.routes.select(best);
                }
            }
            verdict => debug!(?verdict, "route change absorbed"),
        }

        // A device appearing while we wait for one ends the wait early
        if matches!(self.state, RecordingState::WaitingForMicrophone { .. })
            && !change.available.is_empty()
        {
            self.poll_for_input(now).await;
        }
    }

    async fn on_preemption_began(&mut self) {
        let now = Instant::now();
        let ctx = self.classify_context();
        match self.classifier.on_preemption(now, ctx) {
            Verdict::Begin(kind) => {
                info!(%kind, "interruption began");
                self.enter_input_wait(kind, now).await;
            }
            verdict => debug!(?verdict, "preemption absorbed"),
        }
    }

    async fn on_preemption_ended(&mut self) {
        match &self.state {
            RecordingState::WaitingForMicrophone {
                cause: InterruptionKind::SystemPreemption,
                ..
            } => {
                debug!("preemption lifted, probing for capture");
                self.poll_for_input(Instant::now()).await;
            }
            _ => debug!("preemption end absorbed"),
        }
    }

    async fn on_foreground(&mut self) {
        debug!("app entered foreground");
        self.backgrounded = false;

        // Act on a call end that was parked while backgrounded
        let parked = match &self.state {
            RecordingState::Interrupted {
                reason: InterruptionKind::PhoneCall,
                call_ended: Some(ended),
                ..
            } => Some(*ended),
            _ => None,
        };
        if let Some(ended) = parked {
            if let Some(resolution) = self.classifier.on_call_ended(ended, None) {
                self.act_on_call_resolution(resolution).await;
            }
        }
    }

    /// Seal what we have and poll for an input to come back.
    async fn enter_input_wait(&mut self, cause: InterruptionKind, now: Instant) {
        self.seal_open_segment().await;
        let _ = self.capture.shutdown().await;
        let _ = self
            .notifier
            .notify(
                &Notification::new(
                    "input-lost",
                    "Recording interrupted",
                    format!("{}; watching for the microphone to return", cause),
                )
                .icon(NotificationIcon::Warning),
            )
            .await;
        self.set_state(RecordingState::WaitingForMicrophone {
            cause,
            since: now,
            next_poll: now + self.cfg.mic_poll_interval,
        });
    }

    /// One reconnection probe while in the microphone wait.
    async fn poll_for_input(&mut self, now: Instant) {
        let RecordingState::WaitingForMicrophone { cause, since, .. } = &self.state else {
            return;
        };
        let (cause, since) = (*cause, *since);

        if now.saturating_duration_since(since) >= self.cfg.mic_wait_limit {
            self.fail_session(format!(
                "{} and no input returned within {}s",
                cause,
                self.cfg.mic_wait_limit.as_secs()
            ))
            .await;
            return;
        }

        let available = match self.routes.available_inputs() {
            Ok(list) => list,
            Err(e) => {
                debug!(error = %e, "input enumeration failed during wait");
                Vec::new()
            }
        };

        let selected = self.routes.selected();
        if let Some(port) = choose_input(selected.as_ref(), &available) {
            let port = port.clone();
            info!(input = %port, "input available again");
            self.routes.select(&port);
            self.classifier.resolve_active(now, ResolutionHint::AutoResume);
            self.resume_after_resolution(
                "input returned",
                "capture would not restart on the returned input",
            )
            .await;
        } else {
            // Nothing usable yet, rearm the poll
            self.set_state(RecordingState::WaitingForMicrophone {
                cause,
                since,
                next_poll: now + self.cfg.mic_poll_interval,
            });
        }
    }

    // ----- deadlines and ticks -------------------------------------------

    async fn on_deadline(&mut self) {
        match self.state {
            RecordingState::WaitingForUserDecision { .. } => {
                info!("no answer to resume prompt, stopping and saving");
                self.begin_stop(StopCause::DecisionTimeout).await;
            }
            RecordingState::WaitingForMicrophone { .. } => {
                self.poll_for_input(Instant::now()).await;
            }
            _ => {}
        }
    }

    async fn on_tick(&mut self) {
        let now = Instant::now();

        if self.state.phase() == Phase::Recording {
            self.check_stall().await;
        }
        if self.state.phase() == Phase::Recording {
            self.run_checkpoint(now).await;
        }

        // Duration policy runs on wall elapsed across every live state
        if self.state.session_active() && self.state.phase() != Phase::Merging {
            let elapsed = match &self.session {
                Some(session) => session.elapsed(now),
                None => return,
            };
            match self.limits.check_duration(elapsed) {
                LimitCheck::Warn(warning) => {
                    info!(%warning, "limit warning");
                    let _ = self
                        .notifier
                        .notify(
                            &Notification::new("duration-cap", "Recording limit near", warning.to_string())
                                .icon(NotificationIcon::Warning),
                        )
                        .await;
                }
                LimitCheck::Stop(cause) => {
                    self.forced_stop(cause).await;
                    return;
                }
                LimitCheck::Ok => {}
            }

            if self.backgrounded {
                match self.limits.check_budget(self.probe.background_budget()) {
                    LimitCheck::Warn(warning) => {
                        info!(%warning, "limit warning");
                        let _ = self
                            .notifier
                            .notify(
                                &Notification::new("budget-low", "Background time low", warning.to_string())
                                    .icon(NotificationIcon::Warning),
                            )
                            .await;
                    }
                    LimitCheck::Stop(cause) => {
                        if self.classifier.active().is_none() {
                            self.classifier
                                .begin_episode(InterruptionKind::BackgroundBudgetExpiring, now);
                            self.classifier.resolve_active(now, ResolutionHint::ForceStop);
                        }
                        self.forced_stop(cause).await;
                    }
                    LimitCheck::Ok => {}
                }
            }
        }
    }

    async fn on_slow_tick(&mut self) {
        if !self.state.session_active() || self.state.phase() == Phase::Merging {
            return;
        }
        let Some(session) = &self.session else { return };
        let dir = session
            .artifact_path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| std::path::PathBuf::from("."));

        match self.limits.check_storage(self.probe.free_storage_bytes(&dir)) {
            LimitCheck::Warn(warning) => {
                info!(%warning, "limit warning");
                let _ = self
                    .notifier
                    .notify(
                        &Notification::new("storage-low", "Storage low", warning.to_string())
                            .icon(NotificationIcon::Warning),
                    )
                    .await;
            }
            LimitCheck::Stop(cause) => {
                self.forced_stop(cause).await;
                return;
            }
            LimitCheck::Ok => {}
        }

        match self.limits.check_battery(self.probe.battery_percent()) {
            LimitCheck::Warn(warning) => {
                info!(%warning, "limit warning");
                let _ = self
                    .notifier
                    .notify(
                        &Notification::new("battery-low", "Battery low", warning.to_string())
                            .icon(NotificationIcon::Warning),
                    )
                    .await;
            }
            LimitCheck::Stop(cause) => self.forced_stop(cause).await,
            LimitCheck::Ok => {}
        }
    }

    /// Watch the open segment's byte counter. Recording never pauses
    /// the stream, so a flat counter across enough ticks means the
    /// writer is stuck or the stream itself has died.
    async fn check_stall(&mut self) {
        let bytes = self.capture.bytes_written();
        if bytes == self.last_bytes {
            self.stall_ticks += 1;
        } else {
            self.stall_ticks = 0;
        }
        self.last_bytes = bytes;

        if self.stall_ticks < self.cfg.stall_tick_limit {
            return;
        }

        warn!(ticks = self.stall_ticks, "capture stalled, restarting with a fresh segment");
        self.stall_ticks = 0;
        if !self.resume_capture(1, "stall recovery").await {
            self.fail_session("capture stalled and could not be restarted".to_string())
                .await;
        }
    }

    async fn run_checkpoint(&mut self, now: Instant) {
        let Some(session) = &mut self.session else { return };
        let since_last = now.saturating_duration_since(session.last_checkpoint);
        let due = self.checkpoint.due(since_last, self.capture.level_dbfs());
        if due == FlushDue::No {
            return;
        }
        match self.capture.flush().await {
            Ok(()) => {
                debug!(kind = ?due, secs = since_last.as_secs(), "checkpoint flushed");
                session.touch_checkpoint(now);
            }
            Err(e) => warn!(error = %e, "checkpoint flush failed"),
        }
    }

    // ----- stop, merge, salvage ------------------------------------------

    async fn forced_stop(&mut self, cause: StopCause) {
        warn!(%cause, "forced stop");
        let _ = self
            .notifier
            .notify(
                &Notification::new("forced-stop", "Recording stopped", cause.to_string())
                    .icon(NotificationIcon::Warning),
            )
            .await;
        self.begin_stop(cause).await;
    }

    async fn begin_stop(&mut self, cause: StopCause) {
        info!(%cause, "stopping session");
        self.seal_open_segment().await;
        let _ = self.capture.shutdown().await;
        // A late call-end for the concluded episode must find nothing
        self.classifier.reset();

        let Some(session) = &self.session else {
            self.set_state(RecordingState::Idle);
            return;
        };

        if session.sealed().is_empty() {
            let detail = "no decodable audio was captured".to_string();
            let paths = session.all_paths();
            self.store.discard_files(&paths);
            self.session = None;
            self.set_state(RecordingState::Error { detail });
            return;
        }

        let dest = session.artifact_path.clone();
        self.launch_merge(MergeGoal::Complete { cause }, dest).await;
    }

    async fn fail_session(&mut self, detail: String) {
        warn!(detail = %detail, "session failed");
        self.seal_open_segment().await;
        let _ = self.capture.shutdown().await;
        self.classifier.reset();

        let Some(session) = &self.session else {
            self.set_state(RecordingState::Error { detail });
            return;
        };

        if session.sealed().is_empty() {
            let paths = session.all_paths();
            self.store.discard_files(&paths);
            self.session = None;
            let _ = self
                .notifier
                .notify(
                    &Notification::new("failed", "Recording failed", detail.clone())
                        .icon(NotificationIcon::Error),
                )
                .await;
            self.set_state(RecordingState::Error { detail });
            return;
        }

        let dest = recovered_path(&session.artifact_path);
        self.launch_merge(MergeGoal::Salvage { detail }, dest).await;
    }

    /// Hand the sealed segments to a blocking merge task. The outcome
    /// comes back through the event channel tagged with the epoch.
    async fn launch_merge(&mut self, goal: MergeGoal, dest: std::path::PathBuf) {
        let Some(session) = self.session.take() else {
            return;
        };
        let segments: Vec<SealedSegment> = session.sealed().to_vec();
        self.pending = Some(PendingMerge {
            goal,
            started_wall: session.started_wall,
            location: session.location,
            segment_paths: segments.iter().map(|s| s.path.clone()).collect(),
        });

        let store = Arc::clone(&self.store);
        let tx = self.self_tx.clone();
        let epoch = self.epoch;
        self.set_state(RecordingState::Merging);

        tokio::spawn(async move {
            let result =
                tokio::task::spawn_blocking(move || store.merge(&segments, &dest)).await;
            let result = match result {
                Ok(outcome) => outcome,
                Err(e) => Err(MergeError::Io(format!("merge task panicked: {}", e))),
            };
            let _ = tx.send(EngineEvent::MergeFinished { epoch, result }).await;
        });
    }

    async fn on_merge_finished(
        &mut self,
        epoch: u64,
        result: Result<super::ports::MergeOutcome, MergeError>,
    ) {
        if epoch != self.epoch || self.state.phase() != Phase::Merging {
            debug!(epoch, current = self.epoch, "stale merge completion dropped");
            return;
        }
        let Some(pending) = self.pending.take() else {
            warn!("merge finished with no pending bookkeeping");
            self.set_state(RecordingState::Idle);
            return;
        };

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(error = %e, segments = pending.segment_paths.len(),
                      "merge failed, segment files kept for manual recovery");
                let _ = self
                    .notifier
                    .notify(
                        &Notification::new(
                            "failed",
                            "Recording not merged",
                            format!("{}. Segment files were kept.", e),
                        )
                        .icon(NotificationIcon::Error),
                    )
                    .await;
                self.set_state(RecordingState::Error {
                    detail: format!("merge failed: {}", e),
                });
                return;
            }
        };

        if outcome.segments_skipped > 0 {
            warn!(skipped = outcome.segments_skipped, "undecodable segments were skipped");
        }

        let (salvaged, ended_by) = match &pending.goal {
            MergeGoal::Complete { cause } => (false, cause.to_string()),
            MergeGoal::Salvage { detail } => {
                if !self
                    .cfg
                    .meets_salvage_floor(outcome.file_size_bytes, outcome.duration)
                {
                    info!(
                        bytes = outcome.file_size_bytes,
                        ms = outcome.duration.as_millis() as u64,
                        "recovered audio below the salvage floor, discarding"
                    );
                    self.store.discard_files(&[outcome.artifact_path.clone()]);
                    self.set_state(RecordingState::Error {
                        detail: detail.clone(),
                    });
                    return;
                }
                (true, detail.clone())
            }
        };

        let recording = CompletedRecording {
            artifact_path: outcome.artifact_path,
            duration: outcome.duration,
            file_size_bytes: outcome.file_size_bytes,
            started_at: pending.started_wall,
            location: pending.location,
            salvaged,
        };

        if let Err(e) = self.sink.recording_completed(&recording).await {
            warn!(error = %e, "completion handoff failed, artifact is safe on disk");
        }

        let (id, title) = if salvaged {
            ("salvaged", "Recording recovered")
        } else {
            ("saved", "Recording saved")
        };
        let _ = self
            .notifier
            .notify(
                &Notification::new(
                    id,
                    title,
                    format!(
                        "{} ({})",
                        recording.file_name(),
                        format_clock(recording.duration)
                    ),
                )
                .icon(NotificationIcon::Success),
            )
            .await;

        info!(
            artifact = %recording.artifact_path.display(),
            secs = recording.duration.as_secs(),
            salvaged,
            ended_by = %ended_by,
            "session complete"
        );
        self.set_state(RecordingState::Completed);
    }

    // ----- capture plumbing ----------------------------------------------

    /// Seal the open segment if there is one, falling back to probing
    /// the file on disk when the device cannot report stats.
    async fn seal_open_segment(&mut self) {
        let Some(session) = &mut self.session else { return };
        let Some(open) = session.take_open() else { return };

        let stats = match self.capture.seal_segment().await {
            Ok(stats) => Some(stats),
            Err(e) => {
                warn!(error = %e, segment = %open.path.display(), "seal failed, probing file");
                self.store.probe(&open.path)
            }
        };

        match stats {
            Some(stats) => {
                debug!(
                    segment = open.index,
                    bytes = stats.size_bytes,
                    ms = stats.duration.as_millis() as u64,
                    "segment sealed"
                );
                session.push_sealed(SealedSegment {
                    index: open.index,
                    path: open.path,
                    size_bytes: stats.size_bytes,
                    duration: stats.duration,
                    opened_at: open.opened_at,
                    sealed_at: SystemTime::now(),
                });
            }
            None => {
                warn!(segment = %open.path.display(), "segment unreadable, dropping it");
                self.store.discard_files(&[open.path]);
            }
        }
    }

    /// Seal the current segment and open a fresh one on the selected
    /// input. Each attempt gets a settle delay plus a grace window
    /// before the stream is trusted.
    async fn resume_capture(&mut self, attempts: u32, via: &str) -> bool {
        self.seal_open_segment().await;

        let Some(session) = &mut self.session else {
            return false;
        };
        let index = session.next_index();
        let path = segment_path(&session.artifact_path, index);

        for attempt in 1..=attempts {
            match self.capture.open_segment(&path).await {
                Ok(()) => {
                    tokio::time::sleep(self.cfg.resume_settle).await;
                    tokio::time::sleep(self.cfg.resume_grace).await;
                    if self.capture.is_capturing() {
                        let Some(session) = &mut self.session else { return false };
                        let _ = session.begin_segment(OpenSegment {
                            index,
                            path: path.clone(),
                            opened_at: SystemTime::now(),
                        });
                        self.last_bytes = 0;
                        self.stall_ticks = 0;
                        info!(via, segment = index, attempt, "capture resumed");
                        self.set_state(RecordingState::Recording);
                        return true;
                    }
                    debug!(attempt, "stream opened but produced no capture");
                    let _ = self.capture.shutdown().await;
                }
                Err(e) => {
                    debug!(attempt, error = %e, "capture open failed");
                }
            }
        }
        warn!(via, attempts, "capture would not resume");
        // The never-begun segment may have left a partial file behind
        self.store.discard_files(&[path]);
        false
    }

    /// Restart capture for a resolved interruption; any queued episode
    /// takes over afterwards, or stands in for a failed resume. A
    /// microphone that vanished mid-call gets its poll window instead
    /// of failing the session outright.
    async fn resume_after_resolution(&mut self, via: &str, fail_detail: &str) {
        if self.resume_capture(2, via).await || self.classifier.has_queued() {
            self.handle_queued_interruption().await;
        } else {
            self.fail_session(fail_detail.to_string()).await;
        }
    }

    /// After one interruption resolves, a queued one takes over.
    async fn handle_queued_interruption(&mut self) {
        let Some(kind) = self.classifier.take_queued() else {
            return;
        };
        info!(%kind, "queued interruption now active");
        let now = Instant::now();
        self.classifier.begin_episode(kind, now);
        match kind {
            InterruptionKind::PhoneCall => {
                // A queued call means it is still ongoing
                let _ = self.capture.pause().await;
                self.set_state(RecordingState::Interrupted {
                    reason: kind,
                    began_at: now,
                    call_ended: None,
                });
            }
            InterruptionKind::MicrophoneLost | InterruptionKind::SystemPreemption => {
                self.enter_input_wait(kind, now).await;
            }
            InterruptionKind::BackgroundBudgetExpiring => {
                self.begin_stop(StopCause::BudgetExpired).await;
            }
        }
    }

    fn classify_context(&self) -> ClassifyContext<'static> {
        ClassifyContext {
            capturing: self.state.phase() == Phase::Recording,
            current_input: None,
        }
    }

    fn set_state(&mut self, next: RecordingState) {
        let from = self.state.phase();
        let to = next.phase();
        if from != to {
            info!(%from, %to, "state transition");
        }
        self.state = next;
        if to.is_terminal() {
            self.session = None;
            self.pending = None;
        }
        self.phase_tx.send_replace(to);
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending::<()>().await,
    }
}

fn sanitize_label(label: &str) -> String {
    label
        .trim()
        .chars()
        .map(|c| if c == '/' || c == '\\' || c == '\0' { '-' } else { c })
        .collect()
}

fn format_clock(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    format!("{}:{:02}", secs / 60, secs % 60)
}
