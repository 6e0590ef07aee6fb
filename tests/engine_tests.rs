//! End-to-end engine tests over scripted ports.
//!
//! Every test runs on the paused tokio clock, so call durations, poll
//! cadences and decision deadlines are driven with `advance` instead of
//! real waiting. Merges run against the real WAV store in a tempdir;
//! the capture mock writes genuine WAV segments so the artifacts the
//! tests assert on are the artifacts a user would get.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration as StdDuration, SystemTime};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::watch;
use tokio::time::{advance, sleep, timeout};

use continuo::application::ports::{
    CaptureDevice, CaptureError, CompletionSink, InputRoutes, Notification, NotificationError,
    Notifier, ResourceProbe, RouteError, SealedStats, SinkError,
};
use continuo::application::{EngineHandle, RecordingEngine, RouteChange};
use continuo::domain::{
    CompletedRecording, EngineConfig, InputKind, InputPort, Phase, SessionOptions, UserDecision,
};
use continuo::infrastructure::capture::segment_spec;
use continuo::infrastructure::WavSegmentStore;

const SECOND: StdDuration = StdDuration::from_secs(1);

fn builtin() -> InputPort {
    InputPort::new("Built-in Microphone", InputKind::BuiltIn)
}

fn headset() -> InputPort {
    InputPort::new("USB Headset", InputKind::Peripheral)
}

/// Write a decodable segment in the capture format.
fn write_wav(path: &Path, samples: u32) {
    let mut writer = hound::WavWriter::create(path, segment_spec()).unwrap();
    for i in 0..samples {
        let sample = ((i % 80) as i16 - 40) * 100;
        writer.write_sample(sample).unwrap();
    }
    writer.finalize().unwrap();
}

// ----- scripted ports ----------------------------------------------------

/// Capture device whose failures and output are scripted per test.
///
/// Opening a segment writes a real WAV file so the store can merge it;
/// the byte counter grows on every read unless frozen, which is what
/// the stall detector keys on.
#[derive(Clone)]
struct ScriptedCapture {
    inner: Arc<CaptureState>,
}

struct CaptureState {
    open: Mutex<Option<PathBuf>>,
    opened: Mutex<Vec<PathBuf>>,
    sealed: Mutex<Vec<PathBuf>>,
    capturing: AtomicBool,
    bytes: AtomicU64,
    frozen: AtomicBool,
    flushes: AtomicU32,
    fail_opens: AtomicU32,
    fail_resume: AtomicBool,
    fail_seal: AtomicBool,
    write_files: AtomicBool,
    samples_per_segment: AtomicU32,
    level: Mutex<f32>,
}

impl ScriptedCapture {
    fn new() -> Self {
        Self {
            inner: Arc::new(CaptureState {
                open: Mutex::new(None),
                opened: Mutex::new(Vec::new()),
                sealed: Mutex::new(Vec::new()),
                capturing: AtomicBool::new(false),
                bytes: AtomicU64::new(0),
                frozen: AtomicBool::new(false),
                flushes: AtomicU32::new(0),
                fail_opens: AtomicU32::new(0),
                fail_resume: AtomicBool::new(false),
                fail_seal: AtomicBool::new(false),
                write_files: AtomicBool::new(true),
                // Two seconds per segment, comfortably above the salvage floor
                samples_per_segment: AtomicU32::new(32_000),
                level: Mutex::new(-20.0),
            }),
        }
    }

    fn opened(&self) -> Vec<PathBuf> {
        self.inner.opened.lock().unwrap().clone()
    }

    fn sealed_count(&self) -> usize {
        self.inner.sealed.lock().unwrap().len()
    }

    fn flushes(&self) -> u32 {
        self.inner.flushes.load(Ordering::SeqCst)
    }

    fn set_frozen(&self, frozen: bool) {
        self.inner.frozen.store(frozen, Ordering::SeqCst);
    }

    /// Drop the live flag without closing the segment, like a stream
    /// dying in the driver callback.
    fn kill_stream(&self) {
        self.inner.capturing.store(false, Ordering::SeqCst);
    }

    fn fail_next_opens(&self, count: u32) {
        self.inner.fail_opens.store(count, Ordering::SeqCst);
    }

    fn set_fail_resume(&self, fail: bool) {
        self.inner.fail_resume.store(fail, Ordering::SeqCst);
    }

    fn set_fail_seal(&self, fail: bool) {
        self.inner.fail_seal.store(fail, Ordering::SeqCst);
    }

    fn set_write_files(&self, write: bool) {
        self.inner.write_files.store(write, Ordering::SeqCst);
    }

    fn set_samples_per_segment(&self, samples: u32) {
        self.inner.samples_per_segment.store(samples, Ordering::SeqCst);
    }

    fn set_level(&self, dbfs: f32) {
        *self.inner.level.lock().unwrap() = dbfs;
    }
}

#[async_trait]
impl CaptureDevice for ScriptedCapture {
    async fn open_segment(&self, path: &Path) -> Result<(), CaptureError> {
        if self.inner.open.lock().unwrap().is_some() {
            return Err(CaptureError::SegmentAlreadyOpen);
        }
        if self.inner.fail_opens.load(Ordering::SeqCst) > 0 {
            self.inner.fail_opens.fetch_sub(1, Ordering::SeqCst);
            return Err(CaptureError::OpenFailed("scripted open failure".into()));
        }
        if self.inner.write_files.load(Ordering::SeqCst) {
            write_wav(path, self.inner.samples_per_segment.load(Ordering::SeqCst));
        }
        *self.inner.open.lock().unwrap() = Some(path.to_path_buf());
        self.inner.opened.lock().unwrap().push(path.to_path_buf());
        self.inner.capturing.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn seal_segment(&self) -> Result<SealedStats, CaptureError> {
        let Some(path) = self.inner.open.lock().unwrap().take() else {
            return Err(CaptureError::NoOpenSegment);
        };
        self.inner.capturing.store(false, Ordering::SeqCst);
        if self.inner.fail_seal.load(Ordering::SeqCst) {
            return Err(CaptureError::SealFailed("scripted seal failure".into()));
        }
        let size_bytes = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        let samples = self.inner.samples_per_segment.load(Ordering::SeqCst);
        self.inner.sealed.lock().unwrap().push(path);
        Ok(SealedStats {
            size_bytes,
            duration: StdDuration::from_secs_f64(f64::from(samples) / 16_000.0),
        })
    }

    async fn pause(&self) -> Result<(), CaptureError> {
        self.inner.capturing.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn resume(&self) -> Result<(), CaptureError> {
        if self.inner.fail_resume.load(Ordering::SeqCst) {
            return Err(CaptureError::StreamFailed("scripted stream death".into()));
        }
        if self.inner.open.lock().unwrap().is_none() {
            return Err(CaptureError::NoOpenSegment);
        }
        self.inner.capturing.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn flush(&self) -> Result<(), CaptureError> {
        self.inner.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), CaptureError> {
        self.inner.open.lock().unwrap().take();
        self.inner.capturing.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn bytes_written(&self) -> u64 {
        if self.inner.frozen.load(Ordering::SeqCst) {
            return self.inner.bytes.load(Ordering::SeqCst);
        }
        self.inner.bytes.fetch_add(3200, Ordering::SeqCst) + 3200
    }

    fn level_dbfs(&self) -> f32 {
        *self.inner.level.lock().unwrap()
    }

    fn is_capturing(&self) -> bool {
        self.inner.capturing.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Default)]
struct ScriptedRoutes {
    inner: Arc<RoutesState>,
}

#[derive(Default)]
struct RoutesState {
    available: Mutex<Vec<InputPort>>,
    selected: Mutex<Option<InputPort>>,
}

impl ScriptedRoutes {
    fn with_inputs(ports: Vec<InputPort>) -> Self {
        let routes = Self::default();
        *routes.inner.available.lock().unwrap() = ports;
        routes
    }

    fn set_available(&self, ports: Vec<InputPort>) {
        *self.inner.available.lock().unwrap() = ports;
    }

    fn selected_port(&self) -> Option<InputPort> {
        self.inner.selected.lock().unwrap().clone()
    }
}

impl InputRoutes for ScriptedRoutes {
    fn available_inputs(&self) -> Result<Vec<InputPort>, RouteError> {
        Ok(self.inner.available.lock().unwrap().clone())
    }

    fn selected(&self) -> Option<InputPort> {
        self.inner.selected.lock().unwrap().clone()
    }

    fn select(&self, port: &InputPort) {
        *self.inner.selected.lock().unwrap() = Some(port.clone());
    }
}

#[derive(Clone, Default)]
struct ScriptedProbe {
    inner: Arc<ProbeState>,
}

#[derive(Default)]
struct ProbeState {
    free_bytes: Mutex<Option<u64>>,
    battery: Mutex<Option<u8>>,
    budget: Mutex<Option<StdDuration>>,
}

impl ScriptedProbe {
    fn set_free_bytes(&self, free: Option<u64>) {
        *self.inner.free_bytes.lock().unwrap() = free;
    }

    fn set_battery(&self, percent: Option<u8>) {
        *self.inner.battery.lock().unwrap() = percent;
    }

    fn set_budget(&self, remaining: Option<StdDuration>) {
        *self.inner.budget.lock().unwrap() = remaining;
    }
}

impl ResourceProbe for ScriptedProbe {
    fn free_storage_bytes(&self, _path: &Path) -> Option<u64> {
        *self.inner.free_bytes.lock().unwrap()
    }

    fn battery_percent(&self) -> Option<u8> {
        *self.inner.battery.lock().unwrap()
    }

    fn background_budget(&self) -> Option<StdDuration> {
        *self.inner.budget.lock().unwrap()
    }
}

/// Records every notification the engine sends, in order.
#[derive(Clone, Default)]
struct NotificationLog {
    sent: Arc<Mutex<Vec<(&'static str, String)>>>,
}

impl NotificationLog {
    fn ids(&self) -> Vec<&'static str> {
        self.sent.lock().unwrap().iter().map(|(id, _)| *id).collect()
    }

    fn count(&self, id: &str) -> usize {
        self.sent.lock().unwrap().iter().filter(|(i, _)| *i == id).count()
    }

    fn body_of(&self, id: &str) -> Option<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .find(|(i, _)| *i == id)
            .map(|(_, body)| body.clone())
    }
}

#[async_trait]
impl Notifier for NotificationLog {
    async fn notify(&self, notification: &Notification) -> Result<(), NotificationError> {
        self.sent
            .lock()
            .unwrap()
            .push((notification.id, notification.body.clone()));
        Ok(())
    }
}

#[derive(Clone, Default)]
struct CompletionLog {
    completed: Arc<Mutex<Vec<CompletedRecording>>>,
}

impl CompletionLog {
    fn all(&self) -> Vec<CompletedRecording> {
        self.completed.lock().unwrap().clone()
    }

    fn last(&self) -> Option<CompletedRecording> {
        self.completed.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl CompletionSink for CompletionLog {
    async fn recording_completed(&self, recording: &CompletedRecording) -> Result<(), SinkError> {
        self.completed.lock().unwrap().push(recording.clone());
        Ok(())
    }
}

// ----- harness -----------------------------------------------------------

struct Harness {
    dir: TempDir,
    capture: ScriptedCapture,
    routes: ScriptedRoutes,
    probe: ScriptedProbe,
    notifier: NotificationLog,
    sink: CompletionLog,
    handle: EngineHandle,
    phases: watch::Receiver<Phase>,
}

impl Harness {
    fn new() -> Self {
        Self::build(EngineConfig::default(), vec![builtin()])
    }

    fn with_inputs(ports: Vec<InputPort>) -> Self {
        Self::build(EngineConfig::default(), ports)
    }

    fn with_config(cfg: EngineConfig) -> Self {
        Self::build(cfg, vec![builtin()])
    }

    fn build(cfg: EngineConfig, ports: Vec<InputPort>) -> Self {
        let dir = TempDir::new().unwrap();
        let capture = ScriptedCapture::new();
        let routes = ScriptedRoutes::with_inputs(ports);
        let probe = ScriptedProbe::default();
        let notifier = NotificationLog::default();
        let sink = CompletionLog::default();
        let handle = RecordingEngine::spawn(
            cfg,
            capture.clone(),
            routes.clone(),
            probe.clone(),
            notifier.clone(),
            WavSegmentStore::new(),
            sink.clone(),
        );
        let phases = handle.subscribe();
        Self {
            dir,
            capture,
            routes,
            probe,
            notifier,
            sink,
            handle,
            phases,
        }
    }

    async fn send_start(&self, label: &str) {
        self.handle
            .start(SessionOptions {
                output_dir: self.dir.path().to_path_buf(),
                label: Some(label.to_string()),
                location: None,
            })
            .await
            .unwrap();
    }

    async fn start(&mut self, label: &str) {
        self.send_start(label).await;
        self.expect_phase(Phase::Recording).await;
    }

    /// Wait for the engine to publish a phase. The generous timeout is
    /// simulated time; the paused clock jumps straight through it when
    /// the phase never arrives.
    async fn expect_phase(&mut self, want: Phase) {
        let waited = timeout(
            StdDuration::from_secs(3600),
            self.phases.wait_for(|phase| *phase == want),
        )
        .await;
        match waited {
            Ok(Ok(_)) => {}
            Ok(Err(_)) => panic!("engine task exited while waiting for {:?}", want),
            Err(_) => panic!(
                "never reached {:?}, engine is in {:?}",
                want,
                self.handle.phase()
            ),
        }
    }

    fn artifact(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

// ----- plain session lifecycle -------------------------------------------

#[tokio::test(start_paused = true)]
async fn records_and_saves_on_stop() {
    let mut h = Harness::new();
    h.start("take").await;
    advance(5 * SECOND).await;

    h.handle.stop().await.unwrap();
    h.expect_phase(Phase::Completed).await;

    let saved = h.sink.last().expect("completion announced");
    assert!(!saved.salvaged);
    assert_eq!(saved.file_name(), "take.wav");
    assert!(h.artifact("take.wav").exists());
    // The lone segment was promoted into the artifact
    assert!(!h.artifact("take_seg0.wav").exists());
    assert_eq!(h.notifier.count("saved"), 1);
}

#[tokio::test(start_paused = true)]
async fn start_without_any_input_errors() {
    let mut h = Harness::with_inputs(Vec::new());
    h.send_start("take").await;
    h.expect_phase(Phase::Error).await;
    assert!(h.sink.all().is_empty());
    assert!(h.capture.opened().is_empty());
}

#[tokio::test(start_paused = true)]
async fn start_while_recording_is_ignored() {
    let mut h = Harness::new();
    h.start("first").await;
    h.send_start("second").await;
    sleep(SECOND).await;

    assert_eq!(h.handle.phase(), Phase::Recording);
    assert_eq!(h.capture.opened().len(), 1);

    h.handle.stop().await.unwrap();
    h.expect_phase(Phase::Completed).await;
    assert_eq!(h.sink.last().unwrap().file_name(), "first.wav");
}

#[tokio::test(start_paused = true)]
async fn engine_restarts_after_completion() {
    let mut h = Harness::new();
    h.start("first").await;
    advance(2 * SECOND).await;
    h.handle.stop().await.unwrap();
    h.expect_phase(Phase::Completed).await;

    h.start("second").await;
    advance(2 * SECOND).await;
    h.handle.stop().await.unwrap();
    h.expect_phase(Phase::Completed).await;

    assert_eq!(h.sink.all().len(), 2);
    assert!(h.artifact("first.wav").exists());
    assert!(h.artifact("second.wav").exists());
}

#[tokio::test(start_paused = true)]
async fn second_stop_during_merge_is_ignored() {
    let mut h = Harness::new();
    h.start("take").await;
    advance(2 * SECOND).await;

    h.handle.stop().await.unwrap();
    h.handle.stop().await.unwrap();
    h.expect_phase(Phase::Completed).await;

    assert_eq!(h.sink.all().len(), 1);
    assert_eq!(h.notifier.count("saved"), 1);
}

#[tokio::test(start_paused = true)]
async fn pause_and_resume_round_trip() {
    let mut h = Harness::new();
    h.start("take").await;

    h.handle.pause().await.unwrap();
    h.expect_phase(Phase::Paused).await;
    assert!(!h.capture.is_capturing());

    h.handle.resume().await.unwrap();
    h.expect_phase(Phase::Recording).await;
    assert!(h.capture.is_capturing());
    // In-place resume, no new segment
    assert_eq!(h.capture.opened().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn resume_reopens_capture_when_stream_died() {
    let mut h = Harness::new();
    h.start("take").await;

    h.handle.pause().await.unwrap();
    h.expect_phase(Phase::Paused).await;

    h.capture.set_fail_resume(true);
    h.handle.resume().await.unwrap();
    h.expect_phase(Phase::Recording).await;

    // The dead stream forced a reopen into a fresh segment
    assert_eq!(h.capture.opened().len(), 2);
    assert!(h.capture.opened()[1].ends_with("take_seg1.wav"));
}

#[tokio::test(start_paused = true)]
async fn discard_deletes_segment_files() {
    let mut h = Harness::new();
    h.start("take").await;
    advance(3 * SECOND).await;
    let seg0 = h.artifact("take_seg0.wav");
    assert!(seg0.exists());

    h.handle.discard().await.unwrap();
    h.expect_phase(Phase::Discarded).await;

    assert!(!seg0.exists());
    assert!(h.sink.all().is_empty());
    assert_eq!(h.notifier.count("saved"), 0);
}

#[tokio::test(start_paused = true)]
async fn stop_with_nothing_captured_errors() {
    let mut h = Harness::new();
    h.capture.set_write_files(false);
    h.capture.set_fail_seal(true);
    h.start("take").await;
    advance(2 * SECOND).await;

    h.handle.stop().await.unwrap();
    h.expect_phase(Phase::Error).await;

    assert!(h.sink.all().is_empty());
    assert!(!h.artifact("take.wav").exists());
}

// ----- phone calls -------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn short_call_resumes_without_asking() {
    let mut h = Harness::new();
    h.start("take").await;

    h.handle.call_began().await.unwrap();
    h.expect_phase(Phase::Interrupted).await;
    assert!(!h.capture.is_capturing());

    // One second under the prompt threshold
    advance(179 * SECOND).await;
    h.handle.call_ended(None).await.unwrap();
    h.expect_phase(Phase::Recording).await;

    assert_eq!(h.notifier.count("resume-decision"), 0);
    assert_eq!(h.capture.opened().len(), 2);
    assert!(h.capture.opened()[1].ends_with("take_seg1.wav"));

    h.handle.stop().await.unwrap();
    h.expect_phase(Phase::Completed).await;
    let saved = h.sink.last().unwrap();
    // Both two-second segments made it into the artifact
    assert_eq!(saved.duration, StdDuration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn two_short_calls_yield_one_artifact() {
    let mut h = Harness::new();
    h.start("take").await;

    h.handle.call_began().await.unwrap();
    h.expect_phase(Phase::Interrupted).await;
    advance(90 * SECOND).await;
    h.handle.call_ended(None).await.unwrap();
    h.expect_phase(Phase::Recording).await;

    h.handle.call_began().await.unwrap();
    h.expect_phase(Phase::Interrupted).await;
    advance(60 * SECOND).await;
    h.handle.call_ended(None).await.unwrap();
    h.expect_phase(Phase::Recording).await;

    assert_eq!(h.capture.opened().len(), 3);
    h.handle.stop().await.unwrap();
    h.expect_phase(Phase::Completed).await;

    let saved = h.sink.last().unwrap();
    assert_eq!(saved.file_name(), "take.wav");
    // Three two-second segments, stitched in index order
    assert_eq!(saved.duration, StdDuration::from_secs(6));
    assert!(h.artifact("take.wav").exists());
    for seg in ["take_seg0.wav", "take_seg1.wav", "take_seg2.wav"] {
        assert!(!h.artifact(seg).exists(), "{} should be gone", seg);
    }
}

#[tokio::test(start_paused = true)]
async fn long_call_prompts_for_decision() {
    let mut h = Harness::new();
    h.start("take").await;

    h.handle.call_began().await.unwrap();
    h.expect_phase(Phase::Interrupted).await;

    advance(180 * SECOND).await;
    h.handle.call_ended(None).await.unwrap();
    h.expect_phase(Phase::WaitingForUserDecision).await;

    let body = h.notifier.body_of("resume-decision").expect("prompt sent");
    assert!(body.contains("3m0s"), "unexpected prompt body: {}", body);

    h.handle.decide(UserDecision::Resume).await.unwrap();
    h.expect_phase(Phase::Recording).await;
    assert_eq!(h.capture.opened().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn unanswered_prompt_stops_and_saves() {
    let mut h = Harness::new();
    h.start("take").await;

    h.handle.call_began().await.unwrap();
    h.expect_phase(Phase::Interrupted).await;
    advance(200 * SECOND).await;
    h.handle.call_ended(None).await.unwrap();
    h.expect_phase(Phase::WaitingForUserDecision).await;

    // Past the decision deadline with no answer
    advance(31 * SECOND).await;
    h.expect_phase(Phase::Completed).await;

    let saved = h.sink.last().expect("timed-out session still saved");
    assert!(!saved.salvaged);
    assert!(h.artifact("take.wav").exists());

    // A decision arriving after the save changes nothing
    h.handle.decide(UserDecision::Discard).await.unwrap();
    sleep(SECOND).await;
    assert_eq!(h.handle.phase(), Phase::Completed);
    assert_eq!(h.sink.all().len(), 1);
    assert!(h.artifact("take.wav").exists());
}

#[tokio::test(start_paused = true)]
async fn discard_decision_after_long_call() {
    let mut h = Harness::new();
    h.start("take").await;

    h.handle.call_began().await.unwrap();
    h.expect_phase(Phase::Interrupted).await;
    advance(240 * SECOND).await;
    h.handle.call_ended(None).await.unwrap();
    h.expect_phase(Phase::WaitingForUserDecision).await;

    h.handle.decide(UserDecision::Discard).await.unwrap();
    h.expect_phase(Phase::Discarded).await;

    assert!(!h.artifact("take_seg0.wav").exists());
    assert!(!h.artifact("take.wav").exists());
    assert!(h.sink.all().is_empty());
}

#[tokio::test(start_paused = true)]
async fn call_end_in_background_waits_for_foreground() {
    let mut h = Harness::new();
    h.start("take").await;
    h.handle.entered_background().await.unwrap();

    h.handle.call_began().await.unwrap();
    h.expect_phase(Phase::Interrupted).await;
    advance(100 * SECOND).await;

    // Ended while backgrounded: resolution must wait for the foreground
    h.handle.call_ended(None).await.unwrap();
    sleep(SECOND).await;
    assert_eq!(h.handle.phase(), Phase::Interrupted);
    assert_eq!(h.notifier.count("resume-decision"), 0);
    assert_eq!(h.capture.opened().len(), 1);

    h.handle.entered_foreground().await.unwrap();
    h.expect_phase(Phase::Recording).await;
    assert_eq!(h.capture.opened().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn back_to_back_calls_count_as_one_episode() {
    let mut h = Harness::new();
    h.start("take").await;
    h.handle.entered_background().await.unwrap();

    h.handle.call_began().await.unwrap();
    h.expect_phase(Phase::Interrupted).await;
    advance(100 * SECOND).await;
    h.handle.call_ended(None).await.unwrap();
    // Let the parked end land without adding clock time to the episode
    tokio::task::yield_now().await;

    // Second call before the parked end was resolved
    h.handle.call_began().await.unwrap();
    advance(150 * SECOND).await;
    h.handle.call_ended(None).await.unwrap();
    sleep(SECOND).await;
    assert_eq!(h.handle.phase(), Phase::Interrupted);

    // The episode spans both calls, so the prompt fires
    h.handle.entered_foreground().await.unwrap();
    h.expect_phase(Phase::WaitingForUserDecision).await;
    let body = h.notifier.body_of("resume-decision").unwrap();
    assert!(body.contains("4m10s"), "unexpected prompt body: {}", body);
}

#[tokio::test(start_paused = true)]
async fn call_end_arriving_after_stop_is_ignored() {
    let mut h = Harness::new();
    h.start("take").await;

    h.handle.call_began().await.unwrap();
    h.expect_phase(Phase::Interrupted).await;
    advance(30 * SECOND).await;

    // Stopping mid-call saves the audio from before the call
    h.handle.stop().await.unwrap();
    h.expect_phase(Phase::Completed).await;
    assert!(h.artifact("take.wav").exists());

    // The call outlived the session; its end resolves nothing
    h.handle.call_ended(None).await.unwrap();
    sleep(SECOND).await;
    assert_eq!(h.handle.phase(), Phase::Completed);
    assert_eq!(h.notifier.count("failed"), 0);
    assert_eq!(h.notifier.count("resume-decision"), 0);
    assert_eq!(h.sink.all().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn microphone_lost_mid_call_waits_after_the_call() {
    let mut h = Harness::with_inputs(vec![headset()]);
    h.start("take").await;

    h.handle.call_began().await.unwrap();
    h.expect_phase(Phase::Interrupted).await;

    // The device goes away while the call holds the episode slot
    h.routes.set_available(Vec::new());
    h.handle
        .route_changed(RouteChange {
            removed: vec![headset()],
            available: Vec::new(),
        })
        .await
        .unwrap();
    sleep(SECOND).await;
    assert_eq!(h.handle.phase(), Phase::Interrupted);

    advance(90 * SECOND).await;
    h.capture.fail_next_opens(2);
    h.handle.call_ended(None).await.unwrap();
    h.expect_phase(Phase::WaitingForMicrophone).await;
    assert_eq!(h.notifier.count("input-lost"), 1);
    assert_eq!(h.notifier.count("failed"), 0);

    // The device returns; the next poll resumes capture
    h.routes.set_available(vec![headset()]);
    h.expect_phase(Phase::Recording).await;

    h.handle.stop().await.unwrap();
    h.expect_phase(Phase::Completed).await;
    let saved = h.sink.last().unwrap();
    assert!(!saved.salvaged);
    assert_eq!(saved.duration, StdDuration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn resume_decision_honors_a_queued_device_loss() {
    let mut h = Harness::with_inputs(vec![headset()]);
    h.start("take").await;

    h.handle.call_began().await.unwrap();
    h.expect_phase(Phase::Interrupted).await;
    h.routes.set_available(Vec::new());
    h.handle
        .route_changed(RouteChange {
            removed: vec![headset()],
            available: Vec::new(),
        })
        .await
        .unwrap();

    advance(200 * SECOND).await;
    h.handle.call_ended(None).await.unwrap();
    h.expect_phase(Phase::WaitingForUserDecision).await;

    // Resume cannot reopen the vanished device, so the wait begins
    h.capture.fail_next_opens(2);
    h.handle.decide(UserDecision::Resume).await.unwrap();
    h.expect_phase(Phase::WaitingForMicrophone).await;

    h.routes.set_available(vec![headset()]);
    h.expect_phase(Phase::Recording).await;
    assert_eq!(h.notifier.count("failed"), 0);
}

// ----- input devices -----------------------------------------------------

#[tokio::test(start_paused = true)]
async fn lost_microphone_polls_until_it_returns() {
    let mut h = Harness::with_inputs(vec![headset()]);
    h.start("take").await;
    assert_eq!(h.routes.selected_port().unwrap().id, "USB Headset");

    h.routes.set_available(Vec::new());
    h.handle
        .route_changed(RouteChange {
            removed: vec![headset()],
            available: Vec::new(),
        })
        .await
        .unwrap();
    h.expect_phase(Phase::WaitingForMicrophone).await;
    assert_eq!(h.notifier.count("input-lost"), 1);
    // The partial segment was sealed before the stream went down
    assert_eq!(h.capture.sealed_count(), 1);

    advance(5 * SECOND).await;
    assert_eq!(h.handle.phase(), Phase::WaitingForMicrophone);

    // A different microphone appears; the next poll picks it up
    h.routes.set_available(vec![builtin()]);
    h.expect_phase(Phase::Recording).await;
    assert_eq!(h.routes.selected_port().unwrap().id, "Built-in Microphone");
    assert_eq!(h.capture.opened().len(), 2);

    h.handle.stop().await.unwrap();
    h.expect_phase(Phase::Completed).await;
    assert_eq!(h.sink.last().unwrap().duration, StdDuration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn microphone_never_returning_salvages_the_audio() {
    let mut h = Harness::with_inputs(vec![headset()]);
    h.start("take").await;

    h.routes.set_available(Vec::new());
    h.handle
        .route_changed(RouteChange {
            removed: vec![headset()],
            available: Vec::new(),
        })
        .await
        .unwrap();
    h.expect_phase(Phase::WaitingForMicrophone).await;

    // Poll past the give-up limit
    sleep(301 * SECOND).await;
    h.expect_phase(Phase::Completed).await;

    let saved = h.sink.last().expect("salvaged recording announced");
    assert!(saved.salvaged);
    assert_eq!(saved.file_name(), "take-recovered.wav");
    assert!(h.artifact("take-recovered.wav").exists());
    assert_eq!(h.notifier.count("salvaged"), 1);
}

#[tokio::test(start_paused = true)]
async fn salvage_below_floor_is_discarded() {
    let mut h = Harness::with_inputs(vec![headset()]);
    // A quarter second of audio, under the salvage duration floor
    h.capture.set_samples_per_segment(4_000);
    h.start("take").await;

    h.routes.set_available(Vec::new());
    h.handle
        .route_changed(RouteChange {
            removed: vec![headset()],
            available: Vec::new(),
        })
        .await
        .unwrap();
    h.expect_phase(Phase::WaitingForMicrophone).await;

    sleep(301 * SECOND).await;
    h.expect_phase(Phase::Error).await;

    assert!(h.sink.all().is_empty());
    assert!(!h.artifact("take-recovered.wav").exists());
    assert_eq!(h.notifier.count("salvaged"), 0);
}

#[tokio::test(start_paused = true)]
async fn preemption_resumes_when_lifted() {
    let mut h = Harness::new();
    h.start("take").await;

    // While another process owns capture, no input is usable
    h.routes.set_available(Vec::new());
    h.handle.preemption_began().await.unwrap();
    h.expect_phase(Phase::WaitingForMicrophone).await;
    assert_eq!(h.capture.sealed_count(), 1);

    advance(29 * SECOND).await;
    assert_eq!(h.handle.phase(), Phase::WaitingForMicrophone);

    h.routes.set_available(vec![builtin()]);
    h.handle.preemption_ended().await.unwrap();
    h.expect_phase(Phase::Recording).await;
    assert_eq!(h.capture.opened().len(), 2);
}

// ----- stall watchdog ----------------------------------------------------

#[tokio::test(start_paused = true)]
async fn flat_byte_counter_restarts_capture() {
    let mut h = Harness::new();
    h.start("take").await;

    h.capture.set_frozen(true);
    // Three consecutive flat ticks trip the watchdog
    sleep(StdDuration::from_millis(3_500)).await;
    h.capture.set_frozen(false);
    sleep(SECOND).await;

    assert_eq!(h.handle.phase(), Phase::Recording);
    assert_eq!(h.capture.opened().len(), 2);
    assert!(h.capture.opened()[1].ends_with("take_seg1.wav"));

    h.handle.stop().await.unwrap();
    h.expect_phase(Phase::Completed).await;
    assert_eq!(h.sink.last().unwrap().duration, StdDuration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn dead_stream_trips_the_watchdog() {
    let mut h = Harness::new();
    h.start("take").await;

    // A dying stream stops the byte counter and the live flag together
    h.capture.set_frozen(true);
    h.capture.kill_stream();
    sleep(StdDuration::from_millis(3_500)).await;
    h.capture.set_frozen(false);
    sleep(SECOND).await;

    assert_eq!(h.handle.phase(), Phase::Recording);
    assert_eq!(h.capture.opened().len(), 2);

    h.handle.stop().await.unwrap();
    h.expect_phase(Phase::Completed).await;
    assert_eq!(h.sink.last().unwrap().duration, StdDuration::from_secs(4));
}

#[tokio::test(start_paused = true)]
async fn failed_stall_recovery_salvages_the_audio() {
    let mut h = Harness::new();
    h.start("take").await;

    h.capture.set_frozen(true);
    h.capture.fail_next_opens(1);
    advance(StdDuration::from_millis(3_500)).await;
    h.expect_phase(Phase::Completed).await;

    let saved = h.sink.last().expect("salvage announced");
    assert!(saved.salvaged);
    assert_eq!(saved.file_name(), "take-recovered.wav");
}

// ----- resource limits ---------------------------------------------------

#[tokio::test(start_paused = true)]
async fn duration_cap_warns_then_stops() {
    let cfg = EngineConfig {
        max_duration: StdDuration::from_secs(60),
        duration_warning: StdDuration::from_secs(45),
        ..EngineConfig::default()
    };
    let mut h = Harness::with_config(cfg);
    h.start("take").await;

    sleep(46 * SECOND).await;
    assert_eq!(h.notifier.count("duration-cap"), 1);
    assert_eq!(h.handle.phase(), Phase::Recording);

    advance(15 * SECOND).await;
    h.expect_phase(Phase::Completed).await;
    assert_eq!(h.notifier.count("forced-stop"), 1);
    assert!(!h.sink.last().unwrap().salvaged);
}

#[tokio::test(start_paused = true)]
async fn storage_floor_stops_recording() {
    let mut h = Harness::new();
    h.start("take").await;

    h.probe.set_free_bytes(Some(150 * 1024 * 1024));
    sleep(11 * SECOND).await;
    assert_eq!(h.notifier.count("storage-low"), 1);
    assert_eq!(h.handle.phase(), Phase::Recording);

    h.probe.set_free_bytes(Some(50 * 1024 * 1024));
    advance(11 * SECOND).await;
    h.expect_phase(Phase::Completed).await;
    assert_eq!(h.notifier.count("forced-stop"), 1);
    assert!(h.artifact("take.wav").exists());
}

#[tokio::test(start_paused = true)]
async fn battery_floor_stops_recording() {
    let mut h = Harness::new();
    h.start("take").await;

    h.probe.set_battery(Some(12));
    sleep(11 * SECOND).await;
    assert_eq!(h.notifier.count("battery-low"), 1);
    assert_eq!(h.handle.phase(), Phase::Recording);

    h.probe.set_battery(Some(4));
    advance(11 * SECOND).await;
    h.expect_phase(Phase::Completed).await;
    assert_eq!(h.notifier.count("forced-stop"), 1);
}

#[tokio::test(start_paused = true)]
async fn background_budget_warns_then_stops() {
    let mut h = Harness::new();
    h.start("take").await;
    h.handle.entered_background().await.unwrap();

    h.probe.set_budget(Some(StdDuration::from_secs(120)));
    advance(SECOND).await;
    assert_eq!(h.notifier.count("budget-low"), 0);

    h.probe.set_budget(Some(StdDuration::from_secs(45)));
    advance(SECOND).await;
    assert_eq!(h.notifier.count("budget-low"), 1);

    // The warning does not repeat while the budget keeps shrinking
    h.probe.set_budget(Some(StdDuration::from_secs(30)));
    advance(SECOND).await;
    assert_eq!(h.notifier.count("budget-low"), 1);

    h.probe.set_budget(Some(StdDuration::from_secs(8)));
    advance(SECOND).await;
    h.expect_phase(Phase::Completed).await;

    assert_eq!(h.notifier.count("forced-stop"), 1);
    let saved = h.sink.last().expect("saved before the budget ran out");
    assert!(!saved.salvaged);
}

#[tokio::test(start_paused = true)]
async fn budget_is_ignored_in_the_foreground() {
    let mut h = Harness::new();
    h.start("take").await;

    h.probe.set_budget(Some(StdDuration::from_secs(8)));
    advance(3 * SECOND).await;

    assert_eq!(h.handle.phase(), Phase::Recording);
    assert_eq!(h.notifier.count("budget-low"), 0);
    assert_eq!(h.notifier.count("forced-stop"), 0);
}

// ----- checkpoints -------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn silence_flushes_on_the_soft_interval() {
    let mut h = Harness::new();
    h.capture.set_level(-55.0);
    h.start("take").await;

    sleep(StdDuration::from_millis(30_500)).await;
    assert_eq!(h.capture.flushes(), 1);

    // Loud input skips the soft interval; the hard interval still fires
    h.capture.set_level(-10.0);
    sleep(StdDuration::from_millis(90_500)).await;
    assert_eq!(h.capture.flushes(), 2);

    h.handle.stop().await.unwrap();
    h.expect_phase(Phase::Completed).await;
}
