//! Main app runner for a recording session

use std::env;
use std::process::ExitCode;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::application::ports::{CompletionSink, ConfigStore, SinkError};
use crate::application::{EngineHandle, RecordingEngine};
use crate::domain::config::AppConfig;
use crate::domain::session::{CompletedRecording, SessionOptions};
use crate::domain::state::{Phase, UserDecision};
use crate::infrastructure::{
    create_capture, create_notifier, SystemProbe, WavSegmentStore, XdgConfigStore,
};

use super::args::RecordOptions;
use super::presenter::Presenter;
use super::signals::{SessionSignal, SessionSignalHandler};

/// Exit codes
pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_ERROR: u8 = 1;
pub const EXIT_USAGE_ERROR: u8 = 2;

/// Completion sink that parks the finished recording for the runner.
///
/// The engine announces completions before it publishes the terminal
/// phase, so by the time the runner sees that phase the slot is filled.
#[derive(Clone, Default)]
struct CliSink {
    last: Arc<StdMutex<Option<CompletedRecording>>>,
}

impl CliSink {
    fn take_last(&self) -> Option<CompletedRecording> {
        self.last.lock().unwrap().take()
    }
}

#[async_trait]
impl CompletionSink for CliSink {
    async fn recording_completed(&self, recording: &CompletedRecording) -> Result<(), SinkError> {
        *self.last.lock().unwrap() = Some(recording.clone());
        Ok(())
    }
}

/// Run one recording session until it reaches a terminal state.
pub async fn run_record(options: RecordOptions) -> ExitCode {
    let mut presenter = Presenter::new();

    if let Err(e) = tokio::fs::create_dir_all(&options.output_dir).await {
        presenter.error(&format!(
            "Cannot create output directory {}: {}",
            options.output_dir.display(),
            e
        ));
        return ExitCode::from(EXIT_ERROR);
    }

    // Setup signal handlers
    let mut signals = match SessionSignalHandler::new().await {
        Ok(handler) => handler,
        Err(e) => {
            presenter.error(&format!("Failed to setup signal handlers: {}", e));
            return ExitCode::from(EXIT_ERROR);
        }
    };

    // Create adapters
    let (capture, routes) = create_capture();
    let probe = SystemProbe::new();
    let notifier = create_notifier(options.notify);
    let store = WavSegmentStore::new();
    let sink = CliSink::default();
    let saved = sink.clone();

    let decision_window = options.engine.decision_timeout;
    let handle = RecordingEngine::spawn(
        options.engine,
        capture,
        routes,
        probe,
        notifier,
        store,
        sink,
    );

    let session = SessionOptions {
        output_dir: options.output_dir.clone(),
        label: options.label.clone(),
        location: options.location,
    };
    if handle.start(session).await.is_err() {
        presenter.error("Recording engine exited before the session could start");
        return ExitCode::from(EXIT_ERROR);
    }

    spawn_keyboard_reader(handle.clone());

    presenter.info(&format!(
        "Saving to {}. Ctrl+C stops and saves; type 'd' + Enter to discard.",
        options.output_dir.display()
    ));

    let mut phase_rx = handle.subscribe();
    let started = tokio::time::Instant::now();
    let mut ticker = tokio::time::interval(StdDuration::from_secs(1));
    let mut in_call = false;
    let mut backgrounded = false;

    let final_phase = loop {
        tokio::select! {
            changed = phase_rx.changed() => {
                if changed.is_err() {
                    break *phase_rx.borrow();
                }
                let phase = *phase_rx.borrow_and_update();
                present_phase(&mut presenter, phase, decision_window);
                if phase.is_terminal() {
                    break phase;
                }
            }
            Some(signal) = signals.recv() => match signal {
                SessionSignal::Stop => {
                    let _ = handle.stop().await;
                }
                SessionSignal::ToggleCall => {
                    in_call = !in_call;
                    let sent = if in_call {
                        presenter.warn("Simulated call started");
                        handle.call_began().await
                    } else {
                        presenter.info("Simulated call ended");
                        handle.call_ended(None).await
                    };
                    let _ = sent;
                }
                SessionSignal::ToggleBackground => {
                    backgrounded = !backgrounded;
                    let sent = if backgrounded {
                        presenter.info("Simulated move to background");
                        handle.entered_background().await
                    } else {
                        presenter.info("Simulated return to foreground");
                        handle.entered_foreground().await
                    };
                    let _ = sent;
                }
            },
            _ = ticker.tick() => {
                if *phase_rx.borrow() == Phase::Recording {
                    presenter.update_spinner(&format!(
                        "Recording... {}",
                        Presenter::format_elapsed(started.elapsed())
                    ));
                }
            }
        }
    };

    let _ = handle.shutdown().await;

    match final_phase {
        Phase::Completed => {
            match saved.take_last() {
                Some(recording) => {
                    let verb = if recording.salvaged { "Salvaged" } else { "Saved" };
                    presenter.success(&format!(
                        "{} {} ({}, {:.1} MB)",
                        verb,
                        recording.file_name(),
                        Presenter::format_elapsed(recording.duration),
                        recording.file_size_bytes as f64 / (1024.0 * 1024.0),
                    ));
                    presenter.output(&recording.artifact_path.display().to_string());
                }
                None => presenter.success("Recording complete"),
            }
            ExitCode::from(EXIT_SUCCESS)
        }
        Phase::Discarded => {
            presenter.info("Recording discarded");
            ExitCode::from(EXIT_SUCCESS)
        }
        _ => {
            presenter.error("Recording failed; segment files were kept for manual recovery");
            ExitCode::from(EXIT_ERROR)
        }
    }
}

/// Reflect a phase change on the terminal.
fn present_phase(presenter: &mut Presenter, phase: Phase, decision_window: StdDuration) {
    match phase {
        Phase::Recording => presenter.start_spinner("Recording... 0:00"),
        Phase::Paused => presenter.start_spinner("Paused (type 'r' to resume)"),
        Phase::Interrupted => presenter.start_spinner("Interrupted, capture parked"),
        Phase::WaitingForMicrophone => presenter.start_spinner("Waiting for a microphone..."),
        Phase::WaitingForUserDecision => {
            presenter.stop_spinner();
            presenter.warn(&format!(
                "Interruption over. Type 'r' to resume or 'd' to discard; saves in {}s either way.",
                decision_window.as_secs()
            ));
        }
        Phase::Merging => presenter.start_spinner("Merging segments..."),
        Phase::Idle | Phase::Completed | Phase::Error | Phase::Discarded => {
            presenter.stop_spinner()
        }
    }
}

/// Read single-letter commands from stdin.
///
/// 'r' and 'd' answer a resume prompt when one is showing and otherwise
/// act as resume-from-pause and discard.
fn spawn_keyboard_reader(handle: EngineHandle) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let deciding = handle.phase() == Phase::WaitingForUserDecision;
            let sent = match line.trim().to_lowercase().as_str() {
                "" => Ok(()),
                "r" | "resume" if deciding => handle.decide(UserDecision::Resume).await,
                "r" | "resume" => handle.resume().await,
                "d" | "discard" if deciding => handle.decide(UserDecision::Discard).await,
                "d" | "discard" => handle.discard().await,
                "p" | "pause" => handle.pause().await,
                "s" | "stop" | "q" | "quit" => handle.stop().await,
                _ => {
                    eprintln!("Commands: p(ause), r(esume), s(top), d(iscard)");
                    Ok(())
                }
            };
            if sent.is_err() {
                break;
            }
        }
    });
}

/// Load and merge configuration from file, env, and CLI
pub async fn load_merged_config(cli_config: AppConfig) -> AppConfig {
    let store = XdgConfigStore::new();
    let file_config = store.load().await.unwrap_or_else(|_| AppConfig::empty());

    // Build env config
    let env_config = AppConfig {
        output_dir: env::var("CONTINUO_OUTPUT_DIR").ok().filter(|s| !s.is_empty()),
        ..Default::default()
    };

    // Merge: defaults < file < env < cli
    AppConfig::defaults()
        .merge(file_config)
        .merge(env_config)
        .merge(cli_config)
}
