//! Segment-oriented audio capture using cpal
//!
//! Each open segment gets its own capture thread owning the
//! cpal::Stream (which is not Send) plus a hound writer. The stream
//! callback mixes to mono and hands chunks over a channel; the thread
//! resamples to the canonical 16kHz spec and appends to the segment
//! file. Pause is a gate at the callback: the stream stays warm and
//! samples are dropped at the source.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, SampleRate, StreamConfig};
use hound::{WavSpec, WavWriter};
use rubato::{FftFixedIn, Resampler};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::application::ports::{
    CaptureDevice, CaptureError, InputRoutes, RouteError, SealedStats,
};
use crate::domain::input::{InputKind, InputPort};

/// Canonical segment sample rate; device audio is resampled to this
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// The WAV spec every segment file is written with
pub fn segment_spec() -> WavSpec {
    WavSpec {
        channels: 1,
        sample_rate: TARGET_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

type SharedSelection = Arc<StdMutex<Option<InputPort>>>;

/// Build a capture device and route enumerator that share one input
/// selection.
pub fn create_capture() -> (CpalCapture, CpalRoutes) {
    let selection: SharedSelection = Arc::new(StdMutex::new(None));
    (
        CpalCapture::new(Arc::clone(&selection)),
        CpalRoutes::new(selection),
    )
}

/// State the capture thread, stream callback and engine all observe.
struct CaptureShared {
    /// Stream built, playing, and not torn down by an error
    stream_alive: AtomicBool,
    /// Callback gate; samples are dropped while set
    paused: AtomicBool,
    /// Data bytes appended to the open segment
    bytes_written: AtomicU64,
    /// Recent input level, hundredths of dBFS
    level_centi_dbfs: AtomicI32,
}

impl CaptureShared {
    fn new() -> Self {
        Self {
            stream_alive: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            bytes_written: AtomicU64::new(0),
            level_centi_dbfs: AtomicI32::new(-10_000),
        }
    }
}

enum WriterCommand {
    Flush(oneshot::Sender<Result<(), CaptureError>>),
    Seal(oneshot::Sender<Result<SealedStats, CaptureError>>),
    Shutdown(oneshot::Sender<()>),
}

/// Capture device using cpal.
///
/// The stream is managed on a dedicated thread to avoid Send/Sync
/// issues with cpal::Stream which is not thread-safe.
pub struct CpalCapture {
    selection: SharedSelection,
    cmd_tx: StdMutex<Option<std_mpsc::Sender<WriterCommand>>>,
    shared: Arc<CaptureShared>,
}

impl CpalCapture {
    pub fn new(selection: SharedSelection) -> Self {
        Self {
            selection,
            cmd_tx: StdMutex::new(None),
            shared: Arc::new(CaptureShared::new()),
        }
    }

    fn take_cmd_tx(&self) -> Option<std_mpsc::Sender<WriterCommand>> {
        self.cmd_tx.lock().unwrap().take()
    }

    fn clone_cmd_tx(&self) -> Option<std_mpsc::Sender<WriterCommand>> {
        self.cmd_tx.lock().unwrap().clone()
    }
}

#[async_trait]
impl CaptureDevice for CpalCapture {
    async fn open_segment(&self, path: &Path) -> Result<(), CaptureError> {
        if self.cmd_tx.lock().unwrap().is_some() {
            return Err(CaptureError::SegmentAlreadyOpen);
        }

        let (cmd_tx, cmd_rx) = std_mpsc::channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let shared = Arc::clone(&self.shared);
        let device_id = self.selection.lock().unwrap().as_ref().map(|p| p.id.clone());
        let path = path.to_path_buf();

        std::thread::spawn(move || capture_thread(path, device_id, shared, cmd_rx, ready_tx));

        match ready_rx.await {
            Ok(Ok(())) => {
                *self.cmd_tx.lock().unwrap() = Some(cmd_tx);
                Ok(())
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(CaptureError::StreamFailed(
                "capture thread exited before starting".to_string(),
            )),
        }
    }

    async fn seal_segment(&self) -> Result<SealedStats, CaptureError> {
        let cmd_tx = self.take_cmd_tx().ok_or(CaptureError::NoOpenSegment)?;
        let (tx, rx) = oneshot::channel();
        cmd_tx
            .send(WriterCommand::Seal(tx))
            .map_err(|_| CaptureError::SealFailed("capture thread is gone".to_string()))?;
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(CaptureError::SealFailed(
                "capture thread dropped the seal request".to_string(),
            )),
        }
    }

    async fn pause(&self) -> Result<(), CaptureError> {
        if self.cmd_tx.lock().unwrap().is_none() {
            return Err(CaptureError::NoOpenSegment);
        }
        self.shared.paused.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn resume(&self) -> Result<(), CaptureError> {
        if self.cmd_tx.lock().unwrap().is_none() {
            return Err(CaptureError::NoOpenSegment);
        }
        if !self.shared.stream_alive.load(Ordering::SeqCst) {
            return Err(CaptureError::StreamFailed(
                "stream died while paused".to_string(),
            ));
        }
        self.shared.paused.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn flush(&self) -> Result<(), CaptureError> {
        let cmd_tx = self.clone_cmd_tx().ok_or(CaptureError::NoOpenSegment)?;
        let (tx, rx) = oneshot::channel();
        cmd_tx
            .send(WriterCommand::Flush(tx))
            .map_err(|_| CaptureError::FlushFailed("capture thread is gone".to_string()))?;
        match rx.await {
            Ok(result) => result,
            Err(_) => Err(CaptureError::FlushFailed(
                "capture thread dropped the flush request".to_string(),
            )),
        }
    }

    async fn shutdown(&self) -> Result<(), CaptureError> {
        let Some(cmd_tx) = self.take_cmd_tx() else {
            return Ok(());
        };
        let (tx, rx) = oneshot::channel();
        if cmd_tx.send(WriterCommand::Shutdown(tx)).is_ok() {
            let _ = rx.await;
        }
        Ok(())
    }

    fn bytes_written(&self) -> u64 {
        self.shared.bytes_written.load(Ordering::SeqCst)
    }

    fn level_dbfs(&self) -> f32 {
        self.shared.level_centi_dbfs.load(Ordering::SeqCst) as f32 / 100.0
    }

    fn is_capturing(&self) -> bool {
        self.shared.stream_alive.load(Ordering::SeqCst)
            && !self.shared.paused.load(Ordering::SeqCst)
    }
}

/// Route enumeration over the cpal host.
pub struct CpalRoutes {
    selection: SharedSelection,
}

impl CpalRoutes {
    pub fn new(selection: SharedSelection) -> Self {
        Self { selection }
    }
}

impl InputRoutes for CpalRoutes {
    fn available_inputs(&self) -> Result<Vec<InputPort>, RouteError> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| RouteError::EnumerationFailed(e.to_string()))?;
        Ok(devices
            .filter_map(|d| d.name().ok())
            .map(|name| {
                let kind = classify_input(&name);
                InputPort::new(name, kind)
            })
            .collect())
    }

    fn selected(&self) -> Option<InputPort> {
        self.selection.lock().unwrap().clone()
    }

    fn select(&self, port: &InputPort) {
        *self.selection.lock().unwrap() = Some(port.clone());
    }
}

/// Guess whether a device name looks like an external input. cpal
/// exposes no port-kind metadata, so the name is all there is.
fn classify_input(name: &str) -> InputKind {
    let lower = name.to_lowercase();
    let peripheral = ["usb", "headset", "bluetooth", "airpod", "external", "dock"];
    if peripheral.iter().any(|k| lower.contains(k)) {
        InputKind::Peripheral
    } else {
        InputKind::BuiltIn
    }
}

fn find_device(host: &cpal::Host, id: Option<&str>) -> Result<cpal::Device, CaptureError> {
    if let Some(id) = id {
        if let Ok(mut devices) = host.input_devices() {
            if let Some(device) = devices.find(|d| d.name().map(|n| n == id).unwrap_or(false)) {
                return Ok(device);
            }
        }
        debug!(device = id, "selected input not found, falling back to default");
    }
    host.default_input_device().ok_or(CaptureError::NoInputDevice)
}

/// Pick an input configuration, preferring mono and the target rate.
fn pick_input_config(device: &cpal::Device) -> Result<(StreamConfig, SampleFormat), CaptureError> {
    let supported = device
        .supported_input_configs()
        .map_err(|e| CaptureError::OpenFailed(format!("failed to get configs: {}", e)))?;

    let mut best: Option<cpal::SupportedStreamConfigRange> = None;
    for config in supported {
        if config.sample_format() != SampleFormat::I16
            && config.sample_format() != SampleFormat::F32
        {
            continue;
        }
        let includes_target = config.min_sample_rate().0 <= TARGET_SAMPLE_RATE
            && config.max_sample_rate().0 >= TARGET_SAMPLE_RATE;
        let is_better = match &best {
            None => true,
            Some(current) => {
                let fewer_channels = config.channels() < current.channels();
                let better_rate =
                    includes_target && current.min_sample_rate().0 > TARGET_SAMPLE_RATE;
                fewer_channels || better_rate
            }
        };
        if is_better {
            best = Some(config);
        }
    }

    let range = best.ok_or(CaptureError::OpenFailed("no suitable config found".to_string()))?;
    let sample_rate = if range.min_sample_rate().0 <= TARGET_SAMPLE_RATE
        && range.max_sample_rate().0 >= TARGET_SAMPLE_RATE
    {
        SampleRate(TARGET_SAMPLE_RATE)
    } else {
        range.min_sample_rate()
    };
    let format = range.sample_format();
    let config = StreamConfig {
        channels: range.channels(),
        sample_rate,
        buffer_size: cpal::BufferSize::Default,
    };
    Ok((config, format))
}

/// Mix interleaved frames down to mono by averaging channels.
fn mix_to_mono(samples: &[f32], channels: u16) -> Vec<f32> {
    if channels == 1 {
        return samples.to_vec();
    }
    samples
        .chunks(channels as usize)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// RMS level of a mono chunk in dBFS, floored at -100.
fn chunk_dbfs(chunk: &[f32]) -> f32 {
    if chunk.is_empty() {
        return -100.0;
    }
    let sum_sq: f32 = chunk.iter().map(|s| s * s).sum();
    let rms = (sum_sq / chunk.len() as f32).sqrt();
    20.0 * rms.max(1e-5).log10()
}

/// Everything the capture thread needs to turn mono device audio into
/// canonical segment samples on disk.
struct SegmentWriter {
    writer: Option<WavWriter<BufWriter<File>>>,
    sync_handle: File,
    path: PathBuf,
    resampler: Option<FftFixedIn<f32>>,
    pending: Vec<f32>,
    frames_in: u64,
    frames_out: u64,
    device_rate: u32,
    shared: Arc<CaptureShared>,
}

impl SegmentWriter {
    fn create(
        path: PathBuf,
        device_rate: u32,
        shared: Arc<CaptureShared>,
    ) -> Result<Self, CaptureError> {
        let file = File::create(&path)
            .map_err(|e| CaptureError::OpenFailed(format!("{}: {}", path.display(), e)))?;
        let sync_handle = file
            .try_clone()
            .map_err(|e| CaptureError::OpenFailed(e.to_string()))?;
        let writer = WavWriter::new(BufWriter::new(file), segment_spec())
            .map_err(|e| CaptureError::OpenFailed(e.to_string()))?;

        let resampler = if device_rate != TARGET_SAMPLE_RATE {
            let r = FftFixedIn::<f32>::new(
                device_rate as usize,
                TARGET_SAMPLE_RATE as usize,
                1024, // Chunk size
                2,    // Sub-chunks
                1,    // Mono
            )
            .map_err(|e| CaptureError::OpenFailed(format!("resampler init failed: {}", e)))?;
            Some(r)
        } else {
            None
        };

        Ok(Self {
            writer: Some(writer),
            sync_handle,
            path,
            resampler,
            pending: Vec::new(),
            frames_in: 0,
            frames_out: 0,
            device_rate,
            shared,
        })
    }

    fn append(&mut self, chunk: &[f32]) -> Result<(), CaptureError> {
        self.frames_in += chunk.len() as u64;
        match &mut self.resampler {
            None => {
                let frames: Vec<f32> = chunk.to_vec();
                self.write_frames(&frames)
            }
            Some(_) => {
                self.pending.extend_from_slice(chunk);
                self.drain_pending(false)
            }
        }
    }

    /// Run full chunks through the resampler; with `tail` set, pad the
    /// final partial chunk with zeros and trim to the expected length.
    fn drain_pending(&mut self, tail: bool) -> Result<(), CaptureError> {
        loop {
            let Some(resampler) = &mut self.resampler else {
                return Ok(());
            };
            let needed = resampler.input_frames_next();
            if self.pending.len() < needed {
                if !tail || self.pending.is_empty() {
                    return Ok(());
                }
                self.pending.resize(needed, 0.0);
            }
            let block: Vec<f32> = self.pending.drain(..needed).collect();
            let resampled = resampler
                .process(&[block], None)
                .map_err(|e| CaptureError::StreamFailed(format!("resampling failed: {}", e)))?;

            let frames = if tail {
                let ratio = TARGET_SAMPLE_RATE as f64 / self.device_rate as f64;
                let expected = (self.frames_in as f64 * ratio).ceil() as u64;
                let allowed = expected.saturating_sub(self.frames_out) as usize;
                &resampled[0][..allowed.min(resampled[0].len())]
            } else {
                &resampled[0][..]
            };
            self.write_frames(&frames.to_vec())?;
        }
    }

    fn write_frames(&mut self, frames: &[f32]) -> Result<(), CaptureError> {
        let Some(writer) = &mut self.writer else {
            return Err(CaptureError::NoOpenSegment);
        };
        for &sample in frames {
            writer
                .write_sample((sample * 32767.0) as i16)
                .map_err(|e| CaptureError::StreamFailed(format!("write failed: {}", e)))?;
        }
        self.frames_out += frames.len() as u64;
        self.shared
            .bytes_written
            .fetch_add(frames.len() as u64 * 2, Ordering::SeqCst);
        Ok(())
    }

    /// Make everything written so far durable without closing the file.
    fn flush(&mut self) -> Result<(), CaptureError> {
        let Some(writer) = &mut self.writer else {
            return Err(CaptureError::NoOpenSegment);
        };
        writer
            .flush()
            .map_err(|e| CaptureError::FlushFailed(e.to_string()))?;
        self.sync_handle
            .sync_all()
            .map_err(|e| CaptureError::FlushFailed(e.to_string()))?;
        Ok(())
    }

    /// Write the resampler tail, finalize the WAV header and report
    /// what the file holds.
    fn seal(&mut self) -> Result<SealedStats, CaptureError> {
        self.drain_pending(true)?;
        let writer = self.writer.take().ok_or(CaptureError::NoOpenSegment)?;
        writer
            .finalize()
            .map_err(|e| CaptureError::SealFailed(e.to_string()))?;
        let _ = self.sync_handle.sync_all();

        let size_bytes = std::fs::metadata(&self.path)
            .map_err(|e| CaptureError::SealFailed(e.to_string()))?
            .len();
        let duration = StdDuration::from_secs_f64(
            self.frames_out as f64 / TARGET_SAMPLE_RATE as f64,
        );
        Ok(SealedStats { size_bytes, duration })
    }
}

/// Thread owning the cpal stream and the open segment file for one
/// segment's lifetime.
fn capture_thread(
    path: PathBuf,
    device_id: Option<String>,
    shared: Arc<CaptureShared>,
    cmd_rx: std_mpsc::Receiver<WriterCommand>,
    ready_tx: oneshot::Sender<Result<(), CaptureError>>,
) {
    let (sample_tx, sample_rx) = std_mpsc::channel::<Vec<f32>>();
    shared.paused.store(false, Ordering::SeqCst);
    shared.bytes_written.store(0, Ordering::SeqCst);

    let setup = (|| -> Result<(cpal::Stream, SegmentWriter), CaptureError> {
        let host = cpal::default_host();
        let device = find_device(&host, device_id.as_deref())?;
        let (config, format) = pick_input_config(&device)?;
        let channels = config.channels;
        let device_rate = config.sample_rate.0;

        let segment = SegmentWriter::create(path.clone(), device_rate, Arc::clone(&shared))?;

        let cb_shared = Arc::clone(&shared);
        let err_shared = Arc::clone(&shared);
        let on_error = move |err: cpal::StreamError| {
            warn!(error = %err, "capture stream error");
            err_shared.stream_alive.store(false, Ordering::SeqCst);
        };

        let stream = match format {
            SampleFormat::I16 => device
                .build_input_stream(
                    &config,
                    move |data: &[i16], _: &cpal::InputCallbackInfo| {
                        let floats: Vec<f32> =
                            data.iter().map(|&s| s as f32 / 32768.0).collect();
                        let mono = mix_to_mono(&floats, channels);
                        cb_shared
                            .level_centi_dbfs
                            .store((chunk_dbfs(&mono) * 100.0) as i32, Ordering::SeqCst);
                        if !cb_shared.paused.load(Ordering::SeqCst) {
                            let _ = sample_tx.send(mono);
                        }
                    },
                    on_error,
                    None,
                )
                .map_err(|e| CaptureError::OpenFailed(e.to_string()))?,
            SampleFormat::F32 => device
                .build_input_stream(
                    &config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        let mono = mix_to_mono(data, channels);
                        cb_shared
                            .level_centi_dbfs
                            .store((chunk_dbfs(&mono) * 100.0) as i32, Ordering::SeqCst);
                        if !cb_shared.paused.load(Ordering::SeqCst) {
                            let _ = sample_tx.send(mono);
                        }
                    },
                    on_error,
                    None,
                )
                .map_err(|e| CaptureError::OpenFailed(e.to_string()))?,
            _ => {
                return Err(CaptureError::OpenFailed(
                    "unsupported sample format".to_string(),
                ))
            }
        };

        stream
            .play()
            .map_err(|e| CaptureError::OpenFailed(e.to_string()))?;
        debug!(
            path = %path.display(),
            rate = device_rate,
            channels,
            "segment capture started"
        );
        Ok((stream, segment))
    })();

    let (stream, mut segment) = match setup {
        Ok(pair) => pair,
        Err(e) => {
            shared.stream_alive.store(false, Ordering::SeqCst);
            let _ = ready_tx.send(Err(e));
            return;
        }
    };

    shared.stream_alive.store(true, Ordering::SeqCst);
    let _ = ready_tx.send(Ok(()));

    loop {
        match cmd_rx.try_recv() {
            Ok(WriterCommand::Flush(ack)) => {
                let _ = ack.send(segment.flush());
                continue;
            }
            Ok(WriterCommand::Seal(ack)) => {
                while let Ok(chunk) = sample_rx.try_recv() {
                    if let Err(e) = segment.append(&chunk) {
                        warn!(error = %e, "dropping samples at seal");
                        break;
                    }
                }
                let _ = ack.send(segment.seal());
                break;
            }
            Ok(WriterCommand::Shutdown(ack)) => {
                if segment.writer.is_some() {
                    if let Err(e) = segment.seal() {
                        warn!(error = %e, "best-effort seal at shutdown failed");
                    }
                }
                let _ = ack.send(());
                break;
            }
            Err(std_mpsc::TryRecvError::Empty) => {}
            Err(std_mpsc::TryRecvError::Disconnected) => {
                // Device handle dropped without a seal; keep the file
                // readable anyway.
                if segment.writer.is_some() {
                    let _ = segment.seal();
                }
                break;
            }
        }

        match sample_rx.recv_timeout(StdDuration::from_millis(50)) {
            Ok(chunk) => {
                if let Err(e) = segment.append(&chunk) {
                    warn!(error = %e, "segment write failed");
                    shared.stream_alive.store(false, Ordering::SeqCst);
                }
            }
            Err(std_mpsc::RecvTimeoutError::Timeout) => {}
            Err(std_mpsc::RecvTimeoutError::Disconnected) => {
                shared.stream_alive.store(false, Ordering::SeqCst);
            }
        }
    }

    drop(stream);
    shared.stream_alive.store(false, Ordering::SeqCst);
    shared.paused.store(false, Ordering::SeqCst);
    debug!("segment capture stopped");
}
