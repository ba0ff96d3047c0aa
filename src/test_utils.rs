//! Scripted test doubles for sources, devices and transports
//!
//! Shared by unit tests, integration tests and benches so every layer of the
//! pipeline can be driven without a camera, ffmpeg or a live backend.

#![cfg(any(test, feature = "benchmark"))]

use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use uuid::Uuid;

use crate::config::CameraFacing;
use crate::source::FrameSource;
use crate::sources::{CameraDevice, CaptureSettings, FrameExtractor};
use crate::types::{BackendResponse, Batch, Frame, RawFrame};
use crate::upload::{Transport, classify_status};
use crate::{Result, StreamError};

/// Install a test-friendly tracing subscriber. Safe to call more than once.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("framecast=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// A sealed batch of `len` frames with sequences starting at `first`
pub fn batch_of(first: u64, len: usize) -> Batch {
    let frames = (first..first + len as u64)
        .map(|seq| Frame::new(format!("jpeg-{seq}").into_bytes(), seq * 100, seq))
        .collect();
    Batch::seal(frames).unwrap_or_else(|| panic!("batch_of called with len 0"))
}

/// Camera device returning a fixed script of grabs.
///
/// Once the script runs out, `grab` reports the camera as disconnected.
pub struct ScriptedCamera {
    script: VecDeque<Result<Vec<u8>>>,
    deny: bool,
    released: Arc<AtomicBool>,
    acquired_facing: Arc<Mutex<Option<CameraFacing>>>,
}

impl ScriptedCamera {
    pub fn new(script: Vec<Result<Vec<u8>>>) -> Self {
        Self {
            script: script.into(),
            deny: false,
            released: Arc::new(AtomicBool::new(false)),
            acquired_facing: Arc::new(Mutex::new(None)),
        }
    }

    /// A camera whose acquisition is refused
    pub fn denied() -> Self {
        Self { deny: true, ..Self::new(Vec::new()) }
    }

    /// Flag set once the device has been released
    pub fn released_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.released)
    }

    /// Facing requested by the last acquisition
    pub fn acquired_facing(&self) -> Arc<Mutex<Option<CameraFacing>>> {
        Arc::clone(&self.acquired_facing)
    }
}

#[async_trait::async_trait]
impl CameraDevice for ScriptedCamera {
    async fn acquire(&mut self, settings: &CaptureSettings) -> Result<()> {
        if self.deny {
            return Err(StreamError::permission_denied("scripted camera"));
        }
        *self.acquired_facing.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(settings.facing);
        self.released.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn grab(&mut self) -> Result<Bytes> {
        match self.script.pop_front() {
            Some(Ok(data)) => Ok(Bytes::from(data)),
            Some(Err(err)) => Err(err),
            None => Err(StreamError::device_unavailable("scripted camera disconnected")),
        }
    }

    async fn release(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }

    fn name(&self) -> String {
        "scripted".to_string()
    }
}

/// Video extractor over a synthetic clip of a given duration.
pub struct ScriptedExtractor {
    duration_ms: u64,
    fail_at: Option<u64>,
}

impl ScriptedExtractor {
    pub fn new(duration_ms: u64) -> Self {
        Self { duration_ms, fail_at: None }
    }

    /// Make extraction at `offset_ms` fail as if the file vanished
    pub fn fail_at(mut self, offset_ms: u64) -> Self {
        self.fail_at = Some(offset_ms);
        self
    }
}

#[async_trait::async_trait]
impl FrameExtractor for ScriptedExtractor {
    async fn duration_ms(&mut self) -> Result<u64> {
        Ok(self.duration_ms)
    }

    async fn extract(&mut self, offset_ms: u64) -> Result<Bytes> {
        if self.fail_at == Some(offset_ms) {
            return Err(StreamError::device_unavailable("scripted video removed"));
        }
        Ok(Bytes::from(offset_ms.to_be_bytes().to_vec()))
    }

    fn name(&self) -> String {
        format!("scripted-{}ms", self.duration_ms)
    }
}

/// One scripted capture outcome.
#[derive(Debug, Clone)]
pub enum Step {
    Frame(Vec<u8>),
    /// Transient capture failure
    CaptureError,
    /// The device went away
    DeviceError,
    /// End of stream
    End,
}

/// Observable lifecycle of a [`ScriptedSource`].
#[derive(Debug, Default)]
pub struct SourceProbe {
    pub opened: AtomicBool,
    pub closed: AtomicBool,
    pub captures: AtomicUsize,
}

impl SourceProbe {
    pub fn is_opened(&self) -> bool {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }
}

/// Frame source replaying a script of [`Step`]s at a fixed period.
///
/// After the script runs out the source either ends the stream or idles until
/// cancelled, depending on [`ScriptedSource::then_idle`].
pub struct ScriptedSource {
    script: VecDeque<Step>,
    period: Duration,
    idle_when_done: bool,
    endless: bool,
    open_delay: Duration,
    open_error: Option<StreamError>,
    probe: Arc<SourceProbe>,
    elapsed_ms: u64,
}

impl ScriptedSource {
    pub fn new(script: Vec<Step>) -> Self {
        Self {
            script: script.into(),
            period: Duration::from_millis(10),
            idle_when_done: false,
            endless: false,
            open_delay: Duration::ZERO,
            open_error: None,
            probe: Arc::new(SourceProbe::default()),
            elapsed_ms: 0,
        }
    }

    /// `count` frames, then end of stream
    pub fn frames(count: usize) -> Self {
        Self::new((0..count).map(|i| Step::Frame(vec![i as u8; 8])).collect())
    }

    /// Frames forever, one per period
    pub fn endless() -> Self {
        Self { endless: true, ..Self::new(Vec::new()) }
    }

    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Wait until cancelled once the script runs out
    pub fn then_idle(mut self) -> Self {
        self.idle_when_done = true;
        self
    }

    /// Take `delay` to open
    pub fn slow_open(mut self, delay: Duration) -> Self {
        self.open_delay = delay;
        self
    }

    /// Fail `open` with `err`
    pub fn failing_open(mut self, err: StreamError) -> Self {
        self.open_error = Some(err);
        self
    }

    pub fn probe(&self) -> Arc<SourceProbe> {
        Arc::clone(&self.probe)
    }
}

#[async_trait::async_trait]
impl FrameSource for ScriptedSource {
    async fn open(&mut self) -> Result<()> {
        if !self.open_delay.is_zero() {
            tokio::time::sleep(self.open_delay).await;
        }
        if let Some(err) = self.open_error.take() {
            return Err(err);
        }
        self.probe.opened.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn capture_next(&mut self) -> Result<Option<RawFrame>> {
        tokio::time::sleep(self.period).await;
        self.probe.captures.fetch_add(1, Ordering::SeqCst);
        let timestamp_ms = self.elapsed_ms;
        self.elapsed_ms += self.period.as_millis() as u64;

        if self.endless {
            return Ok(Some(RawFrame::new(timestamp_ms.to_be_bytes().to_vec(), timestamp_ms)));
        }

        match self.script.pop_front() {
            Some(Step::Frame(data)) => Ok(Some(RawFrame::new(data, timestamp_ms))),
            Some(Step::CaptureError) => Err(StreamError::capture_failed("scripted glitch")),
            Some(Step::DeviceError) => Err(StreamError::device_unavailable("scripted unplug")),
            Some(Step::End) => Ok(None),
            None if self.idle_when_done => std::future::pending().await,
            None => Ok(None),
        }
    }

    async fn close(&mut self) {
        self.probe.closed.store(true, Ordering::SeqCst);
    }

    fn describe(&self) -> String {
        "scripted source".to_string()
    }
}

/// Scripted backend reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    /// Respond with this HTTP status
    Status(u16),
    /// Fail before any response arrives
    Network,
}

#[derive(Default)]
struct Recorded {
    script: VecDeque<Reply>,
    delivered: Vec<Vec<u64>>,
    sessions: Vec<Uuid>,
}

/// Transport recording every attempt and replying from a script.
pub struct RecordingTransport {
    fallback: Reply,
    delay: Duration,
    recorded: Mutex<Recorded>,
    attempts: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl RecordingTransport {
    /// Reply the same way to every attempt
    pub fn always(reply: Reply) -> Self {
        Self::build(Vec::new(), reply)
    }

    /// Reply from `script`, then with 200 once it runs out
    pub fn scripted(script: Vec<Reply>) -> Self {
        Self::build(script, Reply::Status(200))
    }

    fn build(script: Vec<Reply>, fallback: Reply) -> Self {
        Self {
            fallback,
            delay: Duration::ZERO,
            recorded: Mutex::new(Recorded { script: script.into(), ..Default::default() }),
            attempts: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    /// Hold every attempt for `delay` before replying
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Highest number of attempts that overlapped in time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Sequences of every delivered batch, in delivery order
    pub fn delivered_sequences(&self) -> Vec<Vec<u64>> {
        self.lock().delivered.clone()
    }

    /// Session ids seen on delivered batches
    pub fn sessions(&self) -> Vec<Uuid> {
        self.lock().sessions.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Recorded> {
        self.recorded.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn answer(reply: Reply) -> Result<BackendResponse> {
        match reply {
            Reply::Status(status) => classify_status(status, r#"{"message":[]}"#.to_string()),
            Reply::Network => Err(StreamError::network("scripted connection reset")),
        }
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl Transport for RecordingTransport {
    async fn post_batch(&self, session_id: Uuid, batch: &Batch) -> Result<BackendResponse> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlight(&self.in_flight);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let reply = self.lock().script.pop_front().unwrap_or(self.fallback);
        let result = Self::answer(reply);
        if result.is_ok() {
            let mut recorded = self.lock();
            recorded.delivered.push(batch.frames().iter().map(|f| f.sequence).collect());
            recorded.sessions.push(session_id);
        }
        result
    }

    async fn probe(&self) -> Result<()> {
        Ok(())
    }
}
