//! Live camera source paced by a frame clock

use bytes::Bytes;
use std::time::Duration;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, trace};

use crate::config::CameraFacing;
use crate::source::FrameSource;
use crate::types::RawFrame;
use crate::{Result, StreamError};

/// Capture parameters handed to a camera device on acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureSettings {
    pub width: u32,
    pub height: u32,
    pub facing: CameraFacing,
    /// Rate the device should deliver at, and the rate the source grabs at
    pub fps: u32,
}

impl CaptureSettings {
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.fps.max(1) as f64)
    }
}

/// Hardware seam for live cameras.
#[async_trait::async_trait]
pub trait CameraDevice: Send + 'static {
    /// Acquire the device stream
    async fn acquire(&mut self, settings: &CaptureSettings) -> Result<()>;

    /// Grab the most recent encoded frame.
    ///
    /// Frames the device buffered since the previous grab are dropped, so the
    /// result is never older than the capture tick that asked for it.
    async fn grab(&mut self) -> Result<Bytes>;

    /// Stop the device stream. Idempotent.
    async fn release(&mut self);

    fn name(&self) -> String;
}

/// Periodic capture signal.
///
/// Stands in for the compositor refresh that paces capture on display hosts.
/// Ticks that fire while the previous frame is still being committed are
/// skipped and counted, never delivered late in a burst.
#[derive(Debug)]
pub struct FrameClock {
    period: Duration,
    next: Instant,
    skipped: u64,
}

impl FrameClock {
    /// Create a clock whose first tick fires immediately
    pub fn new(period: Duration) -> Self {
        let period = period.max(Duration::from_millis(1));
        Self { period, next: Instant::now(), skipped: 0 }
    }

    /// Wait for the next tick, skipping any that were missed
    pub async fn tick(&mut self) -> Instant {
        sleep_until(self.next).await;

        let late = Instant::now().saturating_duration_since(self.next);
        let missed = (late.as_nanos() / self.period.as_nanos()) as u64;
        if missed > 0 {
            trace!(missed, "Frame clock skipped ticks");
            self.skipped += missed;
        }

        let fired = self.next + self.period.saturating_mul(missed.min(u32::MAX as u64) as u32);
        self.next = fired + self.period;
        fired
    }

    /// Ticks skipped so far
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

/// Live camera source.
pub struct CameraSource<D: CameraDevice> {
    device: D,
    settings: CaptureSettings,
    clock: Option<FrameClock>,
    started: Option<Instant>,
    skipped_before: u64,
}

impl<D: CameraDevice> CameraSource<D> {
    /// Create a camera source capturing at `settings.fps`
    pub fn new(device: D, settings: CaptureSettings) -> Self {
        Self { device, settings, clock: None, started: None, skipped_before: 0 }
    }

    pub fn settings(&self) -> &CaptureSettings {
        &self.settings
    }

    /// Change which way the camera faces.
    ///
    /// Only allowed while the source is closed, so that a facing switch always
    /// starts a new session with fresh sequencing.
    pub fn set_facing(&mut self, facing: CameraFacing) -> Result<()> {
        if self.clock.is_some() {
            return Err(StreamError::invalid_state("switch camera facing", "active"));
        }
        self.settings.facing = facing;
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.clock.is_some()
    }
}

#[async_trait::async_trait]
impl<D: CameraDevice> FrameSource for CameraSource<D> {
    async fn open(&mut self) -> Result<()> {
        if self.clock.is_some() {
            return Ok(());
        }

        self.device.acquire(&self.settings).await?;
        info!(
            device = %self.device.name(),
            width = self.settings.width,
            height = self.settings.height,
            facing = ?self.settings.facing,
            fps = self.settings.fps,
            "Camera acquired"
        );

        self.clock = Some(FrameClock::new(self.settings.period()));
        self.started = Some(Instant::now());
        Ok(())
    }

    async fn capture_next(&mut self) -> Result<Option<RawFrame>> {
        let (Some(clock), Some(started)) = (self.clock.as_mut(), self.started) else {
            return Err(StreamError::device_unavailable("camera is not open"));
        };

        let fired = clock.tick().await;
        let data = self.device.grab().await?;
        let timestamp_ms = fired.saturating_duration_since(started).as_millis() as u64;

        trace!(timestamp_ms, size = data.len(), "Camera frame grabbed");
        Ok(Some(RawFrame::new(data, timestamp_ms)))
    }

    async fn close(&mut self) {
        if let Some(clock) = self.clock.take() {
            self.skipped_before += clock.skipped();
            debug!(device = %self.device.name(), "Releasing camera");
        }
        self.started = None;
        self.device.release().await;
    }

    fn describe(&self) -> String {
        format!("camera {} ({:?})", self.device.name(), self.settings.facing)
    }

    fn skipped_frames(&self) -> u64 {
        self.skipped_before + self.clock.as_ref().map_or(0, FrameClock::skipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ScriptedCamera;

    fn settings(fps: u32) -> CaptureSettings {
        CaptureSettings { width: 320, height: 240, facing: CameraFacing::Back, fps }
    }

    #[tokio::test(start_paused = true)]
    async fn clock_skips_missed_ticks_instead_of_bursting() {
        let mut clock = FrameClock::new(Duration::from_millis(10));
        let t0 = clock.tick().await;

        // Simulate a slow commit spanning two and a half periods
        tokio::time::sleep(Duration::from_millis(35)).await;
        let t1 = clock.tick().await;
        assert_eq!(t1 - t0, Duration::from_millis(30));
        assert_eq!(clock.skipped(), 2);

        let t2 = clock.tick().await;
        assert_eq!(t2 - t1, Duration::from_millis(10));
        assert_eq!(clock.skipped(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn frames_are_timestamped_from_open() {
        let camera = ScriptedCamera::new(vec![Ok(vec![1]), Ok(vec![2]), Ok(vec![3])]);
        let mut source = CameraSource::new(camera, settings(10));
        source.open().await.expect("open");

        let mut stamps = Vec::new();
        for _ in 0..3 {
            let frame = source.capture_next().await.expect("capture").expect("frame");
            stamps.push(frame.timestamp_ms);
        }
        assert_eq!(stamps, vec![0, 100, 200]);
    }

    #[tokio::test]
    async fn capture_before_open_is_device_error() {
        let mut source = CameraSource::new(ScriptedCamera::new(vec![]), settings(30));
        let err = source.capture_next().await.unwrap_err();
        assert!(err.is_fatal_to_session());
    }

    #[tokio::test]
    async fn permission_denied_surfaces_from_open() {
        let camera = ScriptedCamera::denied();
        let mut source = CameraSource::new(camera, settings(30));
        let err = source.open().await.unwrap_err();
        assert!(matches!(err, StreamError::Permission { .. }));
        assert!(!source.is_open());
    }

    #[tokio::test]
    async fn facing_switch_requires_closed_source() {
        let camera = ScriptedCamera::new(vec![Ok(vec![1])]);
        let released = camera.released_flag();
        let acquired = camera.acquired_facing();
        let mut source = CameraSource::new(camera, settings(30));

        source.set_facing(CameraFacing::Front).expect("closed source");
        source.open().await.expect("open");
        assert_eq!(*acquired.lock().expect("lock"), Some(CameraFacing::Front));
        assert!(source.set_facing(CameraFacing::Back).is_err());

        source.close().await;
        assert!(released.load(std::sync::atomic::Ordering::SeqCst));
        source.set_facing(CameraFacing::Back).expect("closed again");
    }
}
