//! ffmpeg-backed camera device and frame extractor.
//!
//! Decoding stays outside the crate: a child `ffmpeg` process captures or seeks
//! and writes MJPEG to stdout, which is split into frames on JPEG SOI/EOI markers.

use bytes::{Bytes, BytesMut};
use futures::FutureExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, trace, warn};

use super::camera::{CameraDevice, CaptureSettings};
use super::sampler::FrameExtractor;
use crate::config::CameraFacing;
use crate::{Result, StreamError};

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];
const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;
const READ_CHUNK: usize = 64 * 1024;

/// Splits a concatenated MJPEG byte stream into individual JPEG images.
pub struct JpegStreamReader<R> {
    reader: R,
    buf: BytesMut,
}

impl<R: AsyncRead + Unpin> JpegStreamReader<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, buf: BytesMut::with_capacity(READ_CHUNK) }
    }

    /// Read the next complete JPEG.
    ///
    /// Returns `Ok(None)` on a clean end of stream. Bytes before a start-of-image
    /// marker are discarded. A frame larger than 16 MiB is a capture error.
    pub async fn next_frame(&mut self) -> Result<Option<Bytes>> {
        loop {
            if let Some(frame) = self.split_frame()? {
                return Ok(Some(frame));
            }

            self.buf.reserve(READ_CHUNK);
            let read = self
                .reader
                .read_buf(&mut self.buf)
                .await
                .map_err(|e| {
                    StreamError::device_unavailable_with_source("frame pipe closed", Box::new(e))
                })?;
            if read == 0 {
                if !self.buf.is_empty() {
                    debug!(trailing = self.buf.len(), "Discarding incomplete frame at stream end");
                }
                return Ok(None);
            }
        }
    }

    /// Read the newest complete JPEG available without waiting for more input.
    ///
    /// Waits for one frame like [`next_frame`](Self::next_frame), then drains
    /// whatever the pipe already holds and keeps only the last complete frame.
    /// A trailing partial frame stays buffered for the next call.
    pub async fn latest_frame(&mut self) -> Result<Option<Bytes>> {
        let Some(mut latest) = self.next_frame().await? else {
            return Ok(None);
        };

        let mut dropped = 0u64;
        loop {
            while let Some(frame) = self.split_frame()? {
                latest = frame;
                dropped += 1;
            }

            self.buf.reserve(READ_CHUNK);
            match self.reader.read_buf(&mut self.buf).now_or_never() {
                Some(Ok(0)) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    return Err(StreamError::device_unavailable_with_source(
                        "frame pipe closed",
                        Box::new(e),
                    ));
                }
            }
        }

        if dropped > 0 {
            trace!(dropped, "Dropped stale buffered frames");
        }
        Ok(Some(latest))
    }

    fn split_frame(&mut self) -> Result<Option<Bytes>> {
        let Some(start) = find_marker(&self.buf, SOI, 0) else {
            // Keep a trailing 0xFF, it may be the first half of a marker
            let keep = usize::from(self.buf.last() == Some(&0xFF));
            let stale = self.buf.len() - keep;
            let _ = self.buf.split_to(stale);
            return Ok(None);
        };
        if start > 0 {
            let _ = self.buf.split_to(start);
        }

        match find_marker(&self.buf, EOI, SOI.len()) {
            Some(end) => Ok(Some(self.buf.split_to(end + EOI.len()).freeze())),
            None if self.buf.len() > MAX_FRAME_BYTES => {
                self.buf.clear();
                Err(StreamError::capture_failed("frame exceeded 16 MiB without end marker"))
            }
            None => Ok(None),
        }
    }
}

fn find_marker(haystack: &[u8], marker: [u8; 2], from: usize) -> Option<usize> {
    haystack.get(from..)?.windows(2).position(|w| w == marker).map(|pos| pos + from)
}

/// Resolve `"0"` style indices to V4L2 device nodes.
pub fn resolve_device(device: &str) -> PathBuf {
    match device.trim().parse::<u32>() {
        Ok(index) => PathBuf::from(format!("/dev/video{index}")),
        Err(_) => PathBuf::from(device),
    }
}

fn scale_filter(width: u32, height: u32, facing: CameraFacing) -> String {
    match facing {
        // Front cameras are mirrored so the preview matches what the user sees
        CameraFacing::Front => format!("scale={width}:{height},hflip"),
        CameraFacing::Back => format!("scale={width}:{height}"),
    }
}

fn spawn_error(program: &str, err: std::io::Error) -> StreamError {
    if err.kind() == std::io::ErrorKind::NotFound {
        StreamError::device_unavailable(format!("{program} not found on PATH"))
    } else {
        let reason = format!("failed to spawn {program}");
        StreamError::device_unavailable_with_source(reason, Box::new(err))
    }
}

/// V4L2 camera captured through an `ffmpeg` child process.
pub struct FfmpegCamera {
    device: PathBuf,
    child: Option<Child>,
    frames: Option<JpegStreamReader<ChildStdout>>,
}

impl FfmpegCamera {
    /// `device` is a node path like `/dev/video0` or a bare index
    pub fn new(device: &str) -> Self {
        Self { device: resolve_device(device), child: None, frames: None }
    }
}

#[async_trait::async_trait]
impl CameraDevice for FfmpegCamera {
    async fn acquire(&mut self, settings: &CaptureSettings) -> Result<()> {
        let display = self.device.display().to_string();

        // Surface permission problems before ffmpeg hides them behind its exit code
        tokio::fs::OpenOptions::new()
            .read(true)
            .open(&self.device)
            .await
            .map_err(|e| StreamError::from_source_io(display.clone(), e))?;

        let mut cmd = Command::new("ffmpeg");
        cmd.arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-f")
            .arg("video4linux2")
            .arg("-i")
            .arg(&self.device)
            .arg("-vf")
            .arg(scale_filter(settings.width, settings.height, settings.facing))
            .arg("-r")
            .arg(settings.fps.max(1).to_string())
            .arg("-f")
            .arg("image2pipe")
            .arg("-c:v")
            .arg("mjpeg")
            .arg("-q:v")
            .arg("5")
            .arg("-");
        cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::null()).kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| spawn_error("ffmpeg", e))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| StreamError::device_unavailable("failed to capture ffmpeg stdout"))?;

        self.frames = Some(JpegStreamReader::new(stdout));
        self.child = Some(child);
        Ok(())
    }

    async fn grab(&mut self) -> Result<Bytes> {
        let frames = self
            .frames
            .as_mut()
            .ok_or_else(|| StreamError::device_unavailable("camera stream not acquired"))?;
        match frames.latest_frame().await? {
            Some(frame) => Ok(frame),
            None => Err(StreamError::device_unavailable(format!(
                "camera stream from {} ended",
                self.device.display()
            ))),
        }
    }

    async fn release(&mut self) {
        self.frames = None;
        if let Some(mut child) = self.child.take() {
            if let Err(e) = child.kill().await {
                warn!("Failed to stop ffmpeg camera process: {}", e);
            }
        }
    }

    fn name(&self) -> String {
        self.device.display().to_string()
    }
}

/// Extracts single frames from a video file with `ffprobe`/`ffmpeg`.
pub struct FfmpegExtractor {
    path: PathBuf,
    width: u32,
    height: u32,
}

impl FfmpegExtractor {
    pub fn new<P: AsRef<Path>>(path: P, width: u32, height: u32) -> Self {
        Self { path: path.as_ref().to_path_buf(), width, height }
    }

    async fn check_readable(&self) -> Result<()> {
        tokio::fs::File::open(&self.path)
            .await
            .map(drop)
            .map_err(|e| StreamError::from_source_io(self.path.display().to_string(), e))
    }
}

/// Parse `ffprobe`'s `format=duration` output (seconds) into milliseconds.
pub fn parse_probe_duration(output: &str) -> Option<u64> {
    let seconds: f64 = output.trim().parse().ok()?;
    (seconds.is_finite() && seconds >= 0.0).then(|| (seconds * 1000.0).round() as u64)
}

#[async_trait::async_trait]
impl FrameExtractor for FfmpegExtractor {
    async fn duration_ms(&mut self) -> Result<u64> {
        self.check_readable().await?;

        let output = Command::new("ffprobe")
            .arg("-v")
            .arg("error")
            .arg("-show_entries")
            .arg("format=duration")
            .arg("-of")
            .arg("default=noprint_wrappers=1:nokey=1")
            .arg(&self.path)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| spawn_error("ffprobe", e))?;

        if !output.status.success() {
            return Err(StreamError::device_unavailable(format!(
                "ffprobe could not read {}",
                self.path.display()
            )));
        }

        let text = String::from_utf8_lossy(&output.stdout);
        parse_probe_duration(&text).ok_or_else(|| {
            StreamError::device_unavailable(format!(
                "no duration reported for {}",
                self.path.display()
            ))
        })
    }

    async fn extract(&mut self, offset_ms: u64) -> Result<Bytes> {
        // A file removed mid-run is a device failure, not a bad frame
        self.check_readable().await?;

        let seek = format!("{}.{:03}", offset_ms / 1000, offset_ms % 1000);
        let output = Command::new("ffmpeg")
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-ss")
            .arg(&seek)
            .arg("-i")
            .arg(&self.path)
            .arg("-frames:v")
            .arg("1")
            .arg("-vf")
            .arg(scale_filter(self.width, self.height, CameraFacing::Back))
            .arg("-f")
            .arg("image2pipe")
            .arg("-c:v")
            .arg("mjpeg")
            .arg("-")
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| spawn_error("ffmpeg", e))?;

        if !output.status.success() || output.stdout.is_empty() {
            return Err(StreamError::capture_failed(format!(
                "no frame extracted at {seek}s from {}",
                self.path.display()
            )));
        }
        Ok(Bytes::from(output.stdout))
    }

    fn name(&self) -> String {
        self.path.display().to_string()
    }
}
