//! File sampling source for stored videos

use bytes::Bytes;
use std::collections::VecDeque;
use tracing::{debug, info, trace};

use crate::source::FrameSource;
use crate::types::RawFrame;
use crate::{Result, StreamError};

/// Decoder seam for file sampling.
#[async_trait::async_trait]
pub trait FrameExtractor: Send + 'static {
    /// Total video duration in milliseconds
    async fn duration_ms(&mut self) -> Result<u64>;

    /// Encoded frame at `offset_ms` into the video
    async fn extract(&mut self, offset_ms: u64) -> Result<Bytes>;

    fn name(&self) -> String;
}

/// Sample offsets for a video: `i * interval` for `i` in `0..floor(duration / interval)`.
///
/// ```rust
/// use framecast::sources::sample_offsets;
///
/// let offsets = sample_offsets(300_000, 10_000);
/// assert_eq!(offsets.len(), 30);
/// assert_eq!(offsets[29], 290_000);
/// ```
pub fn sample_offsets(duration_ms: u64, interval_ms: u64) -> Vec<u64> {
    if interval_ms == 0 {
        return Vec::new();
    }
    (0..duration_ms / interval_ms).map(|i| i * interval_ms).collect()
}

enum Run {
    NotStarted,
    Running(VecDeque<u64>),
    Finished,
}

/// Source yielding frames at fixed offsets of a stored video.
///
/// One sampler is one extraction run: once opened it cannot be reopened, a new
/// run needs a new sampler over the same file.
pub struct VideoSampler<E: FrameExtractor> {
    extractor: E,
    interval_ms: u64,
    run: Run,
    total: usize,
}

impl<E: FrameExtractor> VideoSampler<E> {
    pub fn new(extractor: E, interval_ms: u64) -> Self {
        Self { extractor, interval_ms: interval_ms.max(1), run: Run::NotStarted, total: 0 }
    }

    /// Offsets not yet extracted
    pub fn remaining(&self) -> usize {
        match &self.run {
            Run::Running(offsets) => offsets.len(),
            Run::NotStarted | Run::Finished => 0,
        }
    }

    /// Number of samples planned for this run
    pub fn total(&self) -> usize {
        self.total
    }
}

#[async_trait::async_trait]
impl<E: FrameExtractor> FrameSource for VideoSampler<E> {
    async fn open(&mut self) -> Result<()> {
        if !matches!(self.run, Run::NotStarted) {
            return Err(StreamError::invalid_state(
                "reopen a video sampler",
                "already sampled; create a new run",
            ));
        }

        let duration_ms = self.extractor.duration_ms().await?;
        let offsets: VecDeque<u64> = sample_offsets(duration_ms, self.interval_ms).into();
        self.total = offsets.len();

        info!(
            video = %self.extractor.name(),
            duration_ms,
            interval_ms = self.interval_ms,
            samples = self.total,
            "Video sampling started"
        );
        self.run = Run::Running(offsets);
        Ok(())
    }

    async fn capture_next(&mut self) -> Result<Option<RawFrame>> {
        let offsets = match &mut self.run {
            Run::Running(offsets) => offsets,
            Run::Finished => return Ok(None),
            Run::NotStarted => {
                return Err(StreamError::device_unavailable("video sampler is not open"));
            }
        };

        let Some(offset_ms) = offsets.pop_front() else {
            debug!("All {} samples extracted", self.total);
            self.run = Run::Finished;
            return Ok(None);
        };

        let data = self.extractor.extract(offset_ms).await?;
        trace!(offset_ms, size = data.len(), "Sample extracted");
        Ok(Some(RawFrame::new(data, offset_ms)))
    }

    async fn close(&mut self) {
        if matches!(self.run, Run::Running(_)) {
            debug!(remaining = self.remaining(), "Video sampling closed early");
        }
        if !matches!(self.run, Run::NotStarted) {
            self.run = Run::Finished;
        }
    }

    fn describe(&self) -> String {
        format!("video {} every {}ms", self.extractor.name(), self.interval_ms)
    }
}
