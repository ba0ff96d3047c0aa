//! Host-fed frame source.
//!
//! For hosts that already receive frames from a camera view callback. The host
//! registers one [`FrameFeeder`] and calls [`FrameFeeder::feed`] from its callback;
//! the capture loop consumes through a single-slot channel. While the loop has not
//! taken the previous frame, new frames are refused with [`FeedOutcome::Skipped`]
//! instead of queueing without bound.

use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::Result;
use crate::source::FrameSource;
use crate::types::RawFrame;

/// What happened to a fed frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedOutcome {
    /// Queued for the capture loop
    Accepted,
    /// Dropped, the previous frame is still pending
    Skipped,
    /// Dropped, no session is consuming this feed
    Closed,
}

struct FeedShared {
    epoch: OnceLock<Instant>,
    skipped: AtomicU64,
}

/// Host handle for pushing frames into a [`FeedSource`].
#[derive(Clone)]
pub struct FrameFeeder {
    tx: mpsc::Sender<RawFrame>,
    shared: Arc<FeedShared>,
}

impl FrameFeeder {
    /// Offer a frame to the capture loop without waiting
    pub fn feed(&self, data: impl Into<Bytes>) -> FeedOutcome {
        let timestamp_ms = self
            .shared
            .epoch
            .get()
            .map_or(0, |epoch| epoch.elapsed().as_millis() as u64);

        match self.tx.try_send(RawFrame::new(data, timestamp_ms)) {
            Ok(()) => FeedOutcome::Accepted,
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.shared.skipped.fetch_add(1, Ordering::Relaxed);
                trace!("Fed frame skipped, previous frame still pending");
                FeedOutcome::Skipped
            }
            Err(mpsc::error::TrySendError::Closed(_)) => FeedOutcome::Closed,
        }
    }

    /// Whether the consuming source is gone
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Source consuming frames pushed through a [`FrameFeeder`].
///
/// Ends the stream once every feeder has been dropped.
pub struct FeedSource {
    rx: mpsc::Receiver<RawFrame>,
    shared: Arc<FeedShared>,
}

impl FeedSource {
    /// Create a connected source and feeder pair
    pub fn channel() -> (FeedSource, FrameFeeder) {
        let (tx, rx) = mpsc::channel(1);
        let shared = Arc::new(FeedShared { epoch: OnceLock::new(), skipped: AtomicU64::new(0) });
        (FeedSource { rx, shared: Arc::clone(&shared) }, FrameFeeder { tx, shared })
    }
}

#[async_trait::async_trait]
impl FrameSource for FeedSource {
    async fn open(&mut self) -> Result<()> {
        let _ = self.shared.epoch.set(Instant::now());
        debug!("Host feed opened");
        Ok(())
    }

    async fn capture_next(&mut self) -> Result<Option<RawFrame>> {
        Ok(self.rx.recv().await)
    }

    async fn close(&mut self) {
        self.rx.close();
    }

    fn describe(&self) -> String {
        "host feed".to_string()
    }

    fn skipped_frames(&self) -> u64 {
        self.shared.skipped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_frame_is_skipped_until_first_is_consumed() {
        let (mut source, feeder) = FeedSource::channel();
        source.open().await.expect("open");

        assert_eq!(feeder.feed(vec![1]), FeedOutcome::Accepted);
        assert_eq!(feeder.feed(vec![2]), FeedOutcome::Skipped);
        assert_eq!(source.skipped_frames(), 1);

        let frame = source.capture_next().await.expect("capture").expect("frame");
        assert_eq!(frame.data.as_ref(), &[1]);
        assert_eq!(feeder.feed(vec![3]), FeedOutcome::Accepted);
    }

    #[tokio::test]
    async fn dropping_all_feeders_ends_the_stream() {
        let (mut source, feeder) = FeedSource::channel();
        source.open().await.expect("open");
        let second = feeder.clone();
        drop(feeder);
        assert_eq!(second.feed(vec![7]), FeedOutcome::Accepted);
        drop(second);

        assert!(source.capture_next().await.expect("capture").is_some());
        assert!(source.capture_next().await.expect("capture").is_none());
    }

    #[tokio::test]
    async fn closed_source_refuses_frames() {
        let (mut source, feeder) = FeedSource::channel();
        source.open().await.expect("open");
        source.close().await;

        assert!(feeder.is_closed());
        assert_eq!(feeder.feed(vec![1]), FeedOutcome::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn timestamps_count_from_open() {
        let (mut source, feeder) = FeedSource::channel();
        source.open().await.expect("open");
        tokio::time::sleep(std::time::Duration::from_millis(250)).await;

        feeder.feed(vec![1]);
        let frame = source.capture_next().await.expect("capture").expect("frame");
        assert_eq!(frame.timestamp_ms, 250);
    }
}
