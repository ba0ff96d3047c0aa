//! Frame source trait

use crate::Result;
use crate::types::RawFrame;

/// Trait for frame producers
///
/// Sources abstract over live cameras, sampled video files and host-fed frames,
/// and handle their own pacing internally. The capture loop owns the source for
/// the whole session and is the only caller.
#[async_trait::async_trait]
pub trait FrameSource: Send + 'static {
    /// Acquire the underlying device or file
    ///
    /// Fails with [`StreamError::Permission`](crate::StreamError::Permission) when
    /// access is denied and [`StreamError::Device`](crate::StreamError::Device) when
    /// the resource is missing or unusable.
    async fn open(&mut self) -> Result<()>;

    /// Get the next frame
    ///
    /// Returns:
    /// - `Ok(Some(frame))` - New frame available
    /// - `Ok(None)` - Stream ended (file fully sampled, feeder dropped)
    /// - `Err(Capture)` - This frame failed, the next call may succeed
    /// - `Err(Device)` - The source is gone, the session must end
    ///
    /// Each source handles timing internally:
    /// - Camera: waits for the next frame clock tick
    /// - File: extracts the next sample offset
    /// - Feed: waits for the host to push a frame
    async fn capture_next(&mut self) -> Result<Option<RawFrame>>;

    /// Release the device or file
    ///
    /// Called on every exit path of a session. Must be idempotent and must not fail.
    async fn close(&mut self);

    /// Short description for logs
    fn describe(&self) -> String;

    /// Captures dropped because the previous frame had not been committed yet
    fn skipped_frames(&self) -> u64 {
        0
    }
}

#[async_trait::async_trait]
impl FrameSource for Box<dyn FrameSource> {
    async fn open(&mut self) -> Result<()> {
        (**self).open().await
    }

    async fn capture_next(&mut self) -> Result<Option<RawFrame>> {
        (**self).capture_next().await
    }

    async fn close(&mut self) {
        (**self).close().await
    }

    fn describe(&self) -> String {
        (**self).describe()
    }

    fn skipped_frames(&self) -> u64 {
        (**self).skipped_frames()
    }
}
