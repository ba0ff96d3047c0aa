//! Session task: capture loop, upload dispatch and teardown

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::StreamError;
use crate::buffer::{BufferState, FrameBuffer};
use crate::config::StreamConfig;
use crate::source::FrameSource;
use crate::types::{
    Batch, SessionCounters, SessionEnd, SessionSummary, StreamState, StreamStatus, UploadResult,
};
use crate::upload::Uploader;

/// Counters shared between the capture loop and its upload tasks
#[derive(Debug, Default)]
pub(crate) struct Counters {
    frames_captured: AtomicU64,
    batches_sent: AtomicU64,
    batches_failed: AtomicU64,
    capture_errors: AtomicU64,
    frames_skipped: AtomicU64,
    batches_abandoned: AtomicU64,
    frames_dropped: AtomicU64,
}

impl Counters {
    pub(crate) fn snapshot(&self) -> SessionCounters {
        SessionCounters {
            frames_captured: self.frames_captured.load(Ordering::Relaxed),
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            capture_errors: self.capture_errors.load(Ordering::Relaxed),
            frames_skipped: self.frames_skipped.load(Ordering::Relaxed),
            batches_abandoned: self.batches_abandoned.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
        }
    }

    fn record_upload(&self, result: &UploadResult) {
        let counter = if result.is_delivered() { &self.batches_sent } else { &self.batches_failed };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Writes one session's view into the controller's status channel.
///
/// Updates are ignored once the channel has moved on to another session.
#[derive(Clone)]
pub(crate) struct StatusPublisher {
    tx: Arc<watch::Sender<StreamStatus>>,
    session_id: Uuid,
}

impl StatusPublisher {
    pub(crate) fn new(tx: Arc<watch::Sender<StreamStatus>>, session_id: Uuid) -> Self {
        Self { tx, session_id }
    }

    pub(crate) fn update(&self, f: impl FnOnce(&mut StreamStatus)) {
        self.tx.send_if_modified(|status| {
            if status.session_id != Some(self.session_id) {
                return false;
            }
            f(status);
            true
        });
    }

    /// Snapshots under the channel's write lock, so published counters only grow
    fn counters(&self, counters: &Counters) {
        self.update(|status| status.counters = counters.snapshot());
    }
}

/// One start-to-stop lifespan of the pipeline.
///
/// Owns the source and the frame buffer. Uploads run as tasks in a `JoinSet`
/// and report back through the shared counters.
pub(crate) struct Session<S: FrameSource> {
    id: Uuid,
    source: S,
    buffer: FrameBuffer,
    uploader: Uploader,
    uploads: JoinSet<()>,
    counters: Arc<Counters>,
    publisher: StatusPublisher,
    cancel: CancellationToken,
    next_sequence: u64,
    partial_flush: bool,
    grace: Duration,
    max_capture_errors: Option<u32>,
}

impl<S: FrameSource> Session<S> {
    pub(crate) fn new(
        id: Uuid,
        source: S,
        uploader: Uploader,
        config: &StreamConfig,
        publisher: StatusPublisher,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            source,
            buffer: FrameBuffer::new(config.frame_batch_size),
            uploader,
            uploads: JoinSet::new(),
            counters: Arc::new(Counters::default()),
            publisher,
            cancel,
            next_sequence: 0,
            partial_flush: config.partial_flush_on_stop,
            grace: config.upload_grace(),
            max_capture_errors: config.max_consecutive_capture_errors,
        }
    }

    /// Run the capture loop until stopped, then tear the session down
    pub(crate) async fn run(mut self) -> SessionSummary {
        info!(
            session = %self.id,
            source = %self.source.describe(),
            batch_size = self.buffer.capacity(),
            "Session started"
        );

        let mut consecutive_errors = 0u32;
        let mut pending: Option<Batch> = None;

        let end = loop {
            // A sealed batch waits here for an upload slot; capture pauses meanwhile
            if let Some(batch) = pending.take() {
                let permit = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => {
                        pending = Some(batch);
                        break SessionEnd::Stopped;
                    }
                    permit = self.uploader.acquire_slot() => permit,
                };
                self.dispatch(batch, permit.ok());
                continue;
            }

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break SessionEnd::Stopped,
                result = self.source.capture_next() => result,
            };
            self.reap_uploads();

            match result {
                Ok(Some(raw)) => {
                    consecutive_errors = 0;
                    let frame = raw.sequenced(self.next_sequence);
                    self.next_sequence += 1;
                    trace!(sequence = frame.sequence, timestamp_ms = frame.timestamp_ms, "Frame");
                    self.counters.frames_captured.fetch_add(1, Ordering::Relaxed);

                    if let BufferState::BatchReady(batch) = self.buffer.push(frame) {
                        pending = Some(batch);
                    }
                }
                Ok(None) => {
                    info!(session = %self.id, frames = self.next_sequence, "Source ended");
                    break SessionEnd::EndOfStream;
                }
                Err(err) if err.is_fatal_to_session() => {
                    error!(session = %self.id, "Source failed: {}", err);
                    break SessionEnd::Failed(err.to_string());
                }
                Err(err) => {
                    consecutive_errors += 1;
                    self.counters.capture_errors.fetch_add(1, Ordering::Relaxed);
                    warn!(session = %self.id, consecutive_errors, "Capture failed: {}", err);

                    let limit = self.max_capture_errors.map(|limit| limit.max(1));
                    if limit.is_some_and(|limit| consecutive_errors >= limit) {
                        let escalated = StreamError::device_unavailable(format!(
                            "{consecutive_errors} consecutive capture failures, last: {err}"
                        ));
                        error!(session = %self.id, "Source failed: {}", escalated);
                        break SessionEnd::Failed(escalated.to_string());
                    }
                }
            }

            self.publish_counters();
        };

        self.finish(end, pending).await
    }

    fn publish_counters(&self) {
        self.counters.frames_skipped.store(self.source.skipped_frames(), Ordering::Relaxed);
        self.publisher.counters(&self.counters);
    }

    /// Spawn an upload. Without a permit the task waits for a slot itself.
    fn dispatch(&mut self, batch: Batch, permit: Option<OwnedSemaphorePermit>) {
        debug!(
            session = %self.id,
            first = batch.first_sequence(),
            frames = batch.len(),
            in_flight = self.uploads.len(),
            "Dispatching batch"
        );

        let uploader = self.uploader.clone();
        let counters = Arc::clone(&self.counters);
        let publisher = self.publisher.clone();
        let session_id = self.id;

        self.uploads.spawn(async move {
            let _permit = match permit {
                Some(permit) => Some(permit),
                None => uploader.acquire_slot().await.ok(),
            };
            let result = uploader.send(session_id, &batch).await;
            if let UploadResult::Delivered { response, .. } = &result {
                if let Some(labels) = response.labels() {
                    debug!(
                        first = batch.first_sequence(),
                        labels = labels.len(),
                        "Labels received"
                    );
                }
            }
            // Accounting has no await after it, so an aborted task is never half counted
            counters.record_upload(&result);
            publisher.counters(&counters);
        });
    }

    fn reap_uploads(&mut self) {
        while let Some(joined) = self.uploads.try_join_next() {
            if let Err(err) = joined {
                warn!(session = %self.id, "Upload task failed: {}", err);
                self.counters.batches_failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    async fn finish(mut self, end: SessionEnd, pending: Option<Batch>) -> SessionSummary {
        match &end {
            SessionEnd::Failed(message) => {
                let message = message.clone();
                self.publisher.update(|status| {
                    status.state = StreamState::Errored;
                    status.last_error = Some(message);
                });
            }
            SessionEnd::EndOfStream => {
                self.publisher.update(|status| status.state = StreamState::Stopping);
            }
            SessionEnd::Stopped => {}
        }

        self.source.close().await;
        debug!(session = %self.id, "Source closed");

        if let Some(batch) = pending {
            self.dispatch(batch, None);
        }

        if self.partial_flush {
            if let Some(batch) = self.buffer.flush_partial() {
                debug!(session = %self.id, frames = batch.len(), "Flushing partial batch");
                self.dispatch(batch, None);
            }
        } else {
            let dropped = self.buffer.discard();
            if dropped > 0 {
                debug!(session = %self.id, dropped, "Discarding partial batch");
                self.counters.frames_dropped.fetch_add(dropped as u64, Ordering::Relaxed);
            }
        }

        self.drain_uploads().await;
        self.publish_counters();

        let counters = self.counters.snapshot();
        self.publisher.update(|status| {
            if status.state == StreamState::Stopping {
                status.state = StreamState::Idle;
            }
        });

        info!(
            session = %self.id,
            end = ?end,
            frames = counters.frames_captured,
            sent = counters.batches_sent,
            failed = counters.batches_failed,
            abandoned = counters.batches_abandoned,
            "Session ended"
        );

        SessionSummary { session_id: self.id, end, counters }
    }

    /// Wait for in-flight uploads up to the grace period, then abort the rest
    async fn drain_uploads(&mut self) {
        if self.uploads.is_empty() {
            return;
        }

        let uploads = &mut self.uploads;
        let counters = &self.counters;
        let drained = tokio::time::timeout(self.grace, async {
            while let Some(joined) = uploads.join_next().await {
                if let Err(err) = joined {
                    warn!("Upload task failed: {}", err);
                    counters.batches_failed.fetch_add(1, Ordering::Relaxed);
                }
            }
        })
        .await;

        if drained.is_ok() {
            return;
        }

        self.uploads.abort_all();
        let mut abandoned = 0u64;
        while let Some(joined) = self.uploads.join_next().await {
            if matches!(&joined, Err(err) if err.is_cancelled()) {
                abandoned += 1;
            }
        }
        if abandoned > 0 {
            warn!(
                session = %self.id,
                abandoned,
                grace = ?self.grace,
                "Abandoned in-flight uploads"
            );
            self.counters.batches_abandoned.fetch_add(abandoned, Ordering::Relaxed);
        }
    }
}
