//! Session lifecycle control
//!
//! [`StreamController`] is the host-facing entry point. It owns at most one
//! session at a time and moves through
//! `Idle -> Starting -> Active -> Stopping -> Idle`, with `Errored` reachable
//! when the source fails.
//!
//! ```rust,no_run
//! use framecast::{StreamConfig, StreamController};
//!
//! # async fn run() -> framecast::Result<()> {
//! let controller = StreamController::new();
//! controller.start(StreamConfig::new("http://localhost:8080/image_posting")).await?;
//!
//! // ... later
//! if let Some(summary) = controller.stop().await {
//!     println!("sent {} batches", summary.counters.batches_sent);
//! }
//! # Ok(())
//! # }
//! ```

mod session;


use futures::Stream;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use session::{Session, StatusPublisher};

use crate::config::StreamConfig;
use crate::source::FrameSource;
use crate::sources;
use crate::types::{SessionCounters, SessionSummary, StreamState, StreamStatus};
use crate::upload::{HttpTransport, Transport, Uploader};
use crate::{Result, StreamError};

/// Book-keeping for the current (or last) session
struct SessionHandle {
    id: Uuid,
    cancel: CancellationToken,
    /// Set once the source is open and the session task is spawned
    task: Option<JoinHandle<SessionSummary>>,
}

/// Starts, stops and reports on capture sessions.
///
/// All methods take `&self`, so the controller can be shared between the UI
/// layer and background tasks behind an `Arc`. Dropping the controller cancels
/// any running session; its teardown continues in the background.
pub struct StreamController {
    status: Arc<watch::Sender<StreamStatus>>,
    current: Mutex<Option<SessionHandle>>,
}

impl Default for StreamController {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamController {
    pub fn new() -> Self {
        let (status, _) = watch::channel(StreamStatus::default());
        Self { status: Arc::new(status), current: Mutex::new(None) }
    }

    /// Start a session with the ffmpeg-backed source and HTTP transport built from
    /// `config`.
    ///
    /// See [`start_with`](Self::start_with) for the state rules.
    pub async fn start(&self, config: StreamConfig) -> Result<()> {
        if self.state().is_running() {
            debug!(state = %self.state(), "Start ignored, session already running");
            return Ok(());
        }
        config.validate()?;

        let source = sources::from_config(&config)?;
        let transport = Arc::new(HttpTransport::new(&config)?);
        self.start_with(config, source, transport).await
    }

    /// Start a session with an explicit source and transport.
    ///
    /// - From `Idle` or `Errored`: opens the source and begins capturing. A
    ///   previous error is cleared.
    /// - From `Starting` or `Active`: no-op; `config` is not validated.
    /// - From `Stopping`: [`StreamError::InvalidState`].
    ///
    /// When the source cannot be opened the controller moves to `Errored` and the
    /// open error is returned.
    pub async fn start_with<S>(
        &self,
        config: StreamConfig,
        mut source: S,
        transport: Arc<dyn Transport>,
    ) -> Result<()>
    where
        S: FrameSource,
    {
        let (id, cancel, previous) = {
            let mut current = self.lock();
            let state = self.state();
            match state {
                StreamState::Starting | StreamState::Active => {
                    debug!(%state, "Start ignored, session already running");
                    return Ok(());
                }
                StreamState::Stopping => {
                    return Err(StreamError::invalid_state("start", state));
                }
                StreamState::Idle | StreamState::Errored => {}
            }
            config.validate()?;

            let id = Uuid::new_v4();
            let cancel = CancellationToken::new();
            let previous = current.replace(SessionHandle {
                id,
                cancel: cancel.clone(),
                task: None,
            });
            self.status.send_replace(StreamStatus {
                state: StreamState::Starting,
                session_id: Some(id),
                counters: SessionCounters::default(),
                last_error: None,
            });
            (id, cancel, previous)
        };

        // A failed session may still be tearing down its uploads
        if let Some(task) = previous.and_then(|handle| handle.task) {
            if let Err(err) = task.await {
                warn!("Previous session task failed: {}", err);
            }
        }

        info!(session = %id, source = %source.describe(), "Opening source");
        let opened = tokio::select! {
            _ = cancel.cancelled() => None,
            result = source.open() => Some(result),
        };

        match opened {
            Some(Ok(())) => {}
            Some(Err(err)) => {
                warn!(session = %id, "Source failed to open: {}", err);
                source.close().await;
                let message = err.to_string();
                self.publisher(id).update(|status| {
                    status.state = StreamState::Errored;
                    status.last_error = Some(message);
                });
                return Err(err);
            }
            None => {
                info!(session = %id, "Start cancelled while opening source");
                source.close().await;
                self.publisher(id).update(|status| status.state = StreamState::Idle);
                return Ok(());
            }
        }

        // Hand the source to a session task unless stop() won the race
        let unclaimed = {
            let mut current = self.lock();
            if cancel.is_cancelled() {
                Some(source)
            } else {
                let publisher = self.publisher(id);
                publisher.update(|status| status.state = StreamState::Active);

                let uploader = Uploader::from_config(transport, &config);
                let session = Session::new(id, source, uploader, &config, publisher, cancel);
                let task = tokio::spawn(session.run());
                if let Some(handle) = current.as_mut().filter(|handle| handle.id == id) {
                    handle.task = Some(task);
                }
                None
            }
        };

        if let Some(mut source) = unclaimed {
            info!(session = %id, "Start cancelled while opening source");
            source.close().await;
            self.publisher(id).update(|status| status.state = StreamState::Idle);
        }
        Ok(())
    }

    /// Stop the current session.
    ///
    /// - From `Active`: stops capture, closes the source, flushes or drops the
    ///   partial batch, waits up to `upload_grace_ms` for in-flight uploads and
    ///   returns the session summary once `Idle`.
    /// - From `Starting`: abandons the open and returns `None` once `Idle`.
    /// - From `Errored`: acknowledges the failure, returns to `Idle` and hands back
    ///   the failed session's summary.
    /// - From `Idle`: no-op, returns `None`.
    pub async fn stop(&self) -> Option<SessionSummary> {
        let (id, task) = {
            let mut current = self.lock();
            let state = self.state();
            match state {
                StreamState::Idle => {
                    debug!("Stop ignored, no session");
                    return None;
                }
                StreamState::Starting | StreamState::Stopping => {
                    if let Some(handle) = current.as_ref() {
                        handle.cancel.cancel();
                    }
                    (self.status.borrow().session_id, None)
                }
                StreamState::Active | StreamState::Errored => {
                    let handle = current.take()?;
                    info!(session = %handle.id, %state, "Stopping session");
                    if state == StreamState::Active {
                        self.publisher(handle.id)
                            .update(|status| status.state = StreamState::Stopping);
                    }
                    handle.cancel.cancel();
                    (Some(handle.id), Some(handle.task))
                }
            }
        };

        // Starting or already stopping elsewhere: wait for that to finish
        let Some(task) = task else {
            self.wait_settled(id).await;
            return None;
        };
        let id = id?;

        let summary = match task {
            Some(task) => match task.await {
                Ok(summary) => Some(summary),
                Err(err) => {
                    warn!(session = %id, "Session task failed: {}", err);
                    None
                }
            },
            None => None,
        };

        self.publisher(id).update(|status| {
            status.state = StreamState::Idle;
            status.last_error = None;
        });
        summary
    }

    /// Check the backend configured in `config` is reachable, without starting a
    /// session. Any status below 500 counts as reachable.
    pub async fn probe(&self, config: &StreamConfig) -> Result<()> {
        config.validate()?;
        let transport = HttpTransport::new(config)?;
        transport.probe().await
    }

    /// Current status snapshot
    pub fn status(&self) -> StreamStatus {
        self.status.borrow().clone()
    }

    pub fn state(&self) -> StreamState {
        self.status.borrow().state
    }

    /// Watch status changes
    pub fn subscribe(&self) -> watch::Receiver<StreamStatus> {
        self.status.subscribe()
    }

    /// Status changes as a stream, starting with the current status
    pub fn status_updates(&self) -> impl Stream<Item = StreamStatus> + 'static {
        WatchStream::new(self.status.subscribe())
    }

    fn publisher(&self, id: Uuid) -> StatusPublisher {
        StatusPublisher::new(Arc::clone(&self.status), id)
    }

    fn lock(&self) -> MutexGuard<'_, Option<SessionHandle>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn wait_settled(&self, id: Option<Uuid>) {
        let mut rx = self.status.subscribe();
        let _ = rx.wait_for(|status| status.state.is_settled() || status.session_id != id).await;
    }
}

impl Drop for StreamController {
    fn drop(&mut self) {
        if let Some(handle) = self.lock().as_ref() {
            debug!(session = %handle.id, "Dropping controller, cancelling session");
            handle.cancel.cancel();
        }
    }
}
