use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use bytes::Bytes;
use error_printer::ErrorPrinter;
use progress_tracking::{ProgressUpdate, ThrottledProgressUpdater, UploadProgressUpdater};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use ulid::Ulid;
use upload_client::{Client, ProgressCallback};
use upload_types::UploadParams;
use utils::LimitedJoinSet;

use crate::configurations::UploadConfig;
use crate::errors::{Result, UploadError, UploadErrorKind};
use crate::file_chunker::{ChunkFile, ChunkedFile, FileChunker, SessionArtifacts};
use crate::task_tracker::{PartTask, TaskTracker, TrackerDecision, TransferId, TransferObserver, TransferOutcome};

/// States of one upload session, in the order they are normally visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UploadState {
    Idle,
    SizingFile,
    DirectUploading,
    Chunking,
    StartingSession,
    TransferringParts,
    CompletingSession,
    Succeeded,
    Failed,
}

impl UploadState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, UploadState::Succeeded | UploadState::Failed)
    }

    pub fn can_transition_to(&self, next: UploadState) -> bool {
        use UploadState::*;
        match (self, next) {
            (s, Failed) => !s.is_terminal(),
            (Idle, SizingFile)
            | (SizingFile, DirectUploading)
            | (SizingFile, Chunking)
            | (Chunking, StartingSession)
            | (StartingSession, TransferringParts)
            | (TransferringParts, CompletingSession)
            | (CompletingSession, Succeeded)
            | (DirectUploading, Succeeded) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadMode {
    Direct,
    Multipart,
}

impl UploadMode {
    pub fn select(size: u64, direct_upload_threshold: u64) -> Self {
        if size < direct_upload_threshold {
            UploadMode::Direct
        } else {
            UploadMode::Multipart
        }
    }
}

/// The remote filename of a session: `{session_id}.{ext}`, or just the session id when the
/// source has no extension.
pub fn synthesized_filename(session_id: &str, path: &Path) -> String {
    match path.extension().and_then(|e| e.to_str()).filter(|e| !e.is_empty()) {
        Some(ext) => format!("{session_id}.{ext}"),
        None => session_id.to_owned(),
    }
}

#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub public_key: String,
    pub path: PathBuf,
    pub mime_type: String,
    pub metadata: HashMap<String, String>,
}

/// Notifications of one session. Terminal notifications fire exactly once per session.
pub trait UploadObserver: Send + Sync {
    fn on_progress(&self, _session_id: &str, _bytes_current: u64, _bytes_total: u64) {}

    /// The remote identifier became known. Fires at most once, before the terminal notification.
    fn on_remote_id_assigned(&self, _session_id: &str, _remote_id: &str) {}

    fn on_success(&self, _session_id: &str, _remote_id: &str) {}

    fn on_failure(&self, _session_id: &str, _kind: UploadErrorKind, _description: &str) {}
}

#[derive(Debug, Default)]
pub struct NoOpObserver;

impl UploadObserver for NoOpObserver {}

/// Adapts an observer to the progress updater interface so it can sit behind a throttle.
struct ObserverProgressUpdater {
    observer: Arc<dyn UploadObserver>,
}

impl Debug for ObserverProgressUpdater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ObserverProgressUpdater")
    }
}

#[async_trait]
impl UploadProgressUpdater for ObserverProgressUpdater {
    async fn register_update(&self, update: ProgressUpdate) {
        self.observer
            .on_progress(&update.session_id, update.bytes_completed, update.total_bytes);
    }
}

/// Events sent from the part transfer tasks to the single loop that owns the tracker.
#[derive(Debug)]
enum TransferEvent {
    BytesSent { transfer_id: TransferId, total_sent: u64 },
    Completed { transfer_id: TransferId, outcome: TransferOutcome },
}

/// Drives one file upload from sizing to a terminal state. Not reusable: `upload` consumes it.
pub struct UploadOrchestrator {
    session_id: Arc<str>,
    client: Arc<dyn Client>,
    config: UploadConfig,
    observer: Arc<dyn UploadObserver>,
    progress: Arc<dyn UploadProgressUpdater>,
    state_tx: watch::Sender<UploadState>,
    artifacts: SessionArtifacts,
    declared_size: Option<u64>,
    last_reported_bytes: Option<u64>,
    remote_id: Option<String>,
}

impl UploadOrchestrator {
    pub fn new(client: Arc<dyn Client>, config: UploadConfig, observer: Arc<dyn UploadObserver>) -> Self {
        let session_id: Arc<str> = Ulid::new().to_string().into();

        let bridge: Arc<dyn UploadProgressUpdater> = Arc::new(ObserverProgressUpdater {
            observer: observer.clone(),
        });
        let progress: Arc<dyn UploadProgressUpdater> = match config.progress_min_interval {
            Some(interval) => ThrottledProgressUpdater::new(bridge, interval),
            None => bridge,
        };

        let (state_tx, _) = watch::channel(UploadState::Idle);

        Self {
            session_id,
            client,
            config,
            observer,
            progress,
            state_tx,
            artifacts: SessionArtifacts::new(),
            declared_size: None,
            last_reported_bytes: None,
            remote_id: None,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> UploadState {
        *self.state_tx.borrow()
    }

    /// A receiver that observes every state change of this session.
    pub fn state_watch(&self) -> watch::Receiver<UploadState> {
        self.state_tx.subscribe()
    }

    /// Runs the session to completion and returns the remote identifier of the file.
    pub async fn upload(mut self, request: UploadRequest) -> Result<String> {
        info!(session_id = %self.session_id, path = ?request.path, "upload started");

        let result = self.run(&request).await;

        // Temporary files go before anyone hears about the outcome.
        self.artifacts.cleanup();

        match &result {
            Ok(remote_id) => {
                if let Some(size) = self.declared_size {
                    self.report_progress(size).await;
                }
                self.progress.flush().await;
                self.transition(UploadState::Succeeded);
                info!(session_id = %self.session_id, remote_id = %remote_id, "upload succeeded");
                self.observer.on_success(&self.session_id, remote_id);
            },
            Err(e) => {
                self.progress.flush().await;
                self.transition(UploadState::Failed);
                error!(session_id = %self.session_id, kind = %e.kind(), "upload failed: {e}");
                self.observer.on_failure(&self.session_id, e.kind(), &e.to_string());
            },
        }

        result
    }

    async fn run(&mut self, request: &UploadRequest) -> Result<String> {
        self.transition(UploadState::SizingFile);

        let metadata = tokio::fs::metadata(&request.path)
            .await
            .map_err(|e| UploadError::FileError(format!("cannot read size of {:?}: {e}", request.path)))?;
        if !metadata.is_file() {
            return Err(UploadError::FileError(format!("{:?} is not a regular file", request.path)));
        }
        let size = metadata.len();
        self.declared_size = Some(size);

        let params = UploadParams {
            public_key: request.public_key.clone(),
            store: self.config.store.clone(),
            filename: synthesized_filename(&self.session_id, &request.path),
            size,
            mime_type: request.mime_type.clone(),
            metadata: request
                .metadata
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect::<BTreeMap<_, _>>(),
        };

        let mode = UploadMode::select(size, self.config.direct_upload_threshold);
        debug!(session_id = %self.session_id, size, ?mode, filename = %params.filename, "upload mode selected");

        match mode {
            UploadMode::Direct => self.run_direct(&request.path, &params).await,
            UploadMode::Multipart => self.run_multipart(&request.path, &params).await,
        }
    }

    async fn run_direct(&mut self, path: &Path, params: &UploadParams) -> Result<String> {
        self.transition(UploadState::DirectUploading);

        let data = tokio::fs::read(path)
            .await
            .map_err(|e| UploadError::FileError(format!("cannot read {path:?}: {e}")))?;
        if data.len() as u64 != params.size {
            return Err(UploadError::FileError(format!(
                "{path:?} changed size from {} to {} bytes",
                params.size,
                data.len()
            )));
        }

        let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<u64>();
        let callback: ProgressCallback = Arc::new(move |_delta, completed, _total| {
            let _ = progress_tx.send(completed);
        });

        let client = self.client.clone();
        let upload = client.direct_upload(params, Bytes::from(data), Some(callback));
        tokio::pin!(upload);

        let result = loop {
            tokio::select! {
                res = &mut upload => break res,
                Some(completed) = progress_rx.recv() => self.report_progress(completed).await,
            }
        };
        while let Ok(completed) = progress_rx.try_recv() {
            self.report_progress(completed).await;
        }

        let remote_id = result.log_error("direct upload failed")?;
        self.assign_remote_id(&remote_id)?;
        Ok(remote_id)
    }

    async fn run_multipart(&mut self, path: &Path, params: &UploadParams) -> Result<String> {
        self.transition(UploadState::Chunking);

        let chunker = FileChunker::new(self.config.temp_dir.clone(), self.config.chunk_size);
        let ChunkedFile { chunks, artifacts } = {
            let session_id = self.session_id.clone();
            let path = path.to_path_buf();
            let size = params.size;
            // If this session is dropped mid-chunking, the detached job's result is dropped
            // with it and its artifacts remove the chunk files.
            tokio::task::spawn_blocking(move || chunker.chunk(&session_id, &path, size)).await??
        };
        self.artifacts.adopt(artifacts);

        self.transition(UploadState::StartingSession);
        let session = self
            .client
            .start_session(params, self.config.chunk_size)
            .await
            .log_error("start_session failed")?;

        if session.parts.len() != chunks.len() {
            return Err(UploadError::ProtocolError(format!(
                "start_session returned {} destinations for {} chunks",
                session.parts.len(),
                chunks.len()
            )));
        }
        self.assign_remote_id(&session.uuid)?;

        self.transition(UploadState::TransferringParts);
        self.transfer_parts(params.size, &chunks, session.parts).await?;

        self.transition(UploadState::CompletingSession);
        self.client
            .complete_session(&params.public_key, &session.uuid)
            .await
            .log_error("complete_session failed")?;

        Ok(session.uuid)
    }

    /// Launches every part, then consumes transfer events until the tracker reaches a decision.
    async fn transfer_parts(&mut self, declared_size: u64, chunks: &[ChunkFile], destinations: Vec<String>) -> Result<()> {
        if chunks.is_empty() {
            debug!(session_id = %self.session_id, "no parts to transfer");
            return Ok(());
        }

        let mut tracker = TaskTracker::new(self.session_id.clone(), declared_size, self.config.max_part_attempts);
        let (event_tx, mut event_rx) = mpsc::unbounded_channel::<TransferEvent>();
        let mut transfers = LimitedJoinSet::new(self.config.max_concurrent_parts);

        for (chunk, destination) in chunks.iter().zip(destinations) {
            let task = tracker.register_part(chunk.index, destination, chunk.path.clone(), chunk.len);
            transfers.spawn(run_part_transfer(self.client.clone(), task, event_tx.clone(), Duration::ZERO));
        }
        debug!(session_id = %self.session_id, n_parts = tracker.n_parts(), "all part transfers launched");

        loop {
            let event = tokio::select! {
                event = event_rx.recv() => event,
                Some(joined) = transfers.join_next(), if !transfers.is_empty() => {
                    // A transfer task that panicked never reports its completion.
                    if let Err(e) = joined {
                        transfers.abort_all();
                        return Err(UploadError::InternalError(anyhow!("part transfer task failed: {e}")));
                    }
                    continue;
                },
            };

            let Some(event) = event else {
                return Err(UploadError::InternalError(anyhow!("transfer event channel closed")));
            };

            match event {
                TransferEvent::BytesSent {
                    transfer_id,
                    total_sent,
                } => {
                    if let Some(total) = tracker.on_bytes_sent(transfer_id, total_sent) {
                        self.report_progress(total).await;
                    }
                },
                TransferEvent::Completed { transfer_id, outcome } => match tracker.on_completed(transfer_id, outcome) {
                    TrackerDecision::Pending => {
                        self.report_progress(tracker.bytes_transferred()).await;
                    },
                    TrackerDecision::Ignored => {},
                    TrackerDecision::Retry(task) => {
                        warn!(
                            session_id = %self.session_id,
                            part_index = task.part_index,
                            transfer_id = task.transfer_id,
                            attempt = task.retry_count + 1,
                            "retrying part transfer"
                        );
                        let delay = self.config.retry_delay(task.retry_count);
                        transfers.spawn(run_part_transfer(self.client.clone(), task, event_tx.clone(), delay));
                    },
                    TrackerDecision::BatchComplete => {
                        self.report_progress(tracker.bytes_transferred()).await;
                        while let Some(joined) = transfers.join_next().await {
                            joined?;
                        }
                        info!(session_id = %self.session_id, n_parts = tracker.n_done(), "all parts transferred");
                        return Ok(());
                    },
                    TrackerDecision::Failed(failure) => {
                        transfers.abort_all();
                        while transfers.join_next().await.is_some() {}
                        return Err(failure.into());
                    },
                },
            }
        }
    }

    fn assign_remote_id(&mut self, remote_id: &str) -> Result<()> {
        if let Some(existing) = &self.remote_id {
            return Err(UploadError::InternalError(anyhow!(
                "remote id {remote_id} assigned after {existing}"
            )));
        }
        self.remote_id = Some(remote_id.to_owned());
        info!(session_id = %self.session_id, remote_id, "remote id assigned");
        self.observer.on_remote_id_assigned(&self.session_id, remote_id);
        Ok(())
    }

    async fn report_progress(&mut self, bytes_completed: u64) {
        let Some(total_bytes) = self.declared_size else {
            return;
        };
        if self.last_reported_bytes == Some(bytes_completed) {
            return;
        }
        let previous = self.last_reported_bytes.replace(bytes_completed).unwrap_or(0);

        self.progress
            .register_update(ProgressUpdate {
                session_id: self.session_id.clone(),
                bytes_completed,
                total_bytes,
                bytes_completion_increment: bytes_completed.saturating_sub(previous),
            })
            .await;
    }

    fn transition(&self, next: UploadState) {
        let previous = self.state();
        debug_assert!(previous.can_transition_to(next), "invalid transition {previous:?} -> {next:?}");
        info!(session_id = %self.session_id, from = ?previous, to = ?next, "upload state transition");
        self.state_tx.send_replace(next);
    }
}

async fn run_part_transfer(
    client: Arc<dyn Client>,
    task: PartTask,
    events: mpsc::UnboundedSender<TransferEvent>,
    delay: Duration,
) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let transfer_id = task.transfer_id;
    let progress: ProgressCallback = {
        let events = events.clone();
        Arc::new(move |_delta, completed, _total| {
            let _ = events.send(TransferEvent::BytesSent {
                transfer_id,
                total_sent: completed,
            });
        })
    };

    let outcome = match client
        .upload_part(&task.destination_url, &task.local_file, Some(progress))
        .await
    {
        Ok(()) => TransferOutcome::Succeeded,
        Err(e) => {
            let e = UploadError::from(e);
            debug!(part_index = task.part_index, transfer_id, attempt = task.retry_count + 1, "part transfer failed: {e}");
            TransferOutcome::Failed {
                kind: e.kind(),
                reason: e.to_string(),
            }
        },
    };

    let _ = events.send(TransferEvent::Completed { transfer_id, outcome });
}
