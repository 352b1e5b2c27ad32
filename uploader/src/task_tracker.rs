use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use more_asserts::debug_assert_le;
use tracing::{debug, warn};

use crate::errors::{UploadError, UploadErrorKind};

/// Identifies one attempt at transferring a part. A retry always gets a fresh id.
pub type TransferId = u64;

/// One transfer unit as handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartTask {
    pub transfer_id: TransferId,
    pub part_index: usize,
    pub destination_url: String,
    pub local_file: PathBuf,
    pub len: u64,
    pub retry_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    Succeeded,
    /// Only failures of kind `Network` are retried.
    Failed { kind: UploadErrorKind, reason: String },
}

/// Why a session failed, as decided by the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFailure {
    pub kind: UploadErrorKind,
    pub reason: String,
}

impl From<SessionFailure> for UploadError {
    fn from(value: SessionFailure) -> Self {
        UploadError::from_kind(value.kind, value.reason)
    }
}

/// What the driver of the transfers must do after a completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerDecision {
    /// Other parts are still outstanding.
    Pending,
    /// Launch this replacement transfer.
    Retry(PartTask),
    /// Every part is done. Signalled once.
    BatchComplete,
    /// The session failed. Signalled once; later events are ignored.
    Failed(SessionFailure),
    Ignored,
}

/// Per-byte and per-completion notifications from the transfer layer.
pub trait TransferObserver {
    /// Records that `total_sent` bytes of the transfer went out. Returns the new aggregate
    /// byte count of the session if it changed.
    fn on_bytes_sent(&mut self, transfer_id: TransferId, total_sent: u64) -> Option<u64>;

    fn on_completed(&mut self, transfer_id: TransferId, outcome: TransferOutcome) -> TrackerDecision;
}

#[derive(Debug)]
struct PartState {
    task: PartTask,
    bytes_transferred: u64,
    done: bool,
}

/// Owns the state of every part of one session and decides on retries, batch completion
/// and failure. It is driven by a single owner, so these decisions never race.
#[derive(Debug)]
pub struct TaskTracker {
    session_id: Arc<str>,
    declared_size: u64,
    max_attempts: usize,
    next_transfer_id: TransferId,
    parts: BTreeMap<usize, PartState>,
    /// Live transfer id -> part index.
    in_flight: HashMap<TransferId, usize>,
    failure: Option<SessionFailure>,
    batch_complete: bool,
}

impl TaskTracker {
    pub fn new(session_id: impl Into<Arc<str>>, declared_size: u64, max_attempts: usize) -> Self {
        Self {
            session_id: session_id.into(),
            declared_size,
            max_attempts: max_attempts.max(1),
            next_transfer_id: 0,
            parts: BTreeMap::new(),
            in_flight: HashMap::new(),
            failure: None,
            batch_complete: false,
        }
    }

    fn issue_transfer_id(&mut self) -> TransferId {
        let id = self.next_transfer_id;
        self.next_transfer_id += 1;
        id
    }

    /// Tracks a new part and returns its first transfer.
    pub fn register_part(
        &mut self,
        part_index: usize,
        destination_url: impl Into<String>,
        local_file: impl Into<PathBuf>,
        len: u64,
    ) -> PartTask {
        let task = PartTask {
            transfer_id: self.issue_transfer_id(),
            part_index,
            destination_url: destination_url.into(),
            local_file: local_file.into(),
            len,
            retry_count: 0,
        };
        self.in_flight.insert(task.transfer_id, part_index);
        self.parts.insert(
            part_index,
            PartState {
                task: task.clone(),
                bytes_transferred: 0,
                done: false,
            },
        );
        task
    }

    /// Sum of the bytes of all current transfers.
    pub fn bytes_transferred(&self) -> u64 {
        self.parts.values().map(|p| p.bytes_transferred).sum()
    }

    pub fn declared_size(&self) -> u64 {
        self.declared_size
    }

    pub fn n_parts(&self) -> usize {
        self.parts.len()
    }

    pub fn n_done(&self) -> usize {
        self.parts.values().filter(|p| p.done).count()
    }

    pub fn n_in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn failure(&self) -> Option<&SessionFailure> {
        self.failure.as_ref()
    }

    fn fail(&mut self, kind: UploadErrorKind, reason: String) -> TrackerDecision {
        let failure = SessionFailure { kind, reason };
        self.failure = Some(failure.clone());
        TrackerDecision::Failed(failure)
    }

    fn is_closed(&self) -> bool {
        self.failure.is_some() || self.batch_complete
    }
}

impl TransferObserver for TaskTracker {
    fn on_bytes_sent(&mut self, transfer_id: TransferId, total_sent: u64) -> Option<u64> {
        if self.is_closed() {
            return None;
        }
        let part_index = *self.in_flight.get(&transfer_id)?;
        let part = self.parts.get_mut(&part_index)?;

        let new_bytes = total_sent.min(part.task.len);
        if new_bytes <= part.bytes_transferred {
            return None;
        }
        part.bytes_transferred = new_bytes;

        let total = self.bytes_transferred();
        debug_assert_le!(total, self.declared_size);
        Some(total)
    }

    fn on_completed(&mut self, transfer_id: TransferId, outcome: TransferOutcome) -> TrackerDecision {
        if self.is_closed() {
            debug!(session_id = %self.session_id, transfer_id, "completion after the session closed; ignored");
            return TrackerDecision::Ignored;
        }

        let Some(part_index) = self.in_flight.remove(&transfer_id) else {
            warn!(session_id = %self.session_id, transfer_id, "completion for an unknown transfer");
            return self.fail(UploadErrorKind::Internal, format!("completion for unknown transfer {transfer_id}"));
        };

        let Some(part) = self.parts.get_mut(&part_index) else {
            return self.fail(UploadErrorKind::Internal, format!("transfer {transfer_id} has no part {part_index}"));
        };

        match outcome {
            TransferOutcome::Succeeded => {
                debug_assert!(!part.done);
                part.done = true;
                part.bytes_transferred = part.task.len;

                if self.parts.values().all(|p| p.done) {
                    self.batch_complete = true;
                    TrackerDecision::BatchComplete
                } else {
                    TrackerDecision::Pending
                }
            },
            TransferOutcome::Failed { kind, reason } => {
                let attempts_made = part.task.retry_count + 1;

                if kind != UploadErrorKind::Network {
                    return self.fail(kind, format!("part {part_index} failed: {reason}"));
                }
                if attempts_made >= self.max_attempts {
                    return self.fail(
                        UploadErrorKind::Network,
                        format!("part {part_index} failed after {attempts_made} attempts: {reason}"),
                    );
                }

                let retry = PartTask {
                    transfer_id: self.next_transfer_id,
                    retry_count: part.task.retry_count + 1,
                    ..part.task.clone()
                };
                self.next_transfer_id += 1;

                // The replacement supersedes the old entry; its bytes start over.
                part.task = retry.clone();
                part.bytes_transferred = 0;
                self.in_flight.insert(retry.transfer_id, part_index);

                TrackerDecision::Retry(retry)
            },
        }
    }
}
