use std::sync::Arc;

/// A single byte-progress report for one upload session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub session_id: Arc<str>,

    /// Total bytes sent so far across all parts of the session.
    pub bytes_completed: u64,

    /// The declared size of the file.
    pub total_bytes: u64,

    /// How much this update moved `bytes_completed` since the previous report.
    pub bytes_completion_increment: u64,
}

impl ProgressUpdate {
    pub fn is_final(&self) -> bool {
        self.bytes_completed >= self.total_bytes
    }

    /// Integer percentage in [0, 100]. An empty file counts as complete.
    pub fn percent(&self) -> u64 {
        if self.total_bytes == 0 {
            return 100;
        }
        (self.bytes_completed.min(self.total_bytes) * 100) / self.total_bytes
    }

    /// Folds a later update into this one; used when a throttled update is held back.
    pub fn merge_in(&mut self, other: ProgressUpdate) {
        debug_assert_eq!(self.session_id, other.session_id);
        self.total_bytes = self.total_bytes.max(other.total_bytes);
        self.bytes_completed = self.bytes_completed.max(other.bytes_completed);
        self.bytes_completion_increment += other.bytes_completion_increment;
    }
}
