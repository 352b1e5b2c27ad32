use std::path::PathBuf;
use std::time::Duration;

use crate::constants::*;

/// Tunables of an upload session. `Default` pulls every value from the env-configurable constants.
#[derive(Debug, Clone)]
pub struct UploadConfig {
    pub direct_upload_threshold: u64,
    pub chunk_size: u64,
    pub max_part_attempts: usize,
    pub max_concurrent_parts: usize,
    pub retry_base_delay: Duration,
    pub store: String,
    pub progress_min_interval: Option<Duration>,
    /// Where chunk files are written.
    pub temp_dir: PathBuf,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            direct_upload_threshold: *DIRECT_UPLOAD_THRESHOLD,
            chunk_size: *MULTIPART_CHUNK_SIZE,
            max_part_attempts: *MAX_PART_ATTEMPTS,
            max_concurrent_parts: *MAX_CONCURRENT_PART_UPLOADS,
            retry_base_delay: *PART_RETRY_BASE_DELAY,
            store: STORE_FLAG.clone(),
            progress_min_interval: *PROGRESS_REPORT_MIN_INTERVAL,
            temp_dir: std::env::temp_dir(),
        }
    }
}

impl UploadConfig {
    pub fn with_temp_dir(mut self, temp_dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = temp_dir.into();
        self
    }

    /// Delay before retry number `retry_count` (1-based) of a part.
    pub fn retry_delay(&self, retry_count: usize) -> Duration {
        let shift = retry_count.saturating_sub(1).min(16) as u32;
        self.retry_base_delay.saturating_mul(1u32 << shift)
    }
}
