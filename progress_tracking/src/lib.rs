mod progress_info;
mod throttled_updater;

pub use progress_info::ProgressUpdate;
pub use throttled_updater::ThrottledProgressUpdater;

/// Receives the byte progress of upload sessions.
#[async_trait::async_trait]
pub trait UploadProgressUpdater: std::fmt::Debug + Send + Sync {
    async fn register_update(&self, update: ProgressUpdate);

    /// Delivers anything held back. Called once a session reaches a terminal state.
    async fn flush(&self) {}
}
