use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use more_asserts::debug_assert_le;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

use crate::{ProgressUpdate, UploadProgressUpdater};

#[derive(Debug, Default)]
struct ThrottleState {
    last_sent_at: Option<Instant>,
    last_sent_percent: Option<u64>,

    /// Updates swallowed since the last forwarded one, merged together.
    pending: Option<ProgressUpdate>,
}

/// Forwards an update only when its integer percentage differs from the last forwarded one
/// and at least `min_interval` has passed since then. The final update of a session
/// (`bytes_completed == total_bytes`) is always forwarded.
#[derive(Debug)]
pub struct ThrottledProgressUpdater {
    inner: Arc<dyn UploadProgressUpdater>,
    min_interval: Duration,
    state: Mutex<ThrottleState>,
}

impl ThrottledProgressUpdater {
    pub fn new(inner: Arc<dyn UploadProgressUpdater>, min_interval: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner,
            min_interval,
            state: Mutex::new(ThrottleState::default()),
        })
    }
}

#[async_trait]
impl UploadProgressUpdater for ThrottledProgressUpdater {
    async fn register_update(&self, update: ProgressUpdate) {
        let to_send = {
            let mut state = self.state.lock().await;

            let mut merged = match state.pending.take() {
                Some(mut p) => {
                    p.merge_in(update);
                    p
                },
                None => update,
            };
            debug_assert_le!(merged.bytes_completed, merged.total_bytes);

            let now = Instant::now();
            let interval_elapsed = state
                .last_sent_at
                .is_none_or(|t| now.saturating_duration_since(t) >= self.min_interval);
            let percent = merged.percent();
            let percent_changed = state.last_sent_percent != Some(percent);

            if merged.is_final() || (interval_elapsed && percent_changed) {
                state.last_sent_at = Some(now);
                state.last_sent_percent = Some(percent);
                Some(merged)
            } else {
                trace!(session_id = %merged.session_id, percent, "progress update held back");
                state.pending = Some(merged);
                None
            }
        };

        if let Some(update) = to_send {
            self.inner.register_update(update).await;
        }
    }

    async fn flush(&self) {
        let pending = self.state.lock().await.pending.take();
        if let Some(update) = pending {
            self.inner.register_update(update).await;
        }
        self.inner.flush().await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use super::*;

    #[derive(Debug, Default)]
    struct Recorder {
        seen: StdMutex<Vec<(u64, u64)>>,
    }

    #[async_trait]
    impl UploadProgressUpdater for Recorder {
        async fn register_update(&self, update: ProgressUpdate) {
            self.seen
                .lock()
                .unwrap()
                .push((update.bytes_completed, update.bytes_completion_increment));
        }
    }

    fn update(done: u64, inc: u64) -> ProgressUpdate {
        ProgressUpdate {
            session_id: "session".into(),
            bytes_completed: done,
            total_bytes: 1000,
            bytes_completion_increment: inc,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_held_back_within_interval() {
        let recorder = Arc::new(Recorder::default());
        let throttled = ThrottledProgressUpdater::new(recorder.clone(), Duration::from_millis(60));

        throttled.register_update(update(100, 100)).await;
        throttled.register_update(update(200, 100)).await;
        throttled.register_update(update(300, 100)).await;
        assert_eq!(*recorder.seen.lock().unwrap(), vec![(100, 100)]);

        tokio::time::advance(Duration::from_millis(61)).await;
        throttled.register_update(update(400, 100)).await;

        // Held-back increments are carried into the next forwarded update.
        assert_eq!(*recorder.seen.lock().unwrap(), vec![(100, 100), (400, 300)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_percent_not_forwarded() {
        let recorder = Arc::new(Recorder::default());
        let throttled = ThrottledProgressUpdater::new(recorder.clone(), Duration::ZERO);

        throttled.register_update(update(100, 100)).await;
        throttled.register_update(update(105, 5)).await;
        throttled.register_update(update(110, 5)).await;
        assert_eq!(*recorder.seen.lock().unwrap(), vec![(100, 100), (110, 10)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_always_forwarded() {
        let recorder = Arc::new(Recorder::default());
        let throttled = ThrottledProgressUpdater::new(recorder.clone(), Duration::from_secs(10));

        throttled.register_update(update(500, 500)).await;
        throttled.register_update(update(1000, 500)).await;
        assert_eq!(*recorder.seen.lock().unwrap(), vec![(500, 500), (1000, 500)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_sends_pending() {
        let recorder = Arc::new(Recorder::default());
        let throttled = ThrottledProgressUpdater::new(recorder.clone(), Duration::from_secs(10));

        throttled.register_update(update(100, 100)).await;
        throttled.register_update(update(700, 600)).await;
        throttled.flush().await;
        throttled.flush().await;
        assert_eq!(*recorder.seen.lock().unwrap(), vec![(100, 100), (700, 600)]);
    }
}
