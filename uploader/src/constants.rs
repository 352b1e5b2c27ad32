use std::time::Duration;

utils::configurable_constants! {
    /// Files strictly smaller than this are sent in a single request; larger ones go multipart.
    ref DIRECT_UPLOAD_THRESHOLD: u64 = 10 * 1024 * 1024;

    /// Size of every part but the last in a multipart upload.
    ref MULTIPART_CHUNK_SIZE: u64 = 5 * 1024 * 1024;

    /// Total attempts per part, the first one included, before the session fails.
    ref MAX_PART_ATTEMPTS: usize = 5;

    /// Parts holding a connection at once. All parts are launched up front regardless.
    ref MAX_CONCURRENT_PART_UPLOADS: usize = 5;

    /// Delay before the first retry of a part, doubled on each further retry. Zero retries immediately.
    ref PART_RETRY_BASE_DELAY: Duration = Duration::ZERO;

    /// Value of the store flag sent with every upload.
    ref STORE_FLAG: String = "auto".to_owned();

    /// If set, progress notifications are throttled to at most one per interval and only
    /// sent when the whole percentage changes. The final notification is always sent.
    ref PROGRESS_REPORT_MIN_INTERVAL: Option<Duration> = None;
}
