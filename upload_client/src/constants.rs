use std::time::Duration;

utils::configurable_constants! {
    /// Base URL of the upload service.
    ref UPLOAD_ENDPOINT: String = "https://upload.uploadcare.com".to_owned();

    ref CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Applies per read on the response, not to the whole request, so slow part uploads are not cut off.
    ref READ_TIMEOUT: Duration = Duration::from_secs(120);

    ref IDLE_CONNECTION_TIMEOUT: Duration = Duration::from_secs(60);

    ref MAX_IDLE_CONNECTIONS: usize = 16;

    /// Size of the blocks handed to the HTTP stack when streaming a body; progress is reported once per block.
    ref UPLOAD_REPORTING_BLOCK_SIZE: u64 = 64 * 1024;
}
