use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use upload_types::{StartSessionResponse, UploadParams};

use crate::error::Result;

/// Receives (delta, completed, total) in bytes of the file being transferred.
pub type ProgressCallback = Arc<dyn Fn(u64, u64, u64) + Send + Sync + 'static>;

/// The remote operations of the upload protocol. Each call is one independent round trip;
/// concurrent `upload_part` calls carry no ordering guarantee.
#[async_trait::async_trait]
pub trait Client: Send + Sync {
    /// Opens a multipart session; the response lists one destination URL per part.
    async fn start_session(&self, params: &UploadParams, part_size: u64) -> Result<StartSessionResponse>;

    /// PUTs the full contents of `local_file` to a pre-signed destination. Success is purely the status code.
    async fn upload_part(&self, destination_url: &str, local_file: &Path, progress: Option<ProgressCallback>)
        -> Result<()>;

    /// Finalizes a multipart session once all parts have been accepted.
    async fn complete_session(&self, public_key: &str, uuid: &str) -> Result<()>;

    /// Sends the whole file in one request and returns the identifier assigned to it.
    async fn direct_upload(
        &self,
        params: &UploadParams,
        file_bytes: Bytes,
        progress: Option<ProgressCallback>,
    ) -> Result<String>;
}
