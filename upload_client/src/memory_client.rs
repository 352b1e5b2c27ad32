use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use tracing::debug;
use upload_types::{DirectUploadResponse, StartSessionResponse, UploadParams};

use crate::error::{Result, UploadClientError};
use crate::interface::{Client, ProgressCallback};

const PART_URL_PREFIX: &str = "memory://part/";

/// A request observed by [`MemoryClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCall {
    StartSession { filename: String, size: u64, part_size: u64 },
    UploadPart { index: usize, n_bytes: u64, succeeded: bool },
    CompleteSession { uuid: String },
    DirectUpload { filename: String, size: u64 },
}

#[derive(Debug, Default)]
struct MemoryClientState {
    calls: Vec<RecordedCall>,
    /// Remaining scripted failures per part index.
    part_failures: HashMap<usize, usize>,
    /// Last successfully uploaded contents per part index.
    parts: BTreeMap<usize, Bytes>,
}

/// An in-memory [`Client`] for tests. Its behavior is scripted up front with the builder
/// methods, and every request is recorded for later inspection.
///
/// Part destinations are `memory://part/{index}`. A failing part reports half of its bytes
/// as sent before failing, like a connection dropped mid-transfer.
#[derive(Debug)]
pub struct MemoryClient {
    uuid: String,
    part_count_override: Option<usize>,
    fail_start: bool,
    fail_complete: bool,
    direct_response: Option<DirectUploadResponse>,
    part_delay: Option<Duration>,
    state: Mutex<MemoryClientState>,
}

impl Default for MemoryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryClient {
    pub fn new() -> Self {
        Self {
            uuid: "memory-uuid".to_owned(),
            part_count_override: None,
            fail_start: false,
            fail_complete: false,
            direct_response: None,
            part_delay: None,
            state: Mutex::new(MemoryClientState::default()),
        }
    }

    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = uuid.into();
        self
    }

    /// Makes the first `times` uploads of part `index` fail with a 500.
    pub fn fail_part(self, index: usize, times: usize) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.part_failures.insert(index, times);
        }
        self
    }

    /// Returns `n` destination URLs from `start_session` regardless of the file size.
    pub fn with_part_count(mut self, n: usize) -> Self {
        self.part_count_override = Some(n);
        self
    }

    pub fn fail_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn fail_complete(mut self) -> Self {
        self.fail_complete = true;
        self
    }

    /// Replaces the default `{filename: uuid}` direct-upload response.
    pub fn with_direct_response(mut self, response: DirectUploadResponse) -> Self {
        self.direct_response = Some(response);
        self
    }

    /// Holds every part upload for `delay` before it resolves.
    pub fn with_part_delay(mut self, delay: Duration) -> Self {
        self.part_delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().map(|s| s.calls.clone()).unwrap_or_default()
    }

    pub fn count_calls(&self, pred: impl Fn(&RecordedCall) -> bool) -> usize {
        self.calls().iter().filter(|c| pred(c)).count()
    }

    pub fn complete_calls(&self) -> usize {
        self.count_calls(|c| matches!(c, RecordedCall::CompleteSession { .. }))
    }

    pub fn part_attempts(&self, index: usize) -> usize {
        self.count_calls(|c| matches!(c, RecordedCall::UploadPart { index: i, .. } if *i == index))
    }

    /// The contents of all successfully uploaded parts, concatenated in part order.
    pub fn assembled(&self) -> Vec<u8> {
        self.state
            .lock()
            .map(|s| s.parts.values().flat_map(|b| b.iter().copied()).collect())
            .unwrap_or_default()
    }

    fn record(&self, call: RecordedCall) {
        if let Ok(mut state) = self.state.lock() {
            state.calls.push(call);
        }
    }

    fn status_error(api: &str) -> UploadClientError {
        UploadClientError::Status {
            api: api.to_owned(),
            status: StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn part_index(destination_url: &str) -> Result<usize> {
    destination_url
        .strip_prefix(PART_URL_PREFIX)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| UploadClientError::InvalidArguments(format!("not a memory part url: {destination_url}")))
}

#[async_trait]
impl Client for MemoryClient {
    async fn start_session(&self, params: &UploadParams, part_size: u64) -> Result<StartSessionResponse> {
        self.record(RecordedCall::StartSession {
            filename: params.filename.clone(),
            size: params.size,
            part_size,
        });

        if self.fail_start {
            return Err(Self::status_error("start_session"));
        }
        if part_size == 0 {
            return Err(UploadClientError::InvalidArguments("part size is zero".to_owned()));
        }

        let n_parts = self.part_count_override.unwrap_or(params.size.div_ceil(part_size) as usize);
        Ok(StartSessionResponse {
            uuid: self.uuid.clone(),
            parts: (0..n_parts).map(|i| format!("{PART_URL_PREFIX}{i}")).collect(),
        })
    }

    async fn upload_part(
        &self,
        destination_url: &str,
        local_file: &Path,
        progress: Option<ProgressCallback>,
    ) -> Result<()> {
        let index = part_index(destination_url)?;
        let data = Bytes::from(tokio::fs::read(local_file).await?);
        let n_bytes = data.len() as u64;

        if let Some(delay) = self.part_delay {
            tokio::time::sleep(delay).await;
        }

        let fail = {
            let mut state = self.state.lock().map_err(|e| UploadClientError::Other(e.to_string()))?;
            match state.part_failures.get_mut(&index) {
                Some(remaining) if *remaining > 0 => {
                    *remaining -= 1;
                    true
                },
                _ => false,
            }
        };

        let half = n_bytes / 2;
        if let Some(cb) = &progress {
            if half > 0 {
                cb(half, half, n_bytes);
            }
        }

        self.record(RecordedCall::UploadPart {
            index,
            n_bytes,
            succeeded: !fail,
        });

        if fail {
            debug!(index, "scripted part failure");
            return Err(Self::status_error("upload_part"));
        }

        if let Some(cb) = &progress {
            if n_bytes > half {
                cb(n_bytes - half, n_bytes, n_bytes);
            }
        }

        if let Ok(mut state) = self.state.lock() {
            state.parts.insert(index, data);
        }
        Ok(())
    }

    async fn complete_session(&self, _public_key: &str, uuid: &str) -> Result<()> {
        self.record(RecordedCall::CompleteSession { uuid: uuid.to_owned() });
        if self.fail_complete {
            return Err(Self::status_error("complete_session"));
        }
        Ok(())
    }

    async fn direct_upload(
        &self,
        params: &UploadParams,
        file_bytes: Bytes,
        progress: Option<ProgressCallback>,
    ) -> Result<String> {
        self.record(RecordedCall::DirectUpload {
            filename: params.filename.clone(),
            size: file_bytes.len() as u64,
        });

        let n_bytes = file_bytes.len() as u64;
        if let Some(cb) = &progress {
            if n_bytes > 0 {
                cb(n_bytes, n_bytes, n_bytes);
            }
        }

        let response = self.direct_response.clone().unwrap_or_else(|| {
            DirectUploadResponse([(params.filename.clone(), self.uuid.clone())].into_iter().collect())
        });

        response
            .identifier_for(&params.filename)
            .map(str::to_owned)
            .ok_or_else(|| UploadClientError::ProtocolError(format!("response has no identifier for {}", params.filename)))
    }
}
