use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use error_printer::{ErrorPrinter, OptionPrinter};
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use reqwest::{Body, Url};
use reqwest_middleware::ClientWithMiddleware;
use tracing::{debug, info};
use upload_types::{
    fields, DirectUploadResponse, StartSessionResponse, UploadParams, COMPLETE_SESSION_PATH, DIRECT_UPLOAD_PATH,
    START_SESSION_PATH,
};

use crate::constants::UPLOAD_ENDPOINT;
use crate::error::{Result, UploadClientError};
use crate::form::{encode_body, EncodedForm, FileField};
use crate::http_client::{build_http_client, ResponseErrorLogger};
use crate::interface::{Client, ProgressCallback};
use crate::upload_progress_stream::UploadProgressStream;

const PART_CONTENT_TYPE: &str = "application/octet-stream";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the upload service, without a trailing path.
    pub endpoint: String,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: UPLOAD_ENDPOINT.clone(),
            user_agent: format!("uploader/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl ClientConfig {
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

/// Talks to the upload service over HTTP.
#[derive(Debug)]
pub struct RemoteClient {
    client: ClientWithMiddleware,
    config: ClientConfig,
}

impl RemoteClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = build_http_client(&config)?;
        Ok(Self { client, config })
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    fn url_for(&self, path: &str) -> Result<Url> {
        Ok(Url::parse(&format!("{}{path}", self.config.endpoint.trim_end_matches('/')))?)
    }

    async fn post_form(&self, api: &str, path: &str, form: EncodedForm) -> Result<reqwest::Response> {
        let url = self.url_for(path)?;
        debug!(api, %url, body_len = form.body.len(), "POST form");

        self.client
            .post(url)
            .header(CONTENT_TYPE, form.content_type)
            .body(form.body)
            .send()
            .await
            .process_error(api)
    }
}

/// Maps bytes handed to the HTTP stack onto bytes of the file field inside an encoded body.
fn file_progress_fn(
    file_range: std::ops::Range<usize>,
    callback: ProgressCallback,
) -> impl Fn(u64, u64) + Send + Sync + 'static {
    let file_start = file_range.start as u64;
    let file_len = (file_range.end - file_range.start) as u64;
    let reported = AtomicU64::new(0);

    move |_delta, body_completed| {
        let file_completed = body_completed.saturating_sub(file_start).min(file_len);
        let old = reported.fetch_max(file_completed, Ordering::Relaxed);
        if old < file_completed {
            callback(file_completed - old, file_completed, file_len);
        }
    }
}

#[async_trait]
impl Client for RemoteClient {
    async fn start_session(&self, params: &UploadParams, part_size: u64) -> Result<StartSessionResponse> {
        let form = encode_body(&params.form_fields(Some(part_size)), None);
        let response = self.post_form("start_session", START_SESSION_PATH, form).await?;

        let body = response.bytes().await.log_error("error reading start_session response")?;
        let parsed: StartSessionResponse =
            serde_json::from_slice(&body).log_error("error json decoding start_session response")?;

        info!(uuid = %parsed.uuid, n_parts = parsed.parts.len(), "multipart session started");
        Ok(parsed)
    }

    async fn upload_part(
        &self,
        destination_url: &str,
        local_file: &Path,
        progress: Option<ProgressCallback>,
    ) -> Result<()> {
        let url = Url::parse(destination_url)?;
        let data = Bytes::from(tokio::fs::read(local_file).await.log_error("error reading part file")?);
        let n_bytes = data.len() as u64;

        let stream = UploadProgressStream::new(
            data,
            move |delta, completed| {
                if let Some(cb) = &progress {
                    cb(delta, completed, n_bytes);
                }
            },
            None,
        );

        self.client
            .put(url)
            .header(CONTENT_TYPE, PART_CONTENT_TYPE)
            .header(CONTENT_LENGTH, n_bytes)
            .body(Body::wrap_stream(stream))
            .send()
            .await
            .process_error("upload_part")?;

        debug!(n_bytes, "part uploaded");
        Ok(())
    }

    async fn complete_session(&self, public_key: &str, uuid: &str) -> Result<()> {
        let fields = vec![
            (fields::PUBLIC_KEY.to_owned(), public_key.to_owned()),
            (fields::UUID.to_owned(), uuid.to_owned()),
        ];
        self.post_form("complete_session", COMPLETE_SESSION_PATH, encode_body(&fields, None))
            .await?;
        info!(uuid, "multipart session completed");
        Ok(())
    }

    async fn direct_upload(
        &self,
        params: &UploadParams,
        file_bytes: Bytes,
        progress: Option<ProgressCallback>,
    ) -> Result<String> {
        let form = encode_body(
            &params.form_fields(None),
            Some(FileField {
                name: params.filename.clone(),
                filename: params.filename.clone(),
                mime_type: params.mime_type.clone(),
                data: file_bytes,
            }),
        );

        let url = self.url_for(DIRECT_UPLOAD_PATH)?;
        let body_len = form.body.len() as u64;
        let file_range = form
            .file_range
            .clone()
            .ok_or_else(|| UploadClientError::Other("encoded body carries no file".to_owned()))?;

        let body = match progress {
            Some(cb) => {
                Body::wrap_stream(UploadProgressStream::new(form.body, file_progress_fn(file_range, cb), None))
            },
            None => Body::from(form.body),
        };

        debug!(%url, body_len, "POST direct upload");
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, form.content_type)
            .header(CONTENT_LENGTH, body_len)
            .body(body)
            .send()
            .await
            .process_error("direct_upload")?;

        let body = response.bytes().await.log_error("error reading direct_upload response")?;
        let parsed: DirectUploadResponse =
            serde_json::from_slice(&body).log_error("error json decoding direct_upload response")?;

        parsed
            .identifier_for(&params.filename)
            .map(str::to_owned)
            .error_none(format!("direct_upload response has no entry for {}", params.filename))
            .ok_or_else(|| {
                UploadClientError::ProtocolError(format!("response has no identifier for {}", params.filename))
            })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn test_file_progress_clamped_to_file_range() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let cb: ProgressCallback = {
            let seen = seen.clone();
            Arc::new(move |d, c, t| seen.lock().unwrap().push((d, c, t)))
        };

        let f = file_progress_fn(100..300, cb);
        f(50, 50);
        f(100, 150);
        f(100, 250);
        f(200, 450);
        f(10, 460);

        assert_eq!(*seen.lock().unwrap(), vec![(50, 50, 200), (100, 150, 200), (50, 200, 200)]);
    }

    #[tokio::test]
    async fn test_url_joins_paths() {
        let client = RemoteClient::new(ClientConfig::default().with_endpoint("http://localhost:9000/")).unwrap();
        assert_eq!(client.url_for(START_SESSION_PATH).unwrap().as_str(), "http://localhost:9000/multipart/start/");
    }
}
