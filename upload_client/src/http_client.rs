use std::time::Instant;

use http::Extensions;
use reqwest::{Request, Response};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, Middleware, Next};
use tracing::{debug, warn};

use crate::constants::{CONNECT_TIMEOUT, IDLE_CONNECTION_TIMEOUT, MAX_IDLE_CONNECTIONS, READ_TIMEOUT};
use crate::error::{Result, UploadClientError};
use crate::remote_client::ClientConfig;

/// Builds the client used for all requests to the upload service and to part destinations.
pub fn build_http_client(config: &ClientConfig) -> Result<ClientWithMiddleware> {
    let reqwest_client = reqwest::Client::builder()
        .user_agent(config.user_agent.as_str())
        .connect_timeout(*CONNECT_TIMEOUT)
        .read_timeout(*READ_TIMEOUT)
        .pool_idle_timeout(*IDLE_CONNECTION_TIMEOUT)
        .pool_max_idle_per_host(*MAX_IDLE_CONNECTIONS)
        .build()?;
    Ok(ClientBuilder::new(reqwest_client).with(LoggingMiddleware).build())
}

/// Logs every request with its outcome and duration at debug level.
pub struct LoggingMiddleware;

#[async_trait::async_trait]
impl Middleware for LoggingMiddleware {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> reqwest_middleware::Result<Response> {
        let method = req.method().clone();
        let url = req.url().clone();
        let start = Instant::now();

        let res = next.run(req, extensions).await;

        let elapsed_ms = start.elapsed().as_millis() as u64;
        match &res {
            Ok(response) => debug!(%method, %url, status = %response.status(), elapsed_ms, "request finished"),
            Err(e) => debug!(%method, %url, elapsed_ms, "request failed: {e}"),
        }
        res
    }
}

/// Converts the raw outcome of a request into a crate error, logging failures with the api name.
/// Statuses outside [200, 300) become [`UploadClientError::Status`].
pub trait ResponseErrorLogger<T> {
    fn process_error(self, api: &str) -> T;
}

impl ResponseErrorLogger<Result<Response>> for reqwest_middleware::Result<Response> {
    fn process_error(self, api: &str) -> Result<Response> {
        let response = self.map_err(|e| {
            warn!(api, "request error: {e:?}");
            UploadClientError::from(e)
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(api, %status, url = %response.url(), "request returned non-success status");
            return Err(UploadClientError::Status {
                api: api.to_owned(),
                status,
            });
        }
        Ok(response)
    }
}
