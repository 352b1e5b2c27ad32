use reqwest::StatusCode;
use thiserror::Error;

#[non_exhaustive]
#[derive(Error, Debug)]
pub enum UploadClientError {
    #[error("Reqwest Error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("ReqwestMiddleware Error: {0}")]
    ReqwestMiddlewareError(#[from] reqwest_middleware::Error),

    #[error("{api} returned status {status}")]
    Status { api: String, status: StatusCode },

    #[error("Protocol Error: {0}")]
    ProtocolError(String),

    #[error("IO Error: {0}")]
    IOError(#[from] std::io::Error),

    #[error("Invalid Arguments: {0}")]
    InvalidArguments(String),

    #[error("Error : {0}")]
    Other(String),
}

// Define our own result type here (this seems to be the standard).
pub type Result<T> = std::result::Result<T, UploadClientError>;

impl UploadClientError {
    /// True for failures of the request itself: transport errors and non-success statuses.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::ReqwestError(_) | Self::ReqwestMiddlewareError(_) | Self::Status { .. })
    }
}

impl From<url::ParseError> for UploadClientError {
    fn from(value: url::ParseError) -> Self {
        UploadClientError::InvalidArguments(format!("invalid url: {value}"))
    }
}

impl From<serde_json::Error> for UploadClientError {
    fn from(value: serde_json::Error) -> Self {
        UploadClientError::ProtocolError(format!("undecodable response: {value}"))
    }
}

impl PartialEq for UploadClientError {
    fn eq(&self, other: &UploadClientError) -> bool {
        match (self, other) {
            (
                UploadClientError::Status { api: a1, status: s1 },
                UploadClientError::Status { api: a2, status: s2 },
            ) => a1 == a2 && s1 == s2,
            (e1, e2) => std::mem::discriminant(e1) == std::mem::discriminant(e2),
        }
    }
}
