use std::fmt::{Display, Formatter};

use anyhow::anyhow;
use thiserror::Error;
use tokio::task::JoinError;
use upload_client::UploadClientError;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("File error: {0}")]
    FileError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Unsupported environment: {0}")]
    UnsupportedEnvironment(String),

    #[error("Internal error: {0}")]
    InternalError(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, UploadError>;

/// The category of a terminal failure, reported alongside its description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UploadErrorKind {
    File,
    Network,
    Protocol,
    UnsupportedEnvironment,
    Internal,
}

impl UploadErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadErrorKind::File => "file",
            UploadErrorKind::Network => "network",
            UploadErrorKind::Protocol => "protocol",
            UploadErrorKind::UnsupportedEnvironment => "unsupported_environment",
            UploadErrorKind::Internal => "internal",
        }
    }
}

impl Display for UploadErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl UploadError {
    pub fn kind(&self) -> UploadErrorKind {
        match self {
            UploadError::FileError(_) => UploadErrorKind::File,
            UploadError::NetworkError(_) => UploadErrorKind::Network,
            UploadError::ProtocolError(_) => UploadErrorKind::Protocol,
            UploadError::UnsupportedEnvironment(_) => UploadErrorKind::UnsupportedEnvironment,
            UploadError::InternalError(_) => UploadErrorKind::Internal,
        }
    }

    /// Rebuilds an error of the given kind from its description.
    pub fn from_kind(kind: UploadErrorKind, description: impl Into<String>) -> Self {
        let description = description.into();
        match kind {
            UploadErrorKind::File => UploadError::FileError(description),
            UploadErrorKind::Network => UploadError::NetworkError(description),
            UploadErrorKind::Protocol => UploadError::ProtocolError(description),
            UploadErrorKind::UnsupportedEnvironment => UploadError::UnsupportedEnvironment(description),
            UploadErrorKind::Internal => UploadError::InternalError(anyhow!(description)),
        }
    }
}

impl From<std::io::Error> for UploadError {
    fn from(value: std::io::Error) -> Self {
        UploadError::FileError(value.to_string())
    }
}

impl From<UploadClientError> for UploadError {
    fn from(value: UploadClientError) -> Self {
        if value.is_network() {
            return UploadError::NetworkError(value.to_string());
        }
        match value {
            UploadClientError::IOError(e) => UploadError::FileError(e.to_string()),
            e @ (UploadClientError::ProtocolError(_) | UploadClientError::InvalidArguments(_)) => {
                UploadError::ProtocolError(e.to_string())
            },
            e => UploadError::InternalError(anyhow!(e)),
        }
    }
}

impl From<JoinError> for UploadError {
    fn from(value: JoinError) -> Self {
        UploadError::InternalError(anyhow!("{value:?}"))
    }
}
