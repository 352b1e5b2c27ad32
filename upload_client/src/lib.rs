#![cfg_attr(feature = "strict", deny(warnings))]

pub use crate::error::{Result, UploadClientError};
pub use form::{encode_body, EncodedForm, FileField, MultipartForm};
pub use http_client::{build_http_client, ResponseErrorLogger};
pub use interface::{Client, ProgressCallback};
pub use memory_client::{MemoryClient, RecordedCall};
pub use remote_client::{ClientConfig, RemoteClient};
pub use reqwest::StatusCode;
pub use upload_progress_stream::UploadProgressStream;

pub mod constants;
mod error;
mod form;
mod http_client;
mod interface;
mod memory_client;
mod remote_client;
mod upload_progress_stream;
