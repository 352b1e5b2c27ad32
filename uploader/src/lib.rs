#![cfg_attr(feature = "strict", deny(warnings))]

pub mod configurations;
pub mod constants;
pub mod errors;
mod file_chunker;
pub mod logging;
mod registry;
mod task_tracker;
mod upload_session;
mod uploader;

pub use configurations::UploadConfig;
pub use errors::{UploadError, UploadErrorKind};
pub use file_chunker::{chunk_file_name, ChunkFile, ChunkedFile, FileChunker, SessionArtifacts};
pub use registry::{CallbackRegistry, UploadCallbacks, UploadOutcome};
pub use task_tracker::{
    PartTask, SessionFailure, TaskTracker, TrackerDecision, TransferId, TransferObserver, TransferOutcome,
};
pub use upload_session::{
    synthesized_filename, NoOpObserver, UploadMode, UploadObserver, UploadOrchestrator, UploadRequest, UploadState,
};
pub use uploader::{UploadHandle, Uploader};
