use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;
use upload_client::{Client, ClientConfig, RemoteClient};

use crate::configurations::UploadConfig;
use crate::errors::{Result, UploadError};
use crate::registry::{CallbackRegistry, UploadCallbacks};
use crate::upload_session::{UploadObserver, UploadOrchestrator, UploadRequest, UploadState};

/// Entry point for callers: starts sessions in the background and routes their
/// notifications to the callbacks registered for each session.
pub struct Uploader {
    client: Arc<dyn Client>,
    config: UploadConfig,
    registry: Arc<CallbackRegistry>,
}

impl Uploader {
    pub fn new(client: Arc<dyn Client>, config: UploadConfig) -> Self {
        Self {
            client,
            config,
            registry: CallbackRegistry::new(),
        }
    }

    /// An uploader talking to the service over HTTP.
    pub fn remote(client_config: ClientConfig, config: UploadConfig) -> Result<Self> {
        let client = RemoteClient::new(client_config)?;
        Ok(Self::new(Arc::new(client), config))
    }

    pub fn registry(&self) -> &Arc<CallbackRegistry> {
        &self.registry
    }

    /// Starts uploading `path` and returns immediately. Progress and the outcome arrive
    /// through `callbacks`; the handle can also be awaited for the outcome.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start_upload(
        &self,
        public_key: impl Into<String>,
        path: impl Into<PathBuf>,
        mime_type: impl Into<String>,
        metadata: HashMap<String, String>,
        callbacks: UploadCallbacks,
    ) -> Result<UploadHandle> {
        let runtime = Handle::try_current()
            .map_err(|e| UploadError::UnsupportedEnvironment(format!("no async runtime available: {e}")))?;

        let observer: Arc<dyn UploadObserver> = self.registry.clone();
        let orchestrator = UploadOrchestrator::new(self.client.clone(), self.config.clone(), observer);
        let session_id = orchestrator.session_id().to_owned();
        let state = orchestrator.state_watch();

        let request = UploadRequest {
            public_key: public_key.into(),
            path: path.into(),
            mime_type: mime_type.into(),
            metadata,
        };

        self.registry.register(&session_id, callbacks);
        info!(session_id = %session_id, path = ?request.path, "upload session created");

        let registry = self.registry.clone();
        let task_session_id = session_id.clone();
        let join = runtime.spawn(async move {
            let result = orchestrator.upload(request).await;
            registry.deregister(&task_session_id);
            result
        });

        Ok(UploadHandle { session_id, state, join })
    }
}

/// A running upload session.
pub struct UploadHandle {
    session_id: String,
    state: watch::Receiver<UploadState>,
    join: JoinHandle<Result<String>>,
}

impl UploadHandle {
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn state(&self) -> UploadState {
        *self.state.borrow()
    }

    /// Waits for a terminal state.
    pub async fn wait_for_terminal_state(&mut self) -> UploadState {
        if let Ok(state) = self.state.wait_for(|s| s.is_terminal()).await {
            return *state;
        }
        // The sender is gone, so whatever was last published is final.
        *self.state.borrow()
    }

    /// Waits for the session to finish and returns the remote identifier.
    pub async fn join(self) -> Result<String> {
        self.join.await?
    }
}
