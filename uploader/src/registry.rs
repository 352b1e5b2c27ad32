use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::errors::UploadErrorKind;
use crate::upload_session::UploadObserver;

/// The terminal result delivered to a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Succeeded { remote_id: String },
    Failed { kind: UploadErrorKind, description: String },
}

type ProgressFn = Box<dyn Fn(u64, u64) + Send + Sync>;
type RemoteIdFn = Box<dyn Fn(&str) + Send + Sync>;
type OutcomeFn = Box<dyn Fn(UploadOutcome) + Send + Sync>;

/// Caller-supplied callbacks for one session. Any of them may be left out.
#[derive(Default)]
pub struct UploadCallbacks {
    on_progress: Option<ProgressFn>,
    on_remote_id: Option<RemoteIdFn>,
    on_outcome: Option<OutcomeFn>,
}

impl std::fmt::Debug for UploadCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UploadCallbacks")
            .field("on_progress", &self.on_progress.is_some())
            .field("on_remote_id", &self.on_remote_id.is_some())
            .field("on_outcome", &self.on_outcome.is_some())
            .finish()
    }
}

impl UploadCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Receives (bytes_current, bytes_total).
    pub fn on_progress(mut self, f: impl Fn(u64, u64) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Box::new(f));
        self
    }

    pub fn on_remote_id(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_remote_id = Some(Box::new(f));
        self
    }

    pub fn on_outcome(mut self, f: impl Fn(UploadOutcome) + Send + Sync + 'static) -> Self {
        self.on_outcome = Some(Box::new(f));
        self
    }
}

/// Maps session ids back to the callbacks their caller registered. Events for sessions
/// that are not registered are dropped.
#[derive(Debug, Default)]
pub struct CallbackRegistry {
    entries: RwLock<HashMap<String, Arc<UploadCallbacks>>>,
}

impl CallbackRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers callbacks for a session, replacing any already present.
    pub fn register(&self, session_id: &str, callbacks: UploadCallbacks) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.insert(session_id.to_owned(), Arc::new(callbacks)).is_some() {
            debug!(session_id, "replaced registered callbacks");
        }
    }

    pub fn deregister(&self, session_id: &str) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(session_id).is_some()
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(session_id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, session_id: &str) -> Option<Arc<UploadCallbacks>> {
        let found = self
            .entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(session_id)
            .cloned();
        if found.is_none() {
            debug!(session_id, "event for unregistered session dropped");
        }
        found
    }
}

impl UploadObserver for CallbackRegistry {
    fn on_progress(&self, session_id: &str, bytes_current: u64, bytes_total: u64) {
        if let Some(f) = self.lookup(session_id).as_ref().and_then(|c| c.on_progress.as_ref()) {
            f(bytes_current, bytes_total);
        }
    }

    fn on_remote_id_assigned(&self, session_id: &str, remote_id: &str) {
        if let Some(f) = self.lookup(session_id).as_ref().and_then(|c| c.on_remote_id.as_ref()) {
            f(remote_id);
        }
    }

    fn on_success(&self, session_id: &str, remote_id: &str) {
        if let Some(f) = self.lookup(session_id).as_ref().and_then(|c| c.on_outcome.as_ref()) {
            f(UploadOutcome::Succeeded {
                remote_id: remote_id.to_owned(),
            });
        }
    }

    fn on_failure(&self, session_id: &str, kind: UploadErrorKind, description: &str) {
        if let Some(f) = self.lookup(session_id).as_ref().and_then(|c| c.on_outcome.as_ref()) {
            f(UploadOutcome::Failed {
                kind,
                description: description.to_owned(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn test_register_and_dispatch() {
        let registry = CallbackRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let callbacks = {
            let progress = seen.clone();
            let outcome = seen.clone();
            UploadCallbacks::new()
                .on_progress(move |c, t| progress.lock().unwrap().push(format!("progress {c}/{t}")))
                .on_outcome(move |o| outcome.lock().unwrap().push(format!("{o:?}")))
        };
        registry.register("s1", callbacks);
        assert!(registry.contains("s1"));
        assert_eq!(registry.len(), 1);

        registry.on_progress("s1", 5, 10);
        registry.on_remote_id_assigned("s1", "uuid");
        registry.on_success("s1", "uuid");
        registry.on_progress("other", 1, 1);

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["progress 5/10".to_owned(), "Succeeded { remote_id: \"uuid\" }".to_owned()]
        );
    }

    #[test]
    fn test_deregistered_session_is_silent() {
        let registry = CallbackRegistry::new();
        let count = Arc::new(Mutex::new(0));
        let c = count.clone();
        registry.register("s2", UploadCallbacks::new().on_outcome(move |_| *c.lock().unwrap() += 1));

        assert!(registry.deregister("s2"));
        assert!(!registry.deregister("s2"));
        registry.on_failure("s2", UploadErrorKind::Network, "boom");

        assert_eq!(*count.lock().unwrap(), 0);
        assert!(registry.is_empty());
    }
}
