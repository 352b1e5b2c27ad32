use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use more_asserts::assert_le;
use tempfile::TempDir;
use tracing_test::traced_test;
use upload_client::{MemoryClient, RecordedCall};
use upload_types::DirectUploadResponse;
use uploader::{UploadConfig, UploadErrorKind, UploadObserver, UploadOrchestrator, UploadRequest, UploadState};

const MIB: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Event {
    Progress(u64, u64),
    RemoteId(String),
    Success(String),
    Failure(UploadErrorKind),
}

#[derive(Debug, Default)]
struct RecordingObserver {
    events: Mutex<Vec<Event>>,
}

impl RecordingObserver {
    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    fn progress(&self) -> Vec<(u64, u64)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Progress(c, t) => Some((c, t)),
                _ => None,
            })
            .collect()
    }

    fn terminal_events(&self) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| matches!(e, Event::Success(_) | Event::Failure(_)))
            .collect()
    }

    fn remote_ids(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::RemoteId(id) => Some(id),
                _ => None,
            })
            .collect()
    }
}

impl UploadObserver for RecordingObserver {
    fn on_progress(&self, _session_id: &str, bytes_current: u64, bytes_total: u64) {
        self.events.lock().unwrap().push(Event::Progress(bytes_current, bytes_total));
    }

    fn on_remote_id_assigned(&self, _session_id: &str, remote_id: &str) {
        self.events.lock().unwrap().push(Event::RemoteId(remote_id.to_owned()));
    }

    fn on_success(&self, _session_id: &str, remote_id: &str) {
        self.events.lock().unwrap().push(Event::Success(remote_id.to_owned()));
    }

    fn on_failure(&self, _session_id: &str, kind: UploadErrorKind, _description: &str) {
        self.events.lock().unwrap().push(Event::Failure(kind));
    }
}

struct Fixture {
    _source_dir: TempDir,
    chunk_dir: TempDir,
    path: PathBuf,
    data: Vec<u8>,
}

impl Fixture {
    fn new(file_name: &str, size: usize) -> Self {
        let source_dir = TempDir::new().unwrap();
        let chunk_dir = TempDir::new().unwrap();
        let path = source_dir.path().join(file_name);
        let data: Vec<u8> = (0..size).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &data).unwrap();
        Self {
            _source_dir: source_dir,
            chunk_dir,
            path,
            data,
        }
    }

    fn config(&self) -> UploadConfig {
        UploadConfig::default().with_temp_dir(self.chunk_dir.path())
    }

    fn request(&self) -> UploadRequest {
        UploadRequest {
            public_key: "demopublickey".to_owned(),
            path: self.path.clone(),
            mime_type: "application/octet-stream".to_owned(),
            metadata: HashMap::from([("origin".to_owned(), "tests".to_owned())]),
        }
    }

    fn leftover_chunks(&self) -> usize {
        std::fs::read_dir(self.chunk_dir.path()).unwrap().count()
    }
}

fn orchestrator(
    client: &Arc<MemoryClient>,
    config: UploadConfig,
) -> (UploadOrchestrator, Arc<RecordingObserver>) {
    let observer = Arc::new(RecordingObserver::default());
    let orchestrator = UploadOrchestrator::new(client.clone(), config, observer.clone());
    (orchestrator, observer)
}

fn part_sizes(calls: &[RecordedCall]) -> Vec<(usize, u64)> {
    let mut sizes: Vec<_> = calls
        .iter()
        .filter_map(|c| match c {
            RecordedCall::UploadPart {
                index,
                n_bytes,
                succeeded: true,
            } => Some((*index, *n_bytes)),
            _ => None,
        })
        .collect();
    sizes.sort();
    sizes
}

fn ends_with_full_progress(observer: &RecordingObserver, size: u64) {
    let progress = observer.progress();
    assert_eq!(progress.last(), Some(&(size, size)));
    for (current, total) in progress {
        assert_eq!(total, size);
        assert_le!(current, total);
    }
}

#[tokio::test]
async fn test_multipart_upload_of_12_mib() {
    let fixture = Fixture::new("video.mp4", 12 * MIB);
    let client = Arc::new(MemoryClient::new().with_uuid("uuid-12mib"));
    let (orchestrator, observer) = orchestrator(&client, fixture.config());
    let session_id = orchestrator.session_id().to_owned();
    let state = orchestrator.state_watch();

    let remote_id = orchestrator.upload(fixture.request()).await.unwrap();
    assert_eq!(remote_id, "uuid-12mib");
    assert_eq!(*state.borrow(), UploadState::Succeeded);

    let calls = client.calls();
    assert_eq!(
        calls[0],
        RecordedCall::StartSession {
            filename: format!("{session_id}.mp4"),
            size: (12 * MIB) as u64,
            part_size: (5 * MIB) as u64,
        }
    );
    assert_eq!(
        part_sizes(&calls),
        vec![(0, (5 * MIB) as u64), (1, (5 * MIB) as u64), (2, (2 * MIB) as u64)]
    );
    assert_eq!(client.complete_calls(), 1);
    assert_eq!(
        calls.last(),
        Some(&RecordedCall::CompleteSession {
            uuid: "uuid-12mib".to_owned()
        })
    );
    assert_eq!(client.assembled(), fixture.data);

    ends_with_full_progress(&observer, (12 * MIB) as u64);
    let progress = observer.progress();
    for pair in progress.windows(2) {
        assert_le!(pair[0].0, pair[1].0);
    }

    assert_eq!(observer.remote_ids(), vec!["uuid-12mib".to_owned()]);
    assert_eq!(observer.terminal_events(), vec![Event::Success("uuid-12mib".to_owned())]);
    assert_eq!(observer.events().last(), Some(&Event::Success("uuid-12mib".to_owned())));
    assert_eq!(fixture.leftover_chunks(), 0);
}

#[tokio::test]
async fn test_direct_upload_of_1_mib() {
    let fixture = Fixture::new("photo.jpg", MIB);
    let client = Arc::new(MemoryClient::new().with_uuid("direct-id"));
    let (orchestrator, observer) = orchestrator(&client, fixture.config());
    let session_id = orchestrator.session_id().to_owned();

    let remote_id = orchestrator.upload(fixture.request()).await.unwrap();
    assert_eq!(remote_id, "direct-id");

    assert_eq!(
        client.calls(),
        vec![RecordedCall::DirectUpload {
            filename: format!("{session_id}.jpg"),
            size: MIB as u64,
        }]
    );
    ends_with_full_progress(&observer, MIB as u64);
    assert_eq!(
        observer.events()[observer.events().len() - 2..],
        [Event::RemoteId("direct-id".to_owned()), Event::Success("direct-id".to_owned())]
    );
}

#[tokio::test]
async fn test_mode_boundary_at_threshold() {
    let below = Fixture::new("below.bin", 4095);
    let client = Arc::new(MemoryClient::new());
    let config = UploadConfig {
        direct_upload_threshold: 4096,
        chunk_size: 1024,
        ..below.config()
    };
    let (below_orchestrator, _) = orchestrator(&client, config.clone());
    below_orchestrator.upload(below.request()).await.unwrap();
    assert_eq!(client.count_calls(|c| matches!(c, RecordedCall::DirectUpload { .. })), 1);

    let at = Fixture::new("at.bin", 4096);
    let client = Arc::new(MemoryClient::new());
    let config = UploadConfig {
        temp_dir: at.chunk_dir.path().to_path_buf(),
        ..config
    };
    let (orchestrator, _) = orchestrator(&client, config);
    orchestrator.upload(at.request()).await.unwrap();
    assert_eq!(client.count_calls(|c| matches!(c, RecordedCall::DirectUpload { .. })), 0);
    assert_eq!(part_sizes(&client.calls()), vec![(0, 1024), (1, 1024), (2, 1024), (3, 1024)]);
    assert_eq!(client.assembled(), at.data);
}

#[tokio::test]
async fn test_empty_file_goes_direct() {
    let fixture = Fixture::new("empty", 0);
    let client = Arc::new(MemoryClient::new());
    let (orchestrator, observer) = orchestrator(&client, fixture.config());
    let session_id = orchestrator.session_id().to_owned();

    assert_eq!(orchestrator.upload(fixture.request()).await.unwrap(), "memory-uuid");
    assert_eq!(
        client.calls(),
        vec![RecordedCall::DirectUpload {
            filename: session_id,
            size: 0
        }]
    );
    assert_eq!(observer.progress().last(), Some(&(0, 0)));
}

#[tokio::test]
async fn test_empty_file_in_multipart_mode_completes() {
    let fixture = Fixture::new("empty.bin", 0);
    let client = Arc::new(MemoryClient::new().with_uuid("empty-uuid"));
    let config = UploadConfig {
        direct_upload_threshold: 0,
        ..fixture.config()
    };
    let (orchestrator, observer) = orchestrator(&client, config);
    let state = orchestrator.state_watch();

    let remote_id = tokio::time::timeout(std::time::Duration::from_secs(5), orchestrator.upload(fixture.request()))
        .await
        .expect("upload of an empty file did not finish")
        .unwrap();
    assert_eq!(remote_id, "empty-uuid");
    assert_eq!(*state.borrow(), UploadState::Succeeded);

    assert_eq!(client.count_calls(|c| matches!(c, RecordedCall::StartSession { size: 0, .. })), 1);
    assert_eq!(client.count_calls(|c| matches!(c, RecordedCall::UploadPart { .. })), 0);
    assert_eq!(client.complete_calls(), 1);
    assert_eq!(observer.progress().last(), Some(&(0, 0)));
    assert_eq!(observer.terminal_events(), vec![Event::Success("empty-uuid".to_owned())]);
    assert_eq!(fixture.leftover_chunks(), 0);
}

#[tokio::test]
async fn test_part_count_mismatch_is_protocol_error() {
    let fixture = Fixture::new("video.mp4", 12 * MIB);
    let client = Arc::new(MemoryClient::new().with_part_count(2));
    let (orchestrator, observer) = orchestrator(&client, fixture.config());
    let state = orchestrator.state_watch();

    let err = orchestrator.upload(fixture.request()).await.unwrap_err();
    assert_eq!(err.kind(), UploadErrorKind::Protocol);
    assert_eq!(*state.borrow(), UploadState::Failed);

    assert_eq!(client.count_calls(|c| matches!(c, RecordedCall::UploadPart { .. })), 0);
    assert_eq!(client.complete_calls(), 0);
    assert!(observer.remote_ids().is_empty());
    assert_eq!(observer.terminal_events(), vec![Event::Failure(UploadErrorKind::Protocol)]);
    assert_eq!(fixture.leftover_chunks(), 0);
}

#[tokio::test]
async fn test_part_failing_every_attempt_fails_session() {
    let fixture = Fixture::new("video.mp4", 12 * MIB);
    let client = Arc::new(MemoryClient::new().fail_part(1, 5));
    let (orchestrator, observer) = orchestrator(&client, fixture.config());

    let err = orchestrator.upload(fixture.request()).await.unwrap_err();
    assert_eq!(err.kind(), UploadErrorKind::Network);

    assert_eq!(client.part_attempts(1), 5);
    // The other parts went through, yet the session still fails.
    for index in [0, 2] {
        assert_eq!(client.part_attempts(index), 1);
        assert_eq!(
            client.count_calls(|c| matches!(c, RecordedCall::UploadPart { index: i, succeeded: true, .. } if *i == index)),
            1
        );
    }
    assert_eq!(client.complete_calls(), 0);
    assert_eq!(observer.remote_ids(), vec!["memory-uuid".to_owned()]);
    assert_eq!(observer.terminal_events(), vec![Event::Failure(UploadErrorKind::Network)]);
    assert_eq!(observer.events().last(), Some(&Event::Failure(UploadErrorKind::Network)));
    assert_eq!(fixture.leftover_chunks(), 0);
}

#[tokio::test]
#[traced_test]
async fn test_part_succeeding_on_last_attempt() {
    let fixture = Fixture::new("video.mp4", 12 * MIB);
    let client = Arc::new(MemoryClient::new().fail_part(1, 4));
    let (orchestrator, observer) = orchestrator(&client, fixture.config());

    let remote_id = orchestrator.upload(fixture.request()).await.unwrap();
    assert_eq!(remote_id, "memory-uuid");

    assert_eq!(client.part_attempts(0), 1);
    assert_eq!(client.part_attempts(1), 5);
    assert_eq!(client.part_attempts(2), 1);
    assert_eq!(client.complete_calls(), 1);

    // Failed attempts of part 1 are not counted towards the total.
    assert_eq!(client.assembled(), fixture.data);
    ends_with_full_progress(&observer, (12 * MIB) as u64);
    assert_eq!(observer.terminal_events(), vec![Event::Success("memory-uuid".to_owned())]);
    assert_eq!(fixture.leftover_chunks(), 0);
    assert!(logs_contain("retrying part transfer"));
}

#[tokio::test]
async fn test_failed_start_session() {
    let fixture = Fixture::new("video.mp4", 12 * MIB);
    let client = Arc::new(MemoryClient::new().fail_start());
    let (orchestrator, observer) = orchestrator(&client, fixture.config());

    let err = orchestrator.upload(fixture.request()).await.unwrap_err();
    assert_eq!(err.kind(), UploadErrorKind::Network);
    assert_eq!(client.count_calls(|c| matches!(c, RecordedCall::UploadPart { .. })), 0);
    assert_eq!(observer.terminal_events(), vec![Event::Failure(UploadErrorKind::Network)]);
    assert_eq!(fixture.leftover_chunks(), 0);
}

#[tokio::test]
async fn test_failed_completion() {
    let fixture = Fixture::new("video.mp4", 12 * MIB);
    let client = Arc::new(MemoryClient::new().fail_complete());
    let (orchestrator, observer) = orchestrator(&client, fixture.config());

    let err = orchestrator.upload(fixture.request()).await.unwrap_err();
    assert_eq!(err.kind(), UploadErrorKind::Network);
    assert_eq!(client.complete_calls(), 1);
    assert_eq!(observer.terminal_events(), vec![Event::Failure(UploadErrorKind::Network)]);
    assert_eq!(fixture.leftover_chunks(), 0);
}

#[tokio::test]
async fn test_missing_file() {
    let fixture = Fixture::new("photo.jpg", 10);
    let client = Arc::new(MemoryClient::new());
    let (orchestrator, observer) = orchestrator(&client, fixture.config());

    let mut request = fixture.request();
    request.path = Path::new(&fixture.path).with_file_name("gone.jpg");

    let err = orchestrator.upload(request).await.unwrap_err();
    assert_eq!(err.kind(), UploadErrorKind::File);
    assert!(client.calls().is_empty());
    assert!(observer.progress().is_empty());
    assert_eq!(observer.terminal_events(), vec![Event::Failure(UploadErrorKind::File)]);
}

#[tokio::test]
async fn test_direct_response_without_identifier() {
    let fixture = Fixture::new("photo.jpg", 100);
    let response = DirectUploadResponse(HashMap::from([("other.jpg".to_owned(), "x".to_owned())]));
    let client = Arc::new(MemoryClient::new().with_direct_response(response));
    let (orchestrator, observer) = orchestrator(&client, fixture.config());

    let err = orchestrator.upload(fixture.request()).await.unwrap_err();
    assert_eq!(err.kind(), UploadErrorKind::Protocol);
    assert!(observer.remote_ids().is_empty());
    assert_eq!(observer.terminal_events(), vec![Event::Failure(UploadErrorKind::Protocol)]);
}

#[tokio::test]
async fn test_unusable_temp_dir() {
    let fixture = Fixture::new("video.mp4", 4096);
    let blocker = fixture.chunk_dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"x").unwrap();

    let client = Arc::new(MemoryClient::new());
    let config = UploadConfig {
        direct_upload_threshold: 1024,
        chunk_size: 1024,
        ..fixture.config().with_temp_dir(&blocker)
    };
    let (orchestrator, observer) = orchestrator(&client, config);

    let err = orchestrator.upload(fixture.request()).await.unwrap_err();
    assert_eq!(err.kind(), UploadErrorKind::UnsupportedEnvironment);
    assert!(client.calls().is_empty());
    assert_eq!(observer.terminal_events(), vec![Event::Failure(UploadErrorKind::UnsupportedEnvironment)]);
}

#[tokio::test]
async fn test_throttled_progress_still_ends_complete() {
    let fixture = Fixture::new("video.mp4", 64 * 1024);
    let client = Arc::new(MemoryClient::new());
    let config = UploadConfig {
        direct_upload_threshold: 1024,
        chunk_size: 1024,
        progress_min_interval: Some(std::time::Duration::from_secs(3600)),
        ..fixture.config()
    };
    let (orchestrator, observer) = orchestrator(&client, config);

    orchestrator.upload(fixture.request()).await.unwrap();
    let progress = observer.progress();
    assert_le!(progress.len(), 2);
    assert_eq!(progress.last(), Some(&(64 * 1024, 64 * 1024)));
}
