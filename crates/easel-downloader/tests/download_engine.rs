//! End-to-end download tests against a local registry stand-in that speaks
//! the metadata endpoint and honours byte ranges.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use easel_core::status::DownloadStatus;
use easel_downloader::{DownloadEngine, DownloadError, RegistryClient};
use easel_events::{EventBus, Topic};
use futures::StreamExt;

const REPO: &str = "acme/sd-turbo";
const FILE: &str = "model.bin";

struct ServerState {
    content: Vec<u8>,
    /// Range header of every file request, in arrival order.
    ranges: Mutex<Vec<Option<String>>>,
    chunk_delay: Option<Duration>,
}

fn patterned_content(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

async fn metadata(
    State(state): State<Arc<ServerState>>,
    Path((owner, name)): Path<(String, String)>,
) -> Response {
    if format!("{owner}/{name}") != REPO {
        return StatusCode::NOT_FOUND.into_response();
    }
    axum::Json(serde_json::json!({
        "id": REPO,
        "siblings": [{"rfilename": FILE, "size": state.content.len()}],
    }))
    .into_response()
}

async fn resolve(
    State(state): State<Arc<ServerState>>,
    Path((_, _, file)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Response {
    if file != FILE {
        return StatusCode::NOT_FOUND.into_response();
    }

    let range = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    state.ranges.lock().unwrap().push(range.clone());

    let len = state.content.len() as u64;
    let start = range
        .as_deref()
        .and_then(|r| r.strip_prefix("bytes="))
        .and_then(|r| r.strip_suffix('-'))
        .and_then(|s| s.parse::<u64>().ok());

    let (status, start) = match start {
        Some(offset) if offset >= len => {
            return Response::builder()
                .status(StatusCode::RANGE_NOT_SATISFIABLE)
                .header(header::CONTENT_RANGE, format!("bytes */{len}"))
                .body(Body::empty())
                .unwrap();
        }
        Some(offset) => (StatusCode::PARTIAL_CONTENT, offset),
        None => (StatusCode::OK, 0),
    };

    let body_bytes = state.content[start as usize..].to_vec();
    let chunks: Vec<Bytes> = body_bytes
        .chunks(64 * 1024)
        .map(Bytes::copy_from_slice)
        .collect();
    let delay = state.chunk_delay;
    let stream = futures::stream::iter(chunks).then(move |chunk| async move {
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok::<_, std::io::Error>(chunk)
    });

    let mut builder = Response::builder()
        .status(status)
        .header(header::CONTENT_LENGTH, body_bytes.len());
    if status == StatusCode::PARTIAL_CONTENT {
        builder = builder.header(
            header::CONTENT_RANGE,
            format!("bytes {start}-{}/{len}", len - 1),
        );
    }
    builder.body(Body::from_stream(stream)).unwrap()
}

async fn spawn_registry(state: Arc<ServerState>) -> SocketAddr {
    let app = Router::new()
        .route("/api/models/{owner}/{name}", get(metadata))
        .route("/{owner}/{name}/resolve/main/{file}", get(resolve))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

struct Fixture {
    _db_dir: tempfile::TempDir,
    models_dir: tempfile::TempDir,
    state: Arc<ServerState>,
    engine: Arc<DownloadEngine>,
    events: Arc<EventBus>,
}

async fn fixture(content_len: usize, chunk_delay: Option<Duration>) -> Fixture {
    let db_dir = tempfile::tempdir().unwrap();
    let url = format!("sqlite://{}", db_dir.path().join("easel.db").display());
    let pool = easel_db::create_pool(&url).await.unwrap();
    easel_db::run_migrations(&pool).await.unwrap();

    let state = Arc::new(ServerState {
        content: patterned_content(content_len),
        ranges: Mutex::new(Vec::new()),
        chunk_delay,
    });
    let addr = spawn_registry(Arc::clone(&state)).await;

    let models_dir = tempfile::tempdir().unwrap();
    let events = Arc::new(EventBus::new());
    let engine = DownloadEngine::new(
        pool,
        RegistryClient::new(format!("http://{addr}")),
        Arc::clone(&events),
        models_dir.path().to_path_buf(),
    );

    Fixture {
        _db_dir: db_dir,
        models_dir,
        state,
        engine,
        events,
    }
}

impl Fixture {
    fn dest_path(&self) -> std::path::PathBuf {
        self.models_dir.path().join("acme--sd-turbo").join(FILE)
    }

    async fn wait_terminal(&self, id: &str) -> DownloadStatus {
        for _ in 0..200 {
            let view = self.engine.status(id).await.unwrap();
            if view.record.status.is_terminal() {
                return view.record.status;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("download {id} never reached a terminal status");
    }
}

#[tokio::test]
async fn full_download_completes_and_matches_source() {
    let fx = fixture(3 * 1024 * 1024, None).await;

    let record = fx.engine.start(REPO, &[FILE.to_string()]).await.unwrap();
    assert_eq!(record.status, DownloadStatus::Downloading);
    assert_eq!(record.total_bytes, fx.state.content.len() as i64);

    assert_eq!(fx.wait_terminal(&record.id).await, DownloadStatus::Completed);

    let view = fx.engine.status(&record.id).await.unwrap();
    assert_eq!(view.progress, 1.0);
    assert_eq!(view.record.bytes_downloaded, fx.state.content.len() as i64);
    assert!(view.files[0].complete);

    let on_disk = std::fs::read(fx.dest_path()).unwrap();
    assert_eq!(on_disk, fx.state.content);

    // A fresh download never sends a Range header.
    assert_eq!(fx.state.ranges.lock().unwrap()[0], None);
}

#[tokio::test]
async fn partial_file_resumes_with_range_request() {
    let fx = fixture(3 * 1024 * 1024, None).await;

    // Seed the destination with the first MiB, as a cancelled run would.
    let partial = 1024 * 1024;
    let dest = fx.dest_path();
    std::fs::create_dir_all(dest.parent().unwrap()).unwrap();
    std::fs::write(&dest, &fx.state.content[..partial]).unwrap();

    let record = fx.engine.start(REPO, &[FILE.to_string()]).await.unwrap();
    assert_eq!(fx.wait_terminal(&record.id).await, DownloadStatus::Completed);

    let ranges = fx.state.ranges.lock().unwrap().clone();
    assert_eq!(ranges[0].as_deref(), Some(format!("bytes={partial}-").as_str()));

    // Resume + tail must be byte-for-byte identical to a single-shot fetch.
    let on_disk = std::fs::read(&dest).unwrap();
    assert_eq!(on_disk, fx.state.content);
}

#[tokio::test]
async fn cancel_aborts_then_restart_resumes_to_identical_bytes() {
    // ~2 MiB at 64 KiB per 30 ms: slow enough to cancel mid-stream.
    let fx = fixture(2 * 1024 * 1024, Some(Duration::from_millis(30))).await;
    let mut sub = fx.events.subscribe(&[Topic::Downloads]);

    let record = fx.engine.start(REPO, &[FILE.to_string()]).await.unwrap();

    // Wait for the first progress flush, then pull the plug.
    loop {
        let event = sub.rx.recv().await.unwrap();
        if event.event_type == "download.progress" {
            assert_eq!(event.payload["download_id"], record.id.as_str());
            assert!(event.payload["bytes_downloaded"].as_i64().unwrap() > 0);
            break;
        }
    }
    fx.engine.cancel(&record.id).await.unwrap();
    assert_eq!(fx.wait_terminal(&record.id).await, DownloadStatus::Cancelled);

    let partial_len = std::fs::metadata(fx.dest_path()).unwrap().len();
    assert!(partial_len > 0, "cancel should leave the partial file");
    assert!(
        partial_len < fx.state.content.len() as u64,
        "cancel must interrupt before completion"
    );

    // Restart: a new download resumes from the partial file.
    let restarted = fx.engine.start(REPO, &[FILE.to_string()]).await.unwrap();
    assert_eq!(fx.wait_terminal(&restarted.id).await, DownloadStatus::Completed);

    let resumed_range = fx
        .state
        .ranges
        .lock()
        .unwrap()
        .last()
        .cloned()
        .flatten()
        .expect("restart must use a range request");
    assert!(resumed_range.starts_with("bytes="));

    let on_disk = std::fs::read(fx.dest_path()).unwrap();
    assert_eq!(on_disk, fx.state.content);
}

#[tokio::test]
async fn already_complete_file_short_circuits_on_416() {
    let fx = fixture(512 * 1024, None).await;

    let dest = fx.dest_path();
    std::fs::create_dir_all(dest.parent().unwrap()).unwrap();
    std::fs::write(&dest, &fx.state.content).unwrap();

    let record = fx.engine.start(REPO, &[FILE.to_string()]).await.unwrap();
    assert_eq!(fx.wait_terminal(&record.id).await, DownloadStatus::Completed);

    let view = fx.engine.status(&record.id).await.unwrap();
    assert!(view.files[0].complete);
    assert_eq!(view.record.bytes_downloaded, fx.state.content.len() as i64);
}

#[tokio::test]
async fn unknown_repo_fails_before_creating_a_record() {
    let fx = fixture(1024, None).await;

    let err = fx.engine.start("acme/ghost", &[]).await.unwrap_err();
    assert!(matches!(err, DownloadError::Http { status: 404, .. }));
    assert!(fx.engine.all(50, 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn progress_events_carry_file_and_aggregate_values() {
    let fx = fixture(2 * 1024 * 1024, Some(Duration::from_millis(10))).await;
    let mut sub = fx.events.subscribe(&[Topic::Downloads]);

    let record = fx.engine.start(REPO, &[FILE.to_string()]).await.unwrap();
    assert_eq!(fx.wait_terminal(&record.id).await, DownloadStatus::Completed);

    let mut last_bytes = 0i64;
    let mut saw_progress = false;
    while let Ok(event) = sub.rx.try_recv() {
        if event.event_type != "download.progress" {
            continue;
        }
        saw_progress = true;
        let bytes = event.payload["bytes_downloaded"].as_i64().unwrap();
        assert!(bytes >= last_bytes, "aggregate bytes must not regress");
        last_bytes = bytes;
        assert!(event.payload["file"]["remote_path"].is_string());
        assert!(event.payload["progress"].as_f64().unwrap() <= 1.0);
    }
    assert!(saw_progress);
    assert_eq!(last_bytes, fx.state.content.len() as i64);
}
