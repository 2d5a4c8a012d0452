//! Integration tests for lobi-archiver
//!
//! Each test runs the full crawl loop against a local axum server that plays
//! the remote API from a script of responses per request path.

use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use lobi_archiver::archive;
use lobi_archiver::archiver::{Archiver, BatchSettings};
use lobi_archiver::db::{JobQueue, JobState};
use lobi_archiver::discovery::{paths, LobiPolicy};
use lobi_archiver::fetch::{HttpFetcher, RetryPolicy};
use lobi_archiver::storage::{
    locate_in_volume, locate_partial_in_volume, FsSpaceProbe, Volume, VolumeAllocator,
};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::{tempdir, TempDir};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

const GROUP: &str = "0123456789abcdef0123456789abcdef01234567";
const OWNER: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
const SUBLEADER: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

#[derive(Clone, Default)]
struct Script {
    /// Responses per path-and-query; the last one repeats once the rest are used
    responses: Arc<Mutex<HashMap<String, VecDeque<(u16, String)>>>>,
    hits: Arc<Mutex<HashMap<String, usize>>>,
}

impl Script {
    fn respond(&self, path: &str, status: u16, body: impl Into<String>) -> &Self {
        self.responses
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back((status, body.into()));
        self
    }

    fn hits(&self, path: &str) -> usize {
        self.hits.lock().unwrap().get(path).copied().unwrap_or(0)
    }
}

async fn serve(State(script): State<Script>, uri: Uri) -> Response {
    let key = uri
        .path_and_query()
        .map(|pq| pq.as_str().trim_start_matches('/').to_string())
        .unwrap_or_default();

    *script.hits.lock().unwrap().entry(key.clone()).or_insert(0) += 1;

    let next = {
        let mut responses = script.responses.lock().unwrap();
        match responses.get_mut(&key) {
            Some(queue) if queue.len() > 1 => queue.pop_front(),
            Some(queue) => queue.front().cloned(),
            None => None,
        }
    };

    match next {
        Some((status, body)) => (StatusCode::from_u16(status).unwrap(), body).into_response(),
        None => (StatusCode::NOT_FOUND, "{\"error\":\"not found\"}").into_response(),
    }
}

/// Local stand-in for the remote API
struct TestServer {
    base_url: String,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestServer {
    async fn start(script: Script) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().fallback(serve).with_state(script);

        let (tx, rx) = oneshot::channel::<()>();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = rx.await;
                })
                .await
                .unwrap();
        });

        Self {
            base_url: format!("http://{}/", addr),
            shutdown: Some(tx),
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

struct Harness {
    _dir: TempDir,
    db: PathBuf,
    volume: PathBuf,
    server: TestServer,
    archiver: Archiver,
}

impl Harness {
    async fn new(script: Script) -> Self {
        let dir = tempdir().unwrap();
        let db = dir.path().join("lobi.db");
        let volume = dir.path().join("vol");
        let server = TestServer::start(script).await;
        let archiver = build_archiver(&db, &volume, &server.base_url);

        Self {
            _dir: dir,
            db,
            volume,
            server,
            archiver,
        }
    }

    fn queue(&self) -> JobQueue {
        JobQueue::open(&self.db).unwrap()
    }

    fn archive(&self, name: &str) -> Vec<archive::PackedRecord> {
        let found = locate_in_volume(&self.volume, name);
        assert_eq!(found.len(), 1, "expected one copy of {}", name);
        archive::decode(&std::fs::read(&found[0]).unwrap()).unwrap()
    }
}

fn build_archiver(db: &Path, volume: &Path, base_url: &str) -> Archiver {
    let queue = JobQueue::open(db).unwrap();
    let allocator =
        VolumeAllocator::new(vec![Volume::new(volume, 0)], Box::new(FsSpaceProbe)).unwrap();
    let fetcher = HttpFetcher::new(base_url, Duration::from_secs(5)).unwrap();

    Archiver::new(
        queue,
        allocator,
        Arc::new(fetcher),
        Arc::new(LobiPolicy::new(false)),
        BatchSettings {
            batch_size: 20,
            retry: RetryPolicy {
                retry_delay: Duration::from_millis(10),
                bad_gateway_delay: Duration::from_millis(10),
            },
            measure_window: 100,
        },
    )
}

fn group_body() -> String {
    json!({
        "uid": GROUP,
        "name": "test group",
        "icon": "https://img.example/icon.png",
        "wallpaper": "https://img.example/wallpaper.png",
        "owner": {"uid": OWNER},
        "subleaders": [{"uid": OWNER}, {"uid": SUBLEADER}],
    })
    .to_string()
}

#[tokio::test]
async fn test_group_end_to_end() {
    let (group_path, _) = paths::group_info(GROUP);
    let script = Script::default();
    script.respond(&group_path, 200, group_body());

    let harness = Harness::new(script).await;
    harness.archiver.seed(vec![GROUP.to_string()]).await.unwrap();
    let result = harness.archiver.run().await.unwrap();
    assert!(result.completed_run);

    let queue = harness.queue();
    let group = queue.job_by_path(&group_path).unwrap().unwrap();
    assert_eq!(group.state, JobState::Completed);
    assert_eq!(group.code, Some(200));
    assert_eq!(group.batch_ref.as_deref(), Some("packed_1"));

    // bookmarks, members, threads + info/contacts/followers for the owner
    // (also listed as subleader) and the second subleader
    let counts = queue.counts().unwrap();
    assert_eq!(counts.total_jobs(), 1 + 9);
    assert_eq!(counts.completed, 10);
    assert_eq!(counts.assets, 2);
    assert!(queue.has_asset("https://img.example/icon.png").unwrap());
    assert!(queue.has_asset("https://img.example/wallpaper.png").unwrap());

    for (path, cost) in [
        paths::group_bookmarks(GROUP, "0"),
        paths::group_members(GROUP, "0"),
        paths::group_threads(GROUP, "0"),
        paths::user_info(OWNER),
        paths::user_contacts(SUBLEADER),
        paths::user_followers(SUBLEADER),
    ] {
        let child = queue.job_by_path(&path).unwrap().unwrap();
        assert_eq!(child.cost, cost, "{}", path);
        // Everything but the group itself is unknown to the fixture
        assert_eq!(child.code, Some(404), "{}", path);
    }

    let records = harness.archive("packed_1");
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].job_id, group.id);
    assert_eq!(records[0].body, group_body().into_bytes());
}

#[tokio::test]
async fn test_permanent_errors_archive_no_bytes() {
    let (group_path, _) = paths::group_info(GROUP);
    let script = Script::default();
    script.respond(&group_path, 403, "{\"error\":\"private group\"}");

    let harness = Harness::new(script).await;
    harness.archiver.seed(vec![GROUP.to_string()]).await.unwrap();
    let result = harness.archiver.run().await.unwrap();
    assert_eq!(result.remote_errors, 1);
    assert_eq!(result.children_enqueued, 0);

    let job = harness.queue().job_by_path(&group_path).unwrap().unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.code, Some(403));

    assert!(harness.archive("packed_1").is_empty());
    let file = &locate_in_volume(&harness.volume, "packed_1")[0];
    assert_eq!(std::fs::read(file).unwrap(), 100i32.to_le_bytes().to_vec());
}

#[tokio::test]
async fn test_bad_gateway_is_retried() {
    let (path, _) = paths::user_info(OWNER);
    let script = Script::default();
    script
        .respond(&path, 502, "")
        .respond(&path, 502, "")
        .respond(&path, 200, json!({"uid": OWNER, "icon": "https://img.example/u.png"}).to_string());

    let harness = Harness::new(script.clone()).await;
    harness.queue().enqueue(&path, 1).unwrap();
    harness.archiver.run().await.unwrap();

    assert_eq!(script.hits(&path), 3);
    let job = harness.queue().job_by_path(&path).unwrap().unwrap();
    assert_eq!(job.code, Some(200));
    assert!(harness.queue().has_asset("https://img.example/u.png").unwrap());
}

#[tokio::test]
async fn test_garbled_body_is_requeued_then_completed() {
    let (group_path, _) = paths::group_info(GROUP);
    let script = Script::default();
    script
        .respond(&group_path, 200, "<html>Service restarting</html>")
        .respond(&group_path, 200, group_body());

    let harness = Harness::new(script.clone()).await;
    harness.archiver.seed(vec![GROUP.to_string()]).await.unwrap();
    let result = harness.archiver.run().await.unwrap();

    assert_eq!(result.requeued, 1);
    assert_eq!(script.hits(&group_path), 2);

    let job = harness.queue().job_by_path(&group_path).unwrap().unwrap();
    assert_eq!(job.state, JobState::Completed);
    assert_eq!(job.code, Some(200));

    // Both attempts were the first job of their batch
    let copies = locate_in_volume(&harness.volume, "packed_1");
    assert_eq!(copies.len(), 2);

    // A torn third copy is the only one recovery may remove
    let torn = (0..lobi_archiver::storage::DISTRIBUTION)
        .map(|i| harness.volume.join(i.to_string()).join("packed_1"))
        .find(|p| !copies.contains(p))
        .unwrap();
    std::fs::write(&torn, [100u8, 0, 0, 0, 1, 0]).unwrap();
    assert_eq!(locate_partial_in_volume(&harness.volume, "packed_1"), vec![torn]);
}

#[tokio::test]
async fn test_stranded_jobs_wait_for_recovery() {
    let (group_path, _) = paths::group_info(GROUP);
    let script = Script::default();
    script.respond(&group_path, 200, group_body());

    let harness = Harness::new(script).await;
    harness.archiver.seed(vec![GROUP.to_string()]).await.unwrap();

    // A crashed run left the group claimed
    let claimed = harness.queue().claim_batch(10).unwrap();
    assert_eq!(claimed.len(), 1);

    let result = harness.archiver.run().await.unwrap();
    assert_eq!(result.batches, 0);
    let job = harness.queue().job_by_path(&group_path).unwrap().unwrap();
    assert_eq!(job.state, JobState::Fetching);

    assert_eq!(harness.queue().reset_fetching().unwrap(), 1);
    let result = harness.archiver.run().await.unwrap();
    assert!(result.completed_run);

    let job = harness.queue().job_by_path(&group_path).unwrap().unwrap();
    assert_eq!(job.state, JobState::Completed);
}

#[tokio::test]
async fn test_resume_with_fresh_archiver() {
    let (group_path, _) = paths::group_info(GROUP);
    let script = Script::default();
    script.respond(&group_path, 200, group_body());

    let harness = Harness::new(script).await;
    harness.archiver.seed(vec![GROUP.to_string()]).await.unwrap();
    harness.archiver.shutdown_flag().store(true, std::sync::atomic::Ordering::SeqCst);
    let result = harness.archiver.run().await.unwrap();
    assert!(!result.completed_run);
    assert_eq!(harness.queue().counts().unwrap().queued, 1);

    // Restart against the same database without seeds
    let resumed = build_archiver(&harness.db, &harness.volume, &harness.server.base_url);
    let result = resumed.run().await.unwrap();
    assert!(result.completed_run);
    assert_eq!(harness.queue().counts().unwrap().completed, 10);
}
