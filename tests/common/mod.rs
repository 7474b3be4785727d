#![allow(dead_code)]

use std::path::PathBuf;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, Response};
use media_relay::config::Config;
use media_relay::progress::{EventKind, ProgressEvent};
use media_relay::session::Subscription;
use media_relay::{router, AppState};
use tempfile::TempDir;
use tokio_stream::StreamExt;
use tower::ServiceExt;

pub const FALLBACK: &str = "fallback";
pub const MEDIA_URL: &str = "https://media.example/clip";

/// A shell script standing in for yt-dlp. It appends its arguments to a log,
/// then runs `body`. It is run as `sh <script>` so it never needs the exec bit.
pub struct FakeExtractor {
    dir: TempDir,
    script: PathBuf,
    log: PathBuf,
}

impl FakeExtractor {
    pub fn new(body: &str) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("fake-yt-dlp.sh");
        let log = dir.path().join("invocations.log");
        let content = format!("printf '%s\\n' \"$*\" >> '{}'\n{}\n", log.display(), body);
        std::fs::write(&script, content).unwrap();
        Self { dir, script, log }
    }

    pub fn config(&self) -> Config {
        Config {
            extractor_path: "sh".into(),
            extractor_args: vec![self.script.to_string_lossy().into_owned()],
            cookies_path: None,
            cookies_secret_path: None,
            fallback_format: FALLBACK.into(),
            ..Config::default()
        }
    }

    pub fn state(&self) -> AppState {
        AppState::new(self.config())
    }

    /// Argument lists of every run so far, one string per run.
    pub fn invocations(&self) -> Vec<String> {
        std::fs::read_to_string(&self.log)
            .map(|log| log.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }
}

pub async fn get(state: &AppState, uri: &str) -> Response<Body> {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    router(state.clone()).oneshot(request).await.unwrap()
}

pub fn download_uri(id: &str, format: Option<&str>) -> String {
    match format {
        Some(format) => format!("/api/download?url={MEDIA_URL}&format={format}&downloadId={id}"),
        None => format!("/api/download?url={MEDIA_URL}&downloadId={id}"),
    }
}

pub async fn body_text(response: Response<Body>) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

/// Every event the subscription yields until its session ends.
pub async fn drain(subscription: Subscription) -> Vec<ProgressEvent> {
    tokio::time::timeout(Duration::from_secs(10), subscription.collect::<Vec<_>>())
        .await
        .expect("subscription did not close")
}

pub fn kinds(events: &[ProgressEvent]) -> Vec<EventKind> {
    events.iter().map(|e| e.kind.clone()).collect()
}

/// Polls until a process is registered for `id` and returns its pid.
pub async fn wait_for_pid(state: &AppState, id: &str) -> u32 {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            if let Some(pid) = state.sessions.lookup(id).and_then(|view| view.pid) {
                return pid;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("process was never registered")
}

/// Polls until the registry holds no sessions.
pub async fn wait_until_empty(state: &AppState) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !state.sessions.is_empty() {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("session was not removed");
}
