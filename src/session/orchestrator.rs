use std::process::ExitStatus;
use std::sync::Arc;

use axum::body::Bytes;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr};
use tokio::task::JoinHandle;
use tokio_stream::{wrappers::SplitStream, StreamExt};
use tokio_util::io::ReaderStream;

use super::registry::{ProcessHandle, SessionRegistry};
use super::sink::{Disconnected, ResponseSink};
use super::state::{AbortReason, Failure, Lifecycle, SessionState};
use crate::error::AppError;
use crate::extractor::{extension_for, Extractor};
use crate::progress::{self, DiagnosticLog, EventKind};

/// What the client asked for.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub session_id: String,
    pub url: String,
    pub format: Option<String>,
}

/// A spawned attempt.
struct Running {
    child: Child,
    handle: ProcessHandle,
    diagnostics: JoinHandle<DiagnosticLog>,
    extension: &'static str,
}

enum Outcome {
    Exited { success: bool, detail: Option<String> },
    Aborted(AbortReason),
}

enum Step {
    Chunk(Option<std::io::Result<Bytes>>),
    Aborted(AbortReason),
}

pub struct DownloadSession {
    request: DownloadRequest,
    registry: Arc<SessionRegistry>,
    extractor: Arc<Extractor>,
    sink: ResponseSink,
    lifecycle: Lifecycle,
    /// Token of the process this session last registered.
    owner: Option<u64>,
    extension: &'static str,
}

impl DownloadSession {
    pub fn new(
        request: DownloadRequest,
        fallback_format: &str,
        registry: Arc<SessionRegistry>,
        extractor: Arc<Extractor>,
        sink: ResponseSink,
    ) -> Self {
        let lifecycle = Lifecycle::new(request.format.as_deref(), fallback_format);
        Self { request, registry, extractor, sink, lifecycle, owner: None, extension: "mp4" }
    }

    /// Runs the session to a terminal state.
    pub async fn run(mut self) {
        while let SessionState::Starting { selector, attempt } = self.lifecycle.state().clone() {
            tracing::info!(
                "Starting download {} with format {} ({:?} attempt)",
                self.request.session_id,
                selector,
                attempt
            );
            let running = match self.spawn(&selector) {
                Ok(running) => running,
                Err(e) => {
                    tracing::error!("yt-dlp spawn failed for {}: {}", self.request.session_id, e);
                    self.lifecycle.spawn_failed(e.to_string());
                    break;
                }
            };
            self.lifecycle.spawned();

            match self.stream(running).await {
                Outcome::Exited { success, detail } => {
                    self.lifecycle.exited(success, detail);
                    if self.lifecycle.state() == &SessionState::Retrying {
                        tracing::warn!("Falling back to best format for {}", self.request.session_id);
                        self.registry.publish(&self.request.session_id, EventKind::status(progress::RETRYING_MESSAGE));
                        self.lifecycle.restart();
                    }
                }
                Outcome::Aborted(reason) => self.lifecycle.abort(reason),
            }
        }

        self.finish().await;
    }

    fn spawn(&mut self, selector: &str) -> std::io::Result<Running> {
        let mut child = self.extractor.download_command(&self.request.url, selector).spawn()?;
        let handle = self.registry.upsert_process(&self.request.session_id, child.id());
        self.owner = Some(handle.token());
        self.extension = extension_for(selector);

        let diagnostics = tokio::spawn(relay_diagnostics(
            child.stderr.take(),
            Arc::clone(&self.registry),
            self.request.session_id.clone(),
        ));

        Ok(Running { child, handle, diagnostics, extension: self.extension })
    }

    /// Pipes stdout into the response until the process is done or the
    /// session is aborted.
    async fn stream(&mut self, mut running: Running) -> Outcome {
        if let Some(stdout) = running.child.stdout.take() {
            let mut chunks = ReaderStream::new(stdout);
            loop {
                let step = tokio::select! {
                    _ = self.sink.closed() => Step::Aborted(AbortReason::ClientDisconnect),
                    _ = running.handle.terminated() => Step::Aborted(AbortReason::Superseded),
                    chunk = chunks.next() => Step::Chunk(chunk),
                };
                match step {
                    Step::Chunk(Some(Ok(bytes))) => {
                        let written = tokio::select! {
                            written = self.sink.write(running.extension, bytes) => written.map_err(|Disconnected| AbortReason::ClientDisconnect),
                            _ = running.handle.terminated() => Err(AbortReason::Superseded),
                        };
                        if let Err(reason) = written {
                            return abort(running, reason).await;
                        }
                    }
                    Step::Chunk(Some(Err(e))) => {
                        tracing::warn!("Reading output of {} failed: {}", self.request.session_id, e);
                        break;
                    }
                    Step::Chunk(None) => break,
                    Step::Aborted(reason) => return abort(running, reason).await,
                }
            }
        }

        let exit = tokio::select! {
            _ = self.sink.closed() => Err(AbortReason::ClientDisconnect),
            _ = running.handle.terminated() => Err(AbortReason::Superseded),
            status = running.child.wait() => Ok(status),
        };
        let status = match exit {
            Ok(status) => status,
            Err(reason) => return abort(running, reason).await,
        };

        let diagnostics = running.diagnostics.await.unwrap_or_default();
        match status {
            Ok(status) => exited(&self.request.session_id, status, &diagnostics),
            Err(e) => Outcome::Exited { success: false, detail: Some(e.to_string()) },
        }
    }

    /// Emits the terminal event, settles the response and drops the entry.
    async fn finish(self) {
        let id = self.request.session_id;
        match self.lifecycle.state() {
            SessionState::Complete => {
                tracing::info!("Download for {} completed successfully.", id);
                self.registry.publish(&id, EventKind::Complete { message: progress::COMPLETE_MESSAGE.to_string() });
                self.sink.finish(self.extension);
                self.registry.release(&id, self.owner);
            }
            SessionState::Failed(failure) => {
                let (message, err) = match failure {
                    Failure::Spawn(reason) => (
                        "Internal server error: extractor spawn failed.".to_string(),
                        AppError::Spawn(reason.clone()),
                    ),
                    Failure::Download { detail } => {
                        let message = "Video download failed after retry.".to_string();
                        let reported = match detail {
                            Some(detail) => format!("{} {}", message, detail),
                            None => message.clone(),
                        };
                        (message, AppError::Download(reported))
                    }
                };
                self.registry.publish(&id, EventKind::Error { message });
                self.sink.fail(err).await;
                self.registry.release(&id, self.owner);
            }
            SessionState::Aborted(AbortReason::ClientDisconnect) => {
                tracing::info!("Client for download {} disconnected.", id);
                self.registry.release(&id, self.owner);
            }
            SessionState::Aborted(AbortReason::Superseded) => {
                // The entry now belongs to the newer request.
                tracing::info!("Download {} was superseded by a newer request.", id);
                self.sink
                    .fail(AppError::Conflict("download superseded by a newer request".to_string()))
                    .await;
            }
            other => tracing::error!("Download {} stopped in non-terminal state {:?}", id, other),
        }
    }
}

/// Hard-kills the process and waits for it to be reaped.
async fn abort(mut running: Running, reason: AbortReason) -> Outcome {
    if let Err(e) = running.child.kill().await {
        tracing::debug!("Killing extractor {:?} failed: {}", running.child.id(), e);
    }
    running.diagnostics.abort();
    Outcome::Aborted(reason)
}

fn exited(id: &str, status: ExitStatus, diagnostics: &DiagnosticLog) -> Outcome {
    if status.success() {
        return Outcome::Exited { success: true, detail: None };
    }
    tracing::warn!("yt-dlp exited with code {:?} for {}", status.code(), id);
    if !diagnostics.is_empty() {
        tracing::warn!("stderr: {}", diagnostics.text());
    }
    Outcome::Exited { success: false, detail: diagnostics.last_line().map(str::to_string) }
}

/// Feeds stderr through the progress parser, line by line and in order,
/// returning the retained diagnostic tail once the stream closes.
async fn relay_diagnostics(
    stderr: Option<ChildStderr>,
    registry: Arc<SessionRegistry>,
    session_id: String,
) -> DiagnosticLog {
    let mut log = DiagnosticLog::default();
    let Some(stderr) = stderr else { return log };

    // Split on raw bytes: a stray invalid UTF-8 sequence must not stop the relay.
    let mut lines = SplitStream::new(BufReader::new(stderr).split(b'\n'));
    while let Some(Ok(raw)) = lines.next().await {
        let line = String::from_utf8_lossy(&raw);
        let line = line.trim_end_matches('\r');
        log.push(line);
        if let Some(event) = progress::parse_line(line) {
            registry.publish(&session_id, event);
        }
    }
    log
}
