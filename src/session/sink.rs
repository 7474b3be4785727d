use std::io;

use axum::body::Bytes;
use tokio::sync::{mpsc, oneshot};

use crate::error::AppError;

const BODY_BUFFER: usize = 16;

pub type BodyReceiver = mpsc::Receiver<io::Result<Bytes>>;

pub enum Commit {
    Stream { extension: &'static str, body: BodyReceiver },
    Failed(AppError),
}

/// The client went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Disconnected;

pub struct ResponseSink {
    commit: Option<oneshot::Sender<Commit>>,
    pending_body: Option<BodyReceiver>,
    body: mpsc::Sender<io::Result<Bytes>>,
}

impl ResponseSink {
    pub fn new() -> (Self, oneshot::Receiver<Commit>) {
        let (commit_tx, commit_rx) = oneshot::channel();
        let (body_tx, body_rx) = mpsc::channel(BODY_BUFFER);
        let sink = Self { commit: Some(commit_tx), pending_body: Some(body_rx), body: body_tx };
        (sink, commit_rx)
    }

    /// Whether headers have been handed to the client.
    pub fn is_committed(&self) -> bool {
        self.commit.is_none()
    }

    /// Resolves when the client can no longer receive anything.
    pub async fn closed(&mut self) {
        match self.commit.as_mut() {
            Some(commit) => commit.closed().await,
            None => self.body.closed().await,
        }
    }

    fn start_body(&mut self, extension: &'static str) -> Result<(), Disconnected> {
        let Some(commit) = self.commit.take() else {
            return Ok(());
        };
        let body = self.pending_body.take().ok_or(Disconnected)?;
        commit.send(Commit::Stream { extension, body }).map_err(|_| Disconnected)
    }

    /// Sends one chunk, committing headers first if this is the first one.
    /// Waits while the client is slower than the extractor.
    pub async fn write(&mut self, extension: &'static str, chunk: Bytes) -> Result<(), Disconnected> {
        self.start_body(extension)?;
        self.body.send(Ok(chunk)).await.map_err(|_| Disconnected)
    }

    /// Ends the body normally; an empty success still gets a response.
    pub fn finish(mut self, extension: &'static str) {
        let _ = self.start_body(extension);
    }

    /// Reports `err` as the response status if nothing was sent yet,
    /// otherwise cuts the body short so the client sees a truncated transfer.
    pub async fn fail(mut self, err: AppError) {
        match self.commit.take() {
            Some(commit) => {
                let _ = commit.send(Commit::Failed(err));
            }
            None => {
                let message = match &err {
                    AppError::Download(m) | AppError::Spawn(m) | AppError::Conflict(m) => m.clone(),
                    _ => "download aborted".to_string(),
                };
                let _ = self.body.send(Err(io::Error::other(message))).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn first_write_commits_headers() {
        let (mut sink, commit) = ResponseSink::new();
        assert!(!sink.is_committed());
        sink.write("m4a", Bytes::from_static(b"abc")).await.unwrap();
        assert!(sink.is_committed());

        let Ok(Commit::Stream { extension, mut body }) = commit.await else { panic!("expected stream") };
        assert_eq!(extension, "m4a");
        assert_eq!(body.recv().await.unwrap().unwrap(), Bytes::from_static(b"abc"));
        drop(sink);
        assert!(body.recv().await.is_none());
    }

    #[tokio::test]
    async fn failure_before_bytes_becomes_status() {
        let (sink, commit) = ResponseSink::new();
        sink.fail(AppError::Download("failed".into())).await;
        assert!(matches!(commit.await, Ok(Commit::Failed(AppError::Download(_)))));
    }

    #[tokio::test]
    async fn failure_after_bytes_truncates_body() {
        let (mut sink, commit) = ResponseSink::new();
        sink.write("mp4", Bytes::from_static(b"partial")).await.unwrap();
        sink.fail(AppError::Download("failed".into())).await;

        let Ok(Commit::Stream { mut body, .. }) = commit.await else { panic!("expected stream") };
        assert!(body.recv().await.unwrap().is_ok());
        assert!(body.recv().await.unwrap().is_err());
        assert!(body.recv().await.is_none());
    }

    #[tokio::test]
    async fn empty_success_still_streams() {
        let (sink, commit) = ResponseSink::new();
        sink.finish("mp4");
        let Ok(Commit::Stream { mut body, extension }) = commit.await else { panic!("expected stream") };
        assert_eq!(extension, "mp4");
        assert!(body.recv().await.is_none());
    }

    #[tokio::test]
    async fn closed_fires_when_handler_gives_up() {
        let (mut sink, commit) = ResponseSink::new();
        drop(commit);
        sink.closed().await;
        assert_eq!(sink.write("mp4", Bytes::new()).await, Err(Disconnected));
    }

    #[tokio::test]
    async fn closed_fires_when_body_is_dropped() {
        let (mut sink, commit) = ResponseSink::new();
        sink.write("mp4", Bytes::from_static(b"x")).await.unwrap();
        let Ok(Commit::Stream { body, .. }) = commit.await else { panic!("expected stream") };
        drop(body);
        sink.closed().await;
    }
}
