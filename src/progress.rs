use std::collections::VecDeque;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

pub const CONNECTED_MESSAGE: &str = "Connected to progress stream.";
pub const FINALIZING_MESSAGE: &str = "Finalizing...";
pub const ALREADY_DOWNLOADED_MESSAGE: &str = "Already downloaded, serving...";
pub const RETRYING_MESSAGE: &str = "Retrying with fallback format...";
pub const COMPLETE_MESSAGE: &str = "Download complete!";

static PROGRESS_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[download\]\s+(?P<percent>\d+(?:\.\d+)?)%\s+of\s+~?\s*(?P<size>\S+)\s+at\s+(?P<speed>.+?)\s+ETA\s+(?P<eta>\S+)").unwrap()
});
static DESTINATION_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\[download\] Destination: ").unwrap());
static ALREADY_DOWNLOADED_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[download\] (.*) has already been downloaded").unwrap());

/// What happened, without saying to which session.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EventKind {
    Status {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        percent: Option<f64>,
    },
    Progress {
        percent: f64,
        size: String,
        speed: String,
        eta: String,
    },
    Complete {
        message: String,
    },
    Error {
        message: String,
    },
}

impl EventKind {
    pub fn status(message: impl Into<String>) -> Self {
        EventKind::Status { message: message.into(), percent: None }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EventKind::Complete { .. } | EventKind::Error { .. })
    }
}

/// One message on a progress subscription, serialized as a single JSON line.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    #[serde(rename = "downloadId")]
    pub session_id: String,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl ProgressEvent {
    pub fn new(session_id: impl Into<String>, kind: EventKind) -> Self {
        Self { session_id: session_id.into(), kind }
    }
}

/// Parses one diagnostic line. Most lines carry nothing and yield `None`.
pub fn parse_line(line: &str) -> Option<EventKind> {
    if let Some(caps) = PROGRESS_REGEX.captures(line) {
        // A percent that does not parse means the line is not a progress line.
        let percent = caps["percent"].parse::<f64>().ok()?;
        return Some(EventKind::Progress {
            percent,
            size: caps["size"].trim().to_string(),
            speed: caps["speed"].trim().to_string(),
            eta: caps["eta"].trim().to_string(),
        });
    }
    if DESTINATION_REGEX.is_match(line) {
        return Some(EventKind::status(FINALIZING_MESSAGE));
    }
    if ALREADY_DOWNLOADED_REGEX.is_match(line) {
        return Some(EventKind::Status {
            message: ALREADY_DOWNLOADED_MESSAGE.to_string(),
            percent: Some(100.0),
        });
    }
    None
}

/// The most recent diagnostic lines of one process, kept for failure reports.
#[derive(Debug, Clone)]
pub struct DiagnosticLog {
    lines: VecDeque<String>,
    capacity: usize,
}

impl Default for DiagnosticLog {
    fn default() -> Self {
        Self::with_capacity(64)
    }
}

impl DiagnosticLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { lines: VecDeque::with_capacity(capacity), capacity: capacity.max(1) }
    }

    pub fn push(&mut self, line: &str) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.to_string());
    }

    /// Last line that is not blank, typically yt-dlp's `ERROR:` summary.
    pub fn last_line(&self) -> Option<&str> {
        self.lines.iter().rev().map(|l| l.trim()).find(|l| !l.is_empty())
    }

    pub fn text(&self) -> String {
        self.lines.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}
