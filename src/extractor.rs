use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

use crate::config::Config;
use crate::error::AppError;
use crate::models::VideoInfo;

/// Selector used when the client names none and for the single retry.
pub const DEFAULT_FALLBACK_FORMAT: &str = "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best";

/// How to launch the extraction tool.
#[derive(Debug, Clone)]
pub struct Extractor {
    program: String,
    leading_args: Vec<String>,
    cookies: Option<PathBuf>,
}

impl Extractor {
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into(), leading_args: Vec::new(), cookies: None }
    }

    pub fn with_leading_args(mut self, args: Vec<String>) -> Self {
        self.leading_args = args;
        self
    }

    pub fn with_cookies(mut self, path: Option<PathBuf>) -> Self {
        self.cookies = path;
        self
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(&config.extractor_path)
            .with_leading_args(config.extractor_args.clone())
            .with_cookies(config.cookies_path.clone())
    }

    /// The cookie jar, if it is present right now. Checked on every invocation
    /// since the file may appear or disappear while the server runs.
    fn cookie_file(&self) -> Option<&Path> {
        let path = self.cookies.as_deref()?;
        if path.exists() {
            Some(path)
        } else {
            tracing::warn!("cookies file {} missing, requests may hit 429 errors", path.display());
            None
        }
    }

    fn base_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = self.leading_args.iter().map(OsString::from).collect();
        if let Some(cookies) = self.cookie_file() {
            args.push("--cookies".into());
            args.push(cookies.into());
        }
        args
    }

    /// Arguments that stream `selector` for `url` to stdout.
    pub fn download_args(&self, url: &str, selector: &str) -> Vec<OsString> {
        let mut args = self.base_args();
        args.extend(["-f", selector, "--newline", "--no-playlist", "-o", "-", "--", url].map(OsString::from));
        args
    }

    /// Arguments that dump the metadata of `url` as one JSON document.
    pub fn metadata_args(&self, url: &str) -> Vec<OsString> {
        let mut args = self.base_args();
        args.extend(["-j", "--no-playlist", "--", url].map(OsString::from));
        args
    }

    /// A ready-to-spawn download process: stdout carries media, stderr diagnostics.
    pub fn download_command(&self, url: &str, selector: &str) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(self.download_args(url, selector))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Runs the metadata round trip for `url`.
    pub async fn fetch_info(&self, url: &str) -> Result<VideoInfo, AppError> {
        let output = Command::new(&self.program)
            .args(self.metadata_args(url))
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| AppError::Spawn(e.to_string()))?;

        if !output.status.success() {
            let error_message = String::from_utf8_lossy(&output.stderr).trim().to_string();
            tracing::error!("yt-dlp failed: {}", error_message);
            return Err(AppError::Extraction(error_message));
        }

        let info: VideoInfo = serde_json::from_slice(&output.stdout)?;
        Ok(info)
    }
}

/// `m4a` when `selector` asks for an audio-only stream, `mp4` otherwise.
///
/// Only the first alternative counts: it is what the extractor tries first.
pub fn extension_for(selector: &str) -> &'static str {
    let primary = selector.split('/').next().unwrap_or_default().to_ascii_lowercase();
    let audio_only = !primary.contains('+')
        && !primary.contains("video")
        && (primary.contains("audio") || primary.starts_with("ba") || primary.starts_with("wa"));
    if audio_only {
        "m4a"
    } else {
        "mp4"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn download_args_stream_to_stdout() {
        let extractor = Extractor::new("yt-dlp");
        let args = strings(extractor.download_args("https://example.com/v", "22"));
        assert_eq!(args, vec!["-f", "22", "--newline", "--no-playlist", "-o", "-", "--", "https://example.com/v"]);
    }

    #[test]
    fn existing_cookie_file_is_attached() {
        let dir = tempfile::tempdir().unwrap();
        let cookies = dir.path().join("cookies.txt");
        std::fs::write(&cookies, "# cookies").unwrap();

        let extractor = Extractor::new("python3")
            .with_leading_args(vec!["-m".into(), "yt_dlp".into()])
            .with_cookies(Some(cookies.clone()));
        let args = strings(extractor.metadata_args("https://example.com/v"));
        let cookie_arg = cookies.to_string_lossy().into_owned();
        assert_eq!(args[..4], ["-m", "yt_dlp", "--cookies", cookie_arg.as_str()]);
        assert_eq!(args[4..], ["-j", "--no-playlist", "--", "https://example.com/v"]);
    }

    #[test]
    fn missing_cookie_file_is_skipped() {
        let extractor = Extractor::new("yt-dlp").with_cookies(Some(PathBuf::from("/definitely/not/here.txt")));
        let args = strings(extractor.metadata_args("u"));
        assert!(!args.contains(&"--cookies".to_string()));
    }

    #[test]
    fn audio_selectors_get_m4a_extension() {
        assert_eq!(extension_for("bestaudio[ext=m4a]"), "m4a");
        assert_eq!(extension_for("ba/b"), "m4a");
        assert_eq!(extension_for("137+140"), "mp4");
        assert_eq!(extension_for("22"), "mp4");
        assert_eq!(extension_for(DEFAULT_FALLBACK_FORMAT), "mp4");
        assert_eq!(extension_for("bestvideo+bestaudio"), "mp4");
    }

    #[tokio::test]
    async fn spawn_failure_is_reported_as_such() {
        let extractor = Extractor::new("/nonexistent/extractor-binary");
        let err = extractor.fetch_info("https://example.com/v").await.unwrap_err();
        assert!(matches!(err, AppError::Spawn(_)));
    }
}
