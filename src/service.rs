use anyhow::{anyhow, Result};
use std::fs;
use std::path::{Path, PathBuf};
use sysinfo::{Pid, System};

use crate::config::load_config;
use crate::{credentials, router, AppState};

/// Loads the configuration and serves until the process is stopped.
pub async fn run_server() -> Result<()> {
    tracing_subscriber::fmt::init();
    let mut config = load_config().await?;
    config.apply_env_overrides();

    if let (Some(secret), Some(cookies)) = (&config.cookies_secret_path, &config.cookies_path) {
        if let Err(e) = credentials::install_cookies(secret, cookies).await {
            tracing::error!("Could not install cookies: {:#}", e);
        }
    }

    let addr = config.listen_addr();
    let app = router(AppState::new(config));
    tracing::info!("Starting server, listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Runs the server on a fresh runtime in the current process.
pub fn run_foreground() -> Result<()> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(run_server())
}

/// The pid file of the background server.
#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// The pid file in the platform data directory, creating the directory if needed.
    pub fn locate() -> Result<Self> {
        let project_dirs = directories::ProjectDirs::from("com", "MediaRelay", "media-relay")
            .ok_or_else(|| anyhow!("Could not find a valid project directory"))?;
        let data_dir = project_dirs.data_local_dir();
        fs::create_dir_all(data_dir)?;
        Ok(Self::at(data_dir.join("server.pid")))
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where the background server writes its logs.
    pub fn log_path(&self) -> PathBuf {
        self.path.with_file_name("server.log")
    }

    pub fn read(&self) -> Result<Option<u32>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let pid_str = fs::read_to_string(&self.path)?;
        let pid = pid_str
            .trim()
            .parse::<u32>()
            .map_err(|e| anyhow!("Corrupt pid file {}: {}", self.path.display(), e))?;
        Ok(Some(pid))
    }

    pub fn write(&self, pid: u32) -> Result<()> {
        fs::write(&self.path, pid.to_string())?;
        Ok(())
    }

    pub fn remove(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    /// The recorded pid, if that process is still alive.
    pub fn running_pid(&self) -> Result<Option<u32>> {
        let Some(pid) = self.read()? else { return Ok(None) };
        let system = System::new_all();
        Ok(system.process(Pid::from_u32(pid)).map(|_| pid))
    }
}

/// Starts the server as a background process.
pub fn start() -> Result<()> {
    let pid_file = PidFile::locate()?;
    if let Some(pid) = pid_file.running_pid()? {
        println!("Server is already running with PID: {}", pid);
        return Ok(());
    }

    spawn_background(&pid_file)
}

#[cfg(unix)]
fn spawn_background(pid_file: &PidFile) -> Result<()> {
    use daemonize::Daemonize;

    let log_path = pid_file.log_path();
    let stdout = fs::File::create(&log_path)?;
    let stderr = stdout.try_clone()?;
    println!("Starting server in the background, logging to {}", log_path.display());

    // Forks before any runtime exists; the daemon then serves in-process.
    Daemonize::new()
        .pid_file(pid_file.path())
        .stdout(stdout)
        .stderr(stderr)
        .start()
        .map_err(|e| anyhow!("Failed to daemonize: {}", e))?;
    run_foreground()
}

#[cfg(windows)]
fn spawn_background(pid_file: &PidFile) -> Result<()> {
    use std::os::windows::process::CommandExt;
    const CREATE_NO_WINDOW: u32 = 0x08000000;

    let myself = std::env::current_exe()?;
    let child = std::process::Command::new(&myself)
        .args(["server", "run"])
        .creation_flags(CREATE_NO_WINDOW)
        .spawn()?;
    pid_file.write(child.id())?;
    println!("Server started with PID {}. PID file at: {}", child.id(), pid_file.path().display());
    Ok(())
}

#[cfg(not(any(unix, windows)))]
fn spawn_background(_pid_file: &PidFile) -> Result<()> {
    Err(anyhow!("Background mode is not supported on this platform; use `server run`"))
}

/// Stops the background server process.
pub fn stop() -> Result<()> {
    let pid_file = PidFile::locate()?;
    let Some(pid) = pid_file.read()? else {
        println!("Server is not running (no PID file).");
        return Ok(());
    };

    let system = System::new_all();
    match system.process(Pid::from_u32(pid)) {
        Some(process) => {
            println!("Stopping server process with PID: {}", pid);
            process.kill();
        }
        None => println!("Process with PID {} not found. It may have already stopped.", pid),
    }
    pid_file.remove()?;
    println!("Server stopped.");
    Ok(())
}

/// Reports whether the background server is running.
pub fn status() -> Result<()> {
    match PidFile::locate()?.running_pid()? {
        Some(pid) => println!("Server is running with PID: {}", pid),
        None => println!("Server is not running."),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_pid_file_reads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = PidFile::at(dir.path().join("server.pid"));
        assert_eq!(pid_file.read().unwrap(), None);
        assert_eq!(pid_file.running_pid().unwrap(), None);
    }

    #[test]
    fn pid_round_trips_and_removes() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = PidFile::at(dir.path().join("server.pid"));
        fs::write(pid_file.path(), "4242\n").unwrap();
        assert_eq!(pid_file.read().unwrap(), Some(4242));

        pid_file.remove().unwrap();
        assert!(!pid_file.path().exists());
        pid_file.remove().unwrap();
    }

    #[test]
    fn current_process_counts_as_running() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = PidFile::at(dir.path().join("server.pid"));
        pid_file.write(std::process::id()).unwrap();
        assert_eq!(pid_file.running_pid().unwrap(), Some(std::process::id()));
    }

    #[test]
    fn corrupt_pid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = PidFile::at(dir.path().join("server.pid"));
        fs::write(pid_file.path(), "not-a-pid").unwrap();
        assert!(pid_file.read().is_err());
    }

    #[test]
    fn log_lives_next_to_pid_file() {
        let pid_file = PidFile::at("/var/run/media-relay/server.pid");
        assert_eq!(pid_file.log_path(), PathBuf::from("/var/run/media-relay/server.log"));
    }
}
