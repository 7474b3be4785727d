use clap::{Parser, Subcommand};
use media_relay::service;

// --- Command-Line Argument Parsing ---
#[derive(Parser, Debug)]
#[command(author, version, about = "Streams yt-dlp downloads over HTTP with live progress.", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Manages the server process.
    Server {
        #[command(subcommand)]
        action: ServerAction,
    },
}

#[derive(Subcommand, Debug)]
enum ServerAction {
    /// Start the server as a background process.
    Start,
    /// Stop the background server process.
    Stop,
    /// Restart the background server process.
    Restart,
    /// Run the server in the foreground.
    Run,
    /// Check the status of the background server process.
    Status,
}

// No runtime is created here: `start` may fork, which must happen before any
// runtime threads exist.
fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Server { action } => match action {
            ServerAction::Start => service::start()?,
            ServerAction::Stop => service::stop()?,
            ServerAction::Restart => {
                service::stop()?;
                std::thread::sleep(std::time::Duration::from_secs(1));
                service::start()?;
            }
            ServerAction::Run => service::run_foreground()?,
            ServerAction::Status => service::status()?,
        },
    }

    Ok(())
}
