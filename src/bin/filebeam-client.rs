//! filebeam command-script client.
//!
//! Usage: `filebeam-client <server_host> <server_port> [--commands commands.txt]`

use clap::Parser;
use filebeam::client::{Client, ClientOptions};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "filebeam-client")]
#[command(version = "0.1.0")]
#[command(about = "Replays GET/POST commands against a filebeam server", long_about = None)]
struct Args {
    /// Server host or IP address
    server_host: String,

    /// Server port
    #[arg(default_value_t = 8080)]
    server_port: u16,

    /// Command file, one `<command> <file_path> <host> <port>` per line
    #[arg(short, long, default_value = "commands.txt")]
    commands: PathBuf,

    /// Directory downloaded files are saved to
    #[arg(short, long, default_value = ".")]
    download_dir: PathBuf,

    /// Directory local upload paths are resolved against
    #[arg(short, long, default_value = ".")]
    upload_dir: PathBuf,

    /// Pause between commands in milliseconds
    #[arg(long, default_value_t = 500)]
    pause_ms: u64,

    /// Per-read response timeout in seconds
    #[arg(long, default_value_t = 30)]
    timeout_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let script = tokio::fs::read_to_string(&args.commands).await?;
    let options = ClientOptions {
        download_dir: args.download_dir,
        upload_dir: args.upload_dir,
        read_timeout: Duration::from_secs(args.timeout_secs),
        pause: Duration::from_millis(args.pause_ms),
    };

    let client = Client::connect(&args.server_host, args.server_port, options).await?;
    let report = client.run_script(&script, &args.server_host).await?;

    info!(
        executed = report.executed,
        skipped = report.skipped,
        failed = report.failed,
        "Script finished"
    );
    Ok(())
}
