//! filebeam server entry point.

use filebeam::config::Config;
use filebeam::server::Server;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let workers = config.workers.unwrap_or_else(num_cpus);

    info!(
        host = %config.host,
        port = config.port,
        root = %config.root.display(),
        workers,
        backlog = config.backlog,
        "Starting filebeam server"
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(workers)
        .thread_name("filebeam-worker")
        .enable_all()
        .build()?;

    runtime.block_on(async {
        let server = Server::new(config);
        server.run().await
    })
    .map_err(|e| e as Box<dyn std::error::Error>)?;

    Ok(())
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
