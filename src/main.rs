use std::{error::Error, path::PathBuf, sync::Arc};

use clap::Parser;
use cube_executor::{
    backend::memory::InMemoryBackend,
    collaborators::{
        memory::{InMemoryCapacityRegistry, InMemoryTaskStore},
        types::Capacity,
    },
    config::{config::init_tracing, types::ExecutorConfig},
    handler::types::TaskHandler,
    log_streamer::sink::TracingSink,
    worker::types::{TaskServer, Worker},
};
use tracing::info;

/// Local task executor backed by in-memory containers
#[derive(Parser, Debug)]
#[command(name = "cube-executor")]
#[command(version, about, long_about = None)]
struct Args {
    /// JSON config file; without one, defaults plus EXECUTOR_* variables are used
    #[arg(short, long, env = "EXECUTOR_CONFIG")]
    config: Option<PathBuf>,

    /// Address the task API listens on (overrides the config)
    #[arg(long)]
    listen_address: Option<String>,
}

const LOCAL_CAPACITY: Capacity = Capacity {
    memory_mb: 4096,
    disk_mb: 16384,
    containers: 64,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();
    init_tracing();

    let mut config = match &args.config {
        Some(path) => ExecutorConfig::from_json_file(path)?,
        None => ExecutorConfig::from_env()?,
    };
    if let Some(address) = args.listen_address {
        config.listen_address = address;
    }
    info!(executor = %config.executor_id, "starting executor");

    let handler = TaskHandler::new(
        &config,
        Arc::new(InMemoryBackend::new()),
        Arc::new(InMemoryCapacityRegistry::new(LOCAL_CAPACITY)),
        Arc::new(InMemoryTaskStore::new()),
        Arc::new(TracingSink),
    );
    let worker = Arc::new(Worker::new(handler));
    let server = TaskServer::new(worker.clone(), &config.listen_address);

    tokio::select! {
        served = server.start_server() => served?,
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
    }
    worker.shutdown().await;

    Ok(())
}
