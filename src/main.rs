//! checkpointctl - monitoring checkpoint and registry CLI tool
//!
//! Reads and seeds per-instance checkpoints and inspects the watched-address
//! registry backing the watcher service.

use vigil::cli;

#[tokio::main]
async fn main() {
    if let Err(e) = cli::run().await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}
