//! bedweb server binary.
//!
//! Loads `bedweb.yaml`, binds the WebSocket listener (TLS when configured),
//! and runs the core event loop until SIGINT/SIGTERM.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use bedweb::{Config, Server};
use clap::Parser;
use mimalloc::MiMalloc;

/// mimalloc outperforms the system allocator under the frame-heavy
/// allocation pattern of PTY streaming.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "bedweb")]
#[command(version)]
#[command(about = "Single-host remote administration server over WebSocket")]
struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, default_value = bedweb::config::DEFAULT_CONFIG_FILE)]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();

    // Config problems are startup-fatal and reported on stderr, including
    // the YAML parser's line/column for malformed files.
    let config = match Config::load(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err:#}");
            return ExitCode::FAILURE;
        }
    };

    match serve(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn serve(config: Config) -> Result<()> {
    let server = Server::bind(&config).await?;
    server.run().await
}
