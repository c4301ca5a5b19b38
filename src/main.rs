//! Pandoc Server - Entry point
//!
//! Accepts conversion jobs over HTTP and runs pandoc on them.

use clap::Parser;
use pandoc_server::{run_server, ServerConfig};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Pandoc Server
#[derive(Parser, Debug)]
#[command(name = "pandoc-server", version, about)]
struct Cli {
    /// Host to listen on
    #[arg(short = 'H', long, env = "PANDOC_SERVER_HOST", default_value = "0.0.0.0")]
    host: String,

    /// Port to listen on
    #[arg(short, long, env = "PANDOC_SERVER_PORT", default_value_t = 8080)]
    port: u16,

    /// If set, a Bearer token to check for
    #[arg(short, long, env = "PANDOC_SERVER_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Conversion tool to run
    #[arg(long = "pandoc", env = "PANDOC_SERVER_PANDOC", default_value = "pandoc")]
    program: PathBuf,

    /// Directory for per-request sandboxes (default: system temp dir)
    #[arg(long, env = "PANDOC_SERVER_WORK_DIR")]
    work_dir: Option<PathBuf>,

    /// Timeout for each remote file download
    #[arg(long, default_value_t = 60)]
    fetch_timeout_secs: u64,

    /// Kill the conversion tool after this many seconds
    #[arg(long)]
    conversion_timeout_secs: Option<u64>,

    /// Maximum request body size in bytes
    #[arg(long, default_value_t = 256 * 1024 * 1024)]
    max_body_bytes: usize,

    /// Maximum size of each remote file in bytes
    #[arg(long, default_value_t = 100 * 1024 * 1024)]
    max_download_bytes: u64,

    /// Refuse remote files on loopback, private or link-local addresses
    #[arg(long)]
    block_private_urls: bool,
}

impl From<Cli> for ServerConfig {
    fn from(cli: Cli) -> Self {
        Self {
            host: cli.host,
            port: cli.port,
            token: cli.token,
            program: cli.program,
            work_dir: cli.work_dir,
            fetch_timeout: Duration::from_secs(cli.fetch_timeout_secs),
            conversion_timeout: cli.conversion_timeout_secs.map(Duration::from_secs),
            max_body_bytes: cli.max_body_bytes,
            max_download_bytes: cli.max_download_bytes,
            allow_private_urls: !cli.block_private_urls,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pandoc_server=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = ServerConfig::from(cli);
    tracing::debug!(?config, "Loaded configuration");

    run_server(config).await
}
