//! CLI for PubSub
//!
//! Runs the broker behind a WebSocket listener. Settings come from
//! `config/default.*`, `PUBSUB_*` environment variables and `.env`; the flags
//! below override them.

use std::process::ExitCode;

use clap::Parser;
use pubsub::config::{Settings, load_config};
use pubsub::transport::serve;
use pubsub::utils::logging;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "pubsub", about = "In-memory publish/subscribe broker over WebSocket")]
struct Cli {
    /// Port to listen on
    port: Option<u16>,

    /// Interface to bind
    #[arg(long)]
    host: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn apply(self, settings: &mut Settings) {
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(host) = self.host {
            settings.server.host = host;
        }
        if let Some(level) = self.log_level {
            settings.logging.level = level;
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let mut settings = match load_config() {
        Ok(settings) => settings,
        Err(e) => {
            logging::init("info");
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };
    cli.apply(&mut settings);
    logging::init(&settings.logging.level);

    info!("running PubSub on {}", settings.addr());
    if let Err(e) = serve(settings).await {
        error!("Server failed: {e}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
