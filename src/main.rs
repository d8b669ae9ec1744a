//! Post-op care chat assistant server
//!
//! Entry point: loads configuration and secrets, then serves the chat page.

use std::sync::Arc;

use dotenvy::dotenv;
use mimalloc::MiMalloc;
use postop_chat::config::{AppConfig, ConfigError, Secrets};
use postop_chat::{server, telemetry};

/// Global allocator for improved performance (M-MIMALLOC-APPS).
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

fn exit_on_config_error(err: ConfigError) -> ! {
    if let ConfigError::Cli(e) = err {
        e.exit();
    }
    tracing::error!(name: "config.invalid", error = %err, "Configuration error");
    eprintln!("Configuration error: {err}");
    std::process::exit(1);
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (if present)
    let _ = dotenv();

    telemetry::init();

    let config = AppConfig::load().unwrap_or_else(|e| exit_on_config_error(e));
    let secrets = Secrets::from_env().unwrap_or_else(|e| exit_on_config_error(e));

    server::start_server(Arc::new(config), secrets).await
}
