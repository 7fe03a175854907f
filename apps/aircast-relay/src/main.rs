mod cli;

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

use aircast_relay::{config::Config, registry::Registry, router};
use cli::Cli;

#[tokio::main]
async fn main() {
    // Default to INFO if RUST_LOG is not set
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(port) = cli.port {
        config.port = port;
    }
    if cli.loopback {
        config.loopback = true;
    }

    // The registry lives exactly as long as the server.
    let registry = Arc::new(Registry::new());
    let app = router(registry);

    let addr = config.bind_addr();
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    info!("aircast relay listening on ws://{}/ws", addr);

    if let Err(e) = axum::serve(listener, app).await {
        error!("server error: {}", e);
        std::process::exit(1);
    }
}
