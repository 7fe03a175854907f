use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use aircast::config::{Config, DEFAULT_RELAY_URL};
use aircast::controller::{ControllerConfig, ControllerEvent, NegotiationController, Role};
use aircast::engine::WebRtcEngineFactory;
use aircast::media::{MediaCapture, ToneCapture};
use aircast::relay::RelayClient;

#[derive(Parser)]
#[command(name = "aircast", about = "Point-to-point audio streaming over WebRTC")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Stream local audio to a listening peer
    Send {
        /// Relay WebSocket URL
        #[arg(long, env = "AIRCAST_RELAY_URL", default_value = DEFAULT_RELAY_URL)]
        relay: String,
        /// Identifier to register under
        #[arg(long, default_value = "sender")]
        id: String,
        /// Identifier of the listening peer
        #[arg(long, default_value = "receiver")]
        peer: String,
        /// Audio source to capture (see `devices`)
        #[arg(long)]
        source: Option<String>,
    },
    /// Wait for a sending peer and receive its audio
    Listen {
        /// Relay WebSocket URL
        #[arg(long, env = "AIRCAST_RELAY_URL", default_value = DEFAULT_RELAY_URL)]
        relay: String,
        /// Identifier to register under
        #[arg(long, default_value = "receiver")]
        id: String,
        /// Identifier of the sending peer
        #[arg(long, default_value = "sender")]
        peer: String,
    },
    /// List available audio sources
    Devices,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = Config::from_env();

    match cli.command {
        Command::Send {
            relay,
            id,
            peer,
            source,
        } => run_peer(Role::Sender, relay, id, peer, source, config).await,
        Command::Listen { relay, id, peer } => {
            run_peer(Role::Listener, relay, id, peer, None, config).await
        }
        Command::Devices => {
            let capture = ToneCapture::new();
            for source in capture.enumerate() {
                println!("{}\t{}", source.id, source.label);
            }
            Ok(())
        }
    }
}

async fn run_peer(
    role: Role,
    relay_url: String,
    id: String,
    peer: String,
    source: Option<String>,
    config: Config,
) -> anyhow::Result<()> {
    let relay = RelayClient::new(relay_url.clone());
    let factory = Arc::new(WebRtcEngineFactory::new(config.stun_servers.clone()));
    let capture = Arc::new(ToneCapture::new());

    let controller = NegotiationController::new(
        relay.clone(),
        factory,
        capture,
        ControllerConfig {
            local_id: id,
            peer_id: peer,
            answer_timeout: config.answer_timeout,
        },
    );

    tokio::time::timeout(Duration::from_secs(10), relay.wait_open())
        .await
        .map_err(|_| anyhow::anyhow!("relay {relay_url} did not open in time"))?;
    info!(url = %relay_url, "connected to relay");

    controller
        .choose_role(role)
        .await
        .context("failed to initialize negotiation")?;

    if role == Role::Sender {
        controller
            .start_streaming(source.as_deref())
            .await
            .context("failed to start streaming")?;
        info!("offer sent, waiting for answer");
    } else {
        info!("registered, waiting for offer");
    }

    if let Some(mut events) = controller.take_events().await {
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                match event {
                    ControllerEvent::PhaseChanged(phase) => info!(?phase, "phase changed"),
                    ControllerEvent::RemoteTrack { id } => {
                        info!(track = %id, "receiving remote audio")
                    }
                    ControllerEvent::NegotiationTimedOut => {
                        error!("negotiation timed out; is the other peer running?")
                    }
                }
            }
        });
    }

    let runner = tokio::spawn(Arc::clone(&controller).run());

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutting down");
    controller.shutdown().await;
    runner.abort();
    Ok(())
}
