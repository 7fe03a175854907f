use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "aircast-relay")]
#[command(about = "Signaling relay for aircast peers")]
pub struct Cli {
    /// Port to listen on (overrides AIRCAST_RELAY_PORT)
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Bind loopback only instead of all interfaces
    #[arg(long)]
    pub loopback: bool,
}
