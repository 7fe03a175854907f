//! Environment-derived defaults; CLI flags override these.

use std::time::Duration;

pub const DEFAULT_RELAY_URL: &str = "ws://127.0.0.1:3001/ws";

const DEFAULT_STUN_SERVERS: &[&str] = &[
    "stun:stun.l.google.com:19302",
    "stun:stun.cloudflare.com:3478",
];

const DEFAULT_ANSWER_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct Config {
    pub relay_url: String,
    pub stun_servers: Vec<String>,
    pub answer_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        let relay_url = std::env::var("AIRCAST_RELAY_URL")
            .unwrap_or_else(|_| DEFAULT_RELAY_URL.to_string());

        let stun_servers = std::env::var("AIRCAST_STUN_SERVERS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .ok()
            .filter(|list| !list.is_empty())
            .unwrap_or_else(|| DEFAULT_STUN_SERVERS.iter().map(|s| s.to_string()).collect());

        let answer_timeout = std::env::var("AIRCAST_ANSWER_TIMEOUT")
            .ok()
            .and_then(|raw| raw.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_ANSWER_TIMEOUT_SECS));

        Self {
            relay_url,
            stun_servers,
            answer_timeout,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.to_string(),
            stun_servers: DEFAULT_STUN_SERVERS.iter().map(|s| s.to_string()).collect(),
            answer_timeout: Duration::from_secs(DEFAULT_ANSWER_TIMEOUT_SECS),
        }
    }
}
