use std::env;

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Bind loopback only instead of all interfaces.
    pub loopback: bool,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: env::var("AIRCAST_RELAY_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(3001),
            loopback: env::var("AIRCAST_RELAY_LOOPBACK")
                .map(|value| value == "1" || value.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        }
    }

    pub fn bind_addr(&self) -> String {
        let host = if self.loopback { "127.0.0.1" } else { "0.0.0.0" };
        format!("{}:{}", host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3001,
            loopback: false,
        }
    }
}
