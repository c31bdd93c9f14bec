use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

/// Client settings, read from `FERRY_*` environment variables.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server control endpoint.
    pub server: SocketAddr,
    /// Local datagram bind. Port 0 gives every download its own ephemeral port.
    pub client_addr: SocketAddr,
    pub download_dir: PathBuf,
    /// Abandon a download after this long without a datagram. `None` waits
    /// forever.
    pub idle_timeout: Option<Duration>,
    /// How long a finished download keeps answering resent chunks.
    pub linger: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: SocketAddr::from(([127, 0, 0, 1], 9000)),
            client_addr: SocketAddr::from(([0, 0, 0, 0], 0)),
            download_dir: PathBuf::from("./downloads"),
            idle_timeout: None,
            linger: Duration::from_millis(2500),
        }
    }
}

impl ClientConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        let idle_ms: u64 = env_or("FERRY_IDLE_TIMEOUT_MS", 0)?;
        Ok(Self {
            server: env_or("FERRY_SERVER", defaults.server)?,
            client_addr: env_or("FERRY_CLIENT_ADDR", defaults.client_addr)?,
            download_dir: std::env::var("FERRY_DOWNLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.download_dir),
            idle_timeout: (idle_ms > 0).then(|| Duration::from_millis(idle_ms)),
            linger: Duration::from_millis(env_or(
                "FERRY_LINGER_MS",
                defaults.linger.as_millis() as u64,
            )?),
        })
    }
}

fn env_or<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(v) => v
            .trim()
            .parse()
            .with_context(|| format!("invalid {}: {:?}", name, v)),
        Err(_) => Ok(default),
    }
}
