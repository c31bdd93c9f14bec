use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

/// Server settings, read from `FERRY_*` environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: IpAddr,
    pub tcp_port: u16,
    pub udp_port: u16,
    pub share_dir: PathBuf,
    pub workers: usize,
    pub slots: usize,
    pub ack_timeout: Duration,
    /// Resends per chunk before a transfer fails. 0 = never give up.
    pub max_retries: u32,
    /// Address placed in download responses. Defaults to the local address
    /// of the control connection the request came in on.
    pub advertise_addr: Option<Ipv4Addr>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            tcp_port: 9000,
            udp_port: 9001,
            share_dir: PathBuf::from("./share"),
            workers: 10,
            slots: 20,
            ack_timeout: Duration::from_millis(2000),
            max_retries: 0,
            advertise_addr: None,
        }
    }
}

impl ServerConfig {
    /// Build from the environment. Call `dotenvy::dotenv()` first to pick up
    /// a `.env` file.
    pub fn from_env() -> anyhow::Result<Self> {
        let defaults = Self::default();
        let config = Self {
            host: env_or("FERRY_HOST", defaults.host)?,
            tcp_port: env_or("FERRY_TCP_PORT", defaults.tcp_port)?,
            udp_port: env_or("FERRY_UDP_PORT", defaults.udp_port)?,
            share_dir: std::env::var("FERRY_SHARE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.share_dir),
            workers: env_or("FERRY_WORKERS", defaults.workers)?,
            slots: env_or("FERRY_SLOTS", defaults.slots)?,
            ack_timeout: Duration::from_millis(env_or("FERRY_ACK_TIMEOUT_MS", 2000u64)?),
            max_retries: env_or("FERRY_MAX_RETRIES", defaults.max_retries)?,
            advertise_addr: match std::env::var("FERRY_ADVERTISE_ADDR") {
                Ok(v) => Some(v.parse().with_context(|| {
                    format!("FERRY_ADVERTISE_ADDR must be an IPv4 address, got {:?}", v)
                })?),
                Err(_) => None,
            },
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.workers > 0, "FERRY_WORKERS must be at least 1");
        anyhow::ensure!(self.slots > 0, "FERRY_SLOTS must be at least 1");
        anyhow::ensure!(!self.ack_timeout.is_zero(), "FERRY_ACK_TIMEOUT_MS must be positive");
        Ok(())
    }

    pub fn tcp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.tcp_port)
    }

    pub fn udp_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.udp_port)
    }
}

/// Parse `name` if set, else use `default`. A value that does not parse is
/// an error rather than a silent fallback.
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
