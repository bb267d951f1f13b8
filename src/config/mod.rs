//! Configuration module - environment variable parsing

use std::env;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Which process this is
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    Directory,
    Peer,
}

impl FromStr for Role {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "directory" | "server" => Ok(Role::Directory),
            "peer" | "client" => Ok(Role::Peer),
            _ => Err(ConfigError::Invalid("NODE_ROLE")),
        }
    }
}

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    pub role: Role,
    /// Binding address (directory HTTP, or peer RPC)
    pub listen_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    pub timing: TimingConfig,
    pub directory: DirectoryConfig,
    /// Present only for the peer role
    pub peer: Option<PeerConfig>,
}

/// Timeouts and worker periods shared by both roles
#[derive(Clone, Debug)]
pub struct TimingConfig {
    /// General RPC call timeout
    pub rpc_timeout: Duration,
    /// Heartbeat / ping timeout
    pub liveness_timeout: Duration,
    pub heartbeat_interval: Duration,
    /// Consecutive failed heartbeats before a peer is declared disconnected
    pub max_missed_heartbeats: u32,
    /// Silence after which the passive monitor declares a peer disconnected
    pub passive_timeout: Duration,
    pub recovery_interval: Duration,
    pub discovery_interval: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            rpc_timeout: Duration::from_secs(20),
            liveness_timeout: Duration::from_secs(2),
            heartbeat_interval: Duration::from_secs(1),
            max_missed_heartbeats: 2,
            passive_timeout: Duration::from_secs(5),
            recovery_interval: Duration::from_secs(2),
            discovery_interval: Duration::from_secs(1),
        }
    }
}

/// Directory-side session settings
#[derive(Clone, Debug)]
pub struct DirectoryConfig {
    pub min_peer_connections: u8,
    /// Target number of online holders per stats record
    pub replication_factor: usize,
    /// Run a clock-sync round after every (re)connect
    pub sync_on_connect: bool,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            min_peer_connections: 2,
            replication_factor: 3,
            sync_on_connect: true,
        }
    }
}

/// Peer-side settings
#[derive(Clone, Debug)]
pub struct PeerConfig {
    pub directory_url: String,
    pub display_name: String,
    /// RPC address other processes dial
    pub advertise_addr: String,
    /// Primary address for update datagrams
    pub datagram_addr: SocketAddr,
    pub stats_dir: PathBuf,
    /// Directory holding `<display_name>.ID`
    pub id_dir: PathBuf,
    /// Initial hop budget of flooded failure notices
    pub gossip_ttl: u32,
    /// Staleness fence relative to now (negative)
    pub update_time_delta: chrono::Duration,
    /// Inbound updates per second accepted from one sender
    pub update_rate_limit: u32,
    pub bot: bool,
}

impl PeerConfig {
    /// Settings for a peer named `display_name` with everything else defaulted
    pub fn with_name(display_name: &str) -> Self {
        Self {
            directory_url: "http://127.0.0.1:8080".to_string(),
            display_name: display_name.to_string(),
            advertise_addr: "127.0.0.1:9000".to_string(),
            datagram_addr: SocketAddr::from(([127, 0, 0, 1], 9001)),
            stats_dir: PathBuf::from(format!("{}-stats-directory", display_name)),
            id_dir: PathBuf::from("."),
            gossip_ttl: 3,
            update_time_delta: chrono::Duration::milliseconds(-300),
            update_rate_limit: 60,
            bot: false,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let role: Role = env_or("NODE_ROLE", Role::Peer)?;

        let listen_addr: SocketAddr = env::var("LISTEN_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidAddress)?;

        let timing = TimingConfig {
            rpc_timeout: env_millis("RPC_TIMEOUT_MS", 20_000)?,
            liveness_timeout: env_millis("LIVENESS_TIMEOUT_MS", 2_000)?,
            heartbeat_interval: env_millis("HEARTBEAT_INTERVAL_MS", 1_000)?,
            max_missed_heartbeats: env_or("MAX_MISSED_HEARTBEATS", 2)?,
            passive_timeout: env_millis("PASSIVE_TIMEOUT_MS", 5_000)?,
            recovery_interval: env_millis("RECOVERY_INTERVAL_MS", 2_000)?,
            discovery_interval: env_millis("DISCOVERY_INTERVAL_MS", 1_000)?,
        };

        let directory = DirectoryConfig {
            min_peer_connections: env_or("MIN_PEER_CONNECTIONS", 2)?,
            replication_factor: env_or("REPLICATION_FACTOR", 3)?,
            sync_on_connect: true,
        };
        if directory.replication_factor == 0 {
            return Err(ConfigError::Invalid("REPLICATION_FACTOR"));
        }

        let peer = match role {
            Role::Directory => None,
            Role::Peer => Some(peer_from_env(listen_addr)?),
        };

        Ok(Self {
            role,
            listen_addr,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            timing,
            directory,
            peer,
        })
    }
}

fn peer_from_env(listen_addr: SocketAddr) -> Result<PeerConfig, ConfigError> {
    let display_name =
        env::var("DISPLAY_NAME").map_err(|_| ConfigError::Missing("DISPLAY_NAME"))?;
    if display_name.trim().is_empty() {
        return Err(ConfigError::Invalid("DISPLAY_NAME"));
    }

    let advertise_addr = env::var("ADVERTISE_ADDR").unwrap_or_else(|_| listen_addr.to_string());
    check_advertise_addr(&advertise_addr)?;

    // The datagram socket sits next to the RPC port unless told otherwise
    let datagram_addr = match env::var("DATAGRAM_ADDR") {
        Ok(addr) => addr.parse().map_err(|_| ConfigError::InvalidAddress)?,
        Err(_) => SocketAddr::new(listen_addr.ip(), listen_addr.port().wrapping_add(1)),
    };

    let update_time_delta_ms: i64 = env_or("UPDATE_TIME_DELTA_MS", -300)?;
    if update_time_delta_ms > 0 {
        return Err(ConfigError::Invalid("UPDATE_TIME_DELTA_MS"));
    }

    Ok(PeerConfig {
        directory_url: env::var("DIRECTORY_URL")
            .map_err(|_| ConfigError::Missing("DIRECTORY_URL"))?,
        stats_dir: env::var("STATS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(format!("{}-stats-directory", display_name))),
        id_dir: env::var("ID_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(".")),
        gossip_ttl: env_or("GOSSIP_TTL", 3)?,
        update_time_delta: chrono::Duration::milliseconds(update_time_delta_ms),
        update_rate_limit: env_or("UPDATE_RATE_LIMIT", 60)?,
        bot: env_or("BOT", false)?,
        display_name,
        advertise_addr,
        datagram_addr,
    })
}

/// Other processes dial the advertised address, so a wildcard host is useless
fn check_advertise_addr(advertise_addr: &str) -> Result<(), ConfigError> {
    let authority = advertise_addr
        .trim_start_matches("http://")
        .trim_start_matches("https://");
    let host = authority
        .rsplit_once(':')
        .map(|(host, _)| host)
        .unwrap_or(authority)
        .trim_start_matches('[')
        .trim_end_matches(']');

    match host.parse::<IpAddr>() {
        Ok(ip) if ip.is_unspecified() => Err(ConfigError::Invalid("ADVERTISE_ADDR")),
        _ => Ok(()),
    }
}

/// Parse an optional variable, falling back to `default` when unset
fn env_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

fn env_millis(name: &'static str, default_ms: u64) -> Result<Duration, ConfigError> {
    env_or(name, default_ms).map(Duration::from_millis)
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid address format")]
    InvalidAddress,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcard_advertise_addresses_are_rejected() {
        assert!(matches!(
            check_advertise_addr("0.0.0.0:8080"),
            Err(ConfigError::Invalid("ADVERTISE_ADDR"))
        ));
        assert!(check_advertise_addr("[::]:8080").is_err());
        assert!(check_advertise_addr("http://0.0.0.0:8080").is_err());

        assert!(check_advertise_addr("10.0.0.5:8080").is_ok());
        assert!(check_advertise_addr("http://peer-a.local:8080").is_ok());
        assert!(check_advertise_addr("[::1]:8080").is_ok());
    }

    #[test]
    fn parses_roles() {
        assert_eq!("directory".parse::<Role>().unwrap(), Role::Directory);
        assert_eq!(" Peer ".parse::<Role>().unwrap(), Role::Peer);
        assert!("observer".parse::<Role>().is_err());
    }

    #[test]
    fn defaults_match_session_constants() {
        let timing = TimingConfig::default();
        assert_eq!(timing.rpc_timeout, Duration::from_secs(20));
        assert_eq!(timing.liveness_timeout, Duration::from_secs(2));

        let directory = DirectoryConfig::default();
        assert_eq!(directory.replication_factor, 3);

        let peer = PeerConfig::with_name("alice");
        assert_eq!(peer.stats_dir, PathBuf::from("alice-stats-directory"));
        assert!(peer.update_time_delta < chrono::Duration::zero());
    }
}
