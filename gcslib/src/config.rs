//! Configuration loading for the protocol engine

use std::fs::File;
use std::io::BufReader;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use gcslibgs::{GcsError, GcsResult, PeerIdentity};
use serde::{Deserialize, Serialize};

/// Timeout and retry bound for one kind of request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// How long to wait for the peer before retransmitting
    pub timeout: Duration,
    /// Retransmissions after the first send
    pub max_retries: u32,
}

impl RetryPolicy {
    pub fn new(timeout: Duration, max_retries: u32) -> Self {
        Self {
            timeout,
            max_retries,
        }
    }

    /// Longest time a request can stay unresolved without peer progress
    pub fn worst_case(&self) -> Duration {
        self.timeout * (self.max_retries + 1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: constants::DEFAULT_TIMEOUT,
            max_retries: constants::DEFAULT_RETRIES,
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Identity this ground station sends with
    pub own_identity: PeerIdentity,
    /// Policy for COMMAND_LONG exchanges
    pub command: RetryPolicy,
    /// Policy for every wait inside a mission transfer
    pub mission: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            own_identity: PeerIdentity::new(constants::GCS_SYSTEM_ID, constants::GCS_COMPONENT_ID),
            command: RetryPolicy::default(),
            mission: RetryPolicy::default(),
        }
    }
}

/// JSON representation of the engine config
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfigJson {
    #[serde(default)]
    pub system_id: Option<u8>,
    #[serde(default)]
    pub component_id: Option<u8>,
    #[serde(default)]
    pub command_timeout_ms: Option<u64>,
    #[serde(default)]
    pub command_retries: Option<u32>,
    #[serde(default)]
    pub mission_timeout_ms: Option<u64>,
    #[serde(default)]
    pub mission_retries: Option<u32>,
}

impl EngineConfigJson {
    pub fn to_engine_config(&self) -> Result<EngineConfig, String> {
        let defaults = EngineConfig::default();
        let system_id = self.system_id.unwrap_or(defaults.own_identity.system_id);
        if system_id == 0 {
            return Err("System id 0 is reserved for broadcast".to_string());
        }

        Ok(EngineConfig {
            own_identity: PeerIdentity::new(
                system_id,
                self.component_id.unwrap_or(defaults.own_identity.component_id),
            ),
            command: policy_from_json(
                "command",
                self.command_timeout_ms,
                self.command_retries,
                defaults.command,
            )?,
            mission: policy_from_json(
                "mission",
                self.mission_timeout_ms,
                self.mission_retries,
                defaults.mission,
            )?,
        })
    }
}

fn policy_from_json(
    name: &str,
    timeout_ms: Option<u64>,
    retries: Option<u32>,
    default: RetryPolicy,
) -> Result<RetryPolicy, String> {
    let timeout = match timeout_ms {
        Some(0) => return Err(format!("{} timeout must be positive", name)),
        Some(ms) => Duration::from_millis(ms),
        None => default.timeout,
    };
    Ok(RetryPolicy::new(timeout, retries.unwrap_or(default.max_retries)))
}

/// Load engine configuration from a JSON file
pub fn load_config<P: AsRef<Path>>(path: P) -> GcsResult<EngineConfig> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let config_json: EngineConfigJson = serde_json::from_reader(reader)?;

    config_json.to_engine_config().map_err(GcsError::Config)
}

/// UDP link configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UdpLinkConfig {
    /// Address the ground station listens on
    pub local_addr: SocketAddr,
    /// Address of the vehicle
    pub remote_addr: SocketAddr,
}

impl UdpLinkConfig {
    pub fn new(local_addr: SocketAddr, remote_addr: SocketAddr) -> Self {
        Self {
            local_addr,
            remote_addr,
        }
    }

    pub fn parse(local_addr: &str, remote_addr: &str) -> GcsResult<Self> {
        let local_addr = local_addr
            .parse()
            .map_err(|e| GcsError::Config(format!("Invalid local address: {}", e)))?;
        let remote_addr = remote_addr
            .parse()
            .map_err(|e| GcsError::Config(format!("Invalid remote address: {}", e)))?;
        Ok(Self::new(local_addr, remote_addr))
    }
}

/// Configuration constants
pub mod constants {
    use std::time::Duration;

    /// Conventional system id of a ground station
    pub const GCS_SYSTEM_ID: u8 = 245;

    /// MAV_COMP_ID_MISSIONPLANNER
    pub const GCS_COMPONENT_ID: u8 = 190;

    /// Default wait for a response before retransmitting
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(500);

    /// Default number of retransmissions
    pub const DEFAULT_RETRIES: u32 = 3;

    /// IN_PROGRESS acks that may each restart a command's wait before it
    /// times out anyway
    pub const MAX_PROGRESS_EXTENSIONS: u32 = 20;

    /// Sleep between polls of the non-blocking UDP socket
    pub const UDP_POLL_INTERVAL: Duration = Duration::from_millis(2);

    /// Receive buffer for one datagram
    pub const UDP_BUFFER_SIZE: usize = 65535;

    /// Poll interval while waiting for the vehicle to appear
    pub const PEER_POLL_INTERVAL: Duration = Duration::from_millis(5);
}
