use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub network_server: NetworkServerConfig,
    pub band: BandConfig,
    pub udp: UdpConfig,
    pub api: ApiConfig,
    pub join_server: JoinServerConfig,
    pub roaming: RoamingConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize)]
pub struct NetworkServerConfig {
    /// Our NetID, hex.
    pub net_id: String,
}

impl Default for NetworkServerConfig {
    fn default() -> Self {
        Self {
            net_id: "000000".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BandConfig {
    pub name: String,
}

impl Default for BandConfig {
    fn default() -> Self {
        Self {
            name: "EU868".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UdpConfig {
    pub bind: String,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:1680".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    /// Bind address of the inbound roaming API.
    pub bind: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8090".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct JoinServerConfig {
    pub default: Option<JoinServerDefault>,
    pub resolve_join_eui: Vec<ResolveJoinEui>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JoinServerDefault {
    pub server: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolveJoinEui {
    /// Exact JoinEUI ("0102030405060708") or prefix ("01020304/32").
    pub join_eui: String,
    pub server: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct RoamingConfig {
    pub servers: Vec<RoamingServer>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoamingServer {
    /// Peer NetID, hex, or "*" for the wildcard agreement.
    pub net_id: String,
    pub server: String,
    /// Defaults to our NetID.
    pub sender_id: Option<String>,
    /// Defaults to `net_id`.
    pub receiver_id: Option<String>,
    pub passive_roaming: bool,
    pub check_mic: bool,
    #[serde(default = "default_passive_roaming_lifetime")]
    pub passive_roaming_lifetime_secs: u64,
    #[serde(default, rename = "async")]
    pub async_interface: bool,
    pub kek_label: Option<String>,
    /// KEK, hex (16 bytes).
    pub kek_key: Option<String>,
}

fn default_passive_roaming_lifetime() -> u64 {
    // 24h upper bound unless the agreement says otherwise.
    86_400
}

#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config file {:?}: {}", path, e))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config file: {}", e))?;
        Ok(config)
    }
}
