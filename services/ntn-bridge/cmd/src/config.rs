//! Configuration handling for the NTN bridge service.
//!
//! The service reads its section of the shared testbed config file
//! (`services.ntn_bridge`) and applies `NTN_BRIDGE_*` environment overrides on top.

use anyhow::Result;
use bridge_failover::{FailoverConfig, FailoverThresholds};
use bridge_gateway::GatewaySpec;
use bridge_storage::StorageMode;
use bridge_topology::NodeType;
use bridge_wire::MeshRoutingProtocol;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Mesh node created at startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSeed {
    /// Node id
    pub id: String,
    /// Display name; the id when absent
    #[serde(default)]
    pub name: Option<String>,
    /// Node role
    #[serde(default = "default_node_type")]
    pub node_type: NodeType,
    /// Mesh-side address
    #[serde(default)]
    pub ip_address: Option<String>,
    /// Routing protocol
    #[serde(default = "default_protocol")]
    pub routing_protocol: MeshRoutingProtocol,
    /// Nodes to link to with default link metrics
    #[serde(default)]
    pub links: Vec<String>,
}

fn default_node_type() -> NodeType {
    NodeType::Relay
}

fn default_protocol() -> MeshRoutingProtocol {
    MeshRoutingProtocol::Aodv
}

/// Failover tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailoverSection {
    /// Per-node evaluation period
    #[serde(with = "humantime_duration")]
    pub monitoring_interval: Duration,
    /// Assessment window on satellite
    #[serde(with = "humantime_duration")]
    pub trigger_window: Duration,
    /// Assessment window on mesh
    #[serde(with = "humantime_duration")]
    pub recovery_window: Duration,
    /// Completed event retention
    #[serde(with = "humantime_duration")]
    pub event_retention: Duration,
    /// Bound on a single switch
    #[serde(with = "humantime_duration")]
    pub switch_timeout: Duration,
    /// Trigger and recovery thresholds
    pub thresholds: FailoverThresholds,
    /// Gateway tried first on mesh switches
    pub preferred_gateway: Option<String>,
}

impl Default for FailoverSection {
    fn default() -> Self {
        let defaults = FailoverConfig::default();
        Self {
            monitoring_interval: defaults.monitoring_interval,
            trigger_window: defaults.trigger_window,
            recovery_window: defaults.recovery_window,
            event_retention: defaults.event_retention,
            switch_timeout: defaults.switch_timeout,
            thresholds: defaults.thresholds,
            preferred_gateway: None,
        }
    }
}

impl FailoverSection {
    /// Controller configuration with these settings applied
    pub fn to_failover_config(&self) -> FailoverConfig {
        FailoverConfig {
            monitoring_interval: self.monitoring_interval,
            trigger_window: self.trigger_window,
            recovery_window: self.recovery_window,
            event_retention: self.event_retention,
            switch_timeout: self.switch_timeout,
            thresholds: self.thresholds,
            preferred_gateway: self.preferred_gateway.clone(),
            ..FailoverConfig::default()
        }
    }
}

/// NTN bridge service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Id of this bridge instance
    pub node_id: String,
    /// Default upstream user-plane address
    pub upstream_address: String,
    /// Default upstream user-plane port
    pub upstream_port: u16,
    /// Storage mode: memory, file
    pub storage_mode: String,
    /// Data directory for file storage
    pub storage_data_dir: PathBuf,
    /// Directory for attachment descriptors; kept in memory when absent
    pub attachment_dir: Option<PathBuf>,
    /// JSON file with per-node quality assessments
    pub quality_file: Option<PathBuf>,
    /// Gateway reachability probe timeout
    #[serde(with = "humantime_duration")]
    pub probe_timeout: Duration,
    /// Bridge monitor tick
    #[serde(with = "humantime_duration")]
    pub monitor_interval: Duration,
    /// Period of the service status log line
    #[serde(with = "humantime_duration")]
    pub status_interval: Duration,
    /// Mesh nodes to create
    pub mesh_nodes: Vec<NodeSeed>,
    /// Gateways to create and connect
    pub gateways: Vec<GatewaySpec>,
    /// Nodes to monitor for failover
    pub monitored_nodes: Vec<String>,
    /// Failover tuning
    pub failover: FailoverSection,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            node_id: "ntn-bridge".to_string(),
            upstream_address: "172.20.0.30".to_string(),
            upstream_port: 2152,
            storage_mode: "memory".to_string(),
            storage_data_dir: PathBuf::from("./bridgedata"),
            attachment_dir: None,
            quality_file: None,
            probe_timeout: Duration::from_millis(800),
            monitor_interval: Duration::from_secs(10),
            status_interval: Duration::from_secs(30),
            mesh_nodes: Vec::new(),
            gateways: Vec::new(),
            monitored_nodes: Vec::new(),
            failover: FailoverSection::default(),
        }
    }
}

/// Root configuration structure (matches the shared YAML file)
#[derive(Debug, Deserialize)]
struct RootConfig {
    services: Option<ServicesConfig>,
}

#[derive(Debug, Deserialize)]
struct ServicesConfig {
    ntn_bridge: Option<BridgeConfig>,
}

impl BridgeConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = Self::from_file(config_path.as_ref());
        config.apply_overrides(|key| std::env::var(key).ok());

        info!(
            "Final bridge configuration: node_id={}, upstream={}:{}, storage={}, gateways={}, nodes={}",
            config.node_id,
            config.upstream_address,
            config.upstream_port,
            config.storage_mode,
            config.gateways.len(),
            config.monitored_nodes.len()
        );
        Ok(config)
    }

    fn from_file(config_path: &Path) -> Self {
        let content = match std::fs::read_to_string(config_path) {
            Ok(content) => content,
            Err(_) => {
                warn!("Config file {:?} not found, using defaults", config_path);
                return Self::default();
            }
        };

        match serde_yaml::from_str::<RootConfig>(&content) {
            Ok(root) => {
                info!("Loaded configuration from {:?}", config_path);
                root.services
                    .and_then(|s| s.ntn_bridge)
                    .unwrap_or_default()
            }
            Err(e) => {
                warn!(
                    "Failed to parse config file {:?}: {}, using defaults",
                    config_path, e
                );
                Self::default()
            }
        }
    }

    /// Apply overrides from `lookup`, which maps variable names to values
    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(node_id) = lookup("NTN_BRIDGE_NODE_ID") {
            info!("Node ID overridden by environment: {}", node_id);
            self.node_id = node_id;
        }

        if let Some(address) = lookup("NTN_BRIDGE_UPSTREAM_ADDRESS") {
            info!("Upstream address overridden by environment: {}", address);
            self.upstream_address = address;
        }

        if let Some(dir) = lookup("NTN_BRIDGE_STORAGE_DIR") {
            info!("Storage directory overridden by environment: {}", dir);
            self.storage_data_dir = PathBuf::from(dir);
        }

        if let Some(dir) = lookup("NTN_BRIDGE_ATTACHMENT_DIR") {
            info!("Attachment directory overridden by environment: {}", dir);
            self.attachment_dir = Some(PathBuf::from(dir));
        }

        if let Some(file) = lookup("NTN_BRIDGE_QUALITY_FILE") {
            info!("Quality file overridden by environment: {}", file);
            self.quality_file = Some(PathBuf::from(file));
        }
    }

    /// Parsed storage mode
    pub fn storage(&self) -> Result<StorageMode> {
        match self.storage_mode.as_str() {
            "memory" => Ok(StorageMode::InMemory),
            "file" => Ok(StorageMode::File {
                data_dir: self.storage_data_dir.clone(),
            }),
            other => anyhow::bail!("Invalid storage mode: {}. Use 'memory' or 'file'", other),
        }
    }

    /// Configuration for running without the shared config file: one ground
    /// station gateway in front of the default upstream
    pub fn standalone() -> Self {
        let config = Self::default();
        let mut gateway = GatewaySpec::new(
            "standalone-gateway",
            config.upstream_address.clone(),
            config.upstream_port,
            "ground_station",
        );
        gateway.id = Some("gw_standalone".to_string());

        Self {
            mesh_nodes: vec![NodeSeed {
                id: "ground_station".to_string(),
                name: Some("Ground Station".to_string()),
                node_type: NodeType::GroundStation,
                ip_address: Some("10.0.0.1".to_string()),
                routing_protocol: MeshRoutingProtocol::Olsr,
                links: Vec::new(),
            }],
            gateways: vec![gateway],
            ..config
        }
    }
}

/// Durations written the humantime way ("800ms", "2m 30s")
mod humantime_duration {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(D::Error::custom)
    }
}
