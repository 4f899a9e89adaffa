//! Attachment descriptors handed to the external UE configuration tooling.
//!
//! A descriptor is written for the satellite path when a node is registered and
//! again on every return to satellite; a mesh descriptor is written on every switch
//! to the mesh path and removed when the node leaves it.

use async_trait::async_trait;
use bridge_gateway::MeshAttachment;
use bridge_topology::QosClass;
use bridge_wire::MeshRoutingProtocol;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use tracing::debug;
use uuid::Uuid;

use crate::event::NetworkMode;
use crate::{validate_node_id, FailoverError};

/// Subscriber and radio-access defaults for satellite descriptors
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SatelliteProfile {
    /// Home network (MCC followed by MNC)
    pub plmn: String,
    /// Access point name
    pub apn: String,
    /// Slice/service type
    pub sst: u8,
    /// Slice differentiator
    pub sd: String,
    /// gNB the UE searches for
    pub gnb_address: String,
}

impl Default for SatelliteProfile {
    fn default() -> Self {
        Self {
            plmn: "99970".to_string(),
            apn: "internet".to_string(),
            sst: 1,
            sd: "000001".to_string(),
            gnb_address: "172.20.0.40".to_string(),
        }
    }
}

/// Network slice selector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snssai {
    /// Slice/service type
    pub sst: u8,
    /// Slice differentiator
    pub sd: String,
}

/// PDU session request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescriptor {
    /// Session type
    #[serde(rename = "type")]
    pub session_type: String,
    /// Access point name
    pub apn: String,
    /// Slice
    pub slice: Snssai,
}

/// Attachment through the satellite gNB
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SatelliteDescriptor {
    /// Node the descriptor is for
    pub node_id: String,
    /// Subscription permanent identifier
    pub supi: String,
    /// Mobile country code
    pub mcc: String,
    /// Mobile network code
    pub mnc: String,
    /// Access point name
    pub apn: String,
    /// Slices the UE may use
    pub allowed_nssai: Vec<Snssai>,
    /// gNBs to search
    pub gnb_search_list: Vec<String>,
    /// Sessions to establish
    pub sessions: Vec<SessionDescriptor>,
    /// Generation time
    pub generated_at: DateTime<Utc>,
}

impl SatelliteDescriptor {
    /// Build the descriptor for `node_id` from a profile
    pub fn new(node_id: &str, profile: &SatelliteProfile) -> Self {
        let mcc: String = profile.plmn.chars().take(3).collect();
        let mnc: String = profile.plmn.chars().skip(3).collect();
        let slice = Snssai {
            sst: profile.sst,
            sd: profile.sd.clone(),
        };

        Self {
            node_id: node_id.to_string(),
            supi: format!("imsi-{}{}", profile.plmn, msin_for(node_id)),
            mcc,
            mnc,
            apn: profile.apn.clone(),
            allowed_nssai: vec![slice.clone()],
            gnb_search_list: vec![profile.gnb_address.clone()],
            sessions: vec![SessionDescriptor {
                session_type: "IPv4".to_string(),
                apn: profile.apn.clone(),
                slice,
            }],
            generated_at: Utc::now(),
        }
    }
}

/// Ten-digit subscriber number derived from the node id
fn msin_for(node_id: &str) -> String {
    let mut hasher = DefaultHasher::new();
    node_id.hash(&mut hasher);
    format!("{:010}", hasher.finish() % 10_000_000_000)
}

/// Mesh radio section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshRadio {
    /// Mesh node id
    pub node_id: String,
    /// Node role
    pub node_type: String,
    /// Address assigned on the mesh
    pub ip_address: String,
    /// Carrier frequency
    pub frequency_mhz: f64,
    /// Transmit power
    pub power_dbm: f64,
}

/// Mesh routing section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshRouting {
    /// Routing protocol
    pub protocol: MeshRoutingProtocol,
    /// Hop limit
    pub max_hop_count: u8,
    /// Beacon period
    pub beacon_interval_ms: u32,
}

/// Per-class priorities the node should apply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshQos {
    /// Emergency traffic priority
    pub emergency_priority: u8,
    /// Command traffic priority
    pub command_priority: u8,
    /// Video traffic priority
    pub video_priority: u8,
    /// Bulk data priority
    pub data_priority: u8,
}

impl Default for MeshQos {
    fn default() -> Self {
        Self {
            emergency_priority: QosClass::Emergency.policy().priority,
            command_priority: QosClass::Command.policy().priority,
            video_priority: QosClass::Video.policy().priority,
            data_priority: QosClass::Data.policy().priority,
        }
    }
}

/// Tunnel toward the core
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeshTunnel {
    /// Tunnel id
    pub tunnel_id: String,
    /// Tunnel endpoint identifier
    pub teid: u32,
    /// Gateway serving the node
    pub gateway_id: String,
    /// Upstream endpoint
    pub upstream: String,
}

/// Attachment through the mesh and a bridge gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshDescriptor {
    /// Node the descriptor is for
    pub node_id: String,
    /// Radio section
    pub mesh: MeshRadio,
    /// Routing section
    pub routing: MeshRouting,
    /// QoS section
    pub qos: MeshQos,
    /// Tunnel section
    pub tunnel: MeshTunnel,
    /// Generation time
    pub generated_at: DateTime<Utc>,
}

/// Default mesh hop limit
pub const MAX_HOP_COUNT: u8 = 5;
/// Default mesh beacon period
pub const BEACON_INTERVAL_MS: u32 = 1000;

impl MeshDescriptor {
    /// Build the descriptor from a completed mesh attachment
    pub fn new(attachment: &MeshAttachment) -> Self {
        Self {
            node_id: attachment.node_id.clone(),
            mesh: MeshRadio {
                node_id: attachment.mesh_node_id.clone(),
                node_type: "mobile_unit".to_string(),
                ip_address: attachment.ue_address.clone(),
                frequency_mhz: attachment.radio.frequency_mhz,
                power_dbm: attachment.radio.transmit_power_dbm,
            },
            routing: MeshRouting {
                protocol: attachment.routing_protocol,
                max_hop_count: MAX_HOP_COUNT,
                beacon_interval_ms: BEACON_INTERVAL_MS,
            },
            qos: MeshQos::default(),
            tunnel: MeshTunnel {
                tunnel_id: attachment.tunnel_id.clone(),
                teid: attachment.teid,
                gateway_id: attachment.gateway_id.clone(),
                upstream: format!(
                    "{}:{}",
                    attachment.upstream_address, attachment.upstream_port
                ),
            },
            generated_at: Utc::now(),
        }
    }
}

/// A descriptor for either path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AttachmentDescriptor {
    /// Satellite path
    Satellite(SatelliteDescriptor),
    /// Mesh path
    Mesh(MeshDescriptor),
}

impl AttachmentDescriptor {
    /// Mode the descriptor attaches through
    pub fn mode(&self) -> NetworkMode {
        match self {
            AttachmentDescriptor::Satellite(_) => NetworkMode::SatelliteNtn,
            AttachmentDescriptor::Mesh(_) => NetworkMode::MeshBackup,
        }
    }

    /// Node the descriptor is for
    pub fn node_id(&self) -> &str {
        match self {
            AttachmentDescriptor::Satellite(d) => &d.node_id,
            AttachmentDescriptor::Mesh(d) => &d.node_id,
        }
    }

    /// YAML rendering of the inner descriptor
    pub fn to_yaml(&self) -> Result<String, FailoverError> {
        let yaml = match self {
            AttachmentDescriptor::Satellite(d) => serde_yaml::to_string(d)?,
            AttachmentDescriptor::Mesh(d) => serde_yaml::to_string(d)?,
        };
        Ok(yaml)
    }
}

/// Destination for attachment descriptors
#[async_trait]
pub trait AttachmentSink: Send + Sync {
    /// Write (or overwrite) the descriptor for its node and mode
    async fn write(&self, descriptor: &AttachmentDescriptor) -> Result<(), FailoverError>;

    /// Remove the descriptor for a node and mode; missing is not an error
    async fn remove(&self, node_id: &str, mode: NetworkMode) -> Result<(), FailoverError>;
}

/// Descriptors held in memory
#[derive(Debug, Default)]
pub struct MemoryAttachmentSink {
    descriptors: DashMap<(String, NetworkMode), AttachmentDescriptor>,
}

impl MemoryAttachmentSink {
    /// Empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Descriptor for a node and mode
    pub fn get(&self, node_id: &str, mode: NetworkMode) -> Option<AttachmentDescriptor> {
        self.descriptors
            .get(&(node_id.to_string(), mode))
            .map(|d| d.clone())
    }

    /// Number of stored descriptors
    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    /// Whether the sink is empty
    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}

#[async_trait]
impl AttachmentSink for MemoryAttachmentSink {
    async fn write(&self, descriptor: &AttachmentDescriptor) -> Result<(), FailoverError> {
        self.descriptors.insert(
            (descriptor.node_id().to_string(), descriptor.mode()),
            descriptor.clone(),
        );
        Ok(())
    }

    async fn remove(&self, node_id: &str, mode: NetworkMode) -> Result<(), FailoverError> {
        self.descriptors.remove(&(node_id.to_string(), mode));
        Ok(())
    }
}

/// Descriptors written as YAML files in one directory.
///
/// Satellite descriptors go to `ue_<node>.yaml`, mesh descriptors to
/// `ue_mesh_<node>.yaml`. Files are replaced atomically.
#[derive(Debug, Clone)]
pub struct FileAttachmentSink {
    dir: PathBuf,
}

impl FileAttachmentSink {
    /// Sink writing into `dir`, created if missing
    pub async fn new(dir: impl Into<PathBuf>) -> Result<Self, FailoverError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    /// Output directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding the descriptor for a node and mode
    pub fn path_for(&self, node_id: &str, mode: NetworkMode) -> Result<PathBuf, FailoverError> {
        validate_node_id(node_id)?;
        let name = match mode {
            NetworkMode::SatelliteNtn => format!("ue_{}.yaml", node_id),
            NetworkMode::MeshBackup => format!("ue_mesh_{}.yaml", node_id),
            other => return Err(FailoverError::UnsupportedMode(other)),
        };
        Ok(self.dir.join(name))
    }
}

#[async_trait]
impl AttachmentSink for FileAttachmentSink {
    async fn write(&self, descriptor: &AttachmentDescriptor) -> Result<(), FailoverError> {
        let path = self.path_for(descriptor.node_id(), descriptor.mode())?;
        let header = format!(
            "# {} attachment for {}\n",
            descriptor.mode(),
            descriptor.node_id()
        );
        let body = header + &descriptor.to_yaml()?;

        let tmp = self
            .dir
            .join(format!(".{}.{}.tmp", descriptor.node_id(), Uuid::new_v4()));
        tokio::fs::write(&tmp, body).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        debug!("Wrote attachment descriptor {}", path.display());
        Ok(())
    }

    async fn remove(&self, node_id: &str, mode: NetworkMode) -> Result<(), FailoverError> {
        let path = self.path_for(node_id, mode)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Removed attachment descriptor {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
