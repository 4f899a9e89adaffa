//! In-memory topology registry mirrored into a durable document store.

use bridge_storage::{collections, Document, DocumentStore, Filter};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::model::{
    BridgeGateway, FlowDirection, GatewayStatus, LinkQuality, MeshNode, NodeStatus, QosClass,
    RouteEntry, TrafficFlow,
};
use crate::TopologyError;

/// Topology store configuration
#[derive(Debug, Clone)]
pub struct TopologyStoreConfig {
    /// Upper bound on any single durable-store call
    pub write_timeout: Duration,
}

impl Default for TopologyStoreConfig {
    fn default() -> Self {
        Self {
            write_timeout: Duration::from_secs(2),
        }
    }
}

/// Owned, point-in-time view of the topology
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologySnapshot {
    /// Nodes sorted by id
    pub nodes: Vec<MeshNode>,
    /// Gateways sorted by id
    pub gateways: Vec<BridgeGateway>,
    /// When the snapshot was taken
    pub taken_at: DateTime<Utc>,
}

impl TopologySnapshot {
    /// Look up a node by id
    pub fn node(&self, id: &str) -> Option<&MeshNode> {
        self.nodes
            .binary_search_by(|n| n.id.as_str().cmp(id))
            .ok()
            .map(|i| &self.nodes[i])
    }

    /// Active nodes in id order
    pub fn active_nodes(&self) -> impl Iterator<Item = &MeshNode> {
        self.nodes.iter().filter(|n| n.is_active())
    }
}

type FlowKey = (String, String, FlowDirection);

/// Registry of mesh nodes, bridge gateways and traffic flows
///
/// Entries are individually locked; readers see an eventually consistent view.
/// Every create or update is mirrored into the durable store with a bounded
/// timeout, and a failed mirror write is logged without failing the operation.
pub struct TopologyStore {
    nodes: DashMap<String, MeshNode>,
    gateways: DashMap<String, BridgeGateway>,
    flows: DashMap<FlowKey, TrafficFlow>,
    // serializes gateway inserts against node removal
    membership: Mutex<()>,
    durable: Arc<dyn DocumentStore>,
    config: TopologyStoreConfig,
}

impl TopologyStore {
    /// Create an empty store over a durable backend
    pub fn new(durable: Arc<dyn DocumentStore>, config: TopologyStoreConfig) -> Self {
        Self {
            nodes: DashMap::new(),
            gateways: DashMap::new(),
            flows: DashMap::new(),
            membership: Mutex::new(()),
            durable,
            config,
        }
    }

    /// Refill caches from the durable store. Gateways come back disconnected.
    pub async fn load_from_store(&self) -> Result<(usize, usize), TopologyError> {
        let node_docs = self.find_many(collections::MESH_NODES).await;
        let mut nodes = 0;
        for doc in node_docs {
            match serde_json::from_value::<MeshNode>(Value::Object(doc)) {
                Ok(node) => {
                    self.nodes.insert(node.id.clone(), node);
                    nodes += 1;
                }
                Err(e) => warn!("Skipping undecodable mesh node document: {}", e),
            }
        }

        let gateway_docs = self.find_many(collections::BRIDGE_GATEWAYS).await;
        let mut gateways = 0;
        for doc in gateway_docs {
            match serde_json::from_value::<BridgeGateway>(Value::Object(doc)) {
                Ok(mut gateway) => {
                    gateway.status = GatewayStatus::Disconnected;
                    gateway.last_heartbeat = None;
                    self.gateways.insert(gateway.id.clone(), gateway);
                    gateways += 1;
                }
                Err(e) => warn!("Skipping undecodable gateway document: {}", e),
            }
        }

        info!(
            "Topology refilled from durable store: {} nodes, {} gateways",
            nodes, gateways
        );
        Ok((nodes, gateways))
    }

    // ---- nodes ----

    /// Register (or re-register) a node
    pub async fn register_node(&self, mut node: MeshNode) -> MeshNode {
        let now = Utc::now();
        if let Some(existing) = self.nodes.get(&node.id) {
            node.created_at = existing.created_at;
        } else {
            node.created_at = now;
        }
        node.updated_at = now;
        node.last_seen = now;

        self.nodes.insert(node.id.clone(), node.clone());
        info!("Registered mesh node {} ({})", node.id, node.name);
        self.persist(collections::MESH_NODES, &node.id, &node).await;
        node
    }

    /// Cached node by id
    pub fn get_node(&self, node_id: &str) -> Option<MeshNode> {
        self.nodes.get(node_id).map(|n| n.clone())
    }

    /// Whether a node is cached
    pub fn contains_node(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }

    /// Cached node, falling back to the durable store
    pub async fn load_node(&self, node_id: &str) -> Result<MeshNode, TopologyError> {
        if let Some(node) = self.get_node(node_id) {
            return Ok(node);
        }

        let doc = self
            .find_one(collections::MESH_NODES, node_id)
            .await
            .ok_or_else(|| TopologyError::NodeNotFound(node_id.to_string()))?;
        let node: MeshNode = decode(doc)?;
        debug!("Loaded mesh node {} from durable store", node_id);
        self.nodes.insert(node.id.clone(), node.clone());
        Ok(node)
    }

    /// Mutate a node under its entry lock and mirror the result
    pub async fn update_node<F>(&self, node_id: &str, f: F) -> Result<MeshNode, TopologyError>
    where
        F: FnOnce(&mut MeshNode),
    {
        let updated = {
            let mut entry = self
                .nodes
                .get_mut(node_id)
                .ok_or_else(|| TopologyError::NodeNotFound(node_id.to_string()))?;
            f(entry.value_mut());
            entry.updated_at = Utc::now();
            entry.clone()
        };
        self.persist(collections::MESH_NODES, node_id, &updated).await;
        Ok(updated)
    }

    /// Remove a node unless a gateway still references it
    pub async fn remove_node(&self, node_id: &str) -> Result<MeshNode, TopologyError> {
        let node = {
            let _membership = self.membership.lock().await;
            let referencing = self
                .gateways
                .iter()
                .find(|g| g.mesh_node_id == node_id)
                .map(|g| g.id.clone());
            if let Some(gateway_id) = referencing {
                return Err(TopologyError::NodeReferenced {
                    node_id: node_id.to_string(),
                    gateway_id,
                });
            }

            let (_, node) = self
                .nodes
                .remove(node_id)
                .ok_or_else(|| TopologyError::NodeNotFound(node_id.to_string()))?;
            node
        };

        // Drop dangling links pointing at the removed node
        let now = Utc::now();
        let mut unlinked = Vec::new();
        for mut other in self.nodes.iter_mut() {
            if other.remove_neighbor(node_id) {
                other.updated_at = now;
                unlinked.push(other.value().clone());
            }
        }

        info!("Removed mesh node {}", node_id);
        self.forget(collections::MESH_NODES, node_id).await;
        for other in &unlinked {
            self.persist(collections::MESH_NODES, &other.id, other).await;
        }
        Ok(node)
    }

    /// Add or refresh the directed link `node_id -> neighbor_id`
    pub async fn update_neighbor(
        &self,
        node_id: &str,
        neighbor_id: &str,
        quality: LinkQuality,
    ) -> Result<(), TopologyError> {
        let now = Utc::now();
        self.update_node(node_id, |node| node.upsert_neighbor(neighbor_id, quality, now))
            .await?;
        Ok(())
    }

    /// Add the link in both directions with the same metrics
    pub async fn link_nodes(
        &self,
        a: &str,
        b: &str,
        quality: LinkQuality,
    ) -> Result<(), TopologyError> {
        if !self.contains_node(b) {
            return Err(TopologyError::NodeNotFound(b.to_string()));
        }
        self.update_neighbor(a, b, quality).await?;
        self.update_neighbor(b, a, quality).await
    }

    /// Mark a node as heard from at `now`, reactivating it if it had dropped out
    pub async fn touch_node(&self, node_id: &str, now: DateTime<Utc>) -> Result<(), TopologyError> {
        let reactivated = {
            let mut entry = self
                .nodes
                .get_mut(node_id)
                .ok_or_else(|| TopologyError::NodeNotFound(node_id.to_string()))?;
            entry.last_seen = now;
            if entry.status == NodeStatus::Disconnected {
                entry.status = NodeStatus::Active;
                entry.updated_at = now;
                Some(entry.clone())
            } else {
                None
            }
        };

        if let Some(node) = reactivated {
            info!("Mesh node {} reactivated", node_id);
            self.persist(collections::MESH_NODES, node_id, &node).await;
        }
        Ok(())
    }

    /// Install a route in the source node's routing table
    ///
    /// Routing tables are derived state and are not mirrored to durable storage.
    pub fn install_route(&self, source_id: &str, entry: RouteEntry) -> Result<(), TopologyError> {
        let mut node = self
            .nodes
            .get_mut(source_id)
            .ok_or_else(|| TopologyError::NodeNotFound(source_id.to_string()))?;
        node.install_route(entry);
        Ok(())
    }

    /// Move active nodes not heard from within `max_age` to disconnected
    pub async fn mark_stale_nodes(&self, max_age: Duration, now: DateTime<Utc>) -> Vec<String> {
        let max_age = chrono::Duration::from_std(max_age).unwrap_or_else(|_| chrono::Duration::days(36_500));
        let mut stale = Vec::new();

        for mut entry in self.nodes.iter_mut() {
            if entry.status == NodeStatus::Active && now - entry.last_seen > max_age {
                entry.status = NodeStatus::Disconnected;
                entry.updated_at = now;
                stale.push(entry.clone());
            }
        }

        for node in &stale {
            warn!(
                "Mesh node {} not seen since {}, marking disconnected",
                node.id, node.last_seen
            );
            self.persist(collections::MESH_NODES, &node.id, node).await;
        }
        stale.into_iter().map(|n| n.id).collect()
    }

    /// Number of cached nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    // ---- gateways ----

    /// Insert or replace a gateway
    pub async fn upsert_gateway(&self, mut gateway: BridgeGateway) -> BridgeGateway {
        gateway.updated_at = Utc::now();
        {
            let _membership = self.membership.lock().await;
            self.gateways.insert(gateway.id.clone(), gateway.clone());
        }
        self.persist(collections::BRIDGE_GATEWAYS, &gateway.id, &gateway)
            .await;
        gateway
    }

    /// Insert a gateway only while its mesh node is registered
    pub async fn attach_gateway(
        &self,
        mut gateway: BridgeGateway,
    ) -> Result<BridgeGateway, TopologyError> {
        gateway.updated_at = Utc::now();
        {
            let _membership = self.membership.lock().await;
            if !self.nodes.contains_key(&gateway.mesh_node_id) {
                return Err(TopologyError::NodeNotFound(gateway.mesh_node_id.clone()));
            }
            self.gateways.insert(gateway.id.clone(), gateway.clone());
        }
        self.persist(collections::BRIDGE_GATEWAYS, &gateway.id, &gateway)
            .await;
        Ok(gateway)
    }

    /// Cached gateway by id
    pub fn get_gateway(&self, gateway_id: &str) -> Option<BridgeGateway> {
        self.gateways.get(gateway_id).map(|g| g.clone())
    }

    /// Mutate a gateway under its entry lock; nothing is written if `f` fails
    pub async fn update_gateway<F>(
        &self,
        gateway_id: &str,
        f: F,
    ) -> Result<BridgeGateway, TopologyError>
    where
        F: FnOnce(&mut BridgeGateway) -> Result<(), TopologyError>,
    {
        let updated = {
            let mut entry = self
                .gateways
                .get_mut(gateway_id)
                .ok_or_else(|| TopologyError::GatewayNotFound(gateway_id.to_string()))?;
            let mut candidate = entry.clone();
            f(&mut candidate)?;
            candidate.updated_at = Utc::now();
            *entry = candidate.clone();
            candidate
        };
        self.persist(collections::BRIDGE_GATEWAYS, gateway_id, &updated)
            .await;
        Ok(updated)
    }

    /// Update a gateway in memory only (hot-path counters)
    pub fn update_gateway_volatile<F>(&self, gateway_id: &str, f: F) -> Result<(), TopologyError>
    where
        F: FnOnce(&mut BridgeGateway),
    {
        let mut entry = self
            .gateways
            .get_mut(gateway_id)
            .ok_or_else(|| TopologyError::GatewayNotFound(gateway_id.to_string()))?;
        f(entry.value_mut());
        Ok(())
    }

    /// Remove a gateway
    pub async fn remove_gateway(&self, gateway_id: &str) -> Option<BridgeGateway> {
        let removed = self.gateways.remove(gateway_id).map(|(_, g)| g);
        if removed.is_some() {
            self.forget(collections::BRIDGE_GATEWAYS, gateway_id).await;
        }
        removed
    }

    /// All gateways sorted by id
    pub fn list_gateways(&self) -> Vec<BridgeGateway> {
        let mut gateways: Vec<BridgeGateway> =
            self.gateways.iter().map(|g| g.value().clone()).collect();
        gateways.sort_by(|a, b| a.id.cmp(&b.id));
        gateways
    }

    // ---- flows ----

    /// Count a packet against the (gateway, peer, direction) flow
    pub fn record_flow(
        &self,
        gateway_id: &str,
        peer_node_id: &str,
        direction: FlowDirection,
        qos_class: QosClass,
        bytes: usize,
    ) -> TrafficFlow {
        let now = Utc::now();
        let key = (gateway_id.to_string(), peer_node_id.to_string(), direction);
        let mut flow = self.flows.entry(key).or_insert_with(|| TrafficFlow {
            id: Uuid::new_v4().to_string(),
            gateway_id: gateway_id.to_string(),
            peer_node_id: peer_node_id.to_string(),
            direction,
            qos_class,
            packets: 0,
            bytes: 0,
            first_seen: now,
            last_seen: now,
        });
        flow.qos_class = qos_class;
        flow.packets += 1;
        flow.bytes += bytes as u64;
        flow.last_seen = now;
        flow.clone()
    }

    /// All flows
    pub fn flows(&self) -> Vec<TrafficFlow> {
        self.flows.iter().map(|f| f.value().clone()).collect()
    }

    /// Drop flows that touch a node
    pub fn remove_flows_for_node(&self, node_id: &str) {
        self.flows.retain(|(_, peer, _), _| peer != node_id);
    }

    // ---- snapshot ----

    /// Owned, id-sorted copy of nodes and gateways
    pub fn snapshot(&self) -> TopologySnapshot {
        let mut nodes: Vec<MeshNode> = self.nodes.iter().map(|n| n.value().clone()).collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));

        TopologySnapshot {
            nodes,
            gateways: self.list_gateways(),
            taken_at: Utc::now(),
        }
    }

    // ---- durable mirror ----

    async fn persist<T: Serialize>(&self, collection: &str, id: &str, value: &T) {
        let doc = match serde_json::to_value(value) {
            Ok(Value::Object(doc)) => doc,
            Ok(_) => {
                warn!("Refusing to persist non-object value into {}", collection);
                return;
            }
            Err(e) => {
                warn!("Failed to serialize {} {}: {}", collection, id, e);
                return;
            }
        };

        let filter = Filter::eq("id", id);
        let write = self.durable.update_one(collection, &filter, doc, true);
        match tokio::time::timeout(self.config.write_timeout, write).await {
            Ok(Ok(_)) => debug!("Mirrored {} {}", collection, id),
            Ok(Err(e)) => warn!("Durable store write failed for {} {}: {}", collection, id, e),
            Err(_) => warn!("Durable store write timed out for {} {}", collection, id),
        }
    }

    async fn forget(&self, collection: &str, id: &str) {
        let filter = Filter::eq("id", id);
        let delete = self.durable.delete_one(collection, &filter);
        match tokio::time::timeout(self.config.write_timeout, delete).await {
            Ok(Ok(_)) => debug!("Deleted {} {} from durable store", collection, id),
            Ok(Err(e)) => warn!("Durable store delete failed for {} {}: {}", collection, id, e),
            Err(_) => warn!("Durable store delete timed out for {} {}", collection, id),
        }
    }

    async fn find_one(&self, collection: &str, id: &str) -> Option<Document> {
        let filter = Filter::eq("id", id);
        let find = self.durable.find_one(collection, &filter);
        match tokio::time::timeout(self.config.write_timeout, find).await {
            Ok(Ok(doc)) => doc,
            Ok(Err(e)) => {
                warn!("Durable store read failed for {} {}: {}", collection, id, e);
                None
            }
            Err(_) => {
                warn!("Durable store read timed out for {} {}", collection, id);
                None
            }
        }
    }

    async fn find_many(&self, collection: &str) -> Vec<Document> {
        let filter = Filter::all();
        let find = self.durable.find_many(collection, &filter);
        match tokio::time::timeout(self.config.write_timeout, find).await {
            Ok(Ok(docs)) => docs,
            Ok(Err(e)) => {
                warn!("Durable store read failed for {}: {}", collection, e);
                Vec::new()
            }
            Err(_) => {
                warn!("Durable store read timed out for {}", collection);
                Vec::new()
            }
        }
    }
}

fn decode<T: DeserializeOwned>(doc: Document) -> Result<T, TopologyError> {
    Ok(serde_json::from_value(Value::Object(doc))?)
}
