//! Per-node failover state machine and its background tasks.

use bridge_gateway::{GatewayManager, MeshAttachRequest, MeshAttachment};
use bridge_storage::{collections, DocumentStore};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::attachment::{
    AttachmentDescriptor, AttachmentSink, MeshDescriptor, SatelliteDescriptor, SatelliteProfile,
};
use crate::event::{FailoverEvent, NetworkMode, TriggerReason};
use crate::policy::FailoverThresholds;
use crate::quality::{ConnectionQualityAssessor, QualityAssessment};
use crate::stats::FailoverStats;
use crate::{validate_node_id, FailoverError};

/// Failover controller configuration
#[derive(Debug, Clone)]
pub struct FailoverConfig {
    /// Per-node evaluation period
    pub monitoring_interval: Duration,
    /// Period of the global maintenance task
    pub maintenance_interval: Duration,
    /// Assessment window used while on satellite
    pub trigger_window: Duration,
    /// Assessment window used while on mesh
    pub recovery_window: Duration,
    /// How long completed events stay in memory
    pub event_retention: Duration,
    /// Bound on durable-store writes
    pub store_timeout: Duration,
    /// Bound on a switch side effect
    pub switch_timeout: Duration,
    /// Trigger and recovery thresholds
    pub thresholds: FailoverThresholds,
    /// Satellite descriptor defaults
    pub satellite: SatelliteProfile,
    /// Gateway tried first on mesh switches
    pub preferred_gateway: Option<String>,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            monitoring_interval: Duration::from_secs(2),
            maintenance_interval: Duration::from_secs(10),
            trigger_window: Duration::from_secs(60),
            recovery_window: Duration::from_secs(120),
            event_retention: Duration::from_secs(3600),
            store_timeout: Duration::from_secs(2),
            switch_timeout: Duration::from_secs(10),
            thresholds: FailoverThresholds::default(),
            satellite: SatelliteProfile::default(),
            preferred_gateway: None,
        }
    }
}

/// Answer to a manual switch request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwitchOutcome {
    /// Whether the node ended in the requested mode
    pub success: bool,
    /// Event recorded for the switch; `None` for a no-op
    pub event_id: Option<String>,
    /// Mode before the request
    pub from_mode: NetworkMode,
    /// Requested mode
    pub to_mode: NetworkMode,
    /// Wall-clock duration
    pub duration_ms: f64,
    /// Failure cause
    pub error: Option<String>,
}

/// Status of one monitored node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStatusReport {
    /// Node
    pub node_id: String,
    /// Current mode
    pub mode: NetworkMode,
    /// Whether the per-node loop is running
    pub monitoring: bool,
    /// Event in flight, if any
    pub active_event: Option<FailoverEvent>,
    /// Mesh attachment while on the mesh path
    pub attachment: Option<MeshAttachment>,
    /// Most recent assessment seen by the loop
    pub last_assessment: Option<QualityAssessment>,
    /// When `last_assessment` was taken
    pub assessed_at: Option<DateTime<Utc>>,
    /// Thresholds in force
    pub thresholds: FailoverThresholds,
    /// Report time
    pub last_update: DateTime<Utc>,
}

/// Status of the whole controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceStatus {
    /// Whether the controller has been started and not stopped
    pub running: bool,
    /// Nodes with a running loop
    pub monitored_nodes: usize,
    /// Events in flight
    pub active_events: usize,
    /// Events held in memory, completed or not
    pub retained_events: usize,
    /// Rolling statistics
    pub statistics: FailoverStats,
    /// Node count per mode
    pub mode_distribution: BTreeMap<NetworkMode, usize>,
    /// Thresholds in force
    pub thresholds: FailoverThresholds,
    /// Report time
    pub last_update: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct NodeState {
    mode: NetworkMode,
    attachment: Option<MeshAttachment>,
    in_flight: Option<String>,
    last_assessment: Option<(QualityAssessment, DateTime<Utc>)>,
}

impl NodeState {
    fn new() -> Self {
        Self {
            mode: NetworkMode::SatelliteNtn,
            attachment: None,
            in_flight: None,
            last_assessment: None,
        }
    }
}

// `task` stays empty while the registration is still writing the
// satellite descriptor
struct MonitorHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

/// Drives every monitored node through the failover state machine
pub struct FailoverController {
    config: FailoverConfig,
    gateways: Arc<GatewayManager>,
    quality: Arc<dyn ConnectionQualityAssessor>,
    sink: Arc<dyn AttachmentSink>,
    durable: Arc<dyn DocumentStore>,
    nodes: DashMap<String, NodeState>,
    monitors: DashMap<String, MonitorHandle>,
    events: DashMap<String, FailoverEvent>,
    stats: RwLock<FailoverStats>,
    running: AtomicBool,
    shutdown: CancellationToken,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl FailoverController {
    /// Create a stopped controller
    pub fn new(
        config: FailoverConfig,
        gateways: Arc<GatewayManager>,
        quality: Arc<dyn ConnectionQualityAssessor>,
        sink: Arc<dyn AttachmentSink>,
        durable: Arc<dyn DocumentStore>,
    ) -> Self {
        Self {
            config,
            gateways,
            quality,
            sink,
            durable,
            nodes: DashMap::new(),
            monitors: DashMap::new(),
            events: DashMap::new(),
            stats: RwLock::new(FailoverStats::default()),
            running: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            maintenance: Mutex::new(None),
        }
    }

    /// Configuration
    pub fn config(&self) -> &FailoverConfig {
        &self.config
    }

    // ---- service lifecycle ----

    /// Start the maintenance task
    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let this = Arc::clone(self);
        let cancel = self.shutdown.child_token();
        let task = tokio::spawn(async move {
            let mut tick = interval(this.config.maintenance_interval);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tick.tick().await;

            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let removed = this.gc_events(Utc::now());
                        if removed > 0 {
                            debug!("Dropped {} expired failover events", removed);
                        }
                    }
                    _ = cancel.cancelled() => break,
                }
            }
            debug!("Failover maintenance task stopped");
        });
        *self.maintenance.lock().await = Some(task);
        info!(
            "Failover controller started (monitor every {:?})",
            self.config.monitoring_interval
        );
    }

    /// Stop every loop and wait for in-flight switches to finish. A stopped
    /// controller cannot be started again.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.cancel();

        let ids: Vec<String> = self.monitors.iter().map(|m| m.key().clone()).collect();
        let handles: Vec<JoinHandle<()>> = ids
            .iter()
            .filter_map(|id| self.monitors.remove(id))
            .filter_map(|(_, m)| m.task)
            .collect();
        for result in join_all(handles).await {
            if let Err(e) = result {
                warn!("Node monitor ended abnormally: {}", e);
            }
        }

        if let Some(task) = self.maintenance.lock().await.take() {
            if let Err(e) = task.await {
                warn!("Failover maintenance task ended abnormally: {}", e);
            }
        }
        info!("Failover controller stopped");
    }

    /// Whether the controller is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    // ---- node registration ----

    /// Start monitoring a node on the satellite path
    pub async fn register_node(self: &Arc<Self>, node_id: &str) -> Result<(), FailoverError> {
        validate_node_id(node_id)?;

        // Claim the slot before any await so concurrent calls share one loop
        let cancel = match self.monitors.entry(node_id.to_string()) {
            Entry::Occupied(_) => return Ok(()),
            Entry::Vacant(slot) => {
                let cancel = self.shutdown.child_token();
                slot.insert(MonitorHandle {
                    cancel: cancel.clone(),
                    task: None,
                });
                cancel
            }
        };

        if !self.nodes.contains_key(node_id) {
            let descriptor = AttachmentDescriptor::Satellite(SatelliteDescriptor::new(
                node_id,
                &self.config.satellite,
            ));
            if let Err(e) = self.sink.write(&descriptor).await {
                cancel.cancel();
                self.release_monitor_slot(node_id);
                return Err(e);
            }
        }
        if cancel.is_cancelled() {
            // unregistered or stopped while the descriptor was written
            self.release_monitor_slot(node_id);
            return Ok(());
        }
        self.nodes
            .entry(node_id.to_string())
            .or_insert_with(NodeState::new);

        let this = Arc::clone(self);
        let id = node_id.to_string();
        let loop_cancel = cancel.clone();
        let task = tokio::spawn(async move { this.monitor_node(id, loop_cancel).await });
        if let Some(mut monitor) = self.monitors.get_mut(node_id) {
            if !cancel.is_cancelled() && monitor.task.is_none() {
                monitor.task = Some(task);
            }
        }

        info!("Monitoring node {} for failover", node_id);
        Ok(())
    }

    fn release_monitor_slot(&self, node_id: &str) {
        self.monitors
            .remove_if(node_id, |_, monitor| monitor.cancel.is_cancelled());
    }

    /// Stop monitoring a node. Returns whether it was registered.
    pub async fn unregister_node(&self, node_id: &str) -> bool {
        if let Some(monitor) = self.monitors.get(node_id) {
            monitor.cancel.cancel();
        }
        if let Some((_, monitor)) = self.monitors.remove(node_id) {
            if let Some(task) = monitor.task {
                if let Err(e) = task.await {
                    warn!("Monitor for node {} ended abnormally: {}", node_id, e);
                }
            }
        }

        // a manual switch may still be running
        let deadline = Instant::now() + self.config.switch_timeout * 2;
        while self.mode(node_id) == Some(NetworkMode::Switching) && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let Some((_, state)) = self.nodes.remove(node_id) else {
            return false;
        };
        if let Some(attachment) = state.attachment {
            if let Err(e) = self.gateways.release_mesh_attachment(&attachment).await {
                warn!("Releasing mesh attachment of {} failed: {}", node_id, e);
            }
            if let Err(e) = self.sink.remove(node_id, NetworkMode::MeshBackup).await {
                warn!("Removing mesh descriptor of {} failed: {}", node_id, e);
            }
        }
        info!("Stopped monitoring node {}", node_id);
        true
    }

    /// Current mode of a registered node
    pub fn mode(&self, node_id: &str) -> Option<NetworkMode> {
        self.nodes.get(node_id).map(|s| s.mode)
    }

    // ---- evaluation ----

    async fn monitor_node(self: Arc<Self>, node_id: String, cancel: CancellationToken) {
        let mut tick = interval(self.config.monitoring_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tick.tick() => {
                    self.evaluate_node(&node_id).await;
                }
            }
        }
        debug!("Failover monitor for {} stopped", node_id);
    }

    /// Run one trigger or recovery check for a node, switching if warranted
    pub async fn evaluate_node(self: &Arc<Self>, node_id: &str) -> Option<FailoverEvent> {
        let mode = self.mode(node_id)?;
        let window = match mode {
            NetworkMode::SatelliteNtn => self.config.trigger_window,
            NetworkMode::MeshBackup => self.config.recovery_window,
            NetworkMode::DualConnection | NetworkMode::Switching => return None,
        };

        let assessment = match self
            .quality
            .assess_connection_quality(node_id, window)
            .await
        {
            Ok(a) => a,
            Err(e) => {
                debug!("No quality assessment for {}: {}", node_id, e);
                return None;
            }
        };
        if let Some(mut state) = self.nodes.get_mut(node_id) {
            state.last_assessment = Some((assessment.clone(), Utc::now()));
        }

        let (target, reason) = match mode {
            NetworkMode::SatelliteNtn => (
                NetworkMode::MeshBackup,
                self.config.thresholds.evaluate_trigger(&assessment)?,
            ),
            _ if self.config.thresholds.should_recover(&assessment) => {
                (NetworkMode::SatelliteNtn, TriggerReason::SignalRecovery)
            }
            _ => return None,
        };

        info!(
            "Node {} {} -> {} triggered by {} (signal {:.0}, performance {:.0}, trend {:?})",
            node_id,
            mode,
            target,
            reason,
            assessment.signal_quality_score,
            assessment.performance_score,
            assessment.quality_trend
        );

        match self.begin_switch(node_id, target, reason) {
            Ok(event) => Some(self.run_switch(event).await),
            Err(e) => {
                debug!("Switch for {} not started: {}", node_id, e);
                None
            }
        }
    }

    /// Switch a node to `target` regardless of quality
    pub async fn trigger_manual_failover(
        self: &Arc<Self>,
        node_id: &str,
        target: NetworkMode,
    ) -> Result<SwitchOutcome, FailoverError> {
        if target == NetworkMode::Switching {
            return Err(FailoverError::InvalidTarget {
                node_id: node_id.to_string(),
                mode: target,
            });
        }
        let current = self
            .mode(node_id)
            .ok_or_else(|| FailoverError::NodeNotMonitored(node_id.to_string()))?;
        if current == target {
            return Ok(SwitchOutcome {
                success: true,
                event_id: None,
                from_mode: current,
                to_mode: target,
                duration_ms: 0.0,
                error: None,
            });
        }

        let event = self.begin_switch(node_id, target, TriggerReason::ManualTrigger)?;
        let done = self.run_switch(event).await;
        Ok(SwitchOutcome {
            success: done.success,
            event_id: Some(done.event_id),
            from_mode: done.from_mode,
            to_mode: done.to_mode,
            duration_ms: done.duration_ms.unwrap_or_default(),
            error: done.error,
        })
    }

    // ---- switch execution ----

    /// Claim the node by moving it to switching and open an event
    fn begin_switch(
        &self,
        node_id: &str,
        target: NetworkMode,
        reason: TriggerReason,
    ) -> Result<FailoverEvent, FailoverError> {
        let mut state = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| FailoverError::NodeNotMonitored(node_id.to_string()))?;
        if state.mode == NetworkMode::Switching {
            return Err(FailoverError::SwitchInProgress(node_id.to_string()));
        }

        let event = FailoverEvent::new(node_id, reason, state.mode, target);
        self.events.insert(event.event_id.clone(), event.clone());
        state.mode = NetworkMode::Switching;
        state.in_flight = Some(event.event_id.clone());
        Ok(event)
    }

    /// Execute in a detached task so a dropped caller cannot strand the node in switching
    async fn run_switch(self: &Arc<Self>, event: FailoverEvent) -> FailoverEvent {
        let fallback = event.clone();
        let this = Arc::clone(self);
        match tokio::spawn(async move { this.execute(event).await }).await {
            Ok(done) => done,
            Err(e) => {
                self.finalize(
                    fallback,
                    Err(FailoverError::SwitchFailure(format!("switch task failed: {}", e))),
                    0.0,
                )
                .await
            }
        }
    }

    async fn execute(self: Arc<Self>, event: FailoverEvent) -> FailoverEvent {
        info!(
            "Switching node {}: {} -> {} ({})",
            event.node_id, event.from_mode, event.to_mode, event.trigger_reason
        );
        let started = Instant::now();

        // holds an attachment made by an aborted switch so it can be released
        let pending: Arc<Mutex<Option<MeshAttachment>>> = Arc::new(Mutex::new(None));
        let this = Arc::clone(&self);
        let work_event = event.clone();
        let slot = Arc::clone(&pending);
        let mut work = tokio::spawn(async move { this.perform(&work_event, &slot).await });
        let result = match tokio::time::timeout(self.config.switch_timeout, &mut work).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(FailoverError::SwitchFailure(format!(
                "switch task failed: {}",
                e
            ))),
            Err(_) => {
                work.abort();
                Err(FailoverError::SwitchFailure(format!(
                    "timed out after {:?}",
                    self.config.switch_timeout
                )))
            }
        };
        if result.is_err() {
            if let Some(attachment) = pending.lock().await.take() {
                if let Err(e) = self.gateways.release_mesh_attachment(&attachment).await {
                    warn!("Releasing attachment of {} failed: {}", event.node_id, e);
                }
            }
        }

        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.finalize(event, result, duration_ms).await
    }

    /// Side effect of a switch; returns the attachment the node holds afterwards
    async fn perform(
        &self,
        event: &FailoverEvent,
        pending: &Mutex<Option<MeshAttachment>>,
    ) -> Result<Option<MeshAttachment>, FailoverError> {
        let node_id = event.node_id.as_str();
        match event.to_mode {
            NetworkMode::MeshBackup => {
                let attachment = self
                    .gateways
                    .attach_mesh_node(MeshAttachRequest {
                        node_id: node_id.to_string(),
                        preferred_gateway: self.config.preferred_gateway.clone(),
                    })
                    .await?;
                *pending.lock().await = Some(attachment.clone());

                let descriptor = AttachmentDescriptor::Mesh(MeshDescriptor::new(&attachment));
                self.sink.write(&descriptor).await?;
                pending.lock().await.take();
                Ok(Some(attachment))
            }
            NetworkMode::SatelliteNtn => {
                let descriptor = AttachmentDescriptor::Satellite(SatelliteDescriptor::new(
                    node_id,
                    &self.config.satellite,
                ));
                self.sink.write(&descriptor).await?;

                let previous = self.nodes.get(node_id).and_then(|s| s.attachment.clone());
                if let Some(attachment) = previous {
                    if let Err(e) = self.gateways.release_mesh_attachment(&attachment).await {
                        warn!("Releasing mesh attachment of {} failed: {}", node_id, e);
                    }
                }
                if let Err(e) = self.sink.remove(node_id, NetworkMode::MeshBackup).await {
                    warn!("Removing mesh descriptor of {} failed: {}", node_id, e);
                }
                Ok(None)
            }
            other => Err(FailoverError::UnsupportedMode(other)),
        }
    }

    /// Settle the node's mode, then complete and record the event
    async fn finalize(
        &self,
        mut event: FailoverEvent,
        result: Result<Option<MeshAttachment>, FailoverError>,
        duration_ms: f64,
    ) -> FailoverEvent {
        let success = result.is_ok();
        match &result {
            Ok(Some(attachment)) => event.mesh_node_id = Some(attachment.mesh_node_id.clone()),
            Ok(None) => {}
            Err(e) => event.error = Some(e.to_string()),
        }

        let orphan = match self.nodes.get_mut(&event.node_id) {
            Some(mut state) => {
                match result {
                    Ok(attachment) => {
                        state.mode = event.to_mode;
                        state.attachment = attachment;
                    }
                    Err(_) => state.mode = event.from_mode,
                }
                state.in_flight = None;
                None
            }
            None => result.ok().flatten(),
        };
        if let Some(attachment) = orphan {
            if let Err(e) = self.gateways.release_mesh_attachment(&attachment).await {
                warn!("Releasing orphaned attachment of {} failed: {}", event.node_id, e);
            }
        }

        event.complete(success, duration_ms);
        self.events.insert(event.event_id.clone(), event.clone());
        self.stats.write().await.record(&event);

        if success {
            info!(
                "Node {} now on {} ({:.1} ms)",
                event.node_id, event.to_mode, duration_ms
            );
        } else {
            error!(
                "Switch of node {} to {} failed after {:.1} ms, back on {}: {}",
                event.node_id,
                event.to_mode,
                duration_ms,
                event.from_mode,
                event.error.as_deref().unwrap_or("unknown error")
            );
        }

        self.persist_event(&event).await;
        event
    }

    async fn persist_event(&self, event: &FailoverEvent) {
        let doc = match serde_json::to_value(event) {
            Ok(Value::Object(doc)) => doc,
            Ok(_) => return,
            Err(e) => {
                warn!("Failed to encode failover event {}: {}", event.event_id, e);
                return;
            }
        };

        match tokio::time::timeout(
            self.config.store_timeout,
            self.durable.insert_one(collections::FAILOVER_EVENTS, doc),
        )
        .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to persist failover event {}: {}", event.event_id, e),
            Err(_) => warn!(
                "Persisting failover event {} timed out after {:?}",
                event.event_id, self.config.store_timeout
            ),
        }
    }

    // ---- queries ----

    /// Drop completed events older than the retention window; returns how many
    pub fn gc_events(&self, now: DateTime<Utc>) -> usize {
        let retention = chrono::Duration::from_std(self.config.event_retention)
            .unwrap_or_else(|_| chrono::Duration::days(36_500));
        let cutoff = now - retention;
        let before = self.events.len();
        self.events.retain(|_, event| match event.completion_timestamp {
            Some(done) => done >= cutoff,
            None => true,
        });
        before - self.events.len()
    }

    /// Retained events for a node, oldest first
    pub fn events_for(&self, node_id: &str) -> Vec<FailoverEvent> {
        let mut events: Vec<FailoverEvent> = self
            .events
            .iter()
            .filter(|e| e.node_id == node_id)
            .map(|e| e.value().clone())
            .collect();
        events.sort_by_key(|e| e.trigger_timestamp);
        events
    }

    /// Event by id while it is retained
    pub fn event(&self, event_id: &str) -> Option<FailoverEvent> {
        self.events.get(event_id).map(|e| e.clone())
    }

    /// Status of one node
    pub fn node_status(&self, node_id: &str) -> Result<NodeStatusReport, FailoverError> {
        let state = self
            .nodes
            .get(node_id)
            .map(|s| s.clone())
            .ok_or_else(|| FailoverError::NodeNotMonitored(node_id.to_string()))?;
        let active_event = state.in_flight.as_deref().and_then(|id| self.event(id));
        let (last_assessment, assessed_at) = match state.last_assessment {
            Some((assessment, at)) => (Some(assessment), Some(at)),
            None => (None, None),
        };

        Ok(NodeStatusReport {
            node_id: node_id.to_string(),
            mode: state.mode,
            monitoring: self.monitors.contains_key(node_id),
            active_event,
            attachment: state.attachment,
            last_assessment,
            assessed_at,
            thresholds: self.config.thresholds,
            last_update: Utc::now(),
        })
    }

    /// Status of the controller
    pub async fn service_status(&self) -> ServiceStatus {
        let mut mode_distribution: BTreeMap<NetworkMode, usize> =
            NetworkMode::ALL.iter().map(|m| (*m, 0)).collect();
        for state in self.nodes.iter() {
            *mode_distribution.entry(state.mode).or_default() += 1;
        }

        ServiceStatus {
            running: self.is_running(),
            monitored_nodes: self.monitors.len(),
            active_events: self.events.iter().filter(|e| e.is_in_flight()).count(),
            retained_events: self.events.len(),
            statistics: self.stats.read().await.clone(),
            mode_distribution,
            thresholds: self.config.thresholds,
            last_update: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attachment::MemoryAttachmentSink;
    use crate::quality::{QualityTrend, StaticQualitySource};
    use async_trait::async_trait;
    use bridge_gateway::{GatewayConfig, GatewayError, GatewaySpec, ReachabilityProbe};
    use bridge_routing::{OptimizerConfig, RoutingOptimizer};
    use bridge_storage::MemoryStore;
    use bridge_topology::{MeshNode, NodeType, TopologyStore, TopologyStoreConfig};
    use tokio::sync::Notify;

    struct OkProbe;

    #[async_trait]
    impl ReachabilityProbe for OkProbe {
        async fn probe(&self, _: &str, _: u16) -> Result<Duration, GatewayError> {
            Ok(Duration::from_millis(1))
        }
    }

    struct Fixture {
        controller: Arc<FailoverController>,
        gateways: Arc<GatewayManager>,
        quality: Arc<StaticQualitySource>,
        sink: Arc<MemoryAttachmentSink>,
        durable: Arc<MemoryStore>,
    }

    async fn gateways(connected: bool) -> Arc<GatewayManager> {
        let topology = Arc::new(TopologyStore::new(
            Arc::new(MemoryStore::new()),
            TopologyStoreConfig::default(),
        ));
        topology
            .register_node(MeshNode::new("gw_node", "gw_node", NodeType::GroundStation))
            .await;
        let optimizer = Arc::new(RoutingOptimizer::new(
            topology.clone(),
            OptimizerConfig::default(),
        ));
        let manager = Arc::new(
            GatewayManager::new(topology, optimizer, GatewayConfig::default())
                .with_probe(Arc::new(OkProbe)),
        );

        let mut spec = GatewaySpec::new("gw", "127.0.0.1", 2152, "gw_node");
        spec.id = Some("gw1".to_string());
        manager.create_gateway(spec).await.unwrap();
        if connected {
            manager.connect("gw1").await.unwrap();
        }
        manager
    }

    async fn fixture_with(
        connected: bool,
        sink: Arc<dyn AttachmentSink>,
        config: FailoverConfig,
    ) -> (Arc<FailoverController>, Arc<GatewayManager>, Arc<StaticQualitySource>, Arc<MemoryStore>)
    {
        let gateways = gateways(connected).await;
        let quality = Arc::new(StaticQualitySource::new());
        let durable = Arc::new(MemoryStore::new());
        let controller = Arc::new(FailoverController::new(
            config,
            gateways.clone(),
            quality.clone(),
            sink,
            durable.clone(),
        ));
        (controller, gateways, quality, durable)
    }

    async fn fixture(connected: bool) -> Fixture {
        let sink = Arc::new(MemoryAttachmentSink::new());
        let (controller, gateways, quality, durable) =
            fixture_with(connected, sink.clone(), FailoverConfig::default()).await;
        Fixture {
            controller,
            gateways,
            quality,
            sink,
            durable,
        }
    }

    /// Register without a running loop so tests drive evaluation directly
    fn register_quiet(controller: &FailoverController, node_id: &str) {
        controller
            .nodes
            .insert(node_id.to_string(), NodeState::new());
    }

    fn assert_settled(controller: &FailoverController, node_id: &str) {
        assert_ne!(controller.mode(node_id), Some(NetworkMode::Switching));
        for event in controller.events_for(node_id) {
            assert!(!event.is_in_flight());
        }
    }

    #[tokio::test]
    async fn test_degrading_signal_fails_over_to_mesh() {
        let f = fixture(true).await;
        register_quiet(&f.controller, "uav1");
        f.quality.set(
            "uav1",
            QualityAssessment::new(20.0, 50.0, QualityTrend::Degrading),
        );

        let event = f.controller.evaluate_node("uav1").await.unwrap();
        assert_eq!(event.trigger_reason, TriggerReason::SignalDegradation);
        assert!(event.success);
        assert_eq!(event.mesh_node_id.as_deref(), Some("mesh_uav1"));
        assert_eq!(f.controller.mode("uav1"), Some(NetworkMode::MeshBackup));
        assert_settled(&f.controller, "uav1");

        assert!(f.gateways.topology().get_node("mesh_uav1").is_some());
        assert!(f.gateways.tunnels().get_tunnel("tunnel_uav1").is_some());
        assert!(f.sink.get("uav1", NetworkMode::MeshBackup).is_some());
        assert_eq!(f.durable.len(collections::FAILOVER_EVENTS), 1);

        let status = f.controller.node_status("uav1").unwrap();
        assert_eq!(status.attachment.unwrap().gateway_id, "gw1");
        assert_eq!(status.last_assessment.unwrap().signal_quality_score, 20.0);
        assert!(status.active_event.is_none());

        // staying bad on mesh does not retrigger
        assert!(f.controller.evaluate_node("uav1").await.is_none());
    }

    #[tokio::test]
    async fn test_recovery_returns_to_satellite() {
        let f = fixture(true).await;
        register_quiet(&f.controller, "uav1");
        f.quality.set(
            "uav1",
            QualityAssessment::new(20.0, 50.0, QualityTrend::Degrading),
        );
        f.controller.evaluate_node("uav1").await.unwrap();

        f.quality.set(
            "uav1",
            QualityAssessment::new(75.0, 72.0, QualityTrend::Stable),
        );
        let event = f.controller.evaluate_node("uav1").await.unwrap();
        assert_eq!(event.trigger_reason, TriggerReason::SignalRecovery);
        assert_eq!(event.from_mode, NetworkMode::MeshBackup);
        assert!(event.success);
        assert_eq!(f.controller.mode("uav1"), Some(NetworkMode::SatelliteNtn));
        assert_settled(&f.controller, "uav1");

        assert!(f.gateways.topology().get_node("mesh_uav1").is_none());
        assert!(f.gateways.tunnels().get_tunnel("tunnel_uav1").is_none());
        assert!(f.sink.get("uav1", NetworkMode::MeshBackup).is_none());
        assert!(f.sink.get("uav1", NetworkMode::SatelliteNtn).is_some());
        assert!(f.controller.node_status("uav1").unwrap().attachment.is_none());

        let status = f.controller.service_status().await;
        assert_eq!(status.statistics.total_failovers, 2);
        assert_eq!(status.statistics.successful_failovers, 2);
        assert_eq!(status.mode_distribution[&NetworkMode::SatelliteNtn], 1);
        assert_eq!(status.mode_distribution[&NetworkMode::MeshBackup], 0);
    }

    #[tokio::test]
    async fn test_no_recovery_on_partial_quality() {
        let f = fixture(true).await;
        register_quiet(&f.controller, "uav1");
        f.controller
            .trigger_manual_failover("uav1", NetworkMode::MeshBackup)
            .await
            .unwrap();

        for (signal, performance) in [(75.0, 70.0), (70.0, 90.0), (95.0, 20.0), (10.0, 95.0)] {
            f.quality.set(
                "uav1",
                QualityAssessment::new(signal, performance, QualityTrend::Improving),
            );
            assert!(f.controller.evaluate_node("uav1").await.is_none());
            assert_eq!(f.controller.mode("uav1"), Some(NetworkMode::MeshBackup));
        }
    }

    #[tokio::test]
    async fn test_manual_switch_to_current_mode_is_noop() {
        let f = fixture(true).await;
        register_quiet(&f.controller, "uav1");

        let outcome = f
            .controller
            .trigger_manual_failover("uav1", NetworkMode::SatelliteNtn)
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.event_id, None);
        assert_eq!(outcome.duration_ms, 0.0);
        assert!(f.controller.events_for("uav1").is_empty());
        assert_eq!(
            f.controller.service_status().await.statistics.total_failovers,
            0
        );
    }

    #[tokio::test]
    async fn test_manual_switch_rejections() {
        let f = fixture(true).await;
        register_quiet(&f.controller, "uav1");

        assert!(matches!(
            f.controller
                .trigger_manual_failover("uav1", NetworkMode::Switching)
                .await,
            Err(FailoverError::InvalidTarget { .. })
        ));
        assert!(matches!(
            f.controller
                .trigger_manual_failover("ghost", NetworkMode::MeshBackup)
                .await,
            Err(FailoverError::NodeNotMonitored(_))
        ));

        let outcome = f
            .controller
            .trigger_manual_failover("uav1", NetworkMode::DualConnection)
            .await
            .unwrap();
        assert!(!outcome.success);
        assert!(outcome.event_id.is_some());
        assert!(outcome.error.is_some());
        assert_eq!(f.controller.mode("uav1"), Some(NetworkMode::SatelliteNtn));
        assert_settled(&f.controller, "uav1");
    }

    #[tokio::test]
    async fn test_failed_switch_rolls_back() {
        let f = fixture(false).await;
        register_quiet(&f.controller, "uav1");
        f.quality.set(
            "uav1",
            QualityAssessment::new(10.0, 10.0, QualityTrend::Degrading),
        );

        let event = f.controller.evaluate_node("uav1").await.unwrap();
        assert!(!event.success);
        assert!(event
            .error
            .as_deref()
            .unwrap()
            .contains("no connected gateway"));
        assert_eq!(f.controller.mode("uav1"), Some(NetworkMode::SatelliteNtn));
        assert_settled(&f.controller, "uav1");
        assert!(f.sink.get("uav1", NetworkMode::MeshBackup).is_none());

        let stats = f.controller.service_status().await.statistics;
        assert_eq!(stats.total_failovers, 1);
        assert_eq!(stats.successful_failovers, 0);
    }

    /// Sink that blocks mesh writes until released
    struct GatedSink {
        inner: MemoryAttachmentSink,
        gate: Notify,
    }

    #[async_trait]
    impl AttachmentSink for GatedSink {
        async fn write(&self, descriptor: &AttachmentDescriptor) -> Result<(), FailoverError> {
            if descriptor.mode() == NetworkMode::MeshBackup {
                self.gate.notified().await;
            }
            self.inner.write(descriptor).await
        }

        async fn remove(&self, node_id: &str, mode: NetworkMode) -> Result<(), FailoverError> {
            self.inner.remove(node_id, mode).await
        }
    }

    #[tokio::test]
    async fn test_switching_blocks_second_switch() {
        let sink = Arc::new(GatedSink {
            inner: MemoryAttachmentSink::new(),
            gate: Notify::new(),
        });
        let (controller, _, _, _) =
            fixture_with(true, sink.clone(), FailoverConfig::default()).await;
        register_quiet(&controller, "uav1");

        let first = {
            let controller = controller.clone();
            tokio::spawn(async move {
                controller
                    .trigger_manual_failover("uav1", NetworkMode::MeshBackup)
                    .await
            })
        };

        while controller.mode("uav1") != Some(NetworkMode::Switching) {
            tokio::task::yield_now().await;
        }

        let status = controller.node_status("uav1").unwrap();
        let active = status.active_event.unwrap();
        assert!(active.is_in_flight());
        assert_eq!(controller.service_status().await.active_events, 1);

        assert!(matches!(
            controller
                .trigger_manual_failover("uav1", NetworkMode::SatelliteNtn)
                .await,
            Err(FailoverError::SwitchInProgress(_))
        ));

        sink.gate.notify_one();
        let outcome = first.await.unwrap().unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.event_id.as_deref(), Some(active.event_id.as_str()));
        assert_eq!(controller.mode("uav1"), Some(NetworkMode::MeshBackup));
        assert_settled(&controller, "uav1");
    }

    #[tokio::test]
    async fn test_switch_timeout_rolls_back() {
        let sink = Arc::new(GatedSink {
            inner: MemoryAttachmentSink::new(),
            gate: Notify::new(),
        });
        let config = FailoverConfig {
            switch_timeout: Duration::from_millis(50),
            ..FailoverConfig::default()
        };
        let (controller, gateways, _, _) = fixture_with(true, sink, config).await;
        register_quiet(&controller, "uav1");

        let outcome = controller
            .trigger_manual_failover("uav1", NetworkMode::MeshBackup)
            .await
            .unwrap();
        assert!(!outcome.success);
        assert!(outcome.error.unwrap().contains("timed out"));
        assert_eq!(controller.mode("uav1"), Some(NetworkMode::SatelliteNtn));
        assert!(gateways.tunnels().get_tunnel("tunnel_uav1").is_none());
        assert!(gateways.topology().get_node("mesh_uav1").is_none());
        assert_settled(&controller, "uav1");
    }

    #[tokio::test]
    async fn test_register_loop_and_unregister() {
        let sink = Arc::new(MemoryAttachmentSink::new());
        let config = FailoverConfig {
            monitoring_interval: Duration::from_millis(10),
            ..FailoverConfig::default()
        };
        let (controller, gateways, quality, _) =
            fixture_with(true, sink.clone(), config).await;
        controller.start().await;

        controller.register_node("uav1").await.unwrap();
        assert!(sink.get("uav1", NetworkMode::SatelliteNtn).is_some());
        assert!(controller.node_status("uav1").unwrap().monitoring);
        assert!(matches!(
            controller.register_node("bad id").await,
            Err(FailoverError::InvalidNodeId(_))
        ));

        quality.set(
            "uav1",
            QualityAssessment::new(50.0, 10.0, QualityTrend::Stable),
        );
        tokio::time::timeout(Duration::from_secs(5), async {
            while controller.mode("uav1") != Some(NetworkMode::MeshBackup) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        let events = controller.events_for("uav1");
        assert_eq!(events[0].trigger_reason, TriggerReason::HighPacketLoss);

        assert!(controller.unregister_node("uav1").await);
        assert!(!controller.unregister_node("uav1").await);
        assert!(matches!(
            controller.node_status("uav1"),
            Err(FailoverError::NodeNotMonitored(_))
        ));
        assert!(gateways.topology().get_node("mesh_uav1").is_none());
        assert!(sink.get("uav1", NetworkMode::MeshBackup).is_none());

        controller.stop().await;
        assert!(!controller.service_status().await.running);
    }

    /// Sink whose writes take a while to land
    struct SlowSink {
        inner: MemoryAttachmentSink,
        delay: Duration,
    }

    #[async_trait]
    impl AttachmentSink for SlowSink {
        async fn write(&self, descriptor: &AttachmentDescriptor) -> Result<(), FailoverError> {
            tokio::time::sleep(self.delay).await;
            self.inner.write(descriptor).await
        }

        async fn remove(&self, node_id: &str, mode: NetworkMode) -> Result<(), FailoverError> {
            self.inner.remove(node_id, mode).await
        }
    }

    #[tokio::test]
    async fn test_concurrent_register_spawns_one_loop() {
        let sink = Arc::new(SlowSink {
            inner: MemoryAttachmentSink::new(),
            delay: Duration::from_millis(50),
        });
        let (controller, _, _, _) =
            fixture_with(true, sink.clone(), FailoverConfig::default()).await;

        let (first, second) = tokio::join!(
            controller.register_node("uav1"),
            controller.register_node("uav1")
        );
        first.unwrap();
        second.unwrap();
        assert_eq!(controller.monitors.len(), 1);
        assert!(controller.node_status("uav1").unwrap().monitoring);

        assert!(controller.unregister_node("uav1").await);
        assert!(controller.monitors.is_empty());
        assert_eq!(Arc::strong_count(&controller), 1);

        controller.register_node("uav1").await.unwrap();
        assert_eq!(controller.monitors.len(), 1);
        assert!(controller.unregister_node("uav1").await);
        assert_eq!(Arc::strong_count(&controller), 1);
    }

    #[tokio::test]
    async fn test_register_aborted_by_unregister_leaves_nothing() {
        let sink = Arc::new(SlowSink {
            inner: MemoryAttachmentSink::new(),
            delay: Duration::from_millis(50),
        });
        let (controller, _, _, _) =
            fixture_with(true, sink.clone(), FailoverConfig::default()).await;

        let register = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.register_node("uav1").await })
        };
        while !controller.monitors.contains_key("uav1") {
            tokio::task::yield_now().await;
        }
        assert!(!controller.unregister_node("uav1").await);
        register.await.unwrap().unwrap();

        assert!(controller.monitors.is_empty());
        assert!(controller.mode("uav1").is_none());
        assert_eq!(Arc::strong_count(&controller), 1);
    }

    #[tokio::test]
    async fn test_unregister_lets_in_flight_switch_finish() {
        let sink = Arc::new(GatedSink {
            inner: MemoryAttachmentSink::new(),
            gate: Notify::new(),
        });
        let (controller, gateways, _, _) =
            fixture_with(true, sink.clone(), FailoverConfig::default()).await;
        register_quiet(&controller, "uav1");

        let switch = {
            let controller = controller.clone();
            tokio::spawn(async move {
                controller
                    .trigger_manual_failover("uav1", NetworkMode::MeshBackup)
                    .await
            })
        };
        while controller.mode("uav1") != Some(NetworkMode::Switching) {
            tokio::task::yield_now().await;
        }

        let unregister = {
            let controller = controller.clone();
            tokio::spawn(async move { controller.unregister_node("uav1").await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!unregister.is_finished());
        sink.gate.notify_one();

        let outcome = switch.await.unwrap().unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.to_mode, NetworkMode::MeshBackup);
        assert!(unregister.await.unwrap());

        assert!(controller.mode("uav1").is_none());
        assert!(gateways.topology().get_node("mesh_uav1").is_none());
        assert!(gateways.tunnels().get_tunnel("tunnel_uav1").is_none());
        assert!(sink.inner.get("uav1", NetworkMode::MeshBackup).is_none());
        let events = controller.events_for("uav1");
        assert_eq!(events.len(), 1);
        assert!(events[0].success);
    }

    #[tokio::test]
    async fn test_gc_events_after_retention() {
        let f = fixture(true).await;
        register_quiet(&f.controller, "uav1");
        f.controller
            .trigger_manual_failover("uav1", NetworkMode::MeshBackup)
            .await
            .unwrap();

        assert_eq!(f.controller.gc_events(Utc::now()), 0);
        assert_eq!(
            f.controller
                .gc_events(Utc::now() + chrono::Duration::hours(2)),
            1
        );
        assert!(f.controller.events_for("uav1").is_empty());
    }
}
