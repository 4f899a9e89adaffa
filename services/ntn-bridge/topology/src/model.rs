//! Bridge data model: mesh nodes, links, gateways, flows and QoS classes.

pub mod flow;
pub mod gateway;
pub mod node;
pub mod qos;

pub use flow::{FlowDirection, TrafficFlow};
pub use gateway::{BridgeGateway, GatewayMetrics, GatewayStatus};
pub use node::{
    GeoPosition, LinkQuality, MeshNode, Neighbor, NodeLoad, NodeStatus, NodeType,
    RadioParameters, RouteEntry,
};
pub use qos::{QosClass, QosPolicy};
