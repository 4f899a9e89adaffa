//! Tunnel header framing and mesh routing-protocol packet decoding for the NTN bridge.
//!
//! This crate holds the byte-level pieces of the bridge between the core network's
//! user-plane tunnel and the ad-hoc mesh:
//!
//! - **Tunnel header**: a minimal GTP-U style header used to multiplex per-node
//!   tunnels towards the upstream gateway.
//! - **Protocol adapter**: tolerant decoders for mesh routing control packets
//!   (AODV, OLSR, BATMAN, custom) that normalise them into [`ProtocolEvent`]s.
//!
//! ## Tunnel Header Format
//!
//! ```text
//! +--------+--------+-----------------+----------------------------------+
//! | flags  | type   | length (u16)    | TEID (u32)                       |
//! +--------+--------+-----------------+----------------------------------+
//! | seq (u16, opt)  | npdu   | next   |  only when S/E/PN flags are set  |
//! +-----------------+--------+--------+----------------------------------+
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod header;
pub mod protocol;

pub use error::{ParseError, WireError};
pub use header::{
    derive_teid, GtpFlags, TunnelHeader, GPDU_MESSAGE_TYPE, GTP_VERSION, MANDATORY_HEADER_SIZE,
    OPTIONAL_HEADER_SIZE,
};
pub use protocol::{
    AodvMessage, AodvMessageType, BatmanFlags, BatmanMessage, MeshRoutingProtocol, OlsrMessage,
    OlsrMessageType, ProtocolAdapter, ProtocolEvent, ProtocolEventKind,
};
