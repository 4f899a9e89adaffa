//! Mesh routing-protocol control packet decoding.
//!
//! Control packets arriving from the mesh carry a one-byte protocol discriminator
//! followed by the protocol body. Each known protocol has its own decoder; anything
//! else goes through the pass-through decoder so unknown traffic is still accounted
//! for. Decoders never panic on short or inconsistent input.

use bitflags::bitflags;
use bytes::Buf;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use tracing::debug;

use crate::ParseError;

const AODV_MIN_LEN: usize = 8;
const OLSR_MIN_LEN: usize = 16;
const OLSR_PACKET_HEADER_LEN: usize = 4;
const OLSR_MESSAGE_HEADER_LEN: usize = 12;
const BATMAN_MIN_LEN: usize = 14;

/// Mesh routing protocols understood by the adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MeshRoutingProtocol {
    /// Ad hoc On-Demand Distance Vector
    Aodv,
    /// Optimized Link State Routing
    Olsr,
    /// B.A.T.M.A.N. originator messages
    Batman,
    /// Testbed-specific control messages
    Custom,
    /// Anything else, decoded as opaque bytes
    PassThrough,
}

impl MeshRoutingProtocol {
    /// Map a wire discriminator to a protocol
    pub fn from_id(id: u8) -> Self {
        match id {
            0x01 => MeshRoutingProtocol::Aodv,
            0x02 => MeshRoutingProtocol::Olsr,
            0x03 => MeshRoutingProtocol::Batman,
            0x04 => MeshRoutingProtocol::Custom,
            _ => MeshRoutingProtocol::PassThrough,
        }
    }

    /// Wire discriminator for this protocol, if it has one
    pub fn id(self) -> Option<u8> {
        match self {
            MeshRoutingProtocol::Aodv => Some(0x01),
            MeshRoutingProtocol::Olsr => Some(0x02),
            MeshRoutingProtocol::Batman => Some(0x03),
            MeshRoutingProtocol::Custom => Some(0x04),
            MeshRoutingProtocol::PassThrough => None,
        }
    }

    /// Short protocol name used in errors and logs
    pub fn name(self) -> &'static str {
        match self {
            MeshRoutingProtocol::Aodv => "aodv",
            MeshRoutingProtocol::Olsr => "olsr",
            MeshRoutingProtocol::Batman => "batman",
            MeshRoutingProtocol::Custom => "custom",
            MeshRoutingProtocol::PassThrough => "pass_through",
        }
    }
}

impl fmt::Display for MeshRoutingProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// AODV message types
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AodvMessageType {
    /// Route request
    Rreq = 1,
    /// Route reply
    Rrep = 2,
    /// Route error
    Rerr = 3,
    /// Route reply acknowledgment
    RrepAck = 4,
}

impl TryFrom<u8> for AodvMessageType {
    type Error = ParseError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(AodvMessageType::Rreq),
            2 => Ok(AodvMessageType::Rrep),
            3 => Ok(AodvMessageType::Rerr),
            4 => Ok(AodvMessageType::RrepAck),
            _ => Err(ParseError::UnknownMessageType {
                protocol: "aodv",
                value,
            }),
        }
    }
}

/// Decoded AODV control message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AodvMessage {
    /// Message type
    pub message_type: AodvMessageType,
    /// Hops travelled so far
    pub hop_count: u8,
    /// Request identifier
    pub request_id: u32,
}

/// OLSR message types
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OlsrMessageType {
    /// Neighbor sensing
    Hello = 1,
    /// Topology control
    Tc = 2,
    /// Multiple interface declaration
    Mid = 3,
    /// Host and network association
    Hna = 4,
}

impl TryFrom<u8> for OlsrMessageType {
    type Error = ParseError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(OlsrMessageType::Hello),
            2 => Ok(OlsrMessageType::Tc),
            3 => Ok(OlsrMessageType::Mid),
            4 => Ok(OlsrMessageType::Hna),
            _ => Err(ParseError::UnknownMessageType {
                protocol: "olsr",
                value,
            }),
        }
    }
}

/// Decoded OLSR packet (first message only)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OlsrMessage {
    /// Packet sequence number
    pub packet_sequence: u16,
    /// First message type
    pub message_type: OlsrMessageType,
    /// Validity time (encoded mantissa/exponent byte)
    pub vtime: u8,
    /// Originator main address
    pub originator: Ipv4Addr,
    /// Remaining time to live
    pub ttl: u8,
    /// Hops travelled so far
    pub hop_count: u8,
    /// Message sequence number
    pub message_sequence: u16,
}

bitflags! {
    /// BATMAN originator message flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct BatmanFlags: u8 {
        /// Sender is not the best next hop towards the originator
        const NOT_BEST_NEXT_HOP = 1 << 0;
        /// Primary interface on first hop
        const PRIMARIES_FIRST_HOP = 1 << 1;
        /// Received directly from the originator
        const DIRECT_LINK = 1 << 2;
    }
}

/// Decoded BATMAN originator message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatmanMessage {
    /// Protocol version
    pub version: u8,
    /// Remaining time to live
    pub ttl: u8,
    /// Message flags
    pub flags: BatmanFlags,
    /// Transmit quality (0-255)
    pub transmit_quality: u8,
    /// Originator sequence number
    pub sequence: u32,
    /// Originator MAC address
    pub originator: [u8; 6],
}

/// Protocol-specific content of a decoded control packet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProtocolEventKind {
    /// Distance-vector control message
    Aodv(AodvMessage),
    /// Link-state control message
    Olsr(OlsrMessage),
    /// Originator message
    Batman(BatmanMessage),
    /// Custom testbed message; body is opaque
    Custom {
        /// Body length
        length: usize,
    },
    /// Unrecognised protocol; body is opaque
    PassThrough {
        /// Discriminator seen on the wire, if any
        protocol_id: Option<u8>,
        /// Body length
        length: usize,
    },
}

/// Normalised record of a mesh control packet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolEvent {
    /// Protocol the packet was decoded as
    pub protocol: MeshRoutingProtocol,
    /// Decoded content
    pub kind: ProtocolEventKind,
    /// Body size in bytes, excluding the discriminator
    pub body_len: usize,
}

impl ProtocolEvent {
    /// Hop count reported by the packet, when the protocol carries one
    pub fn hop_count(&self) -> Option<u8> {
        match &self.kind {
            ProtocolEventKind::Aodv(msg) => Some(msg.hop_count),
            ProtocolEventKind::Olsr(msg) => Some(msg.hop_count),
            _ => None,
        }
    }
}

/// Stateless decoder for mesh control packets
#[derive(Debug, Clone, Copy, Default)]
pub struct ProtocolAdapter;

impl ProtocolAdapter {
    /// Create a new adapter
    pub fn new() -> Self {
        Self
    }

    /// Decode a raw packet whose first byte names the protocol
    pub fn parse(&self, raw: &[u8]) -> Result<ProtocolEvent, ParseError> {
        let (&id, body) = raw.split_first().ok_or(ParseError::Empty)?;
        let protocol = MeshRoutingProtocol::from_id(id);
        if protocol == MeshRoutingProtocol::PassThrough {
            debug!("Unknown mesh protocol id {:#04x}, passing through", id);
            return Ok(ProtocolEvent {
                protocol,
                kind: ProtocolEventKind::PassThrough {
                    protocol_id: Some(id),
                    length: body.len(),
                },
                body_len: body.len(),
            });
        }
        self.parse_as(protocol, body)
    }

    /// Decode a packet body when the protocol is already known
    pub fn parse_as(
        &self,
        protocol: MeshRoutingProtocol,
        body: &[u8],
    ) -> Result<ProtocolEvent, ParseError> {
        let kind = match protocol {
            MeshRoutingProtocol::Aodv => ProtocolEventKind::Aodv(decode_aodv(body)?),
            MeshRoutingProtocol::Olsr => ProtocolEventKind::Olsr(decode_olsr(body)?),
            MeshRoutingProtocol::Batman => ProtocolEventKind::Batman(decode_batman(body)?),
            MeshRoutingProtocol::Custom => ProtocolEventKind::Custom { length: body.len() },
            MeshRoutingProtocol::PassThrough => ProtocolEventKind::PassThrough {
                protocol_id: None,
                length: body.len(),
            },
        };

        Ok(ProtocolEvent {
            protocol,
            kind,
            body_len: body.len(),
        })
    }
}

fn require(protocol: &'static str, body: &[u8], needed: usize) -> Result<(), ParseError> {
    if body.len() < needed {
        return Err(ParseError::Truncated {
            protocol,
            needed,
            got: body.len(),
        });
    }
    Ok(())
}

fn decode_aodv(body: &[u8]) -> Result<AodvMessage, ParseError> {
    require("aodv", body, AODV_MIN_LEN)?;
    let mut buf = body;
    let message_type = AodvMessageType::try_from(buf.get_u8())?;
    let hop_count = buf.get_u8();
    let request_id = buf.get_u32();

    Ok(AodvMessage {
        message_type,
        hop_count,
        request_id,
    })
}

fn decode_olsr(body: &[u8]) -> Result<OlsrMessage, ParseError> {
    require("olsr", body, OLSR_MIN_LEN)?;
    let mut buf = body;
    let packet_length = buf.get_u16() as usize;
    let packet_sequence = buf.get_u16();

    if packet_length < OLSR_MIN_LEN {
        return Err(ParseError::Inconsistent {
            protocol: "olsr",
            reason: format!("packet length {} below minimum", packet_length),
        });
    }
    if packet_length > body.len() {
        return Err(ParseError::Truncated {
            protocol: "olsr",
            needed: packet_length,
            got: body.len(),
        });
    }

    let message_type = OlsrMessageType::try_from(buf.get_u8())?;
    let vtime = buf.get_u8();
    let message_size = buf.get_u16() as usize;
    if message_size < OLSR_MESSAGE_HEADER_LEN
        || message_size > packet_length - OLSR_PACKET_HEADER_LEN
    {
        return Err(ParseError::Inconsistent {
            protocol: "olsr",
            reason: format!(
                "message size {} does not fit packet length {}",
                message_size, packet_length
            ),
        });
    }

    let originator = Ipv4Addr::from(buf.get_u32());
    let ttl = buf.get_u8();
    let hop_count = buf.get_u8();
    let message_sequence = buf.get_u16();

    Ok(OlsrMessage {
        packet_sequence,
        message_type,
        vtime,
        originator,
        ttl,
        hop_count,
        message_sequence,
    })
}

fn decode_batman(body: &[u8]) -> Result<BatmanMessage, ParseError> {
    require("batman", body, BATMAN_MIN_LEN)?;
    let mut buf = body;
    let version = buf.get_u8();
    let ttl = buf.get_u8();
    let flags = BatmanFlags::from_bits_truncate(buf.get_u8());
    let transmit_quality = buf.get_u8();
    let sequence = buf.get_u32();
    let mut originator = [0u8; 6];
    buf.copy_to_slice(&mut originator);

    Ok(BatmanMessage {
        version,
        ttl,
        flags,
        transmit_quality,
        sequence,
        originator,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn olsr_packet(packet_length: u16, message_size: u16) -> Vec<u8> {
        let mut raw = vec![0x02];
        raw.extend_from_slice(&packet_length.to_be_bytes());
        raw.extend_from_slice(&7u16.to_be_bytes());
        raw.push(2); // TC
        raw.push(0x86);
        raw.extend_from_slice(&message_size.to_be_bytes());
        raw.extend_from_slice(&[10, 0, 0, 5]);
        raw.push(255);
        raw.push(3);
        raw.extend_from_slice(&99u16.to_be_bytes());
        raw
    }

    #[test]
    fn test_protocol_ids() {
        assert_eq!(MeshRoutingProtocol::from_id(0x01), MeshRoutingProtocol::Aodv);
        assert_eq!(MeshRoutingProtocol::from_id(0x04), MeshRoutingProtocol::Custom);
        assert_eq!(
            MeshRoutingProtocol::from_id(0x7F),
            MeshRoutingProtocol::PassThrough
        );
        assert_eq!(MeshRoutingProtocol::Olsr.id(), Some(0x02));
        assert_eq!(MeshRoutingProtocol::PassThrough.id(), None);
    }

    #[test]
    fn test_parse_aodv_rreq() {
        let raw = [0x01, 1, 4, 0, 0, 0x01, 0x02, 0, 0];
        let event = ProtocolAdapter::new().parse(&raw).unwrap();

        assert_eq!(event.protocol, MeshRoutingProtocol::Aodv);
        assert_eq!(event.body_len, 8);
        assert_eq!(event.hop_count(), Some(4));
        match event.kind {
            ProtocolEventKind::Aodv(msg) => {
                assert_eq!(msg.message_type, AodvMessageType::Rreq);
                assert_eq!(msg.request_id, 0x0102);
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_parse_aodv_errors() {
        let adapter = ProtocolAdapter::new();
        assert_eq!(
            adapter.parse(&[0x01, 1, 2]).unwrap_err(),
            ParseError::Truncated {
                protocol: "aodv",
                needed: 8,
                got: 2
            }
        );
        assert_eq!(
            adapter.parse(&[0x01, 9, 0, 0, 0, 0, 0, 0, 0]).unwrap_err(),
            ParseError::UnknownMessageType {
                protocol: "aodv",
                value: 9
            }
        );
    }

    #[test]
    fn test_parse_olsr() {
        let raw = olsr_packet(16, 12);
        let event = ProtocolAdapter::new().parse(&raw).unwrap();

        match event.kind {
            ProtocolEventKind::Olsr(msg) => {
                assert_eq!(msg.message_type, OlsrMessageType::Tc);
                assert_eq!(msg.originator, Ipv4Addr::new(10, 0, 0, 5));
                assert_eq!(msg.hop_count, 3);
                assert_eq!(msg.packet_sequence, 7);
                assert_eq!(msg.message_sequence, 99);
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_parse_olsr_declared_length_exceeds_buffer() {
        let raw = olsr_packet(40, 12);
        assert_eq!(
            ProtocolAdapter::new().parse(&raw).unwrap_err(),
            ParseError::Truncated {
                protocol: "olsr",
                needed: 40,
                got: 16
            }
        );
    }

    #[test]
    fn test_parse_olsr_inconsistent_message_size() {
        let raw = olsr_packet(16, 30);
        assert!(matches!(
            ProtocolAdapter::new().parse(&raw),
            Err(ParseError::Inconsistent { protocol: "olsr", .. })
        ));
    }

    #[test]
    fn test_parse_batman() {
        let mut raw = vec![0x03, 15, 50, 0x05, 200];
        raw.extend_from_slice(&1234u32.to_be_bytes());
        raw.extend_from_slice(&[0x02, 0x00, 0x00, 0x00, 0x00, 0x01]);

        let event = ProtocolAdapter::new().parse(&raw).unwrap();
        match event.kind {
            ProtocolEventKind::Batman(msg) => {
                assert_eq!(msg.version, 15);
                assert_eq!(msg.transmit_quality, 200);
                assert_eq!(msg.sequence, 1234);
                assert!(msg.flags.contains(BatmanFlags::DIRECT_LINK));
                assert!(msg.flags.contains(BatmanFlags::NOT_BEST_NEXT_HOP));
                assert_eq!(msg.originator[5], 0x01);
            }
            other => panic!("unexpected kind {:?}", other),
        }
    }

    #[test]
    fn test_unknown_protocol_passes_through() {
        let event = ProtocolAdapter::new().parse(&[0xEE, 1, 2, 3]).unwrap();
        assert_eq!(event.protocol, MeshRoutingProtocol::PassThrough);
        assert_eq!(
            event.kind,
            ProtocolEventKind::PassThrough {
                protocol_id: Some(0xEE),
                length: 3
            }
        );
    }

    #[test]
    fn test_empty_and_custom() {
        let adapter = ProtocolAdapter::new();
        assert_eq!(adapter.parse(&[]).unwrap_err(), ParseError::Empty);

        let event = adapter.parse(&[0x04]).unwrap();
        assert_eq!(event.kind, ProtocolEventKind::Custom { length: 0 });
    }

    #[test]
    fn test_parse_as_known_protocol() {
        let event = ProtocolAdapter::new()
            .parse_as(MeshRoutingProtocol::Aodv, &[2, 1, 0, 0, 0, 9, 0, 0])
            .unwrap();
        assert_eq!(event.hop_count(), Some(1));
    }

    #[test]
    fn test_event_serializes_with_kind_tag() {
        let event = ProtocolAdapter::new().parse(&[0x04, 1, 2]).unwrap();
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["protocol"], "custom");
        assert_eq!(json["kind"]["kind"], "custom");
    }
}
