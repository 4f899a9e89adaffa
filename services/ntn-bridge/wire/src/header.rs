//! GTP-U style tunnel header.
//!
//! The bridge only needs enough of GTP-U to multiplex per-node tunnels towards the
//! upstream gateway: the 8-byte mandatory header and, when sequencing is enabled,
//! the 4-byte optional block carrying the sequence number.

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::WireError;

/// GTP version carried in the top three bits of the flags byte
pub const GTP_VERSION: u8 = 1;

/// Message type for user-plane payloads
pub const GPDU_MESSAGE_TYPE: u8 = 0xFF;

/// Mandatory header size in bytes
pub const MANDATORY_HEADER_SIZE: usize = 8;

/// Optional block size (sequence, N-PDU, next extension)
pub const OPTIONAL_HEADER_SIZE: usize = 4;

const VERSION_SHIFT: u8 = 5;
const RESERVED_BIT: u8 = 0x08;
const FLAG_MASK: u8 = 0x1F;

bitflags! {
    /// Low five bits of the GTP flags byte
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct GtpFlags: u8 {
        /// Protocol type: GTP (set) rather than GTP'
        const PROTOCOL_TYPE = 0x10;
        /// Extension header present
        const EXTENSION = 0x04;
        /// Sequence number present
        const SEQUENCE = 0x02;
        /// N-PDU number present
        const N_PDU = 0x01;
    }
}

impl GtpFlags {
    /// Whether the optional 4-byte block follows the mandatory header
    pub fn has_optional_block(self) -> bool {
        self.intersects(GtpFlags::EXTENSION | GtpFlags::SEQUENCE | GtpFlags::N_PDU)
    }
}

/// Decoded tunnel header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelHeader {
    /// Flag bits below the version
    pub flags: GtpFlags,
    /// Message type (always G-PDU for bridged traffic)
    pub message_type: u8,
    /// Bytes following the mandatory header
    pub length: u16,
    /// Tunnel endpoint identifier
    pub teid: u32,
    /// Sequence number, when the S flag is set
    pub sequence: Option<u16>,
}

impl TunnelHeader {
    /// Build a G-PDU header for a payload of the given size
    pub fn gpdu(teid: u32, payload_len: usize, sequence: Option<u16>) -> Result<Self, WireError> {
        let mut flags = GtpFlags::PROTOCOL_TYPE;
        let mut length = payload_len;
        if sequence.is_some() {
            flags |= GtpFlags::SEQUENCE;
            length += OPTIONAL_HEADER_SIZE;
        }
        let length = u16::try_from(length).map_err(|_| WireError::Size(payload_len))?;

        Ok(Self {
            flags,
            message_type: GPDU_MESSAGE_TYPE,
            length,
            teid,
            sequence,
        })
    }

    /// Size of the encoded header including the optional block
    pub fn encoded_len(&self) -> usize {
        if self.flags.has_optional_block() {
            MANDATORY_HEADER_SIZE + OPTIONAL_HEADER_SIZE
        } else {
            MANDATORY_HEADER_SIZE
        }
    }

    /// Encode the header (big-endian)
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8((GTP_VERSION << VERSION_SHIFT) | self.flags.bits());
        buf.put_u8(self.message_type);
        buf.put_u16(self.length);
        buf.put_u32(self.teid);
        if self.flags.has_optional_block() {
            buf.put_u16(self.sequence.unwrap_or(0));
            buf.put_u8(0); // N-PDU number
            buf.put_u8(0); // next extension header type
        }
    }

    /// Decode a header from the front of `buf`, leaving the payload behind
    pub fn decode(buf: &mut Bytes) -> Result<Self, WireError> {
        if buf.len() < MANDATORY_HEADER_SIZE {
            return Err(WireError::Truncated {
                needed: MANDATORY_HEADER_SIZE,
                got: buf.len(),
            });
        }

        let first = buf.get_u8();
        let version = first >> VERSION_SHIFT;
        if version != GTP_VERSION {
            return Err(WireError::Version(version));
        }
        if first & RESERVED_BIT != 0 {
            return Err(WireError::Reserved);
        }
        let flags = GtpFlags::from_bits_truncate(first & FLAG_MASK);

        let message_type = buf.get_u8();
        if message_type != GPDU_MESSAGE_TYPE {
            return Err(WireError::MessageType(message_type));
        }

        let length = buf.get_u16();
        let teid = buf.get_u32();

        if length as usize != buf.len() {
            return Err(WireError::Length {
                declared: length as usize,
                actual: buf.len(),
            });
        }

        let mut sequence = None;
        if flags.has_optional_block() {
            if buf.len() < OPTIONAL_HEADER_SIZE {
                return Err(WireError::Truncated {
                    needed: MANDATORY_HEADER_SIZE + OPTIONAL_HEADER_SIZE,
                    got: MANDATORY_HEADER_SIZE + buf.len(),
                });
            }
            let seq = buf.get_u16();
            let _n_pdu = buf.get_u8();
            let _next_ext = buf.get_u8();
            if flags.contains(GtpFlags::SEQUENCE) {
                sequence = Some(seq);
            }
        }

        Ok(Self {
            flags,
            message_type,
            length,
            teid,
            sequence,
        })
    }

    /// Wrap a payload in a G-PDU header
    pub fn encapsulate(
        teid: u32,
        payload: &[u8],
        sequence: Option<u16>,
    ) -> Result<Bytes, WireError> {
        let header = Self::gpdu(teid, payload.len(), sequence)?;
        let mut buf = BytesMut::with_capacity(header.encoded_len() + payload.len());
        header.encode(&mut buf);
        buf.put_slice(payload);
        Ok(buf.freeze())
    }

    /// Strip the header from an encapsulated frame and check its TEID
    pub fn decapsulate(expected_teid: u32, frame: Bytes) -> Result<(Self, Bytes), WireError> {
        let mut buf = frame;
        let header = Self::decode(&mut buf)?;
        if header.teid != expected_teid {
            return Err(WireError::Teid {
                expected: expected_teid,
                got: header.teid,
            });
        }
        Ok((header, buf))
    }
}

/// Derive a stable, nonzero TEID from a tunnel id
pub fn derive_teid(tunnel_id: &str) -> u32 {
    let mut hasher = DefaultHasher::new();
    tunnel_id.hash(&mut hasher);
    let hash = hasher.finish();
    let teid = (hash ^ (hash >> 32)) as u32;
    if teid == 0 {
        1
    } else {
        teid
    }
}
