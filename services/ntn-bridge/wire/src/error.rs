//! Wire protocol error types.

use thiserror::Error;

/// Tunnel header errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Buffer shorter than the header it claims to carry
    #[error("header truncated: need {needed} bytes, got {got}")]
    Truncated {
        /// Bytes required
        needed: usize,
        /// Bytes available
        got: usize,
    },

    /// Unsupported GTP version
    #[error("version unsupported: {0}")]
    Version(u8),

    /// Reserved bits nonzero
    #[error("reserved bits nonzero")]
    Reserved,

    /// Message type other than G-PDU
    #[error("unexpected message type {0:#04x}")]
    MessageType(u8),

    /// Length field disagrees with the buffer
    #[error("length mismatch: header says {declared}, buffer carries {actual}")]
    Length {
        /// Length field value
        declared: usize,
        /// Bytes actually present after the mandatory header
        actual: usize,
    },

    /// Payload too large for the 16-bit length field
    #[error("payload too large: {0} bytes")]
    Size(usize),

    /// TEID does not belong to the tunnel
    #[error("teid mismatch: expected {expected:#010x}, got {got:#010x}")]
    Teid {
        /// TEID bound to the tunnel
        expected: u32,
        /// TEID found in the header
        got: u32,
    },
}

/// Mesh control packet decoding errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Nothing to decode
    #[error("empty packet")]
    Empty,

    /// Packet shorter than the decoder requires
    #[error("{protocol} packet truncated: need {needed} bytes, got {got}")]
    Truncated {
        /// Protocol name
        protocol: &'static str,
        /// Bytes required
        needed: usize,
        /// Bytes available
        got: usize,
    },

    /// Message type not defined for the protocol
    #[error("{protocol} unknown message type {value}")]
    UnknownMessageType {
        /// Protocol name
        protocol: &'static str,
        /// Raw type value
        value: u8,
    },

    /// Internal length fields disagree with each other or with the buffer
    #[error("{protocol} inconsistent packet: {reason}")]
    Inconsistent {
        /// Protocol name
        protocol: &'static str,
        /// What did not add up
        reason: String,
    },
}
