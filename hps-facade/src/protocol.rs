//! Wire packet layout, CRC32 validation and internal message envelopes.
//!
//! ```text
//! +-------------------+-------------------+-------------+------------------+
//! | total_length: u16 | message_code: u16 | crc32: u32  | body: variable   |
//! +-------------------+-------------------+-------------+------------------+
//! ```
//!
//! All multi-byte fields are big-endian. `total_length` covers header and body, `crc32` covers
//! the body only and must be zero for header-only packets.

use hps_common::error::{HpsError, HpsResult};
use hps_common::ids::{ConnectionRef, MessageCode, SessionSequence};
use thiserror::Error;

/// Size of the on-wire packet header.
pub const PACKET_HEADER_LEN: usize = 8;

/// Decoded packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Header plus body length.
    pub total_length: u16,
    /// Business message code.
    pub message_code: MessageCode,
    /// CRC32 of the body, zero when there is no body.
    pub crc32: u32,
}

impl PacketHeader {
    /// Decodes the first [`PACKET_HEADER_LEN`] bytes of `bytes`.
    ///
    /// Returns `None` when fewer bytes are available.
    #[must_use]
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let header = bytes.get(..PACKET_HEADER_LEN)?;
        Some(Self {
            total_length: u16::from_be_bytes([header[0], header[1]]),
            message_code: u16::from_be_bytes([header[2], header[3]]),
            crc32: u32::from_be_bytes([header[4], header[5], header[6], header[7]]),
        })
    }

    /// Encodes the header in network byte order.
    #[must_use]
    pub fn encode(self) -> [u8; PACKET_HEADER_LEN] {
        let mut out = [0_u8; PACKET_HEADER_LEN];
        out[..2].copy_from_slice(&self.total_length.to_be_bytes());
        out[2..4].copy_from_slice(&self.message_code.to_be_bytes());
        out[4..].copy_from_slice(&self.crc32.to_be_bytes());
        out
    }

    /// Body length announced by `total_length`.
    #[must_use]
    pub fn body_len(self) -> usize {
        usize::from(self.total_length).saturating_sub(PACKET_HEADER_LEN)
    }
}

/// Internal routing header attached to every queued message. Never sent on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    /// Connection the message came from or is addressed to.
    pub connection: ConnectionRef,
    /// Session sequence of that connection when the message was queued.
    pub sequence: SessionSequence,
}

/// One complete packet received from a peer, waiting for validation and dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Originating connection and session.
    pub header: MessageHeader,
    /// Packet header plus body exactly as received.
    pub packet: Vec<u8>,
}

/// One encoded reply waiting in the send queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Target connection and the session the reply belongs to.
    pub header: MessageHeader,
    /// Packet header plus body ready for transmission.
    pub packet: Vec<u8>,
}

impl OutboundMessage {
    /// Encodes `body` under `message_code` and addresses it to `header`.
    ///
    /// # Errors
    ///
    /// Returns `HpsError::Protocol` when the packet would not fit `total_length`.
    pub fn new(header: MessageHeader, message_code: MessageCode, body: &[u8]) -> HpsResult<Self> {
        Ok(Self {
            header,
            packet: encode_packet(message_code, body)?,
        })
    }
}

/// CRC32 (IEEE) of a packet body.
#[must_use]
pub fn body_crc32(body: &[u8]) -> u32 {
    crc32fast::hash(body)
}

/// Builds one wire packet: header with length and CRC, followed by `body`.
///
/// # Errors
///
/// Returns `HpsError::Protocol` when header plus body exceeds `u16::MAX` bytes.
pub fn encode_packet(message_code: MessageCode, body: &[u8]) -> HpsResult<Vec<u8>> {
    let total = PACKET_HEADER_LEN.saturating_add(body.len());
    let total_length = u16::try_from(total)
        .map_err(|_| HpsError::Protocol(format!("packet of {total} bytes exceeds u16 length")))?;
    let crc32 = if body.is_empty() { 0 } else { body_crc32(body) };
    let header = PacketHeader {
        total_length,
        message_code,
        crc32,
    };

    let mut packet = Vec::with_capacity(total);
    packet.extend_from_slice(&header.encode());
    packet.extend_from_slice(body);
    Ok(packet)
}

/// Reasons a received packet fails integrity validation.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PacketRejection {
    /// Fewer bytes than one header.
    #[error("packet shorter than header")]
    Truncated,
    /// `total_length` disagrees with the bytes actually framed.
    #[error("packet length {declared} does not match {actual} received bytes")]
    LengthMismatch {
        /// Length from the header.
        declared: u16,
        /// Bytes present.
        actual: usize,
    },
    /// Header-only packet carrying a non-zero CRC.
    #[error("header-only packet carries non-zero crc {0:#010x}")]
    NonZeroEmptyCrc(u32),
    /// Body CRC differs from the header CRC.
    #[error("crc mismatch: header {expected:#010x}, body {actual:#010x}")]
    CrcMismatch {
        /// CRC carried by the header.
        expected: u32,
        /// CRC computed over the body.
        actual: u32,
    },
}

/// Packet that passed length and CRC checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatedPacket<'a> {
    /// Decoded header.
    pub header: PacketHeader,
    /// Body bytes, empty for header-only packets.
    pub body: &'a [u8],
}

/// Checks the length and CRC of one framed packet.
///
/// # Errors
///
/// Returns the first [`PacketRejection`] that applies.
pub fn validate_packet(packet: &[u8]) -> Result<ValidatedPacket<'_>, PacketRejection> {
    let header = PacketHeader::decode(packet).ok_or(PacketRejection::Truncated)?;
    if usize::from(header.total_length) != packet.len() {
        return Err(PacketRejection::LengthMismatch {
            declared: header.total_length,
            actual: packet.len(),
        });
    }

    let body = &packet[PACKET_HEADER_LEN..];
    if body.is_empty() {
        if header.crc32 != 0 {
            return Err(PacketRejection::NonZeroEmptyCrc(header.crc32));
        }
        return Ok(ValidatedPacket { header, body });
    }

    let actual = body_crc32(body);
    if actual != header.crc32 {
        return Err(PacketRejection::CrcMismatch {
            expected: header.crc32,
            actual,
        });
    }
    Ok(ValidatedPacket { header, body })
}

#[cfg(test)]
mod tests {
    use super::{
        PACKET_HEADER_LEN, PacketHeader, PacketRejection, body_crc32, encode_packet,
        validate_packet,
    };
    use googletest::prelude::*;
    use rstest::rstest;

    #[rstest]
    fn header_encodes_in_network_byte_order() {
        let header = PacketHeader {
            total_length: 0x0102,
            message_code: 0x0304,
            crc32: 0x0506_0708,
        };
        assert_eq!(header.encode(), [1, 2, 3, 4, 5, 6, 7, 8]);
        assert_that!(PacketHeader::decode(&header.encode()), eq(Some(header)));
    }

    #[rstest]
    fn crc_matches_reference_check_value() {
        assert_that!(body_crc32(b"123456789"), eq(0xCBF4_3926_u32));
    }

    #[rstest]
    fn header_only_packet_carries_zero_crc() {
        let packet = encode_packet(7, &[]).expect("empty packet should encode");
        assert_that!(packet.len(), eq(PACKET_HEADER_LEN));
        let validated = validate_packet(&packet).expect("header-only packet is valid");
        assert_that!(validated.header.crc32, eq(0));
        assert_that!(validated.body.is_empty(), eq(true));
    }

    #[rstest]
    fn header_only_packet_with_crc_is_rejected() {
        let mut packet = encode_packet(7, &[]).expect("empty packet should encode");
        packet[7] = 1;
        assert_that!(
            validate_packet(&packet).err(),
            eq(Some(PacketRejection::NonZeroEmptyCrc(1)))
        );
    }

    #[rstest]
    fn encoded_packet_carries_body_crc() {
        let body = b"hello world";
        let packet = encode_packet(5, body).expect("packet should encode");
        let header = PacketHeader::decode(&packet).expect("header should decode");
        assert_that!(usize::from(header.total_length), eq(PACKET_HEADER_LEN + body.len()));
        assert_that!(header.message_code, eq(5));
        assert_that!(header.crc32, eq(body_crc32(body)));
    }

    #[rstest]
    fn every_single_bit_flip_is_rejected() {
        let body = b"register:alice";
        let packet = encode_packet(5, body).expect("packet should encode");

        // Body bytes and the CRC field; the length and code fields have their own checks.
        for byte in 4..packet.len() {
            for bit in 0..8 {
                let mut corrupted = packet.clone();
                corrupted[byte] ^= 1 << bit;
                assert!(
                    validate_packet(&corrupted).is_err(),
                    "flip of byte {byte} bit {bit} was accepted"
                );
            }
        }
    }

    #[rstest]
    fn length_mismatch_is_rejected() {
        let mut packet = encode_packet(5, b"abc").expect("packet should encode");
        packet.push(0);
        assert_that!(
            validate_packet(&packet).err(),
            eq(Some(PacketRejection::LengthMismatch {
                declared: 11,
                actual: 12
            }))
        );
    }

    #[rstest]
    fn truncated_packet_is_rejected() {
        assert_that!(
            validate_packet(&[0, 8, 0]).err(),
            eq(Some(PacketRejection::Truncated))
        );
    }

    #[rstest]
    fn oversized_body_cannot_be_encoded() {
        let body = vec![0_u8; usize::from(u16::MAX)];
        assert_that!(encode_packet(5, &body).is_err(), eq(true));
    }
}
