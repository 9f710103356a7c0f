//! Per-connection receive state used while reading client bytes.

use hps_common::error::{HpsError, HpsResult};

use crate::protocol::{PACKET_HEADER_LEN, PacketHeader};

/// Receive phase of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvPhase {
    /// Waiting for the rest of a packet header.
    Header {
        /// Header bytes still missing.
        missing: usize,
    },
    /// Header accepted, waiting for the rest of the body.
    Body {
        /// Accepted header.
        header: PacketHeader,
        /// Body bytes still missing.
        missing: usize,
    },
}

/// Streaming packet splitter for one connection.
///
/// Bytes arrive in arbitrary chunks. The decoder buffers them and hands out one complete
/// packet (header plus body) at a time; integrity checks happen later, in ingress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameDecoder {
    max_packet_len: usize,
    read_buffer: Vec<u8>,
}

impl FrameDecoder {
    /// Creates a decoder that rejects packets longer than `max_packet_len`.
    #[must_use]
    pub fn new(max_packet_len: u16) -> Self {
        Self {
            max_packet_len: usize::from(max_packet_len).max(PACKET_HEADER_LEN),
            read_buffer: Vec::new(),
        }
    }

    /// Appends newly received network bytes.
    pub fn feed_bytes(&mut self, bytes: &[u8]) {
        self.read_buffer.extend_from_slice(bytes);
    }

    /// Current receive phase.
    #[must_use]
    pub fn phase(&self) -> RecvPhase {
        match PacketHeader::decode(&self.read_buffer) {
            None => RecvPhase::Header {
                missing: PACKET_HEADER_LEN - self.read_buffer.len(),
            },
            Some(header) => RecvPhase::Body {
                header,
                missing: usize::from(header.total_length).saturating_sub(self.read_buffer.len()),
            },
        }
    }

    /// Tries to split one complete packet off the buffered bytes.
    ///
    /// Returns `Ok(None)` when more bytes are required.
    ///
    /// # Errors
    ///
    /// Returns `HpsError::Protocol` when the buffered header announces a length below the
    /// header size or above the configured maximum. The offending header stays buffered until
    /// [`FrameDecoder::recover_after_protocol_error`] discards it.
    pub fn try_pop_packet(&mut self) -> HpsResult<Option<Vec<u8>>> {
        let Some(header) = PacketHeader::decode(&self.read_buffer) else {
            return Ok(None);
        };
        let total = usize::from(header.total_length);
        if total < PACKET_HEADER_LEN || total > self.max_packet_len {
            return Err(HpsError::Protocol(format!(
                "packet length {total} outside {PACKET_HEADER_LEN}..={}",
                self.max_packet_len
            )));
        }
        if self.read_buffer.len() < total {
            return Ok(None);
        }
        let packet = self.read_buffer.drain(..total).collect::<Vec<_>>();
        Ok(Some(packet))
    }

    /// Drops the header that made [`FrameDecoder::try_pop_packet`] fail and returns to the
    /// header phase.
    ///
    /// Returns `true` when bytes were discarded.
    pub fn recover_after_protocol_error(&mut self) -> bool {
        if self.read_buffer.len() < PACKET_HEADER_LEN {
            return false;
        }
        let _ = self.read_buffer.drain(..PACKET_HEADER_LEN);
        true
    }

    /// Discards everything buffered. Used when a slot is handed to a new session.
    pub fn reset(&mut self) {
        self.read_buffer.clear();
    }

    /// Returns the number of bytes still waiting to be framed.
    #[must_use]
    pub fn pending_bytes(&self) -> usize {
        self.read_buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::{FrameDecoder, RecvPhase};
    use crate::protocol::{PacketHeader, encode_packet};
    use googletest::prelude::*;
    use rstest::rstest;

    #[rstest]
    fn decoder_assembles_packet_across_multiple_feeds() {
        let packet = encode_packet(5, b"hello").expect("packet should encode");
        let mut decoder = FrameDecoder::new(1024);

        decoder.feed_bytes(&packet[..3]);
        assert_that!(decoder.phase(), eq(RecvPhase::Header { missing: 5 }));
        assert_eq!(decoder.try_pop_packet(), Ok(None));

        decoder.feed_bytes(&packet[3..10]);
        let header = PacketHeader::decode(&packet).expect("header should decode");
        assert_that!(decoder.phase(), eq(RecvPhase::Body { header, missing: 3 }));
        assert_eq!(decoder.try_pop_packet(), Ok(None));

        decoder.feed_bytes(&packet[10..]);
        assert_eq!(decoder.try_pop_packet(), Ok(Some(packet)));
        assert_that!(decoder.pending_bytes(), eq(0));
    }

    #[rstest]
    fn decoder_keeps_remaining_bytes_for_next_packet() {
        let first = encode_packet(5, b"one").expect("packet should encode");
        let second = encode_packet(6, &[]).expect("packet should encode");
        let mut decoder = FrameDecoder::new(1024);
        decoder.feed_bytes(&[first.clone(), second.clone()].concat());

        assert_eq!(decoder.try_pop_packet(), Ok(Some(first)));
        assert_that!(decoder.pending_bytes(), eq(8));
        assert_eq!(decoder.try_pop_packet(), Ok(Some(second)));
        assert_eq!(decoder.try_pop_packet(), Ok(None));
    }

    #[rstest]
    #[case(0_u16)]
    #[case(7_u16)]
    #[case(2000_u16)]
    fn decoder_rejects_out_of_range_length(#[case] total_length: u16) {
        let mut decoder = FrameDecoder::new(1024);
        let header = PacketHeader {
            total_length,
            message_code: 5,
            crc32: 0,
        };
        decoder.feed_bytes(&header.encode());
        assert_that!(decoder.try_pop_packet().is_err(), eq(true));
    }

    #[rstest]
    fn decoder_recovers_after_bad_header() {
        let bad = PacketHeader {
            total_length: 3,
            message_code: 5,
            crc32: 0,
        };
        let good = encode_packet(6, b"ok").expect("packet should encode");
        let mut decoder = FrameDecoder::new(1024);
        decoder.feed_bytes(&bad.encode());
        decoder.feed_bytes(&good);

        assert_that!(decoder.try_pop_packet().is_err(), eq(true));
        assert_that!(decoder.recover_after_protocol_error(), eq(true));
        assert_eq!(decoder.try_pop_packet(), Ok(Some(good)));
    }

    #[rstest]
    fn reset_clears_partial_packet() {
        let mut decoder = FrameDecoder::new(1024);
        decoder.feed_bytes(&[0, 20, 0]);
        decoder.reset();
        assert_that!(decoder.pending_bytes(), eq(0));
        assert_that!(decoder.recover_after_protocol_error(), eq(false));
    }
}
