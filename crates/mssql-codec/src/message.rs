//! TDS message assembly and splitting.
//!
//! A message is a sequence of packets of one type terminated by a packet
//! with the `END_OF_MESSAGE` status. Inbound, [`MessageAssembler`] buffers
//! packets until the terminator arrives. Outbound, [`split_message`] chunks a
//! payload to the negotiated packet size, marks the last packet EOM, and
//! carries the RESET_CONNECTION status on the first packet when the session
//! is to be reset.

use bytes::{Bytes, BytesMut};
use tds_protocol::packet::{
    PACKET_HEADER_SIZE, PacketHeader, PacketStatus, PacketType,
};

use crate::packet_codec::Packet;

/// A complete TDS message reassembled from one or more packets.
#[derive(Debug, Clone)]
pub struct Message {
    /// The packet type shared by all packets of the message.
    pub packet_type: PacketType,
    /// The concatenated payload.
    pub payload: Bytes,
}

impl Message {
    /// Payload length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Reassembles packets into complete messages.
#[derive(Debug, Default)]
pub struct MessageAssembler {
    buffer: BytesMut,
    packet_type: Option<PacketType>,
}

impl MessageAssembler {
    /// Create an empty assembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a packet; returns the message when this packet completes one.
    pub fn push(&mut self, packet: Packet) -> Option<Message> {
        if self.packet_type.is_none() {
            self.packet_type = Some(packet.header.packet_type);
        }

        self.buffer.extend_from_slice(&packet.payload);

        tracing::trace!(
            packet_type = ?packet.header.packet_type,
            buffered = self.buffer.len(),
            eom = packet.is_end_of_message(),
            "assembling message"
        );

        if packet.is_end_of_message() {
            let packet_type = self.packet_type.take()?;
            Some(Message {
                packet_type,
                payload: self.buffer.split().freeze(),
            })
        } else {
            None
        }
    }

    /// Whether a partial message is buffered. Used to tell a clean close
    /// from a connection dropped mid-message.
    #[must_use]
    pub fn has_partial(&self) -> bool {
        self.packet_type.is_some()
    }

    /// Discard any partial message.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.packet_type = None;
    }
}

/// Split a message payload into packets of at most `packet_size` bytes.
///
/// The last packet is flagged EOM. With `reset_connection`, the first packet
/// additionally carries RESET_CONNECTION, asking the server to drop temp
/// tables, SET options and session state before processing the request.
#[must_use]
pub fn split_message(
    packet_type: PacketType,
    payload: Bytes,
    packet_size: usize,
    reset_connection: bool,
) -> Vec<Packet> {
    let max_payload = packet_size.saturating_sub(PACKET_HEADER_SIZE).max(1);

    // An empty payload still produces one EOM packet (empty batch ping,
    // ATTENTION).
    let chunk_count = payload.chunks(max_payload).count().max(1);
    let mut packets = Vec::with_capacity(chunk_count);

    for index in 0..chunk_count {
        let start = index * max_payload;
        let end = payload.len().min(start + max_payload);
        let chunk = &payload[start..end];

        let mut status = if index + 1 == chunk_count {
            PacketStatus::END_OF_MESSAGE
        } else {
            PacketStatus::NORMAL
        };
        if reset_connection && index == 0 {
            status |= PacketStatus::RESET_CONNECTION;
        }

        let header = PacketHeader::new(
            packet_type,
            status,
            (PACKET_HEADER_SIZE + chunk.len()) as u16,
        );
        packets.push(Packet::new(header, BytesMut::from(chunk)));
    }

    packets
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn packet(eom: bool, payload: &[u8]) -> Packet {
        let status = if eom {
            PacketStatus::END_OF_MESSAGE
        } else {
            PacketStatus::NORMAL
        };
        let header = PacketHeader::new(PacketType::TabularResult, status, 0);
        Packet::new(header, BytesMut::from(payload))
    }

    #[test]
    fn single_packet_message() {
        let mut assembler = MessageAssembler::new();
        let message = assembler.push(packet(true, b"hello")).expect("complete");
        assert_eq!(message.packet_type, PacketType::TabularResult);
        assert_eq!(&message.payload[..], b"hello");
        assert!(!assembler.has_partial());
    }

    #[test]
    fn multi_packet_message() {
        let mut assembler = MessageAssembler::new();
        assert!(assembler.push(packet(false, b"hello ")).is_none());
        assert!(assembler.has_partial());
        let message = assembler.push(packet(true, b"world")).expect("complete");
        assert_eq!(&message.payload[..], b"hello world");
        assert!(!assembler.has_partial());
    }

    #[test]
    fn split_respects_packet_size() {
        // 20-byte payload, 16-byte packets → 8 bytes of payload per packet.
        let payload = Bytes::from(vec![0xABu8; 20]);
        let packets = split_message(PacketType::SqlBatch, payload, 16, false);
        assert_eq!(packets.len(), 3);
        assert_eq!(packets[0].payload.len(), 8);
        assert_eq!(packets[1].payload.len(), 8);
        assert_eq!(packets[2].payload.len(), 4);
        assert!(!packets[0].is_end_of_message());
        assert!(!packets[1].is_end_of_message());
        assert!(packets[2].is_end_of_message());
    }

    #[test]
    fn split_sets_reset_on_first_packet_only() {
        let payload = Bytes::from(vec![0u8; 20]);
        let packets = split_message(PacketType::SqlBatch, payload, 16, true);
        assert!(packets[0].header.status.contains(PacketStatus::RESET_CONNECTION));
        for p in &packets[1..] {
            assert!(!p.header.status.contains(PacketStatus::RESET_CONNECTION));
        }
    }

    #[test]
    fn split_empty_payload_yields_single_eom_packet() {
        let packets = split_message(PacketType::Attention, Bytes::new(), 4096, false);
        assert_eq!(packets.len(), 1);
        assert!(packets[0].is_end_of_message());
        assert!(packets[0].payload.is_empty());
    }

    #[test]
    fn roundtrip_split_then_assemble() {
        let payload = Bytes::from((0..100u8).collect::<Vec<_>>());
        let packets = split_message(PacketType::SqlBatch, payload.clone(), 32, false);

        let mut assembler = MessageAssembler::new();
        let mut result = None;
        for p in packets {
            result = assembler.push(p);
        }
        assert_eq!(result.expect("complete").payload, payload);
    }
}
