//! TDS packet codec for tokio-util framing.

use bytes::{BufMut, BytesMut};
use tds_protocol::packet::{MAX_PACKET_SIZE, PACKET_HEADER_SIZE, PacketHeader};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CodecError;

/// A TDS packet with header and payload.
#[derive(Debug, Clone)]
pub struct Packet {
    /// Packet header.
    pub header: PacketHeader,
    /// Packet payload (header excluded).
    pub payload: BytesMut,
}

impl Packet {
    /// Create a new packet.
    #[must_use]
    pub fn new(header: PacketHeader, payload: BytesMut) -> Self {
        Self { header, payload }
    }

    /// Total size on the wire including the header.
    #[must_use]
    pub fn total_size(&self) -> usize {
        PACKET_HEADER_SIZE + self.payload.len()
    }

    /// Whether this packet terminates its message.
    #[must_use]
    pub fn is_end_of_message(&self) -> bool {
        self.header.is_end_of_message()
    }
}

/// Packet-level codec.
///
/// Decoding validates the header and waits for complete packets; encoding
/// stamps sequential packet ids. The id sequence restarts at 1 for every
/// request message via [`TdsCodec::reset_packet_id`].
pub struct TdsCodec {
    max_packet_size: usize,
    packet_id: u8,
}

impl TdsCodec {
    /// Create a codec accepting packets up to the protocol maximum.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_packet_size: MAX_PACKET_SIZE,
            packet_id: 1,
        }
    }

    /// Restart the packet id sequence for a new request message.
    pub fn reset_packet_id(&mut self) {
        self.packet_id = 1;
    }

    fn next_packet_id(&mut self) -> u8 {
        let id = self.packet_id;
        self.packet_id = self.packet_id.wrapping_add(1);
        id
    }
}

impl Default for TdsCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for TdsCodec {
    type Item = Packet;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < PACKET_HEADER_SIZE {
            return Ok(None);
        }

        // Length is big-endian at bytes 2..4.
        let length = u16::from_be_bytes([src[2], src[3]]) as usize;
        if length < PACKET_HEADER_SIZE {
            return Err(CodecError::InvalidHeader(
                tds_protocol::ProtocolError::InvalidPacketLength(length),
            ));
        }
        if length > self.max_packet_size {
            return Err(CodecError::PacketTooLarge {
                size: length,
                max: self.max_packet_size,
            });
        }

        if src.len() < length {
            src.reserve(length - src.len());
            return Ok(None);
        }

        let packet_bytes = src.split_to(length);
        let mut cursor = packet_bytes.as_ref();
        let header = PacketHeader::decode(&mut cursor)?;
        let payload = BytesMut::from(&packet_bytes[PACKET_HEADER_SIZE..]);

        tracing::trace!(
            packet_type = ?header.packet_type,
            length,
            eom = header.is_end_of_message(),
            "decoded packet"
        );

        Ok(Some(Packet::new(header, payload)))
    }
}

impl Encoder<Packet> for TdsCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let total_length = PACKET_HEADER_SIZE + item.payload.len();
        if total_length > self.max_packet_size {
            return Err(CodecError::PacketTooLarge {
                size: total_length,
                max: self.max_packet_size,
            });
        }

        dst.reserve(total_length);

        let mut header = item.header;
        header.length = total_length as u16;
        header.packet_id = self.next_packet_id();
        header.encode(dst);
        dst.put_slice(&item.payload);

        tracing::trace!(
            packet_type = ?header.packet_type,
            length = total_length,
            packet_id = header.packet_id,
            "encoded packet"
        );

        Ok(())
    }
}
