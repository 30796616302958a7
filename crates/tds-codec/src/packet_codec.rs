//! TDS packet codec for tokio-util framing.

use bytes::{BufMut, BytesMut};
use tds_wire::packet::{MAX_PACKET_SIZE, PACKET_HEADER_SIZE, PacketHeader};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CodecError;

/// A single physical TDS packet: header plus payload.
#[derive(Debug, Clone)]
pub struct Packet {
    /// Packet header.
    pub header: PacketHeader,
    /// Payload, excluding the header.
    pub payload: BytesMut,
}

impl Packet {
    /// Create a packet from a header and payload.
    #[must_use]
    pub fn new(header: PacketHeader, payload: BytesMut) -> Self {
        Self { header, payload }
    }

    /// Total on-wire size including the header.
    #[must_use]
    pub fn total_size(&self) -> usize {
        PACKET_HEADER_SIZE + self.payload.len()
    }

    /// Whether this packet ends its logical message.
    #[must_use]
    pub fn is_end_of_message(&self) -> bool {
        self.header.is_end_of_message()
    }
}

/// Packet-level `Decoder`/`Encoder`.
///
/// The negotiated packet size limits both directions and can be raised or
/// lowered mid-session when the server announces a new size. Outgoing
/// packets are numbered 1..=255 with wrap-around that skips 0, matching
/// what both server families expect.
pub struct TdsCodec {
    /// Largest packet to accept or emit.
    max_packet_size: usize,
    /// Sequence number for the next outgoing packet.
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

    /// Create a codec with a custom maximum packet size.
    #[must_use]
    pub fn with_max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size.min(MAX_PACKET_SIZE);
        self
    }

    /// Apply a renegotiated packet size.
    pub fn set_max_packet_size(&mut self, size: usize) {
        self.max_packet_size = size.min(MAX_PACKET_SIZE);
    }

    /// The current maximum packet size.
    #[must_use]
    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }

    /// Take the next outgoing packet id.
    fn next_packet_id(&mut self) -> u8 {
        let id = self.packet_id;
        self.packet_id = self.packet_id.wrapping_add(1);
        if self.packet_id == 0 {
            self.packet_id = 1;
        }
        id
    }

    /// Restart packet numbering (a new logical message starts at 1).
    pub fn reset_packet_id(&mut self) {
        self.packet_id = 1;
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

        // Length lives at bytes 2..4, big-endian.
        let length = u16::from_be_bytes([src[2], src[3]]) as usize;

        if length < PACKET_HEADER_SIZE {
            return Err(CodecError::InvalidHeader);
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
            is_eom = header.is_end_of_message(),
            "decoded TDS packet"
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
            "encoded TDS packet"
        );

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tds_wire::packet::{PacketStatus, PacketType};

    #[test]
    fn decode_reply_packet() {
        let mut codec = TdsCodec::new();

        let mut data = BytesMut::new();
        data.put_u8(PacketType::Reply as u8);
        data.put_u8(PacketStatus::END_OF_MESSAGE.bits());
        data.put_u16(12); // 8 header + 4 payload
        data.put_u16(0);
        data.put_u8(1);
        data.put_u8(0);
        data.put_slice(b"test");

        let packet = codec.decode(&mut data).unwrap().unwrap();
        assert_eq!(packet.header.packet_type, PacketType::Reply);
        assert!(packet.header.is_end_of_message());
        assert_eq!(&packet.payload[..], b"test");
    }

    #[test]
    fn encode_sets_length_and_id() {
        let mut codec = TdsCodec::new();

        let header = PacketHeader::new(PacketType::Query, PacketStatus::END_OF_MESSAGE, 0);
        let packet = Packet::new(header, BytesMut::from(&b"test"[..]));

        let mut dst = BytesMut::new();
        codec.encode(packet, &mut dst).unwrap();

        assert_eq!(dst.len(), 12);
        assert_eq!(dst[0], PacketType::Query as u8);
        assert_eq!(&dst[2..4], &[0, 12]);
        assert_eq!(dst[6], 1);
    }

    #[test]
    fn incomplete_packet_waits_for_more() {
        let mut codec = TdsCodec::new();

        let mut data = BytesMut::new();
        data.put_u8(PacketType::Reply as u8);
        data.put_u8(PacketStatus::END_OF_MESSAGE.bits());
        data.put_u16(12); // claims 12 bytes, payload missing
        data.put_u16(0);
        data.put_u8(1);
        data.put_u8(0);

        assert!(codec.decode(&mut data).unwrap().is_none());
        assert_eq!(data.len(), PACKET_HEADER_SIZE);
    }

    #[test]
    fn oversize_packet_is_rejected() {
        let mut codec = TdsCodec::new().with_max_packet_size(512);

        let mut data = BytesMut::new();
        data.put_u8(PacketType::Reply as u8);
        data.put_u8(0);
        data.put_u16(1024);
        data.put_u16(0);
        data.put_u8(1);
        data.put_u8(0);

        assert!(matches!(
            codec.decode(&mut data),
            Err(CodecError::PacketTooLarge { size: 1024, max: 512 })
        ));
    }

    #[test]
    fn packet_id_wraps_past_255_skipping_zero() {
        let mut codec = TdsCodec::new();
        for _ in 0..254 {
            codec.next_packet_id();
        }
        assert_eq!(codec.next_packet_id(), 255);
        assert_eq!(codec.next_packet_id(), 1);
    }
}
