//! Logical message reassembly.
//!
//! A response can span many physical packets; only the final one carries
//! the end-of-message bit. The assembler buffers payloads until that bit
//! arrives, then hands the protocol layer one contiguous buffer. Token
//! boundaries do not align with packet boundaries, so the token reader
//! never sees anything smaller than a whole message.

use bytes::{Bytes, BytesMut};
use tds_wire::packet::{PacketStatus, PacketType};

use crate::packet_codec::Packet;

/// A complete logical message.
#[derive(Debug, Clone)]
pub struct Message {
    /// Packet type shared by every packet of the message.
    pub packet_type: PacketType,
    /// The concatenated payload.
    pub payload: Bytes,
}

impl Message {
    /// Build a message from a single end-of-message packet.
    #[must_use]
    pub fn from_packet(packet: Packet) -> Self {
        Self {
            packet_type: packet.header.packet_type,
            payload: packet.payload.freeze(),
        }
    }

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

/// Accumulates packets until an end-of-message bit completes a message.
#[derive(Debug, Default)]
pub struct MessageAssembler {
    buffer: BytesMut,
    packet_type: Option<PacketType>,
    packet_count: usize,
}

impl MessageAssembler {
    /// Create an empty assembler.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a packet; returns the completed message when this packet
    /// carried the end-of-message bit.
    pub fn push(&mut self, packet: Packet) -> Option<Message> {
        let packet_type = *self.packet_type.get_or_insert(packet.header.packet_type);

        self.buffer.extend_from_slice(&packet.payload);
        self.packet_count += 1;

        tracing::trace!(
            packet_type = ?packet.header.packet_type,
            packet_count = self.packet_count,
            buffer_len = self.buffer.len(),
            is_eom = packet.header.status.contains(PacketStatus::END_OF_MESSAGE),
            "assembling message"
        );

        if packet.header.status.contains(PacketStatus::END_OF_MESSAGE) {
            self.packet_type = None;
            self.packet_count = 0;
            Some(Message {
                packet_type,
                payload: self.buffer.split().freeze(),
            })
        } else {
            None
        }
    }

    /// Whether a partially assembled message is buffered.
    #[must_use]
    pub fn has_partial(&self) -> bool {
        self.packet_type.is_some()
    }

    /// Packets accumulated for the current message.
    #[must_use]
    pub fn packet_count(&self) -> usize {
        self.packet_count
    }

    /// Drop any partial message (cancel discards the current response).
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.packet_type = None;
        self.packet_count = 0;
    }
}
