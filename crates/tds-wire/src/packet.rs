//! TDS packet header structures.
//!
//! Every logical message is fragmented into physical packets carrying an
//! 8-byte header. The header length field is big-endian; almost everything
//! else in TDS is little-endian.

use bytes::{Buf, BufMut};

use crate::{ProtocolError, Result};

/// Size of the packet header in bytes.
pub const PACKET_HEADER_SIZE: usize = 8;

/// Minimum negotiable packet size.
pub const MIN_PACKET_SIZE: usize = 512;

/// Maximum negotiable packet size.
pub const MAX_PACKET_SIZE: usize = 32768;

/// Default packet size for TDS 4.2 / 5.0 connections.
pub const DEFAULT_PACKET_SIZE: usize = 512;

/// Default packet size for TDS 7.0+ connections.
pub const DEFAULT_PACKET_SIZE_70: usize = 4096;

/// TDS packet types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// SQL batch (query text).
    Query = 1,
    /// TDS 4.2 / 5.0 login record.
    Login = 2,
    /// Remote procedure call.
    Rpc = 3,
    /// Server reply (token stream).
    Reply = 4,
    /// Cancel request (out of band).
    Cancel = 6,
    /// TDS 5.0 "normal" request (language / RPC / dynamic tokens).
    SybQuery = 15,
    /// TDS 7.0+ login record.
    MsLogin7 = 16,
    /// NTLM authentication continuation.
    NtlmAuth = 17,
    /// Pre-login negotiation (TDS 8.0).
    PreLogin = 18,
}

impl PacketType {
    /// Parse a packet type byte.
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::Query),
            2 => Ok(Self::Login),
            3 => Ok(Self::Rpc),
            4 => Ok(Self::Reply),
            6 => Ok(Self::Cancel),
            15 => Ok(Self::SybQuery),
            16 => Ok(Self::MsLogin7),
            17 => Ok(Self::NtlmAuth),
            18 => Ok(Self::PreLogin),
            other => Err(ProtocolError::InvalidPacketType(other)),
        }
    }
}

bitflags::bitflags! {
    /// Packet status flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PacketStatus: u8 {
        /// Last packet of the logical message.
        const END_OF_MESSAGE = 0x01;
        /// Server should ignore this message (sent with EOM on abort).
        const IGNORE = 0x02;
        /// Reset connection state before processing (TDS 7.1+).
        const RESET_CONNECTION = 0x08;
    }
}

impl PacketStatus {
    /// Status for an intermediate packet.
    pub const NORMAL: Self = Self::empty();
}

/// The 8-byte TDS packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Packet type.
    pub packet_type: PacketType,
    /// Status flags.
    pub status: PacketStatus,
    /// Total packet length including this header (big-endian on the wire).
    pub length: u16,
    /// Server process id; zero on client packets.
    pub spid: u16,
    /// Packet sequence number within the message.
    pub packet_id: u8,
    /// Window (unused, always zero).
    pub window: u8,
}

impl PacketHeader {
    /// Create a header with the given type, status and length.
    #[must_use]
    pub fn new(packet_type: PacketType, status: PacketStatus, length: u16) -> Self {
        Self {
            packet_type,
            status,
            length,
            spid: 0,
            packet_id: 1,
            window: 0,
        }
    }

    /// Check whether this packet ends its logical message.
    #[must_use]
    pub fn is_end_of_message(&self) -> bool {
        self.status.contains(PacketStatus::END_OF_MESSAGE)
    }

    /// Encode the header into a buffer.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u8(self.packet_type as u8);
        dst.put_u8(self.status.bits());
        dst.put_u16(self.length);
        dst.put_u16(self.spid);
        dst.put_u8(self.packet_id);
        dst.put_u8(self.window);
    }

    /// Decode a header from a buffer.
    pub fn decode(src: &mut impl Buf) -> Result<Self> {
        if src.remaining() < PACKET_HEADER_SIZE {
            return Err(ProtocolError::UnexpectedEof);
        }

        let packet_type = PacketType::from_u8(src.get_u8())?;
        let status = PacketStatus::from_bits_truncate(src.get_u8());
        let length = src.get_u16();
        let spid = src.get_u16();
        let packet_id = src.get_u8();
        let window = src.get_u8();

        if (length as usize) < PACKET_HEADER_SIZE {
            return Err(ProtocolError::InvalidField {
                field: "packet length",
                value: u64::from(length),
            });
        }

        Ok(Self {
            packet_type,
            status,
            length,
            spid,
            packet_id,
            window,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn header_round_trip() {
        let header = PacketHeader {
            packet_type: PacketType::SybQuery,
            status: PacketStatus::END_OF_MESSAGE,
            length: 512,
            spid: 0x1234,
            packet_id: 7,
            window: 0,
        };

        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), PACKET_HEADER_SIZE);
        // Length is big-endian.
        assert_eq!(&buf[2..4], &[0x02, 0x00]);

        let decoded = PacketHeader::decode(&mut buf.freeze()).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn rejects_unknown_packet_type() {
        assert!(matches!(
            PacketType::from_u8(0x2A),
            Err(ProtocolError::InvalidPacketType(0x2A))
        ));
    }

    #[test]
    fn rejects_undersized_length() {
        let raw = [1u8, 1, 0, 4, 0, 0, 1, 0];
        assert!(PacketHeader::decode(&mut &raw[..]).is_err());
    }

    #[test]
    fn legacy_packet_type_values() {
        assert_eq!(PacketType::Query as u8, 1);
        assert_eq!(PacketType::Login as u8, 2);
        assert_eq!(PacketType::Cancel as u8, 6);
        assert_eq!(PacketType::SybQuery as u8, 15);
        assert_eq!(PacketType::MsLogin7 as u8, 16);
        assert_eq!(PacketType::NtlmAuth as u8, 17);
    }
}
