//! # tds-codec
//!
//! Async framing layer between a byte transport and the TDS protocol
//! engine.
//!
//! TDS fragments every logical message into physical packets of the
//! negotiated size, each with an 8-byte header; the final packet carries
//! the end-of-message status bit. This crate turns a raw stream into
//! those packets and back:
//!
//! - [`TdsCodec`]: tokio-util `Decoder`/`Encoder` for single packets;
//! - [`MessageAssembler`] / [`Message`]: reassembly of a logical message
//!   from its packet run;
//! - [`Connection`]: split-I/O wrapper that reads whole messages, chunks
//!   outgoing payloads at the negotiated packet size and applies size
//!   renegotiation live;
//! - [`CancelHandle`]: shares the write half so a cancel packet can be
//!   sent while a read of the current response is still in progress.
//!
//! The protocol engine itself (`tds-wire`) never touches I/O; everything
//! async lives here and in the session layer above.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod connection;
pub mod error;
pub mod framed;
pub mod message;
pub mod packet_codec;

pub use connection::{CancelHandle, Connection};
pub use error::CodecError;
pub use framed::{PacketReader, PacketWriter};
pub use message::{Message, MessageAssembler};
pub use packet_codec::{Packet, TdsCodec};
