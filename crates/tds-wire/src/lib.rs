//! TDS wire protocol engine for Microsoft SQL Server and Sybase ASE.
//!
//! This crate implements the byte-exact client side of the Tabular Data
//! Stream protocol across the four historical dialects (TDS 4.2, 5.0, 7.0
//! and 8.0):
//!
//! - packet framing structures ([`packet`]);
//! - byte-stream primitives and string codecs ([`codec`]);
//! - the wire type descriptor table ([`typeinfo`]);
//! - the value codec for row and parameter data ([`data`], [`datetime`],
//!   [`numeric`]);
//! - the response token stream reader ([`token`]);
//! - login payload builders for all four dialects plus NTLM
//!   challenge/response ([`login`], [`ntlm`]);
//! - SQL batch and RPC request builders ([`request`]).
//!
//! Network I/O lives elsewhere: everything here encodes into or decodes
//! from [`bytes`] buffers, which keeps the protocol logic synchronous and
//! directly testable against captured byte sequences.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod collation;
pub mod data;
pub mod datetime;
pub mod diag;
mod error;
pub mod login;
pub mod ntlm;
pub mod numeric;
pub mod packet;
pub mod request;
pub mod token;
pub mod typeinfo;
pub mod version;

pub use error::ProtocolError;

/// Result alias used throughout the protocol layer.
pub type Result<T> = std::result::Result<T, ProtocolError>;
