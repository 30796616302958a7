//! SQL value model shared by the wire codec and the session layer.
//!
//! This crate is deliberately small: it defines the dynamically-typed
//! [`SqlValue`] that row decoding produces and parameter encoding consumes,
//! plus the conversion errors that can occur on the way in or out.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod value;

pub use error::TypeError;
pub use value::SqlValue;
