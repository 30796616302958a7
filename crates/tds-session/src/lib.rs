//! # tds-session
//!
//! Session orchestration on top of the TDS wire engine: the login
//! handshake (including the NTLM challenge round-trip and, on TDS 8.0,
//! the PreLogin exchange), request dispatch for all four dialects,
//! response iteration, batch execution, cooperative cancellation and
//! statement preparation.
//!
//! The session owns a split-I/O [`tds_codec::Connection`] and enforces
//! the protocol's cardinal rule: one request at a time, its response
//! drained before the next request goes out. Cancellation is the only
//! out-of-band operation and travels through a [`tds_codec::CancelHandle`].

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod session;

pub use config::{PrepareStrategy, SessionConfig};
pub use error::{Error, Result};
pub use session::{BatchOutcome, PreparedStatement, Session, SessionEvent};

pub use tds_values::SqlValue;
pub use tds_wire::data::Parameter;
pub use tds_wire::request::SqlRequest;
pub use tds_wire::version::{ServerKind, TdsVersion};
