//! The response token stream reader.
//!
//! A server reply is a sequence of tagged tokens. [`ResponseCursor`] walks
//! one fully-assembled reply message and surfaces [`TokenResult`] events;
//! bookkeeping tokens (table names, column info joins, control tokens) are
//! consumed internally so callers only see semantically meaningful events.
//!
//! Token order within a reply is fixed by the server: metadata before rows,
//! rows before their completion token, one completion token per statement.
//! The cursor never reorders or buffers ahead beyond the events a single
//! token produces.

use std::collections::VecDeque;

use bytes::Bytes;
use encoding_rs::Encoding;
use tds_values::SqlValue;
use tracing::trace;

use crate::collation::Collation;
use crate::data;
use crate::diag::{Diagnostic, DiagnosticChain};
use crate::typeinfo::TypeInfo;
use crate::version::{ServerKind, TdsVersion};
use crate::{codec, ProtocolError, Result};

/// Every reply token tag the four dialects can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TokenType {
    /// TDS 5.0 wide parameter format.
    ParamFmt2 = 0x20,
    /// Language command (request direction only).
    Lang = 0x21,
    /// TDS 5.0 close acknowledgement.
    Close = 0x71,
    /// Stored procedure return status.
    ReturnStatus = 0x79,
    /// Procedure id (ignored).
    ProcId = 0x7C,
    /// TDS 7.0+ result-set metadata.
    Tds7Result = 0x81,
    /// TDS 7.0+ computed result metadata.
    Tds7ComputeResult = 0x88,
    /// TDS 4.2 column names.
    ColName = 0xA0,
    /// TDS 4.2 column formats.
    ColFmt = 0xA1,
    /// Table name list for column provenance.
    TabName = 0xA4,
    /// Column provenance details.
    ColInfo = 0xA5,
    /// Option command (ignored).
    OptionCmd = 0xA6,
    /// Computed result column names.
    ComputeNames = 0xA7,
    /// Computed result row.
    ComputeResult = 0xA8,
    /// ORDER BY column list (ignored).
    Order = 0xA9,
    /// Server error message.
    Error = 0xAA,
    /// Server informational message.
    Info = 0xAB,
    /// Output parameter value.
    Param = 0xAC,
    /// Login acknowledgement.
    LoginAck = 0xAD,
    /// Control token (ignored).
    Control = 0xAE,
    /// Data row.
    Row = 0xD1,
    /// Computed data row.
    AltRow = 0xD3,
    /// TDS 5.0 parameter values.
    Tds5Params = 0xD7,
    /// TDS 5.0 capability exchange.
    Capability = 0xE2,
    /// Environment change notification.
    EnvChange = 0xE3,
    /// TDS 5.0 extended error message.
    Msg50 = 0xE5,
    /// TDS 5.0 RPC (request direction only).
    DbRpc = 0xE6,
    /// TDS 5.0 dynamic statement acknowledgement.
    Tds5Dynamic = 0xE7,
    /// TDS 5.0 parameter format.
    Tds5ParamFmt = 0xEC,
    /// NTLM authentication challenge.
    Auth = 0xED,
    /// TDS 5.0 result-set metadata.
    Tds5Result = 0xEE,
    /// Statement completion.
    Done = 0xFD,
    /// Procedure completion.
    DoneProc = 0xFE,
    /// Statement-within-procedure completion.
    DoneInProc = 0xFF,
}

impl TokenType {
    /// Parse a token tag byte. Unknown tags are fatal: there is no way to
    /// know how many bytes the token occupies.
    pub fn from_u8(value: u8) -> Result<Self> {
        use TokenType::*;
        Ok(match value {
            0x20 => ParamFmt2,
            0x21 => Lang,
            0x71 => Close,
            0x79 => ReturnStatus,
            0x7C => ProcId,
            0x81 => Tds7Result,
            0x88 => Tds7ComputeResult,
            0xA0 => ColName,
            0xA1 => ColFmt,
            0xA4 => TabName,
            0xA5 => ColInfo,
            0xA6 => OptionCmd,
            0xA7 => ComputeNames,
            0xA8 => ComputeResult,
            0xA9 => Order,
            0xAA => Error,
            0xAB => Info,
            0xAC => Param,
            0xAD => LoginAck,
            0xAE => Control,
            0xD1 => Row,
            0xD3 => AltRow,
            0xD7 => Tds5Params,
            0xE2 => Capability,
            0xE3 => EnvChange,
            0xE5 => Msg50,
            0xE6 => DbRpc,
            0xE7 => Tds5Dynamic,
            0xEC => Tds5ParamFmt,
            0xED => Auth,
            0xEE => Tds5Result,
            0xFD => Done,
            0xFE => DoneProc,
            0xFF => DoneInProc,
            other => return Err(ProtocolError::InvalidTokenType(other)),
        })
    }
}

/// One column of a result set.
#[derive(Debug, Clone)]
pub struct ColumnDescriptor {
    /// Column name or label.
    pub name: String,
    /// Wire type descriptor.
    pub info: TypeInfo,
    /// Owning table, when the server reported provenance.
    pub table: Option<String>,
    /// Whether NULL is a legal value.
    pub nullable: bool,
    /// Part of the row identity key.
    pub key: bool,
    /// Hidden column (sent for keying, not selected).
    pub hidden: bool,
}

/// DONE/DONEPROC/DONEINPROC completion summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DoneToken {
    /// More results follow in this reply.
    pub more_results: bool,
    /// The statement failed.
    pub error: bool,
    /// This completion acknowledges a cancellation.
    pub cancelled: bool,
    /// Affected-row count, when the server reported a valid one.
    pub count: Option<i64>,
}

/// An environment change pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvChange {
    /// Current database changed.
    Database {
        /// New database name.
        new: String,
        /// Previous database name.
        old: String,
    },
    /// Session language changed.
    Language(String),
    /// Narrow character set changed (legacy dialects).
    Charset(String),
    /// Negotiated network packet size changed.
    PacketSize(usize),
    /// Locale id changed.
    Locale(String),
    /// Default collation changed (TDS 8.0).
    Collation(Collation),
}

/// Login acknowledgement details.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginAck {
    /// Interface byte (5 = accepted on TDS 5.0).
    pub interface: u8,
    /// Protocol version the server settled on.
    pub tds_version: [u8; 4],
    /// Server product name.
    pub product: String,
    /// Server product version (major, minor, build), when reported.
    pub server_version: Option<(u8, u8, u16)>,
}

/// One semantically meaningful event from the token stream.
#[derive(Debug, Clone)]
pub enum TokenResult {
    /// New result-set metadata.
    Columns(Vec<ColumnDescriptor>),
    /// A data row matching the last metadata.
    Row(Vec<SqlValue>),
    /// A completion token.
    Done(DoneToken),
    /// A server error or informational message.
    Message(Diagnostic),
    /// An environment change.
    EnvChange(EnvChange),
    /// Stored procedure return status.
    ReturnStatus(i32),
    /// An output parameter value.
    OutputParam {
        /// Parameter name as reported, may be empty.
        name: String,
        /// Decoded value.
        value: SqlValue,
    },
    /// NTLM challenge nonce: the login must answer before continuing.
    AuthChallenge([u8; 8]),
    /// Login acknowledgement.
    LoginAck(LoginAck),
    /// TDS 5.0 capability block.
    Capabilities(Bytes),
}

/// Walks the tokens of one fully-assembled reply message.
#[derive(Debug)]
pub struct ResponseCursor {
    buf: Bytes,
    version: TdsVersion,
    server: ServerKind,
    encoding: &'static Encoding,

    columns: Vec<ColumnDescriptor>,
    tables: Vec<String>,
    pending_names: Vec<String>,
    param_formats: Vec<(String, TypeInfo)>,
    pending: VecDeque<TokenResult>,

    diagnostics: DiagnosticChain,
    end_of_response: bool,
    end_of_results: bool,
    return_status: Option<i32>,
    params_seen: usize,
}

impl ResponseCursor {
    /// Cursor over one reply message.
    #[must_use]
    pub fn new(
        buf: Bytes,
        version: TdsVersion,
        server: ServerKind,
        encoding: &'static Encoding,
    ) -> Self {
        Self {
            buf,
            version,
            server,
            encoding,
            columns: Vec::new(),
            tables: Vec::new(),
            pending_names: Vec::new(),
            param_formats: Vec::new(),
            pending: VecDeque::new(),
            diagnostics: DiagnosticChain::new(),
            end_of_response: false,
            end_of_results: true,
            return_status: None,
            params_seen: 0,
        }
    }

    /// Columns of the current result set.
    #[must_use]
    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    /// Whether the final completion token has been read.
    #[must_use]
    pub fn end_of_response(&self) -> bool {
        self.end_of_response
    }

    /// The last stored procedure return status, if one arrived.
    #[must_use]
    pub fn return_status(&self) -> Option<i32> {
        self.return_status
    }

    /// How many output parameters have been surfaced so far.
    #[must_use]
    pub fn params_seen(&self) -> usize {
        self.params_seen
    }

    /// Diagnostics accumulated so far.
    #[must_use]
    pub fn diagnostics(&self) -> &DiagnosticChain {
        &self.diagnostics
    }

    /// Drain the accumulated diagnostics.
    pub fn take_diagnostics(&mut self) -> Vec<Diagnostic> {
        self.diagnostics.take()
    }

    /// Read tokens until one produces an event; `None` once the message is
    /// exhausted.
    pub fn next_token(&mut self) -> Result<Option<TokenResult>> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(Some(event));
            }
            if self.buf.is_empty() {
                return Ok(None);
            }

            let tag = TokenType::from_u8(codec::get_u8(&mut self.buf)?)?;
            trace!(token = ?tag, remaining = self.buf.len(), "token");

            let event = match tag {
                TokenType::Tds7Result => self.tds7_result()?,
                TokenType::Tds5Result => Some(self.tds5_result()?),
                TokenType::ColName => {
                    self.col_names()?;
                    None
                }
                TokenType::ColFmt => Some(self.col_formats()?),
                TokenType::Row => Some(self.row()?),
                TokenType::Done | TokenType::DoneProc | TokenType::DoneInProc => {
                    Some(self.done()?)
                }
                TokenType::Error => Some(self.server_message(true)?),
                TokenType::Info => Some(self.server_message(false)?),
                TokenType::Msg50 => Some(self.msg50()?),
                TokenType::EnvChange => self.env_change()?,
                TokenType::ReturnStatus => {
                    let status = codec::get_i32_le(&mut self.buf)?;
                    self.return_status = Some(status);
                    Some(TokenResult::ReturnStatus(status))
                }
                TokenType::Param => Some(self.output_param()?),
                TokenType::Tds5ParamFmt => {
                    self.tds5_param_fmt(false)?;
                    None
                }
                TokenType::ParamFmt2 => {
                    self.tds5_param_fmt(true)?;
                    None
                }
                TokenType::Tds5Params => {
                    self.tds5_params()?;
                    None
                }
                TokenType::TabName => {
                    self.tab_names()?;
                    None
                }
                TokenType::ColInfo => {
                    self.col_info()?;
                    None
                }
                TokenType::Auth => Some(self.auth_challenge()?),
                TokenType::LoginAck => Some(self.login_ack()?),
                TokenType::Capability => {
                    let len = codec::get_u16_le(&mut self.buf)? as usize;
                    Some(TokenResult::Capabilities(codec::get_bytes(
                        &mut self.buf,
                        len,
                    )?))
                }

                // Framed tokens with nothing the session needs.
                TokenType::Order
                | TokenType::Control
                | TokenType::OptionCmd
                | TokenType::Tds5Dynamic => {
                    let len = codec::get_u16_le(&mut self.buf)? as usize;
                    codec::skip(&mut self.buf, len)?;
                    None
                }
                TokenType::ProcId => {
                    codec::skip(&mut self.buf, 8)?;
                    None
                }
                TokenType::Close => {
                    codec::skip(&mut self.buf, 1)?;
                    None
                }

                TokenType::Tds7ComputeResult
                | TokenType::ComputeNames
                | TokenType::ComputeResult
                | TokenType::AltRow => {
                    return Err(ProtocolError::Violation(
                        "compute-by results are not supported",
                    ));
                }
                TokenType::Lang | TokenType::DbRpc => {
                    return Err(ProtocolError::InvalidTokenType(tag as u8));
                }
            };

            if let Some(event) = event {
                return Ok(Some(event));
            }
        }
    }

    fn framed(&mut self) -> Result<Bytes> {
        let len = codec::get_u16_le(&mut self.buf)? as usize;
        codec::get_bytes(&mut self.buf, len)
    }

    // -- metadata ----------------------------------------------------------

    /// TDS 7.0+ result metadata: column count then per-column descriptors.
    fn tds7_result(&mut self) -> Result<Option<TokenResult>> {
        self.end_of_results = false;
        let count = codec::get_u16_le(&mut self.buf)?;
        if count == 0xFFFF {
            // Metadata suppressed (noMetaData execution): the previous
            // descriptors stay in force.
            return Ok(None);
        }

        self.tables.clear();
        let mut columns = Vec::with_capacity(count as usize);
        for _ in 0..count {
            codec::skip(&mut self.buf, 2)?; // user type
            let flags = codec::get_u16_le(&mut self.buf)?;
            let info = TypeInfo::decode(&mut self.buf, self.version, self.encoding)?;
            let name = codec::read_b_varchar(&mut self.buf, true, self.encoding)?;
            columns.push(ColumnDescriptor {
                name,
                info,
                table: None,
                nullable: flags & 0x01 != 0,
                key: false,
                hidden: false,
            });
        }
        self.columns = columns;
        Ok(Some(TokenResult::Columns(self.columns.clone())))
    }

    /// TDS 5.0 result metadata.
    fn tds5_result(&mut self) -> Result<TokenResult> {
        self.end_of_results = false;
        let mut body = self.framed()?;
        let count = codec::get_u16_le(&mut body)?;

        self.tables.clear();
        let mut columns = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let name = codec::read_b_varchar(&mut body, false, self.encoding)?;
            let status = codec::get_u8(&mut body)?;
            codec::skip(&mut body, 4)?; // user type
            let info = TypeInfo::decode(&mut body, self.version, self.encoding)?;
            let locale = codec::get_u8(&mut body)? as usize;
            codec::skip(&mut body, locale)?;
            columns.push(ColumnDescriptor {
                name,
                info,
                table: None,
                nullable: status & 0x20 != 0,
                key: status & 0x02 != 0,
                hidden: status & 0x01 != 0,
            });
        }
        self.columns = columns;
        Ok(TokenResult::Columns(self.columns.clone()))
    }

    /// TDS 4.2 column names; formats follow in a separate token.
    fn col_names(&mut self) -> Result<()> {
        let mut body = self.framed()?;
        self.pending_names.clear();
        while !body.is_empty() {
            self.pending_names
                .push(codec::read_b_varchar(&mut body, false, self.encoding)?);
        }
        Ok(())
    }

    /// TDS 4.2 column formats, paired positionally with the names.
    fn col_formats(&mut self) -> Result<TokenResult> {
        self.end_of_results = false;
        let mut body = self.framed()?;

        self.tables.clear();
        let names = std::mem::take(&mut self.pending_names);
        let mut columns = Vec::with_capacity(names.len());
        for name in names {
            codec::skip(&mut body, 4)?; // user type
            let info = TypeInfo::decode(&mut body, self.version, self.encoding)?;
            // Legacy metadata has no flags; nullability rides on the
            // nullable wire types themselves.
            let nullable = info.wire_type.desc().precision.is_none();
            columns.push(ColumnDescriptor {
                name,
                info,
                table: None,
                nullable,
                key: false,
                hidden: false,
            });
        }
        self.columns = columns;
        Ok(TokenResult::Columns(self.columns.clone()))
    }

    // -- rows and completions ---------------------------------------------

    fn row(&mut self) -> Result<TokenResult> {
        let mut values = Vec::with_capacity(self.columns.len());
        for i in 0..self.columns.len() {
            let info = self.columns[i].info.clone();
            values.push(data::decode_value(
                &mut self.buf,
                &info,
                self.version,
                self.server,
                self.encoding,
            )?);
        }
        Ok(TokenResult::Row(values))
    }

    /// Completion token, with the row-count corrections: SQL Server
    /// opcode quirks, plus the both-family rule that the completion of an
    /// open result set never reports an update count.
    fn done(&mut self) -> Result<TokenResult> {
        const MORE_RESULTS: u8 = 0x01;
        const ERROR: u8 = 0x02;
        const ROW_COUNT: u8 = 0x10;
        const CANCELLED: u8 = 0x20;

        let mut status = codec::get_u8(&mut self.buf)?;
        codec::skip(&mut self.buf, 1)?;
        let operation = codec::get_u8(&mut self.buf)?;
        codec::skip(&mut self.buf, 1)?;
        let count = codec::get_i32_le(&mut self.buf)?;

        if self.server == ServerKind::SqlServer {
            // SQL Server sets the row-count bit in cases where the count is
            // meaningless, and clears it where it is not.
            if operation == 0xC1 {
                status &= !ROW_COUNT; // SELECT reports rows, not a count
            }
            if matches!(operation, 0xC6 | 0xC7 | 0xD8 | 0xDF) {
                status |= ROW_COUNT;
            }
        }

        // The completion closing an open result set carries the number of
        // rows already streamed, not an update count; both families
        // discard it.
        if !self.end_of_results {
            status &= !ROW_COUNT;
            self.end_of_results = true;
        }

        let cancelled = status & CANCELLED != 0;
        if cancelled {
            self.diagnostics.push(Diagnostic::cancelled());
        }

        let more_results = status & MORE_RESULTS != 0;
        if !more_results {
            self.end_of_response = true;
        }

        Ok(TokenResult::Done(DoneToken {
            more_results,
            error: status & ERROR != 0,
            cancelled,
            count: (status & ROW_COUNT != 0).then_some(i64::from(count)),
        }))
    }

    // -- messages and environment -----------------------------------------

    fn server_message(&mut self, is_error: bool) -> Result<TokenResult> {
        let mut body = self.framed()?;
        let wide = self.version.is_wide();

        let number = codec::get_i32_le(&mut body)?;
        let state = codec::get_u8(&mut body)?;
        let severity = codec::get_u8(&mut body)?;
        let message = codec::read_us_varchar(&mut body, wide, self.encoding)?;
        let server = codec::read_b_varchar(&mut body, wide, self.encoding)?;
        let procedure = codec::read_b_varchar(&mut body, wide, self.encoding)?;
        let line = codec::get_u16_le(&mut body)?;

        let diag = if is_error {
            Diagnostic::error(number, state, severity, message, server, procedure, line)
        } else {
            Diagnostic::info(number, state, severity, message, server, procedure, line)
        };
        self.diagnostics.push(diag.clone());
        Ok(TokenResult::Message(diag))
    }

    /// TDS 5.0 extended message: like ERROR/INFO with a SQLSTATE and
    /// transaction state wedged in.
    fn msg50(&mut self) -> Result<TokenResult> {
        let mut body = self.framed()?;

        let number = codec::get_i32_le(&mut body)?;
        let state = codec::get_u8(&mut body)?;
        let severity = codec::get_u8(&mut body)?;
        let sqlstate = codec::get_u8(&mut body)? as usize;
        codec::skip(&mut body, sqlstate)?;
        codec::skip(&mut body, 1)?; // has-eed flag
        codec::skip(&mut body, 2)?; // transaction state
        let message = codec::read_us_varchar(&mut body, false, self.encoding)?;
        let server = codec::read_b_varchar(&mut body, false, self.encoding)?;
        let procedure = codec::read_b_varchar(&mut body, false, self.encoding)?;
        let line = codec::get_u16_le(&mut body)?;

        let diag = if severity > 10 {
            Diagnostic::error(number, state, severity, message, server, procedure, line)
        } else {
            Diagnostic::info(number, state, severity, message, server, procedure, line)
        };
        self.diagnostics.push(diag.clone());
        Ok(TokenResult::Message(diag))
    }

    fn env_change(&mut self) -> Result<Option<TokenResult>> {
        let mut body = self.framed()?;
        let wide = self.version.is_wide();
        let kind = codec::get_u8(&mut body)?;

        let change = match kind {
            1 => {
                let new = codec::read_b_varchar(&mut body, wide, self.encoding)?;
                let old = codec::read_b_varchar(&mut body, wide, self.encoding)?;
                Some(EnvChange::Database { new, old })
            }
            2 => {
                let new = codec::read_b_varchar(&mut body, wide, self.encoding)?;
                Some(EnvChange::Language(new))
            }
            3 => {
                let new = codec::read_b_varchar(&mut body, wide, self.encoding)?;
                Some(EnvChange::Charset(new))
            }
            4 => {
                let new = codec::read_b_varchar(&mut body, wide, self.encoding)?;
                let size = new
                    .parse::<usize>()
                    .map_err(|_| ProtocolError::InvalidField {
                        field: "packet size",
                        value: 0,
                    })?;
                Some(EnvChange::PacketSize(size))
            }
            5 => {
                let new = codec::read_b_varchar(&mut body, wide, self.encoding)?;
                Some(EnvChange::Locale(new))
            }
            7 => {
                let len = codec::get_u8(&mut body)? as usize;
                if len >= 5 {
                    let mut raw = codec::get_bytes(&mut body, len)?;
                    Some(EnvChange::Collation(Collation::decode(&mut raw)?))
                } else {
                    None
                }
            }
            // Unknown sub-types are skipped wholesale (body is framed).
            _ => None,
        };

        Ok(change.map(TokenResult::EnvChange))
    }

    // -- parameters --------------------------------------------------------

    /// TDS 7.0+ output parameter token.
    fn output_param(&mut self) -> Result<TokenResult> {
        codec::skip(&mut self.buf, 2)?; // total length, not needed
        let name = codec::read_b_varchar(&mut self.buf, self.version.is_wide(), self.encoding)?;
        codec::skip(&mut self.buf, 5)?; // status byte + user type
        let info = TypeInfo::decode(&mut self.buf, self.version, self.encoding)?;
        let value = data::decode_value(
            &mut self.buf,
            &info,
            self.version,
            self.server,
            self.encoding,
        )?;
        self.params_seen += 1;
        Ok(TokenResult::OutputParam { name, value })
    }

    /// TDS 5.0 parameter formats; values follow in a PARAMS token.
    fn tds5_param_fmt(&mut self, wide_format: bool) -> Result<()> {
        let mut body = if wide_format {
            let len = codec::get_u32_le(&mut self.buf)? as usize;
            codec::get_bytes(&mut self.buf, len)?
        } else {
            self.framed()?
        };
        let count = codec::get_u16_le(&mut body)?;

        self.param_formats.clear();
        for _ in 0..count {
            let name = codec::read_b_varchar(&mut body, false, self.encoding)?;
            if wide_format {
                codec::skip(&mut body, 4)?; // status
            } else {
                codec::skip(&mut body, 1)?;
            }
            codec::skip(&mut body, 4)?; // user type
            let info = TypeInfo::decode(&mut body, self.version, self.encoding)?;
            let locale = codec::get_u8(&mut body)? as usize;
            codec::skip(&mut body, locale)?;
            self.param_formats.push((name, info));
        }
        Ok(())
    }

    /// TDS 5.0 parameter values, one per stored format.
    fn tds5_params(&mut self) -> Result<()> {
        if self.param_formats.is_empty() {
            return Err(ProtocolError::Violation(
                "parameter values without a preceding format token",
            ));
        }
        let formats = std::mem::take(&mut self.param_formats);
        for (name, info) in formats {
            let value = data::decode_value(
                &mut self.buf,
                &info,
                self.version,
                self.server,
                self.encoding,
            )?;
            self.params_seen += 1;
            self.pending
                .push_back(TokenResult::OutputParam { name, value });
        }
        Ok(())
    }

    // -- provenance --------------------------------------------------------

    /// Table name list; referenced positionally by the COLINFO that follows.
    fn tab_names(&mut self) -> Result<()> {
        let mut body = self.framed()?;
        self.tables.clear();

        while !body.is_empty() {
            let name = match self.version {
                TdsVersion::V8_0 => {
                    // Multi-part name: part count then each part.
                    let parts = codec::get_u8(&mut body)? as usize;
                    let mut joined = String::new();
                    for i in 0..parts {
                        if i > 0 {
                            joined.push('.');
                        }
                        joined.push_str(&codec::read_us_varchar(&mut body, true, self.encoding)?);
                    }
                    joined
                }
                TdsVersion::V7_0 => codec::read_us_varchar(&mut body, true, self.encoding)?,
                _ => codec::read_b_varchar(&mut body, false, self.encoding)?,
            };
            self.tables.push(name);
        }
        Ok(())
    }

    /// Per-column provenance joined against the table list.
    fn col_info(&mut self) -> Result<()> {
        let mut body = self.framed()?;
        if self.tables.is_empty() {
            // No table list arrived; nothing to join, skip the details.
            return Ok(());
        }

        while !body.is_empty() {
            let column = codec::get_u8(&mut body)? as usize;
            let table = codec::get_u8(&mut body)? as usize;
            let flags = codec::get_u8(&mut body)?;
            let real_name = if flags & 0x20 != 0 {
                Some(codec::read_b_varchar(
                    &mut body,
                    self.version.is_wide(),
                    self.encoding,
                )?)
            } else {
                None
            };

            if let Some(col) = self.columns.get_mut(column.wrapping_sub(1)) {
                col.table = self.tables.get(table.wrapping_sub(1)).cloned();
                col.key = flags & 0x08 != 0;
                col.hidden = flags & 0x10 != 0;
                if let Some(name) = real_name {
                    col.name = name;
                }
            }
        }
        Ok(())
    }

    // -- login-time tokens -------------------------------------------------

    /// NTLM challenge: validate the sequence number, extract the nonce.
    fn auth_challenge(&mut self) -> Result<TokenResult> {
        let mut body = self.framed()?;
        codec::skip(&mut body, 8)?; // "NTLMSSP\0"
        let seq = codec::get_i32_le(&mut body)?;
        if seq != 2 {
            return Err(ProtocolError::InvalidField {
                field: "ntlm message sequence",
                value: seq as u64,
            });
        }
        codec::skip(&mut body, 12)?; // target security buffer + flags
        let raw = codec::get_bytes(&mut body, 8)?;
        let mut nonce = [0u8; 8];
        nonce.copy_from_slice(&raw);
        Ok(TokenResult::AuthChallenge(nonce))
    }

    fn login_ack(&mut self) -> Result<TokenResult> {
        let mut body = self.framed()?;
        let interface = codec::get_u8(&mut body)?;
        let raw = codec::get_bytes(&mut body, 4)?;
        let mut tds_version = [0u8; 4];
        tds_version.copy_from_slice(&raw);
        let product = codec::read_b_varchar(&mut body, self.version.is_wide(), self.encoding)?;

        let server_version = if body.len() >= 4 {
            let major = codec::get_u8(&mut body)?;
            let minor = codec::get_u8(&mut body)?;
            let build = codec::get_u16_le(&mut body)?;
            Some((major, minor, build.swap_bytes()))
        } else {
            None
        };

        Ok(TokenResult::LoginAck(LoginAck {
            interface,
            tds_version,
            product,
            server_version,
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use bytes::{BufMut, BytesMut};

    const ENC: &encoding_rs::Encoding = encoding_rs::WINDOWS_1252;

    fn cursor(raw: Vec<u8>, version: TdsVersion, server: ServerKind) -> ResponseCursor {
        ResponseCursor::new(Bytes::from(raw), version, server, ENC)
    }

    fn put_wide(dst: &mut BytesMut, s: &str) {
        for unit in s.encode_utf16() {
            dst.put_u16_le(unit);
        }
    }

    /// 0x81 metadata for one int column named "n".
    fn tds7_int_column(dst: &mut BytesMut) {
        dst.put_u8(0x81);
        dst.put_u16_le(1); // column count
        dst.put_u16_le(0); // user type
        dst.put_u16_le(0x01); // flags: nullable
        dst.put_u8(0x38); // INT4
        dst.put_u8(1); // name length in chars
        put_wide(dst, "n");
    }

    fn done(dst: &mut BytesMut, tag: u8, status: u8, operation: u8, count: i32) {
        dst.put_u8(tag);
        dst.put_u8(status);
        dst.put_u8(0);
        dst.put_u8(operation);
        dst.put_u8(0);
        dst.put_i32_le(count);
    }

    #[test]
    fn result_set_in_order() {
        let mut raw = BytesMut::new();
        tds7_int_column(&mut raw);
        raw.put_u8(0xD1); // ROW
        raw.put_i32_le(42);
        done(&mut raw, 0xFD, 0x00, 0xC1, 0);

        let mut cur = cursor(raw.to_vec(), TdsVersion::V8_0, ServerKind::SqlServer);

        let cols = match cur.next_token().unwrap().unwrap() {
            TokenResult::Columns(cols) => cols,
            other => panic!("expected columns, got {other:?}"),
        };
        assert_eq!(cols.len(), 1);
        assert_eq!(cols[0].name, "n");
        assert!(cols[0].nullable);

        match cur.next_token().unwrap().unwrap() {
            TokenResult::Row(values) => assert_eq!(values, vec![SqlValue::Int(42)]),
            other => panic!("expected row, got {other:?}"),
        }

        match cur.next_token().unwrap().unwrap() {
            TokenResult::Done(d) => {
                assert!(!d.more_results);
                assert!(!d.cancelled);
            }
            other => panic!("expected done, got {other:?}"),
        }
        assert!(cur.end_of_response());
        assert!(cur.next_token().unwrap().is_none());
    }

    #[test]
    fn select_opcode_discards_count_on_sqlserver_only() {
        // SELECT completion with the row-count bit set and 3 "affected",
        // without any result set open.
        let mut raw = BytesMut::new();
        done(&mut raw, 0xFD, 0x10, 0xC1, 3);

        let mut cur = cursor(raw.to_vec(), TdsVersion::V7_0, ServerKind::SqlServer);
        match cur.next_token().unwrap().unwrap() {
            TokenResult::Done(d) => assert_eq!(d.count, None),
            other => panic!("expected done, got {other:?}"),
        }

        // The opcode rule is a SQL Server quirk; Sybase keeps the count.
        let mut raw = BytesMut::new();
        done(&mut raw, 0xFD, 0x10, 0xC1, 3);
        let mut cur = cursor(raw.to_vec(), TdsVersion::V5_0, ServerKind::Sybase);
        match cur.next_token().unwrap().unwrap() {
            TokenResult::Done(d) => assert_eq!(d.count, Some(3)),
            other => panic!("expected done, got {other:?}"),
        }
    }

    /// 0xEE metadata for one int column named "n".
    fn tds5_int_column(dst: &mut BytesMut) {
        dst.put_u8(0xEE);
        dst.put_u16_le(12); // framed length
        dst.put_u16_le(1); // column count
        dst.put_u8(1); // name length
        dst.put_u8(b'n');
        dst.put_u8(0x20); // status: nullable
        dst.put_u32_le(0); // user type
        dst.put_u8(0x26); // INTN
        dst.put_u8(4);
        dst.put_u8(0); // locale length
    }

    #[test]
    fn result_set_completion_discards_count_on_both_families() {
        // Sybase SELECT: metadata, one row, DONE with the count bit set.
        let mut raw = BytesMut::new();
        tds5_int_column(&mut raw);
        raw.put_u8(0xD1); // ROW
        raw.put_u8(4);
        raw.put_i32_le(42);
        done(&mut raw, 0xFD, 0x10, 0x00, 3);

        let mut cur = cursor(raw.to_vec(), TdsVersion::V5_0, ServerKind::Sybase);
        assert!(matches!(
            cur.next_token().unwrap().unwrap(),
            TokenResult::Columns(_)
        ));
        assert!(matches!(
            cur.next_token().unwrap().unwrap(),
            TokenResult::Row(_)
        ));
        match cur.next_token().unwrap().unwrap() {
            TokenResult::Done(d) => assert_eq!(d.count, None),
            other => panic!("expected done, got {other:?}"),
        }

        // Same shape on SQL Server.
        let mut raw = BytesMut::new();
        tds7_int_column(&mut raw);
        raw.put_u8(0xD1);
        raw.put_i32_le(42);
        done(&mut raw, 0xFD, 0x10, 0x00, 1);

        let mut cur = cursor(raw.to_vec(), TdsVersion::V8_0, ServerKind::SqlServer);
        assert!(matches!(
            cur.next_token().unwrap().unwrap(),
            TokenResult::Columns(_)
        ));
        assert!(matches!(
            cur.next_token().unwrap().unwrap(),
            TokenResult::Row(_)
        ));
        match cur.next_token().unwrap().unwrap() {
            TokenResult::Done(d) => assert_eq!(d.count, None),
            other => panic!("expected done, got {other:?}"),
        }
    }

    #[test]
    fn insert_count_is_reported() {
        let mut raw = BytesMut::new();
        done(&mut raw, 0xFF, 0x11, 0xC4, 1); // DONEINPROC, more results, insert

        let mut cur = cursor(raw.to_vec(), TdsVersion::V7_0, ServerKind::SqlServer);
        match cur.next_token().unwrap().unwrap() {
            TokenResult::Done(d) => {
                assert_eq!(d.count, Some(1));
                assert!(d.more_results);
            }
            other => panic!("expected done, got {other:?}"),
        }
        assert!(!cur.end_of_response());
    }

    #[test]
    fn update_count_survives_once_result_set_is_closed() {
        // SELECT result set, its closing DONE, then an INSERT completion:
        // only the first DONE loses its count.
        let mut raw = BytesMut::new();
        tds7_int_column(&mut raw);
        raw.put_u8(0xD1);
        raw.put_i32_le(42);
        done(&mut raw, 0xFF, 0x11, 0xC1, 1);
        done(&mut raw, 0xFF, 0x11, 0xC4, 7);

        let mut cur = cursor(raw.to_vec(), TdsVersion::V8_0, ServerKind::SqlServer);
        assert!(matches!(
            cur.next_token().unwrap().unwrap(),
            TokenResult::Columns(_)
        ));
        assert!(matches!(
            cur.next_token().unwrap().unwrap(),
            TokenResult::Row(_)
        ));
        match cur.next_token().unwrap().unwrap() {
            TokenResult::Done(d) => assert_eq!(d.count, None),
            other => panic!("expected done, got {other:?}"),
        }
        match cur.next_token().unwrap().unwrap() {
            TokenResult::Done(d) => assert_eq!(d.count, Some(7)),
            other => panic!("expected done, got {other:?}"),
        }
    }

    #[test]
    fn cancel_ack_raises_diagnostic() {
        let mut raw = BytesMut::new();
        done(&mut raw, 0xFD, 0x20, 0x00, 0);

        let mut cur = cursor(raw.to_vec(), TdsVersion::V8_0, ServerKind::SqlServer);
        match cur.next_token().unwrap().unwrap() {
            TokenResult::Done(d) => assert!(d.cancelled),
            other => panic!("expected done, got {other:?}"),
        }
        let diags = cur.take_diagnostics();
        assert_eq!(diags.len(), 1);
        assert_eq!(diags[0].number, 9999);
        assert_eq!(diags[0].severity, 14);
    }

    #[test]
    fn error_token_clamps_severity() {
        let mut body = BytesMut::new();
        body.put_i32_le(208);
        body.put_u8(1); // state
        body.put_u8(2); // severity below the error floor
        body.put_u16_le(2); // message chars
        put_wide(&mut body, "no");
        body.put_u8(1);
        put_wide(&mut body, "s"); // server
        body.put_u8(0); // procedure
        body.put_u16_le(4); // line

        let mut raw = BytesMut::new();
        raw.put_u8(0xAA);
        raw.put_u16_le(body.len() as u16);
        raw.extend_from_slice(&body);

        let mut cur = cursor(raw.to_vec(), TdsVersion::V7_0, ServerKind::SqlServer);
        match cur.next_token().unwrap().unwrap() {
            TokenResult::Message(d) => {
                assert_eq!(d.severity, 11);
                assert!(d.is_error());
                assert_eq!(d.number, 208);
                assert_eq!(d.line, 4);
            }
            other => panic!("expected message, got {other:?}"),
        }
        assert!(cur.diagnostics().first_error().is_some());
    }

    #[test]
    fn envchange_packet_size() {
        let mut body = BytesMut::new();
        body.put_u8(4); // packet size sub-type
        body.put_u8(4);
        put_wide(&mut body, "8192");
        body.put_u8(4);
        put_wide(&mut body, "4096");

        let mut raw = BytesMut::new();
        raw.put_u8(0xE3);
        raw.put_u16_le(body.len() as u16);
        raw.extend_from_slice(&body);

        let mut cur = cursor(raw.to_vec(), TdsVersion::V8_0, ServerKind::SqlServer);
        match cur.next_token().unwrap().unwrap() {
            TokenResult::EnvChange(EnvChange::PacketSize(size)) => assert_eq!(size, 8192),
            other => panic!("expected envchange, got {other:?}"),
        }
    }

    #[test]
    fn unknown_envchange_subtype_is_skipped() {
        let mut raw = BytesMut::new();
        raw.put_u8(0xE3);
        raw.put_u16_le(3);
        raw.put_u8(99); // unknown sub-type
        raw.put_u8(0xAB);
        raw.put_u8(0xCD);
        done(&mut raw, 0xFD, 0x00, 0x00, 0);

        let mut cur = cursor(raw.to_vec(), TdsVersion::V8_0, ServerKind::SqlServer);
        // The unknown change produces no event; the DONE is next.
        assert!(matches!(
            cur.next_token().unwrap().unwrap(),
            TokenResult::Done(_)
        ));
    }

    #[test]
    fn tabname_colinfo_join() {
        let mut raw = BytesMut::new();
        tds7_int_column(&mut raw);

        // TABNAME: one table, "dbo.t1" on the 7.0 single-name form.
        let mut body = BytesMut::new();
        body.put_u16_le(6);
        put_wide(&mut body, "dbo.t1");
        raw.put_u8(0xA4);
        raw.put_u16_le(body.len() as u16);
        raw.extend_from_slice(&body);

        // COLINFO: column 1 from table 1, key flag set.
        raw.put_u8(0xA5);
        raw.put_u16_le(3);
        raw.put_u8(1);
        raw.put_u8(1);
        raw.put_u8(0x08);

        done(&mut raw, 0xFD, 0x00, 0xC1, 0);

        let mut cur = cursor(raw.to_vec(), TdsVersion::V7_0, ServerKind::SqlServer);
        assert!(matches!(
            cur.next_token().unwrap().unwrap(),
            TokenResult::Columns(_)
        ));
        // The provenance tokens are consumed silently; DONE is next.
        assert!(matches!(
            cur.next_token().unwrap().unwrap(),
            TokenResult::Done(_)
        ));
        assert_eq!(cur.columns()[0].table.as_deref(), Some("dbo.t1"));
        assert!(cur.columns()[0].key);
    }

    #[test]
    fn colinfo_without_tabname_is_skipped() {
        let mut raw = BytesMut::new();
        tds7_int_column(&mut raw);
        raw.put_u8(0xA5);
        raw.put_u16_le(3);
        raw.put_u8(1);
        raw.put_u8(1);
        raw.put_u8(0x08);
        done(&mut raw, 0xFD, 0x00, 0xC1, 0);

        let mut cur = cursor(raw.to_vec(), TdsVersion::V7_0, ServerKind::SqlServer);
        assert!(matches!(
            cur.next_token().unwrap().unwrap(),
            TokenResult::Columns(_)
        ));
        assert!(matches!(
            cur.next_token().unwrap().unwrap(),
            TokenResult::Done(_)
        ));
        assert!(cur.columns()[0].table.is_none());
        assert!(!cur.columns()[0].key);
    }

    #[test]
    fn auth_challenge_sequence_enforced() {
        let mut body = BytesMut::new();
        body.put_slice(b"NTLMSSP\0");
        body.put_i32_le(2);
        body.put_slice(&[0u8; 12]);
        body.put_slice(&[0xD9, 0x90, 0xED, 0xAF, 0x94, 0x17, 0x36, 0xAF]);

        let mut raw = BytesMut::new();
        raw.put_u8(0xED);
        raw.put_u16_le(body.len() as u16);
        raw.extend_from_slice(&body);

        let mut cur = cursor(raw.to_vec(), TdsVersion::V8_0, ServerKind::SqlServer);
        match cur.next_token().unwrap().unwrap() {
            TokenResult::AuthChallenge(nonce) => {
                assert_eq!(nonce, [0xD9, 0x90, 0xED, 0xAF, 0x94, 0x17, 0x36, 0xAF]);
            }
            other => panic!("expected challenge, got {other:?}"),
        }

        // Wrong sequence number is a protocol error.
        let mut body = BytesMut::new();
        body.put_slice(b"NTLMSSP\0");
        body.put_i32_le(3);
        body.put_slice(&[0u8; 20]);
        let mut raw = BytesMut::new();
        raw.put_u8(0xED);
        raw.put_u16_le(body.len() as u16);
        raw.extend_from_slice(&body);
        let mut cur = cursor(raw.to_vec(), TdsVersion::V8_0, ServerKind::SqlServer);
        assert!(cur.next_token().is_err());
    }

    #[test]
    fn return_status_and_output_param() {
        let mut raw = BytesMut::new();
        raw.put_u8(0x79);
        raw.put_i32_le(0);

        // PARAM: name "@out", int value 5.
        let mut body = BytesMut::new();
        body.put_u8(4);
        put_wide(&mut body, "@out");
        body.put_slice(&[0u8; 5]); // status + user type
        body.put_u8(0x26); // INTN
        body.put_u8(4);
        body.put_u8(4);
        body.put_i32_le(5);
        raw.put_u8(0xAC);
        raw.put_u16_le(body.len() as u16);
        raw.extend_from_slice(&body);

        let mut cur = cursor(raw.to_vec(), TdsVersion::V8_0, ServerKind::SqlServer);
        assert!(matches!(
            cur.next_token().unwrap().unwrap(),
            TokenResult::ReturnStatus(0)
        ));
        match cur.next_token().unwrap().unwrap() {
            TokenResult::OutputParam { name, value } => {
                assert_eq!(name, "@out");
                assert_eq!(value, SqlValue::Int(5));
            }
            other => panic!("expected output param, got {other:?}"),
        }
        assert_eq!(cur.return_status(), Some(0));
        assert_eq!(cur.params_seen(), 1);
    }

    #[test]
    fn tds5_paramfmt_and_params() {
        let mut raw = BytesMut::new();

        // PARAMFMT: one unnamed int parameter.
        let mut body = BytesMut::new();
        body.put_u16_le(1); // count
        body.put_u8(0); // no name
        body.put_u8(0); // status
        body.put_u32_le(0); // user type
        body.put_u8(0x26); // INTN
        body.put_u8(4);
        body.put_u8(0); // no locale
        raw.put_u8(0xEC);
        raw.put_u16_le(body.len() as u16);
        raw.extend_from_slice(&body);

        // PARAMS: the value.
        raw.put_u8(0xD7);
        raw.put_u8(4);
        raw.put_i32_le(99);

        let mut cur = cursor(raw.to_vec(), TdsVersion::V5_0, ServerKind::Sybase);
        match cur.next_token().unwrap().unwrap() {
            TokenResult::OutputParam { value, .. } => assert_eq!(value, SqlValue::Int(99)),
            other => panic!("expected output param, got {other:?}"),
        }
    }

    #[test]
    fn unknown_token_is_fatal() {
        let mut cur = cursor(vec![0x99], TdsVersion::V7_0, ServerKind::SqlServer);
        assert!(matches!(
            cur.next_token(),
            Err(ProtocolError::InvalidTokenType(0x99))
        ));
    }
}
