//! SQL batch and RPC request builders.
//!
//! Each dialect submits work differently: TDS 4.2 knows only the plain
//! query packet and a narrow-name RPC packet; TDS 5.0 wraps everything in
//! tokens (LANGUAGE, DBRPC, DYNAMIC) inside a "normal" packet, with
//! parameters carried by a PARAMFMT/PARAMS pair; TDS 7.0+ routes
//! parameterized SQL through `sp_executesql` over RPC, and TDS 8.0 can
//! replace well-known system procedure names with a two-byte id.
//!
//! Builders return the packet type and a fully assembled payload; the
//! transport layer fragments it into physical packets.

use bytes::{BufMut, BytesMut};
use encoding_rs::Encoding;
use tds_values::SqlValue;

use crate::collation::Collation;
use crate::data::{self, Parameter};
use crate::packet::PacketType;
use crate::typeinfo::WireType;
use crate::version::{ServerKind, TdsVersion};
use crate::{codec, ProtocolError, Result};

/// TDS 5.0 LANGUAGE token.
const TOKEN_LANGUAGE: u8 = 0x21;
/// TDS 5.0 logout token.
const TOKEN_LOGOUT: u8 = 0x71;
/// TDS 5.0 PARAMS token (parameter values).
const TOKEN_PARAMS: u8 = 0xD7;
/// TDS 5.0 DBRPC token (named procedure call).
const TOKEN_DBRPC: u8 = 0xE6;
/// TDS 5.0 DYNAMIC token (lightweight prepared statements).
const TOKEN_DYNAMIC: u8 = 0xE7;
/// TDS 5.0 PARAMFMT token (parameter descriptors).
const TOKEN_PARAM_FORMAT: u8 = 0xEC;

/// DYNAMIC token operation: prepare.
const DYN_PREPARE: u8 = 0x01;
/// DYNAMIC token operation: execute.
const DYN_EXECUTE: u8 = 0x02;

/// One unit of work to submit: SQL text, an optional procedure to call
/// instead, and the parameter list.
#[derive(Debug, Clone, Default)]
pub struct SqlRequest {
    /// The SQL text, with `?` parameter markers where values go.
    pub sql: String,
    /// Procedure to invoke; when set the SQL text is only used by the
    /// prepare paths.
    pub proc_name: Option<String>,
    /// Positional parameters matching the markers in `sql`.
    pub params: Vec<Parameter>,
    /// Ask the server to suppress column metadata it already sent for
    /// this statement.
    pub no_metadata: bool,
}

impl SqlRequest {
    /// A plain SQL batch.
    #[must_use]
    pub fn batch(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            ..Self::default()
        }
    }

    /// A procedure call.
    #[must_use]
    pub fn procedure(name: impl Into<String>, params: Vec<Parameter>) -> Self {
        Self {
            proc_name: Some(name.into()),
            params,
            ..Self::default()
        }
    }

    /// Parameterized SQL.
    #[must_use]
    pub fn with_params(sql: impl Into<String>, params: Vec<Parameter>) -> Self {
        Self {
            sql: sql.into(),
            params,
            ..Self::default()
        }
    }
}

/// Build the request payload for the session's dialect.
///
/// The request is taken by mutable reference because the TDS 7.0+ path
/// rewrites parameterized SQL into an `sp_executesql` call, prepending
/// the statement text and a declaration string to the parameter list.
pub fn build_request(
    req: &mut SqlRequest,
    version: TdsVersion,
    server: ServerKind,
    collation: Collation,
    encoding: &'static Encoding,
) -> Result<(PacketType, Vec<u8>)> {
    for param in &mut req.params {
        param.resolve(version)?;
    }

    match version {
        TdsVersion::V4_2 => build_request_42(req, version, server, collation, encoding),
        TdsVersion::V5_0 => build_request_50(req, version, server, collation, encoding),
        TdsVersion::V7_0 | TdsVersion::V8_0 => {
            build_request_70(req, version, server, collation, encoding)
        }
    }
}

/// TDS 4.2: RPC packet for procedure calls, query packet with client-side
/// literal substitution for everything else.
fn build_request_42(
    req: &SqlRequest,
    version: TdsVersion,
    server: ServerKind,
    collation: Collation,
    encoding: &'static Encoding,
) -> Result<(PacketType, Vec<u8>)> {
    let mut dst = BytesMut::new();

    if let Some(proc_name) = &req.proc_name {
        let name = codec::encode_narrow(proc_name, encoding)?;
        dst.put_u8(name.len() as u8);
        dst.put_slice(&name);
        dst.put_u16_le(if req.no_metadata { 512 } else { 0 });

        for param in &req.params {
            put_narrow_b_varchar(&mut dst, &param.name, encoding)?;
            dst.put_u8(u8::from(param.output));
            data::encode_param(&mut dst, param, version, server, collation, encoding)?;
        }
        return Ok((PacketType::Rpc, dst.to_vec()));
    }

    let sql = if req.params.is_empty() {
        req.sql.clone()
    } else {
        substitute_params(&req.sql, &req.params, version)?
    };
    dst.put_slice(&codec::encode_narrow(&sql, encoding)?);
    Ok((PacketType::Query, dst.to_vec()))
}

/// TDS 5.0: everything travels as tokens in a "normal" packet.
///
/// Text and image values cannot be passed as TDS 5.0 parameters; for
/// plain SQL they are substituted into the statement text instead, and a
/// procedure call carrying one fails locally.
fn build_request_50(
    req: &SqlRequest,
    version: TdsVersion,
    server: ServerKind,
    collation: Collation,
    encoding: &'static Encoding,
) -> Result<(PacketType, Vec<u8>)> {
    let mut params: &[Parameter] = &req.params;
    let mut sql = req.sql.clone();

    if params.iter().any(is_lob_param) {
        if req.proc_name.is_some() {
            return Err(ProtocolError::Violation(
                "text and image parameters cannot be passed to a procedure call",
            ));
        }
        sql = substitute_params(&sql, params, version)?;
        params = &[];
    }

    let have_params = !params.is_empty();
    let mut dst = BytesMut::new();

    let use_param_names = match &req.proc_name {
        None => {
            if have_params {
                sql = substitute_param_markers(&sql);
            }
            let buf = codec::encode_narrow(&sql, encoding)?;
            dst.put_u8(TOKEN_LANGUAGE);
            dst.put_u32_le(buf.len() as u32 + 1);
            dst.put_u8(u8::from(have_params));
            dst.put_slice(&buf);
            false
        }
        // Temporary procedures created by the lightweight prepare are
        // executed through the DYNAMIC token, addressed without the '#'.
        Some(proc_name) if proc_name.starts_with('#') => {
            let name = codec::encode_narrow(proc_name, encoding)?;
            dst.put_u8(TOKEN_DYNAMIC);
            dst.put_u16_le(name.len() as u16 + 4);
            dst.put_u8(DYN_EXECUTE);
            dst.put_u8(u8::from(have_params));
            dst.put_u8(name.len() as u8 - 1);
            dst.put_slice(&name[1..]);
            dst.put_u16_le(0);
            false
        }
        Some(proc_name) => {
            let name = codec::encode_narrow(proc_name, encoding)?;
            dst.put_u8(TOKEN_DBRPC);
            dst.put_u16_le(name.len() as u16 + 3);
            dst.put_u8(name.len() as u8);
            dst.put_slice(&name);
            dst.put_u16_le(if have_params { 2 } else { 0 });
            true
        }
    };

    if have_params {
        put_tds5_params(
            &mut dst,
            params,
            use_param_names,
            version,
            server,
            collation,
            encoding,
        )?;
    }

    Ok((PacketType::SybQuery, dst.to_vec()))
}

/// TDS 7.0/8.0: parameterized SQL is rewritten into an `sp_executesql`
/// call; procedure calls go out over RPC with wide names (or the TDS 8.0
/// two-byte id for well-known system procedures).
fn build_request_70(
    req: &mut SqlRequest,
    version: TdsVersion,
    server: ServerKind,
    collation: Collation,
    encoding: &'static Encoding,
) -> Result<(PacketType, Vec<u8>)> {
    if req.proc_name.is_none() && !req.params.is_empty() {
        let statement = substitute_param_markers(&req.sql);
        let declarations = param_definition(&req.params)?;

        let mut head = vec![
            Parameter::input(SqlValue::String(statement)),
            Parameter::input(SqlValue::String(declarations)),
        ];
        for param in &mut head {
            param.resolve(version)?;
        }
        head.append(&mut req.params);
        req.params = head;
        req.proc_name = Some("sp_executesql".to_owned());
    }

    let mut dst = BytesMut::new();

    if let Some(proc_name) = &req.proc_name {
        match sp_shortcut(proc_name).filter(|_| version == TdsVersion::V8_0) {
            Some(id) => {
                dst.put_u16_le(0xFFFF);
                dst.put_u16_le(id);
            }
            None => {
                dst.put_u16_le(proc_name.encode_utf16().count() as u16);
                codec::write_utf16_string(&mut dst, proc_name);
            }
        }
        dst.put_u16_le(if req.no_metadata { 512 } else { 0 });

        for param in &req.params {
            dst.put_u8(param.name.encode_utf16().count() as u8);
            codec::write_utf16_string(&mut dst, &param.name);
            dst.put_u8(u8::from(param.output));
            data::encode_param(&mut dst, param, version, server, collation, encoding)?;
        }
        return Ok((PacketType::Rpc, dst.to_vec()));
    }

    codec::write_utf16_string(&mut dst, &req.sql);
    Ok((PacketType::Query, dst.to_vec()))
}

/// TDS 5.0 PARAMFMT/PARAMS token pair.
fn put_tds5_params(
    dst: &mut BytesMut,
    params: &[Parameter],
    use_names: bool,
    version: TdsVersion,
    server: ServerKind,
    collation: Collation,
    encoding: &'static Encoding,
) -> Result<()> {
    let mut formats = Vec::with_capacity(params.len());
    let mut total = 2usize;
    for param in params {
        let mut fmt = BytesMut::new();
        if use_names {
            put_narrow_b_varchar(&mut fmt, &param.name, encoding)?;
        } else {
            fmt.put_u8(0);
        }
        fmt.put_u8(u8::from(param.output));
        fmt.put_i32_le(0); // user type
        data::encode_param_type(&mut fmt, param, version, collation)?;
        fmt.put_u8(0); // locale
        total += fmt.len();
        formats.push(fmt);
    }

    dst.put_u8(TOKEN_PARAM_FORMAT);
    dst.put_u16_le(total as u16);
    dst.put_u16_le(params.len() as u16);
    for fmt in formats {
        dst.put_slice(&fmt);
    }

    dst.put_u8(TOKEN_PARAMS);
    for param in params {
        data::encode_param_data(dst, param, server, encoding)?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Prepare
// ---------------------------------------------------------------------------

/// The `create proc` statement that prepares a statement as a temporary
/// stored procedure on SQL Server. Submitted as a plain batch; parameter
/// markers in the body become `@Pn` references.
pub fn prepare_proc_sql(sql: &str, proc_name: &str, params: &[Parameter]) -> Result<String> {
    let mut out = String::with_capacity(sql.len() + 64);
    out.push_str("create proc ");
    out.push_str(proc_name);
    out.push(' ');

    for (i, param) in params.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str("@P");
        out.push_str(&i.to_string());
        out.push(' ');
        out.push_str(&param.info()?.sql_declaration());
    }

    out.push_str(" as ");
    out.push_str(&substitute_param_markers(sql));
    Ok(out)
}

/// Build the TDS 5.0 lightweight prepare request.
///
/// The procedure name must be a temporary name of exactly 11 characters;
/// the server addresses it without the leading '#'. Returns `None` when a
/// text or image parameter makes the statement unpreparable, so the
/// caller can fall back to plain execution.
pub fn build_sybase_prepare(
    sql: &str,
    proc_name: &str,
    params: &[Parameter],
    encoding: &'static Encoding,
) -> Result<Option<(PacketType, Vec<u8>)>> {
    if sql.is_empty() {
        return Err(ProtocolError::Violation("cannot prepare an empty statement"));
    }
    if proc_name.len() != 11 || !proc_name.starts_with('#') {
        return Err(ProtocolError::Violation(
            "lightweight procedure names must be 11 characters starting with '#'",
        ));
    }
    if params.iter().any(is_lob_param) {
        return Ok(None);
    }

    let body = codec::encode_narrow(sql, encoding)?;
    let name = &proc_name.as_bytes()[1..];

    let mut dst = BytesMut::with_capacity(body.len() + 44);
    dst.put_u8(TOKEN_DYNAMIC);
    dst.put_u16_le(body.len() as u16 + 41);
    dst.put_u8(DYN_PREPARE);
    dst.put_u8(0);
    dst.put_u8(10);
    dst.put_slice(name);
    dst.put_u16_le(body.len() as u16 + 26);
    dst.put_slice(b"create proc ");
    dst.put_slice(name);
    dst.put_slice(b" as ");
    dst.put_slice(&body);

    Ok(Some((PacketType::SybQuery, dst.to_vec())))
}

/// The TDS 5.0 logout request sent before closing the stream.
#[must_use]
pub fn build_logout() -> (PacketType, Vec<u8>) {
    (PacketType::SybQuery, vec![TOKEN_LOGOUT, 0x00])
}

// ---------------------------------------------------------------------------
// SQL text manipulation
// ---------------------------------------------------------------------------

/// TDS 8.0 two-byte ids for the system procedures the protocol lets a
/// client address by number instead of by name.
#[must_use]
pub fn sp_shortcut(proc_name: &str) -> Option<u16> {
    // sp_execute (12) is deliberately absent: addressed by id the server
    // mishandles its parameter stream.
    let id = match proc_name {
        "sp_cursor" => 1,
        "sp_cursoropen" => 2,
        "sp_cursorprepare" => 3,
        "sp_cursorexecute" => 4,
        "sp_cursorprepexec" => 5,
        "sp_cursorunprepare" => 6,
        "sp_cursorfetch" => 7,
        "sp_cursoroption" => 8,
        "sp_cursorclose" => 9,
        "sp_executesql" => 10,
        "sp_prepare" => 11,
        "sp_prepexec" => 13,
        "sp_prepexecrpc" => 14,
        "sp_unprepare" => 15,
        _ => return None,
    };
    Some(id)
}

/// Replace each `?` parameter marker with a positional `@Pn` name.
///
/// Markers inside string literals, quoted identifiers and comments are
/// left alone.
#[must_use]
pub fn substitute_param_markers(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut index = 0usize;
    scan_sql(sql, |fragment| match fragment {
        Fragment::Marker => {
            out.push_str("@P");
            out.push_str(&index.to_string());
            index += 1;
        }
        Fragment::Text(text) => out.push_str(text),
    });
    out
}

/// Replace each `?` parameter marker with the corresponding value as a
/// SQL literal. This is the only parameter path TDS 4.2 queries have, and
/// the fallback for TDS 5.0 text/image values.
pub fn substitute_params(
    sql: &str,
    params: &[Parameter],
    version: TdsVersion,
) -> Result<String> {
    let mut out = String::with_capacity(sql.len() + params.len() * 16);
    let mut index = 0usize;
    let mut error = None;
    scan_sql(sql, |fragment| match fragment {
        Fragment::Marker => {
            match params.get(index) {
                Some(param) => out.push_str(&sql_literal(&param.value, version.is_wide())),
                None => error = Some(index + 1),
            }
            index += 1;
        }
        Fragment::Text(text) => out.push_str(text),
    });

    if error.is_some() || index != params.len() {
        return Err(ProtocolError::Violation(
            "parameter marker count does not match the parameter list",
        ));
    }
    Ok(out)
}

/// The `@P0 type,@P1 type` declaration string for `sp_executesql` and
/// `sp_prepare`.
pub fn param_definition(params: &[Parameter]) -> Result<String> {
    let mut out = String::with_capacity(params.len() * 16);
    for (i, param) in params.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push_str("@P");
        out.push_str(&i.to_string());
        out.push(' ');
        out.push_str(&param.info()?.sql_declaration());
        if param.output {
            out.push_str(" output");
        }
    }
    Ok(out)
}

fn is_lob_param(param: &Parameter) -> bool {
    matches!(
        param.info.as_ref().map(|i| i.wire_type),
        Some(WireType::Text | WireType::NText | WireType::Image | WireType::LongBinary)
    )
}

fn put_narrow_b_varchar(
    dst: &mut BytesMut,
    s: &str,
    encoding: &'static Encoding,
) -> Result<()> {
    if s.is_empty() {
        dst.put_u8(0);
        return Ok(());
    }
    let raw = codec::encode_narrow(s, encoding)?;
    dst.put_u8(raw.len() as u8);
    dst.put_slice(&raw);
    Ok(())
}

enum Fragment<'a> {
    /// A `?` parameter marker outside literals and comments.
    Marker,
    /// Everything else, passed through verbatim.
    Text(&'a str),
}

/// Walk SQL text, reporting parameter markers and the text between them.
/// Single-quoted strings, double-quoted and bracketed identifiers, `--`
/// line comments and `/* */` block comments are opaque.
fn scan_sql<'a>(sql: &'a str, mut emit: impl FnMut(Fragment<'a>)) {
    let bytes = sql.as_bytes();
    let mut start = 0usize;
    let mut pos = 0usize;

    while pos < bytes.len() {
        match bytes[pos] {
            b'?' => {
                if start < pos {
                    emit(Fragment::Text(&sql[start..pos]));
                }
                emit(Fragment::Marker);
                pos += 1;
                start = pos;
            }
            quote @ (b'\'' | b'"') => {
                pos += 1;
                while pos < bytes.len() {
                    if bytes[pos] == quote {
                        // Doubled quotes stay inside the literal.
                        if bytes.get(pos + 1) == Some(&quote) {
                            pos += 2;
                            continue;
                        }
                        pos += 1;
                        break;
                    }
                    pos += 1;
                }
            }
            b'[' => {
                pos += 1;
                while pos < bytes.len() && bytes[pos] != b']' {
                    pos += 1;
                }
                pos = (pos + 1).min(bytes.len());
            }
            b'-' if bytes.get(pos + 1) == Some(&b'-') => {
                while pos < bytes.len() && bytes[pos] != b'\n' {
                    pos += 1;
                }
            }
            b'/' if bytes.get(pos + 1) == Some(&b'*') => {
                pos += 2;
                while pos < bytes.len() {
                    if bytes[pos] == b'*' && bytes.get(pos + 1) == Some(&b'/') {
                        pos += 2;
                        break;
                    }
                    pos += 1;
                }
            }
            _ => pos += 1,
        }
    }

    if start < bytes.len() {
        emit(Fragment::Text(&sql[start..]));
    }
}

/// Render a value as a SQL literal for client-side substitution.
fn sql_literal(value: &SqlValue, wide: bool) -> String {
    match value {
        SqlValue::Null => "NULL".to_owned(),
        SqlValue::Bit(b) => if *b { "1" } else { "0" }.to_owned(),
        SqlValue::TinyInt(v) => v.to_string(),
        SqlValue::SmallInt(v) => v.to_string(),
        SqlValue::Int(v) => v.to_string(),
        SqlValue::BigInt(v) => v.to_string(),
        SqlValue::Real(v) => v.to_string(),
        SqlValue::Float(v) => v.to_string(),
        SqlValue::Decimal(v) => v.to_string(),
        SqlValue::String(s) => quote_string(s, wide),
        SqlValue::Binary(b) => {
            let mut out = String::with_capacity(2 + b.len() * 2);
            out.push_str("0x");
            for byte in b.iter() {
                out.push_str(&format!("{byte:02x}"));
            }
            out
        }
        SqlValue::DateTime(dt) => {
            format!("'{}'", dt.format("%Y-%m-%d %H:%M:%S%.3f"))
        }
        SqlValue::Guid(g) => format!("'{g}'"),
    }
}

fn quote_string(s: &str, wide: bool) -> String {
    let mut out = String::with_capacity(s.len() + 3);
    if wide {
        out.push('N');
    }
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push('\'');
        }
        out.push(c);
    }
    out.push('\'');
    out
}
