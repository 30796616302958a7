//! Login payload builders for the four dialects.
//!
//! TDS 4.2 and 5.0 use a fixed-offset record of padded fields; 7.0 and 8.0
//! use the offset-table LOGIN7 record with an obfuscated password or an
//! NTLM negotiate block. TDS 8.0 connections additionally open with a
//! PRELOGIN exchange before the login record itself.

use bytes::{BufMut, Bytes, BytesMut};
use encoding_rs::Encoding;

use crate::codec;
use crate::ntlm;
use crate::packet::PacketType;
use crate::version::TdsVersion;
use crate::{ProtocolError, Result};

/// Everything a login record needs. Collected by the session layer from
/// its configuration; no field is interpreted here.
#[derive(Debug, Clone)]
pub struct LoginRequest {
    /// Client host name.
    pub host_name: String,
    /// Login user name.
    pub user: String,
    /// Login password.
    pub password: String,
    /// NT domain; non-empty switches TDS 7.0+ to NTLM authentication.
    pub domain: String,
    /// Target server name.
    pub server_name: String,
    /// Initial database.
    pub database: String,
    /// Application name reported to the server.
    pub app_name: String,
    /// Client library name.
    pub lib_name: String,
    /// Initial language.
    pub language: String,
    /// Narrow character set name (legacy dialects).
    pub charset: String,
    /// Client MAC address, 12 hex digits or empty.
    pub mac_address: String,
    /// Requested network packet size.
    pub packet_size: usize,
}

impl LoginRequest {
    /// Whether this login uses NTLM rather than SQL authentication.
    #[must_use]
    pub fn uses_ntlm(&self) -> bool {
        !self.domain.is_empty()
    }
}

/// Build the login payload for `version`; returns the packet type it must
/// be framed with.
pub fn build_login(
    req: &LoginRequest,
    version: TdsVersion,
    encoding: &'static Encoding,
) -> Result<(PacketType, Vec<u8>)> {
    match version {
        TdsVersion::V4_2 | TdsVersion::V5_0 => {
            Ok((PacketType::Login, build_legacy_login(req, version, encoding)?))
        }
        TdsVersion::V7_0 | TdsVersion::V8_0 => {
            Ok((PacketType::MsLogin7, build_login7(req, version)))
        }
    }
}

/// The fixed-offset TDS 4.2/5.0 login record.
fn build_legacy_login(
    req: &LoginRequest,
    version: TdsVersion,
    encoding: &'static Encoding,
) -> Result<Vec<u8>> {
    let mut out = BytesMut::with_capacity(600);

    codec::put_login_string(&mut out, &req.host_name, 30, encoding)?;
    codec::put_login_string(&mut out, &req.user, 30, encoding)?;
    codec::put_login_string(&mut out, &req.password, 30, encoding)?;
    codec::put_login_string(&mut out, "00000123", 30, encoding)?; // host process

    // Data representation bytes, fixed since the System 10 days.
    out.put_slice(&[
        3,  // int2 order
        1,  // int4 order
        6,  // char
        10, // float
        9,  // date
        1,  // notify on use db
        1,  // disallow dump/load and bulk insert
        0,  // sql interface
        0,  // network connection type
    ]);
    out.put_bytes(0, 7);

    codec::put_login_string(&mut out, &req.app_name, 30, encoding)?;
    codec::put_login_string(&mut out, &req.server_name, 30, encoding)?;

    // Remote password block: empty server entry, then the password again
    // in a 255-byte field.
    out.put_u8(0);
    out.put_u8(req.password.encode_utf16().count() as u8);
    let pwd = codec::encode_narrow(&req.password, encoding)?;
    let used = pwd.len().min(253);
    out.put_slice(&pwd[..used]);
    out.put_bytes(0, 253 - used);
    out.put_u8((used + 2) as u8);

    let ver = version.legacy_version_bytes();
    out.put_slice(&[ver[0], ver[1], 0, 0]);

    codec::put_login_string(&mut out, &req.lib_name, 10, encoding)?;

    // Program version.
    let prog = if version == TdsVersion::V5_0 { 5 } else { 6 };
    out.put_slice(&[prog, 0, 0, 0]);

    out.put_u8(0); // auto convert short
    out.put_u8(0x0D); // float4 representation
    out.put_u8(0x11); // date4 representation

    codec::put_login_string(&mut out, &req.language, 30, encoding)?;

    out.put_u8(1); // notify on language change
    out.put_u16_le(0); // security label hierarchy
    out.put_u8(0); // security encrypted
    out.put_bytes(0, 8); // security components
    out.put_u16_le(0); // security spare

    codec::put_login_string(&mut out, &req.charset, 30, encoding)?;
    out.put_u8(1); // notify on charset change
    codec::put_login_string(&mut out, &req.packet_size.to_string(), 6, encoding)?;

    if version == TdsVersion::V5_0 {
        out.put_bytes(0, 4);
        // Capability request: the fixed feature bitmap this client
        // understands.
        const CAPABILITIES: [u8; 18] = [
            0x01, 0x07, 0x03, 0x6D, 0x7F, 0xFF, 0xFF, 0xFF, 0xFE, 0x02, 0x07, 0x00, 0x00,
            0x0A, 0x68, 0x00, 0x00, 0x00,
        ];
        out.put_u8(0xE2);
        out.put_u16_le(CAPABILITIES.len() as u16);
        out.put_slice(&CAPABILITIES);
    } else {
        out.put_bytes(0, 8);
    }

    Ok(out.to_vec())
}

/// The offset-table LOGIN7 record (TDS 7.0/8.0).
fn build_login7(req: &LoginRequest, version: TdsVersion) -> Vec<u8> {
    let ntlm = req.uses_ntlm();
    let chars = |s: &str| s.encode_utf16().count();

    let client_len = chars(&req.host_name);
    let user_len = chars(&req.user);
    let password_len = chars(&req.password);
    let app_len = chars(&req.app_name);
    let server_len = chars(&req.server_name);
    let lib_len = chars(&req.lib_name);
    let language_len = chars(&req.language);
    let database_len = chars(&req.database);

    let auth_block = if ntlm {
        ntlm::negotiate_block(&req.domain)
    } else {
        Vec::new()
    };

    let mut pack_size = 86
        + 2 * (client_len + app_len + server_len + lib_len + database_len + language_len);
    if ntlm {
        pack_size += auth_block.len();
    } else {
        pack_size += 2 * (user_len + password_len);
    }

    let mut out = BytesMut::with_capacity(pack_size);
    out.put_u32_le(pack_size as u32);
    out.put_u32_le(version.login7_version());
    out.put_u32_le(req.packet_size as u32);
    out.put_u32_le(7); // client program version
    out.put_u32_le(123); // client process id
    out.put_u32_le(0); // connection id

    // Option flags 1: language warnings, database must exist, use warnings.
    out.put_u8(0x80 | 0x40 | 0x20);
    // Option flags 2: ODBC-style defaults, plus NT authentication.
    out.put_u8(if ntlm { 0x03 | 0x80 } else { 0x03 });
    out.put_u8(0); // sql type flag
    out.put_u8(0); // reserved
    out.put_bytes(0, 4); // time zone
    out.put_bytes(0, 4); // collation

    // The offset table: each entry is (byte offset, character count).
    fn entry(out: &mut BytesMut, pos: &mut usize, len: usize) {
        out.put_u16_le(*pos as u16);
        out.put_u16_le(len as u16);
        *pos += len * 2;
    }

    let mut pos = 86usize;
    entry(&mut out, &mut pos, client_len);
    if ntlm {
        // Credentials travel in the NTLM block instead.
        out.put_u16_le(pos as u16);
        out.put_u16_le(0);
        out.put_u16_le(pos as u16);
        out.put_u16_le(0);
    } else {
        entry(&mut out, &mut pos, user_len);
        entry(&mut out, &mut pos, password_len);
    }
    entry(&mut out, &mut pos, app_len);
    entry(&mut out, &mut pos, server_len);
    out.put_u16_le(0); // unused entry
    out.put_u16_le(0);
    entry(&mut out, &mut pos, lib_len);
    entry(&mut out, &mut pos, language_len);
    entry(&mut out, &mut pos, database_len);

    out.put_slice(&parse_mac_address(&req.mac_address));

    // NTLM block position and length (zero length for SQL auth).
    out.put_u16_le(pos as u16);
    out.put_u16_le(auth_block.len() as u16);
    out.put_u32_le(pack_size as u32); // next position

    codec::write_utf16_string(&mut out, &req.host_name);
    if !ntlm {
        codec::write_utf16_string(&mut out, &req.user);
        for unit in obfuscate_password(&req.password) {
            out.put_u16_le(unit);
        }
    }
    codec::write_utf16_string(&mut out, &req.app_name);
    codec::write_utf16_string(&mut out, &req.server_name);
    codec::write_utf16_string(&mut out, &req.lib_name);
    codec::write_utf16_string(&mut out, &req.language);
    codec::write_utf16_string(&mut out, &req.database);

    out.put_slice(&auth_block);
    out.to_vec()
}

/// Scramble a LOGIN7 password: XOR each UTF-16 unit with 0x5A5A, then swap
/// the nibbles of both bytes.
#[must_use]
pub fn obfuscate_password(password: &str) -> Vec<u16> {
    password
        .encode_utf16()
        .map(|c| {
            let c = c ^ 0x5A5A;
            ((c >> 4) & 0x0F0F) | ((c << 4) & 0xF0F0)
        })
        .collect()
}

fn parse_mac_address(mac: &str) -> [u8; 6] {
    let mut out = [0u8; 6];
    if mac.len() == 12 {
        for (i, byte) in out.iter_mut().enumerate() {
            match u8::from_str_radix(&mac[i * 2..i * 2 + 2], 16) {
                Ok(v) => *byte = v,
                Err(_) => return [0u8; 6],
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// PRELOGIN (TDS 8.0)
// ---------------------------------------------------------------------------

/// Encryption option values in the PRELOGIN exchange.
pub mod encryption {
    /// Encryption available but off.
    pub const OFF: u8 = 0x00;
    /// Encryption available and on.
    pub const ON: u8 = 0x01;
    /// Encryption not supported by this client.
    pub const NOT_SUPPORTED: u8 = 0x02;
    /// Encryption required.
    pub const REQUIRED: u8 = 0x03;
}

/// Server reply to a PRELOGIN request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreLoginResponse {
    /// Server version (major, minor, build).
    pub version: (u8, u8, u16),
    /// Negotiated encryption level.
    pub encryption: u8,
}

/// Build a PRELOGIN request: version and encryption option records.
#[must_use]
pub fn build_prelogin() -> Vec<u8> {
    // Two option records plus terminator; offsets are relative to the
    // start of the payload.
    let header_len = 2 * 5 + 1;
    let mut out = BytesMut::with_capacity(header_len + 7);

    out.put_u8(0x00); // VERSION
    out.put_u16(header_len as u16);
    out.put_u16(6);
    out.put_u8(0x01); // ENCRYPTION
    out.put_u16(header_len as u16 + 6);
    out.put_u16(1);
    out.put_u8(0xFF); // terminator

    out.put_slice(&[8, 0, 0, 0, 0, 0]); // client version 8.0.0
    out.put_u8(encryption::NOT_SUPPORTED);
    out.to_vec()
}

/// Parse the server's PRELOGIN reply.
pub fn parse_prelogin(payload: &Bytes) -> Result<PreLoginResponse> {
    let mut version = None;
    let mut enc = encryption::OFF;

    let mut options = payload.clone();
    loop {
        let token = codec::get_u8(&mut options)?;
        if token == 0xFF {
            break;
        }
        let offset = codec::get_u16_be(&mut options)? as usize;
        let len = codec::get_u16_be(&mut options)? as usize;
        if offset + len > payload.len() {
            return Err(ProtocolError::InvalidLength {
                length: offset + len,
                context: "prelogin option",
            });
        }
        let data = &payload[offset..offset + len];
        match token {
            0x00 if len >= 4 => {
                version = Some((data[0], data[1], u16::from_be_bytes([data[2], data[3]])));
            }
            0x01 if len >= 1 => {
                enc = data[0];
            }
            _ => {}
        }
    }

    Ok(PreLoginResponse {
        version: version.ok_or(ProtocolError::InvalidField {
            field: "prelogin version",
            value: 0,
        })?,
        encryption: enc,
    })
}
