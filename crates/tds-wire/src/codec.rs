//! Byte-stream primitives.
//!
//! Checked reads over [`Bytes`] plus the two length-prefixed string shapes
//! the protocol uses everywhere:
//!
//! - `B_VARCHAR`: one-byte character count followed by the characters;
//! - `US_VARCHAR`: two-byte (LE) character count followed by the characters.
//!
//! "Characters" are bytes in the configured code page on TDS 4.2/5.0 and
//! UTF-16LE code units on TDS 7.0+; callers pass the dialect-derived
//! `wide` flag and the session encoding.

use bytes::{Buf, BufMut, Bytes};
use encoding_rs::Encoding;

use crate::{ProtocolError, Result};

/// Fail with [`ProtocolError::UnexpectedEof`] unless `n` bytes remain.
pub fn ensure(buf: &Bytes, n: usize) -> Result<()> {
    if buf.remaining() < n {
        Err(ProtocolError::UnexpectedEof)
    } else {
        Ok(())
    }
}

/// Read a single byte.
pub fn get_u8(buf: &mut Bytes) -> Result<u8> {
    ensure(buf, 1)?;
    Ok(buf.get_u8())
}

/// Non-consuming look at the next byte, used for token dispatch decisions.
pub fn peek_u8(buf: &Bytes) -> Result<u8> {
    buf.first().copied().ok_or(ProtocolError::UnexpectedEof)
}

/// Read a little-endian u16.
pub fn get_u16_le(buf: &mut Bytes) -> Result<u16> {
    ensure(buf, 2)?;
    Ok(buf.get_u16_le())
}

/// Read a big-endian u16 (packet headers and PRELOGIN offsets).
pub fn get_u16_be(buf: &mut Bytes) -> Result<u16> {
    ensure(buf, 2)?;
    Ok(buf.get_u16())
}

/// Read a little-endian i16.
pub fn get_i16_le(buf: &mut Bytes) -> Result<i16> {
    ensure(buf, 2)?;
    Ok(buf.get_i16_le())
}

/// Read a little-endian u32.
pub fn get_u32_le(buf: &mut Bytes) -> Result<u32> {
    ensure(buf, 4)?;
    Ok(buf.get_u32_le())
}

/// Read a little-endian i32.
pub fn get_i32_le(buf: &mut Bytes) -> Result<i32> {
    ensure(buf, 4)?;
    Ok(buf.get_i32_le())
}

/// Read a little-endian u64.
pub fn get_u64_le(buf: &mut Bytes) -> Result<u64> {
    ensure(buf, 8)?;
    Ok(buf.get_u64_le())
}

/// Read a little-endian i64.
pub fn get_i64_le(buf: &mut Bytes) -> Result<i64> {
    ensure(buf, 8)?;
    Ok(buf.get_i64_le())
}

/// Read `n` raw bytes.
pub fn get_bytes(buf: &mut Bytes, n: usize) -> Result<Bytes> {
    ensure(buf, n)?;
    Ok(buf.split_to(n))
}

/// Discard `n` bytes.
pub fn skip(buf: &mut Bytes, n: usize) -> Result<()> {
    ensure(buf, n)?;
    buf.advance(n);
    Ok(())
}

/// Read a string of `len` characters.
///
/// On wide dialects `len` counts UTF-16LE code units (2 bytes each); on
/// narrow dialects it counts bytes decoded through `encoding`.
pub fn read_string(
    buf: &mut Bytes,
    len: usize,
    wide: bool,
    encoding: &'static Encoding,
) -> Result<String> {
    if wide {
        read_utf16_string(buf, len)
    } else {
        let raw = get_bytes(buf, len)?;
        let (text, _, _) = encoding.decode(&raw);
        Ok(text.into_owned())
    }
}

/// Read `len` UTF-16LE code units as a string.
pub fn read_utf16_string(buf: &mut Bytes, len: usize) -> Result<String> {
    ensure(buf, len * 2)?;
    let mut units = Vec::with_capacity(len);
    for _ in 0..len {
        units.push(buf.get_u16_le());
    }
    Ok(String::from_utf16_lossy(&units))
}

/// Read a `B_VARCHAR`: one-byte character count then characters.
pub fn read_b_varchar(buf: &mut Bytes, wide: bool, encoding: &'static Encoding) -> Result<String> {
    let len = get_u8(buf)? as usize;
    read_string(buf, len, wide, encoding)
}

/// Read a `US_VARCHAR`: two-byte character count then characters.
pub fn read_us_varchar(buf: &mut Bytes, wide: bool, encoding: &'static Encoding) -> Result<String> {
    let len = get_u16_le(buf)? as usize;
    read_string(buf, len, wide, encoding)
}

/// Encode a string in the session code page.
///
/// Unmappable characters are a local error rather than silent replacement:
/// the server would otherwise store mojibake.
pub fn encode_narrow(s: &str, encoding: &'static Encoding) -> Result<Vec<u8>> {
    let (raw, _, had_errors) = encoding.encode(s);
    if had_errors {
        return Err(ProtocolError::Unmappable(encoding.name()));
    }
    Ok(raw.into_owned())
}

/// Write a string as UTF-16LE code units (no length prefix).
pub fn write_utf16_string(dst: &mut impl BufMut, s: &str) {
    for unit in s.encode_utf16() {
        dst.put_u16_le(unit);
    }
}

/// Write a legacy login field: the value padded with zero bytes to `width`,
/// followed by a single byte holding the actual length.
pub fn put_login_string(
    dst: &mut impl BufMut,
    s: &str,
    width: usize,
    encoding: &'static Encoding,
) -> Result<()> {
    let raw = encode_narrow(s, encoding)?;
    let used = raw.len().min(width);
    dst.put_slice(&raw[..used]);
    for _ in used..width {
        dst.put_u8(0);
    }
    dst.put_u8(used as u8);
    Ok(())
}
