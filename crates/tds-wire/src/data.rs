//! The value codec: row/parameter data to and from [`SqlValue`].
//!
//! Decoding is driven by a [`TypeInfo`] descriptor taken from column
//! metadata or an output-parameter token. Encoding is the parameter path:
//! a Rust-side value is first mapped to the narrowest wire type the
//! dialect can carry it in (`resolve_native_type`), then written as a
//! type descriptor plus data block.
//!
//! The legacy dialects cannot represent an empty string: a VARCHAR length
//! byte of zero means NULL. Empty strings therefore go out as a single
//! space and a single-space VARCHAR comes back as the empty string.

use bytes::{BufMut, Bytes, BytesMut};
use encoding_rs::Encoding;
use tds_values::{SqlValue, TypeError};
use uuid::Uuid;

use crate::collation::Collation;
use crate::typeinfo::{max_decimal_bytes, SizeClass, TypeInfo, WireType};
use crate::version::{ServerKind, TdsVersion};
use crate::{codec, datetime, numeric, ProtocolError, Result};

/// One statement parameter: a value, its wire descriptor and direction.
#[derive(Debug, Clone)]
pub struct Parameter {
    /// Parameter name including the leading `@`, empty for positional.
    pub name: String,
    /// The value to send, or the placeholder for an output slot.
    pub value: SqlValue,
    /// Whether the server is expected to send this parameter back.
    pub output: bool,
    /// Resolved wire descriptor; filled in by [`Parameter::resolve`].
    pub info: Option<TypeInfo>,
}

impl Parameter {
    /// An input parameter.
    #[must_use]
    pub fn input(value: impl Into<SqlValue>) -> Self {
        Self {
            name: String::new(),
            value: value.into(),
            output: false,
            info: None,
        }
    }

    /// An output parameter seeded with a placeholder value.
    #[must_use]
    pub fn output(value: impl Into<SqlValue>) -> Self {
        Self {
            name: String::new(),
            value: value.into(),
            output: true,
            info: None,
        }
    }

    /// Name the parameter (stored procedure calls pass names through).
    #[must_use]
    pub fn named(mut self, name: &str) -> Self {
        self.name = name.to_owned();
        self
    }

    /// Resolve the wire descriptor for this parameter under `version`.
    pub fn resolve(&mut self, version: TdsVersion) -> Result<()> {
        self.info = Some(resolve_native_type(&self.value, version, self.output)?);
        Ok(())
    }

    /// The resolved descriptor.
    pub fn info(&self) -> Result<&TypeInfo> {
        self.info
            .as_ref()
            .ok_or(ProtocolError::Violation("parameter type not resolved"))
    }
}

fn conversion(value: &SqlValue, to: &'static str) -> ProtocolError {
    ProtocolError::Type(TypeError::Conversion {
        from: value.type_name(),
        to,
    })
}

/// Map a value to the narrowest wire type the dialect can carry it in.
///
/// Values too large for an inline parameter cross over to the LOB types;
/// output parameters cannot do that and fail instead.
pub fn resolve_native_type(
    value: &SqlValue,
    version: TdsVersion,
    output: bool,
) -> Result<TypeInfo> {
    let wide = version.is_wide();

    let mut info = match value {
        SqlValue::Null => {
            let mut info = TypeInfo::simple(if wide {
                WireType::BigNVarChar
            } else {
                WireType::VarChar
            });
            info.max_length = if wide { 8000 } else { 255 };
            info
        }
        SqlValue::Bit(_) => sized(WireType::BitN, 1),
        SqlValue::TinyInt(_) | SqlValue::SmallInt(_) | SqlValue::Int(_) => {
            sized(WireType::IntN, 4)
        }
        SqlValue::BigInt(_) => {
            if version == TdsVersion::V8_0 {
                sized(WireType::IntN, 8)
            } else {
                // No 8-byte integer before 2000; send as decimal(p,0).
                let mut info = sized(WireType::Decimal, i32::from(max_decimal_bytes(version)));
                info.precision = version.max_precision();
                info.scale = 0;
                info
            }
        }
        SqlValue::Real(_) => sized(WireType::FltN, 4),
        SqlValue::Float(_) => sized(WireType::FltN, 8),
        SqlValue::Decimal(d) => {
            let scale = d.scale().min(u32::from(version.max_precision())) as u8;
            let mut info = sized(WireType::Decimal, i32::from(max_decimal_bytes(version)));
            info.precision = version.max_precision();
            info.scale = scale;
            info
        }
        SqlValue::String(s) => resolve_string_type(s, version)?,
        SqlValue::Binary(b) => {
            let limit = version.max_inline_bytes();
            if b.len() <= limit {
                sized(
                    if wide {
                        WireType::BigVarBinary
                    } else {
                        WireType::VarBinary
                    },
                    limit as i32,
                )
            } else {
                sized(WireType::Image, i32::MAX)
            }
        }
        SqlValue::DateTime(_) => sized(WireType::DateTimeN, 8),
        SqlValue::Guid(_) => {
            if wide {
                sized(WireType::Unique, 16)
            } else {
                // Legacy servers have no GUID type; ship the text form.
                sized(WireType::VarChar, 255)
            }
        }
    };

    if output && matches!(info.wire_type.desc().size, SizeClass::Lob) {
        return Err(ProtocolError::Violation(
            "text/image values cannot be output parameters",
        ));
    }

    if !wide {
        // Legacy descriptors never exceed a one-byte length.
        if let SizeClass::PrefixU8 = info.wire_type.desc().size {
            info.max_length = info.max_length.min(255);
        }
    }

    Ok(info)
}

fn resolve_string_type(s: &str, version: TdsVersion) -> Result<TypeInfo> {
    if !version.is_wide() {
        return Ok(if s.len() < 256 {
            sized(WireType::VarChar, 255)
        } else {
            sized(WireType::Text, i32::MAX)
        });
    }

    let chars = s.encode_utf16().count();
    if chars <= TdsVersion::MAX_INLINE_CHARS {
        Ok(sized(WireType::BigNVarChar, 8000))
    } else if s.is_ascii() && s.len() <= 8000 {
        // Too long for nvarchar(4000) but still inline as varchar(8000).
        Ok(sized(WireType::BigVarChar, 8000))
    } else {
        Ok(sized(WireType::NText, i32::MAX))
    }
}

fn sized(wire_type: WireType, max_length: i32) -> TypeInfo {
    let mut info = TypeInfo::simple(wire_type);
    info.max_length = max_length;
    info
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decode one value described by `info` from a row or parameter token.
pub fn decode_value(
    buf: &mut Bytes,
    info: &TypeInfo,
    version: TdsVersion,
    server: ServerKind,
    encoding: &'static Encoding,
) -> Result<SqlValue> {
    use WireType::*;

    let encoding = info
        .collation
        .as_ref()
        .map_or(encoding, Collation::encoding);

    Ok(match info.wire_type {
        Void => SqlValue::Null,
        Int1 => SqlValue::TinyInt(codec::get_u8(buf)?),
        SInt1 => SqlValue::SmallInt(i16::from(codec::get_u8(buf)? as i8)),
        Int2 => SqlValue::SmallInt(codec::get_i16_le(buf)?),
        UInt2 => SqlValue::Int(i32::from(codec::get_u16_le(buf)?)),
        Int4 => SqlValue::Int(codec::get_i32_le(buf)?),
        UInt4 => SqlValue::BigInt(i64::from(codec::get_u32_le(buf)?)),
        Int8 => SqlValue::BigInt(codec::get_i64_le(buf)?),
        UInt8 => SqlValue::Decimal(codec::get_u64_le(buf)?.into()),
        Bit => SqlValue::Bit(codec::get_u8(buf)? != 0),
        Real => SqlValue::Real(f32::from_bits(codec::get_u32_le(buf)?)),
        Flt8 => SqlValue::Float(f64::from_bits(codec::get_u64_le(buf)?)),
        DateTime => {
            let days = codec::get_i32_le(buf)?;
            let ticks = codec::get_i32_le(buf)?;
            SqlValue::DateTime(datetime::decode_datetime(days, ticks)?)
        }
        DateTime4 => {
            let days = codec::get_u16_le(buf)?;
            let minutes = codec::get_u16_le(buf)?;
            SqlValue::DateTime(datetime::decode_smalldatetime(days, minutes)?)
        }
        Money => {
            let high = codec::get_i32_le(buf)?;
            let low = codec::get_u32_le(buf)?;
            SqlValue::Decimal(numeric::decode_money8(high, low))
        }
        Money4 => SqlValue::Decimal(numeric::decode_money4(codec::get_i32_le(buf)?)),

        IntN => decode_intn(buf)?,
        BitN => match codec::get_u8(buf)? {
            0 => SqlValue::Null,
            _ => SqlValue::Bit(codec::get_u8(buf)? != 0),
        },
        FltN => match codec::get_u8(buf)? {
            0 => SqlValue::Null,
            4 => SqlValue::Real(f32::from_bits(codec::get_u32_le(buf)?)),
            8 => SqlValue::Float(f64::from_bits(codec::get_u64_le(buf)?)),
            n => return Err(bad_len(n, "nullable float")),
        },
        MoneyN => match codec::get_u8(buf)? {
            0 => SqlValue::Null,
            4 => SqlValue::Decimal(numeric::decode_money4(codec::get_i32_le(buf)?)),
            8 => {
                let high = codec::get_i32_le(buf)?;
                let low = codec::get_u32_le(buf)?;
                SqlValue::Decimal(numeric::decode_money8(high, low))
            }
            n => return Err(bad_len(n, "nullable money")),
        },
        DateTimeN => match codec::get_u8(buf)? {
            0 => SqlValue::Null,
            4 => {
                let days = codec::get_u16_le(buf)?;
                let minutes = codec::get_u16_le(buf)?;
                SqlValue::DateTime(datetime::decode_smalldatetime(days, minutes)?)
            }
            8 => {
                let days = codec::get_i32_le(buf)?;
                let ticks = codec::get_i32_le(buf)?;
                SqlValue::DateTime(datetime::decode_datetime(days, ticks)?)
            }
            n => return Err(bad_len(n, "nullable datetime")),
        },

        Numeric | Decimal => match codec::get_u8(buf)? as usize {
            0 => SqlValue::Null,
            n => {
                let payload = codec::get_bytes(buf, n)?;
                SqlValue::Decimal(numeric::decode_numeric(
                    &payload,
                    info.precision,
                    info.scale,
                    server,
                )?)
            }
        },

        Char | VarChar | NVarChar => match codec::get_u8(buf)? as usize {
            0 => SqlValue::Null,
            n => {
                let s = codec::read_string(buf, n, false, encoding)?;
                // Single space is the legacy spelling of the empty string.
                if info.wire_type == VarChar && !version.is_wide() && s == " " {
                    SqlValue::String(String::new())
                } else {
                    SqlValue::String(s)
                }
            }
        },
        Binary | VarBinary => match codec::get_u8(buf)? as usize {
            0 => SqlValue::Null,
            n => SqlValue::Binary(codec::get_bytes(buf, n)?),
        },

        BigChar | BigVarChar => match codec::get_u16_le(buf)? {
            0xFFFF => SqlValue::Null,
            n => SqlValue::String(codec::read_string(buf, n as usize, false, encoding)?),
        },
        BigNChar | BigNVarChar => match codec::get_u16_le(buf)? {
            0xFFFF => SqlValue::Null,
            n => SqlValue::String(codec::read_utf16_string(buf, n as usize / 2)?),
        },
        BigBinary | BigVarBinary => match codec::get_u16_le(buf)? {
            0xFFFF => SqlValue::Null,
            n => SqlValue::Binary(codec::get_bytes(buf, n as usize)?),
        },

        LongBinary => match codec::get_i32_le(buf)? {
            0 => SqlValue::Null,
            n => SqlValue::Binary(codec::get_bytes(buf, n as usize)?),
        },

        Unique => match codec::get_u8(buf)? as usize {
            0 => SqlValue::Null,
            16 => SqlValue::Guid(decode_guid(buf)?),
            n => return Err(bad_len(n as u8, "uniqueidentifier")),
        },

        Text | NText | Image => decode_lob(buf, info.wire_type, encoding)?,
        Variant => decode_variant(buf, version, server, encoding)?,
    })
}

fn bad_len(len: u8, context: &'static str) -> ProtocolError {
    ProtocolError::InvalidLength {
        length: len as usize,
        context,
    }
}

fn decode_intn(buf: &mut Bytes) -> Result<SqlValue> {
    Ok(match codec::get_u8(buf)? {
        0 => SqlValue::Null,
        1 => SqlValue::TinyInt(codec::get_u8(buf)?),
        2 => SqlValue::SmallInt(codec::get_i16_le(buf)?),
        4 => SqlValue::Int(codec::get_i32_le(buf)?),
        8 => SqlValue::BigInt(codec::get_i64_le(buf)?),
        n => return Err(bad_len(n, "nullable integer")),
    })
}

/// GUID wire layout: the first three fields little-endian, the rest raw.
fn decode_guid(buf: &mut Bytes) -> Result<Uuid> {
    let d1 = codec::get_u32_le(buf)?;
    let d2 = codec::get_u16_le(buf)?;
    let d3 = codec::get_u16_le(buf)?;
    let raw = codec::get_bytes(buf, 8)?;
    let mut d4 = [0u8; 8];
    d4.copy_from_slice(&raw);
    Ok(Uuid::from_fields(d1, d2, d3, &d4))
}

fn encode_guid(dst: &mut impl BufMut, guid: Uuid) {
    let (d1, d2, d3, d4) = guid.as_fields();
    dst.put_u32_le(d1);
    dst.put_u16_le(d2);
    dst.put_u16_le(d3);
    dst.put_slice(d4);
}

/// Text/ntext/image row data: a text-pointer block then the payload.
///
/// A zero presence byte means NULL with nothing following; otherwise the
/// presence byte is the text-pointer length, followed by the pointer, an
/// 8-byte timestamp and the i32-prefixed payload.
fn decode_lob(
    buf: &mut Bytes,
    wire_type: WireType,
    encoding: &'static Encoding,
) -> Result<SqlValue> {
    let ptr_len = codec::get_u8(buf)? as usize;
    if ptr_len == 0 {
        return Ok(SqlValue::Null);
    }
    codec::skip(buf, ptr_len)?; // text pointer
    codec::skip(buf, 8)?; // timestamp

    let len = codec::get_i32_le(buf)?;
    if len < 0 {
        return Ok(SqlValue::Null);
    }
    let len = len as usize;

    Ok(match wire_type {
        WireType::NText => SqlValue::String(codec::read_utf16_string(buf, len / 2)?),
        WireType::Text => SqlValue::String(codec::read_string(buf, len, false, encoding)?),
        _ => SqlValue::Binary(codec::get_bytes(buf, len)?),
    })
}

/// sql_variant: a self-describing value with an embedded base type and a
/// type-dependent property block.
fn decode_variant(
    buf: &mut Bytes,
    version: TdsVersion,
    server: ServerKind,
    encoding: &'static Encoding,
) -> Result<SqlValue> {
    let total = codec::get_i32_le(buf)?;
    if total == 0 {
        return Ok(SqlValue::Null);
    }
    let total = total as usize;
    if total < 2 {
        return Err(ProtocolError::InvalidLength {
            length: total,
            context: "sql_variant",
        });
    }

    let base = WireType::from_u8(codec::get_u8(buf)?)?;
    let prop_bytes = codec::get_u8(buf)? as usize;
    let data_len = total
        .checked_sub(2 + prop_bytes)
        .ok_or(ProtocolError::InvalidLength {
            length: total,
            context: "sql_variant",
        })?;

    let mut info = TypeInfo::simple(base);
    let mut encoding = encoding;
    match base {
        WireType::Numeric | WireType::Decimal => {
            info.precision = codec::get_u8(buf)?;
            info.scale = codec::get_u8(buf)?;
        }
        WireType::BigChar | WireType::BigVarChar | WireType::BigNChar | WireType::BigNVarChar => {
            let collation = Collation::decode(buf)?;
            encoding = collation.encoding();
            info.collation = Some(collation);
            codec::skip(buf, 2)?; // declared max length, unused here
        }
        WireType::BigBinary | WireType::BigVarBinary => {
            codec::skip(buf, 2)?;
        }
        _ => codec::skip(buf, prop_bytes)?,
    }

    // The embedded value has no length prefix of its own; the variant
    // header already fixed it.
    let mut data = codec::get_bytes(buf, data_len)?;
    Ok(match base {
        WireType::BigChar | WireType::BigVarChar => {
            SqlValue::String(codec::read_string(&mut data, data_len, false, encoding)?)
        }
        WireType::BigNChar | WireType::BigNVarChar => {
            SqlValue::String(codec::read_utf16_string(&mut data, data_len / 2)?)
        }
        WireType::BigBinary | WireType::BigVarBinary => SqlValue::Binary(data),
        WireType::Numeric | WireType::Decimal => SqlValue::Decimal(numeric::decode_numeric(
            &data,
            info.precision,
            info.scale,
            server,
        )?),
        _ => decode_value(&mut data, &info, version, server, encoding)?,
    })
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Write a parameter's type descriptor: type byte, length framing and any
/// precision/scale or collation fields.
pub fn encode_param_type(
    dst: &mut BytesMut,
    param: &Parameter,
    version: TdsVersion,
    collation: Collation,
) -> Result<()> {
    let info = param.info()?;
    let desc = info.wire_type.desc();

    dst.put_u8(info.wire_type as u8);
    match desc.size {
        SizeClass::Fixed(_) => {}
        SizeClass::PrefixU8 => {
            dst.put_u8(info.max_length.clamp(0, 255) as u8);
            if matches!(info.wire_type, WireType::Numeric | WireType::Decimal) {
                dst.put_u8(info.precision);
                dst.put_u8(info.scale);
            }
        }
        SizeClass::PrefixU16 => {
            dst.put_u16_le(info.max_length.clamp(0, 0xFFFE) as u16);
            if version == TdsVersion::V8_0 && desc.collation {
                collation.encode(dst);
            }
        }
        SizeClass::Lob => {
            dst.put_i32_le(info.max_length);
            if version == TdsVersion::V8_0 && desc.collation {
                collation.encode(dst);
            }
        }
        SizeClass::PrefixU32 => {
            dst.put_i32_le(info.max_length);
        }
    }
    Ok(())
}

/// Write a parameter's data block.
///
/// A value longer than the declared maximum is a local error raised
/// before anything is written; the request must not go out half-built.
pub fn encode_param_data(
    dst: &mut BytesMut,
    param: &Parameter,
    server: ServerKind,
    encoding: &'static Encoding,
) -> Result<()> {
    use WireType::*;

    let info = param.info()?;
    let value = &param.value;

    if value.is_null() {
        put_null(dst, info);
        return Ok(());
    }

    match info.wire_type {
        BitN => {
            let v = value.as_bool().ok_or_else(|| conversion(value, "bit"))?;
            dst.put_u8(1);
            dst.put_u8(u8::from(v));
        }
        IntN => {
            let v = value.as_i64().ok_or_else(|| conversion(value, "int"))?;
            if info.max_length == 8 {
                dst.put_u8(8);
                dst.put_i64_le(v);
            } else {
                let v = i32::try_from(v).map_err(|_| conversion(value, "int"))?;
                dst.put_u8(4);
                dst.put_i32_le(v);
            }
        }
        FltN => {
            let v = value.as_f64().ok_or_else(|| conversion(value, "float"))?;
            if info.max_length == 4 {
                dst.put_u8(4);
                dst.put_u32_le((v as f32).to_bits());
            } else {
                dst.put_u8(8);
                dst.put_u64_le(v.to_bits());
            }
        }
        DateTimeN => {
            let v = value
                .as_datetime()
                .ok_or_else(|| conversion(value, "datetime"))?;
            let (days, ticks) = datetime::encode_datetime(v);
            dst.put_u8(8);
            dst.put_i32_le(days);
            dst.put_i32_le(ticks);
        }
        Numeric | Decimal => {
            let d = match value {
                SqlValue::Decimal(d) => *d,
                SqlValue::BigInt(v) => (*v).into(),
                _ => return Err(conversion(value, "decimal")),
            };
            let payload = numeric::encode_numeric(d, info.precision, info.scale, server)?;
            dst.put_u8(payload.len() as u8);
            dst.put_slice(&payload);
        }
        MoneyN => {
            let d = value
                .as_decimal()
                .ok_or_else(|| conversion(value, "money"))?;
            let (high, low) = numeric::encode_money8(d)?;
            dst.put_u8(8);
            dst.put_i32_le(high);
            dst.put_u32_le(low);
        }
        Unique => {
            let g = value
                .as_guid()
                .ok_or_else(|| conversion(value, "uniqueidentifier"))?;
            dst.put_u8(16);
            encode_guid(dst, g);
        }

        VarChar | Char => {
            let raw = narrow_param_bytes(value, encoding)?;
            check_inline(raw.len(), info.max_length)?;
            dst.put_u8(raw.len() as u8);
            dst.put_slice(&raw);
        }
        BigVarChar | BigChar => {
            let s = value.as_str().ok_or_else(|| conversion(value, "varchar"))?;
            let raw = codec::encode_narrow(s, encoding)?;
            check_inline(raw.len(), info.max_length)?;
            dst.put_u16_le(raw.len() as u16);
            dst.put_slice(&raw);
        }
        BigNVarChar | BigNChar => {
            let s = value
                .as_str()
                .ok_or_else(|| conversion(value, "nvarchar"))?;
            let bytes = s.encode_utf16().count() * 2;
            check_inline(bytes, info.max_length)?;
            dst.put_u16_le(bytes as u16);
            codec::write_utf16_string(dst, s);
        }
        VarBinary | Binary => {
            let b = value
                .as_bytes()
                .ok_or_else(|| conversion(value, "varbinary"))?;
            check_inline(b.len(), info.max_length)?;
            dst.put_u8(b.len() as u8);
            dst.put_slice(b);
        }
        BigVarBinary | BigBinary => {
            let b = value
                .as_bytes()
                .ok_or_else(|| conversion(value, "varbinary"))?;
            check_inline(b.len(), info.max_length)?;
            dst.put_u16_le(b.len() as u16);
            dst.put_slice(b);
        }

        Text => {
            let s = value.as_str().ok_or_else(|| conversion(value, "text"))?;
            let raw = codec::encode_narrow(s, encoding)?;
            dst.put_i32_le(raw.len() as i32);
            dst.put_slice(&raw);
        }
        NText => {
            let s = value.as_str().ok_or_else(|| conversion(value, "ntext"))?;
            let bytes = s.encode_utf16().count() * 2;
            dst.put_i32_le(bytes as i32);
            codec::write_utf16_string(dst, s);
        }
        Image | LongBinary => {
            let b = value.as_bytes().ok_or_else(|| conversion(value, "image"))?;
            dst.put_i32_le(b.len() as i32);
            dst.put_slice(b);
        }

        _ => {
            return Err(ProtocolError::Violation(
                "unsupported parameter wire type",
            ));
        }
    }

    Ok(())
}

/// Write a full parameter: type descriptor then data.
pub fn encode_param(
    dst: &mut BytesMut,
    param: &Parameter,
    version: TdsVersion,
    server: ServerKind,
    collation: Collation,
    encoding: &'static Encoding,
) -> Result<()> {
    encode_param_type(dst, param, version, collation)?;
    encode_param_data(dst, param, server, encoding)
}

fn put_null(dst: &mut BytesMut, info: &TypeInfo) {
    match info.wire_type.desc().size {
        SizeClass::PrefixU16 => dst.put_u16_le(0xFFFF),
        SizeClass::Lob | SizeClass::PrefixU32 => dst.put_i32_le(0),
        _ => dst.put_u8(0),
    }
}

/// Narrow character data for a one-byte-length parameter, applying the
/// empty-string substitution and stringifying non-string values that were
/// routed here (GUIDs on legacy dialects).
fn narrow_param_bytes(value: &SqlValue, encoding: &'static Encoding) -> Result<Vec<u8>> {
    let owned;
    let s = match value {
        SqlValue::String(s) => s.as_str(),
        SqlValue::Guid(g) => {
            owned = g.to_string();
            owned.as_str()
        }
        _ => return Err(conversion(value, "varchar")),
    };
    if s.is_empty() {
        return Ok(vec![b' ']);
    }
    codec::encode_narrow(s, encoding)
}

fn check_inline(len: usize, max: i32) -> Result<()> {
    if max >= 0 && len > max as usize {
        return Err(ProtocolError::Truncation {
            length: len,
            max: max as usize,
        });
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use std::str::FromStr;

    const ENC: &encoding_rs::Encoding = encoding_rs::WINDOWS_1252;

    fn decode(
        raw: &'static [u8],
        info: &TypeInfo,
        version: TdsVersion,
        server: ServerKind,
    ) -> SqlValue {
        let mut buf = Bytes::from_static(raw);
        let value = decode_value(&mut buf, info, version, server, ENC).unwrap();
        assert!(buf.is_empty(), "trailing bytes after decode");
        value
    }

    #[test]
    fn nullable_int_lengths() {
        let info = sized(WireType::IntN, 4);
        assert_eq!(
            decode(&[0x00], &info, TdsVersion::V7_0, ServerKind::SqlServer),
            SqlValue::Null
        );
        assert_eq!(
            decode(
                &[0x04, 0xD2, 0x04, 0x00, 0x00],
                &info,
                TdsVersion::V7_0,
                ServerKind::SqlServer
            ),
            SqlValue::Int(1234)
        );
        assert_eq!(
            decode(
                &[0x08, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00],
                &info,
                TdsVersion::V8_0,
                ServerKind::SqlServer
            ),
            SqlValue::BigInt(1 << 32)
        );

        let mut bad = Bytes::from_static(&[0x03, 0x00, 0x00, 0x00]);
        assert!(decode_value(&mut bad, &info, TdsVersion::V7_0, ServerKind::SqlServer, ENC).is_err());
    }

    #[test]
    fn legacy_empty_string_round_trip() {
        // Encoding "" on a narrow dialect produces a single space.
        let mut param = Parameter::input("");
        param.resolve(TdsVersion::V5_0).unwrap();
        assert_eq!(param.info().unwrap().wire_type, WireType::VarChar);

        let mut dst = BytesMut::new();
        encode_param_data(&mut dst, &param, ServerKind::Sybase, ENC).unwrap();
        assert_eq!(&dst[..], &[0x01, b' ']);

        // And a single-space VARCHAR decodes back to the empty string.
        let info = sized(WireType::VarChar, 255);
        assert_eq!(
            decode(&[0x01, b' '], &info, TdsVersion::V5_0, ServerKind::Sybase),
            SqlValue::String(String::new())
        );

        // On a wide dialect a space stays a space.
        assert_eq!(
            decode(&[0x01, b' '], &info, TdsVersion::V7_0, ServerKind::SqlServer),
            SqlValue::String(" ".to_owned())
        );
    }

    #[test]
    fn string_type_thresholds() {
        // 255 chars fits legacy varchar; 256 crosses to text.
        let short = "x".repeat(255);
        let info = resolve_native_type(&short.into(), TdsVersion::V4_2, false).unwrap();
        assert_eq!(info.wire_type, WireType::VarChar);

        let long = "x".repeat(256);
        let info = resolve_native_type(&long.into(), TdsVersion::V4_2, false).unwrap();
        assert_eq!(info.wire_type, WireType::Text);

        // 4000 chars fits nvarchar; 8000 ASCII chars fits varchar; 8001
        // crosses to ntext.
        let inline = "x".repeat(4000);
        let info = resolve_native_type(&inline.into(), TdsVersion::V8_0, false).unwrap();
        assert_eq!(info.wire_type, WireType::BigNVarChar);

        let wide_inline = "x".repeat(8000);
        let info = resolve_native_type(&wide_inline.into(), TdsVersion::V8_0, false).unwrap();
        assert_eq!(info.wire_type, WireType::BigVarChar);

        let lob = "x".repeat(8001);
        let info = resolve_native_type(&lob.into(), TdsVersion::V8_0, false).unwrap();
        assert_eq!(info.wire_type, WireType::NText);
    }

    #[test]
    fn bigint_downgrades_to_decimal_before_tds8() {
        let info = resolve_native_type(&SqlValue::BigInt(1), TdsVersion::V7_0, false).unwrap();
        assert_eq!(info.wire_type, WireType::Decimal);
        assert_eq!(info.scale, 0);

        let info = resolve_native_type(&SqlValue::BigInt(1), TdsVersion::V8_0, false).unwrap();
        assert_eq!(info.wire_type, WireType::IntN);
        assert_eq!(info.max_length, 8);
    }

    #[test]
    fn lob_values_cannot_be_output_params() {
        let lob = SqlValue::String("x".repeat(9000));
        assert!(resolve_native_type(&lob, TdsVersion::V8_0, true).is_err());
        assert!(resolve_native_type(&lob, TdsVersion::V8_0, false).is_ok());
    }

    #[test]
    fn truncation_is_a_local_error() {
        let mut param = Parameter::input("abcdef");
        param.resolve(TdsVersion::V8_0).unwrap();
        // Force a narrower declaration than the value.
        if let Some(info) = param.info.as_mut() {
            info.max_length = 4;
        }

        let mut dst = BytesMut::new();
        let err = encode_param_data(&mut dst, &param, ServerKind::SqlServer, ENC)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Truncation { length: 12, max: 4 }));
        assert!(dst.is_empty());
    }

    #[test]
    fn datetime_param_round_trip() {
        let when = NaiveDate::from_ymd_opt(2003, 4, 17)
            .unwrap()
            .and_hms_milli_opt(9, 30, 15, 500)
            .unwrap();
        let mut param = Parameter::input(when);
        param.resolve(TdsVersion::V7_0).unwrap();

        let mut dst = BytesMut::new();
        encode_param_data(&mut dst, &param, ServerKind::SqlServer, ENC).unwrap();

        let info = sized(WireType::DateTimeN, 8);
        let mut buf = dst.freeze();
        let back =
            decode_value(&mut buf, &info, TdsVersion::V7_0, ServerKind::SqlServer, ENC).unwrap();
        assert_eq!(back, SqlValue::DateTime(when));
    }

    #[test]
    fn guid_little_endian_fields() {
        let guid = Uuid::from_str("33221100-5544-7766-8899-aabbccddeeff").unwrap();
        let mut param = Parameter::input(guid);
        param.resolve(TdsVersion::V8_0).unwrap();

        let mut dst = BytesMut::new();
        encode_param_data(&mut dst, &param, ServerKind::SqlServer, ENC).unwrap();
        // Mixed-endian layout: first three fields flipped, tail as-is.
        assert_eq!(
            &dst[..],
            &[
                16, 0x00, 0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB,
                0xCC, 0xDD, 0xEE, 0xFF
            ]
        );

        let info = sized(WireType::Unique, 16);
        let mut buf = dst.freeze();
        let back =
            decode_value(&mut buf, &info, TdsVersion::V8_0, ServerKind::SqlServer, ENC).unwrap();
        assert_eq!(back, SqlValue::Guid(guid));
    }

    #[test]
    fn lob_row_data_with_textptr() {
        // presence byte 16, pointer, timestamp, then i32 length + data.
        let mut raw = vec![16u8];
        raw.extend_from_slice(&[0xEE; 16]); // text pointer
        raw.extend_from_slice(&[0x00; 8]); // timestamp
        raw.extend_from_slice(&5i32.to_le_bytes());
        raw.extend_from_slice(b"hello");

        let mut info = sized(WireType::Text, i32::MAX);
        info.table_name = Some("t1".to_owned());
        let mut buf = Bytes::from(raw);
        let value =
            decode_value(&mut buf, &info, TdsVersion::V7_0, ServerKind::SqlServer, ENC).unwrap();
        assert_eq!(value, SqlValue::String("hello".to_owned()));

        // Zero presence byte is NULL with no further fields.
        let mut buf = Bytes::from_static(&[0x00]);
        let value =
            decode_value(&mut buf, &info, TdsVersion::V7_0, ServerKind::SqlServer, ENC).unwrap();
        assert_eq!(value, SqlValue::Null);
    }

    #[test]
    fn variant_carries_its_own_type() {
        // i32 total, base type INT4, no props, 4 data bytes.
        let mut raw = Vec::new();
        raw.extend_from_slice(&6i32.to_le_bytes());
        raw.push(0x38);
        raw.push(0x00);
        raw.extend_from_slice(&7i32.to_le_bytes());

        let info = sized(WireType::Variant, 8009);
        let mut buf = Bytes::from(raw);
        let value =
            decode_value(&mut buf, &info, TdsVersion::V8_0, ServerKind::SqlServer, ENC).unwrap();
        assert_eq!(value, SqlValue::Int(7));
    }

    #[test]
    fn money_decode_splits_halves() {
        let value = Decimal::from_str("-1.0001").unwrap();
        let (high, low) = numeric::encode_money8(value).unwrap();

        let mut raw = Vec::new();
        raw.push(8u8);
        raw.extend_from_slice(&high.to_le_bytes());
        raw.extend_from_slice(&low.to_le_bytes());

        let info = sized(WireType::MoneyN, 8);
        let mut buf = Bytes::from(raw);
        let back =
            decode_value(&mut buf, &info, TdsVersion::V7_0, ServerKind::SqlServer, ENC).unwrap();
        assert_eq!(back, SqlValue::Decimal(value));
    }
}
