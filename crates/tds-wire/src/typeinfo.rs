//! The wire type descriptor table.
//!
//! One byte on the wire selects a server data type; this module maps that
//! byte to a static descriptor (size class, precision, display width,
//! signedness, collation/currency flags) and decodes the per-column type
//! descriptor that follows it in column metadata and parameter tokens.

use bytes::Bytes;
use encoding_rs::Encoding;

use crate::codec;
use crate::collation::Collation;
use crate::version::{ServerKind, TdsVersion};
use crate::{ProtocolError, Result};

/// Every TDS wire data type the four dialects can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WireType {
    /// Fixed-length char (legacy).
    Char = 0x2F,
    /// Variable char, 1-byte length.
    VarChar = 0x27,
    /// Nullable integer, actual-length byte.
    IntN = 0x26,
    /// 1-byte unsigned integer.
    Int1 = 0x30,
    /// 2-byte integer.
    Int2 = 0x34,
    /// 4-byte integer.
    Int4 = 0x38,
    /// 8-byte integer.
    Int8 = 0x7F,
    /// 8-byte float.
    Flt8 = 0x3E,
    /// 8-byte datetime.
    DateTime = 0x3D,
    /// Single bit.
    Bit = 0x32,
    /// Text LOB.
    Text = 0x23,
    /// Unicode text LOB.
    NText = 0x63,
    /// Image LOB.
    Image = 0x22,
    /// 4-byte money.
    Money4 = 0x7A,
    /// 8-byte money.
    Money = 0x3C,
    /// 4-byte smalldatetime.
    DateTime4 = 0x3A,
    /// 4-byte float.
    Real = 0x3B,
    /// Fixed binary, 1-byte length.
    Binary = 0x2D,
    /// No data (procedure output placeholder).
    Void = 0x1F,
    /// Variable binary, 1-byte length.
    VarBinary = 0x25,
    /// Sybase nvarchar, 1-byte length.
    NVarChar = 0x67,
    /// Nullable bit.
    BitN = 0x68,
    /// Numeric with precision/scale.
    Numeric = 0x6C,
    /// Decimal with precision/scale.
    Decimal = 0x6A,
    /// Nullable float.
    FltN = 0x6D,
    /// Nullable money.
    MoneyN = 0x6E,
    /// Nullable datetime.
    DateTimeN = 0x6F,
    /// Wide char, 2-byte length (TDS 7.0+).
    BigChar = 0xAF,
    /// Wide varchar, 2-byte length (TDS 7.0+).
    BigVarChar = 0xA7,
    /// Wide nvarchar, 2-byte length (TDS 7.0+).
    BigNVarChar = 0xE7,
    /// Wide nchar, 2-byte length (TDS 7.0+).
    BigNChar = 0xEF,
    /// Wide varbinary, 2-byte length (TDS 7.0+).
    BigVarBinary = 0xA5,
    /// Wide binary, 2-byte length (TDS 7.0+).
    BigBinary = 0xAD,
    /// Sybase long binary, 4-byte length.
    LongBinary = 0xE1,
    /// Sybase signed tinyint.
    SInt1 = 0x40,
    /// Sybase unsigned smallint.
    UInt2 = 0x41,
    /// Sybase unsigned int.
    UInt4 = 0x42,
    /// Sybase unsigned bigint.
    UInt8 = 0x43,
    /// Uniqueidentifier (GUID).
    Unique = 0x24,
    /// Self-describing sql_variant.
    Variant = 0x62,
}

/// How a type's data length is framed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeClass {
    /// Fixed byte count, no length prefix on data.
    Fixed(usize),
    /// 1-byte length prefix, 0 meaning NULL.
    PrefixU8,
    /// 2-byte length prefix, 0xFFFF meaning NULL.
    PrefixU16,
    /// 4-byte length with textptr framing and an owning-table name in the
    /// column descriptor (text/ntext/image).
    Lob,
    /// 4-byte length, self-contained (sql_variant, Sybase long binary).
    PrefixU32,
}

/// Static facts about a wire type.
#[derive(Debug, Clone, Copy)]
pub struct TypeDesc {
    /// SQL type name as the server spells it.
    pub name: &'static str,
    /// Length framing.
    pub size: SizeClass,
    /// Intrinsic precision, where the type defines one.
    pub precision: Option<u8>,
    /// Display width, where fixed.
    pub display_size: Option<usize>,
    /// Signed numeric type.
    pub signed: bool,
    /// Carries a 5-byte collation block on TDS 8.0.
    pub collation: bool,
    /// Money family (fixed scale 4).
    pub currency: bool,
}

impl WireType {
    /// Parse a wire type byte.
    pub fn from_u8(value: u8) -> Result<Self> {
        use WireType::*;
        Ok(match value {
            0x2F => Char,
            0x27 => VarChar,
            0x26 => IntN,
            0x30 => Int1,
            0x34 => Int2,
            0x38 => Int4,
            0x7F => Int8,
            0x3E => Flt8,
            0x3D => DateTime,
            0x32 => Bit,
            0x23 => Text,
            0x63 => NText,
            0x22 => Image,
            0x7A => Money4,
            0x3C => Money,
            0x3A => DateTime4,
            0x3B => Real,
            0x2D => Binary,
            0x1F => Void,
            0x25 => VarBinary,
            0x67 => NVarChar,
            0x68 => BitN,
            0x6C => Numeric,
            0x6A => Decimal,
            0x6D => FltN,
            0x6E => MoneyN,
            0x6F => DateTimeN,
            0xAF => BigChar,
            0xA7 => BigVarChar,
            0xE7 => BigNVarChar,
            0xEF => BigNChar,
            0xA5 => BigVarBinary,
            0xAD => BigBinary,
            0xE1 => LongBinary,
            0x40 => SInt1,
            0x41 => UInt2,
            0x42 => UInt4,
            0x43 => UInt8,
            0x24 => Unique,
            0x62 => Variant,
            other => return Err(ProtocolError::InvalidDataType(other)),
        })
    }

    /// Static descriptor for this type.
    #[must_use]
    pub fn desc(self) -> &'static TypeDesc {
        use SizeClass::*;
        use WireType::*;

        macro_rules! desc {
            ($name:literal, $size:expr, $prec:expr, $disp:expr, $signed:expr, $coll:expr, $cur:expr) => {
                &TypeDesc {
                    name: $name,
                    size: $size,
                    precision: $prec,
                    display_size: $disp,
                    signed: $signed,
                    collation: $coll,
                    currency: $cur,
                }
            };
        }

        match self {
            Char => desc!("char", PrefixU8, None, None, false, false, false),
            VarChar => desc!("varchar", PrefixU8, None, None, false, false, false),
            IntN => desc!("int", PrefixU8, None, None, true, false, false),
            Int1 => desc!("tinyint", Fixed(1), Some(3), Some(4), false, false, false),
            Int2 => desc!("smallint", Fixed(2), Some(5), Some(6), true, false, false),
            Int4 => desc!("int", Fixed(4), Some(10), Some(11), true, false, false),
            Int8 => desc!("bigint", Fixed(8), Some(19), Some(20), true, false, false),
            Flt8 => desc!("float", Fixed(8), Some(15), Some(24), true, false, false),
            DateTime => desc!("datetime", Fixed(8), Some(23), Some(23), false, false, false),
            Bit => desc!("bit", Fixed(1), Some(1), Some(1), false, false, false),
            Text => desc!("text", Lob, None, None, false, true, false),
            NText => desc!("ntext", Lob, None, None, false, true, false),
            Image => desc!("image", Lob, None, None, false, false, false),
            Money4 => desc!("smallmoney", Fixed(4), Some(10), Some(12), true, false, true),
            Money => desc!("money", Fixed(8), Some(19), Some(21), true, false, true),
            DateTime4 => {
                desc!("smalldatetime", Fixed(4), Some(16), Some(19), false, false, false)
            }
            Real => desc!("real", Fixed(4), Some(7), Some(14), true, false, false),
            Binary => desc!("binary", PrefixU8, None, None, false, false, false),
            Void => desc!("void", Fixed(0), None, None, false, false, false),
            VarBinary => desc!("varbinary", PrefixU8, None, None, false, false, false),
            NVarChar => desc!("nvarchar", PrefixU8, None, None, false, false, false),
            BitN => desc!("bit", PrefixU8, Some(1), Some(1), false, false, false),
            Numeric => desc!("numeric", PrefixU8, None, None, true, false, false),
            Decimal => desc!("decimal", PrefixU8, None, None, true, false, false),
            FltN => desc!("float", PrefixU8, None, None, true, false, false),
            MoneyN => desc!("money", PrefixU8, None, None, true, false, true),
            DateTimeN => desc!("datetime", PrefixU8, None, None, false, false, false),
            BigChar => desc!("char", PrefixU16, None, None, false, true, false),
            BigVarChar => desc!("varchar", PrefixU16, None, None, false, true, false),
            BigNVarChar => desc!("nvarchar", PrefixU16, None, None, false, true, false),
            BigNChar => desc!("nchar", PrefixU16, None, None, false, true, false),
            BigVarBinary => desc!("varbinary", PrefixU16, None, None, false, false, false),
            BigBinary => desc!("binary", PrefixU16, None, None, false, false, false),
            LongBinary => desc!("varbinary", PrefixU32, None, None, false, false, false),
            SInt1 => desc!("tinyint", Fixed(1), Some(3), Some(4), true, false, false),
            UInt2 => desc!("unsigned smallint", Fixed(2), Some(5), Some(6), false, false, false),
            UInt4 => desc!("unsigned int", Fixed(4), Some(10), Some(11), false, false, false),
            UInt8 => desc!("unsigned bigint", Fixed(8), Some(20), Some(20), false, false, false),
            Unique => desc!("uniqueidentifier", PrefixU8, None, Some(36), false, false, false),
            Variant => desc!("sql_variant", PrefixU32, None, None, false, false, false),
        }
    }

    /// Whether character data for this type is UTF-16LE on the wire.
    #[must_use]
    pub fn is_wide_char(self) -> bool {
        matches!(self, Self::BigNVarChar | Self::BigNChar | Self::NText)
    }

    /// Whether this type holds character data at all.
    #[must_use]
    pub fn is_char(self) -> bool {
        matches!(
            self,
            Self::Char
                | Self::VarChar
                | Self::NVarChar
                | Self::BigChar
                | Self::BigVarChar
                | Self::BigNVarChar
                | Self::BigNChar
                | Self::Text
                | Self::NText
        )
    }
}

/// A decoded per-column (or per-parameter) type descriptor.
///
/// This is the dynamic companion to [`TypeDesc`]: the maximum length,
/// precision/scale and collation actually declared by the server for one
/// column of one result set.
#[derive(Debug, Clone)]
pub struct TypeInfo {
    /// Wire type code.
    pub wire_type: WireType,
    /// Declared maximum data length in bytes (or characters for wide
    /// types); -1 for fixed types.
    pub max_length: i32,
    /// Declared precision for decimal/numeric.
    pub precision: u8,
    /// Declared scale for decimal/numeric.
    pub scale: u8,
    /// Collation block (TDS 8.0 character types only).
    pub collation: Option<Collation>,
    /// Owning table name (LOB columns carry it inline in the descriptor).
    pub table_name: Option<String>,
}

impl TypeInfo {
    /// Build a descriptor for a fixed type with no extra wire fields.
    #[must_use]
    pub fn simple(wire_type: WireType) -> Self {
        Self {
            wire_type,
            max_length: -1,
            precision: 0,
            scale: 0,
            collation: None,
            table_name: None,
        }
    }

    /// Decode a type descriptor as it appears in column metadata and
    /// parameter tokens: type byte, length field per size class, decimal
    /// precision/scale, TDS 8.0 collation, and the LOB owning-table name.
    pub fn decode(
        buf: &mut Bytes,
        version: TdsVersion,
        encoding: &'static Encoding,
    ) -> Result<Self> {
        let wire_type = WireType::from_u8(codec::get_u8(buf)?)?;
        let desc = wire_type.desc();

        let mut info = Self::simple(wire_type);

        match desc.size {
            SizeClass::Fixed(n) => {
                info.max_length = n as i32;
            }
            SizeClass::PrefixU8 => {
                info.max_length = i32::from(codec::get_u8(buf)?);
                if matches!(wire_type, WireType::Numeric | WireType::Decimal) {
                    info.precision = codec::get_u8(buf)?;
                    info.scale = codec::get_u8(buf)?;
                    if info.precision > 38 {
                        return Err(ProtocolError::InvalidField {
                            field: "numeric precision",
                            value: u64::from(info.precision),
                        });
                    }
                }
            }
            SizeClass::PrefixU16 => {
                info.max_length = i32::from(codec::get_u16_le(buf)?);
                if version == TdsVersion::V8_0 && desc.collation {
                    info.collation = Some(Collation::decode(buf)?);
                }
            }
            SizeClass::Lob => {
                info.max_length = codec::get_i32_le(buf)?;
                if version == TdsVersion::V8_0 && desc.collation {
                    info.collation = Some(Collation::decode(buf)?);
                }
                // LOB descriptors name the owning table inline.
                let name = codec::read_us_varchar(buf, version.is_wide(), encoding)?;
                info.table_name = Some(name);
            }
            SizeClass::PrefixU32 => {
                info.max_length = codec::get_i32_le(buf)?;
            }
        }

        Ok(info)
    }

    /// SQL declaration string for this descriptor (used by prepare paths).
    #[must_use]
    pub fn sql_declaration(&self) -> String {
        let desc = self.wire_type.desc();
        match self.wire_type {
            WireType::Numeric | WireType::Decimal => {
                format!("{}({},{})", desc.name, self.precision, self.scale)
            }
            // Nullable families share one type code per size group.
            WireType::IntN if self.max_length == 8 => "bigint".to_owned(),
            WireType::IntN if self.max_length == 2 => "smallint".to_owned(),
            WireType::IntN if self.max_length == 1 => "tinyint".to_owned(),
            WireType::FltN if self.max_length == 4 => "real".to_owned(),
            WireType::MoneyN if self.max_length == 4 => "smallmoney".to_owned(),
            WireType::DateTimeN if self.max_length == 4 => "smalldatetime".to_owned(),
            // The wire length field counts bytes; nvarchar declarations
            // count UTF-16 characters.
            WireType::BigNVarChar | WireType::BigNChar if self.max_length > 0 => {
                format!("{}({})", desc.name, self.max_length / 2)
            }
            WireType::VarChar
            | WireType::BigVarChar
            | WireType::VarBinary
            | WireType::BigVarBinary
                if self.max_length > 0 =>
            {
                format!("{}({})", desc.name, self.max_length)
            }
            _ => desc.name.to_owned(),
        }
    }
}

/// Largest wire size of a decimal for the dialect's precision limit:
/// 1 sign byte + magnitude (12 bytes for 28 digits, 16 for 38).
#[must_use]
pub fn max_decimal_bytes(version: TdsVersion) -> u8 {
    if version.max_precision() > 28 { 17 } else { 13 }
}

/// Whether the family/dialect pair writes the decimal magnitude
/// least-significant-byte first. Preserved as observed server behavior:
/// SQL Server is LSB-first, Sybase is MSB-first.
#[must_use]
pub fn decimal_lsb_first(server: ServerKind) -> bool {
    matches!(server, ServerKind::SqlServer)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    const ENC: &encoding_rs::Encoding = encoding_rs::WINDOWS_1252;

    #[test]
    fn rejects_unknown_type_byte() {
        assert!(matches!(
            WireType::from_u8(0x99),
            Err(ProtocolError::InvalidDataType(0x99))
        ));
    }

    #[test]
    fn fixed_types_have_no_length_field() {
        let mut buf = Bytes::from_static(&[0x38]);
        let info = TypeInfo::decode(&mut buf, TdsVersion::V7_0, ENC).unwrap();
        assert_eq!(info.wire_type, WireType::Int4);
        assert_eq!(info.max_length, 4);
        assert!(buf.is_empty());
    }

    #[test]
    fn numeric_reads_precision_and_scale() {
        // numeric, max len 9, precision 18, scale 4
        let mut buf = Bytes::from_static(&[0x6C, 0x09, 0x12, 0x04]);
        let info = TypeInfo::decode(&mut buf, TdsVersion::V7_0, ENC).unwrap();
        assert_eq!(info.wire_type, WireType::Numeric);
        assert_eq!(info.precision, 18);
        assert_eq!(info.scale, 4);
    }

    #[test]
    fn big_varchar_reads_collation_on_tds8() {
        // XSYBVARCHAR, max 100, collation 0x0409/52
        let mut buf = Bytes::from_static(&[0xA7, 0x64, 0x00, 0x09, 0x04, 0x00, 0x00, 0x34]);
        let info = TypeInfo::decode(&mut buf, TdsVersion::V8_0, ENC).unwrap();
        assert_eq!(info.max_length, 100);
        let collation = info.collation.unwrap();
        assert_eq!(collation.lcid, 0x0409);
        assert_eq!(collation.sort_id, 52);

        // Same bytes on 7.0: no collation block follows.
        let mut buf = Bytes::from_static(&[0xA7, 0x64, 0x00]);
        let info = TypeInfo::decode(&mut buf, TdsVersion::V7_0, ENC).unwrap();
        assert!(info.collation.is_none());
    }

    #[test]
    fn lob_reads_owning_table() {
        // SYBTEXT on TDS 7.0: i32 size, then US_VARCHAR table name (wide)
        let mut buf = Bytes::from_static(&[
            0x23, 0xFF, 0xFF, 0xFF, 0x7F, // max length
            0x02, 0x00, b't', 0x00, b'1', 0x00,
        ]);
        let info = TypeInfo::decode(&mut buf, TdsVersion::V7_0, ENC).unwrap();
        assert_eq!(info.table_name.as_deref(), Some("t1"));
    }

    #[test]
    fn decimal_wire_size_per_dialect() {
        assert_eq!(max_decimal_bytes(TdsVersion::V7_0), 13);
        assert_eq!(max_decimal_bytes(TdsVersion::V8_0), 17);
    }

    #[test]
    fn sql_declarations() {
        let mut info = TypeInfo::simple(WireType::Decimal);
        info.precision = 28;
        info.scale = 10;
        assert_eq!(info.sql_declaration(), "decimal(28,10)");

        let mut info = TypeInfo::simple(WireType::BigVarChar);
        info.max_length = 8000;
        assert_eq!(info.sql_declaration(), "varchar(8000)");
    }
}
