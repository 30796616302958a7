//! TDS 8.0 collation handling.
//!
//! On TDS 8.0 every character-bearing column descriptor carries a 5-byte
//! collation block: a 4-byte LCID/flags word and a 1-byte sort id. The
//! LCID selects the code page used for narrow (CHAR/VARCHAR/TEXT) data.

use bytes::{BufMut, Bytes};
use encoding_rs::Encoding;

use crate::codec;
use crate::Result;

/// A 5-byte TDS 8.0 collation block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Collation {
    /// Locale id plus collation flag bits.
    pub lcid: u32,
    /// SQL Server sort id (0 for Windows collations).
    pub sort_id: u8,
}

impl Collation {
    /// Decode the 5-byte wire form.
    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        let lcid = codec::get_u32_le(buf)?;
        let sort_id = codec::get_u8(buf)?;
        Ok(Self { lcid, sort_id })
    }

    /// Encode the 5-byte wire form.
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_u32_le(self.lcid);
        dst.put_u8(self.sort_id);
    }

    /// Code-page encoding for narrow character data under this collation.
    ///
    /// Falls back to windows-1252 when the locale is unknown, matching the
    /// server default for unrecognized clients.
    #[must_use]
    pub fn encoding(&self) -> &'static Encoding {
        encoding_for_lcid(self.lcid).unwrap_or(encoding_rs::WINDOWS_1252)
    }
}

impl Default for Collation {
    fn default() -> Self {
        // SQL_Latin1_General_CP1_CI_AS, the server installation default.
        Self {
            lcid: 0x0409,
            sort_id: 52,
        }
    }
}

/// Map an LCID to the code-page encoding used for narrow data.
fn encoding_for_lcid(lcid: u32) -> Option<&'static Encoding> {
    let code_page = code_page_for_lcid(lcid)?;
    match code_page {
        874 => Some(encoding_rs::WINDOWS_874),
        932 => Some(encoding_rs::SHIFT_JIS),
        936 => Some(encoding_rs::GB18030),
        949 => Some(encoding_rs::EUC_KR),
        950 => Some(encoding_rs::BIG5),
        1250 => Some(encoding_rs::WINDOWS_1250),
        1251 => Some(encoding_rs::WINDOWS_1251),
        1252 => Some(encoding_rs::WINDOWS_1252),
        1253 => Some(encoding_rs::WINDOWS_1253),
        1254 => Some(encoding_rs::WINDOWS_1254),
        1255 => Some(encoding_rs::WINDOWS_1255),
        1256 => Some(encoding_rs::WINDOWS_1256),
        1257 => Some(encoding_rs::WINDOWS_1257),
        1258 => Some(encoding_rs::WINDOWS_1258),
        _ => None,
    }
}

/// Windows code page for an LCID's language.
fn code_page_for_lcid(lcid: u32) -> Option<u16> {
    // Locale id occupies the low 20 bits; flags live above.
    match lcid & 0xF_FFFF {
        0x0411 => Some(932),                   // Japanese
        0x0804 | 0x1004 => Some(936),          // Chinese (Simplified)
        0x0404 | 0x0C04 | 0x1404 => Some(950), // Chinese (Traditional)
        0x0412 => Some(949),                   // Korean
        0x041E => Some(874),                   // Thai
        0x042A => Some(1258),                  // Vietnamese

        // Central European
        0x0405 | 0x040E | 0x0415 | 0x0418 | 0x041A | 0x041B | 0x041C | 0x0424 | 0x081A
        | 0x101A | 0x141A => Some(1250),

        // Cyrillic
        0x0402 | 0x0419 | 0x0422 | 0x0423 | 0x042F | 0x0440 | 0x0444 | 0x0450 | 0x0C1A
        | 0x201A | 0x0485 => Some(1251),

        // Greek
        0x0408 => Some(1253),

        // Turkic
        0x041F | 0x042C | 0x0443 => Some(1254),

        // Hebrew
        0x040D => Some(1255),

        // Arabic block
        0x0401 | 0x0420 | 0x0429 | 0x0801 | 0x0C01 | 0x1001 | 0x1401 | 0x1801 | 0x1C01
        | 0x2001 | 0x2401 | 0x2801 | 0x2C01 | 0x3001 | 0x3401 | 0x3801 | 0x3C01 | 0x4001 => {
            Some(1256)
        }

        // Baltic
        0x0425 | 0x0426 | 0x0427 => Some(1257),

        // Everything else in the Latin-1 sphere
        _ => Some(1252),
    }
}
