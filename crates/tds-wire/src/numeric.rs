//! Decimal, numeric and money wire encoding.
//!
//! Decimal/numeric values travel as a sign byte followed by an unscaled
//! magnitude; the scale lives in the column descriptor, never in the data.
//! The two server families disagree about both the magnitude byte order
//! and the sign convention, and both behaviors are required:
//!
//! - SQL Server: magnitude least-significant-byte first, sign byte 0
//!   means negative;
//! - Sybase: magnitude most-significant-byte first, sign byte 0 means
//!   positive.
//!
//! Money is a plain scaled integer at 1/10000 currency units, with the
//! 8-byte form split into two 32-bit halves (high half first).

use rust_decimal::Decimal;
use tds_values::TypeError;

use crate::typeinfo::decimal_lsb_first;
use crate::version::ServerKind;
use crate::{ProtocolError, Result};

/// Decode a decimal/numeric payload (sign byte plus magnitude).
pub fn decode_numeric(
    payload: &[u8],
    precision: u8,
    scale: u8,
    server: ServerKind,
) -> Result<Decimal> {
    let (sign, magnitude) = payload
        .split_first()
        .ok_or(ProtocolError::UnexpectedEof)?;

    if magnitude.len() > 16 {
        return Err(ProtocolError::InvalidLength {
            length: payload.len(),
            context: "numeric magnitude",
        });
    }

    let mut value: i128 = 0;
    if decimal_lsb_first(server) {
        for &b in magnitude.iter().rev() {
            value = (value << 8) | i128::from(b);
        }
    } else {
        for &b in magnitude {
            value = (value << 8) | i128::from(b);
        }
    }

    let negative = match server {
        ServerKind::SqlServer => *sign == 0,
        ServerKind::Sybase => *sign != 0,
    };
    if negative {
        value = -value;
    }

    Decimal::try_from_i128_with_scale(value, u32::from(scale)).map_err(|_| {
        ProtocolError::Type(TypeError::OutOfRange {
            type_name: "numeric",
            precision,
            scale,
        })
    })
}

/// Encode a decimal into its sign-plus-magnitude payload.
///
/// The value is rescaled to the declared scale first; the returned buffer
/// does not include the length byte (the caller owns the framing).
pub fn encode_numeric(
    value: Decimal,
    precision: u8,
    scale: u8,
    server: ServerKind,
) -> Result<Vec<u8>> {
    let mut scaled = value;
    scaled.rescale(u32::from(scale));
    let mantissa = scaled.mantissa();
    let magnitude = mantissa.unsigned_abs();

    // Bytes needed for the magnitude, at least one.
    let bytes = ((128 - magnitude.leading_zeros() as usize) + 7) / 8;
    let bytes = bytes.max(1);
    if bytes > 16 {
        return Err(ProtocolError::Type(TypeError::OutOfRange {
            type_name: "numeric",
            precision,
            scale,
        }));
    }

    let mut out = Vec::with_capacity(1 + bytes);
    let negative = mantissa < 0;
    let sign = match server {
        ServerKind::SqlServer => u8::from(!negative),
        ServerKind::Sybase => u8::from(negative),
    };
    out.push(sign);

    if decimal_lsb_first(server) {
        for i in 0..bytes {
            out.push((magnitude >> (8 * i)) as u8);
        }
    } else {
        for i in (0..bytes).rev() {
            out.push((magnitude >> (8 * i)) as u8);
        }
    }

    Ok(out)
}

/// Decode an 8-byte money value: high 32 bits then low 32 bits.
#[must_use]
pub fn decode_money8(high: i32, low: u32) -> Decimal {
    let units = (i64::from(high) << 32) | i64::from(low);
    Decimal::from_i128_with_scale(i128::from(units), 4)
}

/// Decode a 4-byte smallmoney value.
#[must_use]
pub fn decode_money4(units: i32) -> Decimal {
    Decimal::from_i128_with_scale(i128::from(units), 4)
}

/// Encode a money value into its 64-bit unit count.
pub fn encode_money8(value: Decimal) -> Result<(i32, u32)> {
    let units = money_units(value, i128::from(i64::MIN), i128::from(i64::MAX))? as i64;
    Ok(((units >> 32) as i32, units as u32))
}

/// Encode a smallmoney value into its 32-bit unit count.
pub fn encode_money4(value: Decimal) -> Result<i32> {
    Ok(money_units(value, i128::from(i32::MIN), i128::from(i32::MAX))? as i32)
}

fn money_units(value: Decimal, min: i128, max: i128) -> Result<i128> {
    let mut scaled = value;
    scaled.rescale(4);
    let units = scaled.mantissa();
    if units < min || units > max {
        return Err(ProtocolError::Type(TypeError::OutOfRange {
            type_name: "money",
            precision: 19,
            scale: 4,
        }));
    }
    Ok(units)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn sqlserver_magnitude_is_lsb_first() {
        let value = Decimal::from_str("1234.56").unwrap();
        let payload = encode_numeric(value, 18, 2, ServerKind::SqlServer).unwrap();
        // 123456 = 0x01E240, LSB first, sign byte 1 (positive).
        assert_eq!(payload, vec![1, 0x40, 0xE2, 0x01]);

        let back = decode_numeric(&payload, 18, 2, ServerKind::SqlServer).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn sybase_magnitude_is_msb_first() {
        let value = Decimal::from_str("1234.56").unwrap();
        let payload = encode_numeric(value, 18, 2, ServerKind::Sybase).unwrap();
        // MSB first, sign byte 0 (positive).
        assert_eq!(payload, vec![0, 0x01, 0xE2, 0x40]);

        let back = decode_numeric(&payload, 18, 2, ServerKind::Sybase).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn sign_conventions_are_inverted_between_families() {
        let value = Decimal::from_str("-42").unwrap();

        let ms = encode_numeric(value, 10, 0, ServerKind::SqlServer).unwrap();
        assert_eq!(ms[0], 0); // 0 = negative on SQL Server
        assert_eq!(
            decode_numeric(&ms, 10, 0, ServerKind::SqlServer).unwrap(),
            value
        );

        let syb = encode_numeric(value, 10, 0, ServerKind::Sybase).unwrap();
        assert_eq!(syb[0], 1); // non-zero = negative on Sybase
        assert_eq!(
            decode_numeric(&syb, 10, 0, ServerKind::Sybase).unwrap(),
            value
        );
    }

    #[test]
    fn preserves_magnitude_and_scale_at_max_precision() {
        // 28 digits, the classic-dialect precision limit.
        let value = Decimal::from_str("1234567890123456789012345.678").unwrap();
        for server in [ServerKind::SqlServer, ServerKind::Sybase] {
            let payload = encode_numeric(value, 28, 3, server).unwrap();
            let back = decode_numeric(&payload, 28, 3, server).unwrap();
            assert_eq!(back, value);
            assert_eq!(back.scale(), 3);
        }
    }

    #[test]
    fn oversized_magnitude_is_rejected() {
        // 17 magnitude bytes cannot be a legal numeric.
        let payload = [1u8; 18];
        assert!(decode_numeric(&payload, 38, 0, ServerKind::SqlServer).is_err());
    }

    #[test]
    fn money_halves_round_trip() {
        let value = Decimal::from_str("-935298.4567").unwrap();
        let (high, low) = encode_money8(value).unwrap();
        assert_eq!(decode_money8(high, low), value);

        let small = Decimal::from_str("214748.3647").unwrap();
        let units = encode_money4(small).unwrap();
        assert_eq!(units, i32::MAX);
        assert_eq!(decode_money4(units), small);
    }

    #[test]
    fn smallmoney_overflow_is_rejected() {
        let too_big = Decimal::from_str("214748.3648").unwrap();
        assert!(encode_money4(too_big).is_err());
    }
}
