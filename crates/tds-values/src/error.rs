//! Value conversion errors.

use thiserror::Error;

/// Errors raised when converting between wire data and [`crate::SqlValue`].
#[derive(Debug, Error)]
pub enum TypeError {
    /// A value cannot be represented in the requested Rust type.
    #[error("cannot convert {from} to {to}")]
    Conversion {
        /// Source SQL type name.
        from: &'static str,
        /// Target type name.
        to: &'static str,
    },

    /// A numeric value is outside the representable range.
    #[error("{type_name} value out of range (precision {precision}, scale {scale})")]
    OutOfRange {
        /// SQL type name.
        type_name: &'static str,
        /// Declared precision.
        precision: u8,
        /// Declared scale.
        scale: u8,
    },

    /// A date or time component is not a valid calendar value.
    #[error("invalid date/time: days {days}, time units {time}")]
    InvalidDateTime {
        /// Day count since the 1900-01-01 epoch.
        days: i32,
        /// Sub-day units (ticks or minutes, depending on the wire type).
        time: u32,
    },
}
