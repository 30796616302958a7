//! Protocol dialect and server family identification.

use crate::packet::{DEFAULT_PACKET_SIZE, DEFAULT_PACKET_SIZE_70};

/// The four supported TDS dialects.
///
/// The dialect is fixed at connect time and never changes for the life of
/// the connection; almost every width decision in the codec hangs off it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TdsVersion {
    /// TDS 4.2 — SQL Server 6.x and Sybase in compatibility mode.
    V4_2,
    /// TDS 5.0 — Sybase ASE.
    V5_0,
    /// TDS 7.0 — SQL Server 7.0.
    V7_0,
    /// TDS 8.0 — SQL Server 2000 (also known as 7.1).
    V8_0,
}

impl TdsVersion {
    /// Whether strings on the wire are UCS-2 little-endian rather than
    /// single-byte code-page data.
    #[must_use]
    pub fn is_wide(self) -> bool {
        self >= Self::V7_0
    }

    /// Whether this dialect uses the offset-table MS login record.
    #[must_use]
    pub fn uses_login7(self) -> bool {
        self >= Self::V7_0
    }

    /// Raw version word for the LOGIN7 header.
    #[must_use]
    pub fn login7_version(self) -> u32 {
        match self {
            Self::V7_0 => 0x7000_0000,
            Self::V8_0 => 0x7100_0001,
            // Legacy dialects never build a LOGIN7 record.
            Self::V4_2 | Self::V5_0 => 0,
        }
    }

    /// Version bytes carried in the legacy login records.
    #[must_use]
    pub fn legacy_version_bytes(self) -> [u8; 4] {
        match self {
            Self::V5_0 => [5, 0, 0, 0],
            _ => [4, 2, 0, 0],
        }
    }

    /// Default network packet size for this dialect.
    #[must_use]
    pub fn default_packet_size(self) -> usize {
        if self >= Self::V7_0 {
            DEFAULT_PACKET_SIZE_70
        } else {
            DEFAULT_PACKET_SIZE
        }
    }

    /// Maximum decimal/numeric precision the dialect accepts.
    #[must_use]
    pub fn max_precision(self) -> u8 {
        match self {
            Self::V8_0 => 38,
            _ => 28,
        }
    }

    /// Largest inline (non-LOB) narrow character/binary value in bytes.
    #[must_use]
    pub fn max_inline_bytes(self) -> usize {
        if self.is_wide() { 8000 } else { 255 }
    }

    /// Largest inline wide character value in characters (TDS 7.0+ only).
    pub const MAX_INLINE_CHARS: usize = 4000;
}

impl std::fmt::Display for TdsVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::V4_2 => "4.2",
            Self::V5_0 => "5.0",
            Self::V7_0 => "7.0",
            Self::V8_0 => "8.0",
        };
        f.write_str(s)
    }
}

/// Server product family.
///
/// A handful of wire behaviors differ between the families even at the
/// same dialect: decimal magnitude byte order, batch error policy and the
/// DONE row-count normalization rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServerKind {
    /// Microsoft SQL Server.
    SqlServer,
    /// Sybase Adaptive Server Enterprise.
    Sybase,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dialect_ordering() {
        assert!(TdsVersion::V4_2 < TdsVersion::V5_0);
        assert!(TdsVersion::V5_0 < TdsVersion::V7_0);
        assert!(TdsVersion::V7_0 < TdsVersion::V8_0);
    }

    #[test]
    fn wide_string_threshold() {
        assert!(!TdsVersion::V4_2.is_wide());
        assert!(!TdsVersion::V5_0.is_wide());
        assert!(TdsVersion::V7_0.is_wide());
        assert!(TdsVersion::V8_0.is_wide());
    }

    #[test]
    fn login7_version_words() {
        assert_eq!(TdsVersion::V7_0.login7_version(), 0x7000_0000);
        assert_eq!(TdsVersion::V8_0.login7_version(), 0x7100_0001);
    }

    #[test]
    fn packet_size_defaults() {
        assert_eq!(TdsVersion::V5_0.default_packet_size(), 512);
        assert_eq!(TdsVersion::V8_0.default_packet_size(), 4096);
    }

    #[test]
    fn precision_limits() {
        assert_eq!(TdsVersion::V7_0.max_precision(), 28);
        assert_eq!(TdsVersion::V8_0.max_precision(), 38);
    }
}
