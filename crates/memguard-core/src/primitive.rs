//! The intercepted primitive set.

use std::ffi::CStr;
use std::fmt;

use serde::Serialize;

/// One of the five bulk-memory/string primitives guarded by the interceptors.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveId {
    /// `memcpy`: non-overlapping block copy.
    Copy = 0,
    /// `memmove`: overlap-safe block copy.
    OverlapMove = 1,
    /// `memset`: block fill.
    Fill = 2,
    /// `strlen`: length of a NUL-terminated string.
    Length = 3,
    /// `strncpy`: bounded string copy with NUL padding.
    BoundedCopy = 4,
}

impl PrimitiveId {
    pub const COUNT: usize = 5;

    /// Every primitive, in resolution order.
    pub const ALL: [PrimitiveId; Self::COUNT] = [
        PrimitiveId::Copy,
        PrimitiveId::OverlapMove,
        PrimitiveId::Fill,
        PrimitiveId::Length,
        PrimitiveId::BoundedCopy,
    ];

    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Conventional public symbol of the genuine implementation.
    #[must_use]
    pub const fn symbol(self) -> &'static CStr {
        match self {
            Self::Copy => c"memcpy",
            Self::OverlapMove => c"memmove",
            Self::Fill => c"memset",
            Self::Length => c"strlen",
            Self::BoundedCopy => c"strncpy",
        }
    }

    /// Disambiguated name the replacement is exported under on platforms
    /// where each image has its own symbol namespace.
    #[must_use]
    pub const fn alternate_symbol(self) -> &'static CStr {
        match self {
            Self::Copy => c"wrap_memcpy",
            Self::OverlapMove => c"wrap_memmove",
            Self::Fill => c"wrap_memset",
            Self::Length => c"wrap_strlen",
            Self::BoundedCopy => c"wrap_strncpy",
        }
    }

    /// Symbol name as a plain string, for diagnostics.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Copy => "memcpy",
            Self::OverlapMove => "memmove",
            Self::Fill => "memset",
            Self::Length => "strlen",
            Self::BoundedCopy => "strncpy",
        }
    }
}

impl fmt::Display for PrimitiveId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indices_follow_declaration_order() {
        for (expected, id) in PrimitiveId::ALL.iter().enumerate() {
            assert_eq!(id.index(), expected);
        }
    }

    #[test]
    fn alternate_symbol_is_prefixed_conventional_symbol() {
        for id in PrimitiveId::ALL {
            let conventional = id.symbol().to_bytes();
            let alternate = id.alternate_symbol().to_bytes();
            assert!(alternate.starts_with(b"wrap_"));
            assert_eq!(&alternate[5..], conventional);
            assert_eq!(id.name().as_bytes(), conventional);
        }
    }
}
