//! Contract with the external validity checker.
//!
//! The shadow encoding that actually decides accessibility lives elsewhere;
//! this module only fixes the question the interceptors ask and the shape of
//! the answer.

use std::fmt;

use serde::Serialize;

/// Direction of an access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessKind {
    Read,
    Write,
}

impl fmt::Display for AccessKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Read => "read",
            Self::Write => "write",
        })
    }
}

/// Byte range `[start, start + len)` touched by a primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccessRange {
    pub start: usize,
    pub len: usize,
}

impl AccessRange {
    #[must_use]
    pub const fn new(start: usize, len: usize) -> Self {
        Self { start, len }
    }

    /// Exclusive end, or `None` when the range wraps the address space.
    #[must_use]
    pub const fn end(&self) -> Option<usize> {
        self.start.checked_add(self.len)
    }

    #[must_use]
    pub fn overlaps(&self, other: &AccessRange) -> bool {
        if self.len == 0 || other.len == 0 {
            return false;
        }
        let self_end = self.start.saturating_add(self.len);
        let other_end = other.start.saturating_add(other.len);
        self.start < other_end && other.start < self_end
    }
}

/// Category of an inaccessible access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ViolationKind {
    /// Access into a poisoned redzone next to a live object.
    BufferOverflow,
    /// Access into memory that was released.
    UseAfterFree,
    /// Access to the first page of the address space.
    NullPage,
    /// The range wraps past the top of the address space.
    AddressOverflow,
    /// Source and destination of a non-overlapping copy overlap.
    ParamOverlap,
    /// Poisoned for a reason the validator does not classify further.
    Unaddressable,
}

impl ViolationKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::BufferOverflow => "buffer-overflow",
            Self::UseAfterFree => "use-after-free",
            Self::NullPage => "null-page",
            Self::AddressOverflow => "address-overflow",
            Self::ParamOverlap => "param-overlap",
            Self::Unaddressable => "unaddressable",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected violation: what went wrong and the first offending address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub kind: ViolationKind,
    pub address: usize,
}

/// Validator answer for one range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeCheck {
    Accessible,
    Violation(Violation),
}

/// Decides whether a byte range may currently be accessed.
pub trait Validator: Sync {
    fn check_range(&self, address: usize, length: usize, access: AccessKind) -> RangeCheck;
}

impl<V: Validator + ?Sized> Validator for &V {
    #[inline]
    fn check_range(&self, address: usize, length: usize, access: AccessKind) -> RangeCheck {
        (**self).check_range(address, length, access)
    }
}

/// Checks that need no shadow memory: the null page and wrap-around.
///
/// Used when the embedding runtime registers no validator of its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicValidator;

impl BasicValidator {
    const NULL_PAGE: usize = 4096;
}

impl Validator for BasicValidator {
    #[inline]
    fn check_range(&self, address: usize, length: usize, _access: AccessKind) -> RangeCheck {
        if length == 0 {
            return RangeCheck::Accessible;
        }
        if address < Self::NULL_PAGE {
            return RangeCheck::Violation(Violation {
                kind: ViolationKind::NullPage,
                address,
            });
        }
        if address.checked_add(length).is_none() {
            return RangeCheck::Violation(Violation {
                kind: ViolationKind::AddressOverflow,
                address: usize::MAX,
            });
        }
        RangeCheck::Accessible
    }
}
