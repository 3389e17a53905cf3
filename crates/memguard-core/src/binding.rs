//! Real-symbol table: one genuine entry point per primitive, sealed once.

use std::ffi::{c_char, c_int, c_void};
use std::fmt;
use std::ptr::NonNull;

use serde::{Serialize, Serializer};

use crate::error::InterceptError;
use crate::primitive::PrimitiveId;
use crate::resolver::{ResolutionRequest, ResolverStrategy, SymbolResolver};

pub type MemcpyFn = unsafe extern "C" fn(*mut c_void, *const c_void, usize) -> *mut c_void;
pub type MemmoveFn = unsafe extern "C" fn(*mut c_void, *const c_void, usize) -> *mut c_void;
pub type MemsetFn = unsafe extern "C" fn(*mut c_void, c_int, usize) -> *mut c_void;
pub type StrlenFn = unsafe extern "C" fn(*const c_char) -> usize;
pub type StrncpyFn = unsafe extern "C" fn(*mut c_char, *const c_char, usize) -> *mut c_char;

/// Address of a callable genuine implementation.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryPoint(NonNull<c_void>);

// SAFETY: an entry point is a code address; it is never dereferenced as data.
unsafe impl Send for EntryPoint {}
// SAFETY: see above.
unsafe impl Sync for EntryPoint {}

impl EntryPoint {
    #[inline]
    #[must_use]
    pub fn new(addr: *const c_void) -> Option<Self> {
        NonNull::new(addr.cast_mut()).map(Self)
    }

    #[inline]
    #[must_use]
    pub fn as_ptr(self) -> *const c_void {
        self.0.as_ptr().cast_const()
    }

    #[inline]
    #[must_use]
    pub fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }
}

impl fmt::Debug for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntryPoint({:#x})", self.addr())
    }
}

impl Serialize for EntryPoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("{:#x}", self.addr()))
    }
}

/// Resolution state of one primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RealBinding {
    pub id: PrimitiveId,
    pub entry_point: Option<EntryPoint>,
}

impl RealBinding {
    #[must_use]
    pub const fn unresolved(id: PrimitiveId) -> Self {
        Self {
            id,
            entry_point: None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn resolved(&self) -> bool {
        self.entry_point.is_some()
    }
}

/// The sealed table of genuine implementations.
///
/// A value of this type only exists once every primitive resolved, so the
/// accessors are total and never branch on readiness. Must stay a few words:
/// bootstrap moves it while the exported `memcpy` is not yet usable.
#[derive(Clone, Copy)]
pub struct RealSymbolTable {
    entries: [EntryPoint; PrimitiveId::COUNT],
    strategy: ResolverStrategy,
}

impl RealSymbolTable {
    /// Resolve every primitive through `resolver`, stopping at the first
    /// failure.
    ///
    /// The loop touches only fixed-size arrays so it never reaches one of the
    /// primitives it is resolving.
    pub fn resolve_all<R: SymbolResolver + ?Sized>(resolver: &mut R) -> Result<Self, InterceptError> {
        let mut resolved: [Option<EntryPoint>; PrimitiveId::COUNT] = [None; PrimitiveId::COUNT];
        for id in PrimitiveId::ALL {
            let slot = &mut resolved[id.index()];
            debug_assert!(slot.is_none(), "{id} resolved twice");
            *slot = Some(resolver.resolve(ResolutionRequest::new(id))?);
        }
        let entry = |id: PrimitiveId| resolved[id.index()].ok_or(InterceptError::UnresolvedSymbol { symbol: id.name() });
        Ok(Self {
            entries: [
                entry(PrimitiveId::Copy)?,
                entry(PrimitiveId::OverlapMove)?,
                entry(PrimitiveId::Fill)?,
                entry(PrimitiveId::Length)?,
                entry(PrimitiveId::BoundedCopy)?,
            ],
            strategy: resolver.strategy(),
        })
    }

    /// Genuine entry point for `id`.
    #[inline]
    #[must_use]
    pub fn get(&self, id: PrimitiveId) -> EntryPoint {
        self.entries[id.index()]
    }

    #[must_use]
    pub fn binding(&self, id: PrimitiveId) -> RealBinding {
        RealBinding {
            id,
            entry_point: Some(self.get(id)),
        }
    }

    /// Every binding, in resolution order.
    #[must_use]
    pub fn bindings(&self) -> [RealBinding; PrimitiveId::COUNT] {
        PrimitiveId::ALL.map(|id| self.binding(id))
    }

    #[must_use]
    pub fn strategy(&self) -> ResolverStrategy {
        self.strategy
    }

    #[inline]
    pub fn real_memcpy(&self) -> MemcpyFn {
        // SAFETY: each entry point was resolved for the symbol whose C
        // signature the fn type spells out.
        unsafe { std::mem::transmute::<*const c_void, MemcpyFn>(self.get(PrimitiveId::Copy).as_ptr()) }
    }

    #[inline]
    pub fn real_memmove(&self) -> MemmoveFn {
        // SAFETY: as in `real_memcpy`.
        unsafe { std::mem::transmute::<*const c_void, MemmoveFn>(self.get(PrimitiveId::OverlapMove).as_ptr()) }
    }

    #[inline]
    pub fn real_memset(&self) -> MemsetFn {
        // SAFETY: as in `real_memcpy`.
        unsafe { std::mem::transmute::<*const c_void, MemsetFn>(self.get(PrimitiveId::Fill).as_ptr()) }
    }

    #[inline]
    pub fn real_strlen(&self) -> StrlenFn {
        // SAFETY: as in `real_memcpy`.
        unsafe { std::mem::transmute::<*const c_void, StrlenFn>(self.get(PrimitiveId::Length).as_ptr()) }
    }

    #[inline]
    pub fn real_strncpy(&self) -> StrncpyFn {
        // SAFETY: as in `real_memcpy`.
        unsafe { std::mem::transmute::<*const c_void, StrncpyFn>(self.get(PrimitiveId::BoundedCopy).as_ptr()) }
    }
}

impl fmt::Debug for RealSymbolTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealSymbolTable")
            .field("strategy", &self.strategy)
            .field("bindings", &self.bindings())
            .finish()
    }
}
