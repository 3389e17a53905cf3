//! The narrow capability every resolution strategy implements.

use std::ffi::{CStr, c_void};
use std::fmt;

use serde::Serialize;

use crate::binding::EntryPoint;
use crate::error::InterceptError;
use crate::primitive::PrimitiveId;

/// How genuine implementations were located.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolverStrategy {
    /// `dlsym(RTLD_NEXT, name)` on flat-namespace platforms.
    DynamicLookup,
    /// In-place entry patching with a relocated-prologue island.
    Trampoline,
    /// Caller-supplied addresses (static embeddings, harnesses).
    Fixed,
}

impl fmt::Display for ResolverStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::DynamicLookup => "dynamic-lookup",
            Self::Trampoline => "trampoline",
            Self::Fixed => "fixed",
        })
    }
}

/// One resolution step; consumed by the resolver and never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionRequest {
    pub id: PrimitiveId,
    pub symbol_name: &'static CStr,
}

impl ResolutionRequest {
    #[must_use]
    pub const fn new(id: PrimitiveId) -> Self {
        Self {
            id,
            symbol_name: id.symbol(),
        }
    }
}

/// `resolve(name) -> entry point`.
///
/// Implementations run before any primitive is usable, so they must stick to
/// fixed-size, non-intercepted operations: no heap growth, no formatting, no
/// C-string helpers.
pub trait SymbolResolver {
    fn strategy(&self) -> ResolverStrategy;

    fn resolve(&mut self, request: ResolutionRequest) -> Result<EntryPoint, InterceptError>;
}

impl<R: SymbolResolver + ?Sized> SymbolResolver for &mut R {
    fn strategy(&self) -> ResolverStrategy {
        (**self).strategy()
    }

    fn resolve(&mut self, request: ResolutionRequest) -> Result<EntryPoint, InterceptError> {
        (**self).resolve(request)
    }
}

/// Resolver over addresses known ahead of time, indexed by [`PrimitiveId`].
///
/// A null address resolves as [`InterceptError::UnresolvedSymbol`]. Every
/// request is recorded so callers can check resolution happened once per
/// primitive.
#[derive(Debug, Clone)]
pub struct FixedResolver {
    addresses: [*const c_void; PrimitiveId::COUNT],
    requests: [PrimitiveId; PrimitiveId::COUNT * 2],
    request_count: usize,
}

impl FixedResolver {
    #[must_use]
    pub fn new(addresses: [*const c_void; PrimitiveId::COUNT]) -> Self {
        Self {
            addresses,
            requests: [PrimitiveId::Copy; PrimitiveId::COUNT * 2],
            request_count: 0,
        }
    }

    /// Same resolver with `id` made unavailable.
    #[must_use]
    pub fn without(mut self, id: PrimitiveId) -> Self {
        self.addresses[id.index()] = std::ptr::null();
        self
    }

    /// Requests served so far, in order.
    #[must_use]
    pub fn requests(&self) -> &[PrimitiveId] {
        &self.requests[..self.request_count.min(self.requests.len())]
    }
}

impl SymbolResolver for FixedResolver {
    fn strategy(&self) -> ResolverStrategy {
        ResolverStrategy::Fixed
    }

    fn resolve(&mut self, request: ResolutionRequest) -> Result<EntryPoint, InterceptError> {
        if let Some(slot) = self.requests.get_mut(self.request_count) {
            *slot = request.id;
        }
        self.request_count += 1;
        EntryPoint::new(self.addresses[request.id.index()]).ok_or(InterceptError::UnresolvedSymbol {
            symbol: request.id.name(),
        })
    }
}
