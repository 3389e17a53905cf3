use std::ffi::c_void;

use memguard_core::{EntryPoint, InterceptError, PrimitiveId, ResolutionRequest, ResolverStrategy, SymbolResolver};

use super::replacement;
use crate::trampoline::Patcher;

/// Patches each genuine entry point to jump to this module's `wrap_<name>`
/// dispatch function; the genuine implementation stays reachable through
/// the patch island.
pub struct TrampolineResolver<'p> {
    patcher: &'p Patcher,
    targets: Option<[*const c_void; PrimitiveId::COUNT]>,
}

impl TrampolineResolver<'static> {
    /// Look targets up by name and patch them with the process-wide patcher.
    #[must_use]
    pub fn new() -> Self {
        Self {
            patcher: Patcher::global(),
            targets: None,
        }
    }
}

impl Default for TrampolineResolver<'static> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'p> TrampolineResolver<'p> {
    /// Patch the given entry points instead of looking them up by name.
    #[must_use]
    pub fn with_targets(patcher: &'p Patcher, targets: [*const c_void; PrimitiveId::COUNT]) -> Self {
        Self {
            patcher,
            targets: Some(targets),
        }
    }

    fn target(&self, request: ResolutionRequest) -> *const c_void {
        match &self.targets {
            Some(targets) => targets[request.id.index()],
            // SAFETY: `symbol_name` is a static NUL-terminated string.
            None => unsafe { libc::dlsym(libc::RTLD_DEFAULT, request.symbol_name.as_ptr()) },
        }
    }
}

impl SymbolResolver for TrampolineResolver<'_> {
    fn strategy(&self) -> ResolverStrategy {
        ResolverStrategy::Trampoline
    }

    fn resolve(&mut self, request: ResolutionRequest) -> Result<EntryPoint, InterceptError> {
        let symbol = request.id.name();
        let target = self.target(request);
        if target.is_null() {
            return Err(InterceptError::UnresolvedSymbol { symbol });
        }
        let wrapper = replacement(request.id);
        if target == wrapper {
            return Err(InterceptError::RecursiveResolutionHazard { symbol });
        }
        // SAFETY: bootstrap runs before any other thread can be inside the
        // target; the wrapper shares the target's C signature.
        unsafe { self.patcher.install(target, wrapper) }
            .map_err(|source| InterceptError::TrampolineInstall { symbol, source })
    }
}
