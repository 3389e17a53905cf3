use memguard_core::{EntryPoint, InterceptError, ResolutionRequest, ResolverStrategy, SymbolResolver};

use super::replacement;

/// `dlsym(RTLD_NEXT, name)`: the next image in load order after this one,
/// which on a flat namespace is the platform library.
#[derive(Debug, Default, Clone, Copy)]
pub struct DynamicResolver {
    _private: (),
}

impl DynamicResolver {
    #[must_use]
    pub const fn new() -> Self {
        Self { _private: () }
    }
}

impl SymbolResolver for DynamicResolver {
    fn strategy(&self) -> ResolverStrategy {
        ResolverStrategy::DynamicLookup
    }

    fn resolve(&mut self, request: ResolutionRequest) -> Result<EntryPoint, InterceptError> {
        let symbol = request.id.name();
        // SAFETY: `symbol_name` is a static NUL-terminated string; RTLD_NEXT
        // searches the images loaded after the caller's.
        let addr = unsafe { libc::dlsym(libc::RTLD_NEXT, request.symbol_name.as_ptr()) };
        let entry = EntryPoint::new(addr).ok_or(InterceptError::UnresolvedSymbol { symbol })?;
        if entry.as_ptr() == replacement(request.id) {
            return Err(InterceptError::RecursiveResolutionHazard { symbol });
        }
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use memguard_core::PrimitiveId;

    use super::*;

    #[test]
    fn resolves_every_primitive_to_a_foreign_entry() {
        let mut resolver = DynamicResolver::new();
        for id in PrimitiveId::ALL {
            let entry = resolver.resolve(ResolutionRequest::new(id)).unwrap();
            assert_ne!(entry.as_ptr(), replacement(id), "{id} resolved to itself");
        }
    }

    #[test]
    fn unknown_symbol_is_unresolved() {
        let mut resolver = DynamicResolver::new();
        let request = ResolutionRequest {
            id: PrimitiveId::Length,
            symbol_name: c"memguard_no_such_symbol",
        };
        assert_eq!(
            resolver.resolve(request),
            Err(InterceptError::UnresolvedSymbol { symbol: "strlen" })
        );
    }
}
