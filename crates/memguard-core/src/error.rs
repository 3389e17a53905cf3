//! Error taxonomy for resolution, patching and bootstrap.
//!
//! Every payload is `&'static` so the fatal path can print an error without
//! allocating or formatting (both may reach an intercepted primitive).

use thiserror::Error;

/// Why a trampoline could not be installed over a genuine entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PatchError {
    #[error("instruction at prologue offset {offset} cannot be decoded")]
    UnsupportedInstruction { offset: usize },
    #[error("instruction at prologue offset {offset} is pc-relative and cannot be relocated")]
    PcRelative { offset: usize },
    #[error("function returns within the {needed}-byte patch window")]
    FunctionTooShort { needed: usize },
    #[error("target is already patched")]
    AlreadyPatched,
    #[error("changing page protection failed (errno {errno})")]
    Protect { errno: i32 },
    #[error("mapping the trampoline island failed (errno {errno})")]
    IslandMap { errno: i32 },
    #[error("trampoline island pool is exhausted")]
    IslandExhausted,
    #[error("binary patching is not supported on this architecture")]
    UnsupportedArch,
}

impl PatchError {
    /// Stable short code, printable without formatting.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::UnsupportedInstruction { .. } => "unsupported-instruction",
            Self::PcRelative { .. } => "pc-relative-instruction",
            Self::FunctionTooShort { .. } => "function-too-short",
            Self::AlreadyPatched => "already-patched",
            Self::Protect { .. } => "mprotect-failed",
            Self::IslandMap { .. } => "island-map-failed",
            Self::IslandExhausted => "island-exhausted",
            Self::UnsupportedArch => "unsupported-arch",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum InterceptError {
    /// The platform library does not provide the primitive.
    #[error("unresolved symbol `{symbol}`")]
    UnresolvedSymbol { symbol: &'static str },
    /// Resolution would route the primitive back into this module.
    #[error("recursive resolution hazard while resolving `{symbol}`")]
    RecursiveResolutionHazard { symbol: &'static str },
    /// The trampoline strategy could not patch the genuine entry point.
    #[error("cannot install trampoline for `{symbol}`: {source}")]
    TrampolineInstall {
        symbol: &'static str,
        #[source]
        source: PatchError,
    },
    /// Collaborators were registered after the table was sealed.
    #[error("interceptors are already bootstrapped")]
    AlreadyBootstrapped,
    /// A previous bootstrap attempt failed; the table will never be sealed.
    #[error("bootstrap previously failed")]
    BootstrapFailed,
}

impl InterceptError {
    /// Stable short code, printable without formatting.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::UnresolvedSymbol { .. } => "unresolved-symbol",
            Self::RecursiveResolutionHazard { .. } => "recursive-resolution-hazard",
            Self::TrampolineInstall { .. } => "trampoline-install",
            Self::AlreadyBootstrapped => "already-bootstrapped",
            Self::BootstrapFailed => "bootstrap-failed",
        }
    }

    /// Symbol the error is about, if any.
    #[must_use]
    pub const fn symbol(&self) -> Option<&'static str> {
        match self {
            Self::UnresolvedSymbol { symbol }
            | Self::RecursiveResolutionHazard { symbol }
            | Self::TrampolineInstall { symbol, .. } => Some(symbol),
            Self::AlreadyBootstrapped | Self::BootstrapFailed => None,
        }
    }

    /// Detail code of the underlying patch failure, if any.
    #[must_use]
    pub const fn detail(&self) -> Option<&'static str> {
        match self {
            Self::TrampolineInstall { source, .. } => Some(source.code()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_symbol() {
        let err = InterceptError::UnresolvedSymbol { symbol: "memmove" };
        assert_eq!(err.to_string(), "unresolved symbol `memmove`");
        assert_eq!(err.symbol(), Some("memmove"));
        assert_eq!(err.code(), "unresolved-symbol");
    }

    #[test]
    fn trampoline_error_exposes_patch_detail() {
        let err = InterceptError::TrampolineInstall {
            symbol: "memset",
            source: PatchError::PcRelative { offset: 4 },
        };
        assert_eq!(err.detail(), Some("pc-relative-instruction"));
        assert!(err.to_string().contains("offset 4"));
        assert!(std::error::Error::source(&err).is_some());
    }
}
