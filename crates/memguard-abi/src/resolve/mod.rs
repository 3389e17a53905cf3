//! Platform resolvers.
//!
//! Both strategies are always compiled so either can be exercised in tests;
//! [`PlatformResolver`] names the one the bootstrap uses on this target.

mod dynamic;
mod trampoline;

pub use dynamic::DynamicResolver;
pub use trampoline::TrampolineResolver;

use std::ffi::{CStr, c_void};

use memguard_core::{EntryPoint, PrimitiveId};

use crate::string_abi;

#[cfg(not(memguard_isolated_namespace))]
pub type PlatformResolver = DynamicResolver;
#[cfg(memguard_isolated_namespace)]
pub type PlatformResolver = TrampolineResolver<'static>;

/// Resolver for this build's namespace model.
#[must_use]
pub fn platform_resolver() -> PlatformResolver {
    PlatformResolver::new()
}

/// Address of this module's own dispatch function for `id`.
#[must_use]
pub fn replacement(id: PrimitiveId) -> *const c_void {
    match id {
        PrimitiveId::Copy => string_abi::memcpy as *const c_void,
        PrimitiveId::OverlapMove => string_abi::memmove as *const c_void,
        PrimitiveId::Fill => string_abi::memset as *const c_void,
        PrimitiveId::Length => string_abi::strlen as *const c_void,
        PrimitiveId::BoundedCopy => string_abi::strncpy as *const c_void,
    }
}

/// Public name this build exports the dispatch function for `id` under.
#[must_use]
pub fn exported_symbol(id: PrimitiveId) -> &'static CStr {
    if cfg!(memguard_isolated_namespace) {
        id.alternate_symbol()
    } else {
        id.symbol()
    }
}

/// Path of the loaded image containing `entry`, as reported by `dladdr`.
///
/// Allocates; only for use after bootstrap.
#[must_use]
pub fn module_path(entry: EntryPoint) -> Option<String> {
    // SAFETY: Dl_info is plain old data; an all-zero value is valid.
    let mut info: libc::Dl_info = unsafe { std::mem::zeroed() };
    // SAFETY: dladdr only reads the address and fills `info`.
    if unsafe { libc::dladdr(entry.as_ptr(), &mut info) } == 0 || info.dli_fname.is_null() {
        return None;
    }
    // SAFETY: dli_fname points at a NUL-terminated path owned by the loader.
    let path = unsafe { CStr::from_ptr(info.dli_fname) };
    Some(path.to_string_lossy().into_owned())
}

/// Nearest exported symbol at or below `entry`, as reported by `dladdr`.
#[must_use]
pub fn symbol_name(entry: EntryPoint) -> Option<String> {
    // SAFETY: Dl_info is plain old data; an all-zero value is valid.
    let mut info: libc::Dl_info = unsafe { std::mem::zeroed() };
    // SAFETY: dladdr only reads the address and fills `info`.
    if unsafe { libc::dladdr(entry.as_ptr(), &mut info) } == 0 || info.dli_sname.is_null() {
        return None;
    }
    // SAFETY: dli_sname points at a NUL-terminated name owned by the loader.
    let name = unsafe { CStr::from_ptr(info.dli_sname) };
    Some(name.to_string_lossy().into_owned())
}
