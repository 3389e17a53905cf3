//! In-place entry patching.
//!
//! [`Patcher::install`] overwrites the entry of a genuine function with an
//! absolute redirect to a replacement and copies the displaced instructions
//! into an executable island that jumps back past the redirect. Calling the
//! island behaves exactly like calling the unpatched function.
//!
//! All state lives in fixed-size arrays behind one lock; installation runs
//! during bootstrap, before the heap may be used.

#[cfg(target_arch = "aarch64")]
mod aarch64;
#[cfg(target_arch = "x86_64")]
mod x86_64;

#[cfg(target_arch = "aarch64")]
use aarch64 as arch;
#[cfg(target_arch = "x86_64")]
use x86_64 as arch;

use std::ffi::c_void;

use memguard_core::{EntryPoint, PatchError, raw};
use parking_lot::Mutex;

/// Upper bound on displaced prologue bytes.
pub const MAX_PATCH_LEN: usize = 32;

const MAX_PATCHES: usize = 16;
const ISLAND_STRIDE: usize = 64;

/// Record of one installed redirect.
#[derive(Debug, Clone, Copy)]
pub struct InstalledPatch {
    pub target: usize,
    pub replacement: usize,
    pub island: usize,
    pub stolen_len: usize,
    original: [u8; MAX_PATCH_LEN],
}

impl InstalledPatch {
    /// Bytes the redirect displaced from the target.
    #[must_use]
    pub fn original_bytes(&self) -> &[u8] {
        &self.original[..self.stolen_len]
    }
}

struct Registry {
    patches: [Option<InstalledPatch>; MAX_PATCHES],
    islands: IslandPool,
}

/// Owner of every redirect installed in the process.
pub struct Patcher {
    registry: Mutex<Registry>,
}

static GLOBAL: Patcher = Patcher::new();

impl Patcher {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            registry: parking_lot::const_mutex(Registry {
                patches: [None; MAX_PATCHES],
                islands: IslandPool::empty(),
            }),
        }
    }

    /// Process-wide patcher used by the trampoline resolver.
    #[must_use]
    pub fn global() -> &'static Patcher {
        &GLOBAL
    }

    /// Redirect `target` to `replacement` and return the island through which
    /// the genuine implementation stays reachable.
    ///
    /// # Safety
    ///
    /// `target` must be the entry of a function that no thread is executing
    /// while the patch is written, with at least [`MAX_PATCH_LEN`] readable
    /// bytes. `replacement` must have the same signature.
    pub unsafe fn install(&self, target: *const c_void, replacement: *const c_void) -> Result<EntryPoint, PatchError> {
        #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
        {
            let _ = (target, replacement);
            Err(PatchError::UnsupportedArch)
        }
        #[cfg(any(target_arch = "x86_64", target_arch = "aarch64"))]
        {
            let mut registry = self.registry.lock();
            let target_addr = target as usize;
            if registry.patches.iter().flatten().any(|patch| patch.target == target_addr) {
                return Err(PatchError::AlreadyPatched);
            }
            let slot = registry
                .patches
                .iter()
                .position(Option::is_none)
                .ok_or(PatchError::IslandExhausted)?;

            let mut window = [0u8; MAX_PATCH_LEN];
            // SAFETY: caller guarantees MAX_PATCH_LEN readable bytes at target.
            unsafe { raw::copy_bytes(window.as_mut_ptr(), target.cast(), MAX_PATCH_LEN) };
            let stolen_len = arch::relocatable_len(&window)?;

            // Earlier installs may already redirect memcpy/memset to
            // dispatch functions that are not usable yet: raw copies only.
            let mut island = [0u8; ISLAND_STRIDE];
            let back = arch::encode_jump(target_addr + stolen_len);
            // SAFETY: stolen_len + JUMP_LEN <= ISLAND_STRIDE.
            unsafe {
                raw::copy_bytes(island.as_mut_ptr(), window.as_ptr(), stolen_len);
                raw::copy_bytes(island.as_mut_ptr().add(stolen_len), back.as_ptr(), arch::JUMP_LEN);
            }
            let island_addr = registry.islands.push(&island[..stolen_len + arch::JUMP_LEN])?;

            let patch = arch::encode_patch(replacement as usize, stolen_len);
            // SAFETY: caller guarantees the target is a quiescent function entry.
            unsafe { write_code(target.cast_mut().cast(), &patch[..stolen_len])? };

            registry.patches[slot] = Some(InstalledPatch {
                target: target_addr,
                replacement: replacement as usize,
                island: island_addr,
                stolen_len,
                original: window,
            });
            EntryPoint::new(island_addr as *const c_void).ok_or(PatchError::IslandMap { errno: 0 })
        }
    }

    /// The redirect installed over `target`, if any.
    #[must_use]
    pub fn installed(&self, target: *const c_void) -> Option<InstalledPatch> {
        let registry = self.registry.lock();
        registry
            .patches
            .iter()
            .flatten()
            .find(|patch| patch.target == target as usize)
            .copied()
    }

    #[must_use]
    pub fn installed_count(&self) -> usize {
        self.registry.lock().patches.iter().flatten().count()
    }
}

impl Default for Patcher {
    fn default() -> Self {
        Self::new()
    }
}

/// One lazily mapped page carved into fixed-stride islands.
struct IslandPool {
    page: usize,
    page_len: usize,
    used: usize,
}

impl IslandPool {
    const fn empty() -> Self {
        Self {
            page: 0,
            page_len: 0,
            used: 0,
        }
    }

    fn push(&mut self, code: &[u8]) -> Result<usize, PatchError> {
        debug_assert!(code.len() <= ISLAND_STRIDE);
        if self.page == 0 {
            self.map()?;
        }
        if self.used + ISLAND_STRIDE > self.page_len {
            return Err(PatchError::IslandExhausted);
        }
        let island = self.page + self.used;
        // SAFETY: the page is ours and the island lies inside it.
        unsafe { self.write(island as *mut u8, code)? };
        self.used += ISLAND_STRIDE;
        Ok(island)
    }

    fn map(&mut self) -> Result<(), PatchError> {
        let page_len = page_size();
        #[cfg(all(target_vendor = "apple", target_arch = "aarch64"))]
        let (prot, flags) = (
            libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC,
            libc::MAP_PRIVATE | libc::MAP_ANON | libc::MAP_JIT,
        );
        #[cfg(not(all(target_vendor = "apple", target_arch = "aarch64")))]
        let (prot, flags) = (libc::PROT_READ | libc::PROT_EXEC, libc::MAP_PRIVATE | libc::MAP_ANON);

        // SAFETY: anonymous private mapping with no address hint.
        let page = unsafe { libc::mmap(std::ptr::null_mut(), page_len, prot, flags, -1, 0) };
        if page == libc::MAP_FAILED {
            return Err(PatchError::IslandMap { errno: last_errno() });
        }
        self.page = page as usize;
        self.page_len = page_len;
        Ok(())
    }

    #[cfg(all(target_vendor = "apple", target_arch = "aarch64"))]
    unsafe fn write(&self, dst: *mut u8, code: &[u8]) -> Result<(), PatchError> {
        // SAFETY: MAP_JIT page; write protection is per thread and restored
        // before returning.
        unsafe {
            libc::pthread_jit_write_protect_np(0);
            raw::copy_bytes(dst, code.as_ptr(), code.len());
            libc::pthread_jit_write_protect_np(1);
        }
        flush_icache(dst, code.len());
        Ok(())
    }

    #[cfg(not(all(target_vendor = "apple", target_arch = "aarch64")))]
    unsafe fn write(&self, dst: *mut u8, code: &[u8]) -> Result<(), PatchError> {
        let page = self.page as *mut c_void;
        // SAFETY: the whole page belongs to this pool.
        unsafe {
            protect(page, self.page_len, libc::PROT_READ | libc::PROT_WRITE)?;
            raw::copy_bytes(dst, code.as_ptr(), code.len());
            protect(page, self.page_len, libc::PROT_READ | libc::PROT_EXEC)?;
        }
        flush_icache(dst, code.len());
        Ok(())
    }
}

/// Overwrite code at `dst`, restoring read+execute protection afterwards.
unsafe fn write_code(dst: *mut u8, code: &[u8]) -> Result<(), PatchError> {
    let page_len = page_size();
    let start = dst as usize & !(page_len - 1);
    let end = (dst as usize + code.len() + page_len - 1) & !(page_len - 1);
    let region = start as *mut c_void;
    // SAFETY: caller guarantees `dst` is mapped code; only the covering
    // pages change protection.
    unsafe {
        protect(region, end - start, libc::PROT_READ | libc::PROT_WRITE | libc::PROT_EXEC)?;
        raw::copy_bytes(dst, code.as_ptr(), code.len());
        protect(region, end - start, libc::PROT_READ | libc::PROT_EXEC)?;
    }
    flush_icache(dst, code.len());
    Ok(())
}

unsafe fn protect(addr: *mut c_void, len: usize, prot: libc::c_int) -> Result<(), PatchError> {
    // SAFETY: forwarded from the caller.
    if unsafe { libc::mprotect(addr, len, prot) } != 0 {
        return Err(PatchError::Protect { errno: last_errno() });
    }
    Ok(())
}

fn page_size() -> usize {
    // SAFETY: sysconf has no preconditions.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 { size as usize } else { 4096 }
}

fn last_errno() -> i32 {
    std::io::Error::last_os_error().raw_os_error().unwrap_or(0)
}

#[cfg(all(target_arch = "aarch64", target_vendor = "apple"))]
fn flush_icache(start: *mut u8, len: usize) {
    unsafe extern "C" {
        fn sys_icache_invalidate(start: *mut c_void, len: usize);
    }
    // SAFETY: the range was just written by this thread.
    unsafe { sys_icache_invalidate(start.cast(), len) };
}

#[cfg(all(target_arch = "aarch64", not(target_vendor = "apple")))]
fn flush_icache(start: *mut u8, len: usize) {
    unsafe extern "C" {
        fn __clear_cache(start: *mut std::ffi::c_char, end: *mut std::ffi::c_char);
    }
    // SAFETY: the range was just written by this thread.
    unsafe { __clear_cache(start.cast(), start.add(len).cast()) };
}

// x86 keeps instruction and data caches coherent.
#[cfg(not(target_arch = "aarch64"))]
fn flush_icache(_start: *mut u8, _len: usize) {}
