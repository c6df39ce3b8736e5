//! The dependency-resolution seam.
//!
//! Imported DLLs are *not* mapped by this loader; they go through a
//! [`HostLoader`], normally the operating system's own loader.  The seam
//! lets embedders redirect dependency lookup, and lets the import binder
//! run under test without an OS loader.

use core::ffi::{c_void, CStr};

/// Raw handle to a dependency module owned by a [`HostLoader`].
/// Pointer-sized, matching `HMODULE`.
pub type HostModule = isize;

/// How the loader acquires, queries and releases dependencies of the module
/// being mapped.
///
/// Handles returned by [`load`](HostLoader::load) are exclusively owned by
/// the mapped module and handed back to [`free`](HostLoader::free) exactly
/// once, on unload or on load failure.
pub trait HostLoader: Send + Sync {
    /// Load a dependency by its import-table name; `None` reports failure.
    fn load(&self, name: &CStr) -> Option<HostModule>;
    /// Resolve a symbol by name inside a loaded dependency.
    fn symbol(&self, module: HostModule, name: &CStr) -> Option<*const c_void>;
    /// Resolve a symbol by export ordinal inside a loaded dependency.
    fn symbol_by_ordinal(&self, module: HostModule, ordinal: u16) -> Option<*const c_void>;
    /// Release a dependency handle.
    fn free(&self, module: HostModule);
}

/// The process-default host loader: `LoadLibraryA` / `GetProcAddress` /
/// `FreeLibrary`.  The OS reference-counts module handles, so each mapped
/// module may free its own handles without coordinating with anyone.
#[cfg(all(target_os = "windows", target_arch = "x86_64"))]
pub struct OsLoader;

#[cfg(all(target_os = "windows", target_arch = "x86_64"))]
impl HostLoader for OsLoader {
    fn load(&self, name: &CStr) -> Option<HostModule> {
        use windows_sys::Win32::System::LibraryLoader::LoadLibraryA;
        let handle = unsafe { LoadLibraryA(name.as_ptr().cast()) };
        (handle != 0).then_some(handle)
    }

    fn symbol(&self, module: HostModule, name: &CStr) -> Option<*const c_void> {
        use windows_sys::Win32::System::LibraryLoader::GetProcAddress;
        unsafe { GetProcAddress(module, name.as_ptr().cast()) }.map(|f| f as *const c_void)
    }

    fn symbol_by_ordinal(&self, module: HostModule, ordinal: u16) -> Option<*const c_void> {
        use windows_sys::Win32::System::LibraryLoader::GetProcAddress;
        // The ordinal goes in the low word of the name pointer, per the
        // GetProcAddress contract.
        unsafe { GetProcAddress(module, ordinal as usize as *const u8) }
            .map(|f| f as *const c_void)
    }

    fn free(&self, module: HostModule) {
        use windows_sys::Win32::System::LibraryLoader::FreeLibrary;
        unsafe {
            FreeLibrary(module);
        }
    }
}
