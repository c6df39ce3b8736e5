//! C ABI surface.
//!
//! Three operations, mirroring the Rust API behind an opaque pointer-sized
//! handle.  Failures report through the thread's Win32 last error
//! (`ERROR_BAD_EXE_FORMAT`, `ERROR_OUTOFMEMORY`, `ERROR_MOD_NOT_FOUND`,
//! `ERROR_PROC_NOT_FOUND`, `ERROR_DLL_INIT_FAILED`); no panics cross this
//! boundary.  Only handles previously returned by [`memload_load`] are
//! legal inputs to the other two calls, and a handle dies with
//! [`memload_unload`].

use core::ffi::{c_char, c_void, CStr};

use windows_sys::Win32::Foundation::SetLastError;

use crate::error::{ERROR_BAD_EXE_FORMAT, ERROR_PROC_NOT_FOUND};
use crate::LoadedModule;

/// Map a PE32+ image from `data`/`size` into the current process.
///
/// Returns an opaque module handle, or null with the last error set.  The
/// buffer is only read during the call; `size` bounds the read but the PE
/// headers dictate the extents actually consumed.
///
/// # Safety
/// `data` must point to `size` readable bytes (or be null, which fails
/// cleanly).  The image is trusted: its TLS callbacks and entry point run
/// on this thread.
#[no_mangle]
pub unsafe extern "system" fn memload_load(data: *const u8, size: usize) -> *mut c_void {
    if data.is_null() {
        SetLastError(ERROR_BAD_EXE_FORMAT);
        return core::ptr::null_mut();
    }
    let image = core::slice::from_raw_parts(data, size);
    match crate::load(image) {
        Ok(module) => Box::into_raw(Box::new(module)).cast(),
        Err(error) => {
            log::debug!("load failed: {error}");
            SetLastError(error.win32_code());
            core::ptr::null_mut()
        }
    }
}

/// Resolve an export of a loaded module by NUL-terminated name.
///
/// Returns the absolute address, or null with the last error set.
///
/// # Safety
/// `handle` must be a live handle from [`memload_load`]; `name` must be a
/// NUL-terminated string (either may be null, which fails cleanly).
#[no_mangle]
pub unsafe extern "system" fn memload_resolve(
    handle: *mut c_void,
    name: *const c_char,
) -> *mut c_void {
    if handle.is_null() || name.is_null() {
        SetLastError(ERROR_PROC_NOT_FOUND);
        return core::ptr::null_mut();
    }
    let module = &*handle.cast::<LoadedModule>();
    match module.resolve_bytes(CStr::from_ptr(name).to_bytes()) {
        Ok(address) => address as *mut c_void,
        Err(error) => {
            SetLastError(error.win32_code());
            core::ptr::null_mut()
        }
    }
}

/// Unload a module: detach notification, dependency release, reservation
/// free.  The handle is invalid afterwards.
///
/// # Safety
/// `handle` must be a live handle from [`memload_load`] or null (a no-op);
/// no other thread may be using the module.
#[no_mangle]
pub unsafe extern "system" fn memload_unload(handle: *mut c_void) {
    if !handle.is_null() {
        drop(Box::from_raw(handle.cast::<LoadedModule>()));
    }
}
