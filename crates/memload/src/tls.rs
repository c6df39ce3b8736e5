//! TLS callback execution.

use core::ffi::c_void;

use memload_core::raw::ImageTlsDirectory64;
use windows_sys::Win32::System::SystemServices::DLL_PROCESS_ATTACH;

use crate::headers;

type TlsCallback = unsafe extern "system" fn(*mut c_void, u32, *mut c_void);

/// Invoke the image's TLS callbacks with `DLL_PROCESS_ATTACH`, in array
/// order.  `AddressOfCallBacks` is an absolute virtual address; rebasing it
/// against the header `ImageBase` -- which the relocator has already
/// rewritten to the live base -- lands on the array whether or not any
/// fixups were applied.
///
/// # Safety
/// `base` must be a fully mapped, relocated, import-bound image; the TLS
/// directory (when `dir` is `Some`) and its callback array must be
/// committed.  Callbacks run arbitrary module code on the calling thread.
pub(crate) unsafe fn run_callbacks(base: *mut u8, nt_offset: usize, dir: Option<(u32, u32)>) {
    let Some((dir_rva, _)) = dir else {
        return;
    };
    let tls = base
        .add(dir_rva as usize)
        .cast::<ImageTlsDirectory64>()
        .read_unaligned();
    if tls.address_of_callbacks == 0 {
        return;
    }

    let header_base = headers::nt_headers(base, nt_offset).optional_header.image_base;
    let array_rva = tls.address_of_callbacks.wrapping_sub(header_base);
    let mut callback = base.add(array_rva as usize).cast::<u64>();
    loop {
        let address = callback.read_unaligned();
        if address == 0 {
            break;
        }
        log::debug!("running TLS callback at {address:#x}");
        let function: TlsCallback = core::mem::transmute(address as usize);
        function(base.cast(), DLL_PROCESS_ATTACH, core::ptr::null_mut());
        callback = callback.add(1);
    }
}
