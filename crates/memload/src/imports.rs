//! Import binding: load each dependency and patch the IAT in place.

use core::ffi::CStr;

use memload_core::raw::{ImageImportDescriptor, ORDINAL_FLAG64};

use crate::error::LoadError;
use crate::host::{HostLoader, HostModule};

/// Walk the import descriptor table and bind every thunk.
///
/// Handles of fully bound dependencies are pushed onto `dependencies` in
/// acquisition order.  When a symbol fails to resolve, the dependency being
/// bound is released here; earlier handles stay on the list for the
/// caller's teardown.
///
/// # Safety
/// `base` must point at a mapped image whose headers, import directory and
/// every RVA the directory references are committed and readable, with the
/// IAT still writable.
pub(crate) unsafe fn bind(
    base: *mut u8,
    dir: Option<(u32, u32)>,
    host: &dyn HostLoader,
    dependencies: &mut Vec<HostModule>,
) -> Result<(), LoadError> {
    let Some((dir_rva, _)) = dir else {
        return Ok(());
    };

    let mut descriptor_ptr = base.add(dir_rva as usize).cast::<ImageImportDescriptor>();
    loop {
        let descriptor = descriptor_ptr.read_unaligned();
        if descriptor.name == 0 {
            break;
        }
        let dll_name = CStr::from_ptr(base.add(descriptor.name as usize).cast());
        let Some(handle) = host.load(dll_name) else {
            return Err(LoadError::ModuleNotFound(
                dll_name.to_string_lossy().into_owned(),
            ));
        };
        log::debug!("binding imports from {}", dll_name.to_string_lossy());
        if let Err(err) = bind_thunks(base, &descriptor, host, handle) {
            host.free(handle);
            return Err(err);
        }
        dependencies.push(handle);
        descriptor_ptr = descriptor_ptr.add(1);
    }
    Ok(())
}

unsafe fn bind_thunks(
    base: *mut u8,
    descriptor: &ImageImportDescriptor,
    host: &dyn HostLoader,
    handle: HostModule,
) -> Result<(), LoadError> {
    if descriptor.first_thunk == 0 {
        return Ok(());
    }
    // With no separate lookup table, the IAT doubles as one.
    let lookup_rva = if descriptor.original_first_thunk != 0 {
        descriptor.original_first_thunk
    } else {
        descriptor.first_thunk
    };
    let mut lookup = base.add(lookup_rva as usize).cast::<u64>();
    let mut iat = base.add(descriptor.first_thunk as usize).cast::<u64>();

    loop {
        let thunk = lookup.read_unaligned();
        if thunk == 0 {
            break;
        }
        let resolved = if thunk & ORDINAL_FLAG64 != 0 {
            let ordinal = thunk as u16;
            host.symbol_by_ordinal(handle, ordinal)
                .ok_or_else(|| LoadError::ProcNotFound(format!("#{ordinal}")))?
        } else {
            // IMAGE_IMPORT_BY_NAME: u16 hint, then the NUL-terminated name.
            let name = CStr::from_ptr(base.add((thunk as u32) as usize + 2).cast());
            host.symbol(handle, name)
                .ok_or_else(|| LoadError::ProcNotFound(name.to_string_lossy().into_owned()))?
        };
        iat.write_unaligned(resolved as u64);
        lookup = lookup.add(1);
        iat = iat.add(1);
    }
    Ok(())
}
