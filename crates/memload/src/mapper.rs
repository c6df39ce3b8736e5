//! Image allocation, header copy and section mapping.

use core::ffi::c_void;

use memload_core::PeImage;
use windows_sys::Win32::System::Memory::{
    VirtualAlloc, MEM_COMMIT, MEM_RESERVE, PAGE_READWRITE,
};

use crate::error::LoadError;
use crate::headers;

/// Reserve and commit the image's full virtual range, preferring its
/// `ImageBase` and falling back to any address.
pub(crate) unsafe fn reserve(preferred: u64, size: usize) -> Result<*mut u8, LoadError> {
    let mut base = VirtualAlloc(
        preferred as *const c_void,
        size,
        MEM_RESERVE | MEM_COMMIT,
        PAGE_READWRITE,
    );
    if base.is_null() {
        base = VirtualAlloc(
            core::ptr::null(),
            size,
            MEM_RESERVE | MEM_COMMIT,
            PAGE_READWRITE,
        );
    }
    if base.is_null() {
        return Err(LoadError::OutOfMemory(size));
    }
    Ok(base.cast())
}

/// Commit `SizeOfHeaders` bytes at the base and copy the PE headers in;
/// every later stage reads only this copy, so the caller's buffer may die
/// as soon as `load` returns.
pub(crate) unsafe fn copy_headers(image: &PeImage<'_>, base: *mut u8) -> Result<(), LoadError> {
    let size = image.optional_header().size_of_headers as usize;
    if VirtualAlloc(base.cast(), size, MEM_COMMIT, PAGE_READWRITE).is_null() {
        return Err(LoadError::OutOfMemory(size));
    }
    let available = size.min(image.data().len());
    core::ptr::copy_nonoverlapping(image.data().as_ptr(), base, available);
    Ok(())
}

/// Commit each section's virtual range and populate it: raw bytes where the
/// file provides them, an aligned run of zeroes for uninitialized data.
/// Each mapped section header gets its RVA written into the scratch slot
/// for the finalizer.
pub(crate) unsafe fn map_sections(image: &PeImage<'_>, base: *mut u8) -> Result<(), LoadError> {
    let data = image.data();
    let alignment = image.optional_header().section_alignment;

    for (index, section) in image.sections().iter().enumerate() {
        let dest = base.add(section.virtual_address as usize);
        if section.size_of_raw_data == 0 {
            if alignment > 0 {
                let size = alignment as usize;
                if VirtualAlloc(dest.cast(), size, MEM_COMMIT, PAGE_READWRITE).is_null() {
                    return Err(LoadError::OutOfMemory(size));
                }
                core::ptr::write_bytes(dest, 0, size);
            }
        } else {
            let size = section.size_of_raw_data as usize;
            if VirtualAlloc(dest.cast(), size, MEM_COMMIT, PAGE_READWRITE).is_null() {
                return Err(LoadError::OutOfMemory(size));
            }
            let start = section.pointer_to_raw_data as usize;
            let end = start.saturating_add(size).min(data.len());
            if start < end {
                core::ptr::copy_nonoverlapping(data[start..end].as_ptr(), dest, end - start);
            }
        }
        log::trace!(
            "mapped section {} at rva {:#x}",
            section.name_str(),
            section.virtual_address
        );
        headers::set_section_scratch(base, image.nt_offset(), index, section.virtual_address);
    }
    Ok(())
}
