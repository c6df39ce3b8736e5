//! Final section protection.
//!
//! Windows assigns page protection at page granularity, and adjacent PE
//! sections routinely share a page; protecting them independently would
//! clobber a neighbour.  Sections are therefore coalesced into windows
//! first, and each window gets a single protection -- or a decommit, for
//! discardable pages the image no longer needs.

use memload_core::protect::{align_down, protection_for};
use memload_core::raw::{
    ImageOptionalHeader64, ImageSectionHeader, SCN_CNT_INITIALIZED_DATA,
    SCN_CNT_UNINITIALIZED_DATA, SCN_MEM_DISCARDABLE,
};

#[cfg(all(target_os = "windows", target_arch = "x86_64"))]
use crate::error::LoadError;

/// One coalesced run of sections sharing pages.  `rva` is relative to the
/// mapped base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Window {
    pub rva: u64,
    pub size: usize,
    pub characteristics: u32,
}

/// The fate of one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Action {
    Protect(u32),
    Decommit,
    Keep,
}

/// A section's in-memory extent.  When the file supplies no raw data the
/// extent falls back to the optional header's aggregate initialized /
/// uninitialized data size for the section's contents class.
pub(crate) fn real_section_size(
    section: &ImageSectionHeader,
    optional: &ImageOptionalHeader64,
) -> usize {
    if section.size_of_raw_data != 0 {
        section.size_of_raw_data as usize
    } else if section.characteristics & SCN_CNT_INITIALIZED_DATA != 0 {
        optional.size_of_initialized_data as usize
    } else if section.characteristics & SCN_CNT_UNINITIALIZED_DATA != 0 {
        optional.size_of_uninitialized_data as usize
    } else {
        0
    }
}

/// Coalesce `(rva, size, characteristics)` runs whose pages touch.
///
/// Two runs merge when they start on the same page or the earlier one
/// extends past the later one's page start.  Merged characteristics OR
/// together, except that `DISCARDABLE` only survives when every member is
/// discardable.
pub(crate) fn plan(sections: &[(u32, usize, u32)], page_size: u64) -> Vec<Window> {
    let mut windows: Vec<Window> = Vec::new();
    for &(rva, size, characteristics) in sections {
        let rva = rva as u64;
        if let Some(current) = windows.last_mut() {
            let aligned = align_down(rva, page_size);
            let shares_page = align_down(current.rva, page_size) == aligned
                || current.rva + current.size as u64 > aligned;
            if shares_page {
                if current.characteristics & SCN_MEM_DISCARDABLE == 0
                    || characteristics & SCN_MEM_DISCARDABLE == 0
                {
                    current.characteristics =
                        (current.characteristics | characteristics) & !SCN_MEM_DISCARDABLE;
                } else {
                    current.characteristics |= characteristics;
                }
                current.size = (rva + size as u64 - current.rva) as usize;
                continue;
            }
        }
        windows.push(Window {
            rva,
            size,
            characteristics,
        });
    }
    windows
}

/// Decide the fate of one window.  `last` marks the image's final window,
/// which may be decommitted even when it does not fill its pages.
pub(crate) fn action(
    window: &Window,
    last: bool,
    section_alignment: u32,
    page_size: u64,
) -> Action {
    if window.size == 0 {
        return Action::Keep;
    }
    if window.characteristics & SCN_MEM_DISCARDABLE != 0 {
        let page_aligned = window.rva == align_down(window.rva, page_size);
        let whole_pages = window.size as u64 % page_size == 0;
        if page_aligned && (last || section_alignment as u64 == page_size || whole_pages) {
            return Action::Decommit;
        }
        // Discardable but sharing pages with live data: leave it committed.
        return Action::Keep;
    }
    Action::Protect(protection_for(window.characteristics))
}

/// Apply the plan: one `VirtualProtect` or `MEM_DECOMMIT` per window.
///
/// # Safety
/// `base` must be a mapped image whose headers carry the section-RVA
/// scratch values written by the mapper, with all section ranges committed.
#[cfg(all(target_os = "windows", target_arch = "x86_64"))]
pub(crate) unsafe fn finalize_sections(
    base: *mut u8,
    nt_offset: usize,
    page_size: u64,
) -> Result<(), LoadError> {
    use windows_sys::Win32::System::Memory::{VirtualFree, VirtualProtect, MEM_DECOMMIT};

    use crate::headers;

    let nt = headers::nt_headers(base, nt_offset);
    let count = nt.file_header.number_of_sections as usize;
    let mut runs = Vec::with_capacity(count);
    for index in 0..count {
        let section = headers::section_header(base, nt_offset, index);
        runs.push((
            section.misc, // scratch: the section's RVA
            real_section_size(&section, &nt.optional_header),
            section.characteristics,
        ));
    }

    let windows = plan(&runs, page_size);
    for (index, window) in windows.iter().enumerate() {
        let last = index + 1 == windows.len();
        match action(window, last, nt.optional_header.section_alignment, page_size) {
            Action::Keep => {}
            Action::Decommit => {
                log::trace!("decommitting discardable window at rva {:#x}", window.rva);
                // A failed decommit only wastes pages.
                VirtualFree(base.add(window.rva as usize).cast(), window.size, MEM_DECOMMIT);
            }
            Action::Protect(protect) => {
                log::trace!(
                    "protecting window at rva {:#x} (+{:#x}) with {protect:#x}",
                    window.rva,
                    window.size
                );
                let mut old = 0u32;
                if VirtualProtect(
                    base.add(window.rva as usize).cast(),
                    window.size,
                    protect,
                    &mut old,
                ) == 0
                {
                    return Err(LoadError::OutOfMemory(window.size));
                }
            }
        }
    }
    Ok(())
}
