//! In-process, memory-resident loading of PE32+ dynamic libraries.
//!
//! Given the raw bytes of a 64-bit DLL image, [`load`] maps it into the
//! current process without the image ever touching the filesystem: headers
//! are validated and copied, sections committed and populated, base
//! relocations applied, imports bound through the host OS loader, page
//! protections finalized, TLS callbacks and the entry point run.  The
//! returned [`LoadedModule`] resolves exports by name and tears everything
//! down -- `DLL_PROCESS_DETACH`, dependency handles, the reservation -- when
//! dropped.
//!
//! The loaded module is deliberately *not* linked into the OS loader's
//! bookkeeping: module-enumeration APIs will not see it, and the loader
//! keeps no global state of its own.
//!
//! ## Pipeline
//!
//! ```text
//! validate -> reserve -> copy headers -> map sections -> relocate
//!          -> bind imports -> finalize protections -> TLS -> entry point
//! ```
//!
//! Any stage failing unwinds through the same teardown the eventual unload
//! uses, so a failed `load` leaks neither memory nor dependency handles.
//!
//! Loading executes code from the image (TLS callbacks, the entry point),
//! so the whole surface is for images you trust -- the loader validates
//! format, not intent.

pub mod error;
pub mod host;

mod headers;

#[cfg_attr(
    not(all(target_os = "windows", target_arch = "x86_64")),
    allow(dead_code)
)]
mod exports;
#[cfg_attr(
    not(all(target_os = "windows", target_arch = "x86_64")),
    allow(dead_code)
)]
mod finalize;
#[cfg_attr(
    not(all(target_os = "windows", target_arch = "x86_64")),
    allow(dead_code)
)]
mod imports;
#[cfg_attr(
    not(all(target_os = "windows", target_arch = "x86_64")),
    allow(dead_code)
)]
mod reloc;

#[cfg(all(target_os = "windows", target_arch = "x86_64"))]
pub mod ffi;
#[cfg(all(target_os = "windows", target_arch = "x86_64"))]
mod mapper;
#[cfg(all(target_os = "windows", target_arch = "x86_64"))]
mod tls;

pub use error::LoadError;
pub use host::{HostLoader, HostModule};
#[cfg(all(target_os = "windows", target_arch = "x86_64"))]
pub use host::OsLoader;

/// The DLL entry point signature: `(instance, reason, reserved) -> BOOL`.
pub type DllEntryProc =
    unsafe extern "system" fn(*mut core::ffi::c_void, u32, *mut core::ffi::c_void) -> i32;

#[cfg(all(target_os = "windows", target_arch = "x86_64"))]
mod module {
    use core::ffi::c_void;

    use memload_core::raw::{
        DIRECTORY_ENTRY_BASERELOC, DIRECTORY_ENTRY_EXPORT, DIRECTORY_ENTRY_IMPORT,
        DIRECTORY_ENTRY_TLS,
    };
    use memload_core::PeImage;
    use windows_sys::Win32::System::Memory::{VirtualFree, MEM_RELEASE};
    use windows_sys::Win32::System::SystemServices::{DLL_PROCESS_ATTACH, DLL_PROCESS_DETACH};
    use windows_sys::Win32::System::SystemInformation::{GetNativeSystemInfo, SYSTEM_INFO};

    use crate::error::LoadError;
    use crate::host::{HostLoader, HostModule, OsLoader};
    use crate::{exports, finalize, headers, imports, mapper, reloc, tls, DllEntryProc};

    /// A DLL mapped into the current process from a byte image.
    ///
    /// The record is immutable once `load` returns; dropping it runs the
    /// full teardown (detach notification, dependency release, reservation
    /// free).  Every address handed out by [`resolve`](Self::resolve) dies
    /// with the module.
    pub struct LoadedModule {
        /// Start of the exclusively owned reservation.
        base: *mut u8,
        /// Offset of the copied NT headers within the reservation.
        nt_offset: usize,
        /// Dependency handles in acquisition order.
        dependencies: Vec<HostModule>,
        host: Box<dyn HostLoader>,
        page_size: u64,
        /// Entry point returned success for `DLL_PROCESS_ATTACH`; governs
        /// whether detach is sent on unload.
        initialized: bool,
        relocated: bool,
    }

    // Safety: after `load` returns the record and the mapped image are never
    // written again, and `HostLoader` is Send + Sync, so shared `resolve`
    // calls from any thread are sound.
    unsafe impl Send for LoadedModule {}
    unsafe impl Sync for LoadedModule {}

    fn system_page_size() -> u64 {
        let mut info: SYSTEM_INFO = unsafe { core::mem::zeroed() };
        unsafe { GetNativeSystemInfo(&mut info) };
        info.dwPageSize as u64
    }

    /// Map `image` into the current process through the OS default
    /// dependency loader.
    pub fn load(image: &[u8]) -> Result<LoadedModule, LoadError> {
        load_with(image, OsLoader)
    }

    /// Map `image`, resolving dependencies through `host` instead of the
    /// OS loader.
    pub fn load_with<H: HostLoader + 'static>(
        image: &[u8],
        host: H,
    ) -> Result<LoadedModule, LoadError> {
        let pe = PeImage::parse(image)?;
        let preferred = pe.optional_header().image_base;
        let size = pe.optional_header().size_of_image as usize;
        log::debug!(
            "loading image: {} sections, {size:#x} bytes, preferred base {preferred:#x}",
            pe.file_header().number_of_sections
        );

        let base = unsafe { mapper::reserve(preferred, size)? };
        // The record owns the reservation from here on; every `?` below
        // unwinds through its Drop, which mirrors whatever sub-steps have
        // already succeeded.
        let mut module = LoadedModule {
            base,
            nt_offset: pe.nt_offset(),
            dependencies: Vec::new(),
            host: Box::new(host),
            page_size: system_page_size(),
            initialized: false,
            relocated: false,
        };

        unsafe {
            mapper::copy_headers(&pe, base)?;
            mapper::map_sections(&pe, base)?;

            let delta = (base as u64).wrapping_sub(preferred) as i64;
            reloc::apply(
                base,
                delta,
                headers::data_directory(base, module.nt_offset, DIRECTORY_ENTRY_BASERELOC),
            )?;
            module.relocated = true;
            // Later stages (and the module's own code, should it look) see
            // virtual addresses relative to where the image actually sits.
            headers::write_image_base(base, module.nt_offset, base as u64);

            imports::bind(
                base,
                headers::data_directory(base, module.nt_offset, DIRECTORY_ENTRY_IMPORT),
                &*module.host,
                &mut module.dependencies,
            )?;

            finalize::finalize_sections(base, module.nt_offset, module.page_size)?;

            tls::run_callbacks(
                base,
                module.nt_offset,
                headers::data_directory(base, module.nt_offset, DIRECTORY_ENTRY_TLS),
            );

            let entry_rva = headers::nt_headers(base, module.nt_offset)
                .optional_header
                .address_of_entry_point;
            if entry_rva != 0 {
                let entry: DllEntryProc = core::mem::transmute(base.add(entry_rva as usize));
                log::debug!("calling entry point at rva {entry_rva:#x}");
                if entry(base.cast(), DLL_PROCESS_ATTACH, core::ptr::null_mut()) == 0 {
                    return Err(LoadError::DllInitFailed);
                }
                module.initialized = true;
            }
        }
        log::debug!("image loaded at {:p}", base);
        Ok(module)
    }

    impl LoadedModule {
        /// Resolve an exported symbol by name.  The address stays valid
        /// until the module is dropped.
        pub fn resolve(&self, name: &str) -> Result<*const c_void, LoadError> {
            self.resolve_bytes(name.as_bytes())
        }

        pub(crate) fn resolve_bytes(&self, name: &[u8]) -> Result<*const c_void, LoadError> {
            unsafe {
                exports::find(
                    self.base,
                    headers::data_directory(self.base, self.nt_offset, DIRECTORY_ENTRY_EXPORT),
                    name,
                )
            }
        }

        /// Base address of the mapped image.
        pub fn base(&self) -> *mut c_void {
            self.base.cast()
        }

        /// Whether the entry point acknowledged `DLL_PROCESS_ATTACH`.
        pub fn initialized(&self) -> bool {
            self.initialized
        }

        /// Whether the image was usable at its load address (relocated, or
        /// placed at its preferred base).
        pub fn relocated(&self) -> bool {
            self.relocated
        }

        /// Explicit unload; equivalent to dropping the module.
        pub fn unload(self) {}
    }

    impl Drop for LoadedModule {
        fn drop(&mut self) {
            unsafe {
                if self.initialized {
                    let entry_rva = headers::nt_headers(self.base, self.nt_offset)
                        .optional_header
                        .address_of_entry_point;
                    if entry_rva != 0 {
                        let entry: DllEntryProc =
                            core::mem::transmute(self.base.add(entry_rva as usize));
                        // The detach result is deliberately ignored; the
                        // module is going away either way.
                        entry(self.base.cast(), DLL_PROCESS_DETACH, core::ptr::null_mut());
                    }
                    self.initialized = false;
                }
                for &dependency in &self.dependencies {
                    self.host.free(dependency);
                }
                log::debug!("releasing image at {:p}", self.base);
                VirtualFree(self.base.cast(), 0, MEM_RELEASE);
            }
        }
    }
}

#[cfg(all(target_os = "windows", target_arch = "x86_64"))]
pub use module::{load, load_with, LoadedModule};
