//! Loader errors and their Win32 last-error mapping.

use memload_core::PeError;

// Win32 error codes reported through the C surface.  The values are ABI
// constants, kept inline so the mapping is visible (and testable) on any
// host.
pub const ERROR_BAD_EXE_FORMAT: u32 = 193;
pub const ERROR_OUTOFMEMORY: u32 = 14;
pub const ERROR_MOD_NOT_FOUND: u32 = 126;
pub const ERROR_PROC_NOT_FOUND: u32 = 127;
pub const ERROR_DLL_INIT_FAILED: u32 = 1114;

/// Everything that can go wrong while loading, resolving or (never)
/// unloading a module.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The image failed format validation.
    #[error(transparent)]
    BadImage(#[from] PeError),

    /// The image carries no relocation data and could not be placed at its
    /// preferred base.
    #[error("image has no relocation data and cannot load away from its preferred base")]
    Unrelocatable,

    /// The host refused to reserve, commit or protect image memory.
    #[error("failed to acquire {0:#x} bytes of image memory")]
    OutOfMemory(usize),

    /// A dependency named by the import table could not be loaded.
    #[error("dependency `{0}` could not be loaded")]
    ModuleNotFound(String),

    /// An imported or exported symbol could not be resolved.
    #[error("symbol `{0}` could not be resolved")]
    ProcNotFound(String),

    /// The module's entry point returned failure on `DLL_PROCESS_ATTACH`.
    #[error("module entry point reported initialization failure")]
    DllInitFailed,
}

impl LoadError {
    /// The Win32 last-error code the C surface reports for this failure.
    pub fn win32_code(&self) -> u32 {
        match self {
            LoadError::BadImage(_) | LoadError::Unrelocatable => ERROR_BAD_EXE_FORMAT,
            LoadError::OutOfMemory(_) => ERROR_OUTOFMEMORY,
            LoadError::ModuleNotFound(_) => ERROR_MOD_NOT_FOUND,
            LoadError::ProcNotFound(_) => ERROR_PROC_NOT_FOUND,
            LoadError::DllInitFailed => ERROR_DLL_INIT_FAILED,
        }
    }
}

pub type Result<T> = core::result::Result<T, LoadError>;
