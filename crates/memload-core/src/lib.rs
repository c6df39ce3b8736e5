//! PE32+ format layer for the `memload` in-memory module loader.
//!
//! This crate holds everything about the file format that does not touch the
//! operating system: the raw `#[repr(C)]` structures ([`raw`]), a validated
//! header view ([`image`]), base-relocation stream decoding ([`reloc`]), and
//! the section-characteristics to page-protection mapping ([`protect`]).
//! It builds and tests on any host; the Windows mapping engine lives in the
//! `memload` crate.

pub mod image;
pub mod protect;
pub mod raw;
pub mod reloc;

pub use image::{PeError, PeImage};
