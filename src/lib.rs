//! # vaspace
//!
//! A static binary loader and address-space composer for program analysis:
//! given a main binary and a set of loading options, builds a single
//! virtual address space out of it and its dependencies, the way a dynamic
//! linker would at process start, without ever executing anything.
//!
//! ## Example
//!
//! ```no_run
//! use vaspace::{Loader, LoaderOptions};
//!
//! fn main() -> vaspace::LoaderResult<()> {
//!     let options = LoaderOptions::new().auto_load_libs(true);
//!     let loader = Loader::new("/bin/ls", options)?;
//!     println!("main image mapped at {:#x}", loader.main_image().rebase_addr.unwrap());
//!     println!("address space spans {:#x}..{:#x}", loader.min_addr(), loader.max_addr());
//!     Ok(())
//! }
//! ```

/// Crate-wide error types.
mod errors;

/// Architecture identification and per-arch library search paths.
mod arch;

/// The sparse backed address space images are mapped into.
mod memory;

/// The loaded-image data model and its per-format backends.
mod image;

/// The relocation engine.
mod reloc;

/// Backend tag and options -> [`image::Image`] dispatch.
mod registry;

/// Version-insensitive name matching.
mod fuzzy;

/// Loader configuration.
mod config;

/// Dependency name -> on-disk path resolution.
mod resolver;

/// The loader orchestrator.
mod loader;

pub use config::{ImageOptions, LoaderOptions};
pub use errors::{LoaderError, LoaderResult};
pub use image::blob::BlobOptions;
pub use image::elf::ElfOptions;
pub use image::extractor::ExtractorOptions;
pub use image::pe::PeOptions;
pub use image::{Image, ImageKind, Symbol};
pub use loader::Loader;
pub use memory::MemoryMap;
pub use reloc::{RelocKind, RelocationEntry};
pub use registry::{BackendOptions, BackendTag};

pub use arch::Arch;
