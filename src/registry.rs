//! Maps a backend tag to the parser that produces an [`Image`] from it.
//!
//! Backends are pure functions, not trait objects: the registry is just a
//! `match` over [`BackendTag`], matching `spec.md` §4.2's description of
//! the registry as a lookup from tag to parser rather than a dispatch
//! mechanism that needs to be extensible at runtime.

use std::path::Path;
use std::str::FromStr;

use crate::errors::{LoaderError, LoaderResult};
use crate::image::{blob, elf, extractor, pe, Image};

/// Which backend to use for a given image. `Elf` is the default when an
/// image's options don't name one explicitly (`spec.md` §4.5 step 2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendTag {
    #[default]
    Elf,
    Pe,
    Blob,
    Extractor,
}

impl FromStr for BackendTag {
    type Err = LoaderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "elf" => Ok(BackendTag::Elf),
            "pe" => Ok(BackendTag::Pe),
            "blob" => Ok(BackendTag::Blob),
            "extractor" => Ok(BackendTag::Extractor),
            other => Err(LoaderError::UnknownBackend(other.to_string())),
        }
    }
}

/// Per-image options, tagged by which backend they belong to. The
/// orchestrator only ever looks at `custom_base_addr`, which lives above
/// this type in [`crate::config::ImageOptions`]; everything backend
/// specific lives here.
#[derive(Debug, Clone)]
pub enum BackendOptions {
    Elf(elf::ElfOptions),
    Pe(pe::PeOptions),
    Blob(blob::BlobOptions),
    Extractor(extractor::ExtractorOptions),
}

impl BackendOptions {
    pub fn tag(&self) -> BackendTag {
        match self {
            BackendOptions::Elf(_) => BackendTag::Elf,
            BackendOptions::Pe(_) => BackendTag::Pe,
            BackendOptions::Blob(_) => BackendTag::Blob,
            BackendOptions::Extractor(_) => BackendTag::Extractor,
        }
    }
}

impl Default for BackendOptions {
    fn default() -> Self {
        BackendOptions::Elf(elf::ElfOptions::default())
    }
}

/// Parses `path` with the backend named by `options`.
pub fn load(path: impl AsRef<Path>, options: &BackendOptions) -> LoaderResult<Image> {
    match options {
        BackendOptions::Elf(opts) => elf::parse(path, opts),
        BackendOptions::Pe(opts) => pe::parse(path, opts),
        BackendOptions::Blob(opts) => blob::parse(path, opts),
        BackendOptions::Extractor(opts) => extractor::parse(path, opts),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_backend_tag_is_rejected() {
        assert!(matches!(
            BackendTag::from_str("wasm"),
            Err(LoaderError::UnknownBackend(_))
        ));
    }

    #[test]
    fn default_backend_is_elf() {
        assert_eq!(BackendTag::default(), BackendTag::Elf);
    }
}
