use std::error::Error;
use std::fmt;

/// Crate-wide error type for every fallible operation in the loader.
///
/// Mirrors the error kinds named in the loader's design: parsing, path
/// resolution, address-space composition, and relocation each fail with a
/// distinct variant so callers can match on the specific failure instead of
/// parsing a message string.
#[derive(Debug)]
pub enum LoaderError {
    /// A backend could not interpret the file as its expected format.
    ParseError(String),

    /// A candidate dependency's architecture does not match the main image's.
    ArchMismatch(String),

    /// A dependency name could not be located on any search path.
    NotFound(String),

    /// [`NotFound`](Self::NotFound) surfaced as fatal because
    /// `except_missing_libs` was set.
    MissingDependency(String),

    /// A would-be backer's range intersects an already-registered backer.
    Overlap { base: u64, size: u64 },

    /// A registered backer does not exist at the address an update targeted.
    NotMapped(u64),

    /// An absolute address is not covered by any backer.
    Unmapped(u64),

    /// A relocation referenced a symbol no loaded image exports.
    UnresolvedSymbol(String),

    /// An unknown or unregistered backend tag was requested.
    UnknownBackend(String),

    /// An I/O operation failed.
    Io(String),

    /// A `goblin` parse failed while reading an ELF or PE image.
    Goblin(String),

    /// A config file could not be parsed as TOML or JSON.
    InvalidConfig(String),
}

impl LoaderError {
    /// A short, stable tag for the error kind, for logging or metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            LoaderError::ParseError(_) => "parse_error",
            LoaderError::ArchMismatch(_) => "arch_mismatch",
            LoaderError::NotFound(_) => "not_found",
            LoaderError::MissingDependency(_) => "missing_dependency",
            LoaderError::Overlap { .. } => "overlap",
            LoaderError::NotMapped(_) => "not_mapped",
            LoaderError::Unmapped(_) => "unmapped",
            LoaderError::UnresolvedSymbol(_) => "unresolved_symbol",
            LoaderError::UnknownBackend(_) => "unknown_backend",
            LoaderError::Io(_) => "io",
            LoaderError::Goblin(_) => "goblin",
            LoaderError::InvalidConfig(_) => "invalid_config",
        }
    }
}

impl fmt::Display for LoaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoaderError::ParseError(e) => write!(f, "failed to parse image: {e}"),
            LoaderError::ArchMismatch(name) => {
                write!(f, "architecture mismatch loading dependency: {name}")
            }
            LoaderError::NotFound(name) => write!(f, "could not locate shared library: {name}"),
            LoaderError::MissingDependency(name) => {
                write!(f, "missing required dependency: {name}")
            }
            LoaderError::Overlap { base, size } => write!(
                f,
                "backer at {base:#x} (size {size:#x}) overlaps an existing backer"
            ),
            LoaderError::NotMapped(addr) => {
                write!(f, "no backer registered at base address {addr:#x}")
            }
            LoaderError::Unmapped(addr) => write!(f, "address {addr:#x} is not mapped"),
            LoaderError::UnresolvedSymbol(name) => {
                write!(f, "unresolved symbol in relocation: {name}")
            }
            LoaderError::UnknownBackend(tag) => write!(f, "unknown backend: {tag}"),
            LoaderError::Io(e) => write!(f, "io error: {e}"),
            LoaderError::Goblin(e) => write!(f, "goblin error: {e}"),
            LoaderError::InvalidConfig(e) => write!(f, "invalid config: {e}"),
        }
    }
}

impl Error for LoaderError {}

impl From<std::io::Error> for LoaderError {
    fn from(e: std::io::Error) -> Self {
        LoaderError::Io(e.to_string())
    }
}

impl From<goblin::error::Error> for LoaderError {
    fn from(e: goblin::error::Error) -> Self {
        LoaderError::Goblin(e.to_string())
    }
}

/// Wrapper around `Result<T, LoaderError>` for brevity.
pub type LoaderResult<T> = Result<T, LoaderError>;
