//! Dependency resolver: turns a declared dependency name into a concrete
//! path on disk (`spec.md` §4.4). Pure with respect to loader state — it
//! only reads the filesystem and a candidate's architecture, never
//! `satisfied`/`unsatisfied` (those dedup checks live in
//! [`crate::loader`], right before a name is handed here).

use std::path::{Path, PathBuf};

use crate::arch::Arch;
use crate::errors::{LoaderError, LoaderResult};
use crate::fuzzy::strip_version;

/// Sniffs just enough of a candidate file to decide its architecture,
/// without building a full [`crate::image::Image`] for it. Mirrors the
/// original's `arch_from_binary`, scoped to what `goblin` can tell us
/// about an ELF or PE header.
pub fn detect_arch(path: &Path) -> LoaderResult<Arch> {
    let bytes = std::fs::read(path)?;
    match goblin::Object::parse(&bytes).map_err(|e| LoaderError::ParseError(e.to_string()))? {
        goblin::Object::Elf(elf) => Ok(Arch::from_elf_machine(
            elf.header.e_machine,
            elf.is_64,
            elf.little_endian,
        )),
        goblin::Object::PE(pe) => Ok(Arch::from_pe_machine(pe.is_64)),
        _ => Err(LoaderError::ParseError(format!(
            "{}: unrecognized format for architecture detection",
            path.display()
        ))),
    }
}

fn arch_compatible(path: &Path, wanted: &Arch) -> bool {
    detect_arch(path)
        .map(|found| &found == wanted)
        .unwrap_or(false)
}

/// Everything the resolver needs to build its search list
/// (`spec.md` §4.4 step 2), gathered by the orchestrator.
pub struct SearchContext<'a> {
    pub custom_ld_path: &'a [PathBuf],
    pub main_binary_dir: &'a Path,
    pub arch: &'a Arch,
    pub fuzzy: bool,
    /// Set when the candidate will be loaded by a backend (`blob`,
    /// `extractor`) that carries no self-describing header for `goblin`
    /// to sniff an architecture from — such backends take their
    /// architecture from configuration instead, so the on-disk
    /// compatibility probe is skipped and the candidate is trusted.
    pub skip_arch_check: bool,
}

fn candidate_ok(path: &Path, ctx: &SearchContext) -> bool {
    path.is_file() && (ctx.skip_arch_check || arch_compatible(path, ctx.arch))
}

/// Resolves `name` to a concrete, architecture-compatible path.
pub fn resolve(name: &str, ctx: &SearchContext) -> LoaderResult<PathBuf> {
    if name.contains('/') {
        let path = PathBuf::from(name);
        return if candidate_ok(&path, ctx) {
            Ok(path)
        } else {
            Err(LoaderError::NotFound(name.to_string()))
        };
    }

    let mut dirs: Vec<PathBuf> = Vec::new();
    dirs.extend(ctx.custom_ld_path.iter().cloned());
    dirs.push(PathBuf::from("."));
    dirs.push(ctx.main_binary_dir.to_path_buf());
    dirs.extend(ctx.arch.library_search_paths());

    let stripped_name = strip_version(name);

    for dir in &dirs {
        let direct = dir.join(name);
        if candidate_ok(&direct, ctx) {
            return Ok(direct);
        }

        if ctx.fuzzy {
            let Ok(entries) = std::fs::read_dir(dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let candidate_name = entry.file_name();
                let Some(candidate_name) = candidate_name.to_str() else {
                    continue;
                };
                if strip_version(candidate_name) == stripped_name {
                    let candidate = entry.path();
                    if candidate_ok(&candidate, ctx) {
                        return Ok(candidate);
                    }
                }
            }
        }
    }

    Err(LoaderError::NotFound(name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_fake_so(dir: &Path, name: &str) {
        // Not a real ELF; used only for resolver tests that don't exercise
        // `arch_compatible`, which always rejects non-parseable candidates.
        fs::write(dir.join(name), b"not really an elf").unwrap();
    }

    #[test]
    fn not_found_when_no_candidate_exists() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = SearchContext {
            custom_ld_path: &[],
            main_binary_dir: dir.path(),
            arch: &Arch::x86_64(),
            fuzzy: true,
            skip_arch_check: false,
        };
        let err = resolve("libmystery.so", &ctx).unwrap_err();
        assert!(matches!(err, LoaderError::NotFound(_)));
    }

    #[test]
    fn unparseable_candidate_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write_fake_so(dir.path(), "libc.so.6");
        let ctx = SearchContext {
            custom_ld_path: &[dir.path().to_path_buf()],
            main_binary_dir: dir.path(),
            arch: &Arch::x86_64(),
            fuzzy: true,
            skip_arch_check: false,
        };
        // The candidate exists but isn't a parseable ELF, so arch
        // detection fails and resolution still reports NotFound rather
        // than propagating the parse error.
        assert!(resolve("libc.so.6", &ctx).is_err());
    }

    #[test]
    fn explicit_path_with_separator_skips_search_list() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = SearchContext {
            custom_ld_path: &[],
            main_binary_dir: dir.path(),
            arch: &Arch::x86_64(),
            fuzzy: true,
            skip_arch_check: false,
        };
        let err = resolve("/definitely/not/a/real/path.so", &ctx).unwrap_err();
        assert!(matches!(err, LoaderError::NotFound(_)));
    }
}
