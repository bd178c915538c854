//! Version-insensitive name matching, centralized per `spec.md` §9 ("Fuzzy
//! name stripping is idempotent and must be implemented as a pure function
//! on strings; centralize it").

/// Iteratively strips trailing characters in `{., 0-9}` from `name`.
/// `libc.so.6` and `libc.so.0` both strip to `libc.so`.
pub fn strip_version(name: &str) -> &str {
    name.trim_end_matches(|c: char| c == '.' || c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_trailing_dots_and_digits() {
        assert_eq!(strip_version("libc.so.6"), "libc.so");
        assert_eq!(strip_version("libc.so.0"), "libc.so");
    }

    #[test]
    fn is_idempotent() {
        let once = strip_version("libfoo.so.1.2.3");
        assert_eq!(strip_version(once), once);
    }

    #[test]
    fn leaves_names_without_trailing_digits_untouched() {
        assert_eq!(strip_version("libc.so"), "libc.so");
    }
}
