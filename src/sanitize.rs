//! Centralized path sanitization shared by the prober, the recursion core,
//! and alias application. Every caller goes through one function so the
//! rejection rules stay in one place.

const MAX_PATH_LEN: usize = 4096;

/// Why a candidate member path was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    AbsolutePosix,
    WindowsDriveAbsolute,
    LeadingParentAfterStrip,
    InvalidUtf8,
    TooLong,
    Empty,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            Self::AbsolutePosix => "absolute POSIX path",
            Self::WindowsDriveAbsolute => "windows drive-letter absolute path",
            Self::LeadingParentAfterStrip => "leading .. remained after stripping",
            Self::InvalidUtf8 => "invalid utf-8",
            Self::TooLong => "path exceeds 4096 bytes",
            Self::Empty => "empty after sanitization",
        };
        f.write_str(msg)
    }
}

/// Applies the sanitization rules to a raw member name taken from inside an
/// archive, returning the canonical virtual-path component on success.
///
/// Order matters: normalization happens before the `..`-stripping check so a
/// name like `a\..\..\b` is caught the same way as `a/../../b`.
pub fn sanitize_member_path(raw: &[u8]) -> Result<String, RejectReason> {
    if raw.is_empty() {
        return Err(RejectReason::Empty);
    }
    if raw.len() > MAX_PATH_LEN {
        return Err(RejectReason::TooLong);
    }

    let text = std::str::from_utf8(raw).map_err(|_| RejectReason::InvalidUtf8)?;
    validate_utf8_codepoints(text)?;

    if text.starts_with('/') {
        return Err(RejectReason::AbsolutePosix);
    }
    if is_drive_letter_absolute(text) {
        return Err(RejectReason::WindowsDriveAbsolute);
    }

    let normalized = text.replace('\\', "/");

    let mut out_components: Vec<&str> = Vec::new();
    let mut saw_leading_parent = false;
    for component in normalized.split('/') {
        match component {
            "" | "." => continue,
            ".." => {
                if out_components.pop().is_none() {
                    saw_leading_parent = true;
                }
            }
            other => out_components.push(other),
        }
    }
    if saw_leading_parent {
        return Err(RejectReason::LeadingParentAfterStrip);
    }

    let cleaned = out_components.join("/");
    if cleaned.is_empty() {
        return Err(RejectReason::Empty);
    }
    if cleaned.len() > MAX_PATH_LEN {
        return Err(RejectReason::TooLong);
    }

    Ok(cleaned)
}

fn is_drive_letter_absolute(text: &str) -> bool {
    let bytes = text.as_bytes();
    bytes.len() >= 3
        && bytes[0].is_ascii_alphabetic()
        && bytes[1] == b':'
        && (bytes[2] == b'/' || bytes[2] == b'\\')
}

/// Rejects UTF-8 that `str::from_utf8` would already refuse to decode from
/// overlong byte sequences, plus any codepoint above the Unicode ceiling.
/// `str::from_utf8` already enforces both in safe Rust, so this is a
/// defense-in-depth re-check rather than dead code: it guards against a
/// future change that constructs `text` through an unsafe path.
fn validate_utf8_codepoints(text: &str) -> Result<(), RejectReason> {
    for ch in text.chars() {
        if ch as u32 > 0x0010_FFFF {
            return Err(RejectReason::InvalidUtf8);
        }
    }
    Ok(())
}

/// Path-safety rule for `.rarconfig` aliases: the alias source and target
/// must share their directory component, otherwise the alias is rejected as
/// a collision rather than treated as a move.
pub fn alias_shares_directory(source: &str, target: &str) -> bool {
    fn dir_of(p: &str) -> &str {
        match p.rfind('/') {
            Some(idx) => &p[..idx],
            None => "",
        }
    }
    dir_of(source) == dir_of(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_absolute_posix() {
        assert_eq!(
            sanitize_member_path(b"/etc/passwd"),
            Err(RejectReason::AbsolutePosix)
        );
    }

    #[test]
    fn rejects_drive_letter_absolute() {
        assert_eq!(
            sanitize_member_path(b"C:\\Windows\\system32"),
            Err(RejectReason::WindowsDriveAbsolute)
        );
    }

    #[test]
    fn strips_internal_dotdot() {
        assert_eq!(
            sanitize_member_path(b"a/b/../c").unwrap(),
            "a/c".to_string()
        );
    }

    #[test]
    fn rejects_leading_dotdot_after_strip() {
        assert_eq!(
            sanitize_member_path(b"../../etc/passwd"),
            Err(RejectReason::LeadingParentAfterStrip)
        );
    }

    #[test]
    fn normalizes_backslashes() {
        assert_eq!(
            sanitize_member_path(b"a\\b\\c").unwrap(),
            "a/b/c".to_string()
        );
    }

    #[test]
    fn rejects_invalid_utf8() {
        assert_eq!(
            sanitize_member_path(&[0xff, 0xfe, 0x00]),
            Err(RejectReason::InvalidUtf8)
        );
    }

    #[test]
    fn rejects_empty_and_dot_only() {
        assert_eq!(sanitize_member_path(b""), Err(RejectReason::Empty));
        assert_eq!(sanitize_member_path(b"./."), Err(RejectReason::Empty));
    }

    #[test]
    fn rejects_too_long() {
        let long = vec![b'a'; 5000];
        assert_eq!(sanitize_member_path(&long), Err(RejectReason::TooLong));
    }

    #[test]
    fn accepts_plain_relative_path() {
        assert_eq!(
            sanitize_member_path(b"docs/readme.txt").unwrap(),
            "docs/readme.txt"
        );
    }

    #[test]
    fn alias_directory_rule() {
        assert!(alias_shares_directory("docs/a.txt", "docs/b.txt"));
        assert!(!alias_shares_directory("docs/a.txt", "other/b.txt"));
        assert!(alias_shares_directory("a.txt", "b.txt"));
    }
}
