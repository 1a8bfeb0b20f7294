//! Validation for names that become path components in the output store.
//!
//! Stream and segment names arrive straight from request paths, so they
//! are restricted to a conservative character set before they ever touch
//! the filesystem.

/// Maximum accepted stream name length.
pub const MAX_STREAM_NAME_LEN: usize = 64;

/// Extension of transcoded media segments.
pub const SEGMENT_EXTENSION: &str = ".ts";

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

/// Whether `name` is usable as a stream key.
///
/// Accepts 1..=64 ASCII letters, digits, `-` and `_`, not starting with `-`.
///
/// ```
/// use camrelay::utils::stream_name::is_valid_stream_name;
///
/// assert!(is_valid_stream_name("cam1"));
/// assert!(!is_valid_stream_name("../etc"));
/// assert!(!is_valid_stream_name(""));
/// ```
pub fn is_valid_stream_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_STREAM_NAME_LEN
        && !name.starts_with('-')
        && name.chars().all(is_name_char)
}

/// Whether `segment` looks like a media segment file produced for a stream.
pub fn is_valid_segment_name(segment: &str) -> bool {
    segment
        .strip_suffix(SEGMENT_EXTENSION)
        .is_some_and(is_valid_stream_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_typical_names() {
        assert!(is_valid_stream_name("cam1"));
        assert!(is_valid_stream_name("ultimaker_3-left"));
        assert!(is_valid_stream_name(&"a".repeat(MAX_STREAM_NAME_LEN)));
    }

    #[test]
    fn test_rejects_path_like_names() {
        assert!(!is_valid_stream_name(".."));
        assert!(!is_valid_stream_name("a/b"));
        assert!(!is_valid_stream_name("a\\b"));
        assert!(!is_valid_stream_name("cam 1"));
        assert!(!is_valid_stream_name("-rf"));
        assert!(!is_valid_stream_name(&"a".repeat(MAX_STREAM_NAME_LEN + 1)));
    }

    #[test]
    fn test_segment_names() {
        assert!(is_valid_segment_name("segment_00001.ts"));
        assert!(!is_valid_segment_name("segment_00001.mp4"));
        assert!(!is_valid_segment_name("../index.ts"));
        assert!(!is_valid_segment_name(".ts"));
    }
}
