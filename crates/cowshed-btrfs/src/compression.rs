//! Compression value validation.
//!
//! The accepted grammar is `""`, `"none"`, or `algo[:level]` where algo is
//! one of zstd, lzo, zlib and level is 1..=15. The empty string and
//! `"none"` both mean "no compression" and are never passed to the tool.

/// Returns true when `value` is an acceptable compression setting.
pub fn is_valid_compression(value: &str) -> bool {
    if value.is_empty() || value == "none" {
        return true;
    }
    let (algo, level) = match value.split_once(':') {
        Some((algo, level)) => (algo, Some(level)),
        None => (value, None),
    };
    if !matches!(algo, "zstd" | "lzo" | "zlib") {
        return false;
    }
    match level {
        None => true,
        Some(level) => matches!(level.parse::<u32>(), Ok(n) if (1..=15).contains(&n)),
    }
}
