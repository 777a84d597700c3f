//! Name and mode validation helpers.

use crate::error::{AgentError, AgentResult};

/// Accepts 1-64 characters from `[A-Za-z0-9_-]`.
///
/// Tenant isolation is path-based, so this doubles as the path-traversal
/// guard: no separators, no dots, no empty names.
pub(crate) fn validate_name(name: &str) -> AgentResult<()> {
    let ok = !name.is_empty()
        && name.len() <= 64
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if ok {
        Ok(())
    } else {
        Err(AgentError::invalid(format!(
            "invalid name {name:?} (must be 1-64 chars, only a-z A-Z 0-9 _ -)"
        )))
    }
}

/// Parses an octal mode string like `"2770"`.
pub(crate) fn parse_mode(mode: &str) -> Option<u32> {
    u32::from_str_radix(mode, 8).ok()
}

/// Canonical octal form of a stat mode: permission bits plus the
/// setuid/setgid/sticky bits, no leading zero.
pub(crate) fn mode_string(st_mode: u32) -> String {
    format!("{:o}", st_mode & 0o7777)
}
