//! Shared string validation helpers.
//!
//! Used by the provisioning command and by config validation, and kept
//! here so neither depends on the other.

/// Returns `true` if every byte of `s` is in the printable ASCII range
/// `0x20..=0x7E` (space through tilde, inclusive).
pub(crate) fn is_printable_ascii(s: &str) -> bool {
    s.bytes().all(|b| (0x20..=0x7E).contains(&b))
}

/// Non-empty printable ASCII of at most `max` bytes.
pub(crate) fn is_printable_name(s: &str, max: usize) -> bool {
    !s.is_empty() && s.len() <= max && is_printable_ascii(s)
}
