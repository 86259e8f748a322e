//! Filename sanitization
//!
//! Remote object names are free-form; local filesystems are not. Reserved
//! characters are replaced with underscores, trailing dots and spaces are
//! trimmed, and names reserved on common filesystems are prefixed so they
//! never collide with device nodes when a tree is copied across platforms.

/// Names that are special on FAT/NTFS regardless of extension
const RESERVED_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

fn is_reserved_char(c: char) -> bool {
    matches!(c, '/' | '\\' | '<' | '>' | ':' | '"' | '|' | '?' | '*') || c.is_control()
}

/// Maps a remote object name to a safe local filename
///
/// The result is never empty and never starts a path traversal.
pub fn sanitize_file_name(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if is_reserved_char(c) { '_' } else { c })
        .collect();

    while out.ends_with('.') || out.ends_with(' ') {
        out.pop();
    }
    let out = out.trim_start().to_string();

    if out.is_empty() || out == "." || out == ".." {
        return "_".to_string();
    }

    let stem = out.split('.').next().unwrap_or(&out);
    if RESERVED_NAMES
        .iter()
        .any(|r| r.eq_ignore_ascii_case(stem))
    {
        return format!("_{out}");
    }

    out
}
