//! Utility functions for chunkvault
//!
//! Small helpers shared by the library and the command line tool:
//!
//! - Atomic file writing (temp file in the target directory, then rename)
//! - Human-readable byte sizes
//! - Thousands separators for byte counts in reports
//!
//! ## Example Usage
//!
//! ```rust
//! use chunkvault::utils::{format_bytes, format_number};
//!
//! assert_eq!(format_bytes(1536), "1.50 KB");
//! assert_eq!(format_number(1234567), "1,234,567");
//! ```

use crate::error::Result;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use tracing::trace;

/// Format bytes as human-readable string
///
/// Values below 1024 are shown as whole bytes, larger values with two
/// decimals in binary units.
///
/// ```rust
/// use chunkvault::utils::format_bytes;
///
/// assert_eq!(format_bytes(0), "0 B");
/// assert_eq!(format_bytes(1023), "1023 B");
/// assert_eq!(format_bytes(1_048_576), "1.00 MB");
/// ```
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB", "PB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", size as u64, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}

/// Format an integer with comma thousands separators
pub fn format_number(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if n < 0 {
        out.push('-');
    }
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Atomic file write (write to temp file then rename)
///
/// The temporary file is created next to `path` so the final rename never
/// crosses a filesystem. Readers see either the previous content or the
/// complete new content, never a partial write. The temporary file is
/// removed if any step fails.
///
/// # Errors
///
/// - [`crate::VaultError::Io`] if the temporary file cannot be created,
///   written or synced
/// - [`crate::VaultError::Io`] if the rename fails
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;

    trace!("Atomically wrote {} bytes to {:?}", content.len(), path);
    Ok(())
}
