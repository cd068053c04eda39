//! Human-readable byte counts for cache reports.

/// Format a byte count as a human-readable string with one decimal.
///
/// ```
/// use tilesupply::config::format_size;
///
/// assert_eq!(format_size(512), "512 B");
/// assert_eq!(format_size(131_072), "128.0 KB");
/// assert_eq!(format_size(3 * 1024 * 1024 / 2), "1.5 MB");
/// ```
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
