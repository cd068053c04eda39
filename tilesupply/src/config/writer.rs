//! INI serialization: `ConfigFile` → commented INI string.

use std::path::Path;

use super::file::ConfigFile;

/// Convert a `ConfigFile` to a commented INI string for saving.
pub(super) fn to_config_string(config: &ConfigFile) -> String {
    let workers = config
        .pool
        .workers
        .map(|n| n.to_string())
        .unwrap_or_else(|| "auto".to_string());

    format!(
        r#"[cache]
; Directory for cached tiles, one file per tile named "<x>x<y>"
directory = {}
; Tiles kept in memory (default: 64)
memory_tiles = {}
; Upper bound on tiles kept on disk (default: 2000)
; The effective limit shrinks when the disk runs low on free space
disk_tiles = {}

[fetch]
; Tile URL; {{x}} and {{y}} are replaced with the tile coordinates
url_template = {}
; Connect timeout in milliseconds (default: 1000)
connect_timeout_ms = {}
; Read timeout in milliseconds (default: 5000)
io_timeout_ms = {}

[pool]
; Fetch worker threads, or "auto" (2 on multi-core machines, otherwise 1)
workers = {}
; Fetch jobs allowed to wait for a worker (default: 64)
queue_depth = {}
"#,
        path_to_string(&config.cache.directory),
        config.cache.memory_tiles,
        config.cache.disk_tiles,
        config.fetch.url_template,
        config.fetch.connect_timeout_ms,
        config.fetch.io_timeout_ms,
        workers,
        config.pool.queue_depth,
    )
}

/// Convert path to string, collapsing home dir to ~.
pub(super) fn path_to_string(path: &Path) -> String {
    if let Some(home) = dirs::home_dir() {
        if let Ok(stripped) = path.strip_prefix(&home) {
            return format!("~/{}", stripped.display());
        }
    }
    path.display().to_string()
}
