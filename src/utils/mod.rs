pub mod process;

use std::path::{Path, PathBuf};
use which::which;

/// Uses the configured path when present, otherwise looks the tool up in PATH.
pub fn find_executable(name: &str, configured: Option<&Path>) -> Result<PathBuf, String> {
    match configured {
        Some(path) if path.is_file() => Ok(path.to_path_buf()),
        Some(path) => Err(format!(
            "{} executable not found at configured path {}",
            name,
            path.display()
        )),
        None => which(name).map_err(|_| {
            format!(
                "{} executable not found in PATH. Please ensure PostgreSQL client tools are installed and in your PATH.",
                name
            )
        }),
    }
}
