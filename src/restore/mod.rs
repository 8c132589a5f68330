pub(crate) mod db_restore;
pub(crate) mod logic;
pub(crate) mod verification;

use anyhow::{Context, Result};
use tracing::info;

use crate::service::BackupService;

/// Public entry point for the restore process from the command line.
pub async fn run_restore_flow(service: &BackupService, backup_filename: &str) -> Result<()> {
    info!(backup = backup_filename, "restore requested from command line");
    service
        .restore(backup_filename)
        .await
        .with_context(|| format!("Failed to restore {}", backup_filename))
}
