pub(crate) mod crypto;
pub(crate) mod db_dump;
pub(crate) mod logic;
pub(crate) mod naming;
pub(crate) mod retention;
pub(crate) mod s3_upload;
pub(crate) mod scheduler;
pub(crate) mod store;
#[cfg(test)]
pub(crate) mod testing;

use anyhow::{Context, Result};
use tracing::info;

use crate::backup::naming::BackupKind;
use crate::service::BackupService;

/// Public entry point for a one-off backup from the command line.
pub async fn run_backup_flow(service: &BackupService, kind: BackupKind) -> Result<()> {
    let name = service
        .create_backup(kind)
        .await
        .with_context(|| format!("Failed to create {} backup", kind))?;
    info!(backup = %name, "backup created");
    println!("📦 {}", name);
    Ok(())
}
