use std::io::Write;
use std::path::Path;
use tracing::{info, warn};

use crate::backup::crypto::ArtifactCipher;
use crate::backup::db_dump::DumpExecutor;
use crate::backup::naming::ArtifactName;
use crate::backup::store::BackupStore;
use crate::errors::Result;

/// Decrypts one stored artifact into a private temporary file and restores it.
///
/// The decrypted file lives only for the duration of this call: it is
/// removed on success, on failure and on early return alike.
pub async fn perform_restore(
    store: &dyn BackupStore,
    executor: &dyn DumpExecutor,
    cipher: &ArtifactCipher,
    temp_root: &Path,
    name: &ArtifactName,
) -> Result<()> {
    let sealed = store.read(name).await?;
    let plaintext = cipher.decrypt(&sealed)?;
    drop(sealed);

    let mut staging = tempfile::Builder::new()
        .prefix("restore_")
        .suffix(".dump")
        .tempfile_in(temp_root)?;
    staging.write_all(&plaintext)?;
    staging.as_file().sync_all()?;
    drop(plaintext);

    info!(backup = %name, "restoring database from backup");
    let outcome = executor.restore(staging.path()).await;

    if let Err(e) = staging.close() {
        warn!(error = %e, "failed to remove decrypted restore file");
    }
    outcome
}
