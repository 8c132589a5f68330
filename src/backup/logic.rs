use chrono::{DateTime, Duration, Utc};
use std::fs;
use std::path::Path;
use tracing::info;
use zeroize::Zeroizing;

use crate::backup::crypto::ArtifactCipher;
use crate::backup::db_dump::DumpExecutor;
use crate::backup::naming::{ArtifactName, BackupKind};
use crate::backup::store::BackupStore;
use crate::errors::{BackupError, Result};

/// First name of `kind` at or after `at` that is not already taken.
///
/// Two creations of the same kind within one second would otherwise share a
/// name; callers hold the store's writer lock so the existence check cannot race.
pub async fn free_name(
    store: &dyn BackupStore,
    kind: BackupKind,
    at: DateTime<Utc>,
) -> Result<ArtifactName> {
    let mut at = at;
    loop {
        let name = ArtifactName::new(kind, at);
        if !store.exists(&name).await? {
            return Ok(name);
        }
        at += Duration::seconds(1);
    }
}

/// Dumps the database, encrypts the dump and stores it as a new artifact.
///
/// The plaintext dump only ever exists as a private temporary file under
/// `temp_root` and in memory; neither outlives this call. On any failure no
/// artifact is added to the store.
pub async fn perform_backup(
    store: &dyn BackupStore,
    executor: &dyn DumpExecutor,
    cipher: &ArtifactCipher,
    temp_root: &Path,
    kind: BackupKind,
) -> Result<ArtifactName> {
    let started = Utc::now();

    let staging = tempfile::Builder::new()
        .prefix("dump_")
        .suffix(".dump")
        .tempfile_in(temp_root)?;

    info!(%kind, "starting database dump");
    executor.dump(staging.path()).await?;

    let plaintext = Zeroizing::new(fs::read(staging.path())?);
    staging.close()?;
    if plaintext.is_empty() {
        return Err(BackupError::DumpFailed("dump tool produced an empty archive".into()));
    }

    let sealed = cipher.encrypt(&plaintext)?;
    drop(plaintext);

    let name = free_name(store, kind, started).await?;
    store.write(&name, &sealed).await?;
    info!(backup = %name, bytes = sealed.len(), "✓ encrypted backup stored");
    Ok(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::crypto::EncryptionKey;
    use crate::backup::store::MemoryStore;
    use crate::backup::testing::FakeExecutor;
    use chrono::TimeZone;
    use std::time::Duration as StdDuration;

    fn cipher() -> ArtifactCipher {
        ArtifactCipher::new(&EncryptionKey::from_bytes([11; 32]))
    }

    #[tokio::test]
    async fn stored_artifact_is_ciphertext_of_the_dump() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = MemoryStore::new();
        let executor = FakeExecutor::new();

        let name = perform_backup(&store, &executor, &cipher(), temp.path(), BackupKind::Full).await?;

        assert!(name.as_str().starts_with("backup_full_"));
        let sealed = store.read(&name).await?;
        assert_ne!(sealed, executor.dump_payload());
        assert_eq!(cipher().decrypt(&sealed)?.as_slice(), executor.dump_payload().as_slice());
        assert_eq!(fs::read_dir(temp.path())?.count(), 0, "plaintext staging file must be gone");
        Ok(())
    }

    #[tokio::test]
    async fn timed_out_dump_leaves_nothing_behind() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = MemoryStore::new();
        let executor = FakeExecutor::new();
        executor.fail_dumps_with(|| BackupError::DumpTimeout(StdDuration::from_secs(300)));

        let result = perform_backup(&store, &executor, &cipher(), temp.path(), BackupKind::Full).await;

        assert!(matches!(result, Err(BackupError::DumpTimeout(_))));
        assert!(store.names().is_empty());
        assert_eq!(fs::read_dir(temp.path())?.count(), 0, "partial dump must be removed");
        Ok(())
    }

    #[tokio::test]
    async fn empty_dump_is_rejected() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = MemoryStore::new();
        let executor = FakeExecutor::new();
        executor.set_dump_payload(b"");

        let result = perform_backup(&store, &executor, &cipher(), temp.path(), BackupKind::Full).await;
        assert!(matches!(result, Err(BackupError::DumpFailed(_))));
        assert!(store.names().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn colliding_names_move_forward_one_second() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        store.insert_raw("backup_full_20240101120000.dump", b"x");
        store.insert_raw("backup_full_20240101120001.dump", b"x");
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();

        let name = free_name(&store, BackupKind::Full, at).await?;
        assert_eq!(name.as_str(), "backup_full_20240101120002.dump");
        let other_kind = free_name(&store, BackupKind::Incremental, at).await?;
        assert_eq!(other_kind.as_str(), "backup_incremental_20240101120000.dump");
        Ok(())
    }
}
