//! Backup orchestrator shared by the HTTP handlers, the scheduler and the CLI.

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::backup::crypto::ArtifactCipher;
use crate::backup::db_dump::DumpExecutor;
use crate::backup::logic::{free_name, perform_backup};
use crate::backup::naming::{ArtifactName, BackupKind, DUMP_EXTENSION};
use crate::backup::retention::{self, sort_newest_first};
use crate::backup::s3_upload::{RemoteArchiver, validate_bucket_name};
use crate::backup::store::{ArtifactFile, BackupStore, StoredArtifact};
use crate::config::AppConfig;
use crate::errors::{BackupError, Result};
use crate::restore::logic::perform_restore;

pub struct BackupService {
    store: Arc<dyn BackupStore>,
    executor: Arc<dyn DumpExecutor>,
    archiver: Arc<dyn RemoteArchiver>,
    cipher: ArtifactCipher,
    temp_root: PathBuf,
    max_backups: usize,
    // Serializes create, prune, restore, import and delete.
    writer: Mutex<()>,
}

impl BackupService {
    pub fn new(
        config: &AppConfig,
        store: Arc<dyn BackupStore>,
        executor: Arc<dyn DumpExecutor>,
        archiver: Arc<dyn RemoteArchiver>,
    ) -> Self {
        BackupService {
            store,
            executor,
            archiver,
            cipher: ArtifactCipher::new(&config.encryption_key),
            temp_root: config.temp_dump_root.clone(),
            max_backups: config.max_backups,
            writer: Mutex::new(()),
        }
    }

    /// Creates one backup and applies retention.
    ///
    /// A retention failure after the artifact is stored is logged and does
    /// not fail the creation.
    pub async fn create_backup(&self, kind: BackupKind) -> Result<ArtifactName> {
        if kind == BackupKind::Import {
            return Err(BackupError::InvalidKind(kind.to_string()));
        }
        let _guard = self.writer.lock().await;
        let name = perform_backup(
            self.store.as_ref(),
            self.executor.as_ref(),
            &self.cipher,
            &self.temp_root,
            kind,
        )
        .await?;
        match retention::prune(self.store.as_ref(), self.max_backups).await {
            Ok(removed) if !removed.is_empty() => {
                info!(removed = ?removed, "retention removed old backups")
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "retention failed after backup"),
        }
        Ok(name)
    }

    /// Validates the kind, then runs the creation in the background.
    pub fn spawn_create(self: &Arc<Self>, kind: BackupKind) -> Result<JoinHandle<()>> {
        if kind == BackupKind::Import {
            return Err(BackupError::InvalidKind(kind.to_string()));
        }
        let service = Arc::clone(self);
        Ok(tokio::spawn(async move {
            match service.create_backup(kind).await {
                Ok(name) => info!(backup = %name, "background backup finished"),
                Err(e) => error!(%kind, error = %e, "background backup failed"),
            }
        }))
    }

    /// Stored artifacts, newest first.
    pub async fn list_artifacts(&self) -> Result<Vec<StoredArtifact>> {
        let mut artifacts = self.store.list().await?;
        sort_newest_first(&mut artifacts);
        Ok(artifacts)
    }

    /// Artifact names, newest first.
    pub async fn list(&self) -> Result<Vec<String>> {
        Ok(self
            .list_artifacts()
            .await?
            .into_iter()
            .map(|a| a.name.as_str().to_string())
            .collect())
    }

    /// Opens one artifact for streaming; the bytes are exactly as stored.
    pub async fn download(&self, filename: &str) -> Result<(ArtifactName, ArtifactFile)> {
        let name = ArtifactName::parse(filename)?;
        let artifact = self.store.open(&name).await?;
        Ok((name, artifact))
    }

    pub async fn delete(&self, filename: &str) -> Result<()> {
        let name = ArtifactName::parse(filename)?;
        let _guard = self.writer.lock().await;
        self.store.delete(&name).await?;
        info!(backup = %name, "backup deleted");
        Ok(())
    }

    /// Copies one artifact to a bucket under its own filename.
    pub async fn upload(&self, filename: &str, bucket: &str) -> Result<()> {
        let name = ArtifactName::parse(filename)?;
        validate_bucket_name(bucket)?;
        let artifact = self.store.open(&name).await?;
        self.archiver
            .upload(&artifact.path, bucket, name.as_str())
            .await
    }

    pub async fn restore(&self, filename: &str) -> Result<()> {
        let name = ArtifactName::parse(filename)?;
        let _guard = self.writer.lock().await;
        if !self.store.exists(&name).await? {
            return Err(BackupError::NotFound(name.to_string()));
        }
        self.restore_locked(&name).await
    }

    /// Stores an uploaded encrypted dump under a fresh import name and
    /// restores it. The caller's filename is only checked for its extension.
    ///
    /// Bytes that do not decrypt with the configured key are removed again.
    pub async fn import(&self, bytes: &[u8], declared_name: &str) -> Result<ArtifactName> {
        if !declared_name.to_ascii_lowercase().ends_with(DUMP_EXTENSION) {
            let shown: String = declared_name.chars().take(80).collect();
            return Err(BackupError::InvalidImport(format!("{:?}", shown)));
        }
        let _guard = self.writer.lock().await;
        let name = free_name(self.store.as_ref(), BackupKind::Import, chrono::Utc::now()).await?;
        self.store.write(&name, bytes).await?;
        info!(backup = %name, bytes = bytes.len(), "imported backup stored");

        match self.restore_locked(&name).await {
            Err(BackupError::Decryption) => {
                if let Err(e) = self.store.delete(&name).await {
                    warn!(backup = %name, error = %e, "failed to remove undecryptable import");
                }
                Err(BackupError::Decryption)
            }
            Err(e) => Err(e),
            Ok(()) => Ok(name),
        }
    }

    async fn restore_locked(&self, name: &ArtifactName) -> Result<()> {
        perform_restore(
            self.store.as_ref(),
            self.executor.as_ref(),
            &self.cipher,
            &self.temp_root,
            name,
        )
        .await?;
        info!(backup = %name, "database restored from backup");
        Ok(())
    }
}
