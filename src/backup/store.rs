//! Storage of encrypted artifacts.
//!
//! The store is the only index of which backups exist. Entries whose name
//! does not match the artifact grammar are invisible to every operation.

use async_trait::async_trait;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tempfile::NamedTempFile;

use crate::backup::naming::{ArtifactName, FilenameValidator};
use crate::errors::{BackupError, Result};

/// An artifact opened for streaming out of the store.
#[derive(Debug)]
pub struct ArtifactFile {
    pub path: PathBuf,
    pub file: tokio::fs::File,
    pub len: u64,
}

/// One listed artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub name: ArtifactName,
    pub created: SystemTime,
    pub size: u64,
}

#[async_trait]
pub trait BackupStore: Send + Sync {
    /// All grammar-matching artifacts, in no particular order.
    async fn list(&self) -> Result<Vec<StoredArtifact>>;

    async fn exists(&self, name: &ArtifactName) -> Result<bool>;

    /// Fails with [`BackupError::NotFound`] when absent.
    async fn read(&self, name: &ArtifactName) -> Result<Vec<u8>>;

    /// Opens the artifact without loading it. Fails with
    /// [`BackupError::NotFound`] when absent.
    async fn open(&self, name: &ArtifactName) -> Result<ArtifactFile>;

    /// Replaces the artifact atomically; readers never observe a partial write.
    async fn write(&self, name: &ArtifactName, bytes: &[u8]) -> Result<()>;

    /// Fails with [`BackupError::NotFound`] when absent.
    async fn delete(&self, name: &ArtifactName) -> Result<()>;
}

/// Artifacts as files directly under one directory.
#[derive(Debug, Clone)]
pub struct FsStore {
    validator: FilenameValidator,
}

impl FsStore {
    /// Creates the root directory if needed.
    pub fn open(root: &Path) -> Result<Self> {
        fs::create_dir_all(root)?;
        Ok(FsStore {
            validator: FilenameValidator::new(root)?,
        })
    }

    pub fn root(&self) -> &Path {
        self.validator.root()
    }

    fn path_of(&self, name: &ArtifactName) -> Result<PathBuf> {
        self.validator.resolve_name(name)
    }
}

fn not_found_as(name: &ArtifactName) -> impl FnOnce(std::io::Error) -> BackupError + '_ {
    move |e| match e.kind() {
        ErrorKind::NotFound => BackupError::NotFound(name.to_string()),
        _ => BackupError::Io(e),
    }
}

#[async_trait]
impl BackupStore for FsStore {
    async fn list(&self) -> Result<Vec<StoredArtifact>> {
        let mut artifacts = Vec::new();
        for entry in fs::read_dir(self.root())? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let Ok(name) = ArtifactName::parse(file_name) else {
                continue;
            };
            // A concurrent delete between read_dir and metadata is not an error.
            let metadata = match entry.metadata() {
                Ok(m) => m,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            if !metadata.is_file() {
                continue;
            }
            let created = metadata
                .created()
                .or_else(|_| metadata.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            artifacts.push(StoredArtifact {
                name,
                created,
                size: metadata.len(),
            });
        }
        Ok(artifacts)
    }

    async fn exists(&self, name: &ArtifactName) -> Result<bool> {
        Ok(self.path_of(name)?.is_file())
    }

    async fn read(&self, name: &ArtifactName) -> Result<Vec<u8>> {
        let path = self.path_of(name)?;
        fs::read(&path).map_err(not_found_as(name))
    }

    async fn open(&self, name: &ArtifactName) -> Result<ArtifactFile> {
        let path = self.path_of(name)?;
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(not_found_as(name))?;
        let len = file.metadata().await?.len();
        Ok(ArtifactFile { path, file, len })
    }

    async fn write(&self, name: &ArtifactName, bytes: &[u8]) -> Result<()> {
        let path = self.path_of(name)?;
        // Hidden staging name never matches the artifact grammar.
        let mut staged = tempfile::Builder::new()
            .prefix(".incoming_")
            .tempfile_in(self.root())?;
        staged.write_all(bytes)?;
        staged.as_file().sync_all()?;
        persist(staged, &path)
    }

    async fn delete(&self, name: &ArtifactName) -> Result<()> {
        let path = self.path_of(name)?;
        fs::remove_file(&path).map_err(not_found_as(name))
    }
}

fn persist(staged: NamedTempFile, target: &Path) -> Result<()> {
    staged
        .persist(target)
        .map(|_| ())
        .map_err(|e| BackupError::Io(e.error))
}

#[cfg(test)]
pub use memory::MemoryStore;


#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    fn name(s: &str) -> ArtifactName {
        ArtifactName::parse(s).unwrap()
    }

    #[tokio::test]
    async fn fs_store_write_read_delete() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = FsStore::open(&dir.path().join("backups"))?;
        let artifact = name("backup_full_20240101120000.dump");

        assert!(!store.exists(&artifact).await?);
        store.write(&artifact, b"ciphertext").await?;
        assert!(store.exists(&artifact).await?);
        assert_eq!(store.read(&artifact).await?, b"ciphertext");

        let mut opened = store.open(&artifact).await?;
        assert_eq!(opened.len, 10);
        assert_eq!(opened.path, dir.path().join("backups").join(artifact.as_str()).canonicalize()?);
        let mut streamed = Vec::new();
        opened.file.read_to_end(&mut streamed).await?;
        assert_eq!(streamed, b"ciphertext");
        drop(opened);

        store.delete(&artifact).await?;
        assert!(matches!(store.read(&artifact).await, Err(BackupError::NotFound(_))));
        assert!(matches!(store.delete(&artifact).await, Err(BackupError::NotFound(_))));
        assert!(matches!(store.open(&artifact).await, Err(BackupError::NotFound(_))));
        Ok(())
    }

    #[tokio::test]
    async fn fs_store_lists_only_artifacts() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = FsStore::open(dir.path())?;
        store.write(&name("backup_import_20240101120000.dump"), b"a").await?;
        fs::write(dir.path().join("notes.txt"), b"ignored")?;
        fs::write(dir.path().join("backup_full_2024.dump"), b"ignored")?;
        fs::create_dir(dir.path().join("backup_full_20240101120001.dump"))?;

        let listed: Vec<String> = store
            .list()
            .await?
            .into_iter()
            .map(|a| a.name.to_string())
            .collect();
        assert_eq!(listed, vec!["backup_import_20240101120000.dump".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn fs_store_leaves_no_staging_files() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let store = FsStore::open(dir.path())?;
        store.write(&name("backup_full_20240101120000.dump"), b"x").await?;
        store.write(&name("backup_full_20240101120000.dump"), b"y").await?;

        let entries: Vec<_> = fs::read_dir(dir.path())?.collect::<std::result::Result<_, _>>()?;
        assert_eq!(entries.len(), 1);
        assert_eq!(store.read(&name("backup_full_20240101120000.dump")).await?, b"y");
        Ok(())
    }
}
