use tracing::{debug, info, warn};

use crate::backup::store::{BackupStore, StoredArtifact};
use crate::errors::{BackupError, Result};

/// Deletes the oldest artifacts until at most `max_backups` remain.
///
/// Order is creation time ascending, then file name, so equal timestamps
/// still evict deterministically. An artifact that disappeared between the
/// listing and the delete (another writer pruned it) is skipped.
///
/// Returns the names that were removed by this call.
pub async fn prune(store: &dyn BackupStore, max_backups: usize) -> Result<Vec<String>> {
    let mut artifacts = store.list().await?;
    if artifacts.len() <= max_backups {
        debug!(count = artifacts.len(), max_backups, "retention: nothing to prune");
        return Ok(Vec::new());
    }

    sort_oldest_first(&mut artifacts);
    let excess = artifacts.len() - max_backups;

    let mut removed = Vec::with_capacity(excess);
    for artifact in artifacts.into_iter().take(excess) {
        match store.delete(&artifact.name).await {
            Ok(()) => {
                info!(backup = %artifact.name, "retention: removed old backup");
                removed.push(artifact.name.to_string());
            }
            Err(BackupError::NotFound(_)) => {
                warn!(backup = %artifact.name, "retention: backup already gone");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(removed)
}

pub fn sort_oldest_first(artifacts: &mut [StoredArtifact]) {
    artifacts.sort_by(|a, b| {
        a.created
            .cmp(&b.created)
            .then_with(|| a.name.as_str().cmp(b.name.as_str()))
    });
}

pub fn sort_newest_first(artifacts: &mut [StoredArtifact]) {
    sort_oldest_first(artifacts);
    artifacts.reverse();
}
