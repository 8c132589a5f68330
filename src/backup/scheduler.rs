use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::backup::naming::BackupKind;
use crate::service::BackupService;

/// Runs a full backup every `interval` until the process exits.
///
/// Each iteration is its own failure boundary: an error is logged and the
/// loop waits for the next tick.
pub fn spawn_scheduler(service: Arc<BackupService>, interval: Duration) -> JoinHandle<()> {
    info!(interval_secs = interval.as_secs(), "backup scheduler started");
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            info!("⏰ scheduled backup starting");
            match service.create_backup(BackupKind::Full).await {
                Ok(name) => info!(backup = %name, "scheduled backup finished"),
                Err(e) => error!(error = %e, "scheduled backup failed; retrying next interval"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::BackupError;
    use crate::service::tests::harness;

    const DAY: Duration = Duration::from_secs(86_400);

    async fn settle() {
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_per_interval() {
        let h = harness();
        let task = spawn_scheduler(h.service.clone(), DAY);

        tokio::time::sleep(DAY - Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(h.executor.dumps(), 0);

        tokio::time::sleep(DAY + Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(h.executor.dumps(), 2);

        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn failures_do_not_stop_the_loop() {
        let h = harness();
        h.executor
            .fail_dumps_with(|| BackupError::DumpFailed("pg_dump: not found".into()));
        let task = spawn_scheduler(h.service.clone(), DAY);

        tokio::time::sleep(DAY * 3 + Duration::from_secs(1)).await;
        settle().await;

        assert_eq!(h.executor.dumps(), 3);
        assert!(h.store.names().is_empty());
        assert!(!task.is_finished());
        task.abort();
    }
}
