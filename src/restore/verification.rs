// colonybackup/src/restore/verification.rs
use sqlx::{Connection, PgConnection};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info, warn};

use crate::config::DatabaseConfig;
use crate::errors::{BackupError, Result};

const CHECK_TIMEOUT: Duration = Duration::from_secs(10);

async fn connect(db: &DatabaseConfig) -> std::result::Result<PgConnection, String> {
    let url = db.connection_url().map_err(|e| e.to_string())?;
    match timeout(CHECK_TIMEOUT, PgConnection::connect(url.as_str())).await {
        Ok(Ok(conn)) => Ok(conn),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("no connection within {}s", CHECK_TIMEOUT.as_secs())),
    }
}

/// Refuses to start a restore against a database we cannot reach, so the
/// schema is never dropped when the load step is bound to fail.
pub async fn check_connection(db: &DatabaseConfig) -> Result<()> {
    let mut conn = connect(db).await.map_err(|reason| {
        error!(host = %db.host, database = %db.name, %reason, "restore preflight failed");
        BackupError::RestoreFailed("database is not reachable; nothing was dropped".into())
    })?;

    let ping = timeout(CHECK_TIMEOUT, sqlx::query("SELECT 1").execute(&mut conn)).await;
    if !matches!(ping, Ok(Ok(_))) {
        error!(host = %db.host, database = %db.name, "restore preflight query failed");
        return Err(BackupError::RestoreFailed(
            "database did not answer the preflight query; nothing was dropped".into(),
        ));
    }
    let _ = conn.close().await;
    info!(database = %db.name, "✓ database reachable");
    Ok(())
}

/// Counts tables in the public schema after a restore. Only ever logs: the
/// restore has already happened and cannot be undone from here.
pub async fn verify_restore(db: &DatabaseConfig) {
    let mut conn = match connect(db).await {
        Ok(conn) => conn,
        Err(reason) => {
            warn!(%reason, "could not connect to verify the restore");
            return;
        }
    };

    let count = sqlx::query_scalar::<_, i64>(
        "SELECT count(*) FROM pg_catalog.pg_tables WHERE schemaname = 'public'",
    )
    .fetch_one(&mut conn)
    .await;
    let _ = conn.close().await;

    match count {
        Ok(0) => warn!(database = %db.name, "no tables found in the public schema after restore"),
        Ok(n) => info!(database = %db.name, tables = n, "✓ restore verification found tables"),
        Err(e) => warn!(error = %e, "restore verification query failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Nothing listens on port 1, so connecting is refused at once.
    fn unreachable() -> DatabaseConfig {
        DatabaseConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            name: "colonies".to_string(),
            user: "postgres".to_string(),
            password: "secret".to_string(),
        }
    }

    #[tokio::test]
    async fn preflight_refuses_unreachable_database() {
        let err = check_connection(&unreachable()).await.unwrap_err();
        assert!(matches!(err, BackupError::RestoreFailed(_)));
        assert!(!err.to_string().contains("secret"));
    }

    #[tokio::test]
    async fn verification_only_logs_when_database_is_gone() {
        tokio::time::timeout(CHECK_TIMEOUT * 2, verify_restore(&unreachable()))
            .await
            .expect("verification gives up instead of hanging");
    }
}
