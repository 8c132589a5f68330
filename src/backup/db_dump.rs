// colonybackup/src/backup/db_dump.rs
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{error, info};

use crate::config::{AppConfig, DatabaseConfig, Timeouts, ToolPaths};
use crate::errors::{BackupError, Result};
use crate::restore::db_restore;
use crate::utils::find_executable;
use crate::utils::process::{CommandError, run_with_timeout, stderr_tail};

/// The external database tooling, behind a trait so tests can substitute it.
#[async_trait]
pub trait DumpExecutor: Send + Sync {
    /// Writes a plaintext custom-format dump of the whole database to `dest`.
    async fn dump(&self, dest: &Path) -> Result<()>;

    /// Drops and recreates the target schema, then loads the dump at `source`.
    async fn restore(&self, source: &Path) -> Result<()>;
}

/// `pg_dump` / `psql` / `pg_restore` against one configured database.
#[derive(Debug, Clone)]
pub struct PgTools {
    pub(crate) database: DatabaseConfig,
    pub(crate) tools: ToolPaths,
    pub(crate) timeouts: Timeouts,
}

impl PgTools {
    pub fn new(config: &AppConfig) -> Self {
        PgTools {
            database: config.database.clone(),
            tools: config.tools.clone(),
            timeouts: config.timeouts,
        }
    }

    /// Host, port and user flags shared by all three tools. The password
    /// travels in the child environment, never in argv.
    pub(crate) fn connection_args(&self) -> Vec<OsString> {
        vec![
            "-h".into(),
            self.database.host.clone().into(),
            "-p".into(),
            self.database.port.to_string().into(),
            "-U".into(),
            self.database.user.clone().into(),
            "--no-password".into(),
        ]
    }

    pub(crate) fn pg_dump_args(&self, dest: &Path) -> Vec<OsString> {
        let mut args = self.connection_args();
        args.extend([
            "-F".into(),
            "c".into(),
            "-f".into(),
            dest.as_os_str().to_owned(),
            self.database.name.clone().into(),
        ]);
        args
    }

    pub(crate) fn command(&self, program: &Path, args: Vec<OsString>) -> Command {
        let mut cmd = Command::new(program);
        cmd.args(args).env("PGPASSWORD", &self.database.password);
        cmd
    }

    pub(crate) fn tool(&self, name: &str, configured: Option<&PathBuf>) -> std::result::Result<PathBuf, String> {
        find_executable(name, configured.map(PathBuf::as_path))
    }
}

#[async_trait]
impl DumpExecutor for PgTools {
    async fn dump(&self, dest: &Path) -> Result<()> {
        let pg_dump = self
            .tool("pg_dump", self.tools.pg_dump.as_ref())
            .map_err(BackupError::DumpFailed)?;
        info!(
            database = %self.database.name,
            host = %self.database.host,
            "running pg_dump (custom format)"
        );

        let cmd = self.command(&pg_dump, self.pg_dump_args(dest));
        let output = run_with_timeout(cmd, self.timeouts.dump)
            .await
            .map_err(|e| match e {
                CommandError::TimedOut(limit) => {
                    error!(timeout_secs = limit.as_secs(), "pg_dump timed out and was killed");
                    BackupError::DumpTimeout(limit)
                }
                other => BackupError::DumpFailed(other.to_string()),
            })?;

        if !output.status.success() {
            error!(status = %output.status, stderr = %stderr_tail(&output), "pg_dump failed");
            return Err(BackupError::DumpFailed(format!(
                "pg_dump exited with {}",
                output.status
            )));
        }
        info!("✓ pg_dump finished");
        Ok(())
    }

    async fn restore(&self, source: &Path) -> Result<()> {
        db_restore::restore_database(self, source).await
    }
}
