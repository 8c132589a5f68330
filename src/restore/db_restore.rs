// colonybackup/src/restore/db_restore.rs
use std::ffi::OsString;
use std::path::Path;
use std::process::ExitStatus;
use tracing::{error, info, warn};

use crate::backup::db_dump::PgTools;
use crate::errors::{BackupError, Result};
use crate::restore::verification;
use crate::utils::process::{CommandError, run_with_timeout, stderr_tail};

/// Sent as one statement so both halves commit or neither does.
const RESET_SCHEMA_SQL: &str = "DROP SCHEMA public CASCADE; CREATE SCHEMA public;";

pub(crate) fn reset_schema_args(tools: &PgTools) -> Vec<OsString> {
    let mut args = tools.connection_args();
    args.extend([
        "-d".into(),
        tools.database.name.clone().into(),
        "-X".into(), // Do not read psqlrc
        "-q".into(),
        "-v".into(),
        "ON_ERROR_STOP=1".into(),
        "-c".into(),
        RESET_SCHEMA_SQL.into(),
    ]);
    args
}

pub(crate) fn pg_restore_args(tools: &PgTools, source: &Path) -> Vec<OsString> {
    let mut args = tools.connection_args();
    args.extend([
        "--clean".into(),
        "--if-exists".into(),
        "--no-owner".into(),
        "--no-privileges".into(),
        "-d".into(),
        tools.database.name.clone().into(),
        source.as_os_str().to_owned(),
    ]);
    args
}

/// pg_restore exits 1 when it only emitted warnings (for example an unknown
/// session setting from a newer server); that still counts as restored.
pub(crate) fn restore_exit_ok(status: &ExitStatus) -> bool {
    matches!(status.code(), Some(0) | Some(1))
}

fn map_restore_error(step: &str, e: CommandError) -> BackupError {
    match e {
        CommandError::TimedOut(limit) => {
            error!(step, timeout_secs = limit.as_secs(), "restore step timed out and was killed");
            BackupError::RestoreTimeout(limit)
        }
        other => BackupError::RestoreFailed(format!("{} could not run: {}", step, other)),
    }
}

/// Replaces the contents of the configured database with the dump at `source`.
///
/// Destructive and not transactional across its two steps: once the schema
/// reset has committed, a failing pg_restore leaves the database empty.
pub async fn restore_database(tools: &PgTools, source: &Path) -> Result<()> {
    let psql = tools
        .tool("psql", tools.tools.psql.as_ref())
        .map_err(BackupError::RestoreFailed)?;
    let pg_restore = tools
        .tool("pg_restore", tools.tools.pg_restore.as_ref())
        .map_err(BackupError::RestoreFailed)?;

    verification::check_connection(&tools.database).await?;

    info!(database = %tools.database.name, "resetting public schema");
    let output = run_with_timeout(
        tools.command(&psql, reset_schema_args(tools)),
        tools.timeouts.schema_reset,
    )
    .await
    .map_err(|e| map_restore_error("psql", e))?;
    if !output.status.success() {
        error!(status = %output.status, stderr = %stderr_tail(&output), "schema reset failed");
        return Err(BackupError::RestoreFailed(format!(
            "schema reset exited with {}",
            output.status
        )));
    }
    info!("✓ public schema recreated");

    info!(database = %tools.database.name, "running pg_restore");
    let output = run_with_timeout(
        tools.command(&pg_restore, pg_restore_args(tools, source)),
        tools.timeouts.restore,
    )
    .await
    .map_err(|e| {
        error!("pg_restore did not complete after the schema was dropped; database may be empty");
        map_restore_error("pg_restore", e)
    })?;

    if !restore_exit_ok(&output.status) {
        error!(
            status = %output.status,
            stderr = %stderr_tail(&output),
            "pg_restore failed after the schema was dropped; database may be empty"
        );
        return Err(BackupError::RestoreFailed(format!(
            "pg_restore exited with {}; the database schema was already dropped and may be empty",
            output.status
        )));
    }
    if output.status.code() == Some(1) {
        warn!(stderr = %stderr_tail(&output), "pg_restore finished with warnings");
    }

    verification::verify_restore(&tools.database).await;
    info!("✓ restore completed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::db_dump::tests::sample_tools;

    fn as_strings(args: Vec<OsString>) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    #[test]
    fn reset_runs_one_statement_with_on_error_stop() {
        let args = as_strings(reset_schema_args(&sample_tools()));
        let v = args.iter().position(|a| a == "-v").unwrap();
        assert_eq!(args[v + 1], "ON_ERROR_STOP=1");
        let c = args.iter().position(|a| a == "-c").unwrap();
        assert_eq!(args[c + 1], "DROP SCHEMA public CASCADE; CREATE SCHEMA public;");
        assert_eq!(args.iter().filter(|a| *a == "-c").count(), 1);
    }

    #[test]
    fn pg_restore_flags() {
        let args = as_strings(pg_restore_args(&sample_tools(), Path::new("/tmp/restore_a.dump")));
        for flag in ["--clean", "--if-exists", "--no-owner", "--no-privileges"] {
            assert!(args.iter().any(|a| a == flag), "missing {flag}");
        }
        assert_eq!(args.last().map(String::as_str), Some("/tmp/restore_a.dump"));
        let d = args.iter().position(|a| a == "-d").unwrap();
        assert_eq!(args[d + 1], "colonia_gatos");
    }

    #[cfg(unix)]
    #[test]
    fn warning_exit_code_counts_as_success() {
        use std::os::unix::process::ExitStatusExt;

        // Raw wait status: exit code in the high byte.
        assert!(restore_exit_ok(&ExitStatus::from_raw(0)));
        assert!(restore_exit_ok(&ExitStatus::from_raw(1 << 8)));
        assert!(!restore_exit_ok(&ExitStatus::from_raw(2 << 8)));
        // Killed by SIGKILL: no exit code.
        assert!(!restore_exit_ok(&ExitStatus::from_raw(9)));
    }

    #[tokio::test]
    async fn missing_tools_fail_before_touching_the_database() {
        let mut tools = sample_tools();
        tools.tools.psql = Some("/nonexistent/psql".into());
        let result = restore_database(&tools, Path::new("/tmp/none.dump")).await;
        assert!(matches!(result, Err(BackupError::RestoreFailed(msg)) if msg.contains("psql")));
    }
}
