//! Colony Backup Service
//!
//! Encrypted PostgreSQL backups for the colony administration backend:
//! an admin HTTP API, a daily scheduler and a small CLI for operators.

// colonybackup/src/main.rs
mod backup;
mod config;
mod errors;
mod restore;
mod server;
mod service;
mod utils;

use anyhow::{Context, Result};
use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::backup::db_dump::PgTools;
use crate::backup::naming::BackupKind;
use crate::backup::s3_upload::S3Archiver;
use crate::backup::store::FsStore;
use crate::config::AppConfig;
use crate::service::BackupService;

/// Main entry point for the backup service
#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    match run_app().await {
        Ok(_) => {
            println!("✅ Operation completed successfully.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("❌ Error: {:?}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match env::var("LOG_FORMAT").as_deref() {
        Ok("json") => tracing_subscriber::fmt().with_env_filter(filter).json().init(),
        _ => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

async fn run_app() -> Result<()> {
    let config = AppConfig::load().context("Failed to load application configuration")?;

    let args: Vec<String> = env::args().collect();
    let choice = if args.len() > 1 {
        args[1].trim().to_string()
    } else {
        prompt_choice()?
    };

    let service = Arc::new(build_service(&config).await?);

    match choice.as_str() {
        "1" | "serve" => serve(config, service).await?,
        "2" | "backup" => {
            let kind: BackupKind = match args.get(2) {
                Some(kind) => kind.trim().parse()?,
                None => BackupKind::Full,
            };
            println!("🚀 Starting {} backup...", kind);
            backup::run_backup_flow(&service, kind)
                .await
                .context("Backup process failed")?;
        }
        "3" | "restore" => {
            let backup_filename = match args.get(2) {
                Some(name) => name.trim().to_string(),
                None => prompt_line("Backup file to restore: ")?,
            };
            println!("🔄 Restoring from {}...", backup_filename);
            restore::run_restore_flow(&service, &backup_filename)
                .await
                .context("Restore process failed")?;
        }
        "4" | "list" => {
            let backups = service
                .list_artifacts()
                .await
                .context("Failed to list backups")?;
            if backups.is_empty() {
                println!("No backups stored in {}", config.backup_dir.display());
            }
            for artifact in backups {
                println!("{}  {} bytes", artifact.name, artifact.size);
            }
        }
        _ => {
            println!("❌ Invalid choice. Please enter '1' (serve), '2' (backup), '3' (restore) or '4' (list).");
            anyhow::bail!("Invalid operation choice");
        }
    }
    Ok(())
}

async fn build_service(config: &AppConfig) -> Result<BackupService> {
    let store = FsStore::open(&config.backup_dir).with_context(|| {
        format!("Cannot open backup directory {}", config.backup_dir.display())
    })?;
    std::fs::create_dir_all(&config.temp_dump_root).with_context(|| {
        format!("Cannot create dump staging directory {}", config.temp_dump_root.display())
    })?;
    let executor = PgTools::new(config);
    let archiver = S3Archiver::new(&config.s3).await;
    info!(
        backup_dir = %store.root().display(),
        max_backups = config.max_backups,
        "backup store ready"
    );
    Ok(BackupService::new(
        config,
        Arc::new(store),
        Arc::new(executor),
        Arc::new(archiver),
    ))
}

async fn serve(config: AppConfig, service: Arc<BackupService>) -> Result<()> {
    let secret = config
        .server
        .jwt_secret
        .as_deref()
        .context("AUTHJWT_SECRET_KEY must be set to serve the API")?;

    backup::scheduler::spawn_scheduler(service.clone(), config.schedule_interval);

    let state = server::AppState::new(service, secret);
    let app = server::router(state, config.server.max_upload_bytes);

    let listener = TcpListener::bind(&config.server.listen_addr)
        .await
        .with_context(|| format!("Cannot bind to {}", config.server.listen_addr))?;
    info!("colonybackup listening on {}", config.server.listen_addr);
    axum::serve(listener, app).await.context("HTTP server failed")?;
    Ok(())
}

/// Prompts user to select an operation
///
/// Returns the user's choice as String
fn prompt_choice() -> Result<String> {
    println!("Select an operation:");
    println!("1. Serve the backup API with the daily scheduler (or type 'serve')");
    println!("2. Take Backup (or type 'backup')");
    println!("3. Restore Backup (or type 'restore')");
    println!("4. List Backups (or type 'list')");
    prompt_line("Enter your choice: ")
}

fn prompt_line(prompt: &str) -> Result<String> {
    use std::io::{Write, stdin, stdout};

    print!("{}", prompt);
    stdout().flush().context("Failed to flush stdout")?;

    let mut input = String::new();
    stdin().read_line(&mut input).context("Failed to read user input")?;
    Ok(input.trim().to_string())
}
