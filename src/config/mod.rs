// colonybackup/src/config/mod.rs
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::backup::crypto::EncryptionKey;

const DEFAULT_CONFIG_FILE: &str = "config.json";
const DEFAULT_BACKUP_DIR: &str = "/backups";
const DEFAULT_MAX_BACKUPS: usize = 7;
const DEFAULT_INTERVAL_SECS: u64 = 86_400;
const DEFAULT_DUMP_TIMEOUT_SECS: u64 = 300;
const DEFAULT_SCHEMA_RESET_TIMEOUT_SECS: u64 = 120;
const DEFAULT_RESTORE_TIMEOUT_SECS: u64 = 600;
const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8000";
const DEFAULT_MAX_UPLOAD_BYTES: usize = 512 * 1024 * 1024;

// Structs for deserializing config.json
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonDatabaseConfig {
    pub url: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub name: Option<String>,
    pub user: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonToolsConfig {
    pub pg_dump: Option<PathBuf>,
    pub pg_restore: Option<PathBuf>,
    pub psql: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonTimeoutsConfig {
    pub dump_secs: Option<u64>,
    pub schema_reset_secs: Option<u64>,
    pub restore_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonS3StorageConfig {
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

/// Optional file-based configuration. Secrets (encryption key, token
/// secret, database password) are only read from the environment.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawJsonConfig {
    pub backup_dir: Option<PathBuf>,
    pub temp_dump_root: Option<PathBuf>,
    pub max_backups: Option<usize>,
    pub backup_interval_secs: Option<u64>,
    pub listen_addr: Option<String>,
    pub max_upload_bytes: Option<usize>,
    pub database: Option<JsonDatabaseConfig>,
    pub tools: Option<JsonToolsConfig>,
    pub timeouts: Option<JsonTimeoutsConfig>,
    pub s3_storage: Option<JsonS3StorageConfig>,
}

// Application's internal configuration structs
#[derive(Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
}

impl DatabaseConfig {
    /// Connection URL used for the sqlx preflight and verification queries.
    pub fn connection_url(&self) -> Result<Url> {
        let mut url = Url::parse("postgres://localhost")
            .context("Failed to build base PostgreSQL URL")?;
        url.set_host(Some(&self.host))
            .with_context(|| format!("Invalid database host: {}", self.host))?;
        url.set_port(Some(self.port))
            .map_err(|_| anyhow::anyhow!("Invalid database port: {}", self.port))?;
        url.set_username(&self.user)
            .map_err(|_| anyhow::anyhow!("Invalid database user"))?;
        url.set_password(Some(&self.password))
            .map_err(|_| anyhow::anyhow!("Invalid database password"))?;
        url.set_path(&format!("/{}", self.name));
        Ok(url)
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("name", &self.name)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ToolPaths {
    pub pg_dump: Option<PathBuf>,
    pub pg_restore: Option<PathBuf>,
    pub psql: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub dump: Duration,
    pub schema_reset: Duration,
    pub restore: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            dump: Duration::from_secs(DEFAULT_DUMP_TIMEOUT_SECS),
            schema_reset: Duration::from_secs(DEFAULT_SCHEMA_RESET_TIMEOUT_SECS),
            restore: Duration::from_secs(DEFAULT_RESTORE_TIMEOUT_SECS),
        }
    }
}

#[derive(Clone)]
pub struct S3Config {
    pub region: Option<String>,
    pub endpoint_url: Option<String>,
    /// Static credentials; when absent the ambient AWS credential chain is used.
    pub credentials: Option<(String, String)>,
}

impl fmt::Debug for S3Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Config")
            .field("region", &self.region)
            .field("endpoint_url", &self.endpoint_url)
            .field("static_credentials", &self.credentials.is_some())
            .finish()
    }
}

#[derive(Clone)]
pub struct ServerConfig {
    pub listen_addr: String,
    pub jwt_secret: Option<String>,
    pub max_upload_bytes: usize,
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("listen_addr", &self.listen_addr)
            .field("jwt_secret", &self.jwt_secret.as_ref().map(|_| "<redacted>"))
            .field("max_upload_bytes", &self.max_upload_bytes)
            .finish()
    }
}

/// Process-wide configuration, built once at startup and handed to every
/// component constructor.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub backup_dir: PathBuf,
    pub temp_dump_root: PathBuf,
    pub max_backups: usize,
    pub schedule_interval: Duration,
    pub database: DatabaseConfig,
    pub tools: ToolPaths,
    pub timeouts: Timeouts,
    pub encryption_key: EncryptionKey,
    pub server: ServerConfig,
    pub s3: S3Config,
}

impl AppConfig {
    /// Loads `.env`, the optional JSON file and the process environment.
    pub fn load() -> Result<Self> {
        dotenv::dotenv().ok();
        let config_path = std::env::var("COLONYBACKUP_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
        let raw = if config_path.exists() {
            load_raw_json(&config_path)?
        } else {
            RawJsonConfig::default()
        };
        Self::from_sources(raw, |key| std::env::var(key).ok())
    }

    /// Builds the configuration from a parsed JSON file and an environment
    /// lookup. Environment values win over JSON values.
    pub fn from_sources<F>(raw: RawJsonConfig, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = |key: &str| env(key).filter(|v| !v.trim().is_empty());

        let backup_dir = env("BACKUP_DIR")
            .map(PathBuf::from)
            .or(raw.backup_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_BACKUP_DIR));
        if backup_dir.as_os_str().is_empty() {
            anyhow::bail!("backup_dir cannot be empty");
        }

        let temp_dump_root = env("TEMP_DUMP_ROOT")
            .map(PathBuf::from)
            .or(raw.temp_dump_root.clone())
            .unwrap_or_else(std::env::temp_dir);

        let max_backups = parse_env_or(&env, "MAX_BACKUPS", raw.max_backups, DEFAULT_MAX_BACKUPS)?;
        if max_backups == 0 {
            anyhow::bail!("MAX_BACKUPS must be at least 1");
        }

        let interval_secs = parse_env_or(
            &env,
            "BACKUP_INTERVAL_SECS",
            raw.backup_interval_secs,
            DEFAULT_INTERVAL_SECS,
        )?;
        if interval_secs == 0 {
            anyhow::bail!("BACKUP_INTERVAL_SECS must be greater than 0");
        }

        let database = load_database_config(&raw, &env)?;

        let raw_tools = raw.tools.clone().unwrap_or_default();
        let tools = ToolPaths {
            pg_dump: env("PG_DUMP_PATH").map(PathBuf::from).or(raw_tools.pg_dump),
            pg_restore: env("PG_RESTORE_PATH").map(PathBuf::from).or(raw_tools.pg_restore),
            psql: env("PSQL_PATH").map(PathBuf::from).or(raw_tools.psql),
        };

        let raw_timeouts = raw.timeouts.clone().unwrap_or_default();
        let timeouts = Timeouts {
            dump: timeout_secs(
                &env,
                "DUMP_TIMEOUT_SECS",
                raw_timeouts.dump_secs,
                DEFAULT_DUMP_TIMEOUT_SECS,
            )?,
            schema_reset: timeout_secs(
                &env,
                "SCHEMA_RESET_TIMEOUT_SECS",
                raw_timeouts.schema_reset_secs,
                DEFAULT_SCHEMA_RESET_TIMEOUT_SECS,
            )?,
            restore: timeout_secs(
                &env,
                "RESTORE_TIMEOUT_SECS",
                raw_timeouts.restore_secs,
                DEFAULT_RESTORE_TIMEOUT_SECS,
            )?,
        };

        let encryption_key = env("ENCRYPTION_KEY")
            .context("ENCRYPTION_KEY must be set in the environment")
            .and_then(|encoded| {
                EncryptionKey::from_base64(&encoded).context("ENCRYPTION_KEY is not a valid key")
            })?;

        let server = ServerConfig {
            listen_addr: env("LISTEN_ADDR")
                .or(raw.listen_addr.clone())
                .unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string()),
            jwt_secret: env("AUTHJWT_SECRET_KEY"),
            max_upload_bytes: parse_env_or(
                &env,
                "MAX_UPLOAD_BYTES",
                raw.max_upload_bytes,
                DEFAULT_MAX_UPLOAD_BYTES,
            )?,
        };

        let raw_s3 = raw.s3_storage.clone().unwrap_or_default();
        let access_key_id = env("S3_ACCESS_KEY_ID").or(raw_s3.access_key_id);
        let secret_access_key = env("S3_SECRET_ACCESS_KEY").or(raw_s3.secret_access_key);
        let credentials = match (access_key_id, secret_access_key) {
            (Some(id), Some(secret)) => Some((id, secret)),
            (None, None) => None,
            _ => anyhow::bail!(
                "S3 credentials are partially configured: both access key id and secret access key are required"
            ),
        };
        let s3 = S3Config {
            region: env("S3_REGION").or(raw_s3.region),
            endpoint_url: env("S3_ENDPOINT_URL").or(raw_s3.endpoint_url),
            credentials,
        };

        Ok(AppConfig {
            backup_dir,
            temp_dump_root,
            max_backups,
            schedule_interval: Duration::from_secs(interval_secs),
            database,
            tools,
            timeouts,
            encryption_key,
            server,
            s3,
        })
    }
}

fn load_raw_json(config_path: &Path) -> Result<RawJsonConfig> {
    let config_content = fs::read_to_string(config_path)
        .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
    serde_json::from_str(&config_content).with_context(|| {
        format!(
            "Failed to parse JSON from config file at {}",
            config_path.display()
        )
    })
}

fn parse_env_or<F, T>(env: &F, key: &str, json_value: Option<T>, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env(key) {
        Some(value) => value
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value: {}", key, value)),
        None => Ok(json_value.unwrap_or(default)),
    }
}

fn timeout_secs<F>(env: &F, key: &str, json_value: Option<u64>, default: u64) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    let secs = parse_env_or(env, key, json_value, default)?;
    if secs == 0 {
        anyhow::bail!("{} must be greater than 0", key);
    }
    Ok(Duration::from_secs(secs))
}

/// Resolves the database connection settings. A `DATABASE_URL` (or
/// `database.url` in JSON) provides the base; discrete variables override it.
fn load_database_config<F>(raw: &RawJsonConfig, env: &F) -> Result<DatabaseConfig>
where
    F: Fn(&str) -> Option<String>,
{
    let raw_db = raw.database.clone().unwrap_or_default();

    let mut db = DatabaseConfig {
        host: "db".to_string(),
        port: 5432,
        name: "colonia_gatos".to_string(),
        user: "user".to_string(),
        password: "password".to_string(),
    };

    if let Some(url) = env("DATABASE_URL").or(raw_db.url.clone()) {
        apply_database_url(&mut db, &url)?;
    }

    if let Some(host) = env("DB_HOST").or(raw_db.host) {
        db.host = host;
    }
    if let Some(port) = env("DB_PORT") {
        db.port = port
            .trim()
            .parse()
            .with_context(|| format!("DB_PORT has an invalid value: {}", port))?;
    } else if let Some(port) = raw_db.port {
        db.port = port;
    }
    if let Some(name) = env("DB_NAME").or(raw_db.name) {
        db.name = name;
    }
    if let Some(user) = env("POSTGRES_USER").or(raw_db.user) {
        db.user = user;
    }
    if let Some(password) = env("POSTGRES_PASSWORD") {
        db.password = password;
    }

    if db.name.trim().is_empty()
        || db
            .name
            .contains(|c: char| !c.is_alphanumeric() && c != '_' && c != '-')
    {
        anyhow::bail!("Invalid database name: {:?}", db.name);
    }

    Ok(db)
}

fn apply_database_url(db: &mut DatabaseConfig, url: &str) -> Result<()> {
    // The URL may carry a password, so it is never echoed in errors.
    let parsed = Url::parse(url).context("Invalid DATABASE_URL format")?;
    if !matches!(parsed.scheme(), "postgres" | "postgresql") {
        anyhow::bail!("DATABASE_URL must use the postgres:// scheme");
    }
    if let Some(host) = parsed.host_str() {
        db.host = host.to_string();
    }
    if let Some(port) = parsed.port() {
        db.port = port;
    }
    // Url keeps userinfo percent-encoded; the tools need the raw values.
    if !parsed.username().is_empty() {
        db.user = decode_userinfo(parsed.username(), "user")?;
    }
    if let Some(password) = parsed.password() {
        db.password = decode_userinfo(password, "password")?;
    }
    let name = parsed.path().trim_start_matches('/');
    if !name.is_empty() {
        db.name = name.to_string();
    }
    Ok(())
}

fn decode_userinfo(encoded: &str, field: &str) -> Result<String> {
    urlencoding::decode(encoded)
        .map(|decoded| decoded.into_owned())
        .map_err(|_| anyhow::anyhow!("DATABASE_URL {} is not valid UTF-8 once decoded", field))
}
