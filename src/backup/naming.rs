//! Backup artifact naming grammar and path resolution.
//!
//! Every caller-supplied artifact name goes through [`FilenameValidator::resolve`]
//! before any filesystem access: first the exact grammar
//! `backup_(full|incremental|import)_<14 digits>.dump`, then a containment
//! check that the normalized path sits directly inside the backup root.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use crate::errors::{BackupError, Result};

pub const DUMP_EXTENSION: &str = ".dump";
const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

static FILENAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^backup_(full|incremental|import)_([0-9]{14})\.dump$")
        .expect("artifact name pattern is a valid regex")
});

/// Origin category of a backup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    Full,
    Incremental,
    Import,
}

impl BackupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupKind::Full => "full",
            BackupKind::Incremental => "incremental",
            BackupKind::Import => "import",
        }
    }
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupKind {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "full" => Ok(BackupKind::Full),
            "incremental" => Ok(BackupKind::Incremental),
            "import" => Ok(BackupKind::Import),
            other => Err(BackupError::InvalidKind(printable(other))),
        }
    }
}

/// A filename that matches the artifact grammar exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactName {
    kind: BackupKind,
    file_name: String,
}

impl ArtifactName {
    /// Server-generated name for a new artifact created at `at` (UTC).
    pub fn new(kind: BackupKind, at: DateTime<Utc>) -> Self {
        ArtifactName {
            kind,
            file_name: format!("backup_{}_{}{}", kind, at.format(TIMESTAMP_FORMAT), DUMP_EXTENSION),
        }
    }

    pub fn parse(candidate: &str) -> Result<Self> {
        let captures = FILENAME_RE
            .captures(candidate)
            .ok_or_else(|| BackupError::InvalidName(printable(candidate)))?;
        let kind = captures[1].parse()?;
        Ok(ArtifactName {
            kind,
            file_name: candidate.to_string(),
        })
    }

    pub fn kind(&self) -> BackupKind {
        self.kind
    }

    pub fn as_str(&self) -> &str {
        &self.file_name
    }
}

impl fmt::Display for ArtifactName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name)
    }
}

/// Quotes and truncates caller input so it can go into a one-line error.
fn printable(raw: &str) -> String {
    let truncated: String = raw.chars().take(80).collect();
    format!("{:?}", truncated)
}

/// Resolves artifact names to absolute paths strictly inside one root.
#[derive(Debug, Clone)]
pub struct FilenameValidator {
    root: PathBuf,
}

impl FilenameValidator {
    /// The root must exist; it is canonicalized once here.
    pub fn new(root: &Path) -> Result<Self> {
        let root = fs::canonicalize(root)?;
        Ok(FilenameValidator { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, filename: &str) -> Result<PathBuf> {
        let name = ArtifactName::parse(filename)?;
        self.resolve_name(&name)
    }

    pub fn resolve_name(&self, name: &ArtifactName) -> Result<PathBuf> {
        let joined = self.root.join(name.as_str());

        let normalized = match fs::symlink_metadata(&joined) {
            Ok(_) => fs::canonicalize(&joined).map_err(|e| match e.kind() {
                // Dangling symlink: the target is somewhere we cannot vouch for.
                ErrorKind::NotFound => BackupError::PathEscape(name.to_string()),
                _ => BackupError::Io(e),
            })?,
            Err(e) if e.kind() == ErrorKind::NotFound => joined,
            Err(e) => return Err(BackupError::Io(e)),
        };

        if normalized.parent() != Some(self.root.as_path()) {
            return Err(BackupError::PathEscape(name.to_string()));
        }
        Ok(normalized)
    }
}
