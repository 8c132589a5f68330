//! Test doubles for the executor and the remote archiver.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::backup::db_dump::DumpExecutor;
use crate::backup::s3_upload::RemoteArchiver;
use crate::errors::{BackupError, Result};

type FailureFn = Box<dyn Fn() -> BackupError + Send + Sync>;

/// Writes a fixed payload on dump and records every restore it is asked for.
pub struct FakeExecutor {
    payload: Mutex<Vec<u8>>,
    dump_failure: Mutex<Option<FailureFn>>,
    restore_failure: Mutex<Option<FailureFn>>,
    dumps: AtomicUsize,
    restores: Mutex<Vec<(PathBuf, Vec<u8>)>>,
    restore_gate: Mutex<Option<Arc<Notify>>>,
    restores_started: AtomicUsize,
}

impl FakeExecutor {
    pub fn new() -> Self {
        FakeExecutor {
            payload: Mutex::new(b"PGDMP\x01\x0e\x00fake custom archive".to_vec()),
            dump_failure: Mutex::new(None),
            restore_failure: Mutex::new(None),
            dumps: AtomicUsize::new(0),
            restores: Mutex::new(Vec::new()),
            restore_gate: Mutex::new(None),
            restores_started: AtomicUsize::new(0),
        }
    }

    pub fn dump_payload(&self) -> Vec<u8> {
        self.payload.lock().unwrap().clone()
    }

    pub fn set_dump_payload(&self, payload: &[u8]) {
        *self.payload.lock().unwrap() = payload.to_vec();
    }

    /// Failing dumps still leave a partial file at the destination, as a
    /// killed pg_dump would.
    pub fn fail_dumps_with(&self, f: impl Fn() -> BackupError + Send + Sync + 'static) {
        *self.dump_failure.lock().unwrap() = Some(Box::new(f));
    }

    pub fn fail_restores_with(&self, f: impl Fn() -> BackupError + Send + Sync + 'static) {
        *self.restore_failure.lock().unwrap() = Some(Box::new(f));
    }

    pub fn dumps(&self) -> usize {
        self.dumps.load(Ordering::SeqCst)
    }

    /// Every later restore parks until the returned gate is notified once
    /// for it.
    pub fn hold_restores(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.restore_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Restores that have reached the executor, parked ones included.
    pub fn restores_started(&self) -> usize {
        self.restores_started.load(Ordering::SeqCst)
    }

    /// Path handed to each restore and the bytes that were in it at the time.
    pub fn restores(&self) -> Vec<(PathBuf, Vec<u8>)> {
        self.restores.lock().unwrap().clone()
    }
}

#[async_trait]
impl DumpExecutor for FakeExecutor {
    async fn dump(&self, dest: &Path) -> Result<()> {
        self.dumps.fetch_add(1, Ordering::SeqCst);
        if let Some(fail) = self.dump_failure.lock().unwrap().as_ref() {
            std::fs::write(dest, b"PGDMP partial")?;
            return Err(fail());
        }
        std::fs::write(dest, self.dump_payload())?;
        Ok(())
    }

    async fn restore(&self, source: &Path) -> Result<()> {
        self.restores_started.fetch_add(1, Ordering::SeqCst);
        let gate = self.restore_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let contents = std::fs::read(source)?;
        self.restores
            .lock()
            .unwrap()
            .push((source.to_path_buf(), contents));
        match self.restore_failure.lock().unwrap().as_ref() {
            Some(fail) => Err(fail()),
            None => Ok(()),
        }
    }
}

/// Records uploads instead of sending them.
#[derive(Default)]
pub struct FakeArchiver {
    fail: bool,
    uploads: Mutex<Vec<(String, String, Vec<u8>)>>,
}

impl FakeArchiver {
    pub fn failing() -> Self {
        FakeArchiver {
            fail: true,
            ..Default::default()
        }
    }

    /// `(bucket, key, body)` for each upload.
    pub fn uploads(&self) -> Vec<(String, String, Vec<u8>)> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl RemoteArchiver for FakeArchiver {
    async fn upload(&self, source: &Path, bucket: &str, key: &str) -> Result<()> {
        if self.fail {
            return Err(BackupError::Upload("connection reset".into()));
        }
        let body = std::fs::read(source)?;
        self.uploads
            .lock()
            .unwrap()
            .push((bucket.to_string(), key.to_string(), body));
        Ok(())
    }
}
