//! JSON blob storage.
//!
//! Layout under the data directory:
//!
//! ```text
//! live.json                     live store, { "<app>": { "requests": [...] } }
//! apps.json                     registered apps
//! archive/<app>/<YYYY-MM>.json  one write-once archive record per file
//! .lock                         advisory writer lock
//! ```
//!
//! Every write goes to a uniquely named temp file in the same directory and
//! is renamed into place, so readers never observe a half-written blob.
//! Read-modify-write cycles (append, register, archive sweep) hold the
//! directory's [`StoreLock`] from the read until the final rename, across
//! threads and processes alike.

use super::lock::{StoreLock, LOCK_FILE};
use super::{same_archive, EventStore};
use crate::archive::{archive_if_due_with, ArchiveOutcome, ArchivePolicy};
use crate::error::{Error, Result};
use crate::types::{validate_app_id, AnalyticsStore, App, AppBucket, ArchiveRecord, Event};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const LIVE_FILE: &str = "live.json";
const APPS_FILE: &str = "apps.json";
const ARCHIVE_DIR: &str = "archive";

/// File-backed store that rolls over monthly.
pub struct JsonFileStore {
    root: PathBuf,
}

impl JsonFileStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn open(root: &Path) -> Result<Self> {
        fs::create_dir_all(root.join(ARCHIVE_DIR))?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn live_path(&self) -> PathBuf {
        self.root.join(LIVE_FILE)
    }

    fn apps_path(&self) -> PathBuf {
        self.root.join(APPS_FILE)
    }

    fn archive_dir(&self, app_id: &str) -> PathBuf {
        self.root.join(ARCHIVE_DIR).join(app_id)
    }

    fn lock(&self) -> Result<StoreLock> {
        Ok(StoreLock::acquire(&self.root.join(LOCK_FILE))?)
    }

    fn read_live(&self) -> Result<AnalyticsStore> {
        Ok(read_json(&self.live_path())?.unwrap_or_default())
    }

    fn read_apps(&self) -> Result<Vec<App>> {
        Ok(read_json(&self.apps_path())?.unwrap_or_default())
    }

    /// Create an archive file, refusing to replace a different record.
    fn write_archive(&self, app_id: &str, record: &ArchiveRecord) -> Result<()> {
        let persistence_error = |message: String| Error::ArchivePersistence {
            app_id: app_id.to_string(),
            month: record.month.clone(),
            message,
        };

        validate_app_id(app_id)?;
        let dir = self.archive_dir(app_id);
        fs::create_dir_all(&dir).map_err(|e| persistence_error(e.to_string()))?;
        let path = dir.join(format!("{}.json", record.month));

        let tmp = write_temp_json(&dir, record).map_err(|e| persistence_error(e.to_string()))?;
        match tmp.persist_noclobber(&path) {
            Ok(_) => {
                tracing::debug!(
                    app_id,
                    month = %record.month,
                    path = %path.display(),
                    "Wrote archive"
                );
                Ok(())
            }
            Err(e) if e.error.kind() == ErrorKind::AlreadyExists => {
                let existing: Option<ArchiveRecord> = read_json(&path)?;
                match existing {
                    Some(existing) if same_archive(&existing, record) => {
                        tracing::debug!(app_id, month = %record.month, "Archive already written");
                        Ok(())
                    }
                    _ => Err(persistence_error(format!(
                        "an archive for {} already exists with different events",
                        record.month
                    ))),
                }
            }
            Err(e) => Err(persistence_error(e.error.to_string())),
        }
    }
}

impl EventStore for JsonFileStore {
    fn backend_name(&self) -> &'static str {
        "file"
    }

    fn rolls_over(&self) -> bool {
        true
    }

    fn load_store(&self) -> Result<AnalyticsStore> {
        self.read_live()
    }

    fn load_bucket(&self, app_id: &str) -> Result<AppBucket> {
        let store = self.read_live()?;
        Ok(store.get(app_id).cloned().unwrap_or_default())
    }

    fn append_event(&self, app_id: &str, event: &Event) -> Result<()> {
        validate_app_id(app_id)?;
        event.recorded_at()?;

        let _lock = self.lock()?;
        let mut store = self.read_live()?;
        store.push(app_id, event.clone());
        write_json_atomic(&self.live_path(), &store)
    }

    fn persist_store(&self, store: &AnalyticsStore) -> Result<()> {
        let _lock = self.lock()?;
        write_json_atomic(&self.live_path(), store)
    }

    fn persist_archive(&self, app_id: &str, record: &ArchiveRecord) -> Result<()> {
        self.write_archive(app_id, record)
    }

    fn archive_sweep(&self, now: DateTime<Utc>, policy: &ArchivePolicy) -> Result<ArchiveOutcome> {
        let _lock = self.lock()?;
        let live = self.read_live()?;
        let outcome = archive_if_due_with(live, now, policy, |app_id, record| {
            self.write_archive(app_id, record)
        });

        if outcome.is_changed() {
            write_json_atomic(&self.live_path(), &outcome.store)?;
        }
        Ok(outcome)
    }

    fn list_archives(&self, app_id: &str) -> Result<Vec<ArchiveRecord>> {
        validate_app_id(app_id)?;
        let dir = self.archive_dir(app_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut paths: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        paths.sort();

        let mut records = Vec::with_capacity(paths.len());
        for path in paths {
            if let Some(record) = read_json::<ArchiveRecord>(&path)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn list_apps(&self) -> Result<Vec<App>> {
        self.read_apps()
    }

    fn register_app(&self, app: &App) -> Result<()> {
        validate_app_id(&app.id)?;

        let _lock = self.lock()?;
        let mut apps = self.read_apps()?;
        if apps.iter().any(|a| a.id == app.id) {
            return Err(Error::InvalidRequest(format!("app '{}' already exists", app.id)));
        }
        apps.push(app.clone());
        write_json_atomic(&self.apps_path(), &apps)
    }
}

/// Read a JSON file, `None` if it does not exist.
fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Serialize `value` into a fresh, synced temp file inside `dir`.
fn write_temp_json<T: Serialize + ?Sized>(dir: &Path, value: &T) -> Result<NamedTempFile> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, value)?;
    tmp.as_file().sync_all()?;
    Ok(tmp)
}

/// Write JSON to a temp file and rename it over `path`.
fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp = write_temp_json(dir, value)?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}
