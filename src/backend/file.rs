//! File backend
//!
//! Each collection lives in its own directory holding an append-only
//! `log.json` and, once the log has grown past the configured size, a
//! compacted `checkpoint.json`. The checkpoint is written to a temp file
//! first, then renamed for atomicity; the log is truncated afterwards.
//!
//! Opening a collection loads the checkpoint and replays the log on top of
//! it. A trailing incomplete operation (crash mid-append) is dropped.

use super::types::{Backend, Collection, Mutation, ValueDecoder};
use crate::changelog::{Checkpoint, EntryLine, LogLine, Replay};
use crate::error::{Error, Result, ResultExt};
use crate::types::JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tracing::{debug, info, warn};

/// Name of the change log inside a collection directory
pub const LOG_FILE: &str = "log.json";

/// Name of the checkpoint inside a collection directory
pub const CHECKPOINT_FILE: &str = "checkpoint.json";

/// Settings for the file backend
#[derive(Debug, Clone)]
pub struct FileBackendConfig {
    /// Root directory; one subdirectory per collection
    pub root: PathBuf,
    /// Mode for newly created files
    pub permissions: u32,
    /// Log size in bytes that triggers a checkpoint
    pub checkpoint_size: u64,
    /// Call `fsync` after every append
    pub file_sync: bool,
}

impl FileBackendConfig {
    /// Create a config with defaults for the given root directory
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            permissions: 0o600,
            checkpoint_size: 10 * 1024 * 1024,
            file_sync: true,
        }
    }

    /// Set the checkpoint threshold
    #[must_use]
    pub fn with_checkpoint_size(mut self, bytes: u64) -> Self {
        self.checkpoint_size = bytes;
        self
    }

    /// Enable or disable fsync after appends
    #[must_use]
    pub fn with_file_sync(mut self, sync: bool) -> Self {
        self.file_sync = sync;
        self
    }
}

/// Backend persisting collections as change logs on disk
#[derive(Debug)]
pub struct FileBackend {
    config: FileBackendConfig,
    open: Mutex<HashMap<String, Weak<FileCollection>>>,
}

impl FileBackend {
    /// Create a backend rooted at `config.root`, creating the directory
    pub fn new(config: FileBackendConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.root).map_err(|e| {
            Error::backend(format!(
                "Failed to create registry directory {}: {e}",
                config.root.display()
            ))
        })?;
        Ok(Self {
            config,
            open: Mutex::new(HashMap::new()),
        })
    }

    /// Root directory of the backend
    pub fn root(&self) -> &Path {
        &self.config.root
    }
}

impl Backend for FileBackend {
    fn access(&self, name: &str) -> Result<Arc<dyn Collection>> {
        if name.is_empty() || name.contains(['/', '\\']) || name == "." || name == ".." {
            return Err(Error::backend(format!("invalid collection name '{name}'")));
        }

        let mut open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(existing) = open.get(name).and_then(Weak::upgrade) {
            if !existing.is_closed() {
                return Ok(existing as Arc<dyn Collection>);
            }
        }

        let collection = Arc::new(FileCollection::open(
            name,
            self.config.root.join(name),
            self.config.clone(),
        )?);
        open.insert(name.to_string(), Arc::downgrade(&collection));
        Ok(collection as Arc<dyn Collection>)
    }

    fn close(&self) -> Result<()> {
        let mut open = self.open.lock().unwrap_or_else(PoisonError::into_inner);
        for (name, collection) in open.drain() {
            if let Some(collection) = collection.upgrade() {
                warn!(collection = %name, "closing collection still in use");
                collection.close()?;
            }
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Inner {
    entries: BTreeMap<String, JsonValue>,
    log: Option<File>,
    log_size: u64,
    next_id: u64,
}

/// A collection backed by a change log directory
#[derive(Debug)]
pub struct FileCollection {
    name: String,
    dir: PathBuf,
    config: FileBackendConfig,
    inner: Mutex<Inner>,
}

impl FileCollection {
    fn open(name: &str, dir: PathBuf, config: FileBackendConfig) -> Result<Self> {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create collection directory {}", dir.display()))?;

        let checkpoint_path = dir.join(CHECKPOINT_FILE);
        let checkpoint = if checkpoint_path.exists() {
            let contents = std::fs::read_to_string(&checkpoint_path)?;
            serde_json::from_str(&contents).map_err(|e| {
                Error::backend(format!("Failed to parse checkpoint for '{name}': {e}"))
            })?
        } else {
            Checkpoint::default()
        };

        let mut replay = Replay::from_checkpoint(checkpoint);
        let log_path = dir.join(LOG_FILE);
        let mut valid_len = 0u64;
        if log_path.exists() {
            let contents = std::fs::read_to_string(&log_path)
                .with_context(|| format!("Failed to read change log for '{name}'"))?;
            let mut offset = 0u64;
            for line in contents.split_inclusive('\n') {
                if !line.ends_with('\n') {
                    warn!(collection = %name, "dropping incomplete trailing log line");
                    break;
                }
                if let Err(e) = replay.apply_line(line) {
                    return Err(Error::backend(format!(
                        "Corrupt change log for '{name}' at byte {offset}: {e}"
                    )));
                }
                offset += line.len() as u64;
                if !replay.is_incomplete() {
                    valid_len = offset;
                }
            }
        }

        let log = open_with_mode(&log_path, config.permissions)?;
        if log.metadata()?.len() != valid_len {
            // cut off a partially written operation so new appends stay parseable
            log.set_len(valid_len)?;
        }

        let next_id = replay.last_id() + 1;
        let entries = replay.into_table();
        debug!(
            collection = %name,
            entries = entries.len(),
            next_id,
            "opened file collection"
        );

        Ok(Self {
            name: name.to_string(),
            dir,
            config,
            inner: Mutex::new(Inner {
                entries,
                log: Some(log),
                log_size: valid_len,
                next_id,
            }),
        })
    }

    fn is_closed(&self) -> bool {
        self.lock().log.is_none()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append rendered lines and apply the mutations to the in-memory table
    fn write(&self, mutations: Vec<Mutation>) -> Result<()> {
        let mut inner = self.lock();
        let Inner {
            entries,
            log,
            log_size,
            next_id,
        } = &mut *inner;
        let file = log.as_mut().ok_or_else(|| Error::CollectionClosed {
            name: self.name.clone(),
        })?;

        let batch = (mutations.len() > 1).then_some(mutations.len());
        let mut buf = String::new();
        for (i, mutation) in mutations.iter().enumerate() {
            let id = *next_id + i as u64;
            let batch = if i == 0 { batch } else { None };
            let rendered = match mutation {
                Mutation::Set { key, value } => LogLine::render_set(id, batch, key, value)?,
                Mutation::Remove { key } => LogLine::render_remove(id, batch, key)?,
            };
            buf.push_str(&rendered);
        }

        if let Err(err) = append_lines(file, *log_size, buf.as_bytes(), self.config.file_sync) {
            warn!(collection = %self.name, error = %err, "change log append failed");
            return Err(err.into());
        }
        *log_size += buf.len() as u64;
        *next_id += mutations.len() as u64;

        for mutation in mutations {
            match mutation {
                Mutation::Set { key, value } => {
                    entries.insert(key, value);
                }
                Mutation::Remove { key } => {
                    entries.remove(&key);
                }
            }
        }

        if *log_size >= self.config.checkpoint_size {
            self.checkpoint(&mut inner)?;
        }
        Ok(())
    }

    fn checkpoint(&self, inner: &mut Inner) -> Result<()> {
        let checkpoint = Checkpoint {
            id: inner.next_id - 1,
            entries: inner
                .entries
                .iter()
                .map(|(k, v)| EntryLine {
                    k: k.clone(),
                    v: Some(v.clone()),
                })
                .collect(),
        };
        let contents = serde_json::to_string(&checkpoint)?;

        // Write to temp file first, then rename for atomicity
        let path = self.dir.join(CHECKPOINT_FILE);
        let temp_path = path.with_extension("tmp");
        {
            let mut tmp = open_with_mode(&temp_path, self.config.permissions)?;
            tmp.set_len(0)?;
            tmp.write_all(contents.as_bytes())?;
            tmp.sync_all()?;
        }
        std::fs::rename(&temp_path, &path)?;

        if let Some(log) = inner.log.as_mut() {
            log.set_len(0)?;
            log.sync_all()?;
        }
        inner.log_size = 0;

        info!(
            collection = %self.name,
            entries = checkpoint.entries.len(),
            id = checkpoint.id,
            "wrote registry checkpoint"
        );
        Ok(())
    }
}

impl Collection for FileCollection {
    fn get(&self, key: &str) -> Result<Option<JsonValue>> {
        Ok(self.lock().entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: JsonValue) -> Result<()> {
        self.write(vec![Mutation::Set {
            key: key.to_string(),
            value,
        }])
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.write(vec![Mutation::Remove {
            key: key.to_string(),
        }])
    }

    fn each(&self, visit: &mut dyn FnMut(&str, ValueDecoder<'_>) -> Result<bool>) -> Result<()> {
        let snapshot = self.lock().entries.clone();
        for (key, value) in &snapshot {
            if !visit(key, ValueDecoder::new(key, value))? {
                break;
            }
        }
        Ok(())
    }

    fn apply(&self, mutations: Vec<Mutation>) -> Result<()> {
        if mutations.is_empty() {
            return Ok(());
        }
        self.write(mutations)
    }

    fn close(&self) -> Result<()> {
        let mut inner = self.lock();
        if let Some(log) = inner.log.take() {
            log.sync_all()?;
            debug!(collection = %self.name, "closed file collection");
        }
        Ok(())
    }
}

/// Log file operations needed by an append
pub(super) trait LogFile: Write {
    fn sync_data(&mut self) -> std::io::Result<()>;
    fn set_len(&mut self, size: u64) -> std::io::Result<()>;
}

impl LogFile for File {
    fn sync_data(&mut self) -> std::io::Result<()> {
        File::sync_data(self)
    }

    fn set_len(&mut self, size: u64) -> std::io::Result<()> {
        File::set_len(self, size)
    }
}

/// Append `buf` to a log currently `len` bytes long.
///
/// On failure the log is cut back to `len` so a torn append never prefixes
/// the next one.
pub(super) fn append_lines(
    file: &mut impl LogFile,
    len: u64,
    buf: &[u8],
    sync: bool,
) -> std::io::Result<()> {
    let mut appended = file.write_all(buf);
    if appended.is_ok() && sync {
        appended = file.sync_data();
    }
    if appended.is_err() {
        if let Err(err) = file.set_len(len) {
            warn!(error = %err, "failed to roll back change log");
        }
    }
    appended
}

#[cfg(unix)]
fn open_with_mode(path: &Path, mode: u32) -> Result<File> {
    use std::os::unix::fs::OpenOptionsExt;
    Ok(OpenOptions::new()
        .create(true)
        .append(true)
        .read(true)
        .mode(mode)
        .open(path)?)
}

#[cfg(not(unix))]
fn open_with_mode(path: &Path, _mode: u32) -> Result<File> {
    Ok(OpenOptions::new()
        .create(true)
        .append(true)
        .read(true)
        .open(path)?)
}
