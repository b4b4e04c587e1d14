//! Following a live change log

use super::replay::{Applied, Replay};
use super::types::Checkpoint;
use crate::error::Result;
use crate::types::JsonValue;
use std::collections::BTreeMap;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A visible change to a tracked key
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub key: String,
    /// Cursor offset before the change, if known
    pub old_offset: Option<i64>,
    /// Cursor offset after the change
    pub new_offset: Option<i64>,
    /// New metadata, set only when it changed
    pub meta: Option<JsonValue>,
    /// Whether the key was removed
    pub removed: bool,
}

impl Change {
    fn from_applied(applied: &Applied) -> Option<Self> {
        let old_offset = applied.previous.as_ref().and_then(cursor_offset);
        let new_offset = applied.current.as_ref().and_then(cursor_offset);
        let old_meta = applied.previous.as_ref().and_then(|v| v.get("meta"));
        let new_meta = applied.current.as_ref().and_then(|v| v.get("meta"));

        let removed = applied.current.is_none();
        let offset_changed = applied.previous.is_none() || old_offset != new_offset;
        let meta_changed = applied.previous.is_none() || old_meta != new_meta;

        if !removed && !offset_changed && !meta_changed {
            return None;
        }

        Some(Self {
            key: applied.key.clone(),
            old_offset,
            new_offset,
            meta: if meta_changed { new_meta.cloned() } else { None },
            removed,
        })
    }
}

/// Extract `cursor.offset` from a stored record
fn cursor_offset(value: &JsonValue) -> Option<i64> {
    value.get("cursor")?.get("offset")?.as_i64()
}

/// Tails a `log.json` file, replaying appended lines.
///
/// When the file shrinks below the last read position (checkpoint or
/// rotation) the replay table is rebuilt from `checkpoint.json` next to the
/// log, when present, and the log is read from the start.
#[derive(Debug)]
pub struct Tailer {
    path: PathBuf,
    position: u64,
    partial: String,
    replay: Replay,
}

impl Tailer {
    /// Open a log and replay its current content without reporting changes
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let replay = Replay::from_checkpoint(load_checkpoint(&path)?);
        let mut tailer = Self {
            path,
            position: 0,
            partial: String::new(),
            replay,
        };
        tailer.poll()?;
        Ok(tailer)
    }

    /// Current reconstructed key table
    pub fn table(&self) -> &BTreeMap<String, JsonValue> {
        self.replay.table()
    }

    /// Byte position up to which the log has been consumed
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Read lines appended since the last poll and report visible changes
    pub fn poll(&mut self) -> Result<Vec<Change>> {
        let mut file = match std::fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let size = file.metadata()?.len();
        if size < self.position {
            debug!(path = %self.path.display(), "log truncated, replaying from start");
            self.position = 0;
            self.partial.clear();
            self.replay = Replay::from_checkpoint(load_checkpoint(&self.path)?);
        }

        file.seek(SeekFrom::Start(self.position))?;
        let mut buf = String::new();
        let read = file.read_to_string(&mut buf)?;
        self.position += read as u64;

        let mut data = std::mem::take(&mut self.partial);
        data.push_str(&buf);

        let mut changes = Vec::new();
        let mut lines = data.split('\n').peekable();
        while let Some(line) = lines.next() {
            if lines.peek().is_none() {
                // no trailing newline yet, keep for the next poll
                self.partial = line.to_string();
                break;
            }
            match self.replay.apply_line(line) {
                Ok(applied) => changes.extend(applied.iter().filter_map(Change::from_applied)),
                Err(e) => warn!(error = %e, "skipping invalid log line"),
            }
        }

        Ok(changes)
    }
}

fn load_checkpoint(log_path: &Path) -> Result<Checkpoint> {
    let Some(dir) = log_path.parent() else {
        return Ok(Checkpoint::default());
    };
    let path = dir.join("checkpoint.json");
    if !path.exists() {
        return Ok(Checkpoint::default());
    }
    let contents = std::fs::read_to_string(&path)?;
    Ok(serde_json::from_str(&contents)?)
}
