//! Replaying a change log into a key table

use super::types::{Checkpoint, EntryLine, LogLine, OpKind, OpLine};
use crate::error::{Error, Result};
use crate::types::JsonValue;
use std::collections::BTreeMap;

/// A mutation that has been applied to the replay table
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    pub id: u64,
    pub key: String,
    /// Value before the mutation
    pub previous: Option<JsonValue>,
    /// Value after the mutation, `None` for removals
    pub current: Option<JsonValue>,
}

/// Reconstructs key state from change log lines.
///
/// Removals delete the key, sets are last-write-wins. Operations belonging to
/// a multi-key batch are only applied once the whole batch has been read.
#[derive(Debug, Default)]
pub struct Replay {
    table: BTreeMap<String, JsonValue>,
    pending: Option<OpLine>,
    batch: Vec<(OpLine, EntryLine)>,
    batch_size: usize,
    last_id: u64,
    skip_through: u64,
}

impl Replay {
    /// Create an empty replay
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a checkpoint; operations with an id up to the checkpoint id
    /// are already folded in and will be skipped
    pub fn from_checkpoint(checkpoint: Checkpoint) -> Self {
        let table = checkpoint
            .entries
            .into_iter()
            .filter_map(|e| e.v.map(|v| (e.k, v)))
            .collect();
        Self {
            table,
            last_id: checkpoint.id,
            skip_through: checkpoint.id,
            ..Self::default()
        }
    }

    /// Id of the last applied operation
    pub fn last_id(&self) -> u64 {
        self.last_id
    }

    /// Current key table
    pub fn table(&self) -> &BTreeMap<String, JsonValue> {
        &self.table
    }

    /// Consume the replay, returning the key table
    pub fn into_table(self) -> BTreeMap<String, JsonValue> {
        self.table
    }

    /// Whether an operation or batch has been started but not completed
    pub fn is_incomplete(&self) -> bool {
        self.pending.is_some() || !self.batch.is_empty()
    }

    /// Parse and apply a single line
    pub fn apply_line(&mut self, line: &str) -> Result<Vec<Applied>> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(Vec::new());
        }
        self.apply(LogLine::parse(line)?)
    }

    /// Apply a parsed line
    pub fn apply(&mut self, line: LogLine) -> Result<Vec<Applied>> {
        match line {
            LogLine::Op(op) => {
                if let Some(prev) = &self.pending {
                    return Err(Error::decode(
                        "log",
                        format!("operation {} is missing its entry", prev.id),
                    ));
                }
                if let Some(n) = op.batch {
                    if !self.batch.is_empty() {
                        return Err(Error::decode(
                            "log",
                            format!("batch starting at {} was interrupted", op.id),
                        ));
                    }
                    self.batch_size = n;
                }
                self.pending = Some(op);
                Ok(Vec::new())
            }
            LogLine::Entry(entry) => {
                let op = self.pending.take().unwrap_or(OpLine {
                    op: if entry.v.is_some() {
                        OpKind::Set
                    } else {
                        OpKind::Remove
                    },
                    id: self.last_id,
                    batch: None,
                });

                if self.batch_size > 1 {
                    self.batch.push((op, entry));
                    if self.batch.len() < self.batch_size {
                        return Ok(Vec::new());
                    }
                    self.batch_size = 0;
                    let batch = std::mem::take(&mut self.batch);
                    return Ok(batch
                        .into_iter()
                        .filter_map(|(op, entry)| self.commit(&op, entry))
                        .collect());
                }

                self.batch_size = 0;
                Ok(self.commit(&op, entry).into_iter().collect())
            }
        }
    }

    fn commit(&mut self, op: &OpLine, entry: EntryLine) -> Option<Applied> {
        if op.id != 0 && op.id <= self.skip_through {
            return None;
        }
        self.last_id = self.last_id.max(op.id);

        let previous = match op.op {
            OpKind::Set => {
                let value = entry.v.clone().unwrap_or(JsonValue::Null);
                self.table.insert(entry.k.clone(), value)
            }
            OpKind::Remove => self.table.remove(&entry.k),
        };

        let current = match op.op {
            OpKind::Set => self.table.get(&entry.k).cloned(),
            OpKind::Remove => None,
        };

        Some(Applied {
            id: op.id,
            key: entry.k,
            previous,
            current,
        })
    }
}
