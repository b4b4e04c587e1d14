//! Change log line types

use crate::error::Result;
use crate::types::JsonValue;
use serde::{Deserialize, Serialize};

/// Kind of mutation announced by an operation line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    /// Insert or replace the following key
    Set,
    /// Delete the following key
    Remove,
}

/// Operation marker preceding every entry line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpLine {
    pub op: OpKind,
    pub id: u64,
    /// Number of op/entry pairs committed together, set on the first op of a
    /// multi-key batch only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<usize>,
}

/// Key/value line following an operation marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryLine {
    pub k: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub v: Option<JsonValue>,
}

/// A single parsed line of the change log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LogLine {
    Op(OpLine),
    Entry(EntryLine),
}

impl LogLine {
    /// Parse one line
    pub fn parse(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line)?)
    }

    /// Render the op/entry pair for a set, newline terminated
    pub fn render_set(id: u64, batch: Option<usize>, key: &str, value: &JsonValue) -> Result<String> {
        let op = serde_json::to_string(&OpLine {
            op: OpKind::Set,
            id,
            batch,
        })?;
        let entry = serde_json::to_string(&EntryLine {
            k: key.to_string(),
            v: Some(value.clone()),
        })?;
        Ok(format!("{op}\n{entry}\n"))
    }

    /// Render the op/entry pair for a removal, newline terminated
    pub fn render_remove(id: u64, batch: Option<usize>, key: &str) -> Result<String> {
        let op = serde_json::to_string(&OpLine {
            op: OpKind::Remove,
            id,
            batch,
        })?;
        let entry = serde_json::to_string(&EntryLine {
            k: key.to_string(),
            v: None,
        })?;
        Ok(format!("{op}\n{entry}\n"))
    }
}

/// Compacted table written next to the log
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Id of the last operation folded into this checkpoint
    pub id: u64,
    #[serde(default)]
    pub entries: Vec<EntryLine>,
}
