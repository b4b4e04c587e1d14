//! Tests for the change log format, replay and tailer

use super::*;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::BTreeMap;
use std::io::Write;
use tempfile::TempDir;
use test_case::test_case;

fn set_lines(id: u64, key: &str, value: serde_json::Value) -> String {
    LogLine::render_set(id, None, key, &value).unwrap()
}

fn remove_lines(id: u64, key: &str) -> String {
    LogLine::render_remove(id, None, key).unwrap()
}

fn append(path: &std::path::Path, data: &str) {
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .unwrap();
    file.write_all(data.as_bytes()).unwrap();
}

// ============================================================================
// Line Format Tests
// ============================================================================

#[test_case(r#"{"op":"set","id":3}"#, LogLine::Op(OpLine { op: OpKind::Set, id: 3, batch: None }) ; "set op")]
#[test_case(r#"{"op":"remove","id":4,"batch":2}"#, LogLine::Op(OpLine { op: OpKind::Remove, id: 4, batch: Some(2) }) ; "batched remove op")]
#[test_case(r#"{"k":"a","v":{"ttl":-1}}"#, LogLine::Entry(EntryLine { k: "a".into(), v: Some(json!({"ttl": -1})) }) ; "entry with value")]
#[test_case(r#"{"k":"a"}"#, LogLine::Entry(EntryLine { k: "a".into(), v: None }) ; "entry without value")]
fn test_parse_line(line: &str, expected: LogLine) {
    assert_eq!(LogLine::parse(line).unwrap(), expected);
}

#[test]
fn test_parse_rejects_garbage() {
    assert!(LogLine::parse("{\"x\":1}").is_err());
    assert!(LogLine::parse("nope").is_err());
}

#[test]
fn test_render_set() {
    let rendered = LogLine::render_set(7, Some(2), "k", &json!({"ttl": 0})).unwrap();
    assert_eq!(
        rendered,
        "{\"op\":\"set\",\"id\":7,\"batch\":2}\n{\"k\":\"k\",\"v\":{\"ttl\":0}}\n"
    );
}

// ============================================================================
// Replay Tests
// ============================================================================

#[test]
fn test_replay_sets_and_removes() {
    let mut replay = Replay::new();
    let log = [
        set_lines(1, "a", json!(1)),
        set_lines(2, "b", json!(2)),
        set_lines(3, "a", json!(3)),
        remove_lines(4, "b"),
    ]
    .concat();

    let mut applied = Vec::new();
    for line in log.lines() {
        applied.extend(replay.apply_line(line).unwrap());
    }

    assert_eq!(applied.len(), 4);
    assert_eq!(
        applied[2],
        Applied {
            id: 3,
            key: "a".into(),
            previous: Some(json!(1)),
            current: Some(json!(3)),
        }
    );
    assert_eq!(applied[3].current, None);
    assert_eq!(replay.last_id(), 4);
    assert!(!replay.is_incomplete());
    assert_eq!(
        replay.into_table(),
        BTreeMap::from([("a".to_string(), json!(3))])
    );
}

#[test]
fn test_replay_holds_batch_until_complete() {
    let mut replay = Replay::new();
    for line in set_lines(1, "old", json!("v")).lines() {
        replay.apply_line(line).unwrap();
    }

    let batch = [
        LogLine::render_set(2, Some(2), "new", &json!("v")).unwrap(),
        LogLine::render_remove(3, None, "old").unwrap(),
    ]
    .concat();
    let lines: Vec<&str> = batch.lines().collect();

    for line in &lines[..3] {
        assert!(replay.apply_line(line).unwrap().is_empty());
        assert!(replay.is_incomplete());
    }
    assert!(replay.table().contains_key("old"));
    assert!(!replay.table().contains_key("new"));

    let applied = replay.apply_line(lines[3]).unwrap();
    assert_eq!(applied.len(), 2);
    assert!(!replay.is_incomplete());
    assert_eq!(replay.table().keys().collect::<Vec<_>>(), vec!["new"]);
}

#[test]
fn test_replay_skips_operations_in_checkpoint() {
    let checkpoint = Checkpoint {
        id: 2,
        entries: vec![EntryLine {
            k: "a".into(),
            v: Some(json!(2)),
        }],
    };
    let mut replay = Replay::from_checkpoint(checkpoint);
    assert_eq!(replay.last_id(), 2);

    let log = [set_lines(2, "a", json!("stale")), set_lines(3, "b", json!(3))].concat();
    let mut applied = Vec::new();
    for line in log.lines() {
        applied.extend(replay.apply_line(line).unwrap());
    }

    assert_eq!(applied.len(), 1);
    assert_eq!(replay.table().get("a"), Some(&json!(2)));
    assert_eq!(replay.table().get("b"), Some(&json!(3)));
    assert_eq!(replay.last_id(), 3);
}

#[test]
fn test_replay_rejects_op_without_entry() {
    let mut replay = Replay::new();
    replay.apply_line(r#"{"op":"set","id":1}"#).unwrap();
    assert!(replay.apply_line(r#"{"op":"set","id":2}"#).is_err());
}

#[test]
fn test_replay_ignores_blank_lines() {
    let mut replay = Replay::new();
    assert!(replay.apply_line("   \n").unwrap().is_empty());
    assert!(!replay.is_incomplete());
}

// ============================================================================
// Tailer Tests
// ============================================================================

#[test]
fn test_tailer_reports_offset_changes() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("log.json");
    append(
        &path,
        &set_lines(1, "a", json!({"cursor": {"offset": 1}, "meta": {"source": "x"}})),
    );

    let mut tailer = Tailer::open(&path).unwrap();
    assert_eq!(tailer.table().len(), 1);
    assert_eq!(tailer.poll().unwrap(), Vec::new());

    append(
        &path,
        &set_lines(2, "a", json!({"cursor": {"offset": 5}, "meta": {"source": "x"}})),
    );
    assert_eq!(
        tailer.poll().unwrap(),
        vec![Change {
            key: "a".into(),
            old_offset: Some(1),
            new_offset: Some(5),
            meta: None,
            removed: false,
        }]
    );

    // TTL only updates are not visible changes
    append(
        &path,
        &set_lines(3, "a", json!({"ttl": 5, "cursor": {"offset": 5}, "meta": {"source": "x"}})),
    );
    assert!(tailer.poll().unwrap().is_empty());

    append(&path, &remove_lines(4, "a"));
    let changes = tailer.poll().unwrap();
    assert_eq!(changes.len(), 1);
    assert!(changes[0].removed);
    assert_eq!(changes[0].old_offset, Some(5));
}

#[test]
fn test_tailer_reports_new_keys_with_meta() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("log.json");
    let mut tailer = Tailer::open(&path).unwrap();

    append(&path, &set_lines(1, "b", json!({"cursor": {"offset": 0}, "meta": {"inode": 9}})));
    assert_eq!(
        tailer.poll().unwrap(),
        vec![Change {
            key: "b".into(),
            old_offset: None,
            new_offset: Some(0),
            meta: Some(json!({"inode": 9})),
            removed: false,
        }]
    );
}

#[test]
fn test_tailer_waits_for_complete_lines() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("log.json");
    let mut tailer = Tailer::open(&path).unwrap();

    let lines = set_lines(1, "a", json!({"cursor": {"offset": 3}}));
    let (head, tail) = lines.split_at(lines.len() - 10);
    append(&path, head);
    assert!(tailer.poll().unwrap().is_empty());
    assert!(tailer.table().is_empty());

    append(&path, tail);
    assert_eq!(tailer.poll().unwrap().len(), 1);
    assert_eq!(tailer.position(), lines.len() as u64);
}

#[test]
fn test_tailer_recovers_from_truncation() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("log.json");
    append(&path, &set_lines(1, "a", json!({"cursor": {"offset": 1}})));
    append(&path, &set_lines(2, "b", json!({"cursor": {"offset": 2}})));

    let mut tailer = Tailer::open(&path).unwrap();
    assert_eq!(tailer.table().len(), 2);

    // compaction: checkpoint written, log truncated
    let checkpoint = Checkpoint {
        id: 2,
        entries: vec![EntryLine {
            k: "a".into(),
            v: Some(json!({"cursor": {"offset": 1}})),
        }],
    };
    std::fs::write(
        dir.path().join("checkpoint.json"),
        serde_json::to_string(&checkpoint).unwrap(),
    )
    .unwrap();
    std::fs::write(&path, "").unwrap();

    assert!(tailer.poll().unwrap().is_empty());
    assert_eq!(tailer.table().keys().collect::<Vec<_>>(), vec!["a"]);
    assert_eq!(tailer.position(), 0);

    append(&path, &set_lines(3, "c", json!({"cursor": {"offset": 3}})));
    let changes = tailer.poll().unwrap();
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].key, "c");
}

#[test]
fn test_tailer_skips_invalid_lines() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("log.json");
    let mut tailer = Tailer::open(&path).unwrap();

    append(&path, "garbage\n");
    append(&path, &set_lines(1, "a", json!({"cursor": {"offset": 1}})));
    assert_eq!(tailer.poll().unwrap().len(), 1);
}
