//! Dictionary Tests
//!
//! Tests verify:
//! - Basic get/put/delete operations
//! - Last write wins and tombstones erase
//! - Live size equals the compacted serialization
//! - Replay of record streams, including torn tails

use std::collections::BTreeSet;

use mmapkv::codec::{encode_record, encode_tombstone, Value};
use mmapkv::compactor;
use mmapkv::dictionary::{replay, Dictionary};
use mmapkv::KvError;

// =============================================================================
// Basic Operations Tests
// =============================================================================

#[test]
fn test_new_dictionary_is_empty() {
    let dict = Dictionary::new();
    assert_eq!(dict.count(), 0);
    assert_eq!(dict.live_size(), 0);
    assert!(dict.is_empty());
    assert!(dict.keys().is_empty());
}

#[test]
fn test_put_and_get() {
    let mut dict = Dictionary::new();
    dict.put("hello".to_string(), Value::String("world".to_string()));
    assert_eq!(dict.get("hello").unwrap(), &Value::String("world".to_string()));
    assert!(dict.contains_key("hello"));
}

#[test]
fn test_get_missing_key_is_not_found() {
    let dict = Dictionary::new();
    assert!(matches!(dict.get("nope"), Err(KvError::NotFound)));
}

#[test]
fn test_put_overwrites_existing() {
    let mut dict = Dictionary::new();
    assert_eq!(dict.put("k".to_string(), Value::Int32(1)), None);
    assert_eq!(dict.put("k".to_string(), Value::Int32(2)), Some(Value::Int32(1)));
    assert_eq!(dict.get("k").unwrap(), &Value::Int32(2));
    assert_eq!(dict.count(), 1);
}

#[test]
fn test_delete_removes_key() {
    let mut dict = Dictionary::new();
    dict.put("k".to_string(), Value::Bool(true));
    assert_eq!(dict.delete("k"), Some(Value::Bool(true)));
    assert_eq!(dict.delete("k"), None);
    assert!(!dict.contains_key("k"));
    assert!(dict.keys().is_empty());
}

#[test]
fn test_live_size_matches_compacted_bytes() {
    let mut dict = Dictionary::new();
    for i in 0..50 {
        dict.put(format!("key{}", i), Value::UInt64(i * 1_000_000));
    }
    for i in 0..25 {
        dict.delete(&format!("key{}", i * 2));
    }
    dict.put("key1".to_string(), Value::StringSet(BTreeSet::from(["a".to_string()])));
    assert_eq!(compactor::compact(&dict).len(), dict.live_size());
}

#[test]
fn test_clear() {
    let mut dict = Dictionary::new();
    dict.put("a".to_string(), Value::Int32(1));
    dict.clear();
    assert!(dict.is_empty());
    assert_eq!(dict.live_size(), 0);
}

// =============================================================================
// Replay Tests
// =============================================================================

#[test]
fn test_replay_last_write_wins() {
    let mut stream = Vec::new();
    stream.extend(encode_record("k", &Value::Int32(1)));
    stream.extend(encode_record("other", &Value::Bool(false)));
    stream.extend(encode_record("k", &Value::Int32(3)));

    let mut dict = Dictionary::new();
    let result = replay(&mut dict, &stream, 0);
    assert!(result.is_clean());
    assert_eq!(result.records, 3);
    assert_eq!(result.consumed, stream.len());
    assert_eq!(dict.get("k").unwrap(), &Value::Int32(3));
    assert_eq!(dict.count(), 2);
}

#[test]
fn test_replay_tombstone_then_reinsert() {
    let mut stream = Vec::new();
    stream.extend(encode_record("k", &Value::Int32(1)));
    stream.extend(encode_tombstone("k"));
    stream.extend(encode_record("k", &Value::Int32(2)));

    let mut dict = Dictionary::new();
    replay(&mut dict, &stream, 0);
    assert_eq!(dict.get("k").unwrap(), &Value::Int32(2));
}

#[test]
fn test_replay_from_offset() {
    let first = encode_record("a", &Value::Int32(1));
    let mut stream = first.clone();
    stream.extend(encode_record("b", &Value::Int32(2)));

    let mut dict = Dictionary::new();
    let result = replay(&mut dict, &stream, first.len());
    assert_eq!(result.records, 1);
    assert_eq!(dict.keys(), vec!["b".to_string()]);
}

#[test]
fn test_replay_stops_at_unknown_kind() {
    let mut stream = encode_record("a", &Value::Int32(1));
    let good = stream.len();
    // value with an unknown kind tag
    stream.extend_from_slice(&[1, b'b', 2, 0xEE, 0x00]);
    stream.extend(encode_record("c", &Value::Int32(3)));

    let mut dict = Dictionary::new();
    let result = replay(&mut dict, &stream, 0);
    assert!(matches!(result.error, Some(KvError::MalformedRecord(_))));
    assert_eq!(result.consumed, good);
    assert_eq!(dict.keys(), vec!["a".to_string()]);
}
