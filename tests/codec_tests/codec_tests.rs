//! Codec Tests
//!
//! Tests verify:
//! - Round trips for every kind, including boundary values
//! - Portable byte layout
//! - Malformed input is reported, never mistaken for a missing key
//! - Record framing and tombstones

use std::collections::BTreeSet;

use mmapkv::codec::{
    decode, decode_value, encode, encode_record, encode_tombstone, record_len, Kind, RecordReader,
    Value,
};
use mmapkv::KvError;
use proptest::prelude::*;

// =============================================================================
// Helper Functions
// =============================================================================

fn round_trip(value: Value) -> Value {
    decode(&encode(&value), value.kind()).unwrap()
}

fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Float(x), Value::Float(y)) => x.to_bits() == y.to_bits(),
        (Value::Double(x), Value::Double(y)) => x.to_bits() == y.to_bits(),
        _ => a == b,
    }
}

fn string_set(members: &[&str]) -> BTreeSet<String> {
    members.iter().map(|s| s.to_string()).collect()
}

// =============================================================================
// Round Trip Tests
// =============================================================================

#[test]
fn test_integer_boundaries_round_trip() {
    for v in [i32::MIN, -1, 0, 1, i32::MAX] {
        assert_eq!(round_trip(Value::Int32(v)), Value::Int32(v));
    }
    for v in [i64::MIN, -1, 0, 1, i64::MAX] {
        assert_eq!(round_trip(Value::Int64(v)), Value::Int64(v));
    }
    for v in [0, 1, u32::MAX] {
        assert_eq!(round_trip(Value::UInt32(v)), Value::UInt32(v));
    }
    for v in [0, 1, u64::MAX] {
        assert_eq!(round_trip(Value::UInt64(v)), Value::UInt64(v));
    }
}

#[test]
fn test_special_floats_round_trip() {
    for v in [f32::INFINITY, f32::NEG_INFINITY, f32::MIN_POSITIVE, -0.0] {
        assert!(same_value(&round_trip(Value::Float(v)), &Value::Float(v)));
    }
    let nan = round_trip(Value::Double(f64::NAN));
    assert!(matches!(nan, Value::Double(v) if v.is_nan()));
    assert!(same_value(&round_trip(Value::Double(f64::NEG_INFINITY)), &Value::Double(f64::NEG_INFINITY)));
}

#[test]
fn test_empty_values_round_trip() {
    assert_eq!(round_trip(Value::Bytes(Vec::new())), Value::Bytes(Vec::new()));
    assert_eq!(round_trip(Value::String(String::new())), Value::String(String::new()));
    assert_eq!(round_trip(Value::StringSet(BTreeSet::new())), Value::StringSet(BTreeSet::new()));
}

#[test]
fn test_empty_string_set_is_not_a_tombstone() {
    let record = encode_record("set", &Value::StringSet(BTreeSet::new()));
    let parsed = RecordReader::new(&record).next().unwrap().unwrap();
    assert!(!parsed.is_tombstone());
    assert_eq!(decode_value(parsed.value).unwrap(), Value::StringSet(BTreeSet::new()));
}

#[test]
fn test_string_set_round_trip() {
    let set = string_set(&["alpha", "", "γάμμα"]);
    assert_eq!(round_trip(Value::StringSet(set.clone())), Value::StringSet(set));
}

// =============================================================================
// Layout Tests
// =============================================================================

#[test]
fn test_layout_is_fixed() {
    assert_eq!(encode(&Value::Bool(true)), vec![1, 1]);
    assert_eq!(encode(&Value::Int32(-1)), vec![2, 0x01]);
    assert_eq!(encode(&Value::UInt32(300)), vec![3, 0xAC, 0x02]);
    assert_eq!(encode(&Value::Double(1.0)), {
        let mut v = vec![7];
        v.extend_from_slice(&1.0f64.to_le_bytes());
        v
    });
    assert_eq!(encode(&Value::String("Hi".into())), vec![8, b'H', b'i']);
    assert_eq!(
        encode(&Value::StringSet(string_set(&["a"]))),
        vec![10, 1, 1, b'a']
    );
}

#[test]
fn test_record_layout() {
    let record = encode_record("k", &Value::Bool(false));
    assert_eq!(record, vec![1, b'k', 2, 1, 0]);
    assert_eq!(record_len("k", Some(&Value::Bool(false))), record.len());
    assert_eq!(encode_tombstone("k"), vec![1, b'k', 0]);
    assert_eq!(record_len("k", None), 3);
}

// =============================================================================
// Malformed Input Tests
// =============================================================================

#[test]
fn test_unknown_tag_is_malformed() {
    assert!(matches!(decode_value(&[42, 0]), Err(KvError::MalformedRecord(_))));
    assert!(matches!(decode_value(&[]), Err(KvError::MalformedRecord(_))));
}

#[test]
fn test_short_payloads_are_malformed() {
    assert!(matches!(decode_value(&[6, 0, 0]), Err(KvError::MalformedRecord(_))));
    assert!(matches!(decode_value(&[1]), Err(KvError::MalformedRecord(_))));
    // set of two members with one length byte available
    assert!(matches!(decode_value(&[10, 2, 5]), Err(KvError::MalformedRecord(_))));
    // member declares more bytes than remain
    assert!(matches!(decode_value(&[10, 1, 9, b'a']), Err(KvError::MalformedRecord(_))));
}

#[test]
fn test_out_of_range_int32_is_malformed() {
    let bytes = encode(&Value::Int64(i64::from(i32::MAX) + 1));
    let mut as_int32 = bytes.clone();
    as_int32[0] = Kind::Int32.tag();
    assert!(matches!(decode_value(&as_int32), Err(KvError::MalformedRecord(_))));
}

#[test]
fn test_kind_mismatch_is_distinct() {
    let bytes = encode(&Value::Int32(5));
    match decode(&bytes, Kind::String) {
        Err(KvError::KindMismatch { expected, found }) => {
            assert_eq!(expected, Kind::String);
            assert_eq!(found, Kind::Int32);
        }
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_reader_reports_declared_length_overflow() {
    let mut buf = encode_record("a", &Value::Int32(1));
    buf.extend_from_slice(&[1, b'b', 50, 2]);
    let results: Vec<_> = RecordReader::new(&buf).collect();
    assert_eq!(results.len(), 2);
    assert!(results[0].is_ok());
    assert!(matches!(results[1], Err(KvError::MalformedRecord(_))));
}

// =============================================================================
// Property Tests
// =============================================================================

fn any_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(Value::Int32),
        any::<u32>().prop_map(Value::UInt32),
        any::<i64>().prop_map(Value::Int64),
        any::<u64>().prop_map(Value::UInt64),
        any::<f32>().prop_map(Value::Float),
        any::<f64>().prop_map(Value::Double),
        ".*".prop_map(Value::String),
        proptest::collection::vec(any::<u8>(), 0..64).prop_map(Value::Bytes),
        proptest::collection::btree_set(".{0,8}", 0..6).prop_map(Value::StringSet),
    ]
}

proptest! {
    #[test]
    fn prop_value_round_trip(value in any_value()) {
        let decoded = decode_value(&encode(&value)).unwrap();
        prop_assert!(same_value(&decoded, &value), "{:?} != {:?}", decoded, value);
    }

    #[test]
    fn prop_records_frame_back_to_back(keys in proptest::collection::vec("[a-z]{1,8}", 1..10)) {
        let mut buf = Vec::new();
        for (i, key) in keys.iter().enumerate() {
            buf.extend(encode_record(key, &Value::UInt64(i as u64)));
        }
        let parsed: Vec<_> = RecordReader::new(&buf).collect::<Result<_, _>>().unwrap();
        prop_assert_eq!(parsed.len(), keys.len());
        prop_assert_eq!(parsed.last().unwrap().end(), buf.len());
    }
}
