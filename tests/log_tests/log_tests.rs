//! Append Log Tests
//!
//! Tests verify:
//! - Appends land at the cursor and keep header/meta checkpoints current
//! - CapacityExceeded leaves the log untouched
//! - Growth preserves every valid byte at its offset
//! - Rewrites swap the region and bump the sequence
//! - Interrupted rewrites are discarded or rolled forward at open

use std::fs;

use mmapkv::codec::{encode_record, RecordReader, Value};
use mmapkv::config::PAGE_SIZE;
use mmapkv::crc::{compute_crc, Checkpoint};
use mmapkv::crypt::{CryptKey, KEY_LEN};
use mmapkv::log::{AppendLog, LogHeader, LogPaths, MetaInfo, HEADER_SIZE};
use mmapkv::KvError;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_log() -> (TempDir, AppendLog) {
    let temp_dir = TempDir::new().unwrap();
    let paths = LogPaths::new(temp_dir.path().join("store"));
    let mut log = AppendLog::open(paths, PAGE_SIZE).unwrap();
    log.adopt(Checkpoint::EMPTY, None, [0u8; KEY_LEN]).unwrap();
    (temp_dir, log)
}

fn record(i: usize) -> Vec<u8> {
    encode_record(&format!("key{}", i), &Value::Int64(i as i64))
}

fn header_on_disk(log: &AppendLog) -> LogHeader {
    let bytes = fs::read(&log.paths().data).unwrap();
    LogHeader::decode(&bytes).unwrap().unwrap()
}

fn meta_on_disk(log: &AppendLog) -> MetaInfo {
    MetaInfo::decode(&fs::read(&log.paths().meta).unwrap()).unwrap()
}

// =============================================================================
// Append Tests
// =============================================================================

#[test]
fn test_fresh_log_is_empty() {
    let (_temp, log) = setup_log();
    assert_eq!(log.valid_len(), 0);
    assert_eq!(log.file_len(), PAGE_SIZE);
    assert_eq!(log.capacity(), PAGE_SIZE - HEADER_SIZE);
    assert!(log.read_all().is_empty());
}

#[test]
fn test_append_returns_offsets_and_updates_checkpoints() {
    let (_temp, mut log) = setup_log();
    let first = record(1);
    let second = record(2);

    assert_eq!(log.append(&first).unwrap(), 0);
    assert_eq!(log.append(&second).unwrap(), first.len());

    let expected_len = first.len() + second.len();
    assert_eq!(log.valid_len(), expected_len);
    assert_eq!(log.checkpoint().crc, compute_crc(&log.payload()[..expected_len]));

    log.flush().unwrap();
    let header = header_on_disk(&log);
    assert_eq!(header.valid_len as usize, expected_len);
    let meta = meta_on_disk(&log);
    assert_eq!(meta.checkpoint(), log.checkpoint());
    assert_eq!(meta.last_confirmed.checkpoint(), log.checkpoint());
}

#[test]
fn test_read_all_yields_appended_records() {
    let (_temp, mut log) = setup_log();
    for i in 0..10 {
        log.append(&record(i)).unwrap();
    }
    let plain = log.read_all();
    let keys: Vec<String> = RecordReader::new(&plain)
        .map(|r| r.unwrap().key_str().unwrap().to_string())
        .collect();
    assert_eq!(keys.len(), 10);
    assert_eq!(keys[0], "key0");
    assert_eq!(keys[9], "key9");
}

#[test]
fn test_capacity_exceeded_writes_nothing() {
    let (_temp, mut log) = setup_log();
    let big = vec![0xAB; log.capacity() + 1];
    let before = log.checkpoint();

    match log.append(&big) {
        Err(KvError::CapacityExceeded { needed, available }) => {
            assert_eq!(needed, big.len());
            assert_eq!(available, log.capacity());
        }
        other => panic!("expected CapacityExceeded, got {:?}", other),
    }
    assert_eq!(log.checkpoint(), before);
}

#[test]
fn test_truncate_to_drops_tail() {
    let (_temp, mut log) = setup_log();
    let first = record(1);
    log.append(&first).unwrap();
    log.append(&record(2)).unwrap();

    log.truncate_to(first.len()).unwrap();
    assert_eq!(log.valid_len(), first.len());
    assert_eq!(log.checkpoint().crc, compute_crc(&first));

    // the cursor continues from the truncated point
    assert_eq!(log.append(&record(3)).unwrap(), first.len());
}

// =============================================================================
// Growth Tests
// =============================================================================

#[test]
fn test_grow_preserves_offsets() {
    let (_temp, mut log) = setup_log();
    for i in 0..20 {
        log.append(&record(i)).unwrap();
    }
    let before = log.payload()[..log.valid_len()].to_vec();
    let checkpoint = log.checkpoint();

    log.grow(3 * PAGE_SIZE + 1).unwrap();
    assert_eq!(log.file_len(), 4 * PAGE_SIZE);
    assert_eq!(&log.payload()[..log.valid_len()], before.as_slice());
    assert_eq!(log.checkpoint(), checkpoint);
    assert_eq!(fs::metadata(&log.paths().data).unwrap().len() as usize, 4 * PAGE_SIZE);
}

#[test]
fn test_grow_never_shrinks() {
    let (_temp, mut log) = setup_log();
    log.grow(10).unwrap();
    assert_eq!(log.file_len(), PAGE_SIZE);
}

// =============================================================================
// Rewrite Tests
// =============================================================================

#[test]
fn test_rewrite_swaps_region_and_bumps_sequence() {
    let (_temp, mut log) = setup_log();
    for i in 0..10 {
        log.append(&record(i)).unwrap();
    }
    let sequence = log.sequence();
    let replacement = record(99);

    log.rewrite(&replacement, 2 * PAGE_SIZE, None).unwrap();
    assert_eq!(log.sequence(), sequence + 1);
    assert_eq!(log.valid_len(), replacement.len());
    assert_eq!(log.file_len(), 2 * PAGE_SIZE);
    assert_eq!(&*log.read_all(), replacement.as_slice());
    assert!(!log.paths().compact.exists());

    let header = header_on_disk(&log);
    assert_eq!(header.sequence, sequence + 1);
    assert_eq!(meta_on_disk(&log).sequence, sequence + 1);
}

#[test]
fn test_encrypted_rewrite_uses_fresh_iv() {
    let (_temp, mut log) = setup_log();
    let key = CryptKey::new(b"secret").unwrap();
    let plain = record(1);

    log.rewrite(&plain, PAGE_SIZE, Some(&key)).unwrap();
    let first_iv = log.meta().iv;
    assert_ne!(&log.payload()[..plain.len()], plain.as_slice());
    assert_eq!(&*log.read_all(), plain.as_slice());

    log.rewrite(&plain, PAGE_SIZE, Some(&key)).unwrap();
    assert_ne!(log.meta().iv, first_iv);
    assert_eq!(log.meta().key_check, key.check_for(&log.meta().iv));
}

#[test]
fn test_uncommitted_compact_file_is_removed_on_open() {
    let temp_dir = TempDir::new().unwrap();
    let paths = LogPaths::new(temp_dir.path().join("store"));
    {
        let mut log = AppendLog::open(paths.clone(), PAGE_SIZE).unwrap();
        log.adopt(Checkpoint::EMPTY, None, [0u8; KEY_LEN]).unwrap();
        log.append(&record(1)).unwrap();
        log.flush().unwrap();
    }
    fs::write(&paths.compact, b"half written").unwrap();

    let log = AppendLog::open(paths.clone(), PAGE_SIZE).unwrap();
    assert!(!paths.compact.exists());
    assert_eq!(log.disk_state().header.unwrap().valid_len as usize, record(1).len());
}

#[test]
fn test_committed_compact_file_is_rolled_forward() {
    let temp_dir = TempDir::new().unwrap();
    let paths = LogPaths::new(temp_dir.path().join("store"));
    let replacement = record(7);
    {
        let mut log = AppendLog::open(paths.clone(), PAGE_SIZE).unwrap();
        log.adopt(Checkpoint::EMPTY, None, [0u8; KEY_LEN]).unwrap();
        log.append(&record(1)).unwrap();
        log.append(&record(2)).unwrap();
        log.flush().unwrap();
        log.rewrite(&replacement, PAGE_SIZE, None).unwrap();
    }
    // simulate a crash after meta info committed but before the rename:
    // put the new region back under the compact name and an old one in place
    fs::rename(&paths.data, &paths.compact).unwrap();
    let mut stale = vec![0u8; PAGE_SIZE];
    let old = LogHeader {
        sequence: 0,
        valid_len: 0,
        crc: 0,
        flags: 0,
    };
    stale[..HEADER_SIZE].copy_from_slice(&old.encode());
    fs::write(&paths.data, &stale).unwrap();

    let log = AppendLog::open(paths.clone(), PAGE_SIZE).unwrap();
    assert!(!paths.compact.exists());
    let header = log.disk_state().header.unwrap();
    assert_eq!(header.sequence, 1);
    assert_eq!(header.valid_len as usize, replacement.len());
}
