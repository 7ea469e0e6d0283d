//! Multi-Process Tests
//!
//! Each detached handle owns its own mapping, Dictionary and lock file
//! descriptor, the same as a handle in another process would.
//!
//! Tests verify:
//! - Appends by one handle are picked up by the other
//! - Growth and rewrites by one handle trigger a remap or reload
//! - Encrypted tails are decrypted on catch-up
//! - Writers on different handles never lose each other's updates
//! - A held store lock or a foreign lock holder makes writers time out
//! - The content-change callback fires once per picked-up change

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use mmapkv::guard::{LockKind, ProcessLock};
use mmapkv::{Config, KvError, Mode, Store};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn config(dir: &TempDir) -> Config {
    Config::builder().root_dir(dir.path()).build().unwrap()
}

fn timed_config(dir: &TempDir) -> Config {
    Config::builder()
        .root_dir(dir.path())
        .lock_timeout(Duration::from_millis(50))
        .build()
        .unwrap()
}

fn pair(dir: &TempDir, id: &str, key: Option<&[u8]>) -> (Store, Store) {
    let a = Store::open_detached(config(dir), id, Mode::MultiProcess, key).unwrap();
    let b = Store::open_detached(config(dir), id, Mode::MultiProcess, key).unwrap();
    (a, b)
}

// =============================================================================
// Visibility
// =============================================================================

#[test]
fn test_appends_are_visible_to_other_handle() {
    let temp_dir = TempDir::new().unwrap();
    let (a, b) = pair(&temp_dir, "visible", None);
    assert!(temp_dir.path().join("visible.lock").exists());

    a.set("x", 1i32).unwrap();
    assert_eq!(b.get_as::<i32>("x").unwrap(), 1);

    b.set("y", "from b").unwrap();
    a.remove("x").unwrap();
    assert_eq!(a.get_as::<String>("y").unwrap(), "from b");
    assert!(matches!(b.get("x"), Err(KvError::NotFound)));
    assert_eq!(b.all_keys().unwrap(), vec!["y"]);
}

#[test]
fn test_growth_is_visible_to_other_handle() {
    let temp_dir = TempDir::new().unwrap();
    let (a, b) = pair(&temp_dir, "grown", None);
    b.set("seed", 0i32).unwrap();
    assert_eq!(a.count().unwrap(), 1);

    for i in 0..2000 {
        a.set(&format!("key{:05}", i), i as i64).unwrap();
    }
    assert_eq!(b.count().unwrap(), 2001);
    assert_eq!(b.get_as::<i64>("key01999").unwrap(), 1999);
    assert_eq!(b.total_size().unwrap(), a.total_size().unwrap());
}

#[test]
fn test_rewrite_by_other_handle_forces_reload() {
    let temp_dir = TempDir::new().unwrap();
    let (a, b) = pair(&temp_dir, "rewritten", None);
    for round in 0..3 {
        for i in 0..20 {
            a.set(&format!("k{}", i), round * 100 + i).unwrap();
        }
    }
    assert_eq!(b.count().unwrap(), 20);

    a.compact().unwrap();
    a.set("after", true).unwrap();
    assert_eq!(b.count().unwrap(), 21);
    assert_eq!(b.get_as::<i32>("k7").unwrap(), 207);

    // and the other way round, after b has reloaded the swapped file
    b.clear_all().unwrap();
    b.set("only", 1u32).unwrap();
    assert_eq!(a.all_keys().unwrap(), vec!["only"]);
}

#[test]
fn test_encrypted_tail_is_decrypted_on_catch_up() {
    let temp_dir = TempDir::new().unwrap();
    let (a, b) = pair(&temp_dir, "encrypted", Some(b"shared-key"));

    a.set("first", "one").unwrap();
    assert_eq!(b.get_as::<String>("first").unwrap(), "one");
    a.set("second", "two").unwrap();
    b.set("third", "three").unwrap();
    assert_eq!(b.get_as::<String>("second").unwrap(), "two");
    assert_eq!(a.get_as::<String>("third").unwrap(), "three");
}

#[test]
fn test_check_content_changed() {
    let temp_dir = TempDir::new().unwrap();
    let (a, b) = pair(&temp_dir, "changed", None);
    a.set("k", 1i32).unwrap();
    assert!(b.check_content_changed().unwrap());
    assert!(!b.check_content_changed().unwrap());

    a.set("k", 2i32).unwrap();
    assert!(b.check_content_changed().unwrap());
    assert_eq!(b.get_as::<i32>("k").unwrap(), 2);
    assert!(!a.check_content_changed().unwrap());
}

#[test]
fn test_content_change_callback() {
    let temp_dir = TempDir::new().unwrap();
    let seen = Arc::new(AtomicUsize::new(0));
    let ids = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let watching = {
        let seen = Arc::clone(&seen);
        let ids = Arc::clone(&ids);
        Config::builder()
            .root_dir(temp_dir.path())
            .on_content_change(move |id| {
                seen.fetch_add(1, Ordering::SeqCst);
                ids.lock().push(id.to_string());
            })
            .build()
            .unwrap()
    };
    let a = Store::open_detached(config(&temp_dir), "notified", Mode::MultiProcess, None).unwrap();
    let b = Store::open_detached(watching, "notified", Mode::MultiProcess, None).unwrap();

    a.set("k", 1i32).unwrap();
    assert_eq!(b.get_as::<i32>("k").unwrap(), 1);
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    // nothing new on disk, and b's own writes are not foreign changes
    assert_eq!(b.count().unwrap(), 1);
    b.set("mine", true).unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    a.compact().unwrap();
    assert!(b.check_content_changed().unwrap());
    assert_eq!(seen.load(Ordering::SeqCst), 2);
    assert_eq!(*ids.lock(), vec!["notified", "notified"]);
}

// =============================================================================
// Writer Exclusion
// =============================================================================

#[test]
fn test_writers_on_both_handles_lose_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let (a, b) = pair(&temp_dir, "writers", None);
    let handles = [Arc::new(a), Arc::new(b)];

    let workers: Vec<_> = (0..4)
        .map(|t| {
            let store = Arc::clone(&handles[t % 2]);
            thread::spawn(move || {
                for i in 0..150 {
                    store.set(&format!("w{}-{}", t, i), i as u64).unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    for store in &handles {
        assert_eq!(store.count().unwrap(), 600);
        assert_eq!(store.get_as::<u64>("w3-149").unwrap(), 149);
    }
}

#[test]
fn test_store_lock_blocks_other_handle() {
    let temp_dir = TempDir::new().unwrap();
    let a = Store::open_detached(timed_config(&temp_dir), "locked", Mode::MultiProcess, None).unwrap();
    let b = Store::open_detached(timed_config(&temp_dir), "locked", Mode::MultiProcess, None).unwrap();

    let held = a.lock().unwrap();
    a.set("a", 1i32).unwrap();
    assert!(matches!(b.set("b", 2i32), Err(KvError::LockTimeout)));
    assert!(b.try_lock().unwrap().is_none());

    held.unlock();
    let held = b.try_lock().unwrap().expect("store is free");
    b.set("b", 2i32).unwrap();
    drop(held);
    assert_eq!(a.all_keys().unwrap(), vec!["a", "b"]);
}

#[test]
fn test_foreign_lock_holder_times_out_writers() {
    let temp_dir = TempDir::new().unwrap();
    let store = Store::open(timed_config(&temp_dir), "foreign", Mode::MultiProcess, None).unwrap();
    store.set("before", 1i32).unwrap();

    let foreign = ProcessLock::open(&temp_dir.path().join("foreign.lock")).unwrap();
    let held = foreign.lock(LockKind::Exclusive, None).unwrap();
    assert!(matches!(store.set("during", 2i32), Err(KvError::LockTimeout)));
    assert!(matches!(
        Store::open_detached(timed_config(&temp_dir), "foreign", Mode::MultiProcess, None),
        Err(KvError::LockTimeout)
    ));

    drop(held);
    store.set("after", 3i32).unwrap();
    assert_eq!(store.all_keys().unwrap(), vec!["after", "before"]);
}

#[test]
fn test_reopen_after_both_handles_close() {
    let temp_dir = TempDir::new().unwrap();
    {
        let (a, b) = pair(&temp_dir, "reopen", None);
        a.set("a", 1i32).unwrap();
        b.set("b", 2i32).unwrap();
        a.set("c", 3i32).unwrap();
    }
    let store = Store::open(config(&temp_dir), "reopen", Mode::MultiProcess, None).unwrap();
    assert_eq!(store.all_keys().unwrap(), vec!["a", "b", "c"]);
}
