//! Recovery tests for the persistent contact store.
//!
//! These tests verify that:
//! - Merges survive a reopen exactly as committed
//! - A torn tail entry (crash mid-append) loses only that transaction
//! - Corruption inside a complete entry is reported, not skipped
//! - An append that fails part-way leaves nothing behind in the log

#![cfg(feature = "persistent")]

use std::fs;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tempfile::tempdir;

use contactlink::storage::{open_database, PersistentConfig, PersistentContactStore};
use contactlink::{Contact, ContactEngine, ContactId, ContactStore, IdentifyRequest};

const WAL_FILE: &str = "contacts.wal";

/// The file size limit is process-wide, so these tests run one at a time.
static SERIAL: Mutex<()> = Mutex::new(());

fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock().unwrap_or_else(PoisonError::into_inner)
}

fn open(dir: &Path) -> Arc<PersistentContactStore> {
    Arc::new(open_database(dir, None).unwrap())
}

fn rows(store: &PersistentContactStore) -> Vec<Contact> {
    let len = store.len().unwrap() as u64;
    (1..=len)
        .map(|raw| store.get(ContactId::new(raw)).unwrap().unwrap())
        .collect()
}

#[test]
fn merged_state_survives_reopen() {
    let _serial = serial();
    let dir = tempdir().unwrap();
    let (view, before) = {
        let store = open(dir.path());
        let engine = ContactEngine::new(store.clone());
        engine
            .identify(&IdentifyRequest::email_only("lorraine@hill.valley").unwrap())
            .unwrap();
        engine
            .identify(&IdentifyRequest::phone_only("123456").unwrap())
            .unwrap();
        engine
            .identify(&IdentifyRequest::pair("mcfly@hill.valley", "123456").unwrap())
            .unwrap();
        let view = engine
            .identify(&IdentifyRequest::pair("lorraine@hill.valley", "123456").unwrap())
            .unwrap();
        (view, rows(&store))
    };

    let store = open(dir.path());
    assert_eq!(rows(&store), before);
    assert_eq!(store.committed_transactions().unwrap(), 4);

    // Replayed state answers the same and needs no new writes.
    let engine = ContactEngine::new(store.clone());
    let again = engine
        .identify(&IdentifyRequest::pair("lorraine@hill.valley", "123456").unwrap())
        .unwrap();
    assert_eq!(again, view);
    assert_eq!(store.committed_transactions().unwrap(), 4);
}

#[test]
fn torn_tail_loses_only_the_last_transaction() {
    let _serial = serial();
    let dir = tempdir().unwrap();
    let wal_path = dir.path().join(WAL_FILE);

    let (size_after_two, rows_after_two) = {
        let store = open(dir.path());
        let engine = ContactEngine::new(store.clone());
        engine
            .identify(&IdentifyRequest::email_only("a@x.com").unwrap())
            .unwrap();
        engine
            .identify(&IdentifyRequest::pair("a@x.com", "555").unwrap())
            .unwrap();
        let snapshot = (store.wal_size().unwrap(), rows(&store));
        engine
            .identify(&IdentifyRequest::pair("b@x.com", "555").unwrap())
            .unwrap();
        assert_eq!(store.len().unwrap(), 3);
        snapshot
    };

    // Simulate a crash part-way through the third append.
    let full = fs::metadata(&wal_path).unwrap().len();
    assert!(full > size_after_two + 8);
    fs::OpenOptions::new()
        .write(true)
        .open(&wal_path)
        .unwrap()
        .set_len(size_after_two + 8)
        .unwrap();

    {
        let store = open(dir.path());
        assert_eq!(rows(&store), rows_after_two);
        assert_eq!(store.committed_transactions().unwrap(), 2);
        assert_eq!(store.wal_size().unwrap(), size_after_two);

        // New commits land after the last complete entry.
        let engine = ContactEngine::new(store.clone());
        let view = engine
            .identify(&IdentifyRequest::pair("b@x.com", "555").unwrap())
            .unwrap();
        assert_eq!(view.secondary_contact_ids, vec![ContactId::new(2), ContactId::new(3)]);
    }

    let store = open(dir.path());
    assert_eq!(store.len().unwrap(), 3);
    assert_eq!(store.committed_transactions().unwrap(), 3);
}

#[test]
fn corrupted_entry_is_reported() {
    let _serial = serial();
    let dir = tempdir().unwrap();
    let wal_path = dir.path().join(WAL_FILE);
    {
        let store = open(dir.path());
        let engine = ContactEngine::new(store);
        engine
            .identify(&IdentifyRequest::email_only("a@x.com").unwrap())
            .unwrap();
    }

    // Flip a byte in the stored checksum of the only entry.
    let len = fs::metadata(&wal_path).unwrap().len();
    let mut file = fs::OpenOptions::new().write(true).open(&wal_path).unwrap();
    file.seek(SeekFrom::Start(len - 1)).unwrap();
    let original = fs::read(&wal_path).unwrap()[usize::try_from(len - 1).unwrap()];
    file.write_all(&[original ^ 0xFF]).unwrap();
    file.sync_all().unwrap();
    drop(file);

    assert!(open_database(dir.path(), None).is_err());
}

#[test]
fn unsynced_config_still_persists_on_clean_close() {
    let _serial = serial();
    let dir = tempdir().unwrap();
    {
        let store = Arc::new(
            open_database(dir.path(), Some(PersistentConfig { sync_on_write: false })).unwrap(),
        );
        ContactEngine::new(store)
            .identify(&IdentifyRequest::phone_only("555").unwrap())
            .unwrap();
    }

    let store = open(dir.path());
    assert_eq!(store.len().unwrap(), 1);
}

/// Runs `f` with writes past `limit` bytes failing with `EFBIG`.
#[cfg(unix)]
fn with_file_size_limit<T>(limit: u64, f: impl FnOnce() -> T) -> T {
    let mut previous = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    let limited = unsafe {
        // Without this the kernel kills the process with SIGXFSZ.
        libc::signal(libc::SIGXFSZ, libc::SIG_IGN);
        assert_eq!(libc::getrlimit(libc::RLIMIT_FSIZE, &mut previous), 0);
        libc::rlimit {
            rlim_cur: limit as libc::rlim_t,
            rlim_max: previous.rlim_max,
        }
    };
    assert_eq!(unsafe { libc::setrlimit(libc::RLIMIT_FSIZE, &limited) }, 0);
    let out = f();
    assert_eq!(unsafe { libc::setrlimit(libc::RLIMIT_FSIZE, &previous) }, 0);
    out
}

#[cfg(unix)]
#[test]
fn failed_append_leaves_no_trace_in_the_log() {
    let _serial = serial();
    let dir = tempdir().unwrap();
    {
        let store = open(dir.path());
        let engine = ContactEngine::new(store.clone());
        engine
            .identify(&IdentifyRequest::email_only("a@x.com").unwrap())
            .unwrap();
        let size = store.wal_size().unwrap();

        // The entry for b@x.com is cut off 20 bytes in.
        let failed = with_file_size_limit(size + 20, || {
            engine.identify(&IdentifyRequest::pair("b@x.com", "777").unwrap())
        });
        assert!(failed.unwrap_err().to_string().contains("failed to append WAL entry"));
        assert_eq!(store.len().unwrap(), 1);
        assert_eq!(store.wal_size().unwrap(), size);
        assert_eq!(store.committed_transactions().unwrap(), 1);

        let view = engine
            .identify(&IdentifyRequest::email_only("c@x.com").unwrap())
            .unwrap();
        assert_eq!(view.primary_contact_id, ContactId::new(2));
    }

    let store = open(dir.path());
    assert_eq!(store.len().unwrap(), 2);
    assert_eq!(store.committed_transactions().unwrap(), 2);
    let second = store.get(ContactId::new(2)).unwrap().unwrap();
    assert_eq!(second.email.as_deref(), Some("c@x.com"));
    assert_eq!(second.phone_number, None);
}
