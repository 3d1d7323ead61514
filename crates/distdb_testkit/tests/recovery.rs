//! Crash recovery and corruption handling.

use distdb_core::engine::{Engine, EngineOptions};
use distdb_core::wal::WalOp;
use distdb_core::{CorruptionInfo, Manager};
use distdb_storage::FileBackend;
use distdb_testkit::prelude::*;
use parking_lot::Mutex;
use std::sync::Arc;

const OPTIONS: EngineOptions = EngineOptions {
    sync_on_commit: true,
    checkpoint_threshold: u64::MAX,
};

fn put(key: &str, value: &str) -> WalOp {
    WalOp::Put {
        partition: Partition::Native,
        key: key.as_bytes().to_vec(),
        value: value.as_bytes().to_vec(),
    }
}

fn native(pairs: &[(&str, &str)]) -> Vec<(Partition, Entry)> {
    entries_of(pairs)
        .into_iter()
        .map(|e| (Partition::Native, e))
        .collect()
}

fn record_corruption(manager: &Manager) -> Arc<Mutex<Vec<CorruptionInfo>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    manager.set_corruption_handler(Some(Arc::new(move |info: &CorruptionInfo| {
        sink.lock().push(info.clone());
    })));
    seen
}

#[test]
fn undecided_swap_is_discarded() {
    let env = TestEnv::new();
    {
        let store = env.open_native("staged");
        store.put(Partition::Native, b"before", b"1").unwrap();
    }
    let path = env.store_path("staged", false);
    stage_swap(&path, &CipherPassword::none(), &native(&[("after", "2")]), SwapStage::Staged)
        .unwrap();
    assert!(path.join("segments.new").exists());

    let store = env.open_native("staged");
    assert_eq!(store.get(Partition::Native, b"before").unwrap(), b"1");
    assert!(store.get(Partition::Native, b"after").is_err());
    assert!(!path.join("segments.new").exists());
}

#[test]
fn decided_swap_rolls_forward() {
    let env = TestEnv::new();
    {
        let store = env.open_encrypted("decided", "pw");
        store.put(Partition::Native, b"before", b"1").unwrap();
    }
    let path = env.store_path("decided", false);
    stage_swap(&path, &password_of("pw"), &native(&[("after", "2")]), SwapStage::Decided).unwrap();

    let store = env.open_encrypted("decided", "pw");
    assert!(store.get(Partition::Native, b"before").is_err());
    assert_eq!(store.get(Partition::Native, b"after").unwrap(), b"2");
    assert!(!path.join("SWAP").exists());
}

#[test]
fn torn_wal_write_loses_only_that_commit() {
    let dir = tempfile::tempdir().unwrap();
    let wal_path = dir.path().join("wal.log");
    let seg_path = dir.path().join("segments.dat");
    {
        let (wal, switch) = CrashableBackend::new(Box::new(FileBackend::open(&wal_path).unwrap()));
        let mut engine = Engine::open(
            Box::new(wal),
            Box::new(FileBackend::open(&seg_path).unwrap()),
            None,
            OPTIONS,
        )
        .unwrap();
        engine.commit(vec![put("a", "1")]).unwrap();
        switch.crash_after(10);
        assert!(engine.commit(vec![put("b", "2")]).is_err());
        assert!(switch.has_crashed());
    }
    let engine = Engine::open(
        Box::new(FileBackend::open(&wal_path).unwrap()),
        Box::new(FileBackend::open(&seg_path).unwrap()),
        None,
        OPTIONS,
    )
    .unwrap();
    assert_eq!(engine.get(Partition::Native, b"a").unwrap(), Some(b"1".to_vec()));
    assert_eq!(engine.get(Partition::Native, b"b").unwrap(), None);
}

#[test]
fn committed_wal_survives_torn_segment_write() {
    let dir = tempfile::tempdir().unwrap();
    let wal_path = dir.path().join("wal.log");
    let seg_path = dir.path().join("segments.dat");
    {
        let (segments, switch) =
            CrashableBackend::new(Box::new(FileBackend::open(&seg_path).unwrap()));
        let mut engine = Engine::open(
            Box::new(FileBackend::open(&wal_path).unwrap()),
            Box::new(segments),
            None,
            OPTIONS,
        )
        .unwrap();
        engine.commit(vec![put("a", "1")]).unwrap();
        switch.crash_after(5);
        assert!(engine.commit(vec![put("b", "2"), put("c", "3")]).is_err());
    }
    let engine = Engine::open(
        Box::new(FileBackend::open(&wal_path).unwrap()),
        Box::new(FileBackend::open(&seg_path).unwrap()),
        None,
        OPTIONS,
    )
    .unwrap();
    assert_eq!(engine.get(Partition::Native, b"a").unwrap(), Some(b"1".to_vec()));
    assert_eq!(engine.get(Partition::Native, b"b").unwrap(), Some(b"2".to_vec()));
    assert_eq!(engine.get(Partition::Native, b"c").unwrap(), Some(b"3".to_vec()));
}

#[test]
fn corruption_at_open_fires_handler() {
    let env = TestEnv::new();
    {
        let store = env.open_native("broken");
        store.put(Partition::Native, b"a", b"1").unwrap();
        store.put(Partition::Native, b"b", b"2").unwrap();
    }
    damage_first_record(&env.store_path("broken", false)).unwrap();
    let seen = record_corruption(&env.manager);

    let err = env.manager.open("broken", StoreConfig::new()).unwrap_err();
    assert_eq!(err.status(), DbStatus::InvalidPasswordOrCorrupted);
    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].store_id, "broken");
    assert_eq!(seen[0].app_id, TEST_APP);
}

#[test]
fn handler_can_restore_from_backup() {
    let env = TestEnv::new();
    let backup = env.file_path("good.bin");
    {
        let store = env.open_native("healing");
        store.put(Partition::Native, b"a", b"1").unwrap();
        store.put(Partition::LocalOnly, b"b", b"2").unwrap();
        store.export(&backup, &CipherPassword::none()).unwrap();
    }
    damage_first_record(&env.store_path("healing", false)).unwrap();

    let manager = env.manager.clone();
    let restored = Arc::new(Mutex::new(false));
    let flag = Arc::clone(&restored);
    let file = backup.clone();
    env.manager
        .set_corruption_handler(Some(Arc::new(move |info: &CorruptionInfo| {
            manager.delete_store(&info.store_id).unwrap();
            let store = manager.open(&info.store_id, StoreConfig::new()).unwrap();
            store.import(&file, &CipherPassword::none()).unwrap();
            manager.close(&store).unwrap();
            *flag.lock() = true;
        })));

    assert!(env.manager.open("healing", StoreConfig::new()).is_err());
    assert!(*restored.lock());
    env.manager.set_corruption_handler(None);

    let store = env.open_native("healing");
    assert_eq!(store.get(Partition::Native, b"a").unwrap(), b"1");
    assert_eq!(store.get(Partition::LocalOnly, b"b").unwrap(), b"2");
}

#[test]
fn runtime_corruption_until_import() {
    let env = TestEnv::new();
    let seen = record_corruption(&env.manager);
    let store = env.open_native("runtime");
    store.put(Partition::Native, b"a", b"1").unwrap();
    store.put(Partition::Native, b"b", b"2").unwrap();
    let backup = env.file_path("runtime.bin");
    store.export(&backup, &CipherPassword::none()).unwrap();

    damage_first_record(&env.store_path("runtime", false)).unwrap();
    let err = store.get(Partition::Native, b"a").unwrap_err();
    assert_eq!(err.status(), DbStatus::InvalidPasswordOrCorrupted);
    assert_eq!(seen.lock().len(), 1);

    // The store stays unusable, and the handler is not called again.
    let err = store.get(Partition::Native, b"b").unwrap_err();
    assert_eq!(err.status(), DbStatus::InvalidPasswordOrCorrupted);
    let err = store
        .export(env.file_path("after.bin"), &CipherPassword::none())
        .unwrap_err();
    assert_eq!(err.status(), DbStatus::InvalidPasswordOrCorrupted);
    assert_eq!(seen.lock().len(), 1);

    store.import(&backup, &CipherPassword::none()).unwrap();
    assert_eq!(store.get(Partition::Native, b"a").unwrap(), b"1");
    store.put(Partition::Native, b"c", b"3").unwrap();
}

#[test]
fn wrong_password_is_not_corruption() {
    let env = TestEnv::new();
    {
        env.open_encrypted("locked", "right");
    }
    let seen = record_corruption(&env.manager);
    let err = env
        .manager
        .open("locked", StoreConfig::new().encrypted(password_of("wrong")))
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidPassword));
    assert!(seen.lock().is_empty());
}

#[test]
fn handler_can_be_removed() {
    let env = TestEnv::new();
    {
        let store = env.open_native("quiet");
        store.put(Partition::Native, b"a", b"1").unwrap();
        store.put(Partition::Native, b"b", b"2").unwrap();
    }
    damage_first_record(&env.store_path("quiet", false)).unwrap();
    let seen = record_corruption(&env.manager);
    env.manager.set_corruption_handler(None);
    assert!(env.manager.open("quiet", StoreConfig::new()).is_err());
    assert!(seen.lock().is_empty());
}
