//! End-to-end usage scenarios.

use distdb_core::engine::COMPACTION_MIN_SIZE;
use distdb_testkit::prelude::*;

#[test]
fn scenario_a_puts_and_listing() {
    let env = TestEnv::new();
    let store = env.open_native("scenario_a");
    store.put(Partition::Native, b"k1", b"v1").unwrap();
    store
        .put_batch(Partition::Native, entries_of(&[("k2", "v2"), ("k3", "v3")]))
        .unwrap();
    let entries = store.get_entries(Partition::Native, b"").unwrap();
    assert_eq!(entries, entries_of(&[("k1", "v1"), ("k2", "v2"), ("k3", "v3")]));
}

#[test]
fn scenario_b_observed_transaction() {
    let env = TestEnv::new();
    let store = env.open_native("scenario_b");
    let recorder = ObserverRecorder::new();
    store
        .register_observer(KeyFilter::from_key("k1"), ObserverMode::NativeOnly, recorder.as_observer())
        .unwrap();
    store.start_transaction().unwrap();
    store.put(Partition::Native, b"k1", b"v1").unwrap();
    store.put(Partition::Native, b"k1", b"v2").unwrap();
    store.commit().unwrap();
    let notes = recorder.notifications();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].inserted(), entries_of(&[("k1", "v2")]).as_slice());
}

#[test]
fn scenario_c_unencrypted_backup() {
    let env = TestEnv::new();
    let store = env.open_native("scenario_c");
    store.put(Partition::Native, b"k", b"v").unwrap();
    let file = env.file_path("scenario_c.bak");
    store.export(&file, &CipherPassword::none()).unwrap();
    store.put(Partition::Native, b"k", b"changed").unwrap();

    let err = store.import(&file, &password_of("pwd1")).unwrap_err();
    assert_eq!(err.status(), DbStatus::InvalidFile);
    store.import(&file, &CipherPassword::none()).unwrap();
    assert_eq!(store.get(Partition::Native, b"k").unwrap(), b"v");
}

#[test]
fn partitions_are_independent() {
    let env = TestEnv::new();
    let store = env.open_native("partitions");
    store.put(Partition::Native, b"k", b"native").unwrap();
    store.put(Partition::LocalOnly, b"k", b"local").unwrap();
    assert_eq!(store.get(Partition::Native, b"k").unwrap(), b"native");
    assert_eq!(store.get(Partition::LocalOnly, b"k").unwrap(), b"local");
    store.delete(Partition::Native, b"k").unwrap();
    assert!(matches!(
        store.get(Partition::Native, b"k"),
        Err(CoreError::NotFound { .. })
    ));
    assert_eq!(store.get(Partition::LocalOnly, b"k").unwrap(), b"local");
}

#[test]
fn prefix_listing() {
    let env = TestEnv::new();
    let store = env.open_native("prefix");
    store
        .put_batch(
            Partition::Native,
            entries_of(&[("user:2", "b"), ("user:1", "a"), ("group:1", "g")]),
        )
        .unwrap();
    assert_eq!(
        store.get_entries(Partition::Native, b"user:").unwrap(),
        entries_of(&[("user:1", "a"), ("user:2", "b")])
    );
    assert!(matches!(
        store.get_entries(Partition::Native, b"none:"),
        Err(CoreError::NotFound { .. })
    ));
}

#[test]
fn data_survives_reopen() {
    let env = TestEnv::new();
    {
        let store = env.open_native("durable");
        store.put(Partition::Native, b"n", b"1").unwrap();
        store.put(Partition::LocalOnly, b"l", b"2").unwrap();
        store.start_transaction().unwrap();
        store.put(Partition::Native, b"t", b"3").unwrap();
        store.commit().unwrap();
        env.manager.close(&store).unwrap();
    }
    let store = env.open_native("durable");
    assert_eq!(contents(&store, Partition::Native), vec![
        ("n".to_owned(), "1".to_owned()),
        ("t".to_owned(), "3".to_owned()),
    ]);
    assert_eq!(store.get(Partition::LocalOnly, b"l").unwrap(), b"2");
}

#[test]
fn encrypted_store_needs_its_password() {
    let env = TestEnv::new();
    {
        let store = env.open_encrypted("secret", "hunter2");
        store.put(Partition::Native, b"k", b"v").unwrap();
    }
    let wrong = env
        .manager
        .open("secret", StoreConfig::new().encrypted(password_of("nope")))
        .unwrap_err();
    assert_eq!(wrong.status(), DbStatus::InvalidPasswordOrCorrupted);
    let plain = env.manager.open("secret", StoreConfig::new()).unwrap_err();
    assert_eq!(plain.status(), DbStatus::InvalidPasswordOrCorrupted);

    let store = env.open_encrypted("secret", "hunter2");
    assert_eq!(store.get(Partition::Native, b"k").unwrap(), b"v");
}

#[test]
fn schema_is_recorded_at_creation() {
    let env = TestEnv::new();
    {
        let store = env.open("schema", StoreConfig::new().schema("{\"v\":1}"));
        assert_eq!(store.schema().unwrap().as_deref(), Some("{\"v\":1}"));
    }
    let store = env.open("schema", StoreConfig::new().schema("{\"v\":2}"));
    assert_eq!(store.schema().unwrap().as_deref(), Some("{\"v\":1}"));
}

#[test]
fn result_sets_iterate_lazily() {
    let env = TestEnv::new();
    let store = env.open_native("sets");
    store
        .put_batch(Partition::Native, entries_of(&[("a1", "x"), ("a2", "y"), ("b", "z")]))
        .unwrap();
    let mut set = store.open_result_set(Partition::Native, b"a").unwrap();
    assert_eq!(set.len(), 2);
    store.put(Partition::Native, b"a3", b"late").unwrap();
    let first = set.next().unwrap().unwrap();
    assert_eq!(first, Entry::new(b"a1".to_vec(), b"x".to_vec()));
    assert_eq!(set.position(), 1);
    let rest: Vec<Entry> = set.by_ref().map(Result::unwrap).collect();
    assert_eq!(rest, entries_of(&[("a2", "y")]));
    assert!(set.next().is_none());
    set.close();

    assert!(matches!(
        store.open_result_set(Partition::Native, b"zz"),
        Err(CoreError::NotFound { .. })
    ));
}

#[test]
fn result_set_limits() {
    let env = TestEnv::new();
    let store = env.open_native("set_limits");
    store.put(Partition::Native, b"k", b"v").unwrap();
    let sets: Vec<_> = (0..4)
        .map(|_| store.open_result_set(Partition::Native, b"").unwrap())
        .collect();
    assert!(matches!(
        store.open_result_set(Partition::Native, b""),
        Err(CoreError::OverMaxLimits { .. })
    ));
    drop(sets);

    let held = store.open_result_set(Partition::Native, b"").unwrap();
    store.start_transaction().unwrap();
    assert!(matches!(
        store.open_result_set(Partition::Native, b""),
        Err(CoreError::Busy { .. })
    ));
    let values: Vec<Entry> = held.map(Result::unwrap).collect();
    assert_eq!(values.len(), 1);
    store.rollback().unwrap();
}

#[test]
fn memory_stores() {
    let env = TestEnv::new();
    let store = env.open_memory("mem");
    store.put(Partition::Native, b"k", b"v").unwrap();
    assert_eq!(store.get(Partition::Native, b"k").unwrap(), b"v");
    assert!(store.path().unwrap().is_none());
    let err = store
        .export(env.file_path("mem.bak"), &CipherPassword::none())
        .unwrap_err();
    assert_eq!(err.status(), DbStatus::NotSupport);
    assert_eq!(
        store.rekey(&password_of("x")).unwrap_err().status(),
        DbStatus::NotSupport
    );
    let encrypted = env
        .manager
        .open("mem2", StoreConfig::new().memory(true).encrypted(password_of("x")))
        .unwrap_err();
    assert_eq!(encrypted.status(), DbStatus::NotSupport);
}

#[test]
fn local_only_store_basics() {
    let env = TestEnv::new();
    let store = env.open_local("local");
    store.put(Partition::LocalOnly, b"k", b"v").unwrap();
    assert_eq!(store.get(Partition::LocalOnly, b"k").unwrap(), b"v");
    assert_eq!(store.kind(), distdb_core::StoreKind::SingleVersion);
    assert!(matches!(store.sync_access(), Err(CoreError::NotSupported { .. })));
}

#[test]
fn overwritten_key_keeps_disk_usage_bounded() {
    let env = TestEnv::new();
    let store = env.open_native("overwritten");
    let value = vec![7u8; 1024];
    for _ in 0..4000 {
        store.put(Partition::Native, b"k", value.clone()).unwrap();
    }
    let bound = 4 * COMPACTION_MIN_SIZE;
    let size = env.manager.store_disk_size("overwritten").unwrap();
    assert!(size < bound, "size was {size} while open");
    env.manager.close(&store).unwrap();

    let store = env.open_native("overwritten");
    let size = env.manager.store_disk_size("overwritten").unwrap();
    assert!(size < bound, "size was {size} after reopen");
    assert_eq!(store.get(Partition::Native, b"k").unwrap(), value);
}

#[test]
fn disk_size_and_delete() {
    let env = TestEnv::new();
    let store = env.open_native("sized");
    store.put(Partition::Native, b"k", vec![7u8; 4096]).unwrap();
    let size = env.manager.store_disk_size("sized").unwrap();
    assert!(size >= 4096, "size was {size}");
    env.manager.close(&store).unwrap();
    env.manager.delete_store("sized").unwrap();
    assert_eq!(
        env.manager.delete_store("sized").unwrap_err().status(),
        DbStatus::NotFound
    );
}
