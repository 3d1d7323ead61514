//! Observer delivery and coalescing.

use distdb_core::{ChangedData, Observer};
use distdb_testkit::prelude::*;
use std::sync::Arc;

fn pair(k: &str, v: &str) -> (String, String) {
    (k.to_owned(), v.to_owned())
}

#[test]
fn insert_then_update_is_one_insert() {
    let env = TestEnv::new();
    let store = env.open_native("coalesce");
    let recorder = ObserverRecorder::new();
    store
        .register_observer(KeyFilter::from_key("k1"), ObserverMode::NativeOnly, recorder.as_observer())
        .unwrap();

    store.start_transaction().unwrap();
    store.put(Partition::Native, b"k1", b"v1").unwrap();
    store.put(Partition::Native, b"k1", b"v2").unwrap();
    assert_eq!(recorder.count(), 0);
    store.commit().unwrap();

    assert_eq!(recorder.count(), 1);
    assert_eq!(recorder.inserted_pairs(), vec![pair("k1", "v2")]);
    assert!(recorder.updated_pairs().is_empty());
}

#[test]
fn insert_then_delete_is_silent() {
    let env = TestEnv::new();
    let store = env.open_native("silent");
    let recorder = ObserverRecorder::new();
    store
        .register_observer(KeyFilter::AllKeys, ObserverMode::NativeOnly, recorder.as_observer())
        .unwrap();
    store.start_transaction().unwrap();
    store.put(Partition::Native, b"k", b"v").unwrap();
    store.delete(Partition::Native, b"k").unwrap();
    store.commit().unwrap();
    assert_eq!(recorder.count(), 0);
}

#[test]
fn update_and_delete_of_existing_keys() {
    let env = TestEnv::new();
    let store = env.open_native("existing");
    store
        .put_batch(Partition::Native, entries_of(&[("a", "1"), ("b", "2")]))
        .unwrap();
    let recorder = ObserverRecorder::new();
    store
        .register_observer(KeyFilter::AllKeys, ObserverMode::NativeOnly, recorder.as_observer())
        .unwrap();

    store.start_transaction().unwrap();
    store.put(Partition::Native, b"a", b"10").unwrap();
    store.put(Partition::Native, b"a", b"11").unwrap();
    store.delete(Partition::Native, b"b").unwrap();
    store.put(Partition::Native, b"c", b"3").unwrap();
    store.commit().unwrap();

    let notes = recorder.notifications();
    assert_eq!(notes.len(), 1);
    assert_eq!(recorder.inserted_pairs(), vec![pair("c", "3")]);
    assert_eq!(recorder.updated_pairs(), vec![pair("a", "11")]);
    assert_eq!(recorder.deleted_pairs(), vec![pair("b", "2")]);
    assert_eq!(notes[0].mode(), ObserverMode::NativeOnly);
}

#[test]
fn rollback_delivers_nothing() {
    let env = TestEnv::new();
    let store = env.open_native("rollback");
    let recorder = ObserverRecorder::new();
    store
        .register_observer(KeyFilter::AllKeys, ObserverMode::NativeOnly, recorder.as_observer())
        .unwrap();
    store.start_transaction().unwrap();
    store.put(Partition::Native, b"k", b"v").unwrap();
    store.rollback().unwrap();
    assert_eq!(recorder.count(), 0);
}

#[test]
fn single_writes_deliver_immediately() {
    let env = TestEnv::new();
    let store = env.open_native("immediate");
    let recorder = ObserverRecorder::new();
    store
        .register_observer(KeyFilter::AllKeys, ObserverMode::NativeOnly, recorder.as_observer())
        .unwrap();
    store.put(Partition::Native, b"k", b"1").unwrap();
    assert_eq!(recorder.count(), 1);
    store.put(Partition::Native, b"k", b"2").unwrap();
    store.delete(Partition::Native, b"k").unwrap();
    store.delete(Partition::Native, b"k").unwrap();
    assert_eq!(recorder.count(), 3);
    assert_eq!(recorder.updated_pairs(), vec![pair("k", "2")]);
    assert_eq!(recorder.deleted_pairs(), vec![pair("k", "2")]);
}

#[test]
fn modes_follow_their_partition() {
    let env = TestEnv::new();
    let store = env.open_native("modes");
    let native = ObserverRecorder::new();
    let local = ObserverRecorder::new();
    store
        .register_observer(KeyFilter::AllKeys, ObserverMode::NativeOnly, native.as_observer())
        .unwrap();
    store
        .register_observer(KeyFilter::AllKeys, ObserverMode::LocalOnly, local.as_observer())
        .unwrap();
    store.put(Partition::LocalOnly, b"l", b"x").unwrap();
    store.put(Partition::Native, b"n", b"y").unwrap();
    assert_eq!(native.inserted_pairs(), vec![pair("n", "y")]);
    assert_eq!(local.inserted_pairs(), vec![pair("l", "x")]);
    assert_eq!(local.notifications()[0].mode(), ObserverMode::LocalOnly);
}

#[test]
fn key_filters_select_keys() {
    let env = TestEnv::new();
    let store = env.open_native("filters");
    let only_a = ObserverRecorder::new();
    let also_a = ObserverRecorder::new();
    store
        .register_observer(KeyFilter::from_key("a"), ObserverMode::NativeOnly, only_a.as_observer())
        .unwrap();
    store
        .register_observer(KeyFilter::from_key("a"), ObserverMode::NativeOnly, also_a.as_observer())
        .unwrap();
    store
        .put_batch(Partition::Native, entries_of(&[("a", "1"), ("ab", "2"), ("b", "3")]))
        .unwrap();
    assert_eq!(only_a.inserted_pairs(), vec![pair("a", "1")]);
    assert_eq!(also_a.inserted_pairs(), vec![pair("a", "1")]);
}

#[test]
fn other_handles_writes_are_delivered() {
    let env = TestEnv::new();
    let watcher = env.open_native("shared");
    let writer = env.open_native("shared");
    let recorder = ObserverRecorder::new();
    watcher
        .register_observer(KeyFilter::AllKeys, ObserverMode::NativeOnly, recorder.as_observer())
        .unwrap();
    writer.put(Partition::Native, b"k", b"v").unwrap();
    assert_eq!(recorder.inserted_pairs(), vec![pair("k", "v")]);
}

#[test]
fn registration_rules() {
    let env = TestEnv::new();
    let store = env.open_native("rules");
    let other = env.open_native("rules");
    let recorder = ObserverRecorder::new();
    let observer = recorder.as_observer();

    assert!(matches!(
        store.register_observer(
            KeyFilter::Key(vec![b'k'; 1025]),
            ObserverMode::NativeOnly,
            observer.clone()
        ),
        Err(CoreError::InvalidArgs { .. })
    ));
    store
        .register_observer(KeyFilter::AllKeys, ObserverMode::NativeOnly, observer.clone())
        .unwrap();
    let dup = store
        .register_observer(KeyFilter::AllKeys, ObserverMode::LocalOnly, observer.clone())
        .unwrap_err();
    assert_eq!(dup.status(), DbStatus::DbError);
    // The duplicate check is per handle.
    other
        .register_observer(KeyFilter::AllKeys, ObserverMode::LocalOnly, observer.clone())
        .unwrap();

    other.start_transaction().unwrap();
    let fresh = ObserverRecorder::new();
    assert!(matches!(
        store.register_observer(KeyFilter::AllKeys, ObserverMode::NativeOnly, fresh.as_observer()),
        Err(CoreError::Busy { .. })
    ));
    other.rollback().unwrap();

    other.unregister_observer(&observer).unwrap();
    assert!(matches!(
        other.unregister_observer(&observer),
        Err(CoreError::NotFound { .. })
    ));
    store.unregister_observer(&observer).unwrap();
    assert!(matches!(
        store.unregister_observer(&observer),
        Err(CoreError::NotFound { .. })
    ));
    store.put(Partition::Native, b"k", b"v").unwrap();
    assert_eq!(recorder.count(), 0);
}

#[test]
fn one_observer_through_two_handles() {
    let env = TestEnv::new();
    let first = env.open_native("shared_observer");
    let second = env.open_native("shared_observer");
    let recorder = ObserverRecorder::new();
    let observer = recorder.as_observer();
    first
        .register_observer(KeyFilter::AllKeys, ObserverMode::NativeOnly, observer.clone())
        .unwrap();
    second
        .register_observer(KeyFilter::Key(b"k".to_vec()), ObserverMode::NativeOnly, observer.clone())
        .unwrap();

    first.put(Partition::Native, b"k", b"v").unwrap();
    assert_eq!(recorder.count(), 2);
    first.put(Partition::Native, b"j", b"v").unwrap();
    assert_eq!(recorder.count(), 3);

    env.manager.close(&second).unwrap();
    first.put(Partition::Native, b"k", b"w").unwrap();
    assert_eq!(recorder.count(), 4);
}

#[test]
fn closure_observers_and_delivery_timing() {
    let env = TestEnv::new();
    let store = Arc::new(env.open_native("timing"));
    let reader = Arc::clone(&store);
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let observer: Arc<dyn Observer> = Arc::new(move |data: &ChangedData| {
        // Delivery happens after the commit is applied and with no lock held.
        let value = reader.get(Partition::Native, b"k").unwrap();
        sink.lock().push((data.inserted().len(), value));
    });
    store
        .register_observer(KeyFilter::AllKeys, ObserverMode::NativeOnly, observer)
        .unwrap();
    store.put(Partition::Native, b"k", b"v").unwrap();
    assert_eq!(*seen.lock(), vec![(1, b"v".to_vec())]);
}
