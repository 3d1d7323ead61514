//! Synchronizer access, conflict reporting and the injected transport.

use distdb_core::{
    ConflictData, ConflictMask, ConflictNotifier, ConflictType, DeviceId, ProcessCommunicator,
};
use distdb_testkit::prelude::*;
use parking_lot::Mutex;
use std::sync::Arc;

fn conflict_sink() -> (Arc<Mutex<Vec<ConflictData>>>, Arc<dyn ConflictNotifier>) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let notifier: Arc<dyn ConflictNotifier> = Arc::new(move |conflict: &ConflictData| {
        sink.lock().push(conflict.clone());
    });
    (seen, notifier)
}

#[test]
fn remote_writes_report_native_conflicts() {
    let env = TestEnv::new();
    let store = env.open_native("sync_conflicts");
    let (seen, notifier) = conflict_sink();
    store
        .set_conflict_notifier(ConflictMask::of(&[ConflictType::NativeAll]), Some(notifier))
        .unwrap();
    let sync = store.sync_access().unwrap();

    // A fresh key and an identical value are not conflicts.
    sync.put(b"k", b"remote").unwrap();
    sync.put(b"k", b"remote").unwrap();
    assert!(seen.lock().is_empty());

    store.put(Partition::Native, b"k", b"local").unwrap();
    sync.put(b"k", b"remote2").unwrap();
    sync.delete(b"k").unwrap();
    sync.delete(b"k").unwrap();

    let seen = seen.lock();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].conflict_type, ConflictType::NativeAll);
    assert_eq!(seen[0].old_value.as_deref(), Some(&b"local"[..]));
    assert_eq!(seen[0].new_value.as_deref(), Some(&b"remote2"[..]));
    assert_eq!(seen[1].old_value.as_deref(), Some(&b"remote2"[..]));
    assert_eq!(seen[1].new_value, None);
    assert!(matches!(sync.get(b"k"), Err(CoreError::NotFound { .. })));
}

#[test]
fn sync_access_only_touches_native_partition() {
    let env = TestEnv::new();
    let store = env.open_native("sync_native");
    store.put(Partition::LocalOnly, b"k", b"local").unwrap();
    let sync = store.sync_access().unwrap();
    assert!(matches!(sync.get(b"k"), Err(CoreError::NotFound { .. })));
    sync.put(b"k", b"remote").unwrap();
    assert_eq!(store.get(Partition::Native, b"k").unwrap(), b"remote");
    assert_eq!(store.get(Partition::LocalOnly, b"k").unwrap(), b"local");
}

#[test]
fn masks_select_notifiers() {
    let env = TestEnv::new();
    let first = env.open_native("sync_masks");
    let second = env.open_native("sync_masks");
    let (native_seen, native) = conflict_sink();
    let (foreign_seen, foreign) = conflict_sink();
    first
        .set_conflict_notifier(ConflictMask::of(&[ConflictType::NativeAll]), Some(native))
        .unwrap();
    second
        .set_conflict_notifier(
            ConflictMask::of(&[ConflictType::ForeignKeyOnly, ConflictType::ForeignKeyOrigin]),
            Some(foreign),
        )
        .unwrap();

    let sync = first.sync_access().unwrap();
    let conflict = ConflictData {
        conflict_type: ConflictType::ForeignKeyOrigin,
        key: b"k".to_vec(),
        old_value: Some(b"a".to_vec()),
        new_value: Some(b"b".to_vec()),
    };
    assert_eq!(sync.report_conflict(&conflict), 1);
    assert_eq!(*foreign_seen.lock(), vec![conflict]);
    assert!(native_seen.lock().is_empty());

    second.set_conflict_notifier(ConflictMask::ALL, None).unwrap();
    let conflict = ConflictData {
        conflict_type: ConflictType::ForeignKeyOnly,
        key: b"k".to_vec(),
        old_value: None,
        new_value: Some(b"b".to_vec()),
    };
    assert_eq!(sync.report_conflict(&conflict), 0);
}

#[test]
fn closed_handle_stops_conflicts_and_access() {
    let env = TestEnv::new();
    let keeper = env.open_native("sync_closed");
    let store = env.open_native("sync_closed");
    let (seen, notifier) = conflict_sink();
    store
        .set_conflict_notifier(ConflictMask::ALL, Some(notifier))
        .unwrap();
    let sync = store.sync_access().unwrap();
    env.manager.close(&store).unwrap();

    assert!(sync.get(b"k").is_err());
    let remote = keeper.sync_access().unwrap();
    keeper.put(Partition::Native, b"k", b"local").unwrap();
    remote.put(b"k", b"remote").unwrap();
    assert!(seen.lock().is_empty());
}

#[test]
fn sync_access_does_not_hold_the_store_open() {
    let env = TestEnv::new();
    let store = env.open_native("sync_dropped");
    store.put(Partition::Native, b"k", b"v").unwrap();
    let sync = store.sync_access().unwrap();
    drop(store);

    let reopened = env.open_native("sync_dropped");
    assert!(matches!(sync.get(b"k"), Err(CoreError::HandleClosed)));
    assert!(matches!(sync.put(b"k", b"w"), Err(CoreError::HandleClosed)));
    assert_eq!(reopened.get(Partition::Native, b"k").unwrap(), b"v");
}

#[test]
fn sync_writes_respect_other_transactions() {
    let env = TestEnv::new();
    let owner = env.open_native("sync_busy");
    let other = env.open_native("sync_busy");
    let sync = other.sync_access().unwrap();
    owner.start_transaction().unwrap();
    assert!(matches!(sync.put(b"k", b"v"), Err(CoreError::Busy { .. })));
    owner.rollback().unwrap();
    sync.put(b"k", b"v").unwrap();
}

#[test]
fn manager_holds_the_injected_transport() {
    let env = TestEnv::new();
    assert!(env.manager.process_communicator().is_none());

    let network = LoopbackNetwork::new();
    let local = network.join("phone");
    let peer = network.join("laptop");
    env.manager
        .set_process_communicator(Some(local as Arc<dyn ProcessCommunicator>));

    let inbox = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&inbox);
    peer.on_receive(Some(Arc::new(move |from: &DeviceId, data: &[u8]| {
        sink.lock().push((from.clone(), data.to_vec()));
    })))
    .unwrap();
    peer.start("distdb").unwrap();

    let transport = env.manager.process_communicator().unwrap();
    transport.start("distdb").unwrap();
    assert_eq!(transport.local_device_id().unwrap(), DeviceId::from("phone"));
    assert_eq!(transport.list_online_devices(), vec![DeviceId::from("laptop")]);
    assert!(transport.is_peer_running("distdb", &DeviceId::from("laptop")));
    transport.send(&DeviceId::from("laptop"), b"hello").unwrap();
    assert_eq!(*inbox.lock(), vec![(DeviceId::from("phone"), b"hello".to_vec())]);

    // Clones of the manager share the transport.
    let shared = env.manager.clone();
    assert!(shared.process_communicator().is_some());
    env.manager.set_process_communicator(None);
    assert!(shared.process_communicator().is_none());
}
