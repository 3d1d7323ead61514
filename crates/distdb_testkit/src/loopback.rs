//! In-process transport connecting communicators of one test.
//!
//! Every [`LoopbackCommunicator`] created from the same [`LoopbackNetwork`]
//! can reach the others once started. Messages are delivered synchronously
//! on the sending thread.

use distdb_core::{
    CoreError, CoreResult, DeviceChange, DeviceChangeCallback, DeviceId, ProcessCommunicator,
    ReceiveCallback,
};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Default message size limit.
pub const LOOPBACK_MTU: u32 = 5 * 1024 * 1024;

#[derive(Default)]
struct Node {
    label: Option<String>,
    receive: Option<ReceiveCallback>,
    device_change: Option<DeviceChangeCallback>,
}

/// The shared medium.
#[derive(Clone, Default)]
pub struct LoopbackNetwork {
    nodes: Arc<Mutex<BTreeMap<DeviceId, Node>>>,
}

impl LoopbackNetwork {
    /// Creates an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a device; it stays offline until started.
    pub fn join(&self, id: &str) -> Arc<LoopbackCommunicator> {
        let device = DeviceId::from(id);
        self.nodes.lock().entry(device.clone()).or_default();
        Arc::new(LoopbackCommunicator {
            network: self.clone(),
            device,
            mtu: LOOPBACK_MTU,
        })
    }

    /// Announces a device going online or offline to every other started
    /// device.
    fn announce(&self, change: &DeviceChange) {
        let targets: Vec<DeviceChangeCallback> = self
            .nodes
            .lock()
            .iter()
            .filter(|(id, node)| **id != change.device && node.label.is_some())
            .filter_map(|(_, node)| node.device_change.clone())
            .collect();
        for callback in targets {
            callback(change);
        }
    }
}

/// One device on a [`LoopbackNetwork`].
pub struct LoopbackCommunicator {
    network: LoopbackNetwork,
    device: DeviceId,
    mtu: u32,
}

impl LoopbackCommunicator {
    fn with_node<T>(&self, f: impl FnOnce(&mut Node) -> T) -> T {
        let mut nodes = self.network.nodes.lock();
        f(nodes.entry(self.device.clone()).or_default())
    }

    fn is_started(&self) -> bool {
        self.with_node(|node| node.label.is_some())
    }
}

impl ProcessCommunicator for LoopbackCommunicator {
    fn start(&self, label: &str) -> CoreResult<()> {
        if label.is_empty() {
            return Err(CoreError::invalid_args("empty process label"));
        }
        let was_started = self.with_node(|node| node.label.replace(label.to_owned()).is_some());
        if !was_started {
            self.network.announce(&DeviceChange {
                device: self.device.clone(),
                online: true,
            });
        }
        Ok(())
    }

    fn stop(&self) -> CoreResult<()> {
        let was_started = self.with_node(|node| node.label.take().is_some());
        if was_started {
            self.network.announce(&DeviceChange {
                device: self.device.clone(),
                online: false,
            });
        }
        Ok(())
    }

    fn send(&self, dest: &DeviceId, data: &[u8]) -> CoreResult<()> {
        if !self.is_started() {
            return Err(CoreError::invalid_operation("communicator not started"));
        }
        if data.len() > self.mtu as usize {
            return Err(CoreError::over_max_limits(format!(
                "message of {} bytes exceeds mtu {}",
                data.len(),
                self.mtu
            )));
        }
        let callback = {
            let nodes = self.network.nodes.lock();
            match nodes.get(dest) {
                Some(node) if node.label.is_some() => node.receive.clone(),
                _ => return Err(CoreError::not_found(format!("device {dest}"))),
            }
        };
        if let Some(callback) = callback {
            callback(&self.device, data);
        }
        Ok(())
    }

    fn on_receive(&self, callback: Option<ReceiveCallback>) -> CoreResult<()> {
        self.with_node(|node| node.receive = callback);
        Ok(())
    }

    fn on_device_change(&self, callback: Option<DeviceChangeCallback>) -> CoreResult<()> {
        self.with_node(|node| node.device_change = callback);
        Ok(())
    }

    fn local_device_id(&self) -> CoreResult<DeviceId> {
        Ok(self.device.clone())
    }

    fn list_online_devices(&self) -> Vec<DeviceId> {
        self.network
            .nodes
            .lock()
            .iter()
            .filter(|(id, node)| **id != self.device && node.label.is_some())
            .map(|(id, _)| id.clone())
            .collect()
    }

    fn mtu(&self, _dest: Option<&DeviceId>) -> u32 {
        self.mtu
    }

    fn is_peer_running(&self, label: &str, dest: &DeviceId) -> bool {
        self.network
            .nodes
            .lock()
            .get(dest)
            .is_some_and(|node| node.label.as_deref() == Some(label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_reach_started_peers() {
        let network = LoopbackNetwork::new();
        let a = network.join("a");
        let b = network.join("b");
        let inbox = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&inbox);
        b.on_receive(Some(Arc::new(move |from: &DeviceId, data: &[u8]| {
            sink.lock().push((from.clone(), data.to_vec()));
        })))
        .unwrap();

        a.start("sync").unwrap();
        assert!(matches!(
            a.send(&DeviceId::from("b"), b"hi"),
            Err(CoreError::NotFound { .. })
        ));
        b.start("sync").unwrap();
        a.send(&DeviceId::from("b"), b"hi").unwrap();
        assert_eq!(*inbox.lock(), vec![(DeviceId::from("a"), b"hi".to_vec())]);
        assert!(a.is_peer_running("sync", &DeviceId::from("b")));
        assert!(!a.is_peer_running("other", &DeviceId::from("b")));
    }

    #[test]
    fn device_changes_are_announced() {
        let network = LoopbackNetwork::new();
        let a = network.join("a");
        let b = network.join("b");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        a.on_device_change(Some(Arc::new(move |change: &DeviceChange| {
            sink.lock().push(change.clone());
        })))
        .unwrap();
        a.start("sync").unwrap();
        b.start("sync").unwrap();
        assert_eq!(a.list_online_devices(), vec![DeviceId::from("b")]);
        b.stop().unwrap();
        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert!(seen[0].online);
        assert!(!seen[1].online);
    }
}
