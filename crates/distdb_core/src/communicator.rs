//! Transport capability injected by the embedding process.
//!
//! The storage core never sends anything itself. A replication layer built on
//! top of it gets the transport from [`Manager::process_communicator`], which
//! returns whatever the application installed with
//! [`Manager::set_process_communicator`].
//!
//! [`Manager::process_communicator`]: crate::Manager::process_communicator
//! [`Manager::set_process_communicator`]: crate::Manager::set_process_communicator

use crate::error::CoreResult;
use std::fmt;
use std::sync::Arc;

/// Identifier of a device on the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(pub String);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

/// A device appearing on or leaving the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceChange {
    /// The device.
    pub device: DeviceId,
    /// True when it came online.
    pub online: bool,
}

/// Called with the sender and payload of each received message.
pub type ReceiveCallback = Arc<dyn Fn(&DeviceId, &[u8]) + Send + Sync>;

/// Called whenever a device comes online or goes offline.
pub type DeviceChangeCallback = Arc<dyn Fn(&DeviceChange) + Send + Sync>;

/// Message transport between devices running the same application.
pub trait ProcessCommunicator: Send + Sync {
    /// Starts the transport under `label`.
    fn start(&self, label: &str) -> CoreResult<()>;

    /// Stops the transport.
    fn stop(&self) -> CoreResult<()>;

    /// Sends one message to `dest`.
    fn send(&self, dest: &DeviceId, data: &[u8]) -> CoreResult<()>;

    /// Installs the receive callback, replacing any previous one.
    fn on_receive(&self, callback: Option<ReceiveCallback>) -> CoreResult<()>;

    /// Installs the device change callback, replacing any previous one.
    fn on_device_change(&self, callback: Option<DeviceChangeCallback>) -> CoreResult<()>;

    /// This device.
    fn local_device_id(&self) -> CoreResult<DeviceId>;

    /// Devices currently reachable.
    fn list_online_devices(&self) -> Vec<DeviceId>;

    /// Largest message accepted for `dest`, or for any device when `None`.
    fn mtu(&self, dest: Option<&DeviceId>) -> u32;

    /// True when the peer runs the transport under `label`.
    fn is_peer_running(&self, label: &str, dest: &DeviceId) -> bool;
}
