//! Observer that records what it is told.

use distdb_core::{ChangedData, Observer};
use parking_lot::Mutex;
use std::sync::Arc;

/// Collects every notification delivered to it.
#[derive(Default)]
pub struct ObserverRecorder {
    received: Mutex<Vec<ChangedData>>,
}

impl ObserverRecorder {
    /// Creates a recorder ready to register.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The recorder as a registrable observer.
    pub fn as_observer(self: &Arc<Self>) -> Arc<dyn Observer> {
        Arc::clone(self) as Arc<dyn Observer>
    }

    /// Everything received so far.
    pub fn notifications(&self) -> Vec<ChangedData> {
        self.received.lock().clone()
    }

    /// Number of notifications received.
    pub fn count(&self) -> usize {
        self.received.lock().len()
    }

    /// Removes and returns everything received so far.
    pub fn take(&self) -> Vec<ChangedData> {
        std::mem::take(&mut *self.received.lock())
    }

    /// Inserted keys with their final values.
    pub fn inserted_pairs(&self) -> Vec<(String, String)> {
        self.pairs(|data| data.inserted())
    }

    /// Updated keys with their final values.
    pub fn updated_pairs(&self) -> Vec<(String, String)> {
        self.pairs(|data| data.updated())
    }

    /// Deleted keys with the values they held.
    pub fn deleted_pairs(&self) -> Vec<(String, String)> {
        self.pairs(|data| data.deleted())
    }

    fn pairs(&self, pick: impl Fn(&ChangedData) -> &[distdb_core::Entry]) -> Vec<(String, String)> {
        self.received
            .lock()
            .iter()
            .flat_map(|data| {
                pick(data)
                    .iter()
                    .map(|e| {
                        (
                            String::from_utf8_lossy(&e.key).into_owned(),
                            String::from_utf8_lossy(&e.value).into_owned(),
                        )
                    })
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}

impl Observer for ObserverRecorder {
    fn on_change(&self, data: &ChangedData) {
        self.received.lock().push(data.clone());
    }
}
