//! Change notification hub.
//!
//! Observers subscribe to one partition (through an [`ObserverMode`]) and either
//! one key or all keys. Each commit is reduced to its net effect per key before
//! it reaches the hub, so a key inserted and then updated inside one
//! transaction shows up once as an insert with its final value, and a key
//! inserted and then deleted does not show up at all.
//!
//! ```rust,ignore
//! let observer: Arc<dyn Observer> = Arc::new(|data: &ChangedData| {
//!     for entry in data.inserted() {
//!         println!("inserted {:?}", entry.key);
//!     }
//! });
//! delegate.register_observer(KeyFilter::AllKeys, ObserverMode::NativeOnly, observer)?;
//! ```

use crate::error::{CoreError, CoreResult};
use crate::types::{Entry, HandleId, Partition, SequenceNumber, MAX_KEY_SIZE};
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::debug;

/// Net effect of a commit on one key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    /// The key did not exist before the commit.
    Insert,
    /// The key existed and holds a new value.
    Update,
    /// The key existed and was removed.
    Delete,
}

/// One key's net change. Deletes carry the value the key held before.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    /// Partition of the key.
    pub partition: Partition,
    /// Kind of change.
    pub change_type: ChangeType,
    /// Key with its new (insert, update) or previous (delete) value.
    pub entry: Entry,
}

/// Everything one commit changed, in key order per partition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Commit sequence number.
    pub sequence: SequenceNumber,
    /// Net changes.
    pub changes: Vec<Change>,
}

impl ChangeSet {
    /// True when the commit changed nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Which partition a subscription follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObserverMode {
    /// Changes to the native partition.
    NativeOnly,
    /// Changes to the local-only partition.
    LocalOnly,
}

impl ObserverMode {
    /// The partition this mode follows.
    #[must_use]
    pub const fn partition(self) -> Partition {
        match self {
            Self::NativeOnly => Partition::Native,
            Self::LocalOnly => Partition::LocalOnly,
        }
    }
}

/// Keys a subscription follows.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyFilter {
    /// Every key.
    AllKeys,
    /// One exact key.
    Key(Vec<u8>),
}

impl KeyFilter {
    /// Filter for `key`; an empty key means all keys.
    pub fn from_key(key: impl Into<Vec<u8>>) -> Self {
        let key = key.into();
        if key.is_empty() {
            Self::AllKeys
        } else {
            Self::Key(key)
        }
    }

    fn matches(&self, key: &[u8]) -> bool {
        match self {
            Self::AllKeys => true,
            Self::Key(k) => k == key,
        }
    }
}

/// One coalesced notification: what a commit did to the keys a subscription
/// follows, grouped by kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedData {
    mode: ObserverMode,
    sequence: SequenceNumber,
    inserted: Vec<Entry>,
    updated: Vec<Entry>,
    deleted: Vec<Entry>,
}

impl ChangedData {
    /// Mode of the receiving subscription.
    #[must_use]
    pub fn mode(&self) -> ObserverMode {
        self.mode
    }

    /// Commit that produced the notification.
    #[must_use]
    pub fn sequence(&self) -> SequenceNumber {
        self.sequence
    }

    /// Keys that did not exist before, with their final values.
    #[must_use]
    pub fn inserted(&self) -> &[Entry] {
        &self.inserted
    }

    /// Pre-existing keys with their final values.
    #[must_use]
    pub fn updated(&self) -> &[Entry] {
        &self.updated
    }

    /// Removed keys with the values they held.
    #[must_use]
    pub fn deleted(&self) -> &[Entry] {
        &self.deleted
    }

    /// True when no list holds anything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// Receives change notifications.
///
/// Called on the committing thread after the commit is durable and before the
/// commit call returns. No store lock is held during the call.
pub trait Observer: Send + Sync {
    /// Handles one notification.
    fn on_change(&self, data: &ChangedData);
}

impl<F> Observer for F
where
    F: Fn(&ChangedData) + Send + Sync,
{
    fn on_change(&self, data: &ChangedData) {
        self(data);
    }
}

struct Subscription {
    owner: HandleId,
    mode: ObserverMode,
    filter: KeyFilter,
    observer: Arc<dyn Observer>,
}

fn same_observer(a: &Arc<dyn Observer>, b: &Arc<dyn Observer>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Subscriptions of one store.
#[derive(Default)]
pub struct NotificationHub {
    subscriptions: RwLock<Vec<Subscription>>,
}

impl NotificationHub {
    /// Creates an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a subscription owned by handle `owner`. One observer may be
    /// registered once per handle.
    pub fn register(
        &self,
        owner: HandleId,
        mode: ObserverMode,
        filter: KeyFilter,
        observer: Arc<dyn Observer>,
    ) -> CoreResult<()> {
        let filter = match filter {
            KeyFilter::Key(key) if key.len() > MAX_KEY_SIZE => {
                return Err(CoreError::invalid_args(format!(
                    "observer key is {} bytes, limit is {MAX_KEY_SIZE}",
                    key.len()
                )))
            }
            KeyFilter::Key(key) => KeyFilter::from_key(key),
            KeyFilter::AllKeys => KeyFilter::AllKeys,
        };
        let mut subscriptions = self.subscriptions.write();
        if subscriptions
            .iter()
            .any(|s| s.owner == owner && same_observer(&s.observer, &observer))
        {
            return Err(CoreError::invalid_operation("observer already registered on this handle"));
        }
        subscriptions.push(Subscription {
            owner,
            mode,
            filter,
            observer,
        });
        debug!(%owner, ?mode, total = subscriptions.len(), "observer registered");
        Ok(())
    }

    /// Removes the subscription of `observer` made by `owner`.
    pub fn unregister(&self, owner: HandleId, observer: &Arc<dyn Observer>) -> CoreResult<()> {
        let mut subscriptions = self.subscriptions.write();
        let before = subscriptions.len();
        subscriptions.retain(|s| !(s.owner == owner && same_observer(&s.observer, observer)));
        if subscriptions.len() == before {
            return Err(CoreError::not_found("observer subscription"));
        }
        Ok(())
    }

    /// Drops every subscription owned by `owner`, returning how many.
    pub fn remove_owner(&self, owner: HandleId) -> usize {
        let mut subscriptions = self.subscriptions.write();
        let before = subscriptions.len();
        subscriptions.retain(|s| s.owner != owner);
        before - subscriptions.len()
    }

    /// Number of subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// True when nobody is subscribed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subscriptions.read().is_empty()
    }

    /// Delivers `changes` to every matching subscription, at most one
    /// notification per subscription.
    pub fn dispatch(&self, changes: &ChangeSet) {
        if changes.is_empty() {
            return;
        }
        let targets: Vec<(ObserverMode, KeyFilter, Arc<dyn Observer>)> = self
            .subscriptions
            .read()
            .iter()
            .map(|s| (s.mode, s.filter.clone(), Arc::clone(&s.observer)))
            .collect();
        for (mode, filter, observer) in targets {
            let mut data = ChangedData {
                mode,
                sequence: changes.sequence,
                inserted: Vec::new(),
                updated: Vec::new(),
                deleted: Vec::new(),
            };
            for change in &changes.changes {
                if change.partition != mode.partition() || !filter.matches(&change.entry.key) {
                    continue;
                }
                let list = match change.change_type {
                    ChangeType::Insert => &mut data.inserted,
                    ChangeType::Update => &mut data.updated,
                    ChangeType::Delete => &mut data.deleted,
                };
                list.push(change.entry.clone());
            }
            if !data.is_empty() {
                observer.on_change(&data);
            }
        }
    }
}

impl std::fmt::Debug for NotificationHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationHub")
            .field("subscriptions", &self.len())
            .finish()
    }
}
