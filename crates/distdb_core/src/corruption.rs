//! Corruption reporting.

use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use tracing::error;

/// Which store failed an integrity check, and how.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptionInfo {
    /// Owning application.
    pub app_id: String,
    /// Owning user.
    pub user_id: String,
    /// Store identifier.
    pub store_id: String,
    /// Description of the failed check.
    pub message: String,
}

impl fmt::Display for CorruptionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}: {}",
            self.user_id, self.app_id, self.store_id, self.message
        )
    }
}

/// Callback invoked when a store is found corrupted.
///
/// The handler runs on the thread that hit the failure, with no store lock
/// held, so it may import a backup into the affected store.
pub type CorruptionHandler = Arc<dyn Fn(&CorruptionInfo) + Send + Sync>;

/// The manager's single handler slot, shared with every store it opens.
#[derive(Clone, Default)]
pub(crate) struct CorruptionSlot(Arc<RwLock<Option<CorruptionHandler>>>);

impl CorruptionSlot {
    /// Installs `handler`, replacing any previous one; `None` clears it.
    pub(crate) fn set(&self, handler: Option<CorruptionHandler>) {
        *self.0.write() = handler;
    }

    pub(crate) fn is_set(&self) -> bool {
        self.0.read().is_some()
    }

    /// Logs the failure and invokes the handler, if any.
    pub(crate) fn fire(&self, info: &CorruptionInfo) {
        error!(store = %info.store_id, message = %info.message, "store corrupted");
        let handler = self.0.read().clone();
        if let Some(handler) = handler {
            handler(info);
        }
    }
}

impl fmt::Debug for CorruptionSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CorruptionSlot").field(&self.is_set()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn info() -> CorruptionInfo {
        CorruptionInfo {
            app_id: "app".into(),
            user_id: "user".into(),
            store_id: "store".into(),
            message: "bad checksum".into(),
        }
    }

    #[test]
    fn last_handler_wins() {
        let slot = CorruptionSlot::default();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&first);
        slot.set(Some(Arc::new(move |_: &CorruptionInfo| {
            f.fetch_add(1, Ordering::SeqCst);
        })));
        let s = Arc::clone(&second);
        slot.set(Some(Arc::new(move |_: &CorruptionInfo| {
            s.fetch_add(1, Ordering::SeqCst);
        })));
        slot.fire(&info());
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);

        slot.set(None);
        slot.fire(&info());
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert!(!slot.is_set());
    }

    #[test]
    fn display_names_store() {
        assert_eq!(info().to_string(), "user/app/store: bad checksum");
    }
}
