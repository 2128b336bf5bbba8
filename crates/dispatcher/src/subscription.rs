//! Subscription - disposer returned by `EventDispatcher::subscribe`

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

type Remover = Box<dyn Fn() + Send + Sync>;

/// Handle to one registered callback
///
/// Dropping the handle does NOT unsubscribe; the subscription lives until
/// `unsubscribe` is called or the dispatcher is cleared.
#[must_use = "keep the Subscription to be able to unsubscribe"]
pub struct Subscription {
    name: String,
    active: Arc<AtomicBool>,
    remove: Remover,
}

impl Subscription {
    pub(crate) fn new(name: String, active: Arc<AtomicBool>, remove: Remover) -> Self {
        Self {
            name,
            active,
            remove,
        }
    }

    /// Feed or channel name this subscription belongs to
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Stop delivery to this callback
    ///
    /// Idempotent, and safe to call from inside the callback itself: the
    /// in-flight dispatch skips it from then on.
    pub fn unsubscribe(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            (self.remove)();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("name", &self.name)
            .field("active", &self.is_active())
            .finish()
    }
}
