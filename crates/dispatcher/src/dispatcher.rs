//! EventDispatcher - per-name synchronous fan-out to subscriber callbacks

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use contracts::EventCallback;
use parking_lot::Mutex;
use tracing::{debug, error, trace};

use crate::metrics::DispatchMetrics;
use crate::subscription::Subscription;

/// Called with the name whose last subscriber just left
pub type IdleHook = Arc<dyn Fn(&str) + Send + Sync>;

struct Subscriber<E> {
    id: u64,
    active: Arc<AtomicBool>,
    callback: EventCallback<E>,
}

struct Inner<E> {
    topics: Mutex<HashMap<String, Vec<Arc<Subscriber<E>>>>>,
    next_id: AtomicU64,
    metrics: DispatchMetrics,
    idle_hook: Mutex<Option<IdleHook>>,
    /// Label used in logs and metrics ("feed" / "channel")
    label: &'static str,
}

/// Registration-ordered pub/sub keyed by feed or channel name
///
/// `dispatch` runs on the caller's task. The subscriber list is cloned
/// before iterating, so a callback may unsubscribe itself (or anyone else)
/// mid-dispatch; removed subscribers are skipped via their `active` flag.
pub struct EventDispatcher<E> {
    inner: Arc<Inner<E>>,
}

impl<E> Clone for EventDispatcher<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: 'static> EventDispatcher<E> {
    pub fn new(label: &'static str) -> Self {
        Self {
            inner: Arc::new(Inner {
                topics: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                metrics: DispatchMetrics::new(),
                idle_hook: Mutex::new(None),
                label,
            }),
        }
    }

    /// Install the hook fired when a name loses its last subscriber
    pub fn set_idle_hook(&self, hook: IdleHook) {
        *self.inner.idle_hook.lock() = Some(hook);
    }

    /// Register `callback` for `name`
    ///
    /// Callbacks for one name are invoked in registration order.
    pub fn subscribe(&self, name: &str, callback: EventCallback<E>) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(true));

        self.inner
            .topics
            .lock()
            .entry(name.to_string())
            .or_default()
            .push(Arc::new(Subscriber {
                id,
                active: Arc::clone(&active),
                callback,
            }));

        debug!(kind = self.inner.label, name, subscriber = id, "Subscribed");

        let weak: Weak<Inner<E>> = Arc::downgrade(&self.inner);
        let topic = name.to_string();
        Subscription::new(
            name.to_string(),
            active,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    remove_subscriber(&inner, &topic, id);
                }
            }),
        )
    }

    /// Deliver `event` to every active subscriber of `name`
    ///
    /// Returns the number of callbacks that completed without panicking.
    pub fn dispatch(&self, name: &str, event: &E) -> usize {
        let snapshot: Vec<Arc<Subscriber<E>>> = match self.inner.topics.lock().get(name) {
            Some(subs) => subs.clone(),
            None => Vec::new(),
        };

        let metrics = &self.inner.metrics;
        metrics.inc_event_count();
        if snapshot.is_empty() {
            metrics.inc_unobserved_count();
            trace!(kind = self.inner.label, name, "No subscribers");
            return 0;
        }

        let mut delivered = 0;
        for sub in snapshot {
            if !sub.active.load(Ordering::Acquire) {
                continue;
            }
            let callback = Arc::clone(&sub.callback);
            match catch_unwind(AssertUnwindSafe(|| callback(event))) {
                Ok(()) => {
                    delivered += 1;
                    metrics.inc_delivered_count();
                }
                Err(panic) => {
                    metrics.inc_panicked_count();
                    ::metrics::counter!("dispatch_panics_total", "kind" => self.inner.label)
                        .increment(1);
                    error!(
                        kind = self.inner.label,
                        name,
                        subscriber = sub.id,
                        panic = panic_message(&*panic),
                        "Subscriber panicked, continuing delivery"
                    );
                }
            }
        }
        delivered
    }

    /// Number of active subscribers for `name`
    pub fn subscriber_count(&self, name: &str) -> usize {
        self.inner
            .topics
            .lock()
            .get(name)
            .map(|subs| subs.len())
            .unwrap_or(0)
    }

    pub fn metrics(&self) -> &DispatchMetrics {
        &self.inner.metrics
    }
}

fn remove_subscriber<E>(inner: &Inner<E>, name: &str, id: u64) {
    let now_idle = {
        let mut topics = inner.topics.lock();
        let Some(subs) = topics.get_mut(name) else {
            return;
        };
        subs.retain(|sub| sub.id != id);
        if subs.is_empty() {
            topics.remove(name);
            true
        } else {
            false
        }
    };

    debug!(kind = inner.label, name, subscriber = id, "Unsubscribed");

    if now_idle {
        let hook = inner.idle_hook.lock().clone();
        if let Some(hook) = hook {
            hook(name);
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic>"
    }
}
