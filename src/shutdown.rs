//! Cooperative cancellation for the capture thread and the monitor loop.
//!
//! A `ShutdownSignal` is a cloneable handle. Loops check `is_triggered()` at the
//! top of each iteration and sleep through `wait_timeout()`, which returns early
//! as soon as the signal fires. Child signals fire with their parent but can also
//! be fired on their own, so a component can stop its own thread without tearing
//! down the rest of the process.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

#[derive(Default)]
struct Inner {
    triggered: Mutex<bool>,
    wake: Condvar,
    children: Mutex<Vec<Weak<Inner>>>,
}

impl Inner {
    fn flag(&self) -> MutexGuard<'_, bool> {
        // The guarded value is a plain bool; a poisoned lock still holds a valid one.
        self.triggered.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn fire(&self) {
        {
            let mut triggered = self.flag();
            if *triggered {
                return;
            }
            *triggered = true;
        }
        self.wake.notify_all();
        let children: Vec<Arc<Inner>> = self
            .children
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .filter_map(|child| child.upgrade())
            .collect();
        for child in children {
            child.fire();
        }
    }
}

#[derive(Clone, Default)]
pub struct ShutdownSignal {
    inner: Arc<Inner>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal. Idempotent.
    pub fn trigger(&self) {
        self.inner.fire();
    }

    pub fn is_triggered(&self) -> bool {
        *self.inner.flag()
    }

    /// Sleep for up to `timeout`. Returns `true` if the signal fired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut triggered = self.inner.flag();
        while !*triggered {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            triggered = match self.inner.wake.wait_timeout(triggered, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        true
    }

    /// A signal that fires when this one fires, or when triggered directly.
    pub fn child(&self) -> ShutdownSignal {
        let child = ShutdownSignal::new();
        {
            let mut children = self.inner.children.lock().unwrap_or_else(|e| e.into_inner());
            children.retain(|weak| weak.strong_count() > 0);
            children.push(Arc::downgrade(&child.inner));
        }
        // Covers a parent that fired before the child was registered.
        if self.is_triggered() {
            child.trigger();
        }
        child
    }
}

impl std::fmt::Debug for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownSignal")
            .field("triggered", &self.is_triggered())
            .finish()
    }
}
