//! Hierarchical cancellation scope for coordinating thread shutdown.
//!
//! Every background thread in this crate (controller read/write/housekeeping,
//! route eviction) waits on a scope in its `crossbeam_channel::select!` loop:
//!
//! ```ignore
//! select! {
//!     recv(queue) -> msg => { /* handle */ }
//!     recv(scope.closed()) -> _ => break,
//! }
//! ```
//!
//! Closing drops the only sender of the scope's signal channel, so every
//! receiver (and every clone of it) becomes ready at the same time. Closing a
//! scope closes all scopes forked from it.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crossbeam_channel::{Receiver, Sender};

/// Shared state behind a [`CancelScope`] handle
struct Inner {
    /// Sender half of the signal channel; `None` once closed
    signal: Mutex<Option<Sender<()>>>,
    /// Receiver half, never sent on; disconnects on close
    closed_rx: Receiver<()>,
    /// Scopes forked from this one
    children: Mutex<Vec<Weak<Inner>>>,
}

/// A cancellation scope that can be forked into child scopes.
///
/// Cloning a `CancelScope` yields another handle to the same scope.
#[derive(Clone)]
pub struct CancelScope {
    inner: Arc<Inner>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

impl CancelScope {
    /// Create a new open root scope.
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::bounded(0);
        CancelScope {
            inner: Arc::new(Inner {
                signal: Mutex::new(Some(tx)),
                closed_rx: rx,
                children: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Fork a child scope.
    ///
    /// The child closes when this scope closes. Forking an already closed
    /// scope returns a closed child.
    pub fn fork(&self) -> CancelScope {
        let child = CancelScope::new();

        let mut children = lock(&self.inner.children);
        if self.is_closed() {
            drop(children);
            child.close();
            return child;
        }
        children.retain(|c| c.strong_count() > 0);
        children.push(Arc::downgrade(&child.inner));

        child
    }

    /// Close this scope and every scope forked from it.
    ///
    /// Idempotent: closing twice is harmless.
    pub fn close(&self) {
        let signal = lock(&self.inner.signal).take();
        if signal.is_none() {
            return;
        }
        // Dropping the sender wakes every receiver at once
        drop(signal);

        let children = std::mem::take(&mut *lock(&self.inner.children));
        for child in children {
            if let Some(inner) = child.upgrade() {
                CancelScope { inner }.close();
            }
        }
    }

    /// Check whether the scope has been closed.
    pub fn is_closed(&self) -> bool {
        lock(&self.inner.signal).is_none()
    }

    /// Receiver that becomes ready (disconnected) when the scope closes.
    ///
    /// Intended for a `recv(scope.closed()) -> _` arm of `select!`.
    pub fn closed(&self) -> &Receiver<()> {
        &self.inner.closed_rx
    }

    /// Block the calling thread until the scope closes.
    pub fn wait(&self) {
        let _ = self.inner.closed_rx.recv();
    }
}

impl Default for CancelScope {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelScope")
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_new_scope_is_open() {
        let scope = CancelScope::new();
        assert!(!scope.is_closed());
        assert!(scope.closed().try_recv().is_err());
    }

    #[test]
    fn test_close_is_idempotent() {
        let scope = CancelScope::new();
        scope.close();
        scope.close();
        assert!(scope.is_closed());
    }

    #[test]
    fn test_close_propagates_to_children() {
        let root = CancelScope::new();
        let child = root.fork();
        let grandchild = child.fork();

        root.close();

        assert!(child.is_closed());
        assert!(grandchild.is_closed());
    }

    #[test]
    fn test_child_close_leaves_parent_open() {
        let root = CancelScope::new();
        let child = root.fork();

        child.close();

        assert!(child.is_closed());
        assert!(!root.is_closed());
    }

    #[test]
    fn test_fork_closed_scope_yields_closed_child() {
        let root = CancelScope::new();
        root.close();

        let child = root.fork();
        assert!(child.is_closed());
    }

    #[test]
    fn test_close_wakes_all_waiters() {
        let scope = CancelScope::new();

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let s = scope.clone();
                thread::spawn(move || s.wait())
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        scope.close();

        for w in waiters {
            w.join().unwrap();
        }
    }

    #[test]
    fn test_closed_usable_in_select() {
        let scope = CancelScope::new();
        let (_tx, rx) = crossbeam_channel::bounded::<u32>(1);

        let s = scope.clone();
        let handle = thread::spawn(move || {
            crossbeam_channel::select! {
                recv(rx) -> _ => false,
                recv(s.closed()) -> _ => true,
            }
        });

        scope.close();
        assert!(handle.join().unwrap());
    }
}
