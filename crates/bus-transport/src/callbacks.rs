//! # Callback Manager
//!
//! Thread-safe in-process broadcaster. Listeners are registered with a token
//! and invoked synchronously, in registration order, on every `emit`.
//!
//! ## Broadcast discipline
//!
//! - `emit` iterates a copy of the listener list taken under the lock; the
//!   lock is never held while a listener runs, so a listener may register or
//!   unregister (itself or others) without deadlock.
//! - A listener registered during a broadcast does not see that broadcast.
//! - Once `unregister` returns, the listener is never invoked again, even by
//!   a broadcast already in flight.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Handle returned by `register`, used to unregister.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallbackToken(u64);

type Callback<T> = Box<dyn Fn(&T) + Send + Sync>;

struct Listener<T> {
    token: CallbackToken,
    active: AtomicBool,
    callback: Callback<T>,
}

/// Typed observer list.
pub struct CallbackManager<T> {
    next_token: AtomicU64,
    listeners: Mutex<Vec<Arc<Listener<T>>>>,
}

impl<T> CallbackManager<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_token: AtomicU64::new(1),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Add a listener.
    pub fn register<F>(&self, callback: F) -> CallbackToken
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let token = CallbackToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.listeners.lock().push(Arc::new(Listener {
            token,
            active: AtomicBool::new(true),
            callback: Box::new(callback),
        }));
        token
    }

    /// Remove a listener. Returns `false` if the token is unknown.
    pub fn unregister(&self, token: CallbackToken) -> bool {
        let removed = {
            let mut listeners = self.listeners.lock();
            listeners
                .iter()
                .position(|l| l.token == token)
                .map(|index| listeners.remove(index))
        };

        match removed {
            Some(listener) => {
                listener.active.store(false, Ordering::Release);
                true
            }
            None => false,
        }
    }

    /// Invoke every listener with `value`.
    pub fn emit(&self, value: &T) {
        let snapshot: Vec<Arc<Listener<T>>> = self.listeners.lock().clone();
        for listener in snapshot {
            if listener.active.load(Ordering::Acquire) {
                (listener.callback)(value);
            }
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for CallbackManager<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_emit_in_registration_order() {
        let manager = CallbackManager::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b"] {
            let seen = seen.clone();
            manager.register(move |value| seen.lock().push(format!("{}{}", tag, value)));
        }

        manager.emit(&1);
        assert_eq!(*seen.lock(), vec!["a1".to_string(), "b1".to_string()]);
    }

    #[test]
    fn test_unregister_unknown_token() {
        let manager = CallbackManager::<()>::new();
        let token = manager.register(|_| {});
        assert!(manager.unregister(token));
        assert!(!manager.unregister(token));
        assert!(manager.is_empty());
    }

    #[test]
    fn test_listener_unregisters_itself() {
        let manager = Arc::new(CallbackManager::<()>::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let token_slot: Arc<Mutex<Option<CallbackToken>>> = Arc::new(Mutex::new(None));

        let token = {
            let manager_ref = Arc::downgrade(&manager);
            let calls = calls.clone();
            let token_slot = token_slot.clone();
            manager.register(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                let token = *token_slot.lock();
                if let (Some(manager), Some(token)) = (manager_ref.upgrade(), token) {
                    manager.unregister(token);
                }
            })
        };
        *token_slot.lock() = Some(token);

        manager.emit(&());
        manager.emit(&());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(manager.is_empty());
    }

    #[test]
    fn test_listener_registered_during_broadcast_misses_it() {
        let manager = Arc::new(CallbackManager::<u32>::new());
        let late_calls = Arc::new(AtomicUsize::new(0));

        {
            let manager_ref = Arc::downgrade(&manager);
            let late_calls = late_calls.clone();
            manager.register(move |value| {
                if *value == 1 {
                    if let Some(manager) = manager_ref.upgrade() {
                        let late_calls = late_calls.clone();
                        manager.register(move |_| {
                            late_calls.fetch_add(1, Ordering::SeqCst);
                        });
                    }
                }
            });
        }

        manager.emit(&1);
        assert_eq!(late_calls.load(Ordering::SeqCst), 0);
        manager.emit(&2);
        assert_eq!(late_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unregistered_peer_not_invoked_by_inflight_broadcast() {
        let manager = Arc::new(CallbackManager::<()>::new());
        let second_calls = Arc::new(AtomicUsize::new(0));
        let second_token: Arc<Mutex<Option<CallbackToken>>> = Arc::new(Mutex::new(None));

        {
            let manager_ref = Arc::downgrade(&manager);
            let second_token = second_token.clone();
            manager.register(move |_| {
                let token = *second_token.lock();
                if let (Some(manager), Some(token)) = (manager_ref.upgrade(), token) {
                    manager.unregister(token);
                }
            });
        }
        {
            let second_calls = second_calls.clone();
            let token = manager.register(move |_| {
                second_calls.fetch_add(1, Ordering::SeqCst);
            });
            *second_token.lock() = Some(token);
        }

        manager.emit(&());
        assert_eq!(second_calls.load(Ordering::SeqCst), 0);
        assert_eq!(manager.len(), 1);
    }
}
