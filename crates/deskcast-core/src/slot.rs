//! Hot-swappable publisher handle.

use std::sync::Arc;

use parking_lot::Mutex;

/// Mutex-guarded, swappable handle to the active publisher session of
/// one target.
///
/// At most one handle is live at a time, and a non-empty slot always
/// refers to a session that has not been torn down: teardown first
/// [`take`]s the handle out, then closes the session it got back.
/// There is one writer per target (the orchestrator's start/stop
/// operations, serialized by this mutex); the frame pump only reads
/// through [`with`], which holds the lock for the whole closure so a
/// concurrent swap cannot invalidate the session mid-use.
///
/// [`take`]: Self::take
/// [`with`]: Self::with
pub struct PublisherSlot<S> {
    inner: Mutex<Option<Arc<S>>>,
}

impl<S> PublisherSlot<S> {
    /// Create an empty slot.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    /// Install a new session, returning the replaced one (if any) for
    /// the caller to close.
    pub fn install(&self, session: Arc<S>) -> Option<Arc<S>> {
        self.inner.lock().replace(session)
    }

    /// Clear the slot, returning the previous session (if any) for the
    /// caller to close.
    pub fn take(&self) -> Option<Arc<S>> {
        self.inner.lock().take()
    }

    /// Run `f` against the live session with the lock held for the
    /// full call. Returns `None` when the slot is empty.
    pub fn with<R>(&self, f: impl FnOnce(&S) -> R) -> Option<R> {
        self.inner.lock().as_deref().map(f)
    }

    /// Whether no session is installed.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_none()
    }
}

impl<S> Default for PublisherSlot<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::thread;

    #[derive(Default)]
    struct FakeSession {
        closed: AtomicBool,
    }

    impl FakeSession {
        fn close(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }

        fn is_closed(&self) -> bool {
            self.closed.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn install_returns_prior_handle() {
        let slot = PublisherSlot::new();
        assert!(slot.install(Arc::new(FakeSession::default())).is_none());
        let prior = slot.install(Arc::new(FakeSession::default()));
        assert!(prior.is_some());
        assert!(!slot.is_empty());
    }

    #[test]
    fn take_on_empty_slot_is_noop() {
        let slot: PublisherSlot<FakeSession> = PublisherSlot::new();
        assert!(slot.take().is_none());
        assert!(slot.is_empty());
    }

    #[test]
    fn with_sees_live_session_only() {
        let slot = PublisherSlot::new();
        assert_eq!(slot.with(|_s: &FakeSession| ()), None);

        slot.install(Arc::new(FakeSession::default()));
        assert_eq!(slot.with(|s| s.is_closed()), Some(false));
    }

    /// Two threads racing install/take never leave two live handles and
    /// never leak one: every installed session ends up closed, either by
    /// its replacer, the stopper, or the final sweep.
    #[test]
    fn concurrent_swap_never_leaks_sessions() {
        let slot = Arc::new(PublisherSlot::new());
        let created: Arc<Mutex<Vec<Arc<FakeSession>>>> = Arc::new(Mutex::new(Vec::new()));
        let closes = Arc::new(AtomicUsize::new(0));

        let starter = {
            let slot = Arc::clone(&slot);
            let created = Arc::clone(&created);
            let closes = Arc::clone(&closes);
            thread::spawn(move || {
                for _ in 0..200 {
                    let session = Arc::new(FakeSession::default());
                    created.lock().push(Arc::clone(&session));
                    if let Some(prev) = slot.install(session) {
                        prev.close();
                        closes.fetch_add(1, Ordering::SeqCst);
                    }
                }
            })
        };

        let stopper = {
            let slot = Arc::clone(&slot);
            let closes = Arc::clone(&closes);
            thread::spawn(move || {
                for _ in 0..200 {
                    if let Some(prev) = slot.take() {
                        prev.close();
                        closes.fetch_add(1, Ordering::SeqCst);
                    }
                    thread::yield_now();
                }
            })
        };

        starter.join().unwrap();
        stopper.join().unwrap();

        if let Some(last) = slot.take() {
            last.close();
            closes.fetch_add(1, Ordering::SeqCst);
        }

        let created = created.lock();
        assert_eq!(closes.load(Ordering::SeqCst), created.len());
        for session in created.iter() {
            assert!(session.is_closed());
        }
    }
}
