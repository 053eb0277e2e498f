//! Process shutdown coordination and per-session cancellation.
//!
//! [`ShutdownCoordinator`] is created once by the front-end and shared by
//! handle with every session; it turns N notify calls into exactly one
//! broadcast. [`StopSignal`] is the per-session analogue: a close-exactly-once
//! bit plus an awaitable signal, so teardown paths cannot double-close.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tracing::debug;

type Callback = Box<dyn FnOnce() + Send + 'static>;

/// Process-wide shutdown fan-out.
///
/// Guarantees: exactly one broadcast regardless of how many times
/// [`notify_shutdown`](Self::notify_shutdown) is called, and every waiter
/// observes it, including ones that subscribe after the broadcast.
pub struct ShutdownCoordinator {
    requested: AtomicBool,
    signal: watch::Sender<bool>,
    callbacks: Mutex<Vec<Callback>>,
    active_connections: AtomicUsize,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (signal, _) = watch::channel(false);
        Self {
            requested: AtomicBool::new(false),
            signal,
            callbacks: Mutex::new(Vec::new()),
            active_connections: AtomicUsize::new(0),
        }
    }

    /// Request shutdown. Idempotent: only the first call flips the flag,
    /// broadcasts on the signal, and fires the registered callbacks (each on
    /// its own thread, so a slow callback cannot stall the caller).
    pub fn notify_shutdown(&self) {
        if self
            .requested
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        debug!("shutdown requested, broadcasting");
        let _ = self.signal.send(true);

        let callbacks = std::mem::take(&mut *self.callbacks.lock().unwrap());
        for callback in callbacks {
            std::thread::spawn(callback);
        }
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Register a callback to run when shutdown is first requested. If
    /// shutdown has already happened the callback runs immediately.
    pub fn register_callback(&self, callback: impl FnOnce() + Send + 'static) {
        if self.is_shutdown_requested() {
            std::thread::spawn(callback);
            return;
        }
        self.callbacks.lock().unwrap().push(Box::new(callback));
    }

    /// A receiver for use in `select!` loops; check the value or use
    /// [`wait`](Self::wait).
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.signal.subscribe()
    }

    /// Complete when shutdown has been requested. Safe to call after the
    /// broadcast.
    pub async fn wait(&self) {
        let mut rx = self.signal.subscribe();
        // wait_for returns immediately when the current value already matches.
        let _ = rx.wait_for(|&requested| requested).await;
    }

    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }
}

/// A cloneable close-exactly-once stop signal for one session.
#[derive(Clone)]
pub struct StopSignal {
    inner: Arc<StopInner>,
}

struct StopInner {
    closed: AtomicBool,
    signal: watch::Sender<bool>,
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    pub fn new() -> Self {
        let (signal, _) = watch::channel(false);
        Self {
            inner: Arc::new(StopInner {
                closed: AtomicBool::new(false),
                signal,
            }),
        }
    }

    /// Close the signal. Returns true only for the call that actually closed
    /// it.
    pub fn close(&self) -> bool {
        let first = self
            .inner
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if first {
            let _ = self.inner.signal.send(true);
        }
        first
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Complete when the signal is closed. Safe to call after the close.
    pub async fn wait(&self) {
        let mut rx = self.inner.signal.subscribe();
        let _ = rx.wait_for(|&closed| closed).await;
    }
}
