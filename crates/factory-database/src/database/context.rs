//! Request-scoped cancellation, deadline and values.
//!
//! A [`QueryContext`] is an immutable value. Every `with_*` call derives a
//! new context and leaves the receiver untouched. Cancelling a context also
//! cancels every context derived from it, never the other way round.

use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::future;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

use super::error::ContextError;

struct CancelState {
    reason: Mutex<Option<ContextError>>,
    notify: watch::Sender<bool>,
    children: Mutex<Vec<Weak<CancelState>>>,
}

impl CancelState {
    fn new() -> Arc<Self> {
        let (notify, _) = watch::channel(false);
        Arc::new(Self {
            reason: Mutex::new(None),
            notify,
            children: Mutex::new(Vec::new()),
        })
    }

    fn child_of(parent: Option<&Arc<CancelState>>) -> Arc<Self> {
        let child = Self::new();
        if let Some(parent) = parent {
            parent.adopt(&child);
        }
        child
    }

    fn adopt(&self, child: &Arc<CancelState>) {
        let mut children = self.children.lock();
        if let Some(reason) = self.reason() {
            drop(children);
            child.cancel(reason);
            return;
        }
        children.retain(|c| c.strong_count() > 0);
        children.push(Arc::downgrade(child));
    }

    fn cancel(&self, reason: ContextError) {
        {
            let mut current = self.reason.lock();
            if current.is_some() {
                return;
            }
            *current = Some(reason);
        }
        self.notify.send_replace(true);

        let children = std::mem::take(&mut *self.children.lock());
        for child in children.iter().filter_map(Weak::upgrade) {
            child.cancel(reason);
        }
    }

    fn reason(&self) -> Option<ContextError> {
        *self.reason.lock()
    }

    async fn cancelled(&self) -> ContextError {
        let mut rx = self.notify.subscribe();
        loop {
            if let Some(reason) = self.reason() {
                return reason;
            }
            // the sender lives in `self`, so the channel cannot close here
            if rx.changed().await.is_err() {
                return future::pending().await;
            }
        }
    }
}

type Values = HashMap<&'static str, Arc<dyn Any + Send + Sync>>;

/// Cancellation and value carrier bound to a scoped handle.
#[derive(Clone, Default)]
pub struct QueryContext {
    cancel: Option<Arc<CancelState>>,
    deadline: Option<Instant>,
    values: Arc<Values>,
}

/// Cancels the context it was created with, and everything derived from it.
#[derive(Clone)]
pub struct CancelHandle {
    state: Arc<CancelState>,
}

impl CancelHandle {
    /// Cancel the associated context.
    pub fn cancel(&self) {
        self.state.cancel(ContextError::Canceled);
    }

    /// Check if cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.state.reason().is_some()
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl QueryContext {
    /// A context that is never cancelled and has no deadline or values.
    pub fn background() -> Self {
        Self::default()
    }

    /// Derive a cancellable child context.
    pub fn with_cancel(&self) -> (Self, CancelHandle) {
        let state = CancelState::child_of(self.cancel.as_ref());
        let child = Self {
            cancel: Some(state.clone()),
            deadline: self.deadline,
            values: self.values.clone(),
        };
        (child, CancelHandle { state })
    }

    /// Derive a child that expires at `deadline`, or at the parent's
    /// deadline if that is earlier.
    pub fn with_deadline(&self, deadline: Instant) -> (Self, CancelHandle) {
        let (mut child, handle) = self.with_cancel();
        child.deadline = Some(match self.deadline {
            Some(parent) => parent.min(deadline),
            None => deadline,
        });
        (child, handle)
    }

    /// Derive a child that expires after `timeout`.
    pub fn with_timeout(&self, timeout: Duration) -> (Self, CancelHandle) {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a child carrying `value` under `key`.
    pub fn with_value<T>(&self, key: &'static str, value: T) -> Self
    where
        T: Any + Send + Sync,
    {
        let mut values = (*self.values).clone();
        values.insert(key, Arc::new(value));
        Self {
            cancel: self.cancel.clone(),
            deadline: self.deadline,
            values: Arc::new(values),
        }
    }

    /// Look up a value of type `T` stored under `key`.
    pub fn value<T: Any>(&self, key: &str) -> Option<&T> {
        self.values.get(key)?.downcast_ref::<T>()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Why the context is done, or `None` while it is still live.
    pub fn err(&self) -> Option<ContextError> {
        if let Some(reason) = self.cancel.as_ref().and_then(|state| state.reason()) {
            return Some(reason);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Resolve once the context is cancelled or its deadline passes.
    ///
    /// Never resolves for a background context.
    pub async fn done(&self) -> ContextError {
        if let Some(reason) = self.err() {
            return reason;
        }

        let cancelled = async {
            match &self.cancel {
                Some(state) => state.cancelled().await,
                None => future::pending().await,
            }
        };
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => future::pending::<()>().await,
            }
        };

        tokio::select! {
            reason = cancelled => reason,
            _ = expired => ContextError::DeadlineExceeded,
        }
    }
}

impl fmt::Debug for QueryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.values.keys().collect();
        keys.sort();
        f.debug_struct("QueryContext")
            .field("err", &self.err())
            .field("deadline", &self.deadline)
            .field("values", &keys)
            .finish()
    }
}
