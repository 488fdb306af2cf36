//! Cross-thread marshalling onto the single logic thread.
//!
//! Socket I/O tasks never touch match state directly. They push deferred
//! actions through a [`DispatchHandle`]; the logic thread owns the
//! [`DispatchQueue`] and calls [`DispatchQueue::drain`] once per tick.
//! Actions run in enqueue order, and a panicking action is logged without
//! stopping the rest of the pass.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

use tokio::sync::mpsc;

type Action = Box<dyn FnOnce() + Send + 'static>;

/// Cloneable producer side of the dispatch queue.
#[derive(Clone)]
pub struct DispatchHandle {
    tx: mpsc::UnboundedSender<Action>,
}

impl DispatchHandle {
    /// Queue `action` for the logic thread.
    ///
    /// Returns `false` if the queue has been dropped.
    pub fn enqueue<F>(&self, action: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if self.tx.send(Box::new(action)).is_err() {
            tracing::debug!("Dispatch queue closed, dropping action");
            return false;
        }
        true
    }
}

/// Single-consumer FIFO of deferred actions, owned by the logic thread.
pub struct DispatchQueue {
    tx: mpsc::UnboundedSender<Action>,
    rx: mpsc::UnboundedReceiver<Action>,
}

impl DispatchQueue {
    /// Create an empty queue.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    /// Return a producer handle.
    pub fn handle(&self) -> DispatchHandle {
        DispatchHandle {
            tx: self.tx.clone(),
        }
    }

    /// Run every action queued so far. Returns how many ran.
    ///
    /// Actions enqueued while draining run in the same pass.
    pub fn drain(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(action) = self.rx.try_recv() {
            ran += 1;
            if let Err(payload) = catch_unwind(AssertUnwindSafe(action)) {
                tracing::error!("Dispatched action panicked: {}", panic_message(&*payload));
            }
        }
        if ran > 0 {
            tracing::trace!("Drained {ran} dispatched actions");
        }
        ran
    }
}

impl Default for DispatchQueue {
    fn default() -> Self {
        Self::new()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
