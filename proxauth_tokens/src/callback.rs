//! Exactly-once delivery of callback results
//!
//! Identity and management SDKs commonly report results through callbacks
//! that may, through bugs or races, fire more than once. A [`Completion`]
//! forwards the first result to the paired [`Waiter`] and ignores the rest.

use std::{
    future::Future,
    pin::Pin,
    sync::Mutex,
    task::{Context, Poll},
};

use tokio::sync::oneshot;

/// Creates a linked completion and waiter
pub fn completion<T>() -> (Completion<T>, Waiter<T>) {
    let (tx, rx) = oneshot::channel();
    (
        Completion {
            tx: Mutex::new(Some(tx)),
        },
        Waiter { rx },
    )
}

/// The sending half of a callback result
#[derive(Debug)]
pub struct Completion<T> {
    tx: Mutex<Option<oneshot::Sender<T>>>,
}

impl<T> Completion<T> {
    /// Delivers `value` to the waiter
    ///
    /// Returns `false` if a value was already delivered or the waiter has
    /// gone away.
    pub fn complete(&self, value: T) -> bool {
        let tx = match self.tx.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        match tx {
            Some(tx) => tx.send(value).is_ok(),
            None => {
                tracing::warn!("callback completed more than once; ignoring later result");
                false
            }
        }
    }

    /// Whether a value has already been delivered
    pub fn is_completed(&self) -> bool {
        match self.tx.lock() {
            Ok(guard) => guard.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }
}

/// The receiving half of a callback result
///
/// Resolves to `None` if the [`Completion`] was dropped without delivering.
#[derive(Debug)]
pub struct Waiter<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> Future for Waiter<T> {
    type Output = Option<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(Result::ok)
    }
}
