//! Operator cancellation

use tokio::sync::watch;

/// Fires a [`CancelToken`]; held by whatever watches for Ctrl-C
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<u64>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_modify(|presses| *presses += 1);
    }
}

/// Cloneable cancellation signal checked at every suspension point
///
/// The handle counts cancellations; a token fires once the count moves past
/// the value it was armed at.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<u64>,
    armed_at: u64,
}

impl CancelToken {
    /// A linked handle and token
    pub fn new() -> (CancelHandle, CancelToken) {
        let (tx, rx) = watch::channel(0);
        (CancelHandle { tx }, CancelToken { rx, armed_at: 0 })
    }

    /// A token that never fires
    pub fn never() -> Self {
        let (_handle, token) = Self::new();
        token
    }

    /// A token on the same handle that ignores cancellations made so far
    pub fn rearm(&self) -> Self {
        Self {
            rx: self.rx.clone(),
            armed_at: *self.rx.borrow(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow() > self.armed_at
    }

    /// Resolves once cancelled; pends forever if the handle is dropped first
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() > self.armed_at {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::never()
    }
}
