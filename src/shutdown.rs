//! Cooperative shutdown for the engine's sleeps.

use crate::error::Error;
use std::time::Duration;
use tokio::sync::watch;

/// Creates a connected trigger and listener.
pub fn channel() -> (ShutdownTrigger, Shutdown) {
  let (tx, rx) = watch::channel(false);
  (ShutdownTrigger { tx }, Shutdown { rx })
}

/// Signals every [`Shutdown`] cloned from the same channel.
#[derive(Debug)]
pub struct ShutdownTrigger {
  tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
  pub fn trigger(&self) {
    self.tx.send_replace(true);
  }
}

/// Listener side of the shutdown channel. Dropping the trigger without
/// firing it leaves listeners running forever.
#[derive(Debug, Clone)]
pub struct Shutdown {
  rx: watch::Receiver<bool>,
}

impl Shutdown {
  /// A listener that is never signalled.
  pub fn never() -> Self {
    channel().1
  }

  pub fn is_shutdown(&self) -> bool {
    *self.rx.borrow()
  }

  /// Resolves once shutdown has been triggered.
  pub async fn cancelled(&self) {
    let mut rx = self.rx.clone();
    if rx.wait_for(|stopped| *stopped).await.is_err() {
      std::future::pending::<()>().await;
    }
  }

  /// Sleep for `duration`, failing with [`Error::Cancelled`] if shutdown
  /// is triggered first.
  pub async fn sleep(&self, duration: Duration) -> Result<(), Error> {
    if self.is_shutdown() {
      return Err(Error::Cancelled);
    }
    tokio::select! {
      _ = tokio::time::sleep(duration) => Ok(()),
      _ = self.cancelled() => Err(Error::Cancelled),
    }
  }
}
