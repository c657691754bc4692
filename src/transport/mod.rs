//! Byte transports.
//!
//! A [`Transport`] moves raw bytes; it knows nothing about frames. The RX
//! side is callback-driven: subscribers registered with
//! [`subscribe_on_received`] are invoked whenever bytes arrive. Subscribers
//! are held weakly (drop the returned handle to unsubscribe) and are called
//! newest-first; each callback reports how many bytes it consumed and later
//! subscribers see only the unconsumed remainder.
//!
//! [`subscribe_on_received`]: Transport::subscribe_on_received

mod echo;
mod serial;

pub use echo::EchoTransport;
pub use serial::SerialTransport;

use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crate::error::Result;

/// Callback invoked with newly received bytes; returns the number consumed.
pub type ReceiveFn = dyn Fn(&[u8]) -> usize + Send + Sync;

/// Owning handle for a receive subscription. The transport keeps only a weak
/// reference.
pub type ReceiveSubscription = Arc<ReceiveFn>;

/// A bidirectional byte transport.
pub trait Transport: Send + Sync {
    /// Write `bytes`, blocking up to `timeout`.
    fn write(&self, bytes: &[u8], timeout: Duration) -> Result<()>;

    /// Register a callback for incoming bytes. Keep the `Arc` alive for as
    /// long as deliveries are wanted.
    fn subscribe_on_received(&self, callback: ReceiveSubscription);

    /// Open the transport.
    fn open(&self) -> Result<()>;

    /// Close the transport and release its resources.
    fn close(&self) -> Result<()>;

    /// True while the transport is usable.
    fn is_open(&self) -> bool;
}

/// Weak subscriber list shared by the transport implementations.
///
/// Delivery snapshots the live subscribers under the lock but invokes them
/// outside of it, so a callback may write back to the same transport.
#[derive(Default)]
pub(crate) struct SubscriberList {
    entries: Mutex<Vec<Weak<ReceiveFn>>>,
}

impl SubscriberList {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&self, callback: &ReceiveSubscription) {
        self.entries.lock().unwrap().push(Arc::downgrade(callback));
    }

    /// Deliver `bytes` to the live subscribers, newest first, pruning the
    /// expired ones. Each callback sees the part of the buffer that previous
    /// callbacks left unconsumed.
    pub(crate) fn dispatch(&self, bytes: &[u8]) {
        let live: Vec<Arc<ReceiveFn>> = {
            let mut entries = self.entries.lock().unwrap();
            let mut live = Vec::with_capacity(entries.len());
            let mut i = entries.len();
            while i > 0 {
                i -= 1;
                match entries[i].upgrade() {
                    Some(callback) => live.push(callback),
                    None => {
                        entries.remove(i);
                    }
                }
            }
            live
        };

        let mut consumed = 0usize;
        for callback in live {
            let rest = &bytes[consumed.min(bytes.len())..];
            consumed += callback(rest);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}
