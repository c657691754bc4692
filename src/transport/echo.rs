//! Loopback transport for tests and examples.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::{ReceiveSubscription, SubscriberList, Transport};
use crate::error::{FrameError, Result};

/// Transport that immediately delivers every write to its own subscribers.
///
/// Useful for exercising a full RX/TX pair without hardware: anything sent
/// comes straight back.
#[derive(Default)]
pub struct EchoTransport {
    open: AtomicBool,
    subscribers: SubscriberList,
}

impl EchoTransport {
    /// New, initially closed echo transport.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transport for EchoTransport {
    fn write(&self, bytes: &[u8], _timeout: Duration) -> Result<()> {
        if !self.is_open() {
            return Err(FrameError::Transport(io::Error::new(
                io::ErrorKind::NotConnected,
                "echo transport is closed",
            )));
        }
        self.subscribers.dispatch(bytes);
        Ok(())
    }

    fn subscribe_on_received(&self, callback: ReceiveSubscription) {
        self.subscribers.push(&callback);
    }

    fn open(&self) -> Result<()> {
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_write_requires_open() {
        let echo = EchoTransport::new();
        assert!(!echo.is_open());
        assert!(echo.write(b"x", Duration::from_millis(10)).is_err());

        echo.open().unwrap();
        assert!(echo.write(b"x", Duration::from_millis(10)).is_ok());

        echo.close().unwrap();
        assert!(echo.write(b"x", Duration::from_millis(10)).is_err());
    }

    #[test]
    fn test_write_loops_back_to_subscriber() {
        let echo = EchoTransport::new();
        echo.open().unwrap();

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let sub: ReceiveSubscription = Arc::new(move |bytes: &[u8]| {
            sink.lock().unwrap().extend_from_slice(bytes);
            bytes.len()
        });
        echo.subscribe_on_received(sub.clone());

        echo.write(&[0xDE, 0xAD], Duration::from_millis(10)).unwrap();
        echo.write(&[0xBE, 0xEF], Duration::from_millis(10)).unwrap();
        assert_eq!(*received.lock().unwrap(), vec![0xDE, 0xAD, 0xBE, 0xEF]);
    }

    #[test]
    fn test_reentrant_write_from_callback() {
        // A subscriber may write back into the transport it listens on.
        let echo = Arc::new(EchoTransport::new());
        echo.open().unwrap();

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let inner = Arc::clone(&echo);
        let sub: ReceiveSubscription = Arc::new(move |bytes: &[u8]| {
            sink.lock().unwrap().push(bytes.to_vec());
            if bytes == b"ping" {
                inner.write(b"pong", Duration::from_millis(10)).unwrap();
            }
            bytes.len()
        });
        echo.subscribe_on_received(sub.clone());

        echo.write(b"ping", Duration::from_millis(10)).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![b"ping".to_vec(), b"pong".to_vec()]);
    }
}
