//! POSIX UART transport.
//!
//! Opens a serial device in raw 8N1 mode, either by device path or by USB
//! `VID:PID` (resolved through sysfs). A dedicated reader thread delivers
//! incoming chunks to the subscribers; it is signalled with an atomic flag
//! and joined on close.

use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};

use super::{ReceiveSubscription, SubscriberList, Transport};
use crate::error::{FrameError, Result};

/// Baud rates accepted by [`SerialTransport`].
pub const SUPPORTED_BAUD_RATES: [u32; 5] = [9_600, 19_200, 38_400, 57_600, 115_200];

/// Poll interval of the reader thread (also bounds shutdown latency).
const READ_POLL: Duration = Duration::from_millis(100);

/// Serial port transport with a background reader thread.
pub struct SerialTransport {
    port: Mutex<Option<Box<dyn SerialPort>>>,
    subscribers: Arc<SubscriberList>,
    running: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport").finish_non_exhaustive()
    }
}

impl SerialTransport {
    /// Open a device path (e.g. `/dev/ttyUSB0`) at one of the supported baud
    /// rates, configured 8N1 without flow control.
    pub fn open_path(device: &str, baud: u32) -> Result<Self> {
        validate_baud(baud)?;
        let port = serialport::new(device, baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(READ_POLL)
            .open()
            .map_err(serial_err)?;
        Self::from_port(port)
    }

    /// Resolve a USB serial adapter by vendor/product id and open it.
    pub fn open_usb(vid: u16, pid: u16, baud: u32) -> Result<Self> {
        let device = find_usb_tty(vid, pid)?;
        Self::open_path(&device, baud)
    }

    fn from_port(port: Box<dyn SerialPort>) -> Result<Self> {
        let reader_port = port.try_clone().map_err(serial_err)?;
        let subscribers = Arc::new(SubscriberList::new());
        let running = Arc::new(AtomicBool::new(true));

        let thread_subs = Arc::clone(&subscribers);
        let thread_running = Arc::clone(&running);
        let handle = std::thread::Builder::new()
            .name("framewire-serial-rx".into())
            .spawn(move || reader_loop(reader_port, thread_subs, thread_running))
            .map_err(FrameError::Transport)?;

        Ok(Self {
            port: Mutex::new(Some(port)),
            subscribers,
            running,
            reader: Mutex::new(Some(handle)),
        })
    }
}

fn reader_loop(
    mut port: Box<dyn SerialPort>,
    subscribers: Arc<SubscriberList>,
    running: Arc<AtomicBool>,
) {
    let mut buf = [0u8; 1024];
    while running.load(Ordering::SeqCst) {
        match port.read(&mut buf) {
            Ok(0) => continue,
            Ok(count) => subscribers.dispatch(&buf[..count]),
            Err(err) if err.kind() == io::ErrorKind::TimedOut => continue,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                if running.load(Ordering::SeqCst) {
                    tracing::warn!(target: "framewire::serial", "serial read failed: {err}");
                }
                break;
            }
        }
    }
}

impl Transport for SerialTransport {
    fn write(&self, bytes: &[u8], timeout: Duration) -> Result<()> {
        let mut guard = self.port.lock().unwrap();
        let port = guard.as_mut().ok_or_else(|| {
            FrameError::Transport(io::Error::new(
                io::ErrorKind::NotConnected,
                "serial port is closed",
            ))
        })?;
        port.set_timeout(timeout).map_err(serial_err)?;
        port.write_all(bytes)?;
        port.flush()?;
        Ok(())
    }

    fn subscribe_on_received(&self, callback: ReceiveSubscription) {
        self.subscribers.push(&callback);
    }

    fn open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(FrameError::Transport(io::Error::new(
                io::ErrorKind::NotConnected,
                "serial port is closed; construct a new transport to reopen",
            )))
        }
    }

    fn close(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        self.port.lock().unwrap().take();
        if let Some(handle) = self.reader.lock().unwrap().take() {
            let _ = handle.join();
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.lock().unwrap().is_some()
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

fn validate_baud(baud: u32) -> Result<()> {
    if SUPPORTED_BAUD_RATES.contains(&baud) {
        Ok(())
    } else {
        Err(FrameError::Transport(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("unsupported baud rate {baud}"),
        )))
    }
}

fn serial_err(err: serialport::Error) -> FrameError {
    FrameError::Transport(io::Error::new(io::ErrorKind::Other, err.to_string()))
}

/// Scan `/sys/class/tty` for a tty whose USB ancestor matches `vid`/`pid`.
fn find_usb_tty(vid: u16, pid: u16) -> Result<String> {
    let entries = fs::read_dir("/sys/class/tty").map_err(FrameError::Transport)?;
    for entry in entries.flatten() {
        let device = entry.path().join("device");
        let Ok(resolved) = fs::canonicalize(&device) else {
            continue;
        };
        if usb_ids_match(&resolved, vid, pid) {
            let name = entry.file_name();
            return Ok(format!("/dev/{}", name.to_string_lossy()));
        }
    }
    Err(FrameError::Transport(io::Error::new(
        io::ErrorKind::NotFound,
        format!("no tty with USB id {vid:04x}:{pid:04x}"),
    )))
}

/// Walk up the sysfs device chain looking for matching idVendor/idProduct.
fn usb_ids_match(start: &Path, vid: u16, pid: u16) -> bool {
    let mut dir = Some(start);
    for _ in 0..5 {
        let Some(current) = dir else {
            return false;
        };
        let vendor = fs::read_to_string(current.join("idVendor"));
        let product = fs::read_to_string(current.join("idProduct"));
        if let (Ok(vendor), Ok(product)) = (vendor, product) {
            return vendor.trim() == format!("{vid:04x}") && product.trim() == format!("{pid:04x}");
        }
        dir = current.parent();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unsupported_baud_rejected() {
        assert!(validate_baud(9_600).is_ok());
        assert!(validate_baud(115_200).is_ok());
        let err = validate_baud(12_345).unwrap_err();
        assert!(err.to_string().contains("unsupported baud rate"));
    }

    #[test]
    fn test_open_usb_with_unknown_id_fails() {
        // 0x0000:0x0000 is never a valid adapter.
        assert!(SerialTransport::open_usb(0, 0, 9_600).is_err());
    }

    #[test]
    fn test_open_path_validates_baud_first() {
        let err = SerialTransport::open_path("/dev/null", 1_200).unwrap_err();
        assert!(err.to_string().contains("unsupported baud rate"));
    }
}
