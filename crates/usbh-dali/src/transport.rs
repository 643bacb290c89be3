//! Raw HID report I/O against the bridge.
//!
//! The device is shared between two threads: the dispatcher writes
//! outbound reports while its reader thread blocks for inbound ones. The
//! handle sits behind a mutex, and reads take it in short slices so a
//! pending read neither starves writers nor outlives [`close`].
//!
//! [`close`]: Transport::close

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use hidapi::{HidApi, HidDevice};
use thiserror::Error;

/// Tridonic DALI USB vendor id.
pub const VENDOR_ID: u16 = 0x17B5;
/// Tridonic DALI USB product id.
pub const PRODUCT_ID: u16 = 0x0020;

/// Outbound reports are always this long; the tail is zero-padded.
pub const OUTBOUND_REPORT_LEN: usize = 64;
/// Inbound reports; only the first 9 bytes carry meaning.
pub const INBOUND_REPORT_LEN: usize = 16;

/// How long a read holds the device before releasing it to writers and
/// re-checking for close.
const READ_SLICE: Duration = Duration::from_millis(50);

#[derive(Error, Debug)]
pub enum TransportError {
    /// No bridge answered on the expected vendor/product id.
    #[error("no DALI USB bridge connected (17b5:0020)")]
    DeviceUnavailable,
    /// The transport was closed while the operation was in flight.
    #[error("bridge transport closed")]
    Closed,
    #[error("short write to bridge ({written} of {expected} bytes)")]
    ShortWrite { written: usize, expected: usize },
    #[error(transparent)]
    Hid(#[from] hidapi::HidError),
}

/// Byte-pipe to the bridge. Object-safe so the dispatcher can be driven by
/// an in-memory double in tests.
pub trait Transport: Send + Sync {
    /// Queue one outbound report. May block briefly.
    fn write(&self, report: &[u8; OUTBOUND_REPORT_LEN]) -> Result<(), TransportError>;

    /// Return the next inbound report, or `None` if nothing arrived within
    /// `timeout`.
    fn read(&self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError>;

    /// Release the device. A concurrently blocked [`read`](Self::read)
    /// returns within bounded time afterwards.
    fn close(&self);
}

/// The real bridge, over hidapi.
pub struct HidTransport {
    device: Mutex<HidDevice>,
    closed: AtomicBool,
}

impl HidTransport {
    /// Acquire the bridge by vendor/product id.
    pub fn open() -> Result<Self, TransportError> {
        let api = HidApi::new()?;
        let device = api
            .open(VENDOR_ID, PRODUCT_ID)
            .map_err(|_| TransportError::DeviceUnavailable)?;
        log::debug!("opened DALI USB bridge {VENDOR_ID:04x}:{PRODUCT_ID:04x}");
        Ok(Self {
            device: Mutex::new(device),
            closed: AtomicBool::new(false),
        })
    }

    fn device(&self) -> std::sync::MutexGuard<'_, HidDevice> {
        // A poisoned lock only means another thread panicked mid-I/O; the
        // handle itself is still usable.
        self.device
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Transport for HidTransport {
    fn write(&self, report: &[u8; OUTBOUND_REPORT_LEN]) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let written = self.device().write(report)?;
        if written != report.len() {
            return Err(TransportError::ShortWrite {
                written,
                expected: report.len(),
            });
        }
        Ok(())
    }

    fn read(&self, timeout: Duration) -> Result<Option<Vec<u8>>, TransportError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(TransportError::Closed);
            }

            let mut buf = [0u8; INBOUND_REPORT_LEN];
            let slice = READ_SLICE.min(deadline.saturating_duration_since(Instant::now()));
            let received = self
                .device()
                .read_timeout(&mut buf, slice.as_millis() as i32)?;
            if received > 0 {
                return Ok(Some(buf[..received].to_vec()));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}
