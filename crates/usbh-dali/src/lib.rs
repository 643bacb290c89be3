//! Host-side transport for the Tridonic DALI USB bridge.
//!
//! The bridge is a HID-class dongle (vendor `0x17B5`, product `0x0020`)
//! that forwards DALI frames between the host and a two-wire segment.
//! Outbound traffic is 64-byte HID reports carrying one frame each;
//! inbound traffic is 16-byte reports describing bus events. Every
//! host-initiated frame carries a sequence number the bridge echoes back,
//! which is what lets replies be matched to callers across the
//! asynchronous pipe.
//!
//! # Design
//!
//! - [`transport`]: raw report I/O against the HID device, behind the
//!   [`Transport`] trait so the upper layers can run against a test
//!   double.
//! - [`frame`]: the vendor report codec — encoding outbound frames and
//!   decoding inbound event reports.
//! - [`dispatcher`]: [`Bridge`], which allocates sequence numbers, keeps
//!   the table of in-flight requests, and runs a background reader thread
//!   that resolves them as event reports arrive. `Bridge` implements
//!   [`daliusb_core::DaliBus`], so everything in `daliusb-core` runs on
//!   top of it.
//!
//! # Example
//!
//! ```no_run
//! use daliusb_core::{Address, Command, DaliBus, Repeat};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut bridge = usbh_dali::open()?;
//!     let _ = bridge.command(Address::Short(0), Command::Off, Repeat::Single)?;
//!     Ok(())
//! }
//! ```

pub mod dispatcher;
pub mod frame;
pub mod transport;

pub use dispatcher::{Bridge, PendingReply};
pub use transport::{HidTransport, Transport, TransportError};

/// Open the bridge and start its reader thread.
pub fn open() -> Result<Bridge<HidTransport>, TransportError> {
    Ok(Bridge::new(HidTransport::open()?))
}
