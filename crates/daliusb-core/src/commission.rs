//! Bus commissioning: discover every unaddressed device and give each a
//! unique short address.
//!
//! After `Randomise`, every device in initialisation mode holds a random
//! 24-bit search address. `Compare` answers whether any device's address is
//! at or below the bus search register, which lets a binary search pull out
//! the lowest-addressed device in ~24 probes. The device is programmed with
//! the next free short address, withdrawn from the search scope, and the
//! search resumes just above it until the space is empty.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{debug, info, warn};
use thiserror::Error;

use crate::command::{Command, Special};
use crate::driver::{DaliBus, DriverError, Repeat};
use crate::search::SearchAddressSender;

/// Top of the 24-bit search address space.
const SEARCH_SPACE_TOP: u32 = 0x00FF_FFFF;

/// How many devices answered a `Compare` probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Presence {
    None,
    One,
    Many,
}

/// Outcome of one binary search pass over `[start, 0xFFFFFF]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchResult {
    /// The lowest search address in the interval with a device on it. The
    /// bus search register is left at this value, so the device is selected
    /// for `ProgramShortAddress` / `Withdraw`.
    Found(u32),
    /// No device left in the interval.
    Exhausted,
    /// Two or more devices settled on the same search address; the
    /// interval narrowed to a single value that still answers with a
    /// framing collision.
    Clash,
}

/// One successfully addressed device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Assignment {
    /// Assigned short address, 0..=63.
    pub short_address: u8,
    /// The search address the device was discovered at.
    pub search_address: u32,
}

#[derive(Error, Debug)]
pub enum CommissionError {
    #[error("short address did not stick (expected {expected:#04x}, device answered {answered:?})")]
    AddressNotTaken { expected: u8, answered: Option<u8> },
    #[error("more devices on the bus than short addresses")]
    AddressSpaceExhausted,
    #[error("search address clash persisted after {0} randomise attempts")]
    PersistentClash(u32),
    #[error("commissioning cancelled")]
    Cancelled,
    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// Probe how many devices sit at or below `value`.
fn compare<B: DaliBus>(
    bus: &mut B,
    sender: &mut SearchAddressSender,
    value: u32,
) -> Result<Presence, DriverError> {
    sender.send(bus, value)?;
    match bus.special(Special::Compare, 0, Repeat::Single) {
        Ok(Some(0xFF)) => Ok(Presence::One),
        Ok(Some(other)) => Err(DriverError::Protocol {
            context: "Compare",
            value: other,
        }),
        Ok(None) => Ok(Presence::None),
        // Several devices drove the bus at once; that is the answer, not a
        // fault.
        Err(DriverError::Framing) => Ok(Presence::Many),
        Err(err) => Err(err),
    }
}

/// Binary search for the device with the lowest search address in
/// `[start, 0xFFFFFF]`.
pub fn search_for_device<B: DaliBus>(
    bus: &mut B,
    sender: &mut SearchAddressSender,
    start: u32,
) -> Result<SearchResult, DriverError> {
    if start > SEARCH_SPACE_TOP {
        return Ok(SearchResult::Exhausted);
    }

    let mut low = start;
    let mut high = SEARCH_SPACE_TOP;
    loop {
        let mid = (low + high) / 2;
        let found = compare(bus, sender, mid)?;

        if low == high {
            return Ok(match found {
                Presence::One => SearchResult::Found(mid),
                Presence::Many => SearchResult::Clash,
                Presence::None => SearchResult::Exhausted,
            });
        }
        match found {
            // Nothing at or below mid: the lowest device is above it.
            Presence::None => low = mid + 1,
            // At least one at or below mid; keep narrowing.
            Presence::One | Presence::Many => high = mid,
        }
    }
}

/// Drives a full commissioning run.
///
/// Separate from the bus so a long run can be cancelled from a signal
/// handler: trip [`cancel_flag`](Self::cancel_flag) and the engine stops at
/// the next allocation step, still sending the `Terminate` post-phase.
pub struct Commissioner {
    cancel: Arc<AtomicBool>,
    clash_retries: u32,
    settle: Duration,
}

impl Default for Commissioner {
    fn default() -> Self {
        Self::new()
    }
}

impl Commissioner {
    pub fn new() -> Self {
        Self {
            cancel: Arc::new(AtomicBool::new(false)),
            clash_retries: 8,
            settle: Duration::from_millis(100),
        }
    }

    /// Flag that aborts the run when set. Safe to trip from another thread.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Run the full enumeration. Every exit path, including errors and
    /// cancellation, leaves initialisation mode via `Terminate`.
    pub fn run<B: DaliBus>(&self, bus: &mut B) -> Result<Vec<Assignment>, CommissionError> {
        // Cancel any initialise state left over from an aborted run.
        bus.special(Special::Terminate, 0, Repeat::Single)?;

        let result = self.enumerate(bus);

        let cleanup = bus.special(Special::Terminate, 0, Repeat::Single);
        let assignments = result?;
        cleanup?;
        Ok(assignments)
    }

    fn enumerate<B: DaliBus>(&self, bus: &mut B) -> Result<Vec<Assignment>, CommissionError> {
        let mut sender = SearchAddressSender::new();

        // Put all gear in initialisation mode for the duration.
        bus.special(Special::Initialise, 0, Repeat::Twice)?;

        // Wipe existing short addresses (0xFF = no address).
        bus.special(Special::SetDtr0, 0xFF, Repeat::Single)?;
        bus.broadcast(Command::SetShortAddress, Repeat::Twice)?;

        // Back to the default operating mode.
        bus.special(Special::SetDtr0, 128, Repeat::Single)?;
        bus.broadcast(Command::SetOperatingMode, Repeat::Twice)?;

        // Clear all group membership.
        for group in 0..16 {
            bus.broadcast(Command::RemoveFromGroup(group), Repeat::Twice)?;
        }

        self.randomise(bus, &mut sender)?;

        let mut assignments = Vec::new();
        let mut available = 0u8..64;
        let mut search_floor = 0u32;
        let mut clashes = 0u32;

        loop {
            if self.cancel.load(Ordering::Relaxed) {
                return Err(CommissionError::Cancelled);
            }

            match search_for_device(bus, &mut sender, search_floor)? {
                SearchResult::Found(search_address) => {
                    let short_address = available
                        .next()
                        .ok_or(CommissionError::AddressSpaceExhausted)?;

                    // The search left the register on the device, so it is
                    // the one selected for programming.
                    let expected = (short_address << 1) | 0x01;
                    bus.special(Special::ProgramShortAddress, expected, Repeat::Single)?;
                    let answered = bus.special(Special::QueryShortAddress, 0, Repeat::Single)?;
                    if answered != Some(expected) {
                        return Err(CommissionError::AddressNotTaken { expected, answered });
                    }
                    bus.special(Special::Withdraw, 0, Repeat::Single)?;

                    info!(
                        "device at search address {search_address:#08x} took short address {short_address}"
                    );
                    assignments.push(Assignment {
                        short_address,
                        search_address,
                    });
                    search_floor = search_address + 1;
                }
                SearchResult::Exhausted => {
                    debug!("search space empty, {} devices addressed", assignments.len());
                    break;
                }
                SearchResult::Clash => {
                    clashes += 1;
                    if clashes > self.clash_retries {
                        return Err(CommissionError::PersistentClash(clashes));
                    }
                    warn!("search address clash, re-randomising remaining devices");
                    self.randomise(bus, &mut sender)?;
                    search_floor = 0;
                }
            }
        }

        Ok(assignments)
    }

    /// Re-roll the search addresses of all non-withdrawn gear and give them
    /// time to settle. Invalidates the sender cache.
    fn randomise<B: DaliBus>(
        &self,
        bus: &mut B,
        sender: &mut SearchAddressSender,
    ) -> Result<(), DriverError> {
        bus.special(Special::Randomise, 0, Repeat::Twice)?;
        bus.settle(self.settle);
        sender.reset();
        Ok(())
    }
}
