//! Search-address transmission cache.
//!
//! The binary search in [`commission`](crate::commission) updates the
//! 24-bit search register on every probe, but between consecutive probes
//! usually only one of the three bytes changes. Tracking what was last
//! transmitted halves the traffic of a typical commissioning run.

use crate::command::Special;
use crate::driver::{DaliBus, DriverError, Repeat};

/// Caches the last transmitted H/M/L search-address bytes and sends only
/// the ones that differ.
#[derive(Debug, Default)]
pub struct SearchAddressSender {
    last_h: Option<u8>,
    last_m: Option<u8>,
    last_l: Option<u8>,
}

impl SearchAddressSender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bring the bus search register to `address`, transmitting only the
    /// changed bytes, low byte first.
    pub fn send<B: DaliBus + ?Sized>(
        &mut self,
        bus: &mut B,
        address: u32,
    ) -> Result<(), DriverError> {
        let l = address as u8;
        let m = (address >> 8) as u8;
        let h = (address >> 16) as u8;

        if self.last_l != Some(l) {
            bus.special(Special::SearchAddrL, l, Repeat::Single)?;
            self.last_l = Some(l);
        }
        if self.last_m != Some(m) {
            bus.special(Special::SearchAddrM, m, Repeat::Single)?;
            self.last_m = Some(m);
        }
        if self.last_h != Some(h) {
            bus.special(Special::SearchAddrH, h, Repeat::Single)?;
            self.last_h = Some(h);
        }
        Ok(())
    }

    /// Forget the cached bytes. Must be called whenever the bus is
    /// re-randomised, so the next probe transmits a full address.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBus;

    fn search_byte_frames(bus: &MockBus) -> Vec<u16> {
        bus.log
            .iter()
            .filter_map(|frame| {
                let opcode = (frame.payload >> 8) as u8;
                matches!(
                    opcode,
                    0xB1 | 0xB3 | 0xB5 // SearchAddrH/M/L
                )
                .then_some(frame.payload as u16)
            })
            .collect()
    }

    #[test]
    fn first_send_transmits_all_three_bytes_low_first() {
        let mut bus = MockBus::default();
        let mut sender = SearchAddressSender::new();
        sender.send(&mut bus, 0x123456).unwrap();

        assert_eq!(
            search_byte_frames(&bus),
            vec![0xB556, 0xB334, 0xB112] // L, M, H
        );
        assert_eq!(bus.search_register(), 0x123456);
    }

    #[test]
    fn repeat_send_transmits_only_changed_bytes() {
        let mut bus = MockBus::default();
        let mut sender = SearchAddressSender::new();
        sender.send(&mut bus, 0x123456).unwrap();

        let before = bus.log.len();
        sender.send(&mut bus, 0x1234FF).unwrap();
        assert_eq!(bus.log.len() - before, 1); // only L changed

        let before = bus.log.len();
        sender.send(&mut bus, 0x1234FF).unwrap();
        assert_eq!(bus.log.len() - before, 0); // nothing changed

        let before = bus.log.len();
        sender.send(&mut bus, 0xAA34FF).unwrap();
        assert_eq!(bus.log.len() - before, 1); // only H changed
        assert_eq!(bus.search_register(), 0xAA34FF);
    }

    #[test]
    fn reset_forces_a_full_retransmission() {
        let mut bus = MockBus::default();
        let mut sender = SearchAddressSender::new();
        sender.send(&mut bus, 0x0000FF).unwrap();

        sender.reset();
        let before = bus.log.len();
        sender.send(&mut bus, 0x0000FF).unwrap();
        assert_eq!(bus.log.len() - before, 3);
    }
}
