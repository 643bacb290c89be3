//! In-memory bus double for the core tests: a scripted DALI segment that
//! answers frames the way initialise-state control gear would.

use std::collections::VecDeque;
use std::time::Duration;

use crate::driver::{DaliBus, DriverError, Frame, FrameKind, Repeat, Reply};

/// One simulated control gear.
#[derive(Debug, Clone)]
pub struct MockGear {
    pub search_address: u32,
    pub short_address: Option<u8>,
    pub withdrawn: bool,
    pub initialised: bool,
    pub device_type: Option<u8>,
    pub dtr0: u8,
    pub dtr1: u8,
    pub level: u8,
    pub last_active: u8,
    pub power_on_level: u8,
    pub operating_mode: u8,
    pub groups: u16,
    pub min_level: u8,
    pub max_level: u8,
    pub fade: u8,
    pub bank0: Vec<u8>,
}

impl MockGear {
    /// Unaddressed gear as it would sit on a virgin bus.
    pub fn at(search_address: u32) -> Self {
        Self {
            search_address,
            short_address: None,
            withdrawn: false,
            initialised: false,
            device_type: None,
            dtr0: 0,
            dtr1: 0,
            level: 0,
            last_active: 254,
            power_on_level: 254,
            operating_mode: 0,
            groups: 0,
            min_level: 1,
            max_level: 254,
            fade: 0,
            bank0: Vec::new(),
        }
    }

    /// Gear that already answers on a short address.
    pub fn with_short_address(search_address: u32, short_address: u8) -> Self {
        Self {
            short_address: Some(short_address),
            ..Self::at(search_address)
        }
    }
}

/// A mock DALI segment. Every sent frame is recorded in `log`; 16-bit
/// frames are executed against the gear models.
#[derive(Debug, Default)]
pub struct MockBus {
    pub gear: Vec<MockGear>,
    pub log: Vec<Frame>,
    /// Search addresses handed out by each successive `Randomise`, one
    /// inner vec per call, index-aligned with `gear`. When empty the gear
    /// keep their current addresses.
    pub randomise_plan: VecDeque<Vec<u32>>,
    /// Swallow `ProgramShortAddress` to provoke a readback mismatch.
    pub drop_program_short_address: bool,
    search: u32,
    /// Previously executed 16-bit payload, for the twin-frame rule on
    /// configuration commands.
    previous: Option<u32>,
}

impl MockBus {
    pub fn new(gear: Vec<MockGear>) -> Self {
        Self {
            gear,
            ..Self::default()
        }
    }

    pub fn search_register(&self) -> u32 {
        self.search
    }

    /// Gear currently selected by the search register.
    fn selected(&mut self) -> impl Iterator<Item = &mut MockGear> + '_ {
        let register = self.search;
        self.gear
            .iter_mut()
            .filter(move |g| g.initialised && !g.withdrawn && g.search_address == register)
    }

    fn targets(&mut self, selector: u8) -> Vec<usize> {
        self.gear
            .iter()
            .enumerate()
            .filter(|(_, g)| match selector {
                0x7F => true,
                sel if sel & 0x40 != 0 => g.groups & (1 << (sel & 0x0F)) != 0,
                sel => g.short_address == Some(sel),
            })
            .map(|(idx, _)| idx)
            .collect()
    }

    fn short16(&mut self, payload: u32, confirmed: bool) -> Result<Reply, DriverError> {
        let upper = (payload >> 8) as u8;
        let lower = payload as u8;

        if upper & 0x01 == 0 {
            // Direct arc power.
            for idx in self.targets(upper >> 1) {
                let gear = &mut self.gear[idx];
                gear.level = lower;
                if lower > 0 {
                    gear.last_active = lower;
                }
            }
            return Ok(None);
        }

        // Odd bytes in this range cannot be device selectors (short
        // selectors top out at 0x7F, group selectors at 0x9F), so they are
        // special command opcodes.
        if (0xA1..=0xC9).contains(&upper) {
            return self.special(upper, lower);
        }

        self.addressed(upper >> 1, lower, confirmed)
    }

    fn addressed(&mut self, selector: u8, command: u8, confirmed: bool) -> Result<Reply, DriverError> {
        let mut replies = Vec::new();
        for idx in self.targets(selector) {
            let gear = &mut self.gear[idx];
            let reply = match command {
                0x00 => {
                    gear.level = 0;
                    None
                }
                0x01 => {
                    gear.level = gear.level.saturating_add(1).min(gear.max_level);
                    None
                }
                0x02 => {
                    gear.level = gear.level.saturating_sub(1).max(gear.min_level);
                    None
                }
                0x05 => {
                    gear.level = gear.max_level;
                    None
                }
                0x06 => {
                    gear.level = gear.min_level;
                    None
                }
                0x0A => {
                    gear.level = gear.last_active;
                    None
                }
                0x23 if confirmed => {
                    gear.operating_mode = gear.dtr0;
                    None
                }
                0x2D if confirmed => {
                    gear.power_on_level = gear.dtr0;
                    None
                }
                0x60..=0x6F if confirmed => {
                    gear.groups |= 1 << (command & 0x0F);
                    None
                }
                0x70..=0x7F if confirmed => {
                    gear.groups &= !(1 << (command & 0x0F));
                    None
                }
                0x80 if confirmed => {
                    gear.short_address = if gear.dtr0 == 0xFF {
                        None
                    } else {
                        Some(gear.dtr0 >> 1)
                    };
                    None
                }
                0x98 => Some(gear.dtr0),
                0x99 => gear.device_type,
                0xA0 => Some(gear.level),
                0xA1 => Some(gear.max_level),
                0xA2 => Some(gear.min_level),
                0xA3 => Some(gear.power_on_level),
                0xA5 => Some(gear.fade),
                0xC0 => Some(gear.groups as u8),
                0xC1 => Some((gear.groups >> 8) as u8),
                0xC5 => {
                    let byte = if gear.dtr1 == 0 {
                        gear.bank0.get(gear.dtr0 as usize).copied()
                    } else {
                        None
                    };
                    if byte.is_some() {
                        gear.dtr0 = gear.dtr0.wrapping_add(1);
                    }
                    byte
                }
                _ => None,
            };
            if let Some(byte) = reply {
                replies.push(byte);
            }
        }
        Self::aggregate(replies)
    }

    fn special(&mut self, opcode: u8, parameter: u8) -> Result<Reply, DriverError> {
        match opcode {
            // Terminate
            0xA1 => {
                for gear in &mut self.gear {
                    gear.initialised = false;
                }
                Ok(None)
            }
            // SetDTR0 / SetDTR1
            0xA3 => {
                for gear in &mut self.gear {
                    gear.dtr0 = parameter;
                }
                Ok(None)
            }
            0xC3 => {
                for gear in &mut self.gear {
                    gear.dtr1 = parameter;
                }
                Ok(None)
            }
            // Initialise
            0xA5 => {
                for gear in &mut self.gear {
                    gear.initialised = true;
                }
                Ok(None)
            }
            // Randomise
            0xA7 => {
                if let Some(plan) = self.randomise_plan.pop_front() {
                    for (gear, address) in self.gear.iter_mut().zip(plan) {
                        if gear.initialised {
                            gear.search_address = address;
                        }
                    }
                }
                Ok(None)
            }
            // Compare
            0xA9 => {
                let register = self.search;
                let answering = self
                    .gear
                    .iter()
                    .filter(|g| g.initialised && !g.withdrawn && g.search_address <= register)
                    .count();
                match answering {
                    0 => Ok(None),
                    1 => Ok(Some(0xFF)),
                    _ => Err(DriverError::Framing),
                }
            }
            // Withdraw
            0xAB => {
                for gear in self.selected() {
                    gear.withdrawn = true;
                }
                Ok(None)
            }
            // SearchAddrH / M / L
            0xB1 => {
                self.search = (self.search & 0x00_FFFF) | (parameter as u32) << 16;
                Ok(None)
            }
            0xB3 => {
                self.search = (self.search & 0xFF_00FF) | (parameter as u32) << 8;
                Ok(None)
            }
            0xB5 => {
                self.search = (self.search & 0xFF_FF00) | parameter as u32;
                Ok(None)
            }
            // ProgramShortAddress
            0xB7 => {
                if !self.drop_program_short_address {
                    for gear in self.selected() {
                        gear.short_address = if parameter == 0xFF {
                            None
                        } else {
                            Some(parameter >> 1)
                        };
                    }
                }
                Ok(None)
            }
            // QueryShortAddress
            0xBB => {
                let replies: Vec<u8> = self
                    .selected()
                    .map(|g| g.short_address.map_or(0xFF, |s| (s << 1) | 0x01))
                    .collect();
                Self::aggregate(replies)
            }
            _ => Ok(None),
        }
    }

    fn aggregate(replies: Vec<u8>) -> Result<Reply, DriverError> {
        match replies.as_slice() {
            [] => Ok(None),
            [byte] => Ok(Some(*byte)),
            _ => Err(DriverError::Framing),
        }
    }
}

impl DaliBus for MockBus {
    fn send(&mut self, frame: Frame) -> Result<Reply, DriverError> {
        self.log.push(frame);
        match frame.kind {
            FrameKind::Short16 => {
                let confirmed =
                    frame.repeat == Repeat::Twice || self.previous == Some(frame.payload);
                self.previous = Some(frame.payload);
                self.short16(frame.payload, confirmed)
            }
            // Extended frames carry no gear model here; they just land in
            // the log.
            FrameKind::Long24 | FrameKind::Conf24 => {
                self.previous = None;
                Ok(None)
            }
        }
    }

    fn settle(&mut self, _duration: Duration) {}
}
