//! Control gear access: discovery, device identity, and lamp control.

use std::fmt;

use log::debug;

use crate::command::{Command, Special};
use crate::driver::{Address, DaliBus, DriverError, Repeat};

/// Device type byte from `QueryDeviceType` (IEC 62386-2xx part number).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GearType(pub u8);

impl GearType {
    pub fn name(self) -> &'static str {
        match self.0 {
            0 => "fluorescent lamp",
            1 => "emergency lighting",
            2 => "HID lamp",
            3 => "low voltage halogen lamp",
            4 => "incandescent lamp dimmer",
            5 => "dc-controlled dimmer",
            6 => "LED lamp",
            7 => "relay",
            8 => "colour",
            _ => "unknown",
        }
    }
}

impl fmt::Display for GearType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.0)
    }
}

/// Indexed fade durations in seconds. Index 0 means "no fade" (under
/// 0.7 s); the table value is the upper bound.
pub const FADE_TIMES: [f32; 16] = [
    0.7, 0.7, 1.0, 1.4, 2.0, 2.8, 4.0, 5.6, 8.0, 11.3, 16.0, 22.6, 32.0, 45.2, 64.0, 90.5,
];

/// Indexed fade rates in steps per second. Index 0 is reserved.
pub const FADE_RATES: [f32; 16] = [
    0.0, 358.0, 253.0, 179.0, 127.0, 89.0, 63.0, 45.0, 32.0, 22.0, 16.0, 11.2, 7.9, 5.6, 4.0, 2.8,
];

/// Decoded `QueryFadeTimeFadeRate` byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fade {
    /// Fade time index, 0..=15 (high nibble).
    pub time: u8,
    /// Fade rate index, 1..=15 (low nibble).
    pub rate: u8,
}

impl Fade {
    pub fn from_byte(byte: u8) -> Self {
        Self {
            time: byte >> 4,
            rate: byte & 0x0F,
        }
    }

    pub fn time_seconds(self) -> f32 {
        FADE_TIMES[self.time as usize]
    }

    /// `None` for the reserved rate index 0.
    pub fn rate_steps_per_second(self) -> Option<f32> {
        (self.rate != 0).then(|| FADE_RATES[self.rate as usize])
    }
}

impl fmt::Display for Fade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.rate_steps_per_second() {
            Some(rate) => write!(f, "time {:.1}s, rate {rate:.1} steps/s", self.time_seconds()),
            None => write!(f, "time {:.1}s, rate reserved", self.time_seconds()),
        }
    }
}

/// Identity block read from memory bank 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GearInfo {
    pub last_memory_bank: u8,
    /// Global Trade Item Number, big-endian 6 bytes on the device.
    pub gtin: u64,
    pub firmware_version: String,
    pub serial: String,
    pub hardware_version: String,
    pub dali_version: u8,
}

impl GearInfo {
    /// Parse the 20 bytes at bank 0 offsets 2..22.
    fn parse(buf: &[u8]) -> Self {
        let mut gtin = 0u64;
        for byte in &buf[1..7] {
            gtin = gtin << 8 | *byte as u64;
        }
        Self {
            last_memory_bank: buf[0],
            gtin,
            firmware_version: format!("{}.{}", buf[7], buf[8]),
            // The serial is stored little-endian, split across two runs.
            serial: format!(
                "{:02x}{:02x}{:02x}{:02x}{:02x}.{:02x}{:02x}{:02x}",
                buf[13], buf[12], buf[11], buf[10], buf[9], buf[16], buf[15], buf[14]
            ),
            hardware_version: format!("{}.{}", buf[17], buf[18]),
            dali_version: buf[19],
        }
    }

    /// GTIN plus serial — defined by DALI to be globally unique and
    /// immutable for a piece of gear.
    pub fn unique_id(&self) -> String {
        format!("{}-{}", self.gtin, self.serial)
    }
}

/// One discovered control gear and the state read off it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gear {
    pub short_address: u8,
    pub device_type: GearType,
    /// Group membership bitmap, bit g = member of group g.
    pub groups: u16,
    pub min_level: Option<u8>,
    pub max_level: Option<u8>,
    pub level: Option<u8>,
    pub info: GearInfo,
}

impl Gear {
    /// Probe `short_address` and, if something answers `QueryDeviceType`,
    /// read its identity block and levels.
    pub fn discover<B: DaliBus>(
        bus: &mut B,
        short_address: u8,
    ) -> Result<Option<Gear>, DriverError> {
        let address = Address::Short(short_address);

        let Some(device_type) = bus.command(address, Command::QueryDeviceType, Repeat::Single)?
        else {
            return Ok(None);
        };

        let bank = bus.read_memory(address, 0, 2, 20)?;
        let info = GearInfo::parse(&bank);

        let g0 = bus.command(address, Command::QueryGroupsZeroToSeven, Repeat::Single)?;
        let g1 = bus.command(address, Command::QueryGroupsEightToFifteen, Repeat::Single)?;
        let groups = (g1.unwrap_or(0) as u16) << 8 | g0.unwrap_or(0) as u16;

        let min_level = bus.command(address, Command::QueryMinLevel, Repeat::Single)?;
        let max_level = bus.command(address, Command::QueryMaxLevel, Repeat::Single)?;
        let level = bus.command(address, Command::QueryActualLevel, Repeat::Single)?;

        debug!("gear {short_address}: type {device_type}, gtin {}", info.gtin);

        Ok(Some(Gear {
            short_address,
            device_type: GearType(device_type),
            groups,
            min_level,
            max_level,
            level,
            info,
        }))
    }

    fn address(&self) -> Address {
        Address::Short(self.short_address)
    }

    fn command(&mut self, bus: &mut impl DaliBus, command: Command) -> Result<Option<u8>, DriverError> {
        bus.command(self.address(), command, Repeat::Single)
    }

    /// Re-query and cache the actual arc power level.
    pub fn refresh_level(&mut self, bus: &mut impl DaliBus) -> Result<Option<u8>, DriverError> {
        self.level = self.command(bus, Command::QueryActualLevel)?;
        Ok(self.level)
    }

    /// Switch on by recalling the last active level. Plain `On` does not
    /// exist in DALI; gear that has never been dimmed recalls its power-on
    /// level instead.
    pub fn on(&mut self, bus: &mut impl DaliBus) -> Result<(), DriverError> {
        self.command(bus, Command::GoToLastActiveLevel)?;
        self.refresh_level(bus)?;
        Ok(())
    }

    pub fn off(&mut self, bus: &mut impl DaliBus) -> Result<(), DriverError> {
        self.command(bus, Command::Off)?;
        self.level = Some(0);
        Ok(())
    }

    pub fn max(&mut self, bus: &mut impl DaliBus) -> Result<(), DriverError> {
        self.command(bus, Command::RecallMaxLevel)?;
        self.refresh_level(bus)?;
        Ok(())
    }

    pub fn min(&mut self, bus: &mut impl DaliBus) -> Result<(), DriverError> {
        self.command(bus, Command::RecallMinLevel)?;
        self.refresh_level(bus)?;
        Ok(())
    }

    /// One fade-rate step brighter.
    pub fn brighten(&mut self, bus: &mut impl DaliBus) -> Result<(), DriverError> {
        self.command(bus, Command::Up)?;
        self.refresh_level(bus)?;
        Ok(())
    }

    /// One fade-rate step dimmer.
    pub fn dim(&mut self, bus: &mut impl DaliBus) -> Result<(), DriverError> {
        self.command(bus, Command::Down)?;
        self.refresh_level(bus)?;
        Ok(())
    }

    /// Drive straight to `level` with direct arc power.
    pub fn set_level(&mut self, bus: &mut impl DaliBus, level: u8) -> Result<(), DriverError> {
        bus.direct_arc_power(self.address(), level)?;
        self.refresh_level(bus)?;
        Ok(())
    }

    pub fn toggle(&mut self, bus: &mut impl DaliBus) -> Result<(), DriverError> {
        match self.refresh_level(bus)? {
            Some(0) | None => self.on(bus),
            Some(_) => self.off(bus),
        }
    }

    pub fn query_fade(&mut self, bus: &mut impl DaliBus) -> Result<Option<Fade>, DriverError> {
        Ok(self
            .command(bus, Command::QueryFadeTimeFadeRate)?
            .map(Fade::from_byte))
    }

    pub fn query_power_on_level(
        &mut self,
        bus: &mut impl DaliBus,
    ) -> Result<Option<u8>, DriverError> {
        self.command(bus, Command::QueryPowerOnLevel)
    }

    /// Store `level` as the power-on level. The configuration command must
    /// arrive twice within 100 ms to take effect, with nothing in between.
    pub fn set_power_on_level(
        &mut self,
        bus: &mut impl DaliBus,
        level: u8,
    ) -> Result<(), DriverError> {
        bus.special(Special::SetDtr0, level, Repeat::Single)?;
        self.command(bus, Command::SetPowerOnLevel)?;
        self.command(bus, Command::SetPowerOnLevel)?;
        Ok(())
    }
}

impl fmt::Display for Gear {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "gear {}: {} level {} (min {}, max {}) groups {:016b} gtin {} serial {} fw {} dali v{}",
            self.short_address,
            self.device_type,
            OptLevel(self.level),
            OptLevel(self.min_level),
            OptLevel(self.max_level),
            self.groups,
            self.info.gtin,
            self.info.serial,
            self.info.firmware_version,
            self.info.dali_version,
        )
    }
}

struct OptLevel(Option<u8>);

impl fmt::Display for OptLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(level) => write!(f, "{level}"),
            None => f.write_str("?"),
        }
    }
}

/// Walk all 64 short addresses and keep the ones that answer.
pub fn scan<B: DaliBus>(bus: &mut B) -> Result<Vec<Gear>, DriverError> {
    let mut devices = Vec::new();
    for short_address in 0..64 {
        if let Some(gear) = Gear::discover(bus, short_address)? {
            devices.push(gear);
        }
    }
    Ok(devices)
}
