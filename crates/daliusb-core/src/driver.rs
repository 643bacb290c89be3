//! Frame composition and the bus trait.
//!
//! A DALI exchange is a forward frame followed by at most one backward
//! frame. [`DaliBus::send`] is the only required method; everything else is
//! provided composition over the three frame shapes the Tridonic bridge
//! understands (16-bit, 24-bit, and the vendor-flagged 24-bit
//! configuration frame).

use std::{thread, time::Duration};

use thiserror::Error;

use crate::command::{Command, Special};

/// Wire encoding selector for an outbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Standard 16-bit forward frame: address byte + command byte.
    Short16,
    /// 24-bit extended forward frame.
    Long24,
    /// 24-bit frame the bridge flags as a configuration sequence.
    Conf24,
}

/// Whether the bridge should retransmit the frame within the DALI 100 ms
/// twin-frame window. Configuration commands require [`Repeat::Twice`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Repeat {
    Single,
    Twice,
}

/// An outbound DALI frame, before a sequence number is attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    pub kind: FrameKind,
    /// Frame payload, low 16 or 24 bits depending on `kind`.
    pub payload: u32,
    pub repeat: Repeat,
}

impl Frame {
    pub fn short16(payload: u16) -> Self {
        Self {
            kind: FrameKind::Short16,
            payload: payload as u32,
            repeat: Repeat::Single,
        }
    }

    pub fn long24(payload: u32) -> Self {
        Self {
            kind: FrameKind::Long24,
            payload: payload & 0x00FF_FFFF,
            repeat: Repeat::Single,
        }
    }

    pub fn conf24(payload: u32) -> Self {
        Self {
            kind: FrameKind::Conf24,
            payload: payload & 0x00FF_FFFF,
            repeat: Repeat::Single,
        }
    }

    /// Mark the frame for twin transmission.
    pub fn twice(mut self) -> Self {
        self.repeat = Repeat::Twice;
        self
    }
}

/// The 7-bit address selector of a 16-bit frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Address {
    /// A single device, short address 0..=63.
    Short(u8),
    /// A group, 0..=15.
    Group(u8),
    /// All gear on the segment.
    Broadcast,
}

impl Address {
    /// The selector as it appears in bits 15..9 of a 16-bit frame.
    pub fn selector(self) -> u8 {
        match self {
            Address::Short(address) => address & 0x3F,
            Address::Group(group) => 0x40 | (group & 0x0F),
            Address::Broadcast => 0x7F,
        }
    }
}

/// A backward frame: `Some(byte)` if a device answered, `None` if the bus
/// response window elapsed silently.
pub type Reply = Option<u8>;

#[derive(Error, Debug)]
pub enum DriverError {
    /// Collision or corruption on the bus. During commissioning `Compare`
    /// this is a positive signal (several devices answered at once) and is
    /// handled there; anywhere else it propagates.
    #[error("framing error on the bus")]
    Framing,
    #[error("no terminal event within {0:?}")]
    Timeout(Duration),
    #[error("bridge transport failed: {0}")]
    Transport(String),
    #[error("unexpected response {value:#04x} to {context}")]
    Protocol { context: &'static str, value: u8 },
    #[error("no response while reading memory bank {bank} offset {offset}")]
    MemoryRead { bank: u8, offset: u8 },
}

/// A DALI bus a frame can be sent on.
///
/// Implemented by the USB bridge in `usbh-dali` and by the in-memory mock
/// used in tests. The provided methods compose the payloads for the frame
/// shapes DALI defines; implementors only supply [`send`](Self::send).
pub trait DaliBus {
    /// Transmit a frame and block until its terminal event: a backward
    /// frame, a silent response window, or an error.
    fn send(&mut self, frame: Frame) -> Result<Reply, DriverError>;

    /// Wait for the bus to settle, e.g. after `Randomise`. The default
    /// sleeps; test buses override this to run instantly.
    fn settle(&mut self, duration: Duration) {
        thread::sleep(duration);
    }

    /// Direct arc power control: drive `address` straight to `level`.
    fn direct_arc_power(&mut self, address: Address, level: u8) -> Result<Reply, DriverError> {
        self.send(Frame::short16(
            (address.selector() as u16) << 9 | level as u16,
        ))
    }

    /// Send an addressed command. Bit 8 distinguishes a command frame from
    /// direct arc power.
    fn command(
        &mut self,
        address: Address,
        command: Command,
        repeat: Repeat,
    ) -> Result<Reply, DriverError> {
        let payload = (address.selector() as u16) << 9 | 0x100 | command.opcode() as u16;
        self.send(Frame {
            kind: FrameKind::Short16,
            payload: payload as u32,
            repeat,
        })
    }

    /// Send a special command; its opcode occupies the address byte.
    fn special(
        &mut self,
        command: Special,
        parameter: u8,
        repeat: Repeat,
    ) -> Result<Reply, DriverError> {
        let payload = (command.opcode() as u16) << 8 | parameter as u16;
        self.send(Frame {
            kind: FrameKind::Short16,
            payload: payload as u32,
            repeat,
        })
    }

    /// Send a command to every device on the segment.
    fn broadcast(&mut self, command: Command, repeat: Repeat) -> Result<Reply, DriverError> {
        self.command(Address::Broadcast, command, repeat)
    }

    /// Suppress application-layer bus chatter during commissioning.
    fn start_quiescent(&mut self) -> Result<Reply, DriverError> {
        self.send(Frame::conf24(0xFF_FE1D).twice())
    }

    fn stop_quiescent(&mut self) -> Result<Reply, DriverError> {
        self.send(Frame::conf24(0xFF_FE1E).twice())
    }

    /// Read `count` consecutive bytes from a device memory bank.
    ///
    /// Stages the bank in DTR1 and the start offset in DTR0; the device
    /// auto-increments DTR0 after each `ReadMemoryLocation`, so the
    /// locations are read back to back with no further staging.
    fn read_memory(
        &mut self,
        address: Address,
        bank: u8,
        offset: u8,
        count: usize,
    ) -> Result<Vec<u8>, DriverError> {
        self.special(Special::SetDtr1, bank, Repeat::Single)?;
        self.special(Special::SetDtr0, offset, Repeat::Single)?;

        let mut buf = Vec::with_capacity(count);
        for i in 0..count {
            let byte = self
                .command(address, Command::ReadMemoryLocation, Repeat::Single)?
                .ok_or(DriverError::MemoryRead {
                    bank,
                    offset: offset.wrapping_add(i as u8),
                })?;
            buf.push(byte);
        }
        Ok(buf)
    }
}
