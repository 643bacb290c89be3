//! The bridge's vendor report layout.
//!
//! Outbound (host → bridge), 64 bytes, unspecified bytes zero:
//!
//! | Offset | Field | Value |
//! |---|---|---|
//! | 0 | direction | `0x12` (USB side) |
//! | 1 | sequence | host-allocated, never 0 |
//! | 2 | repeat | `0x20` for twin transmission, else `0x00` |
//! | 3 | frame type | `0x03` 16-bit, `0x04` 24-bit, `0x06` 24-bit config |
//! | 5..8 | payload | big-endian, high byte first |
//!
//! Inbound (bridge → host), 16 bytes of which the first 9 matter:
//!
//! | Offset | Field |
//! |---|---|
//! | 0 | direction (`0x11` DALI side, `0x12` USB side) |
//! | 1 | event |
//! | 3 | extended command byte |
//! | 4 | address byte |
//! | 5 | command / response byte |
//! | 6..8 | bridge-internal status (ignored) |
//! | 8 | sequence |

use daliusb_core::{Frame, FrameKind, Repeat};

use crate::transport::OUTBOUND_REPORT_LEN;

/// Which side of the bridge originated an inbound report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Traffic that originated on the DALI segment (wall switches, other
    /// masters).
    DaliSide,
    /// Echo of host-initiated traffic.
    UsbSide,
    Unknown(u8),
}

impl From<u8> for Direction {
    fn from(value: u8) -> Self {
        match value {
            0x11 => Direction::DaliSide,
            0x12 => Direction::UsbSide,
            other => Direction::Unknown(other),
        }
    }
}

/// What the bridge is reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// The response window elapsed with no backward frame.
    NoResponse,
    /// A backward frame arrived; its byte is in `command`.
    Response,
    /// The forward frame finished transmitting.
    TxComplete,
    /// A broadcast was observed on the segment.
    BroadcastReceived,
    /// Collision or corruption on the wire.
    FramingError,
    Unknown(u8),
}

impl From<u8> for Event {
    fn from(value: u8) -> Self {
        match value {
            0x71 => Event::NoResponse,
            0x72 => Event::Response,
            0x73 => Event::TxComplete,
            0x74 => Event::BroadcastReceived,
            0x77 => Event::FramingError,
            other => Event::Unknown(other),
        }
    }
}

/// A decoded inbound report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InboundReport {
    pub direction: Direction,
    pub event: Event,
    pub extended: u8,
    pub address: u8,
    pub command: u8,
    pub sequence: u8,
}

impl InboundReport {
    /// Decode the first 9 bytes of a report. Shorter buffers are not a
    /// report and decode to `None`.
    pub fn decode(raw: &[u8]) -> Option<Self> {
        if raw.len() < 9 {
            return None;
        }
        Some(Self {
            direction: Direction::from(raw[0]),
            event: Event::from(raw[1]),
            extended: raw[3],
            address: raw[4],
            command: raw[5],
            sequence: raw[8],
        })
    }
}

/// Build the 64-byte outbound report for `frame` under `sequence`.
pub fn encode_outbound(sequence: u8, frame: &Frame) -> [u8; OUTBOUND_REPORT_LEN] {
    let mut report = [0u8; OUTBOUND_REPORT_LEN];
    report[0] = 0x12;
    report[1] = sequence;
    report[2] = match frame.repeat {
        Repeat::Twice => 0x20,
        Repeat::Single => 0x00,
    };
    report[3] = match frame.kind {
        FrameKind::Short16 => 0x03,
        FrameKind::Long24 => 0x04,
        FrameKind::Conf24 => 0x06,
    };
    report[5] = (frame.payload >> 16) as u8;
    report[6] = (frame.payload >> 8) as u8;
    report[7] = frame.payload as u8;
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use daliusb_core::{Address, Command};

    #[test]
    fn encodes_short16_command() {
        // Addressed Off to short address 0: selector 0, command bit set.
        let payload =
            (Address::Short(0).selector() as u16) << 9 | 0x100 | Command::Off.opcode() as u16;
        let report = encode_outbound(1, &Frame::short16(payload));

        assert_eq!(&report[..8], &[0x12, 0x01, 0x00, 0x03, 0x00, 0x00, 0x01, 0x00]);
        assert!(report[8..].iter().all(|&byte| byte == 0));
    }

    #[test]
    fn encodes_short16_direct_arc_power() {
        let report = encode_outbound(1, &Frame::short16(0)); // level 0 at address 0
        assert_eq!(&report[..8], &[0x12, 0x01, 0x00, 0x03, 0x00, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn encodes_conf24_quiescent() {
        let report = encode_outbound(1, &Frame::conf24(0xFF_FE1D).twice());
        assert_eq!(&report[..8], &[0x12, 0x01, 0x20, 0x06, 0x00, 0xFF, 0xFE, 0x1D]);
        assert!(report[8..].iter().all(|&byte| byte == 0));
    }

    #[test]
    fn decodes_a_response_report() {
        let raw = [0x12, 0x72, 0x00, 0x00, 0xFF, 0x42, 0xFF, 0xFF, 0x1D, 0, 0, 0, 0, 0, 0, 0];
        let report = InboundReport::decode(&raw).unwrap();
        assert_eq!(
            report,
            InboundReport {
                direction: Direction::UsbSide,
                event: Event::Response,
                extended: 0x00,
                address: 0xFF,
                command: 0x42,
                sequence: 0x1D,
            }
        );
    }

    #[test]
    fn decodes_an_external_broadcast() {
        let raw = [0x11, 0x74, 0x00, 0x00, 0xFF, 0x05, 0xFF, 0xFF, 0x00];
        let report = InboundReport::decode(&raw).unwrap();
        assert_eq!(report.direction, Direction::DaliSide);
        assert_eq!(report.event, Event::BroadcastReceived);
        assert_eq!(report.sequence, 0);
    }

    #[test]
    fn rejects_short_reports() {
        assert!(InboundReport::decode(&[0x12, 0x72, 0x00]).is_none());
        assert!(InboundReport::decode(&[]).is_none());
    }

    #[test]
    fn unknown_tags_are_preserved() {
        let raw = [0x13, 0x76, 0, 0, 0, 0, 0, 0, 9];
        let report = InboundReport::decode(&raw).unwrap();
        assert_eq!(report.direction, Direction::Unknown(0x13));
        assert_eq!(report.event, Event::Unknown(0x76));
    }
}
