//! Core DALI (IEC 62386) bus logic for the `daliusb` tool.
//!
//! This crate is transport-free: everything here composes DALI frames and
//! drives protocol sequences through the [`DaliBus`] trait, which a bridge
//! crate (or a test double) implements. The pieces are:
//!
//! - [`command`]: the DALI command vocabulary, split into addressed
//!   commands and special commands because their opcode spaces overlap.
//! - [`driver`]: frame and address composition — the [`DaliBus`] trait and
//!   its provided send primitives.
//! - [`search`]: the search-address byte cache used during commissioning.
//! - [`commission`]: bus enumeration — binary search of the 24-bit search
//!   address space and short-address assignment.
//! - [`gear`]: the consumer-facing control gear API (scan, device info,
//!   lamp control).

pub mod command;
pub mod commission;
pub mod driver;
pub mod gear;
pub mod search;

pub use command::{Command, Special};
pub use commission::{Assignment, CommissionError, Commissioner, SearchResult, search_for_device};
pub use driver::{Address, DaliBus, DriverError, Frame, FrameKind, Repeat, Reply};
pub use search::SearchAddressSender;

#[cfg(test)]
pub(crate) mod testing;
