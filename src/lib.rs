//! Connecting to and communicating with an EverDrive-N8 flash cartridge over
//! its USB CDC serial link.
//!
//! <br>
//!
//! The N8 is a flash cartridge for the NES: on-board flash, RAM/ROM windows,
//! an FPGA that implements cartridge mappers, an SD card and a real-time
//! clock. When the cartridge is connected to a host over USB it enumerates as
//! a CDC serial device and speaks a framed binary protocol: four-byte command
//! preambles, little-endian scalars, length-prefixed strings, and per-block
//! acknowledgements for bulk transfers. This crate implements that protocol
//! and the layered operations on top of it: memory, flash and FPGA access,
//! the SD filesystem, the RTC, service/app mode switching, and the high-level
//! OS and game loading flows.
//!
//! Every byte position on the wire is part of the device contract. Response
//! sizes are implied by the command rather than carried on the wire, so a
//! desynchronized stream can only be recovered by closing and reopening the
//! port and re-entering a known mode.

/// N8 memory-mapped address of the map configuration record.
pub const ADDR_CFG: u32 = 0x0180_0000;
/// N8 memory-mapped address of the save-state region.
pub const ADDR_SSR: u32 = 0x0180_2000;
/// N8 memory-mapped address of the command FIFO.
pub const ADDR_FIFO: u32 = 0x0181_0000;

/// Flash window holding the menu 6502 code.
pub const ADDR_FLA_MENU: u32 = 0x0000_0000;
/// Flash window holding the FPGA core.
pub const ADDR_FLA_FPGA: u32 = 0x0004_0000;
/// Flash window holding the MCU recovery image.
pub const ADDR_FLA_ICOR: u32 = 0x0008_0000;

/// Size of the PRG ROM window.
pub const SIZE_PRG: u32 = 0x80_0000;
/// Size of the CHR ROM window.
pub const SIZE_CHR: u32 = 0x80_0000;
/// Size of the save RAM window.
pub const SIZE_SRM: u32 = 0x04_0000;

/// Block size of acknowledged bulk transfers. The device emits one ready
/// byte before each block.
pub const ACK_BLOCK_SIZE: u32 = 0x0400;

/// Error Module
pub mod error;
pub use error::{Error, Result};

/// Transport Module
pub mod link;
pub use link::{SerialLink, Transport, N8};

/// Command Module
pub mod cmd;

/// Hardware Records Module
pub mod hardware;
pub use hardware::{RtcTime, Vdc};

/// SD Filesystem Module
pub mod files;
pub use files::FileInfo;

/// Map Configuration Module
pub mod config;
pub use config::MapConfig;

/// ROM Model Module
pub mod rom;
pub use rom::NesRom;

/// High-Level Loading Module
pub mod loader;
