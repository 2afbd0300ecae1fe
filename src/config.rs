//! The 48-byte map configuration record.
//!
//! The typed fields are the owning form; the byte buffer is regenerated on
//! demand. Sizes travel as power-of-two codes packed into nibbles, and
//! several placements are non-obvious: PRG and SRM codes share a byte, the
//! save and load keys precede the menu key, and the byte after the CHR code
//! nibble reserves room for an extended mapper index.

use std::fmt;

use crate::rom::{Mirroring, NesRom};

/// Offset of the 16-byte payload inside the 48-byte record.
pub const CONFIG_BASE: usize = 32;

/// Full size of the record as stored in device memory.
pub const CONFIG_SIZE: usize = 48;

/// Horizontal mirroring.
pub const CFG_MIR_H: u8 = 0;
/// Vertical mirroring.
pub const CFG_MIR_V: u8 = 1;
/// Four-screen mirroring.
pub const CFG_MIR_4: u8 = 2;
/// Single-screen mirroring.
pub const CFG_MIR_1: u8 = 3;
/// CHR is RAM rather than ROM.
pub const CFG_CHR_RAM: u8 = 4;
/// Save RAM disabled.
pub const CFG_SRM_OFF: u8 = 8;

/// Delay reset handling.
pub const CTRL_RST_DELAY: u8 = 0x01;
/// Save states enabled.
pub const CTRL_SS_ON: u8 = 0x02;
/// Save-state button enabled.
pub const CTRL_SS_BTN: u8 = 0x08;
/// Unlock the menu core.
pub const CTRL_UNLOCK: u8 = 0x80;

const PRG_SIZE_BASE: u32 = 0x2000;
const CHR_SIZE_BASE: u32 = 0x2000;
const SRM_SIZE_BASE: u32 = 0x0080;

/// Key bitmask meaning "binding disabled".
pub const KEY_OFF: u8 = 0xFF;

/// Default save-state menu binding: start + down.
pub const KEY_SS_MENU: u8 = 0x14;

/// How the FPGA should configure itself for a loaded ROM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapConfig {
    /// Mapper slot; 255 is the OS/service slot.
    pub map_index: u8,
    pub prg_size: u32,
    pub chr_size: u32,
    pub srm_size: u32,
    pub master_vol: u8,
    pub ss_key_menu: u8,
    pub ss_key_save: u8,
    pub ss_key_load: u8,
    /// Mirroring in the low two bits, CHR-RAM and SRM-off flags, sub-mapper
    /// in the high nibble.
    pub map_cfg: u8,
    pub ctrl: u8,
}

impl Default for MapConfig {
    fn default() -> Self {
        MapConfig {
            map_index: 255,
            prg_size: 0,
            chr_size: 0,
            srm_size: 0,
            master_vol: 0,
            ss_key_menu: KEY_OFF,
            ss_key_save: KEY_OFF,
            ss_key_load: KEY_OFF,
            map_cfg: 0,
            ctrl: 0,
        }
    }
}

/// Smallest code `k <= 15` with `base << k >= size`, saturating at 15.
fn size_code(base: u32, size: u32) -> u8 {
    for code in 0..=15u8 {
        if base << code >= size {
            return code;
        }
    }
    15
}

impl MapConfig {
    /// Configuration for a parsed ROM: sizes and mirroring from the header,
    /// CHR-RAM when the image carries no CHR, default volume and the
    /// standard save-state menu binding.
    pub fn from_rom(rom: &NesRom) -> Self {
        let mut map_cfg = match rom.mirroring() {
            Mirroring::Horizontal => CFG_MIR_H,
            Mirroring::Vertical => CFG_MIR_V,
            Mirroring::FourScreen => CFG_MIR_4,
            Mirroring::OneScreen => CFG_MIR_1,
        };
        if rom.chr_size() == 0 {
            map_cfg |= CFG_CHR_RAM;
        }

        MapConfig {
            map_index: rom.mapper(),
            prg_size: rom.prg_size(),
            chr_size: rom.chr_size(),
            srm_size: rom.srm_size(),
            master_vol: 8,
            ss_key_menu: KEY_SS_MENU,
            ss_key_save: KEY_OFF,
            ss_key_load: KEY_OFF,
            map_cfg,
            ctrl: 0,
        }
    }

    /// Sub-mapper number from the high nibble of `map_cfg`.
    pub fn submap(&self) -> u8 {
        self.map_cfg >> 4
    }

    /// Serializes into the 48-byte device form. Bytes below
    /// [`CONFIG_BASE`] are zero.
    pub fn serialize(&self) -> [u8; CONFIG_SIZE] {
        let mut buf = [0u8; CONFIG_SIZE];
        let payload = &mut buf[CONFIG_BASE..];
        payload[0] = self.map_index;
        payload[1] =
            size_code(SRM_SIZE_BASE, self.srm_size) << 4 | size_code(PRG_SIZE_BASE, self.prg_size);
        // High nibble reserved for an extended mapper index.
        payload[2] = size_code(CHR_SIZE_BASE, self.chr_size);
        payload[3] = self.master_vol;
        payload[4] = self.map_cfg;
        payload[5] = self.ss_key_save;
        payload[6] = self.ss_key_load;
        payload[7] = self.ctrl;
        payload[8] = self.ss_key_menu;
        buf
    }

    /// Parses the 48-byte device form.
    pub fn from_bytes(buf: &[u8; CONFIG_SIZE]) -> Self {
        let payload = &buf[CONFIG_BASE..];
        MapConfig {
            map_index: payload[0],
            prg_size: PRG_SIZE_BASE << (payload[1] & 0x0F),
            chr_size: CHR_SIZE_BASE << (payload[2] & 0x0F),
            srm_size: SRM_SIZE_BASE << (payload[1] >> 4),
            master_vol: payload[3],
            ss_key_menu: payload[8],
            ss_key_save: payload[5],
            ss_key_load: payload[6],
            map_cfg: payload[4],
            ctrl: payload[7],
        }
    }

    /// The two payload halves as hex, the way the menu core dumps them.
    pub fn hex_dump(&self) -> String {
        let buf = self.serialize();
        let hex = |bytes: &[u8]| {
            bytes
                .iter()
                .map(|b| format!("{b:02x}"))
                .collect::<String>()
        };
        format!(
            " CFG0: {}\n CFG1: {}",
            hex(&buf[CONFIG_BASE..CONFIG_BASE + 8]),
            hex(&buf[CONFIG_BASE + 8..CONFIG_BASE + 16])
        )
    }
}

impl fmt::Display for MapConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let yes_no = |b: bool| if b { "yes" } else { "no" };

        writeln!(f, " mapper.....{} sub.{}", self.map_index, self.submap())?;
        writeln!(f, " prg size...{}K", self.prg_size / 1024)?;
        let chr_kind = if self.map_cfg & CFG_CHR_RAM != 0 {
            " ram"
        } else {
            ""
        };
        writeln!(f, " chr size...{}K{}", self.chr_size / 1024, chr_kind)?;
        if self.map_cfg & CFG_SRM_OFF != 0 {
            writeln!(f, " srm size...srm off")?;
        } else if self.srm_size < 1024 {
            writeln!(f, " srm size...{}B", self.srm_size)?;
        } else {
            writeln!(f, " srm size...{}K", self.srm_size / 1024)?;
        }
        writeln!(f, " master vol.{}", self.master_vol)?;
        let mir = match self.map_cfg & 3 {
            CFG_MIR_H => "h",
            CFG_MIR_V => "v",
            CFG_MIR_4 => "4",
            _ => "1",
        };
        writeln!(f, " mirroring..{mir}")?;
        writeln!(f, " cfg bits...{:08b}", self.map_cfg)?;
        writeln!(f, " menu key...0x{:02X}", self.ss_key_menu)?;
        writeln!(f, " save key...0x{:02X}", self.ss_key_save)?;
        writeln!(f, " load key...0x{:02X}", self.ss_key_load)?;
        writeln!(f, " rst delay..{}", yes_no(self.ctrl & CTRL_RST_DELAY != 0))?;
        writeln!(f, " save state.{}", yes_no(self.ctrl & CTRL_SS_ON != 0))?;
        writeln!(f, " ss button..{}", yes_no(self.ctrl & CTRL_SS_BTN != 0))?;
        writeln!(f, " unlock.....{}", yes_no(self.ctrl & CTRL_UNLOCK != 0))?;
        writeln!(f, " ctrl bits..{:08b}", self.ctrl)?;
        write!(f, "{}", self.hex_dump())
    }
}
