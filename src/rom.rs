//! iNES and FDS ROM images, and where they land in cartridge memory.

use std::fmt;
use std::path::Path;

use crc::Crc;

use crate::error::{Error, Result};

/// Load address of PRG ROM.
pub const ADDR_PRG: u32 = 0x0000_0000;
/// Load address of CHR ROM.
pub const ADDR_CHR: u32 = 0x0080_0000;
/// Load address of save RAM.
pub const ADDR_SRM: u32 = 0x0100_0000;

/// PRG load address for OS images.
pub const ADDR_OS_PRG: u32 = ADDR_PRG + 0x7E_0000;
/// CHR load address for OS images.
pub const ADDR_OS_CHR: u32 = ADDR_CHR + 0x7E_0000;

/// Payload bytes of one FDS disk side.
pub const FDS_DISK_SIZE: u32 = 65_500;

/// At most this many bytes participate in the identity CRC.
pub const MAX_ID_CALC_LEN: u32 = 0x10_0000;

const CRC32: Crc<u32> = Crc::<u32>::new(&crc::CRC_32_ISO_HDLC);

/// What kind of image was parsed. Mapper 255 marks an OS image, which loads
/// at the OS addresses instead of the ROM window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RomKind {
    Nes,
    Fds,
    Os,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mirroring {
    Horizontal,
    Vertical,
    FourScreen,
    OneScreen,
}

impl Mirroring {
    pub fn letter(self) -> char {
        match self {
            Mirroring::Horizontal => 'H',
            Mirroring::Vertical => 'V',
            Mirroring::FourScreen => '4',
            Mirroring::OneScreen => '1',
        }
    }
}

/// A parsed ROM image.
pub struct NesRom {
    name: String,
    prg: Vec<u8>,
    chr: Vec<u8>,
    header: [u8; 32],
    crc: u32,
    srm_size: u32,
    mapper: u8,
    mirroring: Mirroring,
    bat_ram: bool,
    kind: RomKind,
    prg_addr: u32,
    chr_addr: u32,
}

impl NesRom {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read(path)
            .map_err(|e| Error::io(e, format!("reading ROM {}", path.display())))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::from_bytes(name, &data)
    }

    /// Parses an iNES or FDS image. FDS images may carry a 16-byte wrapper
    /// header; both layouts are recognized.
    pub fn from_bytes(name: String, data: &[u8]) -> Result<Self> {
        if data.len() < 32 {
            return Err(Error::RomFormat);
        }
        let mut header = [0u8; 32];
        header.copy_from_slice(&data[..32]);

        let nes = &header[0..3] == b"NES";
        let fds00 = &header[11..14] == b"HVC";
        let fds16 = &header[27..30] == b"HVC";

        if nes {
            Self::parse_ines(name, data, header)
        } else if fds00 || fds16 {
            Self::parse_fds(name, data, header, if fds00 { 0 } else { 16 })
        } else {
            Err(Error::RomFormat)
        }
    }

    fn parse_ines(name: String, data: &[u8], header: [u8; 32]) -> Result<Self> {
        let data_base = 16usize;
        let mut prg_size = u32::from(data[4]) * 16 * 1024;
        let chr_size = u32::from(data[5]) * 8 * 1024;
        if prg_size == 0 {
            prg_size = 0x40_0000;
        }

        let mapper = (data[6] >> 4) | (data[7] & 0xF0);
        let mut mirroring = if data[6] & 1 == 0 {
            Mirroring::Horizontal
        } else {
            Mirroring::Vertical
        };
        if data[6] & 8 != 0 {
            mirroring = Mirroring::FourScreen;
        }
        let bat_ram = data[6] & 2 != 0;

        let (kind, prg_addr, chr_addr) = if mapper == 255 {
            (RomKind::Os, ADDR_OS_PRG, ADDR_OS_CHR)
        } else {
            (RomKind::Nes, ADDR_PRG, ADDR_CHR)
        };

        let prg = copy_clamped(data, data_base, prg_size as usize);
        let chr = copy_clamped(data, data_base + prg.len(), chr_size as usize);

        Ok(NesRom {
            crc: identity_crc(data, data_base),
            name,
            prg,
            chr,
            header,
            srm_size: 8192,
            mapper,
            mirroring,
            bat_ram,
            kind,
            prg_addr,
            chr_addr,
        })
    }

    fn parse_fds(name: String, data: &[u8], header: [u8; 32], data_base: usize) -> Result<Self> {
        let disk_data = &data[data_base..];
        // Each 65,500-byte disk side occupies a 64 KiB page.
        let mut prg_size = (disk_data.len() as u32 / FDS_DISK_SIZE) * 0x1_0000;
        if prg_size < disk_data.len() as u32 {
            prg_size += 0x1_0000;
        }

        let mut prg = vec![0u8; prg_size as usize];
        for (page, disk) in disk_data.chunks(FDS_DISK_SIZE as usize).enumerate() {
            let dst = page * 0x1_0000;
            prg[dst..dst + disk.len()].copy_from_slice(disk);
        }

        Ok(NesRom {
            crc: identity_crc(data, data_base),
            name,
            prg,
            chr: Vec::new(),
            header,
            srm_size: 32_768,
            mapper: 254,
            mirroring: Mirroring::Horizontal,
            bat_ram: false,
            kind: RomKind::Fds,
            prg_addr: ADDR_SRM,
            chr_addr: ADDR_CHR,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> RomKind {
        self.kind
    }

    pub fn prg_data(&self) -> &[u8] {
        &self.prg
    }

    pub fn chr_data(&self) -> &[u8] {
        &self.chr
    }

    pub fn prg_size(&self) -> u32 {
        self.prg.len() as u32
    }

    pub fn chr_size(&self) -> u32 {
        self.chr.len() as u32
    }

    pub fn srm_size(&self) -> u32 {
        self.srm_size
    }

    pub fn prg_addr(&self) -> u32 {
        self.prg_addr
    }

    pub fn chr_addr(&self) -> u32 {
        self.chr_addr
    }

    pub fn mapper(&self) -> u8 {
        self.mapper
    }

    pub fn mirroring(&self) -> Mirroring {
        self.mirroring
    }

    pub fn bat_ram(&self) -> bool {
        self.bat_ram
    }

    pub fn header(&self) -> &[u8; 32] {
        &self.header
    }

    /// Identity of the image: CRC-32 over up to 1 MiB of data past the
    /// header base.
    pub fn crc(&self) -> u32 {
        self.crc
    }
}

impl fmt::Display for NesRom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Mapper   : {}", self.mapper)?;
        writeln!(
            f,
            "PRG SIZE : {}K ({} x 16K)",
            self.prg.len() / 1024,
            self.prg.len() / 1024 / 16
        )?;
        writeln!(
            f,
            "CHR SIZE : {}K ({} x 8K)",
            self.chr.len() / 1024,
            self.chr.len() / 1024 / 8
        )?;
        writeln!(f, "SRM SIZE : {}K", self.srm_size / 1024)?;
        writeln!(f, "Mirroring: {}", self.mirroring.letter())?;
        writeln!(f, "BAT RAM  : {}", if self.bat_ram { "Yes" } else { "No" })?;
        write!(f, "ROM ID   : 0x{:08X}", self.crc)
    }
}

fn identity_crc(data: &[u8], data_base: usize) -> u32 {
    let len = (data.len() - data_base).min(MAX_ID_CALC_LEN as usize);
    CRC32.checksum(&data[data_base..data_base + len])
}

/// Copies `len` bytes from `data[start..]`, zero-filling anything past the
/// end of the image.
fn copy_clamped(data: &[u8], start: usize, len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    if start < data.len() {
        let available = (data.len() - start).min(len);
        buf[..available].copy_from_slice(&data[start..start + available]);
    }
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal iNES image with the given bank counts and flag bytes.
    fn build_ines(prg_16k: u8, chr_8k: u8, flags6: u8, flags7: u8) -> Vec<u8> {
        let mut v = Vec::new();
        v.extend_from_slice(b"NES\x1A");
        v.push(prg_16k);
        v.push(chr_8k);
        v.push(flags6);
        v.push(flags7);
        v.extend_from_slice(&[0u8; 8]);
        v.extend(std::iter::repeat(0xEA).take(prg_16k as usize * 16 * 1024));
        v.extend(std::iter::repeat(0x00).take(chr_8k as usize * 8 * 1024));
        v
    }

    /// FDS image of `disks` sides, optionally with the 16-byte wrapper.
    fn build_fds(disks: usize, wrapper: bool) -> Vec<u8> {
        let mut v = Vec::new();
        if wrapper {
            v.extend_from_slice(&[0u8; 16]);
        }
        let mut disk = vec![0x01u8; FDS_DISK_SIZE as usize];
        disk[11..14].copy_from_slice(b"HVC");
        for _ in 0..disks {
            v.extend_from_slice(&disk);
        }
        v
    }

    #[test]
    fn ines_sizes_and_mapper_come_from_the_header() {
        let rom = NesRom::from_bytes("a.nes".into(), &build_ines(2, 1, 0x10, 0x20)).unwrap();
        assert_eq!(rom.kind(), RomKind::Nes);
        assert_eq!(rom.prg_size(), 32 * 1024);
        assert_eq!(rom.chr_size(), 8 * 1024);
        assert_eq!(rom.srm_size(), 8192);
        // Mapper low nibble from flags6 high bits, high nibble from flags7.
        assert_eq!(rom.mapper(), 0x21);
        assert_eq!(rom.prg_addr(), ADDR_PRG);
        assert_eq!(rom.chr_addr(), ADDR_CHR);
    }

    #[test]
    fn ines_zero_prg_count_means_four_megabytes() {
        let rom = NesRom::from_bytes("big.nes".into(), &build_ines(0, 0, 0, 0)).unwrap();
        assert_eq!(rom.prg_size(), 0x40_0000);
    }

    #[test]
    fn ines_mirroring_flags() {
        let h = NesRom::from_bytes("h.nes".into(), &build_ines(1, 1, 0x00, 0)).unwrap();
        assert_eq!(h.mirroring(), Mirroring::Horizontal);
        let v = NesRom::from_bytes("v.nes".into(), &build_ines(1, 1, 0x01, 0)).unwrap();
        assert_eq!(v.mirroring(), Mirroring::Vertical);
        // Four-screen overrides the horizontal/vertical bit.
        let four = NesRom::from_bytes("4.nes".into(), &build_ines(1, 1, 0x09, 0)).unwrap();
        assert_eq!(four.mirroring(), Mirroring::FourScreen);
    }

    #[test]
    fn ines_battery_flag() {
        let rom = NesRom::from_bytes("bat.nes".into(), &build_ines(1, 1, 0x02, 0)).unwrap();
        assert!(rom.bat_ram());
    }

    #[test]
    fn mapper_255_is_an_os_image_at_the_os_addresses() {
        let rom = NesRom::from_bytes("os.nes".into(), &build_ines(1, 1, 0xF0, 0xF0)).unwrap();
        assert_eq!(rom.kind(), RomKind::Os);
        assert_eq!(rom.prg_addr(), ADDR_OS_PRG);
        assert_eq!(rom.chr_addr(), ADDR_OS_CHR);
    }

    #[test]
    fn fds_sides_round_up_to_64k_pages() {
        let rom = NesRom::from_bytes("game.fds".into(), &build_fds(2, false)).unwrap();
        assert_eq!(rom.kind(), RomKind::Fds);
        assert_eq!(rom.mapper(), 254);
        assert_eq!(rom.srm_size(), 32 * 1024);
        assert_eq!(rom.prg_size(), 2 * 0x1_0000);
        assert_eq!(rom.chr_size(), 0);
        assert_eq!(rom.prg_addr(), ADDR_SRM);
        // Second side starts at the second page, not right after the first.
        assert_eq!(rom.prg_data()[0x1_0000], 0x01);
        assert_eq!(rom.prg_data()[FDS_DISK_SIZE as usize], 0x00);
    }

    #[test]
    fn fds_wrapper_header_is_skipped() {
        let plain = NesRom::from_bytes("a.fds".into(), &build_fds(1, false)).unwrap();
        let wrapped = NesRom::from_bytes("b.fds".into(), &build_fds(1, true)).unwrap();
        assert_eq!(plain.prg_size(), wrapped.prg_size());
        assert_eq!(plain.crc(), wrapped.crc());
        assert_eq!(plain.prg_data(), wrapped.prg_data());
    }

    #[test]
    fn unknown_magic_is_rejected() {
        let data = vec![0x42u8; 64];
        assert!(matches!(
            NesRom::from_bytes("x.bin".into(), &data),
            Err(Error::RomFormat)
        ));
    }

    #[test]
    fn tiny_files_are_rejected() {
        assert!(matches!(
            NesRom::from_bytes("x.bin".into(), &[0u8; 8]),
            Err(Error::RomFormat)
        ));
    }

    #[test]
    fn identity_crc_covers_data_past_the_header() {
        // The algorithm is plain IEEE CRC-32; its check value is fixed.
        assert_eq!(CRC32.checksum(b"123456789"), 0xCBF43926);

        let image = build_ines(1, 1, 0, 0);
        let rom = NesRom::from_bytes("a.nes".into(), &image).unwrap();
        assert_eq!(rom.crc(), CRC32.checksum(&image[16..]));
    }

    #[test]
    fn identity_crc_is_capped_at_one_megabyte() {
        let image = build_ines(0x80, 0, 0, 0); // 2 MiB of PRG
        let rom = NesRom::from_bytes("big.nes".into(), &image).unwrap();
        assert_eq!(
            rom.crc(),
            CRC32.checksum(&image[16..16 + MAX_ID_CALC_LEN as usize])
        );
    }
}
