//! SD card filesystem and raw disk operations.
//!
//! File reads stream back in 4 KiB chunks, each prefixed by a status byte;
//! raw disk reads use 512-byte sectors the same way. Bulk writes go through
//! the acknowledged-block transfer. Soft status codes (directory already
//! exists, file not found) are NOT absorbed here; the loading layer decides
//! which of them are benign.

use log::debug;

use crate::cmd::{
    CMD_DISK_INIT, CMD_DISK_READ, CMD_FILE_CLOSE, CMD_FILE_CRC, CMD_FILE_DEL, CMD_FILE_DIR_GET,
    CMD_FILE_DIR_LD, CMD_FILE_DIR_MK, CMD_FILE_DIR_OPEN, CMD_FILE_DIR_READ, CMD_FILE_DIR_SIZE,
    CMD_FILE_INFO, CMD_FILE_OPEN, CMD_FILE_PTR, CMD_FILE_READ, CMD_FILE_READ_MEM, CMD_FILE_WRITE,
    CMD_FILE_WRITE_MEM, CRC_INIT_VAL,
};
use crate::error::{Error, Result};
use crate::link::N8;

/// Open for reading.
pub const FAT_READ: u8 = 0x01;
/// Open for writing.
pub const FAT_WRITE: u8 = 0x02;
/// Open only if the file exists.
pub const FAT_OPEN_EXISTING: u8 = 0x00;
/// Create, failing if the file exists.
pub const FAT_CREATE_NEW: u8 = 0x04;
/// Create, truncating an existing file.
pub const FAT_CREATE_ALWAYS: u8 = 0x08;
/// Open, creating the file if needed.
pub const FAT_OPEN_ALWAYS: u8 = 0x10;
/// Open for appending.
pub const FAT_OPEN_APPEND: u8 = 0x30;

/// File reads and writes move in blocks of this size.
pub const FILE_BLOCK: u32 = 0x1000;

/// Raw disk sector size.
pub const DISK_SECTOR: u32 = 512;

/// Directory record as the device serializes it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileInfo {
    pub size: u32,
    pub date: u16,
    pub time: u16,
    pub attributes: u8,
    pub name: String,
}

impl N8 {
    pub(crate) fn rx_file_info(&mut self) -> Result<FileInfo> {
        Ok(FileInfo {
            size: self.rx32()?,
            date: self.rx16()?,
            time: self.rx16()?,
            attributes: self.rx8()?,
            name: self.rx_string()?,
        })
    }

    /// Queries file info by path.
    pub fn get_file_info(&mut self, path: &str) -> Result<FileInfo> {
        self.tx_cmd(CMD_FILE_INFO)?;
        self.tx_string(path)?;
        let resp = self.rx8()?;
        if resp != 0 {
            return Err(Error::Status { code: resp });
        }
        self.rx_file_info()
    }

    /// Reads the next record from the open directory.
    ///
    /// A `max_name_len` of zero means unlimited.
    pub fn dir_read(&mut self, max_name_len: u16) -> Result<FileInfo> {
        let max_name_len = if max_name_len == 0 {
            0xFFFF
        } else {
            max_name_len
        };
        self.tx_cmd(CMD_FILE_DIR_READ)?;
        self.tx16(max_name_len)?;
        let resp = self.rx8()?;
        if resp != 0 {
            return Err(Error::Status { code: resp });
        }
        self.rx_file_info()
    }

    /// Reads `amount` records of the open directory starting at `start`.
    pub fn get_dir_records(
        &mut self,
        start: u16,
        amount: u16,
        max_name_len: u16,
    ) -> Result<Vec<FileInfo>> {
        self.tx_cmd(CMD_FILE_DIR_GET)?;
        self.tx16(start)?;
        self.tx16(amount)?;
        self.tx16(max_name_len)?;

        let mut records = Vec::with_capacity(amount as usize);
        for _ in 0..amount {
            let resp = self.rx8()?;
            if resp != 0 {
                return Err(Error::Status { code: resp });
            }
            records.push(self.rx_file_info()?);
        }
        Ok(records)
    }

    /// Opens a directory for reading.
    pub fn dir_open(&mut self, path: &str) -> Result<()> {
        self.tx_cmd(CMD_FILE_DIR_OPEN)?;
        self.tx_string(path)?;
        self.check_status()
    }

    /// Loads a directory listing, optionally sorted.
    pub fn dir_load(&mut self, path: &str, sorted: bool) -> Result<()> {
        self.tx_cmd(CMD_FILE_DIR_LD)?;
        self.tx8(sorted as u8)?;
        self.tx_string(path)?;
        self.check_status()
    }

    /// Number of records in the loaded directory.
    pub fn get_dir_size(&mut self) -> Result<u16> {
        self.tx_cmd(CMD_FILE_DIR_SIZE)?;
        self.rx16()
    }

    /// Creates a directory. Raises the raw status; an already-existing
    /// directory surfaces as `Status { code: 0x08 }` for the caller to judge.
    pub fn dir_make(&mut self, path: &str) -> Result<()> {
        self.tx_cmd(CMD_FILE_DIR_MK)?;
        self.tx_string(path)?;
        self.check_status()
    }

    /// Opens a file. The device reports failures through the status of the
    /// next operation, not here.
    pub fn open_file(&mut self, path: &str, mode: u8) -> Result<()> {
        debug!("open {path} mode {mode:#04x}");
        self.tx_cmd(CMD_FILE_OPEN)?;
        self.tx8(mode)?;
        self.tx_string(path)
    }

    /// Closes the open file.
    pub fn close_file(&mut self) -> Result<()> {
        self.tx_cmd(CMD_FILE_CLOSE)?;
        self.check_status()
    }

    /// Seeks the open file to `address`.
    pub fn file_set_pointer(&mut self, address: u32) -> Result<()> {
        self.tx_cmd(CMD_FILE_PTR)?;
        self.tx32(address)?;
        self.check_status()
    }

    /// Reads `length` bytes from the open file.
    pub fn read_file(&mut self, length: u32) -> Result<Vec<u8>> {
        self.tx_cmd(CMD_FILE_READ)?;
        self.tx32(length)?;

        let mut buf = Vec::with_capacity(length as usize);
        let mut remaining = length;
        while remaining > 0 {
            let chunk = remaining.min(FILE_BLOCK);
            let resp = self.rx8()?;
            if resp != 0 {
                return Err(Error::Status { code: resp });
            }
            buf.extend_from_slice(&self.rx_data(chunk as usize)?);
            remaining -= chunk;
        }
        Ok(buf)
    }

    /// Reads `length` bytes from the open file into mapped memory at
    /// `address`.
    pub fn read_file_to_memory(&mut self, mut address: u32, length: u32) -> Result<()> {
        let mut remaining = length;
        while remaining > 0 {
            let chunk = remaining.min(FILE_BLOCK);
            self.tx_cmd(CMD_FILE_READ_MEM)?;
            self.tx32(address)?;
            self.tx32(chunk)?;
            self.tx_cmd_exec()?;
            self.check_status()?;
            address += chunk;
            remaining -= chunk;
        }
        Ok(())
    }

    /// Writes `buf` to the open file.
    pub fn file_write(&mut self, buf: &[u8]) -> Result<()> {
        self.tx_cmd(CMD_FILE_WRITE)?;
        self.tx32(buf.len() as u32)?;
        self.tx_data_ack(buf)?;
        self.check_status()
    }

    /// Writes `length` bytes of mapped memory at `address` to the open file.
    pub fn write_file_from_memory(&mut self, mut address: u32, length: u32) -> Result<()> {
        let mut remaining = length;
        while remaining > 0 {
            let chunk = remaining.min(FILE_BLOCK);
            self.tx_cmd(CMD_FILE_WRITE_MEM)?;
            self.tx32(address)?;
            self.tx32(chunk)?;
            self.tx_cmd_exec()?;
            self.check_status()?;
            address += chunk;
            remaining -= chunk;
        }
        Ok(())
    }

    /// Has the device CRC `length` bytes of the open file.
    pub fn file_crc(&mut self, length: u32) -> Result<u32> {
        self.tx_cmd(CMD_FILE_CRC)?;
        self.tx32(length)?;
        self.tx32(CRC_INIT_VAL)?;
        let resp = self.rx8()?;
        if resp != 0 {
            return Err(Error::Status { code: resp });
        }
        self.rx32()
    }

    /// Deletes a file or directory. Raises the raw status; a missing path
    /// surfaces as `Status { code: 0x04 }` for the caller to judge.
    pub fn file_delete(&mut self, path: &str) -> Result<()> {
        self.tx_cmd(CMD_FILE_DEL)?;
        self.tx_string(path)?;
        self.check_status()
    }

    /// Initializes the SD card.
    pub fn disk_init(&mut self) -> Result<()> {
        self.tx_cmd(CMD_DISK_INIT)?;
        self.check_status()
    }

    /// Reads `sectors` raw 512-byte sectors starting at `address`.
    pub fn disk_read(&mut self, address: u32, sectors: u32) -> Result<Vec<u8>> {
        self.tx_cmd(CMD_DISK_READ)?;
        self.tx32(address)?;
        self.tx32(sectors)?;

        let mut buf = Vec::with_capacity((sectors * DISK_SECTOR) as usize);
        for _ in 0..sectors {
            let resp = self.rx8()?;
            if resp != 0 {
                return Err(Error::Status { code: resp });
            }
            buf.extend_from_slice(&self.rx_data(DISK_SECTOR as usize)?);
        }
        Ok(buf)
    }
}
