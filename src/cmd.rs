//! Command opcodes and the typed operations built on them.
//!
//! Commands come in two shapes. Write-only commands send the preamble, their
//! parameters and an exec trigger, then optionally read a fixed-size response
//! or a status word. Streaming commands move bulk data in device-gated
//! blocks; see [`crate::link::N8::tx_data_ack`] and the per-chunk loops in
//! [`crate::files`].

use log::debug;

use crate::config::MapConfig;
use crate::error::{Error, Result};
use crate::hardware::{RtcTime, Vdc, RTC_DATA_SIZE, VDC_DATA_SIZE};
use crate::link::N8;
use crate::{ADDR_CFG, ADDR_FIFO};

/// Exec trigger for multi-phase commands.
pub const CMD_EXEC: u8 = 0x00;
/// Query the status word.
pub const CMD_STATUS: u8 = 0x10;
/// Query the firmware mode byte.
pub const CMD_GET_MODE: u8 = 0x11;
/// Reset into service mode.
pub const CMD_HARD_RESET: u8 = 0x12;
/// Read the voltage monitor.
pub const CMD_GET_VDC: u8 = 0x13;
/// Read the real-time clock.
pub const CMD_RTC_GET: u8 = 0x14;
/// Set the real-time clock.
pub const CMD_RTC_SET: u8 = 0x15;
/// Read from flash.
pub const CMD_FLA_RD: u8 = 0x16;
/// Write to flash.
pub const CMD_FLA_WR: u8 = 0x17;
/// Write to flash from an SD file (not driven by this host).
pub const CMD_FLA_WR_SDC: u8 = 0x18;
/// Read from mapped memory.
pub const CMD_MEM_RD: u8 = 0x19;
/// Write to mapped memory.
pub const CMD_MEM_WR: u8 = 0x1A;
/// Fill mapped memory with a byte value.
pub const CMD_MEM_SET: u8 = 0x1B;
/// Test mapped memory against a byte value.
pub const CMD_MEM_TST: u8 = 0x1C;
/// CRC a region of mapped memory.
pub const CMD_MEM_CRC: u8 = 0x1D;
/// Configure the FPGA from a host-streamed image.
pub const CMD_FPGA_USB: u8 = 0x1E;
/// Configure the FPGA from the open SD file.
pub const CMD_FPGA_SDC: u8 = 0x1F;
/// Configure the FPGA from a flash window.
pub const CMD_FPGA_FLA: u8 = 0x20;
/// Reconfigure the FPGA from its current image (not driven by this host).
pub const CMD_FPGA_CFG: u8 = 0x21;
/// USB passthrough write (not driven by this host).
pub const CMD_USB_WR: u8 = 0x22;
/// FIFO passthrough write (not driven by this host).
pub const CMD_FIFO_WR: u8 = 0x23;
/// UART passthrough write (not driven by this host).
pub const CMD_UART_WR: u8 = 0x24;
/// Reinitialize the device side (not driven by this host).
pub const CMD_REINIT: u8 = 0x25;
/// Query system info (not driven by this host).
pub const CMD_SYS_INF: u8 = 0x26;
/// Game controller state (not driven by this host).
pub const CMD_GAME_CTR: u8 = 0x27;
/// Execute a firmware update (not driven by this host).
pub const CMD_UPD_EXEC: u8 = 0x28;
/// Initialize the SD card.
pub const CMD_DISK_INIT: u8 = 0xC0;
/// Read raw SD sectors.
pub const CMD_DISK_READ: u8 = 0xC1;
/// Write raw SD sectors (not driven by this host).
pub const CMD_DISK_WRITE: u8 = 0xC2;
/// Open a directory.
pub const CMD_FILE_DIR_OPEN: u8 = 0xC3;
/// Read the next directory record.
pub const CMD_FILE_DIR_READ: u8 = 0xC4;
/// Load a directory listing.
pub const CMD_FILE_DIR_LD: u8 = 0xC5;
/// Query the loaded directory's record count.
pub const CMD_FILE_DIR_SIZE: u8 = 0xC6;
/// Query the loaded directory's path (not driven by this host).
pub const CMD_FILE_DIR_PATH: u8 = 0xC7;
/// Read a range of directory records.
pub const CMD_FILE_DIR_GET: u8 = 0xC8;
/// Open a file.
pub const CMD_FILE_OPEN: u8 = 0xC9;
/// Read from the open file to the host.
pub const CMD_FILE_READ: u8 = 0xCA;
/// Read from the open file into mapped memory.
pub const CMD_FILE_READ_MEM: u8 = 0xCB;
/// Write host data to the open file.
pub const CMD_FILE_WRITE: u8 = 0xCC;
/// Write mapped memory to the open file.
pub const CMD_FILE_WRITE_MEM: u8 = 0xCD;
/// Close the open file.
pub const CMD_FILE_CLOSE: u8 = 0xCE;
/// Seek the open file.
pub const CMD_FILE_PTR: u8 = 0xCF;
/// Query file info by path.
pub const CMD_FILE_INFO: u8 = 0xD0;
/// CRC the open file.
pub const CMD_FILE_CRC: u8 = 0xD1;
/// Create a directory.
pub const CMD_FILE_DIR_MK: u8 = 0xD2;
/// Delete a file or directory.
pub const CMD_FILE_DEL: u8 = 0xD3;
/// Start MCU core recovery.
pub const CMD_USB_RECOV: u8 = 0xF0;
/// Leave service mode and start the app.
pub const CMD_RUN_APP: u8 = 0xF1;

/// Mode byte reported while the device is in service mode.
pub const MODE_SERVICE: u8 = 0xA1;

/// Initial value for device-side CRC calculations.
pub const CRC_INIT_VAL: u32 = 0x0000;

/// Memory reads larger than this corrupt data on the device, so
/// [`N8::read_memory`] issues one command per block of this size.
pub const MEM_READ_BLOCK: u32 = 0x20;

impl N8 {
    /// Reads the firmware mode byte. See [`MODE_SERVICE`].
    pub fn get_mode(&mut self) -> Result<u8> {
        self.tx_cmd(CMD_GET_MODE)?;
        self.rx8()
    }

    /// Reads the voltage monitor.
    pub fn get_vdc(&mut self) -> Result<Vdc> {
        self.tx_cmd(CMD_GET_VDC)?;
        let buf = self.rx_array::<VDC_DATA_SIZE>()?;
        Ok(Vdc::from_bytes(&buf))
    }

    /// Reads the real-time clock.
    pub fn get_rtc(&mut self) -> Result<RtcTime> {
        self.tx_cmd(CMD_RTC_GET)?;
        let buf = self.rx_array::<RTC_DATA_SIZE>()?;
        Ok(RtcTime::from_bytes(&buf))
    }

    /// Sets the real-time clock.
    pub fn set_rtc(&mut self, time: &RtcTime) -> Result<()> {
        self.tx_cmd(CMD_RTC_SET)?;
        self.tx_data(&time.to_bytes())
    }

    //
    // Flash
    //

    /// Reads `length` bytes of flash starting at `addr`.
    pub fn read_flash(&mut self, addr: u32, length: u32) -> Result<Vec<u8>> {
        self.tx_cmd(CMD_FLA_RD)?;
        self.tx32(addr)?;
        self.tx32(length)?;
        self.rx_data(length as usize)
    }

    /// Writes `buf` to flash at `addr`.
    ///
    /// The device gates each block with a ready byte and reports a status
    /// word once the whole image is programmed.
    pub fn write_flash(&mut self, addr: u32, buf: &[u8]) -> Result<()> {
        debug!("flash write {:#010x} len {}", addr, buf.len());
        self.tx_cmd(CMD_FLA_WR)?;
        self.tx32(addr)?;
        self.tx32(buf.len() as u32)?;
        self.tx_data_ack(buf)?;
        self.check_status()
    }

    //
    // Memory
    //

    /// Reads `length` bytes of mapped memory starting at `addr`, one command
    /// per [`MEM_READ_BLOCK`] bytes.
    pub fn read_memory(&mut self, mut addr: u32, length: u32) -> Result<Vec<u8>> {
        if length == 0 {
            return Err(Error::EmptyRead);
        }
        let mut buf = Vec::with_capacity(length as usize);
        let mut remaining = length;
        while remaining > 0 {
            let chunk = remaining.min(MEM_READ_BLOCK);
            self.tx_cmd(CMD_MEM_RD)?;
            self.tx32(addr)?;
            self.tx32(chunk)?;
            self.tx_cmd_exec()?;
            buf.extend_from_slice(&self.rx_data(chunk as usize)?);
            addr += chunk;
            remaining -= chunk;
        }
        Ok(buf)
    }

    /// Writes `buf` to mapped memory at `addr`. The payload follows the exec
    /// trigger raw, with no per-block acknowledgement.
    pub fn write_memory(&mut self, addr: u32, buf: &[u8]) -> Result<()> {
        if buf.is_empty() {
            return Err(Error::EmptyWrite);
        }
        self.tx_cmd(CMD_MEM_WR)?;
        self.tx32(addr)?;
        self.tx32(buf.len() as u32)?;
        self.tx_cmd_exec()?;
        self.tx_data(buf)
    }

    /// Fills `length` bytes of mapped memory at `addr` with `value`.
    pub fn memory_set(&mut self, addr: u32, value: u8, length: u32) -> Result<()> {
        self.tx_cmd(CMD_MEM_SET)?;
        self.tx32(addr)?;
        self.tx32(length)?;
        self.tx8(value)?;
        self.tx_cmd_exec()?;
        self.check_status()
    }

    /// Tests whether `length` bytes of mapped memory at `addr` all hold
    /// `value`.
    pub fn memory_test(&mut self, addr: u32, value: u8, length: u32) -> Result<bool> {
        self.tx_cmd(CMD_MEM_TST)?;
        self.tx32(addr)?;
        self.tx32(length)?;
        self.tx8(value)?;
        self.tx_cmd_exec()?;
        Ok(self.rx8()? != 0)
    }

    /// Has the device CRC `length` bytes of mapped memory at `addr`.
    pub fn memory_crc(&mut self, addr: u32, length: u32) -> Result<u32> {
        self.tx_cmd(CMD_MEM_CRC)?;
        self.tx32(addr)?;
        self.tx32(length)?;
        self.tx32(CRC_INIT_VAL)?;
        self.tx_cmd_exec()?;
        self.rx32()
    }

    /// Writes `buf` to the command FIFO.
    pub fn fifo_write(&mut self, buf: &[u8]) -> Result<()> {
        self.write_memory(ADDR_FIFO, buf)
    }

    //
    // FPGA
    //

    /// Configures the FPGA from a host buffer.
    pub fn fpga_init(&mut self, image: &[u8], config: Option<&MapConfig>) -> Result<()> {
        debug!("fpga init from host, {} bytes", image.len());
        self.tx_cmd(CMD_FPGA_USB)?;
        self.tx32(image.len() as u32)?;
        self.tx_data_ack(image)?;
        self.fpga_post_init(config)
    }

    /// Configures the FPGA from a flash window.
    pub fn fpga_init_from_flash(&mut self, addr: u32, config: Option<&MapConfig>) -> Result<()> {
        debug!("fpga init from flash {addr:#010x}");
        self.tx_cmd(CMD_FPGA_FLA)?;
        self.tx32(addr)?;
        self.tx_cmd_exec()?;
        self.fpga_post_init(config)
    }

    /// Configures the FPGA from a file on the SD card.
    pub fn fpga_init_from_sd(&mut self, path: &str, config: Option<&MapConfig>) -> Result<()> {
        debug!("fpga init from sd {path}");
        let info = self.get_file_info(path)?;
        self.open_file(path, crate::files::FAT_READ)?;
        self.check_status()?;
        self.tx_cmd(CMD_FPGA_SDC)?;
        self.tx32(info.size)?;
        self.tx_cmd_exec()?;
        self.fpga_post_init(config)
    }

    /// Verifies the device came up after an FPGA init and, when a
    /// configuration is given, writes it to the config region.
    fn fpga_post_init(&mut self, config: Option<&MapConfig>) -> Result<()> {
        self.check_status()?;
        match config {
            Some(config) => self.write_memory(ADDR_CFG, &config.serialize()),
            None => Ok(()),
        }
    }
}
