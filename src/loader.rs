//! High-level flows: mode switching, reboot, recovery, and the OS/game
//! loading sequences.
//!
//! This layer is the only place that forgives the soft status codes: a
//! directory that already exists, a delete target that is already gone, and
//! the recovery-specific terminal codes. Everything below raises raw status.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};

use crate::cmd::{CMD_HARD_RESET, CMD_RUN_APP, CMD_USB_RECOV, MODE_SERVICE};
use crate::config::{MapConfig, CONFIG_SIZE, CTRL_UNLOCK};
use crate::error::{Error, Result};
use crate::files::{FAT_CREATE_ALWAYS, FAT_READ, FAT_WRITE};
use crate::link::{N8, DEFAULT_READ_TIMEOUT, SERIAL_SETTLE};
use crate::rom::NesRom;
use crate::{ADDR_CFG, ADDR_FLA_ICOR};

/// First byte of every FIFO opcode packet.
pub const FIFO_PREFIX: u8 = b'*';
/// FIFO opcode: self test.
pub const FIFO_TEST: u8 = b't';
/// FIFO opcode: reboot the cartridge.
pub const FIFO_REBOOT: u8 = b'r';
/// FIFO opcode: halt the cartridge.
pub const FIFO_HALT: u8 = b'h';
/// FIFO opcode: select a game by path.
pub const FIFO_SELECT_GAME: u8 = b'n';
/// FIFO opcode: run the selected game.
pub const FIFO_RUN_GAME: u8 = b's';

/// Status code for a directory that already exists.
pub const MKDIR_DIR_EXISTS: u8 = 0x08;
/// Status code for deleting a path that does not exist.
pub const DELETE_FILE_NOT_FOUND: u8 = 0x04;
/// Status code for a recovery image identical to the running core.
pub const RECOVERY_CORE_MATCHES: u8 = 0x88;

/// Mapper table on the SD card: one pack number per 8-bit mapper id.
pub const SD_MAPROUT: &str = "EDN8/MAPROUT.BIN";
const SD_MAPROUT_LEN: u32 = 4096;

/// Directory that receives host-uploaded games.
pub const SD_GAME_DIR: &str = "usb_games";

/// Read timeout while the MCU reflashes itself.
const RECOVERY_READ_TIMEOUT: Duration = Duration::from_secs(8);

const BOOT_RETRIES: u32 = 10;

impl N8 {
    //
    // Modes
    //

    /// Whether the device firmware is in service mode.
    pub fn is_service_mode(&mut self) -> Result<bool> {
        Ok(self.get_mode()? == MODE_SERVICE)
    }

    /// Resets into service mode if the device is not already there.
    pub fn enter_service_mode(&mut self) -> Result<()> {
        if self.is_service_mode()? {
            return Ok(());
        }

        info!("resetting into service mode");
        self.tx_cmd(CMD_HARD_RESET)?;
        self.tx_cmd_exec()?;
        self.boot_wait()?;

        if !self.is_service_mode()? {
            return Err(Error::StuckInAppMode);
        }
        Ok(())
    }

    /// Starts the app if the device is in service mode.
    pub fn exit_service_mode(&mut self) -> Result<()> {
        if !self.is_service_mode()? {
            return Ok(());
        }

        info!("starting the app");
        self.tx_cmd(CMD_RUN_APP)?;
        self.tx_cmd_exec()?;
        self.boot_wait()?;

        if self.is_service_mode()? {
            return Err(Error::StuckInServiceMode);
        }
        Ok(())
    }

    /// Cycles the port until the device answers a status query again.
    ///
    /// The CDC endpoint disappears while the cartridge reboots, so each
    /// attempt closes and reopens the port around a settle sleep.
    fn boot_wait(&mut self) -> Result<()> {
        for attempt in 0..BOOT_RETRIES {
            self.link().close()?;
            thread::sleep(SERIAL_SETTLE);
            self.link().reopen(DEFAULT_READ_TIMEOUT)?;
            thread::sleep(SERIAL_SETTLE);

            if self.get_status().is_ok() {
                debug!("device back after {} attempts", attempt + 1);
                return Ok(());
            }
        }
        Err(Error::BootTimeout)
    }

    //
    // FIFO channel
    //

    /// Fires a two-byte opcode packet at the command FIFO.
    pub fn fifo_command(&mut self, op: u8) -> Result<()> {
        self.fifo_write(&[FIFO_PREFIX, op])
    }

    /// Sends a length-prefixed string through the FIFO.
    pub fn send_string_fifo(&mut self, s: &str) -> Result<()> {
        self.fifo_write(&(s.len() as u16).to_le_bytes())?;
        self.fifo_write(s.as_bytes())
    }

    /// Reboots the cartridge and leaves it in app mode.
    pub fn reboot(&mut self) -> Result<()> {
        self.fifo_command(FIFO_REBOOT)?;
        let resp = self.rx8()?;
        if resp != 0 {
            return Err(Error::Status { code: resp });
        }
        self.exit_service_mode()
    }

    /// Halts the menu core.
    pub fn halt(&mut self) -> Result<()> {
        self.set_config(&MapConfig::default())?;
        self.fifo_command(FIFO_HALT)?;
        let resp = self.rx8()?;
        if resp != 0 {
            return Err(Error::Status { code: resp });
        }
        Ok(())
    }

    /// Releases a halted menu core.
    pub fn halt_exit(&mut self) -> Result<()> {
        let config = MapConfig {
            ctrl: CTRL_UNLOCK,
            ..MapConfig::default()
        };
        self.set_config(&config)
    }

    //
    // Configuration
    //

    /// Reads the map configuration from device memory.
    pub fn get_config(&mut self) -> Result<MapConfig> {
        let data = self.read_memory(ADDR_CFG, CONFIG_SIZE as u32)?;
        let mut buf = [0u8; CONFIG_SIZE];
        for (dst, src) in buf.iter_mut().zip(data) {
            *dst = src;
        }
        Ok(MapConfig::from_bytes(&buf))
    }

    /// Writes the map configuration to device memory.
    pub fn set_config(&mut self, config: &MapConfig) -> Result<()> {
        self.write_memory(ADDR_CFG, &config.serialize())
    }

    //
    // Recovery
    //

    /// Reflashes the MCU core from the recovery image in flash.
    ///
    /// Requires service mode. The port is reopened with a long read timeout
    /// for the duration; a core that already matches the recovery copy and a
    /// failed recovery both surface as errors.
    pub fn recovery(&mut self) -> Result<()> {
        if !self.is_service_mode()? {
            return Err(Error::StuckInAppMode);
        }

        self.link().close()?;
        self.link().reopen(RECOVERY_READ_TIMEOUT)?;

        let crc = self.read_flash(ADDR_FLA_ICOR, 4)?;
        self.tx_cmd(CMD_USB_RECOV)?;
        self.tx32(ADDR_FLA_ICOR)?;
        self.tx_data(&crc)?;
        let status = self.get_status()?;

        self.link().close()?;
        self.link().reopen(DEFAULT_READ_TIMEOUT)?;

        match status {
            RECOVERY_CORE_MATCHES => Err(Error::RecoveryMatchesCurrent),
            0x00 => Err(Error::RecoveryFailed),
            code => {
                info!("recovery finished with status {code:#04x}");
                Ok(())
            }
        }
    }

    //
    // Game selection and FPGA mapper loading
    //

    /// Selects a game by SD path and returns its mapper index.
    pub fn select_game(&mut self, path: &str) -> Result<u16> {
        self.fifo_command(FIFO_SELECT_GAME)?;
        self.send_string_fifo(path)?;

        let resp = self.rx8()?;
        if resp != 0 {
            return Err(Error::Status { code: resp });
        }
        self.rx16()
    }

    /// Configures the FPGA with the mapper pack for `map_id`, using the
    /// routing table and pack files on the SD card.
    pub fn map_load_sdc(&mut self, map_id: u8, config: Option<&MapConfig>) -> Result<()> {
        self.open_file(SD_MAPROUT, FAT_READ)?;
        let maprout = self.read_file(SD_MAPROUT_LEN)?;
        self.close_file()?;

        let pack = maprout[map_id as usize];
        if pack == 0xFF && map_id != 0xFF {
            // Loading the service pack first puts the FPGA in a usable state
            // even though the requested mapper cannot be served.
            let fallback = MapConfig {
                ctrl: CTRL_UNLOCK,
                ..MapConfig::default()
            };
            self.fpga_init_from_sd("EDN8/MAPS/255.RBF", Some(&fallback))?;
            return Err(Error::UnsupportedMapper(map_id));
        }

        let path = format!("EDN8/MAPS/{pack:03}.RBF");
        debug!("mapper {map_id} -> {path}");
        self.fpga_init_from_sd(&path, config)
    }

    //
    // Loading
    //

    /// Loads an OS image: reboot, push PRG and CHR to the OS addresses, then
    /// configure the FPGA with the service mapper.
    ///
    /// Without an explicit mapper file the host-side `./maps` pack is tried
    /// first, then the pack on the SD card.
    pub fn load_os(&mut self, rom: &NesRom, map_path: Option<&Path>) -> Result<()> {
        let config = MapConfig {
            ctrl: CTRL_UNLOCK,
            ..MapConfig::default()
        };

        self.fifo_command(FIFO_REBOOT)?;
        self.tx_cmd_exec()?;

        self.write_memory(rom.prg_addr(), rom.prg_data())?;
        if !rom.chr_data().is_empty() {
            self.write_memory(rom.chr_addr(), rom.chr_data())?;
        }
        self.get_status()?;

        match map_path {
            Some(path) => {
                let image =
                    fs::read(path).map_err(|e| Error::io(e, format!("reading mapper {}", path.display())))?;
                self.fpga_init(&image, Some(&config))
            }
            None => match host_mapper_image(255) {
                Ok(image) => self.fpga_init(&image, Some(&config)),
                Err(err) => {
                    warn!("no host mapper pack ({err}), falling back to the SD pack");
                    self.map_load_sdc(255, Some(&config))
                }
            },
        }
    }

    /// Uploads a game ROM to the SD card and runs it.
    ///
    /// The ROM lands in `usb_games/`; a supplied mapper image is written
    /// next to it with an `.rbf` extension, otherwise any stale sibling
    /// `.rbf` is removed.
    pub fn load_game(&mut self, rom_path: &Path, map_path: Option<&Path>) -> Result<()> {
        self.make_dir(&format!("sd:{SD_GAME_DIR}"))?;

        let base = rom_path
            .file_name()
            .ok_or_else(|| Error::Path(rom_path.display().to_string()))?
            .to_string_lossy();
        let rom_dest = format!("{SD_GAME_DIR}/{base}");

        let data =
            fs::read(rom_path).map_err(|e| Error::io(e, format!("reading ROM {}", rom_path.display())))?;
        info!("uploading {} ({} bytes)", rom_dest, data.len());
        self.open_file(&rom_dest, FAT_CREATE_ALWAYS | FAT_WRITE)?;
        self.file_write(&data)?;
        self.close_file()?;

        // The mapper index comes back with the select status; the run flow
        // does not need it but both bytes must leave the stream.
        let _map_index = self.select_game(&rom_dest)?;

        let rbf_dest = change_extension(&rom_dest, "rbf");
        match map_path {
            Some(path) => {
                let image =
                    fs::read(path).map_err(|e| Error::io(e, format!("reading mapper {}", path.display())))?;
                self.open_file(&rbf_dest, FAT_CREATE_ALWAYS | FAT_WRITE)?;
                self.file_write(&image)?;
                self.close_file()?;
            }
            None => self.delete_file(&rbf_dest)?,
        }

        self.fifo_command(FIFO_RUN_GAME)
    }

    //
    // SD card conveniences
    //

    /// Creates a directory on the SD card. The path must carry the `sd:`
    /// prefix; a directory that already exists counts as success.
    pub fn make_dir(&mut self, path: &str) -> Result<()> {
        let path = path.trim();
        let Some(on_card) = strip_sd_prefix(path) else {
            return Err(Error::Path(path.to_string()));
        };

        match self.dir_make(on_card) {
            Err(Error::Status {
                code: MKDIR_DIR_EXISTS,
            }) => Ok(()),
            other => other,
        }
    }

    /// Deletes a path on the SD card; a path that is already gone counts as
    /// success.
    pub fn delete_file(&mut self, path: &str) -> Result<()> {
        match self.file_delete(path) {
            Err(Error::Status {
                code: DELETE_FILE_NOT_FOUND,
            }) => Ok(()),
            other => other,
        }
    }

    /// Copies a file between the host and the cartridge.
    ///
    /// Paths prefixed `sd:` live on the SD card, everything else on the
    /// host. A host-side source directory is copied recursively.
    pub fn copy_file(&mut self, source: &str, destination: &str) -> Result<()> {
        let source = source.trim();
        let mut destination = destination.trim().to_string();

        if strip_sd_prefix(source).is_none() && Path::new(source).is_dir() {
            return self.copy_folder(source, &destination);
        }

        if destination.ends_with('/') || destination.ends_with('\\') {
            let base = Path::new(source)
                .file_name()
                .ok_or_else(|| Error::Path(source.to_string()))?
                .to_string_lossy()
                .into_owned();
            destination.push_str(&base);
        }

        let data = match strip_sd_prefix(source) {
            Some(on_card) => {
                let info = self.get_file_info(on_card)?;
                self.open_file(on_card, FAT_READ)?;
                let data = self.read_file(info.size)?;
                self.close_file()?;
                data
            }
            None => fs::read(source).map_err(|e| Error::io(e, format!("reading {source}")))?,
        };

        match strip_sd_prefix(&destination) {
            Some(on_card) => {
                self.open_file(on_card, FAT_CREATE_ALWAYS | FAT_WRITE)?;
                self.file_write(&data)?;
                self.close_file()?;
            }
            None => {
                fs::write(&destination, &data)
                    .map_err(|e| Error::io(e, format!("writing {destination}")))?;
            }
        }

        info!("copied {source} -> {destination}");
        Ok(())
    }

    /// Recursively copies a host directory.
    pub fn copy_folder(&mut self, source: &str, destination: &str) -> Result<()> {
        let source = source.trim_end_matches('/');
        let destination = destination.trim_end_matches('/');

        let entries = fs::read_dir(source).map_err(|e| Error::io(e, format!("listing {source}")))?;
        let mut files = Vec::new();
        let mut dirs = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::io(e, format!("listing {source}")))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry
                .file_type()
                .map_err(|e| Error::io(e, format!("listing {source}")))?
                .is_dir()
            {
                dirs.push(name);
            } else {
                files.push(name);
            }
        }

        for dir in dirs {
            self.copy_folder(&format!("{source}/{dir}"), &format!("{destination}/{dir}"))?;
        }
        for file in files {
            self.copy_file(&format!("{source}/{file}"), &format!("{destination}/{file}"))?;
        }
        Ok(())
    }
}

/// Strips a case-insensitive `sd:` prefix, or `None` for host paths.
fn strip_sd_prefix(path: &str) -> Option<&str> {
    if path.len() >= 3 && path[..3].eq_ignore_ascii_case("sd:") {
        Some(&path[3..])
    } else {
        None
    }
}

/// Mapper image from the host-side pack: `./MAPROUT.BIN` routes the mapper
/// id to `./maps/NNN.RBF`. Used only as a fallback when no mapper file is
/// supplied.
fn host_mapper_image(mapper: u8) -> Result<Vec<u8>> {
    let maprout =
        fs::read("MAPROUT.BIN").map_err(|e| Error::io(e, "reading host MAPROUT.BIN"))?;
    let pack = *maprout
        .get(mapper as usize)
        .ok_or(Error::UnsupportedMapper(mapper))?;
    if pack == 0xFF && mapper != 0xFF {
        return Err(Error::UnsupportedMapper(mapper));
    }
    let path = host_mapper_path(pack);
    fs::read(&path).map_err(|e| Error::io(e, format!("reading {}", path.display())))
}

fn host_mapper_path(pack: u8) -> PathBuf {
    PathBuf::from(format!("./maps/{pack:03}.RBF"))
}

/// Swaps the extension of a device-side path.
fn change_extension(path: &str, new_ext: &str) -> String {
    match path.rsplit_once('.') {
        Some((stem, _)) => format!("{stem}.{new_ext}"),
        None => format!("{path}.{new_ext}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::test_utils::Script;

    fn file_info_bytes(size: u32, name: &str) -> Vec<u8> {
        let mut v = Vec::new();
        v.extend_from_slice(&size.to_le_bytes());
        v.extend_from_slice(&[0u8; 4]); // date + time
        v.push(0);
        v.extend_from_slice(&(name.len() as u16).to_le_bytes());
        v.extend_from_slice(name.as_bytes());
        v
    }

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|w| w == needle)
    }

    #[test]
    fn path_helpers() {
        assert_eq!(strip_sd_prefix("sd:foo/bar"), Some("foo/bar"));
        assert_eq!(strip_sd_prefix("SD:foo"), Some("foo"));
        assert_eq!(strip_sd_prefix("/tmp/foo"), None);
        assert_eq!(change_extension("usb_games/a.nes", "rbf"), "usb_games/a.rbf");
        assert_eq!(change_extension("noext", "rbf"), "noext.rbf");
    }

    #[test]
    fn enter_service_mode_is_a_no_op_when_already_there() {
        let script = Script::new(&[MODE_SERVICE]);
        let mut n8 = script.n8();
        n8.enter_service_mode().unwrap();
        // Only the mode query went out.
        assert_eq!(script.written(), vec![0x2B, 0xD4, 0x11, 0xEE]);
        assert_eq!(script.closes(), 0);
    }

    #[test]
    fn enter_service_mode_resets_and_verifies() {
        // App mode, framed status after one boot cycle, then service mode.
        let script = Script::new(&[0x00, 0x00, 0xA5, MODE_SERVICE]);
        let mut n8 = script.n8();
        n8.enter_service_mode().unwrap();
        assert_eq!(script.closes(), 1);
        assert_eq!(script.reopens(), 1);
        let written = script.written();
        // Hard reset command plus its exec trigger are on the wire.
        assert!(contains(&written, &[0x2B, 0xD4, CMD_HARD_RESET, CMD_HARD_RESET ^ 0xFF, 0x00]));
    }

    #[test]
    fn enter_service_mode_reports_a_stuck_device() {
        let script = Script::new(&[0x00, 0x00, 0xA5, 0x00]);
        let mut n8 = script.n8();
        assert!(matches!(
            n8.enter_service_mode(),
            Err(Error::StuckInAppMode)
        ));
    }

    #[test]
    fn exit_service_mode_runs_the_app_and_verifies() {
        let script = Script::new(&[MODE_SERVICE, 0x00, 0xA5, 0x00]);
        let mut n8 = script.n8();
        n8.exit_service_mode().unwrap();
        let written = script.written();
        assert!(contains(&written, &[0x2B, 0xD4, CMD_RUN_APP, CMD_RUN_APP ^ 0xFF, 0x00]));
    }

    #[test]
    fn exit_service_mode_reports_a_stuck_device() {
        let script = Script::new(&[MODE_SERVICE, 0x00, 0xA5, MODE_SERVICE]);
        let mut n8 = script.n8();
        assert!(matches!(
            n8.exit_service_mode(),
            Err(Error::StuckInServiceMode)
        ));
    }

    #[test]
    fn boot_wait_gives_up_after_ten_cycles() {
        let script = Script::new(&[]);
        let mut n8 = script.n8();
        assert!(matches!(n8.boot_wait(), Err(Error::BootTimeout)));
        assert_eq!(script.closes(), 10);
        assert_eq!(script.reopens(), 10);
    }

    #[test]
    fn boot_wait_returns_on_the_first_framed_status() {
        let script = Script::new(&[0x00, 0xA5]);
        script.lock_reads_for_reopens(3);
        let mut n8 = script.n8();
        n8.boot_wait().unwrap();
        assert_eq!(script.closes(), 3);
        assert_eq!(script.reopens(), 3);
    }

    #[test]
    fn reboot_fires_the_fifo_and_exits_service_mode() {
        // Reboot ack, then a mode byte that is already app mode.
        let script = Script::new(&[0x00, 0x00]);
        let mut n8 = script.n8();
        n8.reboot().unwrap();
        let written = script.written();
        assert!(contains(&written, &[FIFO_PREFIX, FIFO_REBOOT]));
    }

    #[test]
    fn reboot_raises_a_bad_ack() {
        let script = Script::new(&[0x07]);
        let mut n8 = script.n8();
        assert!(matches!(n8.reboot(), Err(Error::Status { code: 0x07 })));
    }

    #[test]
    fn make_dir_requires_the_sd_prefix() {
        let mut n8 = Script::new(&[]).n8();
        assert!(matches!(n8.make_dir("/tmp/foo"), Err(Error::Path(_))));
    }

    #[test]
    fn make_dir_strips_the_prefix_and_forgives_exists() {
        let script = Script::new(&[MKDIR_DIR_EXISTS, 0xA5]);
        let mut n8 = script.n8();
        n8.make_dir("sd:usb_games").unwrap();
        let written = script.written();
        assert!(contains(&written, b"usb_games"));
        assert!(!contains(&written, b"sd:"));
    }

    #[test]
    fn make_dir_raises_other_codes() {
        let script = Script::new(&[0x05, 0xA5]);
        let mut n8 = script.n8();
        assert!(matches!(
            n8.make_dir("sd:usb_games"),
            Err(Error::Status { code: 0x05 })
        ));
    }

    #[test]
    fn delete_file_forgives_a_missing_path() {
        let mut n8 = Script::new(&[DELETE_FILE_NOT_FOUND, 0xA5]).n8();
        n8.delete_file("usb_games/stale.rbf").unwrap();

        let mut n8 = Script::new(&[0x00, 0xA5]).n8();
        n8.delete_file("usb_games/stale.rbf").unwrap();

        let mut n8 = Script::new(&[0x07, 0xA5]).n8();
        assert!(matches!(
            n8.delete_file("usb_games/stale.rbf"),
            Err(Error::Status { code: 0x07 })
        ));
    }

    #[test]
    fn select_game_reads_status_then_index() {
        let script = Script::new(&[0x00, 0x34, 0x12]);
        let mut n8 = script.n8();
        assert_eq!(n8.select_game("usb_games/a.nes").unwrap(), 0x1234);
        let written = script.written();
        assert!(contains(&written, &[FIFO_PREFIX, FIFO_SELECT_GAME]));
        // The path and its length prefix both went through the FIFO.
        assert!(contains(&written, b"usb_games/a.nes"));
        assert!(contains(&written, &15u16.to_le_bytes()));
    }

    #[test]
    fn select_game_raises_bad_status_without_reading_the_index() {
        let script = Script::new(&[0x09, 0x34, 0x12]);
        let mut n8 = script.n8();
        assert!(matches!(
            n8.select_game("usb_games/a.nes"),
            Err(Error::Status { code: 0x09 })
        ));
        assert_eq!(script.unread(), 2);
    }

    fn maprout_script(table: &[(usize, u8)]) -> Vec<u8> {
        let mut maprout = vec![0u8; SD_MAPROUT_LEN as usize];
        for &(id, pack) in table {
            maprout[id] = pack;
        }
        let mut reads = vec![0x00]; // first file chunk status
        reads.extend_from_slice(&maprout);
        reads.extend_from_slice(&[0x00, 0xA5]); // close status
        reads
    }

    #[test]
    fn map_load_sdc_routes_through_the_pack_table() {
        let mut reads = maprout_script(&[(4, 1)]);
        reads.push(0x00); // file info status
        reads.extend_from_slice(&file_info_bytes(64, "001.RBF"));
        reads.extend_from_slice(&[0x00, 0xA5]); // open status
        reads.extend_from_slice(&[0x00, 0xA5]); // post-init status
        let script = Script::new(&reads);
        let mut n8 = script.n8();
        n8.map_load_sdc(4, None).unwrap();
        let written = script.written();
        assert!(contains(&written, b"EDN8/MAPS/001.RBF"));
    }

    #[test]
    fn map_load_sdc_tries_the_service_pack_before_failing() {
        let mut reads = maprout_script(&[(5, 0xFF)]);
        reads.push(0x00);
        reads.extend_from_slice(&file_info_bytes(64, "255.RBF"));
        reads.extend_from_slice(&[0x00, 0xA5]);
        reads.extend_from_slice(&[0x00, 0xA5]);
        let script = Script::new(&reads);
        let mut n8 = script.n8();
        assert!(matches!(
            n8.map_load_sdc(5, None),
            Err(Error::UnsupportedMapper(5))
        ));
        let written = script.written();
        assert!(contains(&written, b"EDN8/MAPS/255.RBF"));
    }

    #[test]
    fn recovery_requires_service_mode() {
        let mut n8 = Script::new(&[0x00]).n8();
        assert!(matches!(n8.recovery(), Err(Error::StuckInAppMode)));
    }

    #[test]
    fn recovery_cycles_the_port_and_sends_the_flash_crc() {
        let mut reads = vec![MODE_SERVICE];
        reads.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]); // recovery image crc
        reads.extend_from_slice(&[0x01, 0xA5]); // recovery status
        let script = Script::new(&reads);
        let mut n8 = script.n8();
        n8.recovery().unwrap();
        assert_eq!(script.closes(), 2);
        assert_eq!(script.reopens(), 2);
        assert_eq!(script.last_timeout(), Some(DEFAULT_READ_TIMEOUT));
        let written = script.written();
        // Recovery command, image address, then the CRC payload.
        let mut expected = vec![0x2B, 0xD4, CMD_USB_RECOV, CMD_USB_RECOV ^ 0xFF];
        expected.extend_from_slice(&ADDR_FLA_ICOR.to_le_bytes());
        expected.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        assert!(contains(&written, &expected));
    }

    #[test]
    fn recovery_terminal_codes_surface_as_errors() {
        let mut reads = vec![MODE_SERVICE, 0xDE, 0xAD, 0xBE, 0xEF];
        reads.extend_from_slice(&[RECOVERY_CORE_MATCHES, 0xA5]);
        let mut n8 = Script::new(&reads).n8();
        assert!(matches!(n8.recovery(), Err(Error::RecoveryMatchesCurrent)));

        let mut reads = vec![MODE_SERVICE, 0xDE, 0xAD, 0xBE, 0xEF];
        reads.extend_from_slice(&[0x00, 0xA5]);
        let mut n8 = Script::new(&reads).n8();
        assert!(matches!(n8.recovery(), Err(Error::RecoveryFailed)));
    }

    #[test]
    fn config_round_trips_through_device_memory() {
        let config = MapConfig {
            map_index: 4,
            prg_size: 0x40000,
            chr_size: 0x20000,
            srm_size: 0x2000,
            master_vol: 8,
            ..MapConfig::default()
        };
        let script = Script::new(&config.serialize());
        let mut n8 = script.n8();
        let read_back = n8.get_config().unwrap();
        assert_eq!(read_back, config);
        // 48 bytes read as a 32-byte chunk then a 16-byte chunk.
        let written = script.written();
        let preamble = [0x2B, 0xD4, 0x19, 0xE6];
        assert_eq!(written.windows(4).filter(|w| **w == preamble).count(), 2);
    }

    fn scratch_dir() -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("edlink-test-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn copy_host_file_to_the_card() {
        let src = scratch_dir().join("copy-src.bin");
        fs::write(&src, [1u8, 2, 3]).unwrap();
        // One ack for the write, then write and close statuses.
        let script = Script::new(&[0x00, 0x00, 0xA5, 0x00, 0xA5]);
        let mut n8 = script.n8();
        n8.copy_file(src.to_str().unwrap(), "sd:backup/copy.bin")
            .unwrap();
        let written = script.written();
        assert!(contains(&written, b"backup/copy.bin"));
        assert!(!contains(&written, b"sd:"));
        assert!(contains(&written, &[1, 2, 3]));
        fs::remove_file(&src).unwrap();
    }

    #[test]
    fn copy_card_file_to_the_host() {
        let dst = scratch_dir().join("copy-dst.bin");
        let mut reads = vec![0x00];
        reads.extend_from_slice(&file_info_bytes(3, "A.BIN"));
        reads.extend_from_slice(&[0x00, 9, 8, 7]); // read chunk
        reads.extend_from_slice(&[0x00, 0xA5]); // close status
        let script = Script::new(&reads);
        let mut n8 = script.n8();
        n8.copy_file("sd:A.BIN", dst.to_str().unwrap()).unwrap();
        assert_eq!(fs::read(&dst).unwrap(), vec![9, 8, 7]);
        fs::remove_file(&dst).unwrap();
    }

    #[test]
    fn copy_into_a_directory_keeps_the_source_name() {
        let dir = scratch_dir();
        let src = dir.join("named.bin");
        fs::write(&src, [7u8]).unwrap();
        let mut n8 = Script::new(&[]).n8();
        let dest = format!("{}/", dir.display());
        n8.copy_file(src.to_str().unwrap(), &dest).unwrap();
        assert_eq!(fs::read(dir.join("named.bin")).unwrap(), vec![7]);
        fs::remove_file(&src).unwrap();
    }

    #[test]
    fn load_game_uploads_selects_and_runs() {
        let rom_path = scratch_dir().join("game.nes");
        fs::write(&rom_path, vec![0x42u8; 32]).unwrap();

        let mut reads = vec![MKDIR_DIR_EXISTS, 0xA5]; // mkdir: already there
        reads.extend_from_slice(&[0x00, 0x00, 0xA5]); // write ack + status
        reads.extend_from_slice(&[0x00, 0xA5]); // close
        reads.extend_from_slice(&[0x00, 0x02, 0x00]); // select: ok, index 2
        reads.extend_from_slice(&[DELETE_FILE_NOT_FOUND, 0xA5]); // stale rbf
        let script = Script::new(&reads);
        let mut n8 = script.n8();
        n8.load_game(&rom_path, None).unwrap();

        let written = script.written();
        assert!(contains(&written, b"usb_games/game.nes"));
        assert!(contains(&written, b"usb_games/game.rbf"));
        assert!(contains(&written, &[FIFO_PREFIX, FIFO_RUN_GAME]));
        fs::remove_file(&rom_path).unwrap();
    }

    #[test]
    fn load_os_writes_the_image_and_configures_the_fpga() {
        // Smallest OS image: mapper 255, one PRG bank, one CHR bank.
        let mut image = Vec::new();
        image.extend_from_slice(b"NES\x1A");
        image.push(1);
        image.push(1);
        image.push(0xF0);
        image.push(0xF0);
        image.extend_from_slice(&[0u8; 8]);
        image.extend(std::iter::repeat(0xEA).take(16 * 1024));
        image.extend(std::iter::repeat(0x00).take(8 * 1024));
        let rom = NesRom::from_bytes("os.nes".into(), &image).unwrap();

        let map_path = scratch_dir().join("os-mapper.rbf");
        fs::write(&map_path, vec![0xAAu8; 64]).unwrap();

        let mut reads = vec![0x00, 0xA5]; // status after the memory writes
        reads.push(0x00); // mapper image ack
        reads.extend_from_slice(&[0x00, 0xA5]); // post-init status
        let script = Script::new(&reads);
        let mut n8 = script.n8();
        n8.load_os(&rom, Some(&map_path)).unwrap();

        let written = script.written();
        assert!(contains(&written, &rom.prg_addr().to_le_bytes()));
        assert!(contains(&written, &rom.chr_addr().to_le_bytes()));
        // The service configuration lands in the config region last.
        let config = MapConfig {
            ctrl: CTRL_UNLOCK,
            ..MapConfig::default()
        };
        assert!(written.ends_with(&config.serialize()));
        fs::remove_file(&map_path).unwrap();
    }

    #[test]
    fn halt_parks_the_menu_core() {
        let script = Script::new(&[0x00]);
        let mut n8 = script.n8();
        n8.halt().unwrap();
        let written = script.written();
        // Config write to the config region, then the halt packet.
        assert!(contains(&written, &ADDR_CFG.to_le_bytes()));
        assert!(contains(&written, &[FIFO_PREFIX, FIFO_HALT]));
    }
}
