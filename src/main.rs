//! Command-line front end for driving an EverDrive-N8 over its serial link.

use std::io::Read;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDateTime, TimeZone};
use clap::{Parser, Subcommand};

use edlink::rom::RomKind;
use edlink::{NesRom, RtcTime, N8};

#[derive(Parser)]
#[command(name = "edlink", version, about = "EverDrive-N8 host control tool")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Switch the cartridge out of service mode
    Appmode {
        /// Serial device path (eg. /dev/ttyACM0)
        #[arg(short, long)]
        device: String,
    },
    /// Copy a file; prefix a path with `sd:` for the SD card
    Cp {
        #[arg(short, long)]
        device: String,
        /// Path to copy from
        #[arg(long)]
        source: String,
        /// Path to copy to
        #[arg(long)]
        destination: String,
    },
    /// Print the current map configuration
    Info {
        #[arg(short, long)]
        device: String,
    },
    /// Initialize the FPGA from a file or standard input
    Initfpga {
        #[arg(short, long)]
        device: String,
        /// Read the image from a file instead of standard input
        #[arg(long)]
        path: Option<PathBuf>,
        /// Number of bytes to read (eg. 0x40 or 64)
        #[arg(long, value_parser = parse_num)]
        length: Option<u32>,
    },
    /// Print the cartridge RTC time
    Getrtc {
        #[arg(short, long)]
        device: String,
    },
    /// Load a ROM or OS image and start it
    Loadrom {
        #[arg(short, long)]
        device: String,
        /// Path to the ROM
        #[arg(long)]
        rom: PathBuf,
        /// Optional mapper image (.rbf)
        #[arg(long)]
        map: Option<PathBuf>,
    },
    /// Create a directory on the SD card
    Mkdir {
        #[arg(short, long)]
        device: String,
        /// Directory to create, prefixed with `sd:`
        #[arg(long)]
        path: String,
    },
    /// Read cartridge memory to a file or a hex dump
    Readmemory {
        #[arg(short, long)]
        device: String,
        /// Address to read from (eg. 0xa000 or 40960)
        #[arg(long, value_parser = parse_num)]
        address: u32,
        /// Number of bytes to read
        #[arg(long, value_parser = parse_num)]
        length: u32,
        /// Save the data to a file instead of printing it
        #[arg(long)]
        path: Option<PathBuf>,
    },
    /// Reboot the cartridge
    Reboot {
        #[arg(short, long)]
        device: String,
    },
    /// Reflash the MCU core from the recovery image
    Recovery {
        #[arg(short, long)]
        device: String,
    },
    /// Switch the cartridge into service mode
    Servicemode {
        #[arg(short, long)]
        device: String,
    },
    /// Set the cartridge RTC
    Setrtc {
        #[arg(short, long)]
        device: String,
        /// Time as `YYYY-MM-DD HH:mm:SS`; defaults to now
        #[arg(long)]
        time: Option<String>,
    },
    /// Write a file to cartridge flash
    Writeflash {
        #[arg(short, long)]
        device: String,
        /// Address to write to
        #[arg(long, value_parser = parse_num)]
        address: u32,
        /// File with the data to write
        #[arg(long)]
        path: PathBuf,
    },
    /// Write data to cartridge memory
    Writememory {
        #[arg(short, long)]
        device: String,
        /// Address to write to
        #[arg(long, value_parser = parse_num)]
        address: u32,
        /// Number of bytes to write; input is truncated or zero-padded
        #[arg(long, value_parser = parse_num)]
        length: Option<u32>,
        /// Read the data from a file instead of standard input
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

/// Accepts `0x`-prefixed hex or decimal.
fn parse_num(s: &str) -> Result<u32, String> {
    let s = s.trim();
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).map_err(|e| e.to_string()),
        None => s.parse().map_err(|e: std::num::ParseIntError| e.to_string()),
    }
}

/// Data for a write-style command: a file if given, standard input
/// otherwise, resized to `length` when one is supplied.
fn input_data(path: Option<&PathBuf>, length: Option<u32>) -> Result<Vec<u8>> {
    let mut data = match path {
        Some(path) => {
            std::fs::read(path).with_context(|| format!("reading {}", path.display()))?
        }
        None => {
            if length.is_none() {
                bail!("--length is required when reading from standard input");
            }
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .context("reading standard input")?;
            buf
        }
    };
    if let Some(length) = length {
        data.resize(length as usize, 0);
    }
    Ok(data)
}

fn hex_dump(address: u32, data: &[u8]) {
    println!("[Read Memory]");
    println!(
        " address ${:04x}-${:04x}:",
        address,
        address + data.len() as u32
    );
    for (i, byte) in data.iter().enumerate() {
        print!(" {byte:02x}");
        if (i + 1) % 8 == 0 {
            print!("  ");
        }
        if (i + 1) % 32 == 0 || i + 1 == data.len() {
            println!();
        }
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Appmode { device } => {
            let mut n8 = N8::open(&device)?;
            println!("[App Mode]");
            n8.exit_service_mode()?;
            println!("[App Mode] ok");
        }
        Command::Cp {
            device,
            source,
            destination,
        } => {
            let mut n8 = N8::open(&device)?;
            n8.copy_file(&source, &destination)?;
            println!("[Copy] \"{source}\" copied to \"{destination}\"");
        }
        Command::Info { device } => {
            let mut n8 = N8::open(&device)?;
            n8.exit_service_mode()?;
            let config = n8.get_config()?;
            println!("[Info]");
            println!("{config}");
        }
        Command::Initfpga {
            device,
            path,
            length,
        } => {
            let data = input_data(path.as_ref(), length)?;
            let mut n8 = N8::open(&device)?;
            n8.fpga_init(&data, None)?;
        }
        Command::Getrtc { device } => {
            let mut n8 = N8::open(&device)?;
            let rtc = n8.get_rtc()?;
            println!("{rtc}");
        }
        Command::Loadrom { device, rom, map } => {
            let parsed = NesRom::from_file(&rom)?;
            println!("{parsed}");
            let mut n8 = N8::open(&device)?;
            if parsed.kind() == RomKind::Os {
                n8.load_os(&parsed, map.as_deref())?;
            } else {
                n8.load_game(&rom, map.as_deref())?;
            }
            println!("{}", n8.get_config()?.hex_dump());
        }
        Command::Mkdir { device, path } => {
            let mut n8 = N8::open(&device)?;
            n8.make_dir(&path)?;
            println!("[mkdir] \"{path}\" created");
        }
        Command::Readmemory {
            device,
            address,
            length,
            path,
        } => {
            let mut n8 = N8::open(&device)?;
            let data = n8.read_memory(address, length)?;
            match path {
                Some(path) => std::fs::write(&path, &data)
                    .with_context(|| format!("writing {}", path.display()))?,
                None => hex_dump(address, &data),
            }
        }
        Command::Reboot { device } => {
            let mut n8 = N8::open(&device)?;
            n8.reboot()?;
            println!("[Reboot] N8 is rebooting");
        }
        Command::Recovery { device } => {
            let mut n8 = N8::open(&device)?;
            println!("[recovery] EDIO core recovery...");
            n8.recovery()?;
            println!("[recovery] ok");
        }
        Command::Servicemode { device } => {
            let mut n8 = N8::open(&device)?;
            println!("[Service Mode]");
            n8.enter_service_mode()?;
            println!("[Service Mode] ok");
        }
        Command::Setrtc { device, time } => {
            let datetime = match time {
                Some(time) => {
                    let naive = NaiveDateTime::parse_from_str(&time, "%Y-%m-%d %H:%M:%S")
                        .with_context(|| format!("parsing time string `{time}`"))?;
                    Local
                        .from_local_datetime(&naive)
                        .single()
                        .with_context(|| format!("ambiguous local time `{time}`"))?
                }
                None => Local::now(),
            };
            let mut n8 = N8::open(&device)?;
            n8.set_rtc(&RtcTime::from_datetime(datetime))?;
        }
        Command::Writeflash {
            device,
            address,
            path,
        } => {
            let data =
                std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
            let mut n8 = N8::open(&device)?;
            n8.write_flash(address, &data)?;
        }
        Command::Writememory {
            device,
            address,
            length,
            path,
        } => {
            let data = input_data(path.as_ref(), length)?;
            let mut n8 = N8::open(&device)?;
            n8.write_memory(address, &data)?;
        }
    }

    Ok(())
}
