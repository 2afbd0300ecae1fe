//! Serial transport and byte-exact framing.
//!
//! The device protocol is not self-delimiting: every response is sized by the
//! command that provoked it. The helpers here are therefore strictly
//! sequential: one framed request, then exactly the bytes the device owes
//! back, read one at a time.

use std::io::{self, Read, Write};
use std::thread;
use std::time::Duration;

use log::{debug, trace};

use crate::cmd::{CMD_EXEC, CMD_STATUS};
use crate::error::{Error, Result};
use crate::ACK_BLOCK_SIZE;

/// Settle time the hardware needs after the port is opened or closed.
pub const SERIAL_SETTLE: Duration = Duration::from_millis(100);

/// Read timeout used for ordinary operation.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(2);

/// High byte of every well-framed status word.
pub const STATUS_FRAME: u8 = 0xA5;

/// Byte stream to the cartridge.
///
/// The production implementation wraps a serial port; tests substitute a
/// scripted oracle that records writes and replays reads. Close and reopen
/// are part of the capability set because mode transitions and recovery
/// deliberately cycle the port.
pub trait Transport {
    /// Reads exactly `buf.len()` bytes or fails.
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()>;
    /// Writes the whole slice or fails.
    fn write_all(&mut self, buf: &[u8]) -> Result<()>;
    /// Closes the stream. Idempotent.
    fn close(&mut self) -> Result<()>;
    /// Opens the stream again with the given read timeout.
    fn reopen(&mut self, timeout: Duration) -> Result<()>;
}

/// Serial port transport: 9600 baud, 8N1, no flow control.
pub struct SerialLink {
    path: String,
    port: Option<Box<dyn serialport::SerialPort>>,
}

impl SerialLink {
    /// Opens the port and waits out the settle time.
    pub fn open(path: &str, timeout: Duration) -> Result<Self> {
        let mut link = SerialLink {
            path: path.to_string(),
            port: None,
        };
        link.reopen(timeout)?;
        Ok(link)
    }

    fn port(&mut self) -> Result<&mut Box<dyn serialport::SerialPort>> {
        let path = self.path.clone();
        self.port.as_mut().ok_or_else(|| Error::TransportUnavailable {
            path,
            source: serialport::Error::new(serialport::ErrorKind::NoDevice, "port is not open"),
        })
    }
}

impl Transport for SerialLink {
    /// Reads one byte per underlying read call. Batched reads are observed to
    /// lose bytes on this hardware.
    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        if buf.is_empty() {
            return Err(Error::EmptyRead);
        }
        let want = buf.len();
        let port = self.port()?;
        for (got, slot) in buf.iter_mut().enumerate() {
            let mut byte = [0u8; 1];
            match port.read(&mut byte) {
                Ok(1) => *slot = byte[0],
                Ok(_) => return Err(Error::TransportTimeout { got, want }),
                Err(e) if e.kind() == io::ErrorKind::TimedOut => {
                    return Err(Error::TransportTimeout { got, want })
                }
                Err(e) => return Err(Error::io(e, "serial read")),
            }
        }
        Ok(())
    }

    fn write_all(&mut self, buf: &[u8]) -> Result<()> {
        if buf.is_empty() {
            return Err(Error::EmptyWrite);
        }
        let port = self.port()?;
        let written = port.write(buf).map_err(|e| Error::io(e, "serial write"))?;
        if written != buf.len() {
            return Err(Error::TransportShortWrite {
                written,
                expected: buf.len(),
            });
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if self.port.take().is_some() {
            thread::sleep(SERIAL_SETTLE);
        }
        Ok(())
    }

    fn reopen(&mut self, timeout: Duration) -> Result<()> {
        self.close()?;
        let port = serialport::new(&self.path, 9600)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(timeout)
            .open()
            .map_err(|source| Error::TransportUnavailable {
                path: self.path.clone(),
                source,
            })?;
        self.port = Some(port);
        thread::sleep(SERIAL_SETTLE);
        Ok(())
    }
}

/// Handle to one cartridge.
///
/// Owns the transport for the lifetime of the program invocation. Not thread
/// safe: the protocol allows exactly one in-flight operation, and aborting
/// one mid-stream desynchronizes the link until the port is cycled.
pub struct N8 {
    address: String,
    link: Box<dyn Transport>,
}

impl N8 {
    /// Opens the device at `address` with the default read timeout.
    pub fn open(address: &str) -> Result<Self> {
        Self::open_with_timeout(address, DEFAULT_READ_TIMEOUT)
    }

    pub fn open_with_timeout(address: &str, timeout: Duration) -> Result<Self> {
        debug!("opening {address}");
        let link = SerialLink::open(address, timeout)?;
        Ok(N8 {
            address: address.to_string(),
            link: Box::new(link),
        })
    }

    /// Wraps an already-open transport. Used by tests to drive the protocol
    /// against a scripted byte stream.
    pub(crate) fn with_transport(link: Box<dyn Transport>) -> Self {
        N8 {
            address: String::new(),
            link,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub(crate) fn link(&mut self) -> &mut dyn Transport {
        self.link.as_mut()
    }

    //
    // Transmit
    //

    /// Sends an arbitrary stream of bytes to the device.
    pub fn tx_data(&mut self, buf: &[u8]) -> Result<()> {
        self.link.write_all(buf)
    }

    /// Sends 8 bits to the device.
    pub fn tx8(&mut self, arg: u8) -> Result<()> {
        self.tx_data(&[arg])
    }

    /// Sends 16 bits to the device, little endian.
    pub fn tx16(&mut self, arg: u16) -> Result<()> {
        self.tx_data(&arg.to_le_bytes())
    }

    /// Sends 32 bits to the device, little endian.
    pub fn tx32(&mut self, arg: u32) -> Result<()> {
        self.tx_data(&arg.to_le_bytes())
    }

    /// Sends a command preamble: `'+'`, `'+' ^ 0xFF`, the opcode, and the
    /// opcode's complement.
    ///
    /// Multi-phase commands are triggered with [`N8::tx_cmd_exec`] after
    /// their parameters.
    pub fn tx_cmd(&mut self, command: u8) -> Result<()> {
        trace!("cmd {command:#04x}");
        let plus = b'+';
        self.tx_data(&[plus, plus ^ 0xFF, command, command ^ 0xFF])
    }

    /// Triggers execution of the previously transmitted command.
    pub fn tx_cmd_exec(&mut self) -> Result<()> {
        self.tx8(CMD_EXEC)
    }

    /// Sends a length-prefixed string: u16 byte length, then the bytes.
    pub fn tx_string(&mut self, s: &str) -> Result<()> {
        self.tx16(s.len() as u16)?;
        if !s.is_empty() {
            self.tx_data(s.as_bytes())?;
        }
        Ok(())
    }

    /// Sends data in acknowledged blocks.
    ///
    /// The device gates each block of up to [`ACK_BLOCK_SIZE`] bytes with one
    /// ready byte; anything other than `0x00` aborts the transfer.
    pub fn tx_data_ack(&mut self, buf: &[u8]) -> Result<()> {
        let mut offset = 0usize;
        while offset < buf.len() {
            let block = (buf.len() - offset).min(ACK_BLOCK_SIZE as usize);
            let resp = self.rx8()?;
            if resp != 0 {
                return Err(Error::AckRejected { code: resp });
            }
            self.tx_data(&buf[offset..offset + block])?;
            offset += block;
        }
        Ok(())
    }

    //
    // Receive
    //

    /// Reads exactly `len` bytes from the device.
    pub fn rx_data(&mut self, len: usize) -> Result<Vec<u8>> {
        if len == 0 {
            return Err(Error::EmptyRead);
        }
        let mut buf = vec![0u8; len];
        self.link.read_exact(&mut buf)?;
        Ok(buf)
    }

    pub(crate) fn rx_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.link.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Reads 8 bits from the device.
    pub fn rx8(&mut self) -> Result<u8> {
        Ok(self.rx_array::<1>()?[0])
    }

    /// Reads 16 bits from the device, little endian.
    pub fn rx16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.rx_array::<2>()?))
    }

    /// Reads 32 bits from the device, little endian.
    pub fn rx32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.rx_array::<4>()?))
    }

    /// Reads a length-prefixed string.
    pub fn rx_string(&mut self) -> Result<String> {
        let len = self.rx16()? as usize;
        if len == 0 {
            return Ok(String::new());
        }
        let buf = self.rx_data(len)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    //
    // Status
    //

    /// Queries the device status word and returns the status code.
    ///
    /// The high byte of the word must be [`STATUS_FRAME`]; anything else
    /// means the stream is out of frame.
    pub fn get_status(&mut self) -> Result<u8> {
        self.tx_cmd(CMD_STATUS)?;
        let raw = self.rx16()?;
        if raw & 0xFF00 != u16::from(STATUS_FRAME) << 8 {
            return Err(Error::Framing { raw });
        }
        Ok((raw & 0x00FF) as u8)
    }

    /// Queries the device status and requires a zero code.
    pub fn check_status(&mut self) -> Result<()> {
        match self.get_status()? {
            0 => Ok(()),
            code => Err(Error::Status { code }),
        }
    }
}
