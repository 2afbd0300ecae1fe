//! Error taxonomy for transport, command and loading failures.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
#[must_use]
pub enum Error {
    #[error("cannot open serial port `{path}`")]
    TransportUnavailable {
        path: String,
        #[source]
        source: serialport::Error,
    },
    #[error("serial read timed out after {got} of {want} bytes")]
    TransportTimeout { got: usize, want: usize },
    #[error("short write: {written} of {expected} bytes reached the device")]
    TransportShortWrite { written: usize, expected: usize },
    #[error("refusing zero-length write")]
    EmptyWrite,
    #[error("refusing zero-length read")]
    EmptyRead,
    #[error("bad status frame {raw:#06x}")]
    Framing { raw: u16 },
    #[error("device returned status {code:#04x}")]
    Status { code: u8 },
    #[error("device rejected data block with ack {code:#04x}")]
    AckRejected { code: u8 },
    #[error("device stuck in app mode")]
    StuckInAppMode,
    #[error("device stuck in service mode")]
    StuckInServiceMode,
    #[error("device did not come back up after reset")]
    BootTimeout,
    #[error("unknown ROM format")]
    RomFormat,
    #[error("bad cartridge path `{0}`: paths on the SD card must start with `sd:`")]
    Path(String),
    #[error("mapper {0} is not supported by the SD mapper pack")]
    UnsupportedMapper(u8),
    #[error("recovery core matches the current core")]
    RecoveryMatchesCurrent,
    #[error("core recovery failed")]
    RecoveryFailed,
    #[error("{context}: {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },
}

impl Error {
    pub fn io(source: std::io::Error, context: impl Into<String>) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}
