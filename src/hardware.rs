//! Voltage monitor and real-time clock records.

use std::fmt;

use chrono::{Datelike, DateTime, Local, Timelike};

/// Wire size of the voltage monitor response.
pub const VDC_DATA_SIZE: usize = 8;

/// Wire size of an RTC record.
pub const RTC_DATA_SIZE: usize = 6;

/// Voltage monitor readings: 5.0 V, 2.5 V and 1.2 V rails plus battery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vdc {
    pub v50: u16,
    pub v25: u16,
    pub v12: u16,
    pub vbt: u16,
}

impl Vdc {
    pub fn from_bytes(data: &[u8; VDC_DATA_SIZE]) -> Self {
        Vdc {
            v50: u16::from_le_bytes([data[0], data[1]]),
            v25: u16::from_le_bytes([data[2], data[3]]),
            v12: u16::from_le_bytes([data[4], data[5]]),
            vbt: u16::from_le_bytes([data[6], data[7]]),
        }
    }
}

impl fmt::Display for Vdc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[VDC]")?;
        writeln!(f, " 5.0V rail..{}", self.v50)?;
        writeln!(f, " 2.5V rail..{}", self.v25)?;
        writeln!(f, " 1.2V rail..{}", self.v12)?;
        write!(f, " battery....{}", self.vbt)
    }
}

/// RTC time as the device stores it: one packed-BCD byte per component, the
/// year counted from 2000.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtcTime {
    pub year: u8,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl RtcTime {
    pub fn from_bytes(data: &[u8; RTC_DATA_SIZE]) -> Self {
        RtcTime {
            year: data[0],
            month: data[1],
            day: data[2],
            hour: data[3],
            minute: data[4],
            second: data[5],
        }
    }

    pub fn to_bytes(self) -> [u8; RTC_DATA_SIZE] {
        [
            self.year,
            self.month,
            self.day,
            self.hour,
            self.minute,
            self.second,
        ]
    }

    pub fn from_datetime(dt: DateTime<Local>) -> Self {
        RtcTime {
            year: bcd(dt.year() - 2000),
            month: bcd(dt.month() as i32),
            day: bcd(dt.day() as i32),
            hour: bcd(dt.hour() as i32),
            minute: bcd(dt.minute() as i32),
            second: bcd(dt.second() as i32),
        }
    }
}

impl fmt::Display for RtcTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[RTC]")?;
        writeln!(
            f,
            " Date: 20{:02X}-{:02X}-{:02X}",
            self.year, self.month, self.day
        )?;
        write!(
            f,
            " Time: {:02X}:{:02X}:{:02X}",
            self.hour, self.minute, self.second
        )
    }
}

fn bcd(val: i32) -> u8 {
    (((val / 10) << 4) | (val % 10)) as u8
}
