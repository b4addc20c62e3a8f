//! Peer sample payloads.
//!
//! Both peers send big-endian 16-bit words:
//!
//! | role       | length | layout                    |
//! |------------|--------|---------------------------|
//! | fsr        | 8      | four force channels       |
//! | controller | 4      | `value`, then `mode`      |
//!
//! Anything of another length is rejected before it reaches the rest of
//! the firmware.

use crate::ble::Role;
use crate::config::FSR_PRESSED_THRESHOLD;
use crate::error::Error;

pub const FORCE_SAMPLE_LEN: usize = 8;
pub const CONTROLLER_SAMPLE_LEN: usize = 4;

fn be16(data: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([data[at], data[at + 1]])
}

fn check_len(data: &[u8], expected: usize) -> Result<(), Error> {
    if data.len() == expected {
        Ok(())
    } else {
        Err(Error::PayloadLength {
            expected,
            actual: data.len(),
        })
    }
}

/// One force-sensor reading.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ForceSample {
    pub channels: [u16; 4],
}

impl ForceSample {
    pub fn decode(data: &[u8]) -> Result<Self, Error> {
        check_len(data, FORCE_SAMPLE_LEN)?;
        Ok(Self {
            channels: [be16(data, 0), be16(data, 2), be16(data, 4), be16(data, 6)],
        })
    }

    /// Any channel above the contact threshold.
    pub fn is_pressed(&self) -> bool {
        self.channels.iter().any(|&c| c > FSR_PRESSED_THRESHOLD)
    }
}

/// One controller indication. A zero `value` means stop.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ControllerSample {
    pub value: u16,
    pub mode: u16,
}

impl ControllerSample {
    pub fn decode(data: &[u8]) -> Result<Self, Error> {
        check_len(data, CONTROLLER_SAMPLE_LEN)?;
        Ok(Self {
            value: be16(data, 0),
            mode: be16(data, 2),
        })
    }

    pub fn is_go(&self) -> bool {
        self.value != 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Sample {
    Force(ForceSample),
    Controller(ControllerSample),
}

impl Sample {
    /// Decode a payload received from `role`.
    pub fn decode(role: Role, data: &[u8]) -> Result<Self, Error> {
        match role {
            Role::Force => ForceSample::decode(data).map(Sample::Force),
            Role::Controller => ControllerSample::decode(data).map(Sample::Controller),
        }
    }

    pub fn role(&self) -> Role {
        match self {
            Sample::Force(_) => Role::Force,
            Sample::Controller(_) => Role::Controller,
        }
    }
}
