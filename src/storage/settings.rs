//! Device identity and the configuration slots.
//!
//! The configuration service exposes five 16-bit values. Each one is
//! persisted on its own flash key as two little-endian bytes; a slot that
//! was never written reads as 0.

use crate::ble::{Address, AddressKind, Uuid128};
use crate::error::Error;
use crate::storage::keys;

/// Primary service of the configuration app.
pub const CONFIG_SERVICE_UUID: Uuid128 =
    Uuid128::from_u128(0x32e94ac0_19c8_11f0_9cd2_0242ac120002);

pub const CONFIG_SLOT_COUNT: usize = 5;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigSlot {
    FlatWalking,
    StairAscent,
    StairDescent,
    Manual,
    Fsr,
}

impl ConfigSlot {
    pub const ALL: [ConfigSlot; CONFIG_SLOT_COUNT] = [
        ConfigSlot::FlatWalking,
        ConfigSlot::StairAscent,
        ConfigSlot::StairDescent,
        ConfigSlot::Manual,
        ConfigSlot::Fsr,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn name(self) -> &'static str {
        match self {
            ConfigSlot::FlatWalking => "config/flat_walking",
            ConfigSlot::StairAscent => "config/stair_ascent",
            ConfigSlot::StairDescent => "config/stair_descent",
            ConfigSlot::Manual => "config/manual",
            ConfigSlot::Fsr => "config/fsr",
        }
    }

    pub const fn uuid(self) -> Uuid128 {
        Uuid128::from_u128(match self {
            ConfigSlot::FlatWalking => 0x32e94da4_19c8_11f0_9cd2_0242ac120002,
            ConfigSlot::StairAscent => 0x32e94ef8_19c8_11f0_9cd2_0242ac120002,
            ConfigSlot::StairDescent => 0x32e94f8e_19c8_11f0_9cd2_0242ac120002,
            ConfigSlot::Manual => 0x32e950ec_19c8_11f0_9cd2_0242ac120002,
            ConfigSlot::Fsr => 0x32e95178_19c8_11f0_9cd2_0242ac120002,
        })
    }

    /// Flash map key.
    pub const fn key(self) -> u8 {
        keys::CONFIG_BASE + self as u8
    }
}

/// In-memory copy of the persisted slots.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConfigStore {
    values: [u16; CONFIG_SLOT_COUNT],
}

impl ConfigStore {
    pub const fn new() -> Self {
        Self {
            values: [0; CONFIG_SLOT_COUNT],
        }
    }

    pub fn get(&self, slot: ConfigSlot) -> u16 {
        self.values[slot.index()]
    }

    pub fn set(&mut self, slot: ConfigSlot, value: u16) {
        self.values[slot.index()] = value;
    }

    /// Apply a GATT write of `data` at `offset` into the slot's two bytes.
    ///
    /// Returns the new value, which the caller persists.
    pub fn write(&mut self, slot: ConfigSlot, offset: usize, data: &[u8]) -> Result<u16, Error> {
        if offset + data.len() > 2 {
            return Err(Error::InvalidOffset);
        }

        let mut bytes = self.get(slot).to_le_bytes();
        bytes[offset..offset + data.len()].copy_from_slice(data);
        let value = u16::from_le_bytes(bytes);
        self.set(slot, value);
        log_info!("{}: {}", slot.name(), value);
        Ok(value)
    }

    /// Load one slot from its stored record; empty or absent reads as 0.
    pub fn load(&mut self, slot: ConfigSlot, stored: Option<&[u8]>) -> Result<(), Error> {
        let value = match stored {
            None | Some([]) => 0,
            Some([lo]) => u16::from(*lo),
            Some([lo, hi]) => u16::from_le_bytes([*lo, *hi]),
            Some(_) => return Err(Error::Corrupt),
        };
        self.set(slot, value);
        Ok(())
    }
}

/// Where the device address came from at boot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IdentitySource {
    Stored,
    /// Freshly generated; must be persisted before use.
    Generated,
}

/// The device's own static random address.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceIdentity {
    pub address: Address,
    pub source: IdentitySource,
}

impl DeviceIdentity {
    /// Use the stored address unless it is missing or all zero, in which
    /// case `random` supplies a new one.
    pub fn resolve(
        stored: Option<&[u8]>,
        random: impl FnOnce() -> [u8; 6],
    ) -> Result<Self, Error> {
        let stored = match stored {
            Some(bytes) => Some(<[u8; 6]>::try_from(bytes).map_err(|_| Error::Corrupt)?),
            None => None,
        };

        match stored {
            Some(bytes) if bytes.iter().any(|&b| b != 0) => Ok(Self {
                address: Address::new(AddressKind::RandomStatic, bytes),
                source: IdentitySource::Stored,
            }),
            _ => {
                let mut bytes = random();
                // Static random addresses carry 0b11 in the top bits.
                bytes[5] |= 0xC0;
                Ok(Self {
                    address: Address::new(AddressKind::RandomStatic, bytes),
                    source: IdentitySource::Generated,
                })
            }
        }
    }

    pub fn to_bytes(&self) -> [u8; 6] {
        self.address.bytes
    }
}
