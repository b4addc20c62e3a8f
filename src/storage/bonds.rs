//! Bonded peer addresses.
//!
//! Record format: `[count][6 addr][1 kind]...`. A full registry rejects new
//! entries instead of evicting old ones.

use heapless::Vec;

use crate::ble::{Address, AddressKind};
use crate::config::MAX_PAIRED_DEVICES;
use crate::error::Error;

const RECORD_LEN: usize = 7;

/// Largest serialized registry.
pub const MAX_SERIALIZED_LEN: usize = 1 + RECORD_LEN * MAX_PAIRED_DEVICES;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BondRegistry {
    addresses: Vec<Address, MAX_PAIRED_DEVICES>,
}

impl BondRegistry {
    pub const fn new() -> Self {
        Self {
            addresses: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.addresses.is_full()
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.addresses.contains(address)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Address> {
        self.addresses.iter()
    }

    /// Record a bond. `Ok(false)` if it was already known.
    pub fn insert(&mut self, address: Address) -> Result<bool, Error> {
        if self.contains(&address) {
            return Ok(false);
        }
        self.addresses
            .push(address)
            .map_err(|_| Error::BondRegistryFull)?;
        Ok(true)
    }

    /// Drop a bond. Returns whether it was present.
    pub fn remove(&mut self, address: &Address) -> bool {
        match self.addresses.iter().position(|a| a == address) {
            Some(index) => {
                self.addresses.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn serialize(&self, buf: &mut [u8]) -> Result<usize, Error> {
        let total = 1 + RECORD_LEN * self.addresses.len();
        if buf.len() < total {
            return Err(Error::BufferOverflow);
        }

        buf[0] = self.addresses.len() as u8;
        for (address, record) in self
            .addresses
            .iter()
            .zip(buf[1..total].chunks_exact_mut(RECORD_LEN))
        {
            record[..6].copy_from_slice(&address.bytes);
            record[6] = address.kind.to_u8();
        }
        Ok(total)
    }

    /// Decode a stored registry. Entries past capacity are dropped with a
    /// warning.
    pub fn deserialize(data: &[u8]) -> Result<Self, Error> {
        let (&count, records) = data.split_first().ok_or(Error::Corrupt)?;
        let count = count as usize;
        if records.len() < count * RECORD_LEN {
            return Err(Error::Corrupt);
        }

        let mut registry = Self::new();
        for record in records.chunks_exact(RECORD_LEN).take(count) {
            let kind = AddressKind::from_u8(record[6]).ok_or(Error::Corrupt)?;
            let mut bytes = [0u8; 6];
            bytes.copy_from_slice(&record[..6]);

            if registry.insert(Address::new(kind, bytes)).is_err() {
                log_warn!(
                    "bonds: more than {} stored, dropping the rest",
                    MAX_PAIRED_DEVICES
                );
                break;
            }
        }
        Ok(registry)
    }
}
