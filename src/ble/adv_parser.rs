//! Advertising-data (AD structure) parsing.
//!
//! Each AD structure is `[len][type][data; len - 1]`. A zero length or a
//! structure running past the end of the buffer stops parsing.

use heapless::{String, Vec};

use crate::ble::{Address, Advertisement, Uuid128, MAX_ADV_SERVICES};

const AD_INCOMPLETE_UUID128: u8 = 0x06;
const AD_COMPLETE_UUID128: u8 = 0x07;
const AD_SHORT_NAME: u8 = 0x08;
const AD_COMPLETE_NAME: u8 = 0x09;
const AD_MANUFACTURER_DATA: u8 = 0xFF;

/// Iterator over the `(type, data)` pairs of an advertisement.
pub struct AdStructures<'a> {
    data: &'a [u8],
}

impl<'a> Iterator for AdStructures<'a> {
    type Item = (u8, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let (&len, rest) = self.data.split_first()?;
        let len = len as usize;
        if len == 0 || len > rest.len() {
            self.data = &[];
            return None;
        }
        let (structure, remaining) = rest.split_at(len);
        self.data = remaining;
        Some((structure[0], &structure[1..]))
    }
}

pub fn ad_structures(data: &[u8]) -> AdStructures<'_> {
    AdStructures { data }
}

/// All 128-bit service UUIDs listed (complete or incomplete lists).
pub fn service_uuids(data: &[u8]) -> Vec<Uuid128, MAX_ADV_SERVICES> {
    let mut services = Vec::new();
    for (ad_type, payload) in ad_structures(data) {
        if ad_type != AD_INCOMPLETE_UUID128 && ad_type != AD_COMPLETE_UUID128 {
            continue;
        }
        for chunk in payload.chunks_exact(16) {
            let mut uuid = [0u8; 16];
            uuid.copy_from_slice(chunk);
            if services.push(Uuid128(uuid)).is_err() {
                return services;
            }
        }
    }
    services
}

/// The big-endian flag word carried in manufacturer data.
///
/// Only a manufacturer-data structure of exactly two bytes counts; anything
/// else reads as no flags.
pub fn manufacturer_flags(data: &[u8]) -> u16 {
    let mut flags = 0;
    for (ad_type, payload) in ad_structures(data) {
        if ad_type == AD_MANUFACTURER_DATA {
            flags = match payload {
                [hi, lo] => u16::from_be_bytes([*hi, *lo]),
                _ => 0,
            };
        }
    }
    flags
}

/// Extract complete/shortened local name from advertisement data.
pub fn extract_device_name(data: &[u8]) -> String<32> {
    let mut name = String::new();
    let found = ad_structures(data)
        .find(|(ad_type, _)| *ad_type == AD_SHORT_NAME || *ad_type == AD_COMPLETE_NAME);

    match found {
        Some((_, bytes)) => {
            for &b in bytes {
                if name.push(b as char).is_err() {
                    break;
                }
            }
        }
        None => {
            let _ = name.push_str("Unknown");
        }
    }
    name
}

/// Build an [`Advertisement`] from one scan report.
pub fn parse(address: Address, connectable: bool, rssi: i8, data: &[u8]) -> Advertisement {
    Advertisement {
        address,
        connectable,
        rssi,
        services: service_uuids(data),
        mfg_flags: manufacturer_flags(data),
        name: extract_device_name(data),
    }
}
