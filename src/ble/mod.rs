//! Bluetooth Low Energy subsystem.
//!
//! The device is a **Central** towards its body-worn peers and a
//! **Peripheral** for the configuration app:
//!
//! 1. **Connection manager** (`central`) - one slot per peer role, a shared
//!    scanner, the bonded/pairing admission filter.
//! 2. **Pairing coordinator** (`pairing`) - the timed "accept new bonds"
//!    window.
//! 3. **Advertisement parser** (`adv_parser`) and **payload codecs**
//!    (`payload`) - pure byte-level decoding.
//! 4. **Radio** (`radio`, embedded) - SoftDevice scanner, per-role link
//!    tasks, GATT subscriptions, bonding.
//! 5. **Configuration service** (`config_service`, embedded) - GATT server
//!    exposing the persisted settings slots.

pub mod adv_parser;
pub mod central;
pub mod pairing;
pub mod payload;

#[cfg(feature = "embedded")]
pub mod config_service;
#[cfg(feature = "embedded")]
pub mod radio;

use heapless::{String, Vec};

use crate::config::{
    CONTROLLER_CONN_INTERVAL_MAX, CONTROLLER_CONN_INTERVAL_MIN, CONTROLLER_SLAVE_LATENCY,
    CONTROLLER_SUP_TIMEOUT, FSR_CONN_INTERVAL_MAX, FSR_CONN_INTERVAL_MIN, FSR_SLAVE_LATENCY,
    FSR_SUP_TIMEOUT,
};

/// Number of peer roles.
pub const ROLE_COUNT: usize = 2;

/// Most 128-bit service UUIDs kept from one advertisement.
pub const MAX_ADV_SERVICES: usize = 4;

/// The peers this device connects to, one live link each.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Role {
    /// Force-sensor insole.
    Force,
    /// Handheld remote controller.
    Controller,
}

impl Role {
    pub const ALL: [Role; ROLE_COUNT] = [Role::Force, Role::Controller];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn name(self) -> &'static str {
        match self {
            Role::Force => "fsr",
            Role::Controller => "controller",
        }
    }

    /// Topic carrying this role's connectivity.
    pub const fn connection_topic(self) -> &'static str {
        match self {
            Role::Force => "event/fsr_connection",
            Role::Controller => "event/controller_connection",
        }
    }

    pub fn definition(self) -> &'static PeerDefinition {
        &PEERS[self.index()]
    }
}

/// BLE address type, numbered as stored in flash.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AddressKind {
    Public,
    RandomStatic,
    RandomPrivateResolvable,
    RandomPrivateNonResolvable,
    Anonymous,
}

impl AddressKind {
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    pub const fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(AddressKind::Public),
            1 => Some(AddressKind::RandomStatic),
            2 => Some(AddressKind::RandomPrivateResolvable),
            3 => Some(AddressKind::RandomPrivateNonResolvable),
            4 => Some(AddressKind::Anonymous),
            _ => None,
        }
    }
}

/// A peer or local device address (bytes little-endian, as on air).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Address {
    pub kind: AddressKind,
    pub bytes: [u8; 6],
}

impl Address {
    pub const fn new(kind: AddressKind, bytes: [u8; 6]) -> Self {
        Self { kind, bytes }
    }

    pub fn is_zero(&self) -> bool {
        self.bytes.iter().all(|&b| b == 0)
    }
}

/// A 128-bit UUID in on-air (little-endian) byte order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Uuid128(pub [u8; 16]);

impl Uuid128 {
    /// From the usual textual order, e.g. `0xe2505f48_01a0_11f0_9cd2_0242ac120002`.
    pub const fn from_u128(value: u128) -> Self {
        Self(value.to_le_bytes())
    }

    pub const fn as_le_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

/// Connection parameters in SoftDevice units (1.25 ms intervals, 10 ms timeout).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnParams {
    pub interval_min: u16,
    pub interval_max: u16,
    pub latency: u16,
    pub timeout: u16,
}

/// How a role is recognised and what the link looks like.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PeerDefinition {
    pub role: Role,
    /// Service UUID the peer advertises.
    pub service: Uuid128,
    /// Characteristic streaming the peer's samples.
    pub data_char: Uuid128,
    pub params: ConnParams,
    /// The controller streams indications, the insole notifications.
    pub indicate: bool,
}

/// Peer table, indexed by [`Role::index`]. Scan results are matched in
/// this order; the first matching definition wins.
pub static PEERS: [PeerDefinition; ROLE_COUNT] = [
    PeerDefinition {
        role: Role::Force,
        service: Uuid128::from_u128(0xe2505f48_01a0_11f0_9cd2_0242ac120002),
        data_char: Uuid128::from_u128(0xe2506240_01a0_11f0_9cd2_0242ac120002),
        params: ConnParams {
            interval_min: FSR_CONN_INTERVAL_MIN,
            interval_max: FSR_CONN_INTERVAL_MAX,
            latency: FSR_SLAVE_LATENCY,
            timeout: FSR_SUP_TIMEOUT,
        },
        indicate: false,
    },
    PeerDefinition {
        role: Role::Controller,
        service: Uuid128::from_u128(0xa8a618ba_16bc_11f0_9cd2_0242ac120002),
        data_char: Uuid128::from_u128(0xa8a61aa4_16bc_11f0_9cd2_0242ac120002),
        params: ConnParams {
            interval_min: CONTROLLER_CONN_INTERVAL_MIN,
            interval_max: CONTROLLER_CONN_INTERVAL_MAX,
            latency: CONTROLLER_SLAVE_LATENCY,
            timeout: CONTROLLER_SUP_TIMEOUT,
        },
        indicate: true,
    },
];

/// One parsed scan report.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Advertisement {
    pub address: Address,
    /// Connectable undirected or directed advertising.
    pub connectable: bool,
    pub rssi: i8,
    /// Advertised 128-bit service UUIDs.
    pub services: Vec<Uuid128, MAX_ADV_SERVICES>,
    /// Two-byte manufacturer flag word, 0 when absent or malformed.
    pub mfg_flags: u16,
    pub name: String<32>,
}

impl Advertisement {
    pub fn advertises(&self, service: &Uuid128) -> bool {
        self.services.contains(service)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_index_the_peer_table() {
        for role in Role::ALL {
            assert_eq!(role.definition().role, role);
        }
        assert_eq!(Role::Force.name(), "fsr");
        assert_eq!(Role::Controller.connection_topic(), "event/controller_connection");
    }

    #[test]
    fn uuid_is_stored_little_endian() {
        let uuid = Uuid128::from_u128(0xe2505f48_01a0_11f0_9cd2_0242ac120002);
        assert_eq!(uuid.0[0], 0x02);
        assert_eq!(uuid.0[15], 0xe2);
    }

    #[test]
    fn address_kind_roundtrip_and_unknown() {
        assert_eq!(
            AddressKind::from_u8(AddressKind::RandomStatic.to_u8()),
            Some(AddressKind::RandomStatic)
        );
        assert_eq!(AddressKind::from_u8(9), None);
        assert!(Address::new(AddressKind::Public, [0; 6]).is_zero());
    }
}
