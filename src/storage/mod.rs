//! Persistent state kept in the nRF52840's internal flash.
//!
//! - **Bond registry** (`bonds`): addresses of bonded peers, bounded by
//!   `MAX_PAIRED_DEVICES`.
//! - **Settings** (`settings`): the device's static random address and the
//!   five configuration slots exposed over GATT.
//! - **Flash map** (`flash`, embedded): `sequential-storage` key/value map
//!   holding the serialized records.
//!
//! Serialization is pure and host-tested; only `flash` touches hardware.

pub mod bonds;
pub mod settings;

#[cfg(feature = "embedded")]
pub mod flash;

pub use bonds::BondRegistry;
pub use settings::{ConfigSlot, ConfigStore, DeviceIdentity};

/// Keys of the flash map.
pub mod keys {
    pub const IDENTITY: u8 = 0x01;
    pub const BONDS: u8 = 0x02;
    /// First configuration slot; slot `n` lives at `CONFIG_BASE + n`.
    pub const CONFIG_BASE: u8 = 0x10;
}
