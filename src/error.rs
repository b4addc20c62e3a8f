//! Unified error type for limbhub.
//!
//! We avoid `alloc` - all error variants carry only fixed-size data.
//! Implements `defmt::Format` (with the `defmt` feature) for efficient
//! on-target logging.

/// Top-level error type used across the application.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    // BLE
    /// The SoftDevice returned a BLE-level error.
    Ble(BleError),

    /// A peer payload had the wrong length for its type.
    PayloadLength { expected: usize, actual: usize },

    /// A characteristic write did not fit the 16-bit value.
    InvalidOffset,

    // Coordination
    /// The event is not allowed in the current mode.
    NotPermitted,

    /// An actor's mailbox was full and the event was dropped.
    QueueFull,

    /// A console line did not parse.
    UnknownCommand,

    // Storage
    /// The bond registry is at capacity; the new entry was dropped.
    BondRegistryFull,

    /// Flash read/write/erase failed.
    Storage,

    /// Stored data could not be decoded.
    Corrupt,

    /// No stable device identity could be loaded or created.
    IdentityUnavailable,

    // Generic
    /// Buffer too small for the requested operation.
    BufferOverflow,
}

/// Subset of BLE errors we propagate (keeps the enum `Copy`-friendly).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BleError {
    /// GAP / GATT raw error code from the SoftDevice.
    Raw(u32),
    /// Scan was cancelled or could not start.
    ScanFailed,
    /// Connection attempt failed.
    ConnectFailed,
    /// GATT discovery failed.
    DiscoveryFailed,
    /// Characteristic subscribe/notify failed.
    NotifyFailed,
    /// Advertising the configuration service failed.
    AdvertiseFailed,
    /// Registering or updating the configuration service failed.
    GattServer,
}

// Convenience conversions

impl From<BleError> for Error {
    fn from(e: BleError) -> Self {
        Error::Ble(e)
    }
}
