//! Application-wide constants and compile-time configuration.
//!
//! All timing parameters, connection parameters, capacities and flash
//! layout live here so they can be tuned in one place.

use crate::Millis;

// BLE central

/// Manufacturer-data flag a peer sets while it wants to be (re)bonded.
pub const MFG_FLAG_PAIRING: u16 = 0x8000;

/// Delay after a successful connection before scanning resumes for the
/// remaining roles.
pub const SCAN_SETTLE_MS: Millis = 500;

/// Delay before retrying a scan the radio refused to start.
pub const SCAN_RETRY_MS: Millis = 1_000;

/// Delay between connecting to a peer and subscribing to its data
/// characteristic.
pub const SUBSCRIBE_DELAY_MS: u64 = 500;

/// How long the device stays in pairing mode when no new peer bonds.
pub const PAIRING_TIMEOUT_MS: Millis = 30_000;

/// Force-sensor insole connection parameters (1.25 ms / 10 ms units).
/// 8 = 10 ms interval, 48 = 480 ms supervision timeout.
pub const FSR_CONN_INTERVAL_MIN: u16 = 8;
pub const FSR_CONN_INTERVAL_MAX: u16 = 8;
pub const FSR_SLAVE_LATENCY: u16 = 0;
pub const FSR_SUP_TIMEOUT: u16 = 48;

/// Remote controller connection parameters. 16 = 20 ms, 80 = 800 ms.
pub const CONTROLLER_CONN_INTERVAL_MIN: u16 = 16;
pub const CONTROLLER_CONN_INTERVAL_MAX: u16 = 16;
pub const CONTROLLER_SLAVE_LATENCY: u16 = 2;
pub const CONTROLLER_SUP_TIMEOUT: u16 = 80;

// BLE peripheral (configuration service)

/// Name advertised by the configuration service.
pub const DEVICE_NAME: &str = "limbhub";

// Input

/// Button debounce time (ms).
pub const BUTTON_DEBOUNCE_MS: u64 = 50;

/// Hold time after which a press becomes a long press (ms).
pub const LONG_PRESS_MS: Millis = 800;

// Power

/// Delay between switching the rails off and the cold reboot.
pub const REBOOT_DELAY_MS: Millis = 3_000;

// Event bus

/// Depth of every actor's mailbox.
pub const BUS_DEPTH: usize = 8;

/// Depth of the raw button edge queue.
pub const EDGE_QUEUE_DEPTH: usize = 8;

/// Depth of the radio completion queue (connect / disconnect / advertisements).
pub const RADIO_QUEUE_DEPTH: usize = 8;

/// Depth of the decoded peer sample queue feeding the monitor.
pub const SAMPLE_QUEUE_DEPTH: usize = 10;

// Peer payloads

/// Any force channel above this raw value counts as "pressed".
pub const FSR_PRESSED_THRESHOLD: u16 = 50;

// Paired-device storage

/// Maximum number of bonded peers tracked in storage.
pub const MAX_PAIRED_DEVICES: usize = 4;

/// Flash page index where persistent storage starts (4 KB per page on nRF52840).
pub const STORAGE_FLASH_PAGE_START: u32 = 240;

/// Number of flash pages reserved for persistent storage.
pub const STORAGE_FLASH_PAGE_COUNT: u32 = 4;
