//! Flash-backed persistence via `sequential-storage`.
//!
//! One key-value map over the reserved pages:
//!
//! | key         | record                                  |
//! |-------------|-----------------------------------------|
//! | 0x01        | device identity, 6 address bytes       |
//! | 0x02        | bond registry (`bonds::serialize`)      |
//! | 0x10..0x14  | configuration slots, u16 little-endian  |

use core::ops::Range;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embedded_storage_async::nor_flash::NorFlash;
use sequential_storage::cache::NoCache;
use sequential_storage::map::{fetch_item, store_item};

use crate::config::{STORAGE_FLASH_PAGE_COUNT, STORAGE_FLASH_PAGE_START};
use crate::error::Error;
use crate::storage::bonds::{BondRegistry, MAX_SERIALIZED_LEN};
use crate::storage::settings::{ConfigSlot, ConfigStore, DeviceIdentity, IdentitySource};
use crate::storage::keys;

/// Flash page size for nRF52840 (4 KB).
const FLASH_PAGE_SIZE: u32 = 4096;

const STORAGE_RANGE: Range<u32> = STORAGE_FLASH_PAGE_START * FLASH_PAGE_SIZE
    ..(STORAGE_FLASH_PAGE_START + STORAGE_FLASH_PAGE_COUNT) * FLASH_PAGE_SIZE;

/// Scratch space for one record plus map overhead.
const SCRATCH_LEN: usize = MAX_SERIALIZED_LEN + 32;

/// Storage shared by the central and the configuration service.
pub type SharedStorage<F> = Mutex<CriticalSectionRawMutex, Storage<F>>;

pub struct Storage<F: NorFlash> {
    flash: F,
}

impl<F: NorFlash> Storage<F> {
    pub fn new(flash: F) -> Self {
        Self { flash }
    }

    async fn fetch<'b>(&mut self, key: u8, buf: &'b mut [u8]) -> Result<Option<&'b [u8]>, Error> {
        fetch_item::<u8, &[u8], _>(
            &mut self.flash,
            STORAGE_RANGE,
            &mut NoCache::new(),
            buf,
            &key,
        )
        .await
        .map_err(|e| {
            log_error!("flash: read of key {} failed: {:?}", key, defmt::Debug2Format(&e));
            Error::Storage
        })
    }

    async fn store(&mut self, key: u8, item: &[u8]) -> Result<(), Error> {
        let mut buf = [0u8; SCRATCH_LEN];
        store_item::<u8, &[u8], _>(
            &mut self.flash,
            STORAGE_RANGE,
            &mut NoCache::new(),
            &mut buf,
            &key,
            &item,
        )
        .await
        .map_err(|e| {
            log_error!("flash: write of key {} failed: {:?}", key, defmt::Debug2Format(&e));
            Error::Storage
        })
    }

    /// Load the device address, generating and persisting one on first boot.
    pub async fn load_identity(
        &mut self,
        random: impl FnOnce() -> [u8; 6],
    ) -> Result<DeviceIdentity, Error> {
        let mut buf = [0u8; SCRATCH_LEN];
        let stored = self.fetch(keys::IDENTITY, &mut buf).await?;
        let identity =
            DeviceIdentity::resolve(stored, random).map_err(|_| Error::IdentityUnavailable)?;

        if identity.source == IdentitySource::Generated {
            log_info!("flash: new identity {:?}", identity.address);
            self.store(keys::IDENTITY, &identity.to_bytes())
                .await
                .map_err(|_| Error::IdentityUnavailable)?;
        }
        Ok(identity)
    }

    pub async fn load_bonds(&mut self) -> Result<BondRegistry, Error> {
        let mut buf = [0u8; SCRATCH_LEN];
        let bonds = match self.fetch(keys::BONDS, &mut buf).await? {
            Some(data) => BondRegistry::deserialize(data)?,
            None => BondRegistry::new(),
        };
        log_info!("flash: {} bond(s) loaded", bonds.len());
        Ok(bonds)
    }

    pub async fn save_bonds(&mut self, bonds: &BondRegistry) -> Result<(), Error> {
        let mut data = [0u8; MAX_SERIALIZED_LEN];
        let len = bonds.serialize(&mut data)?;
        self.store(keys::BONDS, &data[..len]).await?;
        log_info!("flash: {} bond(s) saved", bonds.len());
        Ok(())
    }

    /// Read every configuration slot. Corrupt slots read as 0.
    pub async fn load_config(&mut self) -> Result<ConfigStore, Error> {
        let mut config = ConfigStore::new();
        for slot in ConfigSlot::ALL {
            let mut buf = [0u8; SCRATCH_LEN];
            let stored = self.fetch(slot.key(), &mut buf).await?;
            if let Err(e) = config.load(slot, stored) {
                log_warn!("flash: {} unreadable: {:?}", slot.name(), e);
            }
        }
        Ok(config)
    }

    pub async fn save_slot(&mut self, slot: ConfigSlot, value: u16) -> Result<(), Error> {
        self.store(slot.key(), &value.to_le_bytes()).await
    }
}
