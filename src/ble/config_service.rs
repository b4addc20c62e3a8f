//! Configuration GATT service (peripheral role).
//!
//! Five readable/writable 16-bit slots. Reads are served by the SoftDevice
//! from the attribute table, which is seeded from flash at boot; every
//! accepted write is merged into the slot and persisted right away.

use embassy_futures::select::{select, Either};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Duration, Timer};
use heapless::Vec;
use nrf_softdevice::ble::gatt_server::builder::ServiceBuilder;
use nrf_softdevice::ble::gatt_server::characteristic::{Attribute, Metadata, Properties};
use nrf_softdevice::ble::gatt_server::{self, RegisterError, WriteOp};
use nrf_softdevice::ble::{peripheral, Connection, Uuid};
use nrf_softdevice::{Flash, Softdevice};

use crate::config::DEVICE_NAME;
use crate::error::{BleError, Error};
use crate::storage::flash::SharedStorage;
use crate::storage::settings::{ConfigSlot, ConfigStore, CONFIG_SERVICE_UUID, CONFIG_SLOT_COUNT};

/// Flags + complete list of 128-bit services.
static ADV_DATA: [u8; 21] = adv_data();

/// Complete local name.
static SCAN_DATA: [u8; DEVICE_NAME.len() + 2] = scan_data();

const fn adv_data() -> [u8; 21] {
    let mut data = [0u8; 21];
    data[0] = 0x02;
    data[1] = 0x01;
    data[2] = 0x06; // LE general discoverable, BR/EDR not supported
    data[3] = 0x11;
    data[4] = 0x07;
    let uuid = CONFIG_SERVICE_UUID.as_le_bytes();
    let mut i = 0;
    while i < 16 {
        data[5 + i] = uuid[i];
        i += 1;
    }
    data
}

const fn scan_data() -> [u8; DEVICE_NAME.len() + 2] {
    let mut data = [0u8; DEVICE_NAME.len() + 2];
    data[0] = DEVICE_NAME.len() as u8 + 1;
    data[1] = 0x09;
    let name = DEVICE_NAME.as_bytes();
    let mut i = 0;
    while i < name.len() {
        data[2 + i] = name[i];
        i += 1;
    }
    data
}

/// A write accepted by the attribute table, not yet merged.
pub struct ConfigWrite {
    slot: ConfigSlot,
    offset: usize,
    data: Vec<u8, 2>,
}

/// Slot values waiting to be written to flash.
static PENDING: Channel<CriticalSectionRawMutex, (ConfigSlot, u16), CONFIG_SLOT_COUNT> =
    Channel::new();

pub struct ConfigServer {
    /// Value handle per slot.
    handles: [u16; CONFIG_SLOT_COUNT],
}

impl ConfigServer {
    /// Register the service. Must run before the SoftDevice is shared.
    pub fn new(sd: &mut Softdevice) -> Result<Self, RegisterError> {
        let mut service = ServiceBuilder::new(sd, Uuid::new_128(CONFIG_SERVICE_UUID.as_le_bytes()))?;
        let mut handles = [0u16; CONFIG_SLOT_COUNT];

        for slot in ConfigSlot::ALL {
            let attr = Attribute::new([0u8; 2]).variable_len(2);
            let md = Metadata::new(Properties::new().read().write());
            let characteristic =
                service.add_characteristic(Uuid::new_128(slot.uuid().as_le_bytes()), attr, md)?;
            handles[slot.index()] = characteristic.build().value_handle;
        }
        let _ = service.build();

        Ok(Self { handles })
    }

    /// Seed the attribute table with the persisted values.
    pub fn seed(&self, sd: &Softdevice, config: &ConfigStore) -> Result<(), Error> {
        for slot in ConfigSlot::ALL {
            gatt_server::set_value(sd, self.handles[slot.index()], &config.get(slot).to_le_bytes())
                .map_err(|e| {
                    log_error!("config: seeding {} failed: {:?}", slot.name(), e);
                    BleError::GattServer
                })?;
        }
        Ok(())
    }

    fn slot_for(&self, handle: u16) -> Option<ConfigSlot> {
        ConfigSlot::ALL
            .into_iter()
            .find(|slot| self.handles[slot.index()] == handle)
    }
}

impl gatt_server::Server for ConfigServer {
    type Event = ConfigWrite;

    fn on_write(
        &self,
        _conn: &Connection,
        handle: u16,
        _op: WriteOp,
        offset: usize,
        data: &[u8],
    ) -> Option<Self::Event> {
        let slot = self.slot_for(handle)?;
        match Vec::from_slice(data) {
            Ok(data) => Some(ConfigWrite { slot, offset, data }),
            Err(()) => {
                log_warn!("config: {} write refused: {:?}", slot.name(), Error::InvalidOffset);
                None
            }
        }
    }
}

/// Advertise, serve one configuration client at a time, persist writes.
#[embassy_executor::task]
pub async fn config_service_task(
    sd: &'static Softdevice,
    server: &'static ConfigServer,
    storage: &'static SharedStorage<Flash>,
    mut config: ConfigStore,
) -> ! {
    loop {
        let adv = peripheral::ConnectableAdvertisement::ScannableUndirected {
            adv_data: &ADV_DATA,
            scan_data: &SCAN_DATA,
        };
        let conn = match peripheral::advertise_connectable(sd, adv, &peripheral::Config::default())
            .await
        {
            Ok(conn) => conn,
            Err(e) => {
                log_error!(
                    "config: advertising failed: {:?} ({:?})",
                    e,
                    Error::Ble(BleError::AdvertiseFailed)
                );
                Timer::after(Duration::from_secs(1)).await;
                continue;
            }
        };
        log_info!("config: client connected");

        let serve = gatt_server::run(&conn, server, |write| {
            match config.write(write.slot, write.offset, &write.data) {
                Ok(value) => {
                    if PENDING.try_send((write.slot, value)).is_err() {
                        log_warn!("config: {} not persisted, queue full", write.slot.name());
                    }
                }
                Err(e) => log_warn!("config: {} write refused: {:?}", write.slot.name(), e),
            }
        });

        let persist = async {
            loop {
                let (slot, value) = PENDING.receive().await;
                if let Err(e) = storage.lock().await.save_slot(slot, value).await {
                    log_error!("config: {} not persisted: {:?}", slot.name(), e);
                }
            }
        };

        if let Either::First(_) = select(serve, persist).await {
            log_info!("config: client gone");
        }

        // Writes that arrived just before the disconnect.
        while let Ok((slot, value)) = PENDING.try_receive() {
            if let Err(e) = storage.lock().await.save_slot(slot, value).await {
                log_error!("config: {} not persisted: {:?}", slot.name(), e);
            }
        }
    }
}
