//! limbhub firmware entry point (nRF52840 + S140).
//!
//! Brings up the SoftDevice, loads identity, bonds and configuration from
//! flash, then spawns one task per actor plus the radio, button and console
//! helpers. Everything after `main` returns runs on the bus.
//!
//! Pin map (nRF52840 DK):
//!
//! | Function        | Pin            |
//! |-----------------|----------------|
//! | Button A / B    | P0.11 / P0.12  |
//! | LED R / G / B   | P0.13 / P0.14 / P0.15 |
//! | System rail EN  | P0.03          |
//! | Motor rail EN   | P0.04          |
//! | Console TX / RX | P0.06 / P0.08  |

#![no_std]
#![no_main]

use core::mem;

use defmt::{info, unwrap, warn};
use embassy_executor::Spawner;
use embassy_nrf::gpio::Pin;
use embassy_nrf::interrupt::{self, InterruptExt, Priority};
use embassy_nrf::{bind_interrupts, peripherals, uarte};
use embassy_sync::mutex::Mutex;
use nrf_softdevice::{raw, Flash, Softdevice};
use static_cell::StaticCell;
use {defmt_rtt as _, panic_probe as _};

use limbhub::ble::config_service::{config_service_task, ConfigServer};
use limbhub::ble::pairing::pairing_task;
use limbhub::ble::radio::{
    central_task, init_bonder, link_task, scanner_task, set_identity,
};
use limbhub::ble::Role;
use limbhub::bus::SystemBus;
use limbhub::config::DEVICE_NAME;
use limbhub::monitor::{console_task, monitor_task};
use limbhub::motor::motor_task;
use limbhub::power::{power_task, GpioRails};
use limbhub::storage::flash::{SharedStorage, Storage};
use limbhub::ui::buttons::{button_task, gesture_task};
use limbhub::ui::led::{led_task, RgbLed};
use limbhub::ui::Button;

bind_interrupts!(struct Irqs {
    UARTE0_UART0 => uarte::InterruptHandler<peripherals::UARTE0>;
});

static BUS: StaticCell<SystemBus> = StaticCell::new();
static STORAGE: StaticCell<SharedStorage<Flash>> = StaticCell::new();
static SERVER: StaticCell<ConfigServer> = StaticCell::new();

#[embassy_executor::task]
async fn softdevice_task(sd: &'static Softdevice) -> ! {
    sd.run().await
}

fn softdevice_config() -> nrf_softdevice::Config {
    nrf_softdevice::Config {
        clock: Some(raw::nrf_clock_lf_cfg_t {
            source: raw::NRF_CLOCK_LF_SRC_RC as u8,
            rc_ctiv: 16,
            rc_temp_ctiv: 2,
            accuracy: raw::NRF_CLOCK_LF_ACCURACY_500_PPM as u8,
        }),
        conn_gap: Some(raw::ble_gap_conn_cfg_t {
            conn_count: 3,
            event_length: 24,
        }),
        conn_gatt: Some(raw::ble_gatt_conn_cfg_t { att_mtu: 128 }),
        gatts_attr_tab_size: Some(raw::ble_gatts_cfg_attr_tab_size_t {
            attr_tab_size: raw::BLE_GATTS_ATTR_TAB_SIZE_DEFAULT,
        }),
        gap_role_count: Some(raw::ble_gap_cfg_role_count_t {
            adv_set_count: 1,
            periph_role_count: 1,
            central_role_count: 2,
            central_sec_count: 2,
            _bitfield_1: raw::ble_gap_cfg_role_count_t::new_bitfield_1(0),
        }),
        gap_device_name: Some(raw::ble_gap_cfg_device_name_t {
            p_value: DEVICE_NAME.as_ptr() as _,
            current_len: DEVICE_NAME.len() as u16,
            max_len: DEVICE_NAME.len() as u16,
            write_perm: unsafe { mem::zeroed() },
            _bitfield_1: raw::ble_gap_cfg_device_name_t::new_bitfield_1(
                raw::BLE_GATTS_VLOC_STACK as u8,
            ),
        }),
        ..Default::default()
    }
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("limbhub starting");

    // The SoftDevice owns priorities 0, 1 and 4.
    let mut config = embassy_nrf::config::Config::default();
    config.gpiote_interrupt_priority = Priority::P2;
    config.time_interrupt_priority = Priority::P2;
    let p = embassy_nrf::init(config);
    interrupt::UARTE0_UART0.set_priority(Priority::P3);

    let sd = Softdevice::enable(&softdevice_config());
    let server = SERVER.init(unwrap!(ConfigServer::new(sd)));
    let sd: &'static Softdevice = sd;
    unwrap!(spawner.spawn(softdevice_task(sd)));

    // Persistent state
    let storage = STORAGE.init(Mutex::new(Storage::new(Flash::take(sd))));
    let (identity, bonds, settings) = {
        let mut store = storage.lock().await;
        let identity = store
            .load_identity(|| {
                let mut bytes = [0u8; 6];
                if nrf_softdevice::random_bytes(sd, &mut bytes).is_err() {
                    warn!("rng unavailable");
                }
                bytes
            })
            .await;
        let identity = match identity {
            Ok(identity) => identity,
            Err(e) => defmt::panic!("no device identity: {:?}", e),
        };
        let bonds = match store.load_bonds().await {
            Ok(bonds) => bonds,
            Err(e) => defmt::panic!("bond registry unreadable: {:?}", e),
        };
        let settings = match store.load_config().await {
            Ok(settings) => settings,
            Err(e) => defmt::panic!("configuration unreadable: {:?}", e),
        };
        (identity, bonds, settings)
    };
    set_identity(sd, &identity);
    info!("{} bonded peer(s)", bonds.len());

    if let Err(e) = server.seed(sd, &settings) {
        warn!("config service not seeded: {:?}", e);
    }

    let bus: &'static SystemBus = BUS.init(SystemBus::new());
    let bonder = init_bonder();

    // Radio
    unwrap!(spawner.spawn(central_task(bus, storage, bonder, bonds)));
    unwrap!(spawner.spawn(scanner_task(sd)));
    unwrap!(spawner.spawn(link_task(sd, Role::Force, bonder)));
    unwrap!(spawner.spawn(link_task(sd, Role::Controller, bonder)));
    unwrap!(spawner.spawn(config_service_task(sd, server, storage, settings)));

    // Coordination
    unwrap!(spawner.spawn(pairing_task(bus)));
    let rails = GpioRails::new(p.P0_03.degrade(), p.P0_04.degrade());
    unwrap!(spawner.spawn(power_task(bus, rails)));
    unwrap!(spawner.spawn(motor_task(bus)));

    // User interface
    unwrap!(spawner.spawn(button_task(p.P0_11.degrade(), Button::A)));
    unwrap!(spawner.spawn(button_task(p.P0_12.degrade(), Button::B)));
    unwrap!(spawner.spawn(gesture_task(bus)));
    let led = RgbLed::new(p.P0_13.degrade(), p.P0_14.degrade(), p.P0_15.degrade());
    unwrap!(spawner.spawn(led_task(bus, led)));

    // Diagnostics
    let mut uart_config = uarte::Config::default();
    uart_config.parity = uarte::Parity::EXCLUDED;
    uart_config.baudrate = uarte::Baudrate::BAUD115200;
    let uart = uarte::Uarte::new(p.UARTE0, Irqs, p.P0_08, p.P0_06, uart_config);
    unwrap!(spawner.spawn(monitor_task()));
    unwrap!(spawner.spawn(console_task(uart)));

    info!("limbhub running, waiting for the power gesture");
}
