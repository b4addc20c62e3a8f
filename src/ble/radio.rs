//! SoftDevice glue for the connection manager.
//!
//! ```text
//!                   SCAN_CONTROL             LINK_COMMANDS[role]
//!  central_task ----------------> scanner_task    |
//!   (manager)  -------------------------------> link_task x2
//!       ^                                         |
//!       +------------ RADIO_EVENTS <--------------+
//!       +------------ BOND_EVENTS <----- Bonder
//! ```
//!
//! The manager never awaits the radio: [`SoftdeviceRadio`] turns its
//! requests into signals and channel messages, and the scanner and the
//! link tasks report completions on `RADIO_EVENTS`. New bonds travel on
//! their own queue so a burst of advertisements cannot crowd them out.

use core::cell::{Cell, RefCell};

use embassy_futures::select::{select, select3, Either, Either3};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Timer};
use heapless::Vec;
use nrf_softdevice::ble::security::{IoCapabilities, SecurityHandler};
use nrf_softdevice::ble::{
    central, gatt_client, Address as SdAddress, AddressType, Connection, EncryptError,
    EncryptionInfo, IdentityKey, MasterId, SecurityMode,
};
use nrf_softdevice::{raw, Flash, Softdevice};
use static_cell::StaticCell;

use crate::ble::adv_parser;
use crate::ble::central::{ConnectionManager, Radio, RoleHooks, Verdict};
use crate::ble::payload::Sample;
use crate::ble::{Address, AddressKind, Advertisement, ConnParams, Role, ROLE_COUNT};
use crate::bus::{log_outcome, Actor, SystemBus};
use crate::config::{
    MAX_PAIRED_DEVICES, RADIO_QUEUE_DEPTH, SAMPLE_QUEUE_DEPTH, SUBSCRIBE_DELAY_MS,
};
use crate::error::{BleError, Error};
use crate::storage::flash::SharedStorage;
use crate::storage::settings::DeviceIdentity;
use crate::storage::BondRegistry;
use crate::uptime_ms;

type RawMutex = CriticalSectionRawMutex;

/// Completions reported to the central task.
pub enum RadioEvent {
    Advertisement(Advertisement),
    Connected { role: Role, handle: u16 },
    ConnectFailed(Role),
    Disconnected { role: Role, handle: u16 },
    SecurityFailed { role: Role, address: Address },
}

enum LinkCommand {
    Connect {
        address: SdAddress,
        params: ConnParams,
    },
    Disconnect,
}

pub static RADIO_EVENTS: Channel<RawMutex, RadioEvent, RADIO_QUEUE_DEPTH> = Channel::new();

/// Peers that completed bonding, reported by the security handler.
static BOND_EVENTS: Channel<RawMutex, Address, MAX_PAIRED_DEVICES> = Channel::new();

/// Decoded peer samples, consumed by the monitor.
pub static SAMPLES: Channel<RawMutex, Sample, SAMPLE_QUEUE_DEPTH> = Channel::new();

static LINK_COMMANDS: [Channel<RawMutex, LinkCommand, 2>; ROLE_COUNT] =
    [Channel::new(), Channel::new()];

/// Raised by the hooks once the manager has accepted a link.
static SUBSCRIBE: [Signal<RawMutex, ()>; ROLE_COUNT] = [Signal::new(), Signal::new()];

static SCAN_CONTROL: Signal<RawMutex, bool> = Signal::new();

// Address conversion

fn to_sd(address: &Address) -> SdAddress {
    let kind = match address.kind {
        AddressKind::Public => AddressType::Public,
        AddressKind::RandomStatic => AddressType::RandomStatic,
        AddressKind::RandomPrivateResolvable => AddressType::RandomPrivateResolvable,
        AddressKind::RandomPrivateNonResolvable => AddressType::RandomPrivateNonResolvable,
        AddressKind::Anonymous => AddressType::Anonymous,
    };
    SdAddress::new(kind, address.bytes)
}

fn from_sd(address: SdAddress) -> Address {
    let kind = match address.address_type() {
        AddressType::Public => AddressKind::Public,
        AddressType::RandomStatic => AddressKind::RandomStatic,
        AddressType::RandomPrivateResolvable => AddressKind::RandomPrivateResolvable,
        AddressType::RandomPrivateNonResolvable => AddressKind::RandomPrivateNonResolvable,
        _ => AddressKind::Anonymous,
    };
    Address::new(kind, address.bytes())
}

// Bonding

struct PeerKeys {
    master_id: MasterId,
    key: EncryptionInfo,
    peer_id: IdentityKey,
}

/// Security handler holding the link keys of bonded peers.
///
/// New bonds are only accepted while the pairing window is open.
pub struct Bonder {
    bondable: Cell<bool>,
    peers: RefCell<Vec<PeerKeys, MAX_PAIRED_DEVICES>>,
}

impl Bonder {
    fn new() -> Self {
        Self {
            bondable: Cell::new(false),
            peers: RefCell::new(Vec::new()),
        }
    }

    pub fn is_bondable(&self) -> bool {
        self.bondable.get()
    }

    fn set_bondable(&self, bondable: bool) {
        self.bondable.set(bondable);
    }

    fn forget(&self, address: SdAddress) {
        self.peers
            .borrow_mut()
            .retain(|p| !p.peer_id.is_match(address));
    }
}

impl SecurityHandler for Bonder {
    fn io_capabilities(&self) -> IoCapabilities {
        IoCapabilities::None
    }

    fn can_bond(&self, _conn: &Connection) -> bool {
        self.bondable.get()
    }

    fn on_bonded(
        &self,
        conn: &Connection,
        master_id: MasterId,
        key: EncryptionInfo,
        peer_id: IdentityKey,
    ) {
        {
            let mut peers = self.peers.borrow_mut();
            if let Some(existing) = peers.iter_mut().find(|p| p.master_id == master_id) {
                existing.key = key;
                existing.peer_id = peer_id;
            } else if peers
                .push(PeerKeys {
                    master_id,
                    key,
                    peer_id,
                })
                .is_err()
            {
                log_warn!("radio: key store full, bond kept for this link only");
            }
        }

        let address = from_sd(conn.peer_address());
        if BOND_EVENTS.try_send(address).is_err() {
            log_error!("radio: bond queue full, {:?} not recorded", address);
        }
    }

    fn get_key(&self, _conn: &Connection, master_id: MasterId) -> Option<EncryptionInfo> {
        self.peers
            .borrow()
            .iter()
            .find_map(|p| (p.master_id == master_id).then_some(p.key))
    }

    fn get_peripheral_key(&self, conn: &Connection) -> Option<(MasterId, EncryptionInfo)> {
        self.peers.borrow().iter().find_map(|p| {
            p.peer_id
                .is_match(conn.peer_address())
                .then_some((p.master_id, p.key))
        })
    }

    fn on_security_update(&self, _conn: &Connection, mode: SecurityMode) {
        log_info!("radio: security mode {:?}", mode);
    }
}

/// Use the persisted identity as the local address.
pub fn set_identity(sd: &Softdevice, identity: &DeviceIdentity) {
    nrf_softdevice::ble::set_address(sd, &to_sd(&identity.address));
    log_info!("radio: local address {:?}", identity.address);
}

/// The one security handler. Call once, from `main`.
pub fn init_bonder() -> &'static Bonder {
    static BONDER: StaticCell<Bonder> = StaticCell::new();
    BONDER.init(Bonder::new())
}

// Manager seams

/// [`Radio`] backed by the scanner and link tasks.
pub struct SoftdeviceRadio {
    bonder: &'static Bonder,
}

impl Radio for SoftdeviceRadio {
    fn start_scan(&mut self) -> Result<(), Error> {
        SCAN_CONTROL.signal(true);
        Ok(())
    }

    fn stop_scan(&mut self) {
        SCAN_CONTROL.signal(false);
    }

    fn connect(&mut self, role: Role, address: &Address, params: &ConnParams) -> Result<(), Error> {
        LINK_COMMANDS[role.index()]
            .try_send(LinkCommand::Connect {
                address: to_sd(address),
                params: *params,
            })
            .map_err(|_| Error::QueueFull)
    }

    fn disconnect(&mut self, role: Role) {
        if LINK_COMMANDS[role.index()]
            .try_send(LinkCommand::Disconnect)
            .is_err()
        {
            log_warn!("radio: {} link busy, disconnect dropped", role.name());
        }
    }

    fn set_bondable(&mut self, bondable: bool) {
        self.bonder.set_bondable(bondable);
    }

    fn forget_bond(&mut self, address: &Address) {
        self.bonder.forget(to_sd(address));
    }
}

/// Starts each role's data subscription once its link is accepted.
pub struct LinkHooks;

impl RoleHooks for LinkHooks {
    fn on_connect(&mut self, role: Role) {
        SUBSCRIBE[role.index()].signal(());
    }

    fn on_disconnect(&mut self, role: Role) {
        SUBSCRIBE[role.index()].reset();
    }
}

type Manager = ConnectionManager<SoftdeviceRadio, LinkHooks>;

// Tasks

/// Central actor: owns the connection manager.
#[embassy_executor::task]
pub async fn central_task(
    bus: &'static SystemBus,
    storage: &'static SharedStorage<Flash>,
    bonder: &'static Bonder,
    bonds: BondRegistry,
) -> ! {
    let mut manager = ConnectionManager::new(SoftdeviceRadio { bonder }, LinkHooks, bonds);

    loop {
        match select3(
            bus.next_or_deadline(Actor::Radio.index(), manager.deadline()),
            RADIO_EVENTS.receive(),
            BOND_EVENTS.receive(),
        )
        .await
        {
            Either3::First(Some(event)) => {
                let result = manager.handle_event(&event, uptime_ms(), bus);
                log_outcome(Actor::Radio, &event, result);
            }
            Either3::First(None) => manager.on_timer(uptime_ms()),
            Either3::Second(event) => on_radio_event(&mut manager, event, bus),
            Either3::Third(address) => {
                if let Err(e) = manager.on_bonded(address) {
                    log_warn!("radio: bond {:?} not recorded: {:?}", address, e);
                }
            }
        }

        if manager.take_bonds_dirty() {
            if let Err(e) = storage.lock().await.save_bonds(manager.bonds()).await {
                log_error!("radio: bonds not persisted: {:?}", e);
            }
        }
    }
}

fn on_radio_event(manager: &mut Manager, event: RadioEvent, bus: &SystemBus) {
    match event {
        RadioEvent::Advertisement(adv) => {
            // Reports queued before the scan was halted.
            if !manager.is_scanning() {
                return;
            }
            if let Verdict::Connecting(role) = manager.evaluate(&adv) {
                log_info!("radio: {} <- {:?} (rssi {})", role.name(), adv.address, adv.rssi);
            }
        }
        RadioEvent::Connected { role, handle } => {
            manager.on_connected(role, handle, uptime_ms(), bus)
        }
        RadioEvent::ConnectFailed(role) => manager.on_connect_failed(role),
        RadioEvent::Disconnected { role, handle } => manager.on_disconnected(role, handle, bus),
        RadioEvent::SecurityFailed { role, address } => {
            manager.on_security_failed(role, address)
        }
    }
}

/// Shared scanner, switched on and off by the manager.
#[embassy_executor::task]
pub async fn scanner_task(sd: &'static Softdevice) -> ! {
    let mut enabled = false;

    loop {
        if !enabled {
            enabled = SCAN_CONTROL.wait().await;
            continue;
        }

        let config = central::ScanConfig {
            // Active scan to retrieve scan-response data (names, flags).
            active: true,
            ..Default::default()
        };

        let scan = central::scan(sd, &config, |params| {
            let data =
                unsafe { core::slice::from_raw_parts(params.data.p_data, params.data.len as usize) };
            let adv = adv_parser::parse(
                from_sd(SdAddress::from_raw(params.peer_addr)),
                params.type_.connectable() != 0,
                params.rssi,
                data,
            );
            if RADIO_EVENTS.try_send(RadioEvent::Advertisement(adv)).is_err() {
                log_debug!("radio: event queue full, advertisement dropped");
            }
            None::<()>
        });

        match select(scan, SCAN_CONTROL.wait()).await {
            Either::First(Ok(())) => {}
            Either::First(Err(e)) => {
                log_warn!("radio: scan ended: {:?}", e);
                Timer::after(Duration::from_millis(100)).await;
            }
            Either::Second(next) => enabled = next,
        }
    }
}

/// One task per role: connects, secures, subscribes, streams samples.
#[embassy_executor::task(pool_size = 2)]
pub async fn link_task(sd: &'static Softdevice, role: Role, bonder: &'static Bonder) -> ! {
    let commands = &LINK_COMMANDS[role.index()];
    let mut pending: Option<LinkCommand> = None;

    loop {
        let command = match pending.take() {
            Some(command) => command,
            None => commands.receive().await,
        };
        let LinkCommand::Connect { address, params } = command else {
            continue;
        };

        SUBSCRIBE[role.index()].reset();
        let handle = Cell::new(None);
        let link = run_link(sd, role, address, &params, bonder, &handle);

        if let Either::Second(next) = select(link, commands.receive()).await {
            if matches!(next, LinkCommand::Connect { .. }) {
                pending = Some(next);
            }
        }

        if let Some(handle) = handle.get() {
            report(RadioEvent::Disconnected { role, handle }).await;
        }
    }
}

async fn report(event: RadioEvent) {
    RADIO_EVENTS.send(event).await;
}

async fn run_link(
    sd: &'static Softdevice,
    role: Role,
    address: SdAddress,
    params: &ConnParams,
    bonder: &'static Bonder,
    handle: &Cell<Option<u16>>,
) {
    let whitelist = [&address];
    let config = central::ConnectConfig {
        scan_config: central::ScanConfig {
            whitelist: Some(&whitelist),
            ..Default::default()
        },
        conn_params: raw::ble_gap_conn_params_t {
            min_conn_interval: params.interval_min,
            max_conn_interval: params.interval_max,
            slave_latency: params.latency,
            conn_sup_timeout: params.timeout,
        },
        ..Default::default()
    };

    let conn = match central::connect_with_security(sd, &config, bonder).await {
        Ok(conn) => conn,
        Err(e) => {
            log_warn!("radio: {} connect failed: {:?}", role.name(), e);
            report(RadioEvent::ConnectFailed(role)).await;
            return;
        }
    };
    let Some(conn_handle) = conn.handle() else {
        report(RadioEvent::ConnectFailed(role)).await;
        return;
    };
    handle.set(Some(conn_handle));
    report(RadioEvent::Connected {
        role,
        handle: conn_handle,
    })
    .await;

    match secure(&conn, bonder).await {
        Secured::Yes => {}
        Secured::Refused => {
            report(RadioEvent::SecurityFailed {
                role,
                address: from_sd(address),
            })
            .await;
            let _ = conn.disconnect();
            return;
        }
        // Plain link loss: the bond stays.
        Secured::TimedOut => {
            log_warn!("radio: {} not secured in time, dropping", role.name());
            let _ = conn.disconnect();
            return;
        }
        Secured::LinkLost => {
            log_info!("radio: {} lost while securing", role.name());
            return;
        }
    }

    SUBSCRIBE[role.index()].wait().await;
    Timer::after(Duration::from_millis(SUBSCRIBE_DELAY_MS)).await;

    let streamed = match role {
        Role::Force => stream_force(&conn).await,
        Role::Controller => stream_controller(&conn).await,
    };
    if let Err(e) = streamed {
        // No retry: the link stays up without data until it drops.
        log_error!("radio: {} subscription failed: {:?}", role.name(), e);
        while conn.handle().is_some() {
            Timer::after(Duration::from_millis(500)).await;
        }
    }
}

/// How securing a fresh link ended.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Secured {
    Yes,
    LinkLost,
    /// Still unencrypted when the wait ran out.
    TimedOut,
    /// The stack or the peer turned encryption down.
    Refused,
}

async fn wait_for_secure_link(conn: &Connection) -> Secured {
    for _ in 0..25 {
        if conn.handle().is_none() {
            return Secured::LinkLost;
        }
        match conn.security_mode() {
            SecurityMode::NoAccess | SecurityMode::Open => {
                Timer::after(Duration::from_millis(200)).await
            }
            _ => return Secured::Yes,
        }
    }
    Secured::TimedOut
}

fn pair(conn: &Connection) -> Secured {
    match conn.request_pairing() {
        Ok(()) => Secured::Yes,
        Err(_) if conn.handle().is_none() => Secured::LinkLost,
        Err(e) => {
            log_warn!("radio: pairing request refused: {:?}", e);
            Secured::Refused
        }
    }
}

/// Encrypt with stored keys, or pair when the window is open or no keys
/// are known.
async fn secure(conn: &Connection, bonder: &Bonder) -> Secured {
    let started = if bonder.is_bondable() {
        pair(conn)
    } else {
        match conn.encrypt() {
            Ok(()) => Secured::Yes,
            Err(EncryptError::PeerKeysNotFound) => pair(conn),
            Err(EncryptError::Disconnected) => Secured::LinkLost,
            Err(e) => {
                log_warn!("radio: encryption refused: {:?}", e);
                Secured::Refused
            }
        }
    };
    match started {
        Secured::Yes => wait_for_secure_link(conn).await,
        other => other,
    }
}

// GATT data clients

#[nrf_softdevice::gatt_client(uuid = "e2505f48-01a0-11f0-9cd2-0242ac120002")]
pub struct ForceClient {
    #[characteristic(uuid = "e2506240-01a0-11f0-9cd2-0242ac120002", read, notify)]
    pub sample: Vec<u8, 20>,
}

#[nrf_softdevice::gatt_client(uuid = "a8a618ba-16bc-11f0-9cd2-0242ac120002")]
pub struct ControllerClient {
    #[characteristic(uuid = "a8a61aa4-16bc-11f0-9cd2-0242ac120002", read, indicate)]
    pub sample: Vec<u8, 20>,
}

fn forward(role: Role, data: &[u8]) {
    match Sample::decode(role, data) {
        Ok(sample) => {
            if SAMPLES.try_send(sample).is_err() {
                log_debug!("radio: sample queue full");
            }
        }
        Err(e) => log_warn!("radio: {} sample dropped: {:?}", role.name(), e),
    }
}

async fn stream_force(conn: &Connection) -> Result<(), Error> {
    let client: ForceClient = gatt_client::discover(conn)
        .await
        .map_err(|_| BleError::DiscoveryFailed)?;
    client
        .sample_cccd_write(true)
        .await
        .map_err(|_| BleError::NotifyFailed)?;
    log_info!("radio: fsr notifications on");

    let _ = gatt_client::run(conn, &client, |event| match event {
        ForceClientEvent::SampleNotification(data) => forward(Role::Force, &data),
    })
    .await;
    log_info!("radio: fsr stream ended");
    Ok(())
}

async fn stream_controller(conn: &Connection) -> Result<(), Error> {
    let client: ControllerClient = gatt_client::discover(conn)
        .await
        .map_err(|_| BleError::DiscoveryFailed)?;
    client
        .sample_cccd_write(true)
        .await
        .map_err(|_| BleError::NotifyFailed)?;
    log_info!("radio: controller indications on");

    let _ = gatt_client::run(conn, &client, |event| match event {
        ControllerClientEvent::SampleIndication(data) => forward(Role::Controller, &data),
    })
    .await;
    log_info!("radio: controller stream ended");
    Ok(())
}
