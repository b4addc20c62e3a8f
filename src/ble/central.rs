//! Peer connection manager.
//!
//! One [`PeerSlot`] per [`Role`] and one shared scanner. Scan reports are
//! run through the admission filter:
//!
//! - **normal**: only bonded addresses that do *not* raise the pairing flag;
//! - **pairing window open**: only peers raising the pairing flag; their old
//!   bond is revoked before connecting.
//!
//! The first peer definition (in [`PEERS`] order) whose service is
//! advertised and whose slot is free wins. Scanning stops while a connect
//! request is outstanding and once every role is linked; after each new
//! link it resumes only when the settle delay has passed.
//!
//! The manager never blocks. Radio work is requested through [`Radio`] and
//! its completions come back through `on_connected`, `on_connect_failed`,
//! `on_disconnected` and `on_bonded`.

use crate::ble::{Address, Advertisement, ConnParams, Role, PEERS, ROLE_COUNT};
use crate::bus::{Command, Event, Publish, Subsystem};
use crate::config::{MFG_FLAG_PAIRING, SCAN_RETRY_MS, SCAN_SETTLE_MS};
use crate::error::{BleError, Error};
use crate::storage::BondRegistry;
use crate::Millis;

/// Radio requests issued by the manager. None of them wait for the result.
pub trait Radio {
    fn start_scan(&mut self) -> Result<(), Error>;
    fn stop_scan(&mut self);
    /// Start connecting `role` to `address`. Completion is reported later.
    fn connect(&mut self, role: Role, address: &Address, params: &ConnParams) -> Result<(), Error>;
    /// Drop the role's link, or abandon its pending connect.
    fn disconnect(&mut self, role: Role);
    /// Whether incoming bonding requests are accepted.
    fn set_bondable(&mut self, bondable: bool);
    /// Delete the bonding keys held for `address`.
    fn forget_bond(&mut self, address: &Address);
}

/// Per-role reactions to link changes (subscribing to the data
/// characteristic, stopping sample decoding, ...).
pub trait RoleHooks {
    fn on_connect(&mut self, role: Role);
    fn on_disconnect(&mut self, role: Role);
}

impl RoleHooks for () {
    fn on_connect(&mut self, _role: Role) {}
    fn on_disconnect(&mut self, _role: Role) {}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LinkState {
    /// Manager stopped.
    Idle,
    /// Waiting for a matching advertisement.
    Scanning,
    Connecting,
    Connected,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PeerSlot {
    pub state: LinkState,
    /// Connection handle while connected.
    pub handle: Option<u16>,
    pub address: Option<Address>,
}

impl PeerSlot {
    const fn idle() -> Self {
        Self {
            state: LinkState::Idle,
            handle: None,
            address: None,
        }
    }

    fn reset(&mut self, state: LinkState) {
        *self = Self {
            state,
            ..Self::idle()
        };
    }
}

/// Why an advertisement did not lead to a connect request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Skip {
    Stopped,
    ConnectPending,
    AllConnected,
    NotConnectable,
    /// No free role advertises a matching service.
    NoMatchingService,
    /// Pairing window open but the peer is not asking to pair.
    NotPairing,
    /// Peer asks to pair outside the pairing window.
    PairingRequested,
    NotBonded,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Verdict {
    Ignored(Skip),
    Connecting(Role),
    /// The radio refused the connect request; scanning resumed.
    Rejected(Role),
}

pub struct ConnectionManager<R: Radio, H: RoleHooks> {
    radio: R,
    hooks: H,
    slots: [PeerSlot; ROLE_COUNT],
    bonds: BondRegistry,
    bonds_dirty: bool,
    running: bool,
    scanning: bool,
    accepting_bonds: bool,
    /// Scanning stays halted until this time (settle delay or scan retry).
    settle_until: Option<Millis>,
    /// Latest time seen by a timed entry point.
    clock: Millis,
}

impl<R: Radio, H: RoleHooks> ConnectionManager<R, H> {
    pub fn new(radio: R, hooks: H, bonds: BondRegistry) -> Self {
        Self {
            radio,
            hooks,
            slots: [PeerSlot::idle(); ROLE_COUNT],
            bonds,
            bonds_dirty: false,
            running: false,
            scanning: false,
            accepting_bonds: false,
            settle_until: None,
            clock: 0,
        }
    }

    pub fn slot(&self, role: Role) -> &PeerSlot {
        &self.slots[role.index()]
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    pub fn accepting_bonds(&self) -> bool {
        self.accepting_bonds
    }

    pub fn all_connected(&self) -> bool {
        self.slots.iter().all(|s| s.state == LinkState::Connected)
    }

    pub fn bonds(&self) -> &BondRegistry {
        &self.bonds
    }

    /// True once after the bond registry changed; the caller persists it.
    pub fn take_bonds_dirty(&mut self) -> bool {
        core::mem::take(&mut self.bonds_dirty)
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    /// When scanning may resume after the last new link.
    pub fn deadline(&self) -> Option<Millis> {
        self.settle_until
    }

    /// Handle a bus event routed to the radio actor.
    pub fn handle_event(
        &mut self,
        event: &Event,
        now: Millis,
        bus: &impl Publish,
    ) -> Result<(), Error> {
        self.clock = now;
        match *event {
            Event::Command {
                target: Subsystem::Radio,
                command: Command::Start,
            } => {
                self.start();
                Ok(())
            }
            Event::Command {
                target: Subsystem::Radio,
                command: Command::Stop,
            } => {
                self.stop(bus);
                Ok(())
            }
            Event::AcceptBonds(enable) => self.accept_bonds(enable, now, bus),
            _ => Err(Error::NotPermitted),
        }
    }

    pub fn start(&mut self) {
        if self.running {
            return;
        }
        log_info!("central: start");
        self.running = true;
        for slot in self.slots.iter_mut() {
            slot.reset(LinkState::Scanning);
        }
        self.resume_scan();
    }

    /// Drop every link and stop scanning.
    pub fn stop(&mut self, bus: &impl Publish) {
        log_info!("central: stop");
        for role in Role::ALL {
            self.drop_link(role, bus);
            self.slots[role.index()].reset(LinkState::Idle);
        }
        self.halt_scan();
        if self.accepting_bonds {
            self.accepting_bonds = false;
            self.radio.set_bondable(false);
        }
        self.running = false;
        self.settle_until = None;
    }

    /// Open or close the pairing window.
    ///
    /// Opening drops every link so all roles can re-pair, and scanning
    /// resumes after the settle delay. A stopped manager cannot open it.
    pub fn accept_bonds(
        &mut self,
        enable: bool,
        now: Millis,
        bus: &impl Publish,
    ) -> Result<(), Error> {
        self.clock = now;
        if enable && !self.running {
            return Err(Error::NotPermitted);
        }
        self.accepting_bonds = enable;
        self.radio.set_bondable(enable);

        if enable {
            log_info!("central: accepting new bonds");
            self.halt_scan();
            for role in Role::ALL {
                self.drop_link(role, bus);
                self.slots[role.index()].reset(LinkState::Scanning);
            }
            self.settle_until = Some(now + SCAN_SETTLE_MS);
        } else {
            log_info!("central: pairing window closed");
            self.resume_scan();
        }
        Ok(())
    }

    /// Run one scan report through the admission filter.
    pub fn evaluate(&mut self, adv: &Advertisement) -> Verdict {
        if !self.running {
            return Verdict::Ignored(Skip::Stopped);
        }
        if self.connect_pending() {
            return Verdict::Ignored(Skip::ConnectPending);
        }
        if self.all_connected() {
            self.halt_scan();
            return Verdict::Ignored(Skip::AllConnected);
        }
        if !adv.connectable {
            return Verdict::Ignored(Skip::NotConnectable);
        }

        let wants_pairing = adv.mfg_flags & MFG_FLAG_PAIRING != 0;
        let mut skip = Skip::NoMatchingService;

        for peer in PEERS.iter() {
            if self.slots[peer.role.index()].state != LinkState::Scanning
                || !adv.advertises(&peer.service)
            {
                continue;
            }

            if self.accepting_bonds {
                if !wants_pairing {
                    skip = Skip::NotPairing;
                    continue;
                }
                if self.bonds.remove(&adv.address) {
                    self.bonds_dirty = true;
                }
                self.radio.forget_bond(&adv.address);
            } else if wants_pairing {
                skip = Skip::PairingRequested;
                continue;
            } else if !self.bonds.contains(&adv.address) {
                skip = Skip::NotBonded;
                continue;
            }

            return self.connect(peer.role, adv.address, &peer.params);
        }

        log_debug!("central: skip {:?} ({:?})", adv.address, skip);
        Verdict::Ignored(skip)
    }

    fn connect(&mut self, role: Role, address: Address, params: &ConnParams) -> Verdict {
        log_info!("central: {} found, connecting", role.name());
        self.halt_scan();

        let slot = &mut self.slots[role.index()];
        slot.state = LinkState::Connecting;
        slot.address = Some(address);

        match self.radio.connect(role, &address, params) {
            Ok(()) => Verdict::Connecting(role),
            Err(e) => {
                log_warn!("central: connect to {} refused: {:?}", role.name(), e);
                self.slots[role.index()].reset(LinkState::Scanning);
                self.resume_scan();
                Verdict::Rejected(role)
            }
        }
    }

    pub fn on_connected(&mut self, role: Role, handle: u16, now: Millis, bus: &impl Publish) {
        self.clock = now;
        let slot = &mut self.slots[role.index()];
        if slot.state != LinkState::Connecting {
            log_warn!("central: unexpected link for {}, dropping", role.name());
            self.radio.disconnect(role);
            return;
        }
        slot.state = LinkState::Connected;
        slot.handle = Some(handle);
        log_info!("central: {} connected (handle {})", role.name(), handle);

        self.hooks.on_connect(role);
        bus.publish(Event::Connection {
            role,
            connected: true,
        });

        if !self.all_connected() {
            self.settle_until = Some(now + SCAN_SETTLE_MS);
        }
    }

    pub fn on_connect_failed(&mut self, role: Role) {
        if self.slots[role.index()].state != LinkState::Connecting {
            return;
        }
        log_warn!(
            "central: connect to {} failed: {:?}",
            role.name(),
            Error::Ble(BleError::ConnectFailed)
        );
        self.slots[role.index()].reset(LinkState::Scanning);
        self.resume_scan();
    }

    pub fn on_disconnected(&mut self, role: Role, handle: u16, bus: &impl Publish) {
        let slot = self.slots[role.index()];
        if slot.state != LinkState::Connected || slot.handle != Some(handle) {
            log_debug!("central: stale disconnect for {} ({})", role.name(), handle);
            return;
        }
        log_info!("central: {} disconnected", role.name());
        self.drop_link_state(role, bus);
        self.resume_scan();
    }

    /// A peer completed bonding.
    pub fn on_bonded(&mut self, address: Address) -> Result<(), Error> {
        match self.bonds.insert(address) {
            Ok(true) => {
                self.bonds_dirty = true;
                log_info!("central: bonded {:?} ({} stored)", address, self.bonds.len());
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(e) => {
                log_warn!("central: bond for {:?} dropped: {:?}", address, e);
                Err(e)
            }
        }
    }

    /// The link to `role` could not be secured: unpair and drop it.
    pub fn on_security_failed(&mut self, role: Role, address: Address) {
        log_warn!("central: securing {} failed, unpairing", role.name());
        if self.bonds.remove(&address) {
            self.bonds_dirty = true;
        }
        self.radio.forget_bond(&address);
        if self.slots[role.index()].state == LinkState::Connected {
            self.radio.disconnect(role);
        }
    }

    /// Fire the settle or scan-retry timer.
    pub fn on_timer(&mut self, now: Millis) {
        self.clock = now;
        match self.settle_until {
            Some(deadline) if now >= deadline => {
                self.settle_until = None;
                self.resume_scan();
            }
            _ => {}
        }
    }

    fn connect_pending(&self) -> bool {
        self.slots.iter().any(|s| s.state == LinkState::Connecting)
    }

    /// Tear down whatever the role holds and report it gone.
    fn drop_link(&mut self, role: Role, bus: &impl Publish) {
        match self.slots[role.index()].state {
            LinkState::Connected => {
                self.radio.disconnect(role);
                self.drop_link_state(role, bus);
            }
            LinkState::Connecting => {
                self.radio.disconnect(role);
                self.slots[role.index()].reset(LinkState::Scanning);
            }
            LinkState::Idle | LinkState::Scanning => {}
        }
    }

    fn drop_link_state(&mut self, role: Role, bus: &impl Publish) {
        self.hooks.on_disconnect(role);
        self.slots[role.index()].reset(if self.running {
            LinkState::Scanning
        } else {
            LinkState::Idle
        });
        bus.publish(Event::Connection {
            role,
            connected: false,
        });
    }

    fn resume_scan(&mut self) {
        if !self.running
            || self.scanning
            || self.settle_until.is_some()
            || self.connect_pending()
            || self.all_connected()
        {
            return;
        }
        match self.radio.start_scan() {
            Ok(()) => {
                self.scanning = true;
                log_debug!("central: scanning");
            }
            Err(e) => {
                log_error!("central: scan failed to start: {:?}", e);
                self.settle_until = Some(self.clock + SCAN_RETRY_MS);
            }
        }
    }

    fn halt_scan(&mut self) {
        if self.scanning {
            self.radio.stop_scan();
            self.scanning = false;
        }
    }
}
