//! End-to-end tests: the actors' state machines wired through a real bus.
//!
//! Each test drives gestures and radio completions by hand and lets
//! `System::settle` deliver mailboxes until the bus is quiet, the way the
//! firmware tasks would.

use embassy_sync::blocking_mutex::raw::NoopRawMutex;

use limbhub::ble::central::{ConnectionManager, LinkState, Radio, Skip, Verdict};
use limbhub::ble::pairing::{PairingCoordinator, PairingOutcome};
use limbhub::ble::{adv_parser, Address, AddressKind, Advertisement, ConnParams, Role};
use limbhub::bus::{Actor, Command, Event, EventBus, Subsystem, ACTOR_COUNT};
use limbhub::config::{LONG_PRESS_MS, MFG_FLAG_PAIRING, PAIRING_TIMEOUT_MS, REBOOT_DELAY_MS, SCAN_SETTLE_MS};
use limbhub::error::Error;
use limbhub::motor::MotorLink;
use limbhub::power_logic::{Mode, PowerCoordinator, PowerRails};
use limbhub::storage::BondRegistry;
use limbhub::ui::feedback::{Color, Feedback, Sequencer};
use limbhub::ui::gesture::GestureDetector;
use limbhub::ui::{Button, ButtonEdge, Gesture};
use limbhub::Millis;

type Bus = EventBus<NoopRawMutex, ACTOR_COUNT, 16>;

#[derive(Default)]
struct Rails {
    enabled: bool,
    restarts: u32,
}

impl PowerRails for Rails {
    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn restart(&mut self) {
        self.restarts += 1;
    }
}

#[derive(Default)]
struct FakeRadio {
    scanning: bool,
    bondable: bool,
    connects: Vec<(Role, Address)>,
    disconnects: Vec<Role>,
    forgotten: Vec<Address>,
}

impl Radio for FakeRadio {
    fn start_scan(&mut self) -> Result<(), Error> {
        self.scanning = true;
        Ok(())
    }

    fn stop_scan(&mut self) {
        self.scanning = false;
    }

    fn connect(&mut self, role: Role, address: &Address, _: &ConnParams) -> Result<(), Error> {
        self.connects.push((role, *address));
        Ok(())
    }

    fn disconnect(&mut self, role: Role) {
        self.disconnects.push(role);
    }

    fn set_bondable(&mut self, bondable: bool) {
        self.bondable = bondable;
    }

    fn forget_bond(&mut self, address: &Address) {
        self.forgotten.push(*address);
    }
}

struct System {
    bus: Bus,
    buttons: GestureDetector,
    power: PowerCoordinator<Rails>,
    central: ConnectionManager<FakeRadio, ()>,
    pairing: PairingCoordinator,
    motor: MotorLink,
    leds: Sequencer,
    feedback: Vec<Feedback>,
    rejected: Vec<(Actor, Error)>,
}

impl System {
    fn new(bonds: BondRegistry) -> Self {
        Self {
            bus: Bus::new(),
            buttons: GestureDetector::new(),
            power: PowerCoordinator::new(Rails::default()),
            central: ConnectionManager::new(FakeRadio::default(), (), bonds),
            pairing: PairingCoordinator::new(),
            motor: MotorLink::new(),
            leds: Sequencer::new(),
            feedback: Vec::new(),
            rejected: Vec::new(),
        }
    }

    /// Deliver every queued event until no actor has mail.
    fn settle(&mut self, now: Millis) {
        loop {
            let mut delivered = false;

            while let Some(event) = self.bus.try_next(Actor::Power.index()) {
                delivered = true;
                let result = self.power.handle_event(&event, now, &self.bus);
                self.record(Actor::Power, result);
            }
            while let Some(event) = self.bus.try_next(Actor::Radio.index()) {
                delivered = true;
                let result = self.central.handle_event(&event, now, &self.bus);
                self.record(Actor::Radio, result);
            }
            while let Some(event) = self.bus.try_next(Actor::Pairing.index()) {
                delivered = true;
                let result = self.pairing.handle_event(&event, now, &self.bus);
                self.record(Actor::Pairing, result);
            }
            while let Some(event) = self.bus.try_next(Actor::Feedback.index()) {
                delivered = true;
                if let Event::Feedback(feedback) = event {
                    self.leds.apply(feedback, now);
                    self.feedback.push(feedback);
                }
            }
            while let Some(event) = self.bus.try_next(Actor::Motor.index()) {
                delivered = true;
                let result = self.motor.handle_event(&event);
                self.record(Actor::Motor, result);
            }

            if !delivered {
                break;
            }
        }
    }

    fn record(&mut self, actor: Actor, result: Result<(), Error>) {
        if let Err(e) = result {
            self.rejected.push((actor, e));
        }
    }

    fn edge(&mut self, button: Button, pressed: bool, at: Millis) -> Option<Gesture> {
        let gesture = self.buttons.on_edge(ButtonEdge {
            button,
            pressed,
            at,
        });
        self.publish_gesture(gesture, at);
        gesture
    }

    fn publish_gesture(&mut self, gesture: Option<Gesture>, now: Millis) {
        if let Some(gesture) = gesture {
            self.bus.publish(Event::Gesture(gesture));
            self.settle(now);
        }
    }

    /// Press both buttons together and release them.
    fn power_gesture(&mut self, at: Millis) {
        self.edge(Button::A, true, at);
        assert_eq!(self.edge(Button::B, true, at + 20), Some(Gesture::ButtonAB));
        assert_eq!(self.edge(Button::A, false, at + 120), None);
        assert_eq!(self.edge(Button::B, false, at + 140), None);
    }

    /// Hold button A past the long-press threshold.
    fn long_press(&mut self, at: Millis) {
        self.edge(Button::A, true, at);
        let fired_at = at + LONG_PRESS_MS;
        let gesture = self.buttons.on_timer(fired_at);
        assert_eq!(gesture, Some(Gesture::ButtonALong));
        self.publish_gesture(gesture, fired_at);
        assert_eq!(self.edge(Button::A, false, fired_at + 200), None);
    }

    fn tick(&mut self, now: Millis) {
        self.central.on_timer(now);
        self.pairing.on_timer(now, &self.bus);
        self.power.on_timer(now);
        self.settle(now);
    }

    fn link(&mut self, role: Role, handle: u16, now: Millis) {
        self.central.on_connected(role, handle, now, &self.bus);
        self.settle(now);
    }

    fn unlink(&mut self, role: Role, handle: u16, now: Millis) {
        self.central.on_disconnected(role, handle, &self.bus);
        self.settle(now);
    }
}

fn addr(last: u8) -> Address {
    Address::new(AddressKind::RandomStatic, [0xA0, 0xB1, 0xC2, 0xD3, 0xE4, last])
}

fn adv(role: Role, address: Address, flags: u16) -> Advertisement {
    let mut data = vec![17, 0x07];
    data.extend_from_slice(role.definition().service.as_le_bytes());
    data.extend_from_slice(&[0x03, 0xFF]);
    data.extend_from_slice(&flags.to_be_bytes());
    adv_parser::parse(address, true, -60, &data)
}

fn bonded(addresses: &[Address]) -> BondRegistry {
    let mut bonds = BondRegistry::new();
    for address in addresses {
        bonds.insert(*address).unwrap();
    }
    bonds
}

#[test]
fn power_gesture_turns_everything_on_then_reboots() {
    let mut sys = System::new(BondRegistry::new());
    assert_eq!(sys.power.mode(), Mode::Off);

    sys.power_gesture(0);
    assert_eq!(sys.power.mode(), Mode::On);
    assert!(sys.power.rails().enabled);
    assert!(sys.central.is_running());
    assert!(sys.central.radio().scanning);
    assert!(sys.motor.is_running());
    assert_eq!(sys.feedback, vec![Feedback::PowerOn]);

    sys.power_gesture(5_000);
    assert_eq!(sys.power.mode(), Mode::ShuttingDown);
    assert!(!sys.power.rails().enabled);
    assert!(!sys.central.is_running());
    assert!(!sys.central.radio().scanning);
    assert!(!sys.motor.is_running());
    assert_eq!(sys.feedback, vec![Feedback::PowerOn, Feedback::PowerOff]);

    let reboot_at = sys.power.deadline().unwrap();
    sys.tick(reboot_at - 1);
    assert_eq!(sys.power.rails().restarts, 0);
    sys.tick(5_020 + REBOOT_DELAY_MS);
    assert_eq!(sys.power.rails().restarts, 1);
    assert!(sys.rejected.is_empty());
}

#[test]
fn long_press_while_off_is_rejected() {
    let mut sys = System::new(BondRegistry::new());
    sys.long_press(0);

    assert_eq!(sys.power.mode(), Mode::Off);
    assert!(!sys.pairing.is_active());
    assert_eq!(sys.rejected, vec![(Actor::Power, Error::NotPermitted)]);
}

#[test]
fn pairing_timeout_closes_window_exactly_once() {
    let mut sys = System::new(BondRegistry::new());
    sys.power_gesture(0);
    sys.long_press(1_000);

    assert_eq!(sys.power.mode(), Mode::OnPairing);
    assert!(sys.pairing.is_active());
    assert!(sys.central.accepting_bonds());
    assert!(sys.central.radio().bondable);
    assert_eq!(sys.feedback.last(), Some(&Feedback::Pairing));

    let deadline = sys.pairing.deadline().unwrap();
    assert_eq!(deadline, 1_000 + LONG_PRESS_MS + PAIRING_TIMEOUT_MS);

    assert_eq!(sys.pairing.on_timer(deadline, &sys.bus), Some(PairingOutcome::TimedOut));
    sys.settle(deadline);
    assert!(!sys.pairing.is_active());
    assert!(!sys.central.accepting_bonds());
    assert!(!sys.central.radio().bondable);
    assert_eq!(sys.power.mode(), Mode::On);
    assert_eq!(sys.feedback.last(), Some(&Feedback::Standby));

    let shown = sys.feedback.len();
    sys.tick(deadline + 1);
    sys.tick(deadline + PAIRING_TIMEOUT_MS);
    assert_eq!(sys.feedback.len(), shown);
    assert_eq!(sys.power.mode(), Mode::On);
}

#[test]
fn power_off_while_pairing_still_closes_window_once() {
    let mut sys = System::new(BondRegistry::new());
    sys.power_gesture(0);
    sys.long_press(1_000);
    assert_eq!(sys.power.mode(), Mode::OnPairing);
    assert!(sys.central.radio().bondable);

    sys.power_gesture(5_000);
    assert_eq!(sys.power.mode(), Mode::ShuttingDown);
    assert!(!sys.central.is_running());
    assert!(!sys.central.accepting_bonds());
    assert!(!sys.central.radio().bondable);
    assert!(sys.pairing.is_active());

    let deadline = sys.pairing.deadline().unwrap();
    assert_eq!(sys.pairing.on_timer(deadline, &sys.bus), Some(PairingOutcome::TimedOut));
    sys.settle(deadline);
    assert!(!sys.pairing.is_active());
    assert_eq!(sys.pairing.on_timer(deadline + 1, &sys.bus), None);

    // The late completion does not bring the device back up.
    assert_eq!(sys.power.mode(), Mode::ShuttingDown);
    assert!(!sys.central.accepting_bonds());
    assert!(!sys.central.radio().bondable);
    assert!(!sys.central.radio().scanning);
    assert_eq!(sys.feedback.last(), Some(&Feedback::PowerOff));
    assert!(sys.rejected.is_empty());
}

#[test]
fn pair_request_while_radio_stopped_is_refused() {
    let mut sys = System::new(BondRegistry::new());
    sys.bus.publish(Event::Command {
        target: Subsystem::Radio,
        command: Command::Pair,
    });
    sys.settle(0);

    assert_eq!(sys.rejected, vec![(Actor::Radio, Error::NotPermitted)]);
    assert!(!sys.central.accepting_bonds());
    assert!(!sys.central.radio().bondable);
    assert!(!sys.central.radio().scanning);

    // The orphaned window still ends on its own, exactly once.
    assert!(sys.pairing.is_active());
    sys.tick(PAIRING_TIMEOUT_MS);
    assert!(!sys.pairing.is_active());
    sys.tick(2 * PAIRING_TIMEOUT_MS);
    assert_eq!(sys.rejected.len(), 1);
    assert!(!sys.central.radio().bondable);
    assert_eq!(sys.power.mode(), Mode::Off);
}

#[test]
fn security_failure_unpairs_bonded_peer() {
    let force = addr(0x41);
    let controller = addr(0x42);
    let mut sys = System::new(bonded(&[force, controller]));
    sys.power_gesture(0);

    sys.central.evaluate(&adv(Role::Force, force, 0));
    sys.link(Role::Force, 4, 100);
    assert!(!sys.central.take_bonds_dirty());

    sys.central.on_security_failed(Role::Force, force);
    assert!(!sys.central.bonds().contains(&force));
    assert!(sys.central.bonds().contains(&controller));
    assert!(sys.central.take_bonds_dirty());
    assert_eq!(sys.central.radio().forgotten, vec![force]);
    assert_eq!(sys.central.radio().disconnects, vec![Role::Force]);

    sys.unlink(Role::Force, 4, 200);
    assert!(!sys.power.state().connectivity[Role::Force.index()]);
    sys.tick(100 + SCAN_SETTLE_MS);
    assert!(sys.central.radio().scanning);

    // The peer has to pair again before it is admitted.
    assert_eq!(
        sys.central.evaluate(&adv(Role::Force, force, 0)),
        Verdict::Ignored(Skip::NotBonded)
    );
}

#[test]
fn pairing_both_peers_returns_to_ready() {
    let old_force = addr(0x01);
    let new_force = addr(0x11);
    let new_controller = addr(0x12);
    let mut sys = System::new(bonded(&[old_force]));

    sys.power_gesture(0);
    assert_eq!(
        sys.central.evaluate(&adv(Role::Force, old_force, 0)),
        Verdict::Connecting(Role::Force)
    );
    sys.link(Role::Force, 1, 100);
    assert_eq!(sys.feedback.last(), Some(&Feedback::Standby));

    // Entering pairing drops the existing link.
    sys.long_press(1_000);
    let now = 1_000 + LONG_PRESS_MS;
    assert_eq!(sys.central.radio().disconnects, vec![Role::Force]);
    assert_eq!(sys.central.slot(Role::Force).state, LinkState::Scanning);
    assert!(!sys.power.state().connectivity[Role::Force.index()]);
    assert!(!sys.central.radio().scanning);

    sys.tick(now + SCAN_SETTLE_MS);
    assert!(sys.central.radio().scanning);

    // Only peers raising the pairing flag get in.
    assert_eq!(
        sys.central.evaluate(&adv(Role::Force, old_force, 0)),
        Verdict::Ignored(Skip::NotPairing)
    );
    assert_eq!(
        sys.central.evaluate(&adv(Role::Force, new_force, MFG_FLAG_PAIRING)),
        Verdict::Connecting(Role::Force)
    );
    sys.link(Role::Force, 2, now + 600);
    sys.central.on_bonded(new_force).unwrap();
    assert!(sys.pairing.is_active());

    sys.tick(now + 600 + SCAN_SETTLE_MS);
    assert_eq!(
        sys.central.evaluate(&adv(Role::Controller, new_controller, MFG_FLAG_PAIRING)),
        Verdict::Connecting(Role::Controller)
    );
    sys.link(Role::Controller, 3, now + 1_500);
    sys.central.on_bonded(new_controller).unwrap();

    assert!(!sys.pairing.is_active());
    assert!(!sys.central.accepting_bonds());
    assert_eq!(sys.power.mode(), Mode::On);
    assert_eq!(sys.feedback.last(), Some(&Feedback::Ready));
    assert!(sys.central.all_connected());
    assert!(!sys.central.radio().scanning);

    let bonds = sys.central.bonds();
    assert!(bonds.contains(&new_force));
    assert!(bonds.contains(&new_controller));
    assert!(bonds.contains(&old_force));
    assert!(sys.central.take_bonds_dirty());
}

#[test]
fn discovery_admits_only_bonded_peers_outside_pairing() {
    let force = addr(0x21);
    let stranger = addr(0x22);
    let mut sys = System::new(bonded(&[force]));
    sys.power_gesture(0);

    assert_eq!(
        sys.central.evaluate(&adv(Role::Force, stranger, 0)),
        Verdict::Ignored(Skip::NotBonded)
    );
    assert_eq!(
        sys.central.evaluate(&adv(Role::Force, force, MFG_FLAG_PAIRING)),
        Verdict::Ignored(Skip::PairingRequested)
    );
    assert_eq!(
        sys.central.evaluate(&adv(Role::Controller, force, 0)),
        Verdict::Connecting(Role::Controller)
    );
    assert_eq!(sys.central.radio().connects, vec![(Role::Controller, force)]);
    assert!(!sys.central.radio().scanning);

    // Nothing else is considered while the connect is outstanding.
    assert_eq!(
        sys.central.evaluate(&adv(Role::Force, force, 0)),
        Verdict::Ignored(Skip::ConnectPending)
    );
}

#[test]
fn disconnect_is_reported_and_scanning_resumes() {
    let force = addr(0x31);
    let mut sys = System::new(bonded(&[force]));
    sys.power_gesture(0);

    sys.central.evaluate(&adv(Role::Force, force, 0));
    sys.link(Role::Force, 7, 200);
    assert!(sys.power.state().connectivity[Role::Force.index()]);
    sys.tick(200 + SCAN_SETTLE_MS);
    assert!(sys.central.radio().scanning);

    // A stale handle changes nothing.
    sys.unlink(Role::Force, 8, 1_000);
    assert_eq!(sys.central.slot(Role::Force).state, LinkState::Connected);

    sys.unlink(Role::Force, 7, 1_000);
    assert_eq!(sys.central.slot(Role::Force).state, LinkState::Scanning);
    assert!(!sys.power.state().connectivity[Role::Force.index()]);
    assert_eq!(sys.feedback.last(), Some(&Feedback::Standby));
    assert!(sys.central.radio().scanning);
}

#[test]
fn led_plays_power_on_overlay_then_base() {
    let mut sys = System::new(BondRegistry::new());
    sys.power_gesture(0);

    assert_eq!(sys.leds.poll(20), Some(Color::BLUE));
    assert!(sys.leds.overlay_active());
    assert_eq!(sys.leds.deadline(), Some(3_020));

    // Overlay finished: the standby blink takes over from its first step.
    assert_eq!(sys.leds.poll(3_020), Some(Color::BLUE));
    assert!(!sys.leds.overlay_active());
    assert_eq!(sys.leds.poll(3_520), Some(Color::OFF));
    assert_eq!(sys.leds.poll(4_020), Some(Color::BLUE));
}
