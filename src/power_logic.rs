//! Power and mode coordination, free of hardware.
//!
//! ```text
//!  Off --button_ab--> On --button_ab--> ShuttingDown --reboot timer--> restart
//!                      |  ^
//!           button_*_long  pairing_complete
//!                      v  |
//!                    OnPairing --button_ab--> ShuttingDown
//! ```
//!
//! The rails themselves are behind [`PowerRails`]; `power.rs` supplies the
//! GPIO implementation.

use crate::ble::{Role, ROLE_COUNT};
use crate::bus::{Command, Event, Publish, Subsystem};
use crate::config::REBOOT_DELAY_MS;
use crate::error::Error;
use crate::ui::feedback::Feedback;
use crate::ui::Gesture;
use crate::Millis;

/// System and motor supply control.
pub trait PowerRails {
    fn set_enabled(&mut self, enabled: bool);
    /// Cold restart. Does not return on hardware.
    fn restart(&mut self);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Mode {
    Off,
    On,
    OnPairing,
    /// Rails are off and a reboot is pending; nothing re-powers the device.
    ShuttingDown,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PowerState {
    pub mode: Mode,
    /// Last reported link state per role.
    pub connectivity: [bool; ROLE_COUNT],
}

impl PowerState {
    pub const fn new() -> Self {
        Self {
            mode: Mode::Off,
            connectivity: [false; ROLE_COUNT],
        }
    }

    pub fn all_connected(&self) -> bool {
        self.connectivity.iter().all(|&c| c)
    }
}

impl Default for PowerState {
    fn default() -> Self {
        Self::new()
    }
}

/// Steady feedback for the current links.
pub fn readiness_feedback(connectivity: &[bool; ROLE_COUNT]) -> Feedback {
    if connectivity.iter().all(|&c| c) {
        Feedback::Ready
    } else {
        Feedback::Standby
    }
}

pub struct PowerCoordinator<P: PowerRails> {
    state: PowerState,
    rails: P,
    reboot_at: Option<Millis>,
}

impl<P: PowerRails> PowerCoordinator<P> {
    pub fn new(rails: P) -> Self {
        Self {
            state: PowerState::new(),
            rails,
            reboot_at: None,
        }
    }

    pub fn state(&self) -> &PowerState {
        &self.state
    }

    pub fn mode(&self) -> Mode {
        self.state.mode
    }

    pub fn rails(&self) -> &P {
        &self.rails
    }

    /// Pending reboot, if shutting down.
    pub fn deadline(&self) -> Option<Millis> {
        self.reboot_at
    }

    pub fn handle_event(
        &mut self,
        event: &Event,
        now: Millis,
        bus: &impl Publish,
    ) -> Result<(), Error> {
        match *event {
            Event::Gesture(Gesture::ButtonAB) => {
                self.toggle(now, bus);
                Ok(())
            }
            Event::Gesture(gesture) if gesture.is_long() => self.request_pairing(bus),
            Event::Gesture(gesture) => {
                log_debug!("power: {:?} has no action", gesture);
                Ok(())
            }
            Event::PairingComplete => {
                if self.state.mode == Mode::OnPairing {
                    self.state.mode = Mode::On;
                    self.publish_readiness(bus);
                } else {
                    log_info!("power: pairing complete ignored in {:?}", self.state.mode);
                }
                Ok(())
            }
            Event::Connection { role, connected } => {
                self.on_connectivity(role, connected, bus);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn toggle(&mut self, now: Millis, bus: &impl Publish) {
        match self.state.mode {
            Mode::Off => {
                log_info!("power: on");
                self.rails.set_enabled(true);
                bus.publish(command(Subsystem::Radio, Command::Start));
                bus.publish(command(Subsystem::Motor, Command::Start));
                bus.publish(Event::Feedback(Feedback::PowerOn));
                self.state.mode = Mode::On;
            }
            Mode::On | Mode::OnPairing => {
                log_info!("power: off, rebooting in {} ms", REBOOT_DELAY_MS);
                self.rails.set_enabled(false);
                bus.publish(Event::Feedback(Feedback::PowerOff));
                bus.publish(command(Subsystem::Radio, Command::Stop));
                bus.publish(command(Subsystem::Motor, Command::Stop));
                self.reboot_at = Some(now + REBOOT_DELAY_MS);
                self.state.mode = Mode::ShuttingDown;
            }
            Mode::ShuttingDown => log_info!("power: shutting down, toggle ignored"),
        }
    }

    fn request_pairing(&mut self, bus: &impl Publish) -> Result<(), Error> {
        match self.state.mode {
            Mode::On => {
                log_info!("power: pairing requested");
                bus.publish(command(Subsystem::Radio, Command::Pair));
                bus.publish(Event::Feedback(Feedback::Pairing));
                self.state.mode = Mode::OnPairing;
                Ok(())
            }
            Mode::OnPairing => {
                log_info!("power: already pairing");
                Ok(())
            }
            Mode::Off | Mode::ShuttingDown => Err(Error::NotPermitted),
        }
    }

    fn on_connectivity(&mut self, role: Role, connected: bool, bus: &impl Publish) {
        self.state.connectivity[role.index()] = connected;
        log_info!("power: {} connected={}", role.name(), connected);

        if self.state.mode == Mode::On {
            self.publish_readiness(bus);
        }
    }

    fn publish_readiness(&self, bus: &impl Publish) {
        bus.publish(Event::Feedback(readiness_feedback(&self.state.connectivity)));
    }

    /// Fire the reboot timer.
    pub fn on_timer(&mut self, now: Millis) {
        match self.reboot_at {
            Some(at) if now >= at && self.state.mode == Mode::ShuttingDown => {
                self.reboot_at = None;
                log_info!("power: rebooting");
                self.rails.restart();
            }
            _ => {}
        }
    }
}

const fn command(target: Subsystem, command: Command) -> Event {
    Event::Command { target, command }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::testing::Recorder;

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

    const AB: Event = Event::Gesture(Gesture::ButtonAB);
    const A_LONG: Event = Event::Gesture(Gesture::ButtonALong);

    fn link(role: Role, connected: bool) -> Event {
        Event::Connection { role, connected }
    }

    fn powered_on(bus: &Recorder) -> PowerCoordinator<Rails> {
        let mut power = PowerCoordinator::new(Rails::default());
        power.handle_event(&AB, 0, bus).unwrap();
        bus.take();
        power
    }

    #[test]
    fn readiness_needs_every_role() {
        assert_eq!(readiness_feedback(&[true, true]), Feedback::Ready);
        assert_eq!(readiness_feedback(&[true, false]), Feedback::Standby);
        assert_eq!(readiness_feedback(&[false, false]), Feedback::Standby);
    }

    #[test]
    fn power_on_enables_rails_and_starts_subsystems() {
        let bus = Recorder::default();
        let mut power = PowerCoordinator::new(Rails::default());
        assert_eq!(power.mode(), Mode::Off);

        power.handle_event(&AB, 0, &bus).unwrap();
        assert_eq!(power.mode(), Mode::On);
        assert!(power.rails().enabled);
        assert_eq!(
            bus.take(),
            vec![
                command(Subsystem::Radio, Command::Start),
                command(Subsystem::Motor, Command::Start),
                Event::Feedback(Feedback::PowerOn),
            ]
        );
    }

    #[test]
    fn power_off_then_reboot_after_delay() {
        let bus = Recorder::default();
        let mut power = powered_on(&bus);

        power.handle_event(&AB, 1_000, &bus).unwrap();
        assert_eq!(power.mode(), Mode::ShuttingDown);
        assert!(!power.rails().enabled);
        assert_eq!(
            bus.take(),
            vec![
                Event::Feedback(Feedback::PowerOff),
                command(Subsystem::Radio, Command::Stop),
                command(Subsystem::Motor, Command::Stop),
            ]
        );
        assert_eq!(power.deadline(), Some(1_000 + REBOOT_DELAY_MS));

        power.on_timer(1_000 + REBOOT_DELAY_MS - 1);
        assert_eq!(power.rails().restarts, 0);
        power.on_timer(1_000 + REBOOT_DELAY_MS);
        assert_eq!(power.rails().restarts, 1);
    }

    #[test]
    fn toggle_while_shutting_down_is_ignored() {
        let bus = Recorder::default();
        let mut power = powered_on(&bus);
        power.handle_event(&AB, 0, &bus).unwrap();
        bus.take();

        power.handle_event(&AB, 10, &bus).unwrap();
        assert_eq!(power.mode(), Mode::ShuttingDown);
        assert!(!power.rails().enabled);
        assert!(bus.take().is_empty());
        assert_eq!(power.deadline(), Some(REBOOT_DELAY_MS));
    }

    #[test]
    fn long_press_while_on_starts_pairing() {
        let bus = Recorder::default();
        let mut power = powered_on(&bus);

        power
            .handle_event(&Event::Gesture(Gesture::ButtonBLong), 0, &bus)
            .unwrap();
        assert_eq!(power.mode(), Mode::OnPairing);
        assert_eq!(
            bus.take(),
            vec![
                command(Subsystem::Radio, Command::Pair),
                Event::Feedback(Feedback::Pairing),
            ]
        );

        power.handle_event(&A_LONG, 0, &bus).unwrap();
        assert!(bus.take().is_empty());
    }

    #[test]
    fn long_press_while_off_is_not_permitted() {
        let bus = Recorder::default();
        let mut power = PowerCoordinator::new(Rails::default());
        assert_eq!(power.handle_event(&A_LONG, 0, &bus), Err(Error::NotPermitted));
        assert_eq!(power.mode(), Mode::Off);
        assert!(bus.take().is_empty());
    }

    #[test]
    fn long_press_while_shutting_down_is_not_permitted() {
        let bus = Recorder::default();
        let mut power = powered_on(&bus);
        power.handle_event(&AB, 0, &bus).unwrap();
        assert_eq!(power.handle_event(&A_LONG, 5, &bus), Err(Error::NotPermitted));
    }

    #[test]
    fn pairing_complete_reflects_real_connectivity() {
        let bus = Recorder::default();
        let mut power = powered_on(&bus);
        power.handle_event(&A_LONG, 0, &bus).unwrap();
        power.handle_event(&link(Role::Force, true), 0, &bus).unwrap();
        bus.take();

        power.handle_event(&Event::PairingComplete, 0, &bus).unwrap();
        assert_eq!(power.mode(), Mode::On);
        assert_eq!(bus.take(), vec![Event::Feedback(Feedback::Standby)]);

        power.handle_event(&A_LONG, 0, &bus).unwrap();
        power.handle_event(&link(Role::Controller, true), 0, &bus).unwrap();
        bus.take();
        power.handle_event(&Event::PairingComplete, 0, &bus).unwrap();
        assert_eq!(bus.take(), vec![Event::Feedback(Feedback::Ready)]);
    }

    #[test]
    fn connectivity_changes_recompute_feedback_only_when_on() {
        let bus = Recorder::default();
        let mut power = powered_on(&bus);

        power.handle_event(&link(Role::Force, true), 0, &bus).unwrap();
        assert_eq!(bus.take(), vec![Event::Feedback(Feedback::Standby)]);
        power.handle_event(&link(Role::Controller, true), 0, &bus).unwrap();
        assert_eq!(bus.take(), vec![Event::Feedback(Feedback::Ready)]);
        power.handle_event(&link(Role::Force, false), 0, &bus).unwrap();
        assert_eq!(bus.take(), vec![Event::Feedback(Feedback::Standby)]);

        power.handle_event(&A_LONG, 0, &bus).unwrap();
        bus.take();
        power.handle_event(&link(Role::Force, true), 0, &bus).unwrap();
        assert!(bus.take().is_empty());
        assert_eq!(power.state().connectivity, [true, true]);
    }

    #[test]
    fn only_enumerated_events_change_mode() {
        let bus = Recorder::default();
        let mut power = powered_on(&bus);
        for event in [
            Event::Gesture(Gesture::ButtonA),
            Event::Gesture(Gesture::ButtonB),
            Event::PairingComplete,
            Event::AcceptBonds(true),
            Event::Feedback(Feedback::Ready),
        ] {
            power.handle_event(&event, 0, &bus).unwrap();
            assert_eq!(power.mode(), Mode::On);
        }
        power.on_timer(1_000_000);
        assert_eq!(power.rails().restarts, 0);
    }
}
