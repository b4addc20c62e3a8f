//! Pairing window coordinator.
//!
//! A pair request opens a timed window during which the connection manager
//! accepts new bonds. The window closes when every role has a link again or
//! when the timeout expires, whichever comes first, and each window ends
//! with exactly one `event/pairing_complete`.

use crate::ble::ROLE_COUNT;
use crate::bus::{Command, Event, Publish, Subsystem};
use crate::config::PAIRING_TIMEOUT_MS;
use crate::error::Error;
use crate::Millis;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PairingOutcome {
    /// Every role linked while the window was open.
    Bonded,
    /// The window expired first.
    TimedOut,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PairingSession {
    pub deadline: Millis,
}

pub struct PairingCoordinator {
    session: Option<PairingSession>,
    connected: [bool; ROLE_COUNT],
    timeout_ms: Millis,
}

impl PairingCoordinator {
    pub const fn new() -> Self {
        Self::with_timeout(PAIRING_TIMEOUT_MS)
    }

    pub const fn with_timeout(timeout_ms: Millis) -> Self {
        Self {
            session: None,
            connected: [false; ROLE_COUNT],
            timeout_ms,
        }
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<PairingSession> {
        self.session
    }

    pub fn deadline(&self) -> Option<Millis> {
        self.session.map(|s| s.deadline)
    }

    pub fn handle_event(
        &mut self,
        event: &Event,
        now: Millis,
        bus: &impl Publish,
    ) -> Result<(), Error> {
        match *event {
            Event::Command {
                target: Subsystem::Radio,
                command: Command::Pair,
            } => {
                self.begin(now, bus);
                Ok(())
            }
            Event::Connection { role, connected } => {
                self.connected[role.index()] = connected;
                if connected && self.is_active() && self.connected.iter().all(|&c| c) {
                    self.complete(PairingOutcome::Bonded, bus);
                }
                Ok(())
            }
            // Gestures and the completion echo also arrive under `event/`.
            _ => Ok(()),
        }
    }

    fn begin(&mut self, now: Millis, bus: &impl Publish) {
        if let Some(session) = self.session {
            log_info!("pairing: already open until {}", session.deadline);
            return;
        }

        // The manager drops every link on the way in.
        self.connected = [false; ROLE_COUNT];
        bus.publish(Event::AcceptBonds(true));
        let deadline = now + self.timeout_ms;
        self.session = Some(PairingSession { deadline });
        log_info!("pairing: window open until {}", deadline);
    }

    /// Close the window if its deadline has passed.
    pub fn on_timer(&mut self, now: Millis, bus: &impl Publish) -> Option<PairingOutcome> {
        let deadline = self.deadline()?;
        if now < deadline {
            return None;
        }
        self.complete(PairingOutcome::TimedOut, bus);
        Some(PairingOutcome::TimedOut)
    }

    fn complete(&mut self, outcome: PairingOutcome, bus: &impl Publish) {
        bus.publish(Event::AcceptBonds(false));
        self.session = None;
        bus.publish(Event::PairingComplete);
        log_info!("pairing: complete ({:?})", outcome);
    }
}

impl Default for PairingCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "embedded")]
#[embassy_executor::task]
pub async fn pairing_task(bus: &'static crate::bus::SystemBus) -> ! {
    use crate::bus::{log_outcome, Actor};
    use crate::uptime_ms;

    let mut pairing = PairingCoordinator::new();
    loop {
        match bus
            .next_or_deadline(Actor::Pairing.index(), pairing.deadline())
            .await
        {
            Some(event) => {
                let result = pairing.handle_event(&event, uptime_ms(), bus);
                log_outcome(Actor::Pairing, &event, result);
            }
            None => {
                pairing.on_timer(uptime_ms(), bus);
            }
        }
    }
}
