//! Typed hierarchical event bus.
//!
//! Every cross-actor message travels through here. Topics are
//! slash-delimited paths (`event/button_ab`, `led/ready`, `ble/start`)
//! derived from a closed [`Event`] enum, so handlers get exhaustive
//! matching instead of string comparison.
//!
//! Each subscriber owns one [`Mailbox`]: a static list of topic prefixes
//! and a bounded channel. Publishing copies the event into every mailbox
//! whose prefixes match and never waits; a full mailbox drops the event
//! for that subscriber only.

use embassy_sync::blocking_mutex::raw::{CriticalSectionRawMutex, RawMutex};
use embassy_sync::channel::Channel;

use crate::ble::Role;
use crate::config::BUS_DEPTH;
use crate::error::Error;
use crate::ui::feedback::Feedback;
use crate::ui::Gesture;

/// Subsystems that can be started and stopped from the power coordinator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Subsystem {
    /// BLE central (peer links, scanning, pairing).
    Radio,
    /// Motor driver bus.
    Motor,
}

/// Commands addressed to a [`Subsystem`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    Start,
    Stop,
    Pair,
}

/// Everything that can be published on the bus.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    /// A classified button gesture.
    Gesture(Gesture),
    /// A peer role connected or disconnected.
    Connection { role: Role, connected: bool },
    /// The pairing window closed (bonded or timed out).
    PairingComplete,
    /// Indicator LED request.
    Feedback(Feedback),
    /// Start / stop / pair a subsystem.
    Command { target: Subsystem, command: Command },
    /// Open or close the "accept new bonds" window on the central.
    AcceptBonds(bool),
}

impl Event {
    /// Hierarchical topic path of this event.
    pub fn topic(&self) -> &'static str {
        match *self {
            Event::Gesture(gesture) => gesture.topic(),
            Event::Connection { role, .. } => role.connection_topic(),
            Event::PairingComplete => "event/pairing_complete",
            Event::Feedback(feedback) => feedback.topic(),
            Event::Command { target, command } => match (target, command) {
                (Subsystem::Radio, Command::Start) => "ble/start",
                (Subsystem::Radio, Command::Stop) => "ble/stop",
                (Subsystem::Radio, Command::Pair) => "ble/pair",
                (Subsystem::Motor, Command::Start) => "can/start",
                (Subsystem::Motor, Command::Stop) => "can/stop",
                (Subsystem::Motor, Command::Pair) => "can/pair",
            },
            Event::AcceptBonds(_) => "ble/accept_bonds",
        }
    }
}

/// Publishing seam used by the state machines.
pub trait Publish {
    fn publish(&self, event: Event);
}

/// The actors of the firmware, one mailbox each.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Actor {
    Power,
    Radio,
    Pairing,
    Feedback,
    Motor,
}

pub const ACTOR_COUNT: usize = 5;

impl Actor {
    pub const ALL: [Actor; ACTOR_COUNT] = [
        Actor::Power,
        Actor::Radio,
        Actor::Pairing,
        Actor::Feedback,
        Actor::Motor,
    ];

    /// Mailbox index on a [`SystemBus`].
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Topic prefixes this actor subscribes to.
    pub const fn routes(self) -> &'static [&'static str] {
        match self {
            Actor::Power => &["event/"],
            Actor::Radio => &["ble/start", "ble/stop", "ble/accept_bonds"],
            Actor::Pairing => &["ble/pair", "event/"],
            Actor::Feedback => &["led/"],
            Actor::Motor => &["can/"],
        }
    }
}

/// One subscriber's routes and queue.
pub struct Mailbox<M: RawMutex, const DEPTH: usize> {
    routes: &'static [&'static str],
    queue: Channel<M, Event, DEPTH>,
}

impl<M: RawMutex, const DEPTH: usize> Mailbox<M, DEPTH> {
    pub const fn new(routes: &'static [&'static str]) -> Self {
        Self {
            routes,
            queue: Channel::new(),
        }
    }

    /// True if any route is a prefix of `topic`.
    pub fn accepts(&self, topic: &str) -> bool {
        self.routes.iter().any(|prefix| topic.starts_with(prefix))
    }
}

/// Publish/subscribe registry with statically routed mailboxes.
pub struct EventBus<M: RawMutex, const SUBS: usize, const DEPTH: usize> {
    mailboxes: [Mailbox<M, DEPTH>; SUBS],
}

/// The bus shared by all firmware tasks.
pub type SystemBus = EventBus<CriticalSectionRawMutex, ACTOR_COUNT, BUS_DEPTH>;

impl<M: RawMutex, const SUBS: usize, const DEPTH: usize> EventBus<M, SUBS, DEPTH> {
    /// Build a bus whose subscriber `i` receives topics under `routes[i]`.
    pub fn with_routes(routes: [&'static [&'static str]; SUBS]) -> Self {
        Self {
            mailboxes: routes.map(Mailbox::new),
        }
    }

    /// Copy `event` into every matching mailbox. Returns the number of
    /// subscribers it was delivered to.
    pub fn publish(&self, event: Event) -> usize {
        self.deliver(event)
    }

    fn deliver(&self, event: Event) -> usize {
        let topic = event.topic();
        let mut delivered = 0;

        for (subscriber, mailbox) in self.mailboxes.iter().enumerate() {
            if !mailbox.accepts(topic) {
                continue;
            }
            match mailbox.queue.try_send(event) {
                Ok(()) => delivered += 1,
                Err(_) => log_warn!("bus: mailbox {} full - dropping {}", subscriber, topic),
            }
        }

        log_debug!("bus: {} -> {} subscriber(s)", topic, delivered);
        delivered
    }

    /// Next queued event for `subscriber`, if any.
    pub fn try_next(&self, subscriber: usize) -> Option<Event> {
        self.mailboxes[subscriber].queue.try_receive().ok()
    }

    /// Wait for the next event for `subscriber`.
    pub async fn next(&self, subscriber: usize) -> Event {
        self.mailboxes[subscriber].queue.receive().await
    }

    /// Wait for the next event, or until `deadline` (uptime ms) passes.
    /// Returns `None` when the deadline fired first.
    #[cfg(feature = "embedded")]
    pub async fn next_or_deadline(
        &self,
        subscriber: usize,
        deadline: Option<crate::Millis>,
    ) -> Option<Event> {
        use embassy_futures::select::{select, Either};
        use embassy_time::{Instant, Timer};

        let Some(deadline) = deadline else {
            return Some(self.next(subscriber).await);
        };

        match select(
            self.next(subscriber),
            Timer::at(Instant::from_millis(deadline)),
        )
        .await
        {
            Either::First(event) => Some(event),
            Either::Second(()) => None,
        }
    }
}

impl<M: RawMutex, const DEPTH: usize> EventBus<M, ACTOR_COUNT, DEPTH> {
    /// Bus routed by the [`Actor`] table.
    pub fn new() -> Self {
        Self::with_routes(Actor::ALL.map(Actor::routes))
    }
}

impl<M: RawMutex, const DEPTH: usize> Default for EventBus<M, ACTOR_COUNT, DEPTH> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M: RawMutex, const SUBS: usize, const DEPTH: usize> Publish for EventBus<M, SUBS, DEPTH> {
    fn publish(&self, event: Event) {
        self.deliver(event);
    }
}

/// Log a handler result. Errors never propagate past the actor loop.
pub fn log_outcome(actor: Actor, event: &Event, result: Result<(), Error>) {
    if let Err(e) = result {
        log_warn!("{:?}: <{}> rejected: {:?}", actor, event.topic(), e);
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use embassy_sync::blocking_mutex::raw::NoopRawMutex;

    const ALL: &[&str] = &[""];
    const EVENTS: &[&str] = &["event/"];
    const LEDS: &[&str] = &["led/"];

    fn ab() -> Event {
        Event::Gesture(Gesture::ButtonAB)
    }

    #[test]
    fn topics_follow_the_namespace() {
        assert_eq!(ab().topic(), "event/button_ab");
        assert_eq!(Event::PairingComplete.topic(), "event/pairing_complete");
        assert_eq!(
            Event::Connection {
                role: Role::Force,
                connected: true
            }
            .topic(),
            "event/fsr_connection"
        );
        assert_eq!(Event::Feedback(Feedback::Ready).topic(), "led/ready");
        assert_eq!(
            Event::Command {
                target: Subsystem::Motor,
                command: Command::Stop
            }
            .topic(),
            "can/stop"
        );
        assert_eq!(Event::AcceptBonds(true).topic(), "ble/accept_bonds");
    }

    #[test]
    fn delivers_in_publish_order_per_subscriber() {
        let bus: EventBus<NoopRawMutex, 2, 4> = EventBus::with_routes([ALL, EVENTS]);

        bus.publish(ab());
        bus.publish(Event::Feedback(Feedback::Standby));
        bus.publish(Event::PairingComplete);

        assert_eq!(bus.try_next(0), Some(ab()));
        assert_eq!(bus.try_next(0), Some(Event::Feedback(Feedback::Standby)));
        assert_eq!(bus.try_next(0), Some(Event::PairingComplete));
        assert_eq!(bus.try_next(0), None);

        assert_eq!(bus.try_next(1), Some(ab()));
        assert_eq!(bus.try_next(1), Some(Event::PairingComplete));
        assert_eq!(bus.try_next(1), None);
    }

    #[test]
    fn prefix_routing_counts_deliveries() {
        let bus: EventBus<NoopRawMutex, 2, 4> = EventBus::with_routes([EVENTS, LEDS]);

        assert_eq!(bus.publish(Event::Feedback(Feedback::Pairing)), 1);
        assert_eq!(bus.try_next(0), None);
        assert_eq!(bus.try_next(1), Some(Event::Feedback(Feedback::Pairing)));

        let unrouted = Event::Command {
            target: Subsystem::Radio,
            command: Command::Start,
        };
        assert_eq!(bus.publish(unrouted), 0);
    }

    #[test]
    fn full_mailbox_drops_only_for_that_subscriber() {
        let bus: EventBus<NoopRawMutex, 2, 2> = EventBus::with_routes([EVENTS, ALL]);

        bus.publish(ab());
        bus.publish(ab());
        // Both mailboxes are full now; the third copy is dropped for each.
        assert_eq!(bus.publish(Event::PairingComplete), 0);

        assert_eq!(bus.try_next(1), Some(ab()));
        assert_eq!(bus.publish(Event::Feedback(Feedback::Ready)), 1);
        assert_eq!(bus.try_next(1), Some(ab()));
        assert_eq!(bus.try_next(1), Some(Event::Feedback(Feedback::Ready)));
        assert_eq!(bus.try_next(0), Some(ab()));
        assert_eq!(bus.try_next(0), Some(ab()));
        assert_eq!(bus.try_next(0), None);
    }

    #[test]
    fn actor_table_routes_system_topics() {
        let bus: EventBus<NoopRawMutex, ACTOR_COUNT, 4> = EventBus::new();

        bus.publish(Event::Command {
            target: Subsystem::Radio,
            command: Command::Pair,
        });
        assert!(bus.try_next(Actor::Pairing.index()).is_some());
        assert!(bus.try_next(Actor::Radio.index()).is_none());

        bus.publish(Event::Connection {
            role: Role::Controller,
            connected: false,
        });
        assert!(bus.try_next(Actor::Power.index()).is_some());
        assert!(bus.try_next(Actor::Pairing.index()).is_some());
        assert!(bus.try_next(Actor::Feedback.index()).is_none());

        bus.publish(Event::Command {
            target: Subsystem::Motor,
            command: Command::Start,
        });
        assert!(bus.try_next(Actor::Motor.index()).is_some());
    }
}
