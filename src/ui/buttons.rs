//! GPIO button input with async debouncing, and the gesture task.
//!
//! Two physical buttons (active-low with internal pull-up). Each one has a
//! task that waits for any edge, debounces it and queues a timestamped
//! [`ButtonEdge`]. The gesture task owns the [`GestureDetector`] and
//! publishes what it classifies.

use embassy_futures::select::{select, Either};
use embassy_nrf::gpio::{AnyPin, Input, Pull};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Duration, Instant, Timer};

use crate::bus::{Event, SystemBus};
use crate::config::{BUTTON_DEBOUNCE_MS, EDGE_QUEUE_DEPTH};
use crate::ui::gesture::GestureDetector;
use crate::ui::{Button, ButtonEdge, Gesture};
use crate::uptime_ms;

static EDGES: Channel<CriticalSectionRawMutex, ButtonEdge, EDGE_QUEUE_DEPTH> = Channel::new();

/// Debounce one button and queue its level changes.
#[embassy_executor::task(pool_size = 2)]
pub async fn button_task(pin: AnyPin, button: Button) -> ! {
    let mut input = Input::new(pin, Pull::Up);
    let mut pressed = input.is_low();

    loop {
        input.wait_for_any_edge().await;
        let at = uptime_ms();

        // Debounce: wait and re-check.
        Timer::after(Duration::from_millis(BUTTON_DEBOUNCE_MS)).await;
        let level = input.is_low();
        if level == pressed {
            continue;
        }
        pressed = level;

        let edge = ButtonEdge {
            button,
            pressed,
            at,
        };
        if EDGES.try_send(edge).is_err() {
            log_warn!("buttons: edge queue full, {:?} dropped", edge);
        }
    }
}

/// Classify queued edges and publish gestures.
#[embassy_executor::task]
pub async fn gesture_task(bus: &'static SystemBus) -> ! {
    let mut detector = GestureDetector::new();

    loop {
        let edge = match detector.deadline() {
            Some(deadline) => {
                match select(EDGES.receive(), Timer::at(Instant::from_millis(deadline))).await {
                    Either::First(edge) => edge,
                    Either::Second(()) => {
                        publish(bus, detector.on_timer(uptime_ms()));
                        continue;
                    }
                }
            }
            None => EDGES.receive().await,
        };

        // An edge captured after the deadline must not overtake the long press.
        publish(bus, detector.on_timer(edge.at));
        publish(bus, detector.on_edge(edge));
    }
}

fn publish(bus: &SystemBus, gesture: Option<Gesture>) {
    if let Some(gesture) = gesture {
        log_info!("buttons: <{}>", gesture.topic());
        bus.publish(Event::Gesture(gesture));
    }
}
