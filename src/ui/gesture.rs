//! Button gesture classification.
//!
//! Both buttons drive one shared state machine, so only one gesture is
//! ever in flight:
//!
//! ```text
//!  Idle --press X--> XHeld --release X (< long press)--> Idle   [button_x]
//!                    XHeld --timer-----------------> XLongFired [button_x_long]
//!                    XHeld --press other-----------> BothHeld   [button_ab]
//!  XLongFired / BothHeld --release--> Idle (silent)
//! ```
//!
//! The detector owns its long-press deadline; the caller reports expiry
//! through [`GestureDetector::on_timer`].

use crate::config::LONG_PRESS_MS;
use crate::ui::{Button, ButtonEdge, Gesture};
use crate::Millis;

/// Current classification state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum GestureState {
    Idle,
    AHeld,
    BHeld,
    BothHeld,
    ALongFired,
    BLongFired,
}

impl GestureState {
    const fn held(button: Button) -> Self {
        match button {
            Button::A => GestureState::AHeld,
            Button::B => GestureState::BHeld,
        }
    }

    const fn long_fired(button: Button) -> Self {
        match button {
            Button::A => GestureState::ALongFired,
            Button::B => GestureState::BLongFired,
        }
    }
}

pub struct GestureDetector {
    state: GestureState,
    deadline: Option<Millis>,
    long_press_ms: Millis,
}

impl GestureDetector {
    pub const fn new() -> Self {
        Self::with_long_press(LONG_PRESS_MS)
    }

    pub const fn with_long_press(long_press_ms: Millis) -> Self {
        Self {
            state: GestureState::Idle,
            deadline: None,
            long_press_ms,
        }
    }

    pub fn state(&self) -> GestureState {
        self.state
    }

    /// When the armed long-press timer expires, if any.
    pub fn deadline(&self) -> Option<Millis> {
        self.deadline
    }

    /// Feed one debounced edge.
    ///
    /// Callers must first give [`on_timer`](Self::on_timer) a chance at the
    /// edge's timestamp so a late release cannot overtake an expired
    /// long-press timer.
    pub fn on_edge(&mut self, edge: ButtonEdge) -> Option<Gesture> {
        let ButtonEdge {
            button,
            pressed,
            at,
        } = edge;

        match (self.state, pressed) {
            (GestureState::Idle, true) => {
                self.state = GestureState::held(button);
                self.deadline = Some(at + self.long_press_ms);
                None
            }
            (state, true) if state == GestureState::held(button.other()) => {
                self.deadline = None;
                self.state = GestureState::BothHeld;
                Some(Gesture::ButtonAB)
            }
            (state, false) if state == GestureState::held(button) => {
                self.deadline = None;
                self.state = GestureState::Idle;
                Some(Gesture::short(button))
            }
            (state, false)
                if state == GestureState::long_fired(button)
                    || state == GestureState::BothHeld =>
            {
                self.state = GestureState::Idle;
                None
            }
            (state, _) => {
                log_debug!(
                    "gesture: ignoring {:?} pressed={} in {:?}",
                    button,
                    pressed,
                    state
                );
                None
            }
        }
    }

    /// Fire the long-press timer if it has expired by `now`.
    pub fn on_timer(&mut self, now: Millis) -> Option<Gesture> {
        let deadline = self.deadline?;
        if now < deadline {
            return None;
        }
        self.deadline = None;

        let button = match self.state {
            GestureState::AHeld => Button::A,
            GestureState::BHeld => Button::B,
            _ => return None,
        };
        self.state = GestureState::long_fired(button);
        Some(Gesture::long(button))
    }
}

impl Default for GestureDetector {
    fn default() -> Self {
        Self::new()
    }
}
