//! User interface subsystem - two push buttons and an RGB status LED.
//!
//! ## Components
//!
//! - **Gesture detector**: turns debounced button edges into short, long
//!   and combo gestures (`gesture`)
//! - **Feedback sequencer**: plays looping base patterns and one-shot
//!   overlays on the LED (`feedback`)
//! - **Buttons / LED tasks**: the embedded glue (`buttons`, `led`)

pub mod feedback;
pub mod gesture;

#[cfg(feature = "embedded")]
pub mod buttons;
#[cfg(feature = "embedded")]
pub mod led;

/// The two physical buttons.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Button {
    A,
    B,
}

impl Button {
    /// The other button of the pair.
    pub const fn other(self) -> Button {
        match self {
            Button::A => Button::B,
            Button::B => Button::A,
        }
    }
}

/// A debounced level change on one button.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ButtonEdge {
    pub button: Button,
    pub pressed: bool,
    /// Uptime (ms) at which the edge was captured.
    pub at: crate::Millis,
}

/// Classified input shapes, one bus event each.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Gesture {
    ButtonA,
    ButtonB,
    /// Both buttons pressed together.
    ButtonAB,
    ButtonALong,
    ButtonBLong,
}

impl Gesture {
    pub(crate) const fn short(button: Button) -> Gesture {
        match button {
            Button::A => Gesture::ButtonA,
            Button::B => Gesture::ButtonB,
        }
    }

    pub(crate) const fn long(button: Button) -> Gesture {
        match button {
            Button::A => Gesture::ButtonALong,
            Button::B => Gesture::ButtonBLong,
        }
    }

    pub const fn topic(self) -> &'static str {
        match self {
            Gesture::ButtonA => "event/button_a",
            Gesture::ButtonB => "event/button_b",
            Gesture::ButtonAB => "event/button_ab",
            Gesture::ButtonALong => "event/button_a_long",
            Gesture::ButtonBLong => "event/button_b_long",
        }
    }

    /// True for the long-press gestures that request pairing.
    pub const fn is_long(self) -> bool {
        matches!(self, Gesture::ButtonALong | Gesture::ButtonBLong)
    }
}
