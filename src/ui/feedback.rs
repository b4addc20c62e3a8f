//! LED feedback sequencer.
//!
//! A pattern is a list of `(color, duration)` steps ending in a
//! zero-duration sentinel. The sequencer keeps a looping *base* pattern
//! and an optional one-shot *overlay*; while an overlay is active the
//! base is suspended, and once the overlay reaches its sentinel the base
//! restarts from step 0.

use crate::Millis;

/// RGB on/off mask.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Color(u8);

impl Color {
    pub const OFF: Color = Color(0);
    pub const RED: Color = Color(0b001);
    pub const GREEN: Color = Color(0b010);
    pub const BLUE: Color = Color(0b100);
    pub const YELLOW: Color = Color(0b011);

    pub const fn red(self) -> bool {
        self.0 & Self::RED.0 != 0
    }

    pub const fn green(self) -> bool {
        self.0 & Self::GREEN.0 != 0
    }

    pub const fn blue(self) -> bool {
        self.0 & Self::BLUE.0 != 0
    }
}

/// One step of a pattern. `duration_ms == 0` is the terminal sentinel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LedStep {
    pub color: Color,
    pub duration_ms: u32,
}

impl LedStep {
    const fn new(color: Color, duration_ms: u32) -> Self {
        Self { color, duration_ms }
    }

    const fn end() -> Self {
        Self::new(Color::OFF, 0)
    }

    pub const fn is_terminal(&self) -> bool {
        self.duration_ms == 0
    }
}

pub type Pattern = &'static [LedStep];

pub mod patterns {
    use super::{Color, LedStep, Pattern};

    pub const OFF: Pattern = &[LedStep::end()];
    pub const POWER_ON: Pattern = &[LedStep::new(Color::BLUE, 3000), LedStep::end()];
    pub const POWER_OFF: Pattern = &[LedStep::new(Color::RED, 3000), LedStep::end()];
    pub const BLUE_BLINK: Pattern = &[
        LedStep::new(Color::BLUE, 500),
        LedStep::new(Color::OFF, 500),
        LedStep::end(),
    ];
    pub const GREEN_BLINK: Pattern = &[
        LedStep::new(Color::GREEN, 500),
        LedStep::new(Color::OFF, 500),
        LedStep::end(),
    ];
    pub const RED_BLINK: Pattern = &[
        LedStep::new(Color::RED, 500),
        LedStep::new(Color::OFF, 500),
        LedStep::end(),
    ];
    pub const YELLOW_BLINK: Pattern = &[
        LedStep::new(Color::YELLOW, 500),
        LedStep::new(Color::OFF, 500),
        LedStep::end(),
    ];
    pub const RED_BLUE_ALTERNATING: Pattern = &[
        LedStep::new(Color::RED, 100),
        LedStep::new(Color::BLUE, 100),
        LedStep::end(),
    ];
}

/// Feedback requests published under `led/`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Feedback {
    PowerOn,
    PowerOff,
    Standby,
    Ready,
    Pairing,
}

impl Feedback {
    pub const fn topic(self) -> &'static str {
        match self {
            Feedback::PowerOn => "led/poweron",
            Feedback::PowerOff => "led/poweroff",
            Feedback::Standby => "led/standby",
            Feedback::Ready => "led/ready",
            Feedback::Pairing => "led/pairing",
        }
    }

    /// `(overlay, base)` patterns for this request.
    pub const fn patterns(self) -> (Option<Pattern>, Option<Pattern>) {
        match self {
            Feedback::PowerOn => (Some(patterns::POWER_ON), Some(patterns::BLUE_BLINK)),
            Feedback::PowerOff => (Some(patterns::POWER_OFF), Some(patterns::OFF)),
            Feedback::Standby => (None, Some(patterns::BLUE_BLINK)),
            Feedback::Ready => (None, Some(patterns::GREEN_BLINK)),
            Feedback::Pairing => (None, Some(patterns::RED_BLUE_ALTERNATING)),
        }
    }
}

pub struct Sequencer {
    base: Option<Pattern>,
    overlay: Option<Pattern>,
    index: usize,
    deadline: Option<Millis>,
}

impl Sequencer {
    pub const fn new() -> Self {
        Self {
            base: None,
            overlay: None,
            index: 0,
            deadline: None,
        }
    }

    /// Replace the base pattern. Restarts playback unless an overlay runs.
    pub fn set_base(&mut self, pattern: Pattern, now: Millis) {
        self.base = Some(pattern);
        if self.overlay.is_none() {
            self.index = 0;
            self.deadline = Some(now);
        }
    }

    /// Start a one-shot overlay from its first step.
    pub fn set_overlay(&mut self, pattern: Pattern, now: Millis) {
        self.overlay = Some(pattern);
        self.index = 0;
        self.deadline = Some(now);
    }

    /// Apply a bus feedback request.
    pub fn apply(&mut self, feedback: Feedback, now: Millis) {
        let (overlay, base) = feedback.patterns();
        if let Some(overlay) = overlay {
            self.set_overlay(overlay, now);
        }
        if let Some(base) = base {
            self.set_base(base, now);
        }
    }

    /// When the current step ends, if anything is scheduled.
    pub fn deadline(&self) -> Option<Millis> {
        self.deadline
    }

    pub fn overlay_active(&self) -> bool {
        self.overlay.is_some()
    }

    /// Advance if the current step has elapsed. Returns the color to show.
    pub fn poll(&mut self, now: Millis) -> Option<Color> {
        match self.deadline {
            Some(deadline) if now >= deadline => self.advance(now),
            _ => None,
        }
    }

    fn advance(&mut self, now: Millis) -> Option<Color> {
        loop {
            let Some(pattern) = self.overlay.or(self.base) else {
                self.deadline = None;
                return None;
            };

            match pattern.get(self.index).filter(|step| !step.is_terminal()) {
                Some(step) => {
                    self.deadline = Some(now + Millis::from(step.duration_ms));
                    self.index += 1;
                    return Some(step.color);
                }
                // Overlay finished: the base resumes from its first step.
                None if self.overlay.is_some() => {
                    self.overlay = None;
                    self.index = 0;
                }
                None if self.index > 0 => self.index = 0,
                // Single-step base: show it and hold.
                None => {
                    self.deadline = None;
                    return pattern.first().map(|step| step.color);
                }
            }
        }
    }
}

impl Default for Sequencer {
    fn default() -> Self {
        Self::new()
    }
}
