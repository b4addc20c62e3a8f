//! RGB status LED driven by the feedback sequencer.

use embassy_nrf::gpio::{AnyPin, Level, Output, OutputDrive};

use crate::bus::{log_outcome, Actor, Event, SystemBus};
use crate::error::Error;
use crate::ui::feedback::{patterns, Color, Sequencer};
use crate::uptime_ms;

/// Three active-low LED channels.
pub struct RgbLed {
    red: Output<'static>,
    green: Output<'static>,
    blue: Output<'static>,
}

impl RgbLed {
    pub fn new(red: AnyPin, green: AnyPin, blue: AnyPin) -> Self {
        Self {
            red: Output::new(red, Level::High, OutputDrive::Standard),
            green: Output::new(green, Level::High, OutputDrive::Standard),
            blue: Output::new(blue, Level::High, OutputDrive::Standard),
        }
    }

    pub fn show(&mut self, color: Color) {
        drive(&mut self.red, color.red());
        drive(&mut self.green, color.green());
        drive(&mut self.blue, color.blue());
    }
}

fn drive(pin: &mut Output<'static>, on: bool) {
    if on {
        pin.set_low();
    } else {
        pin.set_high();
    }
}

#[embassy_executor::task]
pub async fn led_task(bus: &'static SystemBus, mut led: RgbLed) -> ! {
    let mut sequencer = Sequencer::new();
    sequencer.set_base(patterns::OFF, uptime_ms());

    loop {
        if let Some(color) = sequencer.poll(uptime_ms()) {
            led.show(color);
        }

        match bus
            .next_or_deadline(Actor::Feedback.index(), sequencer.deadline())
            .await
        {
            Some(Event::Feedback(feedback)) => {
                log_debug!("led: <{}>", feedback.topic());
                sequencer.apply(feedback, uptime_ms());
            }
            Some(other) => log_outcome(Actor::Feedback, &other, Err(Error::NotPermitted)),
            None => {}
        }
    }
}
