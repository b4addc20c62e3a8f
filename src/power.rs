//! Power rails and the power coordinator task.
//!
//! Two enable lines gate the system supply and the motor driver supply.
//! Shutdown is a cold restart: once the rails are off the board comes back
//! up in `Off` mode and waits for the power gesture.

use embassy_nrf::gpio::{AnyPin, Level, Output, OutputDrive};

use crate::bus::{log_outcome, Actor, SystemBus};
use crate::power_logic::{PowerCoordinator, PowerRails};
use crate::uptime_ms;

pub struct GpioRails {
    system: Output<'static>,
    motor: Output<'static>,
}

impl GpioRails {
    /// Both rails start disabled.
    pub fn new(system: AnyPin, motor: AnyPin) -> Self {
        Self {
            system: Output::new(system, Level::Low, OutputDrive::Standard),
            motor: Output::new(motor, Level::Low, OutputDrive::Standard),
        }
    }
}

impl PowerRails for GpioRails {
    fn set_enabled(&mut self, enabled: bool) {
        let level = if enabled { Level::High } else { Level::Low };
        self.system.set_level(level);
        self.motor.set_level(level);
    }

    fn restart(&mut self) {
        cortex_m::peripheral::SCB::sys_reset();
    }
}

#[embassy_executor::task]
pub async fn power_task(bus: &'static SystemBus, rails: GpioRails) -> ! {
    let mut power = PowerCoordinator::new(rails);

    loop {
        match bus
            .next_or_deadline(Actor::Power.index(), power.deadline())
            .await
        {
            Some(event) => {
                let result = power.handle_event(&event, uptime_ms(), bus);
                log_outcome(Actor::Power, &event, result);
            }
            None => power.on_timer(uptime_ms()),
        }
    }
}
