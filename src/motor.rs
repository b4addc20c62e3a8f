//! Motor bus interface.
//!
//! Only the start/stop contract lives here; CAN framing belongs to the
//! motor driver.

use crate::bus::{Command, Event, Subsystem};
use crate::error::Error;

#[derive(Debug, Default)]
pub struct MotorLink {
    running: bool,
}

impl MotorLink {
    pub const fn new() -> Self {
        Self { running: false }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn handle_event(&mut self, event: &Event) -> Result<(), Error> {
        match *event {
            Event::Command {
                target: Subsystem::Motor,
                command: Command::Start,
            } => {
                if !self.running {
                    log_info!("motor: start");
                    self.running = true;
                }
                Ok(())
            }
            Event::Command {
                target: Subsystem::Motor,
                command: Command::Stop,
            } => {
                if self.running {
                    log_info!("motor: stop");
                    self.running = false;
                }
                Ok(())
            }
            _ => Err(Error::NotPermitted),
        }
    }
}

#[cfg(feature = "embedded")]
#[embassy_executor::task]
pub async fn motor_task(bus: &'static crate::bus::SystemBus) -> ! {
    use crate::bus::{log_outcome, Actor};

    let mut motor = MotorLink::new();
    loop {
        let event = bus.next(Actor::Motor.index()).await;
        log_outcome(Actor::Motor, &event, motor.handle_event(&event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn can(command: Command) -> Event {
        Event::Command {
            target: Subsystem::Motor,
            command,
        }
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let mut motor = MotorLink::new();
        motor.handle_event(&can(Command::Start)).unwrap();
        motor.handle_event(&can(Command::Start)).unwrap();
        assert!(motor.is_running());
        motor.handle_event(&can(Command::Stop)).unwrap();
        assert!(!motor.is_running());
        motor.handle_event(&can(Command::Stop)).unwrap();
        assert!(!motor.is_running());
    }

    #[test]
    fn other_commands_are_refused() {
        let mut motor = MotorLink::new();
        assert_eq!(motor.handle_event(&can(Command::Pair)), Err(Error::NotPermitted));
        assert_eq!(
            motor.handle_event(&Event::Command {
                target: Subsystem::Radio,
                command: Command::Start
            }),
            Err(Error::NotPermitted)
        );
    }
}
