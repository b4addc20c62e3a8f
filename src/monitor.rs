//! Diagnostic monitor.
//!
//! Two channels, one per peer role, each off by default. While a channel
//! is on, every decoded sample from that peer is logged. Channels are
//! toggled from the serial console:
//!
//! ```text
//! monitor fsr start|stop
//! monitor controller start|stop
//! ```

use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::ble::payload::Sample;
use crate::ble::{Role, ROLE_COUNT};
use crate::error::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Action {
    Start,
    Stop,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MonitorCommand {
    pub role: Role,
    pub action: Action,
}

impl MonitorCommand {
    /// Parse one console line.
    pub fn parse(line: &str) -> Result<Self, Error> {
        let mut words = line.split_ascii_whitespace();
        if words.next() != Some("monitor") {
            return Err(Error::UnknownCommand);
        }

        let role = match words.next() {
            Some(name) => Role::ALL
                .into_iter()
                .find(|role| role.name() == name)
                .ok_or(Error::UnknownCommand)?,
            None => return Err(Error::UnknownCommand),
        };
        let action = match words.next() {
            Some("start") => Action::Start,
            Some("stop") => Action::Stop,
            _ => return Err(Error::UnknownCommand),
        };
        if words.next().is_some() {
            return Err(Error::UnknownCommand);
        }

        Ok(Self { role, action })
    }
}

/// Console response to a command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Reply {
    Started(Role),
    AlreadyStarted(Role),
    Stopped(Role),
    NotStarted(Role),
    Usage,
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Started(role) => write!(f, "{} started", role.name()),
            Reply::AlreadyStarted(role) => write!(f, "{} monitoring already started", role.name()),
            Reply::Stopped(role) => write!(f, "{} stopped", role.name()),
            Reply::NotStarted(role) => write!(f, "{} monitoring not started", role.name()),
            Reply::Usage => f.write_str("usage: monitor fsr|controller start|stop"),
        }
    }
}

pub struct Diagnostics {
    enabled: [AtomicBool; ROLE_COUNT],
}

impl Diagnostics {
    pub const fn new() -> Self {
        Self {
            enabled: [AtomicBool::new(false), AtomicBool::new(false)],
        }
    }

    pub fn is_enabled(&self, role: Role) -> bool {
        self.enabled[role.index()].load(Ordering::Relaxed)
    }

    pub fn execute(&self, command: MonitorCommand) -> Reply {
        let flag = &self.enabled[command.role.index()];
        match command.action {
            Action::Start => {
                if flag.swap(true, Ordering::Relaxed) {
                    Reply::AlreadyStarted(command.role)
                } else {
                    Reply::Started(command.role)
                }
            }
            Action::Stop => {
                if flag.swap(false, Ordering::Relaxed) {
                    Reply::Stopped(command.role)
                } else {
                    Reply::NotStarted(command.role)
                }
            }
        }
    }

    /// Parse and execute a console line.
    pub fn run(&self, line: &str) -> Reply {
        match MonitorCommand::parse(line) {
            Ok(command) => self.execute(command),
            Err(_) => Reply::Usage,
        }
    }

    /// Log `sample` if its channel is on. Returns whether it was logged.
    pub fn on_sample(&self, sample: &Sample) -> bool {
        if !self.is_enabled(sample.role()) {
            return false;
        }
        match sample {
            Sample::Force(force) => log_info!(
                "fsr: {:?} pressed={}",
                force.channels,
                force.is_pressed()
            ),
            Sample::Controller(ctrl) => {
                log_info!("controller: value={} mode={}", ctrl.value, ctrl.mode)
            }
        }
        true
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new()
    }
}

/// Channel flags shared by the console and the sample consumer.
pub static DIAGNOSTICS: Diagnostics = Diagnostics::new();

#[cfg(feature = "embedded")]
mod tasks {
    use core::fmt::Write;

    use embassy_nrf::peripherals::UARTE0;
    use embassy_nrf::uarte::Uarte;
    use heapless::String;

    use super::DIAGNOSTICS;
    use crate::ble::radio::SAMPLES;

    const LINE_LEN: usize = 64;

    /// Drain decoded peer samples, logging the enabled channels.
    #[embassy_executor::task]
    pub async fn monitor_task() -> ! {
        loop {
            let sample = SAMPLES.receive().await;
            DIAGNOSTICS.on_sample(&sample);
        }
    }

    /// Line-oriented serial console for the monitor commands.
    #[embassy_executor::task]
    pub async fn console_task(mut uart: Uarte<'static, UARTE0>) -> ! {
        let mut line: String<LINE_LEN> = String::new();
        let mut byte = [0u8; 1];

        loop {
            if let Err(e) = uart.read(&mut byte).await {
                log_warn!("console: read failed: {:?}", e);
                continue;
            }

            match byte[0] {
                b'\r' | b'\n' => {
                    if line.is_empty() {
                        continue;
                    }
                    let reply = DIAGNOSTICS.run(line.as_str());
                    line.clear();

                    let mut out: String<LINE_LEN> = String::new();
                    let _ = write!(out, "{}\r\n", reply);
                    if let Err(e) = uart.write(out.as_bytes()).await {
                        log_warn!("console: write failed: {:?}", e);
                    }
                }
                c if c.is_ascii() => {
                    if line.push(c as char).is_err() {
                        log_warn!("console: line too long, discarded");
                        line.clear();
                    }
                }
                _ => {}
            }
        }
    }
}

#[cfg(feature = "embedded")]
pub use tasks::{console_task, monitor_task};
