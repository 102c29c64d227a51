use std::sync::{Arc, Mutex};

use anyhow::Result;
use log::info;

use crate::platform::playback::Motor;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MotorEvent {
    Pulse(u64),
    Stop,
}

/// Shared view of everything a [`SimulatedMotor`] was asked to do.
#[derive(Debug, Clone, Default)]
pub struct MotorEventLog {
    events: Arc<Mutex<Vec<MotorEvent>>>,
}

impl MotorEventLog {
    #[cfg(test)]
    pub fn snapshot(&self) -> Vec<MotorEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    fn push(&self, event: MotorEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Motor without hardware behind it; each request is logged and recorded.
pub struct SimulatedMotor {
    events: MotorEventLog,
}

impl SimulatedMotor {
    pub fn new() -> Self {
        Self {
            events: MotorEventLog::default(),
        }
    }

    #[cfg(test)]
    pub fn events(&self) -> MotorEventLog {
        self.events.clone()
    }
}

impl Default for SimulatedMotor {
    fn default() -> Self {
        Self::new()
    }
}

impl Motor for SimulatedMotor {
    fn ready(&mut self) -> Result<()> {
        Ok(())
    }

    fn pulse(&mut self, duration_ms: u64) -> Result<()> {
        info!("simulated motor on for {duration_ms} ms");
        self.events.push(MotorEvent::Pulse(duration_ms));
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        info!("simulated motor off");
        self.events.push(MotorEvent::Stop);
        Ok(())
    }

    fn label(&self) -> &'static str {
        "SIMULATED"
    }
}
