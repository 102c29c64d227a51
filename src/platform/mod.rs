pub mod playback;
pub mod simulated;
pub mod timed_output;

use std::path::Path;
use std::time::Duration;

use anyhow::{Result, anyhow};

use crate::platform::playback::PlaybackVibrator;
use crate::platform::simulated::SimulatedMotor;
use crate::platform::timed_output::TimedOutputMotor;

pub const DEFAULT_TIMED_OUTPUT_PATH: &str = "/sys/class/timed_output/vibrator/enable";

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BackendKind {
    Auto,
    Simulated,
    TimedOutput,
}

/// The platform vibration capability. Patterns follow the
/// `[wait, vibrate, wait, vibrate, ...]` layout and start with a wait.
pub trait Vibrator: Send {
    fn vibrate(&mut self, duration_ms: u64) -> Result<()>;
    fn vibrate_pattern(&mut self, pattern_ms: &[u64], repeat: bool) -> Result<()>;
    /// Stops any running vibration. Never fails observably.
    fn cancel(&mut self);
    fn is_active(&self) -> bool;
    /// Blocks until playback ends or `timeout` elapses. Returns `true` when idle.
    fn wait_idle(&mut self, timeout: Option<Duration>) -> bool;
    fn label(&self) -> &'static str;
}

pub struct SelectedBackend {
    pub vibrator: Box<dyn Vibrator>,
    pub label: &'static str,
    pub hardware_backed: bool,
    pub fallback_reason: Option<String>,
}

pub fn select_backend(kind: BackendKind, timed_output_path: &Path) -> Result<SelectedBackend> {
    match kind {
        BackendKind::Simulated => Ok(simulated_backend(None)),
        BackendKind::TimedOutput => {
            let motor = TimedOutputMotor::try_new(timed_output_path)
                .map_err(|err| anyhow!("timed_output vibrator unavailable: {err}"))?;
            Ok(timed_output_backend(motor))
        }
        BackendKind::Auto => match TimedOutputMotor::try_new(timed_output_path) {
            Ok(motor) => Ok(timed_output_backend(motor)),
            Err(err) => Ok(simulated_backend(Some(format!(
                "Vibrator hardware not detected, using simulated motor: {err}"
            )))),
        },
    }
}

fn simulated_backend(fallback_reason: Option<String>) -> SelectedBackend {
    let vibrator = PlaybackVibrator::new(SimulatedMotor::new());
    SelectedBackend {
        label: vibrator.label(),
        vibrator: Box::new(vibrator),
        hardware_backed: false,
        fallback_reason,
    }
}

fn timed_output_backend(motor: TimedOutputMotor) -> SelectedBackend {
    let vibrator = PlaybackVibrator::new(motor);
    SelectedBackend {
        label: vibrator.label(),
        vibrator: Box::new(vibrator),
        hardware_backed: true,
        fallback_reason: None,
    }
}
