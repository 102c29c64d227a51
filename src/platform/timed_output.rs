use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use log::debug;

use crate::platform::playback::Motor;

/// Vibrator exposed through the Linux `timed_output` class. Writing a
/// millisecond count to `enable` runs the motor for that long, writing `0`
/// stops it.
pub struct TimedOutputMotor {
    enable_path: PathBuf,
}

impl TimedOutputMotor {
    pub fn try_new(enable_path: &Path) -> Result<Self> {
        if !enable_path.exists() {
            bail!("no timed_output control file at {}", enable_path.display());
        }
        let mut motor = Self {
            enable_path: enable_path.to_path_buf(),
        };
        motor.ready()?;
        Ok(motor)
    }

    fn write_enable(&self, value: u64) -> Result<()> {
        fs::write(&self.enable_path, value.to_string())
            .with_context(|| format!("unable to write {}", self.enable_path.display()))
    }
}

impl Motor for TimedOutputMotor {
    fn ready(&mut self) -> Result<()> {
        OpenOptions::new()
            .write(true)
            .open(&self.enable_path)
            .map(|_| ())
            .with_context(|| format!("{} is not writable", self.enable_path.display()))
    }

    fn pulse(&mut self, duration_ms: u64) -> Result<()> {
        debug!("timed_output enable <- {duration_ms}");
        self.write_enable(duration_ms)
    }

    fn stop(&mut self) -> Result<()> {
        self.write_enable(0)
    }

    fn label(&self) -> &'static str {
        "TIMED_OUTPUT"
    }
}
