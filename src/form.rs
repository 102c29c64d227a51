//! Headless model of the vibration form: two text fields, a repeat toggle and
//! the error line shown under them.

use serde::Serialize;

use crate::dispatch::{self, DispatchError, VibrationRequest};
use crate::input::{normalize_duration, normalize_pattern};
use crate::platform::Vibrator;

pub const DEFAULT_DURATION_TEXT: &str = "500";

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct FormState {
    duration_text: String,
    pattern_text: String,
    repeat: bool,
    error_message: String,
    parsed_duration: u64,
    parsed_pattern: Vec<u64>,
}

impl Default for FormState {
    fn default() -> Self {
        Self::new(DEFAULT_DURATION_TEXT, "", false)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FormSnapshot {
    pub duration_text: String,
    pub pattern_text: String,
    pub repeat: bool,
    pub parsed_duration_ms: u64,
    pub parsed_pattern_ms: Vec<u64>,
    pub error_message: String,
}

impl FormState {
    pub fn new(duration_text: &str, pattern_text: &str, repeat: bool) -> Self {
        Self {
            duration_text: duration_text.to_string(),
            pattern_text: pattern_text.to_string(),
            repeat,
            error_message: String::new(),
            parsed_duration: normalize_duration(duration_text),
            parsed_pattern: normalize_pattern(pattern_text),
        }
    }

    pub fn set_duration_text(&mut self, text: &str) {
        self.duration_text = text.to_string();
        self.parsed_duration = normalize_duration(text);
    }

    pub fn set_pattern_text(&mut self, text: &str) {
        self.pattern_text = text.to_string();
        self.parsed_pattern = normalize_pattern(text);
    }

    pub fn set_repeat(&mut self, repeat: bool) {
        self.repeat = repeat;
    }

    pub fn duration_text(&self) -> &str {
        &self.duration_text
    }

    pub fn pattern_text(&self) -> &str {
        &self.pattern_text
    }

    pub fn repeat(&self) -> bool {
        self.repeat
    }

    pub fn parsed_duration(&self) -> u64 {
        self.parsed_duration
    }

    pub fn parsed_pattern(&self) -> &[u64] {
        &self.parsed_pattern
    }

    /// Empty when there is nothing to report.
    pub fn error_message(&self) -> &str {
        &self.error_message
    }

    /// Vibrate button. Any previous error is cleared before dispatching.
    pub fn press_vibrate(
        &mut self,
        vibrator: &mut dyn Vibrator,
    ) -> Result<VibrationRequest, DispatchError> {
        self.error_message.clear();
        let outcome = dispatch::dispatch(
            vibrator,
            &self.parsed_pattern,
            self.parsed_duration,
            self.repeat,
        );
        if let Err(err) = &outcome {
            self.error_message = err.user_message().to_string();
        }
        outcome
    }

    /// Cancel button. The error line is left as it is.
    pub fn press_cancel(&self, vibrator: &mut dyn Vibrator) {
        dispatch::cancel(vibrator);
    }

    pub fn preview(&self) -> Result<VibrationRequest, DispatchError> {
        dispatch::plan(&self.parsed_pattern, self.parsed_duration, self.repeat)
    }

    pub fn snapshot(&self) -> FormSnapshot {
        FormSnapshot {
            duration_text: self.duration_text.clone(),
            pattern_text: self.pattern_text.clone(),
            repeat: self.repeat,
            parsed_duration_ms: self.parsed_duration,
            parsed_pattern_ms: self.parsed_pattern.clone(),
            error_message: self.error_message.clone(),
        }
    }
}
