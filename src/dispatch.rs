use log::{info, warn};
use serde::Serialize;
use thiserror::Error;

use crate::platform::Vibrator;

pub const VALIDATION_MESSAGE: &str = "Enter a valid time (> 0 ms) or a pattern.";
pub const PLATFORM_MESSAGE: &str = "Could not start vibration.";

/// The platform call chosen for a set of normalized inputs.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VibrationRequest {
    Duration { duration_ms: u64 },
    Pattern { pattern_ms: Vec<u64>, repeat: bool },
}

impl std::fmt::Display for VibrationRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VibrationRequest::Duration { duration_ms } => {
                write!(f, "duration {duration_ms} ms")
            }
            VibrationRequest::Pattern { pattern_ms, repeat } => {
                write!(f, "pattern {pattern_ms:?} (repeat: {repeat})")
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no positive duration and no pattern supplied")]
    Validation,
    #[error("vibration capability failed: {0:#}")]
    Platform(anyhow::Error),
}

impl DispatchError {
    /// The string shown to the user for this error.
    pub fn user_message(&self) -> &'static str {
        match self {
            DispatchError::Validation => VALIDATION_MESSAGE,
            DispatchError::Platform(_) => PLATFORM_MESSAGE,
        }
    }
}

/// Decides which call a dispatch would make. A non-empty pattern wins over the
/// duration; the repeat flag only applies to patterns.
pub fn plan(pattern: &[u64], duration_ms: u64, repeat: bool) -> Result<VibrationRequest, DispatchError> {
    if !pattern.is_empty() {
        return Ok(VibrationRequest::Pattern {
            pattern_ms: pattern.to_vec(),
            repeat,
        });
    }
    if duration_ms > 0 {
        return Ok(VibrationRequest::Duration { duration_ms });
    }
    Err(DispatchError::Validation)
}

pub fn dispatch(
    vibrator: &mut dyn Vibrator,
    pattern: &[u64],
    duration_ms: u64,
    repeat: bool,
) -> Result<VibrationRequest, DispatchError> {
    let request = plan(pattern, duration_ms, repeat)?;
    let outcome = match &request {
        VibrationRequest::Pattern { pattern_ms, repeat } => {
            vibrator.vibrate_pattern(pattern_ms, *repeat)
        }
        VibrationRequest::Duration { duration_ms } => vibrator.vibrate(*duration_ms),
    };
    match outcome {
        Ok(()) => {
            info!("dispatched {request} to {}", vibrator.label());
            Ok(request)
        }
        Err(err) => {
            warn!("{} rejected {request}: {err:#}", vibrator.label());
            Err(DispatchError::Platform(err))
        }
    }
}

pub fn cancel(vibrator: &mut dyn Vibrator) {
    vibrator.cancel();
    info!("cancel requested on {}", vibrator.label());
}

#[cfg(test)]
pub(crate) mod tests {
    use std::time::Duration;

    use anyhow::{Result, bail};

    use super::*;

    #[derive(Debug, Clone, Eq, PartialEq)]
    pub enum Call {
        Vibrate(u64),
        Pattern(Vec<u64>, bool),
        Cancel,
    }

    /// Vibrator double that records calls and can be told to fail.
    #[derive(Default)]
    pub struct RecordingVibrator {
        pub calls: Vec<Call>,
        pub fail: bool,
    }

    impl Vibrator for RecordingVibrator {
        fn vibrate(&mut self, duration_ms: u64) -> Result<()> {
            if self.fail {
                bail!("motor offline");
            }
            self.calls.push(Call::Vibrate(duration_ms));
            Ok(())
        }

        fn vibrate_pattern(&mut self, pattern_ms: &[u64], repeat: bool) -> Result<()> {
            if self.fail {
                bail!("motor offline");
            }
            self.calls.push(Call::Pattern(pattern_ms.to_vec(), repeat));
            Ok(())
        }

        fn cancel(&mut self) {
            self.calls.push(Call::Cancel);
        }

        fn is_active(&self) -> bool {
            false
        }

        fn wait_idle(&mut self, _timeout: Option<Duration>) -> bool {
            true
        }

        fn label(&self) -> &'static str {
            "RECORDING"
        }
    }

    #[test]
    fn positive_duration_without_pattern_vibrates_once() {
        let mut vibrator = RecordingVibrator::default();
        let request = dispatch(&mut vibrator, &[], 500, true).expect("dispatch");
        assert_eq!(request, VibrationRequest::Duration { duration_ms: 500 });
        assert_eq!(vibrator.calls, vec![Call::Vibrate(500)]);
    }

    #[test]
    fn pattern_takes_precedence_over_duration() {
        let mut vibrator = RecordingVibrator::default();
        let request = dispatch(&mut vibrator, &[0, 300, 200, 300], 999, true).expect("dispatch");
        assert_eq!(
            request,
            VibrationRequest::Pattern {
                pattern_ms: vec![0, 300, 200, 300],
                repeat: true
            }
        );
        assert_eq!(
            vibrator.calls,
            vec![Call::Pattern(vec![0, 300, 200, 300], true)]
        );
    }

    #[test]
    fn nothing_valid_is_a_validation_error_without_platform_call() {
        let mut vibrator = RecordingVibrator::default();
        let err = dispatch(&mut vibrator, &[], 0, false).expect_err("must fail");
        assert!(matches!(err, DispatchError::Validation));
        assert_eq!(err.user_message(), VALIDATION_MESSAGE);
        assert!(vibrator.calls.is_empty());
    }

    #[test]
    fn platform_failure_becomes_generic_error() {
        let mut vibrator = RecordingVibrator {
            fail: true,
            ..Default::default()
        };
        let err = dispatch(&mut vibrator, &[], 250, false).expect_err("must fail");
        assert!(matches!(err, DispatchError::Platform(_)));
        assert_eq!(err.user_message(), PLATFORM_MESSAGE);
        assert!(err.to_string().contains("motor offline"));
    }

    #[test]
    fn cancel_always_reaches_the_platform() {
        let mut vibrator = RecordingVibrator::default();
        cancel(&mut vibrator);
        cancel(&mut vibrator);
        assert_eq!(vibrator.calls, vec![Call::Cancel, Call::Cancel]);
    }

    #[test]
    fn plan_previews_without_side_effects() {
        assert_eq!(
            plan(&[0, 100, 50], 0, false).expect("plan"),
            VibrationRequest::Pattern {
                pattern_ms: vec![0, 100, 50],
                repeat: false
            }
        );
        assert!(matches!(plan(&[], 0, true), Err(DispatchError::Validation)));
    }
}
