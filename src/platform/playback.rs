use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use log::{debug, warn};

use crate::platform::Vibrator;

/// A motor that can be switched on for a fixed time. `pulse` returns
/// immediately and the motor turns itself off once `duration_ms` has elapsed.
pub trait Motor: Send + 'static {
    /// Checked before a request is accepted so unreachable hardware fails the
    /// request instead of the background playback.
    fn ready(&mut self) -> Result<()>;
    fn pulse(&mut self, duration_ms: u64) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
    fn label(&self) -> &'static str;
}

struct Playback {
    stop_tx: Sender<()>,
    join: JoinHandle<()>,
}

/// Plays `[wait, vibrate, ...]` sequences on a [`Motor`] from a worker thread.
/// At most one playback runs at a time; a new request replaces the old one.
pub struct PlaybackVibrator<M: Motor> {
    motor: Arc<Mutex<M>>,
    label: &'static str,
    current: Option<Playback>,
}

impl<M: Motor> PlaybackVibrator<M> {
    pub fn new(motor: M) -> Self {
        let label = motor.label();
        Self {
            motor: Arc::new(Mutex::new(motor)),
            label,
            current: None,
        }
    }

    fn start(&mut self, pattern_ms: Vec<u64>, repeat: bool) -> Result<()> {
        if self.current.is_some() {
            self.halt();
        }
        lock_motor(&self.motor)?.ready()?;

        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let motor = Arc::clone(&self.motor);
        let join = thread::Builder::new()
            .name("vibectl-playback".to_string())
            .spawn(move || run_playback(motor, pattern_ms, repeat, stop_rx))
            .context("failed to spawn playback thread")?;
        self.current = Some(Playback { stop_tx, join });
        Ok(())
    }

    fn stop_current(&mut self) {
        if let Some(playback) = self.current.take() {
            let _ = playback.stop_tx.send(());
            let _ = playback.join.join();
        }
    }

    fn halt(&mut self) {
        self.stop_current();
        match lock_motor(&self.motor).and_then(|mut motor| motor.stop()) {
            Ok(()) => {}
            Err(err) => debug!("motor stop ignored: {err:#}"),
        }
    }
}

impl<M: Motor> Vibrator for PlaybackVibrator<M> {
    fn vibrate(&mut self, duration_ms: u64) -> Result<()> {
        self.start(vec![0, duration_ms], false)
    }

    fn vibrate_pattern(&mut self, pattern_ms: &[u64], repeat: bool) -> Result<()> {
        self.start(pattern_ms.to_vec(), repeat)
    }

    fn cancel(&mut self) {
        self.halt();
    }

    fn is_active(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|playback| !playback.join.is_finished())
    }

    fn wait_idle(&mut self, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        loop {
            if !self.is_active() {
                if let Some(playback) = self.current.take() {
                    let _ = playback.join.join();
                }
                return true;
            }
            match deadline {
                Some(deadline) if Instant::now() >= deadline => return false,
                Some(_) => thread::sleep(Duration::from_millis(2)),
                None => {
                    if let Some(playback) = self.current.take() {
                        let _ = playback.join.join();
                    }
                    return true;
                }
            }
        }
    }

    fn label(&self) -> &'static str {
        self.label
    }
}

impl<M: Motor> Drop for PlaybackVibrator<M> {
    fn drop(&mut self) {
        if self.current.is_some() {
            self.halt();
        }
    }
}

fn lock_motor<M: Motor>(motor: &Arc<Mutex<M>>) -> Result<std::sync::MutexGuard<'_, M>> {
    motor.lock().map_err(|_| anyhow!("motor lock poisoned"))
}

fn run_playback<M: Motor>(
    motor: Arc<Mutex<M>>,
    pattern_ms: Vec<u64>,
    repeat: bool,
    stop_rx: mpsc::Receiver<()>,
) {
    // A zero-length cycle would spin forever.
    let repeat = repeat && pattern_ms.iter().any(|ms| *ms > 0);
    let mut cycle = 0_u64;
    loop {
        for (index, segment_ms) in pattern_ms.iter().copied().enumerate() {
            let vibrating = index % 2 == 1;
            if vibrating && segment_ms > 0 {
                debug!("cycle {cycle} segment {index}: vibrate {segment_ms} ms");
                let pulsed = lock_motor(&motor).and_then(|mut motor| motor.pulse(segment_ms));
                if let Err(err) = pulsed {
                    warn!("playback aborted: {err:#}");
                    return;
                }
            } else {
                debug!("cycle {cycle} segment {index}: wait {segment_ms} ms");
            }

            match stop_rx.recv_timeout(Duration::from_millis(segment_ms)) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                    debug!("playback stopped during segment {index}");
                    return;
                }
            }
        }
        if !repeat {
            return;
        }
        cycle = cycle.saturating_add(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{self, DispatchError, PLATFORM_MESSAGE};
    use crate::platform::simulated::{MotorEvent, SimulatedMotor};

    /// Motor whose hardware never becomes reachable.
    struct OfflineMotor;

    impl Motor for OfflineMotor {
        fn ready(&mut self) -> Result<()> {
            anyhow::bail!("vibrator offline")
        }

        fn pulse(&mut self, _duration_ms: u64) -> Result<()> {
            panic!("pulse must not run when the motor is not ready");
        }

        fn stop(&mut self) -> Result<()> {
            Ok(())
        }

        fn label(&self) -> &'static str {
            "OFFLINE"
        }
    }

    #[test]
    fn unready_motor_fails_the_request_as_platform_error() {
        let mut vibrator = PlaybackVibrator::new(OfflineMotor);

        let err = dispatch::dispatch(&mut vibrator, &[], 250, false)
            .expect_err("offline motor should fail");
        assert!(matches!(err, DispatchError::Platform(_)));
        assert_eq!(err.user_message(), PLATFORM_MESSAGE);
        assert!(err.to_string().contains("vibrator offline"));
        assert!(vibrator.current.is_none());
        assert!(!vibrator.is_active());

        let err = dispatch::dispatch(&mut vibrator, &[0, 100, 50, 100], 0, true)
            .expect_err("pattern on offline motor should fail");
        assert!(matches!(err, DispatchError::Platform(_)));
        assert!(vibrator.current.is_none());
    }

    #[test]
    fn single_duration_pulses_once_and_goes_idle() {
        let motor = SimulatedMotor::new();
        let events = motor.events();
        let mut vibrator = PlaybackVibrator::new(motor);

        vibrator.vibrate(5).expect("vibrate");
        assert!(vibrator.wait_idle(Some(Duration::from_secs(2))));
        assert!(!vibrator.is_active());
        assert_eq!(events.snapshot(), vec![MotorEvent::Pulse(5)]);
    }

    #[test]
    fn pattern_pulses_only_vibrate_segments() {
        let motor = SimulatedMotor::new();
        let events = motor.events();
        let mut vibrator = PlaybackVibrator::new(motor);

        vibrator
            .vibrate_pattern(&[0, 3, 2, 4, 1], false)
            .expect("vibrate pattern");
        assert!(vibrator.wait_idle(Some(Duration::from_secs(2))));
        assert_eq!(
            events.snapshot(),
            vec![MotorEvent::Pulse(3), MotorEvent::Pulse(4)]
        );
    }

    #[test]
    fn zero_length_vibrate_segments_are_skipped() {
        let motor = SimulatedMotor::new();
        let events = motor.events();
        let mut vibrator = PlaybackVibrator::new(motor);

        vibrator.vibrate_pattern(&[1, 0, 1, 2], false).expect("play");
        assert!(vibrator.wait_idle(Some(Duration::from_secs(2))));
        assert_eq!(events.snapshot(), vec![MotorEvent::Pulse(2)]);
    }

    #[test]
    fn cancel_stops_a_repeating_pattern() {
        let motor = SimulatedMotor::new();
        let events = motor.events();
        let mut vibrator = PlaybackVibrator::new(motor);

        vibrator.vibrate_pattern(&[5, 5], true).expect("play");
        thread::sleep(Duration::from_millis(80));
        assert!(vibrator.is_active());

        vibrator.cancel();
        assert!(!vibrator.is_active());
        let recorded = events.snapshot();
        assert!(recorded.iter().filter(|e| **e == MotorEvent::Pulse(5)).count() >= 2);
        assert_eq!(recorded.last(), Some(&MotorEvent::Stop));
    }

    #[test]
    fn repeating_all_zero_pattern_plays_once() {
        let mut vibrator = PlaybackVibrator::new(SimulatedMotor::new());
        vibrator.vibrate_pattern(&[0, 0], true).expect("play");
        assert!(vibrator.wait_idle(Some(Duration::from_secs(2))));
    }

    #[test]
    fn cancel_without_playback_is_harmless() {
        let mut vibrator = PlaybackVibrator::new(SimulatedMotor::new());
        vibrator.cancel();
        vibrator.cancel();
        assert!(!vibrator.is_active());
    }

    #[test]
    fn new_request_replaces_running_playback() {
        let motor = SimulatedMotor::new();
        let events = motor.events();
        let mut vibrator = PlaybackVibrator::new(motor);

        vibrator.vibrate_pattern(&[0, 1_000], true).expect("first");
        thread::sleep(Duration::from_millis(30));
        vibrator.vibrate(2).expect("second");
        assert!(vibrator.wait_idle(Some(Duration::from_secs(2))));
        assert_eq!(
            events.snapshot(),
            vec![
                MotorEvent::Pulse(1_000),
                MotorEvent::Stop,
                MotorEvent::Pulse(2)
            ]
        );
    }
}
