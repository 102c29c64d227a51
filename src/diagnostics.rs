use anyhow::Result;

use crate::dispatch::VibrationRequest;
use crate::form::FormState;
use crate::platform::SelectedBackend;

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct PatternTimeline {
    pub segments: usize,
    pub total_ms: u64,
    pub vibrate_ms: u64,
    pub wait_ms: u64,
    pub pulses: usize,
    pub ends_on_vibrate: bool,
}

pub fn pattern_timeline(pattern_ms: &[u64]) -> PatternTimeline {
    let mut timeline = PatternTimeline {
        segments: pattern_ms.len(),
        ends_on_vibrate: pattern_ms.len() % 2 == 0 && !pattern_ms.is_empty(),
        ..PatternTimeline::default()
    };
    for (index, segment_ms) in pattern_ms.iter().copied().enumerate() {
        timeline.total_ms = timeline.total_ms.saturating_add(segment_ms);
        if index % 2 == 1 {
            timeline.vibrate_ms = timeline.vibrate_ms.saturating_add(segment_ms);
            if segment_ms > 0 {
                timeline.pulses += 1;
            }
        } else {
            timeline.wait_ms = timeline.wait_ms.saturating_add(segment_ms);
        }
    }
    timeline
}

pub fn run_diagnostics(selected: &SelectedBackend, form: &FormState) -> Result<()> {
    println!("vibectl diagnostics");
    println!("Selected vibration backend: {}", selected.label);
    println!("Hardware-backed motor: {}", selected.hardware_backed);
    if let Some(reason) = selected.fallback_reason.as_deref() {
        println!("Fallback reason: {reason}");
    }

    println!(
        "Duration field: {:?} -> {} ms",
        form.duration_text(),
        form.parsed_duration()
    );
    println!(
        "Pattern field: {:?} -> {:?}",
        form.pattern_text(),
        form.parsed_pattern()
    );
    println!("Repeat: {}", form.repeat());

    match form.preview() {
        Ok(request) => {
            println!("Planned request: {request}");
            if let VibrationRequest::Pattern { pattern_ms, .. } = &request {
                let timeline = pattern_timeline(pattern_ms);
                println!("Pattern timeline:");
                println!("  Segments: {}", timeline.segments);
                println!("  Pulses: {}", timeline.pulses);
                println!("  Wait total (ms): {}", timeline.wait_ms);
                println!("  Vibrate total (ms): {}", timeline.vibrate_ms);
                println!("  Cycle length (ms): {}", timeline.total_ms);
                if !timeline.ends_on_vibrate {
                    println!("  Note: pattern ends on a wait segment");
                }
            }
        }
        Err(err) => println!("Planned request: none ({})", err.user_message()),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeline_splits_wait_and_vibrate_segments() {
        let timeline = pattern_timeline(&[0, 300, 200, 300]);
        assert_eq!(timeline.segments, 4);
        assert_eq!(timeline.wait_ms, 200);
        assert_eq!(timeline.vibrate_ms, 600);
        assert_eq!(timeline.total_ms, 800);
        assert_eq!(timeline.pulses, 2);
        assert!(timeline.ends_on_vibrate);
    }

    #[test]
    fn odd_length_pattern_ends_on_wait() {
        let timeline = pattern_timeline(&[100, 0, 50]);
        assert_eq!(timeline.pulses, 0);
        assert!(!timeline.ends_on_vibrate);
    }

    #[test]
    fn empty_pattern_has_empty_timeline() {
        assert_eq!(pattern_timeline(&[]), PatternTimeline::default());
    }
}
