pub mod chroma;
pub mod templates;

use crate::audio::{self, DecodeError};
use chroma::{ANALYSIS_RATE, HOP_LENGTH};
use serde::{Deserialize, Serialize};
use std::path::Path;
use templates::ChordTemplate;
use thiserror::Error;

/// Label used when no template scores above the floor (e.g. NaN input).
pub const UNKNOWN_CHORD: &str = "Unknown";

/// Change points closer than this to the last kept one are treated as flicker.
pub const FLICKER_SECS: f64 = 0.3;

#[derive(Error, Debug)]
pub enum ChordError {
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("Expected {expected} Hz mono samples, got {actual} Hz")]
    SampleRate { expected: u32, actual: u32 },
}

/// A chord change point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChordEvent {
    /// Seconds from the start of the signal, rounded to centiseconds.
    pub time: f64,
    pub chord: String,
}

impl ChordEvent {
    pub fn new(time: f64, chord: impl Into<String>) -> Self {
        Self {
            time,
            chord: chord.into(),
        }
    }
}

/// Template-matching chord recognizer.
///
/// Holds only the immutable template bank, so one instance is built at
/// startup and shared by reference across threads.
pub struct ChordRecognizer {
    templates: Vec<ChordTemplate>,
}

impl Default for ChordRecognizer {
    fn default() -> Self {
        Self::new()
    }
}

impl ChordRecognizer {
    pub fn new() -> Self {
        Self {
            templates: templates::build_templates(),
        }
    }

    pub fn templates(&self) -> &[ChordTemplate] {
        &self.templates
    }

    /// Detect chord change points in mono samples at 22050 Hz.
    pub fn detect_chords(
        &self,
        samples: &[f32],
        sample_rate: u32,
    ) -> Result<Vec<ChordEvent>, ChordError> {
        if sample_rate != ANALYSIS_RATE {
            return Err(ChordError::SampleRate {
                expected: ANALYSIS_RATE,
                actual: sample_rate,
            });
        }
        if samples.is_empty() {
            return Ok(Vec::new());
        }

        let chroma = chroma::chroma_cens(samples, sample_rate);
        log::debug!("Chroma computed: {} frames", chroma.len());

        let mut changes: Vec<ChordEvent> = Vec::new();
        for (i, frame) in chroma.iter().enumerate() {
            let label = self.classify_frame(frame);
            let changed = changes.last().is_none_or(|last| last.chord != label);
            if changed {
                changes.push(ChordEvent::new(frame_time(i, sample_rate), label));
            }
        }

        let refined = suppress_flicker(&changes);
        log::info!(
            "Chord analysis complete: {} change points, {} after flicker suppression",
            changes.len(),
            refined.len()
        );
        Ok(refined)
    }

    /// Decode a file, resample to the analysis rate and detect chords.
    ///
    /// A missing file yields an empty sequence; decoding failures are errors.
    pub fn detect_chords_in_file(&self, path: &Path) -> Result<Vec<ChordEvent>, ChordError> {
        log::info!("Starting chord analysis for {}", path.display());
        if !path.exists() {
            log::error!("File not found: {}", path.display());
            return Ok(Vec::new());
        }

        let decoded = audio::load_mono(path, ANALYSIS_RATE)?;
        log::info!("Audio loaded: {:.2}s", decoded.duration_secs);
        self.detect_chords(&decoded.samples, decoded.sample_rate)
    }

    /// Best-matching template label for one chroma frame.
    ///
    /// Strictly-greater comparison means ties keep the earlier template
    /// (root-ascending, major before minor).
    fn classify_frame(&self, frame: &[f64; 12]) -> &str {
        let mut normalized = *frame;
        chroma::l2_normalize(&mut normalized);

        let mut best = UNKNOWN_CHORD;
        let mut best_sim = -1.0_f64;
        for template in &self.templates {
            let sim: f64 = normalized
                .iter()
                .zip(&template.vector)
                .map(|(a, b)| a * b)
                .sum();
            if sim > best_sim {
                best_sim = sim;
                best = &template.label;
            }
        }
        best
    }
}

fn frame_time(frame: usize, sample_rate: u32) -> f64 {
    let secs = (frame * HOP_LENGTH) as f64 / sample_rate as f64;
    (secs * 100.0).round() / 100.0
}

/// Drop change points that follow the last kept one by `FLICKER_SECS` or less.
///
/// Single forward pass: the first event is always kept, and a dropped event
/// does not move the baseline.
pub fn suppress_flicker(events: &[ChordEvent]) -> Vec<ChordEvent> {
    let mut kept: Vec<ChordEvent> = Vec::with_capacity(events.len());
    for event in events {
        match kept.last() {
            None => kept.push(event.clone()),
            Some(last) => {
                // tolerance absorbs centisecond rounding
                if event.time - last.time > FLICKER_SECS + 1e-9 {
                    kept.push(event.clone());
                }
            }
        }
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synth(chords: &[(&[f32], f32)]) -> Vec<f32> {
        let mut out = Vec::new();
        for (freqs, secs) in chords {
            let n = (ANALYSIS_RATE as f32 * secs) as usize;
            for i in 0..n {
                let t = i as f32 / ANALYSIS_RATE as f32;
                let s: f32 = freqs
                    .iter()
                    .map(|f| (2.0 * std::f32::consts::PI * f * t).sin())
                    .sum();
                out.push(s / freqs.len() as f32 * 0.5);
            }
        }
        out
    }

    const C_MAJOR: &[f32] = &[261.63, 329.63, 392.00];
    const A_MINOR: &[f32] = &[220.00, 261.63, 329.63];

    #[test]
    fn test_flicker_drops_short_change() {
        let events = vec![
            ChordEvent::new(0.0, "C"),
            ChordEvent::new(0.1, "G"),
            ChordEvent::new(0.5, "C"),
        ];
        let kept = suppress_flicker(&events);
        assert_eq!(kept, vec![ChordEvent::new(0.0, "C"), ChordEvent::new(0.5, "C")]);
    }

    #[test]
    fn test_flicker_keeps_first_event() {
        let kept = suppress_flicker(&[ChordEvent::new(0.05, "Am")]);
        assert_eq!(kept, vec![ChordEvent::new(0.05, "Am")]);
    }

    #[test]
    fn test_flicker_baseline_is_last_kept() {
        // 0.2 and 0.3 are both within 0.3 of 0.0; 0.35 is not.
        let events = vec![
            ChordEvent::new(0.0, "C"),
            ChordEvent::new(0.2, "G"),
            ChordEvent::new(0.3, "Am"),
            ChordEvent::new(0.35, "F"),
        ];
        let kept = suppress_flicker(&events);
        assert_eq!(kept, vec![ChordEvent::new(0.0, "C"), ChordEvent::new(0.35, "F")]);
    }

    #[test]
    fn test_flicker_boundary_is_inclusive() {
        let events = vec![ChordEvent::new(1.0, "C"), ChordEvent::new(1.3, "G")];
        assert_eq!(suppress_flicker(&events).len(), 1);
    }

    #[test]
    fn test_flicker_empty() {
        assert!(suppress_flicker(&[]).is_empty());
    }

    #[test]
    fn test_tie_breaks_to_major_before_minor() {
        let r = ChordRecognizer::new();
        // C and E only: equally close to C (C E G) and Am (A C E).
        let mut frame = [0.0_f64; 12];
        frame[0] = 1.0;
        frame[4] = 1.0;
        assert_eq!(r.classify_frame(&frame), "C");
    }

    #[test]
    fn test_tie_on_zero_frame_picks_first_template() {
        let r = ChordRecognizer::new();
        assert_eq!(r.classify_frame(&[0.0; 12]), "C");
    }

    #[test]
    fn test_nan_frame_is_unknown() {
        let r = ChordRecognizer::new();
        assert_eq!(r.classify_frame(&[f64::NAN; 12]), UNKNOWN_CHORD);
    }

    #[test]
    fn test_exact_triad_matches_its_template() {
        let r = ChordRecognizer::new();
        for t in r.templates() {
            assert_eq!(r.classify_frame(&t.vector), t.label);
        }
    }

    #[test]
    fn test_rejects_wrong_sample_rate() {
        let r = ChordRecognizer::new();
        let err = r.detect_chords(&[0.0; 1024], 44100).unwrap_err();
        assert!(matches!(err, ChordError::SampleRate { actual: 44100, .. }));
    }

    #[test]
    fn test_empty_signal_gives_no_events() {
        let r = ChordRecognizer::new();
        assert!(r.detect_chords(&[], ANALYSIS_RATE).unwrap().is_empty());
    }

    #[test]
    fn test_detects_c_then_a_minor() {
        let r = ChordRecognizer::new();
        let samples = synth(&[(C_MAJOR, 3.0), (A_MINOR, 3.0)]);
        let events = r.detect_chords(&samples, ANALYSIS_RATE).unwrap();

        assert_eq!(events[0].time, 0.0);
        assert_eq!(events[0].chord, "C");
        assert!(events.iter().any(|e| e.chord == "Am" && e.time > 2.0 && e.time < 4.0));
        // change points only
        for pair in events.windows(2) {
            assert!(pair[1].time - pair[0].time > FLICKER_SECS);
        }
    }

    #[test]
    fn test_missing_file_gives_empty_sequence() {
        let r = ChordRecognizer::new();
        let events = r
            .detect_chords_in_file(Path::new("/nonexistent/stem.wav"))
            .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn test_undecodable_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.wav");
        std::fs::write(&path, b"not audio at all").unwrap();

        let r = ChordRecognizer::new();
        assert!(matches!(
            r.detect_chords_in_file(&path),
            Err(ChordError::Decode(_))
        ));
    }
}
