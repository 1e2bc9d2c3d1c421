//! MIDI health checks

use super::{FileMetadata, HealthReport, HealthViolation};
use crate::config::MidiHealthConfig;
use crate::midi::{summarize, MidiSummary};
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MidiMetadata {
    pub format: u8,
    pub track_count: usize,
    pub ticks_per_beat: Option<u16>,
    pub note_count: usize,
    pub duration_sec: f64,
    pub pitch_min: Option<u8>,
    pub pitch_max: Option<u8>,
}

impl From<&MidiSummary> for MidiMetadata {
    fn from(summary: &MidiSummary) -> Self {
        let range = summary.pitch_range();
        Self {
            format: summary.format,
            track_count: summary.track_count,
            ticks_per_beat: summary.ticks_per_beat,
            note_count: summary.note_count(),
            duration_sec: summary.duration_sec,
            pitch_min: range.map(|(min, _)| min),
            pitch_max: range.map(|(_, max)| max),
        }
    }
}

/// Violations for an already decoded file
pub fn evaluate(summary: &MidiSummary, config: &MidiHealthConfig) -> Vec<HealthViolation> {
    let mut violations = Vec::new();

    let Some((min, max)) = summary.pitch_range() else {
        violations.push(HealthViolation::critical(
            "no_notes",
            "No notes found in MIDI file".to_string(),
        ));
        return violations;
    };

    if min < config.min_pitch {
        violations.push(HealthViolation::warning(
            "pitch_below_range",
            min as f64,
            config.min_pitch as f64,
            format!("Pitch {} is below extended range (min: {})", min, config.min_pitch),
        ));
    }
    if max > config.max_pitch {
        violations.push(HealthViolation::warning(
            "pitch_above_range",
            max as f64,
            config.max_pitch as f64,
            format!("Pitch {} is above extended range (max: {})", max, config.max_pitch),
        ));
    }

    let duration = summary.duration_sec;
    if duration < config.min_duration_sec {
        violations.push(HealthViolation::warning(
            "duration_too_short",
            duration,
            config.min_duration_sec,
            format!(
                "Duration {:.2}s is below minimum ({}s)",
                duration, config.min_duration_sec
            ),
        ));
    }
    if duration > config.max_duration_sec {
        violations.push(HealthViolation::warning(
            "duration_too_long",
            duration,
            config.max_duration_sec,
            format!(
                "Duration {:.2}s exceeds maximum ({}s)",
                duration, config.max_duration_sec
            ),
        ));
    }

    violations
}

/// Check MIDI bytes that came from `file`
pub fn check_midi_bytes(file: &Path, bytes: &[u8], config: &MidiHealthConfig) -> HealthReport {
    match summarize(bytes) {
        Ok(summary) => {
            let violations = evaluate(&summary, config);
            HealthReport::new(
                file,
                violations,
                Some(FileMetadata::Midi(MidiMetadata::from(&summary))),
            )
        }
        Err(e) => HealthReport::new(
            file,
            vec![HealthViolation::critical(
                "unparseable",
                format!("Failed to load MIDI file: {}", e),
            )],
            None,
        ),
    }
}

pub fn check_midi_file(path: &Path, config: &MidiHealthConfig) -> HealthReport {
    debug!(file = %path.display(), "Checking MIDI");
    match fs::read(path) {
        Ok(bytes) => check_midi_bytes(path, &bytes, config),
        Err(e) => HealthReport::new(
            path,
            vec![HealthViolation::critical(
                "unparseable",
                format!("Failed to read MIDI file: {}", e),
            )],
            None,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EncoderConfig;
    use crate::midi::encode;
    use crate::note::{Note, NoteSequence};

    fn encoded(notes: Vec<Note>) -> Vec<u8> {
        encode(&NoteSequence::new(notes), &EncoderConfig::default())
            .unwrap()
            .bytes
    }

    #[test]
    fn test_healthy_file_passes() {
        let bytes = encoded(vec![Note::new(0.0, 1.0, 60.0), Note::new(1.0, 2.5, 67.0)]);
        let report = check_midi_bytes(Path::new("ok.mid"), &bytes, &MidiHealthConfig::default());
        assert!(report.pass, "{:?}", report.violations);
        match report.metadata {
            Some(FileMetadata::Midi(meta)) => {
                assert_eq!(meta.note_count, 2);
                assert_eq!(meta.pitch_min, Some(60));
                assert_eq!(meta.pitch_max, Some(67));
                assert!((meta.duration_sec - 2.5).abs() < 1e-6);
            }
            other => panic!("unexpected metadata {:?}", other),
        }
    }

    #[test]
    fn test_empty_file_is_invalid() {
        let bytes = encoded(vec![]);
        let report = check_midi_bytes(Path::new("empty.mid"), &bytes, &MidiHealthConfig::default());
        assert!(!report.valid);
        assert!(report.has_check("no_notes"));
    }

    #[test]
    fn test_pitch_out_of_range_is_warning() {
        let bytes = encoded(vec![Note::new(0.0, 2.0, 5.0), Note::new(2.0, 4.0, 125.0)]);
        let report = check_midi_bytes(Path::new("wide.mid"), &bytes, &MidiHealthConfig::default());
        assert!(report.valid);
        assert!(!report.pass);
        assert!(report.has_check("pitch_below_range"));
        assert!(report.has_check("pitch_above_range"));
    }

    #[test]
    fn test_garbage_is_unparseable() {
        let report = check_midi_bytes(
            Path::new("junk.mid"),
            b"not a midi file",
            &MidiHealthConfig::default(),
        );
        assert!(!report.valid);
        assert!(report.has_check("unparseable"));
        assert!(report.metadata.is_none());
    }
}
