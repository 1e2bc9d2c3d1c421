//! Per-file health checks for MIDI and audio content
//!
//! Checkers never modify the files they inspect. Every check that fails
//! contributes a named [`HealthViolation`]; a file can collect several.

pub mod audio;
pub mod midi;

use crate::report::{utc_timestamp, Status};
use rayon::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};

pub use audio::{check_audio_file, AudioMetadata};
pub use midi::{check_midi_file, MidiMetadata};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// The file is unusable
    Critical,
    /// Suspicious but usable; fails only under strict policy
    Warning,
}

/// One failed check with what was measured and the limit it crossed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthViolation {
    pub check: &'static str,
    pub measured: Option<f64>,
    pub threshold: Option<f64>,
    pub severity: Severity,
    pub message: String,
}

impl HealthViolation {
    pub fn warning(check: &'static str, measured: f64, threshold: f64, message: String) -> Self {
        Self {
            check,
            measured: Some(measured),
            threshold: Some(threshold),
            severity: Severity::Warning,
            message,
        }
    }

    pub fn critical(check: &'static str, message: String) -> Self {
        Self {
            check,
            measured: None,
            threshold: None,
            severity: Severity::Critical,
            message,
        }
    }

    pub fn is_critical(&self) -> bool {
        self.severity == Severity::Critical
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FileMetadata {
    Midi(MidiMetadata),
    Audio(AudioMetadata),
}

/// Diagnostic record for one file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub file: String,
    /// No critical violation
    pub valid: bool,
    pub violations: Vec<HealthViolation>,
    /// Absent when the file could not be read
    pub metadata: Option<FileMetadata>,
    /// No violation at all
    pub pass: bool,
}

impl HealthReport {
    pub fn new(file: &Path, violations: Vec<HealthViolation>, metadata: Option<FileMetadata>) -> Self {
        Self {
            file: file.display().to_string(),
            valid: !violations.iter().any(HealthViolation::is_critical),
            pass: violations.is_empty(),
            violations,
            metadata,
        }
    }

    pub fn has_check(&self, check: &str) -> bool {
        self.violations.iter().any(|v| v.check == check)
    }

    pub fn has_warnings(&self) -> bool {
        self.violations.iter().any(|v| !v.is_critical())
    }
}

/// Aggregate over a batch of checked files
#[derive(Debug, Clone, Serialize)]
pub struct HealthSummary {
    pub status: Status,
    pub strict: bool,
    pub total_files: usize,
    pub valid_files: usize,
    pub invalid_files: usize,
    pub passed_files: usize,
    pub files_with_warnings: usize,
    pub timestamp: String,
    /// Sorted by file path
    pub results: Vec<HealthReport>,
}

impl HealthSummary {
    /// Invalid files always fail the batch; under `strict` any violation does
    pub fn from_results(mut results: Vec<HealthReport>, strict: bool) -> Self {
        results.sort_by(|a, b| a.file.cmp(&b.file));

        let valid_files = results.iter().filter(|r| r.valid).count();
        let passed_files = results.iter().filter(|r| r.pass).count();
        let files_with_warnings = results.iter().filter(|r| r.has_warnings()).count();
        let invalid_files = results.len() - valid_files;
        let passed = if strict {
            passed_files == results.len()
        } else {
            invalid_files == 0
        };

        Self {
            status: Status::from_passed(passed),
            strict,
            total_files: results.len(),
            valid_files,
            invalid_files,
            passed_files,
            files_with_warnings,
            timestamp: utc_timestamp(),
            results,
        }
    }
}

/// Run `check` over `files` on the rayon pool
pub fn check_all<F>(files: &[PathBuf], check: F) -> Vec<HealthReport>
where
    F: Fn(&Path) -> HealthReport + Sync,
{
    files.par_iter().map(|path| check(path)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(name: &str, violations: Vec<HealthViolation>) -> HealthReport {
        HealthReport::new(Path::new(name), violations, None)
    }

    #[test]
    fn test_validity_and_pass() {
        let warn = HealthViolation::warning("pitch_above_range", 125.0, 120.0, String::new());
        let crit = HealthViolation::critical("no_notes", String::new());

        let clean = report("a.mid", vec![]);
        assert!(clean.valid && clean.pass);

        let warned = report("b.mid", vec![warn]);
        assert!(warned.valid && !warned.pass);

        let broken = report("c.mid", vec![crit]);
        assert!(!broken.valid && !broken.pass);
    }

    #[test]
    fn test_summary_strict_policy() {
        let results = || {
            vec![
                report("b.mid", vec![HealthViolation::warning("x", 1.0, 0.0, String::new())]),
                report("a.mid", vec![]),
            ]
        };

        let lenient = HealthSummary::from_results(results(), false);
        assert_eq!(lenient.status, Status::Pass);
        assert_eq!(lenient.files_with_warnings, 1);
        assert_eq!(lenient.results[0].file, "a.mid");

        let strict = HealthSummary::from_results(results(), true);
        assert_eq!(strict.status, Status::Fail);
    }
}
