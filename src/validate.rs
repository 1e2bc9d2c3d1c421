//! Dataset validator
//!
//! Cross-checks a manifest against the files on disk. Every violation is
//! collected; nothing is repaired and nothing stops the run early.

use crate::config::ManifestConfig;
use crate::error::Result;
use crate::manifest::{sha256_file, variation_status, Emotion, ManifestRow};
use crate::report::{utc_timestamp, Status};
use crate::scan::{normalize_relpath, relative_path, FileScanner};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, info, warn};

/// One integrity problem found in the dataset
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntegrityViolation {
    /// A file referenced by a row does not exist
    MissingFile { row_id: String, file: String },
    /// File content no longer matches the stored hash
    ChecksumMismatch {
        row_id: String,
        file: String,
        expected: String,
        actual: String,
    },
    /// A referenced file exists but could not be read
    UnreadableFile {
        row_id: String,
        file: String,
        error: String,
    },
    DuplicateId { row_id: String, occurrences: usize },
    /// A raw file that no row references
    OrphanFile { file: String },
    /// A raw file referenced by more than one row
    MultiplyClaimed { file: String, row_ids: Vec<String> },
    IncompleteVariations {
        song_name: String,
        present: Vec<Emotion>,
        missing: Vec<Emotion>,
    },
    /// Stored `has_emotional_variations` disagrees with the song's takes
    VariationFlagMismatch {
        row_id: String,
        song_name: String,
        stored: bool,
        expected: bool,
    },
}

impl IntegrityViolation {
    pub fn kind(&self) -> &'static str {
        match self {
            IntegrityViolation::MissingFile { .. } => "missing_file",
            IntegrityViolation::ChecksumMismatch { .. } => "checksum_mismatch",
            IntegrityViolation::UnreadableFile { .. } => "unreadable_file",
            IntegrityViolation::DuplicateId { .. } => "duplicate_id",
            IntegrityViolation::OrphanFile { .. } => "orphan_file",
            IntegrityViolation::MultiplyClaimed { .. } => "multiply_claimed",
            IntegrityViolation::IncompleteVariations { .. } => "incomplete_variations",
            IntegrityViolation::VariationFlagMismatch { .. } => "variation_flag_mismatch",
        }
    }

    /// Manifest row the violation belongs to, if any
    pub fn row_id(&self) -> Option<&str> {
        match self {
            IntegrityViolation::MissingFile { row_id, .. }
            | IntegrityViolation::ChecksumMismatch { row_id, .. }
            | IntegrityViolation::UnreadableFile { row_id, .. }
            | IntegrityViolation::DuplicateId { row_id, .. }
            | IntegrityViolation::VariationFlagMismatch { row_id, .. } => Some(row_id),
            _ => None,
        }
    }

    fn sort_key(&self) -> (&'static str, &str) {
        let subject = match self {
            IntegrityViolation::MissingFile { file, .. }
            | IntegrityViolation::ChecksumMismatch { file, .. }
            | IntegrityViolation::UnreadableFile { file, .. }
            | IntegrityViolation::OrphanFile { file }
            | IntegrityViolation::MultiplyClaimed { file, .. } => file.as_str(),
            IntegrityViolation::DuplicateId { row_id, .. } => row_id.as_str(),
            IntegrityViolation::IncompleteVariations { song_name, .. }
            | IntegrityViolation::VariationFlagMismatch { song_name, .. } => song_name.as_str(),
        };
        (self.kind(), subject)
    }
}

/// Validation run result, serialized as the JSON report
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub status: Status,
    pub total_pairs: usize,
    pub unique_songs: usize,
    pub songs_with_variations: usize,
    pub songs_without_variations: usize,
    pub violation_counts: BTreeMap<String, usize>,
    pub violations: Vec<IntegrityViolation>,
    pub timestamp: String,
}

impl ValidationReport {
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn violations_for_row(&self, row_id: &str) -> Vec<&IntegrityViolation> {
        self.violations
            .iter()
            .filter(|v| v.row_id() == Some(row_id))
            .collect()
    }
}

fn check_file(root: &Path, row_id: &str, relpath: &str, expected: &str) -> Option<IntegrityViolation> {
    let path = root.join(normalize_relpath(relpath));
    if !path.is_file() {
        return Some(IntegrityViolation::MissingFile {
            row_id: row_id.to_string(),
            file: relpath.to_string(),
        });
    }
    match sha256_file(&path) {
        Ok(actual) if actual.eq_ignore_ascii_case(expected) => None,
        Ok(actual) => Some(IntegrityViolation::ChecksumMismatch {
            row_id: row_id.to_string(),
            file: relpath.to_string(),
            expected: expected.to_string(),
            actual,
        }),
        Err(e) => Some(IntegrityViolation::UnreadableFile {
            row_id: row_id.to_string(),
            file: relpath.to_string(),
            error: e.to_string(),
        }),
    }
}

/// Raw files under one configured directory, as forward-slash relpaths
fn raw_files(root: &Path, dir: &str, extensions: &[String]) -> Result<Vec<String>> {
    let path = root.join(normalize_relpath(dir));
    if !path.is_dir() {
        warn!(dir = %path.display(), "Raw directory missing, orphan check skipped");
        return Ok(Vec::new());
    }
    Ok(FileScanner::new(extensions)
        .scan(&path)?
        .iter()
        .filter_map(|file| relative_path(root, file))
        .collect())
}

/// Check `rows` against the files under `root`
pub fn validate_dataset(
    root: &Path,
    rows: &[ManifestRow],
    config: &ManifestConfig,
) -> Result<ValidationReport> {
    let mut violations: Vec<IntegrityViolation> = rows
        .par_iter()
        .flat_map_iter(|row| {
            debug!(id = %row.id, "Verifying row");
            [
                check_file(root, &row.id, &row.audio_relpath, &row.audio_sha256),
                check_file(root, &row.id, &row.midi_relpath, &row.midi_sha256),
            ]
            .into_iter()
            .flatten()
        })
        .collect();

    let mut id_counts: BTreeMap<&str, usize> = BTreeMap::new();
    for row in rows {
        *id_counts.entry(row.id.as_str()).or_insert(0) += 1;
    }
    violations.extend(
        id_counts
            .into_iter()
            .filter(|(_, count)| *count > 1)
            .map(|(id, occurrences)| IntegrityViolation::DuplicateId {
                row_id: id.to_string(),
                occurrences,
            }),
    );

    let mut claims: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for row in rows {
        for relpath in [&row.audio_relpath, &row.midi_relpath] {
            claims
                .entry(normalize_relpath(relpath))
                .or_default()
                .push(row.id.clone());
        }
    }

    let mut on_disk = raw_files(root, &config.audio_dir, &config.audio_extensions)?;
    on_disk.extend(raw_files(root, &config.midi_dir, &config.midi_extensions)?);
    for file in on_disk {
        if !claims.contains_key(&file) {
            violations.push(IntegrityViolation::OrphanFile { file });
        }
    }
    for (file, row_ids) in claims {
        if row_ids.len() > 1 {
            violations.push(IntegrityViolation::MultiplyClaimed { file, row_ids });
        }
    }

    let (incomplete, complete) = variation_status(rows, &config.songs_with_variations);
    violations.extend(incomplete.into_iter().map(|song| {
        IntegrityViolation::IncompleteVariations {
            song_name: song.song_name,
            present: song.present,
            missing: song.missing,
        }
    }));
    violations.extend(rows.iter().filter_map(|row| {
        let expected = complete.contains(&row.song_name);
        (row.has_emotional_variations != expected).then(|| {
            IntegrityViolation::VariationFlagMismatch {
                row_id: row.id.clone(),
                song_name: row.song_name.clone(),
                stored: row.has_emotional_variations,
                expected,
            }
        })
    }));

    violations.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

    let mut violation_counts = BTreeMap::new();
    for violation in &violations {
        *violation_counts.entry(violation.kind().to_string()).or_insert(0) += 1;
    }

    let songs: BTreeSet<&str> = rows.iter().map(|r| r.song_name.as_str()).collect();
    let with: BTreeSet<&str> = rows
        .iter()
        .filter(|r| r.has_emotional_variations)
        .map(|r| r.song_name.as_str())
        .collect();
    let without: BTreeSet<&str> = rows
        .iter()
        .filter(|r| !r.has_emotional_variations)
        .map(|r| r.song_name.as_str())
        .collect();

    let report = ValidationReport {
        status: Status::from_passed(violations.is_empty()),
        total_pairs: rows.len(),
        unique_songs: songs.len(),
        songs_with_variations: with.len(),
        songs_without_variations: without.len(),
        violation_counts,
        violations,
        timestamp: utc_timestamp(),
    };

    if report.passed() {
        info!(pairs = report.total_pairs, "Validation passed");
    } else {
        warn!(
            pairs = report.total_pairs,
            violations = report.violations.len(),
            "Validation failed"
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{row_id, sha256_string};
    use std::fs;

    fn setup(root: &Path, name: &str) -> ManifestRow {
        let audio = format!("data/raw/audio/{}.wav", name);
        let midi = format!("data/raw/midi/{}.mid", name);
        for (rel, body) in [(&audio, "audio"), (&midi, "midi")] {
            let path = root.join(rel);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, format!("{} {}", body, name)).unwrap();
        }
        ManifestRow {
            id: row_id(&audio, &midi),
            song_name: name.to_string(),
            audio_sha256: sha256_string(&format!("audio {}", name)),
            midi_sha256: sha256_string(&format!("midi {}", name)),
            audio_relpath: audio,
            midi_relpath: midi,
            audio_ext: ".wav".to_string(),
            midi_ext: ".mid".to_string(),
            has_emotional_variations: false,
            emotion: None,
            notes: None,
        }
    }

    #[test]
    fn test_clean_dataset_passes() {
        let dir = tempfile::tempdir().unwrap();
        let rows = vec![setup(dir.path(), "A"), setup(dir.path(), "B")];
        let report = validate_dataset(dir.path(), &rows, &ManifestConfig::default()).unwrap();
        assert!(report.passed(), "{:?}", report.violations);
        assert_eq!(report.status, Status::Pass);
        assert_eq!(report.unique_songs, 2);
        assert_eq!(report.songs_without_variations, 2);
    }

    #[test]
    fn test_missing_file_and_orphan() {
        let dir = tempfile::tempdir().unwrap();
        let rows = vec![setup(dir.path(), "A"), setup(dir.path(), "B")];
        fs::remove_file(dir.path().join("data/raw/midi/A.mid")).unwrap();
        fs::write(dir.path().join("data/raw/audio/Stray.wav"), b"x").unwrap();

        let report = validate_dataset(dir.path(), &rows, &ManifestConfig::default()).unwrap();
        assert_eq!(report.violations.len(), 2);
        assert_eq!(report.violation_counts["missing_file"], 1);
        assert!(report.violations.contains(&IntegrityViolation::OrphanFile {
            file: "data/raw/audio/Stray.wav".to_string()
        }));
    }

    #[test]
    fn test_duplicate_rows() {
        let dir = tempfile::tempdir().unwrap();
        let row = setup(dir.path(), "A");
        let rows = vec![row.clone(), row];
        let report = validate_dataset(dir.path(), &rows, &ManifestConfig::default()).unwrap();
        assert_eq!(report.violation_counts["duplicate_id"], 1);
        assert_eq!(report.violation_counts["multiply_claimed"], 2);
    }

    #[test]
    fn test_stale_variation_flag() {
        let dir = tempfile::tempdir().unwrap();
        let mut flagged = setup(dir.path(), "A");
        flagged.has_emotional_variations = true;
        let rows = vec![flagged.clone(), setup(dir.path(), "B")];

        let report = validate_dataset(dir.path(), &rows, &ManifestConfig::default()).unwrap();
        assert_eq!(
            report.violations,
            vec![IntegrityViolation::VariationFlagMismatch {
                row_id: flagged.id.clone(),
                song_name: "A".to_string(),
                stored: true,
                expected: false,
            }]
        );
        assert_eq!(report.violations_for_row(&flagged.id).len(), 1);
    }
}
