//! Audio/MIDI Dataset Curation Pipeline
//!
//! Converts float-pitch CSV transcriptions into Standard MIDI files, builds a
//! deterministic manifest pairing raw audio with MIDI, validates the dataset
//! against that manifest and runs per-file health checks.

pub mod config;
pub mod convert;
pub mod csv_notes;
pub mod error;
pub mod health;
pub mod manifest;
pub mod midi;
pub mod note;
pub mod report;
pub mod scan;
pub mod validate;

pub use config::Config;
pub use convert::{BatchReport, ConversionOutcome, ConvertOptions};
pub use error::{DatasetError, Result};
pub use health::{HealthReport, HealthSummary, HealthViolation};
pub use manifest::{BuildReport, ManifestRow};
pub use note::{Note, NoteFilter, NoteSequence};
pub use validate::{IntegrityViolation, ValidationReport};

use scan::FileScanner;
use std::path::{Path, PathBuf};

/// Dataset operations bound to one configuration
pub struct DatasetPipeline {
    config: Config,
}

impl DatasetPipeline {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Conversion options using the configured encoder
    pub fn convert_options(&self, overwrite: bool, filter: NoteFilter) -> ConvertOptions {
        ConvertOptions {
            encoder: self.config.encoder.clone(),
            filter,
            overwrite,
            midi_extensions: self.config.manifest.midi_extensions.clone(),
            pairing_suffixes: self.config.manifest.processing_suffixes.clone(),
        }
    }

    /// Where the manifest lives under `root` unless given explicitly
    pub fn manifest_path(&self, root: &Path) -> PathBuf {
        root.join(scan::normalize_relpath(&self.config.manifest.manifest_path))
    }

    /// Build the manifest for `root` and write it atomically to `output`.
    ///
    /// Nothing is written when any paired file could not be hashed.
    pub fn build_manifest(&self, root: &Path, output: &Path) -> Result<BuildReport> {
        let report = manifest::build_manifest(root, &self.config.manifest)?;
        write_complete_manifest(&report, output)?;
        Ok(report)
    }

    /// Validate the dataset under `root` against the manifest at `manifest_path`
    pub fn validate(&self, root: &Path, manifest_path: &Path) -> Result<ValidationReport> {
        let rows = manifest::read_manifest(manifest_path)?;
        validate::validate_dataset(root, &rows, &self.config.manifest)
    }

    /// Health-check one MIDI file or every MIDI file directly in a directory
    pub fn check_midi(&self, path: &Path) -> Result<HealthSummary> {
        let files = select_files(path, &self.config.manifest.midi_extensions)?;
        let config = &self.config.health.midi;
        let results = health::check_all(&files, |file| health::check_midi_file(file, config));
        Ok(HealthSummary::from_results(results, self.config.health.strict))
    }

    /// Health-check one WAV file or every WAV file directly in a directory
    pub fn check_audio(&self, path: &Path) -> Result<HealthSummary> {
        let files = select_files(path, &self.config.manifest.audio_extensions)?;
        let config = &self.config.health.audio;
        let results = health::check_all(&files, |file| health::check_audio_file(file, config));
        Ok(HealthSummary::from_results(results, self.config.health.strict))
    }
}

fn write_complete_manifest(report: &BuildReport, output: &Path) -> Result<()> {
    if !report.hash_failures.is_empty() {
        let files: Vec<String> = report
            .hash_failures
            .iter()
            .map(|f| format!("{} ({})", f.file, f.error))
            .collect();
        return Err(DatasetError::Manifest(format!(
            "{} file(s) could not be hashed, {} left unchanged: {}",
            files.len(),
            output.display(),
            files.join("; ")
        )));
    }
    manifest::write_manifest(&report.rows, output)
}

fn select_files(path: &Path, extensions: &[String]) -> Result<Vec<PathBuf>> {
    let files = FileScanner::new(extensions).collect(path)?;
    if files.is_empty() {
        return Err(DatasetError::InvalidInput(format!(
            "No files with extensions [{}] in {}",
            extensions.join(", "),
            path.display()
        )));
    }
    Ok(files)
}

/// Validate configuration and input path
pub fn validate_input(input_path: &Path, config: &Config) -> Result<()> {
    if !input_path.exists() {
        return Err(DatasetError::InvalidInput(format!(
            "Path not found: {}",
            input_path.display()
        )));
    }
    config::validate_config(config).map_err(|e| DatasetError::Config(e.to_string()))?;
    Ok(())
}
