//! CSV → MIDI conversion pipeline
//!
//! One CSV file is parsed, validated, encoded and written per job. Batches
//! run on the rayon pool; a failing file is recorded and never stops the
//! others. Existing MIDI files are hand-verified data and are left alone
//! unless the caller explicitly asks to overwrite.

use crate::config::{EncoderConfig, ManifestConfig};
use crate::csv_notes::{parse_notes_file, ParseWarning, RowError};
use crate::error::{DatasetError, Result};
use crate::manifest::pairing_key;
use crate::midi::encode_filtered;
use crate::note::NoteFilter;
use crate::scan::{relative_path, FileScanner};
use rayon::prelude::*;
use serde::Serialize;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// Options shared by every job of a conversion run
#[derive(Debug, Clone)]
pub struct ConvertOptions {
    pub encoder: EncoderConfig,
    pub filter: NoteFilter,
    /// Replace MIDI files that already exist
    pub overwrite: bool,
    /// Extensions that mark a file as an existing MIDI transcription
    pub midi_extensions: Vec<String>,
    /// Suffixes ignored when matching an output against existing files
    pub pairing_suffixes: Vec<String>,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        let manifest = ManifestConfig::default();
        Self {
            encoder: EncoderConfig::default(),
            filter: NoteFilter::default(),
            overwrite: false,
            midi_extensions: manifest.midi_extensions,
            pairing_suffixes: manifest.processing_suffixes,
        }
    }
}

/// What a successful conversion produced
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConversionStats {
    pub notes: usize,
    pub row_errors: Vec<RowError>,
    pub warnings: Vec<ParseWarning>,
}

impl ConversionStats {
    /// An empty note sequence still yields a valid file, but is worth a look
    pub fn is_empty(&self) -> bool {
        self.notes == 0
    }
}

/// Result of converting one file
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConversionOutcome {
    Converted(ConversionStats),
    /// A MIDI file already existed; nothing was written
    Skipped { existing: PathBuf },
}

/// Convert one CSV transcription into a MIDI file
pub fn convert_file(
    csv_path: &Path,
    midi_path: &Path,
    options: &ConvertOptions,
) -> Result<ConversionOutcome> {
    let existing = existing_midi(midi_path, options)?;
    let target = match existing {
        Some(existing) if !options.overwrite => {
            warn!(
                midi = %existing.display(),
                "Skipping {} (MIDI exists)",
                csv_path.display()
            );
            return Ok(ConversionOutcome::Skipped { existing });
        }
        // Replaced in place so the song keeps a single transcription
        Some(existing) => existing,
        None => midi_path.to_path_buf(),
    };
    let midi_path = target.as_path();

    let parsed = parse_notes_file(csv_path)?;
    let filter = options.filter;
    let encoded = encode_filtered(&parsed.notes, &options.encoder, |note| filter.accepts(note))?;

    if !write_midi(midi_path, &encoded.bytes, options.overwrite)? {
        warn!(midi = %midi_path.display(), "MIDI appeared during conversion, skipped");
        return Ok(ConversionOutcome::Skipped {
            existing: midi_path.to_path_buf(),
        });
    }

    if encoded.note_count == 0 {
        warn!(csv = %csv_path.display(), "Converted an empty note sequence");
    }
    info!(
        "Converted {} -> {} ({} notes)",
        csv_path.display(),
        midi_path.display(),
        encoded.note_count
    );

    Ok(ConversionOutcome::Converted(ConversionStats {
        notes: encoded.note_count,
        row_errors: parsed.errors,
        warnings: parsed.warnings,
    }))
}

fn output_dir(midi_path: &Path) -> &Path {
    match midi_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// The MIDI file already standing for `midi_path`: the path itself, or a
/// sibling with a MIDI extension and the same pairing key (`Song.midi` for
/// `Song.mid`).
fn existing_midi(midi_path: &Path, options: &ConvertOptions) -> Result<Option<PathBuf>> {
    if midi_path.exists() {
        return Ok(Some(midi_path.to_path_buf()));
    }
    let dir = output_dir(midi_path);
    let Some(stem) = midi_path.file_stem() else {
        return Ok(None);
    };
    if !dir.is_dir() {
        return Ok(None);
    }

    let key = pairing_key(&stem.to_string_lossy(), &options.pairing_suffixes);
    let siblings = FileScanner::new(&options.midi_extensions).scan(dir)?;
    Ok(siblings.into_iter().find(|path| {
        path.file_stem()
            .map(|s| pairing_key(&s.to_string_lossy(), &options.pairing_suffixes) == key)
            .unwrap_or(false)
    }))
}

/// Write through a temp file in the target directory, then rename.
///
/// Returns `false` when `overwrite` is off and the target exists by the time
/// of the rename.
fn write_midi(midi_path: &Path, bytes: &[u8], overwrite: bool) -> Result<bool> {
    let parent = output_dir(midi_path);
    fs::create_dir_all(parent)?;

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(bytes)?;
    temp.as_file().sync_all()?;

    if overwrite {
        temp.persist(midi_path)?;
        return Ok(true);
    }
    match temp.persist_noclobber(midi_path) {
        Ok(_) => Ok(true),
        Err(e) if e.error.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Per-file entry of a batch run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchEntry {
    /// Input path relative to the batch root, forward slashes
    pub input: String,
    pub output: PathBuf,
    pub result: BatchResult,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchResult {
    Converted(ConversionStats),
    Skipped,
    Failed { error: String },
}

/// Sorted outcome of a batch run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchReport {
    pub entries: Vec<BatchEntry>,
}

impl BatchReport {
    pub fn converted(&self) -> usize {
        self.count(|r| matches!(r, BatchResult::Converted(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|r| matches!(r, BatchResult::Skipped))
    }

    pub fn failed(&self) -> usize {
        self.count(|r| matches!(r, BatchResult::Failed { .. }))
    }

    /// Converted files whose sequence was empty
    pub fn empty(&self) -> usize {
        self.count(|r| matches!(r, BatchResult::Converted(stats) if stats.is_empty()))
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }

    pub fn get(&self, input: &str) -> Option<&BatchEntry> {
        self.entries.iter().find(|entry| entry.input == input)
    }

    fn count<F: Fn(&BatchResult) -> bool>(&self, predicate: F) -> usize {
        self.entries.iter().filter(|e| predicate(&e.result)).count()
    }
}

struct Job {
    key: String,
    input: PathBuf,
    output: PathBuf,
}

fn run_jobs(jobs: Vec<Job>, options: &ConvertOptions) -> BatchReport {
    let mut entries: Vec<BatchEntry> = jobs
        .into_par_iter()
        .map(|job| {
            let result = match convert_file(&job.input, &job.output, options) {
                Ok(ConversionOutcome::Converted(stats)) => BatchResult::Converted(stats),
                Ok(ConversionOutcome::Skipped { .. }) => BatchResult::Skipped,
                Err(e) => {
                    error!("Error converting {}: {}", job.input.display(), e);
                    BatchResult::Failed {
                        error: e.to_string(),
                    }
                }
            };
            BatchEntry {
                input: job.key,
                output: job.output,
                result,
            }
        })
        .collect();

    entries.sort_by(|a, b| a.input.cmp(&b.input));
    BatchReport { entries }
}

fn midi_name(csv_path: &Path) -> Result<PathBuf> {
    let stem = csv_path.file_stem().ok_or_else(|| {
        DatasetError::InvalidInput(format!("No file name: {}", csv_path.display()))
    })?;
    Ok(PathBuf::from(stem).with_extension("mid"))
}

/// Convert every `*.csv` directly inside `csv_dir` into `midi_dir`
pub fn convert_directory(
    csv_dir: &Path,
    midi_dir: &Path,
    options: &ConvertOptions,
) -> Result<BatchReport> {
    let csv_files = FileScanner::new(&["csv"]).scan(csv_dir)?;
    fs::create_dir_all(midi_dir)?;

    let jobs = csv_files
        .into_iter()
        .map(|input| {
            Ok(Job {
                key: relative_path(csv_dir, &input)
                    .unwrap_or_else(|| input.display().to_string()),
                output: midi_dir.join(midi_name(&input)?),
                input,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let report = run_jobs(jobs, options);
    info!(
        "Converted {}/{} files ({} skipped)",
        report.converted(),
        report.entries.len(),
        report.skipped()
    );
    Ok(report)
}

/// Convert alternative transcriptions laid out as `<csv_alt>/<Song>/<v>.csv`
/// into `<midi_alt>/<Song>/<v>.mid`.
///
/// CSV files directly in `csv_alt` are ignored. A missing `csv_alt` yields
/// an empty report.
pub fn convert_alternatives(
    csv_alt: &Path,
    midi_alt: &Path,
    options: &ConvertOptions,
) -> Result<BatchReport> {
    if !csv_alt.is_dir() {
        warn!(dir = %csv_alt.display(), "No alternatives directory");
        return Ok(BatchReport::default());
    }

    let mut song_dirs: Vec<PathBuf> = fs::read_dir(csv_alt)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_dir())
        .collect();
    song_dirs.sort();

    let scanner = FileScanner::new(&["csv"]);
    let mut jobs = Vec::new();
    for song_dir in song_dirs {
        let Some(song) = song_dir.file_name().map(|n| n.to_os_string()) else {
            continue;
        };
        for input in scanner.scan(&song_dir)? {
            jobs.push(Job {
                key: relative_path(csv_alt, &input)
                    .unwrap_or_else(|| input.display().to_string()),
                output: midi_alt.join(&song).join(midi_name(&input)?),
                input,
            });
        }
    }

    let report = run_jobs(jobs, options);
    info!(
        "Converted {}/{} alternative transcriptions ({} skipped)",
        report.converted(),
        report.entries.len(),
        report.skipped()
    );
    Ok(report)
}
