//! Manifest builder
//!
//! Pairs raw audio files with their MIDI transcriptions, fingerprints both
//! with SHA-256 and derives per-song metadata from the dataset's file naming
//! conventions. The manifest is regenerated wholesale on every run.

use crate::config::ManifestConfig;
use crate::error::{DatasetError, Result};
use crate::scan::{normalize_relpath, relative_path, FileScanner};
use rayon::prelude::*;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Manifest CSV header, in column order
pub const MANIFEST_COLUMNS: [&str; 11] = [
    "id",
    "song_name",
    "audio_relpath",
    "midi_relpath",
    "audio_sha256",
    "midi_sha256",
    "audio_ext",
    "midi_ext",
    "has_emotional_variations",
    "emotion",
    "notes",
];

/// Expressive rendition of a song
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Angry,
    Happy,
    Sad,
    Tender,
    Original,
}

impl Emotion {
    pub const ALL: [Emotion; 5] = [
        Emotion::Angry,
        Emotion::Happy,
        Emotion::Sad,
        Emotion::Tender,
        Emotion::Original,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Emotion::Angry => "angry",
            Emotion::Happy => "happy",
            Emotion::Sad => "sad",
            Emotion::Tender => "tender",
            Emotion::Original => "original",
        }
    }

    /// Whether this is one of the re-performed variants rather than the
    /// original rendition
    pub fn is_expressive(&self) -> bool {
        !matches!(self, Emotion::Original)
    }

    /// Parse a name token; `original1` is a second take of `original`
    pub fn from_token(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "angry" => Some(Emotion::Angry),
            "happy" => Some(Emotion::Happy),
            "sad" => Some(Emotion::Sad),
            "tender" => Some(Emotion::Tender),
            "original" | "original1" => Some(Emotion::Original),
            _ => None,
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Source provenance recorded in the `notes` column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    /// Digitized archive recording, e.g. `00106-Performer-Title`
    Archival,
    /// Cleaned/trimmed studio take, e.g. `Song_happy_torr_..._cleaned`
    Processed,
}

/// Metadata derived from a file stem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameInfo {
    pub song_name: String,
    pub emotion: Option<Emotion>,
    pub provenance: Option<Provenance>,
}

fn is_archival(stem: &str) -> bool {
    let digits = stem.bytes().take_while(|b| b.is_ascii_digit()).count();
    (4..=5).contains(&digits) && stem.as_bytes().get(digits) == Some(&b'-')
}

fn is_processed(stem: &str) -> bool {
    stem.contains("_torr_") || stem.contains("_cleaned")
}

/// Emotion named anywhere in the stem as `_<emotion>`
pub fn extract_emotion(stem: &str) -> Option<Emotion> {
    if is_archival(stem) {
        return None;
    }
    let lower = stem.to_ascii_lowercase();
    Emotion::ALL
        .iter()
        .copied()
        .find(|emotion| lower.contains(&format!("_{}", emotion.as_str())))
}

/// Song name, emotion and provenance of a file stem
pub fn parse_name(stem: &str) -> NameInfo {
    if is_archival(stem) {
        return NameInfo {
            song_name: stem.to_string(),
            emotion: None,
            provenance: Some(Provenance::Archival),
        };
    }

    let emotion = extract_emotion(stem);
    if is_processed(stem) {
        let song_name = stem.split('_').next().unwrap_or(stem).to_string();
        return NameInfo {
            song_name,
            emotion,
            provenance: Some(Provenance::Processed),
        };
    }

    let song_name = match stem.rsplit_once('_') {
        Some((song, token)) if Emotion::from_token(token).is_some() => song.to_string(),
        _ => stem.to_string(),
    };

    NameInfo {
        song_name,
        emotion,
        provenance: None,
    }
}

/// Stem with processing suffixes stripped from the end until none applies.
///
/// `Song_sad.mid_cleaned` and `Song_sad` share the key `Song_sad`.
pub fn pairing_key<S: AsRef<str>>(stem: &str, suffixes: &[S]) -> String {
    let mut key = stem;
    loop {
        let stripped = suffixes
            .iter()
            .map(|s| s.as_ref())
            .filter(|s| !s.is_empty())
            .find_map(|suffix| key.strip_suffix(suffix));
        match stripped {
            Some(rest) if !rest.is_empty() => key = rest,
            _ => return key.to_string(),
        }
    }
}

/// Hex SHA-256 of a file's bytes, streamed in 8 KiB chunks
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

pub fn sha256_string(value: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Pair identifier: depends only on the two relative paths.
///
/// Backslashes are normalized first so the id does not depend on the host
/// path separator.
pub fn row_id(audio_relpath: &str, midi_relpath: &str) -> String {
    sha256_string(&format!(
        "{}:{}",
        normalize_relpath(audio_relpath),
        normalize_relpath(midi_relpath)
    ))
}

/// One audio/MIDI pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestRow {
    pub id: String,
    pub song_name: String,
    pub audio_relpath: String,
    pub midi_relpath: String,
    pub audio_sha256: String,
    pub midi_sha256: String,
    pub audio_ext: String,
    pub midi_ext: String,
    #[serde(with = "title_case_bool")]
    pub has_emotional_variations: bool,
    pub emotion: Option<Emotion>,
    pub notes: Option<Provenance>,
}

/// `True`/`False` on write, either case on read
mod title_case_bool {
    use super::*;

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(if *value { "True" } else { "False" })
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<bool, D::Error> {
        let raw = String::deserialize(deserializer)?;
        match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" | "" => Ok(false),
            other => Err(serde::de::Error::custom(format!("invalid boolean '{}'", other))),
        }
    }
}

/// Two or more files of one kind competing for the same pairing key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ambiguity {
    pub key: String,
    pub files: Vec<String>,
}

/// Song with some, but not all, emotion variants
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IncompleteVariations {
    pub song_name: String,
    pub present: Vec<Emotion>,
    pub missing: Vec<Emotion>,
}

/// Songs expected in all five emotions that are missing some.
///
/// A song is expected to vary once any expressive take exists or when it
/// appears in `listed`. Returns the incomplete songs and the set of complete
/// ones.
pub fn variation_status<S: AsRef<str>>(
    rows: &[ManifestRow],
    listed: &[S],
) -> (Vec<IncompleteVariations>, BTreeSet<String>) {
    let listed: BTreeSet<&str> = listed.iter().map(|s| s.as_ref()).collect();
    let mut by_song: BTreeMap<&str, BTreeSet<Emotion>> = BTreeMap::new();
    for row in rows {
        let emotions = by_song.entry(row.song_name.as_str()).or_default();
        if let Some(emotion) = row.emotion {
            emotions.insert(emotion);
        }
    }

    let mut incomplete = Vec::new();
    let mut complete = BTreeSet::new();
    for (song, emotions) in by_song {
        if !listed.contains(song) && !emotions.iter().any(Emotion::is_expressive) {
            continue;
        }
        let missing: Vec<Emotion> = Emotion::ALL
            .iter()
            .copied()
            .filter(|e| !emotions.contains(e))
            .collect();
        if missing.is_empty() {
            complete.insert(song.to_string());
        } else {
            incomplete.push(IncompleteVariations {
                song_name: song.to_string(),
                present: emotions.into_iter().collect(),
                missing,
            });
        }
    }
    (incomplete, complete)
}

/// Outcome of a manifest build
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildReport {
    /// Rows sorted by audio path
    pub rows: Vec<ManifestRow>,
    pub orphan_audio: Vec<String>,
    pub orphan_midi: Vec<String>,
    pub ambiguous: Vec<Ambiguity>,
    pub incomplete_variations: Vec<IncompleteVariations>,
    /// Files that could not be hashed; their pairs are not in `rows`
    pub hash_failures: Vec<HashFailure>,
}

/// A paired file whose content could not be read
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HashFailure {
    pub file: String,
    pub error: String,
}

impl BuildReport {
    pub fn unique_songs(&self) -> usize {
        self.rows
            .iter()
            .map(|row| row.song_name.as_str())
            .collect::<BTreeSet<_>>()
            .len()
    }

    pub fn songs_with_variations(&self) -> usize {
        self.rows
            .iter()
            .filter(|row| row.has_emotional_variations)
            .map(|row| row.song_name.as_str())
            .collect::<BTreeSet<_>>()
            .len()
    }
}

fn file_stem(path: &Path) -> Result<String> {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .ok_or_else(|| DatasetError::Manifest(format!("No file name: {}", path.display())))
}

fn extension_with_dot(path: &Path) -> String {
    path.extension()
        .map(|ext| format!(".{}", ext.to_string_lossy()))
        .unwrap_or_default()
}

/// Files of one kind grouped by pairing key
fn group_by_key(files: Vec<PathBuf>, suffixes: &[String]) -> Result<BTreeMap<String, Vec<PathBuf>>> {
    let mut groups: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    for path in files {
        let key = pairing_key(&file_stem(&path)?, suffixes);
        groups.entry(key).or_default().push(path);
    }
    Ok(groups)
}

fn display_relpath(root: &Path, path: &Path) -> String {
    relative_path(root, path).unwrap_or_else(|| path.display().to_string())
}

struct Pair {
    audio: PathBuf,
    midi: PathBuf,
}

/// Scan `<root>/<audio_dir>` and `<root>/<midi_dir>` and build the manifest
pub fn build_manifest(root: &Path, config: &ManifestConfig) -> Result<BuildReport> {
    let audio_root = root.join(normalize_relpath(&config.audio_dir));
    let midi_root = root.join(normalize_relpath(&config.midi_dir));

    let audio_files = FileScanner::new(&config.audio_extensions).scan(&audio_root)?;
    let midi_files = FileScanner::new(&config.midi_extensions).scan(&midi_root)?;
    info!(
        audio = audio_files.len(),
        midi = midi_files.len(),
        "Scanned raw directories"
    );

    let audio_groups = group_by_key(audio_files, &config.processing_suffixes)?;
    let mut midi_groups = group_by_key(midi_files, &config.processing_suffixes)?;

    let rel = |path: &PathBuf| display_relpath(root, path);

    let mut report = BuildReport::default();
    let mut pairs = Vec::new();
    for (key, audio) in audio_groups {
        let midi = midi_groups.remove(&key);
        if audio.len() > 1 || midi.as_ref().map_or(false, |m| m.len() > 1) {
            let mut files: Vec<String> = audio.iter().map(|p| rel(p)).collect();
            files.extend(midi.iter().flatten().map(|p| rel(p)));
            warn!(key = %key, files = files.len(), "Ambiguous pairing, excluded");
            report.ambiguous.push(Ambiguity { key, files });
            continue;
        }
        let audio = audio.into_iter().next();
        match (audio, midi.and_then(|m| m.into_iter().next())) {
            (Some(audio), Some(midi)) => pairs.push(Pair { audio, midi }),
            (Some(audio), None) => {
                warn!("No MIDI file for {}", rel(&audio));
                report.orphan_audio.push(rel(&audio));
            }
            _ => {}
        }
    }
    for (key, midi) in midi_groups {
        if midi.len() > 1 {
            let files: Vec<String> = midi.iter().map(|p| rel(p)).collect();
            warn!(key = %key, files = files.len(), "Ambiguous pairing, excluded");
            report.ambiguous.push(Ambiguity { key, files });
        } else {
            for path in midi {
                warn!("No audio file for {}", rel(&path));
                report.orphan_midi.push(rel(&path));
            }
        }
    }

    let (mut rows, hash_failures) = hash_pairs(root, &pairs)?;

    let (incomplete, complete) = variation_status(&rows, &config.songs_with_variations);
    for row in &mut rows {
        row.has_emotional_variations = complete.contains(&row.song_name);
    }
    for song in &incomplete {
        let missing: Vec<&str> = song.missing.iter().map(Emotion::as_str).collect();
        warn!(
            song = %song.song_name,
            "Incomplete emotion variants, missing: {}",
            missing.join(", ")
        );
    }

    report.rows = rows;
    report.incomplete_variations = incomplete;
    report.hash_failures = hash_failures;
    report.orphan_audio.sort();
    report.orphan_midi.sort();
    info!(
        pairs = report.rows.len(),
        songs = report.unique_songs(),
        "Manifest built"
    );
    Ok(report)
}

/// Rows for every pair whose files hash cleanly, plus the files that did not
fn hash_pairs(root: &Path, pairs: &[Pair]) -> Result<(Vec<ManifestRow>, Vec<HashFailure>)> {
    let outcomes = pairs
        .par_iter()
        .map(|pair| build_row(root, pair))
        .collect::<Result<Vec<_>>>()?;

    let mut rows = Vec::new();
    let mut failures = Vec::new();
    for outcome in outcomes {
        match outcome {
            Ok(row) => rows.push(row),
            Err(failed) => failures.extend(failed),
        }
    }
    rows.sort_by(|a, b| a.audio_relpath.cmp(&b.audio_relpath));
    failures.sort_by(|a, b| a.file.cmp(&b.file));
    Ok((rows, failures))
}

fn hash_file(path: &Path, relpath: &str) -> std::result::Result<String, HashFailure> {
    sha256_file(path).map_err(|e| {
        warn!(file = %relpath, "Could not hash: {}", e);
        HashFailure {
            file: relpath.to_string(),
            error: e.to_string(),
        }
    })
}

fn build_row(root: &Path, pair: &Pair) -> Result<std::result::Result<ManifestRow, Vec<HashFailure>>> {
    let audio_relpath = relative_path(root, &pair.audio)
        .ok_or_else(|| DatasetError::Manifest(format!("{} is outside the root", pair.audio.display())))?;
    let midi_relpath = relative_path(root, &pair.midi)
        .ok_or_else(|| DatasetError::Manifest(format!("{} is outside the root", pair.midi.display())))?;

    let info = parse_name(&file_stem(&pair.audio)?);
    debug!(audio = %audio_relpath, midi = %midi_relpath, "Hashing pair");

    let (audio_sha256, midi_sha256) = match (
        hash_file(&pair.audio, &audio_relpath),
        hash_file(&pair.midi, &midi_relpath),
    ) {
        (Ok(audio), Ok(midi)) => (audio, midi),
        (audio, midi) => return Ok(Err(audio.err().into_iter().chain(midi.err()).collect())),
    };

    Ok(Ok(ManifestRow {
        id: row_id(&audio_relpath, &midi_relpath),
        song_name: info.song_name,
        audio_sha256,
        midi_sha256,
        audio_ext: extension_with_dot(&pair.audio),
        midi_ext: extension_with_dot(&pair.midi),
        audio_relpath,
        midi_relpath,
        has_emotional_variations: false,
        emotion: info.emotion,
        notes: info.provenance,
    }))
}

/// Write rows as CSV, atomically replacing `path`
pub fn write_manifest(rows: &[ManifestRow], path: &Path) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let temp = tempfile::NamedTempFile::new_in(parent)?;
    {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(temp.as_file());
        writer.write_record(MANIFEST_COLUMNS)?;
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
    }
    temp.as_file().sync_all()?;
    temp.persist(path)?;

    info!("Manifest written to {}", path.display());
    Ok(())
}

/// Read a manifest CSV written by [`write_manifest`]
pub fn read_manifest(path: &Path) -> Result<Vec<ManifestRow>> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    for column in MANIFEST_COLUMNS {
        if !headers.iter().any(|h| h == column) {
            return Err(DatasetError::MissingColumn {
                path: path.to_path_buf(),
                column: column.to_string(),
            });
        }
    }
    let mut rows = Vec::new();
    for record in reader.deserialize() {
        rows.push(record?);
    }
    Ok(rows)
}
