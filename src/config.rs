//! Configuration system for the dataset pipeline

use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub version: String,
    pub encoder: EncoderConfig,
    pub manifest: ManifestConfig,
    pub health: HealthConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            encoder: EncoderConfig::default(),
            manifest: ManifestConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

/// CSV to MIDI encoding configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// Pulses per quarter note
    pub ticks_per_beat: u16,
    /// Tempo written at tick zero; together with `ticks_per_beat` fixes the
    /// seconds-to-ticks resolution
    pub tempo_bpm: f64,
    pub velocity: u8,
    pub program: u8,
    pub channel: u8,
    pub track_name: Option<String>,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ticks_per_beat: 480,
            tempo_bpm: 120.0,
            velocity: 100,
            program: 0, // Acoustic Grand Piano
            channel: 0,
            track_name: None,
        }
    }
}

impl EncoderConfig {
    /// Tick resolution in ticks per second
    pub fn ticks_per_second(&self) -> f64 {
        self.ticks_per_beat as f64 * self.tempo_bpm / 60.0
    }

    /// Tempo meta value in microseconds per quarter note
    pub fn microseconds_per_beat(&self) -> u32 {
        (60_000_000.0 / self.tempo_bpm).round() as u32
    }
}

/// Manifest layout configuration (paths relative to the dataset root)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ManifestConfig {
    pub audio_dir: String,
    pub midi_dir: String,
    pub manifest_path: String,
    pub audio_extensions: Vec<String>,
    pub midi_extensions: Vec<String>,
    /// Trailing stem fragments ignored when pairing audio with MIDI
    pub processing_suffixes: Vec<String>,
    /// Songs expected in every emotion even before an expressive take exists
    pub songs_with_variations: Vec<String>,
}

const SONGS_WITH_VARIATIONS: [&str; 20] = [
    "Fuglesangen",
    "Godvaersdagen",
    "GroHolto",
    "Haslebuskane",
    "Havbrusen",
    "IvarJorde",
    "Klunkelatten",
    "Kongelatten",
    "Langaakern",
    "LattenSomBedOmNoko",
    "Perigarden",
    "Silkjegulen",
    "Solmoy",
    "Strandaspringar",
    "Tjednbalen",
    "Toingen",
    "Valdresspringar",
    "Vossarull",
    "SigneUladalen",
    "Spretten",
];

impl Default for ManifestConfig {
    fn default() -> Self {
        Self {
            audio_dir: "data/raw/audio".to_string(),
            midi_dir: "data/raw/midi".to_string(),
            manifest_path: "data/manifests/manifest.csv".to_string(),
            audio_extensions: vec!["wav".to_string()],
            midi_extensions: vec!["mid".to_string(), "midi".to_string()],
            processing_suffixes: vec!["_cleaned".to_string(), ".mid".to_string()],
            songs_with_variations: SONGS_WITH_VARIATIONS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

/// Health check thresholds
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub midi: MidiHealthConfig,
    pub audio: AudioHealthConfig,
    /// Escalate warnings to failures for the batch status
    pub strict: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MidiHealthConfig {
    pub min_pitch: u8,
    pub max_pitch: u8,
    pub min_duration_sec: f64,
    pub max_duration_sec: f64,
}

impl Default for MidiHealthConfig {
    fn default() -> Self {
        Self {
            // Piano range A0 (21) to C8 (108), one octave of tolerance either side
            min_pitch: 21 - 12,
            max_pitch: 108 + 12,
            min_duration_sec: 1.0,
            max_duration_sec: 600.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioHealthConfig {
    pub min_duration_sec: f64,
    pub max_duration_sec: f64,
    /// Fraction of the peak amplitude below which a sample counts as silent
    pub silence_threshold: f32,
    pub min_non_silent_ratio: f64,
    /// Peak amplitude below which the whole file is considered silent
    pub absolute_silence: f32,
    /// Fraction of the format's full scale at or above which a sample counts as clipped
    pub clip_level: f32,
    pub max_clipping_ratio: f64,
    /// Consecutive clipped samples that make a sustained clip
    pub clip_run_length: usize,
}

impl Default for AudioHealthConfig {
    fn default() -> Self {
        Self {
            min_duration_sec: 5.0,
            max_duration_sec: 300.0,
            silence_threshold: 0.01,
            min_non_silent_ratio: 0.10,
            absolute_silence: 1e-6,
            clip_level: 0.9999,
            max_clipping_ratio: 0.001,
            clip_run_length: 64,
        }
    }
}

/// Validate configuration parameters
pub fn validate_config(config: &Config) -> anyhow::Result<()> {
    let encoder = &config.encoder;
    if encoder.ticks_per_beat == 0 || encoder.ticks_per_beat > 0x7fff {
        anyhow::bail!("encoder.ticks_per_beat must be in 1..=32767");
    }
    if !(encoder.tempo_bpm.is_finite() && encoder.tempo_bpm > 0.0) {
        anyhow::bail!("encoder.tempo_bpm must be positive");
    }
    // Tempo meta events carry 24 bits
    if encoder.microseconds_per_beat() > 0x00ff_ffff {
        anyhow::bail!("encoder.tempo_bpm is too slow to encode");
    }
    if encoder.velocity == 0 || encoder.velocity > 127 {
        anyhow::bail!("encoder.velocity must be in 1..=127");
    }
    if encoder.program > 127 {
        anyhow::bail!("encoder.program must be in 0..=127");
    }
    if encoder.channel > 15 {
        anyhow::bail!("encoder.channel must be in 0..=15");
    }

    if config.manifest.audio_extensions.is_empty() || config.manifest.midi_extensions.is_empty() {
        anyhow::bail!("manifest extensions must not be empty");
    }

    let midi = &config.health.midi;
    if midi.min_pitch > midi.max_pitch {
        anyhow::bail!("health.midi pitch range min must be <= max");
    }
    if midi.min_duration_sec >= midi.max_duration_sec {
        anyhow::bail!("health.midi duration range min must be < max");
    }

    let audio = &config.health.audio;
    if audio.min_duration_sec >= audio.max_duration_sec {
        anyhow::bail!("health.audio duration range min must be < max");
    }
    if !(0.0..=1.0).contains(&audio.silence_threshold)
        || !(0.0..=1.0).contains(&audio.min_non_silent_ratio)
        || !(0.0..=1.0).contains(&audio.max_clipping_ratio)
    {
        anyhow::bail!("health.audio ratios must be within [0, 1]");
    }
    if audio.clip_run_length == 0 {
        anyhow::bail!("health.audio.clip_run_length must be at least 1");
    }

    Ok(())
}

/// Load configuration from JSON file
pub fn load_config<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<Config> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&content)?;
    validate_config(&config)?;
    Ok(config)
}

/// Save configuration to JSON file
pub fn save_config<P: AsRef<std::path::Path>>(config: &Config, path: P) -> anyhow::Result<()> {
    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}
