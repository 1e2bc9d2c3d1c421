//! Audio health checks for WAV recordings

use super::{FileMetadata, HealthReport, HealthViolation};
use crate::config::AudioHealthConfig;
use crate::error::{DatasetError, Result};
use hound::WavReader;
use serde::Serialize;
use std::path::Path;
use tracing::debug;

/// Decoded WAV content, mixed down to mono
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
    /// Largest positive sample the source format can hold
    pub full_scale: f32,
}

impl AudioClip {
    pub fn frames(&self) -> usize {
        self.samples.len()
    }

    pub fn duration_sec(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Load a WAV file as mono `f32` in [-1, 1]
pub fn load_wav(path: &Path) -> Result<AudioClip> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();

    if spec.channels == 0 {
        return Err(DatasetError::AudioRead("WAV declares zero channels".to_string()));
    }

    let mut interleaved: Vec<f32> = Vec::with_capacity(reader.len() as usize);
    let full_scale = match spec.sample_format {
        hound::SampleFormat::Int => {
            if spec.bits_per_sample == 0 || spec.bits_per_sample > 32 {
                return Err(DatasetError::AudioRead(format!(
                    "Unsupported bit depth: {}",
                    spec.bits_per_sample
                )));
            }
            let max_value = (1i64 << (spec.bits_per_sample - 1)) as f64;
            for sample in reader.samples::<i32>() {
                interleaved.push((sample? as f64 / max_value) as f32);
            }
            ((max_value - 1.0) / max_value) as f32
        }
        hound::SampleFormat::Float => {
            for sample in reader.samples::<f32>() {
                interleaved.push(sample?);
            }
            1.0
        }
    };

    let channels = spec.channels as usize;
    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };

    Ok(AudioClip {
        samples,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
        full_scale,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AudioMetadata {
    pub sample_rate: u32,
    pub channels: u16,
    pub frames: usize,
    pub duration_sec: f64,
    pub max_amplitude: f32,
    /// Absent for a completely silent file
    pub non_silent_ratio: Option<f64>,
    pub clipping_ratio: f64,
    pub longest_clip_run: usize,
    pub rms: f64,
    /// Absent when the RMS is zero
    pub rms_db: Option<f64>,
}

/// Length of the longest run of samples at or above `level`
fn longest_run(samples: &[f32], level: f32) -> usize {
    let mut longest = 0;
    let mut current = 0;
    for &s in samples {
        if s.abs() >= level {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 0;
        }
    }
    longest
}

/// Measure `clip` against the thresholds
pub fn evaluate(clip: &AudioClip, config: &AudioHealthConfig) -> (Vec<HealthViolation>, AudioMetadata) {
    let mut violations = Vec::new();
    let samples = &clip.samples;
    let n = samples.len().max(1) as f64;
    let duration = clip.duration_sec();

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

    let max_amplitude = samples.iter().fold(0.0f32, |peak, s| peak.max(s.abs()));
    let non_silent_ratio = if max_amplitude < config.absolute_silence {
        violations.push(HealthViolation::critical(
            "silent",
            "Audio file appears to be completely silent".to_string(),
        ));
        None
    } else {
        let threshold = max_amplitude * config.silence_threshold;
        let loud = samples.iter().filter(|s| s.abs() > threshold).count();
        let ratio = loud as f64 / n;
        if ratio < config.min_non_silent_ratio {
            violations.push(HealthViolation::warning(
                "mostly_silent",
                ratio,
                config.min_non_silent_ratio,
                format!(
                    "Only {:.1}% of samples are non-silent (minimum: {:.0}%)",
                    ratio * 100.0,
                    config.min_non_silent_ratio * 100.0
                ),
            ));
        }
        Some(ratio)
    };

    // Integer formats top out one step below 1.0
    let clip_level = config.clip_level * clip.full_scale;
    let clipped = samples.iter().filter(|s| s.abs() >= clip_level).count();
    let clipping_ratio = clipped as f64 / n;
    if clipping_ratio > config.max_clipping_ratio {
        violations.push(HealthViolation::warning(
            "clipping_ratio",
            clipping_ratio,
            config.max_clipping_ratio,
            format!(
                "Possible clipping detected: {:.2}% of samples at max amplitude",
                clipping_ratio * 100.0
            ),
        ));
    }

    let longest_clip_run = longest_run(samples, clip_level);
    if longest_clip_run >= config.clip_run_length {
        violations.push(HealthViolation::warning(
            "sustained_clipping",
            longest_clip_run as f64,
            config.clip_run_length as f64,
            format!("{} consecutive samples at full scale", longest_clip_run),
        ));
    }

    let rms = (samples.iter().map(|&s| (s as f64) * (s as f64)).sum::<f64>() / n).sqrt();
    let rms_db = if rms > 0.0 { Some(20.0 * rms.log10()) } else { None };

    let metadata = AudioMetadata {
        sample_rate: clip.sample_rate,
        channels: clip.channels,
        frames: clip.frames(),
        duration_sec: duration,
        max_amplitude,
        non_silent_ratio,
        clipping_ratio,
        longest_clip_run,
        rms,
        rms_db,
    };
    (violations, metadata)
}

pub fn check_audio_file(path: &Path, config: &AudioHealthConfig) -> HealthReport {
    debug!(file = %path.display(), "Checking audio");
    match load_wav(path) {
        Ok(clip) => {
            let (violations, metadata) = evaluate(&clip, config);
            HealthReport::new(path, violations, Some(FileMetadata::Audio(metadata)))
        }
        Err(e) => HealthReport::new(
            path,
            vec![HealthViolation::critical(
                "unreadable",
                format!("Failed to load audio file: {}", e),
            )],
            None,
        ),
    }
}
