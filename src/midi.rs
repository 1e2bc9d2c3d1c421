//! Standard MIDI File encoding of note sequences, and the read-side summary
//! used by the MIDI health checker.
//!
//! Output is a single-track (format 0) file: track name (optional), tempo,
//! time signature and program change at tick zero, then one note-on and one
//! note-off per note. Encoding is a pure function of the notes and the
//! [`EncoderConfig`], so identical inputs give identical bytes.

use crate::config::EncoderConfig;
use crate::error::{DatasetError, Result};
use crate::note::{Note, NoteSequence};
use midly::num::{u15, u24, u28, u4, u7};
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};
use serde::Serialize;
use std::collections::HashMap;

/// Largest delta-time a track event can carry
const MAX_DELTA: u32 = 0x0fff_ffff;

/// Encoded file plus the number of notes it contains
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedMidi {
    pub bytes: Vec<u8>,
    pub note_count: usize,
}

/// Map a fractional MIDI pitch to a key number.
///
/// Rounds half away from zero (`78.5` → `79`, `78.36` → `78`) and clamps to
/// `0..=127`. This is the lossy step of the pipeline; the CSV keeps the
/// precise pitch.
pub fn quantize_pitch(pitch: f64) -> u8 {
    pitch.round().clamp(0.0, 127.0) as u8
}

/// Convert seconds to absolute ticks at a fixed tick rate.
///
/// Monotonic: `a <= b` implies `seconds_to_ticks(a) <= seconds_to_ticks(b)`.
pub fn seconds_to_ticks(seconds: f64, ticks_per_second: f64) -> u32 {
    (seconds * ticks_per_second).round().clamp(0.0, u32::MAX as f64) as u32
}

/// At a shared tick note-offs sort before note-ons
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum EventKind {
    NoteOff,
    NoteOn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct ScheduledEvent {
    tick: u32,
    kind: EventKind,
    /// Position of the note in the input sequence, the stable tie-break
    order: usize,
    key: u8,
}

/// Encode every note of the sequence
pub fn encode(notes: &NoteSequence, config: &EncoderConfig) -> Result<EncodedMidi> {
    encode_filtered(notes, config, |_| true)
}

/// Encode the notes accepted by `keep`.
///
/// The sequence is validated as a whole before filtering, so a malformed
/// sequence fails regardless of the selection policy.
pub fn encode_filtered<F>(notes: &NoteSequence, config: &EncoderConfig, keep: F) -> Result<EncodedMidi>
where
    F: Fn(&Note) -> bool,
{
    notes.validate()?;

    let selected: Vec<&Note> = notes.iter().filter(|&note| keep(note)).collect();
    let events = schedule(&selected, config);

    let channel = u4::from(config.channel);
    let mut track_events = Vec::with_capacity(events.len() + 5);

    if let Some(name) = &config.track_name {
        track_events.push(TrackEvent {
            delta: u28::from(0),
            kind: TrackEventKind::Meta(MetaMessage::TrackName(name.as_bytes())),
        });
    }

    track_events.push(TrackEvent {
        delta: u28::from(0),
        kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::from(
            config.microseconds_per_beat(),
        ))),
    });

    // 4/4, 24 MIDI clocks per metronome click, 8 32nd notes per quarter
    track_events.push(TrackEvent {
        delta: u28::from(0),
        kind: TrackEventKind::Meta(MetaMessage::TimeSignature(4, 2, 24, 8)),
    });

    track_events.push(TrackEvent {
        delta: u28::from(0),
        kind: TrackEventKind::Midi {
            channel,
            message: MidiMessage::ProgramChange {
                program: u7::from(config.program),
            },
        },
    });

    let mut current_tick = 0u32;
    for event in &events {
        let delta = event.tick - current_tick;
        if delta > MAX_DELTA {
            return Err(DatasetError::MidiEncode(format!(
                "delta of {} ticks exceeds the MIDI limit",
                delta
            )));
        }
        current_tick = event.tick;

        let message = match event.kind {
            EventKind::NoteOn => MidiMessage::NoteOn {
                key: u7::from(event.key),
                vel: u7::from(config.velocity),
            },
            EventKind::NoteOff => MidiMessage::NoteOff {
                key: u7::from(event.key),
                vel: u7::from(0),
            },
        };
        track_events.push(TrackEvent {
            delta: u28::from(delta),
            kind: TrackEventKind::Midi { channel, message },
        });
    }

    track_events.push(TrackEvent {
        delta: u28::from(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });

    let smf = Smf {
        header: Header {
            format: Format::SingleTrack,
            timing: Timing::Metrical(u15::from(config.ticks_per_beat)),
        },
        tracks: vec![track_events],
    };

    let mut bytes = Vec::new();
    smf.write(&mut bytes)
        .map_err(|e| DatasetError::MidiEncode(format!("Failed to write MIDI data: {:?}", e)))?;

    Ok(EncodedMidi {
        bytes,
        note_count: selected.len(),
    })
}

/// Turn notes into tick-ordered on/off events.
///
/// A note whose onset and offset land on the same tick is held for one
/// tick, so its note-off never precedes its own note-on.
fn schedule(notes: &[&Note], config: &EncoderConfig) -> Vec<ScheduledEvent> {
    let ticks_per_second = config.ticks_per_second();
    let mut events = Vec::with_capacity(notes.len() * 2);

    for (order, note) in notes.iter().enumerate() {
        let key = quantize_pitch(note.onpitch);
        let on_tick = seconds_to_ticks(note.onset, ticks_per_second);
        let off_tick = seconds_to_ticks(note.offset, ticks_per_second).max(on_tick.saturating_add(1));

        events.push(ScheduledEvent {
            tick: on_tick,
            kind: EventKind::NoteOn,
            order,
            key,
        });
        events.push(ScheduledEvent {
            tick: off_tick,
            kind: EventKind::NoteOff,
            order,
            key,
        });
    }

    events.sort();
    events
}

/// A note recovered from a MIDI file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedNote {
    pub channel: u8,
    pub key: u8,
    pub velocity: u8,
    pub start_tick: u64,
    /// `None` when the file never releases the note
    pub end_tick: Option<u64>,
    pub start_sec: f64,
    pub end_sec: Option<f64>,
}

/// Parsed overview of a MIDI file
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MidiSummary {
    /// SMF format number (0, 1 or 2)
    pub format: u8,
    pub track_count: usize,
    /// `None` for SMPTE timecode files
    pub ticks_per_beat: Option<u16>,
    pub notes: Vec<DecodedNote>,
    /// Time of the last event of the longest track
    pub duration_sec: f64,
}

impl MidiSummary {
    pub fn note_count(&self) -> usize {
        self.notes.len()
    }

    /// Lowest and highest sounding key
    pub fn pitch_range(&self) -> Option<(u8, u8)> {
        let min = self.notes.iter().map(|n| n.key).min()?;
        let max = self.notes.iter().map(|n| n.key).max()?;
        Some((min, max))
    }
}

/// Tick-to-seconds conversion honoring tempo changes
struct TempoMap {
    timing: Timing,
    /// (tick, microseconds per beat), sorted by tick
    changes: Vec<(u64, u32)>,
}

impl TempoMap {
    const DEFAULT_TEMPO: u32 = 500_000;

    fn seconds_at(&self, tick: u64) -> f64 {
        match self.timing {
            Timing::Metrical(tpb) => {
                let tpb = tpb.as_int().max(1) as f64;
                let mut seconds = 0.0;
                let mut last_tick = 0u64;
                let mut tempo = Self::DEFAULT_TEMPO;
                for &(change_tick, change_tempo) in &self.changes {
                    if change_tick >= tick {
                        break;
                    }
                    seconds += (change_tick - last_tick) as f64 * tempo as f64 / 1e6 / tpb;
                    last_tick = change_tick;
                    tempo = change_tempo;
                }
                seconds + (tick - last_tick) as f64 * tempo as f64 / 1e6 / tpb
            }
            Timing::Timecode(fps, subframe) => {
                let ticks_per_second = fps.as_f32() as f64 * subframe.max(1) as f64;
                tick as f64 / ticks_per_second
            }
        }
    }
}

/// Parse MIDI bytes into a [`MidiSummary`]
pub fn summarize(bytes: &[u8]) -> Result<MidiSummary> {
    let smf = Smf::parse(bytes)?;

    let format = match smf.header.format {
        Format::SingleTrack => 0,
        Format::Parallel => 1,
        Format::Sequential => 2,
    };
    let ticks_per_beat = match smf.header.timing {
        Timing::Metrical(tpb) => Some(tpb.as_int()),
        Timing::Timecode(..) => None,
    };

    let mut changes = Vec::new();
    let mut last_tick = 0u64;
    for track in &smf.tracks {
        let mut tick = 0u64;
        for event in track {
            tick += event.delta.as_int() as u64;
            if let TrackEventKind::Meta(MetaMessage::Tempo(tempo)) = event.kind {
                changes.push((tick, tempo.as_int()));
            }
        }
        last_tick = last_tick.max(tick);
    }
    changes.sort_by_key(|&(tick, _)| tick);
    let tempo_map = TempoMap {
        timing: smf.header.timing,
        changes,
    };

    let mut notes = Vec::new();
    for track in &smf.tracks {
        // Sounding notes per (channel, key), released first-in first-out
        let mut open: HashMap<(u8, u8), Vec<usize>> = HashMap::new();
        let mut tick = 0u64;
        for event in track {
            tick += event.delta.as_int() as u64;
            let TrackEventKind::Midi { channel, message } = event.kind else {
                continue;
            };
            let channel = channel.as_int();
            let (key, velocity) = match message {
                MidiMessage::NoteOn { key, vel } => (key.as_int(), vel.as_int()),
                MidiMessage::NoteOff { key, .. } => (key.as_int(), 0),
                _ => continue,
            };

            if velocity > 0 {
                open.entry((channel, key)).or_default().push(notes.len());
                notes.push(DecodedNote {
                    channel,
                    key,
                    velocity,
                    start_tick: tick,
                    end_tick: None,
                    start_sec: tempo_map.seconds_at(tick),
                    end_sec: None,
                });
            } else if let Some(pending) = open.get_mut(&(channel, key)) {
                if !pending.is_empty() {
                    let index = pending.remove(0);
                    notes[index].end_tick = Some(tick);
                    notes[index].end_sec = Some(tempo_map.seconds_at(tick));
                }
            }
        }
    }
    notes.sort_by(|a, b| {
        a.start_tick
            .cmp(&b.start_tick)
            .then(a.channel.cmp(&b.channel))
            .then(a.key.cmp(&b.key))
    });

    Ok(MidiSummary {
        format,
        track_count: smf.tracks.len(),
        ticks_per_beat,
        notes,
        duration_sec: tempo_map.seconds_at(last_tick),
    })
}
