//! In-memory note model shared by the CSV parser, the MIDI encoder and the
//! validators.
//!
//! A transcription is a flat, onset-ordered `Vec<Note>`. The legato/slur
//! relation between notes is stored as indices into that vector, so a
//! sequence owns all of its notes and stays plain data.

use crate::error::{DatasetError, Result};
use serde::{Deserialize, Serialize};

/// Whether a note is structurally significant or ornamental
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Significance {
    Essential,
    /// Ornament or ghost note
    NonEssential,
}

impl Significance {
    /// Parse the `essential` column: `1`/`0` in any numeric spelling, or
    /// `true`/`false`, `yes`/`no`
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim().to_ascii_lowercase();
        match raw.as_str() {
            "true" | "yes" => return Some(Significance::Essential),
            "false" | "no" => return Some(Significance::NonEssential),
            _ => {}
        }
        match raw.parse::<f64>() {
            Ok(v) if v == 1.0 => Some(Significance::Essential),
            Ok(v) if v == 0.0 => Some(Significance::NonEssential),
            _ => None,
        }
    }

    pub fn is_essential(&self) -> bool {
        matches!(self, Significance::Essential)
    }
}

/// Metrical position fields, carried through unchanged
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricalPosition {
    pub bar: String,
    pub upmeter: String,
    pub lowmeter: String,
    pub offmeter: String,
}

/// Cross-reference indices into other annotation files, opaque to the encoder
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlignmentRefs {
    pub alignidx: String,
    pub file1idx: String,
    pub file2idx: String,
    pub metralign: String,
}

/// One transcribed note event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    /// Start time in seconds
    pub onset: f64,
    /// End time in seconds
    pub offset: f64,
    /// Pitch at onset on the MIDI scale, sub-semitone precision
    pub onpitch: f64,
    /// Pitch at offset (glide/drift within the note)
    pub offpitch: f64,
    pub significance: Significance,
    pub metrical: MetricalPosition,
    pub notetype: String,
    pub alignment: AlignmentRefs,
    /// Index of the preceding note in a legato chain
    pub previous: Option<usize>,
    /// Index of the following note in a legato chain
    pub next: Option<usize>,
}

impl Note {
    /// Plain essential note without metadata or links
    pub fn new(onset: f64, offset: f64, pitch: f64) -> Self {
        Self {
            onset,
            offset,
            onpitch: pitch,
            offpitch: pitch,
            significance: Significance::Essential,
            metrical: MetricalPosition::default(),
            notetype: String::new(),
            alignment: AlignmentRefs::default(),
            previous: None,
            next: None,
        }
    }

    pub fn duration(&self) -> f64 {
        self.offset - self.onset
    }

    pub fn is_essential(&self) -> bool {
        self.significance.is_essential()
    }
}

/// Note selection policy applied before encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoteFilter {
    /// Every note, ornaments included
    #[default]
    All,
    EssentialOnly,
}

impl NoteFilter {
    pub fn accepts(&self, note: &Note) -> bool {
        match self {
            NoteFilter::All => true,
            NoteFilter::EssentialOnly => note.is_essential(),
        }
    }
}

/// Owned, indexable note sequence
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NoteSequence {
    notes: Vec<Note>,
}

impl NoteSequence {
    pub fn new(notes: Vec<Note>) -> Self {
        Self { notes }
    }

    pub fn len(&self) -> usize {
        self.notes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.notes.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Note> {
        self.notes.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Note> {
        self.notes.iter()
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub fn into_notes(self) -> Vec<Note> {
        self.notes
    }

    /// Index of the first note whose onset precedes its predecessor's
    pub fn first_unordered(&self) -> Option<usize> {
        self.notes
            .windows(2)
            .position(|pair| pair[1].onset < pair[0].onset)
            .map(|i| i + 1)
    }

    /// Check the invariants the encoder relies on: finite times,
    /// `offset > onset`, non-decreasing onsets and consistent links.
    pub fn validate(&self) -> Result<()> {
        for (i, note) in self.notes.iter().enumerate() {
            if !(note.onset.is_finite() && note.offset.is_finite()) {
                return Err(DatasetError::MalformedSequence(format!(
                    "note {} has non-finite timing",
                    i
                )));
            }
            if note.onset < 0.0 {
                return Err(DatasetError::MalformedSequence(format!(
                    "note {} has negative onset {}",
                    i, note.onset
                )));
            }
            if note.offset <= note.onset {
                return Err(DatasetError::MalformedSequence(format!(
                    "note {} has offset {} <= onset {}",
                    i, note.offset, note.onset
                )));
            }
        }

        if let Some(i) = self.first_unordered() {
            return Err(DatasetError::MalformedSequence(format!(
                "onset of note {} ({}) precedes onset of note {} ({})",
                i,
                self.notes[i].onset,
                i - 1,
                self.notes[i - 1].onset
            )));
        }

        self.validate_links()
    }

    fn validate_links(&self) -> Result<()> {
        let len = self.notes.len();
        for (i, note) in self.notes.iter().enumerate() {
            if let Some(j) = note.next {
                if j >= len || j == i {
                    return Err(DatasetError::MalformedSequence(format!(
                        "note {} links next to invalid index {}",
                        i, j
                    )));
                }
                if self.notes[j].previous != Some(i) {
                    return Err(DatasetError::MalformedSequence(format!(
                        "note {} links next to {} but {} does not link back",
                        i, j, j
                    )));
                }
            }
            if let Some(j) = note.previous {
                if j >= len || j == i {
                    return Err(DatasetError::MalformedSequence(format!(
                        "note {} links previous to invalid index {}",
                        i, j
                    )));
                }
                if self.notes[j].next != Some(i) {
                    return Err(DatasetError::MalformedSequence(format!(
                        "note {} links previous to {} but {} does not link forward",
                        i, j, j
                    )));
                }
            }
        }
        Ok(())
    }

    /// Follow `next` links from `start`, returning the visited indices.
    ///
    /// Stops at the first repeated index so a corrupt chain cannot loop.
    pub fn chain(&self, start: usize) -> Vec<usize> {
        let mut visited = Vec::new();
        let mut current = Some(start);
        while let Some(i) = current {
            if i >= self.notes.len() || visited.contains(&i) {
                break;
            }
            visited.push(i);
            current = self.notes[i].next;
        }
        visited
    }

    /// Keep the notes accepted by `keep`, remapping links onto the new
    /// indices. Links to dropped notes are cut, not bridged.
    pub fn filter<F>(&self, keep: F) -> NoteSequence
    where
        F: Fn(&Note) -> bool,
    {
        let mut remap = vec![None; self.notes.len()];
        let mut kept = Vec::new();
        for (i, note) in self.notes.iter().enumerate() {
            if keep(note) {
                remap[i] = Some(kept.len());
                kept.push(note.clone());
            }
        }
        for note in &mut kept {
            note.previous = note.previous.and_then(|j| remap.get(j).copied().flatten());
            note.next = note.next.and_then(|j| remap.get(j).copied().flatten());
        }
        NoteSequence::new(kept)
    }
}

impl<'a> IntoIterator for &'a NoteSequence {
    type Item = &'a Note;
    type IntoIter = std::slice::Iter<'a, Note>;

    fn into_iter(self) -> Self::IntoIter {
        self.notes.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linked(pairs: &[(f64, f64)]) -> NoteSequence {
        let n = pairs.len();
        let notes = pairs
            .iter()
            .enumerate()
            .map(|(i, &(on, off))| {
                let mut note = Note::new(on, off, 60.0);
                note.previous = if i > 0 { Some(i - 1) } else { None };
                note.next = if i + 1 < n { Some(i + 1) } else { None };
                note
            })
            .collect();
        NoteSequence::new(notes)
    }

    #[test]
    fn test_significance_parse() {
        assert_eq!(Significance::parse("1.0"), Some(Significance::Essential));
        assert_eq!(Significance::parse(" TRUE "), Some(Significance::Essential));
        assert_eq!(Significance::parse("0"), Some(Significance::NonEssential));
        assert_eq!(Significance::parse("0.00"), Some(Significance::NonEssential));
        assert_eq!(Significance::parse("0.5"), None);
        assert_eq!(Significance::parse("maybe"), None);
    }

    #[test]
    fn test_valid_linked_sequence() {
        let seq = linked(&[(0.0, 0.5), (0.5, 1.0), (1.0, 1.5)]);
        assert!(seq.validate().is_ok());
        assert_eq!(seq.chain(0), vec![0, 1, 2]);
    }

    #[test]
    fn test_equal_onsets_are_ordered() {
        let seq = NoteSequence::new(vec![Note::new(1.0, 2.0, 60.0), Note::new(1.0, 1.5, 64.0)]);
        assert_eq!(seq.first_unordered(), None);
        assert!(seq.validate().is_ok());
    }

    #[test]
    fn test_non_monotonic_onsets_rejected() {
        let seq = NoteSequence::new(vec![Note::new(1.0, 2.0, 60.0), Note::new(0.5, 1.5, 64.0)]);
        assert_eq!(seq.first_unordered(), Some(1));
        assert!(matches!(seq.validate(), Err(DatasetError::MalformedSequence(_))));
    }

    #[test]
    fn test_zero_length_note_rejected() {
        let seq = NoteSequence::new(vec![Note::new(1.0, 1.0, 60.0)]);
        assert!(matches!(seq.validate(), Err(DatasetError::MalformedSequence(_))));
    }

    #[test]
    fn test_inconsistent_links_rejected() {
        let mut notes = vec![Note::new(0.0, 1.0, 60.0), Note::new(1.0, 2.0, 62.0)];
        notes[0].next = Some(1);
        let seq = NoteSequence::new(notes);
        assert!(matches!(seq.validate(), Err(DatasetError::MalformedSequence(_))));
    }

    #[test]
    fn test_chain_stops_on_cycle() {
        let mut notes = vec![Note::new(0.0, 1.0, 60.0), Note::new(1.0, 2.0, 62.0)];
        notes[0].next = Some(1);
        notes[1].next = Some(0);
        let seq = NoteSequence::new(notes);
        assert_eq!(seq.chain(0), vec![0, 1]);
    }

    #[test]
    fn test_filter_cuts_links_to_removed_notes() {
        let mut seq = linked(&[(0.0, 0.5), (0.5, 1.0), (1.0, 1.5)]).into_notes();
        seq[1].significance = Significance::NonEssential;
        let seq = NoteSequence::new(seq);

        let filtered = seq.filter(|n| NoteFilter::EssentialOnly.accepts(n));
        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered.notes()[0].next, None);
        assert_eq!(filtered.notes()[1].previous, None);
        assert!(filtered.validate().is_ok());
    }
}
