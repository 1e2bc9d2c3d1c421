//! Ground-truth transcription CSV reader
//!
//! Rows are parsed independently. A row with a malformed required field is
//! skipped and recorded as a [`RowError`]; the remaining rows still produce
//! notes. Row order is preserved exactly as read.

use crate::error::{DatasetError, Result};
use crate::note::{AlignmentRefs, MetricalPosition, Note, NoteSequence, Significance};
use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{debug, warn};

/// Every column of the transcription format, in documented order
pub const COLUMNS: [&str; 16] = [
    "onset", "offset", "onpitch", "offpitch", "essential", "bar", "upmeter", "lowmeter",
    "offmeter", "notetype", "alignidx", "file1idx", "file2idx", "metralign", "previous", "next",
];

/// Columns without which a file cannot be converted
pub const REQUIRED_COLUMNS: [&str; 3] = ["onset", "offset", "onpitch"];

/// A data row that could not be turned into a note
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowError {
    /// 0-based data row (header excluded)
    pub row: usize,
    pub column: Option<String>,
    pub value: String,
    pub message: String,
}

impl std::fmt::Display for RowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.column {
            Some(column) => write!(
                f,
                "row {}: column '{}' value '{}': {}",
                self.row, column, self.value, self.message
            ),
            None => write!(f, "row {}: {}", self.row, self.message),
        }
    }
}

/// Non-fatal observations made while parsing
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParseWarning {
    /// Onset earlier than the previous accepted note's onset
    OutOfOrderOnset {
        row: usize,
        onset: f64,
        previous_onset: f64,
    },
    /// `previous`/`next` refers to a row that is missing or was skipped
    DanglingLink {
        row: usize,
        column: String,
        target: usize,
    },
    /// A link the target row does not mirror; dropped
    UnreciprocatedLink {
        row: usize,
        column: String,
        target: usize,
    },
}

/// Parser output: accepted notes plus the row-level side channel
#[derive(Debug, Clone, Default)]
pub struct ParsedNotes {
    pub notes: NoteSequence,
    pub errors: Vec<RowError>,
    pub warnings: Vec<ParseWarning>,
}

/// Header name to field position
struct ColumnIndex {
    positions: HashMap<String, usize>,
}

impl ColumnIndex {
    fn from_headers(headers: &csv::StringRecord) -> Self {
        let positions = headers
            .iter()
            .enumerate()
            .map(|(i, name)| (name.trim().to_string(), i))
            .collect();
        Self { positions }
    }

    fn contains(&self, column: &str) -> bool {
        self.positions.contains_key(column)
    }

    fn get<'r>(&self, record: &'r csv::StringRecord, column: &str) -> Option<&'r str> {
        self.positions
            .get(column)
            .and_then(|&i| record.get(i))
            .map(str::trim)
    }

    fn text(&self, record: &csv::StringRecord, column: &str) -> String {
        self.get(record, column).unwrap_or_default().to_string()
    }
}

/// A parsed row before link targets are resolved to note indices
struct RawNote {
    row: usize,
    note: Note,
    previous_row: Option<usize>,
    next_row: Option<usize>,
}

/// Parse a transcription CSV file
pub fn parse_notes_file<P: AsRef<Path>>(path: P) -> Result<ParsedNotes> {
    let path = path.as_ref();
    let file = File::open(path)?;
    parse_notes(file, path)
}

/// Parse transcription CSV from any reader; `source` names it in errors
pub fn parse_notes<R: Read>(reader: R, source: &Path) -> Result<ParsedNotes> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let columns = ColumnIndex::from_headers(csv_reader.headers()?);
    for column in REQUIRED_COLUMNS {
        if !columns.contains(column) {
            return Err(DatasetError::MissingColumn {
                path: source.to_path_buf(),
                column: column.to_string(),
            });
        }
    }

    for name in columns.positions.keys() {
        if !COLUMNS.contains(&name.as_str()) {
            debug!(source = %source.display(), column = %name, "Ignoring unknown column");
        }
    }

    let mut raw_notes: Vec<RawNote> = Vec::new();
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    for (row, record) in csv_reader.records().enumerate() {
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                errors.push(RowError {
                    row,
                    column: None,
                    value: String::new(),
                    message: e.to_string(),
                });
                continue;
            }
        };

        match parse_row(&columns, &record, row) {
            Ok(raw) => {
                if let Some(last) = raw_notes.last() {
                    if raw.note.onset < last.note.onset {
                        warnings.push(ParseWarning::OutOfOrderOnset {
                            row,
                            onset: raw.note.onset,
                            previous_onset: last.note.onset,
                        });
                    }
                }
                raw_notes.push(raw);
            }
            Err(e) => errors.push(e),
        }
    }

    let notes = resolve_links(raw_notes, &mut warnings);

    if !errors.is_empty() {
        warn!(
            source = %source.display(),
            skipped = errors.len(),
            "Skipped malformed rows"
        );
    }
    debug!(
        source = %source.display(),
        notes = notes.len(),
        warnings = warnings.len(),
        "Parsed transcription"
    );

    Ok(ParsedNotes {
        notes,
        errors,
        warnings,
    })
}

fn parse_row(
    columns: &ColumnIndex,
    record: &csv::StringRecord,
    row: usize,
) -> std::result::Result<RawNote, RowError> {
    let onset = parse_float(columns, record, row, "onset")?;
    let offset = parse_float(columns, record, row, "offset")?;
    let onpitch = parse_float(columns, record, row, "onpitch")?;
    let offpitch = if columns.contains("offpitch") {
        parse_float(columns, record, row, "offpitch")?
    } else {
        onpitch
    };

    let significance = match columns.get(record, "essential") {
        None | Some("") => Significance::Essential,
        Some(raw) => Significance::parse(raw).ok_or_else(|| RowError {
            row,
            column: Some("essential".to_string()),
            value: raw.to_string(),
            message: "expected a boolean flag".to_string(),
        })?,
    };

    let previous_row = parse_link(columns, record, row, "previous")?;
    let next_row = parse_link(columns, record, row, "next")?;

    let note = Note {
        onset,
        offset,
        onpitch,
        offpitch,
        significance,
        metrical: MetricalPosition {
            bar: columns.text(record, "bar"),
            upmeter: columns.text(record, "upmeter"),
            lowmeter: columns.text(record, "lowmeter"),
            offmeter: columns.text(record, "offmeter"),
        },
        notetype: columns.text(record, "notetype"),
        alignment: AlignmentRefs {
            alignidx: columns.text(record, "alignidx"),
            file1idx: columns.text(record, "file1idx"),
            file2idx: columns.text(record, "file2idx"),
            metralign: columns.text(record, "metralign"),
        },
        previous: None,
        next: None,
    };

    Ok(RawNote {
        row,
        note,
        previous_row,
        next_row,
    })
}

fn parse_float(
    columns: &ColumnIndex,
    record: &csv::StringRecord,
    row: usize,
    column: &str,
) -> std::result::Result<f64, RowError> {
    let raw = columns.get(record, column).unwrap_or_default();
    let error = |message: &str| RowError {
        row,
        column: Some(column.to_string()),
        value: raw.to_string(),
        message: message.to_string(),
    };
    let value: f64 = raw.parse().map_err(|_| error("not a number"))?;
    if !value.is_finite() {
        return Err(error("not a finite number"));
    }
    Ok(value)
}

/// Empty, negative and NaN link cells mean "no link"
fn parse_link(
    columns: &ColumnIndex,
    record: &csv::StringRecord,
    row: usize,
    column: &str,
) -> std::result::Result<Option<usize>, RowError> {
    let raw = match columns.get(record, column) {
        None | Some("") => return Ok(None),
        Some(raw) => raw,
    };
    let error = |message: &str| RowError {
        row,
        column: Some(column.to_string()),
        value: raw.to_string(),
        message: message.to_string(),
    };
    let value: f64 = raw.parse().map_err(|_| error("not a row index"))?;
    if value.is_nan() || value < 0.0 {
        return Ok(None);
    }
    if value.fract() != 0.0 || !value.is_finite() {
        return Err(error("row index must be a whole number"));
    }
    Ok(Some(value as usize))
}

/// Map row-based link targets onto indices of accepted notes
fn resolve_links(raw_notes: Vec<RawNote>, warnings: &mut Vec<ParseWarning>) -> NoteSequence {
    let row_to_index: HashMap<usize, usize> = raw_notes
        .iter()
        .enumerate()
        .map(|(index, raw)| (raw.row, index))
        .collect();

    let mut resolve = |row: usize, column: &str, target: Option<usize>| {
        target.and_then(|target| match row_to_index.get(&target) {
            Some(&index) => Some(index),
            None => {
                warnings.push(ParseWarning::DanglingLink {
                    row,
                    column: column.to_string(),
                    target,
                });
                None
            }
        })
    };

    let rows: Vec<usize> = raw_notes.iter().map(|raw| raw.row).collect();
    let mut notes: Vec<Note> = raw_notes
        .into_iter()
        .map(|raw| {
            let mut note = raw.note;
            note.previous = resolve(raw.row, "previous", raw.previous_row);
            note.next = resolve(raw.row, "next", raw.next_row);
            note
        })
        .collect();

    // Keep only links confirmed from both ends
    let mirrored: Vec<(bool, bool)> = notes
        .iter()
        .enumerate()
        .map(|(i, note)| {
            let previous_ok = note
                .previous
                .map_or(true, |j| j != i && notes[j].next == Some(i));
            let next_ok = note
                .next
                .map_or(true, |j| j != i && notes[j].previous == Some(i));
            (previous_ok, next_ok)
        })
        .collect();
    for (i, (previous_ok, next_ok)) in mirrored.into_iter().enumerate() {
        let note = &mut notes[i];
        let dropped = [
            ("previous", if previous_ok { None } else { note.previous.take() }),
            ("next", if next_ok { None } else { note.next.take() }),
        ];
        for (column, target) in dropped {
            if let Some(j) = target {
                warnings.push(ParseWarning::UnreciprocatedLink {
                    row: rows[i],
                    column: column.to_string(),
                    target: rows[j],
                });
            }
        }
    }

    NoteSequence::new(notes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<ParsedNotes> {
        parse_notes(text.as_bytes(), Path::new("inline.csv"))
    }

    #[test]
    fn test_full_schema_row() {
        let text = "onset,offset,onpitch,offpitch,essential,bar,upmeter,lowmeter,offmeter,notetype,alignidx,file1idx,file2idx,metralign,previous,next\n\
                    1.0,1.5,78.36,79.0,1,3,2,4,0.25,grace,7,8,9,10,,\n";
        let parsed = parse(text).unwrap();
        assert!(parsed.errors.is_empty());
        let note = &parsed.notes.notes()[0];
        assert_eq!(note.onset, 1.0);
        assert_eq!(note.offpitch, 79.0);
        assert_eq!(note.metrical.bar, "3");
        assert_eq!(note.notetype, "grace");
        assert_eq!(note.alignment.metralign, "10");
        assert_eq!(note.previous, None);
    }

    #[test]
    fn test_minimal_columns_default_optional_fields() {
        let parsed = parse("onset,offset,onpitch\n0.0,0.5,60.25\n").unwrap();
        let note = &parsed.notes.notes()[0];
        assert_eq!(note.offpitch, 60.25);
        assert!(note.is_essential());
    }

    #[test]
    fn test_missing_required_column() {
        let result = parse("start,end,pitch\n0.0,0.5,60.0\n");
        assert!(matches!(
            result,
            Err(DatasetError::MissingColumn { ref column, .. }) if column == "onset"
        ));
    }

    #[test]
    fn test_malformed_row_is_collected_not_fatal() {
        let parsed = parse("onset,offset,onpitch\n0.0,0.5,60\nabc,1.0,62\n1.0,1.5,64\n").unwrap();
        assert_eq!(parsed.notes.len(), 2);
        assert_eq!(parsed.errors.len(), 1);
        assert_eq!(parsed.errors[0].row, 1);
        assert_eq!(parsed.errors[0].column.as_deref(), Some("onset"));
    }

    #[test]
    fn test_non_finite_rejected() {
        let parsed = parse("onset,offset,onpitch\n0.0,inf,60\n").unwrap();
        assert!(parsed.notes.is_empty());
        assert_eq!(parsed.errors.len(), 1);
    }

    #[test]
    fn test_out_of_order_onset_warns_but_keeps_order() {
        let parsed = parse("onset,offset,onpitch\n1.0,1.5,60\n0.5,0.9,62\n").unwrap();
        assert_eq!(parsed.notes.len(), 2);
        assert_eq!(parsed.notes.notes()[0].onset, 1.0);
        assert!(matches!(
            parsed.warnings[0],
            ParseWarning::OutOfOrderOnset { row: 1, .. }
        ));
    }

    #[test]
    fn test_links_remapped_past_skipped_rows() {
        let text = "onset,offset,onpitch,previous,next\n\
                    0.0,0.5,60,,2\n\
                    bad,0.7,61,,\n\
                    0.5,1.0,62,0,-1\n";
        let parsed = parse(text).unwrap();
        let notes = parsed.notes.notes();
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0].next, Some(1));
        assert_eq!(notes[1].previous, Some(0));
        assert_eq!(notes[1].next, None);
        assert!(parsed.notes.validate().is_ok());
    }

    #[test]
    fn test_dangling_link_dropped_with_warning() {
        let parsed = parse("onset,offset,onpitch,previous,next\n0.0,0.5,60,,7.0\n").unwrap();
        assert_eq!(parsed.notes.notes()[0].next, None);
        assert_eq!(
            parsed.warnings,
            vec![ParseWarning::DanglingLink {
                row: 0,
                column: "next".to_string(),
                target: 7
            }]
        );
    }

    #[test]
    fn test_one_sided_link_dropped() {
        let text = "onset,offset,onpitch,previous,next\n\
                    0.0,0.5,60,,1\n\
                    0.5,1.0,62,,\n";
        let parsed = parse(text).unwrap();
        assert_eq!(parsed.notes.notes()[0].next, None);
        assert!(matches!(
            parsed.warnings[0],
            ParseWarning::UnreciprocatedLink { row: 0, target: 1, .. }
        ));
        assert!(parsed.notes.validate().is_ok());
    }

    #[test]
    fn test_headers_only_yields_empty_sequence() {
        let parsed = parse("onset,offset,onpitch\n").unwrap();
        assert!(parsed.notes.is_empty());
        assert!(parsed.errors.is_empty());
    }
}
