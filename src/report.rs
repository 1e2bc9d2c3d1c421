//! Structured report output shared by the validator and health checkers

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;

/// Aggregate outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Pass,
    Fail,
}

impl Status {
    pub fn from_passed(passed: bool) -> Self {
        if passed {
            Status::Pass
        } else {
            Status::Fail
        }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, Status::Pass)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Pass => write!(f, "PASSED"),
            Status::Fail => write!(f, "FAILED"),
        }
    }
}

/// Current UTC time as RFC 3339 with a `Z` suffix
pub fn utc_timestamp() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Pretty-print `value` as JSON into `path` via temp file and rename
pub fn write_json_report<T: Serialize>(value: &T, path: &Path) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let json = serde_json::to_string_pretty(value)?;
    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(json.as_bytes())?;
    temp.write_all(b"\n")?;
    temp.persist(path)?;

    tracing::info!("Report written to {}", path.display());
    Ok(())
}
