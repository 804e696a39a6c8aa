//! Card manifest: the JSON array of scraped listings that drives image fetching.
//!
//! Records are produced by an external scraper. Only `id`, `grade` and the two
//! image URLs are interpreted; every other field is carried through untouched
//! so a filtered manifest keeps what the scraper wrote.

use crate::error::{MlError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Folder and filename fragment used when a record has no grade or id.
pub const UNKNOWN_LABEL: &str = "unknown";

/// A scalar manifest value that is rendered as text in paths.
///
/// Scrapers emit ids and grades as either strings or numbers. Anything else is
/// kept as raw JSON; `null` renders as `None` and booleans as `True`/`False`,
/// the way the scraper's own tooling prints them, other values as JSON text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Label {
    Number(serde_json::Number),
    Text(String),
    Other(serde_json::Value),
}

impl Label {
    pub fn is_number(&self) -> bool {
        matches!(self, Self::Number(_))
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
            Self::Other(serde_json::Value::Null) => f.write_str("None"),
            Self::Other(serde_json::Value::Bool(true)) => f.write_str("True"),
            Self::Other(serde_json::Value::Bool(false)) => f.write_str("False"),
            Self::Other(v) => write!(f, "{v}"),
        }
    }
}

/// Which face of the card an image URL shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Front,
    Back,
}

impl Side {
    /// Processing order within a record.
    pub const ALL: [Side; 2] = [Side::Front, Side::Back];

    /// Manifest field name; also embedded verbatim in downloaded filenames.
    pub fn field_name(self) -> &'static str {
        match self {
            Self::Front => "imgUrlFront",
            Self::Back => "imgUrlBack",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.field_name())
    }
}

/// One scraped card listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardRecord {
    /// `None` only when the field is absent; an explicit `null` is kept.
    #[serde(
        default,
        deserialize_with = "present_label",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<Label>,
    #[serde(
        default,
        deserialize_with = "present_label",
        skip_serializing_if = "Option::is_none"
    )]
    pub grade: Option<Label>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub img_url_front: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub img_url_back: Option<String>,
    /// Scraper fields this crate does not interpret (`cert`, `error`, ...).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn present_label<'de, D>(deserializer: D) -> std::result::Result<Option<Label>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Label::deserialize(deserializer).map(Some)
}

impl CardRecord {
    /// Grade as folder name, `unknown` when absent.
    pub fn grade_label(&self) -> String {
        self.grade
            .as_ref()
            .map_or_else(|| UNKNOWN_LABEL.to_string(), Label::to_string)
    }

    /// Id as filename prefix, `unknown` when absent.
    pub fn id_label(&self) -> String {
        self.id
            .as_ref()
            .map_or_else(|| UNKNOWN_LABEL.to_string(), Label::to_string)
    }

    /// URL for `side`, or `None` when missing or empty.
    pub fn image_url(&self, side: Side) -> Option<&str> {
        let url = match side {
            Side::Front => self.img_url_front.as_deref(),
            Side::Back => self.img_url_back.as_deref(),
        };
        url.filter(|u| !u.is_empty())
    }

    /// True when the grade is a JSON number.
    pub fn has_numeric_grade(&self) -> bool {
        self.grade.as_ref().is_some_and(Label::is_number)
    }
}

/// Parse a manifest from JSON text.
pub fn parse_manifest(json: &str) -> Result<Vec<CardRecord>> {
    serde_json::from_str(json)
        .map_err(|e| MlError::manifest(format!("Invalid manifest JSON: {e}")))
}

/// Read and parse a manifest file.
pub fn load_manifest(path: &Path) -> Result<Vec<CardRecord>> {
    let content = std::fs::read_to_string(path)?;
    let records = parse_manifest(&content)?;
    tracing::debug!(path = %path.display(), records = records.len(), "Loaded manifest");
    Ok(records)
}

/// Write a manifest as pretty-printed JSON.
pub fn save_manifest(path: &Path, records: &[CardRecord]) -> Result<()> {
    let json = serde_json::to_string_pretty(records)?;
    std::fs::write(path, json)?;
    Ok(())
}

/// Outcome of [`filter_numeric_grades`].
#[derive(Debug, Clone, PartialEq)]
pub struct FilterOutcome {
    pub kept: Vec<CardRecord>,
    pub dropped: usize,
}

/// Keep only records whose grade is a number.
///
/// Scrapes that failed OCR carry string grades, `null` or no grade at all;
/// those records cannot serve as training labels.
pub fn filter_numeric_grades(records: Vec<CardRecord>) -> FilterOutcome {
    let total = records.len();
    let kept: Vec<CardRecord> = records
        .into_iter()
        .filter(CardRecord::has_numeric_grade)
        .collect();
    let dropped = total - kept.len();
    FilterOutcome { kept, dropped }
}
