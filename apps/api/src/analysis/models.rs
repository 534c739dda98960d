//! Analysis data model: the six sections, their reveal flags, and progress phases.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// ────────────────────────────────────────────────────────────────────────────
// Section names
// ────────────────────────────────────────────────────────────────────────────

/// The six named sections of an analysis, in protocol order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    Misperception,
    Essence,
    Threshold,
    Skills,
    Experience,
    Conclusion,
}

impl SectionKind {
    pub const ALL: [SectionKind; 6] = [
        SectionKind::Misperception,
        SectionKind::Essence,
        SectionKind::Threshold,
        SectionKind::Skills,
        SectionKind::Experience,
        SectionKind::Conclusion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SectionKind::Misperception => "misperception",
            SectionKind::Essence => "essence",
            SectionKind::Threshold => "threshold",
            SectionKind::Skills => "skills",
            SectionKind::Experience => "experience",
            SectionKind::Conclusion => "conclusion",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        SectionKind::ALL.into_iter().find(|k| k.as_str() == name)
    }
}

impl fmt::Display for SectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Section payloads
// ────────────────────────────────────────────────────────────────────────────
//
// Fields default to empty so a model that drops a field still yields a section.
// Fields of the wrong JSON type are coerced: scalars become text, a lone value
// where a list belongs becomes a one-item list.

/// Renders any JSON value as display text. Arrays are joined with "; ".
fn value_to_text(value: Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text,
        Value::Array(items) => items
            .into_iter()
            .map(value_to_text)
            .filter(|t| !t.trim().is_empty())
            .collect::<Vec<_>>()
            .join("; "),
        other => other.to_string(),
    }
}

fn lenient_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(value_to_text(Value::deserialize(deserializer)?))
}

fn lenient_list<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    let items = match Value::deserialize(deserializer)? {
        Value::Array(items) => items.into_iter().map(value_to_text).collect(),
        other => vec![value_to_text(other)],
    };
    Ok(items.into_iter().filter(|t| !t.trim().is_empty()).collect())
}

/// Builds a section from any payload. Anything that is not an object yields an
/// empty section plus the untouched payload.
fn coerce_section<T: DeserializeOwned + Default>(data: Value) -> (T, Option<Value>) {
    if data.is_object() {
        if let Ok(section) = serde_json::from_value(data.clone()) {
            return (section, None);
        }
    }
    (T::default(), Some(data))
}

fn lenient_section<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        data => Ok(Some(coerce_section(data).0)),
    }
}

/// A single myth-busting statement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Misperception {
    #[serde(rename = "type", deserialize_with = "lenient_text")]
    pub kind: String,
    #[serde(deserialize_with = "lenient_text")]
    pub title: String,
    #[serde(deserialize_with = "lenient_text")]
    pub content: String,
}

/// The occupation's categorical placement.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Essence {
    #[serde(deserialize_with = "lenient_text")]
    pub summary: String,
    #[serde(deserialize_with = "lenient_text")]
    pub industry: String,
    #[serde(deserialize_with = "lenient_text")]
    pub role: String,
}

/// Entry-barrier assessment. `path` is an ordered list of remediation options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Threshold {
    #[serde(deserialize_with = "lenient_text")]
    pub level: String,
    #[serde(rename = "match", deserialize_with = "lenient_text")]
    pub fit: String,
    #[serde(deserialize_with = "lenient_list")]
    pub path: Vec<String>,
}

/// Required competencies and matching exercises.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Skills {
    #[serde(deserialize_with = "lenient_list")]
    pub core: Vec<String>,
    #[serde(rename = "match", deserialize_with = "lenient_text")]
    pub fit: String,
    #[serde(deserialize_with = "lenient_list")]
    pub practice: Vec<String>,
}

/// Day-to-day fit assessment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Experience {
    #[serde(deserialize_with = "lenient_text")]
    pub scene: String,
    #[serde(deserialize_with = "lenient_text")]
    pub value: String,
    #[serde(deserialize_with = "lenient_text")]
    pub fit_test: String,
}

/// Final verdict and the single next action.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Conclusion {
    #[serde(deserialize_with = "lenient_text")]
    pub feasibility: String,
    #[serde(deserialize_with = "lenient_text")]
    pub priority_action: String,
}

// ────────────────────────────────────────────────────────────────────────────
// AnalysisResult
// ────────────────────────────────────────────────────────────────────────────

/// The six-section analysis. Every section is optional until populated.
///
/// Sections with names outside the six are kept in `extra`; they are
/// serialized alongside the known ones but never revealed. A known section
/// whose payload was not an object keeps that payload in `raw`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    #[serde(
        default,
        deserialize_with = "lenient_section",
        skip_serializing_if = "Option::is_none"
    )]
    pub misperception: Option<Misperception>,
    #[serde(
        default,
        deserialize_with = "lenient_section",
        skip_serializing_if = "Option::is_none"
    )]
    pub essence: Option<Essence>,
    #[serde(
        default,
        deserialize_with = "lenient_section",
        skip_serializing_if = "Option::is_none"
    )]
    pub threshold: Option<Threshold>,
    #[serde(
        default,
        deserialize_with = "lenient_section",
        skip_serializing_if = "Option::is_none"
    )]
    pub skills: Option<Skills>,
    #[serde(
        default,
        deserialize_with = "lenient_section",
        skip_serializing_if = "Option::is_none"
    )]
    pub experience: Option<Experience>,
    #[serde(
        default,
        deserialize_with = "lenient_section",
        skip_serializing_if = "Option::is_none"
    )]
    pub conclusion: Option<Conclusion>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub raw: BTreeMap<String, Value>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

/// What `AnalysisResult::apply_section` did with an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Known(SectionKind),
    /// Stored in the side-channel only.
    Unknown,
}

impl AnalysisResult {
    /// Stores `data` under `name`, fully replacing any previous value for that
    /// section. No field-level merge. Never rejects a payload.
    pub fn apply_section(&mut self, name: &str, data: Value) -> Applied {
        let Some(kind) = SectionKind::from_name(name) else {
            self.extra.insert(name.to_string(), data);
            return Applied::Unknown;
        };

        let raw = match kind {
            SectionKind::Misperception => store(&mut self.misperception, data),
            SectionKind::Essence => store(&mut self.essence, data),
            SectionKind::Threshold => store(&mut self.threshold, data),
            SectionKind::Skills => store(&mut self.skills, data),
            SectionKind::Experience => store(&mut self.experience, data),
            SectionKind::Conclusion => store(&mut self.conclusion, data),
        };
        match raw {
            Some(raw) => self.raw.insert(kind.to_string(), raw),
            None => self.raw.remove(kind.as_str()),
        };
        Applied::Known(kind)
    }

    pub fn has(&self, kind: SectionKind) -> bool {
        match kind {
            SectionKind::Misperception => self.misperception.is_some(),
            SectionKind::Essence => self.essence.is_some(),
            SectionKind::Threshold => self.threshold.is_some(),
            SectionKind::Skills => self.skills.is_some(),
            SectionKind::Experience => self.experience.is_some(),
            SectionKind::Conclusion => self.conclusion.is_some(),
        }
    }

    /// The stored payload of one section, re-serialized.
    pub fn section_value(&self, kind: SectionKind) -> Option<Value> {
        let value = match kind {
            SectionKind::Misperception => self.misperception.as_ref().map(serde_json::to_value),
            SectionKind::Essence => self.essence.as_ref().map(serde_json::to_value),
            SectionKind::Threshold => self.threshold.as_ref().map(serde_json::to_value),
            SectionKind::Skills => self.skills.as_ref().map(serde_json::to_value),
            SectionKind::Experience => self.experience.as_ref().map(serde_json::to_value),
            SectionKind::Conclusion => self.conclusion.as_ref().map(serde_json::to_value),
        };
        value.and_then(Result::ok)
    }

    pub fn known_section_count(&self) -> usize {
        SectionKind::ALL.iter().filter(|k| self.has(**k)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.known_section_count() == 0 && self.extra.is_empty()
    }
}

fn store<T: DeserializeOwned + Default>(slot: &mut Option<T>, data: Value) -> Option<Value> {
    let (section, raw) = coerce_section(data);
    *slot = Some(section);
    raw
}

// ────────────────────────────────────────────────────────────────────────────
// RevealState
// ────────────────────────────────────────────────────────────────────────────

/// One flag per section. Flags only ever go false → true; a fresh
/// `RevealState` is the only way back to all-false.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealState {
    pub misperception: bool,
    pub essence: bool,
    pub threshold: bool,
    pub skills: bool,
    pub experience: bool,
    pub conclusion: bool,
}

impl RevealState {
    pub fn reveal(&mut self, kind: SectionKind) {
        *self.flag_mut(kind) = true;
    }

    pub fn reveal_all(&mut self) {
        for kind in SectionKind::ALL {
            self.reveal(kind);
        }
    }

    pub fn is_revealed(&self, kind: SectionKind) -> bool {
        match kind {
            SectionKind::Misperception => self.misperception,
            SectionKind::Essence => self.essence,
            SectionKind::Threshold => self.threshold,
            SectionKind::Skills => self.skills,
            SectionKind::Experience => self.experience,
            SectionKind::Conclusion => self.conclusion,
        }
    }

    pub fn all_revealed(&self) -> bool {
        SectionKind::ALL.iter().all(|k| self.is_revealed(*k))
    }

    pub fn revealed_count(&self) -> usize {
        SectionKind::ALL
            .iter()
            .filter(|k| self.is_revealed(**k))
            .count()
    }

    fn flag_mut(&mut self, kind: SectionKind) -> &mut bool {
        match kind {
            SectionKind::Misperception => &mut self.misperception,
            SectionKind::Essence => &mut self.essence,
            SectionKind::Threshold => &mut self.threshold,
            SectionKind::Skills => &mut self.skills,
            SectionKind::Experience => &mut self.experience,
            SectionKind::Conclusion => &mut self.conclusion,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// AnalysisState
// ────────────────────────────────────────────────────────────────────────────

/// Result plus reveal flags for one request. Each request gets a fresh one.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AnalysisState {
    pub result: AnalysisResult,
    pub reveal: RevealState,
}

impl AnalysisState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a section and reveals it when it is one of the six.
    pub fn apply_section(&mut self, name: &str, data: Value) -> Applied {
        let applied = self.result.apply_section(name, data);
        if let Applied::Known(kind) = applied {
            self.reveal.reveal(kind);
        }
        applied
    }

    /// Installs a whole result at once and flips every flag together.
    pub fn apply_whole(&mut self, result: AnalysisResult) {
        self.result = result;
        self.reveal.reveal_all();
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Phase
// ────────────────────────────────────────────────────────────────────────────

/// Coarse progress of a session, in the order a request moves through it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    Validating,
    Requesting,
    Streaming,
    Rendering,
    Done,
    Failed,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Done | Phase::Failed)
    }
}
