//! Threat policy: maps detector labels to threat levels and folds a frame's
//! detections into a single verdict.
//!
//! The table is built once at process start and shared read-only. Lookups are
//! exact-string and case-sensitive; a label that is not in the table is SAFE.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::detect::Detection;

/// Discrete threat level, ordered `Safe < Caution < Danger`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE", try_from = "String")]
pub enum ThreatLevel {
    #[default]
    Safe,
    Caution,
    Danger,
}

impl ThreatLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreatLevel::Safe => "SAFE",
            ThreatLevel::Caution => "CAUTION",
            ThreatLevel::Danger => "DANGER",
        }
    }
}

impl fmt::Display for ThreatLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThreatLevel {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "SAFE" => Ok(ThreatLevel::Safe),
            "CAUTION" => Ok(ThreatLevel::Caution),
            "DANGER" => Ok(ThreatLevel::Danger),
            other => Err(anyhow!(
                "unknown threat level '{}'; expected SAFE, CAUTION or DANGER",
                other
            )),
        }
    }
}

impl TryFrom<String> for ThreatLevel {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

/// Label to threat level mapping. Total by default: absent labels are SAFE.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ThreatPolicyTable {
    levels: HashMap<String, ThreatLevel>,
}

/// Canonical table shipped with the service.
const DEFAULT_POLICY: &[(&str, ThreatLevel)] = &[
    ("person", ThreatLevel::Safe),
    ("cell phone", ThreatLevel::Caution),
    ("bottle", ThreatLevel::Caution),
    ("cup", ThreatLevel::Caution),
    ("knife", ThreatLevel::Danger),
    ("scissors", ThreatLevel::Danger),
    ("gun", ThreatLevel::Danger),
];

#[derive(Debug, Deserialize)]
struct PolicyFile {
    #[serde(default)]
    labels: HashMap<String, ThreatLevel>,
}

impl ThreatPolicyTable {
    /// Empty table: every label resolves to SAFE.
    pub fn empty() -> Self {
        Self {
            levels: HashMap::new(),
        }
    }

    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, ThreatLevel)>,
        S: Into<String>,
    {
        Self {
            levels: entries
                .into_iter()
                .map(|(label, level)| (label.into(), level))
                .collect(),
        }
    }

    /// Parse a TOML policy document with a `[labels]` table.
    ///
    /// ```toml
    /// [labels]
    /// "knife" = "DANGER"
    /// "cell phone" = "CAUTION"
    /// ```
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: PolicyFile = toml::from_str(raw).context("invalid policy table")?;
        for label in file.labels.keys() {
            if label.is_empty() {
                return Err(anyhow!("policy table contains an empty label"));
            }
        }
        Ok(Self {
            levels: file.labels,
        })
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read policy table {}", path.display()))?;
        Self::from_toml_str(&raw)
            .with_context(|| format!("failed to load policy table {}", path.display()))
    }

    /// Apply environment-specific overrides on top of this table.
    pub fn with_overrides(mut self, overrides: &HashMap<String, ThreatLevel>) -> Self {
        for (label, level) in overrides {
            self.levels.insert(label.clone(), *level);
        }
        self
    }

    /// Level for a label. Exact match, no normalization.
    pub fn level_for(&self, label: &str) -> ThreatLevel {
        self.levels.get(label).copied().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }
}

impl Default for ThreatPolicyTable {
    fn default() -> Self {
        Self::from_entries(DEFAULT_POLICY.iter().copied())
    }
}

/// One inventory entry in the assessment output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectEntry {
    #[serde(rename = "class")]
    pub label: String,
    pub confidence: f64,
}

impl ObjectEntry {
    fn from_detection(detection: &Detection) -> Self {
        Self {
            label: detection.label.clone(),
            confidence: round_confidence(detection.confidence),
        }
    }
}

/// Two decimal places, as reported to operators.
fn round_confidence(confidence: f32) -> f64 {
    (f64::from(confidence) * 100.0).round() / 100.0
}

/// Outcome of resolving one frame's detections.
#[derive(Clone, Debug, PartialEq)]
pub struct Verdict {
    pub level: ThreatLevel,
    /// Label of the first detection that reached `level`. `None` when SAFE.
    pub driving_label: Option<String>,
    /// Every detection, in emission order.
    pub objects: Vec<ObjectEntry>,
}

/// Fold detections into a verdict.
///
/// The level is the maximum over the table lookups. Once DANGER is reached no
/// further lookups happen, but the inventory still records every detection.
pub fn resolve(detections: &[Detection], table: &ThreatPolicyTable) -> Verdict {
    let mut level = ThreatLevel::Safe;
    let mut driving_label = None;
    let mut objects = Vec::with_capacity(detections.len());

    for detection in detections {
        objects.push(ObjectEntry::from_detection(detection));
        if level == ThreatLevel::Danger {
            continue;
        }
        let candidate = table.level_for(&detection.label);
        if candidate > level {
            level = candidate;
            driving_label = Some(detection.label.clone());
        }
    }

    Verdict {
        level,
        driving_label,
        objects,
    }
}
