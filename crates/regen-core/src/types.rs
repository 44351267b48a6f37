use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

// ---------------------------------------------------------------------------
// Tier
// ---------------------------------------------------------------------------

/// Page priority classification. Scheduling hint only.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(try_from = "u8", into = "u8")]
pub enum Tier {
    Overview = 1,
    #[default]
    Standard = 2,
    Detailed = 3,
}

impl TryFrom<u8> for Tier {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(Tier::Overview),
            2 => Ok(Tier::Standard),
            3 => Ok(Tier::Detailed),
            _ => Err(format!("invalid tier {v}: must be 1, 2, or 3")),
        }
    }
}

impl From<Tier> for u8 {
    fn from(t: Tier) -> u8 {
        t as u8
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as u8)
    }
}

// ---------------------------------------------------------------------------
// Mode
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Preview,
    #[default]
    Apply,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Preview => "preview",
            Mode::Apply => "apply",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// PageContent
// ---------------------------------------------------------------------------

/// Provenance stamped onto live content on every write.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContentProvenance {
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_agents: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub source_tools: Vec<String>,
    /// `"<event_type>:<source_id>"` of the event that caused the write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restored_from: Option<DateTime<Utc>>,
}

/// One page of AI-maintained content as held by the content store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageContent {
    pub page_id: String,
    pub body: serde_json::Value,
    #[serde(default)]
    pub provenance: ContentProvenance,
}

impl PageContent {
    pub fn new(page_id: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            page_id: page_id.into(),
            body,
            provenance: ContentProvenance::default(),
        }
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(&self.body)
    }
}

/// SHA-256 hex digest of a body's JSON serialization.
///
/// `serde_json` keeps object keys sorted (no `preserve_order`), so equal
/// values always hash equal.
pub fn fingerprint(body: &serde_json::Value) -> String {
    let bytes = serde_json::to_vec(body).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    format!("{digest:x}")
}
