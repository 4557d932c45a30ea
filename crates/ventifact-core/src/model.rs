use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::digest::BlueprintId;

/// CI system a test run came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Appveyor,
    Circleci,
}

impl Source {
    pub fn as_str(self) -> &'static str {
        match self {
            Source::Appveyor => "appveyor",
            Source::Circleci => "circleci",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "appveyor" => Some(Source::Appveyor),
            "circleci" => Some(Source::Circleci),
            _ => None,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a run within its CI system (build id for AppVeyor, job id for
/// CircleCI).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId {
    pub source: Source,
    pub ext_id: i64,
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.source, self.ext_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub title: String,
    pub passed: bool,
}

/// One concrete test run as delivered by a collector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestRun {
    #[serde(flatten)]
    pub id: RunId,
    pub results: Vec<TestResult>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(with = "hex_bytes")]
    pub commit_id: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrStatus {
    Success,
    Failure,
    Neutral,
    Unknown,
}

impl PrStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PrStatus::Success => "success",
            PrStatus::Failure => "failure",
            PrStatus::Neutral => "neutral",
            PrStatus::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(PrStatus::Success),
            "failure" => Some(PrStatus::Failure),
            "neutral" => Some(PrStatus::Neutral),
            "unknown" => Some(PrStatus::Unknown),
            _ => None,
        }
    }
}

/// Merged pull request. Shares the store's retention semantics but sits
/// outside the dedup graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pr {
    pub number: i64,
    pub merged_at: DateTime<Utc>,
    pub status: PrStatus,
}

/// Per-date PR status buckets for the health chart.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PrStatusCounts {
    pub success: u64,
    pub failure: u64,
    pub neutral: u64,
    pub unknown: u64,
}

/// Dashboard view of a run: identity plus whether everything passed.
#[derive(Debug, Clone, Serialize)]
pub struct RecentTestRun {
    #[serde(flatten)]
    pub id: RunId,
    pub timestamp: DateTime<Utc>,
    #[serde(with = "hex_bytes")]
    pub commit_id: Vec<u8>,
    pub succeeded: bool,
}

/// Dashboard view of a flake, joined to the test title and run timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct RecentTestFlake {
    #[serde(flatten)]
    pub run: RunId,
    pub test_id: BlueprintId,
    pub title: String,
    pub timestamp: DateTime<Utc>,
}

/// Commit hashes travel as hex strings in JSON, raw bytes everywhere else.
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(&s).map_err(serde::de::Error::custom)
    }
}
