//! Run manifest written next to the extracted pages

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MANIFEST_FILE: &str = "manifest.json";

/// How a split ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SplitOutcome {
    Completed,
    Failed { error: String },
    /// Stopped by a shutdown request before its last page
    Interrupted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitRecord {
    pub index: usize,
    pub start: u64,
    pub end: u64,
    pub batch_size: u64,
    pub pages: u64,
    pub bytes: u64,
    #[serde(flatten)]
    pub outcome: SplitOutcome,
}

/// Summary of one extraction run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractManifest {
    pub entity: String,
    pub base_url: String,
    pub available: u64,
    pub splits: Vec<SplitRecord>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ExtractManifest {
    pub fn total_pages(&self) -> u64 {
        self.splits.iter().map(|s| s.pages).sum()
    }

    pub fn total_bytes(&self) -> u64 {
        self.splits.iter().map(|s| s.bytes).sum()
    }

    pub fn count(&self, matches: impl Fn(&SplitOutcome) -> bool) -> usize {
        self.splits.iter().filter(|s| matches(&s.outcome)).count()
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, SplitOutcome::Failed { .. }))
    }

    pub fn is_complete(&self) -> bool {
        self.splits
            .iter()
            .all(|s| s.outcome == SplitOutcome::Completed)
    }

    /// Write `dir/manifest.json`
    pub fn write_to(&self, dir: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(dir.join(MANIFEST_FILE), json)
    }

    pub fn read_from(dir: &Path) -> std::io::Result<Self> {
        let json = std::fs::read_to_string(dir.join(MANIFEST_FILE))?;
        serde_json::from_str(&json).map_err(std::io::Error::other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(index: usize, outcome: SplitOutcome) -> SplitRecord {
        SplitRecord {
            index,
            start: 1,
            end: 10,
            batch_size: 5,
            pages: 2,
            bytes: 100,
            outcome,
        }
    }

    fn manifest(splits: Vec<SplitRecord>) -> ExtractManifest {
        let now = Utc::now();
        ExtractManifest {
            entity: "User".to_string(),
            base_url: "https://api.example.com/odata/v2".to_string(),
            available: 10,
            splits,
            started_at: now,
            finished_at: now,
        }
    }

    #[test]
    fn totals_and_counts() {
        let m = manifest(vec![
            record(0, SplitOutcome::Completed),
            record(1, SplitOutcome::Failed {
                error: "HTTP 500".to_string(),
            }),
            record(2, SplitOutcome::Interrupted),
        ]);
        assert_eq!(m.total_pages(), 6);
        assert_eq!(m.total_bytes(), 300);
        assert_eq!(m.failed(), 1);
        assert_eq!(m.count(|o| *o == SplitOutcome::Interrupted), 1);
        assert!(!m.is_complete());
    }

    #[test]
    fn outcome_is_flattened_into_split() {
        let json = serde_json::to_value(record(3, SplitOutcome::Failed {
            error: "boom".to_string(),
        }))
        .unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"], "boom");
        assert_eq!(json["index"], 3);
    }

    #[test]
    fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let m = manifest(vec![record(0, SplitOutcome::Completed)]);
        m.write_to(dir.path()).unwrap();
        let back = ExtractManifest::read_from(dir.path()).unwrap();
        assert_eq!(back.splits, m.splits);
        assert_eq!(back.started_at, m.started_at);
        assert!(back.is_complete());
    }
}
