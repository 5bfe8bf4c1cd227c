use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::image::EncodedImage;
use crate::report::AnalysisReport;

pub const HISTORY_SCHEMA_VERSION: u64 = 1;

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("failed to write history {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to encode history: {0}")]
    Encode(#[from] serde_json::Error),
}

/// A completed analysis. `image` is only present for entries appended during
/// this process; it is never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub image_digest: Option<String>,
    pub report: AnalysisReport,
    pub image: Option<EncodedImage>,
}

impl HistoryEntry {
    pub fn new(report: AnalysisReport, image: EncodedImage) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            image_digest: Some(image.sha256_hex()),
            report,
            image: Some(image),
        }
    }

    fn record(&self) -> HistoryRecord {
        HistoryRecord {
            id: self.id,
            created_at: self.created_at,
            image_digest: self.image_digest.clone(),
            report: self.report.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HistoryRecord {
    id: Uuid,
    created_at: DateTime<Utc>,
    #[serde(default)]
    image_digest: Option<String>,
    report: AnalysisReport,
}

impl From<HistoryRecord> for HistoryEntry {
    fn from(record: HistoryRecord) -> Self {
        Self {
            id: record.id,
            created_at: record.created_at,
            image_digest: record.image_digest,
            report: record.report,
            image: None,
        }
    }
}

#[derive(Debug, Serialize)]
struct HistoryDocument {
    schema_version: u64,
    entries: Vec<HistoryRecord>,
}

/// Newest-first list of completed analyses backed by one JSON file.
///
/// Loading never fails: a missing, unreadable or corrupt file yields an empty
/// history, and individual corrupt entries are skipped.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
    entries: Vec<HistoryEntry>,
}

impl HistoryStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = load_entries(&path);
        Self { path, entries }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn latest(&self) -> Option<&HistoryEntry> {
        self.entries.first()
    }

    pub fn get(&self, id: &Uuid) -> Option<&HistoryEntry> {
        self.entries.iter().find(|entry| &entry.id == id)
    }

    /// Matches a full id or an unambiguous prefix of its hyphenated form.
    pub fn find(&self, id_or_prefix: &str) -> Option<&HistoryEntry> {
        let needle = id_or_prefix.trim().to_ascii_lowercase();
        if needle.is_empty() {
            return None;
        }
        let mut matches = self
            .entries
            .iter()
            .filter(|entry| entry.id.to_string().starts_with(&needle));
        let first = matches.next()?;
        if matches.next().is_some() {
            return None;
        }
        Some(first)
    }

    /// Prepends the entry and rewrites the file. On a failed write the entry
    /// is removed again, so memory never holds more than the file.
    pub fn append(&mut self, entry: HistoryEntry) -> Result<(), HistoryError> {
        self.entries.insert(0, entry);
        if let Err(err) = self.flush() {
            self.entries.remove(0);
            return Err(err);
        }
        Ok(())
    }

    pub fn reload(&mut self) {
        self.entries = load_entries(&self.path);
    }

    fn flush(&self) -> Result<(), HistoryError> {
        let document = HistoryDocument {
            schema_version: HISTORY_SCHEMA_VERSION,
            entries: self.entries.iter().map(HistoryEntry::record).collect(),
        };
        let encoded = serde_json::to_string_pretty(&document)?;
        write_atomically(&self.path, encoded.as_bytes()).map_err(|source| HistoryError::Write {
            path: self.path.clone(),
            source,
        })
    }
}

fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let staging = path.with_extension("json.tmp");
    std::fs::write(&staging, bytes)?;
    std::fs::rename(&staging, path)
}

fn load_entries(path: &Path) -> Vec<HistoryEntry> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(err) => {
            warn!(path = %path.display(), %err, "history unreadable; starting empty");
            return Vec::new();
        }
    };
    let parsed: Value = match serde_json::from_str(&raw) {
        Ok(parsed) => parsed,
        Err(err) => {
            warn!(path = %path.display(), %err, "history corrupt; starting empty");
            return Vec::new();
        }
    };
    let Some(rows) = parsed.get("entries").and_then(Value::as_array) else {
        warn!(path = %path.display(), "history has no entries list; starting empty");
        return Vec::new();
    };

    let mut entries = Vec::with_capacity(rows.len());
    for (idx, row) in rows.iter().enumerate() {
        match HistoryRecord::deserialize(row) {
            Ok(record) => entries.push(HistoryEntry::from(record)),
            Err(err) => warn!(index = idx, %err, "skipping corrupt history entry"),
        }
    }
    entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    entries
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::knowledge::{condition_template_for, market_sources_for, ValueCategory};
    use crate::report::{
        ConditionReport, MarketAnalysis, ObjectCategory, PriceRange, ValueEstimate,
    };

    fn sample_report(label: &str) -> AnalysisReport {
        AnalysisReport {
            category: ObjectCategory::new("pokemon_card"),
            display_label: label.to_string(),
            identification: "# Charizard".to_string(),
            condition: ConditionReport {
                assessment: "Total: 84 points, Near Mint".to_string(),
                template: condition_template_for("pokemon_card").clone(),
            },
            market_analysis: MarketAnalysis {
                listings: Vec::new(),
                source_hints: market_sources_for("pokemon_card").to_vec(),
                narrative: "Stable market.".to_string(),
            },
            value: ValueEstimate {
                category: ValueCategory::SomewhatValuable,
                range: PriceRange::new(30.0, 50.0),
            },
        }
    }

    fn sample_image() -> EncodedImage {
        EncodedImage::new("image/jpeg", vec![0xff, 0xd8, 0xff, 0xe0, 1, 2, 3])
            .unwrap_or_else(|err| panic!("sample image: {err}"))
    }

    #[test]
    fn append_persists_newest_first_without_image() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("history.json");
        let mut store = HistoryStore::open(&path);
        assert!(store.is_empty());

        store.append(HistoryEntry::new(sample_report("first"), sample_image()))?;
        store.append(HistoryEntry::new(sample_report("second"), sample_image()))?;
        assert!(store.latest().and_then(|e| e.image.as_ref()).is_some());

        let raw = std::fs::read_to_string(&path)?;
        assert!(!raw.contains("base64"));
        assert!(!raw.contains("\"image\""));
        let parsed: Value = serde_json::from_str(&raw)?;
        assert_eq!(parsed["schema_version"], json!(1));
        assert_eq!(parsed["entries"][0]["report"]["displayLabel"], json!("second"));

        let reloaded = HistoryStore::open(&path);
        assert_eq!(reloaded.len(), 2);
        assert_eq!(
            reloaded.latest().map(|e| e.report.display_label.as_str()),
            Some("second")
        );
        assert!(reloaded.entries().iter().all(|entry| entry.image.is_none()));
        assert_eq!(
            reloaded.latest().and_then(|e| e.image_digest.clone()),
            Some(sample_image().sha256_hex())
        );
        Ok(())
    }

    #[test]
    fn corrupt_or_missing_file_loads_empty() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let missing = HistoryStore::open(temp.path().join("absent.json"));
        assert!(missing.is_empty());

        let path = temp.path().join("history.json");
        std::fs::write(&path, "{not json")?;
        assert!(HistoryStore::open(&path).is_empty());

        std::fs::write(&path, "[1, 2, 3]")?;
        assert!(HistoryStore::open(&path).is_empty());
        Ok(())
    }

    #[test]
    fn corrupt_entries_are_skipped() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("history.json");
        let mut store = HistoryStore::open(&path);
        store.append(HistoryEntry::new(sample_report("kept"), sample_image()))?;

        let mut parsed: Value = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        if let Some(rows) = parsed["entries"].as_array_mut() {
            rows.push(json!({"id": "nope", "report": {}}));
        }
        std::fs::write(&path, serde_json::to_string(&parsed)?)?;

        let reloaded = HistoryStore::open(&path);
        assert_eq!(reloaded.len(), 1);
        assert_eq!(
            reloaded.latest().map(|e| e.report.display_label.as_str()),
            Some("kept")
        );
        Ok(())
    }

    #[test]
    fn failed_write_leaves_entries_unchanged() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let blocker = temp.path().join("not-a-dir");
        std::fs::write(&blocker, "file")?;
        let mut store = HistoryStore::open(blocker.join("history.json"));

        let err = store.append(HistoryEntry::new(sample_report("lost"), sample_image()));
        assert!(matches!(err, Err(HistoryError::Write { .. })));
        assert!(store.is_empty());
        Ok(())
    }

    #[test]
    fn reload_picks_up_other_writers() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("history.json");
        let mut reader = HistoryStore::open(&path);
        let mut writer = HistoryStore::open(&path);
        writer.append(HistoryEntry::new(sample_report("external"), sample_image()))?;

        assert!(reader.is_empty());
        reader.reload();
        assert_eq!(reader.len(), 1);
        assert!(reader.latest().is_some_and(|entry| entry.image.is_none()));
        Ok(())
    }

    #[test]
    fn find_accepts_unique_prefixes() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut store = HistoryStore::open(temp.path().join("history.json"));
        let entry = HistoryEntry::new(sample_report("one"), sample_image());
        let id = entry.id;
        store.append(entry)?;

        let full = id.to_string();
        assert_eq!(store.find(&full).map(|e| e.id), Some(id));
        assert_eq!(store.find(&full[..8]).map(|e| e.id), Some(id));
        assert_eq!(store.get(&id).map(|e| e.id), Some(id));
        assert!(store.find("").is_none());
        Ok(())
    }
}
