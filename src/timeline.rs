use crate::errors::{AppError, AppResult};
use crate::models::TimelineEntry;
use crate::store::TimelineSink;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::sync::Mutex;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleEventKind {
    FolderCreated,
    FolderUpdated,
    FolderDeleted,
    FolderImageUpload,
    TemplateCreated,
    TemplateUpdated,
    TemplateDeleted,
    TemplateFieldsDistributed,
    TemplateImageUpload,
    ObjectCreated,
    ObjectUpdated,
    ObjectDeleted,
    ObjectImageUpload,
}

impl LifecycleEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FolderCreated => "FolderCreated",
            Self::FolderUpdated => "FolderUpdated",
            Self::FolderDeleted => "FolderDeleted",
            Self::FolderImageUpload => "FolderImageUpload",
            Self::TemplateCreated => "TemplateCreated",
            Self::TemplateUpdated => "TemplateUpdated",
            Self::TemplateDeleted => "TemplateDeleted",
            Self::TemplateFieldsDistributed => "TemplateFieldsDistributed",
            Self::TemplateImageUpload => "TemplateImageUpload",
            Self::ObjectCreated => "ObjectCreated",
            Self::ObjectUpdated => "ObjectUpdated",
            Self::ObjectDeleted => "ObjectDeleted",
            Self::ObjectImageUpload => "ObjectImageUpload",
        }
    }
}

/// `npc` + `ObjectCreated` -> `NpcObjectCreated`, `item_set` + `FolderDeleted` -> `ItemSetFolderDeleted`.
pub fn qualified_event_name(kind: &str, event: LifecycleEventKind) -> String {
    let mut name = String::with_capacity(kind.len() + event.as_str().len());
    for part in kind.split(|ch: char| ch == '_' || ch == '-' || ch.is_whitespace()) {
        let mut chars = part.chars();
        if let Some(first) = chars.next() {
            name.extend(first.to_uppercase());
            name.push_str(chars.as_str());
        }
    }
    name.push_str(event.as_str());
    name
}

/// Appends one JSON line per event to `<dir>/YYYY-MM-DD.ndjson`.
#[derive(Debug)]
pub struct NdjsonTimeline {
    dir: PathBuf,
    write_lock: Mutex<()>,
}

impl NdjsonTimeline {
    pub fn new(dir: PathBuf) -> AppResult<Self> {
        fs::create_dir_all(&dir).map_err(|error| AppError::Io(error.to_string()))?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    fn append(&self, entry: &TimelineEntry) -> AppResult<()> {
        let date = entry.occurred_at.format("%Y-%m-%d").to_string();
        let path = self.dir.join(format!("{}.ndjson", date));
        let line = serde_json::to_string(entry)?;

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| AppError::Internal("timeline mutex poisoned".to_string()))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|error| AppError::Io(error.to_string()))?;
        writeln!(file, "{}", line).map_err(|error| AppError::Io(error.to_string()))
    }

    /// Every recorded entry, oldest file first. Malformed lines are skipped.
    pub fn load_entries(&self) -> AppResult<Vec<TimelineEntry>> {
        let mut paths = Vec::new();
        for entry in fs::read_dir(&self.dir).map_err(|error| AppError::Io(error.to_string()))? {
            let path = entry.map_err(|error| AppError::Io(error.to_string()))?.path();
            if path.extension().and_then(|value| value.to_str()) == Some("ndjson") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut entries = Vec::new();
        for path in paths {
            let file = fs::File::open(&path).map_err(|error| AppError::Io(error.to_string()))?;
            for line in BufReader::new(file).lines() {
                let line = line.map_err(|error| AppError::Io(error.to_string()))?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<TimelineEntry>(&line) {
                    Ok(entry) => entries.push(entry),
                    Err(error) => {
                        tracing::warn!(path = %path.display(), error = %error, "skipping malformed timeline line");
                    }
                }
            }
        }
        Ok(entries)
    }
}

#[async_trait]
impl TimelineSink for NdjsonTimeline {
    async fn record(&self, event: &str, subject_name: &str, subject_id: Option<&str>) -> AppResult<()> {
        let entry = TimelineEntry {
            id: format!("evt_{}", Uuid::new_v4().simple()),
            event: event.to_string(),
            subject_name: subject_name.to_string(),
            subject_id: subject_id.map(|value| value.to_string()),
            occurred_at: Utc::now(),
        };
        self.append(&entry)
    }
}
