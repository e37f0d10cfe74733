use crate::errors::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServiceSettings {
    pub max_page_size: u32,
    pub default_page_size: u32,
    pub default_project_name: String,
    pub image_directory: String,
    pub event_directory: String,
    pub log_directory: String,
    pub log_filter: String,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            max_page_size: 500,
            default_page_size: 50,
            default_project_name: "Default Project".to_string(),
            image_directory: "images".to_string(),
            event_directory: "events".to_string(),
            log_directory: "logs".to_string(),
            log_filter: "info".to_string(),
        }
    }
}

impl ServiceSettings {
    /// Reads a JSON settings file and layers it over the defaults. A missing file yields defaults.
    pub fn load(path: &Path) -> AppResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let bytes = fs::read(path).map_err(|error| AppError::Io(error.to_string()))?;
        let overrides: serde_json::Value = serde_json::from_slice(&bytes)?;
        Self::default().merged(overrides)
    }

    pub fn merged(&self, update: serde_json::Value) -> AppResult<Self> {
        let mut current = serde_json::to_value(self)?;
        merge_json(&mut current, update);
        let merged: Self = serde_json::from_value(current)?;
        Ok(merged.normalized())
    }

    /// Zero or out-of-range page sizes fall back to something servable.
    pub fn resolve_page_size(&self, requested: u32) -> usize {
        let requested = if requested == 0 {
            self.default_page_size
        } else {
            requested
        };
        requested.clamp(1, self.max_page_size.max(1)) as usize
    }

    pub fn image_dir(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.image_directory)
    }

    pub fn event_dir(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.event_directory)
    }

    pub fn log_dir(&self, data_dir: &Path) -> PathBuf {
        data_dir.join(&self.log_directory)
    }

    fn normalized(mut self) -> Self {
        if self.max_page_size == 0 {
            self.max_page_size = Self::default().max_page_size;
        }
        if self.default_page_size == 0 || self.default_page_size > self.max_page_size {
            self.default_page_size = self.max_page_size.min(Self::default().default_page_size);
        }
        if self.default_project_name.trim().is_empty() {
            self.default_project_name = Self::default().default_project_name;
        }
        self
    }
}

fn merge_json(target: &mut serde_json::Value, update: serde_json::Value) {
    match (target, update) {
        (serde_json::Value::Object(target_map), serde_json::Value::Object(update_map)) => {
            for (key, value) in update_map {
                let entry = target_map.entry(key).or_insert(serde_json::Value::Null);
                merge_json(entry, value);
            }
        }
        (target_slot, update_value) => {
            *target_slot = update_value;
        }
    }
}
