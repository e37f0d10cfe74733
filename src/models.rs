use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    pub is_default: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FlexFieldFolder {
    pub id: String,
    pub project_id: String,
    /// Empty for root folders.
    pub parent_folder_id: String,
    pub name: String,
    pub description: String,
    pub image_file: Option<String>,
}

impl FlexFieldFolder {
    pub fn is_root(&self) -> bool {
        self.parent_folder_id.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FlexField {
    /// Empty until the service assigns one.
    pub id: String,
    pub name: String,
    pub field_type: i32,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_settings: Option<Value>,
}

/// An entity or template. Templates never carry a parent folder.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FlexFieldObject {
    pub id: String,
    pub project_id: String,
    pub parent_folder_id: String,
    pub template_id: Option<String>,
    pub name: String,
    pub fields: Vec<FlexField>,
    pub tags: Vec<String>,
    pub image_file: Option<String>,
    pub is_implemented: bool,
    pub modified_on: Option<DateTime<Utc>>,
    pub modified_by: Option<String>,
    /// Kind-specific attributes owned by the specialization.
    #[serde(flatten)]
    pub extensions: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectName {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FolderRequest {
    pub name: String,
    pub description: String,
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FolderQueryResult {
    pub folder_name: String,
    pub parent_id: String,
    pub has_more: bool,
    pub folders: Vec<FlexFieldFolder>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPage<T> {
    pub items: Vec<T>,
    pub has_more: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Actor {
    pub id: String,
    pub display_name: String,
}

impl Actor {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub data: Vec<u8>,
}

/// Multipart-style upload payload; image endpoints accept exactly one file.
#[derive(Debug, Clone, Default)]
pub struct ImageUpload {
    pub files: Vec<UploadedFile>,
}

impl ImageUpload {
    pub fn single(file_name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            files: vec![UploadedFile {
                file_name: file_name.into(),
                data,
            }],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompareDifference {
    pub label: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CompareResult {
    pub does_snapshot_exist: bool,
    pub compare_difference: Vec<CompareDifference>,
}

impl CompareResult {
    pub fn has_differences(&self) -> bool {
        !self.compare_difference.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DistributionReport {
    pub updated: usize,
    pub unchanged: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineEntry {
    pub id: String,
    pub event: String,
    pub subject_name: String,
    pub subject_id: Option<String>,
    pub occurred_at: DateTime<Utc>,
}
