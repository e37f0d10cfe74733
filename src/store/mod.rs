//! Collaborator seams consumed by the lifecycle core.
//!
//! Every store is an async trait object so specializations can plug in their own
//! persistence. `open_local` wires the bundled SQLite / file system implementations.

use crate::db::Database;
use crate::errors::AppResult;
use crate::images::FileImageStore;
use crate::models::{
    Actor, CompareResult, FlexFieldFolder, FlexFieldObject, ObjectName, Project,
};
use crate::service::ClockStamper;
use crate::settings::ServiceSettings;
use crate::timeline::NdjsonTimeline;
use async_trait::async_trait;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

pub type ImageWriter = Pin<Box<dyn AsyncWrite + Send>>;
pub type ImageReader = Pin<Box<dyn AsyncRead + Send>>;

#[async_trait]
pub trait ProjectStore: Send + Sync {
    async fn get_default_project(&self) -> AppResult<Project>;
}

#[async_trait]
pub trait FolderStore: Send + Sync {
    async fn get_folder_by_id(&self, id: &str) -> AppResult<Option<FlexFieldFolder>>;
    async fn get_root_folders(
        &self,
        project_id: &str,
        start: usize,
        page_size: usize,
    ) -> AppResult<Vec<FlexFieldFolder>>;
    async fn get_root_folder_count(&self, project_id: &str) -> AppResult<u64>;
    async fn get_child_folders(
        &self,
        parent_id: &str,
        start: usize,
        page_size: usize,
    ) -> AppResult<Vec<FlexFieldFolder>>;
    async fn get_child_folder_count(&self, parent_id: &str) -> AppResult<u64>;
    /// Assigns an id when the folder has none and returns the stored folder.
    async fn create_folder(&self, folder: FlexFieldFolder) -> AppResult<FlexFieldFolder>;
    async fn update_folder(&self, folder: &FlexFieldFolder) -> AppResult<()>;
    async fn delete_folder(&self, folder: &FlexFieldFolder) -> AppResult<()>;
}

/// One collection of flex field objects. Templates and instances of a kind each get their own.
#[async_trait]
pub trait FlexFieldObjectStore: Send + Sync {
    async fn get_by_id(&self, id: &str) -> AppResult<Option<FlexFieldObject>>;
    async fn get_in_root_folder(
        &self,
        project_id: &str,
        start: usize,
        page_size: usize,
    ) -> AppResult<Vec<FlexFieldObject>>;
    async fn get_in_root_folder_count(&self, project_id: &str) -> AppResult<u64>;
    async fn get_in_folder(
        &self,
        folder_id: &str,
        start: usize,
        page_size: usize,
    ) -> AppResult<Vec<FlexFieldObject>>;
    async fn get_in_folder_count(&self, folder_id: &str) -> AppResult<u64>;
    async fn search(
        &self,
        project_id: &str,
        pattern: &str,
        start: usize,
        page_size: usize,
    ) -> AppResult<Vec<FlexFieldObject>>;
    async fn search_count(&self, project_id: &str, pattern: &str) -> AppResult<u64>;
    async fn resolve_names(&self, ids: &[String]) -> AppResult<Vec<ObjectName>>;
    async fn get_by_template_id(&self, template_id: &str) -> AppResult<Vec<FlexFieldObject>>;
    /// Assigns an id when the object has none and returns the stored object.
    async fn create(&self, object: FlexFieldObject) -> AppResult<FlexFieldObject>;
    async fn update(&self, object: &FlexFieldObject) -> AppResult<()>;
    async fn delete(&self, object: &FlexFieldObject) -> AppResult<()>;
    /// Case-insensitive.
    async fn any_using_tag(&self, tag: &str) -> AppResult<bool>;
}

#[async_trait]
pub trait TagStore: Send + Sync {
    async fn get_all_tags(&self) -> AppResult<Vec<String>>;
    async fn add_tag(&self, tag: &str) -> AppResult<()>;
    async fn delete_tag(&self, tag: &str) -> AppResult<()>;
}

#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Opens a writer for a new image and returns it with the generated file name.
    async fn create_image(&self, file_name: &str) -> AppResult<(ImageWriter, String)>;
    async fn open_image(&self, name: &str) -> AppResult<ImageReader>;
    /// Advisory: the store deletes the file only when nothing references it.
    async fn delete_if_unused(&self, name: &str) -> AppResult<()>;
}

/// Answers whether any folder or object still points at an image file.
#[async_trait]
pub trait ImageUsage: Send + Sync {
    async fn is_image_used(&self, name: &str) -> AppResult<bool>;
}

#[async_trait]
pub trait TimelineSink: Send + Sync {
    async fn record(&self, event: &str, subject_name: &str, subject_id: Option<&str>) -> AppResult<()>;
}

/// Reports structural drift of an object against its last implemented snapshot.
#[async_trait]
pub trait ImplementationSnapshotComparer: Send + Sync {
    async fn compare(&self, object: &FlexFieldObject) -> AppResult<CompareResult>;
}

#[async_trait]
pub trait ModifiedDataStamper: Send + Sync {
    async fn stamp(&self, object: &mut FlexFieldObject, actor: &Actor) -> AppResult<()>;
}

#[derive(Clone)]
pub struct FlexFieldStores {
    pub projects: Arc<dyn ProjectStore>,
    pub folders: Arc<dyn FolderStore>,
    pub templates: Arc<dyn FlexFieldObjectStore>,
    pub objects: Arc<dyn FlexFieldObjectStore>,
    pub tags: Arc<dyn TagStore>,
    pub images: Arc<dyn ImageStore>,
    pub timeline: Arc<dyn TimelineSink>,
    pub stamper: Arc<dyn ModifiedDataStamper>,
}

impl FlexFieldStores {
    /// SQLite database at `<data_dir>/flex_fields.sqlite`, images and event log beside it.
    /// `kind` scopes folders, tags and the `<kind>` / `<kind>_templates` collections.
    pub fn open_local(data_dir: &Path, settings: &ServiceSettings, kind: &str) -> AppResult<Self> {
        let db = Arc::new(Database::new(
            &data_dir.join("flex_fields.sqlite"),
            &settings.default_project_name,
        )?);
        let images = FileImageStore::new(settings.image_dir(data_dir), db.clone())?;
        let timeline = NdjsonTimeline::new(settings.event_dir(data_dir))?;
        let templates_collection = format!("{}_templates", kind);
        tracing::debug!(db = %db.path().display(), kind, "opened local flex field stores");

        Ok(Self {
            projects: db.clone(),
            folders: Arc::new(Database::folders(&db, kind)),
            templates: Arc::new(Database::objects(&db, &templates_collection)),
            objects: Arc::new(Database::objects(&db, kind)),
            tags: Arc::new(Database::tags(&db, kind)),
            images: Arc::new(images),
            timeline: Arc::new(timeline),
            stamper: Arc::new(ClockStamper),
        })
    }
}
