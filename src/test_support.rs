//! In-memory stores and a scriptable kind for unit tests.

use crate::errors::{AppError, AppResult};
use crate::models::{CompareDifference, CompareResult, FlexFieldFolder, FlexFieldObject, ObjectName, Project};
use crate::service::{ClockStamper, FlexFieldKind};
use crate::store::{
    FlexFieldObjectStore, FlexFieldStores, FolderStore, ImageReader, ImageStore, ImageUsage, ImageWriter,
    ImplementationSnapshotComparer, ProjectStore, TagStore, TimelineSink,
};
use crate::tags::tag_key;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;
use uuid::Uuid;

fn page<T: Clone>(items: &[T], start: usize, page_size: usize) -> Vec<T> {
    items.iter().skip(start).take(page_size).cloned().collect()
}

fn sort_by_name(objects: &mut [FlexFieldObject]) {
    objects.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()).then(a.id.cmp(&b.id)));
}

pub struct FixedProject {
    project: Project,
}

impl Default for FixedProject {
    fn default() -> Self {
        Self {
            project: Project {
                id: "project-1".to_string(),
                name: "Test Project".to_string(),
                is_default: true,
            },
        }
    }
}

#[async_trait]
impl ProjectStore for FixedProject {
    async fn get_default_project(&self) -> AppResult<Project> {
        Ok(self.project.clone())
    }
}

#[derive(Default)]
pub struct InMemoryFolders {
    folders: Mutex<Vec<FlexFieldFolder>>,
}

impl InMemoryFolders {
    pub fn snapshot(&self) -> Vec<FlexFieldFolder> {
        self.folders.lock().expect("folders lock").clone()
    }

    fn matching(&self, keep: impl Fn(&FlexFieldFolder) -> bool) -> Vec<FlexFieldFolder> {
        let mut found: Vec<_> = self.snapshot().into_iter().filter(|folder| keep(folder)).collect();
        found.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()).then(a.id.cmp(&b.id)));
        found
    }
}

#[async_trait]
impl FolderStore for InMemoryFolders {
    async fn get_folder_by_id(&self, id: &str) -> AppResult<Option<FlexFieldFolder>> {
        Ok(self.snapshot().into_iter().find(|folder| folder.id == id))
    }

    async fn get_root_folders(&self, project_id: &str, start: usize, page_size: usize) -> AppResult<Vec<FlexFieldFolder>> {
        let found = self.matching(|folder| folder.project_id == project_id && folder.is_root());
        Ok(page(&found, start, page_size))
    }

    async fn get_root_folder_count(&self, project_id: &str) -> AppResult<u64> {
        Ok(self.matching(|folder| folder.project_id == project_id && folder.is_root()).len() as u64)
    }

    async fn get_child_folders(&self, parent_id: &str, start: usize, page_size: usize) -> AppResult<Vec<FlexFieldFolder>> {
        let found = self.matching(|folder| folder.parent_folder_id == parent_id);
        Ok(page(&found, start, page_size))
    }

    async fn get_child_folder_count(&self, parent_id: &str) -> AppResult<u64> {
        Ok(self.matching(|folder| folder.parent_folder_id == parent_id).len() as u64)
    }

    async fn create_folder(&self, mut folder: FlexFieldFolder) -> AppResult<FlexFieldFolder> {
        if folder.id.is_empty() {
            folder.id = Uuid::new_v4().to_string();
        }
        self.folders.lock().expect("folders lock").push(folder.clone());
        Ok(folder)
    }

    async fn update_folder(&self, folder: &FlexFieldFolder) -> AppResult<()> {
        let mut folders = self.folders.lock().expect("folders lock");
        let slot = folders
            .iter_mut()
            .find(|existing| existing.id == folder.id)
            .ok_or_else(|| AppError::NotFound(folder.id.clone()))?;
        *slot = folder.clone();
        Ok(())
    }

    async fn delete_folder(&self, folder: &FlexFieldFolder) -> AppResult<()> {
        self.folders.lock().expect("folders lock").retain(|existing| existing.id != folder.id);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryObjects {
    objects: Mutex<Vec<FlexFieldObject>>,
    fail_create: AtomicBool,
    failing_updates: Mutex<HashSet<String>>,
}

impl InMemoryObjects {
    pub fn snapshot(&self) -> Vec<FlexFieldObject> {
        self.objects.lock().expect("objects lock").clone()
    }

    /// Edits a stored object in place, bypassing the service.
    pub fn patch(&self, id: &str, edit: impl FnOnce(&mut FlexFieldObject)) {
        let mut objects = self.objects.lock().expect("objects lock");
        let object = objects.iter_mut().find(|object| object.id == id).expect("object to patch");
        edit(object);
    }

    pub fn fail_creates(&self) {
        self.fail_create.store(true, Ordering::SeqCst);
    }

    pub fn fail_updates_for(&self, id: &str) {
        self.failing_updates.lock().expect("failing lock").insert(id.to_string());
    }

    fn matching(&self, keep: impl Fn(&FlexFieldObject) -> bool) -> Vec<FlexFieldObject> {
        let mut found: Vec<_> = self.snapshot().into_iter().filter(|object| keep(object)).collect();
        sort_by_name(&mut found);
        found
    }
}

fn matches_pattern(object: &FlexFieldObject, project_id: &str, pattern: &str) -> bool {
    let pattern = pattern.trim().to_lowercase();
    object.project_id == project_id
        && (object.name.to_lowercase().contains(&pattern)
            || object.tags.iter().any(|tag| tag.to_lowercase().contains(&pattern)))
}

#[async_trait]
impl FlexFieldObjectStore for InMemoryObjects {
    async fn get_by_id(&self, id: &str) -> AppResult<Option<FlexFieldObject>> {
        Ok(self.snapshot().into_iter().find(|object| object.id == id))
    }

    async fn get_in_root_folder(&self, project_id: &str, start: usize, page_size: usize) -> AppResult<Vec<FlexFieldObject>> {
        let found = self.matching(|object| object.project_id == project_id && object.parent_folder_id.is_empty());
        Ok(page(&found, start, page_size))
    }

    async fn get_in_root_folder_count(&self, project_id: &str) -> AppResult<u64> {
        Ok(self
            .matching(|object| object.project_id == project_id && object.parent_folder_id.is_empty())
            .len() as u64)
    }

    async fn get_in_folder(&self, folder_id: &str, start: usize, page_size: usize) -> AppResult<Vec<FlexFieldObject>> {
        let found = self.matching(|object| object.parent_folder_id == folder_id);
        Ok(page(&found, start, page_size))
    }

    async fn get_in_folder_count(&self, folder_id: &str) -> AppResult<u64> {
        Ok(self.matching(|object| object.parent_folder_id == folder_id).len() as u64)
    }

    async fn search(
        &self,
        project_id: &str,
        pattern: &str,
        start: usize,
        page_size: usize,
    ) -> AppResult<Vec<FlexFieldObject>> {
        let found = self.matching(|object| matches_pattern(object, project_id, pattern));
        Ok(page(&found, start, page_size))
    }

    async fn search_count(&self, project_id: &str, pattern: &str) -> AppResult<u64> {
        Ok(self.matching(|object| matches_pattern(object, project_id, pattern)).len() as u64)
    }

    async fn resolve_names(&self, ids: &[String]) -> AppResult<Vec<ObjectName>> {
        let objects = self.snapshot();
        Ok(ids
            .iter()
            .filter_map(|id| objects.iter().find(|object| &object.id == id))
            .map(|object| ObjectName {
                id: object.id.clone(),
                name: object.name.clone(),
            })
            .collect())
    }

    async fn get_by_template_id(&self, template_id: &str) -> AppResult<Vec<FlexFieldObject>> {
        Ok(self.matching(|object| object.template_id.as_deref() == Some(template_id)))
    }

    async fn create(&self, mut object: FlexFieldObject) -> AppResult<FlexFieldObject> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(AppError::Storage("injected create failure".to_string()));
        }
        if object.id.is_empty() {
            object.id = Uuid::new_v4().to_string();
        }
        self.objects.lock().expect("objects lock").push(object.clone());
        Ok(object)
    }

    async fn update(&self, object: &FlexFieldObject) -> AppResult<()> {
        if self.failing_updates.lock().expect("failing lock").contains(&object.id) {
            return Err(AppError::Storage("injected update failure".to_string()));
        }
        let mut objects = self.objects.lock().expect("objects lock");
        let slot = objects
            .iter_mut()
            .find(|existing| existing.id == object.id)
            .ok_or_else(|| AppError::NotFound(object.id.clone()))?;
        *slot = object.clone();
        Ok(())
    }

    async fn delete(&self, object: &FlexFieldObject) -> AppResult<()> {
        self.objects.lock().expect("objects lock").retain(|existing| existing.id != object.id);
        Ok(())
    }

    async fn any_using_tag(&self, tag: &str) -> AppResult<bool> {
        let tag = tag_key(tag);
        Ok(self
            .snapshot()
            .iter()
            .any(|object| object.tags.iter().any(|existing| tag_key(existing) == tag)))
    }
}

#[derive(Default)]
pub struct InMemoryTags {
    tags: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl InMemoryTags {
    pub fn snapshot(&self) -> Vec<String> {
        self.tags.lock().expect("tags lock").clone()
    }

    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }

    fn check(&self) -> AppResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::Storage("injected tag store failure".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl TagStore for InMemoryTags {
    async fn get_all_tags(&self) -> AppResult<Vec<String>> {
        self.check()?;
        Ok(self.snapshot())
    }

    async fn add_tag(&self, tag: &str) -> AppResult<()> {
        self.check()?;
        self.tags.lock().expect("tags lock").push(tag.to_string());
        Ok(())
    }

    async fn delete_tag(&self, tag: &str) -> AppResult<()> {
        self.check()?;
        let tag = tag_key(tag);
        self.tags.lock().expect("tags lock").retain(|existing| tag_key(existing) != tag);
        Ok(())
    }
}

struct MemoryWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl AsyncWrite for MemoryWriter {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &[u8]) -> Poll<io::Result<usize>> {
        self.buffer.lock().expect("buffer lock").extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

/// Keeps images in memory and records every delete request.
#[derive(Default)]
pub struct InMemoryImages {
    files: Mutex<HashMap<String, Arc<Mutex<Vec<u8>>>>>,
    deleted: Mutex<Vec<String>>,
    failing_deletes: AtomicBool,
}

impl InMemoryImages {
    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().expect("deleted lock").clone()
    }

    pub fn stored_count(&self) -> usize {
        self.files.lock().expect("files lock").len()
    }

    pub fn fail_deletes(&self) {
        self.failing_deletes.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ImageStore for InMemoryImages {
    async fn create_image(&self, file_name: &str) -> AppResult<(ImageWriter, String)> {
        let extension = file_name.rsplit('.').next().unwrap_or("bin").to_lowercase();
        let name = format!("{}.{}", Uuid::new_v4(), extension);
        let buffer = Arc::new(Mutex::new(Vec::new()));
        self.files
            .lock()
            .expect("files lock")
            .insert(name.clone(), buffer.clone());
        Ok((Box::pin(MemoryWriter { buffer }), name))
    }

    async fn open_image(&self, name: &str) -> AppResult<ImageReader> {
        let files = self.files.lock().expect("files lock");
        let buffer = files
            .get(name)
            .ok_or_else(|| AppError::NotFound(format!("image '{}' not found", name)))?;
        let bytes = buffer.lock().expect("buffer lock").clone();
        Ok(Box::pin(io::Cursor::new(bytes)))
    }

    async fn delete_if_unused(&self, name: &str) -> AppResult<()> {
        if self.failing_deletes.load(Ordering::SeqCst) {
            return Err(AppError::Io(format!("injected failure deleting '{}'", name)));
        }
        self.deleted.lock().expect("deleted lock").push(name.to_string());
        self.files.lock().expect("files lock").remove(name);
        Ok(())
    }
}

pub struct FixedImageUsage {
    used: AtomicBool,
}

impl FixedImageUsage {
    pub fn new(used: bool) -> Self {
        Self {
            used: AtomicBool::new(used),
        }
    }

    pub fn set(&self, used: bool) {
        self.used.store(used, Ordering::SeqCst);
    }
}

#[async_trait]
impl ImageUsage for FixedImageUsage {
    async fn is_image_used(&self, _name: &str) -> AppResult<bool> {
        Ok(self.used.load(Ordering::SeqCst))
    }
}

#[derive(Default)]
pub struct RecordingTimeline {
    events: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl RecordingTimeline {
    pub fn events(&self) -> Vec<String> {
        self.events.lock().expect("events lock").clone()
    }

    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl TimelineSink for RecordingTimeline {
    async fn record(&self, event: &str, _subject_name: &str, _subject_id: Option<&str>) -> AppResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::Io("injected timeline failure".to_string()));
        }
        self.events.lock().expect("events lock").push(event.to_string());
        Ok(())
    }
}

/// Kind whose oracle reports a configurable number of differences. Copies extensions on
/// update and strips the `secret` attribute on single reads.
pub struct FakeKind {
    name: String,
    differences: AtomicUsize,
    compare_calls: AtomicUsize,
    reference: Mutex<Option<String>>,
    deleted_dependencies: AtomicUsize,
}

impl FakeKind {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            differences: AtomicUsize::new(0),
            compare_calls: AtomicUsize::new(0),
            reference: Mutex::new(None),
            deleted_dependencies: AtomicUsize::new(0),
        }
    }

    pub fn set_differences(&self, count: usize) {
        self.differences.store(count, Ordering::SeqCst);
    }

    pub fn compare_calls(&self) -> usize {
        self.compare_calls.load(Ordering::SeqCst)
    }

    pub fn set_reference(&self, reason: &str) {
        *self.reference.lock().expect("reference lock") = Some(reason.to_string());
    }

    pub fn deleted_dependencies(&self) -> usize {
        self.deleted_dependencies.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImplementationSnapshotComparer for FakeKind {
    async fn compare(&self, _object: &FlexFieldObject) -> AppResult<CompareResult> {
        self.compare_calls.fetch_add(1, Ordering::SeqCst);
        let count = self.differences.load(Ordering::SeqCst);
        Ok(CompareResult {
            does_snapshot_exist: true,
            compare_difference: (0..count)
                .map(|index| CompareDifference {
                    label: format!("field {}", index),
                    old_value: None,
                    new_value: Some("changed".to_string()),
                })
                .collect(),
        })
    }
}

#[async_trait]
impl FlexFieldKind for FakeKind {
    fn name(&self) -> &str {
        &self.name
    }

    async fn check_object_references(&self, _id: &str) -> AppResult<Option<String>> {
        Ok(self.reference.lock().expect("reference lock").clone())
    }

    async fn delete_additional_dependencies(&self, _object: &FlexFieldObject) -> AppResult<()> {
        self.deleted_dependencies.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn run_additional_updates(
        &self,
        incoming: &FlexFieldObject,
        mut loaded: FlexFieldObject,
    ) -> AppResult<FlexFieldObject> {
        loaded.extensions = incoming.extensions.clone();
        Ok(loaded)
    }

    fn strip_object(&self, mut object: FlexFieldObject) -> FlexFieldObject {
        object.extensions.remove("secret");
        object
    }
}

/// One set of in-memory stores with typed handles for assertions.
pub struct Fixture {
    pub project: Arc<FixedProject>,
    pub folders: Arc<InMemoryFolders>,
    pub templates: Arc<InMemoryObjects>,
    pub objects: Arc<InMemoryObjects>,
    pub tags: Arc<InMemoryTags>,
    pub images: Arc<InMemoryImages>,
    pub timeline: Arc<RecordingTimeline>,
}

impl Default for Fixture {
    fn default() -> Self {
        Self {
            project: Arc::new(FixedProject::default()),
            folders: Arc::new(InMemoryFolders::default()),
            templates: Arc::new(InMemoryObjects::default()),
            objects: Arc::new(InMemoryObjects::default()),
            tags: Arc::new(InMemoryTags::default()),
            images: Arc::new(InMemoryImages::default()),
            timeline: Arc::new(RecordingTimeline::default()),
        }
    }
}

impl Fixture {
    pub fn project_id(&self) -> String {
        self.project.project.id.clone()
    }

    pub fn stores(&self) -> FlexFieldStores {
        FlexFieldStores {
            projects: self.project.clone(),
            folders: self.folders.clone(),
            templates: self.templates.clone(),
            objects: self.objects.clone(),
            tags: self.tags.clone(),
            images: self.images.clone(),
            timeline: self.timeline.clone(),
            stamper: Arc::new(ClockStamper),
        }
    }
}
