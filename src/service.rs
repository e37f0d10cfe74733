use crate::errors::{conceal_storage_failure, AppError, AppResult};
use crate::fields::set_field_ids_for_new_fields;
use crate::folders::FolderHierarchyManager;
use crate::images::{ImageLifecycleManager, OpenedImage};
use crate::implementation_status;
use crate::models::{
    Actor, DistributionReport, FlexFieldFolder, FlexFieldObject, FolderQueryResult, FolderRequest, ImageUpload,
    ObjectName, QueryPage,
};
use crate::pagination::paginate;
use crate::settings::ServiceSettings;
use crate::store::{
    FlexFieldObjectStore, FlexFieldStores, ImplementationSnapshotComparer, ModifiedDataStamper, ProjectStore,
    TimelineSink,
};
use crate::tags::{normalize_tags, TagLifecycleTracker};
use crate::templates::TemplateDistributor;
use crate::timeline::{qualified_event_name, LifecycleEventKind};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;

/// Policy of one concrete entity kind (npcs, items, quests, ...).
#[async_trait]
pub trait FlexFieldKind: ImplementationSnapshotComparer {
    /// Snake-case kind name, also the prefix of every lifecycle event.
    fn name(&self) -> &str;

    fn event_name(&self, event: LifecycleEventKind) -> String {
        qualified_event_name(self.name(), event)
    }

    /// `Some(reason)` when something still points at the object and it must not be deleted.
    async fn check_object_references(&self, _id: &str) -> AppResult<Option<String>> {
        Ok(None)
    }

    async fn delete_additional_dependencies(&self, _object: &FlexFieldObject) -> AppResult<()> {
        Ok(())
    }

    /// Copies kind-specific attributes from the request onto the state that will be stored.
    async fn run_additional_updates(
        &self,
        _incoming: &FlexFieldObject,
        loaded: FlexFieldObject,
    ) -> AppResult<FlexFieldObject> {
        Ok(loaded)
    }

    /// Removes attributes that must not leave the service on single-object reads.
    fn strip_object(&self, object: FlexFieldObject) -> FlexFieldObject {
        object
    }
}

/// Stamps the current time and the acting user's id.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClockStamper;

#[async_trait]
impl ModifiedDataStamper for ClockStamper {
    async fn stamp(&self, object: &mut FlexFieldObject, actor: &Actor) -> AppResult<()> {
        object.modified_on = Some(Utc::now());
        object.modified_by = Some(actor.id.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Template,
    Object,
}

impl Role {
    fn label(self) -> &'static str {
        match self {
            Self::Template => "template",
            Self::Object => "object",
        }
    }

    fn created(self) -> LifecycleEventKind {
        match self {
            Self::Template => LifecycleEventKind::TemplateCreated,
            Self::Object => LifecycleEventKind::ObjectCreated,
        }
    }

    fn updated(self) -> LifecycleEventKind {
        match self {
            Self::Template => LifecycleEventKind::TemplateUpdated,
            Self::Object => LifecycleEventKind::ObjectUpdated,
        }
    }

    fn deleted(self) -> LifecycleEventKind {
        match self {
            Self::Template => LifecycleEventKind::TemplateDeleted,
            Self::Object => LifecycleEventKind::ObjectDeleted,
        }
    }

    fn image_uploaded(self) -> LifecycleEventKind {
        match self {
            Self::Template => LifecycleEventKind::TemplateImageUpload,
            Self::Object => LifecycleEventKind::ObjectImageUpload,
        }
    }
}

/// Folder, template, object, tag and image lifecycle for one entity kind.
pub struct FlexFieldEntityService {
    kind: Arc<dyn FlexFieldKind>,
    settings: ServiceSettings,
    projects: Arc<dyn ProjectStore>,
    templates: Arc<dyn FlexFieldObjectStore>,
    objects: Arc<dyn FlexFieldObjectStore>,
    timeline: Arc<dyn TimelineSink>,
    stamper: Arc<dyn ModifiedDataStamper>,
    folders: FolderHierarchyManager,
    distributor: TemplateDistributor,
    tags: TagLifecycleTracker,
    images: ImageLifecycleManager,
}

impl FlexFieldEntityService {
    pub fn new(stores: FlexFieldStores, kind: Arc<dyn FlexFieldKind>, settings: ServiceSettings) -> Self {
        let images = ImageLifecycleManager::new(stores.images.clone());
        Self {
            folders: FolderHierarchyManager::new(stores.folders.clone(), stores.projects.clone(), images.clone()),
            distributor: TemplateDistributor::new(stores.templates.clone(), stores.objects.clone()),
            tags: TagLifecycleTracker::new(stores.tags.clone(), stores.objects.clone(), stores.templates.clone()),
            images,
            kind,
            settings,
            projects: stores.projects,
            templates: stores.templates,
            objects: stores.objects,
            timeline: stores.timeline,
            stamper: stores.stamper,
        }
    }

    // ─── Folders ────────────────────────────────────────────────────────────

    pub async fn folders(&self, parent_id: Option<&str>, start: usize, page_size: u32) -> AppResult<FolderQueryResult> {
        let page_size = self.settings.resolve_page_size(page_size);
        self.folders
            .list_children(parent_id, start, page_size)
            .await
            .map_err(|error| conceal_storage_failure(error, "list folders", parent_id.unwrap_or("root")))
    }

    /// Returns the id of the new folder.
    pub async fn create_folder(&self, request: FolderRequest) -> AppResult<String> {
        let folder = self
            .folders
            .create(&request)
            .await
            .map_err(|error| conceal_storage_failure(error, "create folder", &request.name))?;
        tracing::info!(kind = self.kind.name(), folder_id = %folder.id, "folder created");
        self.emit(LifecycleEventKind::FolderCreated, &folder.name, Some(&folder.id))
            .await;
        Ok(folder.id)
    }

    pub async fn update_folder(&self, id: &str, request: FolderRequest) -> AppResult<FlexFieldFolder> {
        let folder = self
            .folders
            .rename(id, &request)
            .await
            .map_err(|error| conceal_storage_failure(error, "update folder", id))?;
        tracing::info!(kind = self.kind.name(), folder_id = %folder.id, "folder updated");
        self.emit(LifecycleEventKind::FolderUpdated, &folder.name, Some(&folder.id))
            .await;
        Ok(folder)
    }

    pub async fn delete_folder(&self, id: &str) -> AppResult<String> {
        let folder = self
            .folders
            .delete(id)
            .await
            .map_err(|error| conceal_storage_failure(error, "delete folder", id))?;
        tracing::info!(kind = self.kind.name(), folder_id = %folder.id, "folder deleted");
        self.emit(LifecycleEventKind::FolderDeleted, &folder.name, None).await;
        Ok(folder.id)
    }

    /// Returns the generated image name.
    pub async fn upload_folder_image(&self, id: &str, upload: ImageUpload) -> AppResult<String> {
        let folder = self
            .folders
            .upload_image(id, &upload)
            .await
            .map_err(|error| conceal_storage_failure(error, "upload folder image", id))?;
        self.emit(LifecycleEventKind::FolderImageUpload, &folder.name, Some(&folder.id))
            .await;
        folder
            .image_file
            .ok_or_else(|| AppError::Internal(format!("folder '{}' lost its image", id)))
    }

    // ─── Templates ──────────────────────────────────────────────────────────

    pub async fn template(&self, id: &str) -> AppResult<FlexFieldObject> {
        self.load(Role::Template, id)
            .await
            .map_err(|error| conceal_storage_failure(error, "load template", id))
    }

    pub async fn templates(&self, start: usize, page_size: u32) -> AppResult<QueryPage<FlexFieldObject>> {
        let page_size = self.settings.resolve_page_size(page_size);
        let result: AppResult<_> = async {
            let project = self.projects.get_default_project().await?;
            paginate(
                start,
                self.templates.get_in_root_folder(&project.id, start, page_size),
                self.templates.get_in_root_folder_count(&project.id),
            )
            .await
        }
        .await;
        result.map_err(|error| conceal_storage_failure(error, "list templates", self.kind.name()))
    }

    pub async fn create_template(&self, template: FlexFieldObject, actor: &Actor) -> AppResult<FlexFieldObject> {
        let name = template.name.clone();
        self.create_entity(Role::Template, template, actor)
            .await
            .map_err(|error| conceal_storage_failure(error, "create template", &name))
    }

    pub async fn update_template(
        &self,
        id: &str,
        template: FlexFieldObject,
        actor: &Actor,
    ) -> AppResult<FlexFieldObject> {
        self.update_entity(Role::Template, id, template, actor)
            .await
            .map_err(|error| conceal_storage_failure(error, "update template", id))
    }

    pub async fn delete_template(&self, id: &str) -> AppResult<String> {
        self.delete_entity(Role::Template, id)
            .await
            .map_err(|error| conceal_storage_failure(error, "delete template", id))
    }

    pub async fn distribute_template_fields(&self, id: &str) -> AppResult<DistributionReport> {
        let (template, report) = self
            .distributor
            .distribute_fields(id)
            .await
            .map_err(|error| conceal_storage_failure(error, "distribute template fields", id))?;
        self.emit(LifecycleEventKind::TemplateFieldsDistributed, &template.name, Some(&template.id))
            .await;
        Ok(report)
    }

    pub async fn upload_template_image(&self, id: &str, upload: ImageUpload, actor: &Actor) -> AppResult<String> {
        self.upload_entity_image(Role::Template, id, &upload, actor)
            .await
            .map_err(|error| conceal_storage_failure(error, "upload template image", id))
    }

    // ─── Objects ────────────────────────────────────────────────────────────

    pub async fn object(&self, id: &str) -> AppResult<FlexFieldObject> {
        let object = self
            .load(Role::Object, id)
            .await
            .map_err(|error| conceal_storage_failure(error, "load object", id))?;
        Ok(self.kind.strip_object(object))
    }

    /// Root folder listing when `parent_id` is `None` or empty.
    pub async fn objects(
        &self,
        parent_id: Option<&str>,
        start: usize,
        page_size: u32,
    ) -> AppResult<QueryPage<FlexFieldObject>> {
        let page_size = self.settings.resolve_page_size(page_size);
        let result: AppResult<_> = async {
            match parent_id.filter(|id| !id.is_empty()) {
                None => {
                    let project = self.projects.get_default_project().await?;
                    paginate(
                        start,
                        self.objects.get_in_root_folder(&project.id, start, page_size),
                        self.objects.get_in_root_folder_count(&project.id),
                    )
                    .await
                }
                Some(folder_id) => {
                    paginate(
                        start,
                        self.objects.get_in_folder(folder_id, start, page_size),
                        self.objects.get_in_folder_count(folder_id),
                    )
                    .await
                }
            }
        }
        .await;
        result.map_err(|error| conceal_storage_failure(error, "list objects", parent_id.unwrap_or("root")))
    }

    pub async fn search_objects(
        &self,
        pattern: &str,
        start: usize,
        page_size: u32,
    ) -> AppResult<QueryPage<FlexFieldObject>> {
        let page_size = self.settings.resolve_page_size(page_size);
        let result: AppResult<_> = async {
            let project = self.projects.get_default_project().await?;
            paginate(
                start,
                self.objects.search(&project.id, pattern, start, page_size),
                self.objects.search_count(&project.id, pattern),
            )
            .await
        }
        .await;
        result.map_err(|error| conceal_storage_failure(error, "search objects", pattern))
    }

    pub async fn resolve_object_names(&self, ids: &[String]) -> AppResult<Vec<ObjectName>> {
        self.objects
            .resolve_names(ids)
            .await
            .map_err(|error| conceal_storage_failure(error, "resolve object names", self.kind.name()))
    }

    pub async fn create_object(&self, object: FlexFieldObject, actor: &Actor) -> AppResult<FlexFieldObject> {
        let name = object.name.clone();
        self.create_entity(Role::Object, object, actor)
            .await
            .map_err(|error| conceal_storage_failure(error, "create object", &name))
    }

    pub async fn update_object(&self, id: &str, object: FlexFieldObject, actor: &Actor) -> AppResult<FlexFieldObject> {
        self.update_entity(Role::Object, id, object, actor)
            .await
            .map_err(|error| conceal_storage_failure(error, "update object", id))
    }

    pub async fn delete_object(&self, id: &str) -> AppResult<String> {
        self.delete_entity(Role::Object, id)
            .await
            .map_err(|error| conceal_storage_failure(error, "delete object", id))
    }

    pub async fn upload_object_image(&self, id: &str, upload: ImageUpload, actor: &Actor) -> AppResult<String> {
        self.upload_entity_image(Role::Object, id, &upload, actor)
            .await
            .map_err(|error| conceal_storage_failure(error, "upload object image", id))
    }

    // ─── Images and tags ────────────────────────────────────────────────────

    pub async fn image(&self, name: &str) -> AppResult<OpenedImage> {
        self.images
            .open_image(name)
            .await
            .map_err(|error| conceal_storage_failure(error, "open image", name))
    }

    pub async fn tags(&self) -> AppResult<Vec<String>> {
        self.tags
            .all_tags()
            .await
            .map_err(|error| conceal_storage_failure(error, "list tags", self.kind.name()))
    }

    // ─── Shared lifecycle ───────────────────────────────────────────────────

    fn store(&self, role: Role) -> &Arc<dyn FlexFieldObjectStore> {
        match role {
            Role::Template => &self.templates,
            Role::Object => &self.objects,
        }
    }

    async fn load(&self, role: Role, id: &str) -> AppResult<FlexFieldObject> {
        self.store(role)
            .get_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("{} '{}' not found", role.label(), id)))
    }

    async fn create_entity(&self, role: Role, mut incoming: FlexFieldObject, actor: &Actor) -> AppResult<FlexFieldObject> {
        if incoming.name.trim().is_empty() {
            return Err(AppError::Validation(format!("{} name must not be empty", role.label())));
        }
        if role == Role::Template {
            incoming.parent_folder_id.clear();
        }
        incoming.id.clear();
        set_field_ids_for_new_fields(&mut incoming.fields);
        incoming.tags = normalize_tags(&incoming.tags);

        let project = self.projects.get_default_project().await?;
        incoming.project_id = project.id;

        let mut prepared = self.kind.run_additional_updates(&incoming, incoming.clone()).await?;
        self.stamper.stamp(&mut prepared, actor).await?;

        let created = self.store(role).create(prepared).await?;
        tracing::info!(kind = self.kind.name(), id = %created.id, "{} created", role.label());

        self.reconcile_tags(&[], &created.tags).await;
        self.emit(role.created(), &created.name, Some(&created.id)).await;
        Ok(created)
    }

    async fn update_entity(
        &self,
        role: Role,
        id: &str,
        mut incoming: FlexFieldObject,
        actor: &Actor,
    ) -> AppResult<FlexFieldObject> {
        if incoming.name.trim().is_empty() {
            return Err(AppError::Validation(format!("{} name must not be empty", role.label())));
        }
        let mut merged = self.load(role, id).await?;
        let old_tags = merged.tags.clone();

        set_field_ids_for_new_fields(&mut incoming.fields);
        incoming.tags = normalize_tags(&incoming.tags);
        merged.name = incoming.name.clone();
        merged.fields = incoming.fields.clone();
        merged.tags = incoming.tags.clone();

        let mut merged = self.kind.run_additional_updates(&incoming, merged).await?;
        self.stamper.stamp(&mut merged, actor).await?;
        if role == Role::Object {
            implementation_status::evaluate(self.kind.as_ref(), &mut merged).await?;
        }

        self.store(role).update(&merged).await?;
        tracing::info!(kind = self.kind.name(), id = %merged.id, "{} updated", role.label());

        self.reconcile_tags(&old_tags, &merged.tags).await;
        self.emit(role.updated(), &merged.name, Some(&merged.id)).await;
        Ok(merged)
    }

    async fn delete_entity(&self, role: Role, id: &str) -> AppResult<String> {
        if role == Role::Object {
            if let Some(reason) = self.kind.check_object_references(id).await? {
                return Err(AppError::ReferenceConflict(reason));
            }
        }

        let loaded = self.load(role, id).await?;
        self.store(role).delete(&loaded).await?;
        tracing::info!(kind = self.kind.name(), id = %loaded.id, "{} deleted", role.label());

        if role == Role::Object {
            if let Err(error) = self.kind.delete_additional_dependencies(&loaded).await {
                tracing::error!(
                    kind = self.kind.name(),
                    id = %loaded.id,
                    error = %error,
                    "could not delete dependencies of object"
                );
            }
        }
        self.reconcile_tags(&loaded.tags, &[]).await;
        if let Some(image) = &loaded.image_file {
            self.images.release(image).await;
        }

        self.emit(role.deleted(), &loaded.name, None).await;
        Ok(loaded.id)
    }

    async fn upload_entity_image(&self, role: Role, id: &str, upload: &ImageUpload, actor: &Actor) -> AppResult<String> {
        self.images.validate_upload(upload)?;
        let Some(mut target) = self.store(role).get_by_id(id).await? else {
            return Err(AppError::Upload(format!("{} '{}' does not exist", role.label(), id)));
        };

        let image = self.images.store(upload).await?;
        let previous = target.image_file.replace(image.clone());
        target.is_implemented = false;
        self.stamper.stamp(&mut target, actor).await?;
        self.store(role).update(&target).await.map_err(|error| {
            tracing::error!(kind = self.kind.name(), id = %id, error = %error, "could not save image reference");
            AppError::Upload(format!("could not save image for {} '{}'", role.label(), target.name))
        })?;

        if let Some(previous) = previous.filter(|name| !name.is_empty()) {
            self.images.release(&previous).await;
        }
        self.emit(role.image_uploaded(), &target.name, Some(&target.id)).await;
        Ok(image)
    }

    async fn reconcile_tags(&self, old_tags: &[String], new_tags: &[String]) {
        if let Err(error) = self.tags.reconcile_on_upsert(old_tags, new_tags).await {
            tracing::warn!(kind = self.kind.name(), error = %error, "could not reconcile tags");
        }
    }

    async fn emit(&self, event: LifecycleEventKind, subject_name: &str, subject_id: Option<&str>) {
        let name = self.kind.event_name(event);
        if let Err(error) = self.timeline.record(&name, subject_name, subject_id).await {
            tracing::warn!(event = %name, error = %error, "could not record lifecycle event");
        }
    }
}
