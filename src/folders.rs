use crate::errors::{AppError, AppResult};
use crate::images::ImageLifecycleManager;
use crate::models::{FlexFieldFolder, FolderQueryResult, FolderRequest, ImageUpload};
use crate::pagination::paginate;
use crate::store::{FolderStore, ProjectStore};
use std::sync::Arc;

#[derive(Clone)]
pub struct FolderHierarchyManager {
    folders: Arc<dyn FolderStore>,
    projects: Arc<dyn ProjectStore>,
    images: ImageLifecycleManager,
}

impl FolderHierarchyManager {
    pub fn new(
        folders: Arc<dyn FolderStore>,
        projects: Arc<dyn ProjectStore>,
        images: ImageLifecycleManager,
    ) -> Self {
        Self {
            folders,
            projects,
            images,
        }
    }

    /// Root listing when `parent_id` is `None` or empty. For a subfolder listing the result
    /// carries the parent's name and the id of the parent's own parent for navigation.
    pub async fn list_children(
        &self,
        parent_id: Option<&str>,
        start: usize,
        page_size: usize,
    ) -> AppResult<FolderQueryResult> {
        let parent_id = parent_id.filter(|id| !id.is_empty());
        let Some(parent_id) = parent_id else {
            let project = self.projects.get_default_project().await?;
            let page = paginate(
                start,
                self.folders.get_root_folders(&project.id, start, page_size),
                self.folders.get_root_folder_count(&project.id),
            )
            .await?;
            return Ok(FolderQueryResult {
                folder_name: String::new(),
                parent_id: String::new(),
                has_more: page.has_more,
                folders: page.items,
            });
        };

        let parent = self.load(parent_id).await?;
        let page = paginate(
            start,
            self.folders.get_child_folders(parent_id, start, page_size),
            self.folders.get_child_folder_count(parent_id),
        )
        .await?;
        Ok(FolderQueryResult {
            folder_name: parent.name,
            parent_id: parent.parent_folder_id,
            has_more: page.has_more,
            folders: page.items,
        })
    }

    pub async fn create(&self, request: &FolderRequest) -> AppResult<FlexFieldFolder> {
        if request.name.trim().is_empty() {
            return Err(AppError::Validation("folder name must not be empty".to_string()));
        }
        let project = self.projects.get_default_project().await?;
        self.folders
            .create_folder(FlexFieldFolder {
                id: String::new(),
                project_id: project.id,
                parent_folder_id: request.parent_id.clone().unwrap_or_default(),
                name: request.name.clone(),
                description: request.description.clone(),
                image_file: None,
            })
            .await
    }

    pub async fn rename(&self, id: &str, request: &FolderRequest) -> AppResult<FlexFieldFolder> {
        let mut folder = self.load(id).await?;
        folder.name = request.name.clone();
        folder.description = request.description.clone();
        self.folders.update_folder(&folder).await?;
        Ok(folder)
    }

    /// Only child folders block deletion. Objects still filed in the folder do not.
    pub async fn delete(&self, id: &str) -> AppResult<FlexFieldFolder> {
        let folder = self.load(id).await?;
        let children = self.folders.get_child_folder_count(id).await?;
        if children > 0 {
            return Err(AppError::NotEmpty(format!(
                "folder '{}' still has {} child folder(s)",
                folder.name, children
            )));
        }

        self.folders.delete_folder(&folder).await?;
        if let Some(image) = &folder.image_file {
            self.images.release(image).await;
        }
        Ok(folder)
    }

    /// Returns the updated folder; its `image_file` is the new generated name.
    pub async fn upload_image(&self, id: &str, upload: &ImageUpload) -> AppResult<FlexFieldFolder> {
        self.images.validate_upload(upload)?;
        let Some(mut folder) = self.folders.get_folder_by_id(id).await? else {
            return Err(AppError::Upload(format!("folder '{}' does not exist", id)));
        };

        let image = self.images.store(upload).await?;
        let previous = folder.image_file.replace(image);
        self.folders.update_folder(&folder).await.map_err(|error| {
            tracing::error!(folder_id = %id, error = %error, "could not save folder image");
            AppError::Upload(format!("could not save image for folder '{}'", folder.name))
        })?;

        if let Some(previous) = previous.filter(|name| !name.is_empty()) {
            self.images.release(&previous).await;
        }
        Ok(folder)
    }

    async fn load(&self, id: &str) -> AppResult<FlexFieldFolder> {
        self.folders
            .get_folder_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("folder '{}' not found", id)))
    }
}
