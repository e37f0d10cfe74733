use crate::errors::{AppError, AppResult};
use crate::models::{ImageUpload, UploadedFile};
use crate::store::{ImageReader, ImageStore, ImageUsage, ImageWriter};
use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

pub struct OpenedImage {
    pub mime_type: String,
    pub reader: ImageReader,
}

impl std::fmt::Debug for OpenedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenedImage").field("mime_type", &self.mime_type).finish()
    }
}

/// Image mime type for a file name, `None` when the extension is not a known image format.
pub fn image_mime_type(file_name: &str) -> Option<String> {
    mime_guess::from_path(file_name)
        .iter()
        .find(|mime| mime.type_() == mime_guess::mime::IMAGE)
        .map(|mime| mime.essence_str().to_string())
}

#[derive(Clone)]
pub struct ImageLifecycleManager {
    images: Arc<dyn ImageStore>,
}

impl ImageLifecycleManager {
    pub fn new(images: Arc<dyn ImageStore>) -> Self {
        Self { images }
    }

    pub fn validate_upload<'a>(&self, upload: &'a ImageUpload) -> AppResult<&'a UploadedFile> {
        let [file] = upload.files.as_slice() else {
            return Err(AppError::Upload(format!(
                "expected exactly one file, received {}",
                upload.files.len()
            )));
        };
        if file.data.is_empty() {
            return Err(AppError::Upload(format!("file '{}' is empty", file.file_name)));
        }
        if image_mime_type(&file.file_name).is_none() {
            return Err(AppError::Upload(format!("file '{}' is not an image", file.file_name)));
        }
        Ok(file)
    }

    /// Writes the upload and returns the generated file name.
    pub async fn store(&self, upload: &ImageUpload) -> AppResult<String> {
        let file = self.validate_upload(upload)?;
        self.write(file).await.map_err(|error| {
            tracing::error!(file_name = %file.file_name, error = %error, "could not store image");
            AppError::Upload(format!("could not store image '{}'", file.file_name))
        })
    }

    /// Advisory. The store keeps the file while anything still references it.
    pub async fn release(&self, name: &str) {
        if name.is_empty() {
            return;
        }
        if let Err(error) = self.images.delete_if_unused(name).await {
            tracing::warn!(image = %name, error = %error, "could not delete image");
        }
    }

    pub async fn open_image(&self, name: &str) -> AppResult<OpenedImage> {
        if name.trim().is_empty() {
            return Err(AppError::NotFound("image name is empty".to_string()));
        }
        let mime_type = image_mime_type(name)
            .ok_or_else(|| AppError::BadRequest(format!("'{}' is not an image", name)))?;
        let reader = self.images.open_image(name).await?;
        Ok(OpenedImage { mime_type, reader })
    }

    async fn write(&self, file: &UploadedFile) -> AppResult<String> {
        let (mut writer, name) = self.images.create_image(&file.file_name).await?;
        writer.write_all(&file.data).await?;
        writer.shutdown().await?;
        Ok(name)
    }
}

/// Images as plain files in one directory.
pub struct FileImageStore {
    root: PathBuf,
    usage: Arc<dyn ImageUsage>,
}

impl FileImageStore {
    pub fn new(root: PathBuf, usage: Arc<dyn ImageUsage>) -> AppResult<Self> {
        fs::create_dir_all(&root).map_err(|error| AppError::Io(error.to_string()))?;
        Ok(Self { root, usage })
    }

    fn resolve(&self, name: &str) -> AppResult<PathBuf> {
        let valid = !name.is_empty()
            && !name.starts_with('.')
            && name
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.');
        if !valid {
            return Err(AppError::BadRequest(format!("invalid image name '{}'", name)));
        }
        Ok(self.root.join(name))
    }
}

fn generated_name(file_name: &str) -> String {
    let extension: String = Path::new(file_name)
        .extension()
        .and_then(|value| value.to_str())
        .unwrap_or_default()
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();
    let id = Uuid::new_v4();
    if extension.is_empty() {
        id.to_string()
    } else {
        format!("{}.{}", id, extension)
    }
}

#[async_trait]
impl ImageStore for FileImageStore {
    async fn create_image(&self, file_name: &str) -> AppResult<(ImageWriter, String)> {
        let name = generated_name(file_name);
        let file = tokio::fs::File::create(self.root.join(&name)).await?;
        Ok((Box::pin(file), name))
    }

    async fn open_image(&self, name: &str) -> AppResult<ImageReader> {
        let path = self.resolve(name)?;
        match tokio::fs::File::open(&path).await {
            Ok(file) => Ok(Box::pin(file)),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                Err(AppError::NotFound(format!("image '{}' not found", name)))
            }
            Err(error) => Err(error.into()),
        }
    }

    async fn delete_if_unused(&self, name: &str) -> AppResult<()> {
        let path = self.resolve(name)?;
        if self.usage.is_image_used(name).await? {
            tracing::debug!(image = %name, "image still referenced, keeping file");
            return Ok(());
        }
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}
