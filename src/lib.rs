pub mod db;
pub mod errors;
pub mod fields;
pub mod folders;
pub mod images;
pub mod implementation_status;
pub mod models;
pub mod pagination;
pub mod service;
pub mod settings;
pub mod store;
pub mod tags;
pub mod templates;
pub mod timeline;

#[cfg(test)]
mod test_support;

pub use crate::errors::{AppError, AppResult};
pub use crate::images::OpenedImage;
pub use crate::models::{
    Actor, CompareDifference, CompareResult, DistributionReport, FlexField, FlexFieldFolder, FlexFieldObject,
    FolderQueryResult, FolderRequest, ImageUpload, ObjectName, Project, QueryPage, UploadedFile,
};
pub use crate::service::{ClockStamper, FlexFieldEntityService, FlexFieldKind};
pub use crate::settings::ServiceSettings;
pub use crate::store::{FlexFieldStores, ImplementationSnapshotComparer};
pub use crate::timeline::LifecycleEventKind;

use std::path::Path;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

pub const SETTINGS_FILE_NAME: &str = "settings.json";

/// JSON logs to a daily rolling file under `log_dir`. `RUST_LOG` wins over `filter`.
pub fn init_tracing(log_dir: &Path, filter: &str) -> Result<(), String> {
    std::fs::create_dir_all(log_dir).map_err(|error| error.to_string())?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "flex-fields.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| error.to_string())
}

/// Service for one kind backed by the bundled SQLite and file stores under `data_dir`.
/// Settings come from `<data_dir>/settings.json` when present. Logging is set up on first use;
/// a host that already installed a subscriber keeps it.
pub fn open_local_service(data_dir: &Path, kind: Arc<dyn FlexFieldKind>) -> AppResult<FlexFieldEntityService> {
    let settings = ServiceSettings::load(&data_dir.join(SETTINGS_FILE_NAME))?;
    if let Err(error) = init_tracing(&settings.log_dir(data_dir), &settings.log_filter) {
        tracing::debug!(error = %error, "tracing already initialized");
    }
    let stores = FlexFieldStores::open_local(data_dir, &settings, kind.name())?;
    tracing::info!(
        kind = kind.name(),
        data_dir = %data_dir.display(),
        "opened flex field service"
    );
    Ok(FlexFieldEntityService::new(stores, kind, settings))
}
