use crate::errors::{AppError, AppResult};
use crate::fields::missing_template_fields;
use crate::models::{DistributionReport, FlexFieldObject};
use crate::store::FlexFieldObjectStore;
use std::sync::Arc;

/// Pushes template fields into the objects created from the template.
#[derive(Clone)]
pub struct TemplateDistributor {
    templates: Arc<dyn FlexFieldObjectStore>,
    objects: Arc<dyn FlexFieldObjectStore>,
}

impl TemplateDistributor {
    pub fn new(templates: Arc<dyn FlexFieldObjectStore>, objects: Arc<dyn FlexFieldObjectStore>) -> Self {
        Self { templates, objects }
    }

    /// Appends template fields an object lacks (matched by name) under fresh ids. Objects
    /// that gained a field lose their implemented flag. A failing object does not stop the
    /// batch, but any failure turns the whole call into an error.
    pub async fn distribute_fields(&self, template_id: &str) -> AppResult<(FlexFieldObject, DistributionReport)> {
        let template = self
            .templates
            .get_by_id(template_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("template '{}' not found", template_id)))?;

        let instances = self.objects.get_by_template_id(template_id).await?;
        let mut report = DistributionReport::default();
        let mut failed = 0usize;

        for mut object in instances {
            let missing = missing_template_fields(&template.fields, &object.fields);
            let added = !missing.is_empty();
            if added {
                object.fields.extend(missing);
                object.is_implemented = false;
            }

            match self.objects.update(&object).await {
                Ok(()) if added => report.updated += 1,
                Ok(()) => report.unchanged += 1,
                Err(error) => {
                    failed += 1;
                    tracing::error!(
                        template_id = %template_id,
                        object_id = %object.id,
                        error = %error,
                        "could not distribute template fields"
                    );
                }
            }
        }

        if failed > 0 {
            return Err(AppError::Internal(format!(
                "could not distribute fields of template '{}' to {} object(s)",
                template.name, failed
            )));
        }

        tracing::info!(
            template_id = %template_id,
            updated = report.updated,
            unchanged = report.unchanged,
            "distributed template fields"
        );
        Ok((template, report))
    }
}
