//! Per-kind tag vocabulary. A tag lives as long as some object or template carries it;
//! there is no persistent counter, usage is recomputed on every mutation.

use crate::errors::AppResult;
use crate::store::{FlexFieldObjectStore, TagStore};
use std::collections::HashSet;
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagChanges {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

/// Folded form used for every case-insensitive tag comparison, in memory and in SQLite.
pub fn tag_key(tag: &str) -> String {
    tag.to_lowercase()
}

/// `added = new - old`, `removed = old - new`, compared without case.
pub fn diff_tags(old_tags: &[String], new_tags: &[String]) -> TagChanges {
    let old_keys: HashSet<String> = old_tags.iter().map(|tag| tag_key(tag)).collect();
    let new_keys: HashSet<String> = new_tags.iter().map(|tag| tag_key(tag)).collect();

    TagChanges {
        added: new_tags
            .iter()
            .filter(|tag| !old_keys.contains(&tag_key(tag)))
            .cloned()
            .collect(),
        removed: old_tags
            .iter()
            .filter(|tag| !new_keys.contains(&tag_key(tag)))
            .cloned()
            .collect(),
    }
}

/// Trims, drops empty tags and removes case-insensitive duplicates keeping the first spelling.
pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut seen = HashSet::with_capacity(tags.len());
    tags.iter()
        .map(|tag| tag.trim())
        .filter(|tag| !tag.is_empty())
        .filter(|tag| seen.insert(tag_key(tag)))
        .map(str::to_string)
        .collect()
}

#[derive(Clone)]
pub struct TagLifecycleTracker {
    tags: Arc<dyn TagStore>,
    objects: Arc<dyn FlexFieldObjectStore>,
    templates: Arc<dyn FlexFieldObjectStore>,
}

impl TagLifecycleTracker {
    pub fn new(
        tags: Arc<dyn TagStore>,
        objects: Arc<dyn FlexFieldObjectStore>,
        templates: Arc<dyn FlexFieldObjectStore>,
    ) -> Self {
        Self {
            tags,
            objects,
            templates,
        }
    }

    pub async fn all_tags(&self) -> AppResult<Vec<String>> {
        self.tags.get_all_tags().await
    }

    /// Pass an empty `old_tags` on create and an empty `new_tags` on delete.
    pub async fn reconcile_on_upsert(&self, old_tags: &[String], new_tags: &[String]) -> AppResult<TagChanges> {
        let changes = diff_tags(old_tags, new_tags);

        if !changes.added.is_empty() {
            let existing: HashSet<String> = self
                .tags
                .get_all_tags()
                .await?
                .iter()
                .map(|tag| tag_key(tag))
                .collect();
            for tag in &changes.added {
                if !existing.contains(&tag_key(tag)) {
                    self.tags.add_tag(tag).await?;
                }
            }
        }

        for tag in &changes.removed {
            let (used_by_objects, used_by_templates) = tokio::try_join!(
                self.objects.any_using_tag(tag),
                self.templates.any_using_tag(tag)
            )?;
            if used_by_objects || used_by_templates {
                continue;
            }
            self.tags.delete_tag(tag).await?;
            tracing::debug!(tag = %tag, "removed unused tag");
        }

        Ok(changes)
    }
}

#[cfg(test)]
mod tests {
    use super::{diff_tags, normalize_tags, TagLifecycleTracker};
    use crate::models::FlexFieldObject;
    use crate::store::{FlexFieldObjectStore, TagStore};
    use crate::test_support::{InMemoryObjects, InMemoryTags};
    use std::sync::Arc;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    fn tracker() -> (TagLifecycleTracker, Arc<InMemoryTags>, Arc<InMemoryObjects>, Arc<InMemoryObjects>) {
        let tags = Arc::new(InMemoryTags::default());
        let objects = Arc::new(InMemoryObjects::default());
        let templates = Arc::new(InMemoryObjects::default());
        let tracker = TagLifecycleTracker::new(tags.clone(), objects.clone(), templates.clone());
        (tracker, tags, objects, templates)
    }

    #[test]
    fn normalize_keeps_first_spelling() {
        assert_eq!(
            normalize_tags(&strings(&[" X ", "x", "", "  ", "Y"])),
            strings(&["X", "Y"])
        );
    }

    #[test]
    fn diff_is_case_insensitive() {
        let changes = diff_tags(&strings(&["a", "B"]), &strings(&["b", "c"]));
        assert_eq!(changes.added, strings(&["c"]));
        assert_eq!(changes.removed, strings(&["a"]));
    }

    #[tokio::test]
    async fn removed_tag_is_deleted_only_when_unreferenced() {
        let (tracker, tags, objects, _templates) = tracker();
        tags.add_tag("a").await.expect("seed a");
        tags.add_tag("b").await.expect("seed b");

        tracker
            .reconcile_on_upsert(&strings(&["a", "b"]), &strings(&["b", "c"]))
            .await
            .expect("reconcile");
        assert_eq!(tags.snapshot(), strings(&["b", "c"]));

        objects
            .create(FlexFieldObject {
                name: "other".to_string(),
                tags: strings(&["c"]),
                ..FlexFieldObject::default()
            })
            .await
            .expect("create");
        tracker
            .reconcile_on_upsert(&strings(&["b", "c"]), &[])
            .await
            .expect("reconcile");
        assert_eq!(tags.snapshot(), strings(&["c"]));
    }

    #[tokio::test]
    async fn tag_used_by_template_survives() {
        let (tracker, tags, _objects, templates) = tracker();
        tags.add_tag("Merchant").await.expect("seed");
        templates
            .create(FlexFieldObject {
                name: "Shopkeeper".to_string(),
                tags: strings(&["merchant"]),
                ..FlexFieldObject::default()
            })
            .await
            .expect("create");

        tracker
            .reconcile_on_upsert(&strings(&["Merchant"]), &[])
            .await
            .expect("reconcile");
        assert_eq!(tags.snapshot(), strings(&["Merchant"]));
    }

    #[tokio::test]
    async fn added_tags_are_not_duplicated_in_vocabulary() {
        let (tracker, tags, _objects, _templates) = tracker();
        tracker.reconcile_on_upsert(&[], &strings(&["X"])).await.expect("create");
        tracker.reconcile_on_upsert(&strings(&["X"]), &[]).await.expect("clear");
        tracker.reconcile_on_upsert(&[], &strings(&["X"])).await.expect("re-add");
        tracker.reconcile_on_upsert(&[], &strings(&["x"])).await.expect("other object");

        assert_eq!(tracker.all_tags().await.expect("all"), strings(&["X"]));
    }
}
