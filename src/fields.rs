use crate::models::FlexField;
use std::collections::HashSet;
use uuid::Uuid;

/// Gives every field without an id a fresh one and re-ids duplicates so ids stay unique
/// within the object. Existing unique ids are left alone.
pub fn set_field_ids_for_new_fields(fields: &mut [FlexField]) {
    let mut seen = HashSet::with_capacity(fields.len());
    for field in fields.iter_mut() {
        if field.id.trim().is_empty() || !seen.insert(field.id.clone()) {
            field.id = Uuid::new_v4().to_string();
            seen.insert(field.id.clone());
        }
    }
}

/// Template fields whose names the instance does not have yet, each under a new id.
pub fn missing_template_fields(template_fields: &[FlexField], instance_fields: &[FlexField]) -> Vec<FlexField> {
    let present: HashSet<&str> = instance_fields.iter().map(|field| field.name.as_str()).collect();
    template_fields
        .iter()
        .filter(|field| !present.contains(field.name.as_str()))
        .map(|field| FlexField {
            id: Uuid::new_v4().to_string(),
            ..field.clone()
        })
        .collect()
}
