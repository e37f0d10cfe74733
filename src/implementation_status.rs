use crate::errors::AppResult;
use crate::models::FlexFieldObject;
use crate::store::ImplementationSnapshotComparer;

/// Clears `is_implemented` when the object drifted from its implemented snapshot.
/// Never sets the flag back; an object that is not implemented is left untouched.
/// Returns whether the flag was cleared.
pub async fn evaluate<C>(comparer: &C, candidate: &mut FlexFieldObject) -> AppResult<bool>
where
    C: ImplementationSnapshotComparer + ?Sized,
{
    if !candidate.is_implemented {
        return Ok(false);
    }

    let result = comparer.compare(candidate).await?;
    if !result.has_differences() {
        return Ok(false);
    }

    tracing::debug!(
        object_id = %candidate.id,
        differences = result.compare_difference.len(),
        "object drifted from implemented snapshot"
    );
    candidate.is_implemented = false;
    Ok(true)
}
