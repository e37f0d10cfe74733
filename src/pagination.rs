use crate::errors::AppResult;
use crate::models::QueryPage;
use std::future::Future;

/// Runs the page and count queries together. Either failure fails the whole page.
pub async fn paginate<T, P, C>(start: usize, page: P, count: C) -> AppResult<QueryPage<T>>
where
    P: Future<Output = AppResult<Vec<T>>>,
    C: Future<Output = AppResult<u64>>,
{
    let (items, total) = tokio::try_join!(page, count)?;
    let consumed = start as u64 + items.len() as u64;

    Ok(QueryPage {
        has_more: consumed < total,
        items,
    })
}
