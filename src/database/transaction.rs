//! Run a closure inside one unit of work.

use futures::future::BoxFuture;
use tracing::warn;

use super::errors::StoreError;
use super::store::{EntityStore, UnitOfWork};

/// Begin a unit, run `operation`, commit on `Ok` and roll back on `Err`.
///
/// A panic inside `operation` drops the unit, which rolls it back before the
/// panic propagates. Commit failures are returned as [`StoreError::Commit`]
/// converted into the caller's error type.
///
/// ```rust,ignore
/// let story_id = with_transaction(store.as_ref(), move |uow| {
///     Box::pin(async move {
///         uow.insert_published_story(&story).await?;
///         uow.record_task(&task).await?;
///         Ok::<_, OrchestrationError>(story.id)
///     })
/// })
/// .await?;
/// ```
pub async fn with_transaction<T, E, F>(store: &dyn EntityStore, operation: F) -> Result<T, E>
where
    E: From<StoreError>,
    F: for<'u> FnOnce(&'u mut Box<dyn UnitOfWork>) -> BoxFuture<'u, Result<T, E>>,
{
    let mut uow = store.begin().await?;

    match operation(&mut uow).await {
        Ok(value) => {
            uow.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = uow.rollback().await {
                warn!(error = %rollback_err, "Rollback failed after aborted unit of work");
            }
            Err(err)
        }
    }
}
