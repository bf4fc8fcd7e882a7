//! Concurrent per-id record reads with settle-all semantics.

use tokio::task::JoinSet;
use tracing::warn;

use runnerpool_state::StateResult;

/// Run `read` for every id on the blocking pool and wait for all of them.
///
/// Results keep the order of `ids`. A failed read, or a read task that
/// never reports back, becomes an `Err` for that id only.
pub(crate) async fn settle_all<T, F>(ids: &[String], read: F) -> Vec<Result<T, String>>
where
    T: Send + 'static,
    F: Fn(&str) -> StateResult<T> + Clone + Send + 'static,
{
    let mut set = JoinSet::new();
    for (index, id) in ids.iter().cloned().enumerate() {
        let read = read.clone();
        set.spawn_blocking(move || (index, read(&id).map_err(|e| e.to_string())));
    }

    let mut results: Vec<Result<T, String>> = (0..ids.len())
        .map(|_| Err("read did not complete".to_string()))
        .collect();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, result)) => {
                if let Err(e) = &result {
                    warn!(id = %ids[index], error = %e, "record read failed");
                }
                results[index] = result;
            }
            Err(e) => warn!(error = %e, "record read task failed"),
        }
    }
    results
}
