use crate::{AppError, AppResult};

/// Runs a synchronous job on tokio's blocking pool and folds join failures
/// (cancellation, panic) into [`AppError`]s tagged with `label`.
pub async fn run_blocking<T, F>(label: &'static str, job: F) -> AppResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> AppResult<T> + Send + 'static,
{
    match tokio::task::spawn_blocking(job).await {
        Ok(result) => result,
        Err(error) if error.is_cancelled() => {
            Err(AppError::new("blocking_task_canceled", "Background job was canceled")
                .with_context("blockingTask", label))
        }
        Err(error) if error.is_panic() => {
            tracing::error!(event = "blocking_task_panicked", task = label);
            Err(
                AppError::new("blocking_task_panicked", "Background job panicked")
                    .with_context("joinError", join_error_detail(&error))
                    .with_context("blockingTask", label),
            )
        }
        Err(error) => Err(AppError::new("blocking_task_failed", "Background job failed")
            .with_context("joinError", join_error_detail(&error))
            .with_context("blockingTask", label)),
    }
}

fn join_error_detail(error: &tokio::task::JoinError) -> String {
    let debug_text = format!("{error:?}");
    if debug_text.trim().is_empty() {
        "join error".to_string()
    } else {
        debug_text
    }
}

#[cfg(test)]
#[path = "../../tests/runtime/blocking_tests.rs"]
mod tests;
