use std::{future::Future, panic::AssertUnwindSafe};

use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::error;

/// Spawn `fut` on the runtime with its own panic boundary.
///
/// The task is not linked to the caller: dropping the returned handle does not
/// cancel it, and a panic inside `fut` is logged and ends only this task.
pub fn spawn_detached<F>(name: &'static str, fut: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        if let Err(panic) = AssertUnwindSafe(fut).catch_unwind().await {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            error!(task = name, %reason, "background task panicked");
        }
    })
}
