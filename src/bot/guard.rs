//! Error boundary shared by every handler.
//!
//! Commands and the auto-translate pipeline all run through [`guarded`], so
//! a failing handler is logged once and never reaches the dispatcher or
//! other in-flight handlers.

use std::future::Future;
use tracing::error;

/// Await `handler`, logging and discarding any error.
///
/// Returns `true` when the handler succeeded.
pub async fn guarded<F, T>(label: &str, handler: F) -> bool
where
    F: Future<Output = anyhow::Result<T>>,
{
    match handler.await {
        Ok(_) => true,
        Err(e) => {
            error!("{label} handler error: {e:#}");
            false
        }
    }
}
