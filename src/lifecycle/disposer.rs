use super::DisposeHook;
use crate::binding::BoundValue;

/// A cached value waiting to be disposed.
pub(crate) struct PendingDisposal {
    key: String,
    hook: DisposeHook,
    value: BoundValue,
    /// When the value became ready; later values are disposed first.
    stamp: u64,
}

impl PendingDisposal {
    pub(crate) fn new(key: String, hook: DisposeHook, value: BoundValue, stamp: u64) -> Self {
        Self {
            key,
            hook,
            value,
            stamp,
        }
    }
}

/// Dispose values in reverse order of creation, so a value is disposed
/// before the values it was built from.
///
/// Every hook runs even if an earlier one fails; failures are logged and
/// returned as `"<key>: <error>"`.
pub(crate) async fn dispose_all(context: &str, mut pending: Vec<PendingDisposal>) -> Vec<String> {
    if pending.is_empty() {
        return Vec::new();
    }
    tracing::info!(context, count = pending.len(), "Disposing cached values...");
    pending.sort_by(|a, b| b.stamp.cmp(&a.stamp));

    let mut failures = Vec::new();
    for item in pending {
        tracing::debug!(context, key = %item.key, "Disposing");
        if let Err(e) = (item.hook)(item.value).await {
            tracing::error!(context, key = %item.key, error = %e, "Dispose failed");
            failures.push(format!("{}: {e}", item.key));
        }
    }

    tracing::info!(context, failed = failures.len(), "Disposal complete");
    failures
}
