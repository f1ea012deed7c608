//! # List Mode
//!
//! One listing pass per loop, no watch and no retry. Used as an init container
//! or for debugging.

use crate::controller::error_policy::log_fatal_diagnostics;
use crate::controller::reconciler::KindReconciler;
use crate::runtime::SidecarError;
use tracing::info;

/// Returns the number of resources materialized across all loops
pub async fn run_list_mode(loops: Vec<KindReconciler>) -> Result<usize, SidecarError> {
    let mut total = 0;
    for reconciler in loops {
        let target = reconciler.target();
        let kind = reconciler.kind().as_str();
        let namespace = reconciler.namespace().map(str::to_string);

        match reconciler.list_once().await {
            Ok(materialized) => {
                info!(target_scope = %target, materialized, "Listing pass complete");
                total += materialized;
            }
            Err(source) => {
                log_fatal_diagnostics(&source, kind, namespace.as_deref());
                return Err(SidecarError::List { target, source });
            }
        }
    }
    Ok(total)
}
