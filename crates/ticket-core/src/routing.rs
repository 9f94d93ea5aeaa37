//! Routing resolution: who owns a recommendation.
//!
//! Two tiers, first hit wins:
//!
//! 1. a routing row for the project whose device names/labels intersect the
//!    recommendation's declared labels plus its target resource
//! 2. any routing row for the project (the project default)
//!
//! An empty result means "unroutable" and is not an error.

use crate::error::{Result, TicketError};
use crate::store::RoutingStore;
use crate::types::RoutingRow;

/// Decode the stored JSON label list. Blank input is the empty list.
pub fn decode_labels(raw: &str) -> Result<Vec<String>> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str::<Vec<String>>(raw).map_err(|e| TicketError::InvalidLabels {
        labels: raw.to_string(),
        reason: e.to_string(),
    })
}

/// Find the routing row for a recommendation. See the module docs for the
/// fallback order.
pub async fn resolve_routing<S: RoutingStore + ?Sized>(
    store: &S,
    project_id: &str,
    target_resource: &str,
    labels: &str,
) -> Result<Vec<RoutingRow>> {
    let mut candidates = decode_labels(labels)?;
    candidates.push(target_resource.to_string());
    tracing::debug!(project_id, ?candidates, "resolving routing");

    let by_labels = store.routing_by_labels(project_id, &candidates).await?;
    if !by_labels.is_empty() {
        return Ok(by_labels);
    }
    store.routing_by_project(project_id).await
}
