//! Graph store port.
//!
//! The long-term store is treated as a key/value + edge store with a small
//! query surface; the scheduler never walks the graph itself.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::error::StoreError;
use crate::domain::models::MemoryStatus;

/// Comparison operator for metadata filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    #[serde(rename = "=")]
    Eq,
}

/// One metadata predicate for node lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataFilter {
    pub field: String,
    pub op: FilterOp,
    pub value: serde_json::Value,
}

impl MetadataFilter {
    pub fn eq(field: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Eq,
            value: value.into(),
        }
    }
}

/// Direction of edge traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EdgeDirection {
    Out,
    In,
}

/// A directed, typed edge between memory nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from: String,
    pub to: String,
    pub edge_type: String,
}

/// Edge type linking pre-merge nodes to their post-merge target.
pub const MERGED_TO_EDGE: &str = "MERGED_TO";

/// Port over the graph-backed long-term store.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Ids of nodes matching every filter.
    async fn get_by_metadata(&self, filters: &[MetadataFilter]) -> Result<Vec<String>, StoreError>;

    /// Edges of `edge_type` incident to `id` in the given direction.
    async fn get_edges(
        &self,
        id: &str,
        edge_type: &str,
        direction: EdgeDirection,
    ) -> Result<Vec<GraphEdge>, StoreError>;

    /// Update a node's status field.
    async fn update_node_status(
        &self,
        id: &str,
        status: MemoryStatus,
        user_name: &str,
    ) -> Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_filter_eq() {
        let filter = MetadataFilter::eq("key", "favfruit");
        assert_eq!(filter.field, "key");
        assert_eq!(filter.value, serde_json::json!("favfruit"));
        let json = serde_json::to_value(&filter).unwrap();
        assert_eq!(json["op"], "=");
    }

    #[test]
    fn test_edge_direction_wire_form() {
        assert_eq!(
            serde_json::to_string(&EdgeDirection::Out).unwrap(),
            "\"OUT\""
        );
    }
}
