//! Memory item domain model.
//!
//! Memory items are owned by mem-cubes; the scheduler consumes and produces
//! them through the mem-cube ports. The `memory_type` decides which search
//! lane an item participates in, and `status` controls its visibility.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Which memory partition an item belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryKind {
    WorkingMemory,
    LongTermMemory,
    UserMemory,
    ToolSchemaMemory,
    SkillMemory,
    RawFileMemory,
}

impl MemoryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WorkingMemory => "WorkingMemory",
            Self::LongTermMemory => "LongTermMemory",
            Self::UserMemory => "UserMemory",
            Self::ToolSchemaMemory => "ToolSchemaMemory",
            Self::SkillMemory => "SkillMemory",
            Self::RawFileMemory => "RawFileMemory",
        }
    }
}

impl std::fmt::Display for MemoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Visibility status of a memory item.
///
/// `Resolving` hides an item from normal search but keeps it visible to
/// reconciliation; `Archived` is terminal aside from explicit reactivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryStatus {
    Activated,
    Resolving,
    Archived,
    Deleted,
}

impl MemoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Activated => "activated",
            Self::Resolving => "resolving",
            Self::Archived => "archived",
            Self::Deleted => "deleted",
        }
    }
}

/// Metadata attached to a memory item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryMetadata {
    pub memory_type: MemoryKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    pub status: MemoryStatus,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Confidence in [0, 1].
    #[serde(default)]
    pub confidence: f32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Source document ids for file-derived memories.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub file_ids: Vec<String>,
    /// Ids of items this one was merged from; those are archived on ingest.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub merged_from: Vec<String>,
    /// Ids of working-memory bindings to clean up alongside the raw item.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub working_binding_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, serde_json::Value>,
}

impl Default for MemoryMetadata {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            memory_type: MemoryKind::LongTermMemory,
            key: None,
            status: MemoryStatus::Activated,
            tags: Vec::new(),
            confidence: 0.0,
            created_at: now,
            updated_at: now,
            sources: Vec::new(),
            embedding: None,
            user_id: None,
            file_ids: Vec::new(),
            merged_from: Vec::new(),
            working_binding_ids: Vec::new(),
            extra: HashMap::new(),
        }
    }
}

/// A memory item consumed and produced by handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryItem {
    pub id: String,
    pub memory: String,
    pub metadata: MemoryMetadata,
}

impl MemoryItem {
    /// Create an item with a fresh id and default metadata.
    pub fn new(memory: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            memory: memory.into(),
            metadata: MemoryMetadata::default(),
        }
    }

    /// Set the memory partition.
    pub fn with_kind(mut self, kind: MemoryKind) -> Self {
        self.metadata.memory_type = kind;
        self
    }

    /// Set the lookup key.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.metadata.key = Some(key.into());
        self
    }

    /// Add a tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.metadata.tags.push(tag.into());
        self
    }

    /// Set the owning user id.
    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.metadata.user_id = Some(user_id.into());
        self
    }

    /// Set the embedding vector.
    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.metadata.embedding = Some(embedding);
        self
    }

    /// The item's lookup key, falling back to the normalized memory text.
    pub fn key_or_derived(&self) -> String {
        self.metadata
            .key
            .clone()
            .filter(|k| !k.is_empty())
            .unwrap_or_else(|| normalize_text_key(&self.memory))
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.metadata.tags.iter().any(|t| t == tag)
    }
}

/// Tag marking raw-chunk (fast) items, filtered out of working-memory replace.
pub const FAST_MODE_TAG: &str = "mode:fast";

/// Normalize a memory text into its mapping key.
///
/// Lowercased, alphanumerics kept, runs of everything else collapsed into
/// single spaces. Two texts with the same key are treated as duplicates.
pub fn normalize_text_key(name: &str) -> String {
    let mut key = String::with_capacity(name.len());
    let mut pending_space = false;
    for ch in name.chars() {
        if ch.is_alphanumeric() {
            if pending_space && !key.is_empty() {
                key.push(' ');
            }
            pending_space = false;
            for lower in ch.to_lowercase() {
                key.push(lower);
            }
        } else {
            pending_space = true;
        }
    }
    key
}

const CONFLICT_MEMORY_TITLE: &str = "[possibly conflicting memories]";
const DUPLICATE_MEMORY_TITLE: &str = "[possibly duplicate memories]";
const MAX_RELATED_ITEM_LEN: usize = 200;
const MAX_RELATED_SECTION_LEN: usize = 1000;

/// Append conflicting and duplicate memory texts to an item, each section
/// bounded so annotations cannot grow without limit.
///
/// The annotation is reversible: [`detach_related_content`] restores the
/// original text exactly.
pub fn append_related_content(item: &mut MemoryItem, duplicates: &[String], conflicts: &[String]) {
    fn format_section(title: &str, items: &[String]) -> String {
        if items.is_empty() {
            return String::new();
        }
        let mut section = String::new();
        for mem in items {
            let snippet = if mem.len() > MAX_RELATED_ITEM_LEN {
                let mut end = MAX_RELATED_ITEM_LEN;
                while !mem.is_char_boundary(end) {
                    end -= 1;
                }
                format!("{}...", &mem[..end])
            } else {
                mem.clone()
            };
            if section.len() + snippet.len() + 5 > MAX_RELATED_SECTION_LEN {
                section.push_str("\n- ... (more items truncated)");
                break;
            }
            section.push_str("\n- ");
            section.push_str(&snippet);
        }
        format!("\n\n{title}:{section}")
    }

    let mut append_text = String::new();
    append_text.push_str(&format_section(CONFLICT_MEMORY_TITLE, conflicts));
    append_text.push_str(&format_section(DUPLICATE_MEMORY_TITLE, duplicates));
    if !append_text.is_empty() {
        item.memory.push_str(&append_text);
    }
}

/// Strip any related-content annotation appended by [`append_related_content`].
pub fn detach_related_content(item: &mut MemoryItem) {
    let markers = [
        format!("\n\n{CONFLICT_MEMORY_TITLE}:"),
        format!("\n\n{DUPLICATE_MEMORY_TITLE}:"),
    ];
    let mut cut_index: Option<usize> = None;
    for marker in &markers {
        if let Some(idx) = item.memory.find(marker.as_str()) {
            cut_index = Some(cut_index.map_or(idx, |cur| cur.min(idx)));
        }
    }
    if let Some(idx) = cut_index {
        item.memory.truncate(idx);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_text_key() {
        assert_eq!(normalize_text_key("Hello, World!"), "hello world");
        assert_eq!(normalize_text_key("  A  B  "), "a b");
        assert_eq!(normalize_text_key("café-Crème"), "café crème");
        assert_eq!(normalize_text_key(""), "");
    }

    #[test]
    fn test_key_or_derived_prefers_explicit_key() {
        let item = MemoryItem::new("Some text").with_key("favfruit");
        assert_eq!(item.key_or_derived(), "favfruit");
        let item = MemoryItem::new("Some Text");
        assert_eq!(item.key_or_derived(), "some text");
    }

    #[test]
    fn test_has_tag() {
        let item = MemoryItem::new("x").with_tag(FAST_MODE_TAG);
        assert!(item.has_tag("mode:fast"));
        assert!(!item.has_tag("mode:fine"));
    }

    #[test]
    fn test_append_then_detach_round_trip() {
        let original = "User prefers green tea over coffee.";
        let mut item = MemoryItem::new(original);
        append_related_content(
            &mut item,
            &["User likes tea.".to_string()],
            &["User prefers coffee.".to_string()],
        );
        assert!(item.memory.contains(CONFLICT_MEMORY_TITLE));
        assert!(item.memory.contains(DUPLICATE_MEMORY_TITLE));
        detach_related_content(&mut item);
        assert_eq!(item.memory, original);
    }

    #[test]
    fn test_append_related_content_empty_is_noop() {
        let mut item = MemoryItem::new("unchanged");
        append_related_content(&mut item, &[], &[]);
        assert_eq!(item.memory, "unchanged");
    }

    #[test]
    fn test_append_related_content_truncates_long_items() {
        let mut item = MemoryItem::new("base");
        let long = "x".repeat(500);
        append_related_content(&mut item, &[long], &[]);
        assert!(item.memory.contains("..."));
        assert!(item.memory.len() < 500 + MAX_RELATED_SECTION_LEN);
    }

    #[test]
    fn test_append_related_content_bounds_section() {
        let mut item = MemoryItem::new("base");
        let items: Vec<String> = (0..50).map(|i| format!("memory number {i} {}", "y".repeat(100))).collect();
        append_related_content(&mut item, &items, &[]);
        assert!(item.memory.contains("(more items truncated)"));
    }

    #[test]
    fn test_memory_item_serde_round_trip() {
        let item = MemoryItem::new("round trip")
            .with_kind(MemoryKind::UserMemory)
            .with_key("rt")
            .with_tag("t1")
            .with_embedding(vec![0.1, 0.2]);
        let json = serde_json::to_string(&item).unwrap();
        let back: MemoryItem = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, item.id);
        assert_eq!(back.metadata.memory_type, MemoryKind::UserMemory);
        assert_eq!(back.metadata.embedding.as_deref(), Some(&[0.1f32, 0.2][..]));
    }

    #[test]
    fn test_memory_kind_string_form() {
        assert_eq!(MemoryKind::LongTermMemory.to_string(), "LongTermMemory");
        let kind: MemoryKind = serde_json::from_str("\"UserMemory\"").unwrap();
        assert_eq!(kind, MemoryKind::UserMemory);
    }
}
