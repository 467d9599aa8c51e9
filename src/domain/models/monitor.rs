//! Monitor entry models for the per-(user, cube) query and working-memory
//! monitors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::memory::{normalize_text_key, MemoryItem};

/// One observed query, with its extracted keywords.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRecord {
    pub query_text: String,
    pub keywords: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl QueryRecord {
    pub fn new(query_text: impl Into<String>, keywords: Vec<String>) -> Self {
        Self {
            query_text: query_text.into(),
            keywords,
            timestamp: Utc::now(),
        }
    }
}

/// Bounded FIFO of observed queries for one (user, cube).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryHistory {
    records: Vec<QueryRecord>,
    max_len: usize,
}

impl QueryHistory {
    pub fn new(max_len: usize) -> Self {
        Self {
            records: Vec::new(),
            max_len: max_len.max(1),
        }
    }

    /// Append a record, evicting the oldest when the bound is reached.
    pub fn put(&mut self, record: QueryRecord) {
        if self.records.len() >= self.max_len {
            self.records.remove(0);
        }
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Query texts sorted most-recent first.
    pub fn queries_recent_first(&self) -> Vec<String> {
        let mut sorted: Vec<&QueryRecord> = self.records.iter().collect();
        sorted.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        sorted.iter().map(|r| r.query_text.clone()).collect()
    }

    /// Keyword frequency across the whole history.
    pub fn keyword_frequencies(&self) -> HashMap<String, usize> {
        let mut freq = HashMap::new();
        for record in &self.records {
            for kw in &record.keywords {
                *freq.entry(kw.clone()).or_insert(0) += 1;
            }
        }
        freq
    }

    pub fn records(&self) -> &[QueryRecord] {
        &self.records
    }
}

/// One working-set entry tracked by the working-memory monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingMemoryEntry {
    pub memory_text: String,
    pub item: MemoryItem,
    /// Normalized form of the text; unique within a working set.
    pub mapping_key: String,
    /// Position score from the last rerank (higher is earlier).
    pub sorting_score: f64,
    /// Accumulated keyword-match score against the query history.
    pub keywords_score: f64,
    /// How many times this text has been (re-)inserted.
    pub recording_count: u32,
}

impl WorkingMemoryEntry {
    /// Build an entry for `item` at rank `idx` of a list of `total` items.
    ///
    /// `keyword_freq` is the query-history keyword frequency map; the keyword
    /// score accumulates `occurrences_in_text * history_frequency` per keyword.
    pub fn from_item(
        item: MemoryItem,
        idx: usize,
        total: usize,
        keyword_freq: &HashMap<String, usize>,
    ) -> Self {
        let text = item.memory.clone();
        let mut keywords_score = 0.0;
        if !text.is_empty() {
            for (keyword, count) in keyword_freq {
                if keyword.is_empty() {
                    continue;
                }
                let occurrences = text.matches(keyword.as_str()).count();
                if occurrences > 0 {
                    keywords_score += (occurrences * count) as f64;
                }
            }
        }
        Self {
            mapping_key: normalize_text_key(&text),
            memory_text: text,
            item,
            sorting_score: (total - idx) as f64,
            keywords_score,
            recording_count: 1,
        }
    }

    /// Composite ordering key: rerank position first, keyword score second.
    /// When a rerank failed all sorting scores are zeroed and the keyword
    /// score dominates.
    pub fn sort_key(&self) -> (f64, f64) {
        (self.sorting_score, self.keywords_score)
    }
}

/// Working-memory monitor state for one (user, cube): entries keyed by
/// mapping key, duplicates collapsed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkingSet {
    entries: Vec<WorkingMemoryEntry>,
}

impl WorkingSet {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Replace the set with `new_entries`, collapsing duplicate mapping keys.
    ///
    /// A duplicate keeps the first occurrence's scores and bumps its
    /// recording count by the recurrence.
    pub fn replace(&mut self, new_entries: Vec<WorkingMemoryEntry>) {
        let mut seen: HashMap<String, usize> = HashMap::new();
        let mut collapsed: Vec<WorkingMemoryEntry> = Vec::with_capacity(new_entries.len());
        let previous: HashMap<String, u32> = self
            .entries
            .iter()
            .map(|e| (e.mapping_key.clone(), e.recording_count))
            .collect();
        for mut entry in new_entries {
            if let Some(&idx) = seen.get(&entry.mapping_key) {
                collapsed[idx].recording_count += 1;
                continue;
            }
            if let Some(&prior) = previous.get(&entry.mapping_key) {
                entry.recording_count += prior;
            }
            seen.insert(entry.mapping_key.clone(), collapsed.len());
            collapsed.push(entry);
        }
        self.entries = collapsed;
    }

    /// Entries sorted by `(sorting_score, keywords_score)` descending; the
    /// sort is stable so equal scores keep insertion order.
    pub fn sorted_entries(&self) -> Vec<WorkingMemoryEntry> {
        let mut sorted = self.entries.clone();
        sorted.sort_by(|a, b| {
            b.sort_key()
                .partial_cmp(&a.sort_key())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        sorted
    }

    /// The memory items in sorted order.
    pub fn sorted_items(&self) -> Vec<MemoryItem> {
        self.sorted_entries().into_iter().map(|e| e.item).collect()
    }

    /// The memory texts in sorted order.
    pub fn sorted_texts(&self) -> Vec<String> {
        self.sorted_entries()
            .into_iter()
            .map(|e| e.memory_text)
            .collect()
    }

    pub fn entries(&self) -> &[WorkingMemoryEntry] {
        &self.entries
    }
}
