//! Actor memory: a character-bounded rolling window of recent turns and a
//! capacity-bounded store of long-term notes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

use crate::digest::truncate_chars;

// ============================================================================
// Rolling Memory
// ============================================================================

/// One folded turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Simulated time of the turn.
    pub sim_time: DateTime<Utc>,
    pub tick: u64,
    pub text: String,
}

impl MemoryEntry {
    fn chars(&self) -> usize {
        self.text.chars().count()
    }
}

/// Recent turns, bounded by total characters; the oldest entries go first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollingMemory {
    entries: VecDeque<MemoryEntry>,
    max_chars: usize,
    /// Total entries ever folded in.
    total_added: u64,
}

impl Default for RollingMemory {
    fn default() -> Self {
        Self::new(6_000)
    }
}

impl RollingMemory {
    pub fn new(max_chars: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            max_chars: max_chars.max(1),
            total_added: 0,
        }
    }

    /// Folds a turn in, dropping the oldest entries until the window fits.
    ///
    /// A single entry larger than the whole window is cut to fit.
    pub fn push(&mut self, sim_time: DateTime<Utc>, tick: u64, text: &str) {
        self.total_added += 1;
        let (text, _) = truncate_chars(text.trim(), self.max_chars);
        self.entries.push_back(MemoryEntry {
            sim_time,
            tick,
            text,
        });
        while self.total_chars() > self.max_chars && self.entries.len() > 1 {
            self.entries.pop_front();
        }
    }

    pub fn total_chars(&self) -> usize {
        self.entries.iter().map(MemoryEntry::chars).sum()
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    /// Re-applies a (possibly different) character limit after a restore.
    pub fn set_max_chars(&mut self, max_chars: usize) {
        self.max_chars = max_chars.max(1);
        while self.total_chars() > self.max_chars && self.entries.len() > 1 {
            self.entries.pop_front();
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = &MemoryEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_added(&self) -> u64 {
        self.total_added
    }

    /// Oldest first, one line per turn, for context injection.
    pub fn render(&self) -> String {
        if self.entries.is_empty() {
            return "No recent memories.".to_string();
        }
        self.entries
            .iter()
            .map(|entry| {
                format!(
                    "[tick {} @ {}] {}",
                    entry.tick,
                    entry.sim_time.format("%Y-%m-%d %H:%M"),
                    entry.text
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ============================================================================
// Long-Term Notes
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongTermNote {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Importance in `[0, 1]`; the least important note is evicted first.
    pub importance: f64,
}

/// Long-term notes with importance-based eviction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongTermMemory {
    entries: BTreeMap<String, LongTermNote>,
    max_entries: usize,
    next_id: u64,
}

impl Default for LongTermMemory {
    fn default() -> Self {
        Self::with_capacity(32)
    }
}

impl LongTermMemory {
    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            max_entries: max_entries.max(1),
            next_id: 0,
        }
    }

    /// Stores a note and returns its id.
    pub fn store(
        &mut self,
        content: impl Into<String>,
        created_at: DateTime<Utc>,
        tags: Vec<String>,
        importance: f64,
    ) -> String {
        let id = format!("note-{}", self.next_id);
        self.next_id += 1;
        let importance = if importance.is_nan() {
            0.5
        } else {
            importance.clamp(0.0, 1.0)
        };
        self.entries.insert(
            id.clone(),
            LongTermNote {
                id: id.clone(),
                created_at,
                content: content.into(),
                tags,
                importance,
            },
        );
        self.evict_over_capacity();
        id
    }

    pub fn set_capacity(&mut self, max_entries: usize) {
        self.max_entries = max_entries.max(1);
        self.evict_over_capacity();
    }

    pub fn get(&self, id: &str) -> Option<&LongTermNote> {
        self.entries.get(id)
    }

    pub fn search_by_tag(&self, tag: &str) -> Vec<&LongTermNote> {
        self.entries
            .values()
            .filter(|note| note.tags.iter().any(|t| t == tag))
            .collect()
    }

    /// Most important first; ties broken by recency.
    pub fn top_by_importance(&self, n: usize) -> Vec<&LongTermNote> {
        let mut notes: Vec<_> = self.entries.values().collect();
        notes.sort_by(|a, b| {
            b.importance
                .partial_cmp(&a.importance)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        notes.into_iter().take(n).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn render(&self, n: usize) -> String {
        let notes = self.top_by_importance(n);
        if notes.is_empty() {
            return "No notes yet.".to_string();
        }
        notes
            .iter()
            .map(|note| format!("- {}", note.content))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn evict_over_capacity(&mut self) {
        while self.entries.len() > self.max_entries {
            let victim = self
                .entries
                .values()
                .min_by(|a, b| {
                    a.importance
                        .partial_cmp(&b.importance)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.created_at.cmp(&b.created_at))
                })
                .map(|note| note.id.clone());
            match victim {
                Some(id) => {
                    self.entries.remove(&id);
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn rolling_memory_drops_oldest_first() {
        let mut memory = RollingMemory::new(10);
        memory.push(t0(), 1, "aaaa");
        memory.push(t0(), 2, "bbbb");
        memory.push(t0(), 3, "cccc");

        let ticks: Vec<u64> = memory.entries().map(|entry| entry.tick).collect();
        assert_eq!(ticks, vec![2, 3]);
        assert!(memory.total_chars() <= 10);
        assert_eq!(memory.total_added(), 3);
    }

    #[test]
    fn oversized_entry_is_cut_to_window() {
        let mut memory = RollingMemory::new(5);
        memory.push(t0(), 1, "old");
        memory.push(t0(), 2, "a very long turn");
        assert_eq!(memory.len(), 1);
        assert!(memory.render().contains("a ver"));
    }

    #[test]
    fn long_term_evicts_least_important() {
        let mut notes = LongTermMemory::with_capacity(2);
        let low = notes.store("low", t0(), Vec::new(), 0.1);
        let high = notes.store("high", t0(), vec!["post".to_string()], 0.9);
        let mid = notes.store("mid", t0(), Vec::new(), 0.5);

        assert_eq!(notes.len(), 2);
        assert!(notes.get(&low).is_none());
        assert!(notes.get(&high).is_some());
        assert!(notes.get(&mid).is_some());
        assert_eq!(notes.search_by_tag("post").len(), 1);
        assert!(notes.render(1).contains("high"));
    }

    #[test]
    fn memory_survives_serde() {
        let mut memory = RollingMemory::new(100);
        memory.push(t0(), 4, "hello");
        let json = serde_json::to_string(&memory).unwrap();
        let back: RollingMemory = serde_json::from_str(&json).unwrap();
        assert_eq!(back, memory);
    }
}
