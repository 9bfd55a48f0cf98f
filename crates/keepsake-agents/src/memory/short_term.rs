use keepsake_common::MemoryEntry;
use tracing::info;

/// Bounded recent-memory cache.
///
/// Permanent entries (`keep == true`) are never evicted and do not count
/// against the capacity. Transient entries are evicted oldest first once
/// there are more than `capacity` of them. Entries are ordered permanent
/// first, then transient, each group in insertion order.
#[derive(Debug, Clone, PartialEq)]
pub struct ShortTermMemory {
    capacity: usize,
    entries: Vec<MemoryEntry>,
}

impl ShortTermMemory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: Vec::new(),
        }
    }

    /// Rebuild the cache around entries taken from conversation state.
    pub fn from_entries(capacity: usize, entries: Vec<MemoryEntry>) -> Self {
        Self { capacity, entries }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Insert `entry` and return whatever had to be evicted to stay in bounds.
    pub fn append(&mut self, entry: MemoryEntry) -> Vec<MemoryEntry> {
        let (fixed, mut transient): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .chain(std::iter::once(entry))
            .partition(|e| e.keep);

        let overflow = transient.len().saturating_sub(self.capacity);
        let evicted: Vec<MemoryEntry> = transient.drain(..overflow).collect();
        if !evicted.is_empty() {
            info!(
                evicted = evicted.len(),
                capacity = self.capacity,
                "discarded old short-term memories"
            );
        }

        self.entries = fixed;
        self.entries.extend(transient);
        evicted
    }

    pub fn list(&self) -> &[MemoryEntry] {
        &self.entries
    }

    pub fn transient_len(&self) -> usize {
        self.entries.iter().filter(|e| !e.keep).count()
    }

    pub fn into_entries(self) -> Vec<MemoryEntry> {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contents(cache: &ShortTermMemory) -> Vec<&str> {
        cache.list().iter().map(|e| e.content.as_str()).collect()
    }

    #[test]
    fn evicts_oldest_transient_entries() {
        let mut cache = ShortTermMemory::new(3);
        let mut evicted = Vec::new();
        for content in ["A", "B", "C", "D", "E"] {
            evicted.extend(cache.append(MemoryEntry::new(content)));
        }
        assert_eq!(contents(&cache), vec!["C", "D", "E"]);
        let gone: Vec<&str> = evicted.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(gone, vec!["A", "B"]);
    }

    #[test]
    fn permanent_entries_survive_and_do_not_count() {
        let mut cache = ShortTermMemory::new(2);
        cache.append(MemoryEntry::new("The user's name is Martha.").permanent());
        for content in ["likes tea", "has a dog", "plays chess"] {
            cache.append(MemoryEntry::new(content));
        }
        assert_eq!(
            contents(&cache),
            vec!["The user's name is Martha.", "has a dog", "plays chess"]
        );
        assert_eq!(cache.transient_len(), 2);
    }

    #[test]
    fn permanent_entries_are_listed_first() {
        let mut cache = ShortTermMemory::new(5);
        cache.append(MemoryEntry::new("transient one"));
        cache.append(MemoryEntry::new("kept").permanent());
        cache.append(MemoryEntry::new("transient two"));
        assert_eq!(
            contents(&cache),
            vec!["kept", "transient one", "transient two"]
        );
    }

    #[test]
    fn appending_under_capacity_evicts_nothing() {
        let mut cache = ShortTermMemory::new(10);
        assert!(cache.append(MemoryEntry::new("a")).is_empty());
        assert_eq!(cache.list().len(), 1);
    }

    #[test]
    fn oversized_state_is_trimmed_on_next_append() {
        let entries: Vec<MemoryEntry> = (0..5).map(|i| MemoryEntry::new(format!("m{i}"))).collect();
        let mut cache = ShortTermMemory::from_entries(3, entries);
        let evicted = cache.append(MemoryEntry::new("m5"));
        assert_eq!(evicted.len(), 3);
        assert_eq!(contents(&cache), vec!["m3", "m4", "m5"]);
    }

    #[test]
    fn list_does_not_mutate() {
        let mut cache = ShortTermMemory::new(2);
        cache.append(MemoryEntry::new("a"));
        let before = cache.clone();
        let _ = cache.list();
        assert_eq!(cache, before);
    }
}
