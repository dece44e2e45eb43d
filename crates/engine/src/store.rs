//! Bounded, id-ordered cache of notification records.
//!
//! Records are keyed by id in a `BTreeMap`; iteration in reverse yields the
//! newest-first order the history view expects. When the capacity is
//! exceeded the lowest ids are evicted.

use std::collections::BTreeMap;

use bulletin_common::config::MAX_PAGE_SIZE;
use bulletin_common::types::NotificationRecord;

/// Result of merging one fetched batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Ids that were not present before the merge (and survived truncation).
    pub inserted: usize,
    /// Records dropped to honour the capacity.
    pub evicted: usize,
    /// Highest id in the batch, if the batch was non-empty.
    pub batch_max_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationStore {
    records: BTreeMap<u64, NotificationRecord>,
    capacity: usize,
}

impl NotificationStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: BTreeMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Merge a fetched batch (any order, duplicates allowed).
    ///
    /// Incoming records replace stored ones with the same id. Merging the
    /// same batch twice leaves the store unchanged.
    pub fn merge(&mut self, batch: &[NotificationRecord]) -> MergeOutcome {
        let mut inserted = Vec::new();
        for record in batch {
            if self.records.insert(record.id, record.clone()).is_none() {
                inserted.push(record.id);
            }
        }

        let mut evicted = 0;
        while self.records.len() > self.capacity {
            if let Some((id, _)) = self.records.pop_first() {
                inserted.retain(|i| *i != id);
                evicted += 1;
            }
        }

        MergeOutcome {
            inserted: inserted.len(),
            evicted,
            batch_max_id: batch.iter().map(|r| r.id).max(),
        }
    }

    /// Records, newest first.
    pub fn iter(&self) -> impl Iterator<Item = &NotificationRecord> {
        self.records.values().rev()
    }

    pub fn get(&self, id: u64) -> Option<&NotificationRecord> {
        self.records.get(&id)
    }

    pub fn max_id(&self) -> Option<u64> {
        self.records.last_key_value().map(|(id, _)| *id)
    }

    /// Number of stored records with an id strictly above `mark`.
    pub fn count_above(&self, mark: u64) -> usize {
        self.records.range(mark.saturating_add(1)..).count()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for NotificationStore {
    fn default() -> Self {
        Self::new(MAX_PAGE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use bulletin_common::types::DeliveryType;

    use super::*;

    fn record(id: u64) -> NotificationRecord {
        NotificationRecord {
            id,
            title: format!("notice {id}"),
            content: "body".into(),
            delivery_type: DeliveryType::Toast,
            play_sound: false,
            created_by: "admin".into(),
            created_at: 1_700_000_000 + id as i64,
        }
    }

    fn ids(store: &NotificationStore) -> Vec<u64> {
        store.iter().map(|r| r.id).collect()
    }

    #[test]
    fn test_merge_orders_descending() {
        let mut store = NotificationStore::new(120);
        let outcome = store.merge(&[record(2), record(3), record(1)]);
        assert_eq!(ids(&store), vec![3, 2, 1]);
        assert_eq!(outcome.inserted, 3);
        assert_eq!(outcome.batch_max_id, Some(3));
    }

    #[test]
    fn test_merge_is_idempotent() {
        let batch = vec![record(5), record(4), record(9)];
        let mut store = NotificationStore::new(120);
        store.merge(&batch);
        let once = store.clone();
        let outcome = store.merge(&batch);
        assert_eq!(store, once);
        assert_eq!(outcome.inserted, 0);
    }

    #[test]
    fn test_duplicates_within_batch_collapse() {
        let mut store = NotificationStore::new(120);
        let outcome = store.merge(&[record(1), record(1), record(2)]);
        assert_eq!(store.len(), 2);
        assert_eq!(outcome.inserted, 2);
    }

    #[test]
    fn test_incoming_wins_on_conflict() {
        let mut store = NotificationStore::new(120);
        store.merge(&[record(1)]);
        let mut edited = record(1);
        edited.title = "edited".into();
        store.merge(&[edited]);
        assert_eq!(store.get(1).unwrap().title, "edited");
    }

    #[test]
    fn test_capacity_evicts_lowest_ids() {
        let mut store = NotificationStore::new(3);
        store.merge(&[record(1), record(2), record(3)]);
        let outcome = store.merge(&[record(5), record(4)]);
        assert_eq!(ids(&store), vec![5, 4, 3]);
        assert_eq!(outcome.evicted, 2);
        assert_eq!(outcome.inserted, 2);
    }

    #[test]
    fn test_stale_record_below_window_is_not_counted_as_inserted() {
        let mut store = NotificationStore::new(2);
        store.merge(&[record(10), record(11)]);
        let outcome = store.merge(&[record(1)]);
        assert_eq!(ids(&store), vec![11, 10]);
        assert_eq!(outcome.inserted, 0);
        assert_eq!(outcome.evicted, 1);
    }

    #[test]
    fn test_default_capacity_is_120() {
        let mut store = NotificationStore::default();
        let batch: Vec<_> = (1..=150).map(record).collect();
        store.merge(&batch);
        assert_eq!(store.len(), 120);
        assert_eq!(store.max_id(), Some(150));
        assert_eq!(store.iter().last().unwrap().id, 31);
    }

    #[test]
    fn test_count_above() {
        let mut store = NotificationStore::new(120);
        store.merge(&[record(1), record(2), record(3)]);
        assert_eq!(store.count_above(0), 3);
        assert_eq!(store.count_above(2), 1);
        assert_eq!(store.count_above(u64::MAX), 0);
    }
}
