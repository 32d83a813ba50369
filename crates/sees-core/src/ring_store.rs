//! Fixed-capacity rolling record store
//!
//! The store is always recording: once full, every push evicts the oldest
//! record. Capacity is fixed at construction and the backing memory is
//! allocated exactly once by [`RingStore::begin`]. Until then every operation
//! is a safe no-op, so a failed allocation cannot corrupt anything.
//!
//! ## Indexing
//!
//! Logical index 0 is always the oldest live record. Before the first wrap the
//! logical index equals the physical slot; afterwards the oldest record sits
//! at `head`, so the mapping is `(head + i) % capacity`.

use alloc::vec::Vec;

use log::info;

use crate::error::StoreError;
use crate::record::RecordShape;
use crate::time::{elapsed_us, secs_to_us, US_PER_SEC};

pub struct RingStore<R: RecordShape> {
    /// Backing slots, empty until `begin()` succeeds
    records: Vec<R>,
    /// Number of slots requested at construction
    capacity: usize,
    /// Next slot to write
    head: usize,
    /// Number of live records (0..=capacity)
    count: usize,
}

impl<R: RecordShape> RingStore<R> {
    /// Create an unallocated store for `capacity` records.
    pub const fn new(capacity: usize) -> Self {
        Self {
            records: Vec::new(),
            capacity,
            head: 0,
            count: 0,
        }
    }

    /// Allocate the backing slots. Calling it again on an allocated store only clears it.
    pub fn begin(&mut self) -> Result<(), StoreError> {
        if self.capacity == 0 {
            return Err(StoreError::ZeroCapacity);
        }

        if !self.is_allocated() {
            let requested_bytes = self.capacity.saturating_mul(core::mem::size_of::<R>());
            self.records
                .try_reserve_exact(self.capacity)
                .map_err(|_| StoreError::AllocationFailed { requested_bytes })?;
            self.records.resize(self.capacity, R::default());

            info!(
                "Ring store ready: {} {} records ({} KB)",
                self.capacity,
                R::MODE.label(),
                requested_bytes / 1024
            );
        }

        self.clear();
        Ok(())
    }

    /// Whether `begin()` has allocated the backing slots.
    pub fn is_allocated(&self) -> bool {
        !self.records.is_empty()
    }

    /// Append a record, evicting the oldest one when full.
    pub fn push(&mut self, record: R) {
        if !self.is_allocated() {
            return;
        }

        self.records[self.head] = record;
        self.head = (self.head + 1) % self.capacity;

        if self.count < self.capacity {
            self.count += 1;
        }
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Alias of [`len`](Self::len) matching the firmware's command vocabulary.
    pub fn size(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.count >= self.capacity
    }

    /// Drop all records. The backing memory is kept.
    pub fn clear(&mut self) {
        self.head = 0;
        self.count = 0;
    }

    /// Map a logical index (0 = oldest) to a slot.
    fn physical_index(&self, logical: usize) -> usize {
        if self.count < self.capacity {
            logical
        } else {
            (self.head + logical) % self.capacity
        }
    }

    /// Record at logical index `logical` (0 = oldest).
    pub fn get(&self, logical: usize) -> Option<&R> {
        if logical >= self.count {
            return None;
        }
        self.records.get(self.physical_index(logical))
    }

    /// Live records, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &R> + '_ {
        (0..self.count).filter_map(move |i| self.records.get(self.physical_index(i)))
    }

    pub fn oldest(&self) -> Option<&R> {
        self.get(0)
    }

    pub fn newest(&self) -> Option<&R> {
        self.count.checked_sub(1).and_then(|last| self.get(last))
    }

    /// Wall-clock span between the oldest and newest record, in seconds.
    pub fn time_span_secs(&self) -> f32 {
        match (self.oldest(), self.newest()) {
            (Some(oldest), Some(newest)) if self.count >= 2 => {
                let span = elapsed_us(newest.timestamp_us(), oldest.timestamp_us()).max(0);
                (span as f64 / US_PER_SEC) as f32
            }
            _ => 0.0,
        }
    }

    /// Records whose timestamp lies within `center_us ± half_width_secs`.
    ///
    /// Bounds are inclusive and measured as signed distances from the center,
    /// so a window spanning a counter wrap keeps both halves. Scanning is
    /// oldest to newest and stops after `max_out` matches, so the result is
    /// chronological. An empty store or an empty window yields an empty vector.
    ///
    /// The result buffer is reserved up front; if that fails the query
    /// returns an error instead of aborting.
    pub fn extract_window(
        &self,
        center_us: u32,
        half_width_secs: f32,
        max_out: usize,
    ) -> Result<Vec<R>, StoreError> {
        let mut out = Vec::new();
        if max_out == 0 || self.is_empty() {
            return Ok(out);
        }

        let wanted = max_out.min(self.count);
        out.try_reserve_exact(wanted)
            .map_err(|_| StoreError::AllocationFailed {
                requested_bytes: wanted.saturating_mul(core::mem::size_of::<R>()),
            })?;

        let half_width_us = i64::from(secs_to_us(half_width_secs));

        for record in self.iter() {
            let offset = i64::from(elapsed_us(record.timestamp_us(), center_us));
            if (-half_width_us..=half_width_us).contains(&offset) {
                out.push(*record);
                if out.len() >= max_out {
                    break;
                }
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{DenseRecord, SparseRecord};
    use alloc::vec;

    fn sparse_store(capacity: usize) -> RingStore<SparseRecord> {
        let mut store = RingStore::new(capacity);
        store.begin().unwrap();
        store
    }

    fn timestamps(records: &[SparseRecord]) -> Vec<u32> {
        records.iter().map(|r| r.timestamp_us).collect()
    }

    #[test]
    fn test_unallocated_store_is_inert() {
        let mut store: RingStore<SparseRecord> = RingStore::new(4);
        store.push(SparseRecord::new(1, 1));
        assert_eq!(store.len(), 0, "push before begin must be a no-op");
        assert!(store.extract_window(1, 1.0, 10).unwrap().is_empty());
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        let mut store: RingStore<DenseRecord> = RingStore::new(0);
        assert_eq!(store.begin(), Err(StoreError::ZeroCapacity));
    }

    #[test]
    fn test_eviction_keeps_last_n_oldest_first() {
        let mut store = sparse_store(4);
        for ts in 0..10u32 {
            store.push(SparseRecord::new(ts * 100, 1));
        }

        assert_eq!(store.size(), 4);
        assert!(store.is_full());
        let retained: Vec<u32> = store.iter().map(|r| r.timestamp_us).collect();
        assert_eq!(retained, vec![600, 700, 800, 900]);
    }

    #[test]
    fn test_capacity_five_window_scenario() {
        let mut store = sparse_store(5);
        for ts in [0, 10, 20, 30, 40, 50] {
            store.push(SparseRecord::new(ts, 1));
        }

        assert_eq!(store.size(), 5);
        let window = store.extract_window(50, 1.0, 10).unwrap();
        assert_eq!(timestamps(&window), vec![10, 20, 30, 40, 50]);
    }

    #[test]
    fn test_window_bounds_are_inclusive() {
        let mut store = sparse_store(16);
        for ts in [1_000_000, 1_499_999, 1_500_000, 2_500_000, 2_500_001] {
            store.push(SparseRecord::new(ts, 1));
        }

        let window = store.extract_window(2_000_000, 0.5, 16).unwrap();
        assert_eq!(timestamps(&window), vec![1_500_000, 2_500_000]);
    }

    #[test]
    fn test_window_near_counter_start() {
        let mut store = sparse_store(8);
        for ts in [0, 5, 400_000] {
            store.push(SparseRecord::new(ts, 1));
        }

        let window = store.extract_window(100, 0.25, 8).unwrap();
        assert_eq!(timestamps(&window), vec![0, 5]);
    }

    #[test]
    fn test_window_spanning_counter_wrap_keeps_both_halves() {
        let mut store = sparse_store(8);
        for ts in [u32::MAX - 3_000_000, u32::MAX - 1_000, 500, 2_000_000] {
            store.push(SparseRecord::new(ts, 1));
        }

        let window = store.extract_window(u32::MAX - 100, 1.0, 8).unwrap();
        assert_eq!(timestamps(&window), vec![u32::MAX - 1_000, 500]);
    }

    #[test]
    fn test_window_truncates_at_max_out() {
        let mut store = sparse_store(8);
        for ts in 0..8u32 {
            store.push(SparseRecord::new(ts, 1));
        }

        assert_eq!(timestamps(&store.extract_window(4, 1.0, 3).unwrap()), vec![0, 1, 2]);
        assert!(store.extract_window(4, 1.0, 0).unwrap().is_empty());
    }

    #[test]
    fn test_window_outside_history_is_empty() {
        let mut store = sparse_store(8);
        store.push(SparseRecord::new(10, 1));
        assert!(store.extract_window(50_000_000, 2.5, 8).unwrap().is_empty());
    }

    #[test]
    fn test_clear_keeps_allocation() {
        let mut store = sparse_store(3);
        store.push(SparseRecord::new(1, 1));
        store.clear();

        assert!(store.is_empty());
        assert!(store.is_allocated());
        assert_eq!(store.capacity(), 3);

        store.push(SparseRecord::new(2, 1));
        assert_eq!(store.oldest().map(|r| r.timestamp_us), Some(2));
    }

    #[test]
    fn test_time_span() {
        let mut store = sparse_store(3);
        assert_eq!(store.time_span_secs(), 0.0);

        store.push(SparseRecord::new(1_000_000, 1));
        store.push(SparseRecord::new(2_000_000, 1));
        store.push(SparseRecord::new(3_500_000, 1));
        store.push(SparseRecord::new(4_000_000, 1));

        assert_eq!(store.time_span_secs(), 2.0, "span follows eviction");
    }
}
