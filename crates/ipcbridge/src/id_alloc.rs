//! # Id Allocator
//!
//! A reusable integer id space stored as a sorted list of allocated intervals.
//!
//! ## Philosophy
//!
//! Handles are created and released constantly over the life of a server, but the
//! live set stays small and clustered near zero. Tracking *allocated* ranges
//! instead of free ones keeps the list short: a burst of allocations collapses
//! into one `[lo, hi]` interval, and freeing punches at most one hole.
//!
//! ## Invariants
//! - Intervals are sorted by `lo`, disjoint, and never adjacent (`prev.hi + 1 < next.lo`).
//! - Every allocated id is `< limit`; [`INVALID_HANDLE`] is never handed out.
//! - A failed allocation leaves the allocator untouched.

use crate::handle::INVALID_HANDLE;
use crate::handle::RawHandle;

/// A closed range `[lo, hi]` of allocated ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdRange {
    pub lo: RawHandle,
    pub hi: RawHandle,
}

impl IdRange {
    fn single(id: RawHandle) -> Self {
        Self { lo: id, hi: id }
    }

    fn contains(&self, id: RawHandle) -> bool {
        self.lo <= id && id <= self.hi
    }

    /// Number of ids in the range. Both ends are inclusive.
    pub fn len(&self) -> u64 {
        self.hi - self.lo + 1
    }
}

#[derive(Debug, Clone)]
pub struct IdAllocator {
    allocated: Vec<IdRange>,
    limit: u64,
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdAllocator {
    /// An allocator over every id except the sentinel.
    pub fn new() -> Self {
        Self::with_capacity_limit(INVALID_HANDLE)
    }

    /// An allocator over `[0, limit)`.
    ///
    /// `limit` is clamped to [`INVALID_HANDLE`] so the sentinel stays unallocatable.
    pub fn with_capacity_limit(limit: u64) -> Self {
        Self {
            allocated: Vec::new(),
            limit: limit.min(INVALID_HANDLE),
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Hands out an unused id, or [`INVALID_HANDLE`] when the space is exhausted.
    ///
    /// Prefers growing an existing interval over starting a new one, so the
    /// interval list stays as short as possible.
    pub fn allocate(&mut self) -> RawHandle {
        if self.allocated.is_empty() {
            if self.limit == 0 {
                return INVALID_HANDLE;
            }
            self.allocated.push(IdRange::single(0));
            return 0;
        }

        for i in 0..self.allocated.len() {
            let IdRange { lo, hi } = self.allocated[i];

            // Intervals are never adjacent, so `lo - 1` is always free here.
            if lo > 0 {
                let id = lo - 1;
                self.allocated[i].lo = id;
                if i > 0 && self.allocated[i - 1].hi + 1 == id {
                    self.allocated[i - 1].hi = self.allocated[i].hi;
                    self.allocated.remove(i);
                }
                return id;
            }

            if hi + 1 < self.limit {
                let id = hi + 1;
                self.allocated[i].hi = id;
                if i + 1 < self.allocated.len() && self.allocated[i + 1].lo == id + 1 {
                    self.allocated[i].hi = self.allocated[i + 1].hi;
                    self.allocated.remove(i + 1);
                }
                return id;
            }
        }

        INVALID_HANDLE
    }

    /// Returns `id` to the pool. Returns `false` if it was not allocated.
    pub fn free(&mut self, id: RawHandle) -> bool {
        let Some(i) = self.position(id) else {
            return false;
        };

        let range = self.allocated[i];
        match (range.lo == id, range.hi == id) {
            (true, true) => {
                self.allocated.remove(i);
            }
            (true, false) => self.allocated[i].lo = id + 1,
            (false, true) => self.allocated[i].hi = id - 1,
            (false, false) => {
                self.allocated[i].hi = id - 1;
                self.allocated.insert(i + 1, IdRange { lo: id + 1, hi: range.hi });
            }
        }
        true
    }

    pub fn is_allocated(&self, id: RawHandle) -> bool {
        self.position(id).is_some()
    }

    /// Counts allocated ids, or free ids when `count_free` is set.
    pub fn count(&self, count_free: bool) -> u64 {
        let used: u64 = self.allocated.iter().map(IdRange::len).sum();
        if count_free { self.limit - used } else { used }
    }

    /// The allocated intervals in ascending order.
    pub fn intervals(&self) -> &[IdRange] {
        &self.allocated
    }

    /// Forgets every allocation.
    pub fn reset(&mut self) {
        self.allocated.clear();
    }

    fn position(&self, id: RawHandle) -> Option<usize> {
        // First interval starting after `id`; the candidate is the one before it.
        let after = self.allocated.partition_point(|range| range.lo <= id);
        let i = after.checked_sub(1)?;
        self.allocated[i].contains(id).then_some(i)
    }
}
