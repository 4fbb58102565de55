//! A set of unsigned integers kept as coalesced, disjoint ranges.
//!
//! Backs the free lists of the sheet layer: an axis keeps the physical
//! ordinates it has released here and reuses them before growing.
use std::collections::BTreeMap;

/// Half-open ranges `[start, end)`, pairwise disjoint and never adjacent.
#[derive(Debug, Default, Clone)]
pub struct RangeSet {
    ranges: BTreeMap<u64, u64>,
}

impl RangeSet {
    pub fn new() -> RangeSet {
        RangeSet::default()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn contains(&self, value: u64) -> bool {
        match self.ranges.range(..=value).next_back() {
            Some((_, &end)) => value < end,
            None => false,
        }
    }

    /// Inserts `[start, start + len)`, merging with any overlapping or
    /// adjacent ranges.
    pub fn insert(&mut self, start: u64, len: u64) {
        if len == 0 {
            return;
        }
        let mut start = start;
        let mut end = start + len;
        if let Some((&s, &e)) = self.ranges.range(..=start).next_back() {
            if e >= start {
                start = s;
                end = end.max(e);
                self.ranges.remove(&s);
            }
        }
        // Absorb every range that now overlaps or abuts on the right.
        while let Some((&s, &e)) = self.ranges.range(start..=end).next() {
            end = end.max(e);
            self.ranges.remove(&s);
        }
        self.ranges.insert(start, end);
    }

    /// Removes `[start, start + len)`; parts not present are ignored.
    pub fn remove(&mut self, start: u64, len: u64) {
        if len == 0 {
            return;
        }
        let end = start + len;
        if let Some((&s, &e)) = self.ranges.range(..start).next_back() {
            if e > start {
                self.ranges.insert(s, start);
                if e > end {
                    self.ranges.insert(end, e);
                }
            }
        }
        while let Some((&s, &e)) = self.ranges.range(start..end).next() {
            self.ranges.remove(&s);
            if e > end {
                self.ranges.insert(end, e);
            }
        }
    }

    /// Takes the lowest range in the set, up to `request` values long.
    /// Shorter ranges are returned whole rather than failing.
    pub fn allocate(&mut self, request: u64) -> Option<(u64, u64)> {
        debug_assert!(request > 0);
        let (&start, &end) = self.ranges.iter().next()?;
        let len = (end - start).min(request);
        self.ranges.remove(&start);
        if start + len < end {
            self.ranges.insert(start + len, end);
        }
        Some((start, len))
    }

    /// Takes exactly `n` contiguous values from the lowest range long
    /// enough, or `None` if no single range can satisfy the request.
    pub fn allocate_fully(&mut self, n: u64) -> Option<u64> {
        debug_assert!(n > 0);
        let (&start, _) = self.ranges.iter().find(|&(&s, &e)| e - s >= n)?;
        self.remove(start, n);
        Some(start)
    }

    /// The ranges in ascending order, as `(start, len)`.
    pub fn iter(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.ranges.iter().map(|(&s, &e)| (s, e - s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranges(set: &RangeSet) -> Vec<(u64, u64)> {
        set.iter().collect()
    }

    #[test]
    fn insert_coalesces_neighbors() {
        let mut set = RangeSet::new();
        set.insert(0, 4);
        set.insert(8, 4);
        assert_eq!(ranges(&set), vec![(0, 4), (8, 4)]);
        set.insert(4, 4);
        assert_eq!(ranges(&set), vec![(0, 12)]);
    }

    #[test]
    fn insert_absorbs_overlaps() {
        let mut set = RangeSet::new();
        set.insert(2, 3);
        set.insert(10, 2);
        set.insert(0, 11);
        assert_eq!(ranges(&set), vec![(0, 12)]);
    }

    #[test]
    fn remove_splits_ranges() {
        let mut set = RangeSet::new();
        set.insert(0, 10);
        set.remove(3, 4);
        assert_eq!(ranges(&set), vec![(0, 3), (7, 3)]);
        set.remove(0, 3);
        assert_eq!(ranges(&set), vec![(7, 3)]);
        set.remove(5, 10);
        assert!(set.is_empty());
    }

    #[test]
    fn contains_respects_boundaries() {
        let mut set = RangeSet::new();
        set.insert(5, 3);
        assert!(!set.contains(4));
        assert!(set.contains(5));
        assert!(set.contains(7));
        assert!(!set.contains(8));
    }

    #[test]
    fn allocate_is_lowest_first_and_partial() {
        let mut set = RangeSet::new();
        set.insert(10, 2);
        set.insert(0, 3);
        assert_eq!(set.allocate(8), Some((0, 3)));
        assert_eq!(set.allocate(1), Some((10, 1)));
        assert_eq!(set.allocate(8), Some((11, 1)));
        assert_eq!(set.allocate(1), None);
    }

    #[test]
    fn allocate_fully_requires_one_range() {
        let mut set = RangeSet::new();
        set.insert(0, 2);
        set.insert(5, 4);
        assert_eq!(set.allocate_fully(3), Some(5));
        assert_eq!(ranges(&set), vec![(0, 2), (8, 1)]);
        assert_eq!(set.allocate_fully(3), None);
        assert_eq!(set.allocate_fully(2), Some(0));
    }
}
