//! One axis of a datasheet: the mapping from logical ordinates (row or
//! column numbers as the client sees them) to physical ordinates (positions
//! in backing storage).
//!
//! Inserting or deleting in the middle of an axis never moves any data in
//! storage; it only rearranges the run list here. Deleted physical
//! ordinates go onto a free list and are reused by later insertions before
//! the physical high-water mark grows.
use log::trace;

use super::range_set::RangeSet;

/// A maximal run of logically-consecutive ordinates that are also
/// physically consecutive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Run {
    phys: u64,
    len: u64,
}

#[derive(Debug, Default, Clone)]
pub struct Axis {
    runs: Vec<Run>,
    free: RangeSet,
    phys_size: u64,
    len: u64,
}

impl Axis {
    pub fn new() -> Axis {
        Axis::default()
    }

    /// Logical length of the axis.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The physical ordinate behind logical ordinate `log`.
    pub fn map(&self, log: u64) -> u64 {
        self.contiguous(log).0
    }

    /// The physical ordinate behind `log` plus the number of logically
    /// following ordinates (including `log` itself) that are physically
    /// consecutive with it, for batching.
    pub fn contiguous(&self, log: u64) -> (u64, u64) {
        debug_assert!(log < self.len);
        let mut log = log;
        for run in &self.runs {
            if log < run.len {
                return (run.phys + log, run.len - log);
            }
            log -= run.len;
        }
        unreachable!("logical ordinate out of range");
    }

    /// Makes room for `n` new ordinates before logical position `before`,
    /// reusing freed physical ordinates first. Returns the new physical
    /// regions as `(phys, len)` pairs, in logical order, so the caller can
    /// initialize the storage behind them.
    pub fn insert(&mut self, before: u64, n: u64) -> Vec<(u64, u64)> {
        debug_assert!(before <= self.len);
        if n == 0 {
            return Vec::new();
        }
        let new_runs = self.allocate(n);
        let at = self.boundary(before);
        self.runs.splice(at..at, new_runs.iter().copied());
        self.len += n;
        self.coalesce();
        trace!(
            "axis insert {} at {}: len {}, phys high-water {}",
            n, before, self.len, self.phys_size
        );
        new_runs.into_iter().map(|r| (r.phys, r.len)).collect()
    }

    /// Removes `n` ordinates starting at logical position `start`,
    /// returning their physical ordinates to the free list.
    pub fn remove(&mut self, start: u64, n: u64) {
        debug_assert!(start + n <= self.len);
        if n == 0 {
            return;
        }
        let i = self.boundary(start);
        let j = self.boundary(start + n);
        for run in self.runs.drain(i..j) {
            self.free.insert(run.phys, run.len);
        }
        self.len -= n;
        self.coalesce();
    }

    /// Moves `n` ordinates from logical position `old_start` to logical
    /// position `new_start`, where `new_start` is interpreted after the
    /// removal. No physical data moves.
    pub fn move_range(&mut self, old_start: u64, n: u64, new_start: u64) {
        debug_assert!(old_start + n <= self.len);
        debug_assert!(new_start <= self.len - n);
        if n == 0 {
            return;
        }
        let i = self.boundary(old_start);
        let j = self.boundary(old_start + n);
        let moved: Vec<Run> = self.runs.drain(i..j).collect();
        self.len -= n;
        let at = self.boundary(new_start);
        self.runs.splice(at..at, moved);
        self.len += n;
        self.coalesce();
    }

    /// Takes `n` physical ordinates, preferring the free list over growing
    /// the high-water mark. The result may be fragmented.
    fn allocate(&mut self, n: u64) -> Vec<Run> {
        let mut runs = Vec::new();
        let mut need = n;
        while need > 0 {
            match self.free.allocate(need) {
                Some((phys, len)) => {
                    runs.push(Run { phys, len });
                    need -= len;
                }
                None => {
                    runs.push(Run {
                        phys: self.phys_size,
                        len: need,
                    });
                    self.phys_size += need;
                    need = 0;
                }
            }
        }
        runs
    }

    /// Ensures a run boundary exists at logical position `log` and returns
    /// the index of the run starting there (`runs.len()` for the end).
    fn boundary(&mut self, log: u64) -> usize {
        let mut log = log;
        for (i, run) in self.runs.iter_mut().enumerate() {
            if log == 0 {
                return i;
            }
            if log < run.len {
                let tail = Run {
                    phys: run.phys + log,
                    len: run.len - log,
                };
                run.len = log;
                self.runs.insert(i + 1, tail);
                return i + 1;
            }
            log -= run.len;
        }
        debug_assert_eq!(log, 0);
        self.runs.len()
    }

    /// Merges physically adjacent neighbors and drops empty runs.
    fn coalesce(&mut self) {
        self.runs.retain(|r| r.len > 0);
        let mut i = 1;
        while i < self.runs.len() {
            let prev = self.runs[i - 1];
            if prev.phys + prev.len == self.runs[i].phys {
                self.runs[i - 1].len += self.runs[i].len;
                self.runs.remove(i);
            } else {
                i += 1;
            }
        }
        debug_assert_eq!(self.runs.iter().map(|r| r.len).sum::<u64>(), self.len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(axis: &Axis) -> Vec<u64> {
        (0..axis.len()).map(|i| axis.map(i)).collect()
    }

    #[test]
    fn append_is_identity_mapping() {
        let mut axis = Axis::new();
        axis.insert(0, 5);
        assert_eq!(mapping(&axis), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn middle_insert_leaves_data_in_place() {
        let mut axis = Axis::new();
        axis.insert(0, 4);
        let new = axis.insert(2, 2);
        assert_eq!(new, vec![(4, 2)]);
        assert_eq!(mapping(&axis), vec![0, 1, 4, 5, 2, 3]);
    }

    #[test]
    fn remove_frees_and_insert_reuses() {
        let mut axis = Axis::new();
        axis.insert(0, 6);
        axis.remove(1, 3);
        assert_eq!(mapping(&axis), vec![0, 4, 5]);
        // The freed ordinates 1..4 come back before the high-water grows.
        let new = axis.insert(3, 3);
        assert_eq!(new, vec![(1, 3)]);
        assert!(mapping(&axis).iter().all(|&p| p < 6));
    }

    #[test]
    fn fragmented_allocation_spans_free_runs() {
        let mut axis = Axis::new();
        axis.insert(0, 8);
        axis.remove(0, 2);
        axis.remove(3, 2); // frees phys 0..2 and 5..7
        let new = axis.insert(0, 5);
        assert_eq!(new, vec![(0, 2), (5, 2), (8, 1)]);
        assert_eq!(axis.len(), 9);
    }

    #[test]
    fn move_range_reorders_without_physical_motion() {
        let mut axis = Axis::new();
        axis.insert(0, 6);
        axis.move_range(0, 2, 3);
        assert_eq!(mapping(&axis), vec![2, 3, 4, 0, 1, 5]);
    }

    #[test]
    fn adjacent_runs_coalesce() {
        let mut axis = Axis::new();
        axis.insert(0, 4);
        axis.move_range(0, 2, 2);
        // 2,3,0,1 -- moving back restores one run
        axis.move_range(2, 2, 0);
        assert_eq!(mapping(&axis), vec![0, 1, 2, 3]);
    }
}
