//! Row-selection combinators: skip, truncate, stride, filter.
use crate::case::Case;
use crate::taint::Taint;

use super::reader::CaseReader;
use super::SeqSource;

impl CaseReader {
    /// Keeps every `by`-th case of the half-open range `[first, last)`:
    /// `select(2, 10, 3)` over cases numbered from zero yields cases 2, 5
    /// and 8.
    pub fn select(mut self, first: u64, last: u64, by: u64) -> CaseReader {
        debug_assert!(by > 0);
        self.advance(first);
        self.truncate(last.saturating_sub(first));
        if by == 1 {
            return self;
        }
        let remaining = self.count_cases();
        let taint = self.taint().clone();
        let proto = self.proto().clone();
        CaseReader::from_seq_parts(
            taint,
            proto,
            Some(remaining.div_ceil(by)),
            Box::new(StrideSource { sub: self, by }),
        )
    }

    /// Keeps only the cases `pred` accepts. The resulting count is
    /// unknown until drained.
    pub fn filter(self, pred: impl FnMut(&Case) -> bool + 'static) -> CaseReader {
        let taint = self.taint().clone();
        let proto = self.proto().clone();
        CaseReader::from_seq_parts(
            taint,
            proto,
            None,
            Box::new(FilterSource {
                sub: self,
                pred: Box::new(pred),
            }),
        )
    }
}

struct StrideSource {
    sub: CaseReader,
    by: u64,
}

impl SeqSource for StrideSource {
    fn read(&mut self, _taint: &Taint) -> Option<Case> {
        let case = self.sub.read()?;
        self.sub.advance(self.by - 1);
        Some(case)
    }

    fn clone_source(&mut self, _taint: &Taint) -> Option<Box<dyn SeqSource>> {
        Some(Box::new(StrideSource {
            sub: self.sub.clone_reader(),
            by: self.by,
        }))
    }
}

struct FilterSource {
    sub: CaseReader,
    pred: Box<dyn FnMut(&Case) -> bool>,
}

impl SeqSource for FilterSource {
    fn read(&mut self, _taint: &Taint) -> Option<Case> {
        loop {
            let case = self.sub.read()?;
            if (self.pred)(&case) {
                return Some(case);
            }
        }
    }
}
