//! Ranking and run-consolidation over a sorted stream.
//!
//! Both combinators group consecutive cases whose key column compares
//! equal. The input is expected to already be sorted on the key; an
//! out-of-order key is reported through [`RankFlags`] rather than by
//! failing the stream.
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::case::{Case, CaseProto, Value, Width};
use crate::taint::Taint;

use super::reader::CaseReader;
use super::SeqSource;

/// Conditions noticed while ranking, shared with the caller through an
/// `Rc<RefCell<_>>` so they can be inspected after (or during) the drain.
#[derive(Debug, Default, Clone, Copy)]
pub struct RankFlags {
    /// A key value was smaller than its predecessor.
    pub unsorted: bool,
    /// A case carried a negative weight.
    pub negative_weight: bool,
}

impl CaseReader {
    /// Appends a numeric rank column. Cases tied on the key column `key`
    /// all receive the mean rank of the group, computed from case weights:
    /// a group of total weight `w` starting after cumulative weight `cc`
    /// ranks at `cc + (w + 1) / 2`. Without a weight column every case
    /// weighs 1 and this is the familiar mean rank of the tied positions.
    ///
    /// `distinct`, when given, is called once per group with the key
    /// value, the group's case count, and its total weight.
    pub fn append_rank(
        self,
        key: usize,
        weight: Option<usize>,
        flags: Rc<RefCell<RankFlags>>,
        distinct: Option<Box<dyn FnMut(f64, u64, f64)>>,
    ) -> CaseReader {
        let out_proto = self.proto().with_appended(Width::Numeric);
        let taint = self.taint().clone();
        let count = self.count();
        CaseReader::from_seq_parts(
            taint,
            out_proto.clone(),
            count,
            Box::new(RankSource {
                sub: self,
                out_proto,
                key,
                weight,
                flags,
                distinct,
                pending: VecDeque::new(),
                cc: 0.0,
                prev_key: None,
            }),
        )
    }

    /// Collapses each run of cases tied on the key column `key` into its
    /// last case. With a weight column, the survivor's weight is replaced
    /// by the run's total weight; without one, a numeric count column is
    /// appended instead.
    pub fn consolidate_distinct(self, key: usize, weight: Option<usize>) -> CaseReader {
        let out_proto = match weight {
            Some(_) => self.proto().clone(),
            None => self.proto().with_appended(Width::Numeric),
        };
        let taint = self.taint().clone();
        CaseReader::from_seq_parts(
            taint,
            out_proto.clone(),
            None,
            Box::new(ConsolidateSource {
                sub: self,
                out_proto,
                key,
                weight,
            }),
        )
    }
}

struct RankSource {
    sub: CaseReader,
    out_proto: CaseProto,
    key: usize,
    weight: Option<usize>,
    flags: Rc<RefCell<RankFlags>>,
    distinct: Option<Box<dyn FnMut(f64, u64, f64)>>,
    pending: VecDeque<Case>,
    cc: f64,
    prev_key: Option<f64>,
}

impl RankSource {
    fn case_weight(&self, case: &Case) -> f64 {
        match self.weight {
            Some(idx) => {
                let w = case.num(idx);
                if w < 0.0 {
                    self.flags.borrow_mut().negative_weight = true;
                }
                w
            }
            None => 1.0,
        }
    }

    /// Pulls the next run of key-tied cases into `pending`, rank appended.
    fn fill_group(&mut self) -> bool {
        let first = match self.sub.read() {
            Some(case) => case,
            None => return false,
        };
        let key_value = first.num(self.key);
        if let Some(prev) = self.prev_key {
            if key_value < prev {
                self.flags.borrow_mut().unsorted = true;
            }
        }
        self.prev_key = Some(key_value);

        let mut group = vec![first];
        loop {
            match self.sub.peek(0) {
                Some(next) if next.num(self.key) == key_value => {
                    match self.sub.read() {
                        Some(case) => group.push(case),
                        None => break,
                    }
                }
                _ => break,
            }
        }

        let w: f64 = group.iter().map(|c| self.case_weight(c)).sum();
        let rank = self.cc + (w + 1.0) / 2.0;
        self.cc += w;
        if let Some(distinct) = &mut self.distinct {
            distinct(key_value, group.len() as u64, w);
        }
        for case in group {
            self.pending
                .push_back(case.with_appended(&self.out_proto, Value::Num(rank)));
        }
        true
    }
}

impl SeqSource for RankSource {
    fn read(&mut self, _taint: &Taint) -> Option<Case> {
        if self.pending.is_empty() && !self.fill_group() {
            return None;
        }
        self.pending.pop_front()
    }
}

struct ConsolidateSource {
    sub: CaseReader,
    out_proto: CaseProto,
    key: usize,
    weight: Option<usize>,
}

impl SeqSource for ConsolidateSource {
    fn read(&mut self, _taint: &Taint) -> Option<Case> {
        let mut last = self.sub.read()?;
        let key_value = last.num(self.key);
        let mut total = match self.weight {
            Some(idx) => last.num(idx),
            None => 1.0,
        };
        loop {
            match self.sub.peek(0) {
                Some(next) if next.num(self.key) == key_value => {
                    let Some(case) = self.sub.read() else {
                        break;
                    };
                    total += match self.weight {
                        Some(idx) => case.num(idx),
                        None => 1.0,
                    };
                    last = case;
                }
                _ => break,
            }
        }
        Some(match self.weight {
            Some(idx) => {
                last.set_value(idx, Value::Num(total));
                last
            }
            None => last.with_appended(&self.out_proto, Value::Num(total)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::writer::CaseWriter;
    use super::*;
    use crate::case::{CaseProto, Width};

    fn keyed_reader(rows: &[(f64, f64)]) -> CaseReader {
        let proto = CaseProto::new(vec![Width::Numeric, Width::Numeric]);
        let mut writer = CaseWriter::in_memory(proto.clone());
        for &(k, w) in rows {
            writer.write(Case::from_values(
                &proto,
                vec![Value::Num(k), Value::Num(w)],
            ));
        }
        writer.into_reader().unwrap()
    }

    fn drain(mut reader: CaseReader) -> Vec<Vec<f64>> {
        let mut out = Vec::new();
        while let Some(case) = reader.read() {
            out.push((0..case.len()).map(|i| case.num(i)).collect());
        }
        out
    }

    #[test]
    fn unweighted_mean_ranks() {
        let reader = keyed_reader(&[(1.0, 0.0), (2.0, 0.0), (2.0, 0.0), (5.0, 0.0)]);
        let flags = Rc::new(RefCell::new(RankFlags::default()));
        let ranked = reader.append_rank(0, None, Rc::clone(&flags), None);
        let rows = drain(ranked);
        let ranks: Vec<f64> = rows.iter().map(|r| r[2]).collect();
        assert_eq!(ranks, vec![1.0, 2.5, 2.5, 4.0]);
        assert!(!flags.borrow().unsorted);
    }

    #[test]
    fn weighted_ranks() {
        // cumulative weights 0, 2, then a tie group of total weight 3
        let reader = keyed_reader(&[(1.0, 2.0), (3.0, 1.0), (3.0, 2.0)]);
        let flags = Rc::new(RefCell::new(RankFlags::default()));
        let ranked = reader.append_rank(0, Some(1), Rc::clone(&flags), None);
        let rows = drain(ranked);
        let ranks: Vec<f64> = rows.iter().map(|r| r[2]).collect();
        assert_eq!(ranks, vec![1.5, 4.0, 4.0]);
    }

    #[test]
    fn unsorted_input_is_flagged() {
        let reader = keyed_reader(&[(2.0, 0.0), (1.0, 0.0)]);
        let flags = Rc::new(RefCell::new(RankFlags::default()));
        let ranked = reader.append_rank(0, None, Rc::clone(&flags), None);
        drain(ranked);
        assert!(flags.borrow().unsorted);
    }

    #[test]
    fn negative_weight_is_flagged() {
        let reader = keyed_reader(&[(1.0, -1.0), (2.0, 1.0)]);
        let flags = Rc::new(RefCell::new(RankFlags::default()));
        let ranked = reader.append_rank(0, Some(1), Rc::clone(&flags), None);
        drain(ranked);
        assert!(flags.borrow().negative_weight);
    }

    #[test]
    fn distinct_callback_sees_each_group_once() {
        let reader = keyed_reader(&[(1.0, 0.0), (1.0, 0.0), (4.0, 0.0)]);
        let flags = Rc::new(RefCell::new(RankFlags::default()));
        let groups = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&groups);
        let ranked = reader.append_rank(
            0,
            None,
            flags,
            Some(Box::new(move |key, n, w| {
                sink.borrow_mut().push((key, n, w));
            })),
        );
        drain(ranked);
        assert_eq!(*groups.borrow(), vec![(1.0, 2, 2.0), (4.0, 1, 1.0)]);
    }

    #[test]
    fn consolidate_sums_weights() {
        let reader = keyed_reader(&[(1.0, 2.0), (1.0, 3.0), (2.0, 1.0)]);
        let merged = reader.consolidate_distinct(0, Some(1));
        assert_eq!(drain(merged), vec![vec![1.0, 5.0], vec![2.0, 1.0]]);
    }

    #[test]
    fn consolidate_appends_counts_when_unweighted() {
        let reader = keyed_reader(&[(7.0, 0.0), (7.0, 0.0), (7.0, 0.0), (9.0, 0.0)]);
        let merged = reader.consolidate_distinct(0, None);
        assert_eq!(
            drain(merged),
            vec![vec![7.0, 0.0, 3.0], vec![9.0, 0.0, 1.0]]
        );
    }
}
