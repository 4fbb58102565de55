//! Sliding window of cases with disk spill-over.
//!
//! A [`CaseWindow`] is a queue: cases are pushed at the head, discarded from
//! the tail, and addressable by index (0 = oldest still present). Up to a
//! configured number of cases stay in memory; the push that would exceed the
//! budget migrates the whole queue into a [`CaseTmpfile`] and the window
//! stays disk-backed from then on. Popping the tail of a disk-backed window
//! just advances a base offset; the tmpfile never shrinks.
use std::collections::VecDeque;

use log::trace;

use crate::case::{Case, CaseProto};
use crate::taint::Taint;

use super::tmpfile::CaseTmpfile;

/// Pass as `max_in_core` to keep every case in memory.
pub const UNLIMITED: usize = usize::MAX;

pub struct CaseWindow {
    proto: CaseProto,
    max_in_core: usize,
    taint: Taint,
    store: Store,
}

enum Store {
    Memory(VecDeque<Case>),
    Disk {
        tmpfile: CaseTmpfile,
        base: u64,
        len: u64,
    },
}

impl CaseWindow {
    /// Creates a window holding at most `max_in_core` cases in memory
    /// before spilling. Zero spills immediately; [`UNLIMITED`] never spills.
    pub fn new(proto: CaseProto, max_in_core: usize) -> CaseWindow {
        CaseWindow {
            proto,
            max_in_core,
            taint: Taint::new(),
            store: Store::Memory(VecDeque::new()),
        }
    }

    pub fn proto(&self) -> &CaseProto {
        &self.proto
    }

    /// The window's taint; spill I/O failures are reported here.
    pub fn taint(&self) -> &Taint {
        &self.taint
    }

    pub fn len(&self) -> u64 {
        match &self.store {
            Store::Memory(queue) => queue.len() as u64,
            Store::Disk { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Appends a case at the head.
    pub fn push_head(&mut self, case: Case) {
        if let Store::Memory(queue) = &mut self.store {
            if queue.len() < self.max_in_core {
                queue.push_back(case);
                return;
            }
            self.spill();
        }
        let Store::Disk { tmpfile, base, len } = &mut self.store else {
            unreachable!("window spilled but still memory-backed");
        };
        if !tmpfile.put_case(*base + *len, case) {
            self.taint.set_taint();
            return;
        }
        *len += 1;
    }

    /// Discards the `n` oldest cases.
    pub fn pop_tail(&mut self, n: u64) {
        match &mut self.store {
            Store::Memory(queue) => {
                debug_assert!(n <= queue.len() as u64);
                queue.drain(..n as usize);
            }
            Store::Disk { base, len, .. } => {
                debug_assert!(n <= *len);
                *base += n;
                *len -= n;
            }
        }
    }

    /// Returns case `idx`, where 0 is the oldest case still present.
    pub fn get_case(&mut self, idx: u64) -> Option<Case> {
        match &mut self.store {
            Store::Memory(queue) => queue.get(idx as usize).cloned(),
            Store::Disk { tmpfile, base, len } => {
                if idx >= *len {
                    return None;
                }
                let case = tmpfile.get_case(*base + idx);
                if case.is_none() {
                    self.taint.set_taint();
                }
                case
            }
        }
    }

    /// Drops the window, reporting whether it was tainted.
    pub fn destroy(self) -> bool {
        self.taint.is_tainted()
    }

    fn spill(&mut self) {
        let Store::Memory(queue) = &mut self.store else {
            return;
        };
        trace!(
            "case window exceeding {} in-core cases, spilling {} to disk",
            self.max_in_core,
            queue.len()
        );
        let count = queue.len() as u64;
        let mut tmpfile = CaseTmpfile::new(self.proto.clone());
        let mut ok = true;
        for (i, case) in queue.drain(..).enumerate() {
            if !tmpfile.put_case(i as u64, case) {
                ok = false;
                break;
            }
        }
        if !ok {
            self.taint.set_taint();
        }
        self.store = Store::Disk {
            tmpfile,
            base: 0,
            len: count,
        };
    }
}
