//! The polymorphic case reader.
//!
//! A [`CaseReader`] wraps one of three shapes: a sequential source, a
//! per-clone handle onto a shared random-access store, or a not-yet
//! instantiated lazy placeholder. Sequential sources that lack native
//! clone/peek support are upgraded on demand by interposing the buffering
//! shim; the upgrade replaces the reader's innards in place, so existing
//! handles keep working.
//!
//! Exhaustion is permanent: once a read comes back empty the remaining
//! count is pinned to zero and the source is never consulted again.
use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::mem;
use std::rc::Rc;

use log::debug;

use crate::case::{Case, CaseProto};
use crate::settings;
use crate::storage::window::CaseWindow;
use crate::taint::Taint;

use super::lazy::LazyCell;
use super::shim::ShimSource;
use super::{CaseCount, Peek, RandomSource, SeqSource};

pub struct CaseReader {
    taint: Taint,
    proto: CaseProto,
    remaining: CaseCount,
    pub(crate) inner: Inner,
}

pub(crate) enum Inner {
    Seq(Box<dyn SeqSource>),
    Random(RandomHandle),
    Lazy(LazyCell),
}

impl CaseReader {
    /// Wraps a sequential source. This is the constructor format readers
    /// and the data parser use.
    pub fn from_seq(proto: CaseProto, count: CaseCount, source: Box<dyn SeqSource>) -> CaseReader {
        Self::from_seq_parts(Taint::new(), proto, count, source)
    }

    /// Wraps a random-access store.
    pub fn from_random(
        proto: CaseProto,
        count: CaseCount,
        store: Box<dyn RandomSource>,
    ) -> CaseReader {
        Self::from_random_parts(Taint::new(), proto, count, store)
    }

    pub(crate) fn from_seq_parts(
        taint: Taint,
        proto: CaseProto,
        count: CaseCount,
        source: Box<dyn SeqSource>,
    ) -> CaseReader {
        CaseReader {
            taint,
            proto,
            remaining: count,
            inner: Inner::Seq(source),
        }
    }

    pub(crate) fn from_random_parts(
        taint: Taint,
        proto: CaseProto,
        count: CaseCount,
        store: Box<dyn RandomSource>,
    ) -> CaseReader {
        let handle = RandomHandle::create(store, taint.clone());
        CaseReader {
            taint,
            proto,
            remaining: count,
            inner: Inner::Random(handle),
        }
    }

    pub(crate) fn from_lazy_parts(
        proto: CaseProto,
        count: CaseCount,
        cell: LazyCell,
    ) -> CaseReader {
        CaseReader {
            taint: Taint::new(),
            proto,
            remaining: count,
            inner: Inner::Lazy(cell),
        }
    }

    pub fn proto(&self) -> &CaseProto {
        &self.proto
    }

    /// The remaining case count, if known.
    pub fn count(&self) -> CaseCount {
        self.remaining
    }

    pub fn taint(&self) -> &Taint {
        &self.taint
    }

    pub fn error(&self) -> bool {
        self.taint.is_tainted()
    }

    /// Marks the reader failed. Sources use this to report I/O or
    /// corruption failures before returning "no case".
    pub fn force_error(&self) {
        self.taint.set_taint();
    }

    /// Drops the reader, reporting whether it was tainted.
    pub fn destroy(self) -> bool {
        self.taint.is_tainted()
    }

    /// Reads the next case, transferring ownership to the caller. `None`
    /// means exhaustion or error; only the taint tells them apart.
    pub fn read(&mut self) -> Option<Case> {
        if self.remaining == Some(0) {
            return None;
        }
        self.instantiate_if_lazy();
        if self.remaining == Some(0) {
            return None;
        }
        let case = match &mut self.inner {
            Inner::Seq(source) => source.read(&self.taint),
            Inner::Random(handle) => handle.read_next(&self.taint),
            Inner::Lazy(_) => unreachable!("lazy reader not instantiated"),
        };
        match case {
            Some(case) => {
                debug_assert!(case.len() >= self.proto.len());
                if let Some(n) = self.remaining.as_mut() {
                    *n -= 1;
                }
                Some(case)
            }
            None => {
                self.remaining = Some(0);
                None
            }
        }
    }

    /// Returns the case `idx` positions ahead without consuming anything,
    /// upgrading the reader with a buffering shim if the source has no
    /// native peek. A failure at that offset clamps the remaining count
    /// down to the length the source resolved, or to `idx` when the true
    /// length is still unknown.
    pub fn peek(&mut self, idx: u64) -> Option<Case> {
        if let Some(n) = self.remaining {
            if idx >= n {
                return None;
            }
        }
        self.instantiate_if_lazy();
        if let Some(n) = self.remaining {
            if idx >= n {
                return None;
            }
        }
        let native = match &mut self.inner {
            Inner::Seq(source) => match source.peek(idx, &self.taint) {
                Peek::Case(case) => Some(Some(case)),
                Peek::Exhausted => Some(None),
                Peek::Unsupported => None,
            },
            Inner::Random(handle) => Some(handle.peek_at(idx, &self.taint)),
            Inner::Lazy(_) => unreachable!("lazy reader not instantiated"),
        };
        let case = match native {
            Some(case) => case,
            None => {
                self.install_shim();
                let Inner::Random(handle) = &mut self.inner else {
                    unreachable!("shim installation yields a random reader");
                };
                handle.peek_at(idx, &self.taint)
            }
        };
        if case.is_none() {
            let limit = match &self.inner {
                Inner::Random(handle) => handle.known_remaining().unwrap_or(idx),
                _ => idx,
            };
            self.remaining = Some(self.remaining.map_or(limit, |n| n.min(limit)));
        }
        case
    }

    /// Clones the reader; both deliver the same remaining sequence.
    /// Installs a buffering shim when the source has no native clone.
    pub fn clone_reader(&mut self) -> CaseReader {
        self.instantiate_if_lazy();
        if let Inner::Seq(source) = &mut self.inner {
            if let Some(cloned) = source.clone_source(&self.taint) {
                return CaseReader {
                    taint: self.taint.clone(),
                    proto: self.proto.clone(),
                    remaining: self.remaining,
                    inner: Inner::Seq(cloned),
                };
            }
            self.install_shim();
        }
        let Inner::Random(handle) = &mut self.inner else {
            unreachable!("clone of a non-random reader without shim");
        };
        CaseReader {
            taint: self.taint.clone(),
            proto: self.proto.clone(),
            remaining: self.remaining,
            inner: Inner::Random(handle.clone_handle()),
        }
    }

    /// Reads and discards up to `n` cases; returns how many were skipped.
    pub fn advance(&mut self, n: u64) -> u64 {
        for skipped in 0..n {
            if self.read().is_none() {
                return skipped;
            }
        }
        n
    }

    /// Total remaining cases. When the count is unknown this drains a
    /// clone, which may cost a full pass of I/O; the result is cached.
    pub fn count_cases(&mut self) -> u64 {
        if let Some(n) = self.remaining {
            return n;
        }
        let mut clone = self.clone_reader();
        let mut n = 0;
        while clone.read().is_some() {
            n += 1;
        }
        drop(clone);
        self.remaining = Some(n);
        n
    }

    /// Caps the remaining count at `n`, resolving an unknown count first.
    pub fn truncate(&mut self, n: u64) {
        let remaining = self.count_cases();
        self.remaining = Some(remaining.min(n));
    }

    /// Whether no cases remain. May buffer one case.
    pub fn is_empty(&mut self) -> bool {
        self.peek(0).is_none()
    }

    fn instantiate_if_lazy(&mut self) {
        let Inner::Lazy(cell) = &mut self.inner else {
            return;
        };
        let Some(make) = cell.make.take() else {
            unreachable!("lazy reader instantiated twice");
        };
        debug!("instantiating lazy case reader {}", cell.serial);
        let new = make();
        new.taint.propagate(&self.taint);
        let CaseReader {
            taint: _,
            proto,
            remaining,
            inner,
        } = new;
        self.proto = proto;
        self.remaining = remaining;
        self.inner = inner;
    }

    /// Replaces a sequential source with a window-buffered random view of
    /// itself, in place. All existing handles to this reader transparently
    /// become handles onto the shim.
    fn install_shim(&mut self) {
        debug!("installing buffering shim over sequential case reader");
        let placeholder = Inner::Seq(Box::new(NullSource));
        let Inner::Seq(sub) = mem::replace(&mut self.inner, placeholder) else {
            unreachable!("shim install on a non-sequential reader");
        };
        let window = CaseWindow::new(self.proto.clone(), settings::workspace_cases(&self.proto));
        window.taint().propagate(&self.taint);
        let shim = ShimSource::new(window, sub);
        let handle = RandomHandle::create(Box::new(shim), self.taint.clone());
        self.inner = Inner::Random(handle);
    }
}

/// A source that is always exhausted; placeholder during in-place swaps.
struct NullSource;

impl SeqSource for NullSource {
    fn read(&mut self, _taint: &Taint) -> Option<Case> {
        None
    }
}

/// Shared state of a random store with one or more clone handles attached.
/// Each handle's absolute offset lives in `offsets`; `heap` is a
/// lazily-pruned min-heap over them. Whenever the minimum moves, the store
/// is told to discard the cases every clone has passed.
struct RandomShared {
    store: Box<dyn RandomSource>,
    taint: Taint,
    offsets: HashMap<u64, u64>,
    heap: BinaryHeap<Reverse<(u64, u64)>>,
    base: u64,
    next_id: u64,
}

impl RandomShared {
    fn min_offset(&mut self) -> Option<u64> {
        while let Some(Reverse((offset, id))) = self.heap.peek().copied() {
            if self.offsets.get(&id) == Some(&offset) {
                return Some(offset);
            }
            self.heap.pop();
        }
        None
    }

    fn reposition(&mut self) {
        if let Some(min) = self.min_offset() {
            if min > self.base {
                let delta = min - self.base;
                self.base = min;
                let taint = self.taint.clone();
                self.store.advance(delta, &taint);
            }
        }
    }

    fn register(&mut self, offset: u64) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.offsets.insert(id, offset);
        self.heap.push(Reverse((offset, id)));
        id
    }
}

pub(crate) struct RandomHandle {
    shared: Rc<RefCell<RandomShared>>,
    id: u64,
    offset: u64,
}

impl RandomHandle {
    pub(crate) fn create(store: Box<dyn RandomSource>, taint: Taint) -> RandomHandle {
        let mut shared = RandomShared {
            store,
            taint,
            offsets: HashMap::new(),
            heap: BinaryHeap::new(),
            base: 0,
            next_id: 0,
        };
        let id = shared.register(0);
        RandomHandle {
            shared: Rc::new(RefCell::new(shared)),
            id,
            offset: 0,
        }
    }

    fn clone_handle(&mut self) -> RandomHandle {
        let id = self.shared.borrow_mut().register(self.offset);
        RandomHandle {
            shared: Rc::clone(&self.shared),
            id,
            offset: self.offset,
        }
    }

    fn read_next(&mut self, taint: &Taint) -> Option<Case> {
        let mut shared = self.shared.borrow_mut();
        let rel = self.offset - shared.base;
        let case = shared.store.read(rel, taint);
        if case.is_some() {
            self.offset += 1;
            shared.offsets.insert(self.id, self.offset);
            let entry = Reverse((self.offset, self.id));
            shared.heap.push(entry);
            shared.reposition();
        }
        case
    }

    fn peek_at(&mut self, idx: u64, taint: &Taint) -> Option<Case> {
        let mut shared = self.shared.borrow_mut();
        let rel = self.offset - shared.base + idx;
        shared.store.read(rel, taint)
    }

    /// Cases left ahead of this handle, when the store knows its length.
    fn known_remaining(&self) -> Option<u64> {
        let shared = self.shared.borrow();
        let len = shared.store.known_length()?;
        Some((shared.base + len).saturating_sub(self.offset))
    }
}

impl Drop for RandomHandle {
    fn drop(&mut self) {
        let mut shared = self.shared.borrow_mut();
        shared.offsets.remove(&self.id);
        if !shared.offsets.is_empty() {
            // The dropped handle may have been the laggard pinning the
            // store; let the survivors' minimum discard what it can.
            shared.reposition();
        }
    }
}
