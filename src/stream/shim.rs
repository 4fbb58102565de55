//! Buffering shim: random access over a sequential-only source.
//!
//! The shim owns the detached sequential source and a case window spanning
//! every position some clone of the reader still cares about. Reading at an
//! offset pulls cases from the source into the window head until the window
//! covers it; advancing pops the window tail. The window spills to disk
//! past the workspace budget, so slow clones cost disk, not correctness.
use crate::case::Case;
use crate::storage::window::CaseWindow;
use crate::taint::Taint;

use super::{RandomSource, SeqSource};

pub(crate) struct ShimSource {
    window: CaseWindow,
    sub: Option<Box<dyn SeqSource>>,
}

impl ShimSource {
    pub(crate) fn new(window: CaseWindow, sub: Box<dyn SeqSource>) -> ShimSource {
        ShimSource {
            window,
            sub: Some(sub),
        }
    }

    /// Pulls one more case from the source into the window. Returns false
    /// once the source is exhausted (it is dropped at that point) or the
    /// window fails.
    fn buffer_case(&mut self, taint: &Taint) -> bool {
        let Some(sub) = self.sub.as_mut() else {
            return false;
        };
        match sub.read(taint) {
            Some(case) => {
                self.window.push_head(case);
                !self.window.taint().is_tainted()
            }
            None => {
                self.sub = None;
                false
            }
        }
    }
}

impl RandomSource for ShimSource {
    fn read(&mut self, offset: u64, taint: &Taint) -> Option<Case> {
        while self.window.len() <= offset {
            if !self.buffer_case(taint) {
                return None;
            }
        }
        self.window.get_case(offset)
    }

    fn advance(&mut self, n: u64, _taint: &Taint) {
        let n = n.min(self.window.len());
        self.window.pop_tail(n);
    }

    fn known_length(&self) -> Option<u64> {
        // Exact only once the source has been drained into the window.
        self.sub.is_none().then(|| self.window.len())
    }
}
