//! Row-transformation combinators.
//!
//! Two flavors: the stateful translator pulls cases in order through a
//! closure that owns its state (sequential-only, so clone/peek go through
//! the shim), and the stateless translator receives the absolute case index
//! and must not depend on read order, which lets it be a random-access
//! reader directly.
use crate::case::{Case, CaseProto, Value, Width};
use crate::taint::Taint;

use super::reader::CaseReader;
use super::{RandomSource, SeqSource};

impl CaseReader {
    /// Passes every case through `f`, which takes ownership of the input
    /// and returns a case conforming to `out_proto`.
    pub fn translate(
        self,
        out_proto: CaseProto,
        f: impl FnMut(Case) -> Case + 'static,
    ) -> CaseReader {
        let taint = self.taint().clone();
        let count = self.count();
        CaseReader::from_seq_parts(
            taint,
            out_proto,
            count,
            Box::new(TranslateSource {
                sub: self,
                f: Box::new(f),
            }),
        )
    }

    /// Like [`translate`], but `f` also receives the absolute case index
    /// and must not depend on the order cases are requested in. The result
    /// is randomly accessible without any buffering.
    ///
    /// [`translate`]: CaseReader::translate
    pub fn translate_stateless(
        self,
        out_proto: CaseProto,
        f: impl Fn(Case, u64) -> Case + 'static,
    ) -> CaseReader {
        let taint = self.taint().clone();
        let count = self.count();
        CaseReader::from_random_parts(
            taint,
            out_proto,
            count,
            Box::new(StatelessSource {
                sub: self,
                base: 0,
                f: Box::new(f),
            }),
        )
    }

    /// Widens every case by one numeric column computed by `f` from the
    /// case and its ordinal index.
    pub fn append_numeric(self, f: impl Fn(&Case, u64) -> f64 + 'static) -> CaseReader {
        let out_proto = self.proto().with_appended(Width::Numeric);
        let case_proto = out_proto.clone();
        self.translate_stateless(out_proto, move |case, idx| {
            let value = f(&case, idx);
            case.with_appended(&case_proto, Value::Num(value))
        })
    }

    /// Appends the arithmetic sequence `first + n * increment`, where `n`
    /// is the case's ordinal index.
    pub fn arith_sequence(self, first: f64, increment: f64) -> CaseReader {
        self.append_numeric(move |_case, idx| first + idx as f64 * increment)
    }
}

struct TranslateSource {
    sub: CaseReader,
    f: Box<dyn FnMut(Case) -> Case>,
}

impl SeqSource for TranslateSource {
    fn read(&mut self, _taint: &Taint) -> Option<Case> {
        self.sub.read().map(&mut self.f)
    }
}

struct StatelessSource {
    sub: CaseReader,
    base: u64,
    f: Box<dyn Fn(Case, u64) -> Case>,
}

impl RandomSource for StatelessSource {
    fn read(&mut self, offset: u64, _taint: &Taint) -> Option<Case> {
        let case = self.sub.peek(offset)?;
        Some((self.f)(case, self.base + offset))
    }

    fn advance(&mut self, n: u64, _taint: &Taint) {
        let skipped = self.sub.advance(n);
        self.base += skipped;
    }

    fn known_length(&self) -> Option<u64> {
        self.sub.count()
    }
}
