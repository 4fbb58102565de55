//! The push-based case writer.
//!
//! A [`CaseWriter`] owns a taint, a prototype, and a [`WriteTarget`]. The
//! workhorse is the autopaging writer: cases accumulate in a case window
//! within the workspace budget and spill to a temp file past it, and the
//! whole accumulation can be converted into a random-access reader for
//! further processing.
use crate::case::{Case, CaseProto};
use crate::settings;
use crate::storage::window::{self, CaseWindow};
use crate::taint::Taint;

use super::reader::CaseReader;
use super::RandomSource;

/// Where written cases go. `into_reader` is optional; targets that drain
/// into an external sink (an output file writer, say) return `None`.
pub trait WriteTarget {
    /// Takes ownership of `case`. Returns false on failure, after tainting
    /// `taint`.
    fn write(&mut self, case: Case, taint: &Taint) -> bool;

    fn into_reader(self: Box<Self>, proto: &CaseProto, taint: &Taint) -> Option<CaseReader> {
        let _ = (proto, taint);
        None
    }
}

pub struct CaseWriter {
    taint: Taint,
    proto: CaseProto,
    target: Box<dyn WriteTarget>,
}

impl CaseWriter {
    pub fn new(proto: CaseProto, target: Box<dyn WriteTarget>) -> CaseWriter {
        CaseWriter {
            taint: Taint::new(),
            proto,
            target,
        }
    }

    /// A window-backed writer that keeps up to the workspace budget of
    /// cases in memory and pages the rest to disk.
    pub fn autopaging(proto: CaseProto) -> CaseWriter {
        let max = settings::workspace_cases(&proto);
        Self::window_backed(proto, max)
    }

    /// A window-backed writer that never spills.
    pub fn in_memory(proto: CaseProto) -> CaseWriter {
        Self::window_backed(proto, window::UNLIMITED)
    }

    fn window_backed(proto: CaseProto, max_in_core: usize) -> CaseWriter {
        let taint = Taint::new();
        let window = CaseWindow::new(proto.clone(), max_in_core);
        window.taint().propagate(&taint);
        CaseWriter {
            taint,
            proto,
            target: Box::new(WindowTarget { window }),
        }
    }

    pub fn proto(&self) -> &CaseProto {
        &self.proto
    }

    pub fn taint(&self) -> &Taint {
        &self.taint
    }

    pub fn error(&self) -> bool {
        self.taint.is_tainted()
    }

    pub fn force_error(&self) {
        self.taint.set_taint();
    }

    /// Writes one case, taking ownership of it regardless of outcome.
    pub fn write(&mut self, case: Case) -> bool {
        debug_assert!(case.len() >= self.proto.len());
        self.target.write(case, &self.taint)
    }

    /// Converts the accumulated output into a reader, or `None` if the
    /// target does not support it. The reader shares the writer's taint.
    pub fn into_reader(self) -> Option<CaseReader> {
        let CaseWriter {
            taint,
            proto,
            target,
        } = self;
        target.into_reader(&proto, &taint)
    }

    /// Drops the writer, reporting whether it was tainted.
    pub fn destroy(self) -> bool {
        self.taint.is_tainted()
    }
}

impl CaseReader {
    /// Pumps every remaining case into `writer`, consuming the reader.
    /// The reader's taint is propagated into the writer's first, so any
    /// failure on either side is visible from the writer.
    pub fn transfer(mut self, writer: &mut CaseWriter) {
        self.taint().propagate(writer.taint());
        while let Some(case) = self.read() {
            if !writer.write(case) {
                break;
            }
        }
    }
}

struct WindowTarget {
    window: CaseWindow,
}

impl WriteTarget for WindowTarget {
    fn write(&mut self, case: Case, taint: &Taint) -> bool {
        self.window.push_head(case);
        if self.window.taint().is_tainted() {
            taint.set_taint();
            return false;
        }
        true
    }

    fn into_reader(self: Box<Self>, proto: &CaseProto, taint: &Taint) -> Option<CaseReader> {
        let count = self.window.len();
        Some(CaseReader::from_random_parts(
            taint.clone(),
            proto.clone(),
            Some(count),
            Box::new(WindowSource {
                window: self.window,
            }),
        ))
    }
}

/// Random access over a finished case window.
struct WindowSource {
    window: CaseWindow,
}

impl RandomSource for WindowSource {
    fn read(&mut self, offset: u64, _taint: &Taint) -> Option<Case> {
        self.window.get_case(offset)
    }

    fn advance(&mut self, n: u64, _taint: &Taint) {
        let n = n.min(self.window.len());
        self.window.pop_tail(n);
    }

    fn known_length(&self) -> Option<u64> {
        Some(self.window.len())
    }
}

#[cfg(test)]
mod tests {
    use super::super::reader::testutil::*;
    use super::*;
    use crate::case::{Value, Width};

    fn case_n(proto: &CaseProto, x: f64) -> Case {
        Case::from_values(proto, vec![Value::Num(x)])
    }

    #[test]
    fn write_then_read_back() {
        let proto = CaseProto::new(vec![Width::Numeric]);
        let mut writer = CaseWriter::in_memory(proto.clone());
        for i in 0..5 {
            assert!(writer.write(case_n(&proto, i as f64)));
        }
        let mut reader = writer.into_reader().unwrap();
        assert_eq!(reader.count(), Some(5));
        for i in 0..5 {
            assert_eq!(reader.read().unwrap().num(0), i as f64);
        }
        assert!(reader.read().is_none());
    }

    #[test]
    fn window_backed_writer_spills_and_reads_back() {
        let proto = CaseProto::new(vec![Width::Numeric]);
        let mut writer = CaseWriter::window_backed(proto.clone(), 3);
        for i in 0..50 {
            assert!(writer.write(case_n(&proto, i as f64)));
        }
        let mut reader = writer.into_reader().unwrap();
        for i in 0..50 {
            assert_eq!(reader.read().unwrap().num(0), i as f64);
        }
        assert!(!reader.destroy());
    }

    #[test]
    fn transfer_pumps_and_links_taint() {
        let mut writer = CaseWriter::in_memory(series_proto());
        let reader = series_reader(8);
        reader.transfer(&mut writer);
        let mut back = writer.into_reader().unwrap();
        assert_eq!(back.count(), Some(8));
        assert_eq!(back.read().unwrap().num(0), 0.0);
    }

    #[test]
    fn transfer_of_failing_reader_taints_writer() {
        let mut writer = CaseWriter::in_memory(series_proto());
        let reader = CaseReader::from_seq(
            series_proto(),
            None,
            Box::new(SeriesSource {
                next: 0,
                limit: 10,
                fail_at: Some(3),
            }),
        );
        reader.transfer(&mut writer);
        assert!(writer.error());
        assert!(writer.destroy());
    }

    #[test]
    fn reader_from_writer_supports_clone() {
        let proto = CaseProto::new(vec![Width::Numeric]);
        let mut writer = CaseWriter::in_memory(proto.clone());
        for i in 0..4 {
            writer.write(case_n(&proto, i as f64));
        }
        let mut reader = writer.into_reader().unwrap();
        reader.advance(1);
        let mut clone = reader.clone_reader();
        assert_eq!(reader.read().unwrap().num(0), 1.0);
        assert_eq!(clone.read().unwrap().num(0), 1.0);
    }
}
