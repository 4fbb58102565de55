//! Deferred-instantiation case readers.
//!
//! A lazy reader postpones creating its underlying reader (often: opening a
//! file) until something actually reads, peeks, clones, or counts it.
//! Ordinary destruction still invokes the creation callback, since the drop
//! path cannot know that skipping it is safe and the real reader may own
//! resources that want an orderly teardown. Callers that *know* nothing was
//! ever read use `destroy_without_instantiating`, which skips the callback
//! entirely; a serial number assigned at creation disambiguates, since the
//! handle may have since become some other reader.
use std::sync::atomic::{AtomicU64, Ordering};

use log::debug;

use crate::case::CaseProto;

use super::reader::{CaseReader, Inner};
use super::CaseCount;

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

pub(crate) struct LazyCell {
    pub(crate) serial: u64,
    pub(crate) make: Option<Box<dyn FnOnce() -> CaseReader>>,
}

impl Drop for LazyCell {
    fn drop(&mut self) {
        if let Some(make) = self.make.take() {
            debug!("lazy case reader {} destroyed unread, instantiating", self.serial);
            drop(make());
        }
    }
}

impl CaseReader {
    /// Creates a reader that calls `make` on first use to obtain the real
    /// reader, then becomes it in place. Returns the reader and its serial
    /// number for [`destroy_without_instantiating`].
    ///
    /// [`destroy_without_instantiating`]: CaseReader::destroy_without_instantiating
    pub fn lazy(
        proto: CaseProto,
        count: CaseCount,
        make: impl FnOnce() -> CaseReader + 'static,
    ) -> (CaseReader, u64) {
        let serial = NEXT_SERIAL.fetch_add(1, Ordering::Relaxed);
        let cell = LazyCell {
            serial,
            make: Some(Box::new(make)),
        };
        (CaseReader::from_lazy_parts(proto, count, cell), serial)
    }

    /// Destroys the reader without ever invoking its creation callback.
    /// Succeeds only while the reader is still the never-instantiated
    /// placeholder carrying `serial`; otherwise the reader is handed back
    /// untouched.
    pub fn destroy_without_instantiating(mut self, serial: u64) -> Result<(), CaseReader> {
        match &mut self.inner {
            Inner::Lazy(cell) if cell.serial == serial && cell.make.is_some() => {
                cell.make = None;
                Ok(())
            }
            _ => Err(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::super::reader::testutil::*;
    use super::*;

    fn counting_lazy(limit: u64) -> (CaseReader, u64, Rc<Cell<u32>>) {
        let calls = Rc::new(Cell::new(0));
        let calls2 = Rc::clone(&calls);
        let (reader, serial) = CaseReader::lazy(series_proto(), Some(limit), move || {
            calls2.set(calls2.get() + 1);
            series_reader(limit)
        });
        (reader, serial, calls)
    }

    #[test]
    fn never_read_never_instantiated() {
        let (reader, serial, calls) = counting_lazy(5);
        assert!(reader.destroy_without_instantiating(serial).is_ok());
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn ordinary_destroy_still_instantiates() {
        let (reader, _serial, calls) = counting_lazy(5);
        drop(reader);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn first_read_instantiates_once() {
        let (mut reader, serial, calls) = counting_lazy(3);
        assert_eq!(reader.read().unwrap().num(0), 0.0);
        assert_eq!(reader.read().unwrap().num(0), 1.0);
        assert_eq!(calls.get(), 1);
        // Instantiated: the cheap teardown is refused.
        let reader = reader.destroy_without_instantiating(serial).unwrap_err();
        assert_eq!(calls.get(), 1);
        drop(reader);
    }

    #[test]
    fn clone_instantiates() {
        let (mut reader, _serial, calls) = counting_lazy(4);
        let mut clone = reader.clone_reader();
        assert_eq!(calls.get(), 1);
        assert_eq!(clone.read().unwrap().num(0), 0.0);
        assert_eq!(reader.read().unwrap().num(0), 0.0);
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn wrong_serial_is_refused() {
        let (reader, serial, calls) = counting_lazy(2);
        let reader = reader.destroy_without_instantiating(serial + 1).unwrap_err();
        assert!(reader.destroy_without_instantiating(serial).is_ok());
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn zero_count_lazy_never_consults_its_source() {
        // A reader that can deliver nothing has no reason to open anything.
        let (mut reader, serial, calls) = counting_lazy(0);
        assert!(reader.read().is_none());
        assert!(reader.peek(0).is_none());
        assert_eq!(calls.get(), 0);
        assert!(reader.destroy_without_instantiating(serial).is_ok());
    }

    #[test]
    fn truncated_to_zero_lazy_never_consults_its_source() {
        let (mut reader, _serial, calls) = counting_lazy(5);
        reader.truncate(0);
        assert!(reader.read().is_none());
        assert_eq!(calls.get(), 0);
        drop(reader);
    }

    #[test]
    fn count_resolution_uses_declared_count() {
        // The declared count spares a count query from instantiating.
        let (reader, _serial, calls) = counting_lazy(6);
        assert_eq!(reader.count(), Some(6));
        assert_eq!(calls.get(), 0);
        drop(reader);
    }
}
