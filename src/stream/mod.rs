//! Pull-based and push-based case streaming.
//!
//! [`CaseReader`] and [`CaseWriter`] are the engine's central abstractions.
//! Producers (format readers, the data parser) implement [`SeqSource`] or
//! [`RandomSource`] and hand the result to `CaseReader`; consumers read,
//! peek, clone, and combine readers without caring what backs them.
pub mod lazy;
pub mod rank;
pub mod reader;
pub mod select;
pub mod shim;
pub mod translate;
pub mod writer;

pub use rank::RankFlags;
pub use reader::CaseReader;
pub use writer::{CaseWriter, WriteTarget};

use crate::case::Case;
use crate::taint::Taint;

/// Remaining case count of a stream; `None` means unknown/unbounded.
pub type CaseCount = Option<u64>;

/// Result of asking a sequential source to peek.
pub enum Peek {
    /// The source has no native peek; the reader must install a shim.
    Unsupported,
    /// No case at that offset (end of input, or an error reported through
    /// the taint).
    Exhausted,
    Case(Case),
}

/// A purely sequential producer of cases.
///
/// `read` hands ownership of the next case to the caller, or returns `None`
/// at end of input. A source that fails mid-stream reports the failure by
/// tainting `taint` and then returning `None`; exhaustion and error are
/// distinguished only through the taint.
pub trait SeqSource {
    fn read(&mut self, taint: &Taint) -> Option<Case>;

    /// Native clone support. Sources without it are cloned by interposing a
    /// buffering shim.
    fn clone_source(&mut self, taint: &Taint) -> Option<Box<dyn SeqSource>> {
        let _ = taint;
        None
    }

    /// Native peek support: the case `offset` positions ahead of the read
    /// cursor, without consuming anything.
    fn peek(&mut self, offset: u64, taint: &Taint) -> Peek {
        let _ = (offset, taint);
        Peek::Unsupported
    }
}

/// A random-access producer of cases.
///
/// `read(offset)` may be called at any offset at or past the highest offset
/// ever passed to `advance`; `advance(n)` tells the store that no caller
/// will ever again need its first `n` remaining cases, so it may discard
/// them. The adapter in [`reader`] tracks every clone's position and calls
/// `advance` with the movement of the slowest clone.
pub trait RandomSource {
    fn read(&mut self, offset: u64, taint: &Taint) -> Option<Case>;
    fn advance(&mut self, n: u64, taint: &Taint);

    /// How many cases the store can still deliver from its current origin,
    /// when it knows exactly. After a failed `read` this lets the reader
    /// resolve an unknown count to the true length instead of just capping
    /// it at the probed offset.
    fn known_length(&self) -> Option<u64> {
        None
    }
}
