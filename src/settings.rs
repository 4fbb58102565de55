//! Engine-wide tunables.
//!
//! The only configuration this engine consumes is a single "workspace size"
//! scalar: the number of bytes of case data an autopaging writer or a
//! buffering shim may keep in memory before spilling to a temporary file.
//! It is an opaque tunable set by the embedding application.
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::case::CaseProto;

const DEFAULT_WORKSPACE: usize = 64 * 1024 * 1024;

/// Fixed per-case bookkeeping overhead assumed when converting the byte
/// budget into a case count.
const CASE_OVERHEAD: usize = 4 * size_of::<usize>();

static WORKSPACE: AtomicUsize = AtomicUsize::new(DEFAULT_WORKSPACE);

/// Returns the workspace budget in bytes.
pub fn workspace() -> usize {
    WORKSPACE.load(Ordering::Relaxed)
}

/// Sets the workspace budget in bytes.
pub fn set_workspace(bytes: usize) {
    WORKSPACE.store(bytes, Ordering::Relaxed);
}

/// Number of cases of the given shape that fit in the workspace budget.
/// Never less than 4, so tiny budgets still leave the engine operable.
pub fn workspace_cases(proto: &CaseProto) -> usize {
    let per_case = proto.case_size() + CASE_OVERHEAD;
    (workspace() / per_case).max(4)
}
