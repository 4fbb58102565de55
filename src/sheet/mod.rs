//! The datasheet: a mutable 2-D view over case data.
//!
//! A datasheet supports random reads and writes plus insertion, deletion,
//! and movement of whole rows and columns, none of which move any stored
//! bytes: the row axis maps logical to physical row ordinates, and the
//! column table maps each logical column to a byte range inside one of
//! several column stores ("sources").
//!
//! A datasheet created from a reader keeps that reader as the backing of
//! its initial source and serves reads by peeking it. The first write to a
//! backed row copies the row into the source's overlay (copy-on-write at
//! row granularity); the backing reader itself is never consumed and is
//! dropped once every column that came from it has been deleted.
pub mod axis;
pub mod range_set;
pub mod xarray;

use std::rc::Rc;
use std::cell::RefCell;

use log::debug;

use crate::case::{Case, CaseProto, Value, Width};
use crate::settings;
use crate::stream::{CaseReader, RandomSource};
use crate::taint::Taint;

use axis::Axis;
use range_set::RangeSet;
use xarray::SparseXarray;

/// Row width granted to a brand-new source beyond its first column, so
/// that repeated column insertions amortize. Doubles per source, capped.
const INITIAL_SOURCE_WIDTH: usize = 64;
const MAX_SOURCE_WIDTH: usize = 4096;

/// How `allocate_column` obtained a column's byte range.
#[derive(Clone, Copy, PartialEq, Eq)]
enum Grant {
    /// From an existing source's free set; may hold a deleted column's
    /// stale bytes.
    Reused,
    /// From widening an existing source; the new bytes read as zeros.
    Widened,
    /// The leading bytes of a brand-new source.
    Fresh,
}

/// One physical column store: a sparse byte array of rows, a free set of
/// byte ranges not currently assigned to any column, and optionally the
/// reader this source was created from.
struct Source {
    avail: RangeSet,
    data: SparseXarray,
    backing: Option<Backing>,
    /// Live columns still served from the backing.
    n_used: usize,
    /// Live columns mapped onto this source.
    n_columns: usize,
}

struct Backing {
    reader: CaseReader,
    n_rows: u64,
    /// Byte offset and width of each backing value in the source's rows.
    layout: Vec<(usize, Width)>,
}

impl Source {
    /// Whether reads of physical row `phys` go to the backing reader
    /// rather than the overlay.
    fn reads_through(&self, phys: u64) -> bool {
        match &self.backing {
            Some(backing) => phys < backing.n_rows && !self.data.has_row(phys),
            None => false,
        }
    }

    fn peek_backing(&mut self, phys: u64) -> Option<Case> {
        self.backing.as_mut()?.reader.peek(phys)
    }

    /// Copies physical row `phys` from the backing into the overlay, so a
    /// partial write of the row cannot lose the rest of it.
    fn materialize(&mut self, phys: u64) -> bool {
        if !self.reads_through(phys) {
            return true;
        }
        let width = self.data.width();
        let Some(backing) = &mut self.backing else {
            return true;
        };
        let Some(case) = backing.reader.peek(phys) else {
            return false;
        };
        let mut buf = vec![0; width];
        for (i, &(ofs, w)) in backing.layout.iter().enumerate() {
            case.value(i).encode(w, &mut buf[ofs..ofs + w.byte_len()]);
        }
        self.data.write(phys, 0, &buf)
    }
}

/// One logical column: which source holds it, where in that source's rows
/// its bytes live, and (for backed columns) its value index in the backing
/// reader's cases. `Width::Empty` columns carry no storage at all.
struct Column {
    source: Option<Rc<RefCell<Source>>>,
    byte_ofs: usize,
    value_idx: Option<usize>,
    width: Width,
}

pub struct Datasheet {
    taint: Taint,
    columns: Vec<Column>,
    rows: Axis,
    next_source_width: usize,
}

impl Datasheet {
    /// An empty datasheet: no rows, no columns.
    pub fn new() -> Datasheet {
        Datasheet {
            taint: Taint::new(),
            columns: Vec::new(),
            rows: Axis::new(),
            next_source_width: INITIAL_SOURCE_WIDTH,
        }
    }

    /// Absorbs `reader` as the initial contents: one column per prototype
    /// width, rows taken from the reader's case count. The reader is
    /// peeked, never read, so the datasheet stays cheap until written to.
    pub fn from_reader(mut reader: CaseReader) -> Datasheet {
        let n_rows = reader.count_cases();
        let proto = reader.proto().clone();
        let taint = Taint::new();
        reader.taint().propagate(&taint);

        let mut rows = Axis::new();
        rows.insert(0, n_rows);

        let offsets = proto.byte_offsets();
        let layout: Vec<(usize, Width)> = offsets
            .iter()
            .zip(proto.widths())
            .map(|(&ofs, &w)| (ofs, w))
            .collect();
        let n_live = proto.widths().iter().filter(|w| !w.is_empty()).count();
        let source = if n_live > 0 {
            let row_width = proto.case_size();
            Some(Rc::new(RefCell::new(Source {
                avail: RangeSet::new(),
                data: SparseXarray::new(row_width, in_core_rows(row_width)),
                backing: Some(Backing {
                    reader,
                    n_rows,
                    layout,
                }),
                n_used: n_live,
                n_columns: n_live,
            })))
        } else {
            None
        };

        let columns = proto
            .widths()
            .iter()
            .enumerate()
            .map(|(i, &width)| {
                if width.is_empty() {
                    Column {
                        source: None,
                        byte_ofs: 0,
                        value_idx: None,
                        width,
                    }
                } else {
                    Column {
                        source: source.clone(),
                        byte_ofs: offsets[i],
                        value_idx: Some(i),
                        width,
                    }
                }
            })
            .collect();

        Datasheet {
            taint,
            columns,
            rows,
            next_source_width: INITIAL_SOURCE_WIDTH,
        }
    }

    pub fn n_rows(&self) -> u64 {
        self.rows.len()
    }

    pub fn n_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn column_width(&self, column: usize) -> Width {
        self.columns[column].width
    }

    /// The current column shape as a case prototype.
    pub fn proto(&self) -> CaseProto {
        CaseProto::new(self.columns.iter().map(|c| c.width).collect())
    }

    pub fn taint(&self) -> &Taint {
        &self.taint
    }

    pub fn error(&self) -> bool {
        self.taint.is_tainted()
    }

    pub fn get_value(&mut self, row: u64, column: usize) -> Option<Value> {
        debug_assert!(row < self.rows.len());
        let col = &self.columns[column];
        let width = col.width;
        let byte_ofs = col.byte_ofs;
        let value_idx = col.value_idx;
        let Some(source) = col.source.clone() else {
            return Some(Value::default_for(width));
        };
        let phys = self.rows.map(row);
        let mut src = source.borrow_mut();
        if let Some(idx) = value_idx {
            if src.reads_through(phys) {
                return match src.peek_backing(phys) {
                    Some(case) => Some(case.value(idx).clone()),
                    None => {
                        self.taint.set_taint();
                        None
                    }
                };
            }
        }
        let mut buf = vec![0; width.byte_len()];
        if !src.data.read(phys, byte_ofs, &mut buf) {
            self.taint.set_taint();
            return None;
        }
        Some(Value::decode(width, &buf))
    }

    pub fn put_value(&mut self, row: u64, column: usize, value: &Value) -> bool {
        debug_assert!(row < self.rows.len());
        let col = &self.columns[column];
        debug_assert!(value.matches(col.width));
        let width = col.width;
        let byte_ofs = col.byte_ofs;
        let Some(source) = col.source.clone() else {
            return true;
        };
        let phys = self.rows.map(row);
        let mut src = source.borrow_mut();
        if !src.materialize(phys) {
            self.taint.set_taint();
            return false;
        }
        let mut buf = vec![0; width.byte_len()];
        value.encode(width, &mut buf);
        if !src.data.write(phys, byte_ofs, &buf) {
            self.taint.set_taint();
            return false;
        }
        true
    }

    /// Reads logical row `row` as a case, batching contiguous same-source
    /// column runs into single store reads.
    pub fn get_row(&mut self, row: u64) -> Option<Case> {
        let proto = self.proto();
        self.read_row(row, &proto)
    }

    fn read_row(&mut self, row: u64, proto: &CaseProto) -> Option<Case> {
        debug_assert!(row < self.rows.len());
        let phys = self.rows.map(row);
        let n = self.columns.len();
        let mut values = Vec::with_capacity(n);
        let mut i = 0;
        while i < n {
            let Some(source) = self.columns[i].source.clone() else {
                values.push(Value::default_for(self.columns[i].width));
                i += 1;
                continue;
            };
            let mut src = source.borrow_mut();
            if self.columns[i].value_idx.is_some() && src.reads_through(phys) {
                let Some(case) = src.peek_backing(phys) else {
                    self.taint.set_taint();
                    return None;
                };
                while i < n {
                    let col = &self.columns[i];
                    if !col.source.as_ref().is_some_and(|s| Rc::ptr_eq(s, &source)) {
                        break;
                    }
                    let Some(idx) = col.value_idx else {
                        break;
                    };
                    values.push(case.value(idx).clone());
                    i += 1;
                }
            } else {
                let start = self.columns[i].byte_ofs;
                let mut len = 0;
                let mut end = i;
                while end < n {
                    let col = &self.columns[end];
                    if !col.source.as_ref().is_some_and(|s| Rc::ptr_eq(s, &source))
                        || col.byte_ofs != start + len
                    {
                        break;
                    }
                    len += col.width.byte_len();
                    end += 1;
                }
                let mut buf = vec![0; len];
                if !src.data.read(phys, start, &mut buf) {
                    self.taint.set_taint();
                    return None;
                }
                let mut ofs = 0;
                for col in &self.columns[i..end] {
                    let w = col.width.byte_len();
                    values.push(Value::decode(col.width, &buf[ofs..ofs + w]));
                    ofs += w;
                }
                i = end;
            }
        }
        Some(Case::from_values(proto, values))
    }

    /// Writes every column of logical row `row` from `case`, batching
    /// contiguous same-source runs. On failure the row may be partially
    /// written; the datasheet is tainted and unusable results follow.
    pub fn put_row(&mut self, row: u64, case: &Case) -> bool {
        debug_assert!(row < self.rows.len());
        debug_assert!(case.len() >= self.columns.len());
        let phys = self.rows.map(row);
        let n = self.columns.len();
        let mut i = 0;
        while i < n {
            let Some(source) = self.columns[i].source.clone() else {
                i += 1;
                continue;
            };
            let mut src = source.borrow_mut();
            let start = self.columns[i].byte_ofs;
            let mut len = 0;
            let mut end = i;
            while end < n {
                let col = &self.columns[end];
                if !col.source.as_ref().is_some_and(|s| Rc::ptr_eq(s, &source))
                    || col.byte_ofs != start + len
                {
                    break;
                }
                len += col.width.byte_len();
                end += 1;
            }
            let mut buf = vec![0; len];
            let mut ofs = 0;
            for (k, col) in self.columns[i..end].iter().enumerate() {
                let w = col.width.byte_len();
                case.value(i + k).encode(col.width, &mut buf[ofs..ofs + w]);
                ofs += w;
            }
            if !src.data.write(phys, start, &buf) {
                self.taint.set_taint();
                return false;
            }
            i = end;
        }
        true
    }

    /// Inserts a column before logical column `before`, with every
    /// existing row set to `value`. Storage comes from an unbacked source
    /// with free space, from widening an unbacked source, or from a new
    /// source.
    pub fn insert_column(&mut self, before: usize, width: Width, value: &Value) -> bool {
        debug_assert!(before <= self.columns.len());
        debug_assert!(value.matches(width));
        if width.is_empty() {
            self.columns.insert(before, empty_column());
            return true;
        }
        let need = width.byte_len();
        let (source, byte_ofs, grant) = self.allocate_column(need);
        if !self.init_column(&source, byte_ofs, width, value, grant) {
            if grant != Grant::Fresh {
                let mut src = source.borrow_mut();
                src.avail.insert(byte_ofs as u64, need as u64);
            }
            self.taint.set_taint();
            return false;
        }
        source.borrow_mut().n_columns += 1;
        self.columns.insert(
            before,
            Column {
                source: Some(source),
                byte_ofs,
                value_idx: None,
                width,
            },
        );
        true
    }

    /// Deletes `n` columns starting at `start`, releasing their byte
    /// ranges. A backed source whose last backed column goes away drops
    /// its backing reader.
    pub fn delete_columns(&mut self, start: usize, n: usize) {
        debug_assert!(start + n <= self.columns.len());
        for col in self.columns.drain(start..start + n) {
            release_column_storage(&col);
        }
    }

    /// Moves `n` columns from `old_start` to `new_start` (interpreted
    /// after the removal). No stored bytes move.
    pub fn move_columns(&mut self, old_start: usize, n: usize, new_start: usize) {
        debug_assert!(old_start + n <= self.columns.len());
        debug_assert!(new_start <= self.columns.len() - n);
        let moved: Vec<Column> = self.columns.drain(old_start..old_start + n).collect();
        self.columns.splice(new_start..new_start, moved);
    }

    /// Changes a column's width. `resize` maps each old value (or `None`
    /// when the old width was `Empty`) to a value of the new width.
    ///
    /// A width-to-width change rewrites every row into fresh storage; over
    /// a backed source a mid-rewrite I/O failure aborts with the column
    /// partially converted (the datasheet is tainted).
    pub fn resize_column(
        &mut self,
        column: usize,
        new_width: Width,
        resize: impl Fn(Option<&Value>, Width) -> Value,
    ) -> bool {
        debug_assert!(column < self.columns.len());
        let old_width = self.columns[column].width;
        match (old_width.is_empty(), new_width.is_empty()) {
            (true, true) => true,
            (true, false) => {
                let value = resize(None, new_width);
                self.delete_columns(column, 1);
                self.insert_column(column, new_width, &value)
            }
            (false, true) => {
                self.delete_columns(column, 1);
                self.columns.insert(column, empty_column());
                true
            }
            (false, false) => self.rewrite_column(column, new_width, &resize),
        }
    }

    fn rewrite_column(
        &mut self,
        column: usize,
        new_width: Width,
        resize: &dyn Fn(Option<&Value>, Width) -> Value,
    ) -> bool {
        let old_width = self.columns[column].width;
        let old_ofs = self.columns[column].byte_ofs;
        let Some(old_source) = self.columns[column].source.clone() else {
            return true;
        };
        let backed = self.columns[column].value_idx.is_some()
            && old_source.borrow().backing.is_some();

        let (new_source, new_ofs, grant) = self.allocate_column(new_width.byte_len());

        // An unbacked column whose transform keeps the all-zero default at
        // the default only needs to visit rows present in the overlay;
        // otherwise every logical row must be rewritten.
        let default_maps_to_default = resize(Some(&Value::default_for(old_width)), new_width)
            == Value::default_for(new_width);
        let phys_rows: Vec<u64> = if backed || !default_maps_to_default {
            (0..self.rows.len()).map(|log| self.rows.map(log)).collect()
        } else {
            old_source.borrow().data.row_numbers()
        };

        let mut out = vec![0; new_width.byte_len()];
        let ok = 'rewrite: {
            for phys in phys_rows {
                let old_value = {
                    let mut src = old_source.borrow_mut();
                    if src.reads_through(phys) {
                        let idx = self.columns[column].value_idx.unwrap_or(0);
                        match src.peek_backing(phys) {
                            Some(case) => case.value(idx).clone(),
                            None => break 'rewrite false,
                        }
                    } else {
                        let mut buf = vec![0; old_width.byte_len()];
                        if !src.data.read(phys, old_ofs, &mut buf) {
                            break 'rewrite false;
                        }
                        Value::decode(old_width, &buf)
                    }
                };
                let new_value = resize(Some(&old_value), new_width);
                debug_assert!(new_value.matches(new_width));
                new_value.encode(new_width, &mut out);
                let mut src = new_source.borrow_mut();
                if !src.data.write(phys, new_ofs, &out) {
                    break 'rewrite false;
                }
            }
            true
        };
        if !ok {
            if grant != Grant::Fresh {
                let mut src = new_source.borrow_mut();
                src.avail.insert(new_ofs as u64, new_width.byte_len() as u64);
            }
            self.taint.set_taint();
            return false;
        }

        release_column_storage(&self.columns[column]);
        new_source.borrow_mut().n_columns += 1;
        self.columns[column] = Column {
            source: Some(new_source),
            byte_ofs: new_ofs,
            value_idx: None,
            width: new_width,
        };
        true
    }

    /// Inserts `cases` as new rows before logical row `before`. On any
    /// write failure, every row inserted by this call is removed again.
    pub fn insert_rows(&mut self, before: u64, cases: &[Case]) -> bool {
        debug_assert!(before <= self.rows.len());
        let n = cases.len() as u64;
        self.rows.insert(before, n);
        for (k, case) in cases.iter().enumerate() {
            if !self.put_row(before + k as u64, case) {
                self.rows.remove(before, n);
                return false;
            }
        }
        true
    }

    pub fn delete_rows(&mut self, start: u64, n: u64) {
        debug_assert!(start + n <= self.rows.len());
        self.rows.remove(start, n);
    }

    /// Moves `n` rows from `old_start` to `new_start` (interpreted after
    /// the removal). No stored bytes move.
    pub fn move_rows(&mut self, old_start: u64, n: u64, new_start: u64) {
        self.rows.move_range(old_start, n, new_start);
    }

    /// Converts the datasheet into a random-access reader over its rows.
    /// Consuming cases from the reader deletes them from the sheet, so
    /// memory and disk are released as the output is drained.
    pub fn into_reader(self) -> CaseReader {
        let proto = self.proto();
        let count = self.n_rows();
        let taint = self.taint.clone();
        CaseReader::from_random_parts(
            taint,
            proto.clone(),
            Some(count),
            Box::new(SheetSource { sheet: self, proto }),
        )
    }

    /// Finds room for a `need`-byte column: an unbacked source with a free
    /// range, an unbacked source with room to widen, or a new source with
    /// geometrically growing spare width.
    fn allocate_column(&mut self, need: usize) -> (Rc<RefCell<Source>>, usize, Grant) {
        let mut seen: Vec<*const RefCell<Source>> = Vec::new();
        let mut growable: Option<Rc<RefCell<Source>>> = None;
        for col in &self.columns {
            let Some(source) = &col.source else { continue };
            let ptr = Rc::as_ptr(source);
            if seen.contains(&ptr) {
                continue;
            }
            seen.push(ptr);
            let mut src = source.borrow_mut();
            if src.backing.is_some() {
                continue;
            }
            if let Some(ofs) = src.avail.allocate_fully(need as u64) {
                drop(src);
                return (Rc::clone(source), ofs as usize, Grant::Reused);
            }
            if growable.is_none() && src.data.width() + need <= MAX_SOURCE_WIDTH {
                growable = Some(Rc::clone(source));
            }
        }

        if let Some(source) = growable {
            let mut src = source.borrow_mut();
            let old_width = src.data.width();
            let growth = need.max(old_width.min(MAX_SOURCE_WIDTH - old_width));
            debug!("widening {old_width}-byte column source by {growth} bytes");
            if src.data.resize(old_width + growth) {
                src.avail
                    .insert((old_width + need) as u64, (growth - need) as u64);
                drop(src);
                return (source, old_width, Grant::Widened);
            }
            // Widening failed; leave the source tainted-on-access and fall
            // back to a fresh one.
        }

        let row_width = need.max(self.next_source_width);
        self.next_source_width = (self.next_source_width * 2).min(MAX_SOURCE_WIDTH);
        debug!("new {row_width}-byte column source");
        let mut avail = RangeSet::new();
        avail.insert(need as u64, (row_width - need) as u64);
        let source = Source {
            avail,
            data: SparseXarray::new(row_width, in_core_rows(row_width)),
            backing: None,
            n_used: 0,
            n_columns: 0,
        };
        (Rc::new(RefCell::new(source)), 0, Grant::Fresh)
    }

    /// Stamps `value` into the new column's byte range. A byte range known
    /// to be zero needs no writes for the all-zero default; a reused range
    /// must be cleared in rows that already exist, since it may hold bytes
    /// of a previously deleted column.
    fn init_column(
        &mut self,
        source: &Rc<RefCell<Source>>,
        byte_ofs: usize,
        width: Width,
        value: &Value,
        grant: Grant,
    ) -> bool {
        let is_default = *value == Value::default_for(width);
        if grant != Grant::Reused && is_default {
            return true;
        }
        let mut buf = vec![0; width.byte_len()];
        value.encode(width, &mut buf);
        let mut src = source.borrow_mut();
        if is_default {
            for phys in src.data.row_numbers() {
                if !src.data.write(phys, byte_ofs, &buf) {
                    return false;
                }
            }
        } else {
            for log in 0..self.rows.len() {
                let phys = self.rows.map(log);
                if !src.data.write(phys, byte_ofs, &buf) {
                    return false;
                }
            }
        }
        true
    }
}

impl Default for Datasheet {
    fn default() -> Self {
        Datasheet::new()
    }
}

fn empty_column() -> Column {
    Column {
        source: None,
        byte_ofs: 0,
        value_idx: None,
        width: Width::Empty,
    }
}

/// Returns a column's byte range to its source and updates the source's
/// liveness counts, dropping the backing reader with the last backed
/// column. The source itself goes away with its last `Rc`.
fn release_column_storage(col: &Column) {
    let Some(source) = &col.source else {
        return;
    };
    let mut src = source.borrow_mut();
    debug_assert!(!src.avail.contains(col.byte_ofs as u64));
    src.avail
        .insert(col.byte_ofs as u64, col.width.byte_len() as u64);
    src.n_columns -= 1;
    if col.value_idx.is_some() {
        src.n_used -= 1;
        if src.n_used == 0 {
            debug!("last backed column deleted, dropping backing reader");
            src.backing = None;
        }
    }
}

/// In-core row budget for a source of `row_width`-byte rows, derived from
/// the workspace setting.
fn in_core_rows(row_width: usize) -> usize {
    (settings::workspace() / row_width.max(1)).max(4)
}

/// The terminal state of a datasheet: a random-access source whose
/// `advance` deletes consumed rows from the sheet itself.
struct SheetSource {
    sheet: Datasheet,
    proto: CaseProto,
}

impl RandomSource for SheetSource {
    fn read(&mut self, offset: u64, taint: &Taint) -> Option<Case> {
        if offset >= self.sheet.n_rows() {
            return None;
        }
        let case = self.sheet.read_row(offset, &self.proto);
        if case.is_none() {
            taint.set_taint();
        }
        case
    }

    fn advance(&mut self, n: u64, _taint: &Taint) {
        let n = n.min(self.sheet.n_rows());
        self.sheet.delete_rows(0, n);
    }

    fn known_length(&self) -> Option<u64> {
        Some(self.sheet.n_rows())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::CaseWriter;

    fn str_value(s: &[u8]) -> Value {
        Value::Str(s.to_vec().into_boxed_slice())
    }

    fn sample_proto() -> CaseProto {
        CaseProto::new(vec![Width::Numeric, Width::String(4)])
    }

    fn sample_reader(n: u64) -> CaseReader {
        let proto = sample_proto();
        let mut writer = CaseWriter::in_memory(proto.clone());
        for i in 0..n {
            let s = format!("s{i:03}");
            writer.write(Case::from_values(
                &proto,
                vec![Value::Num(i as f64), str_value(s.as_bytes())],
            ));
        }
        writer.into_reader().unwrap()
    }

    fn column(sheet: &mut Datasheet, col: usize) -> Vec<Value> {
        (0..sheet.n_rows())
            .map(|row| sheet.get_value(row, col).unwrap())
            .collect()
    }

    #[test]
    fn absorbs_reader_and_reads_through() {
        let mut sheet = Datasheet::from_reader(sample_reader(5));
        assert_eq!(sheet.n_rows(), 5);
        assert_eq!(sheet.n_columns(), 2);
        assert_eq!(sheet.get_value(3, 0), Some(Value::Num(3.0)));
        assert_eq!(sheet.get_value(3, 1), Some(str_value(b"s003")));
        let row = sheet.get_row(4).unwrap();
        assert_eq!(row.num(0), 4.0);
        assert!(!sheet.error());
    }

    #[test]
    fn write_materializes_only_the_touched_row() {
        let mut sheet = Datasheet::from_reader(sample_reader(4));
        assert!(sheet.put_value(1, 0, &Value::Num(99.0)));
        // The written row keeps its other column; the others still read
        // through the backing.
        assert_eq!(sheet.get_value(1, 0), Some(Value::Num(99.0)));
        assert_eq!(sheet.get_value(1, 1), Some(str_value(b"s001")));
        assert_eq!(sheet.get_value(2, 0), Some(Value::Num(2.0)));
    }

    #[test]
    fn row_insert_delete_move() {
        let proto = sample_proto();
        let mut sheet = Datasheet::from_reader(sample_reader(3));
        let extra = Case::from_values(&proto, vec![Value::Num(50.0), str_value(b"xtra")]);
        assert!(sheet.insert_rows(1, &[extra]));
        assert_eq!(
            column(&mut sheet, 0),
            vec![
                Value::Num(0.0),
                Value::Num(50.0),
                Value::Num(1.0),
                Value::Num(2.0)
            ]
        );
        sheet.delete_rows(2, 1);
        assert_eq!(
            column(&mut sheet, 0),
            vec![Value::Num(0.0), Value::Num(50.0), Value::Num(2.0)]
        );
        sheet.move_rows(1, 1, 0);
        assert_eq!(
            column(&mut sheet, 0),
            vec![Value::Num(50.0), Value::Num(0.0), Value::Num(2.0)]
        );
    }

    #[test]
    fn column_insert_delete_move() {
        let mut sheet = Datasheet::from_reader(sample_reader(3));
        assert!(sheet.insert_column(1, Width::Numeric, &Value::Num(7.0)));
        assert_eq!(sheet.n_columns(), 3);
        assert_eq!(sheet.get_value(2, 1), Some(Value::Num(7.0)));
        assert_eq!(sheet.get_value(2, 2), Some(str_value(b"s002")));
        sheet.move_columns(1, 1, 2);
        assert_eq!(sheet.get_value(2, 2), Some(Value::Num(7.0)));
        assert_eq!(sheet.get_value(2, 1), Some(str_value(b"s002")));
        sheet.delete_columns(0, 1);
        assert_eq!(sheet.n_columns(), 2);
        assert_eq!(sheet.get_value(0, 0), Some(str_value(b"s000")));
    }

    #[test]
    fn deleting_all_backed_columns_drops_the_backing() {
        let mut sheet = Datasheet::from_reader(sample_reader(3));
        assert!(sheet.insert_column(2, Width::Numeric, &Value::Num(1.0)));
        sheet.delete_columns(0, 2);
        assert_eq!(sheet.n_columns(), 1);
        assert_eq!(sheet.get_value(1, 0), Some(Value::Num(1.0)));
    }

    #[test]
    fn default_valued_column_costs_no_writes() {
        let mut sheet = Datasheet::from_reader(sample_reader(3));
        assert!(sheet.insert_column(0, Width::Numeric, &Value::Num(0.0)));
        assert_eq!(sheet.get_value(2, 0), Some(Value::Num(0.0)));
        assert_eq!(sheet.get_value(2, 1), Some(Value::Num(2.0)));
    }

    #[test]
    fn empty_columns_carry_no_storage() {
        let mut sheet = Datasheet::new();
        assert!(sheet.insert_column(0, Width::Empty, &Value::Num(0.0)));
        assert!(sheet.insert_column(1, Width::Numeric, &Value::Num(3.0)));
        let proto = sheet.proto();
        let case = Case::from_values(&proto, vec![Value::Num(0.0), Value::Num(8.0)]);
        assert!(sheet.insert_rows(0, &[case]));
        assert_eq!(sheet.get_value(0, 0), Some(Value::Num(0.0)));
        assert_eq!(sheet.get_value(0, 1), Some(Value::Num(8.0)));
    }

    #[test]
    fn resize_numeric_to_string_over_backed_source() {
        let mut sheet = Datasheet::from_reader(sample_reader(3));
        assert!(sheet.resize_column(0, Width::String(2), |old, _w| {
            let n = old.map_or(0.0, Value::as_num) as u8;
            Value::Str(vec![b'0' + n, b'#'].into_boxed_slice())
        }));
        assert_eq!(sheet.column_width(0), Width::String(2));
        assert_eq!(sheet.get_value(2, 0), Some(str_value(b"2#")));
        // The untouched column still reads through the backing.
        assert_eq!(sheet.get_value(2, 1), Some(str_value(b"s002")));
    }

    #[test]
    fn resize_unbacked_column_visits_only_written_rows() {
        let mut sheet = Datasheet::new();
        assert!(sheet.insert_column(0, Width::Numeric, &Value::Num(0.0)));
        let proto = sheet.proto();
        let rows: Vec<Case> = (0..4)
            .map(|i| Case::from_values(&proto, vec![Value::Num(i as f64)]))
            .collect();
        assert!(sheet.insert_rows(0, &rows));
        assert!(sheet.resize_column(0, Width::Numeric, |old, _w| {
            Value::Num(old.map_or(0.0, Value::as_num) * 2.0)
        }));
        assert_eq!(
            column(&mut sheet, 0),
            vec![
                Value::Num(0.0),
                Value::Num(2.0),
                Value::Num(4.0),
                Value::Num(6.0)
            ]
        );
    }

    #[test]
    fn column_storage_widens_an_existing_source() {
        let mut sheet = Datasheet::new();
        assert!(sheet.insert_column(0, Width::Numeric, &Value::Num(0.0)));
        let proto = sheet.proto();
        let rows: Vec<Case> = (0..3)
            .map(|i| Case::from_values(&proto, vec![Value::Num(i as f64)]))
            .collect();
        assert!(sheet.insert_rows(0, &rows));
        // A 60-byte column does not fit the first source's spare bytes, so
        // the source's rows widen rather than a second source opening.
        assert!(sheet.insert_column(1, Width::String(60), &str_value(&[b'q'; 60])));
        let first = sheet.columns[0].source.clone().unwrap();
        let second = sheet.columns[1].source.clone().unwrap();
        assert!(Rc::ptr_eq(&first, &second));
        assert_eq!(sheet.get_value(1, 0), Some(Value::Num(1.0)));
        assert_eq!(sheet.get_value(1, 1), Some(str_value(&[b'q'; 60])));
        assert!(!sheet.error());
    }

    #[test]
    fn failed_rewrite_returns_its_byte_range() {
        use crate::stream::reader::testutil::{series_proto, SeriesSource};

        let backing = CaseReader::from_seq(
            series_proto(),
            Some(4),
            Box::new(SeriesSource {
                next: 0,
                limit: 4,
                fail_at: Some(2),
            }),
        );
        let mut sheet = Datasheet::from_reader(backing);
        assert!(sheet.insert_column(1, Width::Numeric, &Value::Num(9.0)));
        assert!(!sheet.resize_column(0, Width::String(2), |old, _w| {
            let n = old.map_or(0.0, Value::as_num) as u8;
            Value::Str(vec![b'0' + n, b'!'].into_boxed_slice())
        }));
        assert!(sheet.error());
        assert_eq!(sheet.column_width(0), Width::Numeric);
        // The aborted rewrite freed the range it took from the unbacked
        // source; the next allocation gets the same bytes back.
        assert!(sheet.insert_column(2, Width::String(2), &str_value(b"ok")));
        assert_eq!(sheet.columns[2].byte_ofs, 8);
        assert!(Rc::ptr_eq(
            sheet.columns[2].source.as_ref().unwrap(),
            sheet.columns[1].source.as_ref().unwrap(),
        ));
    }

    #[test]
    fn resize_between_empty_and_real_widths() {
        let mut sheet = Datasheet::from_reader(sample_reader(2));
        assert!(sheet.resize_column(0, Width::Empty, |_old, _w| Value::Num(0.0)));
        assert_eq!(sheet.column_width(0), Width::Empty);
        assert!(sheet.resize_column(0, Width::Numeric, |old, _w| {
            debug_assert!(old.is_none());
            Value::Num(5.0)
        }));
        assert_eq!(
            column(&mut sheet, 0),
            vec![Value::Num(5.0), Value::Num(5.0)]
        );
        assert_eq!(sheet.get_value(1, 1), Some(str_value(b"s001")));
    }

    #[test]
    fn into_reader_drains_the_sheet() {
        let mut sheet = Datasheet::from_reader(sample_reader(4));
        assert!(sheet.put_value(0, 0, &Value::Num(40.0)));
        let mut reader = sheet.into_reader();
        assert_eq!(reader.count(), Some(4));
        assert_eq!(reader.read().unwrap().num(0), 40.0);
        for i in 1..4 {
            let case = reader.read().unwrap();
            assert_eq!(case.num(0), i as f64);
            assert_eq!(case.value(1), &str_value(&format!("s{i:03}").into_bytes()));
        }
        assert!(reader.read().is_none());
        assert!(!reader.destroy());
    }

    #[test]
    fn reader_from_sheet_supports_clone() {
        let sheet = Datasheet::from_reader(sample_reader(5));
        let mut reader = sheet.into_reader();
        reader.advance(2);
        let mut clone = reader.clone_reader();
        assert_eq!(reader.read().unwrap().num(0), 2.0);
        assert_eq!(clone.read().unwrap().num(0), 2.0);
    }

    #[test]
    fn built_from_scratch_and_spilled() {
        crate::settings::set_workspace(1024);
        let mut sheet = Datasheet::new();
        assert!(sheet.insert_column(0, Width::String(64), &str_value(&[b'x'; 64])));
        let proto = sheet.proto();
        let rows: Vec<Case> = (0..200)
            .map(|i| {
                Case::from_values(&proto, vec![str_value(&[b'a' + (i % 26) as u8; 64])])
            })
            .collect();
        assert!(sheet.insert_rows(0, &rows));
        assert_eq!(sheet.get_value(199, 0), Some(str_value(&[b'a' + 17; 64])));
        assert_eq!(sheet.get_value(0, 0), Some(str_value(&[b'a'; 64])));
        assert!(!sheet.error());
        crate::settings::set_workspace(64 * 1024 * 1024);
    }
}
