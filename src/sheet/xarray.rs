//! A sparse, spillable 2-D byte array.
//!
//! Rows are fixed-width byte strings indexed by a 64-bit row number. Rows
//! never written read back as all-zero bytes and occupy no storage. Rows
//! live in memory up to a budget, past which the whole array migrates onto
//! an anonymous temp file; the set of written rows keeps sparseness across
//! the migration.
use std::collections::{BTreeMap, BTreeSet};

use log::trace;

use crate::storage::ext_array::ExtArray;

pub struct SparseXarray {
    width: usize,
    max_in_core: usize,
    mem: BTreeMap<u64, Box<[u8]>>,
    disk: Option<Disk>,
    error: bool,
}

struct Disk {
    array: ExtArray,
    written: BTreeSet<u64>,
}

impl SparseXarray {
    /// An empty array of `width`-byte rows that keeps up to `max_in_core`
    /// rows in memory.
    pub fn new(width: usize, max_in_core: usize) -> SparseXarray {
        SparseXarray {
            width,
            max_in_core,
            mem: BTreeMap::new(),
            disk: None,
            error: false,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn error(&self) -> bool {
        self.error
    }

    /// Whether `row` has ever been written.
    pub fn has_row(&self, row: u64) -> bool {
        match &self.disk {
            Some(disk) => disk.written.contains(&row),
            None => self.mem.contains_key(&row),
        }
    }

    /// The written row numbers, ascending.
    pub fn row_numbers(&self) -> Vec<u64> {
        match &self.disk {
            Some(disk) => disk.written.iter().copied().collect(),
            None => self.mem.keys().copied().collect(),
        }
    }

    /// Writes `data` into `row` at byte offset `ofs`. A row written for
    /// the first time is zero elsewhere.
    pub fn write(&mut self, row: u64, ofs: usize, data: &[u8]) -> bool {
        debug_assert!(ofs + data.len() <= self.width);
        if self.error {
            return false;
        }
        if let Some(disk) = &mut self.disk {
            // Unwritten file ranges read back as zeros, so a partial first
            // write needs no explicit zero fill.
            let start = row * self.width as u64 + ofs as u64;
            if !disk.array.write(start, data) {
                self.error = true;
                return false;
            }
            disk.written.insert(row);
            return true;
        }
        let width = self.width;
        let slot = self
            .mem
            .entry(row)
            .or_insert_with(|| vec![0; width].into_boxed_slice());
        slot[ofs..ofs + data.len()].copy_from_slice(data);
        if self.mem.len() > self.max_in_core {
            self.spill();
        }
        !self.error
    }

    /// Reads `buf.len()` bytes of `row` starting at byte offset `ofs`.
    /// Rows never written read as zeros.
    pub fn read(&mut self, row: u64, ofs: usize, buf: &mut [u8]) -> bool {
        debug_assert!(ofs + buf.len() <= self.width);
        if self.error {
            return false;
        }
        match &mut self.disk {
            Some(disk) => {
                if !disk.written.contains(&row) {
                    buf.fill(0);
                    return true;
                }
                let start = row * self.width as u64 + ofs as u64;
                if !disk.array.read(start, buf) {
                    self.error = true;
                    return false;
                }
                true
            }
            None => {
                match self.mem.get(&row) {
                    Some(slot) => buf.copy_from_slice(&slot[ofs..ofs + buf.len()]),
                    None => buf.fill(0),
                }
                true
            }
        }
    }

    /// Widens every row to `new_width` bytes, zero-padded on the right.
    pub fn resize(&mut self, new_width: usize) -> bool {
        debug_assert!(new_width >= self.width);
        if self.error {
            return false;
        }
        if new_width == self.width {
            return true;
        }
        if let Some(disk) = &mut self.disk {
            // Rewrite in descending row order: each row's destination lies
            // at or above its origin, so the untouched rows below survive.
            let old_width = self.width as u64;
            let mut buf = vec![0; new_width];
            for &row in disk.written.iter().rev() {
                if !disk.array.read(row * old_width, &mut buf[..self.width])
                    || !disk.array.write(row * new_width as u64, &buf)
                {
                    self.error = true;
                    return false;
                }
            }
        } else {
            for slot in self.mem.values_mut() {
                let mut wider = vec![0; new_width].into_boxed_slice();
                wider[..slot.len()].copy_from_slice(slot);
                *slot = wider;
            }
        }
        self.width = new_width;
        true
    }

    /// Drops the array, reporting whether it ever failed.
    pub fn destroy(self) -> bool {
        self.error
    }

    fn spill(&mut self) {
        trace!(
            "sparse array exceeds {} in-memory rows, spilling to disk",
            self.max_in_core
        );
        let mut array = ExtArray::new();
        let mut written = BTreeSet::new();
        for (&row, data) in &self.mem {
            if !array.write(row * self.width as u64, data) {
                self.error = true;
                break;
            }
            written.insert(row);
        }
        self.mem.clear();
        self.disk = Some(Disk { array, written });
    }
}
