//! Random-offset byte I/O over one anonymous temporary file.
//!
//! An [`ExtArray`] is the lowest storage layer: a single temp file, a cached
//! cursor position, and the direction of the last transfer. The cursor cache
//! lets consecutive same-direction transfers at advancing offsets skip the
//! seek (some platforms flush buffers on any seek, even one to the current
//! position).
//!
//! Errors are sticky: the first failed transfer puts the array into a
//! permanent error state and every later operation fails fast. Callers
//! report the failure by tainting whatever owns the array.
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use log::warn;

use super::error::{StorageError, Transfer};

pub struct ExtArray {
    file: Option<File>,
    pos: u64,
    last_op: Option<Transfer>,
    error: bool,
}

impl ExtArray {
    /// Opens an anonymous temp file. Creation failure is not reported here;
    /// it leaves the array in the error state, observable via [`error`]
    /// (and every transfer on it fails).
    ///
    /// [`error`]: ExtArray::error
    pub fn new() -> ExtArray {
        match tempfile::tempfile() {
            Ok(file) => ExtArray {
                file: Some(file),
                pos: 0,
                last_op: None,
                error: false,
            },
            Err(err) => {
                warn!("failed to create temporary file: {err}");
                ExtArray {
                    file: None,
                    pos: 0,
                    last_op: None,
                    error: true,
                }
            }
        }
    }

    /// Reads `buf.len()` bytes at `offset`. Returns false (and enters the
    /// error state) on any I/O failure or short read.
    pub fn read(&mut self, offset: u64, buf: &mut [u8]) -> bool {
        if self.error {
            return false;
        }
        if let Err(err) = self.transfer(Transfer::Read, offset, buf.len(), |file, buf_pos| {
            match file.read(&mut buf[buf_pos..]) {
                Ok(n) => Ok(n),
                Err(e) => Err(e),
            }
        }) {
            warn!("temporary file read failed at offset {offset}: {err}");
            self.error = true;
            return false;
        }
        true
    }

    /// Writes `buf` at `offset`. Returns false (and enters the error state)
    /// on any I/O failure or short write.
    pub fn write(&mut self, offset: u64, buf: &[u8]) -> bool {
        if self.error {
            return false;
        }
        if let Err(err) = self.transfer(Transfer::Write, offset, buf.len(), |file, buf_pos| {
            match file.write(&buf[buf_pos..]) {
                Ok(n) => Ok(n),
                Err(e) => Err(e),
            }
        }) {
            warn!("temporary file write failed at offset {offset}: {err}");
            self.error = true;
            return false;
        }
        true
    }

    /// Whether the array has ever failed.
    pub fn error(&self) -> bool {
        self.error
    }

    /// Closes the file, reporting whether the array was ever put into an
    /// error state.
    pub fn destroy(self) -> bool {
        self.error
    }

    fn transfer<F>(
        &mut self,
        op: Transfer,
        offset: u64,
        len: usize,
        mut step: F,
    ) -> Result<(), StorageError>
    where
        F: FnMut(&mut File, usize) -> std::io::Result<usize>,
    {
        let file = self.file.as_mut().ok_or(StorageError::Unavailable)?;

        // Skip the seek only when both the cursor and the transfer
        // direction match.
        let aligned = self.pos == offset && matches!((self.last_op, op), (Some(Transfer::Read), Transfer::Read) | (Some(Transfer::Write), Transfer::Write));
        if !aligned {
            file.seek(SeekFrom::Start(offset))?;
        }
        self.pos = offset;
        self.last_op = Some(op);

        let mut done = 0;
        while done < len {
            match step(file, done) {
                Ok(0) => {
                    return Err(StorageError::Short {
                        transfer: op,
                        offset,
                        expected: len,
                        actual: done,
                    });
                }
                Ok(n) => {
                    done += n;
                    self.pos += n as u64;
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

impl Default for ExtArray {
    fn default() -> Self {
        ExtArray::new()
    }
}
