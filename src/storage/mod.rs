pub mod ext_array;
pub mod tmpfile;
pub mod window;

pub mod error {
    use thiserror::Error;

    /// What the failing operation was doing, for error messages.
    #[derive(Debug, Clone, Copy)]
    pub enum Transfer {
        Read,
        Write,
    }

    #[derive(Debug, Error)]
    pub enum StorageError {
        #[error("temporary file I/O: {0}")]
        Io(#[from] std::io::Error),

        #[error("[{transfer:?}] short transfer at offset {offset}: {actual} of {expected} bytes")]
        Short {
            transfer: Transfer,
            offset: u64,
            expected: usize,
            actual: usize,
        },

        #[error("temporary file unavailable")]
        Unavailable,
    }
}
