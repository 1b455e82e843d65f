//! Error types shared by the sort, filter and resolve passes.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Any failure reading or writing a record stream or spill file.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A record could not be decoded and the stream was opened in strict mode.
    #[error("decode error at byte offset {offset}: {source}")]
    Decode {
        offset: u64,
        #[source]
        source: io::Error,
    },

    /// Presort could not make progress even with a run size of one record.
    #[error("memory exhausted while presorting (run size {run_size})")]
    ResourceExhausted { run_size: usize },

    /// The background reader did not shut down in time and was abandoned.
    #[error("background reader did not stop within {0:?}; thread abandoned")]
    ReaderClose(std::time::Duration),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("temporary directory does not exist: {0}")]
    MissingTempDir(PathBuf),
}

pub type Result<T> = std::result::Result<T, Error>;
