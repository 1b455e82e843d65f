//! Tunables for the sort, filter and resolve passes.

use std::time::Duration;

use crate::error::{Error, Result};

/// Records per presorted run when nothing else is configured.
pub const DEFAULT_RUN_SIZE: usize = 50_000;

/// Maximum number of runs merged in one k-way merge.
pub const DEFAULT_MERGE_FANIN: usize = 32;

/// How a record stream reacts to bytes it cannot decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadMode {
    /// Treat any decode failure as end of stream and log it.
    #[default]
    Lenient,
    /// Only a clean end of input at a record boundary ends the stream;
    /// truncated or corrupt records raise [`Error::Decode`].
    Strict,
}

/// Sizing of the background-filled ring buffer behind every record reader.
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    /// Ring buffer capacity in bytes.
    pub buffer_size: usize,
    /// Bytes the producer pulls per source read. The consumer also waits for
    /// at most this many bytes before copying out.
    pub chunk_size: usize,
    /// How often a blocked consumer wakes to re-check producer liveness.
    pub poll_interval: Duration,
    /// Upper bound on `close()`. `None` waits for the producer forever.
    pub close_timeout: Option<Duration>,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1 << 20,
            chunk_size: 1 << 16,
            poll_interval: Duration::from_secs(1),
            close_timeout: Some(Duration::from_secs(30)),
        }
    }
}

impl ReaderConfig {
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_close_timeout(mut self, close_timeout: Option<Duration>) -> Self {
        self.close_timeout = close_timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.buffer_size == 0 || self.chunk_size == 0 {
            return Err(Error::InvalidConfig(
                "reader buffer and chunk size must be non-zero".into(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(Error::InvalidConfig("reader poll interval must be non-zero".into()));
        }
        if self.chunk_size > self.buffer_size {
            return Err(Error::InvalidConfig(format!(
                "chunk size {} exceeds ring buffer size {}",
                self.chunk_size, self.buffer_size
            )));
        }
        Ok(())
    }
}

/// Configuration shared by [`crate::sort_file`], [`crate::filter`] and
/// [`crate::resolve`].
#[derive(Debug, Clone)]
pub struct SortConfig {
    pub run_size: usize,
    pub merge_fanin: usize,
    /// Byte budget for one presort buffer. A run whose estimated footprint
    /// exceeds it is handled like an allocation failure.
    pub memory_limit: Option<usize>,
    pub read_mode: ReadMode,
    pub reader: ReaderConfig,
    pub write_buffer_size: usize,
}

impl Default for SortConfig {
    fn default() -> Self {
        Self {
            run_size: DEFAULT_RUN_SIZE,
            merge_fanin: DEFAULT_MERGE_FANIN,
            memory_limit: None,
            read_mode: ReadMode::Lenient,
            reader: ReaderConfig::default(),
            write_buffer_size: 1 << 20,
        }
    }
}

impl SortConfig {
    pub fn with_run_size(mut self, run_size: usize) -> Self {
        self.run_size = run_size;
        self
    }

    pub fn with_merge_fanin(mut self, merge_fanin: usize) -> Self {
        self.merge_fanin = merge_fanin;
        self
    }

    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    pub fn with_read_mode(mut self, read_mode: ReadMode) -> Self {
        self.read_mode = read_mode;
        self
    }

    pub fn strict(self) -> Self {
        self.with_read_mode(ReadMode::Strict)
    }

    pub fn with_reader(mut self, reader: ReaderConfig) -> Self {
        self.reader = reader;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.run_size == 0 {
            return Err(Error::InvalidConfig("run size must be at least 1".into()));
        }
        if self.merge_fanin < 2 {
            return Err(Error::InvalidConfig(format!(
                "merge fan-in must be at least 2, got {}",
                self.merge_fanin
            )));
        }
        if self.write_buffer_size == 0 {
            return Err(Error::InvalidConfig("write buffer size must be non-zero".into()));
        }
        self.reader.validate()
    }
}
