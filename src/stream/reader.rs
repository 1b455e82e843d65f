use std::fs::File;
use std::io::{self, BufReader, Read};
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::codec::{Dictionary, Record};
use crate::config::{ReadMode, SortConfig};
use crate::diskio::DecoupledReader;
use crate::error::{Error, Result};

/// Byte source that tracks its offset and can probe for end of input
/// without losing the probed byte.
struct Tracked<R> {
    inner: R,
    offset: u64,
    pending: Option<u8>,
}

impl<R: Read> Tracked<R> {
    fn new(inner: R) -> Self {
        Self {
            inner,
            offset: 0,
            pending: None,
        }
    }

    fn at_eof(&mut self) -> io::Result<bool> {
        if self.pending.is_some() {
            return Ok(false);
        }
        let mut byte = [0u8; 1];
        loop {
            match self.inner.read(&mut byte) {
                Ok(0) => return Ok(true),
                Ok(_) => {
                    self.pending = Some(byte[0]);
                    return Ok(false);
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
    }
}

impl<R: Read> Read for Tracked<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if let Some(byte) = self.pending.take() {
            buf[0] = byte;
            self.offset += 1;
            return Ok(1);
        }
        let n = self.inner.read(buf)?;
        self.offset += n as u64;
        Ok(n)
    }
}

/// Lazily decodes a stream of `T` in file order, one record ahead.
///
/// The underlying [`DecoupledReader`] is closed as soon as the stream ends.
/// In [`ReadMode::Lenient`] a record that fails to decode ends the stream
/// (logged at `warn`); in [`ReadMode::Strict`] it raises [`Error::Decode`].
/// An error from the byte source itself is always returned as [`Error::Io`].
pub struct RecordReader<T> {
    input: Option<Tracked<BufReader<DecoupledReader>>>,
    dict: Arc<Dictionary>,
    mode: ReadMode,
    next: Option<T>,
    next_end: u64,
    records: u64,
    bytes: u64,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Record> RecordReader<T> {
    pub fn open(path: impl AsRef<Path>, dict: Arc<Dictionary>, config: &SortConfig) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "opening record stream");
        Self::from_reader(File::open(path)?, dict, config)
    }

    pub fn from_reader<R>(source: R, dict: Arc<Dictionary>, config: &SortConfig) -> Result<Self>
    where
        R: Read + Send + 'static,
    {
        let decoupled = DecoupledReader::new(source, &config.reader)?;
        let buffered = BufReader::with_capacity(config.reader.chunk_size, decoupled);
        Ok(Self {
            input: Some(Tracked::new(buffered)),
            dict,
            mode: config.read_mode,
            next: None,
            next_end: 0,
            records: 0,
            bytes: 0,
            _marker: PhantomData,
        })
    }

    /// The record the next call to [`Self::next_record`] will return.
    pub fn peek(&mut self) -> Result<Option<&T>> {
        self.fill()?;
        Ok(self.next.as_ref())
    }

    pub fn next_record(&mut self) -> Result<Option<T>> {
        self.fill()?;
        let record = self.next.take();
        if record.is_some() {
            self.records += 1;
            self.bytes = self.next_end;
        }
        Ok(record)
    }

    /// Records handed out so far.
    pub fn records_read(&self) -> u64 {
        self.records
    }

    /// Encoded size of the records handed out so far.
    pub fn bytes_read(&self) -> u64 {
        self.bytes
    }

    /// Stops the background reader early. Dropping the reader does the same
    /// but can only log a failure.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn fill(&mut self) -> Result<()> {
        if self.next.is_some() {
            return Ok(());
        }
        let Some(input) = self.input.as_mut() else {
            return Ok(());
        };

        let start = input.offset;
        let decoded = match input.at_eof() {
            Ok(true) => None,
            Ok(false) => Some(T::decode(input, &self.dict)),
            Err(err) => Some(Err(err)),
        };

        match decoded {
            Some(Ok(record)) => {
                self.next = Some(record);
                self.next_end = self.input.as_ref().map_or(start, |input| input.offset);
                Ok(())
            }
            None => {
                debug!(records = self.records, bytes = start, "record stream exhausted");
                self.shutdown()
            }
            Some(Err(source)) if !is_decode_failure(&source) => {
                if let Err(err) = self.shutdown() {
                    warn!(%err, "failed to close record stream after read error");
                }
                Err(Error::Io(source))
            }
            Some(Err(source)) => match self.mode {
                ReadMode::Lenient => {
                    warn!(
                        offset = start,
                        records = self.records,
                        error = %source,
                        "undecodable record, truncating stream"
                    );
                    self.shutdown()
                }
                ReadMode::Strict => {
                    if let Err(err) = self.shutdown() {
                        warn!(%err, "failed to close record stream after decode error");
                    }
                    Err(Error::Decode {
                        offset: start,
                        source,
                    })
                }
            },
        }
    }

    fn shutdown(&mut self) -> Result<()> {
        match self.input.take() {
            Some(input) => input.inner.into_inner().close(),
            None => Ok(()),
        }
    }
}

/// Truncated or malformed bytes, as opposed to a failing source.
fn is_decode_failure(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::UnexpectedEof | io::ErrorKind::InvalidData
    )
}

impl<T: Record> Iterator for RecordReader<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}
