use std::fs::File;
use std::io::{BufWriter, Write};
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;

use crate::codec::{Dictionary, Record};
use crate::error::Result;

/// Appends encoded records to a byte sink through a write buffer.
pub struct RecordWriter<T, W: Write = File> {
    out: BufWriter<W>,
    dict: Arc<Dictionary>,
    records: u64,
    _marker: PhantomData<fn(&T)>,
}

impl<T: Record> RecordWriter<T, File> {
    /// Creates (or truncates) `path`.
    pub fn create(path: impl AsRef<Path>, dict: Arc<Dictionary>, buffer_size: usize) -> Result<Self> {
        Ok(Self::new(File::create(path)?, dict, buffer_size))
    }
}

impl<T: Record, W: Write> RecordWriter<T, W> {
    pub fn new(sink: W, dict: Arc<Dictionary>, buffer_size: usize) -> Self {
        Self {
            out: BufWriter::with_capacity(buffer_size, sink),
            dict,
            records: 0,
            _marker: PhantomData,
        }
    }

    pub fn write(&mut self, record: &T) -> Result<()> {
        record.encode(&mut self.out, &self.dict)?;
        self.records += 1;
        Ok(())
    }

    /// Flushes and returns the number of records written.
    pub fn finish(self) -> Result<u64> {
        Ok(self.into_inner()?.1)
    }

    pub fn into_inner(self) -> Result<(W, u64)> {
        let sink = self.out.into_inner().map_err(|e| e.into_error())?;
        Ok((sink, self.records))
    }
}
