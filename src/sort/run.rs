use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::codec::{Dictionary, Record};
use crate::config::SortConfig;
use crate::diskio::{SpillDir, remove_spill};
use crate::error::Result;
use crate::stream::{RecordReader, RecordWriter};

/// A sorted, deduplicated spill file owned by one sort invocation.
#[derive(Debug)]
pub struct Run {
    path: PathBuf,
    records: u64,
}

impl Run {
    /// Writes already sorted and deduplicated `records` to a new spill file.
    pub fn write<'a, T, I>(
        spill: &SpillDir,
        prefix: &str,
        records: I,
        dict: &Arc<Dictionary>,
        config: &SortConfig,
    ) -> Result<Self>
    where
        T: Record + 'a,
        I: IntoIterator<Item = &'a T>,
    {
        let mut writer = RunWriter::create(spill, prefix, dict, config)?;
        for record in records {
            writer.write(record)?;
        }
        writer.finish()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn open<T: Record>(&self, dict: &Arc<Dictionary>, config: &SortConfig) -> Result<RecordReader<T>> {
        RecordReader::open(&self.path, Arc::clone(dict), config)
    }

    pub fn remove(self) -> Result<()> {
        remove_spill(&self.path)
    }
}

/// Streams records into a fresh run file.
pub struct RunWriter<T> {
    path: PathBuf,
    writer: RecordWriter<T>,
}

impl<T: Record> RunWriter<T> {
    pub fn create(spill: &SpillDir, prefix: &str, dict: &Arc<Dictionary>, config: &SortConfig) -> Result<Self> {
        let (path, file) = spill.create(prefix)?;
        Ok(Self {
            path,
            writer: RecordWriter::new(file, Arc::clone(dict), config.write_buffer_size),
        })
    }

    pub fn write(&mut self, record: &T) -> Result<()> {
        self.writer.write(record)
    }

    pub fn finish(self) -> Result<Run> {
        let records = self.writer.finish()?;
        Ok(Run {
            path: self.path,
            records,
        })
    }
}
