//! Sort-merge filtering of a record stream against a sorted id list.

use std::cmp::Ordering;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::codec::{Dictionary, Record};
use crate::config::SortConfig;
use crate::error::Result;
use crate::stream::{RecordReader, RecordWriter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    /// Keep records whose key is in the id list.
    Whitelist,
    /// Keep records whose key is not in the id list.
    Blacklist,
}

impl FilterMode {
    fn keeps_listed(self) -> bool {
        self == FilterMode::Whitelist
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterStats {
    /// Source records consumed. A whitelist pass stops once the id list is
    /// exhausted, so this can be less than the source length.
    pub read: u64,
    pub written: u64,
}

/// Writes to `dest` the records of `source` selected by `mode` against the
/// `i64` records of `ids`.
///
/// Both inputs must be sorted ascending, `source` by `key`. One forward pass
/// over each; source order is kept and every source record is written at
/// most once.
pub fn filter<T, K>(
    source: impl AsRef<Path>,
    dest: impl AsRef<Path>,
    ids: impl AsRef<Path>,
    mode: FilterMode,
    dict: Arc<Dictionary>,
    key: K,
    config: &SortConfig,
) -> Result<FilterStats>
where
    T: Record,
    K: Fn(&T) -> i64,
{
    config.validate()?;
    let mut records = RecordReader::<T>::open(source.as_ref(), Arc::clone(&dict), config)?;
    let mut ids = RecordReader::<i64>::open(ids.as_ref(), Arc::clone(&dict), config)?;
    let mut out = RecordWriter::<T>::create(dest.as_ref(), dict, config.write_buffer_size)?;

    loop {
        let Some(id) = ids.peek()?.copied() else {
            break;
        };
        let Some(record) = records.peek()? else {
            break;
        };
        match key(record).cmp(&id) {
            Ordering::Less => {
                if let Some(record) = records.next_record()? {
                    if !mode.keeps_listed() {
                        out.write(&record)?;
                    }
                }
            }
            Ordering::Equal => {
                if let Some(record) = records.next_record()? {
                    if mode.keeps_listed() {
                        out.write(&record)?;
                    }
                }
            }
            Ordering::Greater => {
                ids.next_record()?;
            }
        }
    }

    if !mode.keeps_listed() {
        while let Some(record) = records.next_record()? {
            out.write(&record)?;
        }
    }

    let stats = FilterStats {
        read: records.records_read(),
        written: out.finish()?,
    };
    debug!(?mode, read = stats.read, written = stats.written, "filter finished");
    Ok(stats)
}
