#![allow(dead_code)]

use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::Arc;

use rand::seq::SliceRandom;
use sortjoin::{Dictionary, Record, RecordReader, RecordWriter, SortConfig};

pub fn no_dict() -> Arc<Dictionary> {
    Arc::new(Dictionary::empty())
}

pub fn write_records<T: Record>(path: &Path, records: &[T], dict: &Arc<Dictionary>) {
    let mut writer = RecordWriter::create(path, Arc::clone(dict), 64 * 1024).unwrap();
    for record in records {
        writer.write(record).unwrap();
    }
    assert_eq!(writer.finish().unwrap(), records.len() as u64);
}

pub fn read_records<T: Record>(path: &Path, dict: &Arc<Dictionary>) -> Vec<T> {
    RecordReader::<T>::open(path, Arc::clone(dict), &SortConfig::default().strict())
        .unwrap()
        .collect::<sortjoin::Result<_>>()
        .unwrap()
}

pub fn shuffled(count: i64) -> Vec<i64> {
    let mut values: Vec<i64> = (0..count).collect();
    values.shuffle(&mut rand::rng());
    values
}

pub fn assert_dir_empty(dir: &Path) {
    let leftovers: Vec<_> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert!(leftovers.is_empty(), "spill files left behind: {leftovers:?}");
}

/// A record whose order depends only on `key`; `tag` tells apart records
/// that compare equal.
#[derive(Debug, Clone, PartialEq)]
pub struct Tagged {
    pub key: i64,
    pub tag: String,
}

impl Tagged {
    pub fn new(key: i64, tag: impl Into<String>) -> Self {
        Self {
            key,
            tag: tag.into(),
        }
    }

    pub fn by_key(a: &Self, b: &Self) -> std::cmp::Ordering {
        a.key.cmp(&b.key)
    }
}

impl Record for Tagged {
    fn encode<W: Write + ?Sized>(&self, out: &mut W, dict: &Dictionary) -> io::Result<()> {
        self.key.encode(out, dict)?;
        self.tag.encode(out, dict)
    }

    fn decode<R: Read + ?Sized>(input: &mut R, dict: &Dictionary) -> io::Result<Self> {
        Ok(Self {
            key: i64::decode(input, dict)?,
            tag: String::decode(input, dict)?,
        })
    }
}
