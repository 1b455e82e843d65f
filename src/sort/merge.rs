//! Merging of sorted, deduplicated record streams.
//!
//! Both merges here keep the record from the earliest input when heads
//! compare equal. Since runs are merged in input order, that record is also
//! the first occurrence in the original input.

use std::cmp::Ordering;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::codec::{Dictionary, Record};
use crate::config::SortConfig;
use crate::error::Result;
use crate::stream::{RecordReader, RecordWriter};

struct HeapEntry<T> {
    record: T,
    stream_idx: usize,
}

/// K-way merge over sorted record streams using a manual min-heap.
///
/// Ties between equal records are broken by stream index, so the stream
/// passed first wins.
pub struct KWayMerge<T, F> {
    heap: Vec<HeapEntry<T>>,
    streams: Vec<RecordReader<T>>,
    cmp: F,
}

impl<T, F> KWayMerge<T, F>
where
    T: Record,
    F: Fn(&T, &T) -> Ordering,
{
    /// Seeds the heap with the head of every non-empty stream.
    pub fn new(mut streams: Vec<RecordReader<T>>, cmp: F) -> Result<Self> {
        let mut heap = Vec::with_capacity(streams.len());
        for (stream_idx, stream) in streams.iter_mut().enumerate() {
            if let Some(record) = stream.next_record()? {
                heap.push(HeapEntry { record, stream_idx });
            }
        }

        let mut me = Self { heap, streams, cmp };
        if me.heap.len() > 1 {
            let last_internal = (me.heap.len() / 2).saturating_sub(1);
            for i in (0..=last_internal).rev() {
                me.sift_down(i);
            }
        }
        Ok(me)
    }

    #[inline]
    fn heap_less(&self, i: usize, j: usize) -> bool {
        match (self.cmp)(&self.heap[i].record, &self.heap[j].record) {
            Ordering::Less => true,
            Ordering::Greater => false,
            Ordering::Equal => self.heap[i].stream_idx < self.heap[j].stream_idx,
        }
    }

    fn sift_down(&mut self, mut pos: usize) {
        let len = self.heap.len();
        loop {
            let left = 2 * pos + 1;
            if left >= len {
                break;
            }
            let right = left + 1;
            let mut smallest = left;
            if right < len && self.heap_less(right, left) {
                smallest = right;
            }
            if !self.heap_less(smallest, pos) {
                break;
            }
            self.heap.swap(pos, smallest);
            pos = smallest;
        }
    }

    fn sift_up(&mut self, mut pos: usize) {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if !self.heap_less(pos, parent) {
                break;
            }
            self.heap.swap(pos, parent);
            pos = parent;
        }
    }

    fn heap_pop(&mut self) -> Option<HeapEntry<T>> {
        if self.heap.is_empty() {
            return None;
        }
        let last = self.heap.len() - 1;
        self.heap.swap(0, last);
        let entry = self.heap.pop();
        if !self.heap.is_empty() {
            self.sift_down(0);
        }
        entry
    }

    fn heap_push(&mut self, entry: HeapEntry<T>) {
        self.heap.push(entry);
        let pos = self.heap.len() - 1;
        self.sift_up(pos);
    }

    /// Next record in merge order, duplicates included.
    pub fn next_record(&mut self) -> Result<Option<T>> {
        let Some(HeapEntry { record, stream_idx }) = self.heap_pop() else {
            return Ok(None);
        };
        if let Some(next) = self.streams[stream_idx].next_record()? {
            self.heap_push(HeapEntry {
                record: next,
                stream_idx,
            });
        }
        Ok(Some(record))
    }

    /// Next record in merge order with every later record comparing equal
    /// to it dropped.
    pub fn next_deduped(&mut self) -> Result<Option<T>> {
        let Some(best) = self.next_record()? else {
            return Ok(None);
        };
        while self
            .heap
            .first()
            .is_some_and(|head| (self.cmp)(&best, &head.record) == Ordering::Equal)
        {
            self.next_record()?;
        }
        Ok(Some(best))
    }

    /// Writes the deduplicated merge to `out`; returns records written.
    pub fn drain_into<W: Write>(mut self, out: &mut RecordWriter<T, W>) -> Result<u64> {
        let mut written = 0;
        while let Some(record) = self.next_deduped()? {
            out.write(&record)?;
            written += 1;
        }
        Ok(written)
    }
}

/// Two-way merge of deduplicated streams. On equal heads the record from
/// `first` is written and the one from `second` dropped.
pub(crate) fn merge_two_streams<T, F, W>(
    mut first: RecordReader<T>,
    mut second: RecordReader<T>,
    out: &mut RecordWriter<T, W>,
    cmp: &F,
) -> Result<u64>
where
    T: Record,
    F: Fn(&T, &T) -> Ordering,
    W: Write,
{
    let mut written = 0;
    loop {
        let order = match (first.peek()?, second.peek()?) {
            (Some(a), Some(b)) => cmp(a, b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => break,
        };
        let record = match order {
            Ordering::Less => first.next_record()?,
            Ordering::Greater => second.next_record()?,
            Ordering::Equal => {
                second.next_record()?;
                first.next_record()?
            }
        };
        if let Some(record) = record {
            out.write(&record)?;
            written += 1;
        }
    }
    Ok(written)
}

/// Merges two sorted, deduplicated record files into `dest`.
///
/// Records comparing equal across the inputs are written once, taken from
/// `first`. Returns the number of records written.
pub fn merge_two<T, F>(
    first: impl AsRef<Path>,
    second: impl AsRef<Path>,
    dest: impl AsRef<Path>,
    dict: Arc<Dictionary>,
    cmp: F,
    config: &SortConfig,
) -> Result<u64>
where
    T: Record,
    F: Fn(&T, &T) -> Ordering,
{
    config.validate()?;
    let a = RecordReader::open(first.as_ref(), Arc::clone(&dict), config)?;
    let b = RecordReader::open(second.as_ref(), Arc::clone(&dict), config)?;
    let mut out = RecordWriter::create(dest.as_ref(), dict, config.write_buffer_size)?;
    let written = merge_two_streams(a, b, &mut out, &cmp)?;
    out.finish()?;
    debug!(written, dest = %dest.as_ref().display(), "two-way merge finished");
    Ok(written)
}
