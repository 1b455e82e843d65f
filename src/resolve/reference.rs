use std::cmp::Ordering;
use std::io::{self, Read, Write};

use crate::codec::{Dictionary, Record};

/// One edge from a referrer to a referred record.
///
/// `target` stays `None` until the referred record has been attached.
#[derive(Debug, Clone, PartialEq)]
pub struct Reference<M> {
    pub source_key: i64,
    pub target_key: i64,
    pub target: Option<M>,
}

impl<M> Reference<M> {
    pub fn unresolved(source_key: i64, target_key: i64) -> Self {
        Self {
            source_key,
            target_key,
            target: None,
        }
    }

    /// Orders by `(target_key, source_key)`.
    pub fn by_target(a: &Self, b: &Self) -> Ordering {
        (a.target_key, a.source_key).cmp(&(b.target_key, b.source_key))
    }

    /// Orders by `(source_key, target_key)`.
    pub fn by_source(a: &Self, b: &Self) -> Ordering {
        (a.source_key, a.target_key).cmp(&(b.source_key, b.target_key))
    }
}

/// `[source_key: i64][target_key: i64][present: u8][target]?`
impl<M: Record> Record for Reference<M> {
    fn encode<W: Write + ?Sized>(&self, out: &mut W, dict: &Dictionary) -> io::Result<()> {
        self.source_key.encode(out, dict)?;
        self.target_key.encode(out, dict)?;
        self.target.encode(out, dict)
    }

    fn decode<R: Read + ?Sized>(input: &mut R, dict: &Dictionary) -> io::Result<Self> {
        Ok(Self {
            source_key: i64::decode(input, dict)?,
            target_key: i64::decode(input, dict)?,
            target: Option::<M>::decode(input, dict)?,
        })
    }
}
