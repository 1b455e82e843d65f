//! String dictionary codec.
//!
//! A string is written either verbatim as `[len: i32 BE][utf-8 bytes]`, or,
//! when it is one of the dictionary entries, as the single negative `i32`
//! `-(position + 1)`. Writer and reader of a stream must use dictionaries
//! with identical ordering.

use std::collections::HashMap;
use std::io::{self, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dictionary {
    entries: Vec<String>,
    lookup: HashMap<String, i32>,
}

impl Dictionary {
    /// A dictionary with no entries; every string is written verbatim.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a dictionary from `words` in iteration order. Repeated words
    /// keep their first position.
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut dict = Self::default();
        for word in words {
            let word = word.into();
            if dict.lookup.contains_key(&word) {
                continue;
            }
            let code = -(dict.entries.len() as i32) - 1;
            dict.lookup.insert(word.clone(), code);
            dict.entries.push(word);
        }
        dict
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<&str> {
        self.entries.get(position).map(String::as_str)
    }

    pub fn write_str<W: Write + ?Sized>(&self, out: &mut W, value: &str) -> io::Result<()> {
        if let Some(code) = self.lookup.get(value) {
            return out.write_i32::<BigEndian>(*code);
        }
        let bytes = value.as_bytes();
        let len = i32::try_from(bytes.len()).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "string longer than i32::MAX bytes")
        })?;
        out.write_i32::<BigEndian>(len)?;
        out.write_all(bytes)
    }

    pub fn read_string<R: Read + ?Sized>(&self, input: &mut R) -> io::Result<String> {
        let len = input.read_i32::<BigEndian>()?;
        if len < 0 {
            let position = (-(len as i64) - 1) as usize;
            return self.get(position).map(str::to_owned).ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "dictionary reference {} outside dictionary of {} entries",
                        position,
                        self.len()
                    ),
                )
            });
        }

        // Bounded read: a corrupt length must not trigger a huge allocation.
        let len = len as usize;
        let mut bytes = Vec::new();
        (&mut *input).take(len as u64).read_to_end(&mut bytes)?;
        if bytes.len() != len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("string truncated after {} of {} bytes", bytes.len(), len),
            ));
        }
        String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}
