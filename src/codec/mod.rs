//! Self-describing binary record codec.
//!
//! Record streams carry no header, framing or magic: each value writes
//! exactly what its [`Record`] impl emits. Integers are big-endian.

pub mod dictionary;

use std::io::{self, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

pub use dictionary::Dictionary;

/// A value that can be stored in a record stream.
///
/// Every call receives the dictionary active for the stream. Types without
/// string fields ignore it.
pub trait Record: Sized {
    fn encode<W: Write + ?Sized>(&self, out: &mut W, dict: &Dictionary) -> io::Result<()>;

    fn decode<R: Read + ?Sized>(input: &mut R, dict: &Dictionary) -> io::Result<Self>;
}

impl Record for i64 {
    fn encode<W: Write + ?Sized>(&self, out: &mut W, _dict: &Dictionary) -> io::Result<()> {
        out.write_i64::<BigEndian>(*self)
    }

    fn decode<R: Read + ?Sized>(input: &mut R, _dict: &Dictionary) -> io::Result<Self> {
        input.read_i64::<BigEndian>()
    }
}

impl Record for u64 {
    fn encode<W: Write + ?Sized>(&self, out: &mut W, _dict: &Dictionary) -> io::Result<()> {
        out.write_u64::<BigEndian>(*self)
    }

    fn decode<R: Read + ?Sized>(input: &mut R, _dict: &Dictionary) -> io::Result<Self> {
        input.read_u64::<BigEndian>()
    }
}

impl Record for i32 {
    fn encode<W: Write + ?Sized>(&self, out: &mut W, _dict: &Dictionary) -> io::Result<()> {
        out.write_i32::<BigEndian>(*self)
    }

    fn decode<R: Read + ?Sized>(input: &mut R, _dict: &Dictionary) -> io::Result<Self> {
        input.read_i32::<BigEndian>()
    }
}

impl Record for bool {
    fn encode<W: Write + ?Sized>(&self, out: &mut W, _dict: &Dictionary) -> io::Result<()> {
        out.write_u8(u8::from(*self))
    }

    fn decode<R: Read + ?Sized>(input: &mut R, _dict: &Dictionary) -> io::Result<Self> {
        match input.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(invalid_tag("bool", other)),
        }
    }
}

impl Record for String {
    fn encode<W: Write + ?Sized>(&self, out: &mut W, dict: &Dictionary) -> io::Result<()> {
        dict.write_str(out, self)
    }

    fn decode<R: Read + ?Sized>(input: &mut R, dict: &Dictionary) -> io::Result<Self> {
        dict.read_string(input)
    }
}

/// `[count: i32][element]*`
impl<T: Record> Record for Vec<T> {
    fn encode<W: Write + ?Sized>(&self, out: &mut W, dict: &Dictionary) -> io::Result<()> {
        let count = i32::try_from(self.len()).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "list longer than i32::MAX")
        })?;
        out.write_i32::<BigEndian>(count)?;
        for item in self {
            item.encode(out, dict)?;
        }
        Ok(())
    }

    fn decode<R: Read + ?Sized>(input: &mut R, dict: &Dictionary) -> io::Result<Self> {
        let count = input.read_i32::<BigEndian>()?;
        if count < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("negative list length {count}"),
            ));
        }
        let count = count as usize;
        let mut items = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            items.push(T::decode(input, dict)?);
        }
        Ok(items)
    }
}

/// `[present: u8][value]?`
impl<T: Record> Record for Option<T> {
    fn encode<W: Write + ?Sized>(&self, out: &mut W, dict: &Dictionary) -> io::Result<()> {
        match self {
            None => out.write_u8(0),
            Some(value) => {
                out.write_u8(1)?;
                value.encode(out, dict)
            }
        }
    }

    fn decode<R: Read + ?Sized>(input: &mut R, dict: &Dictionary) -> io::Result<Self> {
        match input.read_u8()? {
            0 => Ok(None),
            1 => Ok(Some(T::decode(input, dict)?)),
            other => Err(invalid_tag("option", other)),
        }
    }
}

fn invalid_tag(kind: &str, tag: u8) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("invalid {kind} tag {tag:#04x}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[derive(Debug, Clone, PartialEq)]
    struct Way {
        id: i64,
        tags: Vec<(String, String)>,
        nodes: Vec<i64>,
        closed: Option<bool>,
    }

    impl Record for Way {
        fn encode<W: Write + ?Sized>(&self, out: &mut W, dict: &Dictionary) -> io::Result<()> {
            self.id.encode(out, dict)?;
            out.write_i32::<BigEndian>(self.tags.len() as i32)?;
            for (k, v) in &self.tags {
                k.encode(out, dict)?;
                v.encode(out, dict)?;
            }
            self.nodes.encode(out, dict)?;
            self.closed.encode(out, dict)
        }

        fn decode<R: Read + ?Sized>(input: &mut R, dict: &Dictionary) -> io::Result<Self> {
            let id = i64::decode(input, dict)?;
            let tag_count = input.read_i32::<BigEndian>()?;
            let mut tags = Vec::new();
            for _ in 0..tag_count {
                tags.push((String::decode(input, dict)?, String::decode(input, dict)?));
            }
            Ok(Self {
                id,
                tags,
                nodes: Vec::decode(input, dict)?,
                closed: Option::decode(input, dict)?,
            })
        }
    }

    #[test]
    fn test_composite_record_round_trip_with_dictionary() {
        let dict = Dictionary::new(["highway", "residential", "name"]);
        let way = Way {
            id: -42,
            tags: vec![
                ("highway".into(), "residential".into()),
                ("name".into(), "Hauptstraße".into()),
            ],
            nodes: vec![7, 3, 11],
            closed: Some(false),
        };

        let mut bytes = Vec::new();
        way.encode(&mut bytes, &dict).unwrap();
        let decoded = Way::decode(&mut Cursor::new(&bytes), &dict).unwrap();
        assert_eq!(decoded, way);

        let mut plain = Vec::new();
        way.encode(&mut plain, &Dictionary::empty()).unwrap();
        assert!(bytes.len() < plain.len());
    }

    #[test]
    fn test_integers_are_big_endian() {
        let mut bytes = Vec::new();
        0x0102_0304_0506_0708_i64
            .encode(&mut bytes, &Dictionary::empty())
            .unwrap();
        assert_eq!(bytes, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_invalid_tags_are_rejected() {
        let dict = Dictionary::empty();
        let err = Option::<i64>::decode(&mut Cursor::new(vec![7u8]), &dict).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let err = bool::decode(&mut Cursor::new(vec![2u8]), &dict).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        let err = Vec::<i64>::decode(&mut Cursor::new(vec![0xFF; 4]), &dict).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
