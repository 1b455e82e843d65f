//! Typed record streams: flat concatenations of [`crate::Record`] encodings
//! with end of file as the only delimiter.

pub mod reader;
pub mod writer;

pub use reader::RecordReader;
pub use writer::RecordWriter;
