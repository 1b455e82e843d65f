// Disk-backed sort, filter and join over typed record streams

pub mod codec;
pub mod config;
pub mod diskio;
pub mod error;
pub mod filter;
pub mod resolve;
pub mod sort;
pub mod stream;

// Export the main types
pub use codec::{Dictionary, Record};
pub use config::{ReadMode, ReaderConfig, SortConfig};
pub use diskio::DecoupledReader;
pub use error::{Error, Result};
pub use filter::{FilterMode, FilterStats, filter};
pub use resolve::{Reference, ReferrerHandler, ResolveStats, resolve};
pub use sort::{SortStats, merge_two, sort_file};
pub use stream::{RecordReader, RecordWriter};
