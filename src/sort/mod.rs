//! Deduplicating external merge sort.
//!
//! `run_generation` cuts the input into sorted, deduplicated runs;
//! `merge` combines them level by level until one file remains.

pub mod merge;
pub mod run;
pub mod run_generation;
pub mod sorter;

pub use merge::{KWayMerge, merge_two};
pub use run_generation::RunGenerationStats;
pub use sorter::{SortStats, sort_file};
