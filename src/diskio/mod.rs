pub mod decoupled;
pub mod spill;

pub use decoupled::DecoupledReader;
pub use spill::{SpillDir, remove_spill, replace_file};
