use std::cmp::Ordering;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info};

use crate::codec::{Dictionary, Record};
use crate::config::SortConfig;
use crate::diskio::{SpillDir, replace_file};
use crate::error::Result;
use crate::sort::merge::{KWayMerge, merge_two_streams};
use crate::sort::run::{Run, RunWriter};
use crate::sort::run_generation::{RunGenerationStats, generate_runs};
use crate::stream::RecordWriter;

/// Statistics about one [`sort_file`] call.
#[derive(Clone, Debug, Default)]
pub struct SortStats {
    pub run_gen_stats: RunGenerationStats,
    pub output_records: u64,
    /// Intermediate passes before the final merge.
    pub merge_passes: usize,
    pub merge_time_ms: u128,
}

impl SortStats {
    pub fn input_records(&self) -> u64 {
        self.run_gen_stats.input_records
    }

    pub fn duplicates_removed(&self) -> u64 {
        self.input_records().saturating_sub(self.output_records)
    }
}

impl fmt::Display for SortStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let rg = &self.run_gen_stats;
        writeln!(f, "SortStats:")?;
        writeln!(f, "  Input records: {}", rg.input_records)?;
        writeln!(
            f,
            "  Output records: {} ({} duplicates removed)",
            self.output_records,
            self.duplicates_removed()
        )?;
        writeln!(f, "  Number of runs: {}", rg.num_runs)?;
        writeln!(f, "  (R) time: {} ms", rg.time_ms)?;
        if rg.pressure_events > 0 {
            writeln!(
                f,
                "  (R) memory pressure: {} restarts, final run size {}",
                rg.pressure_events, rg.run_size
            )?;
        }
        writeln!(f, "  (M) passes: {}", self.merge_passes)?;
        write!(f, "  (M) time: {} ms", self.merge_time_ms)
    }
}

/// Sorts and deduplicates the record file at `path` in place.
///
/// Spill files go to `temp_dir`, which must exist. The sorted result is
/// written to a spill file and only renamed over `path` once complete, so
/// `path` is never observed half sorted. Of several records comparing equal,
/// the one appearing first in the input is kept.
///
/// On error the spill files written so far are left in `temp_dir`.
pub fn sort_file<T, F>(
    path: impl AsRef<Path>,
    temp_dir: impl AsRef<Path>,
    dict: Arc<Dictionary>,
    cmp: F,
    config: &SortConfig,
) -> Result<SortStats>
where
    T: Record,
    F: Fn(&T, &T) -> Ordering,
{
    config.validate()?;
    let path = path.as_ref();
    let spill = SpillDir::new(temp_dir)?;
    debug!(path = %path.display(), run_size = config.run_size, "sorting record file");

    let (mut runs, run_gen_stats) = generate_runs::<T, F>(path, &spill, &dict, &cmp, config)?;

    let merge_start = Instant::now();
    let mut merge_passes = 0;
    while runs.len() > config.merge_fanin {
        runs = merge_pass::<T, F>(runs, &spill, &dict, &cmp, config)?;
        merge_passes += 1;
        debug!(pass = merge_passes, runs = runs.len(), "merge pass finished");
    }
    let output_records = finish::<T, F>(runs, path, &spill, &dict, &cmp, config)?;

    let stats = SortStats {
        run_gen_stats,
        output_records,
        merge_passes,
        merge_time_ms: merge_start.elapsed().as_millis(),
    };
    info!(
        path = %path.display(),
        input = stats.input_records(),
        output = stats.output_records,
        runs = stats.run_gen_stats.num_runs,
        "sort finished"
    );
    Ok(stats)
}

/// Merges consecutive groups of up to `merge_fanin` runs, keeping run order.
fn merge_pass<T, F>(
    runs: Vec<Run>,
    spill: &SpillDir,
    dict: &Arc<Dictionary>,
    cmp: &F,
    config: &SortConfig,
) -> Result<Vec<Run>>
where
    T: Record,
    F: Fn(&T, &T) -> Ordering,
{
    let mut merged = Vec::with_capacity(runs.len().div_ceil(config.merge_fanin));
    let mut remaining = runs.into_iter().peekable();
    while remaining.peek().is_some() {
        let batch: Vec<Run> = remaining.by_ref().take(config.merge_fanin).collect();
        if batch.len() == 1 {
            merged.extend(batch);
            continue;
        }

        let streams = batch
            .iter()
            .map(|run| run.open::<T>(dict, config))
            .collect::<Result<Vec<_>>>()?;
        let mut out = RunWriter::create(spill, "merge", dict, config)?;
        let mut merge = KWayMerge::new(streams, cmp)?;
        while let Some(record) = merge.next_deduped()? {
            out.write(&record)?;
        }
        drop(merge);
        merged.push(out.finish()?);

        for run in batch {
            run.remove()?;
        }
    }
    Ok(merged)
}

/// Produces the final output from at most `merge_fanin` runs and moves it
/// over `path`.
fn finish<T, F>(
    runs: Vec<Run>,
    path: &Path,
    spill: &SpillDir,
    dict: &Arc<Dictionary>,
    cmp: &F,
    config: &SortConfig,
) -> Result<u64>
where
    T: Record,
    F: Fn(&T, &T) -> Ordering,
{
    if runs.len() == 1 {
        let records = runs[0].records();
        for run in runs {
            replace_file(run.path(), path)?;
        }
        return Ok(records);
    }

    let (out_path, file) = spill.create("sorted")?;
    let mut out = RecordWriter::<T>::new(file, Arc::clone(dict), config.write_buffer_size);
    match runs.len() {
        0 => {}
        2 => {
            let first = runs[0].open::<T>(dict, config)?;
            let second = runs[1].open::<T>(dict, config)?;
            merge_two_streams(first, second, &mut out, cmp)?;
        }
        _ => {
            let streams = runs
                .iter()
                .map(|run| run.open::<T>(dict, config))
                .collect::<Result<Vec<_>>>()?;
            KWayMerge::new(streams, cmp)?.drain_into(&mut out)?;
        }
    }
    let records = out.finish()?;

    for run in runs {
        run.remove()?;
    }
    replace_file(&out_path, path)?;
    Ok(records)
}
