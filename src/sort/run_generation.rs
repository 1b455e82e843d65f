//! Presort: cut the input into sorted, deduplicated runs.

use std::cmp::Ordering;
use std::mem::size_of;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::codec::{Dictionary, Record};
use crate::config::SortConfig;
use crate::diskio::SpillDir;
use crate::error::{Error, Result};
use crate::sort::run::Run;
use crate::stream::RecordReader;

#[derive(Clone, Debug, Default)]
pub struct RunGenerationStats {
    pub input_records: u64,
    pub num_runs: usize,
    /// Run size in effect when presort finished.
    pub run_size: usize,
    pub pressure_events: usize,
    pub time_ms: u128,
}

enum Presort {
    Done,
    /// The buffer for the next run could not be held; retry with a smaller run size.
    Pressure,
}

/// Streams `input` into runs of at most `config.run_size` records.
///
/// Each run is sorted with a stable sort and keeps the first of any records
/// comparing equal. When the presort buffer cannot be reserved, or its
/// estimated footprint exceeds `config.memory_limit`, the partial run is
/// abandoned, the run size halved and presort restarted from the first
/// record not yet committed to a run. Pressure at run size 1 is fatal.
pub fn generate_runs<T, F>(
    input: &Path,
    spill: &SpillDir,
    dict: &Arc<Dictionary>,
    cmp: &F,
    config: &SortConfig,
) -> Result<(Vec<Run>, RunGenerationStats)>
where
    T: Record,
    F: Fn(&T, &T) -> Ordering,
{
    let start = Instant::now();
    let mut stats = RunGenerationStats {
        run_size: config.run_size,
        ..Default::default()
    };
    let mut runs = Vec::new();

    loop {
        match presort::<T, F>(input, spill, dict, cmp, config, stats.run_size, &mut runs, &mut stats)? {
            Presort::Done => break,
            Presort::Pressure => {
                stats.pressure_events += 1;
                if stats.run_size <= 1 {
                    return Err(Error::ResourceExhausted { run_size: stats.run_size });
                }
                stats.run_size = (stats.run_size / 2).max(1);
                warn!(
                    run_size = stats.run_size,
                    committed = stats.input_records,
                    "memory pressure during presort, restarting with smaller runs"
                );
            }
        }
    }

    stats.num_runs = runs.len();
    stats.time_ms = start.elapsed().as_millis();
    debug!(
        runs = stats.num_runs,
        records = stats.input_records,
        run_size = stats.run_size,
        "presort finished"
    );
    Ok((runs, stats))
}

#[allow(clippy::too_many_arguments)]
fn presort<T, F>(
    input: &Path,
    spill: &SpillDir,
    dict: &Arc<Dictionary>,
    cmp: &F,
    config: &SortConfig,
    run_size: usize,
    runs: &mut Vec<Run>,
    stats: &mut RunGenerationStats,
) -> Result<Presort>
where
    T: Record,
    F: Fn(&T, &T) -> Ordering,
{
    let mut reader = RecordReader::<T>::open(input, Arc::clone(dict), config)?;
    for _ in 0..stats.input_records {
        if reader.next_record()?.is_none() {
            return Ok(Presort::Done);
        }
    }

    let mut buffer: Vec<T> = Vec::new();
    if buffer.try_reserve_exact(run_size).is_err() {
        return Ok(Presort::Pressure);
    }

    loop {
        let run_start = reader.bytes_read();
        while buffer.len() < run_size {
            let Some(record) = reader.next_record()? else {
                break;
            };
            buffer.push(record);
            if let Some(limit) = config.memory_limit {
                let encoded = (reader.bytes_read() - run_start) as usize;
                if buffer.len() * size_of::<T>() + encoded > limit {
                    return Ok(Presort::Pressure);
                }
            }
        }
        if buffer.is_empty() {
            return Ok(Presort::Done);
        }

        let consumed = buffer.len();
        buffer.sort_by(cmp);
        buffer.dedup_by(|later, earlier| cmp(&*later, &*earlier) == Ordering::Equal);
        let run = Run::write(spill, "run", buffer.iter(), dict, config)?;
        debug!(
            run = runs.len(),
            consumed,
            records = run.records(),
            path = %run.path().display(),
            "wrote run"
        );
        runs.push(run);
        stats.input_records += consumed as u64;

        if consumed < run_size {
            return Ok(Presort::Done);
        }
        buffer.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::RecordWriter;
    use tempfile::TempDir;

    fn write_input(dir: &Path, values: &[i64]) -> std::path::PathBuf {
        let path = dir.join("input.bin");
        let mut writer = RecordWriter::create(&path, Arc::new(Dictionary::empty()), 1024).unwrap();
        for v in values {
            writer.write(v).unwrap();
        }
        writer.finish().unwrap();
        path
    }

    fn read_run(run: &Run, dict: &Arc<Dictionary>) -> Vec<i64> {
        run.open::<i64>(dict, &SortConfig::default())
            .unwrap()
            .collect::<Result<_>>()
            .unwrap()
    }

    #[test]
    fn test_runs_are_sorted_and_deduplicated() {
        let dir = TempDir::new().unwrap();
        let spill = SpillDir::new(dir.path()).unwrap();
        let dict = Arc::new(Dictionary::empty());
        let input = write_input(dir.path(), &[5, 3, 5, 1, 9, 9, 2, 8, 7, 7]);

        let config = SortConfig::default().with_run_size(4);
        let (runs, stats) = generate_runs::<i64, _>(&input, &spill, &dict, &i64::cmp, &config).unwrap();

        assert_eq!(stats.input_records, 10);
        assert_eq!(stats.pressure_events, 0);
        assert_eq!(runs.len(), 3);
        assert_eq!(read_run(&runs[0], &dict), vec![1, 3, 5]);
        assert_eq!(read_run(&runs[1], &dict), vec![2, 8, 9]);
        assert_eq!(read_run(&runs[2], &dict), vec![7]);
    }

    #[test]
    fn test_memory_limit_halves_run_size() {
        let dir = TempDir::new().unwrap();
        let spill = SpillDir::new(dir.path()).unwrap();
        let dict = Arc::new(Dictionary::empty());
        let values: Vec<i64> = (0..100).rev().collect();
        let input = write_input(dir.path(), &values);

        // 16 bytes per i64 record against the estimate: room for 10.
        let config = SortConfig::default().with_run_size(64).with_memory_limit(160);
        let (runs, stats) = generate_runs::<i64, _>(&input, &spill, &dict, &i64::cmp, &config).unwrap();

        assert_eq!(stats.run_size, 8);
        assert_eq!(stats.pressure_events, 3);
        assert_eq!(stats.input_records, 100);
        let total: u64 = runs.iter().map(Run::records).sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn test_pressure_at_single_record_is_exhaustion() {
        let dir = TempDir::new().unwrap();
        let spill = SpillDir::new(dir.path()).unwrap();
        let dict = Arc::new(Dictionary::empty());
        let input = write_input(dir.path(), &[1, 2, 3]);

        let config = SortConfig::default().with_run_size(4).with_memory_limit(8);
        let err = generate_runs::<i64, _>(&input, &spill, &dict, &i64::cmp, &config).unwrap_err();
        assert!(matches!(err, Error::ResourceExhausted { run_size: 1 }));
    }
}
