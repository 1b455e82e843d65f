//! One-to-many reference resolution as a chain of sort-merge passes.
//!
//! 1. extract one [`Reference`] per edge from the referrers
//! 2. sort the edges by target key
//! 3. attach referred records to matching edges, dropping edges whose target
//!    does not exist
//! 4. sort the edges by source key
//! 5. group the edges per referrer and hand each group to
//!    [`ReferrerHandler::attach`] while copying the referrers to `dest`

pub mod reference;

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};

use crate::codec::{Dictionary, Record};
use crate::config::SortConfig;
use crate::diskio::{SpillDir, remove_spill};
use crate::error::Result;
use crate::sort::sort_file;
use crate::stream::{RecordReader, RecordWriter};

pub use reference::Reference;

/// Access to the referring side of a join.
pub trait ReferrerHandler<O, M> {
    /// Key of the referrer; referrers must be sorted ascending by it.
    fn key(&self, referrer: &O) -> i64;

    /// Keys of the referred records `referrer` points to.
    fn references(&self, referrer: &O) -> Vec<i64>;

    /// Receives every referenced record that exists, keyed by its key.
    fn attach(&self, referrer: &mut O, resolved: HashMap<i64, M>);
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResolveStats {
    pub referrers: u64,
    pub edges: u64,
    pub resolved_edges: u64,
    pub dropped_edges: u64,
    /// Referrers that received a non-empty mapping.
    pub attached: u64,
}

impl fmt::Display for ResolveStats {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "ResolveStats:")?;
        writeln!(f, "  Referrers: {} ({} attached)", self.referrers, self.attached)?;
        write!(
            f,
            "  Edges: {} ({} resolved, {} dropped)",
            self.edges, self.resolved_edges, self.dropped_edges
        )
    }
}

/// Writes every record of `referrers` to `dest`, in order, with the records
/// of `referred` it references attached through `handler`.
///
/// `referrers` must be sorted ascending by `handler.key` and `referred` by
/// `referred_key`. Referrers without resolvable references are written
/// unchanged; referred records nobody references are not written.
#[allow(clippy::too_many_arguments)]
pub fn resolve<O, M, K, H>(
    dest: impl AsRef<Path>,
    referrers: impl AsRef<Path>,
    referred: impl AsRef<Path>,
    temp_dir: impl AsRef<Path>,
    dict: Arc<Dictionary>,
    referred_key: K,
    handler: &H,
    config: &SortConfig,
) -> Result<ResolveStats>
where
    O: Record,
    M: Record + Clone,
    K: Fn(&M) -> i64,
    H: ReferrerHandler<O, M>,
{
    config.validate()?;
    let spill = SpillDir::new(temp_dir)?;
    let mut stats = ResolveStats::default();

    let references =
        extract::<O, M, H>(referrers.as_ref(), &spill, &dict, handler, config, &mut stats)?;
    sort_file::<Reference<M>, _>(
        &references,
        spill.path(),
        Arc::clone(&dict),
        Reference::<M>::by_target,
        config,
    )?;

    let resolved = attach_targets::<M, K>(
        &references,
        referred.as_ref(),
        &spill,
        &dict,
        &referred_key,
        config,
        &mut stats,
    )?;
    remove_spill(&references)?;

    sort_file::<Reference<M>, _>(
        &resolved,
        spill.path(),
        Arc::clone(&dict),
        Reference::<M>::by_source,
        config,
    )?;
    rejoin::<O, M, H>(
        dest.as_ref(),
        referrers.as_ref(),
        &resolved,
        &dict,
        handler,
        config,
        &mut stats,
    )?;
    remove_spill(&resolved)?;

    info!(
        referrers = stats.referrers,
        edges = stats.edges,
        dropped = stats.dropped_edges,
        "references resolved"
    );
    Ok(stats)
}

fn extract<O, M, H>(
    referrers: &Path,
    spill: &SpillDir,
    dict: &Arc<Dictionary>,
    handler: &H,
    config: &SortConfig,
    stats: &mut ResolveStats,
) -> Result<PathBuf>
where
    O: Record,
    M: Record,
    H: ReferrerHandler<O, M>,
{
    let (path, file) = spill.create("reference")?;
    let mut out = RecordWriter::<Reference<M>>::new(file, Arc::clone(dict), config.write_buffer_size);
    let mut input = RecordReader::<O>::open(referrers, Arc::clone(dict), config)?;
    while let Some(referrer) = input.next_record()? {
        let source_key = handler.key(&referrer);
        for target_key in handler.references(&referrer) {
            out.write(&Reference::unresolved(source_key, target_key))?;
        }
    }
    stats.referrers = input.records_read();
    stats.edges = out.finish()?;
    debug!(referrers = stats.referrers, edges = stats.edges, "extracted references");
    Ok(path)
}

fn attach_targets<M, K>(
    references: &Path,
    referred: &Path,
    spill: &SpillDir,
    dict: &Arc<Dictionary>,
    referred_key: &K,
    config: &SortConfig,
    stats: &mut ResolveStats,
) -> Result<PathBuf>
where
    M: Record + Clone,
    K: Fn(&M) -> i64,
{
    let (path, file) = spill.create("resolved")?;
    let mut out = RecordWriter::<Reference<M>>::new(file, Arc::clone(dict), config.write_buffer_size);
    let mut refs = RecordReader::<Reference<M>>::open(references, Arc::clone(dict), config)?;
    let mut targets = RecordReader::<M>::open(referred, Arc::clone(dict), config)?;
    let mut dropped = 0u64;

    while let Some(target) = targets.next_record()? {
        let key = referred_key(&target);
        loop {
            let Some(head) = refs.peek()? else {
                break;
            };
            if head.target_key > key {
                break;
            }
            let Some(mut reference) = refs.next_record()? else {
                break;
            };
            if reference.target_key < key {
                debug!(
                    source = reference.source_key,
                    target = reference.target_key,
                    "dropping unresolvable reference"
                );
                dropped += 1;
                continue;
            }
            reference.target = Some(target.clone());
            out.write(&reference)?;
        }
        if refs.peek()?.is_none() {
            break;
        }
    }
    while let Some(reference) = refs.next_record()? {
        debug!(
            source = reference.source_key,
            target = reference.target_key,
            "dropping unresolvable reference"
        );
        dropped += 1;
    }

    stats.resolved_edges = out.finish()?;
    stats.dropped_edges = dropped;
    debug!(resolved = stats.resolved_edges, dropped, "attached referred records");
    Ok(path)
}

/// Reads the next run of references sharing a source key.
fn next_group<M: Record>(
    refs: &mut RecordReader<Reference<M>>,
) -> Result<Option<(i64, HashMap<i64, M>)>> {
    let Some(first) = refs.next_record()? else {
        return Ok(None);
    };
    let source_key = first.source_key;
    let mut group = HashMap::new();
    let mut reference = first;
    loop {
        if let Some(target) = reference.target {
            group.insert(reference.target_key, target);
        }
        if !refs.peek()?.is_some_and(|next| next.source_key == source_key) {
            break;
        }
        match refs.next_record()? {
            Some(next) => reference = next,
            None => break,
        }
    }
    Ok(Some((source_key, group)))
}

fn rejoin<O, M, H>(
    dest: &Path,
    referrers: &Path,
    resolved: &Path,
    dict: &Arc<Dictionary>,
    handler: &H,
    config: &SortConfig,
    stats: &mut ResolveStats,
) -> Result<()>
where
    O: Record,
    M: Record + Clone,
    H: ReferrerHandler<O, M>,
{
    let mut refs = RecordReader::<Reference<M>>::open(resolved, Arc::clone(dict), config)?;
    let mut input = RecordReader::<O>::open(referrers, Arc::clone(dict), config)?;
    let mut out = RecordWriter::<O>::create(dest, Arc::clone(dict), config.write_buffer_size)?;

    let mut group = next_group(&mut refs)?;
    while let Some(mut referrer) = input.next_record()? {
        let key = handler.key(&referrer);
        while group.as_ref().is_some_and(|(source, _)| *source < key) {
            group = next_group(&mut refs)?;
        }
        // Referrers sharing a key all receive the same group.
        if let Some((_, mapping)) = group.as_ref().filter(|(source, _)| *source == key) {
            handler.attach(&mut referrer, mapping.clone());
            stats.attached += 1;
        }
        out.write(&referrer)?;
    }
    let written = out.finish()?;
    debug!(written, attached = stats.attached, "rejoined referrers");
    Ok(())
}
