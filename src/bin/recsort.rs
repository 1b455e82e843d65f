use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{SeedableRng, rng};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use sortjoin::{
    Dictionary, FilterMode, ReadMode, RecordReader, RecordWriter, SortConfig, filter, merge_two,
    sort_file,
};

#[derive(Parser, Debug)]
#[command(name = "recsort", version, about = "External sort and filter for id record files")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Clone)]
struct StreamOpts {
    /// Fail on truncated or corrupt records instead of stopping there.
    #[arg(long)]
    strict: bool,
    #[arg(long, default_value_t = sortjoin::config::DEFAULT_RUN_SIZE)]
    run_size: usize,
    #[arg(long, default_value_t = sortjoin::config::DEFAULT_MERGE_FANIN)]
    fanin: usize,
    /// Byte budget for one presort buffer.
    #[arg(long)]
    memory_limit: Option<usize>,
}

impl StreamOpts {
    fn config(&self) -> SortConfig {
        let mut config = SortConfig::default()
            .with_run_size(self.run_size)
            .with_merge_fanin(self.fanin)
            .with_read_mode(if self.strict {
                ReadMode::Strict
            } else {
                ReadMode::Lenient
            });
        if let Some(limit) = self.memory_limit {
            config = config.with_memory_limit(limit);
        }
        config
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sort and deduplicate an id file in place.
    Sort {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        temp_dir: PathBuf,
        #[command(flatten)]
        opts: StreamOpts,
    },
    /// Keep (or with --blacklist drop) the ids of SOURCE listed in IDS.
    Filter {
        #[arg(long)]
        source: PathBuf,
        #[arg(long)]
        ids: PathBuf,
        #[arg(long)]
        dest: PathBuf,
        #[arg(long)]
        blacklist: bool,
        #[command(flatten)]
        opts: StreamOpts,
    },
    /// Merge two sorted id files into one, dropping duplicates.
    Merge {
        #[arg(long)]
        first: PathBuf,
        #[arg(long)]
        second: PathBuf,
        #[arg(long)]
        dest: PathBuf,
        #[command(flatten)]
        opts: StreamOpts,
    },
    /// Write the ids 0..COUNT in random order.
    Gen {
        #[arg(long)]
        output: PathBuf,
        #[arg(long)]
        count: i64,
        /// Write every id this many times.
        #[arg(long, default_value_t = 1)]
        repeat: usize,
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Print the ids of a file, one per line.
    Dump {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        strict: bool,
    },
}

fn run(command: Command) -> sortjoin::Result<()> {
    let dict = Arc::new(Dictionary::empty());
    match command {
        Command::Sort {
            input,
            temp_dir,
            opts,
        } => {
            let stats = sort_file::<i64, _>(&input, &temp_dir, dict, i64::cmp, &opts.config())?;
            println!("{stats}");
        }
        Command::Filter {
            source,
            ids,
            dest,
            blacklist,
            opts,
        } => {
            let mode = if blacklist {
                FilterMode::Blacklist
            } else {
                FilterMode::Whitelist
            };
            let stats = filter::<i64, _>(&source, &dest, &ids, mode, dict, |id| *id, &opts.config())?;
            info!(read = stats.read, written = stats.written, "filtered");
        }
        Command::Merge {
            first,
            second,
            dest,
            opts,
        } => {
            let written = merge_two::<i64, _>(&first, &second, &dest, dict, i64::cmp, &opts.config())?;
            info!(written, "merged");
        }
        Command::Gen {
            output,
            count,
            repeat,
            seed,
        } => {
            let mut ids: Vec<i64> = (0..count)
                .flat_map(|id| std::iter::repeat(id).take(repeat))
                .collect();
            match seed {
                Some(seed) => ids.shuffle(&mut StdRng::seed_from_u64(seed)),
                None => ids.shuffle(&mut rng()),
            }
            let mut writer = RecordWriter::<i64>::create(&output, dict, 1 << 20)?;
            for id in &ids {
                writer.write(id)?;
            }
            let written = writer.finish()?;
            info!(written, output = %output.display(), "generated ids");
        }
        Command::Dump {
            input,
            limit,
            strict,
        } => {
            let mut config = SortConfig::default();
            if strict {
                config = config.strict();
            }
            let reader = RecordReader::<i64>::open(&input, dict, &config)?;
            let stdout = std::io::stdout();
            let mut out = BufWriter::new(stdout.lock());
            for id in reader.take(limit.unwrap_or(usize::MAX)) {
                writeln!(out, "{}", id?)?;
            }
            out.flush()?;
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive(
                "sortjoin=info"
                    .parse()
                    .unwrap_or_else(|_| tracing::Level::INFO.into()),
            ),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(%err, "recsort failed");
            ExitCode::FAILURE
        }
    }
}
