use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};

use readix::{IndexPaths, LoaderConfig, PairedFastq, Policy, ReadIndex, ReadRef};

#[derive(Parser)]
#[command(name = "readix")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Paired-end short-read prefix index", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Index paired FASTQ reads
    Index(IndexArgs),
    /// Find the reads starting with k-mers on either strand
    Query(QueryArgs),
    /// Summarize an index
    Stats(StatsArgs),
}

#[derive(Parser)]
struct IndexArgs {
    /// Index name, written to <NAME>.odx/
    name: PathBuf,

    /// Forward FASTQ file (interleaved pairs without a reverse file, unless --single)
    forward: PathBuf,

    /// Reverse FASTQ file
    reverse: Option<PathBuf>,

    /// Indexed read length (default: length of the first pair)
    #[arg(short, long)]
    length: Option<usize>,

    /// Maximum number of reads to index (0 = all)
    #[arg(short, long, default_value = "0")]
    max_reads: usize,

    /// Number of leading pairs to skip
    #[arg(short, long, default_value = "0")]
    skip: usize,

    /// Memory budget of the read arena in MB (default: estimated from the inputs)
    #[arg(long, value_name = "MB")]
    memory: Option<usize>,

    /// Handling of non-ACGT bases [clip, ignore, break, random, a, c, g, t]
    #[arg(short, long, default_value = "clip")]
    policy: Policy,

    /// Number of bases cut from the 5' end of every read
    #[arg(long = "5-prime-trim", value_name = "N", default_value = "0")]
    five_prime_trim: usize,

    /// Hard clip reads at their first base scoring Q or less (0 = no clipping)
    #[arg(long = "3-prime-quality", value_name = "Q", default_value = "0")]
    quality_cut: u8,

    /// Quality encoding offset
    #[arg(long = "quality-encoding-offset", default_value = "33")]
    quality_offset: u8,

    /// Index single-end reads, pairing each read with its reverse complement
    #[arg(long, conflicts_with = "reverse")]
    single: bool,

    /// Drop pairs whose read names do not match
    #[arg(long)]
    check_pairing: bool,
}
impl IndexArgs {
    fn config(&self) -> LoaderConfig {
        let mut config = LoaderConfig::default()
            .skip(self.skip)
            .max_reads(self.max_reads)
            .policy(self.policy)
            .five_prime_trim(self.five_prime_trim)
            .quality_cut(self.quality_cut)
            .quality_offset(self.quality_offset)
            .single(self.single)
            .check_pairing(self.check_pairing);
        if let Some(length) = self.length {
            config = config.read_length(length);
        }
        if let Some(mb) = self.memory {
            config = config.memory(mb << 20);
        }
        config
    }
}

#[derive(Parser)]
struct QueryArgs {
    /// Index name
    name: PathBuf,

    /// Queries, at least 8 bases each
    #[arg(required = true)]
    kmers: Vec<String>,

    /// Number of bases of each query to match (default: the whole query)
    #[arg(short, long)]
    length: Option<usize>,

    /// List every matching read with its mate instead of counts
    #[arg(short, long)]
    all: bool,

    /// Number of threads (0 = auto-detect)
    #[arg(short = 't', long, default_value = "0")]
    threads: usize,
}

#[derive(Parser)]
struct StatsArgs {
    /// Index name
    name: PathBuf,
}

fn run_index(args: &IndexArgs) -> Result<()> {
    let paths = IndexPaths::from_name(&args.name);
    let fastq = PairedFastq::from_paths(&args.forward, args.reverse.as_ref(), args.config())?;
    let (arena, stats) = fastq.load()?;
    if arena.is_empty() {
        bail!("no read pair of the input could be indexed");
    }
    if stats.pairs_bad_ids > 0 {
        info!(pairs = stats.pairs_bad_ids, "dropped pairs with mismatched read names");
    }
    info!(pairs = stats.pairs_loaded, "indexing reads");
    let index = ReadIndex::build(arena)?;
    index.save(&paths)?;
    info!("index written to {}", paths.header.display());
    Ok(())
}

fn run_query(args: &QueryArgs) -> Result<()> {
    let index = ReadIndex::load(&IndexPaths::from_name(&args.name))?;
    let mut out = io::BufWriter::new(io::stdout().lock());

    if args.all {
        for kmer in &args.kmers {
            let length = args.length.unwrap_or(kmer.len());
            for read in index.read_ids(kmer.as_bytes(), length)? {
                let mate = index.mate(read)?;
                writeln!(
                    out,
                    "{kmer}\t{read}\t{}\t{mate}\t{}",
                    index.get_sequence(read, 0, index.read_size())?,
                    index.get_sequence(mate, 0, index.read_size())?,
                )?;
            }
        }
    } else {
        let keys: Vec<&[u8]> = args.kmers.iter().map(|k| k.as_bytes()).collect();
        let length = args
            .length
            .unwrap_or_else(|| keys.iter().map(|k| k.len()).min().unwrap_or(0));
        let counts = index.count_batch(&keys, length, args.threads)?;
        for (kmer, counts) in args.kmers.iter().zip(counts) {
            let first = counts
                .first()
                .map_or_else(|| "-".to_string(), |r: ReadRef| r.to_string());
            writeln!(
                out,
                "{kmer}\t{}\t{}\t{first}",
                counts.forward.count, counts.reverse.count
            )?;
        }
    }
    out.flush()?;
    Ok(())
}

fn run_stats(args: &StatsArgs) -> Result<()> {
    let index = ReadIndex::load(&IndexPaths::from_name(&args.name))?;
    let arena = index.arena();
    let [a, c, t, g] = arena.letter_count();
    let total = (a + c + t + g).max(1) as f64;
    let used_buckets = |table: &[u32]| {
        let mut ends = table.iter().skip(1).copied().chain([arena.read_count() as u32]);
        table
            .iter()
            .filter(|&&start| ends.next().is_some_and(|end| end > start))
            .count()
    };

    let mut out = io::stdout().lock();
    writeln!(out, "reads\t{}", arena.read_count())?;
    writeln!(out, "read_size\t{}", arena.read_size())?;
    writeln!(out, "record_size\t{}", arena.record_size())?;
    writeln!(
        out,
        "composition\tA={:.3}\tC={:.3}\tG={:.3}\tT={:.3}",
        a as f64 / total,
        c as f64 / total,
        g as f64 / total,
        t as f64 / total
    )?;
    writeln!(out, "forward_buckets\t{}", used_buckets(arena.index1()))?;
    writeln!(out, "reverse_buckets\t{}", used_buckets(arena.index2()))?;
    Ok(())
}

fn run(cli: &Cli) -> Result<()> {
    match &cli.command {
        Commands::Index(args) => run_index(args),
        Commands::Query(args) => run_query(args),
        Commands::Stats(args) => run_stats(args),
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            let code = e.downcast_ref::<readix::Error>().map_or(2, readix::Error::exit_code);
            ExitCode::from(code as u8)
        }
    }
}

#[cfg(test)]
mod testing {
    use super::*;

    #[test]
    fn test_index_args() -> Result<()> {
        let cli = Cli::try_parse_from([
            "readix", "index", "sample", "reads.fq", "--5-prime-trim", "3", "--3-prime-quality", "2",
            "--single", "--check-pairing",
        ])?;
        let Commands::Index(args) = cli.command else {
            bail!("expected the index command");
        };
        let config = args.config();
        assert_eq!(config.five_prime_trim, 3);
        assert_eq!(config.quality_cut, 2);
        assert_eq!(config.quality_offset, 33);
        assert!(config.single && config.check_pairing);

        let conflicting = Cli::try_parse_from(["readix", "index", "sample", "r1.fq", "r2.fq", "--single"]);
        assert!(conflicting.is_err());
        Ok(())
    }
}
