//! Trim paired-end FASTQ files through a chain of quality and length
//! trimming steps, splitting the output into paired and unpaired files.

use anyhow::{ensure, Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use log::info;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use structopt::StructOpt;
use trimfq::fastq::{create_fastq_writer, DEFAULT_PHRED_OFFSET};
use trimfq::pair::{PairReader, PairingValidator};
use trimfq::pipeline::{OutputSinks, TrimPipeline};
use trimfq::trim::parse_trimmers;

/// Configuration parameters specified as command-line options.
#[derive(StructOpt)]
#[structopt(
    about = "Trim paired-end FASTQ files through a chain of quality and length trimming steps."
)]
struct Config {
    /// Input FASTQ file for the first reads of each pair (may be gzipped).
    #[structopt(parse(from_os_str))]
    input1: PathBuf,

    /// Input FASTQ file for the second reads of each pair (may be gzipped).
    #[structopt(parse(from_os_str))]
    input2: PathBuf,

    /// Output FASTQ file for first reads whose mate also survived.
    #[structopt(parse(from_os_str))]
    output1_paired: PathBuf,

    /// Output FASTQ file for first reads whose mate was dropped.
    #[structopt(parse(from_os_str))]
    output1_unpaired: PathBuf,

    /// Output FASTQ file for second reads whose mate also survived.
    #[structopt(parse(from_os_str))]
    output2_paired: PathBuf,

    /// Output FASTQ file for second reads whose mate was dropped.
    #[structopt(parse(from_os_str))]
    output2_unpaired: PathBuf,

    /// Trimming steps to apply in order, e.g. LEADING:3 TRAILING:3
    /// SLIDINGWINDOW:4:15 MINLEN:36.
    steps: Vec<String>,

    /// The number of worker threads; defaults to the number of available
    /// processor cores.
    #[structopt(short, long)]
    threads: Option<usize>,

    /// The number of read pairs per unit of work handed to a worker thread.
    #[structopt(long, default_value = "1")]
    block_size: usize,

    /// The quality encoding offset, 33 or 64; 0 selects automatic detection
    /// from the first reads of the input.
    #[structopt(long, default_value = "0")]
    phred_offset: u8,

    /// File to which a log line is written for every read, giving the
    /// surviving length and the positions trimmed from either end.
    #[structopt(long, parse(from_os_str))]
    trim_log: Option<PathBuf>,

    /// Check that the reads of each pair have matching names and fail on
    /// the first mismatch.
    #[structopt(long)]
    validate_pairs: bool,
}

/// The number of read pairs examined when detecting the quality encoding.
const PHRED_DETECTION_PAIRS: usize = 1000;

fn main() -> Result<()> {
    env_logger::init();

    let config = Config::from_args();

    let threads = match config.threads {
        Some(threads) => threads,
        None => default_thread_count(),
    };

    ensure!(threads >= 1, "Invalid number of threads");
    ensure!(config.block_size >= 1, "Invalid block size");
    ensure!(
        config.phred_offset == 0 || config.phred_offset == 33 || config.phred_offset == 64,
        "Invalid quality encoding offset - must be 33, 64 or 0 for automatic detection"
    );

    let trimmers = parse_trimmers(&config.steps)?;
    for trimmer in &trimmers {
        info!("Using trimming step {}", trimmer.name());
    }

    let initial_offset = if config.phred_offset == 0 {
        DEFAULT_PHRED_OFFSET
    } else {
        config.phred_offset
    };

    let mut reader = PairReader::from_files(&config.input1, Some(&config.input2), initial_offset)?;

    if config.phred_offset == 0 {
        match reader.detect_phred_offset(PHRED_DETECTION_PAIRS)? {
            Some(offset) => info!("Quality encoding detected as phred+{}", offset),
            None => {
                info!(
                    "Unable to detect quality encoding, assuming phred+{}",
                    DEFAULT_PHRED_OFFSET
                );
                reader.set_phred_offset(DEFAULT_PHRED_OFFSET);
            }
        }
    }

    let trim_log = match &config.trim_log {
        Some(trim_log_file) => Some(create_trim_log_writer(trim_log_file)?),
        None => None,
    };

    let sinks = OutputSinks {
        paired1: create_fastq_writer(&Some(config.output1_paired.clone()))?,
        unpaired1: create_fastq_writer(&Some(config.output1_unpaired.clone()))?,
        paired2: create_fastq_writer(&Some(config.output2_paired.clone()))?,
        unpaired2: create_fastq_writer(&Some(config.output2_unpaired.clone()))?,
        trim_log,
    };

    let validator = PairingValidator;
    let validator = if config.validate_pairs {
        Some(&validator)
    } else {
        None
    };

    info!("Using {} worker thread(s)", threads);

    let mut pipeline = TrimPipeline::new(trimmers);
    pipeline.threads = threads;
    pipeline.block_size = config.block_size;

    let stats = pipeline.run(&mut reader, validator, sinks)?;

    println!("{}", stats.summary());

    Ok(())
}

/// The number of worker threads used when none is specified, one per
/// available processor core.
fn default_thread_count() -> usize {
    std::thread::available_parallelism()
        .map(|count| count.get())
        .unwrap_or(1)
}

/// Creates the trim log writer, compressing with gzip if the file name ends
/// with .gz.
fn create_trim_log_writer(trim_log_file: &PathBuf) -> Result<Box<dyn Write + Send>> {
    let file = File::create(trim_log_file)
        .with_context(|| format!("Error creating trim log file {:?}", trim_log_file))?;

    let writer: Box<dyn Write + Send> = match trim_log_file.to_str() {
        Some(name) if name.ends_with(".gz") => {
            Box::new(GzEncoder::new(file, Compression::default()))
        }
        _ => Box::new(BufWriter::new(file)),
    };

    Ok(writer)
}
