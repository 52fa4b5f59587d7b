//! Quality and length trimming steps.
//!
//! A trimming chain is an ordered list of [`Trimmer`] steps parsed from
//! specifications such as `LEADING:3` or `SLIDINGWINDOW:4:15`. Step names
//! and parameters are validated when the chain is built, never per read.
//! Each step consumes a read and produces either a shortened copy or
//! nothing at all: a read trimmed away completely, or shorter than the
//! `MINLEN` threshold, becomes absent rather than empty, which is what
//! routes its surviving mate to an unpaired output.

use crate::error::{Result, TrimError};
use crate::fastq::FastqRecord;
use crate::pair::{PairOutcome, ReadInfo, ReadPair};

/// A single trimming step.
#[derive(Debug, Clone, PartialEq)]
pub enum Trimmer {
    /// Truncate the read to at most the given length, cutting off the
    /// right end.
    Crop(usize),
    /// Remove bases from the left end while below the given quality.
    Leading(u8),
    /// Remove bases from the right end while below the given quality.
    Trailing(u8),
    /// Cut the read at the first window whose average quality drops below
    /// the threshold, then remove trailing bases below the threshold.
    SlidingWindow {
        required_quality: u8,
        window_length: usize,
    },
    /// Drop the read entirely if shorter than the given length.
    MinLen(usize),
}

impl Trimmer {
    /// Parses a step specification of the form `NAME:arg[:arg]`.
    pub fn parse(step: &str) -> Result<Trimmer> {
        let mut parts = step.split(':');
        let name = parts.next().unwrap_or("");
        let args: Vec<&str> = parts.collect();

        match name {
            "CROP" => Ok(Trimmer::Crop(parse_arg(step, &args, 0)?)),
            "LEADING" => Ok(Trimmer::Leading(parse_arg(step, &args, 0)?)),
            "TRAILING" => Ok(Trimmer::Trailing(parse_arg(step, &args, 0)?)),
            "SLIDINGWINDOW" => {
                let required_quality = parse_arg(step, &args, 0)?;
                let window_length: usize = parse_arg(step, &args, 1)?;
                if window_length == 0 {
                    return Err(TrimError::Configuration(format!(
                        "window length must be at least 1 in trimming step '{}'",
                        step
                    )));
                }
                Ok(Trimmer::SlidingWindow {
                    required_quality,
                    window_length,
                })
            }
            "MINLEN" => {
                let length: usize = parse_arg(step, &args, 0)?;
                if length == 0 {
                    return Err(TrimError::Configuration(format!(
                        "minimum length must be at least 1 in trimming step '{}'",
                        step
                    )));
                }
                Ok(Trimmer::MinLen(length))
            }
            _ => Err(TrimError::Configuration(format!(
                "unknown trimming step '{}'",
                name
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Trimmer::Crop(_) => "CROP",
            Trimmer::Leading(_) => "LEADING",
            Trimmer::Trailing(_) => "TRAILING",
            Trimmer::SlidingWindow { .. } => "SLIDINGWINDOW",
            Trimmer::MinLen(_) => "MINLEN",
        }
    }

    /// Applies this step to a single read, returning `None` if the read is
    /// dropped.
    pub fn process(&self, record: &FastqRecord) -> Option<FastqRecord> {
        match *self {
            Trimmer::Crop(length) => {
                if record.len() > length {
                    Some(record.subread(0, length))
                } else {
                    Some(record.clone())
                }
            }
            Trimmer::Leading(quality) => {
                let quals = record.quals();
                let threshold = quality as i32;
                match quals.iter().position(|&q| q >= threshold) {
                    Some(0) => Some(record.clone()),
                    Some(start) => Some(record.subread(start, record.len())),
                    None => None,
                }
            }
            Trimmer::Trailing(quality) => {
                let quals = record.quals();
                let threshold = quality as i32;
                match quals.iter().rposition(|&q| q >= threshold) {
                    Some(last) if last == record.len() - 1 => Some(record.clone()),
                    Some(last) => Some(record.subread(0, last + 1)),
                    None => None,
                }
            }
            Trimmer::SlidingWindow {
                required_quality,
                window_length,
            } => sliding_window(record, required_quality as i32, window_length),
            Trimmer::MinLen(length) => {
                if record.len() < length {
                    None
                } else {
                    Some(record.clone())
                }
            }
        }
    }
}

/// Scans left to right maintaining the total quality of the last
/// `window_length` bases. At the first window whose average falls below the
/// required quality the read is cut just before that window's final base,
/// and trailing bases below the threshold are then removed one at a time.
/// A read shorter than the window is judged on its whole-read average.
fn sliding_window(
    record: &FastqRecord,
    required_quality: i32,
    window_length: usize,
) -> Option<FastqRecord> {
    let quals = record.quals();
    let length = quals.len();

    if length < window_length {
        let total: i32 = quals.iter().sum();
        if total < required_quality * length as i32 {
            return None;
        }
        return Some(record.clone());
    }

    let required_total = required_quality * window_length as i32;
    let mut total: i32 = quals[..window_length].iter().sum();
    let mut keep = length;

    if total < required_total {
        keep = window_length - 1;
    } else {
        for i in window_length..length {
            total += quals[i] - quals[i - window_length];
            if total < required_total {
                keep = i;
                break;
            }
        }
    }

    if keep == length {
        // no window fell below the threshold
        return Some(record.clone());
    }

    while keep > 0 && quals[keep - 1] < required_quality {
        keep -= 1;
    }

    if keep == 0 {
        None
    } else {
        Some(record.subread(0, keep))
    }
}

/// Parses an ordered list of step specifications into a trimming chain.
pub fn parse_trimmers(steps: &[String]) -> Result<Vec<Trimmer>> {
    steps.iter().map(|step| Trimmer::parse(step)).collect()
}

fn parse_arg<T: std::str::FromStr>(step: &str, args: &[&str], index: usize) -> Result<T> {
    let arg = args.get(index).ok_or_else(|| {
        TrimError::Configuration(format!("missing parameter in trimming step '{}'", step))
    })?;
    arg.parse().map_err(|_| {
        TrimError::Configuration(format!(
            "invalid parameter '{}' in trimming step '{}'",
            arg, step
        ))
    })
}

fn process_read(
    trimmers: &[Trimmer],
    record: FastqRecord,
    info: &ReadInfo,
) -> Result<Option<FastqRecord>> {
    let mut current = Some(record);
    for trimmer in trimmers {
        let record = match current {
            Some(record) => record,
            None => break,
        };
        if record.seq.len() != record.qual.len() {
            return Err(TrimError::Transformation(format!(
                "inconsistent sequence and quality lengths for read {} in step {}",
                info.name,
                trimmer.name()
            )));
        }
        current = trimmer.process(&record);
    }
    Ok(current)
}

/// Runs a pair through the chain, each step seeing the previous step's
/// output, and captures the original read metadata needed downstream.
pub fn apply_trimmers(trimmers: &[Trimmer], pair: ReadPair) -> Result<PairOutcome> {
    let info1 = ReadInfo::of(&pair.read1);
    let info2 = pair.read2.as_ref().map(ReadInfo::of);

    let read1 = process_read(trimmers, pair.read1, &info1)?;
    let read2 = match pair.read2 {
        Some(record) => process_read(trimmers, record, info2.as_ref().unwrap())?,
        None => None,
    };

    Ok(PairOutcome {
        read1,
        read2,
        info1,
        info2,
    })
}
