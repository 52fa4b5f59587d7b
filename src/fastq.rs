//! Reading and writing of FASTQ records.
//!
//! Records are parsed as strict four-line units: a `@name` header, the
//! sequence, a `+comment` separator and the quality string. The reader
//! operates on any [`BufRead`] source; the [`create_fastq_reader`] and
//! [`create_fastq_writer`] functions layer gzip decompression/compression
//! on top of file streams based on the `.gz` extension.
//!
//! Example of reading a FASTQ file and counting the cumulative number of
//! bases:
//!
//! ```
//! # use trimfq::error::Result;
//! use trimfq::fastq::FastqReader;
//! use std::io::{self, BufReader};
//!
//! # fn main() -> Result<()> {
//! let mut reader = FastqReader::new(BufReader::new(io::stdin()));
//!
//! let mut number_of_records = 0;
//! let mut number_of_bases = 0;
//!
//! while let Some(record) = reader.read_next()? {
//!     number_of_records += 1;
//!     number_of_bases += record.len();
//! }
//!
//! println!("Number of reads: {}", number_of_records);
//! println!("Number of bases: {}", number_of_bases);
//! # Ok(())
//! # }
//! ```

use crate::error::{Result, TrimError};
use flate2::bufread::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{stdout, BufRead, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// The default quality encoding offset assumed when none is declared and
/// auto-detection is undetermined.
pub const DEFAULT_PHRED_OFFSET: u8 = 33;

/// A single sequenced read.
///
/// `name` is the full header text following the `@` marker, mate markers
/// included; `comment` is whatever followed the `+` separator. `head_pos`
/// records how many bases have been removed from the left of the original
/// sequence by trimming, starting at zero.
#[derive(Debug, Clone, PartialEq)]
pub struct FastqRecord {
    pub name: String,
    pub seq: String,
    pub comment: String,
    pub qual: String,
    pub phred_offset: u8,
    pub head_pos: usize,
}

impl FastqRecord {
    pub fn new(name: &str, seq: &str, comment: &str, qual: &str, phred_offset: u8) -> FastqRecord {
        FastqRecord {
            name: name.to_string(),
            seq: seq.to_string(),
            comment: comment.to_string(),
            qual: qual.to_string(),
            phred_offset,
            head_pos: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.seq.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seq.is_empty()
    }

    /// Numeric per-base qualities, recomputed on every call from the raw
    /// quality string and the encoding offset.
    pub fn quals(&self) -> Vec<i32> {
        let offset = self.phred_offset as i32;
        self.qual.bytes().map(|q| q as i32 - offset).collect()
    }

    /// A copy of this record restricted to the bases in `start..end`
    /// (0-based, end exclusive), with `head_pos` advanced accordingly.
    pub fn subread(&self, start: usize, end: usize) -> FastqRecord {
        FastqRecord {
            name: self.name.clone(),
            seq: self.seq[start..end].to_string(),
            comment: self.comment.clone(),
            qual: self.qual[start..end].to_string(),
            phred_offset: self.phred_offset,
            head_pos: self.head_pos + start,
        }
    }

    pub fn check(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(TrimError::MalformedRecord(
                "missing name for FASTQ record".to_string(),
            ));
        }

        if !self.seq.is_ascii() {
            return Err(TrimError::MalformedRecord(format!(
                "sequence contains non-ASCII character(s) for record: {}",
                self.name
            )));
        }

        if !self.qual.is_ascii() {
            return Err(TrimError::MalformedRecord(format!(
                "quality string contains non-ASCII character(s) for record: {}",
                self.name
            )));
        }

        if self.seq.len() != self.qual.len() {
            return Err(TrimError::MalformedRecord(format!(
                "sequence and quality lengths differ for record: {}",
                self.name
            )));
        }

        Ok(())
    }
}

pub struct FastqReader<R: BufRead> {
    reader: R,
    name: String,
    phred_offset: u8,
    line_count: u64,
}

impl<R: BufRead> FastqReader<R> {
    pub fn new(reader: R) -> Self {
        FastqReader::with_name(reader, "unnamed", DEFAULT_PHRED_OFFSET)
    }

    pub fn with_name(reader: R, name: &str, phred_offset: u8) -> Self {
        FastqReader {
            reader,
            name: name.to_string(),
            phred_offset,
            line_count: 0,
        }
    }

    pub fn set_phred_offset(&mut self, phred_offset: u8) {
        self.phred_offset = phred_offset;
    }

    fn read_next_line(&mut self, buffer: &mut String) -> Result<usize> {
        let number_of_bytes = self.reader.read_line(buffer)?;
        if number_of_bytes > 0 {
            self.line_count += 1;
        }
        if buffer.ends_with('\n') {
            buffer.pop();
            if buffer.ends_with('\r') {
                buffer.pop();
            }
        }
        Ok(number_of_bytes)
    }

    /// Reads the next record, returning `None` at the natural end of the
    /// stream. A record cut short by end of file is an error, not `None`.
    pub fn read_next(&mut self) -> Result<Option<FastqRecord>> {
        let mut header = String::new();
        if self.read_next_line(&mut header)? == 0 {
            return Ok(None);
        }

        if !header.starts_with('@') {
            return Err(TrimError::MalformedRecord(format!(
                "expected '@' character at beginning of line {}, {}",
                self.line_count, self.name
            )));
        }
        let name = header.split_off(1);

        let mut seq = String::new();
        if self.read_next_line(&mut seq)? == 0 {
            return Err(TrimError::MalformedRecord(format!(
                "missing sequence line for record: {}",
                name
            )));
        }

        let mut separator = String::new();
        if self.read_next_line(&mut separator)? == 0 {
            return Err(TrimError::MalformedRecord(format!(
                "missing comment line for record: {}",
                name
            )));
        }
        if !separator.starts_with('+') {
            return Err(TrimError::MalformedRecord(format!(
                "expected '+' character at beginning of line {}, {}",
                self.line_count, self.name
            )));
        }
        let comment = separator.split_off(1);

        let mut qual = String::new();
        if self.read_next_line(&mut qual)? == 0 {
            return Err(TrimError::MalformedRecord(format!(
                "missing quality line for record: {}",
                name
            )));
        }

        let record = FastqRecord {
            name,
            seq,
            comment,
            qual,
            phred_offset: self.phred_offset,
            head_pos: 0,
        };
        record.check()?;

        Ok(Some(record))
    }
}

pub struct FastqWriter<W: Write> {
    writer: BufWriter<W>,
}

impl<W: Write> FastqWriter<W> {
    pub fn new(writer: BufWriter<W>) -> Self {
        FastqWriter { writer }
    }

    pub fn write_fastq(&mut self, record: &FastqRecord) -> Result<()> {
        write_fastq(&mut self.writer, record).map_err(|error| {
            TrimError::Io(format!(
                "error writing FASTQ record {}: {}",
                record.name, error
            ))
        })
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}

/// A boxed writer that can be handed to an output sink thread.
pub type BoxedFastqWriter = FastqWriter<Box<dyn Write + Send>>;

fn write_fastq(writer: &mut dyn Write, record: &FastqRecord) -> std::io::Result<()> {
    writer.write_all(b"@")?;
    writer.write_all(record.name.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.write_all(record.seq.as_bytes())?;
    writer.write_all(b"\n+")?;
    writer.write_all(record.comment.as_bytes())?;
    writer.write_all(b"\n")?;
    writer.write_all(record.qual.as_bytes())?;
    writer.write_all(b"\n")?;
    Ok(())
}

/// Progress of consumption of an input file, measured in compressed bytes
/// underneath any gzip decoding so that it reflects actual file position.
#[derive(Clone)]
pub struct InputProgress {
    bytes_read: Arc<AtomicU64>,
    total_bytes: u64,
}

impl InputProgress {
    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    /// Percentage of the input consumed, 0-100.
    pub fn percent(&self) -> u8 {
        if self.total_bytes == 0 {
            return 100;
        }
        let bytes = self.bytes_read().min(self.total_bytes);
        ((bytes * 100) / self.total_bytes) as u8
    }
}

struct CountingReader<R: Read> {
    inner: R,
    bytes_read: Arc<AtomicU64>,
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let number_of_bytes = self.inner.read(buf)?;
        self.bytes_read
            .fetch_add(number_of_bytes as u64, Ordering::Relaxed);
        Ok(number_of_bytes)
    }
}

/// Opens a FASTQ file for reading, decompressing gzip content based on the
/// file extension, and returns the reader together with a handle reporting
/// how much of the file has been consumed.
pub fn create_fastq_reader(
    fastq_file: &Path,
    phred_offset: u8,
) -> Result<(FastqReader<BufReader<Box<dyn Read>>>, InputProgress)> {
    let fastq_file_name = match fastq_file.to_str() {
        Some(name) => String::from(name),
        None => {
            return Err(TrimError::Io(format!(
                "invalid file name for {:?}",
                fastq_file
            )))
        }
    };

    let file = File::open(fastq_file).map_err(|error| {
        TrimError::Io(format!(
            "error opening file {}: {}",
            fastq_file_name, error
        ))
    })?;

    let total_bytes = file.metadata()?.len();
    let bytes_read = Arc::new(AtomicU64::new(0));
    let progress = InputProgress {
        bytes_read: Arc::clone(&bytes_read),
        total_bytes,
    };

    let counting_reader = CountingReader {
        inner: file,
        bytes_read,
    };

    let reader: Box<dyn Read> = if fastq_file_name.ends_with(".gz") {
        Box::new(MultiGzDecoder::new(BufReader::with_capacity(
            64 * 1024,
            counting_reader,
        )))
    } else {
        Box::new(counting_reader)
    };

    let buffered_reader = BufReader::with_capacity(64 * 1024, reader);
    let fastq_reader =
        FastqReader::with_name(buffered_reader, fastq_file_name.as_str(), phred_offset);

    Ok((fastq_reader, progress))
}

/// Creates a FASTQ writer for the given output file, compressing with gzip
/// if the file name ends with `.gz`. Writes to standard output if no file
/// is given.
pub fn create_fastq_writer(output_file: &Option<PathBuf>) -> Result<BoxedFastqWriter> {
    let writer: Box<dyn Write + Send> = match output_file {
        Some(output_file) => {
            let output_filename = match output_file.to_str() {
                Some(name) => String::from(name),
                None => {
                    return Err(TrimError::Io(format!(
                        "invalid file name for {:?}",
                        output_file
                    )))
                }
            };
            let file = File::create(output_file).map_err(|error| {
                TrimError::Io(format!(
                    "error creating file {}: {}",
                    output_filename, error
                ))
            })?;
            if output_filename.ends_with(".gz") {
                Box::new(GzEncoder::new(file, Compression::fast()))
            } else {
                Box::new(file)
            }
        }
        None => Box::new(stdout()),
    };

    let buffered_writer = BufWriter::new(writer);
    let fastq_writer = FastqWriter::new(buffered_writer);

    Ok(fastq_writer)
}

/// Infers the quality encoding offset from a histogram of raw quality
/// characters, indexed by character code.
///
/// Characters in the range 33-58 can only occur with phred+33 encoding and
/// characters in the range 80-104 are taken as evidence of phred+64. If
/// exactly one of the two ranges is populated the corresponding offset is
/// returned; an empty or ambiguous histogram yields `None` and the caller
/// must fall back to a default or declared offset.
pub fn determine_phred_offset(histogram: &[u64; 256]) -> Option<u8> {
    let phred33_total: u64 = histogram[33..=58].iter().sum();
    let phred64_total: u64 = histogram[80..=104].iter().sum();

    if phred33_total == 0 && phred64_total > 0 {
        return Some(64);
    }

    if phred64_total == 0 && phred33_total > 0 {
        return Some(33);
    }

    None
}
