//! Paired-end reading of FASTQ records.
//!
//! A [`PairReader`] pulls co-located records from two mate streams (or one,
//! for single-end data) and always holds one fully parsed pair as lookahead,
//! so [`PairReader::has_next`] is O(1) and never blocks on a partial record.
//! Reaching the end of either stream ends the pair stream; streams ending at
//! different record counts are reported as desynchronized input.
//!
//! While records are parsed a histogram of raw quality characters is
//! accumulated, from which the quality encoding offset can be inferred
//! before any numeric qualities are consumed (see
//! [`PairReader::detect_phred_offset`]).

use crate::error::{Result, TrimError};
use crate::fastq::{
    create_fastq_reader, determine_phred_offset, FastqReader, FastqRecord, InputProgress,
};
use std::collections::VecDeque;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

/// Two co-located records from the mate streams. `read2` is `None` only in
/// single-end mode; a pair from two mate streams always has both on intake.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadPair {
    pub read1: FastqRecord,
    pub read2: Option<FastqRecord>,
}

/// Identity and original length of an input read, retained for statistics
/// and trim log reporting after the read itself may have been dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadInfo {
    pub name: String,
    pub original_length: usize,
}

impl ReadInfo {
    pub fn of(record: &FastqRecord) -> ReadInfo {
        ReadInfo {
            name: record.name.clone(),
            original_length: record.len(),
        }
    }
}

/// The result of running one pair through the trimming chain: zero, one or
/// two surviving reads plus the metadata of the original inputs. Consumers
/// share outcomes read-only; none mutates them.
#[derive(Debug, Clone, PartialEq)]
pub struct PairOutcome {
    pub read1: Option<FastqRecord>,
    pub read2: Option<FastqRecord>,
    pub info1: ReadInfo,
    pub info2: Option<ReadInfo>,
}

pub struct PairReader<R: BufRead> {
    reader1: FastqReader<R>,
    reader2: Option<FastqReader<R>>,
    lookahead: Option<ReadPair>,
    buffered: VecDeque<ReadPair>,
    phred_offset: u8,
    qual_histogram: Box<[u64; 256]>,
    progress1: Option<InputProgress>,
    progress2: Option<InputProgress>,
    at_eof: bool,
    pairs_parsed: u64,
}

impl PairReader<BufReader<Box<dyn Read>>> {
    /// Opens one or two FASTQ files for paired reading, decompressing gzip
    /// content based on the file extension.
    pub fn from_files(
        fastq_file1: &Path,
        fastq_file2: Option<&Path>,
        phred_offset: u8,
    ) -> Result<Self> {
        let (reader1, progress1) = create_fastq_reader(fastq_file1, phred_offset)?;
        let (reader2, progress2) = match fastq_file2 {
            Some(fastq_file2) => {
                let (reader, progress) = create_fastq_reader(fastq_file2, phred_offset)?;
                (Some(reader), Some(progress))
            }
            None => (None, None),
        };
        PairReader::create(reader1, reader2, phred_offset, Some(progress1), progress2)
    }
}

impl<R: BufRead> PairReader<R> {
    /// Wraps already-opened record readers, e.g. over in-memory buffers.
    pub fn from_readers(
        reader1: FastqReader<R>,
        reader2: Option<FastqReader<R>>,
        phred_offset: u8,
    ) -> Result<Self> {
        PairReader::create(reader1, reader2, phred_offset, None, None)
    }

    fn create(
        mut reader1: FastqReader<R>,
        mut reader2: Option<FastqReader<R>>,
        phred_offset: u8,
        progress1: Option<InputProgress>,
        progress2: Option<InputProgress>,
    ) -> Result<Self> {
        reader1.set_phred_offset(phred_offset);
        if let Some(reader2) = reader2.as_mut() {
            reader2.set_phred_offset(phred_offset);
        }

        let mut pair_reader = PairReader {
            reader1,
            reader2,
            lookahead: None,
            buffered: VecDeque::new(),
            phred_offset,
            qual_histogram: Box::new([0; 256]),
            progress1,
            progress2,
            at_eof: false,
            pairs_parsed: 0,
        };
        pair_reader.parse_one()?;
        Ok(pair_reader)
    }

    pub fn is_paired(&self) -> bool {
        self.reader2.is_some()
    }

    pub fn phred_offset(&self) -> u8 {
        self.phred_offset
    }

    pub fn quality_histogram(&self) -> &[u64; 256] {
        &self.qual_histogram
    }

    /// Whether another pair is available. O(1): the next pair is already
    /// parsed and held.
    pub fn has_next(&self) -> bool {
        !self.buffered.is_empty() || self.lookahead.is_some()
    }

    /// Hands back the held pair and eagerly parses the following one. An
    /// error parsing the following pair surfaces from this call.
    pub fn next_pair(&mut self) -> Result<ReadPair> {
        if let Some(pair) = self.buffered.pop_front() {
            return Ok(pair);
        }

        let pair = self.lookahead.take().ok_or_else(|| {
            TrimError::Transformation("attempt to read past end of pair stream".to_string())
        })?;
        self.parse_one()?;
        Ok(pair)
    }

    fn parse_one(&mut self) -> Result<()> {
        self.lookahead = None;
        if self.at_eof {
            return Ok(());
        }

        let record1 = self.reader1.read_next()?;

        let pair = match self.reader2.as_mut() {
            Some(reader2) => {
                let record2 = reader2.read_next()?;
                match (record1, record2) {
                    (Some(read1), Some(read2)) => ReadPair {
                        read1,
                        read2: Some(read2),
                    },
                    (None, None) => {
                        self.at_eof = true;
                        return Ok(());
                    }
                    (Some(read1), None) => {
                        return Err(TrimError::UnpairedInput(format!(
                            "read {} has no mate, second input exhausted after {} pairs",
                            read1.name, self.pairs_parsed
                        )));
                    }
                    (None, Some(read2)) => {
                        return Err(TrimError::UnpairedInput(format!(
                            "read {} has no mate, first input exhausted after {} pairs",
                            read2.name, self.pairs_parsed
                        )));
                    }
                }
            }
            None => match record1 {
                Some(read1) => ReadPair { read1, read2: None },
                None => {
                    self.at_eof = true;
                    return Ok(());
                }
            },
        };

        self.accumulate_histogram(&pair);
        self.pairs_parsed += 1;
        self.lookahead = Some(pair);
        Ok(())
    }

    fn accumulate_histogram(&mut self, pair: &ReadPair) {
        for q in pair.read1.qual.bytes() {
            self.qual_histogram[q as usize] += 1;
        }
        if let Some(read2) = &pair.read2 {
            for q in read2.qual.bytes() {
                self.qual_histogram[q as usize] += 1;
            }
        }
    }

    /// Pre-reads up to `max_pairs` pairs, infers the quality encoding offset
    /// from the accumulated histogram and, if determined, re-stamps the
    /// buffered records with it. Buffered pairs are replayed in order by
    /// [`next_pair`](PairReader::next_pair), so nothing is lost.
    ///
    /// Returns `None` when the histogram is ambiguous or empty, in which
    /// case the declared or default offset remains in effect.
    pub fn detect_phred_offset(&mut self, max_pairs: usize) -> Result<Option<u8>> {
        while self.buffered.len() < max_pairs && self.lookahead.is_some() {
            let pair = self.lookahead.take().unwrap();
            self.buffered.push_back(pair);
            self.parse_one()?;
        }

        let detected = determine_phred_offset(&self.qual_histogram);
        if let Some(offset) = detected {
            self.set_phred_offset(offset);
        }
        Ok(detected)
    }

    /// Changes the quality encoding offset for all subsequently parsed
    /// records and re-stamps any records already held.
    pub fn set_phred_offset(&mut self, phred_offset: u8) {
        self.phred_offset = phred_offset;
        self.reader1.set_phred_offset(phred_offset);
        if let Some(reader2) = self.reader2.as_mut() {
            reader2.set_phred_offset(phred_offset);
        }

        let restamp = |pair: &mut ReadPair| {
            pair.read1.phred_offset = phred_offset;
            if let Some(read2) = pair.read2.as_mut() {
                read2.phred_offset = phred_offset;
            }
        };
        for pair in self.buffered.iter_mut() {
            restamp(pair);
        }
        if let Some(pair) = self.lookahead.as_mut() {
            restamp(pair);
        }
    }

    /// Percentage of the input files consumed, 0-100, or `None` for sources
    /// without a known size.
    pub fn progress(&self) -> Option<u8> {
        let progress1 = self.progress1.as_ref()?;
        if self.at_eof {
            return Some(100);
        }
        match &self.progress2 {
            Some(progress2) => {
                let percent =
                    (progress1.percent() as u16 + progress2.percent() as u16) / 2;
                Some(percent as u8)
            }
            None => Some(progress1.percent()),
        }
    }
}

/// Checks that two records' names denote mates of the same fragment.
///
/// Names are compared after stripping a trailing `/1` or `/2` mate marker;
/// names without such a marker are compared on their first space-delimited
/// token, which covers SRA-style headers where the mate index follows the
/// accession as a separate token.
pub struct PairingValidator;

impl PairingValidator {
    pub fn validate(&self, record1: &FastqRecord, record2: &FastqRecord) -> Result<()> {
        if canonical_name(&record1.name) != canonical_name(&record2.name) {
            return Err(TrimError::Pairing(format!(
                "read names do not match: {} and {}",
                record1.name, record2.name
            )));
        }
        Ok(())
    }
}

fn canonical_name(name: &str) -> &str {
    if let Some(stripped) = name.strip_suffix("/1").or_else(|| name.strip_suffix("/2")) {
        return stripped;
    }
    match name.find(' ') {
        Some(position) => &name[..position],
        None => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fastq::FastqReader;

    const PAIRED_INPUT_1: &[u8] = b"@r1/1\nACGTACGT\n+\nIIIIIIII\n@r2/1\nTTTTACGT\n+\nIIIIFFFF\n";
    const PAIRED_INPUT_2: &[u8] = b"@r1/2\nTGCATGCA\n+\nFFFFFFFF\n@r2/2\nACGTAAAA\n+\nFFFFIIII\n";

    fn paired_reader(
        input1: &'static [u8],
        input2: &'static [u8],
    ) -> PairReader<&'static [u8]> {
        PairReader::from_readers(
            FastqReader::new(input1),
            Some(FastqReader::new(input2)),
            33,
        )
        .expect("Error creating pair reader")
    }

    #[test]
    fn read_pairs_with_lookahead() {
        let mut reader = paired_reader(PAIRED_INPUT_1, PAIRED_INPUT_2);
        assert!(reader.is_paired());
        assert!(reader.has_next(), "Expecting first pair to be available");

        let pair = reader.next_pair().expect("Error reading first pair");
        assert_eq!(pair.read1.name, "r1/1".to_string());
        assert_eq!(pair.read2.as_ref().unwrap().name, "r1/2".to_string());

        assert!(reader.has_next(), "Expecting second pair to be available");
        let pair = reader.next_pair().expect("Error reading second pair");
        assert_eq!(pair.read1.name, "r2/1".to_string());

        assert!(!reader.has_next(), "Expecting end of pair stream");
    }

    #[test]
    fn empty_streams() {
        let reader = paired_reader(b"", b"");
        assert!(!reader.has_next(), "Expecting no pairs from empty input");
    }

    #[test]
    fn desynchronized_streams() {
        // second input ends one record early
        let input2: &[u8] = b"@r1/2\nTGCATGCA\n+\nFFFFFFFF\n";
        let mut reader = paired_reader(PAIRED_INPUT_1, input2);
        assert!(reader.has_next());
        let result = reader.next_pair();
        assert!(
            result.is_err(),
            "Expecting error for desynchronized mate streams"
        );
        let error = result.unwrap_err();
        assert!(matches!(error, TrimError::UnpairedInput(_)));
        assert!(error.to_string().contains("r2/1"));
    }

    #[test]
    fn single_end_mode() {
        let mut reader =
            PairReader::from_readers(FastqReader::new(PAIRED_INPUT_1), None, 33)
                .expect("Error creating pair reader");
        assert!(!reader.is_paired());

        let pair = reader.next_pair().expect("Error reading first read");
        assert_eq!(pair.read1.name, "r1/1".to_string());
        assert!(pair.read2.is_none(), "No mate expected in single-end mode");
        let pair = reader.next_pair().expect("Error reading second read");
        assert_eq!(pair.read1.name, "r2/1".to_string());
        assert!(!reader.has_next());
    }

    #[test]
    fn read_pairs_from_files_with_progress() {
        let dir = tempfile::tempdir().expect("Error creating temporary directory");
        let path1 = dir.path().join("reads_1.fq");
        let path2 = dir.path().join("reads_2.fq");
        std::fs::write(&path1, PAIRED_INPUT_1).expect("Error writing first input file");
        std::fs::write(&path2, PAIRED_INPUT_2).expect("Error writing second input file");

        let mut reader = PairReader::from_files(&path1, Some(&path2), 33)
            .expect("Error creating pair reader");
        assert!(
            reader.progress().is_some(),
            "Expecting progress for file-backed input"
        );

        let pair = reader.next_pair().expect("Error reading first pair");
        assert_eq!(pair.read1.name, "r1/1".to_string());
        let pair = reader.next_pair().expect("Error reading second pair");
        assert_eq!(pair.read1.name, "r2/1".to_string());
        assert!(!reader.has_next(), "Expecting end of pair stream");
        assert_eq!(reader.progress(), Some(100));
    }

    #[test]
    fn detect_offset_and_replay_buffered_pairs() {
        // 'h' (104) and 'e' (101) only occur with phred+64 encoding
        let input1: &[u8] = b"@r1/1\nACGT\n+\nhhhh\n@r2/1\nACGT\n+\nhhee\n";
        let input2: &[u8] = b"@r1/2\nTGCA\n+\neeee\n@r2/2\nTGCA\n+\nhhhh\n";
        let mut reader = paired_reader(input1, input2);

        let detected = reader
            .detect_phred_offset(1000)
            .expect("Error during quality encoding detection");
        assert_eq!(detected, Some(64));
        assert_eq!(reader.phred_offset(), 64);

        // buffered pairs are replayed in input order with the detected offset
        let pair = reader.next_pair().expect("Error reading first pair");
        assert_eq!(pair.read1.name, "r1/1".to_string());
        assert_eq!(pair.read1.phred_offset, 64);
        assert_eq!(pair.read1.quals(), vec![40, 40, 40, 40]);
        let pair = reader.next_pair().expect("Error reading second pair");
        assert_eq!(pair.read1.name, "r2/1".to_string());
        assert!(!reader.has_next());
    }

    #[test]
    fn detect_offset_undetermined() {
        let mut reader = paired_reader(PAIRED_INPUT_1, PAIRED_INPUT_2);
        let detected = reader
            .detect_phred_offset(1000)
            .expect("Error during quality encoding detection");
        // 'I' (73) and 'F' (70) fall outside both diagnostic ranges
        assert_eq!(detected, None);
        assert_eq!(reader.phred_offset(), 33, "Declared offset should remain");
        assert!(reader.has_next(), "Buffered pairs should still be available");
    }

    #[test]
    fn histogram_accumulates_quality_characters() {
        let mut reader = paired_reader(PAIRED_INPUT_1, PAIRED_INPUT_2);
        while reader.has_next() {
            reader.next_pair().expect("Error reading pair");
        }
        let histogram = reader.quality_histogram();
        assert_eq!(histogram[b'I' as usize], 16);
        assert_eq!(histogram[b'F' as usize], 16);
    }

    #[test]
    fn validate_matching_mate_markers() {
        let validator = PairingValidator;
        let record1 = FastqRecord::new("read1/1", "ACGT", "", "IIII", 33);
        let record2 = FastqRecord::new("read1/2", "TGCA", "", "IIII", 33);
        assert!(
            validator.validate(&record1, &record2).is_ok(),
            "Matching mate names should validate"
        );
    }

    #[test]
    fn validate_mismatched_names() {
        let validator = PairingValidator;
        let record1 = FastqRecord::new("read1/1", "ACGT", "", "IIII", 33);
        let record2 = FastqRecord::new("read2/2", "TGCA", "", "IIII", 33);
        let result = validator.validate(&record1, &record2);
        assert!(result.is_err(), "Expecting error for mismatched read names");
        let error = result.unwrap_err();
        assert!(matches!(error, TrimError::Pairing(_)));
        assert!(error.to_string().contains("read1/1"));
        assert!(error.to_string().contains("read2/2"));
    }

    #[test]
    fn validate_sra_style_names() {
        let validator = PairingValidator;
        let record1 = FastqRecord::new("SRR123.1 1 length=50", "ACGT", "", "IIII", 33);
        let record2 = FastqRecord::new("SRR123.1 2 length=50", "TGCA", "", "IIII", 33);
        assert!(
            validator.validate(&record1, &record2).is_ok(),
            "SRA-style mate names should validate on the accession token"
        );

        let record3 = FastqRecord::new("SRR123.2 2 length=50", "TGCA", "", "IIII", 33);
        assert!(
            validator.validate(&record1, &record3).is_err(),
            "Differing accession tokens should fail validation"
        );
    }
}
