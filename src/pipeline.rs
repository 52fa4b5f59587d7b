//! The trimming pipeline: reading pairs, running the trimming chain and
//! routing results to the four output sinks, the statistics aggregator and
//! the optional trim log.
//!
//! With one thread the pipeline runs inline, pair by pair; this is the
//! reference semantics. With more threads, blocks of pairs are handed to a
//! bounded pool of workers while every downstream consumer still observes
//! results in submission order: each block gets a deferred result handle
//! which is pushed, in order, onto one channel per consumer, and each
//! consumer blocks on its next handle until that specific block has been
//! transformed. Workers may finish out of order; consumers cannot.
//!
//! Backpressure comes from the bounded work channel (a blocking send, sized
//! to the pool) and the bounded consumer channels, so the number of blocks
//! in flight never grows without limit. A failure on any thread is
//! published through the deferred handle or the returned result so that the
//! whole run aborts; no error is logged and swallowed.

use crate::error::{Result, TrimError};
use crate::fastq::{BoxedFastqWriter, FastqRecord};
use crate::pair::{PairOutcome, PairReader, PairingValidator, ReadInfo, ReadPair};
use crate::stats::TrimStats;
use crate::trim::{apply_trimmers, Trimmer};
use crossbeam::channel::{bounded, Receiver, Sender};
use log::info;
use std::io::{BufRead, Write};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use std::time::Duration;

/// The unit of work submitted to the worker pool: an ordered run of pairs.
pub type Block = Vec<ReadPair>;

/// The result a completed block produces, shared read-only by every
/// consumer.
#[derive(Debug)]
pub struct BlockResult {
    pub outcomes: Vec<PairOutcome>,
}

type BlockOutcome = Result<Arc<BlockResult>>;

/// A single-assignment slot for a block's result. Pushed to every consumer
/// queue in submission order; consumers block on it until the worker that
/// picked up the block fulfills it.
struct Deferred {
    slot: Mutex<Option<BlockOutcome>>,
    ready: Condvar,
}

impl Deferred {
    fn new() -> Deferred {
        Deferred {
            slot: Mutex::new(None),
            ready: Condvar::new(),
        }
    }

    fn fulfill(&self, outcome: BlockOutcome) {
        let mut slot = self.slot.lock().unwrap();
        *slot = Some(outcome);
        self.ready.notify_all();
    }

    fn wait(&self, timeout: Duration) -> BlockOutcome {
        let mut slot = self.slot.lock().unwrap();
        while slot.is_none() {
            let (guard, wait_result) = self.ready.wait_timeout(slot, timeout).unwrap();
            slot = guard;
            if wait_result.timed_out() && slot.is_none() {
                return Err(TrimError::Transformation(
                    "timed out waiting for a block to be transformed".to_string(),
                ));
            }
        }
        slot.as_ref().unwrap().clone()
    }
}

/// An ordered message on a consumer channel: either the handle for the next
/// block or the explicit end-of-stream marker.
enum SinkMessage {
    Block(Arc<Deferred>),
    End,
}

/// Which subset of a pair outcome an output sink writes.
#[derive(Clone, Copy)]
enum SinkRole {
    Paired1,
    Unpaired1,
    Paired2,
    Unpaired2,
}

impl SinkRole {
    fn select<'a>(&self, outcome: &'a PairOutcome) -> Option<&'a FastqRecord> {
        match self {
            SinkRole::Paired1 => match (&outcome.read1, &outcome.read2) {
                (Some(read1), Some(_)) => Some(read1),
                // single-end data goes to the primary output
                (Some(read1), None) if outcome.info2.is_none() => Some(read1),
                _ => None,
            },
            SinkRole::Unpaired1 => match (&outcome.read1, &outcome.read2) {
                (Some(read1), None) if outcome.info2.is_some() => Some(read1),
                _ => None,
            },
            SinkRole::Paired2 => match (&outcome.read1, &outcome.read2) {
                (Some(_), Some(read2)) => Some(read2),
                _ => None,
            },
            SinkRole::Unpaired2 => match (&outcome.read1, &outcome.read2) {
                (None, Some(read2)) => Some(read2),
                _ => None,
            },
        }
    }
}

const SINK_ROLES: [SinkRole; 4] = [
    SinkRole::Paired1,
    SinkRole::Unpaired1,
    SinkRole::Paired2,
    SinkRole::Unpaired2,
];

/// The four output writers plus the optional trim log destination.
pub struct OutputSinks {
    pub paired1: BoxedFastqWriter,
    pub unpaired1: BoxedFastqWriter,
    pub paired2: BoxedFastqWriter,
    pub unpaired2: BoxedFastqWriter,
    pub trim_log: Option<Box<dyn Write + Send>>,
}

impl OutputSinks {
    fn writer_for(&mut self, role: SinkRole) -> &mut BoxedFastqWriter {
        match role {
            SinkRole::Paired1 => &mut self.paired1,
            SinkRole::Unpaired1 => &mut self.unpaired1,
            SinkRole::Paired2 => &mut self.paired2,
            SinkRole::Unpaired2 => &mut self.unpaired2,
        }
    }

    fn write_outcome(&mut self, outcome: &PairOutcome) -> Result<()> {
        for role in SINK_ROLES.iter() {
            if let Some(record) = role.select(outcome) {
                self.writer_for(*role).write_fastq(record)?;
            }
        }
        if let Some(trim_log) = self.trim_log.as_mut() {
            write_trim_log(trim_log.as_mut(), outcome)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.paired1.flush()?;
        self.unpaired1.flush()?;
        self.paired2.flush()?;
        self.unpaired2.flush()?;
        if let Some(trim_log) = self.trim_log.as_mut() {
            trim_log.flush()?;
        }
        Ok(())
    }
}

/// Writes one trim log line per original read of a pair:
/// name, surviving length, head position, end position and the number of
/// bases trimmed from the tail, with zeros for a dropped read.
fn write_trim_log(writer: &mut dyn Write, outcome: &PairOutcome) -> Result<()> {
    write_trim_log_read(writer, &outcome.info1, outcome.read1.as_ref())?;
    if let Some(info2) = &outcome.info2 {
        write_trim_log_read(writer, info2, outcome.read2.as_ref())?;
    }
    Ok(())
}

fn write_trim_log_read(
    writer: &mut dyn Write,
    info: &ReadInfo,
    record: Option<&FastqRecord>,
) -> Result<()> {
    let result = match record {
        Some(record) => {
            let length = record.len();
            let start = record.head_pos;
            let end = start + length;
            writeln!(
                writer,
                "{} {} {} {} {}",
                info.name,
                length,
                start,
                end,
                info.original_length - end
            )
        }
        None => writeln!(writer, "{} 0 0 0 0", info.name),
    };
    result.map_err(|error| TrimError::Io(format!("error writing trim log: {}", error)))
}

struct WorkItem {
    block: Block,
    handle: Arc<Deferred>,
}

fn process_block(trimmers: &[Trimmer], block: Block) -> Result<BlockResult> {
    let mut outcomes = Vec::with_capacity(block.len());
    for pair in block {
        outcomes.push(apply_trimmers(trimmers, pair)?);
    }
    Ok(BlockResult { outcomes })
}

/// Distinguishes a genuine producer-side failure from a submission that
/// failed because a downstream consumer has already stopped; in the latter
/// case the consumer's own error is the one worth reporting.
enum ProduceError {
    Source(TrimError),
    ConsumerGone,
}

/// The trimming pipeline configuration.
pub struct TrimPipeline {
    pub trimmers: Vec<Trimmer>,
    /// Number of worker threads; 1 selects the inline path.
    pub threads: usize,
    /// Number of pairs per block handed to a worker.
    pub block_size: usize,
    /// Upper bound on waiting for any single block and for the worker pool
    /// to drain at the end of the run.
    pub shutdown_timeout: Duration,
}

impl TrimPipeline {
    pub fn new(trimmers: Vec<Trimmer>) -> TrimPipeline {
        TrimPipeline {
            trimmers,
            threads: 1,
            block_size: 1,
            shutdown_timeout: Duration::from_secs(60 * 60),
        }
    }

    /// Runs the pipeline to completion, returning the aggregated
    /// statistics. Output order, routing and statistics are identical for
    /// any number of threads.
    pub fn run<R: BufRead>(
        &self,
        reader: &mut PairReader<R>,
        validator: Option<&PairingValidator>,
        sinks: OutputSinks,
    ) -> Result<TrimStats> {
        if self.threads == 0 {
            return Err(TrimError::Configuration(
                "number of threads must be at least 1".to_string(),
            ));
        }
        if self.block_size == 0 {
            return Err(TrimError::Configuration(
                "block size must be at least 1".to_string(),
            ));
        }

        if self.threads == 1 {
            self.run_inline(reader, validator, sinks)
        } else {
            self.run_concurrent(reader, validator, sinks)
        }
    }

    fn run_inline<R: BufRead>(
        &self,
        reader: &mut PairReader<R>,
        validator: Option<&PairingValidator>,
        mut sinks: OutputSinks,
    ) -> Result<TrimStats> {
        let mut stats = TrimStats::new();
        let mut count: u64 = 0;

        while reader.has_next() {
            let pair = reader.next_pair()?;
            validate_pair(validator, &pair)?;
            let outcome = apply_trimmers(&self.trimmers, pair)?;
            sinks.write_outcome(&outcome)?;
            stats.record(&outcome);
            count += 1;
            log_progress(count, reader);
        }

        sinks.flush()?;
        Ok(stats)
    }

    fn run_concurrent<R: BufRead>(
        &self,
        reader: &mut PairReader<R>,
        validator: Option<&PairingValidator>,
        sinks: OutputSinks,
    ) -> Result<TrimStats> {
        let threads = self.threads;
        let wait_timeout = self.shutdown_timeout;

        // worker pool fed by a bounded channel; the blocking send is the
        // backpressure on the producer
        let (work_tx, work_rx) = bounded::<WorkItem>(threads);
        let (done_tx, done_rx) = bounded::<()>(threads);

        for _ in 0..threads {
            let work_rx = work_rx.clone();
            let done_tx = done_tx.clone();
            let trimmers = self.trimmers.clone();
            thread::spawn(move || {
                for item in work_rx.iter() {
                    let outcome = process_block(&trimmers, item.block).map(Arc::new);
                    item.handle.fulfill(outcome);
                }
                let _ = done_tx.send(());
            });
        }
        drop(work_rx);
        drop(done_tx);

        // one ordered handle queue per consumer
        let mut consumer_txs: Vec<Sender<SinkMessage>> = Vec::new();
        let mut sink_handles = Vec::new();

        let OutputSinks {
            paired1,
            unpaired1,
            paired2,
            unpaired2,
            trim_log,
        } = sinks;

        let sinks = vec![
            (SinkRole::Paired1, paired1),
            (SinkRole::Unpaired1, unpaired1),
            (SinkRole::Paired2, paired2),
            (SinkRole::Unpaired2, unpaired2),
        ];
        for (role, writer) in sinks {
            let (tx, rx) = bounded::<SinkMessage>(threads);
            consumer_txs.push(tx);
            sink_handles.push(thread::spawn(move || {
                sink_worker(role, writer, rx, wait_timeout)
            }));
        }

        let (stats_tx, stats_rx) = bounded::<SinkMessage>(threads * 5);
        consumer_txs.push(stats_tx);
        let stats_handle = thread::spawn(move || stats_worker(stats_rx, wait_timeout));

        let trim_log_handle = trim_log.map(|writer| {
            let (tx, rx) = bounded::<SinkMessage>(threads * 5);
            consumer_txs.push(tx);
            thread::spawn(move || trim_log_worker(writer, rx, wait_timeout))
        });

        let produce_result = self.produce(reader, validator, &work_tx, &consumer_txs);

        // explicit end-of-stream marker on every consumer queue
        for tx in &consumer_txs {
            let _ = tx.send(SinkMessage::End);
        }
        drop(consumer_txs);
        drop(work_tx);

        // bounded wait for the worker pool to drain; exceeding it is a
        // failure of the run, not a silent success
        let mut shutdown_result: Result<()> = Ok(());
        for _ in 0..threads {
            if done_rx.recv_timeout(self.shutdown_timeout).is_err() {
                shutdown_result = Err(TrimError::Transformation(format!(
                    "worker pool failed to drain within {:?}",
                    self.shutdown_timeout
                )));
                break;
            }
        }

        let mut consumer_error: Option<TrimError> = None;
        for handle in sink_handles {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    if consumer_error.is_none() {
                        consumer_error = Some(error);
                    }
                }
                Err(_) => {
                    if consumer_error.is_none() {
                        consumer_error =
                            Some(TrimError::Transformation("output thread panicked".to_string()));
                    }
                }
            }
        }

        let stats_result = match stats_handle.join() {
            Ok(result) => result,
            Err(_) => Err(TrimError::Transformation(
                "statistics thread panicked".to_string(),
            )),
        };

        if let Some(handle) = trim_log_handle {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    if consumer_error.is_none() {
                        consumer_error = Some(error);
                    }
                }
                Err(_) => {
                    if consumer_error.is_none() {
                        consumer_error = Some(TrimError::Transformation(
                            "trim log thread panicked".to_string(),
                        ));
                    }
                }
            }
        }

        match produce_result {
            Err(ProduceError::Source(error)) => return Err(error),
            Err(ProduceError::ConsumerGone) => {
                // a consumer stopped early; its own error explains why
                if let Some(error) = consumer_error {
                    return Err(error);
                }
                return Err(TrimError::Transformation(
                    "pipeline consumer stopped unexpectedly".to_string(),
                ));
            }
            Ok(()) => {}
        }
        shutdown_result?;
        if let Some(error) = consumer_error {
            return Err(error);
        }
        stats_result
    }

    fn produce<R: BufRead>(
        &self,
        reader: &mut PairReader<R>,
        validator: Option<&PairingValidator>,
        work_tx: &Sender<WorkItem>,
        consumer_txs: &[Sender<SinkMessage>],
    ) -> std::result::Result<(), ProduceError> {
        let mut block: Block = Vec::with_capacity(self.block_size);
        let mut count: u64 = 0;

        while reader.has_next() {
            let pair = reader.next_pair().map_err(ProduceError::Source)?;
            validate_pair(validator, &pair).map_err(ProduceError::Source)?;
            block.push(pair);
            if block.len() >= self.block_size {
                submit_block(block, work_tx, consumer_txs)?;
                block = Vec::with_capacity(self.block_size);
            }
            count += 1;
            log_progress(count, reader);
        }

        if !block.is_empty() {
            submit_block(block, work_tx, consumer_txs)?;
        }

        Ok(())
    }
}

fn submit_block(
    block: Block,
    work_tx: &Sender<WorkItem>,
    consumer_txs: &[Sender<SinkMessage>],
) -> std::result::Result<(), ProduceError> {
    let handle = Arc::new(Deferred::new());
    work_tx
        .send(WorkItem {
            block,
            handle: Arc::clone(&handle),
        })
        .map_err(|_| ProduceError::ConsumerGone)?;
    for tx in consumer_txs {
        tx.send(SinkMessage::Block(Arc::clone(&handle)))
            .map_err(|_| ProduceError::ConsumerGone)?;
    }
    Ok(())
}

fn validate_pair(validator: Option<&PairingValidator>, pair: &ReadPair) -> Result<()> {
    if let (Some(validator), Some(read2)) = (validator, pair.read2.as_ref()) {
        validator.validate(&pair.read1, read2)?;
    }
    Ok(())
}

fn log_progress<R: BufRead>(count: u64, reader: &PairReader<R>) {
    if count % 1_000_000 == 0 {
        match reader.progress() {
            Some(percent) => info!(
                "{} million read pairs read, {}% of input",
                count / 1_000_000,
                percent
            ),
            None => info!("{} million read pairs read", count / 1_000_000),
        }
    }
}

fn sink_worker(
    role: SinkRole,
    mut writer: BoxedFastqWriter,
    rx: Receiver<SinkMessage>,
    wait_timeout: Duration,
) -> Result<()> {
    for message in rx.iter() {
        match message {
            SinkMessage::Block(handle) => {
                let result = handle.wait(wait_timeout)?;
                for outcome in &result.outcomes {
                    if let Some(record) = role.select(outcome) {
                        writer.write_fastq(record)?;
                    }
                }
            }
            SinkMessage::End => break,
        }
    }
    writer.flush()?;
    Ok(())
}

fn stats_worker(rx: Receiver<SinkMessage>, wait_timeout: Duration) -> Result<TrimStats> {
    let mut stats = TrimStats::new();
    for message in rx.iter() {
        match message {
            SinkMessage::Block(handle) => {
                let result = handle.wait(wait_timeout)?;
                for outcome in &result.outcomes {
                    stats.record(outcome);
                }
            }
            SinkMessage::End => break,
        }
    }
    Ok(stats)
}

fn trim_log_worker(
    mut writer: Box<dyn Write + Send>,
    rx: Receiver<SinkMessage>,
    wait_timeout: Duration,
) -> Result<()> {
    for message in rx.iter() {
        match message {
            SinkMessage::Block(handle) => {
                let result = handle.wait(wait_timeout)?;
                for outcome in &result.outcomes {
                    write_trim_log(writer.as_mut(), outcome)?;
                }
            }
            SinkMessage::End => break,
        }
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fastq::{FastqReader, FastqWriter};
    use std::io::BufWriter;

    /// An in-memory write target that remains readable after its writer has
    /// been moved into the pipeline.
    #[derive(Clone)]
    struct SharedBuf(Arc<Mutex<Vec<u8>>>);

    impl SharedBuf {
        fn new() -> SharedBuf {
            SharedBuf(Arc::new(Mutex::new(Vec::new())))
        }

        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).expect("Output is not UTF-8")
        }
    }

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct CapturedSinks {
        paired1: SharedBuf,
        unpaired1: SharedBuf,
        paired2: SharedBuf,
        unpaired2: SharedBuf,
        trim_log: SharedBuf,
    }

    fn captured_sinks(with_trim_log: bool) -> (OutputSinks, CapturedSinks) {
        let captured = CapturedSinks {
            paired1: SharedBuf::new(),
            unpaired1: SharedBuf::new(),
            paired2: SharedBuf::new(),
            unpaired2: SharedBuf::new(),
            trim_log: SharedBuf::new(),
        };
        let boxed = |buf: &SharedBuf| -> BoxedFastqWriter {
            FastqWriter::new(BufWriter::new(Box::new(buf.clone()) as Box<dyn Write + Send>))
        };
        let sinks = OutputSinks {
            paired1: boxed(&captured.paired1),
            unpaired1: boxed(&captured.unpaired1),
            paired2: boxed(&captured.paired2),
            unpaired2: boxed(&captured.unpaired2),
            trim_log: if with_trim_log {
                Some(Box::new(captured.trim_log.clone()))
            } else {
                None
            },
        };
        (sinks, captured)
    }

    fn paired_reader<'a>(input1: &'a [u8], input2: &'a [u8]) -> PairReader<&'a [u8]> {
        PairReader::from_readers(
            FastqReader::new(input1),
            Some(FastqReader::new(input2)),
            33,
        )
        .expect("Error creating pair reader")
    }

    /// Deterministic paired input with qualities that exercise every
    /// trimming step.
    fn generate_input(pairs: usize) -> (Vec<u8>, Vec<u8>) {
        let mut input1 = Vec::new();
        let mut input2 = Vec::new();
        for i in 0..pairs {
            for (mate, input) in [(1usize, &mut input1), (2usize, &mut input2)] {
                let seq: String = (0..30)
                    .map(|j| match (i + j + mate) % 4 {
                        0 => 'A',
                        1 => 'C',
                        2 => 'G',
                        _ => 'T',
                    })
                    .collect();
                let qual: String = (0..30)
                    .map(|j| (((i * 31 + j * 17 + mate * 7) % 41) as u8 + 2 + 33) as char)
                    .collect();
                input.extend_from_slice(
                    format!("@read{}/{}\n{}\n+\n{}\n", i, mate, seq, qual).as_bytes(),
                );
            }
        }
        (input1, input2)
    }

    #[test]
    fn noop_chain_reproduces_input() {
        let (input1, input2) = generate_input(3);
        let mut reader = paired_reader(&input1, &input2);
        let (sinks, captured) = captured_sinks(false);

        let pipeline = TrimPipeline::new(Vec::new());
        let stats = pipeline
            .run(&mut reader, None, sinks)
            .expect("Error running pipeline");

        assert_eq!(captured.paired1.contents().as_bytes(), &input1[..]);
        assert_eq!(captured.paired2.contents().as_bytes(), &input2[..]);
        assert!(captured.unpaired1.contents().is_empty());
        assert!(captured.unpaired2.contents().is_empty());
        assert_eq!(stats.input_pairs, 3);
        assert_eq!(stats.both_surviving, 3);
        assert_eq!(stats.input_bases, stats.surviving_bases);
    }

    #[test]
    fn orphaned_read_goes_to_unpaired_sink() {
        // read2 is entirely below the trailing threshold and is dropped,
        // so read1 must be routed to the unpaired output
        let input1: &[u8] = b"@r1/1\nACGTACGT\n+\nIIIIIIII\n";
        let input2: &[u8] = b"@r1/2\nTTTTTTTT\n+\n!!!!!!!!\n";
        let mut reader = paired_reader(input1, input2);
        let (sinks, captured) = captured_sinks(false);

        let trimmers = vec![Trimmer::Trailing(20), Trimmer::MinLen(1)];
        let stats = TrimPipeline::new(trimmers)
            .run(&mut reader, None, sinks)
            .expect("Error running pipeline");

        assert_eq!(
            captured.unpaired1.contents(),
            "@r1/1\nACGTACGT\n+\nIIIIIIII\n".to_string()
        );
        assert!(captured.paired1.contents().is_empty());
        assert!(captured.paired2.contents().is_empty());
        assert!(captured.unpaired2.contents().is_empty());
        assert_eq!(stats.forward_only_surviving, 1);
        assert_eq!(stats.both_surviving, 0);
    }

    #[test]
    fn trim_log_reports_each_original_read() {
        let input1: &[u8] = b"@r1/1\nACGTACGT\n+\nIIIIIIII\n";
        let input2: &[u8] = b"@r1/2\nTTTTTTTT\n+\n!!!!!!!!\n";
        let mut reader = paired_reader(input1, input2);
        let (sinks, captured) = captured_sinks(true);

        let trimmers = vec![Trimmer::Trailing(20), Trimmer::MinLen(1)];
        TrimPipeline::new(trimmers)
            .run(&mut reader, None, sinks)
            .expect("Error running pipeline");

        assert_eq!(
            captured.trim_log.contents(),
            "r1/1 8 0 8 0\nr1/2 0 0 0 0\n".to_string()
        );
    }

    #[test]
    fn trim_log_reports_head_and_tail_positions() {
        // qualities 5,5,40,40,40,5: LEADING and TRAILING leave bases 2-4
        let input1: &[u8] = b"@r1/1\nACGTAC\n+\n&&III&\n";
        let input2: &[u8] = b"@r1/2\nGTGTGT\n+\nIIIIII\n";
        let mut reader = paired_reader(input1, input2);
        let (sinks, captured) = captured_sinks(true);

        let trimmers = vec![Trimmer::Leading(20), Trimmer::Trailing(20)];
        TrimPipeline::new(trimmers)
            .run(&mut reader, None, sinks)
            .expect("Error running pipeline");

        assert_eq!(
            captured.trim_log.contents(),
            "r1/1 3 2 5 1\nr1/2 6 0 6 0\n".to_string()
        );
    }

    #[test]
    fn pairing_validation_failure_aborts_run() {
        let input1: &[u8] = b"@r1/1\nACGTACGT\n+\nIIIIIIII\n";
        let input2: &[u8] = b"@r2/2\nTTTTTTTT\n+\nIIIIIIII\n";
        let mut reader = paired_reader(input1, input2);
        let (sinks, _captured) = captured_sinks(false);

        let result = TrimPipeline::new(Vec::new()).run(&mut reader, Some(&PairingValidator), sinks);
        assert!(result.is_err(), "Expecting pairing validation to fail");
        assert!(matches!(result.unwrap_err(), TrimError::Pairing(_)));
    }

    #[test]
    fn pairing_validation_failure_aborts_concurrent_run() {
        let input1: &[u8] = b"@r1/1\nACGTACGT\n+\nIIIIIIII\n";
        let input2: &[u8] = b"@r2/2\nTTTTTTTT\n+\nIIIIIIII\n";
        let mut reader = paired_reader(input1, input2);
        let (sinks, _captured) = captured_sinks(false);

        let mut pipeline = TrimPipeline::new(Vec::new());
        pipeline.threads = 4;
        let result = pipeline.run(&mut reader, Some(&PairingValidator), sinks);
        assert!(result.is_err(), "Expecting pairing validation to fail");
        assert!(matches!(result.unwrap_err(), TrimError::Pairing(_)));
    }

    #[test]
    fn invalid_thread_and_block_configuration() {
        let input: &[u8] = b"";
        let mut reader = paired_reader(input, input);
        let (sinks, _captured) = captured_sinks(false);
        let mut pipeline = TrimPipeline::new(Vec::new());
        pipeline.threads = 0;
        let result = pipeline.run(&mut reader, None, sinks);
        assert!(matches!(result.unwrap_err(), TrimError::Configuration(_)));

        let mut reader = paired_reader(input, input);
        let (sinks, _captured) = captured_sinks(false);
        let mut pipeline = TrimPipeline::new(Vec::new());
        pipeline.block_size = 0;
        let result = pipeline.run(&mut reader, None, sinks);
        assert!(matches!(result.unwrap_err(), TrimError::Configuration(_)));
    }

    fn run_with(threads: usize, block_size: usize) -> (CapturedSinks, TrimStats) {
        let (input1, input2) = generate_input(60);
        let mut reader = paired_reader(&input1, &input2);
        let (sinks, captured) = captured_sinks(true);

        let trimmers = vec![
            Trimmer::Leading(5),
            Trimmer::Trailing(5),
            Trimmer::SlidingWindow {
                required_quality: 15,
                window_length: 4,
            },
            Trimmer::MinLen(10),
        ];
        let mut pipeline = TrimPipeline::new(trimmers);
        pipeline.threads = threads;
        pipeline.block_size = block_size;
        let stats = pipeline
            .run(&mut reader, Some(&PairingValidator), sinks)
            .expect("Error running pipeline");
        (captured, stats)
    }

    #[test]
    fn concurrent_output_matches_inline_reference() {
        let (inline, inline_stats) = run_with(1, 1);
        for (threads, block_size) in [(2, 1), (4, 3), (8, 7)] {
            let (concurrent, concurrent_stats) = run_with(threads, block_size);
            assert_eq!(
                concurrent.paired1.contents(),
                inline.paired1.contents(),
                "paired-1 output differs with {} threads",
                threads
            );
            assert_eq!(
                concurrent.unpaired1.contents(),
                inline.unpaired1.contents(),
                "unpaired-1 output differs with {} threads",
                threads
            );
            assert_eq!(
                concurrent.paired2.contents(),
                inline.paired2.contents(),
                "paired-2 output differs with {} threads",
                threads
            );
            assert_eq!(
                concurrent.unpaired2.contents(),
                inline.unpaired2.contents(),
                "unpaired-2 output differs with {} threads",
                threads
            );
            assert_eq!(
                concurrent.trim_log.contents(),
                inline.trim_log.contents(),
                "trim log differs with {} threads",
                threads
            );
            assert_eq!(
                concurrent_stats, inline_stats,
                "statistics differ with {} threads",
                threads
            );
        }
    }

    #[test]
    fn no_read_is_written_to_more_than_one_sink() {
        let (captured, stats) = run_with(4, 3);
        let outputs = [
            captured.paired1.contents(),
            captured.unpaired1.contents(),
            captured.paired2.contents(),
            captured.unpaired2.contents(),
        ];
        for i in 0..60 {
            for mate in 1..=2 {
                let header = format!("@read{}/{}\n", i, mate);
                let occurrences: usize = outputs
                    .iter()
                    .map(|output| output.matches(&header).count())
                    .sum();
                assert!(
                    occurrences <= 1,
                    "read{}/{} appears {} times across sinks",
                    i,
                    mate,
                    occurrences
                );
            }
        }
        assert_eq!(
            stats.both_surviving + stats.forward_only_surviving + stats.reverse_only_surviving
                + stats.dropped,
            stats.input_pairs
        );
    }

    #[test]
    fn single_end_reads_go_to_primary_sink() {
        let input: &[u8] = b"@r1\nACGTACGT\n+\nIIIIIIII\n@r2\nTTTTTTTT\n+\n!!!!!!!!\n";
        let mut reader = PairReader::from_readers(FastqReader::new(input), None, 33)
            .expect("Error creating pair reader");
        let (sinks, captured) = captured_sinks(false);

        let trimmers = vec![Trimmer::Trailing(20), Trimmer::MinLen(1)];
        let stats = TrimPipeline::new(trimmers)
            .run(&mut reader, None, sinks)
            .expect("Error running pipeline");

        assert_eq!(
            captured.paired1.contents(),
            "@r1\nACGTACGT\n+\nIIIIIIII\n".to_string()
        );
        assert!(captured.unpaired1.contents().is_empty());
        assert_eq!(stats.both_surviving, 1);
        assert_eq!(stats.dropped, 1);
    }
}
