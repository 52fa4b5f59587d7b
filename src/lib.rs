// Licensed under the MIT license (http://opensource.org/licenses/MIT)
// This file may not be copied, modified, or distributed
// except according to those terms.

//! A Rust library for quality and length trimming of paired-end sequence
//! data in FASTQ format. Pairs of reads are run through an ordered chain of
//! trimming steps and routed to paired or unpaired outputs depending on
//! which mates survive, with per-run statistics and an optional per-read
//! trim log. Trimming can run inline or on a bounded pool of worker threads
//! that delivers results to every output in input order.

pub mod error;
pub mod fastq;
pub mod pair;
pub mod pipeline;
pub mod stats;
pub mod trim;
