//! # dmrscan
//!
//! `dmrscan` is a Rust library for detecting differentially methylated
//! regions (DMRs) from bisulfite sequencing count data and assigning each
//! detected region a permutation-calibrated significance score.
//!
//! Given per-CpG-site methylated and total read counts across samples split
//! into two conditions, the engine
//!
//! * smooths the coverage-weighted methylation difference along each
//!   chromosome with a bandwidth-based local regression,
//! * segments the smoothed signal into candidate regions under
//!   sign/magnitude/gap/size constraints,
//! * scores every candidate with a generalized least squares fit whose
//!   error correlation decays with genomic distance, and
//! * calibrates the observed statistics against a null distribution pooled
//!   over balanced label permutations, reporting empirical p-values and
//!   Benjamini-Hochberg q-values.
//!
//! The design works down to two samples per condition: with few samples the
//! label permutations are scarce, and pooling region statistics across all
//! permutations and all chromosomes is what restores resolution of the
//! null.
//!
//! This is a library-level computational boundary: no file formats, no CLI,
//! no I/O. Callers build a [`MethCounts`](data_structs::MethCounts) table
//! and a [`Design`](data_structs::Design), pick a
//! [`DmrConfig`](tools::dmr::DmrConfig), and receive a
//! [`DmrResult`](tools::dmr::DmrResult) of called regions.
//!
//! Number of worker threads can be configured with the
//! `DMRSCAN_NUM_THREADS` environment variable.
//!
//! ## Structure
//!
//! * [`data_structs`]: loci, count matrices and the two-condition design.
//! * [`tools`]: the DMR detection pipeline (`tools::dmr`).
//! * [`utils`]: shared macros, the thread pool and numeric helpers.
//!
//! ## Usage
//!
//! ```no_run
//! use ndarray::array;
//! use dmrscan::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let loci = vec![
//!         Locus::new("chr1", 100),
//!         Locus::new("chr1", 180),
//!         Locus::new("chr1", 240),
//!     ];
//!     // sites are rows, samples are columns
//!     let meth = array![[9u32, 8, 1, 2], [10, 9, 2, 1], [8, 9, 1, 1]];
//!     let total = array![[10u32, 10, 10, 10], [12, 10, 10, 9], [10, 11, 9, 10]];
//!     let counts = MethCounts::try_new(loci, meth, total)?;
//!     let design =
//!         Design::try_new(&["case", "case", "control", "control"], vec![])?;
//!
//!     let config = DmrConfig::default()
//!         .with_bandwidth(500)
//!         .with_min_sites(3);
//!     let result = run_dmr(&counts, &design, config)?;
//!     for region in result.regions.iter() {
//!         println!(
//!             "{}:{}-{} sites={} stat={:.3} q={:.4}",
//!             region.chr, region.start, region.end, region.n_sites,
//!             region.stat, region.q_value
//!         );
//!     }
//!     Ok(())
//! }
//! ```

pub mod data_structs;
pub mod prelude;
pub mod tools;
pub mod utils;
