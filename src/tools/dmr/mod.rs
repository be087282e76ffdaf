//! Detection of differentially methylated regions.
//!
//! The pipeline runs strictly forward: the coverage-filtered count table is
//! smoothed per chromosome ([smooth]), the smoothed track is segmented into
//! candidate regions ([segmentation]), each candidate is scored by a
//! correlated-error regression ([regression]), and the observed statistics
//! are calibrated against a pooled permutation null ([permutation],
//! [significance]). [runner] ties the stages together per chromosome.

pub mod config;
pub mod data_structs;
pub mod permutation;
pub mod regression;
pub mod runner;
pub mod segmentation;
pub mod significance;
pub mod smooth;

pub use config::DmrConfig;
pub use data_structs::{
    CandidateRegion,
    DmrRecord,
    DmrResult,
    RegionStat,
    SmoothedTrack,
};
pub use runner::{
    run_dmr,
    DmrAnalysis,
};
