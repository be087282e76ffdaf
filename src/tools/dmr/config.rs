use anyhow::{
    ensure,
    Result,
};
use serde::{
    Deserialize,
    Serialize,
};

use crate::data_structs::typedef::{
    DensityType,
    PosType,
};
use crate::with_field_fn;

/// Immutable configuration for one DMR analysis run.
///
/// Passed by reference into every component call so permutation workers stay
/// independent; there is no ambient mutable state anywhere in the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DmrConfig {
    /// Smoothing bandwidth in base pairs.
    pub bandwidth:        PosType,
    /// Minimum number of sites a smoothing window must hold; smaller windows
    /// degenerate to the nearest available sites.
    pub min_window_sites: usize,
    /// Magnitude cutoff on the smoothed difference for segmentation
    /// (strictly exceeded).
    pub diff_cutoff:      DensityType,
    /// Maximum distance in base pairs between adjacent sites of one region.
    pub max_gap:          PosType,
    /// Minimum number of sites per candidate region.
    pub min_sites:        usize,
    /// Cap on the number of label permutations contributing to the null.
    pub max_permutations: usize,
    /// Iteration cap for the correlation-parameter fit.
    pub max_fit_iters:    u64,
    /// Seed for permutation subsampling; unused when the enumeration is
    /// exhaustive.
    pub random_seed:      u64,
}

impl DmrConfig {
    with_field_fn!(bandwidth, PosType);
    with_field_fn!(min_window_sites, usize);
    with_field_fn!(diff_cutoff, DensityType);
    with_field_fn!(max_gap, PosType);
    with_field_fn!(min_sites, usize);
    with_field_fn!(max_permutations, usize);
    with_field_fn!(max_fit_iters, u64);
    with_field_fn!(random_seed, u64);

    pub fn validate(&self) -> Result<()> {
        ensure!(self.bandwidth > 0, "Smoothing bandwidth must be positive");
        ensure!(
            self.min_window_sites >= 1,
            "Smoothing windows need at least one site"
        );
        ensure!(
            self.diff_cutoff > 0.0 && self.diff_cutoff < 1.0,
            "Segmentation cutoff must lie in (0, 1), got {}",
            self.diff_cutoff
        );
        ensure!(self.max_gap > 0, "Maximum intra-region gap must be positive");
        ensure!(
            self.min_sites >= 2,
            "Candidate regions need at least two sites"
        );
        ensure!(
            self.max_permutations >= 1,
            "At least one permutation is required to build a null"
        );
        ensure!(
            self.max_fit_iters >= 1,
            "The correlation fit needs at least one iteration"
        );
        Ok(())
    }
}

impl Default for DmrConfig {
    fn default() -> Self {
        Self {
            bandwidth:        1000,
            min_window_sites: 5,
            diff_cutoff:      0.1,
            max_gap:          1000,
            min_sites:        5,
            max_permutations: 50,
            max_fit_iters:    100,
            random_seed:      42,
        }
    }
}
