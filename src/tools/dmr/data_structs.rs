use itertools::Itertools;
use serde::{
    Deserialize,
    Serialize,
    Serializer,
};

use crate::data_structs::typedef::{
    DensityType,
    PosType,
    SeqName,
};

/// Smoothed per-site difference estimates and precision weights for one
/// chromosome. Transient: rebuilt for every label assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct SmoothedTrack {
    pub diff:   Vec<DensityType>,
    pub weight: Vec<DensityType>,
}

impl SmoothedTrack {
    pub fn len(&self) -> usize {
        self.diff.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diff.is_empty()
    }
}

/// A maximal run of sites passing the segmentation predicate. Immutable once
/// emitted; consumed by the region statistic estimator.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateRegion {
    pub chr:        SeqName,
    pub start:      PosType,
    pub end:        PosType,
    /// Site index range relative to the chromosome the region came from.
    pub site_range: std::ops::Range<usize>,
    pub n_sites:    usize,
    pub mean_diff:  DensityType,
    /// Sum of |smoothed difference| over member sites.
    pub area:       DensityType,
    pub sign:       i8,
}

/// Output of the region-level generalized least squares fit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionStat {
    /// Fitted condition coefficient on the arcsine scale.
    pub coef:           f64,
    /// Standard error under the fitted correlation structure.
    pub se:             f64,
    /// Wald statistic `coef / se`.
    pub stat:           f64,
    /// Fitted within-sample correlation parameter.
    pub rho:            f64,
    /// True when the correlated fit failed and the independence structure
    /// was used instead.
    pub indep_fallback: bool,
}

/// A called differentially methylated region with its calibrated
/// significance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DmrRecord {
    pub chr:            SeqName,
    pub start:          PosType,
    pub end:            PosType,
    pub n_sites:        usize,
    /// Pooled methylation level of condition one over the region.
    pub meth_one:       f64,
    /// Pooled methylation level of condition two over the region.
    pub meth_two:       f64,
    pub mean_diff:      f64,
    pub area:           f64,
    pub stat:           f64,
    pub rho:            f64,
    pub indep_fallback: bool,
    #[serde(serialize_with = "serialize_scientific")]
    pub p_value:        f64,
    #[serde(serialize_with = "serialize_scientific")]
    pub q_value:        f64,
}

impl DmrRecord {
    pub fn length(&self) -> PosType {
        self.end - self.start + 1
    }

    pub fn meth_diff(&self) -> f64 {
        self.meth_one - self.meth_two
    }
}

fn serialize_scientific<S>(
    x: &f64,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: Serializer, {
    serializer.serialize_str(&format!("{:e}", x))
}

/// A flat tabular row of one called region, for downstream export.
pub type DmrRow = (SeqName, PosType, PosType, usize, f64, f64, f64, f64);

/// Final result of a DMR analysis run.
#[derive(Debug, Clone)]
pub struct DmrResult {
    /// Called regions, ordered by chromosome input order and start position.
    pub regions:        Vec<DmrRecord>,
    /// Size of the pooled permutation null the p-values were calibrated
    /// against.
    pub null_pool_size: usize,
    /// Number of label permutations that contributed to the null.
    pub n_permutations: usize,
    /// Non-fatal anomalies aggregated over the run.
    pub warnings:       Vec<String>,
}

impl DmrResult {
    /// Flat (chr, start, end, n_sites, area, stat, p, q) rows.
    pub fn to_rows(&self) -> Vec<DmrRow> {
        self.regions
            .iter()
            .map(|r| {
                (
                    r.chr.clone(),
                    r.start,
                    r.end,
                    r.n_sites,
                    r.area,
                    r.stat,
                    r.p_value,
                    r.q_value,
                )
            })
            .collect_vec()
    }
}
