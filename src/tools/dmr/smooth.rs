use log::debug;

use crate::data_structs::typedef::PosType;
use crate::data_structs::{
    ChromView,
    Design,
};
use crate::tools::dmr::config::DmrConfig;
use crate::tools::dmr::data_structs::SmoothedTrack;
use crate::utils::stats::tricube;

/// Raw per-site difference signal between the two condition groups and its
/// precision weight.
///
/// The difference is between pooled group methylation proportions; the
/// precision is that of a difference of two proportions,
/// `1 / (1/T1 + 1/T2)` with `T_g` the pooled group coverage. Requires the
/// coverage filter to have run (every total positive).
pub fn difference_signal(
    view: &ChromView,
    design: &Design,
) -> (Vec<f64>, Vec<f64>) {
    let meth = view.meth();
    let total = view.total();
    let group_one = design.group_one();
    let group_two = design.group_two();

    let mut diff = Vec::with_capacity(view.len());
    let mut weight = Vec::with_capacity(view.len());
    for i in 0..view.len() {
        let (m1, t1) = pooled(&meth.row(i), &total.row(i), group_one);
        let (m2, t2) = pooled(&meth.row(i), &total.row(i), &group_two);
        diff.push(m1 / t1 - m2 / t2);
        weight.push(t1 * t2 / (t1 + t2));
    }
    (diff, weight)
}

fn pooled(
    meth: &ndarray::ArrayView1<u32>,
    total: &ndarray::ArrayView1<u32>,
    samples: &[usize],
) -> (f64, f64) {
    let m: u64 = samples.iter().map(|&s| meth[s] as u64).sum();
    let t: u64 = samples.iter().map(|&s| total[s] as u64).sum();
    (m as f64, t as f64)
}

/// Kernel-smoothed difference track for one chromosome.
///
/// Local linear regression under a tricube kernel over genomic distance,
/// multiplied by the per-site precision weights. Windows are every site
/// within `bandwidth` base pairs; windows holding fewer than
/// `min_window_sites` sites degenerate to the nearest available sites
/// (upstream preferred on distance ties) with the kernel half-width
/// stretched to the farthest member.
///
/// Returns `None` when the chromosome is too short to form a single valid
/// window; such a chromosome contributes no candidate regions.
pub fn smooth_track(
    positions: &[PosType],
    diff: &[f64],
    weight: &[f64],
    config: &DmrConfig,
) -> Option<SmoothedTrack> {
    let n = positions.len();
    debug_assert_eq!(n, diff.len());
    debug_assert_eq!(n, weight.len());
    if n < config.min_window_sites {
        debug!(
            "Chromosome with {} sites is too short to smooth (window needs \
             {})",
            n, config.min_window_sites
        );
        return None;
    }

    let mut smoothed_diff = Vec::with_capacity(n);
    let mut smoothed_weight = Vec::with_capacity(n);
    for i in 0..n {
        let center = positions[i];
        let (lo, hi) = window_bounds(positions, i, config);
        let half_width = {
            let d_far = positions[lo..hi]
                .iter()
                .map(|&p| p.abs_diff(center))
                .max()
                .unwrap_or(0);
            (config.bandwidth.max(d_far) as f64) * (1.0 + 1e-9)
        };

        let (value, precision) = local_linear_fit(
            &positions[lo..hi],
            &diff[lo..hi],
            &weight[lo..hi],
            center,
            half_width,
        );
        smoothed_diff.push(value);
        smoothed_weight.push(precision);
    }

    Some(SmoothedTrack {
        diff:   smoothed_diff,
        weight: smoothed_weight,
    })
}

/// Composition of [difference_signal] and [smooth_track].
pub fn smoothed_track(
    view: &ChromView,
    design: &Design,
    config: &DmrConfig,
) -> Option<SmoothedTrack> {
    let (diff, weight) = difference_signal(view, design);
    smooth_track(&view.positions(), &diff, &weight, config)
}

/// Site index range of the smoothing window centered at site `i`: all sites
/// within the bandwidth, expanded to the nearest `min_window_sites` sites
/// when the bandwidth window is too sparse.
fn window_bounds(
    positions: &[PosType],
    i: usize,
    config: &DmrConfig,
) -> (usize, usize) {
    let center = positions[i];
    let mut lo = positions
        .partition_point(|&p| p < center.saturating_sub(config.bandwidth));
    let mut hi = positions
        .partition_point(|&p| p <= center.saturating_add(config.bandwidth));

    while hi - lo < config.min_window_sites {
        let left_dist = if lo > 0 {
            Some(center.abs_diff(positions[lo - 1]))
        }
        else {
            None
        };
        let right_dist = if hi < positions.len() {
            Some(center.abs_diff(positions[hi]))
        }
        else {
            None
        };
        match (left_dist, right_dist) {
            // Upstream wins ties
            (Some(l), Some(r)) if l <= r => lo -= 1,
            (Some(_), Some(_)) => hi += 1,
            (Some(_), None) => lo -= 1,
            (None, Some(_)) => hi += 1,
            (None, None) => break,
        }
    }
    (lo, hi)
}

/// Weighted local linear fit evaluated at the window center. Degenerates to
/// the weighted mean for single-site windows or numerically flat designs.
fn local_linear_fit(
    positions: &[PosType],
    diff: &[f64],
    weight: &[f64],
    center: PosType,
    half_width: f64,
) -> (f64, f64) {
    let mut s0 = 0.0;
    let mut s1 = 0.0;
    let mut s2 = 0.0;
    let mut sy = 0.0;
    let mut sxy = 0.0;
    let mut kernel_sum = 0.0;
    let mut kernel_weight_sum = 0.0;

    for ((&p, &y), &w) in positions
        .iter()
        .zip(diff.iter())
        .zip(weight.iter())
    {
        let x = p as f64 - center as f64;
        let k = tricube(x / half_width);
        let kw = k * w;
        s0 += kw;
        s1 += kw * x;
        s2 += kw * x * x;
        sy += kw * y;
        sxy += kw * x * y;
        kernel_sum += k;
        kernel_weight_sum += k * w;
    }

    let det = s0 * s2 - s1 * s1;
    let value = if positions.len() == 1 || det.abs() <= 1e-10 * s0 * s2 {
        sy / s0
    }
    else {
        (s2 * sy - s1 * sxy) / det
    };
    let precision = if kernel_sum > 0.0 {
        kernel_weight_sum / kernel_sum
    }
    else {
        0.0
    };
    (value, precision)
}

#[cfg(test)]
mod tests {
    use assert_approx_eq::assert_approx_eq;
    use itertools::Itertools;

    use super::*;

    fn uniform_config() -> DmrConfig {
        DmrConfig::default()
            .with_bandwidth(100)
            .with_min_window_sites(3)
    }

    #[test]
    fn too_few_sites_yields_no_track() {
        let config = uniform_config();
        let positions = vec![100, 200];
        let diff = vec![0.5, 0.5];
        let weight = vec![1.0, 1.0];
        assert!(smooth_track(&positions, &diff, &weight, &config).is_none());
    }

    #[test]
    fn constant_signal_smooths_to_itself() {
        let config = uniform_config();
        let positions = (0..20u32).map(|i| 50 * i + 10).collect_vec();
        let diff = vec![0.37; 20];
        let weight = vec![4.0; 20];
        let track =
            smooth_track(&positions, &diff, &weight, &config).unwrap();
        for &d in track.diff.iter() {
            assert_approx_eq!(d, 0.37, 1e-9);
        }
        for &w in track.weight.iter() {
            assert_approx_eq!(w, 4.0, 1e-9);
        }
    }

    #[test]
    fn linear_signal_is_reproduced_by_local_linear_fit() {
        let config = uniform_config();
        let positions = (0..30u32).map(|i| 40 * i).collect_vec();
        let diff = positions
            .iter()
            .map(|&p| 0.001 * p as f64)
            .collect_vec();
        let weight = vec![1.0; 30];
        let track =
            smooth_track(&positions, &diff, &weight, &config).unwrap();
        for (i, &d) in track.diff.iter().enumerate() {
            assert_approx_eq!(d, diff[i], 1e-9);
        }
    }

    #[test]
    fn smoothing_is_deterministic() {
        let config = DmrConfig::default().with_min_window_sites(4);
        let positions = (0..50u32).map(|i| 97 * i + 13).collect_vec();
        let diff = (0..50)
            .map(|i| ((i * 31 % 17) as f64 - 8.0) / 20.0)
            .collect_vec();
        let weight = (0..50)
            .map(|i| 1.0 + (i % 7) as f64)
            .collect_vec();
        let a = smooth_track(&positions, &diff, &weight, &config).unwrap();
        let b = smooth_track(&positions, &diff, &weight, &config).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn sparse_windows_degenerate_to_nearest_sites() {
        // Sites 5000 bp apart with a 100 bp bandwidth: every window must
        // expand to min_window_sites nearest sites and still smooth.
        let config = uniform_config();
        let positions = (0..6u32).map(|i| 5000 * i).collect_vec();
        let diff = vec![0.0, 0.0, 0.8, 0.8, 0.0, 0.0];
        let weight = vec![1.0; 6];
        let track =
            smooth_track(&positions, &diff, &weight, &config).unwrap();
        assert_eq!(track.len(), 6);
        assert!(track.diff.iter().all(|d| d.is_finite()));
        // interior plateau sites keep a clearly positive estimate
        assert!(track.diff[2] > 0.2 && track.diff[3] > 0.2);
    }

    #[test]
    fn boundary_windows_stay_unbiased_for_flat_signal() {
        // The nearest-site boundary rule must not bend a flat signal at the
        // chromosome ends.
        let config = uniform_config().with_min_window_sites(5);
        let positions = (0..10u32).map(|i| 300 * i).collect_vec();
        let diff = vec![0.25; 10];
        let weight = vec![2.0; 10];
        let track =
            smooth_track(&positions, &diff, &weight, &config).unwrap();
        assert_approx_eq!(track.diff[0], 0.25, 1e-9);
        assert_approx_eq!(track.diff[9], 0.25, 1e-9);
    }

    #[test]
    fn window_bounds_prefer_upstream_on_ties() {
        let config = DmrConfig::default()
            .with_bandwidth(10)
            .with_min_window_sites(2);
        // Site 1 at 100 is equidistant from 90 and 110
        let positions = vec![90, 100, 110];
        let (lo, hi) = window_bounds(&positions, 1, &config);
        assert_eq!((lo, hi), (0, 3));

        let config = config.with_bandwidth(5);
        let (lo, hi) = window_bounds(&positions, 1, &config);
        assert_eq!((lo, hi), (0, 2));
    }
}
