use assert_approx_eq::assert_approx_eq;
use dmrscan::prelude::*;
use dmrscan::tools::dmr::segmentation::find_candidate_regions;
use dmrscan::tools::dmr::significance::NullPool;
use dmrscan::tools::dmr::smooth::smoothed_track;
use dmrscan::tools::dmr::regression::fit_region;
use itertools::Itertools;
use ndarray::Array2;
use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rstest::{
    fixture,
    rstest,
};

fn design_2v2() -> Design {
    Design::try_new(&["case", "case", "ctrl", "ctrl"], vec![]).unwrap()
}

/// Smoothing narrow enough to leave the raw difference signal untouched, so
/// candidate boundaries are exact.
fn sharp_config() -> DmrConfig {
    DmrConfig::default()
        .with_bandwidth(1)
        .with_min_window_sites(1)
        .with_diff_cutoff(0.3)
        .with_max_gap(100)
        .with_min_sites(5)
}

/// 20 sites, 50 bp apart; sites 4..12 carry a constant 0.8 methylation
/// difference between the conditions, all other sites none.
#[fixture]
fn plateau() -> (MethCounts, Design) {
    let n = 20usize;
    let loci = (0..n)
        .map(|i| Locus::new("chr1", 100 + 50 * i as u32))
        .collect_vec();
    let meth = Array2::from_shape_fn((n, 4), |(site, sample)| {
        if (4..12).contains(&site) {
            if sample < 2 {
                18u32
            }
            else {
                2
            }
        }
        else {
            10
        }
    });
    let total = Array2::from_elem((n, 4), 20u32);
    (
        MethCounts::try_new(loci, meth, total).unwrap(),
        design_2v2(),
    )
}

/// Two chromosomes with mirrored counts: equal-magnitude effects of
/// opposite sign.
#[fixture]
fn mirrored_chromosomes() -> (MethCounts, Design) {
    let per_chr = 12usize;
    let mut loci = Vec::new();
    for chr in ["chr1", "chr2"] {
        for i in 0..per_chr {
            loci.push(Locus::new(chr, 500 + 40 * i as u32));
        }
    }
    let meth = Array2::from_shape_fn((2 * per_chr, 4), |(site, sample)| {
        let forward = if (2..10).contains(&(site % per_chr)) {
            if sample < 2 {
                17u32
            }
            else {
                3
            }
        }
        else {
            10
        };
        if site < per_chr {
            forward
        }
        else {
            20 - forward
        }
    });
    let total = Array2::from_elem((2 * per_chr, 4), 20u32);
    (
        MethCounts::try_new(loci, meth, total).unwrap(),
        design_2v2(),
    )
}

#[rstest]
fn trivial_null_produces_no_regions() {
    let _ = pretty_env_logger::try_init();
    // Two sites per chromosome, equal coverage, no difference anywhere.
    let loci = ["chr1", "chr2", "chr3"]
        .iter()
        .flat_map(|chr| {
            [Locus::new(*chr, 1000), Locus::new(*chr, 1400)]
        })
        .collect_vec();
    let meth = Array2::from_elem((6, 4), 5u32);
    let total = Array2::from_elem((6, 4), 10u32);
    let counts = MethCounts::try_new(loci, meth, total).unwrap();

    let config = DmrConfig::default()
        .with_min_window_sites(2)
        .with_min_sites(5);
    let result = run_dmr(&counts, &design_2v2(), config).unwrap();
    assert!(result.regions.is_empty());
    assert_eq!(result.n_permutations, 0);
    assert!(result
        .warnings
        .iter()
        .any(|w| w.contains("No candidate regions")));
}

#[rstest]
fn plateau_segments_into_exactly_one_region(
    plateau: (MethCounts, Design)
) {
    let (counts, design) = plateau;
    let config = sharp_config();
    let view = counts.chromosomes().next().unwrap();
    let track = smoothed_track(&view, &design, &config).unwrap();
    let regions =
        find_candidate_regions(view.chr(), &view.positions(), &track, &config);

    assert_eq!(regions.len(), 1);
    let region = &regions[0];
    assert_eq!(region.site_range, 4..12);
    assert_eq!(region.n_sites, 8);
    assert_eq!(region.start, 300);
    assert_eq!(region.end, 650);
    assert_eq!(region.sign, 1);
    assert_approx_eq!(region.mean_diff, 0.8, 1e-9);
    assert_approx_eq!(region.area, 6.4, 1e-9);
}

#[rstest]
fn plateau_end_to_end_calls_the_region(plateau: (MethCounts, Design)) {
    let (counts, design) = plateau;
    let result = run_dmr(&counts, &design, sharp_config()).unwrap();

    assert_eq!(result.regions.len(), 1);
    // C(4, 2) - 1 balanced reassignments
    assert_eq!(result.n_permutations, 5);
    assert!(result.null_pool_size >= 1);

    let region = &result.regions[0];
    assert_eq!((region.start, region.end), (300, 650));
    assert_eq!(region.n_sites, 8);
    assert!(region.stat > 0.0);
    assert!(region.p_value > 0.0 && region.p_value <= 1.0);
    assert!(region.q_value >= region.p_value);
    assert!(region.meth_one > region.meth_two);
    // fewer than 10 permutations must be reported, not fatal
    assert!(result
        .warnings
        .iter()
        .any(|w| w.contains("resolution is limited")));
}

#[rstest]
fn opposite_sign_regions_share_their_statistic(
    mirrored_chromosomes: (MethCounts, Design)
) {
    let (counts, design) = mirrored_chromosomes;
    let config = sharp_config();

    let stats = counts
        .chromosomes()
        .map(|view| {
            let track = smoothed_track(&view, &design, &config).unwrap();
            let regions = find_candidate_regions(
                view.chr(),
                &view.positions(),
                &track,
                &config,
            );
            assert_eq!(regions.len(), 1);
            let region = regions[0].clone();
            let sub = view.site_range(region.site_range.clone());
            let positions = view.positions();
            let stat = fit_region(
                &positions[region.site_range.clone()],
                sub.meth(),
                sub.total(),
                &design,
                &config,
            );
            (region, stat)
        })
        .collect_vec();

    let (forward_region, forward) = &stats[0];
    let (mirror_region, mirror) = &stats[1];
    assert_eq!(forward_region.sign, 1);
    assert_eq!(mirror_region.sign, -1);
    assert_approx_eq!(forward.stat.abs(), mirror.stat.abs(), 1e-6);

    // Against any shared symmetric pool, equal |statistics| get equal
    // empirical p-values.
    let pool = NullPool::from_stats(vec![0.4, -0.4, 1.3, -1.3, 2.6, -2.6]);
    assert_eq!(
        pool.pvalue(forward.stat),
        pool.pvalue(mirror.stat)
    );
}

#[rstest]
fn opposite_sign_regions_end_to_end(
    mirrored_chromosomes: (MethCounts, Design)
) {
    let (counts, design) = mirrored_chromosomes;
    let result = run_dmr(&counts, &design, sharp_config()).unwrap();

    assert_eq!(result.regions.len(), 2);
    let (a, b) = (&result.regions[0], &result.regions[1]);
    assert!(a.mean_diff > 0.0 && b.mean_diff < 0.0);
    assert_approx_eq!(a.stat.abs(), b.stat.abs(), 1e-6);
    // the pool entries sit within float noise of the observed magnitudes,
    // so the two p-values may differ by a couple of pool ranks at most
    let rank = 1.0 / (1.0 + result.null_pool_size as f64);
    assert!((a.p_value - b.p_value).abs() <= 2.0 * rank + 1e-12);
    assert!(a.p_value > 0.0 && a.p_value <= 1.0);
    assert!(b.p_value > 0.0 && b.p_value <= 1.0);
}

#[rstest]
fn pipeline_is_deterministic(mirrored_chromosomes: (MethCounts, Design)) {
    let (counts, design) = mirrored_chromosomes;
    let first = run_dmr(&counts, &design, sharp_config()).unwrap();
    let second = run_dmr(&counts, &design, sharp_config()).unwrap();
    assert_eq!(first.regions, second.regions);
    assert_eq!(first.null_pool_size, second.null_pool_size);
    assert_eq!(first.warnings, second.warnings);
}

#[rstest]
fn empty_null_pool_is_a_fatal_error() {
    // 2 vs 3 samples: the observed contrast is 0.9 vs 0.1, while every
    // permuted pooling dilutes the difference below the 0.6 cutoff, so no
    // permutation contributes to the null.
    let n = 10usize;
    let loci = (0..n)
        .map(|i| Locus::new("chr1", 200 + 30 * i as u32))
        .collect_vec();
    let meth = Array2::from_shape_fn((n, 5), |(_, sample)| {
        if sample < 2 {
            18u32
        }
        else {
            2
        }
    });
    let total = Array2::from_elem((n, 5), 20u32);
    let counts = MethCounts::try_new(loci, meth, total).unwrap();
    let design =
        Design::try_new(&["case", "case", "ctrl", "ctrl", "ctrl"], vec![])
            .unwrap();

    let config = sharp_config().with_diff_cutoff(0.6);
    let err = run_dmr(&counts, &design, config).unwrap_err();
    assert!(err
        .to_string()
        .contains("null pool is empty"));
}

#[rstest]
fn design_and_counts_must_agree_on_sample_count() {
    let loci = (0..6usize)
        .map(|i| Locus::new("chr1", 100 + 100 * i as u32))
        .collect_vec();
    let meth = Array2::from_elem((6, 6), 5u32);
    let total = Array2::from_elem((6, 6), 10u32);
    let counts = MethCounts::try_new(loci, meth, total).unwrap();

    let err = run_dmr(&counts, &design_2v2(), DmrConfig::default())
        .unwrap_err();
    assert!(err.to_string().contains("samples"));
}

/// Seeded noisy dataset builder with one planted DMR.
struct SyntheticCounts {
    seed:        u64,
    chr_sites:   Vec<usize>,
    dmr_sites:   std::ops::Range<usize>,
    baseline:    f64,
    dmr_shift:   f64,
}

impl SyntheticCounts {
    fn build(
        &self,
        n_samples: usize,
        n_cases: usize,
    ) -> MethCounts {
        let mut rng = ChaCha8Rng::seed_from_u64(self.seed);
        let mut loci = Vec::new();
        let mut rows: Vec<(Vec<u32>, Vec<u32>)> = Vec::new();
        for (c, &sites) in self.chr_sites.iter().enumerate() {
            let chr = format!("chr{}", c + 1);
            let mut pos = 1000u32;
            for site in 0..sites {
                pos += rng.gen_range(20..80);
                loci.push(Locus::new(chr.clone(), pos));
                let planted = c == 0 && self.dmr_sites.contains(&site);
                let mut meth_row = Vec::with_capacity(n_samples);
                let mut total_row = Vec::with_capacity(n_samples);
                for sample in 0..n_samples {
                    let total = rng.gen_range(15..40u32);
                    let level = if planted && sample < n_cases {
                        self.baseline + self.dmr_shift
                    }
                    else {
                        self.baseline
                    };
                    let noise: f64 = rng.gen_range(-0.05..0.05);
                    let p = (level + noise).clamp(0.01, 0.99);
                    meth_row.push((total as f64 * p).round() as u32);
                    total_row.push(total);
                }
                rows.push((meth_row, total_row));
            }
        }
        let meth = Array2::from_shape_fn((rows.len(), n_samples), |(i, j)| {
            rows[i].0[j]
        });
        let total = Array2::from_shape_fn((rows.len(), n_samples), |(i, j)| {
            rows[i].1[j]
        });
        MethCounts::try_new(loci, meth, total).unwrap()
    }
}

#[rstest]
fn noisy_planted_dmr_is_recovered() {
    let _ = pretty_env_logger::try_init();
    let synthetic = SyntheticCounts {
        seed:      271,
        chr_sites: vec![60, 40],
        dmr_sites: 20..32,
        baseline:  0.25,
        dmr_shift: 0.55,
    };
    let counts = synthetic.build(6, 3);
    let labels = ["case", "case", "case", "ctrl", "ctrl", "ctrl"];
    let design = Design::try_new(&labels, vec![]).unwrap();

    let config = DmrConfig::default()
        .with_bandwidth(150)
        .with_min_window_sites(3)
        .with_diff_cutoff(0.2)
        .with_max_gap(300)
        .with_min_sites(5);
    let result = run_dmr(&counts, &design, config).unwrap();

    // C(6, 3) - 1 = 19 permutations, all enumerable under the default cap
    assert_eq!(result.n_permutations, 19);
    assert!(result.null_pool_size > 0);
    assert!(!result.regions.is_empty());

    // the planted block must be covered by a positive-effect region
    let planted = result
        .regions
        .iter()
        .find(|r| r.chr == "chr1" && r.mean_diff > 0.0 && r.n_sites >= 5)
        .expect("planted DMR was not recovered");
    assert!(planted.p_value > 0.0 && planted.p_value <= 1.0);
    assert!(planted.q_value >= planted.p_value);

    // BH never reorders significance: sort by p, q must be non-decreasing
    let sorted_q = result
        .regions
        .iter()
        .sorted_by(|a, b| a.p_value.total_cmp(&b.p_value))
        .map(|r| r.q_value)
        .collect_vec();
    for pair in sorted_q.windows(2) {
        assert!(pair[0] <= pair[1] + 1e-12);
    }
}
