use anyhow::{
    ensure,
    Result,
};
use itertools::Itertools;
use log::{
    debug,
    info,
};
use rayon::prelude::*;

use crate::data_structs::{
    ChromView,
    Design,
    MethCounts,
};
use crate::tools::dmr::config::DmrConfig;
use crate::tools::dmr::data_structs::{
    CandidateRegion,
    DmrRecord,
    DmrResult,
    RegionStat,
};
use crate::tools::dmr::permutation::enumerate_assignments;
use crate::tools::dmr::regression::fit_region;
use crate::tools::dmr::segmentation::find_candidate_regions;
use crate::tools::dmr::significance::{
    bh_qvalues,
    empirical_pvalues,
    NullPool,
};
use crate::tools::dmr::smooth::smoothed_track;
use crate::utils::{
    n_threads,
    THREAD_POOL,
};

/// One fully configured DMR analysis over a filtered count table and a
/// two-condition design.
///
/// Chromosomes are independent units of work, both for the observed labeling
/// and for every permutation; workers only return value vectors that are
/// merged afterwards, so the null pool is built without shared mutable
/// state.
pub struct DmrAnalysis<'a> {
    counts: &'a MethCounts,
    design: &'a Design,
    config: DmrConfig,
}

impl<'a> DmrAnalysis<'a> {
    pub fn new(
        counts: &'a MethCounts,
        design: &'a Design,
        config: DmrConfig,
    ) -> Self {
        Self {
            counts,
            design,
            config,
        }
    }

    pub fn run(&self) -> Result<DmrResult> {
        self.config.validate()?;
        ensure!(
            self.design.n_samples() == self.counts.n_samples(),
            "Design describes {} samples but the count table has {}",
            self.design.n_samples(),
            self.counts.n_samples()
        );

        let filtered = self.counts.filter_covered()?;
        filtered.assert_covered()?;
        info!(
            "Running DMR analysis on {} sites over {} chromosomes ({} \
             samples, {} worker threads)",
            filtered.n_sites(),
            filtered.n_chromosomes(),
            filtered.n_samples(),
            n_threads()
        );

        THREAD_POOL.install(|| self.run_filtered(&filtered))
    }

    fn run_filtered(
        &self,
        counts: &MethCounts,
    ) -> Result<DmrResult> {
        let views = counts.chromosomes().collect_vec();
        let mut warnings = Vec::new();

        let per_chromosome = views
            .par_iter()
            .map(|view| scored_regions(view, self.design, &self.config))
            .collect::<Vec<_>>();
        let skipped = per_chromosome
            .iter()
            .filter(|(_, skipped)| *skipped)
            .count();
        if skipped > 0 {
            warnings.push(format!(
                "{} of {} chromosomes were too short to smooth and \
                 contributed no candidate regions",
                skipped,
                views.len()
            ));
        }
        let observed = per_chromosome
            .into_iter()
            .flat_map(|(scored, _)| scored)
            .collect_vec();
        info!("Observed labeling produced {} candidate regions", observed.len());

        if observed.is_empty() {
            warnings.push(
                "No candidate regions detected under the observed labeling"
                    .to_string(),
            );
            return Ok(DmrResult {
                regions: Vec::new(),
                null_pool_size: 0,
                n_permutations: 0,
                warnings,
            });
        }

        let (assignments, perm_warnings) =
            enumerate_assignments(self.design, &self.config);
        warnings.extend(perm_warnings);
        let n_permutations = assignments.len();

        // Accumulate per-permutation statistic vectors, then merge: the pool
        // is an unordered multiset, so worker scheduling cannot affect it.
        let null_contributions = assignments
            .par_iter()
            .map(|assignment| {
                let permuted = assignment.apply(self.design);
                views
                    .iter()
                    .flat_map(|view| {
                        null_stats(view, &permuted, &self.config)
                    })
                    .collect_vec()
            })
            .collect::<Vec<_>>();
        let pool = NullPool::from_stats(
            null_contributions
                .into_iter()
                .flatten()
                .collect_vec(),
        );
        debug!(
            "Null pool holds {} statistics from {} permutations",
            pool.len(),
            n_permutations
        );

        let stats = observed
            .iter()
            .map(|scored| scored.stat.stat)
            .collect_vec();
        let pvalues = empirical_pvalues(&stats, &pool)?;
        let qvalues = bh_qvalues(&pvalues);

        let fallbacks = observed
            .iter()
            .filter(|scored| scored.stat.indep_fallback)
            .count();
        if fallbacks > 0 {
            warnings.push(format!(
                "{} of {} regions fell back to the independence correlation \
                 structure",
                fallbacks,
                observed.len()
            ));
        }

        let regions = observed
            .into_iter()
            .zip(pvalues)
            .zip(qvalues)
            .map(|((scored, p_value), q_value)| {
                scored.into_record(p_value, q_value)
            })
            .collect_vec();

        Ok(DmrResult {
            regions,
            null_pool_size: pool.len(),
            n_permutations,
            warnings,
        })
    }
}

/// Convenience entry point for a single call.
pub fn run_dmr(
    counts: &MethCounts,
    design: &Design,
    config: DmrConfig,
) -> Result<DmrResult> {
    DmrAnalysis::new(counts, design, config).run()
}

/// A candidate region with its fitted statistic and pooled per-group
/// methylation levels.
struct ScoredRegion {
    region:   CandidateRegion,
    stat:     RegionStat,
    meth_one: f64,
    meth_two: f64,
}

impl ScoredRegion {
    fn into_record(
        self,
        p_value: f64,
        q_value: f64,
    ) -> DmrRecord {
        DmrRecord {
            chr: self.region.chr,
            start: self.region.start,
            end: self.region.end,
            n_sites: self.region.n_sites,
            meth_one: self.meth_one,
            meth_two: self.meth_two,
            mean_diff: self.region.mean_diff,
            area: self.region.area,
            stat: self.stat.stat,
            rho: self.stat.rho,
            indep_fallback: self.stat.indep_fallback,
            p_value,
            q_value,
        }
    }
}

/// Smooth + segment + score one chromosome under a label assignment. The
/// second element reports whether the chromosome was skipped as too short.
fn scored_regions(
    view: &ChromView,
    design: &Design,
    config: &DmrConfig,
) -> (Vec<ScoredRegion>, bool) {
    let Some(track) = smoothed_track(view, design, config)
    else {
        return (Vec::new(), true);
    };
    let positions = view.positions();
    let regions =
        find_candidate_regions(view.chr(), &positions, &track, config);
    let scored = regions
        .into_iter()
        .map(|region| {
            let sub = view.site_range(region.site_range.clone());
            let stat = fit_region(
                &positions[region.site_range.clone()],
                sub.meth(),
                sub.total(),
                design,
                config,
            );
            let (meth_one, meth_two) = group_levels(&sub, design);
            ScoredRegion {
                region,
                stat,
                meth_one,
                meth_two,
            }
        })
        .collect_vec();
    (scored, false)
}

/// The |statistic| contributions of one chromosome under a permuted label
/// assignment.
fn null_stats(
    view: &ChromView,
    design: &Design,
    config: &DmrConfig,
) -> Vec<f64> {
    let (scored, _) = scored_regions(view, design, config);
    scored
        .into_iter()
        .map(|s| s.stat.stat.abs())
        .collect_vec()
}

/// Pooled methylation level per condition over every (site, sample) of the
/// view.
fn group_levels(
    view: &ChromView,
    design: &Design,
) -> (f64, f64) {
    let level = |samples: &[usize]| -> f64 {
        let mut meth: u64 = 0;
        let mut total: u64 = 0;
        for site in 0..view.len() {
            for &sample in samples {
                meth += view.meth()[[site, sample]] as u64;
                total += view.total()[[site, sample]] as u64;
            }
        }
        if total == 0 {
            0.0
        }
        else {
            meth as f64 / total as f64
        }
    };
    (
        level(design.group_one()),
        level(&design.group_two()),
    )
}
