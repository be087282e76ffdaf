use crate::data_structs::typedef::{
    PosType,
    SeqName,
};
use crate::tools::dmr::config::DmrConfig;
use crate::tools::dmr::data_structs::{
    CandidateRegion,
    SmoothedTrack,
};

/// Emits the maximal runs of sites whose smoothed difference strictly
/// exceeds the cutoff with a consistent sign, with no intra-run gap larger
/// than `max_gap` base pairs. Runs shorter than `min_sites` are discarded.
///
/// A single forward scan; the output is ordered by position and
/// non-overlapping by construction.
pub fn find_candidate_regions(
    chr: &str,
    positions: &[PosType],
    track: &SmoothedTrack,
    config: &DmrConfig,
) -> Vec<CandidateRegion> {
    debug_assert_eq!(positions.len(), track.len());

    let mut regions = Vec::new();
    let mut run: Option<Run> = None;

    for (i, &diff) in track.diff.iter().enumerate() {
        let sign = if diff > 0.0 { 1i8 } else { -1i8 };
        let passes = diff.abs() > config.diff_cutoff;

        let extends = matches!(
            run,
            Some(ref r)
                if passes
                    && sign == r.sign
                    && positions[i] - positions[r.last] <= config.max_gap
        );
        if extends {
            let r = run.as_mut().unwrap();
            r.last = i;
            r.abs_sum += diff.abs();
            r.diff_sum += diff;
        }
        else {
            if let Some(r) = run.take() {
                close_run(chr, positions, r, config, &mut regions);
            }
            if passes {
                run = Some(Run {
                    first:    i,
                    last:     i,
                    sign,
                    abs_sum:  diff.abs(),
                    diff_sum: diff,
                });
            }
        }
    }
    if let Some(r) = run.take() {
        close_run(chr, positions, r, config, &mut regions);
    }
    regions
}

struct Run {
    first:    usize,
    last:     usize,
    sign:     i8,
    abs_sum:  f64,
    diff_sum: f64,
}

fn close_run(
    chr: &str,
    positions: &[PosType],
    run: Run,
    config: &DmrConfig,
    regions: &mut Vec<CandidateRegion>,
) {
    let n_sites = run.last - run.first + 1;
    if n_sites < config.min_sites {
        return;
    }
    regions.push(CandidateRegion {
        chr: SeqName::from(chr),
        start: positions[run.first],
        end: positions[run.last],
        site_range: run.first..run.last + 1,
        n_sites,
        mean_diff: run.diff_sum / n_sites as f64,
        area: run.abs_sum,
        sign: run.sign,
    });
}
