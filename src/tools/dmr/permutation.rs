use hashbrown::HashSet;
use itertools::Itertools;
use log::{
    debug,
    warn,
};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::data_structs::Design;
use crate::tools::dmr::config::DmrConfig;

/// Permutations below this count trigger a limited-resolution warning.
const MIN_USABLE_PERMUTATIONS: usize = 10;

/// One reassignment of condition-one labels to samples, preserving the
/// observed group sizes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LabelAssignment {
    /// Sorted sample indices assigned to condition one.
    pub group_one: Vec<usize>,
}

impl LabelAssignment {
    pub fn apply(
        &self,
        design: &Design,
    ) -> Design {
        design.with_group_one(&self.group_one)
    }
}

/// Enumerates the balanced condition-label reassignments that feed the
/// permutation null.
///
/// All `C(n, n1)` subsets preserving the observed group sizes are produced,
/// minus the observed assignment itself. When more than
/// `config.max_permutations` remain, a uniformly-sampled distinct subset is
/// drawn with the seeded generator instead — the only source of randomness
/// in the engine. Returns the assignments together with any warnings about
/// limited null resolution.
pub fn enumerate_assignments(
    design: &Design,
    config: &DmrConfig,
) -> (Vec<LabelAssignment>, Vec<String>) {
    let n = design.n_samples();
    let k = design.group_one().len();
    let observed = design.group_one().to_vec();

    let total = binomial(n, k);
    let available = total.saturating_sub(1);
    let mut warnings = Vec::new();

    let assignments = if available <= config.max_permutations as u128 {
        (0..n)
            .combinations(k)
            .filter(|subset| *subset != observed)
            .map(|group_one| LabelAssignment { group_one })
            .collect_vec()
    }
    else {
        sample_assignments(n, k, &observed, config)
    };

    debug!(
        "Using {} of {} distinct balanced label reassignments",
        assignments.len(),
        available
    );
    if assignments.len() < MIN_USABLE_PERMUTATIONS {
        warnings.push(format!(
            "Only {} distinct balanced label reassignments are available; \
             null-distribution resolution is limited",
            assignments.len()
        ));
        warn!("{}", warnings.last().unwrap());
    }
    (assignments, warnings)
}

/// Draws `config.max_permutations` distinct assignments uniformly, skipping
/// the observed one. The cap is strictly below the number of available
/// assignments when this is called, so the rejection loop terminates.
fn sample_assignments(
    n: usize,
    k: usize,
    observed: &[usize],
    config: &DmrConfig,
) -> Vec<LabelAssignment> {
    let mut rng = ChaCha8Rng::seed_from_u64(config.random_seed);
    let mut seen: HashSet<Vec<usize>> = HashSet::new();
    let mut assignments = Vec::with_capacity(config.max_permutations);
    while assignments.len() < config.max_permutations {
        let mut subset = rand::seq::index::sample(&mut rng, n, k).into_vec();
        subset.sort_unstable();
        if subset == observed || !seen.insert(subset.clone()) {
            continue;
        }
        assignments.push(LabelAssignment { group_one: subset });
    }
    assignments
}

fn binomial(
    n: usize,
    k: usize,
) -> u128 {
    let k = k.min(n - k);
    let mut result: u128 = 1;
    for i in 0..k {
        result = result.saturating_mul((n - i) as u128) / (i + 1) as u128;
    }
    result
}
