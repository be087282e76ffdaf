use adjustp::{
    adjust,
    Procedure,
};
use anyhow::{
    ensure,
    Result,
};

/// Pooled empirical null distribution of |region statistics| across all
/// permutations and chromosomes.
///
/// Construction is an unordered multiset merge, so the order in which
/// permutation workers contribute never affects downstream p-values.
#[derive(Debug, Clone, Default)]
pub struct NullPool {
    /// |statistic| values, sorted ascending.
    stats: Vec<f64>,
}

impl NullPool {
    pub fn from_stats(stats: Vec<f64>) -> Self {
        let mut stats = stats
            .into_iter()
            .filter(|s| s.is_finite())
            .map(f64::abs)
            .collect::<Vec<_>>();
        stats.sort_unstable_by(|a, b| a.total_cmp(b));
        Self { stats }
    }

    pub fn len(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    /// Empirical two-sided p-value of a statistic against the pool:
    /// `(1 + #{null >= |stat|}) / (1 + pool size)`. Lies in (0, 1] and is
    /// never smaller than `1 / (1 + pool size)`.
    pub fn pvalue(
        &self,
        stat: f64,
    ) -> f64 {
        let magnitude = stat.abs();
        let below = self
            .stats
            .partition_point(|&s| s < magnitude);
        let geq = self.stats.len() - below;
        (1 + geq) as f64 / (1 + self.stats.len()) as f64
    }
}

/// Empirical p-values for a set of observed region statistics.
///
/// An empty pool cannot calibrate significance and is a fatal configuration
/// error.
pub fn empirical_pvalues(
    stats: &[f64],
    pool: &NullPool,
) -> Result<Vec<f64>> {
    ensure!(
        !pool.is_empty(),
        "Permutation null pool is empty: no permutation produced any \
         candidate region, so significance cannot be calibrated. Check the \
         segmentation cutoff and the number of available permutations."
    );
    Ok(stats
        .iter()
        .map(|&s| pool.pvalue(s))
        .collect())
}

/// Benjamini-Hochberg q-values over the full observed-region p-value set.
pub fn bh_qvalues(pvalues: &[f64]) -> Vec<f64> {
    if pvalues.is_empty() {
        return Vec::new();
    }
    adjust(pvalues, Procedure::BenjaminiHochberg)
}
