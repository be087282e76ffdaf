use argmin::core::{
    CostFunction,
    Error,
    Executor,
};
use argmin::solver::brent::BrentOpt;
use log::{
    debug,
    warn,
};
use ndarray::{
    Array1,
    Array2,
    ArrayView2,
};

use crate::data_structs::typedef::{
    CountType,
    PosType,
};
use crate::data_structs::Design;
use crate::tools::dmr::config::DmrConfig;
use crate::tools::dmr::data_structs::RegionStat;
use crate::utils::stats::lag1_autocorr;

/// Upper bound of the correlation parameter search interval.
const RHO_MAX: f64 = 0.95;
/// Cholesky pivot tolerance below which a matrix is treated as
/// non-positive-definite.
const PIVOT_TOL: f64 = 1e-12;

/// Fits the region-level generalized least squares model and returns the
/// Wald statistic for the condition effect.
///
/// The response is the arcsine-transformed methylation proportion per
/// (site, sample), weighted by coverage. Errors are independent across
/// samples; within a sample they follow `Corr(e_i, e_j) = rho^(d_ij /
/// d_scale)` with `d_scale` the region's mean adjacent gap. `rho` is
/// estimated by a bounded restricted-likelihood search capped at
/// `config.max_fit_iters` iterations; if the search fails, the lag-1
/// autocorrelation of the independence residuals is used instead.
///
/// A non-positive-definite correlation matrix, a solver failure or a
/// non-finite fit falls back to the independence structure for this region
/// only, reported through [RegionStat::indep_fallback].
pub fn fit_region(
    positions: &[PosType],
    meth: ArrayView2<CountType>,
    total: ArrayView2<CountType>,
    design: &Design,
    config: &DmrConfig,
) -> RegionStat {
    let ctx = GlsContext::new(positions, meth, total, design);
    if ctx.n <= ctx.p + 1 {
        warn!(
            "Region with {} observations cannot support a {}-parameter fit",
            ctx.n, ctx.p
        );
        return degenerate_stat();
    }

    let rho = ctx
        .reml_rho(config.max_fit_iters)
        .or_else(|| ctx.mom_rho())
        .unwrap_or(0.0)
        .clamp(0.0, RHO_MAX);

    if let Some(stat) = ctx
        .whitened_fit(rho)
        .and_then(|fit| ctx.wald(&fit, rho, false))
    {
        return stat;
    }

    debug!("Correlated fit failed at rho={}; using independence", rho);
    ctx.whitened_fit(0.0)
        .and_then(|fit| ctx.wald(&fit, 0.0, true))
        .unwrap_or_else(degenerate_stat)
}

fn degenerate_stat() -> RegionStat {
    RegionStat {
        coef:           0.0,
        se:             f64::INFINITY,
        stat:           0.0,
        rho:            0.0,
        indep_fallback: true,
    }
}

/// Immutable per-region fitting context: stacked design matrix, transformed
/// responses, coverage weights and normalized inter-site distances.
struct GlsContext {
    /// Stacked rows, sample-major: sample `s` occupies rows `s*l..(s+1)*l`.
    x:       Array2<f64>,
    z:       Array1<f64>,
    sqrt_w:  Array1<f64>,
    /// Cumulative genomic distance per site, in units of the mean adjacent
    /// gap.
    cum:     Vec<f64>,
    l:       usize,
    s:       usize,
    n:       usize,
    p:       usize,
}

struct WhitenedFit {
    beta1:     f64,
    /// Unit-variance coefficient variance, `[(X' V^-1 X)^-1]_{11}`.
    var1_unit: f64,
    rss:       f64,
    logdet_r:  f64,
    logdet_a:  f64,
    /// Whitened residuals, sample-major.
    resid:     Array1<f64>,
}

impl GlsContext {
    fn new(
        positions: &[PosType],
        meth: ArrayView2<CountType>,
        total: ArrayView2<CountType>,
        design: &Design,
    ) -> Self {
        let l = positions.len();
        let s = design.n_samples();
        let n = l * s;
        let indicator = design.indicator();
        let covariates = design.covariates();
        let p = 2 + covariates.len();

        let mut x = Array2::<f64>::zeros((n, p));
        let mut z = Array1::<f64>::zeros(n);
        let mut sqrt_w = Array1::<f64>::zeros(n);
        for sample in 0..s {
            for site in 0..l {
                let row = sample * l + site;
                x[[row, 0]] = 1.0;
                x[[row, 1]] = indicator[sample];
                for (c, cov) in covariates.iter().enumerate() {
                    x[[row, 2 + c]] = cov.values[sample];
                }
                let t = total[[site, sample]] as f64;
                let m = meth[[site, sample]] as f64;
                z[row] = (2.0 * m / t - 1.0).clamp(-1.0, 1.0).asin();
                sqrt_w[row] = t.sqrt();
            }
        }

        let span = (positions[l - 1] - positions[0]) as f64;
        let d_scale = if l > 1 && span > 0.0 {
            span / (l - 1) as f64
        }
        else {
            1.0
        };
        let mut cum = Vec::with_capacity(l);
        let mut acc = 0.0;
        cum.push(0.0);
        for pair in positions.windows(2) {
            acc += (pair[1] - pair[0]) as f64 / d_scale;
            cum.push(acc);
        }

        Self {
            x,
            z,
            sqrt_w,
            cum,
            l,
            s,
            n,
            p,
        }
    }

    /// Within-sample correlation matrix at `rho`.
    fn correlation(
        &self,
        rho: f64,
    ) -> Array2<f64> {
        let mut r = Array2::<f64>::eye(self.l);
        if rho > 0.0 {
            for i in 0..self.l {
                for j in 0..i {
                    let value = rho.powf(self.cum[i] - self.cum[j]);
                    r[[i, j]] = value;
                    r[[j, i]] = value;
                }
            }
        }
        r
    }

    /// Whitens the stacked system at `rho` and solves the resulting
    /// least-squares problem. `None` on a non-positive-definite correlation
    /// or normal-equation matrix.
    fn whitened_fit(
        &self,
        rho: f64,
    ) -> Option<WhitenedFit> {
        let chol_r = cholesky(&self.correlation(rho))?;

        let mut xt = Array2::<f64>::zeros((self.n, self.p));
        let mut zt = Array1::<f64>::zeros(self.n);
        let mut block = Array1::<f64>::zeros(self.l);
        for sample in 0..self.s {
            let rows = sample * self.l..(sample + 1) * self.l;
            for col in 0..self.p {
                for (k, row) in rows.clone().enumerate() {
                    block[k] = self.x[[row, col]] * self.sqrt_w[row];
                }
                let solved = forward_sub(&chol_r, &block);
                for (k, row) in rows.clone().enumerate() {
                    xt[[row, col]] = solved[k];
                }
            }
            for (k, row) in rows.clone().enumerate() {
                block[k] = self.z[row] * self.sqrt_w[row];
            }
            let solved = forward_sub(&chol_r, &block);
            for (k, row) in rows.clone().enumerate() {
                zt[row] = solved[k];
            }
        }

        let a = xt.t().dot(&xt);
        let b = xt.t().dot(&zt);
        let chol_a = cholesky(&a)?;
        let beta = chol_solve(&chol_a, &b);

        let resid = &zt - &xt.dot(&beta);
        let rss = resid.dot(&resid);

        let mut e1 = Array1::<f64>::zeros(self.p);
        e1[1] = 1.0;
        let var1_unit = chol_solve(&chol_a, &e1)[1];

        let logdet_r = 2.0
            * (0..self.l)
                .map(|i| chol_r[[i, i]].ln())
                .sum::<f64>();
        let logdet_a = 2.0
            * (0..self.p)
                .map(|i| chol_a[[i, i]].ln())
                .sum::<f64>();

        Some(WhitenedFit {
            beta1: beta[1],
            var1_unit,
            rss,
            logdet_r,
            logdet_a,
            resid,
        })
    }

    /// Lag-1 autocorrelation of the per-sample independence residuals,
    /// averaged over samples. Method-of-moments stand-in when the
    /// likelihood search fails.
    fn mom_rho(&self) -> Option<f64> {
        let fit = self.whitened_fit(0.0)?;
        let resid = fit.resid.as_slice()?;
        let per_sample = (0..self.s)
            .filter_map(|sample| {
                lag1_autocorr(&resid[sample * self.l..(sample + 1) * self.l])
            })
            .collect::<Vec<_>>();
        if per_sample.is_empty() {
            return None;
        }
        let mean = per_sample.iter().sum::<f64>() / per_sample.len() as f64;
        Some(mean.clamp(0.0, RHO_MAX))
    }

    /// Restricted-likelihood profile cost at `rho`, up to additive
    /// constants.
    fn reml_cost(
        &self,
        rho: f64,
    ) -> Option<f64> {
        let fit = self.whitened_fit(rho)?;
        if fit.rss <= 0.0 || !fit.rss.is_finite() {
            return None;
        }
        Some(
            self.s as f64 * fit.logdet_r
                + fit.logdet_a
                + (self.n - self.p) as f64 * fit.rss.ln(),
        )
    }

    /// Bounded 1-D restricted-likelihood search over `rho`.
    fn reml_rho(
        &self,
        max_iters: u64,
    ) -> Option<f64> {
        let solver = BrentOpt::new(0.0, RHO_MAX);
        let result = Executor::new(RemlProblem { ctx: self }, solver)
            .configure(|state| state.max_iters(max_iters))
            .run();
        match result {
            Ok(res) => res.state().best_param,
            Err(e) => {
                debug!("Correlation-parameter search failed: {}", e);
                None
            },
        }
    }

    fn wald(
        &self,
        fit: &WhitenedFit,
        rho: f64,
        indep_fallback: bool,
    ) -> Option<RegionStat> {
        let sigma2 = fit.rss / (self.n - self.p) as f64;
        let se = (sigma2 * fit.var1_unit).sqrt();
        if !se.is_finite() || se <= 0.0 || !fit.beta1.is_finite() {
            return None;
        }
        Some(RegionStat {
            coef: fit.beta1,
            se,
            stat: fit.beta1 / se,
            rho,
            indep_fallback,
        })
    }
}

struct RemlProblem<'a> {
    ctx: &'a GlsContext,
}

impl CostFunction for RemlProblem<'_> {
    type Output = f64;
    type Param = f64;

    fn cost(
        &self,
        rho: &Self::Param,
    ) -> Result<Self::Output, Error> {
        self.ctx
            .reml_cost(rho.clamp(0.0, RHO_MAX))
            .ok_or_else(|| {
                Error::msg("non-positive-definite correlation structure")
            })
    }
}

fn cholesky(a: &Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }
            if i == j {
                if !(sum > PIVOT_TOL) || !sum.is_finite() {
                    return None;
                }
                l[[i, j]] = sum.sqrt();
            }
            else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }
    Some(l)
}

/// Solves `L y = b` for lower-triangular `L`.
fn forward_sub(
    l: &Array2<f64>,
    b: &Array1<f64>,
) -> Array1<f64> {
    let n = b.len();
    let mut y = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = b[i];
        for k in 0..i {
            sum -= l[[i, k]] * y[k];
        }
        y[i] = sum / l[[i, i]];
    }
    y
}

/// Solves `L' x = b` for lower-triangular `L`.
fn back_sub(
    l: &Array2<f64>,
    b: &Array1<f64>,
) -> Array1<f64> {
    let n = b.len();
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = b[i];
        for k in i + 1..n {
            sum -= l[[k, i]] * x[k];
        }
        x[i] = sum / l[[i, i]];
    }
    x
}

/// Solves `L L' x = b`.
fn chol_solve(
    l: &Array2<f64>,
    b: &Array1<f64>,
) -> Array1<f64> {
    back_sub(l, &forward_sub(l, b))
}
