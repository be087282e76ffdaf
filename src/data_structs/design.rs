use anyhow::{
    bail,
    ensure,
    Result,
};
use itertools::Itertools;
use serde::{
    Deserialize,
    Serialize,
};

/// A numeric per-sample adjustment covariate. Categorical covariates are
/// pre-encoded by the caller as indicator columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Covariate {
    pub name:   String,
    pub values: Vec<f64>,
}

impl Covariate {
    pub fn new(
        name: impl Into<String>,
        values: Vec<f64>,
    ) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

/// Assignment of each sample to one of two condition labels, plus optional
/// adjustment covariates.
///
/// The label that sorts first lexicographically becomes condition one; its
/// coefficient is the effect reported by the region statistic. Both
/// conditions must have at least two samples.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Design {
    condition_names: (String, String),
    group_one:       Vec<usize>,
    n_samples:       usize,
    covariates:      Vec<Covariate>,
}

impl Design {
    pub fn try_new<S: AsRef<str>>(
        labels: &[S],
        covariates: Vec<Covariate>,
    ) -> Result<Self> {
        let distinct = labels
            .iter()
            .map(|l| l.as_ref().to_string())
            .unique()
            .sorted()
            .collect_vec();
        match distinct.len() {
            0 => bail!("No sample labels supplied"),
            2 => {},
            n => {
                bail!(
                    "Expected exactly two condition labels, got {}: {:?}",
                    n,
                    distinct
                )
            },
        }

        let group_one = labels
            .iter()
            .positions(|l| l.as_ref() == distinct[0])
            .collect_vec();
        let n_samples = labels.len();
        ensure!(
            group_one.len() >= 2 && n_samples - group_one.len() >= 2,
            "Each condition needs at least 2 samples; got {} vs {}",
            group_one.len(),
            n_samples - group_one.len()
        );
        for cov in covariates.iter() {
            ensure!(
                cov.values.len() == n_samples,
                "Covariate {} has {} values for {} samples",
                cov.name,
                cov.values.len(),
                n_samples
            );
        }

        Ok(Self {
            condition_names: (distinct[0].clone(), distinct[1].clone()),
            group_one,
            n_samples,
            covariates,
        })
    }

    pub fn n_samples(&self) -> usize {
        self.n_samples
    }

    pub fn condition_names(&self) -> (&str, &str) {
        (
            self.condition_names.0.as_str(),
            self.condition_names.1.as_str(),
        )
    }

    /// Sorted sample indices of condition one.
    pub fn group_one(&self) -> &[usize] {
        &self.group_one
    }

    pub fn group_two(&self) -> Vec<usize> {
        (0..self.n_samples)
            .filter(|i| !self.group_one.contains(i))
            .collect_vec()
    }

    pub fn group_sizes(&self) -> (usize, usize) {
        (
            self.group_one.len(),
            self.n_samples - self.group_one.len(),
        )
    }

    /// 0/1 condition-one indicator per sample.
    pub fn indicator(&self) -> Vec<f64> {
        (0..self.n_samples)
            .map(|i| {
                if self.group_one.contains(&i) {
                    1.0
                }
                else {
                    0.0
                }
            })
            .collect_vec()
    }

    pub fn covariates(&self) -> &[Covariate] {
        &self.covariates
    }

    /// The same design with condition one reassigned to `group_one`
    /// (covariates unchanged). Used by the permutation generator.
    pub fn with_group_one(
        &self,
        group_one: &[usize],
    ) -> Self {
        let mut group_one = group_one.to_vec();
        group_one.sort_unstable();
        debug_assert_eq!(group_one.len(), self.group_one.len());
        Self {
            condition_names: self.condition_names.clone(),
            group_one,
            n_samples: self.n_samples,
            covariates: self.covariates.clone(),
        }
    }
}
