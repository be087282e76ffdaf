use anyhow::{
    bail,
    ensure,
    Result,
};
use itertools::Itertools;
use log::debug;
use ndarray::{
    s,
    Array2,
    ArrayView2,
    Axis,
};
use serde::{
    Deserialize,
    Serialize,
};

use crate::data_structs::typedef::{
    CountType,
    PosType,
    SeqName,
};

/// A single CpG locus.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Locus {
    pub chr: SeqName,
    pub pos: PosType,
}

impl Locus {
    pub fn new(
        chr: impl Into<SeqName>,
        pos: PosType,
    ) -> Self {
        Self {
            chr: chr.into(),
            pos,
        }
    }
}

/// Per-site methylated and total read counts over a set of samples.
///
/// Sites are rows, samples are columns. Loci are grouped by chromosome and
/// strictly position-sorted within each chromosome; these invariants are
/// checked once at construction and hold for the lifetime of the value.
#[derive(Debug, Clone)]
pub struct MethCounts {
    loci:         Vec<Locus>,
    meth:         Array2<CountType>,
    total:        Array2<CountType>,
    chrom_bounds: Vec<(SeqName, std::ops::Range<usize>)>,
}

impl MethCounts {
    pub fn try_new(
        loci: Vec<Locus>,
        meth: Array2<CountType>,
        total: Array2<CountType>,
    ) -> Result<Self> {
        ensure!(
            meth.dim() == total.dim(),
            "Methylated count matrix shape {:?} does not match total count \
             matrix shape {:?}",
            meth.dim(),
            total.dim()
        );
        ensure!(
            meth.nrows() == loci.len(),
            "Count matrices have {} rows but {} loci were supplied",
            meth.nrows(),
            loci.len()
        );
        ensure!(meth.ncols() > 0, "Count matrices have no samples");

        for ((site, sample), (&m, &t)) in
            meth.indexed_iter().zip(total.iter()).map(|(a, b)| (a.0, (a.1, b)))
        {
            ensure!(
                m <= t,
                "Methylated count {} exceeds total count {} at site {} sample \
                 {}",
                m,
                t,
                site,
                sample
            );
        }

        let chrom_bounds = chromosome_runs(&loci)?;
        Ok(Self {
            loci,
            meth,
            total,
            chrom_bounds,
        })
    }

    pub fn n_sites(&self) -> usize {
        self.loci.len()
    }

    pub fn n_samples(&self) -> usize {
        self.meth.ncols()
    }

    pub fn loci(&self) -> &[Locus] {
        &self.loci
    }

    pub fn meth(&self) -> ArrayView2<CountType> {
        self.meth.view()
    }

    pub fn total(&self) -> ArrayView2<CountType> {
        self.total.view()
    }

    /// Removes every site with zero total coverage in any sample.
    pub fn filter_covered(&self) -> Result<Self> {
        let kept = (0..self.n_sites())
            .filter(|&i| {
                self.total
                    .row(i)
                    .iter()
                    .all(|&t| t > 0)
            })
            .collect_vec();
        if kept.len() == self.n_sites() {
            return Ok(self.clone());
        }
        debug!(
            "Coverage filter dropped {} of {} sites",
            self.n_sites() - kept.len(),
            self.n_sites()
        );
        let loci = kept
            .iter()
            .map(|&i| self.loci[i].clone())
            .collect_vec();
        Self::try_new(
            loci,
            self.meth.select(Axis(0), &kept),
            self.total.select(Axis(0), &kept),
        )
    }

    /// Checks the post-filter invariant that every (site, sample) has
    /// positive total coverage.
    pub fn assert_covered(&self) -> Result<()> {
        if let Some((idx, _)) = self
            .total
            .indexed_iter()
            .find(|(_, &t)| t == 0)
        {
            bail!(
                "Site {} ({}) has zero total coverage in sample {}",
                idx.0,
                self.loci[idx.0].chr,
                idx.1
            );
        }
        Ok(())
    }

    /// Iterates per-chromosome views in input order.
    pub fn chromosomes(&self) -> impl Iterator<Item = ChromView<'_>> {
        self.chrom_bounds
            .iter()
            .map(move |(chr, range)| {
                ChromView {
                    chr: chr.as_str(),
                    loci: &self.loci[range.clone()],
                    meth: self
                        .meth
                        .slice(s![range.clone(), ..]),
                    total: self
                        .total
                        .slice(s![range.clone(), ..]),
                }
            })
    }

    pub fn n_chromosomes(&self) -> usize {
        self.chrom_bounds.len()
    }
}

/// Validates chromosome grouping and position ordering, returning the
/// per-chromosome index ranges.
fn chromosome_runs(
    loci: &[Locus]
) -> Result<Vec<(SeqName, std::ops::Range<usize>)>> {
    let mut runs: Vec<(SeqName, std::ops::Range<usize>)> = Vec::new();
    for (i, locus) in loci.iter().enumerate() {
        let continues = runs
            .last()
            .is_some_and(|(chr, _)| *chr == locus.chr);
        if continues {
            let (_, range) = runs.last_mut().unwrap();
            let prev = &loci[range.end - 1];
            ensure!(
                locus.pos > prev.pos,
                "Loci on {} are not strictly position-sorted: {} after {}",
                locus.chr,
                locus.pos,
                prev.pos
            );
            range.end = i + 1;
        }
        else {
            ensure!(
                runs.iter().all(|(chr, _)| *chr != locus.chr),
                "Loci of chromosome {} are not contiguous",
                locus.chr
            );
            runs.push((locus.chr.clone(), i..i + 1));
        }
    }
    Ok(runs)
}

/// Borrowed single-chromosome slice of a [MethCounts].
#[derive(Debug, Clone)]
pub struct ChromView<'a> {
    chr:   &'a str,
    loci:  &'a [Locus],
    meth:  ArrayView2<'a, CountType>,
    total: ArrayView2<'a, CountType>,
}

impl<'a> ChromView<'a> {
    pub fn chr(&self) -> &'a str {
        self.chr
    }

    pub fn len(&self) -> usize {
        self.loci.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loci.is_empty()
    }

    pub fn positions(&self) -> Vec<PosType> {
        self.loci
            .iter()
            .map(|l| l.pos)
            .collect_vec()
    }

    pub fn meth(&self) -> ArrayView2<'a, CountType> {
        self.meth
    }

    pub fn total(&self) -> ArrayView2<'a, CountType> {
        self.total
    }

    /// Sub-view over a contiguous site index range of this chromosome.
    pub fn site_range(
        &self,
        range: std::ops::Range<usize>,
    ) -> ChromView<'a> {
        ChromView {
            chr:   self.chr,
            loci:  &self.loci[range.clone()],
            meth:  self.meth.slice_move(s![range.clone(), ..]),
            total: self.total.slice_move(s![range, ..]),
        }
    }
}
