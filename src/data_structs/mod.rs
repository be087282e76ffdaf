//! Fundamental data types: loci and count matrices, the two-condition
//! experimental design, and shared type aliases.

pub mod counts;
pub mod design;
pub mod typedef;

pub use counts::{
    ChromView,
    Locus,
    MethCounts,
};
pub use design::{
    Covariate,
    Design,
};
