pub use crate::data_structs::typedef::{
    CountType,
    DensityType,
    PosType,
    SeqName,
};
pub use crate::data_structs::{
    ChromView,
    Covariate,
    Design,
    Locus,
    MethCounts,
};
pub use crate::tools::dmr::significance::NullPool;
pub use crate::tools::dmr::{
    run_dmr,
    CandidateRegion,
    DmrAnalysis,
    DmrConfig,
    DmrRecord,
    DmrResult,
    RegionStat,
    SmoothedTrack,
};
