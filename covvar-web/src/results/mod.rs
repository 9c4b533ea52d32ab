//! Reading finished jobs: phase tables, consolidation and statistics.

pub mod statistics;
pub mod table;

pub use statistics::{
    ConsolidatedResults, JobStatistics, LoadedPhase, compute_statistics, consolidate,
    first_phase_csv, load_phases,
};
pub use table::{LabelCounts, PhaseTable};
