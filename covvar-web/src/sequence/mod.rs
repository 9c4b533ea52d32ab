//! Sequence input: FASTA validation and remote lookup.

pub mod fasta;
pub mod fetcher;

pub use fasta::validate_fasta;
pub use fetcher::{SequenceDatabase, SequenceFetcher, SequenceSource};
