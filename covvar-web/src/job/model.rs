//! Job data model.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Number of classification phases the tool knows about.
pub const PHASE_COUNT: u8 = 5;

/// Phases that accept a caller-supplied threshold pair.
pub const THRESHOLD_PHASES: [u8; 3] = [1, 2, 3];

/// Manifest key for a phase, e.g. `phase_3`.
pub fn phase_key(phase: u8) -> String {
    format!("phase_{phase}")
}

/// Which phases a job runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhaseSelection {
    /// The `all` sentinel.
    All,
    /// An explicit, non-empty set of phases in `1..=PHASE_COUNT`.
    Phases(BTreeSet<u8>),
}

impl PhaseSelection {
    /// Build an explicit selection, rejecting empty sets and unknown phases.
    pub fn explicit(phases: impl IntoIterator<Item = u8>) -> Result<Self> {
        let phases: BTreeSet<u8> = phases.into_iter().collect();
        if phases.is_empty() {
            return Err(Error::validation("At least one phase must be selected"));
        }
        if let Some(bad) = phases.iter().find(|p| !(1..=PHASE_COUNT).contains(*p)) {
            return Err(Error::validation(format!(
                "Invalid phase {bad}. Phases must be between 1 and {PHASE_COUNT}"
            )));
        }
        Ok(Self::Phases(phases))
    }

    /// Parse the raw values submitted by a client.
    ///
    /// No values, or any value equal to `all`, selects every phase.
    pub fn from_values<S: AsRef<str>>(values: &[S]) -> Result<Self> {
        let values: Vec<&str> = values
            .iter()
            .map(|v| v.as_ref().trim())
            .filter(|v| !v.is_empty())
            .collect();

        if values.is_empty() || values.iter().any(|v| v.eq_ignore_ascii_case("all")) {
            return Ok(Self::All);
        }

        let phases = values
            .iter()
            .map(|v| {
                v.parse::<u8>()
                    .map_err(|_| Error::validation(format!("Invalid phase value: {v}")))
            })
            .collect::<Result<Vec<_>>>()?;

        Self::explicit(phases)
    }

    /// Whether the tool should be run once over every phase.
    ///
    /// True for the sentinel and for an explicit list naming all phases.
    pub fn is_combined(&self) -> bool {
        match self {
            Self::All => true,
            Self::Phases(phases) => phases.len() == PHASE_COUNT as usize,
        }
    }

    /// The phases covered by this selection, ascending.
    pub fn effective_phases(&self) -> Vec<u8> {
        match self {
            Self::All => (1..=PHASE_COUNT).collect(),
            Self::Phases(phases) => phases.iter().copied().collect(),
        }
    }
}

impl fmt::Display for PhaseSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Phases(phases) => {
                let list: Vec<String> = phases.iter().map(u8::to_string).collect();
                f.write_str(&list.join(","))
            }
        }
    }
}

/// Low/high decision thresholds handed to the tool.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub low: f64,
    pub high: f64,
}

impl Thresholds {
    pub const DEFAULT: Thresholds = Thresholds {
        low: 50.0,
        high: 50.0,
    };

    pub fn new(low: f64, high: f64) -> Self {
        Self { low, high }
    }

    /// Command-line form: `[low, high]`.
    pub fn to_args(self) -> [String; 2] {
        [self.low.to_string(), self.high.to_string()]
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl FromStr for Thresholds {
    type Err = Error;

    /// Parse `"low,high"`.
    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split(',').map(str::trim).collect();
        let [low, high] = parts.as_slice() else {
            return Err(Error::validation(format!(
                "Expected two comma-separated threshold values, got '{s}'"
            )));
        };
        let low: f64 = low
            .parse()
            .map_err(|_| Error::validation(format!("Invalid threshold value '{low}'")))?;
        let high: f64 = high
            .parse()
            .map_err(|_| Error::validation(format!("Invalid threshold value '{high}'")))?;
        if !low.is_finite() || !high.is_finite() {
            return Err(Error::validation("Threshold values must be finite numbers"));
        }
        Ok(Self { low, high })
    }
}

/// Kind of sequences in the input file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SequenceType {
    #[default]
    Protein,
    Nucleotide,
}

impl FromStr for SequenceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "protein" => Ok(Self::Protein),
            "nucleotide" | "dna" | "rna" => Ok(Self::Nucleotide),
            other => Err(Error::validation(format!("Unsupported sequence type: {other}"))),
        }
    }
}

/// Per-job options.
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
    pub verbose: bool,
    pub sequence_type: SequenceType,
    /// Custom thresholds keyed by phase; only phases 1-3 are honored.
    pub thresholds: BTreeMap<u8, Thresholds>,
    /// Address the submitter asked to be notified at.
    pub email: Option<String>,
}

/// One classification job.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub input_file: PathBuf,
    pub phases: PhaseSelection,
    pub options: JobOptions,
    /// The job's own directory; status, manifest and tool output live here.
    pub output_dir: PathBuf,
}

impl Job {
    pub fn new(
        id: impl Into<String>,
        input_file: impl Into<PathBuf>,
        phases: PhaseSelection,
        options: JobOptions,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: id.into(),
            input_file: input_file.into(),
            phases,
            options,
            output_dir: output_dir.into(),
        }
    }

    /// Thresholds used for `phase` in per-phase mode.
    pub fn thresholds_for(&self, phase: u8) -> Thresholds {
        if !THRESHOLD_PHASES.contains(&phase) {
            return Thresholds::DEFAULT;
        }
        self.options
            .thresholds
            .get(&phase)
            .copied()
            .unwrap_or_default()
    }

    /// Input file name without directory or extension.
    pub fn input_stem(&self) -> String {
        input_stem(&self.input_file)
    }
}

pub(crate) fn input_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}
