//! Service configuration.
//!
//! [`AppConfig`] is built once at startup and shared read-only (usually as
//! `Arc<AppConfig>`). Defaults are overridden by environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::api::server::ApiServerConfig;

/// Default upper bound on FASTA records per submission.
pub const DEFAULT_MAX_SEQUENCES: usize = 1000;

/// Default request body limit (50 MiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Default number of days a finished job directory is kept.
pub const DEFAULT_JOB_RETENTION_DAYS: u32 = 7;

/// How the external classification tool is launched.
#[derive(Debug, Clone)]
pub struct ToolConfig {
    /// Executable to spawn.
    pub program: PathBuf,
    /// Arguments placed before the per-job flags (e.g. `-m deepcovvar`).
    pub program_args: Vec<String>,
    /// Directory holding the tool's code, exported as `PYTHONPATH`.
    pub code_path: Option<PathBuf>,
    /// Wall-clock limit for a combined (all phases) run.
    pub combined_timeout: Duration,
    /// Wall-clock limit for each single-phase run.
    pub phase_timeout: Duration,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("python3"),
            program_args: vec!["-m".to_string(), "deepcovvar".to_string()],
            code_path: None,
            combined_timeout: Duration::from_secs(3600),
            phase_timeout: Duration::from_secs(1800),
        }
    }
}

/// Remote sequence database endpoints.
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// NCBI E-utilities base URL.
    pub ncbi_base_url: String,
    /// UniProt REST base URL; `<base>/<accession>.fasta` is fetched.
    pub uniprot_base_url: String,
    /// Contact address sent with NCBI requests.
    pub ncbi_email: Option<String>,
    pub timeout: Duration,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            ncbi_base_url: "https://eutils.ncbi.nlm.nih.gov/entrez/eutils".to_string(),
            uniprot_base_url: "https://rest.uniprot.org/uniprotkb".to_string(),
            ncbi_email: None,
            timeout: Duration::from_secs(30),
        }
    }
}

/// Immutable application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Root of the per-job directories.
    pub jobs_dir: PathBuf,
    /// Where submitted input files are stored.
    pub upload_dir: PathBuf,
    pub log_dir: PathBuf,
    pub max_sequences: usize,
    pub max_upload_bytes: usize,
    /// Accepted upload extensions, lowercase without the dot.
    pub allowed_extensions: Vec<String>,
    /// 0 keeps jobs forever.
    pub job_retention_days: u32,
    pub tool: ToolConfig,
    pub fetcher: FetcherConfig,
    pub server: ApiServerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            jobs_dir: PathBuf::from("jobs"),
            upload_dir: PathBuf::from("uploads"),
            log_dir: PathBuf::from("logs"),
            max_sequences: DEFAULT_MAX_SEQUENCES,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            allowed_extensions: ["fasta", "fa", "faa", "fna", "txt"]
                .into_iter()
                .map(String::from)
                .collect(),
            job_retention_days: DEFAULT_JOB_RETENTION_DAYS,
            tool: ToolConfig::default(),
            fetcher: FetcherConfig::default(),
            server: ApiServerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env_or_default() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    ///
    /// Empty values are treated as unset; unparseable numbers are ignored
    /// with a warning.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let mut config = Self::default();

        if let Some(dir) = get("COVVAR_JOBS_DIR") {
            config.jobs_dir = PathBuf::from(dir);
        }
        if let Some(dir) = get("COVVAR_UPLOAD_DIR") {
            config.upload_dir = PathBuf::from(dir);
        }
        if let Some(dir) = get("COVVAR_LOG_DIR") {
            config.log_dir = PathBuf::from(dir);
        }
        if let Some(max) = parse_var(&get, "COVVAR_MAX_SEQUENCES") {
            config.max_sequences = max;
        }
        if let Some(bytes) = parse_var(&get, "COVVAR_MAX_UPLOAD_BYTES") {
            config.max_upload_bytes = bytes;
        }
        if let Some(days) = parse_var(&get, "COVVAR_RETENTION_DAYS") {
            config.job_retention_days = days;
        }

        if let Some(program) = get("COVVAR_TOOL_PROGRAM") {
            config.tool.program = PathBuf::from(program);
        }
        if let Some(path) = get("COVVAR_TOOL_PATH") {
            config.tool.code_path = Some(PathBuf::from(path));
        }
        if let Some(secs) = parse_var::<u64, _>(&get, "COVVAR_COMBINED_TIMEOUT_SECS") {
            config.tool.combined_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parse_var::<u64, _>(&get, "COVVAR_PHASE_TIMEOUT_SECS") {
            config.tool.phase_timeout = Duration::from_secs(secs);
        }

        if let Some(url) = get("COVVAR_NCBI_URL") {
            config.fetcher.ncbi_base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(url) = get("COVVAR_UNIPROT_URL") {
            config.fetcher.uniprot_base_url = url.trim_end_matches('/').to_string();
        }
        if let Some(email) = get("COVVAR_NCBI_EMAIL") {
            config.fetcher.ncbi_email = Some(email);
        }

        if let Some(bind_address) = get("API_BIND_ADDRESS") {
            config.server.bind_address = bind_address;
        }
        if let Some(port) = parse_var(&get, "API_PORT") {
            config.server.port = port;
        }

        config
    }

    /// Directory owned by a single job.
    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.jobs_dir.join(job_id)
    }

    /// Whether `filename` carries one of the accepted upload extensions.
    pub fn is_allowed_upload(&self, filename: &str) -> bool {
        let Some((_, ext)) = filename.rsplit_once('.') else {
            return false;
        };
        let ext = ext.to_ascii_lowercase();
        self.allowed_extensions.iter().any(|allowed| *allowed == ext)
    }
}

fn parse_var<T, G>(get: &G, key: &str) -> Option<T>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    let raw = get(key)?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparseable configuration value");
            None
        }
    }
}
