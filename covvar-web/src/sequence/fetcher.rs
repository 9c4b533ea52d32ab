//! Remote sequence lookup by accession.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, info, warn};

use crate::config::FetcherConfig;
use crate::{Error, Result};

/// Remote databases sequences can be fetched from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceDatabase {
    Ncbi,
    Uniprot,
}

impl SequenceDatabase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ncbi => "ncbi",
            Self::Uniprot => "uniprot",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Ncbi => "NCBI",
            Self::Uniprot => "UniProt",
        }
    }
}

impl fmt::Display for SequenceDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SequenceDatabase {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "ncbi" => Ok(Self::Ncbi),
            "uniprot" => Ok(Self::Uniprot),
            _ => Err(Error::Fetch(format!("Unsupported database: {s}"))),
        }
    }
}

/// Source of FASTA text for an accession.
#[async_trait]
pub trait SequenceSource: Send + Sync {
    async fn fetch(&self, accession: &str, database: SequenceDatabase) -> Result<String>;
}

/// HTTP client for NCBI E-utilities and the UniProt REST API.
#[derive(Debug, Clone)]
pub struct SequenceFetcher {
    client: reqwest::Client,
    config: FetcherConfig,
}

impl SequenceFetcher {
    pub fn new(config: FetcherConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(concat!("covvar-web/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|error| {
                warn!(error = %error, "Failed to build HTTP client; using reqwest defaults");
                reqwest::Client::new()
            });
        Self { client, config }
    }

    async fn efetch(&self, accession: &str, db: &str) -> Result<String> {
        let url = format!("{}/efetch.fcgi", self.config.ncbi_base_url);
        let mut query = vec![
            ("db", db),
            ("id", accession),
            ("rettype", "fasta"),
            ("retmode", "text"),
        ];
        if let Some(email) = &self.config.ncbi_email {
            query.push(("email", email.as_str()));
        }

        let response = self.client.get(&url).query(&query).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(Error::Other(format!(
                "efetch ({db}) returned status code {}",
                status.as_u16()
            )));
        }
        Ok(body)
    }

    async fn fetch_ncbi(&self, accession: &str) -> Result<String> {
        let protein = self.efetch(accession, "protein").await?;
        if !protein.trim().is_empty() {
            return Ok(protein);
        }
        debug!(accession, "No protein record, trying nucleotide");
        self.efetch(accession, "nucleotide").await
    }

    async fn fetch_uniprot(&self, accession: &str) -> Result<String> {
        let url = format!("{}/{}.fasta", self.config.uniprot_base_url, accession);
        let response = self.client.get(&url).send().await?;
        if response.status() != StatusCode::OK {
            return Err(Error::Other(format!(
                "UniProt returned status code {}",
                response.status().as_u16()
            )));
        }
        Ok(response.text().await?)
    }
}

#[async_trait]
impl SequenceSource for SequenceFetcher {
    async fn fetch(&self, accession: &str, database: SequenceDatabase) -> Result<String> {
        let result = match database {
            SequenceDatabase::Ncbi => self.fetch_ncbi(accession).await,
            SequenceDatabase::Uniprot => self.fetch_uniprot(accession).await,
        };

        match result {
            Ok(fasta) => {
                info!(accession, %database, bytes = fasta.len(), "Fetched sequence");
                Ok(fasta)
            }
            Err(e) => {
                let message = match e {
                    Error::Other(msg) => msg,
                    other => other.to_string(),
                };
                warn!(accession, %database, "Sequence fetch failed: {}", message);
                Err(Error::Fetch(format!(
                    "Failed to fetch sequence from {}: {}",
                    database.label(),
                    message
                )))
            }
        }
    }
}
