//! Input data loading from HTTP endpoints and local files.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::Client;
use thiserror::Error;
use tokio::fs;
use tracing::{info, warn};

use crate::job::{DataSource, FileType, SourceType};
use crate::table::Table;

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_secs(2);

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{0}")]
    Transient(String),
    #[error("{0}")]
    Permanent(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Loads a job's input as a [`Table`], retrying transient failures
/// with exponential backoff.
#[derive(Clone)]
pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    pub fn new(request_timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("Failed to create HTTP client");
        Self { client }
    }

    pub async fn fetch(&self, source: &DataSource) -> Result<Table, FetchError> {
        let mut attempt = 1;
        let mut delay = BACKOFF_BASE;
        loop {
            match self.fetch_once(source).await {
                Ok(table) => {
                    info!(
                        location = %source.location,
                        rows = table.row_count(),
                        "fetched input data"
                    );
                    return Ok(table);
                }
                Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                    warn!(
                        location = %source.location,
                        attempt,
                        "fetch failed, retrying in {}s: {e}",
                        delay.as_secs()
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(location = %source.location, attempt, "fetch failed: {e}");
                    return Err(e);
                }
            }
        }
    }

    async fn fetch_once(&self, source: &DataSource) -> Result<Table, FetchError> {
        match source.source_type {
            SourceType::Api => self.fetch_api(&source.location).await,
            SourceType::File => {
                let file_type = source.file_type.ok_or_else(|| {
                    FetchError::Permanent("file source is missing file_type".to_string())
                })?;
                fetch_file(&source.location, file_type).await
            }
        }
    }

    async fn fetch_api(&self, url: &str) -> Result<Table, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        if status.is_client_error() {
            return Err(FetchError::Permanent(format!(
                "GET {url} returned {status}"
            )));
        }
        if !status.is_success() {
            return Err(FetchError::Transient(format!(
                "GET {url} returned {status}"
            )));
        }

        let body = response
            .text()
            .await
            .map_err(classify_request_error)?;
        parse_json_table(&body)
    }
}

async fn fetch_file(location: &str, file_type: FileType) -> Result<Table, FetchError> {
    let path = resolve_path(location);
    let content = fs::read_to_string(&path)
        .await
        .map_err(|e| classify_file_error(&path.display().to_string(), &e))?;

    match file_type {
        FileType::Csv => {
            if content.trim().is_empty() {
                return Err(FetchError::Permanent(format!(
                    "File is empty: {location}"
                )));
            }
            Table::from_csv(&content)
                .map_err(|e| FetchError::Permanent(format!("Error parsing csv file {location}: {e}")))
        }
        FileType::Json => parse_json_table(&content),
    }
}

/// Uploaded files are referenced by their canonical `/data/uploads/…`
/// form, resolved relative to the working directory.
fn resolve_path(location: &str) -> PathBuf {
    location
        .strip_prefix("/data/uploads/")
        .map_or_else(|| PathBuf::from(location), |rest| {
            PathBuf::from("data/uploads").join(rest)
        })
}

fn parse_json_table(text: &str) -> Result<Table, FetchError> {
    let value: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| FetchError::Permanent(format!("response is not valid JSON: {e}")))?;
    Table::from_json(&value)
        .map_err(|e| FetchError::Permanent(format!("unexpected data shape: {e}")))
}

fn classify_request_error(e: reqwest::Error) -> FetchError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        FetchError::Transient(e.to_string())
    } else {
        FetchError::Permanent(e.to_string())
    }
}

fn classify_file_error(path: &str, e: &std::io::Error) -> FetchError {
    use std::io::ErrorKind;
    match e.kind() {
        ErrorKind::NotFound => FetchError::Permanent(format!("File not found: {path}")),
        ErrorKind::PermissionDenied | ErrorKind::InvalidInput | ErrorKind::InvalidData => {
            FetchError::Permanent(format!("Error reading file {path}: {e}"))
        }
        _ => FetchError::Transient(format!("Error reading file {path}: {e}")),
    }
}
