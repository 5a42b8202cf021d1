use datafusion::{arrow::error::ArrowError, error::DataFusionError};
use reqwest::StatusCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("DataFusion: {0}")]
    DataFusion(#[from] DataFusionError),

    #[error("Arrow: {0}")]
    Arrow(#[from] ArrowError),

    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Archive: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("API request failed: {0}")]
    ApiFailure(#[from] reqwest::Error),

    #[error("Failed to parse URL: {0}")]
    UrlParsingFailed(#[from] url::ParseError),

    #[error("The start date: '{start_date}' is greater than the end date: '{end_date}'")]
    StartDateAfterEndDate {
        start_date: String,
        end_date: String,
    },

    #[error("Authentication failed for account {account_id}: {detail}")]
    AuthFailed { account_id: String, detail: String },

    #[error("'{endpoint}' still rate limited after {attempts} retries")]
    RateLimited {
        endpoint: &'static str,
        attempts: u32,
    },

    #[error("Report {uuid} not ready after {attempts} status checks")]
    ReportTimeout { uuid: String, attempts: u32 },

    #[error("'{endpoint}' responded with {status}: {detail}")]
    UnexpectedStatus {
        endpoint: &'static str,
        status: StatusCode,
        detail: String,
    },

    #[error("Malformed report file {path}: {message}")]
    MalformedReport { path: String, message: String },

    #[error("{message}")]
    NoData { message: String },
}
