//! Errors that stop a run before any work is done

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Credential file not found: {path}")]
    MissingCredentials { path: PathBuf },

    #[error("Sheet '{sheet}' not found in spreadsheet {spreadsheet_id}")]
    SheetNotFound {
        spreadsheet_id: String,
        sheet: String,
    },

    #[error("Configuration error: {key} is not set")]
    MissingConfig { key: &'static str },
}

/// Header problems in a source table
#[derive(Error, Debug, PartialEq)]
pub enum SchemaError {
    #[error("Missing expected headers: {}", .0.join(", "))]
    MissingHeaders(Vec<String>),

    #[error("No shipment identifier column found (expected one of: {})", .0.join(", "))]
    MissingIdentifierColumn(Vec<String>),
}
