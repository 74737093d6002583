//! Error types for the page recount library

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the page recount library
#[derive(Error, Debug)]
pub enum Error {
    /// No candidate location yielded the file
    #[error("Download failed: {0}")]
    Download(String),

    /// Declared file type has no resolution strategy
    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),

    /// DOCX metadata could not be read or held no usable page count
    #[error("Metadata error: {0}")]
    Metadata(String),

    /// External DOCX to PDF conversion failed
    #[error("Conversion failed: {0}")]
    Conversion(#[from] ConversionError),

    /// PDF could not be opened or counted
    #[error("Render error: {0}")]
    Render(String),

    /// Writing the page count back to the record store failed
    #[error("Persist failed for record {id}: {reason}")]
    Persist { id: String, reason: String },

    /// PDF processing error
    #[error("PDF error: {0}")]
    Pdf(#[from] lopdf::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Zip container error
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// XML parsing error
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// HTTP transport error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// General error
    #[error("{0}")]
    General(String),
}

/// Ways the external converter can fail
#[derive(Error, Debug)]
pub enum ConversionError {
    /// The converter program could not be found
    #[error("converter binary not found: {}", .0.display())]
    MissingBinary(PathBuf),

    /// The converter did not finish in time and was killed
    #[error("converter timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// The converter exited unsuccessfully
    #[error("converter exited with {0}")]
    NonZeroExit(std::process::ExitStatus),

    /// The converter reported success but wrote nothing
    #[error("converter produced no output at {}", .0.display())]
    NoOutput(PathBuf),

    /// Spawning or waiting on the converter failed
    #[error("converter IO error: {0}")]
    Io(#[from] std::io::Error),
}
