use std::path::PathBuf;

use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum CurateError {
    #[error("invalid subject label: {0}")]
    InvalidSubject(String),

    #[error("invalid session label: {0}")]
    InvalidSession(String),

    #[error("invalid phase-encoding direction: {0}")]
    InvalidPhaseDir(String),

    #[error("invalid field-map target class: {0}")]
    InvalidTargetClass(String),

    #[error("invalid phase-encoding axis: {0}")]
    InvalidPhaseAxis(String),

    #[error("unrecognized BIDS filename: {0}")]
    InvalidFilename(String),

    #[error("required sidecar field {field} not found in {path}")]
    MissingField { field: String, path: Utf8PathBuf },

    #[error("malformed sidecar {path}: {message}")]
    InvalidSidecar { path: Utf8PathBuf, message: String },

    #[error("expected file not found: {0}")]
    MissingFile(Utf8PathBuf),

    #[error("expected directory not found: {0}")]
    MissingDirectory(Utf8PathBuf),

    #[error("registry error in {path}: {message}")]
    Registry { path: Utf8PathBuf, message: String },

    #[error("missing config file bids-curator.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
