//! Error types for the CLI

use thiserror::Error;

/// Main CLI error type
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Portal client error
    #[error("portal error: {0}")]
    Portal(#[from] stechuhr_client::PortalError),
}
