// Error types for db-tunnel

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("SSH key file not found: {0}")]
    KeyFileNotFound(PathBuf),

    #[error("Process table unavailable: {0}")]
    ProcessTable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
