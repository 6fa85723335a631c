//! Configuration errors

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unsupported graph format '{}' (expected .toml or .json)", path.display())]
    UnsupportedFormat { path: PathBuf },

    #[error("graph '{name}' not found (searched: {})", join_paths(.searched))]
    GraphNotFound { name: String, searched: Vec<PathBuf> },

    #[error("tool '{name}': {message}")]
    InvalidTool { name: String, message: String },

    #[error("default agent '{name}' is not configured")]
    UnknownAgent { name: String },
}

fn join_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
