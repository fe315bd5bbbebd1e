//! Error types for backend descriptor validation

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DescriptorError {
    #[error("Backend #{index} has an empty name")]
    EmptyName { index: usize },

    #[error("Duplicate backend name '{name}' (backends #{first} and #{second})")]
    DuplicateName {
        name: String,
        first: usize,
        second: usize,
    },

    #[error("Backend '{name}' has an empty command")]
    EmptyCommand { name: String },

    #[error("Backend '{name}' has an invalid url '{url}': {reason}")]
    InvalidUrl {
        name: String,
        url: String,
        reason: String,
    },

    #[error("Invalid backend list: {0}")]
    Malformed(String),
}

pub type DescriptorResult<T> = Result<T, DescriptorError>;
