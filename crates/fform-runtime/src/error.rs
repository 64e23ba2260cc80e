#![forbid(unsafe_code)]

//! Error types for the form engine.

use fform_core::PathError;
use futures::task::SpawnError;
use thiserror::Error;

/// Error type carried by failed validator and submit futures.
pub type BoxError = Box<dyn std::error::Error>;

pub type Result<T> = std::result::Result<T, FormError>;

/// Contract violations raised at the call that commits them.
///
/// Validation and submission errors are data and never appear here.
#[derive(Debug, Error)]
pub enum FormError {
    #[error("no submit handler configured")]
    MissingSubmitHandler,

    #[error("unrecognised option: {key}")]
    UnrecognisedOption { key: String },

    #[error("option {key} expects {expected}")]
    InvalidOptionValue { key: String, expected: &'static str },

    #[error("no mutator named {name}")]
    UnknownMutator { name: String },

    #[error("path error: {0}")]
    Path(#[from] PathError),

    #[error("submit handler failed: {0}")]
    SubmitRejected(BoxError),

    #[error("could not spawn task: {0}")]
    Spawn(#[from] SpawnError),

    #[error("invalid options: {0}")]
    Options(#[from] serde_json::Error),
}

impl FormError {
    #[must_use]
    pub fn unrecognised(key: impl Into<String>) -> Self {
        Self::UnrecognisedOption { key: key.into() }
    }

    #[must_use]
    pub fn invalid_option(key: impl Into<String>, expected: &'static str) -> Self {
        Self::InvalidOptionValue {
            key: key.into(),
            expected,
        }
    }

    /// The rejection passed through from an async submit handler, if any.
    #[must_use]
    pub fn rejection(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::SubmitRejected(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}
