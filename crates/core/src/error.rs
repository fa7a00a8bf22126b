//! Error types for factor loading.
//!
//! Configuration errors are raised eagerly when a loader is constructed;
//! reshaping errors surface from `load`. Failures inside the data source are
//! carried through unchanged.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur while configuring or running a loader.
#[derive(Debug, Error)]
pub enum LoaderError {
    /// The field configuration has a shape the parser does not accept.
    #[error("unsupported field configuration: expected a list of expressions or an (expressions, names) pair, found {found}")]
    UnsupportedConfigKind {
        /// Short description of the rejected shape.
        found: String,
    },

    /// Expressions and names of a paired specification differ in length.
    #[error("field count mismatch: {expressions} expressions but {names} names")]
    FieldCountMismatch {
        /// Number of expressions.
        expressions: usize,
        /// Number of names.
        names: usize,
    },

    /// A field specification lists no expressions.
    #[error("field specification contains no expressions")]
    EmptyFields,

    /// A grouped configuration contains no groups.
    #[error("grouped configuration contains no groups")]
    EmptyGroups,

    /// The same group name appears twice.
    #[error("duplicate group: {0}")]
    DuplicateGroup(String),

    /// The source returned a different number of columns than names supplied.
    #[error("column count mismatch: expected {expected} columns, found {found}")]
    ColumnCountMismatch {
        /// Number of names to apply.
        expected: usize,
        /// Number of columns in the table.
        found: usize,
    },

    /// Index and value arrays disagree in shape.
    #[error("malformed table: {0}")]
    MalformedTable(String),

    /// A row key occurs more than once in a table being joined.
    #[error("duplicate index entry: ({datetime}, {instrument})")]
    DuplicateIndex {
        /// Datetime of the repeated row.
        datetime: DateTime<Utc>,
        /// Instrument of the repeated row.
        instrument: String,
    },

    /// A table passed to group concatenation already has grouped columns.
    #[error("cannot nest grouped column {0} under another group")]
    NestedGroup(String),

    /// Settings could not be read or extracted.
    #[error("configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Export to a polars frame failed.
    #[error("polars error: {0}")]
    Polars(#[from] polars::prelude::PolarsError),

    /// The data source failed.
    #[error(transparent)]
    Source(#[from] anyhow::Error),
}

impl LoaderError {
    /// Creates an unsupported-config error describing the rejected shape.
    pub fn unsupported(found: impl Into<String>) -> Self {
        Self::UnsupportedConfigKind {
            found: found.into(),
        }
    }

    /// Returns `true` for errors raised while validating configuration.
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedConfigKind { .. }
                | Self::FieldCountMismatch { .. }
                | Self::EmptyFields
                | Self::EmptyGroups
                | Self::DuplicateGroup(_)
                | Self::Config(_)
        )
    }
}

/// Result alias used across the loader crates.
pub type Result<T> = std::result::Result<T, LoaderError>;
