//! Core types for loading expression-based factor data.
//!
//! This crate provides:
//! - Field specifications and grouped field configurations
//! - Raw and reshaped feature tables
//! - The `DataSource`, `DataLoader` and `GroupDataLoader` traits
//! - Figment-backed loader settings

pub mod config;
pub mod error;
pub mod fields;
pub mod query;
pub mod table;
pub mod traits;

pub use config::{FilterPipe, FilterRule, GroupSettings, LoaderSettings};
pub use error::{LoaderError, Result};
pub use fields::{FieldGroup, FieldSpec, FieldsConfig};
pub use query::{Instruments, TimeRange, ALL_INSTRUMENTS};
pub use table::{ColumnKey, FeatureTable, RawFeatures, RowKey};
pub use traits::{DataLoader, DataSource, GroupDataLoader};
