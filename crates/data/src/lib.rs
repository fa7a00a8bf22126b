//! Data loaders for expression-based factor data.
//!
//! This crate provides:
//! - `ExprDataLoader`, which evaluates configured expressions through a data source
//! - Alpha158 / Alpha360 field sets
//! - `StaticSource`, an in-memory data source backed by precomputed series

pub mod alpha;
pub mod expr_loader;
pub mod static_source;

pub use alpha::{
    alpha158, alpha360, feature_label_fields, Alpha158Config, Label, PriceField, PriceWindows,
    RollingOp, RollingWindows, VolumeWindows,
};
pub use expr_loader::{Advisory, ExprDataLoader, ResolvedInstruments};
pub use static_source::StaticSource;

// Re-export core types so callers need a single dependency
pub use factor_loader_core::{
    ColumnKey, DataLoader, DataSource, FeatureTable, FieldGroup, FieldSpec, FieldsConfig,
    FilterPipe, FilterRule, GroupDataLoader, GroupSettings, Instruments, LoaderError, LoaderSettings,
    RawFeatures, RowKey, TimeRange,
};
