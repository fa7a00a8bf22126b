use crate::config::FilterPipe;
use crate::error::Result;
use crate::fields::FieldsConfig;
use crate::query::{Instruments, TimeRange};
use crate::table::{FeatureTable, RawFeatures};
use std::sync::Arc;

/// Expression engine that resolves universes and evaluates expressions.
pub trait DataSource: Send + Sync {
    /// Resolves a named universe into instrument codes, narrowed by
    /// `filter_pipe` when one is given.
    fn resolve_instruments(
        &self,
        universe: &str,
        filter_pipe: Option<&FilterPipe>,
    ) -> anyhow::Result<Vec<String>>;

    /// Evaluates `expressions` for `instruments` over `range`, one column per
    /// expression in the given order.
    fn evaluate_features(
        &self,
        instruments: &[String],
        expressions: &[String],
        range: &TimeRange,
    ) -> anyhow::Result<RawFeatures>;
}

impl<T: DataSource + ?Sized> DataSource for &T {
    fn resolve_instruments(
        &self,
        universe: &str,
        filter_pipe: Option<&FilterPipe>,
    ) -> anyhow::Result<Vec<String>> {
        (**self).resolve_instruments(universe, filter_pipe)
    }

    fn evaluate_features(
        &self,
        instruments: &[String],
        expressions: &[String],
        range: &TimeRange,
    ) -> anyhow::Result<RawFeatures> {
        (**self).evaluate_features(instruments, expressions, range)
    }
}

impl<T: DataSource + ?Sized> DataSource for Arc<T> {
    fn resolve_instruments(
        &self,
        universe: &str,
        filter_pipe: Option<&FilterPipe>,
    ) -> anyhow::Result<Vec<String>> {
        (**self).resolve_instruments(universe, filter_pipe)
    }

    fn evaluate_features(
        &self,
        instruments: &[String],
        expressions: &[String],
        range: &TimeRange,
    ) -> anyhow::Result<RawFeatures> {
        (**self).evaluate_features(instruments, expressions, range)
    }
}

/// Loads raw data as a table indexed by (datetime, instrument).
pub trait DataLoader {
    /// # Errors
    ///
    /// Returns an error if the underlying source fails or its output cannot
    /// be reshaped.
    fn load(&self, instruments: &Instruments, range: &TimeRange) -> Result<FeatureTable>;
}

/// Loader that fetches each field group separately.
///
/// Every implementor is a [`DataLoader`]: grouped configurations are loaded
/// group by group and joined under a (group, name) column level; a single
/// specification is returned with flat columns.
pub trait GroupDataLoader {
    fn fields(&self) -> &FieldsConfig;

    /// Loads the table for one group of expressions, columns named `names`.
    ///
    /// # Errors
    ///
    /// Returns an error if the source fails or reshaping fails.
    fn load_group_df(
        &self,
        instruments: &Instruments,
        expressions: &[String],
        names: &[String],
        range: &TimeRange,
    ) -> Result<FeatureTable>;
}

impl<T: GroupDataLoader + ?Sized> DataLoader for T {
    fn load(&self, instruments: &Instruments, range: &TimeRange) -> Result<FeatureTable> {
        match self.fields() {
            FieldsConfig::Grouped(groups) => {
                let tables = groups
                    .iter()
                    .map(|group| {
                        tracing::debug!(group = %group.name, fields = group.spec.len(), "Loading group");
                        self.load_group_df(
                            instruments,
                            group.spec.expressions(),
                            group.spec.names(),
                            range,
                        )
                        .map(|table| (group.name.as_str(), table))
                    })
                    .collect::<Result<Vec<_>>>()?;
                FeatureTable::concat_groups(tables)
            }
            FieldsConfig::Single(spec) => {
                self.load_group_df(instruments, spec.expressions(), spec.names(), range)
            }
        }
    }
}
