//! Tables exchanged with data sources and returned to callers.
//!
//! Sources produce [`RawFeatures`], indexed by (instrument, datetime) in
//! whatever order they like. Loaders turn them into [`FeatureTable`]s, whose
//! rows are always (datetime, instrument) sorted datetime-major.

use crate::error::{LoaderError, Result};
use chrono::{DateTime, Utc};
use polars::prelude::{DataFrame, DataType, NamedFrom, Series, TimeUnit};
use std::collections::BTreeSet;
use std::fmt;

/// Row key of a result table. Ordering is datetime first, then instrument.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowKey {
    pub datetime: DateTime<Utc>,
    pub instrument: String,
}

impl RowKey {
    pub fn new(datetime: DateTime<Utc>, instrument: impl Into<String>) -> Self {
        Self {
            datetime,
            instrument: instrument.into(),
        }
    }
}

/// Column label: a plain name, or a (group, name) pair after grouping.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ColumnKey {
    Flat(String),
    Grouped { group: String, name: String },
}

impl ColumnKey {
    pub fn grouped(group: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Grouped {
            group: group.into(),
            name: name.into(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Flat(name) | Self::Grouped { name, .. } => name,
        }
    }

    #[must_use]
    pub fn group(&self) -> Option<&str> {
        match self {
            Self::Flat(_) => None,
            Self::Grouped { group, .. } => Some(group),
        }
    }
}

impl fmt::Display for ColumnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Flat(name) => f.write_str(name),
            Self::Grouped { group, name } => write!(f, "{group}::{name}"),
        }
    }
}

/// Table as returned by a data source: one column per expression, rows
/// keyed by (instrument, datetime).
#[derive(Debug, Clone, PartialEq)]
pub struct RawFeatures {
    index: Vec<(String, DateTime<Utc>)>,
    columns: Vec<String>,
    values: Vec<Vec<f64>>,
}

impl RawFeatures {
    /// Builds a raw table from column-major values.
    ///
    /// # Errors
    ///
    /// Returns `MalformedTable` if there is not one value vector per column,
    /// or a vector's length differs from the index length.
    pub fn new(
        index: Vec<(String, DateTime<Utc>)>,
        columns: Vec<String>,
        values: Vec<Vec<f64>>,
    ) -> Result<Self> {
        check_shape(index.len(), columns.len(), &values)?;
        Ok(Self {
            index,
            columns,
            values,
        })
    }

    /// Builds a raw table from row-major records.
    ///
    /// # Errors
    ///
    /// Returns `MalformedTable` if a row has the wrong number of values.
    pub fn from_rows<I>(columns: Vec<String>, rows: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, DateTime<Utc>, Vec<f64>)>,
    {
        let mut index = Vec::new();
        let mut values = vec![Vec::new(); columns.len()];
        for (instrument, datetime, row) in rows {
            if row.len() != columns.len() {
                return Err(LoaderError::MalformedTable(format!(
                    "row ({instrument}, {datetime}) has {} values for {} columns",
                    row.len(),
                    columns.len()
                )));
            }
            for (column, value) in values.iter_mut().zip(row) {
                column.push(value);
            }
            index.push((instrument, datetime));
        }
        Ok(Self {
            index,
            columns,
            values,
        })
    }

    #[must_use]
    pub fn index(&self) -> &[(String, DateTime<Utc>)] {
        &self.index
    }

    #[must_use]
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    #[must_use]
    pub fn height(&self) -> usize {
        self.index.len()
    }

    /// Renames columns positionally to `names`, swaps the index to
    /// (datetime, instrument) and sorts it.
    ///
    /// # Errors
    ///
    /// Returns `ColumnCountMismatch` if `names` and the columns differ in length.
    pub fn into_table(self, names: &[String]) -> Result<FeatureTable> {
        if names.len() != self.columns.len() {
            return Err(LoaderError::ColumnCountMismatch {
                expected: names.len(),
                found: self.columns.len(),
            });
        }

        let index = self
            .index
            .into_iter()
            .map(|(instrument, datetime)| RowKey {
                datetime,
                instrument,
            })
            .collect();
        let columns = names.iter().cloned().map(ColumnKey::Flat).collect();

        Ok(FeatureTable::sorted(index, columns, self.values))
    }
}

/// Loader output: rows keyed by (datetime, instrument), always sorted.
///
/// Values are stored column-major; `NaN` marks a missing cell.
#[derive(Debug, Clone)]
pub struct FeatureTable {
    index: Vec<RowKey>,
    columns: Vec<ColumnKey>,
    values: Vec<Vec<f64>>,
}

impl FeatureTable {
    /// Builds a table from column-major values, sorting the rows.
    ///
    /// # Errors
    ///
    /// Returns `MalformedTable` on a shape mismatch.
    pub fn new(index: Vec<RowKey>, columns: Vec<ColumnKey>, values: Vec<Vec<f64>>) -> Result<Self> {
        check_shape(index.len(), columns.len(), &values)?;
        Ok(Self::sorted(index, columns, values))
    }

    fn sorted(index: Vec<RowKey>, columns: Vec<ColumnKey>, values: Vec<Vec<f64>>) -> Self {
        if index.windows(2).all(|w| w[0] <= w[1]) {
            return Self {
                index,
                columns,
                values,
            };
        }

        let mut order: Vec<usize> = (0..index.len()).collect();
        order.sort_by(|&a, &b| index[a].cmp(&index[b]));

        let values = values
            .iter()
            .map(|column| order.iter().map(|&row| column[row]).collect())
            .collect();
        let index = order.iter().map(|&row| index[row].clone()).collect();

        Self {
            index,
            columns,
            values,
        }
    }

    /// Joins per-group tables along the column axis.
    ///
    /// Rows are the sorted union of every group's rows; cells a group has no
    /// row for are `NaN`. Each column becomes `(group, name)`, in group order.
    ///
    /// # Errors
    ///
    /// Returns `EmptyGroups` for no input, `NestedGroup` if a table already
    /// has grouped columns, and `DuplicateIndex` if a table repeats a row.
    pub fn concat_groups<I, S>(groups: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, Self)>,
        S: Into<String>,
    {
        let groups: Vec<(String, Self)> = groups
            .into_iter()
            .map(|(name, table)| (name.into(), table))
            .collect();
        if groups.is_empty() {
            return Err(LoaderError::EmptyGroups);
        }

        let index: Vec<RowKey> = groups
            .iter()
            .flat_map(|(_, table)| table.index.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let mut columns = Vec::new();
        let mut values = Vec::new();
        for (group, table) in groups {
            let positions = table.positions_in(&index)?;

            for (key, column) in table.columns.into_iter().zip(table.values) {
                let name = match key {
                    ColumnKey::Flat(name) => name,
                    nested @ ColumnKey::Grouped { .. } => {
                        return Err(LoaderError::NestedGroup(nested.to_string()))
                    }
                };
                let mut filled = vec![f64::NAN; index.len()];
                for (&position, value) in positions.iter().zip(column) {
                    filled[position] = value;
                }
                columns.push(ColumnKey::Grouped {
                    group: group.clone(),
                    name,
                });
                values.push(filled);
            }
        }

        Ok(Self {
            index,
            columns,
            values,
        })
    }

    /// Position of each of this table's rows within `union`.
    fn positions_in(&self, union: &[RowKey]) -> Result<Vec<usize>> {
        let mut previous: Option<&RowKey> = None;
        self.index
            .iter()
            .map(|key| {
                if previous == Some(key) {
                    return Err(LoaderError::DuplicateIndex {
                        datetime: key.datetime,
                        instrument: key.instrument.clone(),
                    });
                }
                previous = Some(key);
                union.binary_search(key).map_err(|_| {
                    LoaderError::MalformedTable(format!(
                        "row ({}, {}) missing from joined index",
                        key.datetime, key.instrument
                    ))
                })
            })
            .collect()
    }

    #[must_use]
    pub fn index(&self) -> &[RowKey] {
        &self.index
    }

    #[must_use]
    pub fn columns(&self) -> &[ColumnKey] {
        &self.columns
    }

    #[must_use]
    pub fn height(&self) -> usize {
        self.index.len()
    }

    #[must_use]
    pub fn width(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    #[must_use]
    pub fn column(&self, key: &ColumnKey) -> Option<&[f64]> {
        self.columns
            .iter()
            .position(|c| c == key)
            .map(|i| self.values[i].as_slice())
    }

    /// Value at (`row`, `key`); `None` if either is out of range.
    #[must_use]
    pub fn value(&self, row: &RowKey, key: &ColumnKey) -> Option<f64> {
        let position = self.index.binary_search(row).ok()?;
        self.column(key).map(|column| column[position])
    }

    /// Distinct instruments, sorted.
    #[must_use]
    pub fn instruments(&self) -> Vec<&str> {
        self.index
            .iter()
            .map(|k| k.instrument.as_str())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Converts to a polars frame with `datetime` and `instrument` columns
    /// followed by one `f64` column per feature.
    ///
    /// # Errors
    ///
    /// Returns a polars error if column names collide.
    pub fn to_polars(&self) -> Result<DataFrame> {
        let millis: Vec<i64> = self
            .index
            .iter()
            .map(|k| k.datetime.timestamp_millis())
            .collect();
        let instruments: Vec<&str> = self.index.iter().map(|k| k.instrument.as_str()).collect();

        let mut series = Vec::with_capacity(self.columns.len() + 2);
        series.push(
            Series::new("datetime".into(), millis)
                .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?,
        );
        series.push(Series::new("instrument".into(), instruments));

        for (key, column) in self.columns.iter().zip(&self.values) {
            let cells: Vec<Option<f64>> = column
                .iter()
                .map(|&v| if v.is_nan() { None } else { Some(v) })
                .collect();
            series.push(Series::new(key.to_string().as_str().into(), cells));
        }

        Ok(DataFrame::new(series)?)
    }
}

// NaN cells compare equal so reloading the same data yields equal tables.
impl PartialEq for FeatureTable {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
            && self.columns == other.columns
            && self.values.len() == other.values.len()
            && self.values.iter().zip(&other.values).all(|(a, b)| {
                a.len() == b.len()
                    && a
                        .iter()
                        .zip(b)
                        .all(|(x, y)| x == y || (x.is_nan() && y.is_nan()))
            })
    }
}

fn check_shape(rows: usize, columns: usize, values: &[Vec<f64>]) -> Result<()> {
    if values.len() != columns {
        return Err(LoaderError::MalformedTable(format!(
            "{} value columns for {columns} column labels",
            values.len()
        )));
    }
    if let Some(bad) = values.iter().position(|column| column.len() != rows) {
        return Err(LoaderError::MalformedTable(format!(
            "column {bad} has {} values for {rows} rows",
            values[bad].len()
        )));
    }
    Ok(())
}
