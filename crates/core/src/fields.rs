//! Field specifications: which expressions to load and what to call them.
//!
//! A specification is either a flat list of expressions, whose names are the
//! expressions themselves, or a pair of expression and name lists. Several
//! specifications can be combined into named groups, which become the outer
//! level of the result's column axis.

use crate::error::{LoaderError, Result};
use serde_json::Value;
use std::collections::HashSet;

/// Expressions to evaluate together with their output column names.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldSpec {
    /// Expressions that double as their own column names.
    Flat(Vec<String>),
    /// Expressions renamed positionally to `names`.
    Paired {
        expressions: Vec<String>,
        names: Vec<String>,
    },
}

impl FieldSpec {
    /// Builds a flat specification.
    pub fn flat<I, S>(expressions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Flat(expressions.into_iter().map(Into::into).collect())
    }

    /// Builds a paired specification.
    ///
    /// # Errors
    ///
    /// Returns `FieldCountMismatch` if the two lists differ in length.
    pub fn paired<I, J, S, T>(expressions: I, names: J) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        let spec = Self::Paired {
            expressions: expressions.into_iter().map(Into::into).collect(),
            names: names.into_iter().map(Into::into).collect(),
        };
        spec.check_counts()?;
        Ok(spec)
    }

    /// Parses a specification from its JSON form.
    ///
    /// `["e1", "e2"]` is flat; `[["e1", "e2"], ["n1", "n2"]]` is paired.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedConfigKind` for any other shape and
    /// `FieldCountMismatch` for a pair of unequal lists.
    pub fn from_value(value: &Value) -> Result<Self> {
        let Value::Array(items) = value else {
            return Err(LoaderError::unsupported(describe(value)));
        };

        if let Some(expressions) = string_list(items) {
            return Ok(Self::Flat(expressions));
        }

        match items.as_slice() {
            [Value::Array(exprs), Value::Array(names)] => {
                match (string_list(exprs), string_list(names)) {
                    (Some(expressions), Some(names)) => Self::paired(expressions, names),
                    _ => Err(LoaderError::unsupported("pair containing non-string entries")),
                }
            }
            _ => Err(LoaderError::unsupported(format!(
                "array of {} mixed entries",
                items.len()
            ))),
        }
    }

    #[must_use]
    pub fn expressions(&self) -> &[String] {
        match self {
            Self::Flat(expressions) | Self::Paired { expressions, .. } => expressions,
        }
    }

    /// Output column names, positionally matching [`Self::expressions`].
    #[must_use]
    pub fn names(&self) -> &[String] {
        match self {
            Self::Flat(expressions) => expressions,
            Self::Paired { names, .. } => names,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.expressions().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.expressions().is_empty()
    }

    /// Checks the specification is loadable.
    ///
    /// # Errors
    ///
    /// Returns `EmptyFields` or `FieldCountMismatch`.
    pub fn validate(&self) -> Result<()> {
        if self.is_empty() {
            return Err(LoaderError::EmptyFields);
        }
        self.check_counts()
    }

    fn check_counts(&self) -> Result<()> {
        if let Self::Paired { expressions, names } = self {
            if expressions.len() != names.len() {
                return Err(LoaderError::FieldCountMismatch {
                    expressions: expressions.len(),
                    names: names.len(),
                });
            }
        }
        Ok(())
    }
}

/// A named field specification inside a grouped configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldGroup {
    pub name: String,
    pub spec: FieldSpec,
}

impl FieldGroup {
    pub fn new(name: impl Into<String>, spec: FieldSpec) -> Self {
        Self {
            name: name.into(),
            spec,
        }
    }
}

/// Parsed loader configuration: one specification or ordered groups of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldsConfig {
    Single(FieldSpec),
    Grouped(Vec<FieldGroup>),
}

impl FieldsConfig {
    /// Builds a grouped configuration, keeping the given order.
    ///
    /// # Errors
    ///
    /// Returns an error if any group is invalid, a name repeats, or there
    /// are no groups.
    pub fn grouped<I>(groups: I) -> Result<Self>
    where
        I: IntoIterator<Item = FieldGroup>,
    {
        let config = Self::Grouped(groups.into_iter().collect());
        config.validate()?;
        Ok(config)
    }

    /// Parses a configuration from its JSON form.
    ///
    /// An object maps group names to specifications and keeps key order;
    /// anything else is parsed as a single specification.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedConfigKind` for shapes the parser does not accept
    /// and any validation error for the parsed specifications.
    pub fn from_value(value: &Value) -> Result<Self> {
        let config = match value {
            Value::Object(map) => Self::Grouped(
                map.iter()
                    .map(|(name, info)| {
                        FieldSpec::from_value(info).map(|spec| FieldGroup::new(name.clone(), spec))
                    })
                    .collect::<Result<Vec<_>>>()?,
            ),
            other => Self::Single(FieldSpec::from_value(other)?),
        };
        config.validate()?;
        Ok(config)
    }

    /// Parses a configuration from a JSON string.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedConfigKind` if the text is not valid JSON, and
    /// otherwise the errors of [`Self::from_value`].
    pub fn from_json(text: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| LoaderError::unsupported(format!("invalid JSON ({e})")))?;
        Self::from_value(&value)
    }

    #[must_use]
    pub const fn is_group(&self) -> bool {
        matches!(self, Self::Grouped(_))
    }

    /// Group names in load order; empty for a single specification.
    pub fn group_names(&self) -> impl Iterator<Item = &str> {
        let groups: &[FieldGroup] = match self {
            Self::Grouped(groups) => groups,
            Self::Single(_) => &[],
        };
        groups.iter().map(|g| g.name.as_str())
    }

    /// Checks every invariant of the configuration.
    ///
    /// # Errors
    ///
    /// Returns the first violation found.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Single(spec) => spec.validate(),
            Self::Grouped(groups) => {
                if groups.is_empty() {
                    return Err(LoaderError::EmptyGroups);
                }
                let mut seen = HashSet::new();
                for group in groups {
                    if !seen.insert(group.name.as_str()) {
                        return Err(LoaderError::DuplicateGroup(group.name.clone()));
                    }
                    group.spec.validate()?;
                }
                Ok(())
            }
        }
    }
}

impl From<FieldSpec> for FieldsConfig {
    fn from(spec: FieldSpec) -> Self {
        Self::Single(spec)
    }
}

fn string_list(items: &[Value]) -> Option<Vec<String>> {
    items
        .iter()
        .map(|item| item.as_str().map(str::to_string))
        .collect()
}

fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
