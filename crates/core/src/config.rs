use crate::error::{LoaderError, Result};
use crate::fields::{FieldGroup, FieldSpec, FieldsConfig};
use chrono::{DateTime, Utc};
use figment::{
    providers::{Env, Format, Json, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Prefix for environment overrides, e.g. `FACTOR_LOADER_EXPRESSIONS`.
pub const ENV_PREFIX: &str = "FACTOR_LOADER_";

/// One rule of a filter pipeline. Loaders hand these to the data source
/// untouched; only the source gives them meaning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "filter_type", rename_all = "snake_case")]
pub enum FilterRule {
    /// Keep instruments whose code matches a regular expression.
    Name { name_rule_re: String },
    /// Keep instruments for which an expression holds within a window.
    Expression {
        rule_expression: String,
        #[serde(default)]
        filter_start_time: Option<DateTime<Utc>>,
        #[serde(default)]
        filter_end_time: Option<DateTime<Utc>>,
        #[serde(default)]
        keep: bool,
    },
}

/// Ordered rules narrowing a named instrument universe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterPipe(Vec<FilterRule>);

impl FilterPipe {
    #[must_use]
    pub const fn new(rules: Vec<FilterRule>) -> Self {
        Self(rules)
    }

    #[must_use]
    pub fn with_rule(mut self, rule: FilterRule) -> Self {
        self.0.push(rule);
        self
    }

    #[must_use]
    pub fn rules(&self) -> &[FilterRule] {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSettings {
    pub name: String,
    pub expressions: Vec<String>,
    #[serde(default)]
    pub names: Option<Vec<String>>,
}

impl GroupSettings {
    fn to_group(&self) -> Result<FieldGroup> {
        Ok(FieldGroup::new(
            self.name.clone(),
            spec_of(&self.expressions, self.names.as_ref())?,
        ))
    }
}

/// Loader settings as read from files and the environment.
///
/// Either top-level `expressions` (with optional `names`) describe a single
/// field set, or `[[groups]]` entries describe ordered groups.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderSettings {
    #[serde(default)]
    pub expressions: Option<Vec<String>>,
    #[serde(default)]
    pub names: Option<Vec<String>>,
    #[serde(default)]
    pub groups: Vec<GroupSettings>,
    #[serde(default)]
    pub filter_pipe: Option<FilterPipe>,
}

impl LoaderSettings {
    /// Loads settings from a TOML or JSON file (chosen by extension), then
    /// applies `FACTOR_LOADER_`-prefixed environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be parsed or extracted.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let figment = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Figment::from(Json::file(path)),
            _ => Figment::from(Toml::file(path)),
        };

        Self::from_figment(figment.merge(Env::prefixed(ENV_PREFIX)))
    }

    /// Extracts settings from an already assembled figment.
    ///
    /// # Errors
    ///
    /// Returns an error if extraction fails.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let settings: Self = figment.extract()?;
        tracing::debug!(
            groups = settings.groups.len(),
            filters = settings.filter_pipe.as_ref().map_or(0, |p| p.rules().len()),
            "Loaded loader settings"
        );
        Ok(settings)
    }

    /// Converts the settings into a validated field configuration.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedConfigKind` unless exactly one of top-level
    /// `expressions` or `groups` is set, and any validation error.
    pub fn fields(&self) -> Result<FieldsConfig> {
        let config = match (&self.expressions, self.groups.is_empty()) {
            (Some(expressions), true) => {
                FieldsConfig::Single(spec_of(expressions, self.names.as_ref())?)
            }
            (None, false) if self.names.is_none() => FieldsConfig::Grouped(
                self.groups
                    .iter()
                    .map(GroupSettings::to_group)
                    .collect::<Result<_>>()?,
            ),
            (None, false) => {
                return Err(LoaderError::unsupported("top-level names alongside groups"))
            }
            (Some(_), false) => {
                return Err(LoaderError::unsupported(
                    "both top-level expressions and groups",
                ))
            }
            (None, true) => {
                return Err(LoaderError::unsupported("neither expressions nor groups"))
            }
        };

        config.validate()?;
        Ok(config)
    }
}

fn spec_of(expressions: &[String], names: Option<&Vec<String>>) -> Result<FieldSpec> {
    match names {
        Some(names) => FieldSpec::paired(expressions.iter().cloned(), names.iter().cloned()),
        None => Ok(FieldSpec::Flat(expressions.to_vec())),
    }
}
