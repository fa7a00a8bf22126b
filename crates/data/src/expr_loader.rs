//! Loader that evaluates field expressions through a [`DataSource`].

use factor_loader_core::{
    DataSource, FeatureTable, FieldsConfig, FilterPipe, GroupDataLoader, Instruments,
    LoaderSettings, Result, TimeRange,
};
use std::collections::HashSet;
use std::fmt;

/// Non-fatal diagnostic produced while resolving instruments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Advisory {
    /// A filter pipe is configured but instruments were given as a list, so
    /// the pipe was not applied.
    FilterPipeIgnored { instruments: usize },
}

impl fmt::Display for Advisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FilterPipeIgnored { instruments } => write!(
                f,
                "filter pipe is set but {instruments} instruments were given as a list; the filter pipe is not used"
            ),
        }
    }
}

/// Concrete instruments for a load, plus any advisory raised on the way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInstruments {
    pub instruments: Vec<String>,
    pub advisory: Option<Advisory>,
}

/// Loads configured expressions from a data source.
///
/// Named universes are resolved by the source through the configured filter
/// pipe; explicit instrument lists are used as given.
pub struct ExprDataLoader<S> {
    source: S,
    fields: FieldsConfig,
    filter_pipe: Option<FilterPipe>,
}

impl<S: DataSource> ExprDataLoader<S> {
    /// Creates a loader.
    ///
    /// Any configured filter pipe, even an empty one, counts as set: loading
    /// an explicit instrument list then raises [`Advisory::FilterPipeIgnored`].
    ///
    /// # Errors
    ///
    /// Returns a configuration error if `fields` is invalid.
    pub fn new(source: S, fields: FieldsConfig, filter_pipe: Option<FilterPipe>) -> Result<Self> {
        fields.validate()?;
        Ok(Self {
            source,
            fields,
            filter_pipe,
        })
    }

    /// Creates a loader from settings.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the settings describe no valid fields.
    pub fn from_settings(source: S, settings: &LoaderSettings) -> Result<Self> {
        Self::new(source, settings.fields()?, settings.filter_pipe.clone())
    }

    #[must_use]
    pub const fn source(&self) -> &S {
        &self.source
    }

    #[must_use]
    pub const fn filter_pipe(&self) -> Option<&FilterPipe> {
        self.filter_pipe.as_ref()
    }

    /// Turns `instruments` into concrete codes.
    ///
    /// Repeated codes in an explicit list collapse to their first occurrence.
    ///
    /// # Errors
    ///
    /// Returns the source's error if a universe cannot be resolved.
    pub fn resolve_instruments(&self, instruments: &Instruments) -> Result<ResolvedInstruments> {
        match instruments {
            Instruments::Universe(name) => {
                let resolved = self
                    .source
                    .resolve_instruments(name, self.filter_pipe.as_ref())?;
                tracing::debug!(universe = %name, instruments = resolved.len(), "Resolved universe");
                Ok(ResolvedInstruments {
                    instruments: resolved,
                    advisory: None,
                })
            }
            Instruments::List(codes) => {
                let mut seen = HashSet::new();
                let unique: Vec<String> = codes
                    .iter()
                    .filter(|code| seen.insert(code.as_str()))
                    .cloned()
                    .collect();
                Ok(ResolvedInstruments {
                    advisory: self
                        .filter_pipe
                        .as_ref()
                        .map(|_| Advisory::FilterPipeIgnored {
                            instruments: unique.len(),
                        }),
                    instruments: unique,
                })
            }
        }
    }
}

impl<S: DataSource> GroupDataLoader for ExprDataLoader<S> {
    fn fields(&self) -> &FieldsConfig {
        &self.fields
    }

    fn load_group_df(
        &self,
        instruments: &Instruments,
        expressions: &[String],
        names: &[String],
        range: &TimeRange,
    ) -> Result<FeatureTable> {
        let resolved = self.resolve_instruments(instruments)?;
        if let Some(advisory) = &resolved.advisory {
            tracing::warn!(%advisory, "Ignoring filter pipe");
        }

        tracing::debug!(
            instruments = resolved.instruments.len(),
            expressions = expressions.len(),
            "Evaluating features"
        );
        let raw = self
            .source
            .evaluate_features(&resolved.instruments, expressions, range)?;

        raw.into_table(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use factor_loader_core::{
        ColumnKey, DataLoader, FieldGroup, FieldSpec, FilterRule, LoaderError, RawFeatures,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

    struct WarnCounter(Arc<AtomicUsize>);

    impl<S: Subscriber> Layer<S> for WarnCounter {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() == Level::WARN {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    fn count_warnings<T>(f: impl FnOnce() -> T) -> (T, usize) {
        let count = Arc::new(AtomicUsize::new(0));
        let subscriber = tracing_subscriber::registry().with(WarnCounter(Arc::clone(&count)));
        let out = tracing::subscriber::with_default(subscriber, f);
        (out, count.load(Ordering::SeqCst))
    }

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, d, 0, 0, 0).unwrap()
    }

    /// Returns rows instrument-major, newest first, and records filter pipes.
    #[derive(Default)]
    struct ReversedSource {
        seen_pipes: Mutex<Vec<Option<FilterPipe>>>,
    }

    impl DataSource for ReversedSource {
        fn resolve_instruments(
            &self,
            universe: &str,
            filter_pipe: Option<&FilterPipe>,
        ) -> anyhow::Result<Vec<String>> {
            self.seen_pipes.lock().unwrap().push(filter_pipe.cloned());
            match universe {
                "csi300" => Ok(vec!["SH600000".into(), "SH600004".into()]),
                other => anyhow::bail!("unknown universe {other}"),
            }
        }

        fn evaluate_features(
            &self,
            instruments: &[String],
            expressions: &[String],
            _range: &TimeRange,
        ) -> anyhow::Result<RawFeatures> {
            let mut rows = Vec::new();
            for (i, instrument) in instruments.iter().enumerate() {
                for d in [3, 2] {
                    let values = (0..expressions.len())
                        .map(|e| (i * 100 + e * 10) as f64 + f64::from(d))
                        .collect();
                    rows.push((instrument.clone(), day(d), values));
                }
            }
            Ok(RawFeatures::from_rows(expressions.to_vec(), rows)?)
        }
    }

    fn name_pipe() -> FilterPipe {
        FilterPipe::default().with_rule(FilterRule::Name {
            name_rule_re: "SH600".into(),
        })
    }

    #[test]
    fn universe_is_resolved_with_filter_pipe() {
        let source = ReversedSource::default();
        let loader =
            ExprDataLoader::new(&source, FieldSpec::flat(["$close"]).into(), Some(name_pipe()))
                .unwrap();

        let resolved = loader
            .resolve_instruments(&Instruments::universe("csi300"))
            .unwrap();

        assert_eq!(resolved.instruments, ["SH600000", "SH600004"]);
        assert!(resolved.advisory.is_none());
        assert_eq!(*source.seen_pipes.lock().unwrap(), vec![Some(name_pipe())]);
    }

    #[test]
    fn list_with_filter_pipe_warns_once_and_still_loads() {
        let loader = ExprDataLoader::new(
            ReversedSource::default(),
            FieldSpec::flat(["$close"]).into(),
            Some(name_pipe()),
        )
        .unwrap();
        let names = vec!["$close".to_string()];

        let (table, warnings) = count_warnings(|| {
            loader.load_group_df(
                &Instruments::list(["SH600000"]),
                &names,
                &names,
                &TimeRange::all(),
            )
        });

        assert_eq!(warnings, 1);
        assert_eq!(table.unwrap().height(), 2);
        assert!(loader.source().seen_pipes.lock().unwrap().is_empty());
    }

    #[test]
    fn list_without_filter_pipe_is_silent() {
        let loader = ExprDataLoader::new(
            ReversedSource::default(),
            FieldSpec::flat(["$close"]).into(),
            None,
        )
        .unwrap();

        let (resolved, warnings) =
            count_warnings(|| loader.load(&Instruments::list(["SH600000"]), &TimeRange::all()));

        assert!(resolved.is_ok());
        assert_eq!(warnings, 0);
    }

    #[test]
    fn empty_filter_pipe_still_counts_as_set() {
        let loader = ExprDataLoader::new(
            ReversedSource::default(),
            FieldSpec::flat(["$close"]).into(),
            Some(FilterPipe::default()),
        )
        .unwrap();
        assert_eq!(loader.filter_pipe(), Some(&FilterPipe::default()));

        let (resolved, warnings) =
            count_warnings(|| loader.load(&Instruments::list(["SH600000"]), &TimeRange::all()));

        assert!(resolved.is_ok());
        assert_eq!(warnings, 1);
    }

    #[test]
    fn repeated_list_codes_keep_first_occurrence() {
        let loader = ExprDataLoader::new(
            ReversedSource::default(),
            FieldSpec::flat(["$close"]).into(),
            Some(name_pipe()),
        )
        .unwrap();

        let resolved = loader
            .resolve_instruments(&Instruments::list(["SH600004", "SH600000", "SH600004"]))
            .unwrap();

        assert_eq!(resolved.instruments, ["SH600004", "SH600000"]);
        assert_eq!(
            resolved.advisory,
            Some(Advisory::FilterPipeIgnored { instruments: 2 })
        );
    }

    #[test]
    fn output_is_renamed_and_sorted_datetime_major() {
        let loader = ExprDataLoader::new(
            ReversedSource::default(),
            FieldSpec::paired(["$close", "$open"], ["CLOSE", "OPEN"])
                .unwrap()
                .into(),
            None,
        )
        .unwrap();

        let table = loader
            .load(&Instruments::universe("csi300"), &TimeRange::all())
            .unwrap();

        assert_eq!(
            table.columns(),
            [ColumnKey::Flat("CLOSE".into()), ColumnKey::Flat("OPEN".into())]
        );
        let keys: Vec<_> = table
            .index()
            .iter()
            .map(|k| (k.datetime, k.instrument.as_str()))
            .collect();
        assert_eq!(
            keys,
            vec![
                (day(2), "SH600000"),
                (day(2), "SH600004"),
                (day(3), "SH600000"),
                (day(3), "SH600004"),
            ]
        );
        assert_eq!(
            table.column(&ColumnKey::Flat("OPEN".into())).unwrap(),
            [12.0, 112.0, 13.0, 113.0]
        );
    }

    #[test]
    fn grouped_load_joins_groups() {
        let fields = FieldsConfig::grouped([
            FieldGroup::new("feature", FieldSpec::flat(["e1"])),
            FieldGroup::new("label", FieldSpec::flat(["e2"])),
        ])
        .unwrap();
        let loader = ExprDataLoader::new(ReversedSource::default(), fields, None).unwrap();

        let table = loader
            .load(&Instruments::universe("csi300"), &TimeRange::all())
            .unwrap();

        assert_eq!(
            table.columns(),
            [
                ColumnKey::grouped("feature", "e1"),
                ColumnKey::grouped("label", "e2")
            ]
        );
        assert_eq!(table.height(), 4);
    }

    #[test]
    fn source_errors_propagate() {
        let loader =
            ExprDataLoader::new(ReversedSource::default(), FieldSpec::flat(["e1"]).into(), None)
                .unwrap();

        let err = loader
            .load(&Instruments::universe("nasdaq"), &TimeRange::all())
            .unwrap_err();

        assert!(matches!(err, LoaderError::Source(_)));
        assert_eq!(err.to_string(), "unknown universe nasdaq");
    }

    #[test]
    fn invalid_fields_fail_at_construction() {
        let fields = FieldsConfig::Single(FieldSpec::Paired {
            expressions: vec!["e1".into(), "e2".into()],
            names: vec!["n1".into()],
        });

        let err = ExprDataLoader::new(ReversedSource::default(), fields, None)
            .err()
            .unwrap();

        assert!(matches!(err, LoaderError::FieldCountMismatch { .. }));
    }
}
