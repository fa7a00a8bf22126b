//! In-memory data source over precomputed series.
//!
//! Expressions are opaque keys here: a series stored under `"$close"` is
//! returned when `"$close"` is requested, nothing is evaluated.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use factor_loader_core::{
    DataSource, FilterPipe, FilterRule, RawFeatures, TimeRange, ALL_INSTRUMENTS,
};
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::Read;
use std::path::Path;

type Series = BTreeMap<(String, DateTime<Utc>), f64>;

#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    universes: HashMap<String, Vec<String>>,
    series: HashMap<String, Series>,
}

impl StaticSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a named universe.
    #[must_use]
    pub fn with_universe<I, S>(mut self, name: impl Into<String>, instruments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.universes
            .insert(name.into(), instruments.into_iter().map(Into::into).collect());
        self
    }

    /// Stores one value of `expression`.
    pub fn insert(
        &mut self,
        expression: impl Into<String>,
        instrument: impl Into<String>,
        datetime: DateTime<Utc>,
        value: f64,
    ) {
        self.series
            .entry(expression.into())
            .or_default()
            .insert((instrument.into(), datetime), value);
    }

    /// Reads series from CSV with header `instrument,datetime,<expr>...`.
    ///
    /// Datetimes are RFC 3339 or `YYYY-MM-DD` (midnight UTC); empty cells
    /// are left missing.
    ///
    /// # Errors
    ///
    /// Returns an error if the header is malformed or a cell cannot be parsed.
    pub fn from_csv_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = csv::Reader::from_reader(reader);
        let headers = reader.headers()?.clone();
        if headers.len() < 3
            || !headers[0].eq_ignore_ascii_case("instrument")
            || !headers[1].eq_ignore_ascii_case("datetime")
        {
            bail!("expected header instrument,datetime,<expression>..., got {headers:?}");
        }
        let expressions: Vec<String> = headers.iter().skip(2).map(str::to_string).collect();

        let mut source = Self::new();
        for (line, record) in reader.records().enumerate() {
            let record = record?;
            let instrument = &record[0];
            let datetime = parse_datetime(&record[1])
                .with_context(|| format!("row {}: bad datetime {:?}", line + 1, &record[1]))?;

            for (expression, cell) in expressions.iter().zip(record.iter().skip(2)) {
                let cell = cell.trim();
                if cell.is_empty() {
                    continue;
                }
                let value: f64 = cell.parse().with_context(|| {
                    format!("row {}: bad value {cell:?} for {expression}", line + 1)
                })?;
                source.insert(expression.as_str(), instrument, datetime, value);
            }
        }

        tracing::debug!(
            expressions = source.series.len(),
            instruments = source.known_instruments().len(),
            "Loaded static series"
        );
        Ok(source)
    }

    /// Reads series from a CSV file; see [`Self::from_csv_reader`].
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or parsed.
    pub fn from_csv_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = std::fs::File::open(path)
            .with_context(|| format!("Failed to open CSV file: {}", path.display()))?;
        Self::from_csv_reader(file)
            .with_context(|| format!("Failed to read CSV file: {}", path.display()))
    }

    /// Every instrument with stored data or universe membership, sorted.
    #[must_use]
    pub fn known_instruments(&self) -> Vec<String> {
        self.series
            .values()
            .flat_map(|series| series.keys().map(|(instrument, _)| instrument.clone()))
            .chain(self.universes.values().flatten().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn series(&self, expression: &str) -> Result<&Series> {
        self.series
            .get(expression)
            .with_context(|| format!("no data for expression {expression:?}"))
    }

    fn apply_rule(&self, instruments: &mut Vec<String>, rule: &FilterRule) -> Result<()> {
        match rule {
            FilterRule::Name { name_rule_re } => {
                let pattern = Regex::new(&format!("^(?:{name_rule_re})"))
                    .with_context(|| format!("invalid name filter {name_rule_re:?}"))?;
                instruments.retain(|code| pattern.is_match(code));
            }
            FilterRule::Expression {
                rule_expression,
                filter_start_time,
                filter_end_time,
                keep,
            } => {
                let series = self.series(rule_expression)?;
                let window = TimeRange::new(*filter_start_time, *filter_end_time);
                instruments.retain(|code| {
                    let mut values = instrument_values(series, code, &window).peekable();
                    if values.peek().is_none() {
                        return *keep;
                    }
                    values.any(|(_, v)| v != 0.0 && !v.is_nan())
                });
            }
        }
        Ok(())
    }
}

impl DataSource for StaticSource {
    fn resolve_instruments(
        &self,
        universe: &str,
        filter_pipe: Option<&FilterPipe>,
    ) -> Result<Vec<String>> {
        let mut instruments = match self.universes.get(universe) {
            Some(members) => members.clone(),
            None if universe == ALL_INSTRUMENTS => self.known_instruments(),
            None => bail!("unknown universe {universe:?}"),
        };

        for rule in filter_pipe.map(FilterPipe::rules).unwrap_or_default() {
            self.apply_rule(&mut instruments, rule)?;
        }
        Ok(instruments)
    }

    fn evaluate_features(
        &self,
        instruments: &[String],
        expressions: &[String],
        range: &TimeRange,
    ) -> Result<RawFeatures> {
        let series = expressions
            .iter()
            .map(|e| self.series(e))
            .collect::<Result<Vec<_>>>()?;

        let mut rows = Vec::new();
        for instrument in instruments {
            let datetimes: BTreeSet<DateTime<Utc>> = series
                .iter()
                .flat_map(|s| instrument_values(s, instrument, range).map(|(at, _)| at))
                .collect();

            for at in datetimes {
                let values = series
                    .iter()
                    .map(|s| {
                        s.get(&(instrument.clone(), at))
                            .copied()
                            .unwrap_or(f64::NAN)
                    })
                    .collect();
                rows.push((instrument.clone(), at, values));
            }
        }

        Ok(RawFeatures::from_rows(expressions.to_vec(), rows)?)
    }
}

fn instrument_values<'a>(
    series: &'a Series,
    instrument: &str,
    range: &TimeRange,
) -> impl Iterator<Item = (DateTime<Utc>, f64)> + 'a {
    let start = range.start.unwrap_or(DateTime::<Utc>::MIN_UTC);
    let end = range.end.unwrap_or(DateTime::<Utc>::MAX_UTC);
    let bounds = if start <= end {
        Some((instrument.to_string(), start)..=(instrument.to_string(), end))
    } else {
        None
    };

    bounds
        .into_iter()
        .flat_map(move |bounds| series.range(bounds))
        .map(|((_, at), value)| (*at, *value))
}

fn parse_datetime(text: &str) -> Result<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(text) {
        return Ok(at.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(text, "%Y-%m-%d")?;
    Ok(date
        .and_hms_opt(0, 0, 0)
        .context("midnight out of range")?
        .and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const CSV: &str = "\
instrument,datetime,$close,$volume,$close>10
SH600000,2020-01-02,9.5,100,0
SH600000,2020-01-03,10.5,,1
SH600004,2020-01-02,20.0,300,1
SZ000001,2020-01-03T00:00:00Z,5.0,50,0
";

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, d, 0, 0, 0).unwrap()
    }

    fn source() -> StaticSource {
        StaticSource::from_csv_reader(CSV.as_bytes())
            .unwrap()
            .with_universe("sh", ["SH600000", "SH600004", "SH601000"])
    }

    fn codes(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn all_universe_lists_known_instruments() {
        let all = source().resolve_instruments("all", None).unwrap();
        assert_eq!(all, ["SH600000", "SH600004", "SH601000", "SZ000001"]);
    }

    #[test]
    fn unknown_universe_is_an_error() {
        let err = source().resolve_instruments("nasdaq", None).unwrap_err();
        assert!(err.to_string().contains("nasdaq"));
    }

    #[test]
    fn name_filter_matches_from_start() {
        let pipe = FilterPipe::default().with_rule(FilterRule::Name {
            name_rule_re: "SH6000".into(),
        });
        let resolved = source().resolve_instruments("all", Some(&pipe)).unwrap();
        assert_eq!(resolved, ["SH600000", "SH600004"]);

        let pipe = FilterPipe::default().with_rule(FilterRule::Name {
            name_rule_re: "0001".into(),
        });
        assert!(source()
            .resolve_instruments("all", Some(&pipe))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn expression_filter_uses_window_and_keep() {
        let rule = |keep| FilterRule::Expression {
            rule_expression: "$close>10".into(),
            filter_start_time: Some(day(3)),
            filter_end_time: None,
            keep,
        };

        let pipe = FilterPipe::default().with_rule(rule(false));
        let resolved = source().resolve_instruments("sh", Some(&pipe)).unwrap();
        // SH600004 is truthy only before the window; SH601000 has no data.
        assert_eq!(resolved, ["SH600000"]);

        let pipe = FilterPipe::default().with_rule(rule(true));
        let resolved = source().resolve_instruments("sh", Some(&pipe)).unwrap();
        assert_eq!(resolved, ["SH600000", "SH600004", "SH601000"]);
    }

    #[test]
    fn evaluate_fills_missing_cells_with_nan() {
        let raw = source()
            .evaluate_features(
                &codes(&["SH600000"]),
                &codes(&["$close", "$volume"]),
                &TimeRange::all(),
            )
            .unwrap();

        assert_eq!(raw.columns(), ["$close", "$volume"]);
        assert_eq!(
            raw.index(),
            [
                ("SH600000".to_string(), day(2)),
                ("SH600000".to_string(), day(3))
            ]
        );
        let table = raw.into_table(&codes(&["CLOSE", "VOLUME"])).unwrap();
        let volume = table
            .column(&factor_loader_core::ColumnKey::Flat("VOLUME".into()))
            .unwrap();
        assert_eq!(volume[0], 100.0);
        assert!(volume[1].is_nan());
    }

    #[test]
    fn evaluate_respects_time_range() {
        let raw = source()
            .evaluate_features(
                &codes(&["SH600000", "SZ000001"]),
                &codes(&["$close"]),
                &TimeRange::between(day(3), day(3)),
            )
            .unwrap();
        assert_eq!(raw.height(), 2);
        assert!(raw.index().iter().all(|(_, at)| *at == day(3)));
    }

    #[test]
    fn unknown_expression_is_an_error() {
        let err = source()
            .evaluate_features(&codes(&["SH600000"]), &codes(&["$open"]), &TimeRange::all())
            .unwrap_err();
        assert!(err.to_string().contains("$open"));
    }

    #[test]
    fn malformed_csv_is_rejected() {
        let err = StaticSource::from_csv_reader("code,date,$close\nA,2020-01-02,1\n".as_bytes())
            .unwrap_err();
        assert!(err.to_string().contains("expected header"));

        let err = StaticSource::from_csv_reader(
            "instrument,datetime,$close\nA,yesterday,1\n".as_bytes(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("bad datetime"));
    }
}
