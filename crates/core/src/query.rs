use chrono::{DateTime, Utc};

/// Name of the universe containing every instrument a source knows.
pub const ALL_INSTRUMENTS: &str = "all";

/// Which instruments to load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruments {
    /// A named universe the data source resolves, e.g. `csi300`.
    Universe(String),
    /// Instrument codes used as given.
    List(Vec<String>),
}

impl Instruments {
    #[must_use]
    pub fn universe(name: impl Into<String>) -> Self {
        Self::Universe(name.into())
    }

    pub fn list<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::List(codes.into_iter().map(Into::into).collect())
    }
}

impl Default for Instruments {
    fn default() -> Self {
        Self::Universe(ALL_INSTRUMENTS.to_string())
    }
}

impl From<&str> for Instruments {
    fn from(name: &str) -> Self {
        Self::Universe(name.to_string())
    }
}

impl From<Vec<String>> for Instruments {
    fn from(codes: Vec<String>) -> Self {
        Self::List(codes)
    }
}

/// Inclusive time bounds; `None` leaves that side open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TimeRange {
    #[must_use]
    pub const fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Self {
        Self { start, end }
    }

    #[must_use]
    pub const fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self::new(Some(start), Some(end))
    }

    /// An unbounded range.
    #[must_use]
    pub const fn all() -> Self {
        Self::new(None, None)
    }

    #[must_use]
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start.map_or(true, |start| at >= start) && self.end.map_or(true, |end| at <= end)
    }
}
