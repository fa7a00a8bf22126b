//! Alpha158 / Alpha360 factor field sets.
//!
//! These build the expression lists for the standard price-volume factor
//! libraries; the resulting [`FieldsConfig`]s plug straight into a loader.

use factor_loader_core::{FieldGroup, FieldSpec, FieldsConfig};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PriceField {
    Open,
    High,
    Low,
    Close,
    Vwap,
}

impl PriceField {
    pub const ALL: [Self; 5] = [Self::Open, Self::High, Self::Low, Self::Close, Self::Vwap];

    const fn field(self) -> &'static str {
        match self {
            Self::Open => "$open",
            Self::High => "$high",
            Self::Low => "$low",
            Self::Close => "$close",
            Self::Vwap => "$vwap",
        }
    }

    const fn label(self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::High => "HIGH",
            Self::Low => "LOW",
            Self::Close => "CLOSE",
            Self::Vwap => "VWAP",
        }
    }
}

/// Prices `d` days ago relative to today's close.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceWindows {
    #[serde(default = "default_short_windows")]
    pub windows: Vec<u32>,
    #[serde(default = "default_price_fields")]
    pub feature: Vec<PriceField>,
}

impl Default for PriceWindows {
    fn default() -> Self {
        Self {
            windows: default_short_windows(),
            feature: default_price_fields(),
        }
    }
}

/// Volume `d` days ago relative to today's volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeWindows {
    #[serde(default = "default_short_windows")]
    pub windows: Vec<u32>,
}

impl Default for VolumeWindows {
    fn default() -> Self {
        Self {
            windows: default_short_windows(),
        }
    }
}

/// Rolling-operator features over several window sizes.
///
/// `include = None` means every operator; `exclude` always wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollingWindows {
    #[serde(default = "default_rolling_windows")]
    pub windows: Vec<u32>,
    #[serde(default)]
    pub include: Option<Vec<RollingOp>>,
    #[serde(default)]
    pub exclude: Vec<RollingOp>,
}

impl Default for RollingWindows {
    fn default() -> Self {
        Self {
            windows: default_rolling_windows(),
            include: None,
            exclude: Vec::new(),
        }
    }
}

impl RollingWindows {
    fn uses(&self, op: RollingOp) -> bool {
        !self.exclude.contains(&op) && self.include.as_ref().map_or(true, |inc| inc.contains(&op))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RollingOp {
    Roc,
    Ma,
    Std,
    Beta,
    Rsqr,
    Resi,
    Max,
    /// Rolling minimum of `$low`; selected with the key `LOW`.
    #[serde(rename = "LOW", alias = "MIN")]
    Min,
    Qtlu,
    Qtld,
    Rank,
    Rsv,
    Imax,
    Imin,
    Imxd,
    Corr,
    Cord,
    Cntp,
    Cntn,
    Cntd,
    Sump,
    Sumn,
    Sumd,
    Vma,
    Vstd,
    Wvma,
    Vsump,
    Vsumn,
    Vsumd,
}

impl RollingOp {
    /// Every operator, in output order.
    pub const ALL: [Self; 29] = [
        Self::Roc,
        Self::Ma,
        Self::Std,
        Self::Beta,
        Self::Rsqr,
        Self::Resi,
        Self::Max,
        Self::Min,
        Self::Qtlu,
        Self::Qtld,
        Self::Rank,
        Self::Rsv,
        Self::Imax,
        Self::Imin,
        Self::Imxd,
        Self::Corr,
        Self::Cord,
        Self::Cntp,
        Self::Cntn,
        Self::Cntd,
        Self::Sump,
        Self::Sumn,
        Self::Sumd,
        Self::Vma,
        Self::Vstd,
        Self::Wvma,
        Self::Vsump,
        Self::Vsumn,
        Self::Vsumd,
    ];

    /// Column name prefix; the window size is appended.
    #[must_use]
    pub const fn prefix(self) -> &'static str {
        match self {
            Self::Roc => "ROC",
            Self::Ma => "MA",
            Self::Std => "STD",
            Self::Beta => "BETA",
            Self::Rsqr => "RSQR",
            Self::Resi => "RESI",
            Self::Max => "MAX",
            Self::Min => "MIN",
            Self::Qtlu => "QTLU",
            Self::Qtld => "QTLD",
            Self::Rank => "RANK",
            Self::Rsv => "RSV",
            Self::Imax => "IMAX",
            Self::Imin => "IMIN",
            Self::Imxd => "IMXD",
            Self::Corr => "CORR",
            Self::Cord => "CORD",
            Self::Cntp => "CNTP",
            Self::Cntn => "CNTN",
            Self::Cntd => "CNTD",
            Self::Sump => "SUMP",
            Self::Sumn => "SUMN",
            Self::Sumd => "SUMD",
            Self::Vma => "VMA",
            Self::Vstd => "VSTD",
            Self::Wvma => "WVMA",
            Self::Vsump => "VSUMP",
            Self::Vsumn => "VSUMN",
            Self::Vsumd => "VSUMD",
        }
    }

    #[must_use]
    pub fn expression(self, d: u32) -> String {
        match self {
            Self::Roc => format!("Ref($close, {d})/$close"),
            Self::Ma => format!("Mean($close, {d})/$close"),
            Self::Std => format!("Std($close, {d})/$close"),
            Self::Beta => format!("Slope($close, {d})/$close"),
            Self::Rsqr => format!("Rsquare($close, {d})"),
            Self::Resi => format!("Resi($close, {d})/$close"),
            Self::Max => format!("Max($high, {d})/$close"),
            Self::Min => format!("Min($low, {d})/$close"),
            Self::Qtlu => format!("Quantile($close, {d}, 0.8)/$close"),
            Self::Qtld => format!("Quantile($close, {d}, 0.2)/$close"),
            Self::Rank => format!("Rank($close, {d})"),
            Self::Rsv => {
                format!("($close-Min($low, {d}))/(Max($high, {d})-Min($low, {d})+1e-12)")
            }
            Self::Imax => format!("IdxMax($high, {d})/{d}"),
            Self::Imin => format!("IdxMin($low, {d})/{d}"),
            Self::Imxd => format!("(IdxMax($high, {d})-IdxMin($low, {d}))/{d}"),
            Self::Corr => format!("Corr($close, Log($volume+1), {d})"),
            Self::Cord => {
                format!("Corr($close/Ref($close,1), Log($volume/Ref($volume, 1)+1), {d})")
            }
            Self::Cntp => format!("Mean($close>Ref($close, 1), {d})"),
            Self::Cntn => format!("Mean($close<Ref($close, 1), {d})"),
            Self::Cntd => {
                format!("Mean($close>Ref($close, 1), {d})-Mean($close<Ref($close, 1), {d})")
            }
            Self::Sump => format!(
                "Sum(Greater($close-Ref($close, 1), 0), {d})/(Sum(Abs($close-Ref($close, 1)), {d})+1e-12)"
            ),
            Self::Sumn => format!(
                "Sum(Greater(Ref($close, 1)-$close, 0), {d})/(Sum(Abs($close-Ref($close, 1)), {d})+1e-12)"
            ),
            Self::Sumd => format!(
                "(Sum(Greater($close-Ref($close, 1), 0), {d})-Sum(Greater(Ref($close, 1)-$close, 0), {d}))\
                 /(Sum(Abs($close-Ref($close, 1)), {d})+1e-12)"
            ),
            Self::Vma => format!("Mean($volume, {d})/($volume+1e-12)"),
            Self::Vstd => format!("Std($volume, {d})/($volume+1e-12)"),
            Self::Wvma => format!(
                "Std(Abs($close/Ref($close, 1)-1)*$volume, {d})\
                 /(Mean(Abs($close/Ref($close, 1)-1)*$volume, {d})+1e-12)"
            ),
            Self::Vsump => format!(
                "Sum(Greater($volume-Ref($volume, 1), 0), {d})/(Sum(Abs($volume-Ref($volume, 1)), {d})+1e-12)"
            ),
            Self::Vsumn => format!(
                "Sum(Greater(Ref($volume, 1)-$volume, 0), {d})/(Sum(Abs($volume-Ref($volume, 1)), {d})+1e-12)"
            ),
            Self::Vsumd => format!(
                "(Sum(Greater($volume-Ref($volume, 1), 0), {d})-Sum(Greater(Ref($volume, 1)-$volume, 0), {d}))\
                 /(Sum(Abs($volume-Ref($volume, 1)), {d})+1e-12)"
            ),
        }
    }
}

const KBAR: [(&str, &str); 9] = [
    ("($close-$open)/$open", "KMID"),
    ("($high-$low)/$open", "KLEN"),
    ("($close-$open)/($high-$low+1e-12)", "KMID2"),
    ("($high-Greater($open, $close))/$open", "KUP"),
    ("($high-Greater($open, $close))/($high-$low+1e-12)", "KUP2"),
    ("(Less($open, $close)-$low)/$open", "KLOW"),
    ("(Less($open, $close)-$low)/($high-$low+1e-12)", "KLOW2"),
    ("(2*$close-$high-$low)/$open", "KSFT"),
    ("(2*$close-$high-$low)/($high-$low+1e-12)", "KSFT2"),
];

/// Which feature families to generate. An absent section is skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Alpha158Config {
    #[serde(default)]
    pub kbar: bool,
    #[serde(default)]
    pub price: Option<PriceWindows>,
    #[serde(default)]
    pub volume: Option<VolumeWindows>,
    #[serde(default)]
    pub rolling: Option<RollingWindows>,
}

impl Default for Alpha158Config {
    /// K-bar features, today's open/high/low and every rolling operator.
    fn default() -> Self {
        Self {
            kbar: true,
            price: Some(PriceWindows {
                windows: vec![0],
                feature: vec![PriceField::Open, PriceField::High, PriceField::Low],
            }),
            volume: None,
            rolling: Some(RollingWindows::default()),
        }
    }
}

impl Alpha158Config {
    /// Same as the default with today's VWAP added to the price features.
    #[must_use]
    pub fn with_vwap() -> Self {
        let mut config = Self::default();
        if let Some(price) = config.price.as_mut() {
            price.feature.push(PriceField::Vwap);
        }
        config
    }

    /// Expressions and names of the configured families, in family order.
    #[must_use]
    pub fn to_field_spec(&self) -> FieldSpec {
        let mut expressions = Vec::new();
        let mut names = Vec::new();

        if self.kbar {
            for (expression, name) in KBAR {
                expressions.push(expression.to_string());
                names.push(name.to_string());
            }
        }

        if let Some(price) = &self.price {
            for field in &price.feature {
                for &d in &price.windows {
                    expressions.push(if d == 0 {
                        format!("{}/$close", field.field())
                    } else {
                        format!("Ref({}, {d})/$close", field.field())
                    });
                    names.push(format!("{}{d}", field.label()));
                }
            }
        }

        if let Some(volume) = &self.volume {
            for &d in &volume.windows {
                expressions.push(if d == 0 {
                    "$volume/$volume".to_string()
                } else {
                    format!("Ref($volume, {d})/$volume")
                });
                names.push(format!("VOLUME{d}"));
            }
        }

        if let Some(rolling) = &self.rolling {
            for op in RollingOp::ALL.into_iter().filter(|&op| rolling.uses(op)) {
                for &d in &rolling.windows {
                    expressions.push(op.expression(d));
                    names.push(format!("{}{d}", op.prefix()));
                }
            }
        }

        FieldSpec::Paired { expressions, names }
    }
}

/// Forward return used as the training label.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Label {
    #[default]
    Close,
    Vwap,
}

impl Label {
    #[must_use]
    pub fn field_spec(self) -> FieldSpec {
        let expression = match self {
            Self::Close => "Ref($close, -2)/Ref($close, -1) - 1",
            Self::Vwap => "Ref($vwap, -2)/Ref($vwap, -1) - 1",
        };
        FieldSpec::Paired {
            expressions: vec![expression.to_string()],
            names: vec!["LABEL0".to_string()],
        }
    }
}

/// `feature` and `label` groups for a given feature configuration.
#[must_use]
pub fn feature_label_fields(features: &Alpha158Config, label: Label) -> FieldsConfig {
    FieldsConfig::Grouped(vec![
        FieldGroup::new("feature", features.to_field_spec()),
        FieldGroup::new("label", label.field_spec()),
    ])
}

/// The Alpha158 field set.
#[must_use]
pub fn alpha158(label: Label) -> FieldsConfig {
    let features = match label {
        Label::Close => Alpha158Config::default(),
        Label::Vwap => Alpha158Config::with_vwap(),
    };
    feature_label_fields(&features, label)
}

/// The Alpha360 field set: 60 days of raw price and volume ratios.
#[must_use]
pub fn alpha360(label: Label) -> FieldsConfig {
    let features = Alpha158Config {
        kbar: false,
        price: Some(PriceWindows {
            windows: (0..60).collect(),
            feature: default_price_fields(),
        }),
        volume: Some(VolumeWindows {
            windows: (0..60).collect(),
        }),
        rolling: None,
    };
    feature_label_fields(&features, label)
}

fn default_short_windows() -> Vec<u32> {
    (0..5).collect()
}

fn default_rolling_windows() -> Vec<u32> {
    vec![5, 10, 20, 30, 60]
}

fn default_price_fields() -> Vec<PriceField> {
    PriceField::ALL.to_vec()
}
