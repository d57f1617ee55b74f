//! # Charts
//!
//! The generative model is asked to answer chart requests with a small JSON
//! document:
//!
//! ```json
//! {"type": "pie", "labels": ["A", "B"], "values": [3, 7]}
//! ```
//!
//! That reply is untrusted. [`parse_chart_spec`] validates it into a
//! [`ChartSpec`] or explains why it could not, as a [`MalformedOutput`] value.
//! [`format_chart`] then maps a valid spec onto the document shape the
//! front-end charting library consumes ([`FormattedChart`]).
//!
//! Numbers are carried as [`serde_json::Number`] so the model's own
//! representation (`3` vs `3.0`) reaches the chart unchanged.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value as JsonValue};

/// Chart shapes the service can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Bar,
    Line,
    Pie,
}

impl ChartKind {
    /// Interpret a caller-supplied chart type. Case and surrounding whitespace
    /// are ignored; anything unsupported yields `None`.
    pub fn from_hint(hint: &str) -> Option<Self> {
        hint.trim().to_ascii_lowercase().parse().ok()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ChartKind::Bar => "bar",
            ChartKind::Line => "line",
            ChartKind::Pie => "pie",
        }
    }
}

impl fmt::Display for ChartKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChartKind {
    type Err = String;

    /// Exact, lowercase match as written in the output schema.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bar" => Ok(ChartKind::Bar),
            "line" => Ok(ChartKind::Line),
            "pie" => Ok(ChartKind::Pie),
            other => Err(format!("unsupported chart type {other:?}")),
        }
    }
}

/// Validated chart description. `labels` and `values` always have equal length.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartSpec {
    kind: ChartKind,
    labels: Vec<String>,
    values: Vec<Number>,
}

impl ChartSpec {
    /// Build a spec, rejecting label/value sequences of different lengths.
    pub fn new(
        kind: ChartKind,
        labels: Vec<String>,
        values: Vec<Number>,
    ) -> Result<Self, MalformedOutput> {
        if labels.len() != values.len() {
            return Err(MalformedOutput::new(format!(
                "{} labels but {} values",
                labels.len(),
                values.len()
            )));
        }
        Ok(Self {
            kind,
            labels,
            values,
        })
    }

    pub fn kind(&self) -> ChartKind {
        self.kind
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn values(&self) -> &[Number] {
        &self.values
    }
}

/// The model replied, but not with a usable chart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedOutput {
    pub reason: String,
}

impl MalformedOutput {
    fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl fmt::Display for MalformedOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed chart output: {}", self.reason)
    }
}

/// Validate raw model text against the `{type, labels, values}` contract.
///
/// Surrounding whitespace is ignored; anything else that is not exactly one
/// JSON object with the three fields is rejected. Labels may be strings or
/// numbers (numbers are rendered as text); values must be numbers. Extra
/// fields are ignored.
pub fn parse_chart_spec(raw: &str) -> Result<ChartSpec, MalformedOutput> {
    let document: JsonValue = serde_json::from_str(raw.trim())
        .map_err(|e| MalformedOutput::new(format!("not valid JSON: {e}")))?;

    let object = document
        .as_object()
        .ok_or_else(|| MalformedOutput::new("top-level value is not an object"))?;

    let kind = match object.get("type") {
        Some(JsonValue::String(s)) => s.parse::<ChartKind>().map_err(MalformedOutput::new)?,
        Some(_) => return Err(MalformedOutput::new("\"type\" is not a string")),
        None => return Err(MalformedOutput::new("missing \"type\"")),
    };

    let labels = match object.get("labels") {
        Some(JsonValue::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, item)| match item {
                JsonValue::String(s) => Ok(s.clone()),
                JsonValue::Number(n) => Ok(n.to_string()),
                _ => Err(MalformedOutput::new(format!(
                    "label {i} is neither a string nor a number"
                ))),
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => return Err(MalformedOutput::new("\"labels\" is not an array")),
        None => return Err(MalformedOutput::new("missing \"labels\"")),
    };

    let values = match object.get("values") {
        Some(JsonValue::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, item)| match item {
                JsonValue::Number(n) => Ok(n.clone()),
                _ => Err(MalformedOutput::new(format!("value {i} is not a number"))),
            })
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => return Err(MalformedOutput::new("\"values\" is not an array")),
        None => return Err(MalformedOutput::new("missing \"values\"")),
    };

    ChartSpec::new(kind, labels, values)
}

const PIE_TITLE: &str = "Crime Distribution";
const PIE_SERIES: &str = "Crime Count";
const SERIES_TITLE: &str = "Number of Crimes by Time";
const SERIES_NAME: &str = "Time of Crime";

/// Chart document in the shape the front-end charting library expects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormattedChart {
    pub chart: ChartOptions,
    pub title: Title,
    #[serde(rename = "xAxis", default, skip_serializing_if = "Option::is_none")]
    pub x_axis: Option<XAxis>,
    pub series: Vec<Series>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartOptions {
    #[serde(rename = "type")]
    pub kind: ChartKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Title {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XAxis {
    pub categories: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    pub name: String,
    pub data: Vec<DataPoint>,
}

/// Pie slices are named points; bar and line series are bare values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DataPoint {
    Named { name: String, y: Number },
    Value(Number),
}

/// Map a valid spec onto the charting document. Pure and deterministic.
pub fn format_chart(spec: &ChartSpec) -> FormattedChart {
    match spec.kind {
        ChartKind::Pie => FormattedChart {
            chart: ChartOptions {
                kind: ChartKind::Pie,
            },
            title: Title {
                text: PIE_TITLE.to_string(),
            },
            x_axis: None,
            series: vec![Series {
                name: PIE_SERIES.to_string(),
                data: spec
                    .labels
                    .iter()
                    .zip(&spec.values)
                    .map(|(label, value)| DataPoint::Named {
                        name: label.clone(),
                        y: value.clone(),
                    })
                    .collect(),
            }],
        },
        kind @ (ChartKind::Bar | ChartKind::Line) => FormattedChart {
            chart: ChartOptions { kind },
            title: Title {
                text: SERIES_TITLE.to_string(),
            },
            x_axis: Some(XAxis {
                categories: spec.labels.clone(),
            }),
            series: vec![Series {
                name: SERIES_NAME.to_string(),
                data: spec.values.iter().cloned().map(DataPoint::Value).collect(),
            }],
        },
    }
}
