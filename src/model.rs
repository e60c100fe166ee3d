//! Dashboard data received from the upstream analysis service.
//!
//! A [`DashboardSnapshot`] is immutable once parsed. Each [`ChartSpec`] carries a
//! stable [`ChartId`] so the rendered drawing surface can be correlated by
//! identity instead of document position.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use indexmap::IndexMap;
use std::fmt;

/// Maximum number of preview rows the dashboard shows.
pub const PREVIEW_ROWS: usize = 10;

/// A single preview row: column name to cell value, in upstream column order.
pub type PreviewRow = serde_json::Map<String, serde_json::Value>;

/// Row/column counts describing the uploaded table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    #[serde(default)]
    pub file_name: String,
    pub total_rows: u64,
    pub total_columns: u64,
    pub numeric_columns: u64,
    pub categorical_columns: u64,
}

/// Per-column statistics for numeric columns
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NumericStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub sum: f64,
}

/// Stable identifier tying a chart spec to its drawing surface
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChartId(pub String);

impl ChartId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChartId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Bar,
    Line,
    Pie,
    #[serde(alias = "donut")]
    Doughnut,
}

/// One data series of a chart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Series {
    #[serde(default)]
    pub label: String,
    pub data: Vec<f64>,
}

/// Everything the chart renderer needs to draw one chart
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartSpec {
    pub id: ChartId,
    pub kind: ChartKind,
    pub title: String,
    pub labels: Vec<String>,
    pub datasets: Vec<Series>,
}

impl ChartSpec {
    /// Largest value across all series (0 when there is no data).
    pub fn max_value(&self) -> f64 {
        self.datasets
            .iter()
            .flat_map(|s| s.data.iter().copied())
            .filter(|v| v.is_finite())
            .fold(0.0, f64::max)
    }
}

/// The data backing one dashboard render
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardSnapshot {
    pub file_name: String,
    pub summary: Summary,
    pub numeric_stats: IndexMap<String, NumericStats>,
    pub charts: Vec<ChartSpec>,
    pub preview: Vec<PreviewRow>,
}

// Wire shapes as sent by the analysis service. `summary` stays optional here so
// its absence surfaces as `InvalidSnapshot` rather than a serde message.
#[derive(Deserialize)]
struct WireSnapshot {
    #[serde(default)]
    file_name: Option<String>,
    #[serde(default)]
    summary: Option<Summary>,
    #[serde(default)]
    numeric_stats: IndexMap<String, NumericStats>,
    #[serde(default)]
    charts: Vec<WireChart>,
    #[serde(default)]
    preview: Vec<PreviewRow>,
}

#[derive(Deserialize)]
struct WireChart {
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type", alias = "kind")]
    kind: ChartKind,
    #[serde(default)]
    title: String,
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    datasets: Vec<Series>,
}

impl DashboardSnapshot {
    /// Parse the upstream JSON payload.
    pub fn from_json(raw: &str) -> Result<Self> {
        let wire: WireSnapshot = serde_json::from_str(raw)
            .map_err(|e| Error::InvalidSnapshot(format!("malformed payload: {}", e)))?;
        Self::from_wire(wire)
    }

    /// Build a snapshot from an already-decoded JSON value.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        let wire: WireSnapshot = serde_json::from_value(value)
            .map_err(|e| Error::InvalidSnapshot(format!("malformed payload: {}", e)))?;
        Self::from_wire(wire)
    }

    fn from_wire(wire: WireSnapshot) -> Result<Self> {
        let summary = wire
            .summary
            .ok_or_else(|| Error::InvalidSnapshot("missing `summary`".into()))?;

        let file_name = wire
            .file_name
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| summary.file_name.clone());

        let charts = wire
            .charts
            .into_iter()
            .enumerate()
            .map(|(idx, c)| ChartSpec {
                id: ChartId(c.id.filter(|s| !s.is_empty()).unwrap_or_else(|| format!("chart-{}", idx))),
                kind: c.kind,
                title: c.title,
                labels: c.labels,
                datasets: c.datasets,
            })
            .collect::<Vec<_>>();

        let mut seen = std::collections::HashSet::new();
        for c in &charts {
            if !seen.insert(c.id.clone()) {
                return Err(Error::InvalidSnapshot(format!("duplicate chart id `{}`", c.id)));
            }
        }

        Ok(Self {
            file_name,
            summary,
            numeric_stats: wire.numeric_stats,
            charts,
            preview: wire.preview,
        })
    }

    /// Rows the preview table actually displays.
    pub fn visible_preview(&self) -> &[PreviewRow] {
        &self.preview[..self.preview.len().min(PREVIEW_ROWS)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sales() -> serde_json::Value {
        json!({
            "summary": {
                "file_name": "sales.csv",
                "total_rows": 150,
                "total_columns": 6,
                "numeric_columns": 4,
                "categorical_columns": 2
            },
            "numeric_stats": {
                "revenue": { "min": 1.0, "max": 9.5, "mean": 4.2, "median": 4.0, "sum": 630.0 }
            },
            "charts": [
                { "type": "bar", "title": "Revenue", "labels": ["a", "b"], "datasets": [{ "label": "r", "data": [1.0, 2.0] }] },
                { "id": "share", "type": "pie", "labels": ["x"], "datasets": [{ "data": [3.0] }] }
            ],
            "preview": [{ "region": "north", "revenue": 3.5 }]
        })
    }

    #[test]
    fn parses_upstream_payload_and_assigns_ids() {
        let snap = DashboardSnapshot::from_value(sales()).unwrap();
        assert_eq!(snap.file_name, "sales.csv");
        assert_eq!(snap.summary.total_rows, 150);
        assert_eq!(snap.charts[0].id.as_str(), "chart-0");
        assert_eq!(snap.charts[1].id.as_str(), "share");
        assert_eq!(snap.charts[1].kind, ChartKind::Pie);
        assert_eq!(snap.numeric_stats["revenue"].sum, 630.0);
    }

    #[test]
    fn missing_summary_is_rejected() {
        let err = DashboardSnapshot::from_value(json!({ "charts": [] })).unwrap_err();
        assert!(matches!(err, Error::InvalidSnapshot(_)));
    }

    #[test]
    fn top_level_file_name_wins() {
        let mut v = sales();
        v["file_name"] = json!("q3.xlsx");
        let snap = DashboardSnapshot::from_value(v).unwrap();
        assert_eq!(snap.file_name, "q3.xlsx");
    }

    #[test]
    fn duplicate_chart_ids_are_rejected() {
        let mut v = sales();
        v["charts"][0]["id"] = json!("share");
        assert!(DashboardSnapshot::from_value(v).is_err());
    }

    #[test]
    fn preview_is_capped() {
        let mut v = sales();
        v["preview"] = json!((0..25).map(|i| json!({ "n": i })).collect::<Vec<_>>());
        let snap = DashboardSnapshot::from_value(v).unwrap();
        assert_eq!(snap.preview.len(), 25);
        assert_eq!(snap.visible_preview().len(), PREVIEW_ROWS);
    }

    #[test]
    fn upstream_column_order_is_kept() {
        let snap = DashboardSnapshot::from_json(
            r#"{
                "summary": { "file_name": "t.csv", "total_rows": 1, "total_columns": 2, "numeric_columns": 2, "categorical_columns": 0 },
                "numeric_stats": {
                    "zeta": { "min": 0.0, "max": 1.0, "mean": 0.5, "median": 0.5, "sum": 1.0 },
                    "alpha": { "min": 0.0, "max": 2.0, "mean": 1.0, "median": 1.0, "sum": 2.0 }
                },
                "preview": [{ "zeta": 1, "alpha": 2 }]
            }"#,
        )
        .unwrap();
        assert_eq!(snap.numeric_stats.keys().collect::<Vec<_>>(), ["zeta", "alpha"]);
        assert_eq!(snap.preview[0].keys().collect::<Vec<_>>(), ["zeta", "alpha"]);
    }

    #[test]
    fn max_value_ignores_non_finite() {
        let snap = DashboardSnapshot::from_value(sales()).unwrap();
        assert_eq!(snap.charts[0].max_value(), 2.0);
    }
}
