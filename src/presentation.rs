//! Dashboard presentation: turn a snapshot into a document and keep its charts
//! painted.
//!
//! Every chart spec yields exactly one drawing surface, in `charts` order,
//! tagged with the chart's id.

use crate::charts::{ChartRenderer, ReadinessSet};
use crate::dom::{Document, NodeId, Style};
use crate::export::ExportTarget;
use crate::model::{ChartId, DashboardSnapshot};
use crate::rendering::Color;
use crate::Result;
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// `id` of the element the exporter captures.
pub const DASHBOARD_ROOT_ID: &str = "dashboard-content";

/// Intrinsic size of every chart surface.
pub const CHART_WIDTH: u32 = 560;
pub const CHART_HEIGHT: u32 = 280;

const BACKGROUND: Color = Color::rgb(0x11, 0x18, 0x27);
const PANEL: Color = Color::rgb(0x1f, 0x29, 0x37);
const PANEL_HEADER: Color = Color::rgb(0x37, 0x41, 0x51);
const MUTED: Color = Color::rgb(0x9c, 0xa3, 0xaf);
const ACCENT: Color = Color::rgb(0xf4, 0x72, 0xb6);
const ROW_TEXT: Color = Color::rgb(0xe5, 0xe7, 0xeb);

/// A snapshot rendered into a fresh document.
#[derive(Debug, Clone)]
pub struct RenderedDashboard {
    pub document: Document,
    pub root: NodeId,
    /// Chart surfaces in `charts` order
    pub surfaces: Vec<(ChartId, NodeId)>,
}

fn text(color: Color, scale: u32) -> Style {
    Style { color, text_scale: scale, ..Default::default() }
}

fn panel(gap: u32) -> Style {
    Style { background: Some(PANEL), padding: 16, gap, ..Default::default() }
}

fn push_text(doc: &mut Document, parent: NodeId, value: impl Into<String>, style: Style) -> Result<NodeId> {
    let t = doc.create_text(value, style);
    doc.append_child(parent, t)?;
    Ok(t)
}

fn push_element(doc: &mut Document, parent: NodeId, tag: &str, class: Option<&str>, style: Style) -> Result<NodeId> {
    let e = doc.create_element(tag, None, class, style);
    doc.append_child(parent, e)?;
    Ok(e)
}

/// `1234567` -> `1,234,567`
pub fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

fn cell_text(v: &serde_json::Value) -> String {
    match v {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn push_row(doc: &mut Document, table: NodeId, cells: &[String], header: bool) -> Result<()> {
    let style = Style {
        columns: Some(cells.len().max(1) as u32),
        padding: 6,
        background: header.then_some(PANEL_HEADER),
        ..Default::default()
    };
    let row = push_element(doc, table, "tr", None, style)?;
    for (i, c) in cells.iter().enumerate() {
        let color = if header { Color::WHITE } else if i == 0 { Color::rgb(0xd8, 0xb4, 0xfe) } else { ROW_TEXT };
        let td = push_element(doc, row, if header { "th" } else { "td" }, None, Style::default())?;
        push_text(doc, td, c.clone(), text(color, 1))?;
    }
    Ok(())
}

/// Build the dashboard document for `snapshot`.
pub fn render_dashboard(snapshot: &DashboardSnapshot) -> Result<RenderedDashboard> {
    let mut doc = Document::new();
    let body = doc.root();
    let root = doc.create_element(
        "div",
        Some(DASHBOARD_ROOT_ID),
        None,
        Style { background: Some(BACKGROUND), padding: 24, gap: 24, ..Default::default() },
    );
    doc.append_child(body, root)?;

    let header = push_element(&mut doc, root, "header", None, Style { gap: 8, ..Default::default() })?;
    push_text(&mut doc, header, "Data Analytics Dashboard", text(Color::WHITE, 3))?;
    push_text(&mut doc, header, format!("File: {}", snapshot.file_name), text(MUTED, 1))?;

    let s = &snapshot.summary;
    let cards = push_element(
        &mut doc,
        root,
        "section",
        Some("summary"),
        Style { columns: Some(4), gap: 16, ..Default::default() },
    )?;
    for (title, value, color) in [
        ("Total Rows", group_thousands(s.total_rows), Color::rgb(0xc0, 0x84, 0xfc)),
        ("Total Columns", s.total_columns.to_string(), Color::rgb(0x60, 0xa5, 0xfa)),
        ("Numeric Fields", s.numeric_columns.to_string(), Color::rgb(0x34, 0xd3, 0x99)),
        ("Text Fields", s.categorical_columns.to_string(), Color::rgb(0xfb, 0x92, 0x3c)),
    ] {
        let card = push_element(&mut doc, cards, "div", Some("summary-card"), panel(8))?;
        push_text(&mut doc, card, title, text(MUTED, 1))?;
        push_text(&mut doc, card, value, text(color, 2))?;
    }

    if !snapshot.numeric_stats.is_empty() {
        let section = push_element(&mut doc, root, "section", Some("numeric-stats"), panel(12))?;
        push_text(&mut doc, section, "Numeric Statistics", text(ACCENT, 2))?;
        let table = push_element(&mut doc, section, "table", None, Style::default())?;
        let head: Vec<String> = ["Column", "Min", "Max", "Mean", "Median", "Sum"].iter().map(|h| h.to_string()).collect();
        push_row(&mut doc, table, &head, true)?;
        for (col, st) in &snapshot.numeric_stats {
            let cells = vec![
                col.clone(),
                format!("{:.2}", st.min),
                format!("{:.2}", st.max),
                format!("{:.2}", st.mean),
                format!("{:.2}", st.median),
                format!("{:.2}", st.sum),
            ];
            push_row(&mut doc, table, &cells, false)?;
        }
    }

    let grid = push_element(
        &mut doc,
        root,
        "section",
        Some("charts"),
        Style { columns: Some(2), gap: 24, ..Default::default() },
    )?;
    let mut surfaces = Vec::with_capacity(snapshot.charts.len());
    for chart in &snapshot.charts {
        let card = push_element(&mut doc, grid, "div", Some("chart-card"), panel(12))?;
        let title = if chart.title.is_empty() { chart.id.to_string() } else { chart.title.clone() };
        push_text(&mut doc, card, title, text(Color::WHITE, 2))?;
        let surface = doc.create_surface(Some(chart.id.clone()), CHART_WIDTH, CHART_HEIGHT, Style::default());
        doc.append_child(card, surface)?;
        surfaces.push((chart.id.clone(), surface));
    }

    let preview = snapshot.visible_preview();
    if !preview.is_empty() {
        let section = push_element(&mut doc, root, "section", Some("preview"), panel(12))?;
        push_text(
            &mut doc,
            section,
            format!("Data Preview (First {} Rows)", crate::model::PREVIEW_ROWS),
            text(ACCENT, 2),
        )?;
        let mut columns: Vec<String> = Vec::new();
        for row in preview {
            for k in row.keys() {
                if !columns.contains(k) {
                    columns.push(k.clone());
                }
            }
        }
        let table = push_element(&mut doc, section, "table", None, Style::default())?;
        push_row(&mut doc, table, &columns, true)?;
        for row in preview {
            let cells: Vec<String> = columns
                .iter()
                .map(|c| row.get(c).map(cell_text).unwrap_or_default())
                .collect();
            push_row(&mut doc, table, &cells, false)?;
        }
    }

    Ok(RenderedDashboard { document: doc, root, surfaces })
}

/// A mounted dashboard whose charts are painted by background tasks.
pub struct LiveDashboard {
    snapshot: Arc<DashboardSnapshot>,
    document: Arc<Mutex<Document>>,
    readiness: ReadinessSet,
    tasks: Vec<JoinHandle<()>>,
}

impl LiveDashboard {
    /// Render `snapshot` and start drawing every chart. Must be called from
    /// within a tokio runtime.
    pub fn mount(snapshot: DashboardSnapshot, renderer: Arc<dyn ChartRenderer>) -> Result<Self> {
        let rendered = render_dashboard(&snapshot)?;
        let snapshot = Arc::new(snapshot);
        let document = Arc::new(Mutex::new(rendered.document));
        let mut readiness = ReadinessSet::new();
        let mut tasks = Vec::with_capacity(snapshot.charts.len());

        for (idx, chart) in snapshot.charts.iter().enumerate() {
            let signal = readiness.register(chart.id.clone());
            let renderer = renderer.clone();
            let document = document.clone();
            let snapshot = snapshot.clone();
            tasks.push(tokio::spawn(async move {
                let spec = &snapshot.charts[idx];
                let pixels = match renderer.draw(spec, CHART_WIDTH, CHART_HEIGHT).await {
                    Ok(px) => px,
                    Err(e) => {
                        warn!("chart `{}` failed to draw: {}", spec.id, e);
                        signal.failed(e.to_string());
                        return;
                    }
                };
                let mut doc = document.lock().await;
                let painted = match doc.surface_for_chart(&spec.id) {
                    Some(surface) => doc.paint_surface(surface, pixels),
                    None => Err(crate::Error::Other(format!("no surface tagged `{}`", spec.id))),
                };
                drop(doc);
                match painted {
                    Ok(()) => {
                        debug!("chart `{}` rendered", spec.id);
                        signal.rendered();
                    }
                    Err(e) => signal.failed(e.to_string()),
                }
            }));
        }

        Ok(Self { snapshot, document, readiness, tasks })
    }

    pub fn snapshot(&self) -> &DashboardSnapshot {
        &self.snapshot
    }

    pub fn document(&self) -> Arc<Mutex<Document>> {
        self.document.clone()
    }

    pub fn readiness(&self) -> &ReadinessSet {
        &self.readiness
    }

    pub async fn wait_rendered(&self, timeout: Duration) -> Result<()> {
        self.readiness.wait_all(timeout).await
    }

    /// What the exporter needs to capture this dashboard.
    pub fn export_target(&self) -> ExportTarget {
        ExportTarget {
            document: self.document.clone(),
            root_id: DASHBOARD_ROOT_ID.to_string(),
            file_name: self.snapshot.file_name.clone(),
            readiness: Some(self.readiness.clone()),
        }
    }
}

impl Drop for LiveDashboard {
    fn drop(&mut self) {
        for t in &self.tasks {
            t.abort();
        }
    }
}
