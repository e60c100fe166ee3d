//! Chart rendering and render-completion signalling.
//!
//! Drawing happens asynchronously. Every chart gets a [`ReadySignal`] that its
//! render task resolves once the pixels are on the surface, and the exporter
//! awaits the whole [`ReadinessSet`] before capturing.

use crate::model::{ChartKind, ChartSpec, ChartId};
use crate::rendering::{from_pixmap, Color};
use crate::{Error, Result};
use async_trait::async_trait;
use image::RgbaImage;
use std::time::Duration;
use tiny_skia::{BlendMode, FillRule, LineCap, LineJoin, PathBuilder, Pixmap, Rect, Stroke, Transform};
use tokio::sync::watch;

/// Series colours, cycled per dataset (bars/lines) or per slice (pies).
pub const PALETTE: [Color; 6] = [
    Color::rgb(0x8b, 0x5c, 0xf6),
    Color::rgb(0xec, 0x48, 0x99),
    Color::rgb(0x10, 0xb9, 0x81),
    Color::rgb(0xf5, 0x9e, 0x0b),
    Color::rgb(0x3b, 0x82, 0xf6),
    Color::rgb(0xef, 0x44, 0x44),
];

/// Draws one chart spec into a bitmap of the requested size.
#[async_trait]
pub trait ChartRenderer: Send + Sync {
    async fn draw(&self, spec: &ChartSpec, width: u32, height: u32) -> Result<RgbaImage>;
}

/// Deterministic `tiny-skia` renderer for bar, line, pie and doughnut charts.
#[derive(Debug, Clone, Default)]
pub struct BasicChartRenderer {
    /// Simulated drawing latency
    pub latency: Duration,
}

impl BasicChartRenderer {
    pub fn with_latency(latency: Duration) -> Self {
        Self { latency }
    }
}

#[async_trait]
impl ChartRenderer for BasicChartRenderer {
    async fn draw(&self, spec: &ChartSpec, width: u32, height: u32) -> Result<RgbaImage> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let mut canvas = Pixmap::new(width, height)
            .ok_or_else(|| Error::ChartsNotReady(format!("chart `{}` has an empty surface", spec.id)))?;
        match spec.kind {
            ChartKind::Bar => draw_bars(&mut canvas, spec),
            ChartKind::Line => draw_lines(&mut canvas, spec),
            ChartKind::Pie => draw_pie(&mut canvas, spec, 0.0),
            ChartKind::Doughnut => draw_pie(&mut canvas, spec, 0.5),
        }
        Ok(from_pixmap(&canvas))
    }
}

fn clamped(v: f64) -> f32 {
    if v.is_finite() {
        v.max(0.0) as f32
    } else {
        0.0
    }
}

fn draw_bars(canvas: &mut Pixmap, spec: &ChartSpec) {
    let (w, h) = (canvas.width() as f32, canvas.height() as f32);
    let max = spec.max_value() as f32;
    let groups = spec.labels.len().max(spec.datasets.iter().map(|s| s.data.len()).max().unwrap_or(0));
    if groups == 0 || max <= 0.0 || spec.datasets.is_empty() {
        return;
    }
    let group_w = (w / groups as f32).floor();
    let bar_w = (group_w * 0.8 / spec.datasets.len() as f32).floor().max(1.0);
    for (si, series) in spec.datasets.iter().enumerate() {
        let paint = PALETTE[si % PALETTE.len()].paint();
        for (gi, v) in series.data.iter().enumerate() {
            let bar_h = (clamped(*v) / max * (h - 1.0)).round();
            let x = gi as f32 * group_w + (group_w / 10.0).floor() + si as f32 * bar_w;
            if let Some(rect) = Rect::from_xywh(x, h - bar_h, bar_w, bar_h) {
                canvas.fill_rect(rect, &paint, Transform::identity(), None);
            }
        }
    }
}

fn draw_lines(canvas: &mut Pixmap, spec: &ChartSpec) {
    let (w, h) = (canvas.width() as f32, canvas.height() as f32);
    let max = spec.max_value() as f32;
    if max <= 0.0 {
        return;
    }
    let stroke = Stroke { width: 2.0, line_cap: LineCap::Round, line_join: LineJoin::Round, ..Stroke::default() };
    for (si, series) in spec.datasets.iter().enumerate() {
        let n = series.data.len();
        let points: Vec<(f32, f32)> = series
            .data
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let x = if n > 1 { i as f32 * (w - 1.0) / (n as f32 - 1.0) } else { w / 2.0 };
                (x, (h - 1.0) * (1.0 - clamped(*v) / max))
            })
            .collect();
        let Some(&(x0, y0)) = points.first() else { continue };
        let mut pb = PathBuilder::new();
        pb.move_to(x0, y0);
        for &(x, y) in &points[1..] {
            pb.line_to(x, y);
        }
        // A single point still shows as a dot.
        if n == 1 {
            pb.line_to(x0 + 0.01, y0);
        }
        if let Some(path) = pb.finish() {
            let mut paint = PALETTE[si % PALETTE.len()].paint();
            paint.anti_alias = true;
            canvas.stroke_path(&path, &paint, &stroke, Transform::identity(), None);
        }
    }
}

/// Pie slices clockwise from 3 o'clock; `hole` is the inner radius fraction.
fn draw_pie(canvas: &mut Pixmap, spec: &ChartSpec, hole: f32) {
    let values: Vec<f32> = spec
        .datasets
        .first()
        .map(|s| s.data.iter().map(|v| clamped(*v)).collect())
        .unwrap_or_default();
    let total: f32 = values.iter().sum();
    if total <= 0.0 {
        return;
    }
    let cx = canvas.width() as f32 / 2.0;
    let cy = canvas.height() as f32 / 2.0;
    let r = cx.min(cy);
    let mut start = 0.0f32;
    for (i, v) in values.iter().enumerate() {
        let sweep = v / total * std::f32::consts::TAU;
        if sweep <= 0.0 {
            continue;
        }
        let steps = ((sweep / std::f32::consts::TAU) * 128.0).ceil().max(2.0) as u32;
        let mut pb = PathBuilder::new();
        pb.move_to(cx, cy);
        for k in 0..=steps {
            let a = start + sweep * k as f32 / steps as f32;
            pb.line_to(cx + r * a.cos(), cy + r * a.sin());
        }
        pb.close();
        if let Some(path) = pb.finish() {
            canvas.fill_path(&path, &PALETTE[i % PALETTE.len()].paint(), FillRule::Winding, Transform::identity(), None);
        }
        start += sweep;
    }
    if hole > 0.0 {
        if let Some(circle) = PathBuilder::from_circle(cx, cy, r * hole) {
            let mut clear = Color::TRANSPARENT.paint();
            clear.blend_mode = BlendMode::Clear;
            canvas.fill_path(&circle, &clear, FillRule::Winding, Transform::identity(), None);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum RenderState {
    Pending,
    Rendered,
    Failed(String),
}

/// Resolves one chart's readiness. Dropping it unresolved counts as failure.
#[derive(Debug)]
pub struct ReadySignal {
    tx: watch::Sender<RenderState>,
}

impl ReadySignal {
    pub fn rendered(self) {
        let _ = self.tx.send(RenderState::Rendered);
    }

    pub fn failed(self, reason: impl Into<String>) {
        let _ = self.tx.send(RenderState::Failed(reason.into()));
    }
}

/// Render-completion notifications for every chart of a dashboard.
#[derive(Debug, Clone, Default)]
pub struct ReadinessSet {
    charts: Vec<(ChartId, watch::Receiver<RenderState>)>,
}

impl ReadinessSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, chart_id: ChartId) -> ReadySignal {
        let (tx, rx) = watch::channel(RenderState::Pending);
        self.charts.push((chart_id, rx));
        ReadySignal { tx }
    }

    pub fn len(&self) -> usize {
        self.charts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.charts.is_empty()
    }

    /// Charts that have not reported rendered yet.
    pub fn pending(&self) -> Vec<ChartId> {
        self.charts
            .iter()
            .filter(|(_, rx)| *rx.borrow() != RenderState::Rendered)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Wait until every chart reports rendered, failing on the first chart
    /// that reports failure or when `timeout` expires.
    pub async fn wait_all(&self, timeout: Duration) -> Result<()> {
        let waits = self.charts.iter().map(|(id, rx)| {
            let mut rx = rx.clone();
            let id = id.clone();
            async move {
                let state = rx
                    .wait_for(|s| *s != RenderState::Pending)
                    .await
                    .map(|s| s.clone())
                    .map_err(|_| Error::ChartsNotReady(format!("renderer for `{}` went away", id)))?;
                match state {
                    RenderState::Failed(reason) => Err(Error::ChartsNotReady(format!("`{}`: {}", id, reason))),
                    _ => Ok(()),
                }
            }
        });
        match tokio::time::timeout(timeout, futures::future::try_join_all(waits)).await {
            Ok(res) => res.map(|_| ()),
            Err(_) => Err(Error::ChartsNotReady(format!(
                "timed out after {}ms waiting for {:?}",
                timeout.as_millis(),
                self.pending()
            ))),
        }
    }
}
