//! Dashboard snapshot & export pipeline
//!
//! Renders an analytics dashboard (summary cards, numeric statistics, charts and
//! a row preview) into an in-process document, then captures it into a single
//! PNG and hands that to a remote compositor that returns the finished document.
//!
//! # Pipeline
//!
//! 1. Wait until every chart reports it has been drawn.
//! 2. Freeze each drawing surface into an image substitute and hide the surface.
//! 3. Rasterize the dashboard subtree (background colour + pixel ratio).
//! 4. Undo every substitution, on success and on failure alike.
//! 5. Send the raster to the compositor, then save the returned artifact as
//!    `dashboard-<file name>.<ext>`.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use dashsnap::{BasicChartRenderer, DashboardSnapshot, ExportConfig, Exporter, LiveDashboard};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let snapshot = DashboardSnapshot::from_json(&std::fs::read_to_string("analysis.json")?)?;
//! let dashboard = LiveDashboard::mount(snapshot, Arc::new(BasicChartRenderer::default()))?;
//!
//! let exporter = Exporter::new(ExportConfig {
//!     compositor_url: "http://127.0.0.1:8000/export-pdf".to_string(),
//!     ..Default::default()
//! })?;
//! let outcome = exporter.export_dashboard(&dashboard.export_target()).await?;
//! println!("saved {}", outcome.path.display());
//! # Ok(())
//! # }
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub mod error;
pub use error::{Error, Result};

pub mod capture;
pub mod charts;
pub mod compositor;
pub mod dom;
pub mod download;
pub mod export;
pub mod model;
pub mod presentation;
pub mod rendering;

pub use capture::{CaptureReport, CaptureSession, CapturedSurface, RasterOptions, Rasterizer};
pub use charts::{BasicChartRenderer, ChartRenderer, ReadinessSet, ReadySignal};
pub use compositor::{Compositor, ExportArtifact};
#[cfg(feature = "http")]
pub use compositor::HttpCompositor;
pub use download::{artifact_file_name, DirectoryDownloads, DownloadSink};
pub use export::{ExportOutcome, ExportTarget, Exporter, LogNotifier, Notification, Notifier};
pub use model::{ChartId, ChartKind, ChartSpec, DashboardSnapshot, NumericStats, Summary};
pub use presentation::{render_dashboard, LiveDashboard, DASHBOARD_ROOT_ID};
pub use rendering::raster::DomRasterizer;
pub use rendering::{Color, RasterImage};

/// Configuration for the exporter
///
/// Defaults reproduce the dashboard's look: dark `#111827` background, 2x
/// oversampling, PDF artifacts from a compositor on localhost.
///
/// # Examples
///
/// ```
/// let cfg = dashsnap::ExportConfig::default();
/// assert_eq!(cfg.pixel_ratio, 2.0);
/// assert!(cfg.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Layout width in CSS pixels; the captured width follows it
    pub viewport_width: u32,
    /// Fixed wait used only when the target has no render notifications
    pub settle_delay_ms: u64,
    /// Upper bound for charts to report rendered
    pub render_timeout_ms: u64,
    /// Extra wait after substitution, before serializing (0 = none)
    pub image_settle_ms: u64,
    /// Fill for regions with no opaque content (`#rgb`, `#rrggbb`, `#rrggbbaa`)
    pub background_color: String,
    /// Oversampling multiplier for the captured image
    pub pixel_ratio: f32,
    /// Per-image decode timeout during serialization
    pub resource_timeout_ms: u64,
    /// Remote compositor endpoint
    pub compositor_url: String,
    /// HTTP timeout for the compositor round-trip
    pub timeout_ms: u64,
    /// Extension of the saved artifact
    pub artifact_extension: String,
    /// Where artifacts are saved
    pub download_dir: PathBuf,
    /// Deadline for the whole pipeline, if any
    pub pipeline_timeout_ms: Option<u64>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            viewport_width: 1280,
            settle_delay_ms: 1000,
            render_timeout_ms: 10000,
            image_settle_ms: 0,
            background_color: "#111827".to_string(),
            pixel_ratio: 2.0,
            resource_timeout_ms: 5000,
            compositor_url: "http://127.0.0.1:8000/export-pdf".to_string(),
            timeout_ms: 30000,
            artifact_extension: "pdf".to_string(),
            download_dir: PathBuf::from("."),
            pipeline_timeout_ms: None,
        }
    }
}

impl ExportConfig {
    /// Load a JSON config; missing fields keep their defaults.
    pub fn from_json(raw: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(raw).map_err(|e| Error::ConfigError(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.pixel_ratio.is_finite() && self.pixel_ratio > 0.0) {
            return Err(Error::ConfigError(format!("pixel_ratio must be positive, got {}", self.pixel_ratio)));
        }
        if self.viewport_width == 0 {
            return Err(Error::ConfigError("viewport width must be non-zero".into()));
        }
        if self.artifact_extension.trim_start_matches('.').is_empty() {
            return Err(Error::ConfigError("artifact_extension must not be empty".into()));
        }
        if self.render_timeout_ms == 0 {
            return Err(Error::ConfigError("render_timeout_ms must be non-zero".into()));
        }
        Color::parse(&self.background_color)?;
        #[cfg(feature = "http")]
        url::Url::parse(&self.compositor_url)
            .map_err(|e| Error::ConfigError(format!("invalid compositor_url `{}`: {}", self.compositor_url, e)))?;
        Ok(())
    }
}

/// Create an exporter with the default (HTTP) compositor.
#[cfg(feature = "http")]
pub fn new_exporter(config: ExportConfig) -> Result<Exporter> {
    Exporter::new(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ExportConfig::default();
        assert_eq!(config.viewport_width, 1280);
        assert_eq!(config.settle_delay_ms, 1000);
        assert!(config.pipeline_timeout_ms.is_none());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg = ExportConfig::from_json(r##"{ "pixel_ratio": 1.5, "background_color": "#000" }"##).unwrap();
        assert_eq!(cfg.pixel_ratio, 1.5);
        assert_eq!(cfg.artifact_extension, "pdf");
    }

    #[test]
    fn validation_catches_bad_values() {
        for bad in [
            ExportConfig { pixel_ratio: 0.0, ..Default::default() },
            ExportConfig { background_color: "navy".into(), ..Default::default() },
            ExportConfig { artifact_extension: ".".into(), ..Default::default() },
            ExportConfig { render_timeout_ms: 0, ..Default::default() },
        ] {
            assert!(matches!(bad.validate(), Err(Error::ConfigError(_))), "{:?}", bad);
        }
    }

    #[cfg(feature = "http")]
    #[test]
    fn validation_checks_compositor_url() {
        let cfg = ExportConfig { compositor_url: "::nope".into(), ..Default::default() };
        assert!(cfg.validate().is_err());
    }
}
