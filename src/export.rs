//! Export orchestration: settle, capture, restore, transmit, download, notify.

use crate::capture::{CaptureReport, CaptureSession, RasterOptions, Rasterizer};
use crate::charts::ReadinessSet;
use crate::compositor::{Compositor, ExportArtifact};
use crate::dom::Document;
use crate::download::{artifact_file_name, DirectoryDownloads, DownloadSink};
use crate::rendering::raster::DomRasterizer;
use crate::rendering::{Color, RasterImage};
use crate::{Error, ExportConfig, Result};
use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// The dashboard to capture.
#[derive(Clone)]
pub struct ExportTarget {
    pub document: Arc<Mutex<Document>>,
    /// `id` of the element to capture
    pub root_id: String,
    /// The snapshot's file name, used to name the artifact
    pub file_name: String,
    /// Per-chart render notifications; `None` falls back to the settle delay
    pub readiness: Option<ReadinessSet>,
}

/// What a successful export produced.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportOutcome {
    pub path: PathBuf,
    pub file_name: String,
    pub raster_width: u32,
    pub raster_height: u32,
    pub artifact_bytes: usize,
    pub capture: CaptureReport,
}

/// The single user-visible message produced per export attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Exported { path: PathBuf, bytes: usize },
    Failed { message: String },
}

pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification);
}

/// Reports outcomes through the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: &Notification) {
        match notification {
            Notification::Exported { path, bytes } => info!("Exported dashboard to {} ({} bytes)", path.display(), bytes),
            Notification::Failed { message } => error!("Failed to export dashboard: {}", message),
        }
    }
}

/// Resets the in-flight flag however the export ends.
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::ExportInProgress)?;
        Ok(Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drives one export at a time through the capture pipeline.
pub struct Exporter {
    config: ExportConfig,
    raster_options: RasterOptions,
    rasterizer: Arc<dyn Rasterizer>,
    compositor: Arc<dyn Compositor>,
    downloads: Arc<dyn DownloadSink>,
    notifier: Arc<dyn Notifier>,
    in_flight: AtomicBool,
}

impl Exporter {
    /// Build an exporter with the HTTP compositor and directory downloads.
    #[cfg(feature = "http")]
    pub fn new(config: ExportConfig) -> Result<Self> {
        let compositor = crate::compositor::HttpCompositor::new(
            &config.compositor_url,
            Duration::from_millis(config.timeout_ms),
        )?;
        Self::with_compositor(config, Arc::new(compositor))
    }

    /// Build an exporter around any compositor; other collaborators use defaults.
    pub fn with_compositor(config: ExportConfig, compositor: Arc<dyn Compositor>) -> Result<Self> {
        config.validate()?;
        let raster_options = RasterOptions {
            background_color: Color::parse(&config.background_color)?,
            pixel_ratio: config.pixel_ratio,
        };
        let rasterizer = DomRasterizer::new(config.viewport_width, Duration::from_millis(config.resource_timeout_ms));
        let downloads = DirectoryDownloads::new(config.download_dir.clone());
        Ok(Self {
            config,
            raster_options,
            rasterizer: Arc::new(rasterizer),
            compositor,
            downloads: Arc::new(downloads),
            notifier: Arc::new(LogNotifier),
            in_flight: AtomicBool::new(false),
        })
    }

    pub fn rasterizer(mut self, rasterizer: Arc<dyn Rasterizer>) -> Self {
        self.rasterizer = rasterizer;
        self
    }

    pub fn downloads(mut self, downloads: Arc<dyn DownloadSink>) -> Self {
        self.downloads = downloads;
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn config(&self) -> &ExportConfig {
        &self.config
    }

    /// Whether an export is currently running.
    pub fn is_exporting(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Run the whole pipeline and report the result exactly once.
    ///
    /// The captured subtree is left as it was found on every path, including
    /// when the optional pipeline deadline cancels the run.
    pub async fn export_dashboard(&self, target: &ExportTarget) -> Result<ExportOutcome> {
        let _guard = match InFlight::acquire(&self.in_flight) {
            Ok(g) => g,
            Err(e) => {
                // The running export owns the notification for its own attempt.
                warn!("export requested while another is in flight");
                return Err(e);
            }
        };

        let result = match self.config.pipeline_timeout_ms {
            Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), self.run(target)).await {
                Ok(res) => res,
                Err(_) => Err(Error::Timeout(ms)),
            },
            None => self.run(target).await,
        };

        let notification = match &result {
            Ok(outcome) => Notification::Exported { path: outcome.path.clone(), bytes: outcome.artifact_bytes },
            Err(e) => Notification::Failed { message: e.to_string() },
        };
        self.notifier.notify(&notification);
        result
    }

    async fn run(&self, target: &ExportTarget) -> Result<ExportOutcome> {
        // Fail fast; `CaptureSession::begin` checks again after the wait.
        if target.document.lock().await.get_element_by_id(&target.root_id).is_none() {
            return Err(Error::CaptureTargetMissing(format!(
                "no element with id `{}` in the document",
                target.root_id
            )));
        }

        self.settle(target).await?;

        let (raster, capture) = self.capture(target).await?;

        let artifact = self.compositor.compose(&raster).await?;
        if artifact.is_empty() {
            return Err(Error::TransmissionError("compositor returned an empty artifact".into()));
        }
        let artifact_bytes = artifact.len();

        let file_name = artifact_file_name(&target.file_name, &self.config.artifact_extension);
        let path = self.deliver(artifact, file_name.clone()).await?;

        Ok(ExportOutcome {
            path,
            file_name,
            raster_width: raster.width,
            raster_height: raster.height,
            artifact_bytes,
            capture,
        })
    }

    /// Hand the artifact to the download sink off the async workers.
    async fn deliver(&self, artifact: ExportArtifact, file_name: String) -> Result<PathBuf> {
        let downloads = self.downloads.clone();
        tokio::task::spawn_blocking(move || downloads.deliver(&artifact, &file_name))
            .await
            .map_err(|e| Error::DownloadTriggerError(format!("download worker failed: {}", e)))?
    }

    async fn settle(&self, target: &ExportTarget) -> Result<()> {
        match &target.readiness {
            Some(set) => {
                debug!("waiting for {} chart(s) to report rendered", set.len());
                set.wait_all(Duration::from_millis(self.config.render_timeout_ms)).await
            }
            None => {
                if self.config.settle_delay_ms > 0 {
                    warn!(
                        "no render notifications for #{}; sleeping {}ms instead",
                        target.root_id, self.config.settle_delay_ms
                    );
                    tokio::time::sleep(Duration::from_millis(self.config.settle_delay_ms)).await;
                }
                Ok(())
            }
        }
    }

    /// Substitute surfaces, serialize, restore. Restoration happens before any
    /// serialization error propagates.
    async fn capture(&self, target: &ExportTarget) -> Result<(RasterImage, CaptureReport)> {
        let doc = target.document.lock().await;
        let session = CaptureSession::begin(doc, &target.root_id)?;

        if self.config.image_settle_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.config.image_settle_ms)).await;
        }

        let raster = self
            .rasterizer
            .rasterize(session.document(), session.root(), &self.raster_options)
            .await;
        let report = session.finish();
        let raster = raster?;
        debug!(
            "captured #{} at {}x{} ({} surface(s) frozen)",
            target.root_id, raster.width, raster.height, report.surfaces_hidden
        );
        Ok((raster, report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::Style;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    struct Echo;

    #[async_trait]
    impl Compositor for Echo {
        async fn compose(&self, image: &RasterImage) -> Result<ExportArtifact> {
            Ok(ExportArtifact { bytes: image.png_data.clone(), content_type: "image/png".into() })
        }
    }

    #[derive(Default)]
    struct Recorder(StdMutex<Vec<Notification>>);

    impl Notifier for Recorder {
        fn notify(&self, n: &Notification) {
            self.0.lock().unwrap().push(n.clone());
        }
    }

    #[derive(Default)]
    struct MemoryDownloads(StdMutex<Vec<String>>);

    impl DownloadSink for MemoryDownloads {
        fn deliver(&self, _artifact: &ExportArtifact, file_name: &str) -> Result<PathBuf> {
            self.0.lock().unwrap().push(file_name.to_string());
            Ok(PathBuf::from(file_name))
        }
    }

    fn target() -> ExportTarget {
        let mut doc = Document::new();
        let root = doc.root();
        let content = doc.create_element("div", Some("dashboard-content"), None, Style::default());
        doc.append_child(root, content).unwrap();
        let s = doc.create_surface(None, 4, 4, Style::default());
        doc.append_child(content, s).unwrap();
        ExportTarget {
            document: Arc::new(Mutex::new(doc)),
            root_id: "dashboard-content".into(),
            file_name: "t.csv".into(),
            readiness: None,
        }
    }

    fn config() -> ExportConfig {
        ExportConfig { settle_delay_ms: 0, viewport_width: 16, ..Default::default() }
    }

    #[tokio::test]
    async fn notifies_once_on_success() {
        let rec = Arc::new(Recorder::default());
        let dl = Arc::new(MemoryDownloads::default());
        let exporter = Exporter::with_compositor(config(), Arc::new(Echo))
            .unwrap()
            .downloads(dl.clone())
            .notifier(rec.clone());
        let out = exporter.export_dashboard(&target()).await.unwrap();
        assert_eq!(out.file_name, "dashboard-t.csv.pdf");
        assert_eq!(out.capture, CaptureReport { surfaces_hidden: 1, surfaces_restored: 1 });
        assert_eq!(rec.0.lock().unwrap().len(), 1);
        assert_eq!(*dl.0.lock().unwrap(), vec!["dashboard-t.csv.pdf".to_string()]);
        assert!(!exporter.is_exporting());
    }

    #[tokio::test]
    async fn notifies_once_on_failure() {
        let rec = Arc::new(Recorder::default());
        let exporter = Exporter::with_compositor(config(), Arc::new(Echo)).unwrap().notifier(rec.clone());
        let mut t = target();
        t.root_id = "missing".into();
        let err = exporter.export_dashboard(&t).await.unwrap_err();
        assert!(matches!(err, Error::CaptureTargetMissing(_)));
        let notes = rec.0.lock().unwrap();
        assert_eq!(notes.len(), 1);
        assert!(matches!(&notes[0], Notification::Failed { message } if message.contains("missing")));
    }

    #[tokio::test]
    async fn missing_root_is_reported_before_waiting_for_charts() {
        let exporter = Exporter::with_compositor(config(), Arc::new(Echo)).unwrap();
        let mut readiness = ReadinessSet::new();
        let _stuck = readiness.register(crate::model::ChartId("c".into()));
        let t = ExportTarget {
            document: Arc::new(Mutex::new(Document::new())),
            root_id: "dashboard-content".into(),
            file_name: "t.csv".into(),
            readiness: Some(readiness),
        };
        let err = exporter.export_dashboard(&t).await.unwrap_err();
        assert!(matches!(err, Error::CaptureTargetMissing(_)), "{:?}", err);
    }

    #[tokio::test]
    async fn missing_root_skips_the_settle_delay() {
        let cfg = ExportConfig { settle_delay_ms: 5_000, ..config() };
        let exporter = Exporter::with_compositor(cfg, Arc::new(Echo)).unwrap();
        let mut t = target();
        t.root_id = "missing".into();
        let started = std::time::Instant::now();
        let err = exporter.export_dashboard(&t).await.unwrap_err();
        assert!(matches!(err, Error::CaptureTargetMissing(_)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn in_flight_flag_is_exclusive() {
        let flag = AtomicBool::new(false);
        let g = InFlight::acquire(&flag).unwrap();
        assert!(matches!(InFlight::acquire(&flag), Err(Error::ExportInProgress)));
        drop(g);
        assert!(InFlight::acquire(&flag).is_ok());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let cfg = ExportConfig { pixel_ratio: -1.0, ..config() };
        assert!(matches!(Exporter::with_compositor(cfg, Arc::new(Echo)), Err(Error::ConfigError(_))));
    }
}
