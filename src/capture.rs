//! Snapshot capture: freeze drawing surfaces into images for the serializer.
//!
//! A [`CaptureSession`] owns the document exclusively (it holds whatever guard
//! the caller locked it with) for as long as surfaces are substituted. Every
//! substitution is undone by [`CaptureSession::finish`], or by `Drop` if the
//! session is abandoned through an error, a panic or a dropped future.

use crate::dom::{Display, Document, NodeId, NodeKind, Style};
use crate::model::ChartId;
use crate::rendering::{encode_png, png_data_uri, Color, RasterImage};
use crate::{Error, Result};
use async_trait::async_trait;
use log::{debug, warn};
use std::ops::DerefMut;

/// Serializer configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterOptions {
    /// Fill for regions with no opaque content
    pub background_color: Color,
    /// Oversampling multiplier applied to the output dimensions
    pub pixel_ratio: f32,
}

impl Default for RasterOptions {
    fn default() -> Self {
        Self { background_color: Color::rgb(0x11, 0x18, 0x27), pixel_ratio: 2.0 }
    }
}

/// Turns a document subtree into a single raster image.
///
/// Implementations must not mutate the document. Failure to load any embedded
/// resource is a `SerializationError`.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    async fn rasterize(&self, doc: &Document, root: NodeId, options: &RasterOptions) -> Result<RasterImage>;
}

/// One drawing surface temporarily replaced by a frozen image.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedSurface {
    pub surface: NodeId,
    pub substitute: NodeId,
    pub chart_id: Option<ChartId>,
    previous_display: Display,
}

/// Counters reported when a session is torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CaptureReport {
    pub surfaces_hidden: usize,
    pub surfaces_restored: usize,
}

pub struct CaptureSession<G: DerefMut<Target = Document>> {
    doc: G,
    root: NodeId,
    captured: Vec<CapturedSurface>,
    report: CaptureReport,
    finished: bool,
}

impl<G: DerefMut<Target = Document>> CaptureSession<G> {
    /// Locate `root_id` and substitute every drawing surface beneath it.
    pub fn begin(doc: G, root_id: &str) -> Result<Self> {
        let root = doc
            .get_element_by_id(root_id)
            .ok_or_else(|| Error::CaptureTargetMissing(format!("no element with id `{}` in the document", root_id)))?;

        let mut session = Self { doc, root, captured: Vec::new(), report: CaptureReport::default(), finished: false };
        // On error the session drops here and undoes whatever was substituted.
        session.substitute_all()?;
        debug!("substituted {} drawing surface(s) under #{}", session.captured.len(), root_id);
        Ok(session)
    }

    fn substitute_all(&mut self) -> Result<()> {
        for surface in self.doc.surfaces(self.root) {
            self.substitute(surface)?;
        }
        Ok(())
    }

    fn substitute(&mut self, surface: NodeId) -> Result<()> {
        let node = self
            .doc
            .node(surface)
            .ok_or_else(|| Error::Other(format!("surface {:?} vanished", surface)))?;
        let NodeKind::Surface(data) = &node.kind else {
            return Err(Error::Other(format!("node {:?} is not a drawing surface", surface)));
        };
        let chart_id = data.chart_id.clone();
        let previous_display = node.style.display;
        let style = Style {
            display: previous_display,
            width: node.style.width.or(Some(data.pixels.width())),
            height: node.style.height.or(Some(data.pixels.height())),
            ..Style::default()
        };
        let src = png_data_uri(&encode_png(&data.pixels)?);

        let substitute = self.doc.create_image(src, style);
        if let Err(e) = self.doc.insert_before(surface, substitute) {
            let _ = self.doc.remove(substitute);
            return Err(e);
        }
        self.captured.push(CapturedSurface { surface, substitute, chart_id, previous_display });
        self.doc.set_display(surface, Display::None)?;
        self.report.surfaces_hidden += 1;
        Ok(())
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn captured(&self) -> &[CapturedSurface] {
        &self.captured
    }

    /// Undo every substitution and release the document.
    pub fn finish(mut self) -> CaptureReport {
        self.restore()
    }

    fn restore(&mut self) -> CaptureReport {
        if self.finished {
            return self.report;
        }
        self.finished = true;
        for entry in self.captured.drain(..) {
            if let Err(e) = self.doc.set_display(entry.surface, entry.previous_display) {
                warn!("failed to un-hide surface {:?}: {}", entry.surface, e);
            }
            if let Err(e) = self.doc.remove(entry.substitute) {
                warn!("failed to remove substitute {:?}: {}", entry.substitute, e);
            }
            self.report.surfaces_restored += 1;
        }
        debug!(
            "capture restored: hidden={} restored={}",
            self.report.surfaces_hidden, self.report.surfaces_restored
        );
        self.report
    }
}

impl<G: DerefMut<Target = Document>> Drop for CaptureSession<G> {
    fn drop(&mut self) {
        self.restore();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn dashboard(surfaces: usize) -> (Document, Vec<NodeId>) {
        let mut doc = Document::new();
        let root = doc.root();
        let content = doc.create_element("div", Some("dashboard-content"), None, Style::default());
        doc.append_child(root, content).unwrap();
        let mut ids = Vec::new();
        for i in 0..surfaces {
            let s = doc.create_surface(
                Some(ChartId(format!("chart-{}", i))),
                8,
                4,
                Style { width: if i == 0 { Some(16) } else { None }, ..Default::default() },
            );
            doc.append_child(content, s).unwrap();
            let mut px = RgbaImage::new(8, 4);
            px.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
            doc.paint_surface(s, px).unwrap();
            ids.push(s);
        }
        (doc, ids)
    }

    #[test]
    fn substitutes_in_document_order_and_restores() {
        let (mut doc, ids) = dashboard(3);
        let before = doc.digest();
        {
            let session = CaptureSession::begin(&mut doc, "dashboard-content").unwrap();
            let captured = session.captured();
            assert_eq!(captured.len(), 3);
            assert_eq!(captured.iter().map(|c| c.surface).collect::<Vec<_>>(), ids);
            assert_eq!(captured[2].chart_id, Some(ChartId("chart-2".into())));

            let d = session.document();
            for c in captured {
                assert!(d.node(c.surface).unwrap().is_hidden());
                let parent = d.node(c.surface).unwrap().parent().unwrap();
                let kids = d.node(parent).unwrap().children();
                let pos = kids.iter().position(|k| *k == c.surface).unwrap();
                assert_eq!(kids[pos - 1], c.substitute);
            }
            // explicit style size wins, otherwise the intrinsic size
            assert_eq!(d.node(captured[0].substitute).unwrap().style.width, Some(16));
            assert_eq!(d.node(captured[1].substitute).unwrap().style.width, Some(8));

            let report = session.finish();
            assert_eq!(report, CaptureReport { surfaces_hidden: 3, surfaces_restored: 3 });
        }
        assert_eq!(doc.digest(), before);
        assert!(doc.images(doc.root()).is_empty());
    }

    #[test]
    fn dropping_the_session_restores() {
        let (mut doc, _) = dashboard(2);
        let before = doc.digest();
        let session = CaptureSession::begin(&mut doc, "dashboard-content").unwrap();
        drop(session);
        assert_eq!(doc.digest(), before);
    }

    #[test]
    fn missing_root_is_reported() {
        let (mut doc, _) = dashboard(1);
        let err = CaptureSession::begin(&mut doc, "nope").err().unwrap();
        assert!(matches!(err, Error::CaptureTargetMissing(_)));
    }

    #[test]
    fn already_hidden_surfaces_stay_hidden() {
        let (mut doc, ids) = dashboard(2);
        doc.set_display(ids[1], Display::None).unwrap();
        let before = doc.digest();
        let session = CaptureSession::begin(&mut doc, "dashboard-content").unwrap();
        let sub = session.captured()[1].substitute;
        assert!(session.document().node(sub).unwrap().is_hidden());
        session.finish();
        assert_eq!(doc.digest(), before);
    }

    #[test]
    fn zero_surfaces_is_fine() {
        let (mut doc, _) = dashboard(0);
        let report = CaptureSession::begin(&mut doc, "dashboard-content").unwrap().finish();
        assert_eq!(report, CaptureReport::default());
    }
}
