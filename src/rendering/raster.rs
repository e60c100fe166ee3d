//! DOM subtree rasterizer

use crate::capture::{RasterOptions, Rasterizer};
use crate::dom::{Document, NodeId, NodeKind};
use crate::rendering::layout::{layout_subtree, Rect};
use crate::rendering::paint::{build_display_list, glyph_rects, PaintCommand};
use crate::rendering::{decode_data_uri, from_pixmap, to_pixmap, Color, RasterImage};
use crate::{Error, Result};
use async_trait::async_trait;
use image::RgbaImage;
use log::debug;
use std::collections::HashMap;
use std::time::Duration;
use tiny_skia::{FilterQuality, Pixmap, PixmapPaint, Transform};

/// Largest output edge accepted, in device pixels.
const MAX_EDGE: u32 = 16_384;

/// Serializes a subtree by laying it out, painting it and blending the result
/// over the background colour. Embedded images are decoded on blocking
/// workers, each bounded by `resource_timeout`.
#[derive(Debug, Clone)]
pub struct DomRasterizer {
    pub viewport_width: u32,
    pub resource_timeout: Duration,
}

impl Default for DomRasterizer {
    fn default() -> Self {
        Self { viewport_width: 1280, resource_timeout: Duration::from_millis(5000) }
    }
}

impl DomRasterizer {
    pub fn new(viewport_width: u32, resource_timeout: Duration) -> Self {
        Self { viewport_width, resource_timeout }
    }

    async fn decode_images(&self, doc: &Document, root: NodeId) -> Result<HashMap<NodeId, RgbaImage>> {
        let pending = doc
            .images(root)
            .into_iter()
            .filter(|id| doc.is_rendered(*id))
            .filter_map(|id| match doc.node(id).map(|n| &n.kind) {
                Some(NodeKind::Image(img)) => Some((id, img.src.clone())),
                _ => None,
            })
            .map(|(id, src)| {
                let timeout = self.resource_timeout;
                async move {
                    let job = tokio::task::spawn_blocking(move || decode_data_uri(&src));
                    match tokio::time::timeout(timeout, job).await {
                        Err(_) => Err(Error::SerializationError(format!(
                            "image {:?} did not decode within {}ms",
                            id,
                            timeout.as_millis()
                        ))),
                        Ok(Err(join)) => Err(Error::SerializationError(format!("image decode worker failed: {}", join))),
                        Ok(Ok(Err(e))) => Err(Error::SerializationError(format!("image {:?}: {}", id, e))),
                        Ok(Ok(Ok(px))) => Ok((id, px)),
                    }
                }
            });
        Ok(futures::future::try_join_all(pending).await?.into_iter().collect())
    }
}

#[async_trait]
impl Rasterizer for DomRasterizer {
    async fn rasterize(&self, doc: &Document, root: NodeId, options: &RasterOptions) -> Result<RasterImage> {
        if !(options.pixel_ratio.is_finite() && options.pixel_ratio > 0.0) {
            return Err(Error::ConfigError(format!("pixel ratio must be positive, got {}", options.pixel_ratio)));
        }
        if doc.node(root).is_none() {
            return Err(Error::CaptureTargetMissing(format!("node {:?} no longer exists", root)));
        }

        let images = self.decode_images(doc, root).await?;
        let intrinsic: HashMap<NodeId, (u32, u32)> = images.iter().map(|(id, px)| (*id, px.dimensions())).collect();
        let layout = layout_subtree(doc, root, self.viewport_width, &intrinsic);
        let commands = build_display_list(doc, &layout);

        let pixels = paint_commands(layout.width, layout.height, &commands, &images, options)?;
        debug!(
            "rasterized {}x{} css px -> {}x{} device px ({} commands, {} images)",
            layout.width,
            layout.height,
            pixels.width(),
            pixels.height(),
            commands.len(),
            images.len()
        );
        RasterImage::from_pixels(&pixels)
    }
}

/// Output size for a CSS size at the given pixel ratio.
pub fn device_size(width: u32, height: u32, pixel_ratio: f32) -> (u32, u32) {
    let scale = |v: u32| ((v as f64) * pixel_ratio as f64).ceil().max(1.0) as u32;
    (scale(width), scale(height))
}

/// Execute a display list onto a fresh canvas filled with the background.
pub fn paint_commands(
    width: u32,
    height: u32,
    commands: &[PaintCommand],
    images: &HashMap<NodeId, RgbaImage>,
    options: &RasterOptions,
) -> Result<RgbaImage> {
    let (dw, dh) = device_size(width, height, options.pixel_ratio);
    if dw > MAX_EDGE || dh > MAX_EDGE {
        return Err(Error::SerializationError(format!("capture of {}x{} exceeds the {} px limit", dw, dh, MAX_EDGE)));
    }
    let mut canvas = Pixmap::new(dw, dh)
        .ok_or_else(|| Error::SerializationError(format!("cannot allocate a {}x{} canvas", dw, dh)))?;
    canvas.fill(options.background_color.to_skia());
    let ratio = options.pixel_ratio;
    let css = Transform::from_scale(ratio, ratio);

    for cmd in commands {
        match cmd {
            PaintCommand::SolidRect { rect, color } => fill_rect(&mut canvas, *rect, *color, css),
            PaintCommand::Text { x, y, lines, scale, color } => {
                for glyph in glyph_rects(*x, *y, lines, *scale) {
                    fill_rect(&mut canvas, glyph, *color, css);
                }
            }
            PaintCommand::Image { rect, node } => {
                let src = images
                    .get(node)
                    .ok_or_else(|| Error::SerializationError(format!("image {:?} was not loaded", node)))?;
                if rect.width == 0 || rect.height == 0 || src.width() == 0 || src.height() == 0 {
                    continue;
                }
                let src = to_pixmap(src)?;
                let sx = ratio * rect.width as f32 / src.width() as f32;
                let sy = ratio * rect.height as f32 / src.height() as f32;
                // 1:1 blits stay pixel exact.
                let quality = if sx == 1.0 && sy == 1.0 { FilterQuality::Nearest } else { FilterQuality::Bilinear };
                let paint = PixmapPaint { quality, ..PixmapPaint::default() };
                let placement = Transform::from_row(sx, 0.0, 0.0, sy, ratio * rect.x as f32, ratio * rect.y as f32);
                canvas.draw_pixmap(0, 0, src.as_ref(), &paint, placement, None);
            }
        }
    }
    Ok(from_pixmap(&canvas))
}

fn fill_rect(canvas: &mut Pixmap, r: Rect, color: Color, transform: Transform) {
    if color.a == 0 {
        return;
    }
    if let Some(rect) = tiny_skia::Rect::from_xywh(r.x as f32, r.y as f32, r.width as f32, r.height as f32) {
        canvas.fill_rect(rect, &color.paint(), transform, None);
    }
}
