//! Rendering: layout, paint and rasterization of a document subtree.

pub mod layout;
pub mod paint;
pub mod raster;

use crate::{Error, Result};
use base64::Engine as Base64Engine;
use image::{Rgba, RgbaImage};
use std::io::Cursor;
use tiny_skia::{ColorU8, Paint, Pixmap};

const PNG_DATA_URI_PREFIX: &str = "data:image/png;base64,";

/// A flattened PNG image of a document subtree at one point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterImage {
    pub width: u32,
    pub height: u32,
    pub png_data: Vec<u8>,
}

impl RasterImage {
    pub fn from_pixels(pixels: &RgbaImage) -> Result<Self> {
        Ok(Self {
            width: pixels.width(),
            height: pixels.height(),
            png_data: encode_png(pixels)?,
        })
    }

    /// Embed the PNG as a `data:` URI.
    pub fn to_data_uri(&self) -> String {
        png_data_uri(&self.png_data)
    }

    pub fn decode(&self) -> Result<RgbaImage> {
        decode_png(&self.png_data)
    }
}

/// An RGBA colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const TRANSPARENT: Color = Color::rgba(0, 0, 0, 0);
    pub const WHITE: Color = Color::rgb(255, 255, 255);
    pub const BLACK: Color = Color::rgb(0, 0, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// Parse `#rgb`, `#rrggbb` or `#rrggbbaa`.
    pub fn parse(s: &str) -> Result<Self> {
        let hex = s
            .trim()
            .strip_prefix('#')
            .ok_or_else(|| Error::ConfigError(format!("colour must start with '#': {}", s)))?;
        let bad = || Error::ConfigError(format!("invalid colour: {}", s));
        let byte = |i: usize| u8::from_str_radix(hex.get(i..i + 2).ok_or_else(bad)?, 16).map_err(|_| bad());
        match hex.len() {
            3 => {
                let digits: Vec<u8> = hex
                    .chars()
                    .map(|c| c.to_digit(16).map(|d| (d as u8) * 17).ok_or_else(bad))
                    .collect::<Result<_>>()?;
                Ok(Color::rgb(digits[0], digits[1], digits[2]))
            }
            6 => Ok(Color::rgb(byte(0)?, byte(2)?, byte(4)?)),
            8 => Ok(Color::rgba(byte(0)?, byte(2)?, byte(4)?, byte(6)?)),
            _ => Err(bad()),
        }
    }

    pub fn to_pixel(self) -> Rgba<u8> {
        Rgba([self.r, self.g, self.b, self.a])
    }

    pub fn to_skia(self) -> tiny_skia::Color {
        tiny_skia::Color::from_rgba8(self.r, self.g, self.b, self.a)
    }

    /// A solid, non-antialiased source-over paint.
    pub fn paint(self) -> Paint<'static> {
        let mut paint = Paint::default();
        paint.set_color_rgba8(self.r, self.g, self.b, self.a);
        paint.anti_alias = false;
        paint
    }
}

/// Copy straight-alpha pixels into a (premultiplied) pixmap.
pub fn to_pixmap(pixels: &RgbaImage) -> Result<Pixmap> {
    let mut pixmap = Pixmap::new(pixels.width(), pixels.height()).ok_or_else(|| {
        Error::SerializationError(format!("cannot allocate a {}x{} pixmap", pixels.width(), pixels.height()))
    })?;
    for (dst, src) in pixmap.pixels_mut().iter_mut().zip(pixels.pixels()) {
        *dst = ColorU8::from_rgba(src[0], src[1], src[2], src[3]).premultiply();
    }
    Ok(pixmap)
}

pub fn from_pixmap(pixmap: &Pixmap) -> RgbaImage {
    let mut pixels = RgbaImage::new(pixmap.width(), pixmap.height());
    for (dst, src) in pixels.pixels_mut().zip(pixmap.pixels()) {
        let c = src.demultiply();
        *dst = Rgba([c.red(), c.green(), c.blue(), c.alpha()]);
    }
    pixels
}

pub fn encode_png(pixels: &RgbaImage) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    pixels.write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)?;
    Ok(out)
}

pub fn decode_png(data: &[u8]) -> Result<RgbaImage> {
    let img = image::load_from_memory_with_format(data, image::ImageFormat::Png)?;
    Ok(img.to_rgba8())
}

pub fn png_data_uri(png: &[u8]) -> String {
    let mut uri = String::with_capacity(PNG_DATA_URI_PREFIX.len() + png.len() * 4 / 3 + 4);
    uri.push_str(PNG_DATA_URI_PREFIX);
    base64::engine::general_purpose::STANDARD.encode_string(png, &mut uri);
    uri
}

/// Decode a `data:image/png;base64,` URI into pixels.
pub fn decode_data_uri(uri: &str) -> Result<RgbaImage> {
    let payload = uri
        .strip_prefix(PNG_DATA_URI_PREFIX)
        .ok_or_else(|| Error::SerializationError("unsupported image source (expected PNG data URI)".into()))?;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| Error::SerializationError(format!("invalid base64 image data: {}", e)))?;
    decode_png(&bytes)
}
