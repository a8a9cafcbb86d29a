//! Bitmap Module
//!
//! Decoded RGBA8 bitmaps and the lossless PNG codec used for write-back.

use std::path::Path;

use image::codecs::png::{CompressionType, FilterType, PngEncoder};
use image::{ExtendedColorType, ImageEncoder, ImageFormat, RgbaImage};

use crate::codec::Codec;
use crate::error::{PoolError, Result};

/// Bytes per RGBA8 pixel
pub const BYTES_PER_PIXEL: usize = 4;

// == Bitmap ==
/// A decoded image held as tightly packed, non-premultiplied RGBA8 rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bitmap {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl Bitmap {
    /// Wraps raw pixels, checking the buffer matches the dimensions.
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(PoolError::Codec(format!(
                "bitmap dimensions must be non-zero, got {}x{}",
                width, height
            )));
        }
        let expected = width as usize * height as usize * BYTES_PER_PIXEL;
        if pixels.len() != expected {
            return Err(PoolError::Codec(format!(
                "expected {} bytes for {}x{} RGBA, got {}",
                expected,
                width,
                height,
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// A bitmap of a single color.
    pub fn filled(width: u32, height: u32, rgba: [u8; 4]) -> Result<Self> {
        let count = width as usize * height as usize;
        Self::new(width, height, rgba.repeat(count))
    }

    /// Decodes any supported image file into RGBA8.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let image = image::open(path)?.into_rgba8();
        Ok(Self::from(image))
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Memory footprint of the pixel buffer.
    pub fn byte_count(&self) -> usize {
        self.pixels.len()
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }
}

impl From<RgbaImage> for Bitmap {
    fn from(image: RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            pixels: image.into_raw(),
        }
    }
}

// == PNG Codec ==
/// Lossless PNG at the strongest compression setting.
#[derive(Debug, Clone, Copy, Default)]
pub struct PngCodec;

impl Codec for PngCodec {
    type Value = Bitmap;

    fn encode(&self, bitmap: &Bitmap) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        PngEncoder::new_with_quality(&mut out, CompressionType::Best, FilterType::Adaptive)
            .write_image(
                &bitmap.pixels,
                bitmap.width,
                bitmap.height,
                ExtendedColorType::Rgba8,
            )?;
        Ok(out)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Bitmap> {
        let image = image::load_from_memory_with_format(bytes, ImageFormat::Png)?;
        Ok(Bitmap::from(image.into_rgba8()))
    }

    fn size_of(&self, bitmap: &Bitmap) -> usize {
        bitmap.byte_count()
    }
}
