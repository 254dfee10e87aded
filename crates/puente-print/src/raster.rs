// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Raster bit images for `Segment::Image`.
//
// Base64 image data is decoded with the `image` crate, scaled down to the
// printable width, dithered to one bit per dot (Floyd-Steinberg), and packed
// MSB-first into the `GS v 0` raster command.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use image::imageops::FilterType;
use image::io::Limits;
use image::{DynamicImage, ImageReader};
use tracing::{debug, instrument};

use puente_core::error::EncodingError;

/// Source images larger than this on either side are refused before decoding.
const MAX_SOURCE_DIMENSION: u32 = 8192;

/// Luminance above this prints white.
const THRESHOLD: f32 = 128.0;

/// A one-bit-per-dot image ready for the printer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raster {
    width: u32,
    height: u32,
    /// Rows of `width_bytes()` bytes, set bits print black.
    bits: Vec<u8>,
}

impl Raster {
    /// Decode base64 image data (bare or as a `data:image/...` URI) and
    /// rasterise it no wider than `max_width` dots.
    #[instrument(skip(data), fields(data_len = data.len()))]
    pub fn from_base64(data: &str, max_width: u32) -> Result<Self, EncodingError> {
        let bytes = decode_base64(data)?;
        let image = decode_image(&bytes)?;
        Self::from_image(&image, max_width)
    }

    /// Scale, dither and pack an already-decoded image.
    pub fn from_image(image: &DynamicImage, max_width: u32) -> Result<Self, EncodingError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(EncodingError::Image("image has no pixels".into()));
        }

        let scaled;
        let image = if image.width() > max_width {
            let height = (u64::from(image.height()) * u64::from(max_width))
                .div_ceil(u64::from(image.width()))
                .max(1);
            let height = u32::try_from(height)
                .map_err(|_| EncodingError::Image("scaled image is too tall".into()))?;
            scaled = image.resize_exact(max_width, height, FilterType::Triangle);
            &scaled
        } else {
            image
        };

        let (width, height) = (image.width(), image.height());
        if u16::try_from(height).is_err() {
            return Err(EncodingError::Image(format!(
                "image is {height} dots tall, the printer accepts at most {}",
                u16::MAX
            )));
        }

        let luminance = luminance_over_white(image);
        let bits = dither_and_pack(luminance, width as usize, height as usize);
        debug!(width, height, bytes = bits.len(), "image rasterised");
        Ok(Self {
            width,
            height,
            bits,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn width_bytes(&self) -> usize {
        (self.width as usize).div_ceil(8)
    }

    /// Append `GS v 0 m xL xH yL yH d1...dk` in normal density.
    pub fn write_command(&self, buf: &mut Vec<u8>) {
        let x = self.width_bytes();
        let y = self.height as usize;
        buf.extend_from_slice(&[
            0x1D,
            b'v',
            b'0',
            0,
            (x & 0xFF) as u8,
            ((x >> 8) & 0xFF) as u8,
            (y & 0xFF) as u8,
            ((y >> 8) & 0xFF) as u8,
        ]);
        buf.extend_from_slice(&self.bits);
    }
}

/// Strip a data URI prefix and whitespace, then decode.
fn decode_base64(data: &str) -> Result<Vec<u8>, EncodingError> {
    let payload = match data.trim_start().strip_prefix("data:image/") {
        Some(rest) => rest.split_once(',').map_or(rest, |(_, payload)| payload),
        None => data,
    };
    let cleaned: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(cleaned.as_bytes())
        .map_err(|e| EncodingError::Image(format!("invalid base64: {e}")))
}

fn decode_image(bytes: &[u8]) -> Result<DynamicImage, EncodingError> {
    let mut reader = ImageReader::new(std::io::Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| EncodingError::Image(format!("unreadable image data: {e}")))?;
    let mut limits = Limits::default();
    limits.max_image_width = Some(MAX_SOURCE_DIMENSION);
    limits.max_image_height = Some(MAX_SOURCE_DIMENSION);
    reader.limits(limits);
    reader
        .decode()
        .map_err(|e| EncodingError::Image(format!("failed to decode image: {e}")))
}

/// Row-major luminance, with transparent pixels treated as paper.
fn luminance_over_white(image: &DynamicImage) -> Vec<f32> {
    image
        .to_rgba8()
        .pixels()
        .map(|pixel| {
            let [r, g, b, a] = pixel.0;
            let lum = 0.299 * f32::from(r) + 0.587 * f32::from(g) + 0.114 * f32::from(b);
            let alpha = f32::from(a) / 255.0;
            lum * alpha + 255.0 * (1.0 - alpha)
        })
        .collect()
}

/// Floyd-Steinberg to one bit per dot, packed MSB-first per row.
fn dither_and_pack(mut lum: Vec<f32>, width: usize, height: usize) -> Vec<u8> {
    let row_bytes = width.div_ceil(8);
    let mut bits = vec![0u8; row_bytes * height];

    for y in 0..height {
        for x in 0..width {
            let old = lum[y * width + x];
            let black = old <= THRESHOLD;
            let error = old - if black { 0.0 } else { 255.0 };
            if black {
                bits[y * row_bytes + x / 8] |= 0x80 >> (x % 8);
            }

            if x + 1 < width {
                lum[y * width + x + 1] += error * 7.0 / 16.0;
            }
            if y + 1 < height {
                let below = (y + 1) * width;
                if x > 0 {
                    lum[below + x - 1] += error * 3.0 / 16.0;
                }
                lum[below + x] += error * 5.0 / 16.0;
                if x + 1 < width {
                    lum[below + x + 1] += error / 16.0;
                }
            }
        }
    }
    bits
}

#[cfg(test)]
pub(crate) mod tests {
    use image::{GrayImage, ImageFormat, Luma, Rgba, RgbaImage};

    use super::*;

    /// PNG of `image`, base64-encoded.
    pub(crate) fn png_base64(image: DynamicImage) -> String {
        let mut png = Vec::new();
        image
            .write_to(&mut std::io::Cursor::new(&mut png), ImageFormat::Png)
            .expect("encode png");
        STANDARD.encode(png)
    }

    /// 8x2: top row black, bottom row white.
    pub(crate) fn striped_png() -> String {
        let image = GrayImage::from_fn(8, 2, |_, y| if y == 0 { Luma([0]) } else { Luma([255]) });
        png_base64(DynamicImage::ImageLuma8(image))
    }

    #[test]
    fn golden_raster_command() {
        let raster = Raster::from_base64(&striped_png(), 384).expect("raster");
        let mut buf = Vec::new();
        raster.write_command(&mut buf);
        assert_eq!(buf, vec![0x1D, b'v', b'0', 0, 1, 0, 2, 0, 0xFF, 0x00]);
    }

    #[test]
    fn partial_byte_rows_are_padded_white() {
        let image = GrayImage::from_pixel(10, 1, Luma([0]));
        let raster = Raster::from_image(&DynamicImage::ImageLuma8(image), 384).expect("raster");
        assert_eq!(raster.width_bytes(), 2);
        let mut buf = Vec::new();
        raster.write_command(&mut buf);
        assert_eq!(&buf[8..], &[0xFF, 0xC0]);
    }

    #[test]
    fn transparent_pixels_print_white() {
        let image = RgbaImage::from_fn(8, 1, |x, _| {
            if x < 4 { Rgba([0, 0, 0, 255]) } else { Rgba([0, 0, 0, 0]) }
        });
        let raster = Raster::from_image(&DynamicImage::ImageRgba8(image), 384).expect("raster");
        let mut buf = Vec::new();
        raster.write_command(&mut buf);
        assert_eq!(&buf[8..], &[0xF0]);
    }

    #[test]
    fn wide_images_are_scaled_to_the_paper() {
        let image = GrayImage::from_pixel(800, 100, Luma([255]));
        let raster = Raster::from_image(&DynamicImage::ImageLuma8(image), 384).expect("raster");
        assert_eq!(raster.width(), 384);
        assert_eq!(raster.height(), 48);
        assert_eq!(raster.width_bytes(), 48);
    }

    #[test]
    fn data_uri_prefix_and_line_breaks_are_ignored() {
        let encoded = striped_png();
        let (head, tail) = encoded.split_at(encoded.len() / 2);
        let uri = format!("data:image/png;base64,{head}\n{tail}\n");
        assert_eq!(
            Raster::from_base64(&uri, 384).expect("raster"),
            Raster::from_base64(&encoded, 384).expect("raster")
        );
    }

    #[test]
    fn garbage_is_an_image_error() {
        assert!(matches!(
            Raster::from_base64("%%%", 384),
            Err(EncodingError::Image(_))
        ));
        // Valid base64, not an image.
        assert!(matches!(
            Raster::from_base64("bm90IGFuIGltYWdl", 384),
            Err(EncodingError::Image(_))
        ));
    }
}
