//! Turns the base64 `photo` field into a displayable bitmap

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use chrono::{DateTime, Local};
use image::RgbaImage;
use thiserror::Error;
use tracing::debug;

/// Standard alphabet, optional padding, tolerant of non-zero trailing bits.
/// Publishers are not consistent about padding their payloads.
const LENIENT_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

#[derive(Debug, Error)]
pub enum ImageDecodeError {
    #[error("photo is not valid base64: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("photo is empty")]
    Empty,

    #[error("photo is not a supported image: {0}")]
    Unsupported(#[from] image::ImageError),
}

/// A decoded image ready to be uploaded as a texture
#[derive(Debug, Clone)]
pub struct Photo {
    pixels: RgbaImage,
    decoded_at: DateTime<Local>,
}

impl Photo {
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// `[width, height]` in the order egui expects
    pub fn size(&self) -> [usize; 2] {
        [self.pixels.width() as usize, self.pixels.height() as usize]
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn decoded_at(&self) -> DateTime<Local> {
        self.decoded_at
    }
}

/// Decodes a base64 image. ASCII whitespace (line wrapping) is ignored.
pub fn materialize(encoded: &str) -> Result<Photo, ImageDecodeError> {
    let compact: String = encoded
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect();

    let bytes = LENIENT_BASE64.decode(compact.as_bytes())?;
    if bytes.is_empty() {
        return Err(ImageDecodeError::Empty);
    }

    let pixels = image::load_from_memory(&bytes)?.to_rgba8();
    debug!(
        "Decoded photo {}x{} from {} bytes",
        pixels.width(),
        pixels.height(),
        bytes.len()
    );

    Ok(Photo {
        pixels,
        decoded_at: Local::now(),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage, Rgba};
    use std::io::Cursor;

    pub(crate) fn encode_image(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        image.write_to(&mut buffer, format).unwrap();
        buffer.into_inner()
    }

    pub(crate) fn png_fixture() -> (RgbaImage, String) {
        let mut pixels = RgbaImage::from_pixel(3, 2, Rgba([200, 10, 10, 255]));
        pixels.put_pixel(1, 1, Rgba([0, 120, 255, 128]));
        let bytes = encode_image(DynamicImage::ImageRgba8(pixels.clone()), ImageFormat::Png);
        (pixels, STANDARD.encode(bytes))
    }

    pub(crate) fn jpeg_fixture() -> (Vec<u8>, String) {
        let pixels = RgbImage::from_pixel(16, 8, Rgb([30, 160, 90]));
        let bytes = encode_image(DynamicImage::ImageRgb8(pixels), ImageFormat::Jpeg);
        let encoded = STANDARD.encode(&bytes);
        (bytes, encoded)
    }

    #[test]
    fn decodes_png_exactly() {
        let (expected, encoded) = png_fixture();
        let photo = materialize(&encoded).unwrap();
        assert_eq!(photo.size(), [3, 2]);
        assert_eq!(photo.pixels(), &expected);
    }

    #[test]
    fn decodes_jpeg() {
        let (bytes, encoded) = jpeg_fixture();
        let photo = materialize(&encoded).unwrap();
        let reference = image::load_from_memory(&bytes).unwrap().to_rgba8();
        assert_eq!((photo.width(), photo.height()), (16, 8));
        assert_eq!(photo.pixels(), &reference);
    }

    #[test]
    fn tolerates_line_wrapping_and_missing_padding() {
        let (expected, encoded) = png_fixture();
        let wrapped: String = encoded
            .trim_end_matches('=')
            .as_bytes()
            .chunks(20)
            .map(|chunk| format!("{}\n", String::from_utf8_lossy(chunk)))
            .collect();
        let photo = materialize(&wrapped).unwrap();
        assert_eq!(photo.pixels(), &expected);
    }

    #[test]
    fn rejects_non_base64() {
        assert!(matches!(
            materialize("not base64 at all!").unwrap_err(),
            ImageDecodeError::InvalidBase64(_)
        ));
    }

    #[test]
    fn rejects_empty_photo() {
        assert!(matches!(materialize("").unwrap_err(), ImageDecodeError::Empty));
    }

    #[test]
    fn rejects_base64_that_is_not_an_image() {
        let encoded = STANDARD.encode(b"just some text, no pixels here");
        assert!(matches!(
            materialize(&encoded).unwrap_err(),
            ImageDecodeError::Unsupported(_)
        ));
    }
}
