//! Payload decoding.
//!
//! A payload is either a bare base-64 body or `<prefix>,<base64 body>` (a data
//! URL as sent by browsers). The prefix is ignored beyond locating the first
//! comma. The body is decoded in memory into an RGB8 frame; nothing is written
//! to disk. The whitespace-stripped body and the compressed image bytes are
//! wiped once decoding finishes, and the RGB8 pixels are wiped when the frame
//! is dropped. Scratch buffers inside the image decoder are not covered.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine as _;
use image::RgbImage;
use zeroize::{Zeroize, Zeroizing};

use crate::error::AssessError;

/// Standard alphabet; accepts bodies with or without trailing padding.
const PAYLOAD_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// A decoded 3-channel frame. Lives only for the duration of one assessment.
pub struct DecodedFrame {
    image: RgbImage,
}

impl DecodedFrame {
    pub fn from_rgb(image: RgbImage) -> Self {
        Self { image }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Row-major RGB8 pixels, `width * height * 3` bytes.
    pub fn pixels(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }
}

impl Drop for DecodedFrame {
    fn drop(&mut self) {
        let pixels: &mut [u8] = &mut self.image;
        pixels.zeroize();
    }
}

impl std::fmt::Debug for DecodedFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedFrame")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish_non_exhaustive()
    }
}

/// Everything after the first comma, or the whole payload when there is none.
pub fn payload_body(payload: &str) -> &str {
    match payload.split_once(',') {
        Some((_prefix, body)) => body,
        None => payload,
    }
}

/// Decode a transport payload into pixels.
pub fn decode_payload(payload: &str) -> Result<DecodedFrame, AssessError> {
    if payload.trim().is_empty() {
        return Err(AssessError::NoData);
    }
    let bytes = decode_body(payload_body(payload))?;
    decode_image(&bytes)
}

fn decode_body(body: &str) -> Result<Zeroizing<Vec<u8>>, AssessError> {
    let compact: Zeroizing<String> =
        Zeroizing::new(body.chars().filter(|c| !c.is_ascii_whitespace()).collect());
    PAYLOAD_ENGINE
        .decode(compact.as_bytes())
        .map(Zeroizing::new)
        .map_err(|e| AssessError::DecodeError(e.to_string()))
}

/// Decode a compressed image container (JPEG, PNG, WebP, BMP) into RGB8.
pub fn decode_image(bytes: &[u8]) -> Result<DecodedFrame, AssessError> {
    if bytes.is_empty() {
        return Err(AssessError::InvalidImage("empty image body".to_string()));
    }
    let image =
        image::load_from_memory(bytes).map_err(|e| AssessError::InvalidImage(e.to_string()))?;
    let rgb = image.into_rgb8();
    if rgb.width() == 0 || rgb.height() == 0 {
        return Err(AssessError::InvalidImage("zero-sized image".to_string()));
    }
    Ok(DecodedFrame::from_rgb(rgb))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;
    use image::{DynamicImage, ImageFormat, Rgb};
    use std::io::Cursor;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = RgbImage::from_pixel(width, height, Rgb([200, 10, 30]));
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(image)
            .write_to(&mut out, ImageFormat::Png)
            .expect("encode png");
        out.into_inner()
    }

    #[test]
    fn body_follows_first_comma_only() {
        assert_eq!(payload_body("data:image/png;base64,QUJD"), "QUJD");
        assert_eq!(payload_body("QUJD"), "QUJD");
        assert_eq!(payload_body("a,b,c"), "b,c");
        assert_eq!(payload_body("prefix,"), "");
    }

    #[test]
    fn decodes_data_url_png() {
        let body = base64::engine::general_purpose::STANDARD.encode(png_bytes(3, 2));
        let frame = decode_payload(&format!("data:image/png;base64,{body}")).unwrap();
        assert_eq!((frame.width(), frame.height()), (3, 2));
        assert_eq!(frame.pixels().len(), 3 * 2 * 3);
        assert_eq!(&frame.pixels()[..3], &[200, 10, 30]);
    }

    #[test]
    fn decodes_bare_body_without_padding() {
        let body = base64::engine::general_purpose::STANDARD_NO_PAD.encode(png_bytes(1, 1));
        let frame = decode_payload(&body).unwrap();
        assert_eq!((frame.width(), frame.height()), (1, 1));
    }

    #[test]
    fn decoded_body_is_held_in_wiping_buffer() {
        let bytes: Zeroizing<Vec<u8>> = decode_body("QU\nJD\r\n").unwrap();
        assert_eq!(bytes.as_slice(), b"ABC");
    }

    #[test]
    fn empty_payload_is_no_data() {
        assert_eq!(decode_payload("").unwrap_err(), AssessError::NoData);
        assert_eq!(decode_payload("   ").unwrap_err(), AssessError::NoData);
    }

    #[test]
    fn malformed_base64_is_decode_error() {
        let err = decode_payload("data:image/png;base64,@@not*base64@@").unwrap_err();
        assert!(matches!(err, AssessError::DecodeError(_)));
    }

    #[test]
    fn non_image_bytes_are_invalid_image() {
        let body = base64::engine::general_purpose::STANDARD.encode(b"plain text, not pixels");
        let err = decode_payload(&body).unwrap_err();
        assert!(matches!(err, AssessError::InvalidImage(_)));

        let err = decode_payload("data:image/png;base64,").unwrap_err();
        assert!(matches!(err, AssessError::InvalidImage(_)));
    }

    #[test]
    fn truncated_png_is_invalid_image() {
        let mut bytes = png_bytes(8, 8);
        bytes.truncate(bytes.len() / 2);
        let body = base64::engine::general_purpose::STANDARD.encode(bytes);
        let err = decode_payload(&body).unwrap_err();
        assert!(matches!(err, AssessError::InvalidImage(_)));
    }
}
