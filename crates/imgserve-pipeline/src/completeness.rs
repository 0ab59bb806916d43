//! Detecting image files that are still being written

/// Decides whether file contents are fully written
pub trait CompletenessCheck: Send + Sync {
    fn is_complete(&self, bytes: &[u8]) -> bool;
}

/// Checks format trailers: JPEG end-of-image marker, PNG `IEND` chunk,
/// BMP header file size.
///
/// Contents in an unrecognised format count as complete once non-empty,
/// so they reach the decoder and fail there instead of waiting forever.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrailerCheck;

const JPEG_SOI: [u8; 2] = [0xFF, 0xD8];
const JPEG_EOI: [u8; 2] = [0xFF, 0xD9];
const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

impl CompletenessCheck for TrailerCheck {
    fn is_complete(&self, bytes: &[u8]) -> bool {
        if bytes.starts_with(&JPEG_SOI) {
            // Some encoders pad after the marker
            let end = bytes.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
            return bytes[..end].ends_with(&JPEG_EOI);
        }

        if bytes.starts_with(&PNG_SIGNATURE) {
            // IEND: zero length, type, CRC
            return bytes.len() >= PNG_SIGNATURE.len() + 12
                && &bytes[bytes.len() - 8..bytes.len() - 4] == b"IEND";
        }

        if bytes.starts_with(b"BM") {
            return match bytes.get(2..6) {
                Some(size) => {
                    let declared = u32::from_le_bytes([size[0], size[1], size[2], size[3]]);
                    bytes.len() as u64 >= declared as u64
                }
                None => false,
            };
        }

        !bytes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
    use std::io::Cursor;

    fn encode(format: ImageFormat) -> Vec<u8> {
        let image = RgbImage::from_pixel(8, 8, Rgb([200, 100, 50]));
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(image).write_to(&mut buf, format).unwrap();
        buf.into_inner()
    }

    #[test]
    fn test_complete_images() {
        for format in [ImageFormat::Jpeg, ImageFormat::Png, ImageFormat::Bmp] {
            let bytes = encode(format);
            assert!(TrailerCheck.is_complete(&bytes), "{:?}", format);
        }
    }

    #[test]
    fn test_truncated_images() {
        for format in [ImageFormat::Jpeg, ImageFormat::Png, ImageFormat::Bmp] {
            let bytes = encode(format);
            let truncated = &bytes[..bytes.len() - 5];
            assert!(!TrailerCheck.is_complete(truncated), "{:?}", format);
        }
    }

    #[test]
    fn test_jpeg_with_padding() {
        let mut bytes = encode(ImageFormat::Jpeg);
        bytes.extend_from_slice(&[0, 0, 0]);
        assert!(TrailerCheck.is_complete(&bytes));
    }

    #[test]
    fn test_empty_and_unknown() {
        assert!(!TrailerCheck.is_complete(&[]));
        assert!(!TrailerCheck.is_complete(b"BM"));
        assert!(TrailerCheck.is_complete(b"plain text"));
    }
}
