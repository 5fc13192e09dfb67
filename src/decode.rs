use std::io::Cursor;

use exif::{In, Reader, Tag, Value};
use image::{DynamicImage, ImageFormat, RgbaImage};
use log::{debug, info};

use crate::errors::ThumbnailError;

/// Caller-owned input: raw bytes plus an optional declared MIME type.
#[derive(Debug, Clone)]
pub struct SourceImage {
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
}

impl SourceImage {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes, mime_type: None }
    }

    pub fn with_mime_type(bytes: Vec<u8>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes,
            mime_type: Some(mime_type.into()),
        }
    }

    /// Format named by the declared MIME type, if it is an image type we know.
    pub fn declared_format(&self) -> Option<ImageFormat> {
        let declared: mime::Mime = self.mime_type.as_deref()?.parse().ok()?;
        if declared.type_() != mime::IMAGE {
            return None;
        }
        match declared.subtype().as_str() {
            "jpeg" | "jpg" | "pjpeg" => Some(ImageFormat::Jpeg),
            "png" => Some(ImageFormat::Png),
            "webp" => Some(ImageFormat::WebP),
            "gif" => Some(ImageFormat::Gif),
            "bmp" => Some(ImageFormat::Bmp),
            "tiff" => Some(ImageFormat::Tiff),
            _ => None,
        }
    }
}

/// Decode arbitrary input bytes into an upright RGBA bitmap.
pub fn decode(source: &SourceImage) -> Result<RgbaImage, ThumbnailError> {
    if source.bytes.is_empty() {
        return Err(ThumbnailError::Decode("empty input".to_string()));
    }

    let img = match source.declared_format() {
        Some(format) => image::load_from_memory_with_format(&source.bytes, format).or_else(|e| {
            debug!("Declared format {:?} did not decode ({}), detecting instead", format, e);
            image::load_from_memory(&source.bytes)
        })?,
        None => image::load_from_memory(&source.bytes)?,
    };

    let img = match read_exif_orientation(&source.bytes) {
        Some(orientation) => apply_exif_orientation(img, orientation),
        None => img,
    };

    info!("Decoded {}x{} image from {} bytes", img.width(), img.height(), source.bytes.len());
    Ok(img.to_rgba8())
}

fn read_exif_orientation(data: &[u8]) -> Option<u16> {
    let exif = Reader::new().read_from_container(&mut Cursor::new(data)).ok()?;
    let field = exif.get_field(Tag::Orientation, In::PRIMARY)?;
    match field.value {
        Value::Short(ref values) => values.first().copied(),
        _ => None,
    }
}

fn apply_exif_orientation(img: DynamicImage, orientation: u16) -> DynamicImage {
    debug!("Applying EXIF orientation {}", orientation);
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(),
        6 => img.rotate90(),
        7 => img.rotate270().fliph(),
        8 => img.rotate270(),
        _ => img,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, ImageOutputFormat, Rgb};

    fn encoded(width: u32, height: u32, format: ImageOutputFormat) -> Vec<u8> {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 64])
        });
        let mut buffer = Vec::new();
        img.write_to(&mut Cursor::new(&mut buffer), format)
            .expect("Failed to encode test image");
        buffer
    }

    #[test]
    fn test_decodes_png_and_jpeg() {
        let png = decode(&SourceImage::new(encoded(40, 30, ImageOutputFormat::Png))).unwrap();
        assert_eq!(png.dimensions(), (40, 30));

        let jpeg = decode(&SourceImage::new(encoded(40, 30, ImageOutputFormat::Jpeg(90)))).unwrap();
        assert_eq!(jpeg.dimensions(), (40, 30));
    }

    #[test]
    fn test_wrong_declared_mime_still_decodes() {
        let source = SourceImage::with_mime_type(encoded(10, 20, ImageOutputFormat::Png), "image/jpeg");
        assert_eq!(decode(&source).unwrap().dimensions(), (10, 20));
    }

    #[test]
    fn test_declared_format() {
        let source = SourceImage::with_mime_type(Vec::new(), "image/png");
        assert_eq!(source.declared_format(), Some(ImageFormat::Png));

        let source = SourceImage::with_mime_type(Vec::new(), "text/plain");
        assert_eq!(source.declared_format(), None);

        let source = SourceImage::with_mime_type(Vec::new(), "not a mime");
        assert_eq!(source.declared_format(), None);
    }

    #[test]
    fn test_garbage_is_decode_error() {
        let result = decode(&SourceImage::new(vec![0; 1000]));
        assert!(matches!(result, Err(ThumbnailError::Decode(_))));

        let result = decode(&SourceImage::new(Vec::new()));
        assert!(matches!(result, Err(ThumbnailError::Decode(_))));
    }

    #[test]
    fn test_truncated_is_decode_error() {
        let mut data = encoded(64, 64, ImageOutputFormat::Png);
        data.truncate(data.len() / 2);
        assert!(matches!(decode(&SourceImage::new(data)), Err(ThumbnailError::Decode(_))));
    }

    #[test]
    fn test_orientation_swaps_dimensions() {
        let img = DynamicImage::ImageRgb8(ImageBuffer::new(40, 30));
        let rotated = apply_exif_orientation(img.clone(), 6);
        assert_eq!((rotated.width(), rotated.height()), (30, 40));

        let same = apply_exif_orientation(img, 1);
        assert_eq!((same.width(), same.height()), (40, 30));
    }
}
