use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use image::buffer::ConvertBuffer;
use image::{RgbImage, RgbaImage};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::errors::CodecError;

/// Output codecs, declared in priority order: best compression first,
/// universally supported baseline last.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    Avif,
    WebP,
    Jpeg,
}

impl Codec {
    pub const PRIORITY: [Codec; 3] = [Codec::Avif, Codec::WebP, Codec::Jpeg];
    pub const BASELINE: Codec = Codec::Jpeg;

    pub fn name(&self) -> &'static str {
        match self {
            Codec::Avif => "avif",
            Codec::WebP => "webp",
            Codec::Jpeg => "jpeg",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Codec::Avif => "image/avif",
            Codec::WebP => "image/webp",
            Codec::Jpeg => "image/jpeg",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            Codec::Avif => "avif",
            Codec::WebP => "webp",
            Codec::Jpeg => "jpg",
        }
    }

    pub fn is_baseline(&self) -> bool {
        *self == Self::BASELINE
    }

    pub fn from_name(name: &str) -> Option<Codec> {
        match name.to_lowercase().as_str() {
            "avif" => Some(Codec::Avif),
            "webp" => Some(Codec::WebP),
            "jpeg" | "jpg" => Some(Codec::Jpeg),
            _ => None,
        }
    }

    /// Check the container signature of encoded bytes.
    pub fn matches_signature(&self, data: &[u8]) -> bool {
        match self {
            // FF D8 FF
            Codec::Jpeg => data.len() >= 3 && data[..3] == [0xFF, 0xD8, 0xFF],
            // "RIFF" <size> "WEBP"
            Codec::WebP => data.len() >= 12 && &data[..4] == b"RIFF" && &data[8..12] == b"WEBP",
            // ISO-BMFF: <size> "ftyp" <major brand>
            Codec::Avif => {
                data.len() >= 12
                    && &data[4..8] == b"ftyp"
                    && (&data[8..12] == b"avif" || &data[8..12] == b"avis")
            }
        }
    }
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Encodes an RGBA bitmap in one codec at a scalar quality in `[0, 1]`.
pub trait Encoder: Send + Sync {
    fn codec(&self) -> Codec;

    fn encode(&self, bitmap: &RgbaImage, quality: f32) -> Result<Vec<u8>, CodecError>;
}

/// Map a `[0, 1]` quality onto the 1..=100 scale native encoders expect.
pub fn quality_percent(quality: f32) -> u8 {
    (quality * 100.0).round().clamp(1.0, 100.0) as u8
}

/// Run a native encoder, turning panics into a codec failure.
fn guarded<F>(codec: Codec, encode: F) -> Result<Vec<u8>, CodecError>
where
    F: FnOnce() -> Result<Vec<u8>, CodecError>,
{
    match panic::catch_unwind(AssertUnwindSafe(encode)) {
        Ok(Ok(data)) if data.is_empty() => Err(CodecError::Empty(codec)),
        Ok(result) => result,
        Err(_) => Err(CodecError::Panicked(codec)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JpegBackend {
    Mozjpeg,
    JpegEncoder,
}

impl JpegBackend {
    pub const NAMES: [&'static str; 2] = ["mozjpeg", "jpeg-encoder"];

    pub fn from_name(name: &str) -> Option<JpegBackend> {
        match name.to_lowercase().as_str() {
            "mozjpeg" => Some(JpegBackend::Mozjpeg),
            "jpeg-encoder" => Some(JpegBackend::JpegEncoder),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            JpegBackend::Mozjpeg => "mozjpeg",
            JpegBackend::JpegEncoder => "jpeg-encoder",
        }
    }
}

/// Baseline JPEG encoder. Alpha is discarded.
#[derive(Debug, Clone)]
pub struct JpegEncoder {
    backend: JpegBackend,
}

impl JpegEncoder {
    pub fn new(backend: JpegBackend) -> Self {
        Self { backend }
    }
}

impl Default for JpegEncoder {
    fn default() -> Self {
        Self::new(JpegBackend::Mozjpeg)
    }
}

impl Encoder for JpegEncoder {
    fn codec(&self) -> Codec {
        Codec::Jpeg
    }

    fn encode(&self, bitmap: &RgbaImage, quality: f32) -> Result<Vec<u8>, CodecError> {
        let rgb: RgbImage = bitmap.convert();
        let (width, height) = (rgb.width(), rgb.height());
        let raw_data = rgb.into_raw();
        let quality = quality_percent(quality);

        guarded(Codec::Jpeg, || match self.backend {
            JpegBackend::Mozjpeg => mozjpeg_encode(&raw_data, width, height, quality),
            JpegBackend::JpegEncoder => jpeg_encoder_encode(&raw_data, width, height, quality),
        })
    }
}

fn mozjpeg_encode(raw_data: &[u8], width: u32, height: u32, quality: u8) -> Result<Vec<u8>, CodecError> {
    let mut comp = mozjpeg::Compress::new(mozjpeg::ColorSpace::JCS_RGB);
    comp.set_size(width as usize, height as usize);
    comp.set_quality(quality as f32);
    comp.set_mem_dest();
    comp.start_compress();

    let line_size = width as usize * 3;
    for line in raw_data.chunks_exact(line_size) {
        if !comp.write_scanlines(line) {
            return Err(CodecError::encoder(Codec::Jpeg, "mozjpeg rejected scanline"));
        }
    }

    comp.finish_compress();
    comp.data_to_vec()
        .map_err(|_| CodecError::encoder(Codec::Jpeg, "mozjpeg produced no buffer"))
}

fn jpeg_encoder_encode(raw_data: &[u8], width: u32, height: u32, quality: u8) -> Result<Vec<u8>, CodecError> {
    use jpeg_encoder::{ColorType, Encoder};

    let too_large = || CodecError::encoder(Codec::Jpeg, format!("{}x{} exceeds JPEG limits", width, height));
    let width = u16::try_from(width).map_err(|_| too_large())?;
    let height = u16::try_from(height).map_err(|_| too_large())?;

    let mut output = Vec::new();
    let encoder = Encoder::new(&mut output, quality);
    encoder.encode(raw_data, width, height, ColorType::Rgb)
        .map_err(|e| CodecError::encoder(Codec::Jpeg, format!("{:?}", e)))?;
    Ok(output)
}

/// Lossy WebP through libwebp.
#[derive(Debug, Clone, Default)]
pub struct WebpEncoder;

impl Encoder for WebpEncoder {
    fn codec(&self) -> Codec {
        Codec::WebP
    }

    #[cfg(feature = "webp")]
    fn encode(&self, bitmap: &RgbaImage, quality: f32) -> Result<Vec<u8>, CodecError> {
        let quality = quality_percent(quality) as f32;
        guarded(Codec::WebP, || {
            let encoder = webp::Encoder::from_rgba(bitmap.as_raw(), bitmap.width(), bitmap.height());
            let memory = encoder
                .encode_simple(false, quality)
                .map_err(|e| CodecError::encoder(Codec::WebP, format!("{:?}", e)))?;
            Ok(memory.to_vec())
        })
    }

    #[cfg(not(feature = "webp"))]
    fn encode(&self, _bitmap: &RgbaImage, _quality: f32) -> Result<Vec<u8>, CodecError> {
        Err(CodecError::Disabled(Codec::WebP))
    }
}

/// rav1e speed used unless configured otherwise.
pub const DEFAULT_AVIF_SPEED: u8 = 6;

/// AVIF through ravif (rav1e).
#[derive(Debug, Clone)]
pub struct AvifEncoder {
    /// 1 (slowest, smallest) ..= 10 (fastest)
    speed: u8,
}

impl AvifEncoder {
    pub fn new(speed: u8) -> Self {
        Self { speed: speed.clamp(1, 10) }
    }
}

impl Default for AvifEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_AVIF_SPEED)
    }
}

impl Encoder for AvifEncoder {
    fn codec(&self) -> Codec {
        Codec::Avif
    }

    #[cfg(feature = "avif")]
    fn encode(&self, bitmap: &RgbaImage, quality: f32) -> Result<Vec<u8>, CodecError> {
        let quality = quality_percent(quality) as f32;
        guarded(Codec::Avif, || {
            let pixels: Vec<rgb::RGBA8> = bitmap
                .as_raw()
                .chunks_exact(4)
                .map(|c| rgb::RGBA8::new(c[0], c[1], c[2], c[3]))
                .collect();
            let img = imgref::Img::new(pixels.as_slice(), bitmap.width() as usize, bitmap.height() as usize);

            let encoded = ravif::Encoder::new()
                .with_quality(quality)
                .with_speed(self.speed)
                .encode_rgba(img)
                .map_err(|e| CodecError::encoder(Codec::Avif, e.to_string()))?;
            Ok(encoded.avif_file)
        })
    }

    #[cfg(not(feature = "avif"))]
    fn encode(&self, _bitmap: &RgbaImage, _quality: f32) -> Result<Vec<u8>, CodecError> {
        Err(CodecError::Disabled(Codec::Avif))
    }
}

/// One native encoder per codec, in priority order.
pub fn native_encoders(jpeg_backend: JpegBackend, avif_speed: u8) -> Vec<Arc<dyn Encoder>> {
    debug!(
        "Native encoders: avif (speed {}), webp, jpeg ({})",
        avif_speed,
        jpeg_backend.name()
    );
    let encoders: Vec<Arc<dyn Encoder>> = vec![
        Arc::new(AvifEncoder::new(avif_speed)),
        Arc::new(WebpEncoder),
        Arc::new(JpegEncoder::new(jpeg_backend)),
    ];
    encoders
}

/// Native encoders with default settings: mozjpeg and [`DEFAULT_AVIF_SPEED`].
pub fn default_encoders() -> Vec<Arc<dyn Encoder>> {
    native_encoders(JpegBackend::Mozjpeg, DEFAULT_AVIF_SPEED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn gradient(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x * 7 % 256) as u8, (y * 5 % 256) as u8, ((x + y) % 256) as u8, 255])
        })
    }

    #[test]
    fn test_priority_ends_in_baseline() {
        assert_eq!(Codec::PRIORITY.last(), Some(&Codec::BASELINE));
        assert!(Codec::Jpeg.is_baseline());
        assert!(!Codec::Avif.is_baseline());
    }

    #[test]
    fn test_codec_names() {
        for codec in Codec::PRIORITY {
            assert_eq!(Codec::from_name(codec.name()), Some(codec));
        }
        assert_eq!(Codec::from_name("JPG"), Some(Codec::Jpeg));
        assert_eq!(Codec::from_name("gif"), None);
        assert_eq!(Codec::WebP.mime_type(), "image/webp");
    }

    #[test]
    fn test_signatures() {
        assert!(Codec::Jpeg.matches_signature(&[0xFF, 0xD8, 0xFF, 0xE0]));
        assert!(Codec::WebP.matches_signature(b"RIFF\x1e\0\0\0WEBPVP8L"));
        assert!(Codec::Avif.matches_signature(b"\0\0\0\x1cftypavif\0\0\0\0"));
        assert!(!Codec::Avif.matches_signature(b"\0\0\0\x1cftypheic\0\0\0\0"));
        assert!(!Codec::Jpeg.matches_signature(&[]));
    }

    #[test]
    fn test_quality_percent() {
        assert_eq!(quality_percent(0.85), 85);
        assert_eq!(quality_percent(0.3), 30);
        assert_eq!(quality_percent(0.0), 1);
        assert_eq!(quality_percent(1.5), 100);
    }

    #[test]
    fn test_jpeg_backends_produce_jpeg() {
        let bitmap = gradient(32, 24);
        for backend in [JpegBackend::Mozjpeg, JpegBackend::JpegEncoder] {
            let data = JpegEncoder::new(backend).encode(&bitmap, 0.85).unwrap();
            assert!(Codec::Jpeg.matches_signature(&data), "{} output is not JPEG", backend.name());

            let decoded = image::load_from_memory(&data).unwrap();
            assert_eq!((decoded.width(), decoded.height()), (32, 24));
        }
    }

    #[test]
    fn test_lower_jpeg_quality_is_smaller() {
        let bitmap = gradient(64, 64);
        let encoder = JpegEncoder::default();
        let high = encoder.encode(&bitmap, 0.95).unwrap();
        let low = encoder.encode(&bitmap, 0.3).unwrap();
        assert!(low.len() < high.len());
    }

    #[test]
    fn test_jpeg_drops_alpha_without_shifting_color() {
        let bitmap = RgbaImage::from_pixel(16, 16, Rgba([200, 40, 90, 128]));
        let data = JpegEncoder::default().encode(&bitmap, 0.95).unwrap();

        let decoded = image::load_from_memory(&data).unwrap().to_rgb8();
        let pixel = decoded.get_pixel(8, 8);
        for (got, want) in pixel.0.iter().zip([200u8, 40, 90]) {
            assert!(got.abs_diff(want) <= 6, "{:?} drifted from {:?}", pixel, [200, 40, 90]);
        }
    }

    #[test]
    fn test_default_encoders_cover_priority_order() {
        let codecs: Vec<Codec> = default_encoders().iter().map(|e| e.codec()).collect();
        assert_eq!(codecs, Codec::PRIORITY);
        assert_eq!(AvifEncoder::default().speed, DEFAULT_AVIF_SPEED);
    }

    #[cfg(feature = "webp")]
    #[test]
    fn test_webp_encoder_produces_webp() {
        let bitmap = gradient(64, 64);
        let high = WebpEncoder.encode(&bitmap, 0.95).unwrap();
        let low = WebpEncoder.encode(&bitmap, 0.3).unwrap();

        assert!(Codec::WebP.matches_signature(&high));
        assert!(low.len() < high.len());

        let decoded = image::load_from_memory_with_format(&high, image::ImageFormat::WebP).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (64, 64));
        assert!(crate::probe::probe_encoder(&WebpEncoder).is_ok());
    }

    #[cfg(not(feature = "webp"))]
    #[test]
    fn test_webp_disabled() {
        assert!(matches!(
            WebpEncoder.encode(&gradient(8, 8), 0.85),
            Err(CodecError::Disabled(Codec::WebP))
        ));
    }

    #[cfg(feature = "avif")]
    #[test]
    fn test_avif_encoder_produces_avif() {
        // Fastest speed keeps rav1e cheap in debug builds.
        let encoder = AvifEncoder::new(10);
        let bitmap = gradient(64, 64);
        let high = encoder.encode(&bitmap, 0.95).unwrap();
        let low = encoder.encode(&bitmap, 0.3).unwrap();

        assert!(Codec::Avif.matches_signature(&high));
        assert!(Codec::Avif.matches_signature(&low));
        assert!(low.len() < high.len());
        assert!(crate::probe::probe_encoder(&encoder).is_ok());
    }

    #[cfg(not(feature = "avif"))]
    #[test]
    fn test_avif_disabled() {
        assert!(matches!(
            AvifEncoder::default().encode(&gradient(8, 8), 0.85),
            Err(CodecError::Disabled(Codec::Avif))
        ));
    }

    #[test]
    fn test_jpeg_backend_names() {
        for name in JpegBackend::NAMES {
            assert_eq!(JpegBackend::from_name(name).map(|b| b.name()), Some(name));
        }
        assert_eq!(JpegBackend::from_name("libjpeg"), None);
    }
}
