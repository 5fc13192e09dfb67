//! Runtime codec capability negotiation.
//!
//! A codec is usable when it survives a tiny encode round trip on the
//! running build. The baseline codec is assumed, so the chain is never
//! empty.

use std::sync::{Arc, OnceLock};
use std::time::Instant;

use image::{ImageFormat, Rgba, RgbaImage};
use log::{info, warn};
use serde::Serialize;

use crate::codec::{Codec, Encoder};
use crate::errors::CodecError;

const PROBE_SIDE: u32 = 8;
const PROBE_QUALITY: f32 = 0.85;

/// Ordered list of usable codecs, best compression first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapabilitySet {
    codecs: Vec<Codec>,
}

impl CapabilitySet {
    /// Builds a set from arbitrary codecs: duplicates are dropped, order is
    /// forced to priority order and the baseline is always present.
    pub fn new<I: IntoIterator<Item = Codec>>(codecs: I) -> Self {
        let requested: Vec<Codec> = codecs.into_iter().collect();
        let codecs = Codec::PRIORITY
            .into_iter()
            .filter(|codec| codec.is_baseline() || requested.contains(codec))
            .collect();
        Self { codecs }
    }

    pub fn baseline_only() -> Self {
        Self::new([])
    }

    pub fn all() -> Self {
        Self::new(Codec::PRIORITY)
    }

    pub fn supports(&self, codec: Codec) -> bool {
        self.codecs.contains(&codec)
    }

    pub fn codecs(&self) -> &[Codec] {
        &self.codecs
    }

    pub fn len(&self) -> usize {
        self.codecs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }

    /// Keep only codecs in `allowed`. The baseline survives regardless.
    pub fn restrict_to(&self, allowed: &[Codec]) -> Self {
        Self::new(self.codecs.iter().copied().filter(|c| allowed.contains(c)))
    }
}

/// Source of the codec chain for a compression call.
pub trait CapabilityProvider: Send + Sync {
    fn capabilities(&self) -> CapabilitySet;
}

/// Fixed capability set, for configuration overrides and tests.
#[derive(Debug, Clone)]
pub struct StaticCapabilities(pub CapabilitySet);

impl CapabilityProvider for StaticCapabilities {
    fn capabilities(&self) -> CapabilitySet {
        self.0.clone()
    }
}

/// Probes the given encoders every time it is asked.
#[derive(Clone)]
pub struct RuntimeProber {
    encoders: Vec<Arc<dyn Encoder>>,
}

impl RuntimeProber {
    pub fn new(encoders: Vec<Arc<dyn Encoder>>) -> Self {
        Self { encoders }
    }

    pub fn probe(&self) -> CapabilitySet {
        let start = Instant::now();
        let supported: Vec<Codec> = self
            .encoders
            .iter()
            .filter(|encoder| !encoder.codec().is_baseline())
            .filter(|encoder| match probe_encoder(encoder.as_ref()) {
                Ok(()) => true,
                Err(e) => {
                    warn!("Codec {} unavailable: {}", encoder.codec(), e);
                    false
                }
            })
            .map(|encoder| encoder.codec())
            .collect();

        let set = CapabilitySet::new(supported);
        info!(
            "Supported codecs: {:?} (probed in {:.2}ms)",
            set.codecs(),
            start.elapsed().as_secs_f64() * 1000.0
        );
        set
    }
}

impl CapabilityProvider for RuntimeProber {
    fn capabilities(&self) -> CapabilitySet {
        self.probe()
    }
}

/// Process-wide probe of the default native encoders.
pub fn probe_cached() -> &'static CapabilitySet {
    static CAPABILITIES: OnceLock<CapabilitySet> = OnceLock::new();
    CAPABILITIES.get_or_init(|| {
        RuntimeProber::new(crate::codec::default_encoders()).probe()
    })
}

fn probe_sample() -> RgbaImage {
    RgbaImage::from_fn(PROBE_SIDE, PROBE_SIDE, |x, y| {
        Rgba([(x * 32) as u8, (y * 32) as u8, 128, 255])
    })
}

/// Encode a tiny sample and check that what comes back is really that codec.
pub fn probe_encoder(encoder: &dyn Encoder) -> Result<(), CodecError> {
    let codec = encoder.codec();
    let data = encoder.encode(&probe_sample(), PROBE_QUALITY)?;

    if data.is_empty() {
        return Err(CodecError::Empty(codec));
    }
    if !codec.matches_signature(&data) {
        return Err(CodecError::encoder(codec, "output has an unexpected signature"));
    }

    // AVIF has no decoder in this build; its signature check stands alone.
    if let Some(format) = round_trip_format(codec) {
        let decoded = image::load_from_memory_with_format(&data, format)
            .map_err(|e| CodecError::encoder(codec, format!("round trip decode failed: {}", e)))?;
        if (decoded.width(), decoded.height()) != (PROBE_SIDE, PROBE_SIDE) {
            return Err(CodecError::encoder(codec, "round trip changed dimensions"));
        }
    }

    Ok(())
}

/// Format the `image` crate can decode the codec's output with, if any.
fn round_trip_format(codec: Codec) -> Option<ImageFormat> {
    match codec {
        Codec::Jpeg => Some(ImageFormat::Jpeg),
        #[cfg(feature = "webp")]
        Codec::WebP => Some(ImageFormat::WebP),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JpegEncoder;

    struct Broken(Codec);

    impl Encoder for Broken {
        fn codec(&self) -> Codec {
            self.0
        }

        fn encode(&self, _bitmap: &RgbaImage, _quality: f32) -> Result<Vec<u8>, CodecError> {
            Err(CodecError::encoder(self.0, "unsupported on this runtime"))
        }
    }

    struct Garbage(Codec);

    impl Encoder for Garbage {
        fn codec(&self) -> Codec {
            self.0
        }

        fn encode(&self, _bitmap: &RgbaImage, _quality: f32) -> Result<Vec<u8>, CodecError> {
            Ok(vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12])
        }
    }

    #[test]
    fn test_set_is_ordered_and_keeps_baseline() {
        let set = CapabilitySet::new([Codec::Jpeg, Codec::WebP, Codec::Avif, Codec::WebP]);
        assert_eq!(set.codecs(), &[Codec::Avif, Codec::WebP, Codec::Jpeg]);

        let set = CapabilitySet::new([Codec::WebP]);
        assert_eq!(set.codecs(), &[Codec::WebP, Codec::Jpeg]);

        assert_eq!(CapabilitySet::baseline_only().codecs(), &[Codec::Jpeg]);
    }

    #[test]
    fn test_restrict_never_drops_baseline() {
        let set = CapabilitySet::all().restrict_to(&[Codec::WebP]);
        assert_eq!(set.codecs(), &[Codec::WebP, Codec::Jpeg]);
        assert!(!set.supports(Codec::Avif));
    }

    #[test]
    fn test_failing_probes_mark_codecs_unsupported() {
        let encoders: Vec<Arc<dyn Encoder>> = vec![
            Arc::new(Broken(Codec::Avif)),
            Arc::new(Garbage(Codec::WebP)),
            Arc::new(Broken(Codec::Jpeg)),
        ];
        let prober = RuntimeProber::new(encoders);
        // Baseline is assumed, never probed.
        assert_eq!(prober.probe(), CapabilitySet::baseline_only());
    }

    /// Valid WebP container header around a payload no decoder accepts.
    #[cfg(feature = "webp")]
    struct HollowWebp;

    #[cfg(feature = "webp")]
    impl Encoder for HollowWebp {
        fn codec(&self) -> Codec {
            Codec::WebP
        }

        fn encode(&self, _bitmap: &RgbaImage, _quality: f32) -> Result<Vec<u8>, CodecError> {
            let mut data = b"RIFF\x14\0\0\0WEBPVP8 ".to_vec();
            data.extend_from_slice(&[0x08, 0, 0, 0, 0xde, 0xad, 0xbe, 0xef, 0, 0, 0, 0]);
            Ok(data)
        }
    }

    #[cfg(feature = "webp")]
    #[test]
    fn test_webp_needs_decodable_output() {
        assert!(Codec::WebP.matches_signature(&HollowWebp.encode(&probe_sample(), 0.85).unwrap()));
        assert!(probe_encoder(&HollowWebp).is_err());

        let encoders: Vec<Arc<dyn Encoder>> = vec![Arc::new(HollowWebp)];
        assert!(!RuntimeProber::new(encoders).probe().supports(Codec::WebP));
    }

    #[cfg(feature = "webp")]
    #[test]
    fn test_real_webp_survives_round_trip() {
        assert!(probe_encoder(&crate::codec::WebpEncoder).is_ok());
    }

    #[test]
    fn test_jpeg_passes_probe() {
        assert!(probe_encoder(&JpegEncoder::default()).is_ok());
    }

    #[test]
    fn test_global_probe_includes_baseline() {
        let set = probe_cached();
        assert!(set.supports(Codec::Jpeg));
        assert_eq!(set.codecs().last(), Some(&Codec::Jpeg));
    }
}
