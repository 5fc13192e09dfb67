use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::codec::{self, Codec, Encoder};
use crate::decode::{self, SourceImage};
use crate::errors::ThumbnailError;
use crate::normalize;
use crate::probe::{probe_cached, CapabilityProvider, StaticCapabilities};
use crate::search::{self, SearchParams};

pub const DEFAULT_MAX_DIMENSION: u32 = 1200;
pub const DEFAULT_BUDGET_BYTES: usize = 500 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub max_dimension: u32,
    pub budget_bytes: usize,
    pub search: SearchParams,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_dimension: DEFAULT_MAX_DIMENSION,
            budget_bytes: DEFAULT_BUDGET_BYTES,
            search: SearchParams::default(),
        }
    }
}

/// Encoded thumbnail handed back to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct EncodedResult {
    pub bytes: Vec<u8>,
    pub codec: Codec,
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
    /// Quality of the attempt that produced `bytes`.
    pub quality: f32,
    /// Encode calls spent in the winning codec's search.
    pub attempts: u32,
}

impl EncodedResult {
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Decoding,
    Normalizing,
    Probing,
    Encoding(Codec),
    Done,
    Failed,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineStage::Decoding => f.write_str("decoding"),
            PipelineStage::Normalizing => f.write_str("normalizing"),
            PipelineStage::Probing => f.write_str("probing"),
            PipelineStage::Encoding(codec) => write!(f, "encoding({})", codec),
            PipelineStage::Done => f.write_str("done"),
            PipelineStage::Failed => f.write_str("failed"),
        }
    }
}

/// Decode, normalize, then walk the codec chain until one codec encodes.
///
/// Holds no per-call state; one instance can serve concurrent calls.
pub struct Pipeline {
    config: PipelineConfig,
    capabilities: Arc<dyn CapabilityProvider>,
    encoders: Vec<Arc<dyn Encoder>>,
}

impl Pipeline {
    pub fn new(
        config: PipelineConfig,
        capabilities: Arc<dyn CapabilityProvider>,
        encoders: Vec<Arc<dyn Encoder>>,
    ) -> Self {
        Self {
            config,
            capabilities,
            encoders,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn capabilities(&self) -> &dyn CapabilityProvider {
        self.capabilities.as_ref()
    }

    fn encoder_for(&self, codec: Codec) -> Option<&dyn Encoder> {
        self.encoders
            .iter()
            .find(|encoder| encoder.codec() == codec)
            .map(|encoder| encoder.as_ref())
    }

    pub fn compress(&self, source: &SourceImage) -> Result<EncodedResult, ThumbnailError> {
        self.compress_with(source, &self.config)
    }

    /// Same as [`compress`](Self::compress) with a per-call configuration.
    pub fn compress_with(
        &self,
        source: &SourceImage,
        config: &PipelineConfig,
    ) -> Result<EncodedResult, ThumbnailError> {
        let total_start = Instant::now();

        debug!("Pipeline stage: {}", PipelineStage::Decoding);
        let bitmap = decode::decode(source).map_err(|e| {
            warn!("Pipeline {} while {}: {}", PipelineStage::Failed, PipelineStage::Decoding, e);
            e
        })?;

        debug!("Pipeline stage: {}", PipelineStage::Normalizing);
        let normalize_start = Instant::now();
        let (source_width, source_height) = bitmap.dimensions();
        let normalized = normalize::normalize(bitmap, config.max_dimension);
        info!(
            "Normalized {}x{} -> {}x{} in {:.2}ms",
            source_width,
            source_height,
            normalized.width(),
            normalized.height(),
            normalize_start.elapsed().as_secs_f64() * 1000.0
        );

        debug!("Pipeline stage: {}", PipelineStage::Probing);
        let capabilities = self.capabilities.capabilities();
        debug!("Codec chain: {:?}", capabilities.codecs());

        for &codec in capabilities.codecs() {
            let stage = PipelineStage::Encoding(codec);
            let Some(encoder) = self.encoder_for(codec) else {
                warn!("No encoder registered for {}, skipping", codec);
                continue;
            };

            let encode_start = Instant::now();
            match search::encode_with_budget(&normalized, encoder, config.budget_bytes, &config.search) {
                Some(result) => {
                    info!(
                        "Pipeline {} -> {}: {} {}x{}, {} bytes (budget {}), quality {:.2}, {} attempts, {:.2}ms encode, {:.2}ms total",
                        stage,
                        PipelineStage::Done,
                        result.codec,
                        result.width,
                        result.height,
                        result.size(),
                        config.budget_bytes,
                        result.quality,
                        result.attempts,
                        encode_start.elapsed().as_secs_f64() * 1000.0,
                        total_start.elapsed().as_secs_f64() * 1000.0
                    );
                    return Ok(result);
                }
                None => warn!("Pipeline {}: codec failed, trying next", stage),
            }
        }

        warn!("Pipeline {}: every codec in {:?} failed", PipelineStage::Failed, capabilities.codecs());
        Err(ThumbnailError::encoding_unavailable(capabilities.codecs()))
    }
}

/// One-shot compression with native encoders and the process-wide probe.
pub fn compress(source: &SourceImage, config: &PipelineConfig) -> Result<EncodedResult, ThumbnailError> {
    let encoders = codec::default_encoders();
    let capabilities = Arc::new(StaticCapabilities(probe_cached().clone()));
    Pipeline::new(*config, capabilities, encoders).compress(source)
}
