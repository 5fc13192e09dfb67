//! Bounded quality/dimension search under a byte budget, one codec at a time.
//!
//! Each attempt encodes the current [`SearchState`]. Quality shrinks by
//! `sqrt(budget / best)` per step; once it hits the floor the bitmap
//! itself is shrunk by the same factor and quality is reset. Shrinks
//! compound: each one scales the current bitmap, not the original.

use std::borrow::Cow;

use image::RgbaImage;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::codec::Encoder;
use crate::normalize;
use crate::pipeline::EncodedResult;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchParams {
    pub initial_quality: f32,
    pub min_quality: f32,
    /// Quality used again after a dimension reduction.
    pub rescale_quality: f32,
    pub max_attempts: u32,
}

impl Default for SearchParams {
    fn default() -> Self {
        Self {
            initial_quality: 0.85,
            min_quality: 0.3,
            rescale_quality: 0.7,
            max_attempts: 5,
        }
    }
}

/// What was tried and what it cost.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressionAttempt {
    pub quality: f32,
    pub width: u32,
    pub height: u32,
    pub size: usize,
}

/// Input of the next encode call.
#[derive(Debug, Clone)]
pub struct SearchState<'a> {
    pub quality: f32,
    pub bitmap: Cow<'a, RgbaImage>,
}

impl<'a> SearchState<'a> {
    pub fn new(bitmap: &'a RgbaImage, params: &SearchParams) -> Self {
        Self {
            quality: params.initial_quality,
            bitmap: Cow::Borrowed(bitmap),
        }
    }

    pub fn apply(self, step: Step) -> Self {
        match step {
            Step::Done => self,
            Step::Requality(quality) => Self { quality, ..self },
            Step::Rescale { scale, quality } => {
                let bitmap = normalize::scale_by(&self.bitmap, scale);
                debug!(
                    "Shrinking {}x{} -> {}x{} (scale {:.3})",
                    self.bitmap.width(),
                    self.bitmap.height(),
                    bitmap.width(),
                    bitmap.height(),
                    scale
                );
                Self {
                    quality,
                    bitmap: Cow::Owned(bitmap),
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Step {
    /// Best result fits the budget.
    Done,
    /// Retry the same bitmap at a lower quality.
    Requality(f32),
    /// Quality is at the floor: shrink the bitmap and reset quality.
    Rescale { scale: f64, quality: f32 },
}

/// Decide the next move from the current quality and the best size so far.
pub fn next_step(quality: f32, best_size: usize, budget_bytes: usize, params: &SearchParams) -> Step {
    if best_size <= budget_bytes {
        return Step::Done;
    }

    let ratio = (budget_bytes as f64 / best_size as f64).sqrt();
    let reduced = params.min_quality.max((quality as f64 * ratio) as f32);

    if reduced <= params.min_quality {
        Step::Rescale {
            scale: ratio,
            quality: params.rescale_quality,
        }
    } else {
        Step::Requality(reduced)
    }
}

struct Candidate {
    bytes: Vec<u8>,
    attempt: CompressionAttempt,
}

/// Search for the smallest encoding of `bitmap` with one encoder.
///
/// Returns `None` only when the encoder fails to produce any output, which
/// tells the caller to move to the next codec. An unreachable budget is
/// not a failure: the smallest result seen is returned.
pub fn encode_with_budget(
    bitmap: &RgbaImage,
    encoder: &dyn Encoder,
    budget_bytes: usize,
    params: &SearchParams,
) -> Option<EncodedResult> {
    let codec = encoder.codec();
    let mut state = SearchState::new(bitmap, params);
    let mut best: Option<Candidate> = None;
    let mut attempts = 0;

    while attempts < params.max_attempts {
        attempts += 1;

        let bytes = match encoder.encode(&state.bitmap, state.quality) {
            Ok(bytes) if !bytes.is_empty() => bytes,
            Ok(_) => {
                warn!("{} attempt {} produced no output, abandoning codec", codec, attempts);
                return None;
            }
            Err(e) => {
                warn!("{} attempt {} failed: {}", codec, attempts, e);
                return None;
            }
        };

        let attempt = CompressionAttempt {
            quality: state.quality,
            width: state.bitmap.width(),
            height: state.bitmap.height(),
            size: bytes.len(),
        };
        debug!(
            "{} attempt {} at quality {:.3} ({}x{}): {} bytes",
            codec, attempts, attempt.quality, attempt.width, attempt.height, attempt.size
        );

        if best.as_ref().map_or(true, |b| attempt.size < b.attempt.size) {
            best = Some(Candidate { bytes, attempt });
        }

        let best_size = best.as_ref().map_or(usize::MAX, |b| b.attempt.size);
        let step = next_step(state.quality, best_size, budget_bytes, params);
        if step == Step::Done || attempts >= params.max_attempts {
            break;
        }
        state = state.apply(step);
    }

    best.map(|candidate| EncodedResult {
        bytes: candidate.bytes,
        codec,
        mime_type: codec.mime_type().to_string(),
        width: candidate.attempt.width,
        height: candidate.attempt.height,
        quality: candidate.attempt.quality,
        attempts,
    })
}
