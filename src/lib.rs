pub mod codec;
pub mod config;
pub mod decode;
pub mod errors;
pub mod handlers;
pub mod normalize;
pub mod pipeline;
pub mod probe;
pub mod search;
pub mod transport;

// Re-export commonly used items for easier testing
pub use codec::{Codec, Encoder, JpegBackend};
pub use config::*;
pub use decode::{decode, SourceImage};
pub use errors::*;
pub use normalize::normalize;
pub use pipeline::{compress, EncodedResult, Pipeline, PipelineConfig, PipelineStage};
pub use probe::{CapabilityProvider, CapabilitySet, StaticCapabilities};
pub use search::{encode_with_budget, SearchParams};
