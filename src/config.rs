use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::codec::{Codec, JpegBackend, DEFAULT_AVIF_SPEED};
use crate::pipeline::{PipelineConfig, DEFAULT_BUDGET_BYTES, DEFAULT_MAX_DIMENSION};
use crate::probe::CapabilitySet;
use crate::search::SearchParams;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub thumbnail: ThumbnailConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_file_size_mb: usize,
    pub worker_threads: Option<usize>,
    pub enable_cors: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailConfig {
    pub max_dimension: u32,
    pub budget_bytes: usize,
    pub initial_quality: f32,
    pub min_quality: f32,
    pub rescale_quality: f32,
    pub max_attempts: u32,
    pub jpeg_encoder: String,
    pub avif_speed: u8,
    /// Codecs allowed in the fallback chain, subject to runtime support.
    pub codecs: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub enable_request_logging: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3030,
            max_file_size_mb: 50,
            worker_threads: None, // Use system default
            enable_cors: true,
        }
    }
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        let search = SearchParams::default();
        Self {
            max_dimension: DEFAULT_MAX_DIMENSION,
            budget_bytes: DEFAULT_BUDGET_BYTES,
            initial_quality: search.initial_quality,
            min_quality: search.min_quality,
            rescale_quality: search.rescale_quality,
            max_attempts: search.max_attempts,
            jpeg_encoder: "mozjpeg".to_string(),
            avif_speed: DEFAULT_AVIF_SPEED,
            codecs: Codec::PRIORITY.iter().map(|c| c.name().to_string()).collect(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            enable_request_logging: true,
        }
    }
}

impl ThumbnailConfig {
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            max_dimension: self.max_dimension,
            budget_bytes: self.budget_bytes,
            search: SearchParams {
                initial_quality: self.initial_quality,
                min_quality: self.min_quality,
                rescale_quality: self.rescale_quality,
                max_attempts: self.max_attempts,
            },
        }
    }

    pub fn jpeg_backend(&self) -> JpegBackend {
        JpegBackend::from_name(&self.jpeg_encoder).unwrap_or(JpegBackend::Mozjpeg)
    }

    pub fn allowed_codecs(&self) -> Vec<Codec> {
        self.codecs.iter().filter_map(|name| Codec::from_name(name)).collect()
    }

    /// Apply the allow-list to a probed set.
    pub fn restrict(&self, probed: &CapabilitySet) -> CapabilitySet {
        probed.restrict_to(&self.allowed_codecs())
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults if file doesn't exist
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file {:?} not found, using defaults", path);
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(format!("Failed to parse config: {}", e)))?;

        config.validate()?;

        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Load configuration from environment variables and file
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = std::env::var("IMG_THUMB_CONFIG")
            .unwrap_or_else(|_| "config.toml".to_string());

        let mut config = Self::load_from_file(&config_path)?;
        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("IMG_THUMB_HOST") {
            self.server.host = host;
        }

        if let Ok(port) = std::env::var("IMG_THUMB_PORT") {
            if let Ok(port_num) = port.parse::<u16>() {
                self.server.port = port_num;
            }
        }

        if let Ok(max_size) = std::env::var("IMG_THUMB_MAX_FILE_SIZE_MB") {
            if let Ok(size) = max_size.parse::<usize>() {
                self.server.max_file_size_mb = size;
            }
        }

        if let Ok(dimension) = std::env::var("IMG_THUMB_MAX_DIMENSION") {
            if let Ok(d) = dimension.parse::<u32>() {
                self.thumbnail.max_dimension = d;
            }
        }

        if let Ok(budget) = std::env::var("IMG_THUMB_BUDGET_BYTES") {
            if let Ok(b) = budget.parse::<usize>() {
                self.thumbnail.budget_bytes = b;
            }
        }

        if let Ok(encoder) = std::env::var("IMG_THUMB_JPEG_ENCODER") {
            self.thumbnail.jpeg_encoder = encoder;
        }

        if let Ok(log_level) = std::env::var("RUST_LOG") {
            self.logging.level = log_level;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::ValidationError("Port cannot be 0".to_string()));
        }

        if self.server.max_file_size_mb == 0 {
            return Err(ConfigError::ValidationError("Max file size cannot be 0".to_string()));
        }

        let thumb = &self.thumbnail;
        if thumb.max_dimension == 0 {
            return Err(ConfigError::ValidationError("Max dimension cannot be 0".to_string()));
        }

        if thumb.budget_bytes == 0 {
            return Err(ConfigError::ValidationError("Byte budget cannot be 0".to_string()));
        }

        if thumb.max_attempts == 0 {
            return Err(ConfigError::ValidationError("Max attempts cannot be 0".to_string()));
        }

        for (name, quality) in [
            ("initial_quality", thumb.initial_quality),
            ("min_quality", thumb.min_quality),
            ("rescale_quality", thumb.rescale_quality),
        ] {
            if !(quality > 0.0 && quality <= 1.0) {
                return Err(ConfigError::ValidationError(
                    format!("{} must be in (0, 1], got {}", name, quality)
                ));
            }
        }

        if thumb.min_quality > thumb.initial_quality {
            return Err(ConfigError::ValidationError(
                "min_quality cannot exceed initial_quality".to_string()
            ));
        }

        if JpegBackend::from_name(&thumb.jpeg_encoder).is_none() {
            return Err(ConfigError::ValidationError(
                format!("Invalid JPEG encoder. Must be one of: {:?}", JpegBackend::NAMES)
            ));
        }

        if let Some(unknown) = thumb.codecs.iter().find(|name| Codec::from_name(name).is_none()) {
            return Err(ConfigError::ValidationError(format!("Unknown codec '{}'", unknown)));
        }

        if !thumb.allowed_codecs().contains(&Codec::BASELINE) {
            return Err(ConfigError::ValidationError(
                format!("Codec list must include the {} baseline", Codec::BASELINE)
            ));
        }

        Ok(())
    }

    /// Generate a sample configuration file
    pub fn generate_sample_config<P: AsRef<Path>>(path: P) -> Result<(), ConfigError> {
        let config = Self::default();
        let toml_content = toml::to_string_pretty(&config)
            .map_err(|e| ConfigError::SerializeError(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_content)
            .map_err(|e| ConfigError::IoError(format!("Failed to write config file: {}", e)))?;

        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    pub fn max_file_size_bytes(&self) -> usize {
        self.server.max_file_size_mb * 1024 * 1024
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Serialization error: {0}")]
    SerializeError(String),
}
