use std::collections::HashMap;
use std::sync::Arc;

use actix_multipart::{Field, Multipart};
use actix_web::{web, HttpResponse, Result};
use bytes::BytesMut;
use futures::TryStreamExt;
use log::{error, info};
use serde::Deserialize;

use crate::config::Config;
use crate::decode::SourceImage;
use crate::errors::ThumbnailError;
use crate::pipeline::{EncodedResult, Pipeline, PipelineConfig};

#[derive(Debug, Default, Deserialize)]
pub struct ThumbnailQuery {
    pub max_dimension: Option<u32>,
    pub budget_bytes: Option<usize>,
    pub response: Option<String>,
}

pub struct FileUpload {
    pub data: BytesMut,
    pub filename: Option<String>,
    pub content_type: Option<String>,
}

impl FileUpload {
    pub fn new() -> Self {
        Self {
            data: BytesMut::new(),
            filename: None,
            content_type: None,
        }
    }
}

impl Default for FileUpload {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResponseKind {
    Binary,
    Json,
}

/// Merge query and form overrides into the configured pipeline settings.
fn request_config(
    base: &PipelineConfig,
    query: &ThumbnailQuery,
    form_params: &HashMap<String, String>,
) -> Result<PipelineConfig, ThumbnailError> {
    fn form_value<T: std::str::FromStr>(
        form_params: &HashMap<String, String>,
        key: &str,
    ) -> Result<Option<T>, ThumbnailError> {
        form_params
            .get(key)
            .map(|s| s.trim().parse::<T>())
            .transpose()
            .map_err(|_| ThumbnailError::InvalidParameters(format!("'{}' must be a positive integer", key)))
    }

    let mut config = *base;

    let max_dimension = match query.max_dimension {
        Some(d) => Some(d),
        None => form_value::<u32>(form_params, "max_dimension")?,
    };
    if let Some(d) = max_dimension {
        if d == 0 {
            return Err(ThumbnailError::InvalidParameters("max_dimension cannot be 0".to_string()));
        }
        config.max_dimension = d;
    }

    let budget_bytes = match query.budget_bytes {
        Some(b) => Some(b),
        None => form_value::<usize>(form_params, "budget_bytes")?,
    };
    if let Some(b) = budget_bytes {
        if b == 0 {
            return Err(ThumbnailError::InvalidParameters("budget_bytes cannot be 0".to_string()));
        }
        config.budget_bytes = b;
    }

    Ok(config)
}

fn response_kind(query: &ThumbnailQuery, form_params: &HashMap<String, String>) -> Result<ResponseKind, ThumbnailError> {
    let requested = query
        .response
        .as_deref()
        .or_else(|| form_params.get("response").map(String::as_str))
        .unwrap_or("binary");

    match requested.to_lowercase().as_str() {
        "binary" => Ok(ResponseKind::Binary),
        "json" => Ok(ResponseKind::Json),
        other => Err(ThumbnailError::InvalidParameters(
            format!("Unknown response kind '{}', expected 'binary' or 'json'", other)
        )),
    }
}

pub async fn thumbnail_endpoint(
    mut payload: Multipart,
    query: web::Query<ThumbnailQuery>,
    config: web::Data<Config>,
    pipeline: web::Data<Pipeline>,
) -> Result<HttpResponse> {
    let mut file_upload: Option<FileUpload> = None;
    let mut form_params = HashMap::new();

    while let Some(field) = payload.try_next().await? {
        let field_name = field.name().to_string();

        if field_name == "file" {
            file_upload = Some(process_file_field(field, config.max_file_size_bytes()).await?);
        } else {
            let value = process_text_field(field).await?;
            form_params.insert(field_name, value);
        }
    }

    let file_upload = match file_upload {
        Some(upload) if !upload.data.is_empty() => upload,
        _ => {
            return Ok(HttpResponse::BadRequest().json(serde_json::json!({
                "error": "No file provided in 'file' field"
            })));
        }
    };

    let settings = request_config(pipeline.config(), &query, &form_params)?;
    let kind = response_kind(&query, &form_params)?;

    info!(
        "Processing file: {} ({} bytes, {}) bounded to {}px, budget {} bytes",
        file_upload.filename.as_deref().unwrap_or("unknown"),
        file_upload.data.len(),
        file_upload.content_type.as_deref().unwrap_or("no content type"),
        settings.max_dimension,
        settings.budget_bytes
    );

    let original_size = file_upload.data.len();
    let filename = file_upload.filename.clone();
    let source = SourceImage {
        bytes: file_upload.data.to_vec(),
        mime_type: file_upload.content_type.clone(),
    };

    let pipeline: Arc<Pipeline> = pipeline.into_inner();
    let outcome = tokio::task::spawn_blocking(move || pipeline.compress_with(&source, &settings))
        .await
        .map_err(|e| {
            error!("Compression task failed: {}", e);
            actix_web::error::ErrorInternalServerError("compression task failed")
        })?;

    match outcome {
        Ok(result) => {
            info!(
                "Thumbnail ready: {} -> {} bytes as {} ({}x{})",
                original_size,
                result.size(),
                result.codec,
                result.width,
                result.height
            );
            Ok(match kind {
                ResponseKind::Binary => binary_response(result, original_size, &filename),
                ResponseKind::Json => json_response(&result, original_size),
            })
        }
        Err(err) => {
            error!("Compression failed: {}", err);
            Err(err.into())
        }
    }
}

fn binary_response(result: EncodedResult, original_size: usize, filename: &Option<String>) -> HttpResponse {
    let output_filename = generate_output_filename(filename, &result);
    HttpResponse::Ok()
        .insert_header(("Content-Type", result.mime_type.clone()))
        .insert_header(("X-Original-Size", original_size.to_string()))
        .insert_header(("X-Thumbnail-Size", result.size().to_string()))
        .insert_header(("X-Thumbnail-Codec", result.codec.name()))
        .insert_header(("X-Thumbnail-Width", result.width.to_string()))
        .insert_header(("X-Thumbnail-Height", result.height.to_string()))
        .insert_header(("X-Thumbnail-Quality", format!("{:.2}", result.quality)))
        .insert_header((
            "Content-Disposition",
            format!("attachment; filename=\"{}\"", output_filename),
        ))
        .body(result.bytes)
}

fn json_response(result: &EncodedResult, original_size: usize) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "codec": result.codec,
        "mime_type": result.mime_type,
        "width": result.width,
        "height": result.height,
        "quality": result.quality,
        "attempts": result.attempts,
        "original_size": original_size,
        "size": result.size(),
        "data_url": result.to_data_url(),
    }))
}

async fn process_file_field(mut field: Field, max_size_bytes: usize) -> Result<FileUpload> {
    let mut upload = FileUpload::new();

    upload.filename = field
        .content_disposition()
        .get_filename()
        .map(|s| s.to_string());

    upload.content_type = field
        .content_type()
        .map(|ct| ct.to_string());

    while let Some(chunk) = field.try_next().await? {
        if upload.data.len() + chunk.len() > max_size_bytes {
            return Err(ThumbnailError::FileTooLarge { max_size: max_size_bytes }.into());
        }
        upload.data.extend_from_slice(&chunk);
    }

    Ok(upload)
}

async fn process_text_field(mut field: Field) -> Result<String> {
    let mut data = Vec::new();

    while let Some(chunk) = field.try_next().await? {
        data.extend_from_slice(&chunk);

        if data.len() > 1024 {
            return Err(ThumbnailError::InvalidParameters(
                "Text field too long".to_string()
            ).into());
        }
    }

    String::from_utf8(data)
        .map_err(|_| ThumbnailError::InvalidParameters(
            "Invalid UTF-8 in text field".to_string()
        ).into())
}

fn generate_output_filename(original_filename: &Option<String>, result: &EncodedResult) -> String {
    let base_name = original_filename
        .as_ref()
        .and_then(|name| {
            let stem = std::path::Path::new(name)
                .file_stem()
                .and_then(|s| s.to_str())?;
            Some(stem.to_string())
        })
        .unwrap_or_else(|| format!("thumbnail_{}", uuid::Uuid::new_v4()));

    format!("{}_thumb.{}", base_name, result.codec.extension())
}

pub async fn health_check() -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "status": "ok",
        "service": "image-thumbnail-server",
        "version": env!("CARGO_PKG_VERSION")
    })))
}

pub async fn info_endpoint(config: web::Data<Config>, pipeline: web::Data<Pipeline>) -> Result<HttpResponse> {
    let capabilities = pipeline.capabilities().capabilities();
    let pipeline_config = pipeline.config();

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "service": "Image Thumbnail Server",
        "version": env!("CARGO_PKG_VERSION"),
        "config": {
            "max_file_size_mb": config.server.max_file_size_mb,
            "max_dimension": pipeline_config.max_dimension,
            "budget_bytes": pipeline_config.budget_bytes,
            "max_attempts": pipeline_config.search.max_attempts,
            "jpeg_encoder": config.thumbnail.jpeg_encoder,
        },
        "codecs": capabilities.codecs().iter().map(|codec| serde_json::json!({
            "name": codec.name(),
            "mime_type": codec.mime_type(),
            "baseline": codec.is_baseline(),
        })).collect::<Vec<_>>(),
        "usage": {
            "endpoint": "/thumbnail",
            "method": "POST",
            "content_type": "multipart/form-data",
            "parameters": {
                "file": "Image file to compress (required)",
                "max_dimension": format!("Longest side before square crop (optional, default: {})", pipeline_config.max_dimension),
                "budget_bytes": format!("Target maximum size in bytes (optional, default: {})", pipeline_config.budget_bytes),
                "response": "'binary' (default) or 'json' with a data URL"
            },
            "query_parameters": {
                "max_dimension": "Alternative way to specify max_dimension",
                "budget_bytes": "Alternative way to specify budget_bytes",
                "response": "Alternative way to specify response"
            }
        }
    })))
}
