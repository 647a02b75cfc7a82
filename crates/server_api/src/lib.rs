use std::sync::Arc;

use async_trait::async_trait;
use shared::{
    domain::has_document_extension,
    error::{ApiError, ErrorCode},
    protocol::{ContentUploadResponse, ModelUploadResponse, ProcessResponse},
};
use storage::Storage;
use tracing::info;
use uuid::Uuid;

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
    pub processor: Arc<dyn DocumentProcessor>,
}

/// Engine that merges a content document into a model template.
///
/// Inputs and output are opaque byte blobs; all format interpretation
/// lives behind this seam.
#[async_trait]
pub trait DocumentProcessor: Send + Sync {
    async fn assemble(&self, model: &[u8], content: &[u8]) -> anyhow::Result<Vec<u8>>;
}

/// Stand-in engine that emits the content bytes untouched.
pub struct PassthroughProcessor;

#[async_trait]
impl DocumentProcessor for PassthroughProcessor {
    async fn assemble(&self, _model: &[u8], content: &[u8]) -> anyhow::Result<Vec<u8>> {
        Ok(content.to_vec())
    }
}

pub fn download_route_prefix() -> &'static str {
    "/api/download"
}

pub async fn list_models(ctx: &ApiContext) -> Result<Vec<String>, ApiError> {
    ctx.storage.list_model_names().await.map_err(internal)
}

pub async fn store_model(
    ctx: &ApiContext,
    original_filename: &str,
    bytes: &[u8],
) -> Result<ModelUploadResponse, ApiError> {
    let filename = validate_upload(original_filename, bytes)?;
    ctx.storage
        .upsert_model(&filename, bytes)
        .await
        .map_err(internal)?;
    info!(%filename, size_bytes = bytes.len(), "model registered");
    Ok(ModelUploadResponse {
        message: "Model uploaded".to_string(),
        filename,
    })
}

pub async fn store_content(
    ctx: &ApiContext,
    original_filename: &str,
    bytes: &[u8],
) -> Result<ContentUploadResponse, ApiError> {
    let sanitized = validate_upload(original_filename, bytes)?;
    let stored_name = format!("{}_{sanitized}", Uuid::new_v4());
    ctx.storage
        .insert_content(&stored_name, original_filename, bytes)
        .await
        .map_err(internal)?;
    info!(
        %stored_name,
        original_name = original_filename,
        size_bytes = bytes.len(),
        "content upload stored"
    );
    Ok(ContentUploadResponse {
        filename: stored_name,
        original_name: original_filename.to_string(),
    })
}

pub async fn process_document(
    ctx: &ApiContext,
    model_filename: &str,
    content_filename: &str,
) -> Result<ProcessResponse, ApiError> {
    if model_filename.trim().is_empty() || content_filename.trim().is_empty() {
        return Err(ApiError::new(ErrorCode::Validation, "Missing filename"));
    }

    let model = ctx
        .storage
        .load_model(model_filename)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "File not found"))?;
    let content = ctx
        .storage
        .load_content(content_filename)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "File not found"))?;

    let artifact = ctx
        .processor
        .assemble(&model.bytes, &content.bytes)
        .await
        .map_err(internal)?;

    let output_filename = format!("processed_{content_filename}");
    ctx.storage
        .store_output(&output_filename, &artifact)
        .await
        .map_err(internal)?;

    info!(
        model = model_filename,
        content = content_filename,
        output = %output_filename,
        "document processed"
    );
    Ok(ProcessResponse {
        download_url: format!("{}/{output_filename}", download_route_prefix()),
    })
}

pub async fn load_output(ctx: &ApiContext, filename: &str) -> Result<Vec<u8>, ApiError> {
    let output = ctx
        .storage
        .load_output(filename)
        .await
        .map_err(internal)?
        .ok_or_else(|| ApiError::new(ErrorCode::NotFound, "File not found"))?;
    Ok(output.bytes)
}

fn validate_upload(original_filename: &str, bytes: &[u8]) -> Result<String, ApiError> {
    let trimmed = original_filename.trim();
    if trimmed.is_empty() {
        return Err(ApiError::new(ErrorCode::Validation, "No selected file"));
    }
    if !has_document_extension(trimmed) {
        return Err(ApiError::new(ErrorCode::Validation, "Invalid file type"));
    }
    if bytes.is_empty() {
        return Err(ApiError::new(
            ErrorCode::Validation,
            "Uploaded file is empty",
        ));
    }

    let sanitized = sanitize_filename(trimmed);
    if !has_document_extension(&sanitized) {
        return Err(ApiError::new(ErrorCode::Validation, "Invalid file name"));
    }
    Ok(sanitized)
}

/// Reduces a client-supplied filename to a safe storage key: the final
/// path component with whitespace collapsed to underscores and anything
/// outside `[A-Za-z0-9._-]` dropped.
pub fn sanitize_filename(name: &str) -> String {
    let last_component = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default();

    let mut sanitized = String::with_capacity(last_component.len());
    for ch in last_component.chars() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
            sanitized.push(ch);
        } else if ch.is_whitespace() {
            sanitized.push('_');
        }
    }

    sanitized.trim_matches('.').to_string()
}

fn internal(err: anyhow::Error) -> ApiError {
    ApiError::new(ErrorCode::Internal, err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;

    struct FailingProcessor;

    #[async_trait]
    impl DocumentProcessor for FailingProcessor {
        async fn assemble(&self, _model: &[u8], _content: &[u8]) -> anyhow::Result<Vec<u8>> {
            Err(anyhow!("assembly backend unavailable"))
        }
    }

    async fn setup() -> ApiContext {
        let storage = Storage::new("sqlite::memory:").await.expect("db");
        ApiContext {
            storage,
            processor: Arc::new(PassthroughProcessor),
        }
    }

    #[test]
    fn sanitize_strips_path_components() {
        assert_eq!(sanitize_filename("../../etc/passwd.docx"), "passwd.docx");
        assert_eq!(sanitize_filename("C:\\temp\\contract.docx"), "contract.docx");
    }

    #[test]
    fn sanitize_collapses_whitespace_and_odd_characters() {
        assert_eq!(
            sanitize_filename("annual report (final).docx"),
            "annual_report_final.docx"
        );
    }

    #[tokio::test]
    async fn upload_then_list_returns_sanitized_name() {
        let ctx = setup().await;
        let response = store_model(&ctx, "my contract.docx", b"bytes")
            .await
            .expect("upload");
        assert_eq!(response.filename, "my_contract.docx");

        let names = list_models(&ctx).await.expect("list");
        assert_eq!(names, vec!["my_contract.docx"]);
    }

    #[tokio::test]
    async fn rejects_wrong_extension() {
        let ctx = setup().await;
        let err = store_model(&ctx, "notes.txt", b"bytes")
            .await
            .expect_err("must fail");
        assert_eq!(err.code, ErrorCode::Validation);

        let names = list_models(&ctx).await.expect("list");
        assert!(names.is_empty());
    }

    #[tokio::test]
    async fn rejects_empty_filename() {
        let ctx = setup().await;
        let err = store_model(&ctx, "   ", b"bytes")
            .await
            .expect_err("must fail");
        assert_eq!(err.code, ErrorCode::Validation);
    }

    #[tokio::test]
    async fn content_upload_mints_unique_handles() {
        let ctx = setup().await;
        let first = store_content(&ctx, "report.docx", b"one")
            .await
            .expect("upload");
        let second = store_content(&ctx, "report.docx", b"two")
            .await
            .expect("upload");

        assert_ne!(first.filename, second.filename);
        assert!(first.filename.ends_with("_report.docx"));
        assert_eq!(first.original_name, "report.docx");
    }

    #[tokio::test]
    async fn process_requires_known_model_and_content() {
        let ctx = setup().await;
        let err = process_document(&ctx, "missing.docx", "missing-content")
            .await
            .expect_err("must fail");
        assert_eq!(err.code, ErrorCode::NotFound);
    }

    #[tokio::test]
    async fn process_produces_downloadable_artifact() {
        let ctx = setup().await;
        store_model(&ctx, "model.docx", b"model-bytes")
            .await
            .expect("model");
        let content = store_content(&ctx, "report.docx", b"content-bytes")
            .await
            .expect("content");

        let response = process_document(&ctx, "model.docx", &content.filename)
            .await
            .expect("process");
        let expected_output = format!("processed_{}", content.filename);
        assert_eq!(
            response.download_url,
            format!("/api/download/{expected_output}")
        );

        let artifact = load_output(&ctx, &expected_output).await.expect("output");
        assert_eq!(artifact, b"content-bytes");
    }

    #[tokio::test]
    async fn processor_failure_surfaces_internal_error() {
        let storage = Storage::new("sqlite::memory:").await.expect("db");
        let ctx = ApiContext {
            storage,
            processor: Arc::new(FailingProcessor),
        };
        store_model(&ctx, "model.docx", b"model-bytes")
            .await
            .expect("model");
        let content = store_content(&ctx, "report.docx", b"content-bytes")
            .await
            .expect("content");

        let err = process_document(&ctx, "model.docx", &content.filename)
            .await
            .expect_err("must fail");
        assert_eq!(err.code, ErrorCode::Internal);
    }
}
