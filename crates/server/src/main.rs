use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use server_api::{
    list_models, load_output, process_document, store_content, store_model, ApiContext,
    PassthroughProcessor,
};
use shared::{
    error::{ApiError, ErrorCode},
    protocol::{ContentUploadResponse, ModelUploadResponse, ProcessRequest, ProcessResponse},
};
use storage::Storage;
use tracing::{error, info};

mod config;

use config::{load_settings, prepare_database_url};

const MAX_UPLOAD_BYTES: usize = 8 * 1024 * 1024;

#[derive(Clone)]
struct AppState {
    api: ApiContext,
    public_url: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|err| {
        error!(
            %database_url,
            %err,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        err
    })?;
    let api = ApiContext {
        storage,
        processor: Arc::new(PassthroughProcessor),
    };

    let state = AppState {
        api,
        public_url: settings.public_url,
    };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/models", get(http_list_models))
        .route("/api/models", post(http_upload_model))
        .route("/api/upload_content", post(http_upload_content))
        .route("/api/process", post(http_process))
        .route("/api/download/:filename", get(http_download))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES + 64 * 1024))
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reject(error: ApiError) -> (StatusCode, Json<ApiError>) {
    (status_for(error.code), Json(error))
}

async fn http_list_models(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<String>>, (StatusCode, Json<ApiError>)> {
    let models = list_models(&state.api).await.map_err(reject)?;
    Ok(Json(models))
}

async fn http_upload_model(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<ModelUploadResponse>, (StatusCode, Json<ApiError>)> {
    let (filename, bytes) = read_file_field(multipart).await?;
    let response = store_model(&state.api, &filename, &bytes)
        .await
        .map_err(reject)?;
    Ok(Json(response))
}

async fn http_upload_content(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<ContentUploadResponse>, (StatusCode, Json<ApiError>)> {
    let (filename, bytes) = read_file_field(multipart).await?;
    let response = store_content(&state.api, &filename, &bytes)
        .await
        .map_err(reject)?;
    Ok(Json(response))
}

async fn http_process(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ProcessRequest>,
) -> Result<Json<ProcessResponse>, (StatusCode, Json<ApiError>)> {
    let mut response = process_document(&state.api, &req.model_filename, &req.content_filename)
        .await
        .map_err(reject)?;

    if let Some(public_url) = &state.public_url {
        response.download_url = format!(
            "{}{}",
            public_url.trim_end_matches('/'),
            response.download_url
        );
    }

    Ok(Json(response))
}

async fn http_download(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Result<impl IntoResponse, (StatusCode, Json<ApiError>)> {
    let bytes = load_output(&state.api, &filename).await.map_err(reject)?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{filename}\"")) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }

    Ok((StatusCode::OK, headers, bytes))
}

/// Pulls the single `file` field out of a multipart upload. Extra fields
/// are ignored; a missing field is a validation error.
async fn read_file_field(
    mut multipart: Multipart,
) -> Result<(String, Vec<u8>), (StatusCode, Json<ApiError>)> {
    loop {
        let field = multipart.next_field().await.map_err(|err| {
            reject(ApiError::new(
                ErrorCode::Validation,
                format!("invalid multipart body: {err}"),
            ))
        })?;
        let Some(field) = field else {
            return Err(reject(ApiError::new(ErrorCode::Validation, "No file part")));
        };
        if field.name() != Some("file") {
            continue;
        }

        let filename = field.file_name().unwrap_or_default().to_string();
        let bytes = field.bytes().await.map_err(|err| {
            reject(ApiError::new(
                ErrorCode::Validation,
                format!("failed to read upload: {err}"),
            ))
        })?;
        if bytes.len() > MAX_UPLOAD_BYTES {
            return Err((
                StatusCode::PAYLOAD_TOO_LARGE,
                Json(ApiError::new(
                    ErrorCode::Validation,
                    format!("upload exceeds {MAX_UPLOAD_BYTES} bytes"),
                )),
            ));
        }
        return Ok((filename, bytes.to_vec()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    const BOUNDARY: &str = "test-boundary";

    async fn test_app() -> Router {
        let storage = Storage::new("sqlite::memory:").await.expect("db");
        let api = ApiContext {
            storage,
            processor: Arc::new(PassthroughProcessor),
        };
        build_router(Arc::new(AppState {
            api,
            public_url: None,
        }))
    }

    fn multipart_upload(path: &str, field: &str, filename: &str, content: &[u8]) -> Request<Body> {
        let mut body = Vec::new();
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(content);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::post(path)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .expect("request")
    }

    async fn response_json<T: serde::de::DeserializeOwned>(
        response: axum::response::Response,
    ) -> T {
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn healthz_responds_ok() {
        let app = test_app().await;
        let response = app
            .oneshot(Request::get("/healthz").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn upload_model_then_list_includes_it() {
        let app = test_app().await;

        let response = app
            .clone()
            .oneshot(multipart_upload(
                "/api/models",
                "file",
                "contract.docx",
                b"model-bytes",
            ))
            .await
            .expect("upload response");
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                Request::get("/api/models")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("list response");
        assert_eq!(response.status(), StatusCode::OK);
        let names: Vec<String> = response_json(response).await;
        assert_eq!(names, vec!["contract.docx"]);
    }

    #[tokio::test]
    async fn upload_rejects_wrong_extension() {
        let app = test_app().await;
        let response = app
            .oneshot(multipart_upload(
                "/api/models",
                "file",
                "notes.txt",
                b"bytes",
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let error: ApiError = response_json(response).await;
        assert_eq!(error.code, ErrorCode::Validation);
    }

    #[tokio::test]
    async fn upload_without_file_field_is_rejected() {
        let app = test_app().await;
        let response = app
            .oneshot(multipart_upload(
                "/api/models",
                "attachment",
                "contract.docx",
                b"bytes",
            ))
            .await
            .expect("response");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let error: ApiError = response_json(response).await;
        assert_eq!(error.message, "No file part");
    }

    #[tokio::test]
    async fn process_unknown_files_returns_not_found() {
        let app = test_app().await;
        let request = Request::post("/api/process")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                serde_json::to_vec(&ProcessRequest {
                    model_filename: "missing.docx".into(),
                    content_filename: "missing-content".into(),
                })
                .expect("json"),
            ))
            .expect("request");
        let response = app.oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn full_pipeline_produces_downloadable_artifact() {
        let app = test_app().await;

        let response = app
            .clone()
            .oneshot(multipart_upload(
                "/api/models",
                "file",
                "model.docx",
                b"model-bytes",
            ))
            .await
            .expect("model upload");
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(multipart_upload(
                "/api/upload_content",
                "file",
                "report.docx",
                b"content-bytes",
            ))
            .await
            .expect("content upload");
        assert_eq!(response.status(), StatusCode::OK);
        let content: ContentUploadResponse = response_json(response).await;
        assert_eq!(content.original_name, "report.docx");

        let request = Request::post("/api/process")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                serde_json::to_vec(&ProcessRequest {
                    model_filename: "model.docx".into(),
                    content_filename: content.filename.clone(),
                })
                .expect("json"),
            ))
            .expect("request");
        let response = app.clone().oneshot(request).await.expect("process");
        assert_eq!(response.status(), StatusCode::OK);
        let processed: ProcessResponse = response_json(response).await;
        assert_eq!(
            processed.download_url,
            format!("/api/download/processed_{}", content.filename)
        );

        let response = app
            .oneshot(
                Request::get(processed.download_url.as_str())
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("download");
        assert_eq!(response.status(), StatusCode::OK);
        let disposition = response
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .cloned();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("body")
            .to_bytes();
        assert_eq!(&bytes[..], b"content-bytes");
        let disposition = disposition.expect("content-disposition");
        assert!(disposition
            .to_str()
            .expect("header text")
            .starts_with("attachment;"));
    }
}
