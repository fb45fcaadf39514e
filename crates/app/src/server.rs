use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, DefaultBodyLimit, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use docchat_core::{
    Citation, ChatMessage, DocumentMetadata, IngestOutcome, RagError, RagPipeline, Session,
    SessionSummary, SingleTurnAnswer,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

type AppState = Arc<RagPipeline>;

pub fn router(pipeline: Arc<RagPipeline>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/documents", post(upload_document).get(list_documents))
        .route(
            "/documents/{id}",
            get(document_metadata).delete(delete_document),
        )
        .route("/documents/{id}/chunks", get(document_chunks))
        .route("/documents/{id}/download", get(download_document))
        .route("/documents/{id}/reprocess", post(reprocess_document))
        .route("/chat", post(chat))
        .route("/ask", post(ask))
        .route("/sessions", get(list_sessions))
        .route("/sessions/{id}", get(get_session).delete(delete_session))
        .route("/sessions/{id}/target", put(set_session_target))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(cors)
        .with_state(pipeline)
}

pub async fn serve(pipeline: Arc<RagPipeline>, bind: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(bind, "http api listening");
    axum::serve(listener, router(pipeline))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(%error, "could not install ctrl-c handler");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    details: String,
}

struct AppError {
    status: StatusCode,
    code: &'static str,
    details: String,
}

impl AppError {
    fn validation(details: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "VALIDATION_ERROR",
            details: details.into(),
        }
    }

    fn not_found(details: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "NOT_FOUND",
            details: details.into(),
        }
    }
}

fn status_for(code: &str) -> StatusCode {
    match code {
        "VALIDATION_ERROR" => StatusCode::BAD_REQUEST,
        "NOT_FOUND" => StatusCode::NOT_FOUND,
        "GENERATION_FAILED" => StatusCode::BAD_GATEWAY,
        "INDEX_UNAVAILABLE" => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<RagError> for AppError {
    fn from(error: RagError) -> Self {
        let code = error.code();
        let status = status_for(code);
        if status.is_server_error() {
            error!(code, %error, "request failed");
        }
        Self {
            status,
            code,
            details: error.to_string(),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::validation(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.code,
            details: self.details,
        };
        (self.status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, AppError>;

#[derive(Deserialize)]
struct UploadParams {
    filename: Option<String>,
}

#[derive(Serialize)]
struct UploadResponse {
    id: String,
    name: String,
    #[serde(rename = "chunkCount")]
    chunk_count: usize,
    #[serde(rename = "flaggedPages")]
    flagged_pages: Vec<u32>,
}

async fn upload_document(
    State(pipeline): State<AppState>,
    Query(params): Query<UploadParams>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<UploadResponse>)> {
    let filename = params
        .filename
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "upload".to_string());
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok());

    let outcome = pipeline.ingest(&body, &filename, content_type).await?;
    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            id: outcome.doc_id,
            name: outcome.display_name,
            chunk_count: outcome.chunk_count,
            flagged_pages: outcome.flagged_pages,
        }),
    ))
}

#[derive(Serialize)]
struct DocumentRef {
    id: String,
}

async fn list_documents(State(pipeline): State<AppState>) -> ApiResult<Json<Vec<DocumentRef>>> {
    let ids = pipeline.list_documents().await?;
    Ok(Json(ids.into_iter().map(|id| DocumentRef { id }).collect()))
}

async fn document_metadata(
    State(pipeline): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<DocumentMetadata>> {
    Ok(Json(pipeline.document_metadata(&id).await?))
}

#[derive(Serialize)]
struct ChunksResponse {
    id: String,
    chunks: Vec<String>,
}

async fn document_chunks(
    State(pipeline): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<ChunksResponse>> {
    let chunks = pipeline.document_chunks(&id).await?;
    Ok(Json(ChunksResponse { id, chunks }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct DeleteDocumentResponse {
    id: String,
    deleted: bool,
    files_removed: usize,
}

async fn delete_document(
    State(pipeline): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<DeleteDocumentResponse>> {
    let files_removed = pipeline.delete_document(&id).await?;
    Ok(Json(DeleteDocumentResponse {
        id,
        deleted: true,
        files_removed,
    }))
}

async fn download_document(
    State(pipeline): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let bytes = pipeline.download_document(&id).await?;
    let disposition = format!("attachment; filename=\"{id}\"");
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

async fn reprocess_document(
    State(pipeline): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<IngestOutcome>> {
    Ok(Json(pipeline.reprocess(&id).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChatRequest {
    query: String,
    session_id: Option<String>,
    target_documents: Option<Vec<String>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatResponse {
    session_id: String,
    answer: String,
    citations: Vec<Citation>,
    chat_history: Vec<ChatMessage>,
    document_ids: Vec<String>,
}

async fn chat(
    State(pipeline): State<AppState>,
    request: Result<Json<ChatRequest>, JsonRejection>,
) -> ApiResult<Json<ChatResponse>> {
    let Json(request) = request?;
    let outcome = pipeline
        .ask(
            request.session_id.as_deref(),
            &request.query,
            request.target_documents,
        )
        .await?;

    Ok(Json(ChatResponse {
        session_id: outcome.session_id,
        answer: outcome.answer,
        citations: outcome.citations,
        chat_history: outcome.recent_history,
        document_ids: outcome.document_ids,
    }))
}

#[derive(Deserialize)]
struct AskRequest {
    query: String,
}

async fn ask(
    State(pipeline): State<AppState>,
    request: Result<Json<AskRequest>, JsonRejection>,
) -> ApiResult<Json<SingleTurnAnswer>> {
    let Json(request) = request?;
    Ok(Json(pipeline.ask_single_turn(&request.query).await?))
}

async fn list_sessions(State(pipeline): State<AppState>) -> Json<Vec<SessionSummary>> {
    Json(pipeline.conversations().list())
}

async fn get_session(
    State(pipeline): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Session>> {
    pipeline
        .conversations()
        .get(&id)
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("session {id}")))
}

#[derive(Serialize)]
struct DeleteSessionResponse {
    id: String,
    deleted: bool,
}

async fn delete_session(
    State(pipeline): State<AppState>,
    Path(id): Path<String>,
) -> Json<DeleteSessionResponse> {
    let deleted = pipeline.conversations().delete(&id);
    Json(DeleteSessionResponse { id, deleted })
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetRequest {
    #[serde(default)]
    target_documents: Option<Vec<String>>,
}

async fn set_session_target(
    State(pipeline): State<AppState>,
    Path(id): Path<String>,
    request: Result<Json<TargetRequest>, JsonRejection>,
) -> ApiResult<Json<Session>> {
    let Json(request) = request?;
    let target: Option<BTreeSet<String>> = request
        .target_documents
        .filter(|ids| !ids.is_empty())
        .map(|ids| ids.into_iter().collect());
    Ok(Json(pipeline.conversations().set_target(&id, target)))
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use docchat_core::{
        EmbeddingConfig, EmbeddingService, FsDocumentStore, GenerationResponse, LanguageModel,
        LlmError, MemoryIndex,
    };
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct EchoModel;

    #[async_trait]
    impl LanguageModel for EchoModel {
        async fn generate(&self, prompt: &str) -> Result<GenerationResponse, LlmError> {
            if prompt.starts_with("Suggest a short") {
                Ok(GenerationResponse::text("Capital Facts"))
            } else if prompt.contains("Paris") {
                Ok(GenerationResponse::text("Paris [#1]"))
            } else {
                Ok(GenerationResponse::text("Unknown."))
            }
        }
    }

    struct DownModel;

    #[async_trait]
    impl LanguageModel for DownModel {
        async fn generate(&self, _prompt: &str) -> Result<GenerationResponse, LlmError> {
            Err(LlmError::Api {
                status: 503,
                message: "overloaded".to_string(),
            })
        }
    }

    fn app_with(model: Arc<dyn LanguageModel>) -> (Router, TempDir) {
        let dir = TempDir::new().expect("tempdir");
        let pipeline = RagPipeline::new(
            Arc::new(MemoryIndex::new()),
            Arc::new(FsDocumentStore::new(dir.path())),
            model,
            EmbeddingService::new(EmbeddingConfig::Ngram { dimensions: 64 }),
        );
        (router(Arc::new(pipeline)), dir)
    }

    fn app() -> (Router, TempDir) {
        app_with(Arc::new(EchoModel))
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    fn json_request(method: Method, uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    fn upload(text: &str) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri("/documents?filename=facts.txt")
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::from(text.to_string()))
            .expect("request")
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("request")
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let (app, _dir) = app();
        let (status, body) = send(&app, get("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn upload_then_chat_returns_cited_answer() {
        let (app, _dir) = app();
        let (status, uploaded) = send(&app, upload("Paris is the capital of France.")).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(uploaded["name"], "Capital Facts");
        let doc_id = uploaded["id"].as_str().expect("id").to_string();

        let (status, answer) = send(
            &app,
            json_request(
                Method::POST,
                "/chat",
                json!({ "query": "What is the capital of France?" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(answer["answer"].as_str().unwrap_or_default().contains("Paris"));
        assert_eq!(answer["citations"][0]["docId"], doc_id.as_str());
        assert_eq!(answer["chatHistory"].as_array().map(Vec::len), Some(2));

        let (status, metadata) = send(&app, get(&format!("/documents/{doc_id}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(metadata["status"], "processed");

        let (_, listed) = send(&app, get("/documents")).await;
        assert_eq!(listed[0]["id"], doc_id.as_str());
    }

    #[tokio::test]
    async fn unsupported_upload_is_a_validation_error() {
        let (app, _dir) = app();
        let request = Request::builder()
            .method(Method::POST)
            .uri("/documents?filename=photo.png")
            .header(header::CONTENT_TYPE, "image/png")
            .body(Body::from("not a document"))
            .expect("request");
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "VALIDATION_ERROR");
        assert!(body["details"].is_string());
    }

    #[tokio::test]
    async fn malformed_json_is_a_validation_error() {
        let (app, _dir) = app();
        let request = Request::builder()
            .method(Method::POST)
            .uri("/chat")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{\"query\": "))
            .expect("request");
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn missing_download_is_not_found_and_delete_is_idempotent() {
        let (app, _dir) = app();
        let (status, body) = send(&app, get("/documents/nothing-here/download")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "NOT_FOUND");

        let (_, uploaded) = send(&app, upload("Paris is the capital of France.")).await;
        let uri = format!("/documents/{}", uploaded["id"].as_str().expect("id"));
        let delete = || {
            Request::builder()
                .method(Method::DELETE)
                .uri(uri.as_str())
                .body(Body::empty())
                .expect("request")
        };

        let (status, first) = send(&app, delete()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["filesRemoved"], 2);
        let (status, second) = send(&app, delete()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(second["deleted"], true);
        assert_eq!(second["filesRemoved"], 0);
    }

    #[tokio::test]
    async fn model_failure_maps_to_bad_gateway() {
        let (app, _dir) = app_with(Arc::new(DownModel));
        let (status, _) = send(&app, upload("Paris is the capital of France.")).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = send(
            &app,
            json_request(Method::POST, "/ask", json!({ "query": "capital?" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], "GENERATION_FAILED");
    }

    #[tokio::test]
    async fn legacy_ask_keeps_no_sessions() {
        let (app, _dir) = app();
        send(&app, upload("Paris is the capital of France.")).await;

        let (status, body) = send(
            &app,
            json_request(
                Method::POST,
                "/ask",
                json!({ "query": "What is the capital of France?" }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["answer"].as_str().unwrap_or_default().contains("Paris"));
        assert!(body.get("sessionId").is_none());

        let (_, sessions) = send(&app, get("/sessions")).await;
        assert_eq!(sessions.as_array().map(Vec::len), Some(0));
    }

    #[tokio::test]
    async fn session_target_can_be_set_and_cleared() {
        let (app, _dir) = app();
        let (status, session) = send(
            &app,
            json_request(
                Method::PUT,
                "/sessions/s1/target",
                json!({ "targetDocuments": ["a", "b"] }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(session["targetDocuments"], json!(["a", "b"]));

        let (_, cleared) = send(
            &app,
            json_request(Method::PUT, "/sessions/s1/target", json!({ "targetDocuments": null })),
        )
        .await;
        assert!(cleared["targetDocuments"].is_null());

        let (status, _) = send(&app, get("/sessions/s1")).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = send(&app, get("/sessions/unknown")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "NOT_FOUND");
    }
}
