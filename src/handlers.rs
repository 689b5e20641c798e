use crate::app::AppState;
use crate::config::PROJECT_NAME;
use crate::error::{AppError, AppResult};
use crate::openai::{ChatRequest, ChunkFactory, now_ts};
use crate::reframer::{self, Reframer};
use crate::upstream;
use axum::Json;
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Request, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures_util::StreamExt;
use serde_json::{Value, json};
use std::convert::Infallible;
use tokio::sync::mpsc;

pub const TRACE_HEADER: &str = "x-trace-id";

pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    state.metrics.render()
}

pub async fn list_models(State(state): State<AppState>) -> Json<Value> {
    let created = now_ts();
    let data: Vec<Value> = state
        .config
        .models
        .iter()
        .map(|id| {
            json!({
                "id": id,
                "object": "model",
                "created": created,
                "owned_by": PROJECT_NAME
            })
        })
        .collect();
    Json(json!({ "object": "list", "data": data }))
}

pub async fn create_chat_completions(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> AppResult<Response> {
    let Json(req) = payload.map_err(|rej| AppError::invalid_request(rej.body_text()))?;
    let prompt = req.prompt()?;
    let model = req.resolve_model(&state.config.default_model);
    let stream = req.wants_stream();
    let request_id = format!("req-{}", uuid::Uuid::new_v4());
    metrics::counter!(
        "chat4o_chat_requests_total",
        "mode" => if stream { "stream" } else { "blocking" }
    )
    .increment(1);
    tracing::info!(request_id = %request_id, model = %model, stream, "chat completion request");

    let upstream_cfg = &state.config.upstream;
    let session = upstream::init_session(&state.http, upstream_cfg, &model, &prompt)
        .await
        .map_err(|err| upstream_failure(&request_id, "init_session", err))?;
    let upstream_resp = upstream::send_chat(&state.http, upstream_cfg, &session, &prompt)
        .await
        .map_err(|err| upstream_failure(&request_id, "send_chat", err))?;

    let chunks = ChunkFactory::new(request_id.clone(), model);
    let reframer = Reframer::new(chunks.clone());
    let read_timeout = upstream_cfg.read_timeout;

    if !stream {
        let content =
            reframer::collect_content(upstream_resp.bytes_stream(), reframer, read_timeout)
                .await
                .map_err(|err| {
                    tracing::warn!(request_id = %request_id, error = %err, "upstream body failed");
                    AppError::internal(err.to_string())
                })?;
        let mut resp = Json(chunks.completion(&content)).into_response();
        insert_trace_header(&mut resp, &request_id);
        return Ok(resp);
    }

    let (tx, rx) = mpsc::channel::<Bytes>(state.config.stream_buffer);
    tokio::spawn(reframer::pump(
        upstream_resp.bytes_stream(),
        reframer,
        tx,
        read_timeout,
    ));
    let body = Body::from_stream(
        tokio_stream::wrappers::ReceiverStream::new(rx).map(Ok::<Bytes, Infallible>),
    );
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, mime::TEXT_EVENT_STREAM.as_ref())
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .header(TRACE_HEADER, request_id.as_str())
        .body(body)
        .map_err(|err| AppError::internal(err.to_string()))
}

fn upstream_failure(request_id: &str, stage: &'static str, err: upstream::UpstreamError) -> AppError {
    metrics::counter!(
        "chat4o_upstream_failures_total",
        "stage" => stage,
        "kind" => err.kind_label()
    )
    .increment(1);
    tracing::warn!(request_id = %request_id, stage, error = %err, "upstream call failed");
    err.into()
}

fn insert_trace_header(resp: &mut Response, request_id: &str) {
    if let Ok(value) = HeaderValue::from_str(request_id) {
        resp.headers_mut().insert(TRACE_HEADER, value);
    }
}

/// Answers every `OPTIONS` request with 204; CORS headers are added by the
/// outer layer.
pub async fn preflight(req: Request, next: Next) -> Response {
    if req.method() == Method::OPTIONS {
        return StatusCode::NO_CONTENT.into_response();
    }
    next.run(req).await
}

pub async fn not_found(req: Request) -> AppError {
    AppError::new(
        StatusCode::NOT_FOUND,
        "not_found",
        format!("path not found: {}", req.uri().path()),
    )
}

pub async fn method_not_allowed(req: Request) -> AppError {
    AppError::new(
        StatusCode::METHOD_NOT_ALLOWED,
        "method_not_allowed",
        format!("{} is not supported on {}", req.method(), req.uri().path()),
    )
}
