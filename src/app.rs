use crate::auth::AuthState;
use crate::config::{Config, PROJECT_NAME};
use crate::error::{AppError, AppResult};
use axum::Router;
use axum::http::HeaderValue;
use axum::http::header::{
    ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS, ACCESS_CONTROL_ALLOW_ORIGIN,
    HeaderName,
};
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::{Arc, Once, OnceLock};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub auth: AuthState,
    pub http: reqwest::Client,
    pub metrics: PrometheusHandle,
}

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static METRICS_ERROR: OnceLock<AppError> = OnceLock::new();
static METRICS_INIT: Once = Once::new();

pub fn load_state() -> AppResult<AppState> {
    load_state_with_config(Config::from_env()?)
}

pub fn load_state_with_config(config: Config) -> AppResult<AppState> {
    let auth = AuthState::new(config.master_key.clone());
    if !config.auth_enabled() {
        tracing::warn!("no master key configured, /v1 endpoints are open");
    }

    let http = reqwest::Client::builder()
        .default_headers(crate::upstream::browser_headers(&config.upstream)?)
        .connect_timeout(config.upstream.session_timeout)
        .build()
        .map_err(|err| AppError::config(format!("http client init failed: {err}")))?;

    let metrics = init_metrics()?;

    Ok(AppState {
        config: Arc::new(config),
        auth,
        http,
        metrics,
    })
}

fn init_metrics() -> AppResult<PrometheusHandle> {
    METRICS_INIT.call_once(|| {
        match metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                let _ = METRICS_HANDLE.set(handle);
            }
            Err(err) => {
                let _ = METRICS_ERROR.set(AppError::config(format!(
                    "metrics init failed: {err}"
                )));
            }
        }
    });

    if let Some(err) = METRICS_ERROR.get() {
        return Err(err.clone());
    }
    METRICS_HANDLE
        .get()
        .cloned()
        .ok_or_else(|| AppError::config("metrics recorder not available"))
}

pub fn build_app(state: AppState) -> Router {
    let metrics_path = state.config.metrics_path.clone();
    tracing::debug!(project = PROJECT_NAME, models = ?state.config.models, "building router");
    Router::<AppState>::new()
        .route("/", get(crate::console::console))
        .route("/v1/models", get(crate::handlers::list_models))
        .route(
            "/v1/chat/completions",
            post(crate::handlers::create_chat_completions),
        )
        .route(&metrics_path, get(crate::handlers::metrics))
        .fallback(crate::handlers::not_found)
        .method_not_allowed_fallback(crate::handlers::method_not_allowed)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            crate::auth::require_master_key,
        ))
        .layer(axum::middleware::from_fn(crate::handlers::preflight))
        .with_state(state)
        .layer(SetResponseHeaderLayer::overriding(
            ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            ACCESS_CONTROL_ALLOW_METHODS,
            HeaderValue::from_static("GET, POST, OPTIONS"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            ACCESS_CONTROL_ALLOW_HEADERS,
            HeaderValue::from_static("Content-Type, Authorization"),
        ))
        .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
            "x-request-id",
        )))
        .layer(SetRequestIdLayer::new(
            HeaderName::from_static("x-request-id"),
            MakeRequestUuid,
        ))
        .layer(TraceLayer::new_for_http())
}
