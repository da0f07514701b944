use crate::config::Config;
use accesscounter_core::{
    CounterRenderer, DynCounterStore, DynLeaseLock, IncrementCounterOperation,
    IncrementCounterOperationRequest, ReadCounterOperation, Result, UpdateError, encode_gif,
};
use axum::{
    Router,
    extract::State,
    http::{HeaderMap, HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{any, get},
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub struct AppState {
    pub increment: IncrementCounterOperation,
    pub read: ReadCounterOperation,
    pub renderer: CounterRenderer,
    pub request: IncrementCounterOperationRequest,
}

impl AppState {
    pub fn new(
        lock: DynLeaseLock,
        store: DynCounterStore,
        renderer: CounterRenderer,
        request: IncrementCounterOperationRequest,
    ) -> Self {
        Self {
            increment: IncrementCounterOperation::new(lock, store.clone()),
            read: ReadCounterOperation::new(store),
            renderer,
            request,
        }
    }

    pub fn from_config(config: &Config, renderer: CounterRenderer) -> Result<Self> {
        let lock = config.lock_builder().build()?;
        let store = config.store_builder().build()?;
        Ok(Self::new(lock, store, renderer, config.increment_request()))
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", any(root_handler))
        .route("/counter.gif", get(counter_image_handler))
        .route("/healthcheck", get(healthcheck_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn run_server(config: Config, renderer: CounterRenderer) -> Result<()> {
    let state = Arc::new(AppState::from_config(&config, renderer)?);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!("failed to listen for shutdown signal: {}", error);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

fn text_response(status: StatusCode, body: &str) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        format!("{}\n", body),
    )
        .into_response()
}

fn internal_error() -> Response {
    text_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
}

fn update_error_response(error: &UpdateError) -> Response {
    match error {
        UpdateError::LockTimeout => text_response(StatusCode::GATEWAY_TIMEOUT, "lock was not granted"),
        error if error.is_timeout() => text_response(StatusCode::GATEWAY_TIMEOUT, "Gateway Timeout"),
        _ => internal_error(),
    }
}

fn counter_page(visit_count: u64) -> String {
    format!(
        r#"<html><head><title>access-counter</title></head><body>{}<br><img src="/counter.gif"/><br></body></html>"#,
        visit_count
    )
}

async fn root_handler(
    State(state): State<Arc<AppState>>,
    method: Method,
    headers: HeaderMap,
) -> Response {
    if method == Method::HEAD {
        tracing::info!("head access");
        return (StatusCode::OK, [(header::CONTENT_TYPE, "text/html")]).into_response();
    }
    if method != Method::GET {
        let mut response = text_response(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
        response
            .headers_mut()
            .insert(header::ALLOW, HeaderValue::from_static("GET, HEAD"));
        return response;
    }

    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    tracing::info!("access {}", user_agent);

    match state.increment.run(state.request.clone()).await {
        Ok(result) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/html")],
            counter_page(result.counter.visit_count),
        )
            .into_response(),
        Err(error) => {
            tracing::error!("increment counter: {}", error);
            update_error_response(&error)
        }
    }
}

async fn counter_image_handler(State(state): State<Arc<AppState>>) -> Response {
    let counter = match state.read.run().await {
        Ok(outcome) => outcome.counter(),
        Err(error) => {
            tracing::error!("read counter: {}", error);
            return internal_error();
        }
    };

    let bitmap = state.renderer.render(counter.visit_count);
    match encode_gif(&bitmap) {
        Ok(image) => (StatusCode::OK, [(header::CONTENT_TYPE, "image/gif")], image).into_response(),
        Err(error) => {
            tracing::error!("encode counter image: {}", error);
            internal_error()
        }
    }
}

async fn healthcheck_handler() -> Response {
    text_response(StatusCode::OK, "200 OK")
}
