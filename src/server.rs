// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2025 Blackman Artificial Intelligence Technologies Inc.

//! HTTP front end
//!
//! Every method on every path lands in one handler: render the prompt, run
//! the tool loop, send whatever response the model settled on. Failures
//! become a small HTML error page carrying the request id.

use axum::body::{to_bytes, Body};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Router;
use chrono::SecondsFormat;
use http_body_util::LengthLimitError;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::trace::TraceLayer;

use crate::config::{FallbackConfig, Settings};
use crate::error::Result;
use crate::extract::extract;
use crate::llm::factory::ProviderFactory;
use crate::orchestrator::Orchestrator;
use crate::prompt::{multi_map, parse_body, PromptBuilder, RequestContext};
use crate::tools::{Database, MemoryStore, ToolRegistry, WebResponse};

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Shared, read-only server state
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub prompts: PromptBuilder,
    pub fallback: FallbackConfig,
    pub timeout: Duration,
    pub max_body_bytes: usize,
}

impl AppState {
    /// Wire the provider, tools and prompt sources from settings
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let provider = ProviderFactory::create(settings)?;
        let database = Arc::new(Database::open(&settings.paths.database)?);
        let memory = Arc::new(MemoryStore::new(settings.paths.memory.clone()));
        let tools = Arc::new(ToolRegistry::with_builtins(
            Arc::clone(&database),
            Arc::clone(&memory),
        ));

        tracing::info!(
            provider = provider.name(),
            model = provider.model(),
            max_turns = settings.orchestrator.max_turns,
            tools = ?tools.names(),
            "server state ready"
        );

        let orchestrator =
            Orchestrator::new(provider, tools).with_max_turns(settings.orchestrator.max_turns);
        let prompts = PromptBuilder::new(settings.paths.prompt.clone(), memory, database);

        Ok(Self {
            orchestrator,
            prompts,
            fallback: settings.fallback.clone(),
            timeout: Duration::from_millis(settings.server.timeout_ms),
            max_body_bytes: settings.server.max_body_bytes,
        })
    }
}

/// The catch-all router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .fallback(handle_request)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until Ctrl-C
pub async fn serve(state: Arc<AppState>, addr: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "nokode listening");

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

async fn handle_request(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let started = Instant::now();
    let request_id = new_request_id();
    let (parts, body) = request.into_parts();

    let ip = client_ip(
        &parts.headers,
        parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0),
    );
    tracing::info!(
        request_id = %request_id,
        method = %parts.method,
        path = %parts.uri.path(),
        ip = %ip,
        "request received"
    );

    let bytes = match to_bytes(body, state.max_body_bytes).await {
        Ok(bytes) => bytes,
        Err(e) => {
            let status = if is_length_limit(&e) {
                StatusCode::PAYLOAD_TOO_LARGE
            } else {
                StatusCode::BAD_REQUEST
            };
            tracing::warn!(request_id = %request_id, error = %e, %status, "failed to read request body");
            return error_page(
                &request_id,
                status,
                &format!("failed to read request body: {}", e),
            );
        }
    };

    let content_type = parts
        .headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let query = parts.uri.query().unwrap_or("");
    let context = RequestContext {
        method: parts.method.to_string(),
        path: parts.uri.path().to_string(),
        url: parts.uri.to_string(),
        query: multi_map(url::form_urlencoded::parse(query.as_bytes())),
        headers: multi_map(parts.headers.iter().map(|(name, value)| {
            (
                name.as_str().to_string(),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            )
        })),
        body: parse_body(&bytes, content_type),
        ip,
        timestamp: chrono::Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    };

    let prompt = state.prompts.build(&context).await;
    let run = tokio::time::timeout(state.timeout, state.orchestrator.run(&prompt)).await;

    let response = match run {
        Ok(Ok(outcome)) => {
            tracing::info!(
                request_id = %request_id,
                turns = outcome.turns,
                llm_ms = started.elapsed().as_millis() as u64,
                "model run completed"
            );
            let web = extract(&outcome, &state.fallback);
            to_http_response(web, &request_id)
        }
        Ok(Err(e)) => {
            tracing::error!(request_id = %request_id, error = %e, "request failed");
            error_page(&request_id, StatusCode::INTERNAL_SERVER_ERROR, &e.to_string())
        }
        Err(_) => {
            tracing::error!(
                request_id = %request_id,
                timeout_ms = state.timeout.as_millis() as u64,
                "request timed out"
            );
            error_page(
                &request_id,
                StatusCode::INTERNAL_SERVER_ERROR,
                &format!(
                    "request timed out after {}ms",
                    state.timeout.as_millis()
                ),
            )
        }
    };

    tracing::info!(
        request_id = %request_id,
        status = response.status().as_u16(),
        duration_ms = started.elapsed().as_millis() as u64,
        "response sent"
    );
    response
}

/// Short id used in logs, the error page and the `x-request-id` header
pub fn new_request_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..9].to_string()
}

/// First `X-Forwarded-For` hop, then `X-Real-IP`, then the socket peer
pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(first) = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return first.to_string();
    }

    if let Some(real) = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
    {
        return real.to_string();
    }

    peer.map(|addr| addr.ip().to_string()).unwrap_or_default()
}

/// Turn the model's response into an HTTP response
pub fn to_http_response(web: WebResponse, request_id: &str) -> Response {
    let status = StatusCode::from_u16(web.status_code).unwrap_or_else(|_| {
        tracing::warn!(status = web.status_code, "invalid status code from model");
        StatusCode::INTERNAL_SERVER_ERROR
    });

    let mut response = Response::new(Body::from(web.body));
    *response.status_mut() = status;

    let headers = response.headers_mut();
    for (name, value) in &web.headers {
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                headers.insert(name, value);
            }
            _ => tracing::warn!(header = %name, "dropping invalid response header"),
        }
    }
    if let Ok(id) = HeaderValue::from_str(request_id) {
        headers.insert(REQUEST_ID_HEADER, id);
    }
    response
}

/// The HTML error page
/// Whether a body read failed because it went over `max_body_bytes`
fn is_length_limit(error: &axum::Error) -> bool {
    let mut source: Option<&(dyn std::error::Error + 'static)> = Some(error);
    while let Some(err) = source {
        if err.is::<LengthLimitError>() {
            return true;
        }
        source = err.source();
    }
    false
}

pub fn error_page(request_id: &str, status: StatusCode, message: &str) -> Response {
    let html = format!(
        "<html>\n  <body>\n    <h1>Server Error</h1>\n    <p>An error occurred while processing your request.</p>\n    <p><strong>Request ID:</strong> {}</p>\n    <pre>{}</pre>\n  </body>\n</html>\n",
        escape_html(request_id),
        escape_html(message)
    );

    let mut response = (
        status,
        [(CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"))],
        html,
    )
        .into_response();
    if let Ok(id) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, id);
    }
    response
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}
