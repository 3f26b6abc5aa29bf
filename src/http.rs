//! HTTP transport for the chat core
//!
//! Health and feature flags are plain JSON. The conversation endpoint never
//! surfaces dependency failures; those degrade inside the orchestrator.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    BoxError, Json, Router,
    error_handling::HandleErrorLayer,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Deserialize;
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::chat::{ChatOrchestrator, ChatReply, ConversationRequest};
use crate::config::Config;
use crate::error::{BabyShieldError, Result};
use crate::rollout::ChatFlags;

/// Longest accepted user question, in characters
pub const MAX_QUERY_CHARS: usize = 2000;

/// Headroom on top of the turn budget before the transport gives up
const REQUEST_SLACK: Duration = Duration::from_secs(2);

/// Shared state for the HTTP server
#[derive(Clone)]
pub struct HttpState {
    pub config: Arc<Config>,
    pub orchestrator: Arc<ChatOrchestrator>,
}

pub async fn health_handler() -> impl IntoResponse {
    Json(json!({"status": "ok", "service": "babyshield-chat"}))
}

#[derive(Debug, Deserialize)]
pub struct FlagsQuery {
    pub user_id: Option<String>,
}

pub async fn flags_handler(
    State(state): State<HttpState>,
    Query(query): Query<FlagsQuery>,
) -> Json<ChatFlags> {
    Json(ChatFlags::resolve(
        &state.config.runtime,
        query.user_id.as_deref(),
    ))
}

pub async fn conversation_handler(
    State(state): State<HttpState>,
    Json(request): Json<ConversationRequest>,
) -> Result<Json<ChatReply>> {
    let flags = ChatFlags::resolve(&state.config.runtime, request.user_id.as_deref());
    if !flags.chat_enabled_for_user {
        return Err(BabyShieldError::FeatureDisabled {
            message: "chat is not enabled for this user".to_string(),
        });
    }
    if let Some(query) = &request.user_query
        && query.chars().count() > MAX_QUERY_CHARS
    {
        return Err(BabyShieldError::InvalidParams {
            message: format!("user_query exceeds {} characters", MAX_QUERY_CHARS),
        });
    }

    match state.orchestrator.handle_turn(request).await {
        Ok(reply) => Ok(Json(reply)),
        Err(err) => {
            if err.status_code().is_server_error() {
                warn!(error = %err, "conversation turn failed");
            }
            Err(err)
        }
    }
}

fn transport_error(err: BoxError, ceiling: Duration) -> Response {
    if err.is::<tower::timeout::error::Elapsed>() {
        return BabyShieldError::Timeout {
            operation: "conversation request".to_string(),
            timeout_ms: ceiling.as_millis() as u64,
        }
        .into_response();
    }
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({
            "error": {"code": "INTERNAL", "status": 500, "message": err.to_string()}
        })),
    )
        .into_response()
}

pub fn router(state: HttpState) -> Router {
    let ceiling = state.config.chat.total_budget() + REQUEST_SLACK;
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/v1/chat/flags", get(flags_handler))
        .route(
            "/api/v1/chat/conversation",
            post(conversation_handler).layer(
                ServiceBuilder::new()
                    .layer(HandleErrorLayer::new(move |err: BoxError| async move {
                        transport_error(err, ceiling)
                    }))
                    .timeout(ceiling),
            ),
        )
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any))
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn start_http_server(
    config: Arc<Config>,
    orchestrator: Arc<ChatOrchestrator>,
) -> Result<()> {
    let bind = config.runtime.http_bind;
    let app = router(HttpState {
        config,
        orchestrator,
    });

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .map_err(|e| BabyShieldError::Internal {
            message: format!("failed to bind {}: {}", bind, e),
        })?;
    info!("chat HTTP server listening on {}", bind);

    axum::serve(listener, app)
        .await
        .map_err(|e| BabyShieldError::Internal {
            message: format!("HTTP server error: {}", e),
        })
}
