use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde_json::json;
use tracing::{error, info};

use crate::errors::AppError;
use crate::models::{
    ChatRequest, ChatResponse, EndConversationRequest, HealthResponse, ModelsResponse,
    SwitchModelRequest,
};
use crate::service::chat_service::ChatService;

// ── Chat ─────────────────────────────────────────────────────────────────────

/// POST `/api/chat` — `{message, conversation_id?, user_email?}`
pub async fn chat_handler(
    State(svc): State<ChatService>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            let body = ChatResponse::failure(invalid_body(&rejection));
            return (StatusCode::BAD_REQUEST, Json(body)).into_response();
        }
    };
    let (body, err) = svc.respond(request).await;
    let status = err.as_ref().map(status_for).unwrap_or(StatusCode::OK);
    (status, Json(body)).into_response()
}

// ── Conversations ────────────────────────────────────────────────────────────

/// GET `/api/conversation/{id}`
pub async fn get_conversation_handler(
    Path(id): Path<String>,
    State(svc): State<ChatService>,
) -> Response {
    match svc.get_conversation(&id).await {
        Ok(conversation) => Json(conversation).into_response(),
        Err(e) => error_response(&e),
    }
}

/// DELETE `/api/conversation/{id}`
pub async fn delete_conversation_handler(
    Path(id): Path<String>,
    State(svc): State<ChatService>,
) -> Response {
    match svc.delete_conversation(&id).await {
        Ok(()) => Json(json!({ "message": "Conversation deleted successfully" })).into_response(),
        Err(e) => error_response(&e),
    }
}

/// GET `/api/conversations`
pub async fn list_conversations_handler(State(svc): State<ChatService>) -> Response {
    match svc.get_conversations().await {
        Ok(convs) => Json(convs).into_response(),
        Err(e) => error_response(&e),
    }
}

/// POST `/api/end-conversation` — emails a transcript snapshot to the admin.
pub async fn end_conversation_handler(
    State(svc): State<ChatService>,
    payload: Result<Json<EndConversationRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            let body = json!({ "error": invalid_body(&rejection) });
            return (StatusCode::BAD_REQUEST, Json(body)).into_response();
        }
    };
    let Some(id) = request.conversation_id.filter(|id| !id.trim().is_empty()) else {
        return error_response(&AppError::ConversationNotFound { id: String::new() });
    };

    match svc.end_conversation(&id, request.user_email.as_deref()).await {
        Ok(None) => Json(json!({ "status": "snapshot_sent" })).into_response(),
        Ok(Some(soft)) => {
            Json(json!({ "status": "snapshot_failed", "error": soft.to_string() })).into_response()
        }
        Err(e) => error_response(&e),
    }
}

// ── Provider ─────────────────────────────────────────────────────────────────

/// GET `/api/health` — local readiness only, no provider call.
pub async fn health_handler(State(svc): State<ChatService>) -> Json<HealthResponse> {
    let gateway = svc.gateway();
    Json(HealthResponse {
        status: "healthy",
        timestamp: Utc::now(),
        model: gateway.active_model(),
        provider_ready: gateway.is_ready(),
    })
}

/// GET `/api/test-api` — one real completion with the active model.
pub async fn test_api_handler(State(svc): State<ChatService>) -> Response {
    match svc.gateway().test_connection().await {
        Ok(report) => Json(report).into_response(),
        Err(e) => {
            error!("Provider connectivity test failed: {e}");
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({ "status": "error", "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

/// GET|POST `/api/models`
pub async fn list_models_handler(State(svc): State<ChatService>) -> Json<ModelsResponse> {
    let gateway = svc.gateway();
    Json(ModelsResponse {
        current_model: gateway.active_model(),
        available_models: gateway.available_models().await,
    })
}

/// POST `/api/switch-model` — `{model}`; rejected if the trial call fails.
pub async fn switch_model_handler(
    State(svc): State<ChatService>,
    payload: Result<Json<SwitchModelRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            let body = json!({
                "status": "error",
                "error": invalid_body(&rejection),
                "current_model": svc.gateway().active_model(),
            });
            return (StatusCode::BAD_REQUEST, Json(body)).into_response();
        }
    };
    let requested = request.model.unwrap_or_default();
    match svc.switch_model(&requested).await {
        Ok(switch) => {
            info!("Model switched via API: {} -> {}", switch.old_model, switch.new_model);
            Json(json!({
                "status": "success",
                "message": format!("Successfully switched to {}", switch.new_model),
                "old_model": switch.old_model,
                "new_model": switch.new_model,
            }))
            .into_response()
        }
        Err(e) => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "status": "error",
                "error": e.to_string(),
                "current_model": svc.gateway().active_model(),
            })),
        )
            .into_response(),
    }
}

// ── Helper ────────────────────────────────────────────────────────────────────

fn invalid_body(rejection: &JsonRejection) -> String {
    format!("Invalid request body: {}", rejection.body_text())
}

fn status_for(err: &AppError) -> StatusCode {
    if err.is_validation() {
        StatusCode::BAD_REQUEST
    } else if err.is_not_found() {
        StatusCode::NOT_FOUND
    } else if err.is_timeout() {
        StatusCode::GATEWAY_TIMEOUT
    } else if matches!(err, AppError::ModelSwitchRejected { .. }) {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::BAD_GATEWAY
    }
}

/// Management errors never echo internal state; not-found gets a fixed message.
fn error_response(err: &AppError) -> Response {
    let status = status_for(err);
    let message =
        if err.is_not_found() { "Conversation not found".to_string() } else { err.to_string() };
    (status, Json(json!({ "error": message }))).into_response()
}
