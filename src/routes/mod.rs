pub mod api_routes;

use axum::http::Method;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::service::chat_service::ChatService;
use api_routes::{
    chat_handler, delete_conversation_handler, end_conversation_handler, get_conversation_handler,
    health_handler, list_conversations_handler, list_models_handler, switch_model_handler,
    test_api_handler,
};

pub fn create_router(chat_service: ChatService) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/api/chat", post(chat_handler))
        .route(
            "/api/conversation/{id}",
            get(get_conversation_handler).delete(delete_conversation_handler),
        )
        .route("/api/conversations", get(list_conversations_handler))
        .route("/api/end-conversation", post(end_conversation_handler))
        .route("/api/health", get(health_handler))
        .route("/api/test-api", get(test_api_handler))
        .route("/api/models", get(list_models_handler).post(list_models_handler))
        .route("/api/switch-model", post(switch_model_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(chat_service)
}
