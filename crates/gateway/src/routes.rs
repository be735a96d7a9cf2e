//! HTTP surface
//!
//! Every request, whatever its path, goes through the dispatcher; zone
//! selection keys on the Host header alone.

use axum::{
    extract::{Request, State},
    response::{IntoResponse, Response},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Create the gateway router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .fallback(dispatch_request)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Catch-all handler
async fn dispatch_request(State(state): State<AppState>, request: Request) -> Response {
    match state.dispatcher.dispatch(request).await {
        Ok(outcome) => outcome.into_response_with(state.not_handled_status),
        Err(err) => err.into_response(),
    }
}
