use crate::state::AppState;
use axum::Router;
use tower_http::trace::TraceLayer;

pub fn create_app(state: AppState) -> Router {
    crate::routes::configure_routes(state.clone())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Internal listener the media tools read from and write to.
pub fn create_blob_proxy(state: AppState) -> Router {
    crate::modules::blob::router()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
