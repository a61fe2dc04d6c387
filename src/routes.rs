use crate::docs::ApiDoc;
use crate::state::AppState;
use axum::Router;
use axum::routing::get;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub fn configure_routes(state: AppState) -> Router<AppState> {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .nest("/api/v1", api_routes())
        .nest("/api/v1/clips", crate::modules::clip::router(state))
        .layer(cors)
}

fn api_routes() -> Router<AppState> {
    Router::new().route("/health", get(|| async { "ok" }))
}
