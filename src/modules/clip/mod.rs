use crate::state::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::routing::{get, patch, post};

pub mod dto;
pub mod handler;
pub mod model;
pub mod repository;
pub mod service;
pub mod transaction;

pub fn router(state: AppState) -> axum::Router<AppState> {
    let public_routes = Router::new()
        .route("/", get(handler::list_clips))
        .route("/search", get(handler::search_clips))
        .route("/progress", get(handler::get_progress))
        .route("/{id}", get(handler::get_clip));

    let protected_routes = Router::new()
        // Size is enforced while streaming to storage.
        .route(
            "/",
            post(handler::upload_clip).layer(DefaultBodyLimit::disable()),
        )
        .route(
            "/{id}",
            patch(handler::update_clip).delete(handler::delete_clip),
        )
        .route_layer(middleware::from_fn_with_state(
            state,
            crate::middleware::auth::auth_middleware,
        ));

    public_routes.merge(protected_routes)
}
