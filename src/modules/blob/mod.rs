//! Loopback HTTP view of the clip blob store.
//!
//! ffmpeg cannot talk to S3, so it reads raw uploads from and `PUT`s its
//! outputs to this listener, which is bound to `127.0.0.1` only.

use crate::state::AppState;
use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::get;

pub mod handler;

pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/s3/{id}/{name}",
            get(handler::get_blob)
                .put(handler::put_blob)
                .post(handler::put_blob),
        )
        .layer(DefaultBodyLimit::disable())
}
