use crate::modules::clip::dto::{
    ClipResponse, CreateClipRequest, ProgressResponse, UpdateClipRequest,
};
use utoipa::Modify;
use utoipa::OpenApi;
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::modules::clip::handler::upload_clip,
        crate::modules::clip::handler::get_clip,
        crate::modules::clip::handler::list_clips,
        crate::modules::clip::handler::search_clips,
        crate::modules::clip::handler::get_progress,
        crate::modules::clip::handler::update_clip,
        crate::modules::clip::handler::delete_clip,
    ),
    components(
        schemas(CreateClipRequest, UpdateClipRequest, ClipResponse, ProgressResponse)
    ),
    tags(
        (name = "Clips", description = "Clip upload, metadata and transcoding progress")
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

pub struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}
