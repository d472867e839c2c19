use utoipa_axum::router::OpenApiRouter;
use utoipa_axum::routes;

use crate::config::ServerConfig;
use crate::handlers;
use crate::state::AppState;

pub fn api_routes(config: &ServerConfig) -> OpenApiRouter<AppState> {
    let upload = OpenApiRouter::new()
        .routes(routes!(handlers::audio::upload_audio))
        .layer(handlers::audio::upload_body_limit(config.max_upload_size));

    OpenApiRouter::new()
        .routes(routes!(handlers::health::health))
        .routes(routes!(handlers::audio::list_audios))
        .routes(routes!(handlers::audio::download_audio))
        .routes(routes!(handlers::audio::delete_audio))
        .merge(upload)
}
