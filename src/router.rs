use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::{api, app::App};

pub fn router(app: App) -> Router {
    let api_router = Router::new()
        .route("/jobs", get(api::jobs::list))
        .route("/jobs/create", post(api::jobs::create))
        .route(
            "/jobs/{name}",
            get(api::jobs::show)
                .put(api::jobs::update)
                .delete(api::jobs::destroy),
        )
        .route("/jobs/{name}/test", post(api::jobs::test_run))
        .route("/jobs/upload-file", post(api::upload::upload_file))
        .with_state(app.clone());

    Router::new()
        .route("/liveness", get(api::health_checks::ok))
        .route("/readiness", get(api::health_checks::ok))
        .with_state(app)
        .nest("/api", api_router)
        .layer(TraceLayer::new_for_http())
}
