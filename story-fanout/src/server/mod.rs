// Server module - HTTP server setup and routing
pub mod handlers;
pub mod state;

use std::future::Future;
use std::net::SocketAddr;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;
use tracing::info;

use self::state::AppState;
use crate::service::FanoutService;

/// Create the Axum application router with all routes and middleware
pub fn create_app(service: FanoutService) -> Router {
    let state = AppState { service };

    Router::new()
        .route("/add-followers", post(handlers::add_followers))
        .route("/post-stories", post(handlers::post_stories))
        .route("/jobs/:job_id", get(handlers::job_status))
        .route("/jobs/:job_id/resume", post(handlers::resume_job))
        .route("/jobs/:job_id/cancel", post(handlers::cancel_job))
        .route("/followers/:user_id/count", get(handlers::follower_count))
        .route("/health", get(handlers::health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the server on the specified address until `shutdown` resolves
pub async fn run_server<F>(app: Router, addr: SocketAddr, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!("Server listening on {}", addr);
    info!("- Add followers: http://{}/add-followers", addr);
    info!("- Post stories: http://{}/post-stories", addr);
    info!("- Health endpoint: http://{}/health", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
}
