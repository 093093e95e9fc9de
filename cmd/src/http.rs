use axum::routing::get;
use axum::Router;
use cardpatrol::gauge::PatrolMetrics;
use color_eyre::eyre::Result;
use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use tower_http::trace::{self, TraceLayer};
use tracing::Level;

use super::api;

pub fn router(metrics: Arc<PatrolMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(api::metrics))
        .route("/metrics/reset", get(api::reset).post(api::reset))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(metrics)
}

pub async fn server(addr: SocketAddr, metrics: Arc<PatrolMetrics>) -> Result<()> {
    let listener = TcpListener::bind(addr)?;
    serve(listener, metrics).await
}

pub async fn serve(listener: TcpListener, metrics: Arc<PatrolMetrics>) -> Result<()> {
    tracing::info!("start http server: {:?}", listener.local_addr()?);
    axum::Server::from_tcp(listener)?
        .serve(router(metrics).into_make_service())
        .await?;
    Ok(())
}
